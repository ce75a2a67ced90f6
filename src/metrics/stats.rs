//! Five-number summaries of episode statistics.

/// Normalization of the reported standard deviation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Spread {
    /// Divide by `n`.
    Population,
    /// Divide by `n - 1` (Bessel-corrected). A single value has spread 0.
    Sample,
}

/// Mean, median, min, max and both standard deviations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    /// Population standard deviation.
    pub std: f64,
    /// Sample standard deviation; 0 for a single value.
    pub sample_std: f64,
}

impl Summary {
    /// Summarizes `values`; `None` when empty.
    ///
    /// The median of an even-sized sample averages the two middle values.
    pub fn of(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let sq_dev = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>();
        let sample_std = if values.len() > 1 {
            (sq_dev / (n - 1.0)).sqrt()
        } else {
            0.0
        };

        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };

        Some(Self {
            mean,
            median,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            std: (sq_dev / n).sqrt(),
            sample_std,
        })
    }

    /// `(suffix, value)` pairs in emission order, with `std` normalized per
    /// `spread`.
    pub fn entries(&self, spread: Spread) -> [(&'static str, f64); 5] {
        let std = match spread {
            Spread::Population => self.std,
            Spread::Sample => self.sample_std,
        };
        [
            ("mean", self.mean),
            ("median", self.median),
            ("min", self.min),
            ("max", self.max),
            ("std", std),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_has_no_summary() {
        assert!(Summary::of(&[]).is_none());
    }

    #[test]
    fn odd_sample() {
        let s = Summary::of(&[3.0, 1.0, 2.0]).unwrap();
        assert_eq!(s.mean, 2.0);
        assert_eq!(s.median, 2.0);
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 3.0);
        assert!((s.std - (2.0f64 / 3.0).sqrt()).abs() < 1e-12);
        assert!((s.sample_std - 1.0).abs() < 1e-12);
    }

    #[test]
    fn entries_pick_requested_spread() {
        let s = Summary::of(&[1.0, 3.0]).unwrap();
        assert_eq!(s.entries(Spread::Population)[4], ("std", 1.0));
        assert!((s.entries(Spread::Sample)[4].1 - 2.0f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn even_sample_median_averages_middle() {
        let s = Summary::of(&[4.0, 1.0, 10.0, 2.0]).unwrap();
        assert_eq!(s.median, 3.0);
    }

    #[test]
    fn single_value_has_zero_std() {
        let s = Summary::of(&[5.0]).unwrap();
        assert_eq!(s.std, 0.0);
        assert_eq!(s.sample_std, 0.0);
        assert_eq!(s.median, 5.0);
    }
}

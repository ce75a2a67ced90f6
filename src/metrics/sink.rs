//! Destinations for training metrics.

use thiserror::Error;
use tracing::info;

use super::TrainingMetrics;

/// Error raised by a [`MetricSink`].
///
/// Sink failures never abort training; the optimizer logs them and moves on.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Metric sink unavailable: {0}")]
    Unavailable(String),

    #[error("Metric sink I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Receives the metrics of each agent after its update.
pub trait MetricSink: Send + Sync {
    fn write(&self, metrics: &TrainingMetrics, step: u64) -> Result<(), SinkError>;
}

/// Logs every metric through `tracing` at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleSink;

impl MetricSink for ConsoleSink {
    fn write(&self, metrics: &TrainingMetrics, step: u64) -> Result<(), SinkError> {
        for (name, value) in metrics {
            info!(step, metric = %name, value, "training metric");
        }
        Ok(())
    }
}

#[cfg(feature = "tensorboard")]
pub use tensorboard::TensorBoardSink;

#[cfg(feature = "tensorboard")]
mod tensorboard {
    use std::path::Path;
    use std::sync::Mutex;

    use tensorboard_rs::summary_writer::SummaryWriter;

    use super::{MetricSink, SinkError, TrainingMetrics};

    /// Writes scalars to TensorBoard event files.
    pub struct TensorBoardSink {
        writer: Mutex<SummaryWriter>,
    }

    impl TensorBoardSink {
        /// Opens a writer in `log_dir`, creating the directory if needed.
        pub fn new(log_dir: impl AsRef<Path>) -> Result<Self, SinkError> {
            let log_dir = log_dir.as_ref();
            std::fs::create_dir_all(log_dir)?;
            Ok(Self {
                writer: Mutex::new(SummaryWriter::new(log_dir)),
            })
        }
    }

    impl MetricSink for TensorBoardSink {
        fn write(&self, metrics: &TrainingMetrics, step: u64) -> Result<(), SinkError> {
            let mut writer = self
                .writer
                .lock()
                .map_err(|_| SinkError::Unavailable("summary writer lock poisoned".into()))?;
            for (name, value) in metrics {
                writer.add_scalar(name, *value as f32, step as usize);
            }
            writer.flush();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_sink_accepts_metrics() {
        let mut metrics = TrainingMetrics::new();
        metrics.insert("a/policy_loss".into(), 0.5);
        assert!(ConsoleSink.write(&metrics, 3).is_ok());
    }

    #[test]
    fn io_failures_convert_to_sink_errors() {
        let err: SinkError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert!(matches!(err, SinkError::Io(_)));
        assert_eq!(err.to_string(), "Metric sink I/O error: denied");
    }

    #[cfg(feature = "tensorboard")]
    #[test]
    fn tensorboard_sink_fails_when_log_dir_is_a_file() {
        let blocker = std::env::temp_dir().join(format!("ppoptim-tb-{}", std::process::id()));
        std::fs::write(&blocker, b"").unwrap();
        let result = TensorBoardSink::new(blocker.join("run"));
        std::fs::remove_file(&blocker).unwrap();
        assert!(matches!(result, Err(SinkError::Io(_))));
    }

    #[test]
    fn sink_error_messages() {
        let err = SinkError::Unavailable("closed".into());
        assert_eq!(err.to_string(), "Metric sink unavailable: closed");
    }
}

//! Scoped device placement for agents.

use std::ops::{Deref, DerefMut};

use tch::Device;

use super::Agent;

/// Keeps an agent on the training device for the lifetime of the guard.
///
/// Dropping the guard moves the agent back to CPU, including when the update
/// returns early with an error.
pub struct DevicePlacement<'a> {
    agent: &'a mut dyn Agent,
    device: Device,
}

impl<'a> DevicePlacement<'a> {
    /// Moves `agent` to `device`. A no-op if it is already there.
    pub fn acquire(agent: &'a mut dyn Agent, device: Device) -> Self {
        agent.set_device(device);
        Self { agent, device }
    }

    /// Device the agent is placed on.
    pub fn device(&self) -> Device {
        self.device
    }
}

impl<'a> Deref for DevicePlacement<'a> {
    type Target = dyn Agent + 'a;

    fn deref(&self) -> &Self::Target {
        &*self.agent
    }
}

impl<'a> DerefMut for DevicePlacement<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.agent
    }
}

impl Drop for DevicePlacement<'_> {
    fn drop(&mut self) {
        self.agent.set_device(Device::Cpu);
    }
}

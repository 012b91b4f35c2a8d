//! The device models that populate a simulation.
//!
//! Each model implements [`Model`](ges_core::Model) and runs as a handful of
//! perpetual processes. Models never touch another machine's properties;
//! they only see what other machines send over the shared tunnels.

mod leak_detector;
pub use leak_detector::{LeakDetector, LeakDetectorConfig};

mod valve_controller;
pub use valve_controller::{MotorState, ValveConfig, ValveController, ValvePosition};

use ges_core::{
    machine::MachineError,
    packet::{EventType, OperationType, Payload, RadioMessage},
    tunnel::TunnelError,
    Machine, SimHandle,
};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// A normally distributed quantity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Spread {
    pub mean: f64,
    pub stddev: f64,
}

impl Spread {
    pub const fn new(mean: f64, stddev: f64) -> Self {
        Self { mean, stddev }
    }

    /// Draws a value. A spread with an invalid standard deviation always
    /// yields its mean.
    pub fn sample(&self, sim: &SimHandle) -> f64 {
        match Normal::new(self.mean, self.stddev) {
            Ok(normal) => sim.with_rng(|rng| normal.sample(rng)),
            Err(_) => self.mean,
        }
    }

    /// Draws a value usable as a delay.
    pub fn sample_delay(&self, sim: &SimHandle) -> f64 {
        self.sample(sim).max(0.0)
    }
}

/// A uniformly distributed number of seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Window {
    pub min: f64,
    pub max: f64,
}

impl Window {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn sample(&self, sim: &SimHandle) -> f64 {
        if self.max <= self.min {
            return self.min.max(0.0);
        }
        sim.with_rng(|rng| rng.gen_range(self.min..=self.max)).max(0.0)
    }
}

/// Draws a new value around `current` with the given standard deviation.
fn drift(sim: &SimHandle, current: f64, stddev: f64) -> f64 {
    Spread::new(current, stddev).sample(sim)
}

/// Sends an event on behalf of the machine itself.
fn event(machine: &Machine, kind: EventType, extra: Option<Payload>) -> Result<(), MachineError> {
    tolerate(machine, machine.send_event(kind, "self", extra).map(drop))
}

fn operation(machine: &Machine, kind: OperationType, data: Payload) -> Result<(), MachineError> {
    tolerate(machine, machine.send_operation(kind, data).map(drop))
}

fn radio(machine: &Machine, message: RadioMessage) -> Result<(), MachineError> {
    tolerate(machine, machine.broadcast(message).map(drop))
}

fn sync(machine: &Machine) -> Result<(), MachineError> {
    tolerate(machine, machine.sync_to_db().map(drop))
}

/// A device keeps running when nobody is listening or a listener is
/// backed up. The packet is dropped and the loss logged.
fn tolerate(machine: &Machine, result: Result<(), MachineError>) -> Result<(), MachineError> {
    match result {
        Err(MachineError::Tunnel(
            error @ (TunnelError::NoSubscribers(_) | TunnelError::Congested { .. }),
        )) => {
            tracing::warn!(machine = machine.instance_name(), %error, "packet dropped");
            Ok(())
        }
        other => other,
    }
}

fn probe_data(probe: &str) -> Payload {
    let mut data = Payload::new();
    data.insert("from".into(), probe.into());
    data
}

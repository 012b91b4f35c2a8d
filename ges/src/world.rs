//! A fully assembled simulation: the engine, one radio tunnel and one WAN
//! tunnel shared by every device, and the collaborators listening on them.

use crate::{
    cloud::{self, CloudSink},
    config::WorldConfig,
    devices::{LeakDetector, ValveController},
    monitor::Monitor,
};
use ges_core::{
    registry::RegistryError,
    sim::{ExitStatus, ProcessFailure, SimError},
    Machine, MachineConfig, Model, Packet, Registry, Sim, SimHandle, SimTime, Tunnel, TunnelKind,
};
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use thiserror::Error as ThisError;

/// Which machines to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    #[default]
    Devices,
    Valves,
    LeakDetectors,
}

impl DeviceKind {
    fn codename(self) -> Option<&'static str> {
        match self {
            Self::Devices => None,
            Self::Valves => Some(ValveController::CODENAME),
            Self::LeakDetectors => Some(LeakDetector::CODENAME),
        }
    }
}

#[derive(Debug, ThisError)]
pub enum WorldError {
    #[error("{0}")]
    Sim(#[from] SimError),
    #[error("{0}")]
    Registry(#[from] RegistryError),
    #[error("{0}")]
    Process(#[from] ProcessFailure),
}

pub struct World {
    sim: Sim,
    registry: Registry,
    rf: Tunnel<Packet>,
    wan: Tunnel<Packet>,
    monitor: Monitor,
    config: WorldConfig,
}

impl World {
    /// Builds the engine and its tunnels and starts the radio monitor and
    /// the cloud forwarder.
    ///
    /// When a cloud endpoint is configured and a tokio runtime is running,
    /// requests are posted by a worker task on that runtime. Otherwise they
    /// are only logged.
    pub fn new(config: WorldConfig) -> Result<Self, WorldError> {
        Self::with_runtime(config, tokio::runtime::Handle::try_current().ok())
    }

    /// Like [`new`](Self::new), with the runtime that cloud requests are
    /// posted from given explicitly.
    pub fn with_runtime(config: WorldConfig, runtime: Option<tokio::runtime::Handle>) -> Result<Self, WorldError> {
        let sim = Sim::with_config(config.sim.clone());
        let handle = sim.handle();
        let rf = Tunnel::new(TunnelKind::Rf, &handle);
        let wan = Tunnel::new(TunnelKind::Wan, &handle);
        let (monitor, _) = Monitor::spawn(&handle, &rf)?;
        let sink = cloud_sink(config.cloud_endpoint.as_deref(), runtime);
        cloud::spawn_forwarder(&handle, &wan, sink)?;
        Ok(Self {
            registry: Registry::new(&handle),
            sim,
            rf,
            wan,
            monitor,
            config,
        })
    }

    pub fn handle(&self) -> SimHandle {
        self.sim.handle()
    }

    pub fn now(&self) -> SimTime {
        self.sim.now()
    }

    pub fn rf(&self) -> &Tunnel<Packet> {
        &self.rf
    }

    pub fn wan(&self) -> &Tunnel<Packet> {
        &self.wan
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    fn machine_config(&self) -> MachineConfig {
        MachineConfig::new().tunnel(self.rf.clone()).tunnel(self.wan.clone())
    }

    fn spawn_many<M: Model>(&mut self, count: usize, model: impl Fn() -> M) -> Result<Vec<Rc<Machine>>, RegistryError> {
        let mut machines = Vec::with_capacity(count);
        for _ in 0..count {
            let config = self.machine_config();
            machines.push(self.registry.spawn(model(), config)?.machine);
        }
        Ok(machines)
    }

    pub fn spawn_valve_controllers(&mut self, count: usize) -> Result<Vec<Rc<Machine>>, RegistryError> {
        let config = self.config.valve.clone();
        self.spawn_many(count, || ValveController::new(config.clone()))
    }

    pub fn spawn_leak_detectors(&mut self, count: usize) -> Result<Vec<Rc<Machine>>, RegistryError> {
        let config = self.config.leak_detector.clone();
        self.spawn_many(count, || LeakDetector::new(config.clone()))
    }

    /// Makes the valve `parent` act on radio packets from the leak detector
    /// `child`. Both may be named by instance name, serial number or MAC
    /// address.
    pub fn pair_leak_detector(&self, parent: &str, child: &str) -> Result<(), RegistryError> {
        self.registry.pair(parent, child)
    }

    pub fn list(&self, kind: DeviceKind) -> Vec<Rc<Machine>> {
        self.registry.list(kind.codename())
    }

    /// Runs the simulation until no events remain or until `until`.
    pub fn run(&mut self, until: Option<SimTime>) -> Result<ExitStatus, ProcessFailure> {
        let status = self.sim.run(until)?;
        tracing::info!(
            now = %self.sim.now(),
            ?status,
            radio_packets = self.monitor.received(),
            "simulation paused"
        );
        Ok(status)
    }

    /// Runs for `seconds` of simulated time from now.
    pub fn run_for(&mut self, seconds: f64) -> Result<ExitStatus, WorldError> {
        let until = self
            .now()
            .checked_add(seconds)
            .ok_or(SimError::InvalidDelay(seconds))?;
        Ok(self.run(Some(until))?)
    }

    pub fn shut_down(&self) {
        self.sim.shut_down();
    }

    /// Paces the next run from the current wall-clock instant.
    pub fn restart_pacing(&self) {
        self.sim.restart_pacing();
    }
}

fn cloud_sink(endpoint: Option<&str>, runtime: Option<tokio::runtime::Handle>) -> CloudSink {
    let Some(endpoint) = endpoint else {
        return CloudSink::Log;
    };
    match runtime {
        Some(runtime) => {
            let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
            runtime.spawn(cloud::run_worker(endpoint.to_string(), rx));
            CloudSink::Channel(tx)
        }
        None => {
            tracing::warn!(endpoint, "no tokio runtime, cloud requests will only be logged");
            CloudSink::Log
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_list_and_pair() {
        let mut world = World::new(WorldConfig::default()).unwrap();
        let valves = world.spawn_valve_controllers(2).unwrap();
        let detectors = world.spawn_leak_detectors(3).unwrap();
        assert_eq!(world.list(DeviceKind::Devices).len(), 5);
        assert_eq!(world.list(DeviceKind::Valves).len(), 2);
        assert_eq!(world.list(DeviceKind::LeakDetectors).len(), 3);

        world
            .pair_leak_detector(valves[0].serial_number(), detectors[2].mac_address())
            .unwrap();
        assert!(matches!(
            world.pair_leak_detector(detectors[0].instance_name(), valves[1].instance_name()),
            Err(RegistryError::Machine(_))
        ));
    }

    #[test]
    fn run_for_advances_the_clock() {
        let mut world = World::new(WorldConfig::default()).unwrap();
        world.spawn_leak_detectors(1).unwrap();
        assert_eq!(world.run_for(30.0).unwrap(), ExitStatus::ReachedLimit);
        assert_eq!(world.now(), SimTime::from_secs(30.0));
        assert_eq!(world.run_for(30.0).unwrap(), ExitStatus::ReachedLimit);
        assert_eq!(world.now(), SimTime::from_secs(60.0));
        assert!(world.monitor().received() >= 1);
    }
}

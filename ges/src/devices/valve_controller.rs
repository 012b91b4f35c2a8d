use super::{drift, event, operation, probe_data, sync, Spread, Window};
use crate::devices::LeakDetector;
use ges_core::{
    generate,
    machine::{MachineError, PropertyError},
    packet::{EventType, OperationType, Packet, RadioMessage},
    Machine, Model, Process, ProcessError, Property, TunnelKind,
};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::{
    cell::RefCell,
    collections::BTreeSet,
    fmt::{self, Display},
    rc::Rc,
    str::FromStr,
};
use tracing::{debug, info, warn};

/// Tunables for a valve controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValveConfig {
    /// Seconds between heartbeats.
    pub heartbeat_period: u32,
    /// Time until the built-in probe next gets wet.
    pub leak_detection_time: Spread,
    /// How long the motor takes to move the valve.
    pub motor_run_time: Spread,
    /// Percent chance, from 0 to 100, that a motor run stalls.
    pub chance_to_stall: u32,
    pub initial_temperature: f64,
    pub temperature_stddev: f64,
    /// Seconds between the valve closing and opening again. `None` leaves a
    /// closed valve closed.
    pub reopen_delay: Option<Window>,
    /// Whether the built-in probe ever gets wet.
    pub internal_leaks: bool,
}

impl Default for ValveConfig {
    fn default() -> Self {
        Self {
            heartbeat_period: 3600,
            leak_detection_time: Spread::new(1800.0, 300.0),
            motor_run_time: Spread::new(5.0, 1.0),
            chance_to_stall: 5,
            initial_temperature: 73.0,
            temperature_stddev: 2.0,
            reopen_delay: Some(Window::new(5.0, 10.0)),
            internal_leaks: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValvePosition {
    Opened,
    Closed,
    /// The motor stalled. Only a repair gets the valve moving again.
    Stuck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MotorState {
    Resting,
    Opening,
    Closing,
}

impl ValvePosition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Opened => "OPENED",
            Self::Closed => "CLOSED",
            Self::Stuck => "STUCK",
        }
    }
}

impl MotorState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Resting => "RESTING",
            Self::Opening => "OPENING",
            Self::Closing => "CLOSING",
        }
    }
}

impl Display for ValvePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Display for MotorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValvePosition {
    type Err = PropertyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPENED" => Ok(Self::Opened),
            "CLOSED" => Ok(Self::Closed),
            "STUCK" => Ok(Self::Stuck),
            other => Err(PropertyError::Missing(format!("valve_position {other}"))),
        }
    }
}

impl FromStr for MotorState {
    type Err = PropertyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RESTING" => Ok(Self::Resting),
            "OPENING" => Ok(Self::Opening),
            "CLOSING" => Ok(Self::Closing),
            other => Err(PropertyError::Missing(format!("motor_state {other}"))),
        }
    }
}

/// The direction of a motor run.
#[derive(Clone, Copy)]
enum Travel {
    Open,
    Close,
}

impl Travel {
    fn target(self) -> ValvePosition {
        match self {
            Self::Open => ValvePosition::Opened,
            Self::Close => ValvePosition::Closed,
        }
    }

    fn motor(self) -> MotorState {
        match self {
            Self::Open => MotorState::Opening,
            Self::Close => MotorState::Closing,
        }
    }

    fn started(self) -> EventType {
        match self {
            Self::Open => EventType::ValveOpening,
            Self::Close => EventType::ValveClosing,
        }
    }

    fn finished(self) -> EventType {
        match self {
            Self::Open => EventType::ValveOpened,
            Self::Close => EventType::ValveClosed,
        }
    }
}

/// A motorized shutoff valve with a built-in water probe.
///
/// The controller shuts the valve whenever its own probe or a paired leak
/// detector reports water, and reports everything it does to the cloud.
pub struct ValveController {
    config: ValveConfig,
    /// Instance names of the leak detectors this valve listens to.
    paired: RefCell<BTreeSet<String>>,
}

impl ValveController {
    pub const CODENAME: &'static str = "tiddymun";

    pub fn new(config: ValveConfig) -> Self {
        Self {
            config,
            paired: RefCell::new(BTreeSet::new()),
        }
    }

    pub fn config(&self) -> &ValveConfig {
        &self.config
    }

    /// Whether radio packets from `sender` are acted on.
    pub fn is_paired(&self, sender: &str) -> bool {
        self.paired.borrow().contains(sender)
    }

    pub fn position(machine: &Machine) -> Result<ValvePosition, PropertyError> {
        machine.state("valve_position")?.ok_str()?.parse()
    }

    pub fn motor(machine: &Machine) -> Result<MotorState, PropertyError> {
        machine.state("motor_state")?.ok_str()?.parse()
    }

    /// Drives the valve closed. Must be awaited from one of the machine's
    /// processes.
    pub async fn close(&self, process: &Process, machine: &Machine) -> Result<(), ProcessError> {
        let moved = self.travel(process, machine, Travel::Close).await?;
        if let (true, Some(delay)) = (moved, self.config.reopen_delay) {
            process.timeout(delay.sample(machine.sim()))?.await;
            self.open(process, machine).await?;
        }
        Ok(())
    }

    /// Drives the valve open. Must be awaited from one of the machine's
    /// processes.
    pub async fn open(&self, process: &Process, machine: &Machine) -> Result<(), ProcessError> {
        self.travel(process, machine, Travel::Open).await?;
        Ok(())
    }

    /// Frees a stuck valve, leaving it open with the motor at rest.
    pub fn repair(&self, machine: &Machine) -> Result<(), ProcessError> {
        if Self::position(machine)? != ValvePosition::Stuck {
            debug!(machine = machine.instance_name(), "valve is not stuck, nothing to repair");
            return Ok(());
        }
        machine.set_state("valve_position", ValvePosition::Opened.as_str())?;
        machine.set_state("motor_state", MotorState::Resting.as_str())?;
        info!(machine = machine.instance_name(), "valve repaired");
        event(machine, EventType::ValveOpened, None)?;
        Ok(())
    }

    /// Runs the motor toward `travel`'s target. Returns whether the valve
    /// reached it.
    async fn travel(&self, process: &Process, machine: &Machine, travel: Travel) -> Result<bool, ProcessError> {
        let name = machine.instance_name();
        let target = travel.target();
        match Self::position(machine)? {
            ValvePosition::Stuck => {
                warn!(machine = name, "valve is stuck, ignoring request to move to {target}");
                return Ok(false);
            }
            position if position == target => {
                info!(machine = name, "valve already {target}");
                event(machine, travel.finished(), None)?;
                return Ok(false);
            }
            _ => {}
        }
        if Self::motor(machine)? != MotorState::Resting {
            info!(machine = name, "motor busy, aborting");
            return Ok(false);
        }

        info!(machine = name, "moving valve to {target}");
        event(machine, travel.started(), None)?;
        machine.set_state("motor_state", travel.motor().as_str())?;

        let run_time = self.config.motor_run_time.sample_delay(machine.sim());
        process.timeout(run_time)?.await;

        let chance = self.config.chance_to_stall;
        let stalled = machine.sim().with_rng(|rng| rng.gen_range(0..100) < chance);
        machine.set_state("motor_state", MotorState::Resting.as_str())?;
        if stalled {
            machine.set_state("valve_position", ValvePosition::Stuck.as_str())?;
            warn!(machine = name, "valve stuck");
            event(machine, EventType::ValveStuck, None)?;
            return Ok(false);
        }
        machine.set_state("valve_position", target.as_str())?;
        info!(machine = name, "valve {target}");
        event(machine, travel.finished(), None)?;
        Ok(true)
    }

    fn update_temperature(&self, machine: &Machine) -> Result<(), ProcessError> {
        let current = machine.state("temperature")?.ok_float()?;
        let next = drift(machine.sim(), current, self.config.temperature_stddev);
        machine.set_state("temperature", next)?;
        Ok(())
    }

    fn set_probe(&self, machine: &Machine, wet: bool) -> Result<(), ProcessError> {
        machine.set_state("probe", wet)?;
        let kind = if wet {
            EventType::LeakDetected
        } else {
            EventType::LeakCleared
        };
        info!(machine = machine.instance_name(), wet, "probe changed");
        event(machine, kind, Some(probe_data("probe")))?;
        Ok(())
    }

    fn spawn_child<F, Fut>(process: &Process, machine: &Machine, role: &str, body: F) -> Result<(), ProcessError>
    where
        F: FnOnce(Process) -> Fut,
        Fut: std::future::Future<Output = Result<(), ProcessError>> + 'static,
    {
        process
            .handle()
            .spawn(format!("{}-{role}", machine.instance_name()), body)?;
        Ok(())
    }

    async fn run_main(self: Rc<Self>, process: Process, machine: Rc<Machine>) -> Result<(), ProcessError> {
        info!(machine = machine.instance_name(), "powered, creating in db");
        operation(&machine, OperationType::MachineCreate, machine.to_dict())?;
        process.timeout(5.0)?.await;
        info!(machine = machine.instance_name(), "created");

        let (this, owner) = (self.clone(), machine.clone());
        Self::spawn_child(&process, &machine, "heartbeat", move |p| this.run_heartbeat(p, owner))?;
        if self.config.internal_leaks {
            let (this, owner) = (self.clone(), machine.clone());
            Self::spawn_child(&process, &machine, "leak", move |p| this.run_leak(p, owner))?;
        }
        if machine.has_tunnel(TunnelKind::Rf) {
            let (this, owner) = (self.clone(), machine.clone());
            Self::spawn_child(&process, &machine, "rf", move |p| this.run_rf_listener(p, owner))?;
        }

        let idle = Window::new(60.0, 300.0);
        loop {
            process.timeout(idle.sample(machine.sim()))?.await;
            self.update_temperature(&machine)?;
            debug!(machine = machine.instance_name(), "beep");
        }
    }

    async fn run_heartbeat(self: Rc<Self>, process: Process, machine: Rc<Machine>) -> Result<(), ProcessError> {
        loop {
            self.update_temperature(&machine)?;
            event(&machine, EventType::Heartbeat, None)?;
            sync(&machine)?;
            process.timeout(machine.heartbeat_period()?)?.await;
        }
    }

    async fn run_leak(self: Rc<Self>, process: Process, machine: Rc<Machine>) -> Result<(), ProcessError> {
        loop {
            let until_leak = self.config.leak_detection_time.sample_delay(machine.sim());
            process.timeout(until_leak)?.await;
            self.set_probe(&machine, true)?;

            let (this, owner) = (self.clone(), machine.clone());
            Self::spawn_child(&process, &machine, "close", move |p| async move {
                this.close(&p, &owner).await
            })?;

            let until_dry = machine.sim().with_rng(|rng| rng.gen_range(2..=8u32));
            process.timeout(f64::from(until_dry))?.await;
            self.set_probe(&machine, false)?;
            sync(&machine)?;
        }
    }

    async fn run_rf_listener(self: Rc<Self>, process: Process, machine: Rc<Machine>) -> Result<(), ProcessError> {
        let rx = machine.receive_channel(TunnelKind::Rf)?;
        loop {
            let Some(packet) = process.receive(&rx).await.ready() else {
                debug!(machine = machine.instance_name(), "rf listener interrupted");
                continue;
            };
            Self::handle_radio(&self, &process, &machine, packet)?;
        }
    }

    fn handle_radio(this: &Rc<Self>, process: &Process, machine: &Rc<Machine>, packet: Packet) -> Result<(), ProcessError> {
        let Some(message) = packet.radio() else {
            return Ok(());
        };
        if packet.sender == machine.instance_name() {
            return Ok(());
        }
        if !this.is_paired(&packet.sender) {
            debug!(machine = machine.instance_name(), sender = %packet.sender, "not paired, radio packet dropped");
            return Ok(());
        }
        info!(machine = machine.instance_name(), sender = %packet.sender, %message, "radio packet received");
        match message {
            RadioMessage::Wet => {
                event(machine, EventType::LeakDetected, Some(probe_data(&packet.sender)))?;
                let (valve, owner) = (this.clone(), machine.clone());
                Self::spawn_child(process, machine, "close", move |p| async move {
                    valve.close(&p, &owner).await
                })?;
            }
            RadioMessage::Dry => {
                event(machine, EventType::LeakCleared, Some(probe_data(&packet.sender)))?;
            }
            RadioMessage::Heartbeat => {}
        }
        sync(machine)?;
        Ok(())
    }
}

impl Default for ValveController {
    fn default() -> Self {
        Self::new(ValveConfig::default())
    }
}

impl Model for ValveController {
    fn codename(&self) -> &'static str {
        Self::CODENAME
    }

    fn generate_serial(&self, rng: &mut dyn RngCore) -> String {
        generate::serial_number(rng, "GVC1", "01")
    }

    fn generate_mac_address(&self, rng: &mut dyn RngCore) -> String {
        format!("30AEA402{}", generate::string(rng, 4))
    }

    fn configure(&self, machine: &Machine) -> Result<(), MachineError> {
        let location = machine.sim().with_rng(|rng| generate::location(rng));
        machine.save_setting(Property::new(
            "heartbeat_period",
            "Device heartbeat period (in seconds)",
            self.config.heartbeat_period,
        ));
        machine.save_setting(Property::new(
            "location_gps_lat",
            "Device latitude",
            location.lat,
        ));
        machine.save_setting(Property::new(
            "location_gps_lon",
            "Device longitude",
            location.lon,
        ));

        machine.save_state(Property::new(
            "firmware_version",
            "Valve controller firmware version",
            "4.0.0",
        ));
        machine.save_state(Property::new(
            "temperature",
            "Ambient air temperature near the device (in Fahrenheit)",
            self.config.initial_temperature,
        ));
        machine.save_state(Property::new(
            "valve_position",
            "Position of valve as OPENED/CLOSED/STUCK",
            ValvePosition::Opened.as_str(),
        ));
        machine.save_state(Property::new(
            "motor_state",
            "State of motor as opening/closing/resting",
            MotorState::Resting.as_str(),
        ));
        machine.save_state(Property::new(
            "motor_current_avg",
            "Average current draw (in Amps) of motor during operation",
            0.0,
        ));
        machine.save_state(Property::new(
            "probe",
            "True if water detected at water probe",
            false,
        ));
        Ok(())
    }

    fn start(self: Rc<Self>, machine: Rc<Machine>) -> Result<(), MachineError> {
        let sim = machine.sim().clone();
        let name = format!("{}-main", machine.instance_name());
        sim.spawn(name, move |process| self.run_main(process, machine))?;
        Ok(())
    }

    fn pair(&self, machine: &Machine, child: &Machine) -> Result<(), MachineError> {
        if child.codename() != LeakDetector::CODENAME {
            return Err(MachineError::IncompatiblePair {
                parent: Self::CODENAME,
                child: child.codename().to_string(),
            });
        }
        let added = self
            .paired
            .borrow_mut()
            .insert(child.instance_name().to_string());
        if added {
            info!(
                machine = machine.instance_name(),
                leak_detector = child.instance_name(),
                "leak detector paired"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ges_core::{
        packet::PacketBody, sim::ExitStatus, MachineConfig, Receiver, Registry, Sim, SimConfig, Tunnel,
    };

    fn still_valve(chance_to_stall: u32) -> ValveController {
        ValveController::new(ValveConfig {
            chance_to_stall,
            reopen_delay: None,
            internal_leaks: false,
            ..ValveConfig::default()
        })
    }

    fn events(sink: &Receiver<Packet>) -> Vec<EventType> {
        sink.drain().iter().filter_map(Packet::event_kind).collect()
    }

    /// Runs `valve.close()` `times` times in a row on a dormant valve.
    fn close_valve(valve: ValveController, times: usize) -> (Rc<Machine>, Vec<EventType>) {
        let mut sim = Sim::with_config(SimConfig {
            seed: Some(11),
            ..Default::default()
        });
        let handle = sim.handle();
        let wan = Tunnel::new(TunnelKind::Wan, &handle);
        let sink = wan.subscribe();
        let mut registry = Registry::new(&handle);
        let device = registry
            .spawn(valve, MachineConfig::new().tunnel(wan).dormant())
            .unwrap();
        let (model, machine) = (device.model.clone(), device.machine.clone());
        handle
            .spawn("closer", move |process| async move {
                for _ in 0..times {
                    model.close(&process, &machine).await?;
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(sim.run(None).unwrap(), ExitStatus::Exhausted);
        (device.machine, events(&sink))
    }

    #[test]
    fn close_without_stall() {
        let (machine, events) = close_valve(still_valve(0), 1);
        assert_eq!(ValveController::position(&machine), Ok(ValvePosition::Closed));
        assert_eq!(ValveController::motor(&machine), Ok(MotorState::Resting));
        assert_eq!(events, [EventType::ValveClosing, EventType::ValveClosed]);
    }

    #[test]
    fn close_on_a_closed_valve_only_reports() {
        let (machine, events) = close_valve(still_valve(0), 2);
        assert_eq!(ValveController::position(&machine), Ok(ValvePosition::Closed));
        assert_eq!(
            events,
            [EventType::ValveClosing, EventType::ValveClosed, EventType::ValveClosed]
        );
    }

    #[test]
    fn stalled_valve_ignores_further_closes() {
        let (machine, events) = close_valve(still_valve(100), 2);
        assert_eq!(ValveController::position(&machine), Ok(ValvePosition::Stuck));
        assert_eq!(ValveController::motor(&machine), Ok(MotorState::Resting));
        assert_eq!(events, [EventType::ValveClosing, EventType::ValveStuck]);
    }

    #[test]
    fn close_reopens_after_delay() {
        let valve = ValveController::new(ValveConfig {
            chance_to_stall: 0,
            reopen_delay: Some(Window::new(5.0, 10.0)),
            internal_leaks: false,
            ..ValveConfig::default()
        });
        let (machine, events) = close_valve(valve, 1);
        assert_eq!(ValveController::position(&machine), Ok(ValvePosition::Opened));
        assert_eq!(
            events,
            [
                EventType::ValveClosing,
                EventType::ValveClosed,
                EventType::ValveOpening,
                EventType::ValveOpened
            ]
        );
    }

    #[test]
    fn repair_frees_a_stuck_valve() {
        let mut sim = Sim::new();
        let handle = sim.handle();
        let wan = Tunnel::new(TunnelKind::Wan, &handle);
        let sink = wan.subscribe();
        let mut registry = Registry::new(&handle);
        let device = registry
            .spawn(still_valve(100), MachineConfig::new().tunnel(wan).dormant())
            .unwrap();
        let (model, machine) = (device.model.clone(), device.machine.clone());
        handle
            .spawn("fixer", move |process| async move {
                model.close(&process, &machine).await?;
                model.repair(&machine)
            })
            .unwrap();
        sim.run(None).unwrap();
        assert_eq!(ValveController::position(&device.machine), Ok(ValvePosition::Opened));
        assert_eq!(ValveController::motor(&device.machine), Ok(MotorState::Resting));
        assert_eq!(
            events(&sink),
            [EventType::ValveClosing, EventType::ValveStuck, EventType::ValveOpened]
        );
    }

    #[test]
    fn busy_motor_refuses_a_second_run() {
        let mut sim = Sim::new();
        let handle = sim.handle();
        let wan = Tunnel::new(TunnelKind::Wan, &handle);
        let sink = wan.subscribe();
        let mut registry = Registry::new(&handle);
        let device = registry
            .spawn(still_valve(0), MachineConfig::new().tunnel(wan).dormant())
            .unwrap();
        for _ in 0..2 {
            let (model, machine) = (device.model.clone(), device.machine.clone());
            handle
                .spawn("closer", move |process| async move { model.close(&process, &machine).await })
                .unwrap();
        }
        sim.run(None).unwrap();
        assert_eq!(events(&sink), [EventType::ValveClosing, EventType::ValveClosed]);
    }

    #[test]
    fn configured_identity_and_properties() {
        let sim = Sim::new();
        let mut registry = Registry::new(&sim.handle());
        let device = registry
            .spawn(ValveController::default(), MachineConfig::new().dormant())
            .unwrap();
        let machine = &device.machine;
        assert_eq!(machine.codename(), "tiddymun");
        assert!(machine.serial_number().starts_with("GVC101"));
        assert!(machine.mac_address().starts_with("30AEA402"));
        assert_eq!(machine.mac_address().len(), 12);
        assert_eq!(machine.heartbeat_period(), Ok(3600.0));
        assert_eq!(machine.state("firmware_version"), Ok("4.0.0".into()));
        assert_eq!(machine.states().len(), 6);
        assert_eq!(machine.settings().len(), 3);
    }

    #[test]
    fn only_leak_detectors_pair() {
        let sim = Sim::new();
        let mut registry = Registry::new(&sim.handle());
        let valve = registry
            .spawn(ValveController::default(), MachineConfig::new().dormant())
            .unwrap();
        let other = registry
            .spawn(ValveController::default(), MachineConfig::new().dormant())
            .unwrap();
        let detector = registry
            .spawn(LeakDetector::default(), MachineConfig::new().named("basement").dormant())
            .unwrap();
        assert!(matches!(
            registry.pair(valve.machine.instance_name(), other.machine.instance_name()),
            Err(ges_core::registry::RegistryError::Machine(MachineError::IncompatiblePair { .. }))
        ));
        registry
            .pair(valve.machine.instance_name(), detector.machine.mac_address())
            .unwrap();
        assert!(valve.model.is_paired("basement"));
        assert!(!other.model.is_paired("basement"));
    }

    #[test]
    fn unpaired_radio_is_ignored() {
        let mut sim = Sim::new();
        let handle = sim.handle();
        let rf = Tunnel::new(TunnelKind::Rf, &handle);
        let wan = Tunnel::new(TunnelKind::Wan, &handle);
        let sink = wan.subscribe();
        let mut registry = Registry::new(&handle);
        let config = MachineConfig::new().tunnel(rf.clone()).tunnel(wan);
        let valve = registry.spawn(still_valve(0), config).unwrap();

        sim.run(Some(ges_core::SimTime::from_secs(10.0))).unwrap();
        sink.drain();
        rf.send(Packet::new("stranger", sim.now(), PacketBody::Radio(RadioMessage::Wet)))
            .unwrap();
        sim.run(Some(ges_core::SimTime::from_secs(20.0))).unwrap();
        assert!(events(&sink).is_empty());
        assert_eq!(ValveController::position(&valve.machine), Ok(ValvePosition::Opened));
    }
}

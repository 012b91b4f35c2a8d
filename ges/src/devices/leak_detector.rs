use super::{drift, event, operation, probe_data, radio, sync, Window};
use ges_core::{
    generate,
    machine::MachineError,
    packet::{EventType, OperationType, RadioMessage},
    Machine, Model, Process, ProcessError, Property,
};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use tracing::info;

const INITIAL_BATTERY_VOLTAGE: f64 = 3600.0;
/// Fraction of the battery voltage lost every simulated second, giving
/// roughly a year of battery life.
const BATTERY_DECAY: f64 = 5e-8;
const PROBES: [&str; 2] = ["top_probe", "bottom_probe"];

/// Tunables for a leak detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeakDetectorConfig {
    pub heartbeat_period: u32,
    /// Seconds between one leak drying up and the next one starting.
    pub leak_timeframe: Window,
    /// How long a probe stays wet.
    pub wet_duration: f64,
    pub initial_temperature: f64,
    pub temperature_stddev: f64,
}

impl Default for LeakDetectorConfig {
    fn default() -> Self {
        Self {
            heartbeat_period: 3600,
            leak_timeframe: Window::new(60.0, 3600.0),
            wet_duration: 10.0,
            initial_temperature: 73.0,
            temperature_stddev: 2.0,
        }
    }
}

/// A battery powered water sensor with a probe at the top and one at the
/// bottom. It reports leaks over radio to paired valves and over the WAN to
/// the cloud.
#[derive(Default)]
pub struct LeakDetector {
    config: LeakDetectorConfig,
}

impl LeakDetector {
    pub const CODENAME: &'static str = "ahurani";

    pub fn new(config: LeakDetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LeakDetectorConfig {
        &self.config
    }

    /// The battery voltage, in millivolts, after `elapsed` simulated seconds.
    pub fn battery_voltage(elapsed: f64) -> f64 {
        INITIAL_BATTERY_VOLTAGE * (1.0 - BATTERY_DECAY).powf(elapsed)
    }

    fn update_readings(&self, machine: &Machine) -> Result<(), ProcessError> {
        let current = machine.state("temperature")?.ok_float()?;
        let next = drift(machine.sim(), current, self.config.temperature_stddev);
        machine.set_state("temperature", next)?;
        let voltage = Self::battery_voltage(machine.sim().now().as_secs());
        machine.set_state("battery_voltage", voltage)?;
        Ok(())
    }

    async fn run_main(self: Rc<Self>, process: Process, machine: Rc<Machine>) -> Result<(), ProcessError> {
        self.update_readings(&machine)?;
        info!(machine = machine.instance_name(), "powered, creating in db");
        operation(&machine, OperationType::MachineCreate, machine.to_dict())?;
        process.timeout(5.0)?.await;
        info!(machine = machine.instance_name(), "created");

        let (this, owner) = (self.clone(), machine.clone());
        process.handle().spawn(
            format!("{}-heartbeat", machine.instance_name()),
            move |p| this.run_heartbeat(p, owner),
        )?;

        loop {
            process.timeout(self.config.leak_timeframe.sample(machine.sim()))?.await;
            let probe = PROBES[machine.sim().with_rng(|rng| rng.gen_range(0..PROBES.len()))];
            info!(machine = machine.instance_name(), probe, "leak!");
            machine.set_state(probe, true)?;
            radio(&machine, RadioMessage::Wet)?;
            event(&machine, EventType::LeakDetected, Some(probe_data(probe)))?;

            process.timeout(self.config.wet_duration)?.await;
            machine.set_state(probe, false)?;
            radio(&machine, RadioMessage::Dry)?;
            event(&machine, EventType::LeakCleared, Some(probe_data(probe)))?;
            info!(machine = machine.instance_name(), probe, "dry");
            sync(&machine)?;
        }
    }

    async fn run_heartbeat(self: Rc<Self>, process: Process, machine: Rc<Machine>) -> Result<(), ProcessError> {
        loop {
            self.update_readings(&machine)?;
            radio(&machine, RadioMessage::Heartbeat)?;
            event(&machine, EventType::Heartbeat, None)?;
            sync(&machine)?;
            process.timeout(machine.heartbeat_period()?)?.await;
        }
    }
}

impl Model for LeakDetector {
    fn codename(&self) -> &'static str {
        Self::CODENAME
    }

    fn generate_serial(&self, rng: &mut dyn RngCore) -> String {
        generate::serial_number(rng, "GLD1", "01")
    }

    fn generate_mac_address(&self, rng: &mut dyn RngCore) -> String {
        format!("30AEA{}", generate::string(rng, 7))
    }

    fn configure(&self, machine: &Machine) -> Result<(), MachineError> {
        machine.save_setting(Property::new(
            "heartbeat_period",
            "Device heartbeat period (in seconds)",
            self.config.heartbeat_period,
        ));
        machine.save_state(Property::new(
            "firmware_version",
            "Leak detector firmware version",
            "1.0.0",
        ));
        machine.save_state(Property::new(
            "temperature",
            "Ambient air temperature near the device (in Fahrenheit)",
            self.config.initial_temperature,
        ));
        machine.save_state(Property::new(
            "battery_voltage",
            "Battery voltage (in millivolts)",
            INITIAL_BATTERY_VOLTAGE,
        ));
        machine.save_state(Property::new(
            "top_probe",
            "Top water probe state (true indicates wet)",
            false,
        ));
        machine.save_state(Property::new(
            "bottom_probe",
            "Bottom water probe state (true indicates wet)",
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
}

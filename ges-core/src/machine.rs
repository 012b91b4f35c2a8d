use crate::{
    channel::Receiver,
    generate,
    logging::packet_event,
    packet::{EventType, OperationType, Packet, PacketBody, Payload, RadioMessage},
    sim::{SimError, SimHandle},
    tunnel::{Delivery, Tunnel, TunnelError, TunnelKind},
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{cell::RefCell, collections::BTreeMap, fmt, rc::Rc};
use thiserror::Error as ThisError;

pub mod property;
pub use property::{Properties, Property, PropertyError, Value, ValueKind};

/// Length of the serial number a model generates unless it overrides
/// [`Model::generate_serial`].
pub const SERIAL_NUMBER_LENGTH: usize = 16;
/// Length of the MAC address a model generates unless it overrides
/// [`Model::generate_mac_address`].
pub const MAC_ADDRESS_LENGTH: usize = 12;

/// Immutable facts about a machine, fixed when it is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub codename: String,
    pub serial_number: String,
    pub programmed_on: String,
    pub mac_address: String,
}

#[derive(Debug, Clone, PartialEq, ThisError)]
pub enum MachineError {
    #[error("No {0} tunnel is attached to this machine")]
    TunnelUnavailable(TunnelKind),
    #[error("More than one {0} tunnel was attached")]
    DuplicateTunnel(TunnelKind),
    #[error("Instance names must not be empty")]
    InvalidInstanceName,
    #[error("{0} machines cannot be paired with other machines")]
    PairingUnsupported(&'static str),
    #[error("{parent} cannot be paired with a {child}")]
    IncompatiblePair {
        parent: &'static str,
        child: String,
    },
    #[error("{0}")]
    Tunnel(#[from] TunnelError),
    #[error("{0}")]
    Property(#[from] PropertyError),
    #[error("{0}")]
    Sim(#[from] SimError),
}

/// The behavior of one kind of device.
///
/// A model decides how its machines are identified, which settings and
/// states they carry, and which processes bring them to life.
pub trait Model: 'static {
    /// The short name shared by every machine of this model.
    fn codename(&self) -> &'static str;

    fn generate_serial(&self, rng: &mut dyn RngCore) -> String {
        generate::string(rng, SERIAL_NUMBER_LENGTH)
    }

    fn generate_mac_address(&self, rng: &mut dyn RngCore) -> String {
        generate::string(rng, MAC_ADDRESS_LENGTH)
    }

    /// Adds the model's settings and states to a freshly created machine.
    fn configure(&self, _machine: &Machine) -> Result<(), MachineError> {
        Ok(())
    }

    /// Spawns the processes that run the machine.
    fn start(self: Rc<Self>, machine: Rc<Machine>) -> Result<(), MachineError>;

    /// Associates `child` with `machine`, for models that act on what other
    /// machines report.
    fn pair(&self, _machine: &Machine, _child: &Machine) -> Result<(), MachineError> {
        Err(MachineError::PairingUnsupported(self.codename()))
    }
}

/// Options for a new machine.
#[derive(Clone, Default)]
pub struct MachineConfig {
    /// Defaults to `machine-<serial number>`.
    pub instance_name: Option<String>,
    /// Values that replace the model's defaults after it is configured.
    pub settings: Vec<(String, Value)>,
    pub tunnels: Vec<Tunnel<Packet>>,
    /// Create the machine without starting its processes.
    pub dormant: bool,
}

impl MachineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.instance_name = Some(name.into());
        self
    }

    pub fn tunnel(mut self, tunnel: Tunnel<Packet>) -> Self {
        self.tunnels.push(tunnel);
        self
    }

    pub fn setting(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.settings.push((name.into(), value.into()));
        self
    }

    pub fn dormant(mut self) -> Self {
        self.dormant = true;
        self
    }
}

/// A simulated device.
///
/// A machine owns its identity, two lists of [`Property`]s (settings, which
/// the cloud may change, and states, which the device reports), and the
/// tunnels it talks on. Its behavior comes from the [`Model`] it was created
/// with.
pub struct Machine {
    metadata: Metadata,
    instance_name: String,
    settings: RefCell<Properties>,
    states: RefCell<Properties>,
    tunnels: BTreeMap<TunnelKind, Tunnel<Packet>>,
    sim: SimHandle,
}

impl Machine {
    /// Creates and configures a machine without starting it. Most callers
    /// want [`Registry::spawn`](crate::Registry::spawn) instead.
    pub fn new(sim: &SimHandle, model: &dyn Model, config: &MachineConfig) -> Result<Self, MachineError> {
        let (serial_number, mac_address) = sim.with_rng(|rng| {
            (model.generate_serial(rng), model.generate_mac_address(rng))
        });
        let instance_name = match &config.instance_name {
            Some(name) if name.trim().is_empty() => return Err(MachineError::InvalidInstanceName),
            Some(name) => name.clone(),
            None => format!("machine-{serial_number}"),
        };

        let mut tunnels = BTreeMap::new();
        for tunnel in &config.tunnels {
            if tunnels.insert(tunnel.kind(), tunnel.clone()).is_some() {
                return Err(MachineError::DuplicateTunnel(tunnel.kind()));
            }
        }

        let mut settings = Properties::new();
        settings.save(Property::new(
            "heartbeat_period",
            "Device heartbeat period (in seconds)",
            360_000u32,
        ));
        let mut states = Properties::new();
        states.save(Property::new(
            "firmware_version",
            "Device firmware version",
            "0.0.1",
        ));

        let machine = Self {
            metadata: Metadata {
                codename: model.codename().to_string(),
                serial_number,
                programmed_on: chrono::Local::now().to_rfc3339(),
                mac_address,
            },
            instance_name,
            settings: RefCell::new(settings),
            states: RefCell::new(states),
            tunnels,
            sim: sim.clone(),
        };
        model.configure(&machine)?;
        for (name, value) in &config.settings {
            machine.set_setting(name, value.clone())?;
        }
        machine.heartbeat_period()?;
        Ok(machine)
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    pub fn codename(&self) -> &str {
        &self.metadata.codename
    }

    pub fn serial_number(&self) -> &str {
        &self.metadata.serial_number
    }

    pub fn mac_address(&self) -> &str {
        &self.metadata.mac_address
    }

    pub fn sim(&self) -> &SimHandle {
        &self.sim
    }

    pub fn setting(&self, name: &str) -> Result<Value, PropertyError> {
        self.settings.borrow().value(name).cloned()
    }

    pub fn state(&self, name: &str) -> Result<Value, PropertyError> {
        self.states.borrow().value(name).cloned()
    }

    /// Adds or replaces a setting.
    pub fn save_setting(&self, property: Property) {
        self.settings.borrow_mut().save(property);
    }

    /// Adds or replaces a state.
    pub fn save_state(&self, property: Property) {
        self.states.borrow_mut().save(property);
    }

    pub fn set_setting(&self, name: &str, value: impl Into<Value>) -> Result<(), PropertyError> {
        self.settings.borrow_mut().set(name, value)
    }

    pub fn set_state(&self, name: &str, value: impl Into<Value>) -> Result<(), PropertyError> {
        self.states.borrow_mut().set(name, value)
    }

    pub fn settings(&self) -> Properties {
        self.settings.borrow().clone()
    }

    pub fn states(&self) -> Properties {
        self.states.borrow().clone()
    }

    /// The `heartbeat_period` setting, in seconds. Always positive.
    pub fn heartbeat_period(&self) -> Result<f64, PropertyError> {
        let value = self.setting("heartbeat_period")?;
        let period = value.as_f64().ok_or(PropertyError::WrongKind {
            expected: ValueKind::Uint32,
            actual: value.kind(),
        })?;
        if period > 0.0 {
            Ok(period)
        } else {
            Err(PropertyError::NonPositive("heartbeat_period".into()))
        }
    }

    pub fn has_tunnel(&self, kind: TunnelKind) -> bool {
        self.tunnels.contains_key(&kind)
    }

    /// Subscribes to the tunnel of the given kind.
    pub fn receive_channel(&self, kind: TunnelKind) -> Result<Receiver<Packet>, MachineError> {
        self.tunnels
            .get(&kind)
            .map(Tunnel::subscribe)
            .ok_or(MachineError::TunnelUnavailable(kind))
    }

    /// Builds a packet from this machine stamped with the current times.
    pub fn packet(&self, body: PacketBody) -> Packet {
        Packet::new(self.instance_name.clone(), self.sim.now(), body)
    }

    /// Sends `packet` on the tunnel of the given kind.
    pub fn transmit(&self, kind: TunnelKind, packet: Packet) -> Result<Delivery, MachineError> {
        let tunnel = self
            .tunnels
            .get(&kind)
            .ok_or(MachineError::TunnelUnavailable(kind))?;
        packet_event(kind, &packet);
        Ok(tunnel.send(packet)?)
    }

    /// Broadcasts a radio message to nearby devices.
    pub fn broadcast(&self, message: RadioMessage) -> Result<Delivery, MachineError> {
        self.transmit(TunnelKind::Rf, self.packet(PacketBody::Radio(message)))
    }

    /// Asks the cloud to carry out an operation.
    pub fn send_operation(&self, kind: OperationType, data: Payload) -> Result<Delivery, MachineError> {
        self.transmit(TunnelKind::Wan, self.packet(PacketBody::Operation { kind, data }))
    }

    /// Reports an event to the cloud.
    pub fn send_event(
        &self,
        kind: EventType,
        origin: &str,
        extra: Option<Payload>,
    ) -> Result<Delivery, MachineError> {
        let mut data = Payload::new();
        data.insert("target".into(), json!(format!("machine-{}", self.metadata.serial_number)));
        data.insert("type".into(), json!(kind.name()));
        data.insert("origin".into(), json!(origin));
        data.insert("timestamp".into(), json!(chrono::Local::now().to_rfc3339()));
        data.insert("data".into(), extra.map_or(serde_json::Value::Null, serde_json::Value::Object));
        self.transmit(TunnelKind::Wan, self.packet(PacketBody::Event { kind, data }))
    }

    /// Sends one update operation per setting and per state. Returns the
    /// number of operations sent.
    pub fn sync_to_db(&self) -> Result<usize, MachineError> {
        let serial = &self.metadata.serial_number;
        tracing::debug!(machine = %self.instance_name, "syncing to db");
        let mut sent = 0;
        for setting in self.settings().iter() {
            let data = payload(json!({
                "machine_id": serial,
                "setting_name": setting.name,
                "setting_data": setting.data,
            }));
            self.send_operation(OperationType::MachineUpdateSetting, data)?;
            sent += 1;
        }
        for state in self.states().iter() {
            let data = payload(json!({
                "machine_id": serial,
                "state_name": state.name,
                "state_data": state.data,
            }));
            self.send_operation(OperationType::MachineUpdateState, data)?;
            sent += 1;
        }
        Ok(sent)
    }

    /// A snapshot of the machine as a JSON object with `metadata`,
    /// `settings` and `states` keys.
    pub fn to_dict(&self) -> Payload {
        payload(json!({
            "metadata": self.metadata,
            "settings": self.settings(),
            "states": self.states(),
        }))
    }

    /// The [`to_dict`](Self::to_dict) snapshot as a string with sorted keys.
    pub fn to_json(&self, pretty: bool) -> Result<String, serde_json::Error> {
        let snapshot = serde_json::Value::Object(self.to_dict());
        if pretty {
            serde_json::to_string_pretty(&snapshot)
        } else {
            serde_json::to_string(&snapshot)
        }
    }
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("instance_name", &self.instance_name)
            .field("metadata", &self.metadata)
            .field("tunnels", &self.tunnels.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn payload(value: serde_json::Value) -> Payload {
    match value {
        serde_json::Value::Object(map) => map,
        other => {
            let mut map = Payload::new();
            map.insert("value".into(), other);
            map
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{sim::Sim, tunnel::TunnelError};

    struct Gadget;

    impl Model for Gadget {
        fn codename(&self) -> &'static str {
            "gadget"
        }

        fn configure(&self, machine: &Machine) -> Result<(), MachineError> {
            machine.save_state(Property::new("firmware_version", "Firmware", "2.0.0"));
            machine.save_state(Property::new("temperature", "Degrees", 70.0));
            Ok(())
        }

        fn start(self: Rc<Self>, _machine: Rc<Machine>) -> Result<(), MachineError> {
            Ok(())
        }
    }

    #[test]
    fn defaults_and_overrides() {
        let sim = Sim::new();
        let config = MachineConfig::new().setting("heartbeat_period", 60u32);
        let machine = Machine::new(&sim.handle(), &Gadget, &config).unwrap();
        assert_eq!(machine.codename(), "gadget");
        assert_eq!(machine.serial_number().len(), SERIAL_NUMBER_LENGTH);
        assert_eq!(machine.mac_address().len(), MAC_ADDRESS_LENGTH);
        assert_eq!(machine.instance_name(), format!("machine-{}", machine.serial_number()));
        assert_eq!(machine.heartbeat_period(), Ok(60.0));
        assert_eq!(machine.state("firmware_version"), Ok(Value::from("2.0.0")));
        assert_eq!(machine.states().len(), 2);
    }

    #[test]
    fn unknown_override_fails() {
        let sim = Sim::new();
        let config = MachineConfig::new().setting("volume", 11u8);
        let result = Machine::new(&sim.handle(), &Gadget, &config);
        assert_eq!(
            result.err(),
            Some(MachineError::Property(PropertyError::Missing("volume".into())))
        );
    }

    #[test]
    fn zero_heartbeat_period_is_rejected() {
        let sim = Sim::new();
        let config = MachineConfig::new().setting("heartbeat_period", 0u32);
        assert_eq!(
            Machine::new(&sim.handle(), &Gadget, &config).err(),
            Some(MachineError::Property(PropertyError::NonPositive(
                "heartbeat_period".into()
            )))
        );

        let machine = Machine::new(&sim.handle(), &Gadget, &MachineConfig::new()).unwrap();
        machine.set_setting("heartbeat_period", 0u32).unwrap();
        assert!(matches!(
            machine.heartbeat_period(),
            Err(PropertyError::NonPositive(_))
        ));
    }

    #[test]
    fn routing_requires_attached_tunnel() {
        let sim = Sim::new();
        let handle = sim.handle();
        let rf = Tunnel::new(TunnelKind::Rf, &handle);
        let machine = Machine::new(&handle, &Gadget, &MachineConfig::new().tunnel(rf.clone())).unwrap();
        assert_eq!(
            machine.receive_channel(TunnelKind::Wan).err(),
            Some(MachineError::TunnelUnavailable(TunnelKind::Wan))
        );
        assert_eq!(
            machine.broadcast(RadioMessage::Heartbeat).err(),
            Some(MachineError::Tunnel(TunnelError::NoSubscribers(TunnelKind::Rf)))
        );
        let listener = machine.receive_channel(TunnelKind::Rf).unwrap();
        assert_eq!(machine.broadcast(RadioMessage::Wet).unwrap().subscribers, 1);
        let packet = listener.try_get().unwrap();
        assert_eq!(packet.sender, machine.instance_name());
        assert_eq!(packet.radio(), Some(RadioMessage::Wet));
    }

    #[test]
    fn sync_sends_every_property() {
        let sim = Sim::new();
        let handle = sim.handle();
        let wan = Tunnel::new(TunnelKind::Wan, &handle);
        let sink = wan.subscribe();
        let machine = Machine::new(&handle, &Gadget, &MachineConfig::new().tunnel(wan)).unwrap();
        assert_eq!(machine.sync_to_db(), Ok(3));
        let kinds: Vec<_> = sink.drain().iter().filter_map(Packet::operation_kind).collect();
        assert_eq!(
            kinds,
            [
                OperationType::MachineUpdateSetting,
                OperationType::MachineUpdateState,
                OperationType::MachineUpdateState,
            ]
        );
    }

    #[test]
    fn event_payload() {
        let sim = Sim::new();
        let handle = sim.handle();
        let wan = Tunnel::new(TunnelKind::Wan, &handle);
        let sink = wan.subscribe();
        let machine = Machine::new(&handle, &Gadget, &MachineConfig::new().tunnel(wan)).unwrap();
        machine.send_event(EventType::LeakDetected, "self", None).unwrap();
        let packet = sink.try_get().unwrap();
        let PacketBody::Event { kind, data } = packet.body else {
            panic!("expected an event packet");
        };
        assert_eq!(kind, EventType::LeakDetected);
        assert_eq!(data["type"], json!("LEAK_DETECTED"));
        assert_eq!(data["target"], json!(format!("machine-{}", machine.serial_number())));
        assert_eq!(data["data"], serde_json::Value::Null);
    }

    #[test]
    fn snapshot_has_sorted_keys() {
        let sim = Sim::new();
        let machine = Machine::new(&sim.handle(), &Gadget, &MachineConfig::new()).unwrap();
        let text = machine.to_json(false).unwrap();
        let metadata = text.find("\"metadata\"").unwrap();
        let settings = text.find("\"settings\"").unwrap();
        let states = text.find("\"states\"").unwrap();
        assert!(metadata < settings && settings < states);
        assert_eq!(machine.to_dict()["metadata"]["codename"], json!("gadget"));
    }
}

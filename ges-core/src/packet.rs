//! The messages machines exchange over tunnels.

use crate::SimTime;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// An open JSON object carried by data, operation and event packets.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// A message in transit over a [`Tunnel`](crate::tunnel::Tunnel).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    /// Instance name of the sending machine.
    pub sender: String,
    /// Simulated time the packet was created.
    pub simulation_time: SimTime,
    /// Wall-clock time the packet was created.
    pub realworld_time: DateTime<Utc>,
    pub body: PacketBody,
}

impl Packet {
    pub fn new(sender: impl Into<String>, simulation_time: SimTime, body: PacketBody) -> Self {
        Self {
            sender: sender.into(),
            simulation_time,
            realworld_time: Utc::now(),
            body,
        }
    }

    /// The event type, if this is an event packet.
    pub fn event_kind(&self) -> Option<EventType> {
        match &self.body {
            PacketBody::Event { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// The operation type, if this is an operation packet.
    pub fn operation_kind(&self) -> Option<OperationType> {
        match &self.body {
            PacketBody::Operation { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn radio(&self) -> Option<RadioMessage> {
        match &self.body {
            PacketBody::Radio(message) => Some(*message),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum PacketBody {
    /// Generic data.
    Data { data: Payload },
    /// A short radio broadcast between nearby devices.
    Radio(RadioMessage),
    /// A request for the cloud to change something.
    Operation { kind: OperationType, data: Payload },
    /// Something notable that happened on a machine.
    Event { kind: EventType, data: Payload },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "message", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RadioMessage {
    Heartbeat,
    Wet,
    Dry,
}

impl Display for RadioMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Heartbeat => "HEARTBEAT",
            Self::Wet => "WET",
            Self::Dry => "DRY",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Unknown,

    FamilyAddChildren,
    FamilyAddGroups,
    FamilyAddPermissions,
    FamilyAddUser,
    FamilyCreate,
    FamilyDelete,
    FamilyDeletePermissions,
    FamilyRemoveChild,
    FamilyRemoveUser,
    FamilyRemoveGroup,
    FamilySetParent,

    InactiveSetInactive,

    MachineCreate,
    MachineDelete,
    MachineRegisterSetting,
    MachineRegisterState,
    MachineUpdateSetting,
    MachineUpdateState,

    UserCreate,
    UserDelete,
    UserSetEmail,
    UserSetFname,
    UserSetLname,

    EventsCreate,
}

impl OperationType {
    /// The name of the cloud function that carries out this operation, or
    /// `None` for [`OperationType::Unknown`].
    pub fn cloud_function(self) -> Option<&'static str> {
        use OperationType::*;
        let name = match self {
            Unknown => return None,
            FamilyAddChildren => "family_add_children",
            FamilyAddGroups => "family_add_groups",
            FamilyAddPermissions => "family_add_permissions",
            FamilyAddUser => "family_add_user",
            FamilyCreate => "family_create",
            FamilyDelete => "family_delete",
            FamilyDeletePermissions => "family_delete_permissions",
            FamilyRemoveChild => "family_remove_child",
            FamilyRemoveUser => "family_remove_user",
            FamilyRemoveGroup => "family_remove_group",
            FamilySetParent => "family_set_parent",
            InactiveSetInactive => "inactive_set_inactive",
            MachineCreate => "machine_create",
            MachineDelete => "machine_delete",
            MachineRegisterSetting => "machine_register_setting",
            MachineRegisterState => "machine_register_state",
            MachineUpdateSetting => "machine_update_setting",
            MachineUpdateState => "machine_update_state",
            UserCreate => "user_create",
            UserDelete => "user_delete",
            UserSetEmail => "user_set_email",
            UserSetFname => "user_set_fname",
            UserSetLname => "user_set_lname",
            EventsCreate => "events_create",
        };
        Some(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Unknown,
    Heartbeat,
    LeakDetected,
    LeakCleared,
    ValveOpening,
    ValveOpened,
    ValveClosing,
    ValveClosed,
    ValveStuck,
}

impl EventType {
    pub fn name(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Heartbeat => "HEARTBEAT",
            Self::LeakDetected => "LEAK_DETECTED",
            Self::LeakCleared => "LEAK_CLEARED",
            Self::ValveOpening => "VALVE_OPENING",
            Self::ValveOpened => "VALVE_OPENED",
            Self::ValveClosing => "VALVE_CLOSING",
            Self::ValveClosed => "VALVE_CLOSED",
            Self::ValveStuck => "VALVE_STUCK",
        }
    }
}

impl Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

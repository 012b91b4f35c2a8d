//! Logging holds wrapper functions for logging events.
//! Each function corresponds to a type of logging (packets, machine creation, etc..)
//! These are called from inside ges-core and from the device models so that
//! every run produces the same structured records.

use crate::{
    packet::{Packet, PacketBody},
    sim::ProcessFailure,
    tunnel::TunnelKind,
    Machine, SimTime,
};
use tracing::{event, Level};

/// Machine creation event handler.
/// Captures: instance name, codename, serial number, mac address
pub fn machine_creation_event(machine: &Machine) {
    event!(
        target: "MACHINE",
        Level::INFO,
        name = machine.instance_name(),
        codename = machine.codename(),
        serial_number = machine.serial_number(),
        mac_address = machine.mac_address()
    );
}

/// Packet send event handler.
/// Captures: tunnel, sender, simulated send time, packet family and kind
pub fn packet_event(tunnel: TunnelKind, packet: &Packet) {
    let (family, kind) = describe(&packet.body);
    event!(
        target: "PACKET",
        Level::DEBUG,
        tunnel = %tunnel,
        sender = %packet.sender,
        sent_at = packet.simulation_time.as_secs(),
        family,
        kind = %kind
    );
}

/// Packet read event handler. Packets read after the simulated time they
/// were sent at are flagged as late.
pub fn packet_received_event(receiver: &str, packet: &Packet, now: SimTime) {
    let (family, kind) = describe(&packet.body);
    if packet.simulation_time < now {
        event!(
            target: "PACKET",
            Level::WARN,
            receiver,
            sender = %packet.sender,
            sent_at = packet.simulation_time.as_secs(),
            read_at = now.as_secs(),
            family,
            kind = %kind,
            "received packet LATE"
        );
    } else {
        event!(
            target: "PACKET",
            Level::INFO,
            receiver,
            sender = %packet.sender,
            read_at = now.as_secs(),
            family,
            kind = %kind,
            "received packet"
        );
    }
}

/// Process failure event handler.
pub fn process_failure_event(failure: &ProcessFailure) {
    event!(
        target: "PROCESS",
        Level::ERROR,
        process = %failure.process,
        name = %failure.name,
        error = %failure.error
    );
}

fn describe(body: &PacketBody) -> (&'static str, String) {
    match body {
        PacketBody::Data { .. } => ("data", String::new()),
        PacketBody::Radio(message) => ("radio", message.to_string()),
        PacketBody::Operation { kind, .. } => ("operation", format!("{kind:?}")),
        PacketBody::Event { kind, .. } => ("event", kind.to_string()),
    }
}

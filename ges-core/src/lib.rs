//! The Guardian Ecosystem Simulator core, a library for running
//! discrete-event simulations of many devices talking over shared radio and
//! wide-area links.
//!
//! # Uses
//!
//! - Firmware and cloud developers can exercise a backend against a fleet of
//!   simulated valve controllers and leak detectors without any hardware.
//! - Simulations are deterministic for a given seed, so a scenario that
//!   misbehaves once can be replayed exactly.
//!
//! # Organization
//! - [`Sim`] is the executor: a virtual clock, an event queue and a set of
//!   cooperative [`Process`]es that suspend on [`timeout`](Process::timeout)
//!   and [`receive`](Process::receive)
//! - [`channel`] provides the FIFO mailboxes processes receive from
//! - [`Tunnel`] fans a [`Packet`] out to every subscriber
//! - [`Machine`], [`Model`] and [`Registry`] describe the devices themselves
//!
//! # Process structure
//!
//! A process is an `async` block. It runs until it awaits a
//! [`Timeout`](sim::Timeout) or a [`Receive`](channel::Receive), at which
//! point exactly one resumption event is queued for it. The run loop pops
//! events in `(time, sequence)` order, so two runs with the same seed always
//! interleave processes the same way.

pub mod logging;

pub mod time;
pub use time::SimTime;

pub mod sim;
pub use sim::{Process, ProcessError, Sim, SimConfig, SimHandle, Wake};

pub mod channel;
pub use channel::{Capacity, Receiver, Sender};

pub mod tunnel;
pub use tunnel::{Tunnel, TunnelKind};

pub mod packet;
pub use packet::{EventType, OperationType, Packet, PacketBody, Payload, RadioMessage};

pub mod machine;
pub use machine::{Machine, MachineConfig, Model, Property, Value};

pub mod registry;
pub use registry::{Device, Registry};

pub mod generate;

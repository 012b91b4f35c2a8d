//! The Guardian Ecosystem Simulator: a fleet of simulated valve controllers
//! and leak detectors built on [`ges_core`].
//!
//! A [`World`] assembles the engine, the shared radio and WAN tunnels, and
//! the collaborators that listen on them. It can be driven directly, from
//! the `ges run` command, or from a [`daemon`] that takes commands over UDP.

pub mod cli;
pub mod client;
pub mod cloud;
pub mod config;
pub mod daemon;
pub mod devices;
pub mod monitor;

pub mod world;
pub use world::{DeviceKind, World};

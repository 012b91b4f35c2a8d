//! A passive listener that records radio traffic.

use ges_core::{logging::packet_received_event, sim::ProcessId, Packet, SimHandle, Tunnel};
use std::{cell::Cell, rc::Rc};

/// Counts and logs every packet sent on a tunnel. Packets read after the
/// simulated time they were sent at are logged as late.
#[derive(Clone, Default)]
pub struct Monitor {
    received: Rc<Cell<u64>>,
    late: Rc<Cell<u64>>,
}

impl Monitor {
    /// Subscribes to `tunnel` and starts the listening process.
    pub fn spawn(sim: &SimHandle, tunnel: &Tunnel<Packet>) -> Result<(Self, ProcessId), ges_core::sim::SimError> {
        let monitor = Self::default();
        let rx = tunnel.subscribe();
        let name = format!("{}-monitor", tunnel.kind()).to_lowercase();
        let counters = monitor.clone();
        let id = sim.spawn(name, move |process| async move {
            loop {
                let Some(packet) = process.receive(&rx).await.ready() else {
                    continue;
                };
                let now = process.now();
                packet_received_event("monitor", &packet, now);
                counters.received.set(counters.received.get() + 1);
                if packet.simulation_time < now {
                    counters.late.set(counters.late.get() + 1);
                }
            }
        })?;
        Ok((monitor, id))
    }

    /// Packets seen so far.
    pub fn received(&self) -> u64 {
        self.received.get()
    }

    pub fn late(&self) -> u64 {
        self.late.get()
    }
}

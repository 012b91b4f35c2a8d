//! A long-running simulation controlled over UDP.
//!
//! Clients send one JSON [`Command`] per datagram and get one [`Response`]
//! back. The simulation itself lives on a dedicated thread, since
//! everything inside it is single-threaded. The UDP loop hands it each
//! command over a channel along with a oneshot sender for the reply.
//!
//! While the simulation is running, commands that change the set of
//! devices are refused with [`ErrorCode::SimulationRunning`]. Between
//! slices of simulated time the thread checks for new commands, so `kill`
//! and `list` are answered promptly.

pub mod command;
pub use command::{Command, CommandError, SpawnKind};

pub mod response;
pub use response::{ErrorCode, Response, ResponseError};

mod shutdown;
pub use shutdown::{DaemonExit, Shutdown};

use crate::{
    config::WorldConfig,
    world::{DeviceKind, World},
};
use ges_core::{sim::ExitStatus, Machine, SimTime};
use serde_json::json;
use std::{
    io,
    net::SocketAddr,
    thread::{self, JoinHandle},
};
use thiserror::Error as ThisError;
use tokio::{
    net::UdpSocket,
    sync::{mpsc, oneshot},
};
use tracing::{debug, error, info, warn};

/// Where the daemon listens unless told otherwise.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:7700";
/// Simulated seconds run between checks for new commands. Paced runs use
/// shorter slices so that each lasts about a second of wall time.
const SLICE: f64 = 60.0;
const MAX_DATAGRAM: usize = 65_507;

#[derive(Debug, ThisError)]
pub enum DaemonError {
    #[error("Daemon socket error: {0}")]
    Io(#[from] io::Error),
    #[error("Could not start the simulation: {0}")]
    World(#[from] crate::world::WorldError),
}

/// A command on its way to the simulation thread.
struct Request {
    command: Command,
    reply: oneshot::Sender<Response>,
}

pub struct Daemon {
    socket: UdpSocket,
    requests: mpsc::UnboundedSender<Request>,
    shutdown: Shutdown,
    simulation: JoinHandle<()>,
}

impl Daemon {
    /// Binds the command socket and starts the simulation thread. Must be
    /// called from within a tokio runtime.
    pub async fn bind(address: &str, config: WorldConfig) -> Result<Self, DaemonError> {
        let socket = UdpSocket::bind(address).await?;
        let (requests, incoming) = mpsc::unbounded_channel();
        let shutdown = Shutdown::new();
        let runtime = tokio::runtime::Handle::current();
        let (ready_tx, ready_rx) = oneshot::channel();
        let thread_shutdown = shutdown.clone();
        let simulation = thread::Builder::new()
            .name("ges-simulation".into())
            .spawn(move || {
                let world = match World::with_runtime(config, Some(runtime)) {
                    Ok(world) => {
                        let _ = ready_tx.send(Ok(()));
                        world
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                Simulation::new(world, incoming, thread_shutdown).run();
            })?;
        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(io::Error::new(io::ErrorKind::Other, "simulation thread exited").into())
            }
        }
        info!(address = %socket.local_addr()?, "daemon listening");
        Ok(Self {
            socket,
            requests,
            shutdown,
            simulation,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// A handle that stops [`serve`](Self::serve) when shut down.
    pub fn shutdown(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Answers commands until a client sends `kill`, the process receives
    /// Ctrl-C, or the simulation thread stops.
    pub async fn serve(self) -> Result<DaemonExit, DaemonError> {
        let Self {
            socket,
            requests,
            mut shutdown,
            simulation,
        } = self;
        let mut buffer = vec![0; MAX_DATAGRAM];
        let exit = loop {
            tokio::select! {
                received = socket.recv_from(&mut buffer) => {
                    let (len, peer) = received?;
                    let response = dispatch(&requests, &buffer[..len]).await;
                    reply(&socket, peer, &response).await;
                }
                status = shutdown.wait_for_shutdown() => break status,
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted, stopping the simulation");
                    let (tx, _) = oneshot::channel();
                    let _ = requests.send(Request { command: Command::Kill, reply: tx });
                    break DaemonExit::Interrupted;
                }
            }
        };
        drop(requests);
        match tokio::task::spawn_blocking(move || simulation.join()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => error!("simulation thread panicked"),
            Err(e) => error!(error = %e, "simulation thread could not be joined"),
        }
        info!(?exit, "daemon stopped");
        Ok(exit)
    }
}

async fn dispatch(requests: &mpsc::UnboundedSender<Request>, datagram: &[u8]) -> Response {
    let command = match Command::parse(datagram) {
        Ok(command) => command,
        Err(e) => {
            warn!(error = %e, "invalid command");
            return Response::error(e.code(), e.to_string());
        }
    };
    debug!(?command, "command received");
    let (tx, rx) = oneshot::channel();
    if requests.send(Request { command, reply: tx }).is_err() {
        return Response::error(ErrorCode::Generic, "the simulation has stopped");
    }
    rx.await
        .unwrap_or_else(|_| Response::error(ErrorCode::Generic, "the simulation has stopped"))
}

async fn reply(socket: &UdpSocket, peer: SocketAddr, response: &Response) {
    let bytes = match serde_json::to_vec(response) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, "could not encode response");
            return;
        }
    };
    if let Err(e) = socket.send_to(&bytes, peer).await {
        error!(%peer, error = %e, "could not send response");
    }
}

/// What the simulation thread is doing between commands.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    Idle,
    Running { until: Option<SimTime> },
}

/// The simulation thread's state.
struct Simulation {
    world: World,
    incoming: mpsc::UnboundedReceiver<Request>,
    shutdown: Shutdown,
    mode: Mode,
    killed: bool,
}

impl Simulation {
    fn new(world: World, incoming: mpsc::UnboundedReceiver<Request>, shutdown: Shutdown) -> Self {
        Self {
            world,
            incoming,
            shutdown,
            mode: Mode::Idle,
            killed: false,
        }
    }

    fn run(mut self) {
        while !self.killed {
            match self.mode {
                Mode::Idle => match self.incoming.blocking_recv() {
                    Some(request) => self.answer(request),
                    None => break,
                },
                Mode::Running { until } => {
                    loop {
                        match self.incoming.try_recv() {
                            Ok(request) => self.answer(request),
                            Err(mpsc::error::TryRecvError::Empty) => break,
                            Err(mpsc::error::TryRecvError::Disconnected) => return,
                        }
                    }
                    if !self.killed {
                        self.advance(until);
                    }
                }
            }
        }
        if self.killed {
            self.shutdown.shut_down(DaemonExit::Killed);
        }
    }

    /// Runs one slice of simulated time.
    fn advance(&mut self, until: Option<SimTime>) {
        let slice_end = self.world.now().checked_add(self.slice());
        let limit = match (until, slice_end) {
            (Some(until), Some(end)) => until.min(end),
            (Some(until), None) => until,
            (None, Some(end)) => end,
            (None, None) => {
                self.mode = Mode::Idle;
                return;
            }
        };
        match self.world.run(Some(limit)) {
            Ok(ExitStatus::ReachedLimit) if Some(limit) == until => {
                info!(now = %self.world.now(), "run finished");
                self.mode = Mode::Idle;
            }
            Ok(ExitStatus::ReachedLimit) => {}
            Ok(ExitStatus::Exhausted) => {
                info!(now = %self.world.now(), "nothing left to simulate");
                self.mode = Mode::Idle;
            }
            Ok(ExitStatus::ShutDown) => self.killed = true,
            // Already logged by the simulation.
            Err(_) => self.mode = Mode::Idle,
        }
    }

    fn slice(&self) -> f64 {
        match self.world.config().sim.realtime_factor {
            Some(factor) if factor.is_finite() && factor > 0.0 => (1.0 / factor).min(SLICE),
            _ => SLICE,
        }
    }

    fn answer(&mut self, request: Request) {
        let response = match self.execute(request.command) {
            Ok(data) => Response::ok(data),
            Err(e) => Response::error(e.code(), e.to_string()),
        };
        // The client may have given up waiting.
        let _ = request.reply.send(response);
    }

    fn execute(&mut self, command: Command) -> Result<serde_json::Value, CommandError> {
        let running = matches!(self.mode, Mode::Running { .. });
        if running && (command.mutates() || matches!(command, Command::Run { .. })) {
            return Err(CommandError::Running);
        }
        match command {
            Command::Run { time } => {
                let until = match time {
                    Some(time) => Some(
                        self.world
                            .now()
                            .checked_add(time)
                            .ok_or_else(|| CommandError::Invalid(format!("bad run time {time}")))?,
                    ),
                    None => None,
                };
                info!(now = %self.world.now(), until = ?until, "simulation running");
                self.world.restart_pacing();
                self.mode = Mode::Running { until };
                Ok(json!({
                    "now": self.world.now().as_secs(),
                    "until": until.map(SimTime::as_secs),
                }))
            }
            Command::Kill => {
                info!(now = %self.world.now(), "killed");
                self.world.shut_down();
                self.killed = true;
                Ok(json!({ "now": self.world.now().as_secs() }))
            }
            Command::Spawn { kind, count } => {
                let machines = match kind {
                    SpawnKind::Valve => self.world.spawn_valve_controllers(count)?,
                    SpawnKind::LeakDetector => self.world.spawn_leak_detectors(count)?,
                };
                Ok(machines.iter().map(|machine| summary(machine)).collect())
            }
            Command::Pair { parent, child } => {
                self.world.pair_leak_detector(&parent, &child)?;
                Ok(json!({ "parent": parent, "child": child }))
            }
            Command::List { kind } => Ok(self.list(kind)),
        }
    }

    fn list(&self, kind: DeviceKind) -> serde_json::Value {
        self.world
            .list(kind)
            .iter()
            .map(|machine| summary(machine))
            .collect()
    }
}

fn summary(machine: &Machine) -> serde_json::Value {
    json!({
        "instance_name": machine.instance_name(),
        "codename": machine.codename(),
        "serial_number": machine.serial_number(),
        "mac_address": machine.mac_address(),
    })
}

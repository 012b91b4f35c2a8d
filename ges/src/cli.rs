//! Parses the command line arguments.
//!
//! `ges run` runs a headless simulation in this process, `ges daemon` starts
//! a simulation controlled over UDP, and the remaining subcommands send
//! commands to that daemon. Basic usage for a short headless run with
//! logging on:
//!
//! ```cargo run -- --log run --valves 2 --leak-detectors 2 --pair --time 7200```

use crate::{
    client::Client,
    config::WorldConfig,
    daemon::{Command, Daemon, Response, SpawnKind, DEFAULT_ADDRESS},
    world::{DeviceKind, World},
};
use clap::{Parser, Subcommand, ValueEnum};
use ges_core::SimTime;
use std::{
    fs::{create_dir_all, OpenOptions},
    io,
    net::SocketAddr,
    path::PathBuf,
    process::ExitCode,
    sync::Arc,
    time::Duration,
};
use tracing_subscriber::FmtSubscriber;

/// Stores the different command line arguments.
#[derive(Parser)]
#[command(version, about = "Guardian Ecosystem Simulator")]
struct Args {
    /// Logging flag. Writes JSON logs to ./logs instead of the terminal.
    #[arg(short, long, global = true)]
    log: bool,
    /// JSON file with simulation, device and cloud settings
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Address the daemon listens on
    #[arg(long, global = true, default_value = DEFAULT_ADDRESS)]
    address: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Runs a simulation in this process
    Run {
        #[arg(long, default_value_t = 1)]
        valves: usize,
        #[arg(long, default_value_t = 1)]
        leak_detectors: usize,
        /// Pair each leak detector with a valve
        #[arg(long)]
        pair: bool,
        /// Simulated seconds to run for. Runs until interrupted when unset.
        #[arg(short, long)]
        time: Option<f64>,
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Starts a simulation controlled over UDP
    Daemon {
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Controls the daemon's simulation
    Simulation {
        #[command(subcommand)]
        action: SimulationAction,
    },
    /// Adds devices to the daemon's simulation
    Spawn {
        #[command(subcommand)]
        kind: SpawnTarget,
    },
    /// Makes a valve act on a leak detector's radio messages
    Pair {
        /// Instance name, serial number or MAC address of the valve
        #[arg(long)]
        parent: String,
        /// Instance name, serial number or MAC address of the leak detector
        #[arg(long)]
        child: String,
    },
    /// Lists the daemon's devices
    List {
        #[arg(value_enum, default_value_t = ListKind::Devices)]
        kind: ListKind,
    },
}

/// Settings that replace those from the config file.
#[derive(clap::Args)]
struct Overrides {
    #[arg(long)]
    seed: Option<u64>,
    /// Wall-clock seconds per simulated second
    #[arg(long)]
    realtime: Option<f64>,
    /// Base URL of the cloud functions to forward WAN traffic to
    #[arg(long)]
    endpoint: Option<String>,
}

#[derive(Subcommand)]
enum SimulationAction {
    Run {
        /// Simulated seconds to run for. Runs until killed when unset.
        #[arg(short, long)]
        time: Option<f64>,
    },
    Kill,
}

#[derive(Subcommand)]
enum SpawnTarget {
    Valve {
        #[arg(short, long, default_value_t = 1)]
        count: usize,
    },
    LeakDetector {
        #[arg(short, long, default_value_t = 1)]
        count: usize,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ListKind {
    Devices,
    Valves,
    LeakDetectors,
}

impl From<ListKind> for DeviceKind {
    fn from(kind: ListKind) -> Self {
        match kind {
            ListKind::Devices => Self::Devices,
            ListKind::Valves => Self::Valves,
            ListKind::LeakDetectors => Self::LeakDetectors,
        }
    }
}

/// Parses the command line and runs the requested subcommand.
pub async fn initialize_from_arguments() -> ExitCode {
    let args = Args::parse();
    let logging = if args.log {
        initialize_logging()
    } else {
        initialize_terminal_logging()
    };
    if let Err(e) = logging {
        eprintln!("Could not set up logging: {e}");
    }

    let mut config = match &args.config {
        Some(path) => match WorldConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{e}");
                return ExitCode::FAILURE;
            }
        },
        None => WorldConfig::default(),
    };

    let result = match args.command {
        Commands::Run {
            valves,
            leak_detectors,
            pair,
            time,
            overrides,
        } => {
            overrides.apply(&mut config);
            run_headless(config, valves, leak_detectors, pair, time)
        }
        Commands::Daemon { overrides } => {
            overrides.apply(&mut config);
            run_daemon(&args.address, config).await
        }
        Commands::Simulation { action } => {
            let command = match action {
                SimulationAction::Run { time } => Command::Run { time },
                SimulationAction::Kill => Command::Kill,
            };
            send(&args.address, command).await
        }
        Commands::Spawn { kind } => {
            let (kind, count) = match kind {
                SpawnTarget::Valve { count } => (SpawnKind::Valve, count),
                SpawnTarget::LeakDetector { count } => (SpawnKind::LeakDetector, count),
            };
            send(&args.address, Command::Spawn { kind, count }).await
        }
        Commands::Pair { parent, child } => send(&args.address, Command::Pair { parent, child }).await,
        Commands::List { kind } => send(&args.address, Command::List { kind: kind.into() }).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

impl Overrides {
    fn apply(self, config: &mut WorldConfig) {
        if self.seed.is_some() {
            config.sim.seed = self.seed;
        }
        if self.realtime.is_some() {
            config.sim.realtime_factor = self.realtime;
        }
        if self.endpoint.is_some() {
            config.cloud_endpoint = self.endpoint;
        }
    }
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn run_headless(config: WorldConfig, valves: usize, leak_detectors: usize, pair: bool, time: Option<f64>) -> CliResult {
    let mut world = World::new(config)?;
    let valves = world.spawn_valve_controllers(valves)?;
    let detectors = world.spawn_leak_detectors(leak_detectors)?;
    for machine in valves.iter().chain(detectors.iter()) {
        println!("{}", machine.to_json(true)?);
    }
    if pair && !valves.is_empty() {
        for (i, detector) in detectors.iter().enumerate() {
            let valve = &valves[i % valves.len()];
            world.pair_leak_detector(valve.instance_name(), detector.instance_name())?;
        }
    }

    let until = time.map(SimTime::try_from_secs).map(|until| until.ok_or("invalid --time"));
    let until = until.transpose()?;
    let status = world.run(until)?;
    println!("Simulation stopped at {} ({status:?})", world.now());
    Ok(())
}

async fn run_daemon(address: &str, config: WorldConfig) -> CliResult {
    let daemon = Daemon::bind(address, config).await?;
    let exit = daemon.serve().await?;
    println!("Daemon stopped ({exit:?})");
    Ok(())
}

async fn send(address: &str, command: Command) -> CliResult {
    let address: SocketAddr = address.parse()?;
    let response = Client::new(address, Duration::from_secs(5)).send(&command).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    match response {
        Response::Ok { .. } => Ok(()),
        Response::Error { errors } => Err(errors
            .iter()
            .map(|error| format!("{}: {}", error.code, error.detail))
            .collect::<Vec<_>>()
            .join("\n")
            .into()),
    }
}

/// Initializes the event protocol. Only should be called once when the sim starts.
/// Allows for event! to be called and writes JSON lines to a log file in ./logs.
fn initialize_logging() -> io::Result<()> {
    let main_path = "./logs";
    create_dir_all(main_path)?;
    let file_path = format!(
        "{}/debug-{}.log",
        main_path,
        chrono::offset::Local::now().format("%y-%m-%d_%H-%M-%S")
    );
    let file = OpenOptions::new()
        .write(true)
        .append(true)
        .create(true)
        .open(file_path)?;
    let subscriber = FmtSubscriber::builder()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(Arc::new(file))
        .json()
        .finish();
    // set the global default so all events/logs go to the same subscriber and
    // subsequently the same file
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}

fn initialize_terminal_logging() -> io::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(tracing::Level::INFO)
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use faultline::api::{serve, AppState};
use faultline::engine::{Orchestrator, ReassignmentOutcome};
use faultline::providers::HttpPredictionService;
use faultline::storage::{InMemoryNotificationLog, InMemoryStore, PostgresStorage, Storage};
use faultline::telemetry::{InMemorySensorCache, TelemetryManager, UniformNoise};
use faultline::types::MachineId;
use faultline::{Config, Fleet};

#[derive(Parser)]
#[command(name = "faultline")]
#[command(about = "Machine health monitoring and job rebalancing", long_about = None)]
#[command(version)]
struct Cli {
    #[arg(long, global = true, help = "TOML config file; env vars override it")]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "YAML fleet fixture used to seed an empty store")]
    fleet: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API.
    Serve {
        #[arg(long)]
        port: Option<u16>,
        #[arg(long, help = "Start a simulator for every machine")]
        simulate_all: bool,
    },
    /// Classify one machine's current reading.
    Classify { machine: MachineId },
    /// Move a machine's active jobs onto healthy peers.
    Reassign { machine: MachineId },
    /// Drive the simulator for one machine and print each snapshot.
    Simulate {
        machine: MachineId,
        #[arg(long, default_value_t = 5)]
        ticks: usize,
        #[arg(long)]
        interval: Option<u64>,
    },
}

struct Runtime {
    config: Config,
    orchestrator: Arc<Orchestrator>,
    telemetry: Arc<TelemetryManager>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    let runtime = build_runtime(config, cli.fleet.as_deref()).await?;

    match cli.command {
        Commands::Serve { port, simulate_all } => run_server(runtime, port, simulate_all).await?,
        Commands::Classify { machine } => {
            let report = runtime.orchestrator.classify_machine(machine).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Reassign { machine } => {
            let outcome = runtime.orchestrator.reassign(machine).await?;
            print_outcome(machine, &outcome);
        }
        Commands::Simulate {
            machine,
            ticks,
            interval,
        } => run_simulation(runtime, machine, ticks, interval).await?,
    }

    Ok(())
}

async fn open_store(config: &Config) -> Result<Arc<dyn Storage>> {
    match &config.database_url {
        Some(url) => {
            let storage = PostgresStorage::new(url).await?;
            storage.run_migrations().await?;
            log::info!("Using PostgreSQL storage");
            Ok(Arc::new(storage))
        }
        None => {
            log::info!("Using in-memory storage");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

async fn build_runtime(config: Config, fleet_path: Option<&Path>) -> Result<Runtime> {
    let store = open_store(&config).await?;

    if store.list_machines(None).await?.is_empty() {
        let fleet = match fleet_path {
            Some(path) => Fleet::load(path)?,
            None => Fleet::demo()?,
        };
        fleet.seed(store.as_ref()).await?;
    } else if fleet_path.is_some() {
        log::warn!("Store already holds machines; ignoring fleet fixture");
    }

    let cache = Arc::new(InMemorySensorCache::new());
    let mut orchestrator = Orchestrator::new(
        store,
        Arc::new(InMemoryNotificationLog::new()),
        cache.clone(),
        config.orchestrator(),
    );
    if let Some(url) = &config.prediction_url {
        let service = HttpPredictionService::new(url, config.prediction_timeout())?;
        log::info!("Advisory predictions from {}", service.endpoint());
        orchestrator = orchestrator.with_prediction(Arc::new(service));
    }

    let telemetry = Arc::new(TelemetryManager::new(cache, Arc::new(UniformNoise)));

    Ok(Runtime {
        config,
        orchestrator: Arc::new(orchestrator),
        telemetry,
    })
}

fn spawn_listener(runtime: &Runtime) {
    let orchestrator = Arc::clone(&runtime.orchestrator);
    let readings = runtime.telemetry.subscribe();
    tokio::spawn(async move {
        orchestrator.run_telemetry_listener(readings).await;
    });
}

async fn run_server(runtime: Runtime, port: Option<u16>, simulate_all: bool) -> Result<()> {
    spawn_listener(&runtime);

    if simulate_all {
        let machines = runtime.orchestrator.store().list_machines(None).await?;
        for machine in machines {
            runtime
                .telemetry
                .start(machine.id, machine.sensor_vector(), runtime.config.sim_interval_secs)
                .await?;
        }
    }

    let port = port.unwrap_or(runtime.config.port);
    let state = AppState::new(
        runtime.orchestrator,
        runtime.telemetry,
        runtime.config.sim_interval_secs,
    );
    serve(state, port).await
}

async fn run_simulation(
    runtime: Runtime,
    machine: MachineId,
    ticks: usize,
    interval: Option<u64>,
) -> Result<()> {
    let snapshot = runtime.orchestrator.machine_snapshot(machine).await?;
    let mut snapshots = runtime.orchestrator.subscribe_snapshots();
    spawn_listener(&runtime);

    let interval = interval.unwrap_or(runtime.config.sim_interval_secs);
    runtime
        .telemetry
        .start(machine, snapshot.machine.sensor_vector(), interval)
        .await?;

    println!(
        "Simulating {} every {}s for {} tick(s)",
        snapshot.machine.name, interval, ticks
    );
    for tick in 1..=ticks {
        let update = snapshots.recv().await?;
        let m = &update.machine;
        println!(
            "[{:>3}] temp {:>5.1}  vib {:>4.1}  load {:>5.1}  score {:>3} ({})",
            tick,
            m.temperature,
            m.vibration,
            m.current_load,
            update.display_score,
            update.band.label()
        );
    }

    runtime.telemetry.shutdown();
    Ok(())
}

fn print_outcome(machine: MachineId, outcome: &ReassignmentOutcome) {
    match outcome {
        ReassignmentOutcome::NoActiveJobs => {
            println!("Machine {} has no running or pending jobs", machine)
        }
        ReassignmentOutcome::NoHealthyMachineAvailable => {
            println!("No healthy machine available to take machine {}'s jobs", machine)
        }
        ReassignmentOutcome::Reassigned { count, assignments } => {
            println!("Reassigned {} job(s) from machine {}", count, machine);
            for a in assignments {
                println!("  #{} {} -> {} ({})", a.job_id, a.job_name, a.to, a.target_name);
            }
        }
    }
}

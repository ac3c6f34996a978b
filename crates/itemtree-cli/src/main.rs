use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use serde_json::json;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use itemtree_core::app::{JobCleanup, JobMetrics, OrchestratorBuilder, Watchdog};
use itemtree_core::config::CoreConfig;
use itemtree_core::domain::{
    BomLifecycle, Depth, Direction, DomainEvent, JobId, JobParameter, JobState, NodeId,
    RemoteError,
};
use itemtree_core::impls::{
    BroadcastEventSink, InMemoryBlobStore, InMemoryJobStore, RequiredFieldsValidator,
    StaticNetwork,
};
use itemtree_core::ports::SystemClock;

const ROOT: &str = "urn:uuid:6d9b7c1e-0000-4000-8000-000000000001";
const GEARBOX: &str = "urn:uuid:6d9b7c1e-0000-4000-8000-000000000002";
const ENGINE: &str = "urn:uuid:6d9b7c1e-0000-4000-8000-000000000003";
const SHAFT: &str = "urn:uuid:6d9b7c1e-0000-4000-8000-000000000004";
const PISTON: &str = "urn:uuid:6d9b7c1e-0000-4000-8000-000000000005";
const SENSOR: &str = "urn:uuid:6d9b7c1e-0000-4000-8000-000000000006";

/// Collects an item tree from a built-in demo network and prints the result as JSON.
#[derive(Parser)]
#[command(name = "itemtree", about = "Recursive item-tree collector (demo network)")]
struct Cli {
    /// TOML config file; defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Root node (urn:uuid:...)
    #[arg(long, default_value = ROOT)]
    root: String,

    #[arg(long, default_value_t = 2)]
    depth: u32,

    /// Ignore --depth and expand up to the configured maximum
    #[arg(long)]
    unbounded: bool,

    /// Aspects to collect, comma separated
    #[arg(long, value_delimiter = ',', default_value = "SerialPart")]
    aspects: Vec<String>,

    /// Resolve manufacturer names
    #[arg(long)]
    party_names: bool,

    /// Walk from the root up to the assemblies that use it
    #[arg(long)]
    upward: bool,
}

fn demo_network() -> anyhow::Result<StaticNetwork> {
    let node = |raw: &str| NodeId::parse(raw).context("demo node id");
    let (root, gearbox, engine) = (node(ROOT)?, node(GEARBOX)?, node(ENGINE)?);
    let (shaft, piston, sensor) = (node(SHAFT)?, node(PISTON)?, node(SENSOR)?);

    let serial = |id: &NodeId, part: &str| json!({ "catenaXId": id.as_str(), "partName": part });

    Ok(StaticNetwork::new("https://registry.demo.local")
        .with_lifecycle(BomLifecycle::AsBuilt)
        .with_item(&root, "vehicle", &[gearbox.clone(), engine.clone()])
        .with_item(&gearbox, "gearbox", &[shaft.clone()])
        .with_item(&engine, "engine", &[piston.clone(), sensor.clone()])
        .with_item(&shaft, "shaft", &[])
        .with_item(&piston, "piston", &[])
        .with_parents(&piston, "piston", &[engine.clone()])
        .with_parents(&engine, "engine", &[root.clone()])
        .with_parents(&shaft, "shaft", &[gearbox.clone()])
        .with_parents(&gearbox, "gearbox", &[root.clone()])
        .with_aspect(&root, "SerialPart", serial(&root, "vehicle"))
        .with_aspect(&gearbox, "SerialPart", serial(&gearbox, "gearbox"))
        .with_aspect(&engine, "SerialPart", json!({ "partName": "engine" }))
        .with_manufacturer(&root, "BPNL000000000001", Some("Demo Motors"))
        .with_manufacturer(&gearbox, "BPNL000000000002", None)
        .failing_descriptor(&sensor, RemoteError::Retryable("registry timed out".into()))
        .with_latency(Duration::from_millis(20)))
}

async fn wait_finished(
    events: &mut broadcast::Receiver<DomainEvent>,
    job_id: JobId,
) -> anyhow::Result<JobState> {
    loop {
        match events.recv().await {
            Ok(DomainEvent::JobFinished { job_id: id, state, .. }) if id == job_id => {
                return Ok(state);
            }
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => bail!("event stream closed"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => CoreConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => CoreConfig::default(),
    };

    let root = NodeId::parse(&cli.root).context("invalid --root")?;
    let depth = if cli.unbounded {
        Depth::Unbounded
    } else {
        Depth::Bounded(cli.depth)
    };

    let net = Arc::new(demo_network()?);
    let store = Arc::new(InMemoryJobStore::in_memory(config.store.lock_timeout()));
    let blobs = Arc::new(InMemoryBlobStore::new());
    let sink = Arc::new(BroadcastEventSink::default());
    let mut events = sink.subscribe();
    let clock = Arc::new(SystemClock);
    let metrics = Arc::new(JobMetrics::new());

    let orchestrator = OrchestratorBuilder::new()
        .config(config.clone())
        .store(store.clone())
        .blob_store(blobs.clone())
        .registry(net.clone())
        .transfer_client(net.clone())
        .validator(Arc::new(
            RequiredFieldsValidator::new().require("SerialPart", ["catenaXId"]),
        ))
        .party_names(net)
        .clock(clock.clone())
        .event_sink(sink.clone())
        .metrics(metrics.clone())
        .build()
        .context("building orchestrator")?;

    let watchdog = Arc::new(
        Watchdog::new(store.clone(), clock.clone(), config.watchdog.clone())
            .with_events(sink)
            .with_metrics(metrics),
    )
    .start();
    let sweeper = orchestrator.start_sweeper(config.watchdog.poll_interval());
    let cleanup = config.cleanup.enabled.then(|| {
        Arc::new(JobCleanup::new(store, blobs, clock, config.cleanup.clone())).start()
    });

    let direction = if cli.upward {
        Direction::Upward
    } else {
        Direction::Downward
    };
    let parameter = JobParameter::new(root)
        .with_depth(depth)
        .with_direction(direction)
        .with_aspects(cli.aspects.iter().map(String::as_str))
        .with_party_names(cli.party_names)
        .with_owner("itemtree-cli");
    let handle = orchestrator.submit_job(parameter).await?;
    tracing::info!(job_id = %handle.job_id, "waiting for job");

    let state = tokio::select! {
        state = wait_finished(&mut events, handle.job_id) => state?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted, cancelling job");
            orchestrator.cancel_job(handle.job_id).await?;
            JobState::Error
        }
    };

    let result = orchestrator.get_job_result(handle.job_id).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    let counts = orchestrator.metrics();
    tracing::info!(metrics = %serde_json::to_string(&counts)?, "job metrics");

    watchdog.stop_and_join().await;
    sweeper.stop_and_join().await;
    if let Some(cleanup) = cleanup {
        cleanup.stop_and_join().await;
    }
    orchestrator.shutdown().await;

    if state != JobState::Completed {
        bail!("job {} finished in state {state}", handle.job_id);
    }
    Ok(())
}

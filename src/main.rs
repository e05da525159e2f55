use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use replica_provider::controller::diff;
use replica_provider::{
    BackoffConfig, Context, DesiredConfig, InMemoryReplicaService, Metrics, ObservedState,
    Reconciler, ReconcilerConfig, validate_config,
};

const USAGE: &str = "usage:
  replica-provider validate <config.json>
  replica-provider plan <config.json> [state.json]
  replica-provider simulate <config.json>
  replica-provider schema";

const MAX_ATTEMPTS: u32 = 3;

type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> CliResult {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("replica_provider=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["validate", config] => validate(Path::new(config)),
        ["plan", config] => plan(Path::new(config), None),
        ["plan", config, state] => plan(Path::new(config), Some(Path::new(state))),
        ["simulate", config] => simulate(Path::new(config)).await,
        ["schema"] => schema(),
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> CliResult<T> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    Ok(serde_json::from_str(&raw)?)
}

fn validate(config: &Path) -> CliResult {
    let desired: DesiredConfig = read_json(config)?;
    validate_config(&desired)?;
    info!(replica = %desired.id(), "configuration is valid");
    Ok(())
}

fn plan(config: &Path, state: Option<&Path>) -> CliResult {
    let desired: DesiredConfig = read_json(config)?;
    validate_config(&desired)?;
    let previous: Option<ObservedState> = state.map(read_json::<ObservedState>).transpose()?;

    let plan = diff::plan(previous.as_ref(), &desired);
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

/// Run a full reconciliation against the in-memory remote service
async fn simulate(config: &Path) -> CliResult {
    let desired: DesiredConfig = read_json(config)?;
    let reconciler_config = ReconcilerConfig::from_env()?;

    let mut service = InMemoryReplicaService::new()
        .with_cluster(&desired.cluster_id)
        .with_provisioning_polls(1);
    if let Some(network) = &desired.private_network_uuid {
        service = service.with_network(network);
    }

    let metrics = Arc::new(Metrics::new());
    let ctx = Context::new(Arc::new(service), reconciler_config).with_metrics(metrics.clone());
    let reconciler = Reconciler::new(Arc::new(ctx));

    let cancel = CancellationToken::new();
    let shutdown = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                warn!("Received Ctrl+C, cancelling");
                cancel.cancel();
            }
        })
    };

    let result = apply_with_retries(&reconciler, &desired, &cancel).await;
    shutdown.abort();

    let state = result?;
    println!("{}", serde_json::to_string_pretty(&redacted(state))?);
    eprint!("{}", metrics.encode());
    Ok(())
}

/// Re-run `apply` on retryable errors, picking up whatever the last attempt left behind
async fn apply_with_retries(
    reconciler: &Reconciler,
    desired: &DesiredConfig,
    cancel: &CancellationToken,
) -> replica_provider::Result<ObservedState> {
    let backoff = BackoffConfig::default();
    let mut previous = None;
    let mut attempt = 0;
    loop {
        let err = match reconciler.apply(previous.as_ref(), desired, cancel).await {
            Ok(state) => return Ok(state),
            Err(err) => err,
        };
        let delay = match backoff.delay_for_error(&err, attempt) {
            Some(delay) if attempt < MAX_ATTEMPTS => delay,
            _ => return Err(err),
        };

        warn!(error = %err, attempt, ?delay, "reconciliation failed, retrying");
        previous = reconciler.read(&desired.id()).await.ok();
        tokio::select! {
            _ = cancel.cancelled() => return Err(err),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}

fn schema() -> CliResult {
    let schema = schemars::schema_for!(DesiredConfig);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

fn redacted(mut state: ObservedState) -> ObservedState {
    for secret in [&mut state.password, &mut state.uri, &mut state.private_uri] {
        if !secret.is_empty() {
            *secret = replica_provider::Sensitive::new("<redacted>");
        }
    }
    state
}

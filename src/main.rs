use image_task_worker::{
    app_state::AppState,
    config::AppConfig,
    telemetry,
    worker::{self, poller::RunSummary, poller::Termination},
};
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const DEFAULT_CONSUME_ROUNDS: u32 = 5;
const DEFAULT_PUBLISH_ROUNDS: u32 = 10;

#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum InvocationMode {
    /// Consume (and publish, when enabled) until the invocation deadline
    #[default]
    Deadline,
    /// Run a fixed number of consume rounds
    Rounds,
    /// Only publish tasks
    Publish,
}

#[derive(Debug, Default, Deserialize)]
struct InvocationRequest {
    #[serde(default)]
    mode: InvocationMode,
    rounds: Option<u32>,
}

#[derive(Debug, Serialize)]
struct InvocationResponse {
    mode: InvocationMode,
    #[serde(flatten)]
    summary: RunSummary,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    telemetry::init_tracing();

    let prometheus = PrometheusBuilder::new().install_recorder()?;
    telemetry::describe_metrics();

    // Built once per cold start, reused by every invocation of this container
    let config = Arc::new(AppConfig::from_env()?);
    let state = Arc::new(AppState::from_config(&config)?);

    tracing::info!("Image task worker ready");

    // A null payload (plain scheduled trigger) runs the default mode
    run(service_fn(move |event: LambdaEvent<Option<InvocationRequest>>| {
        let config = Arc::clone(&config);
        let state = Arc::clone(&state);
        let prometheus = prometheus.clone();
        let request = event.payload.unwrap_or_default();
        async move { handle(request, &state, &config, &prometheus).await }
    }))
    .await
}

async fn handle(
    request: InvocationRequest,
    state: &AppState,
    config: &AppConfig,
    prometheus: &PrometheusHandle,
) -> Result<InvocationResponse, Error> {
    match state.queue.depth().await {
        Ok(depth) => tracing::info!(depth, mode = ?request.mode, "Invocation started"),
        Err(e) => tracing::warn!(error = %e, "Could not read queue depth"),
    }

    let summary = match request.mode {
        InvocationMode::Deadline => {
            let termination = Termination::Deadline(config.invocation_deadline());
            worker::build_poller(state, config, termination, config.publish_enabled)
                .run()
                .await
        }
        InvocationMode::Rounds => {
            let rounds = request.rounds.unwrap_or(DEFAULT_CONSUME_ROUNDS);
            worker::build_poller(state, config, Termination::Rounds(rounds), false)
                .run()
                .await
        }
        InvocationMode::Publish => {
            let rounds = request.rounds.unwrap_or(DEFAULT_PUBLISH_ROUNDS);
            let published = worker::build_publisher(state, config)
                .publish_rounds(rounds)
                .await;
            RunSummary {
                rounds: u64::from(rounds),
                tasks_published: published as u64,
                ..RunSummary::default()
            }
        }
    };

    match state.scratch.entries() {
        Ok(leftover) if !leftover.is_empty() => {
            tracing::warn!(count = leftover.len(), "Scratch files left after invocation");
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "Could not inspect scratch directory"),
    }
    tracing::debug!(metrics = %prometheus.render(), "Invocation metrics");

    Ok(InvocationResponse {
        mode: request.mode,
        summary,
    })
}

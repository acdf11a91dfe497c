use image_task_worker::{
    app_state::AppState,
    config::AppConfig,
    telemetry,
    worker::{self, poller::Termination},
};
use tokio_util::sync::CancellationToken;

/// Runs a single time-bounded invocation against the configured backends.
/// Ctrl-C stops both tracks at their next iteration boundary.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::init_tracing();

    tracing::info!("Starting local image task worker");

    let config = AppConfig::from_env()?;
    let state = AppState::from_config(&config)?;

    let termination = Termination::Deadline(config.invocation_deadline());
    let poller = worker::build_poller(&state, &config, termination, config.publish_enabled);

    let token = CancellationToken::new();
    let interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, finishing in-flight work");
            interrupt.cancel();
        }
    });

    let summary = poller.run_with_token(token).await;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}

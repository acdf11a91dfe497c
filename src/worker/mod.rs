//! The concurrent task-processing loop.

pub mod dispatcher;
pub mod pipeline;
pub mod poller;
pub mod publisher;

use std::sync::Arc;

use crate::app_state::AppState;
use crate::config::AppConfig;

use dispatcher::Dispatcher;
use pipeline::TaskPipeline;
use poller::{BoundedPoller, PollerSettings, Termination};
use publisher::TaskPublisher;

/// Wire the pipeline, dispatcher and (optionally) publisher into a poller.
pub fn build_poller(
    state: &AppState,
    config: &AppConfig,
    termination: Termination,
    publish: bool,
) -> BoundedPoller {
    let pipeline = TaskPipeline::new(
        Arc::clone(&state.storage),
        Arc::clone(&state.transforms),
        state.scratch.clone(),
    );
    let dispatcher = Dispatcher::new(Arc::new(pipeline), config.worker_count);

    let settings = PollerSettings {
        batch_size: config.batch_size,
        idle_backoff: config.idle_backoff(),
        publish_interval: config.publish_interval(),
        termination,
    };
    let poller = BoundedPoller::new(Arc::clone(&state.queue), Arc::new(dispatcher), settings);

    if publish {
        poller.with_publisher(Arc::new(build_publisher(state, config)))
    } else {
        poller
    }
}

pub fn build_publisher(state: &AppState, config: &AppConfig) -> TaskPublisher {
    TaskPublisher::new(
        Arc::clone(&state.storage),
        Arc::clone(&state.queue),
        config.input_prefix.clone(),
        config.publish_batch_size,
    )
}

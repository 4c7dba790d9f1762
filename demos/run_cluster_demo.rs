//! Runs a small population of model agents through a handful of iterations,
//! schedules a meta-agent once two of them have talked enough, and prints
//! the resulting state each iteration. Not part of the library surface —
//! just a runnable illustration of the public API end to end.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use caxton_platform::agent::{ModelAgent, ObserverAgent};
use caxton_platform::config::ServerConfig;
use caxton_platform::observability::init_tracing;
use caxton_platform::server::Server;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    info!("starting cluster demo");

    let server = Server::new(ServerConfig::development());

    let models: Vec<Arc<ModelAgent>> = (0..4)
        .map(|i| {
            let counter = Arc::new(AtomicU32::new(0));
            server.spawn_model(
                ModelAgent::new(
                    Arc::new(|_request| true),
                    Arc::new(move || {
                        let n = counter.fetch_add(1, Ordering::SeqCst);
                        Bytes::from(format!("model-{i}-turn-{n}"))
                    }),
                )
                .with_validation_request_payload(Bytes::from_static(b"hello")),
            )
        })
        .collect();

    let observer = server.spawn_observer(ObserverAgent::new);
    let (first, second) = (models[0].id(), models[1].id());
    let scheduled = Arc::new(AtomicBool::new(false));
    let observer_for_closure = observer.clone();
    let cluster_members = vec![models[0].clone(), models[1].clone()];
    observer.subscribe_on_after_all_state_updates_received(move |handle| {
        if scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        if !observer_for_closure.statistics().has_communicated_with(first, second) {
            scheduled.store(false, Ordering::SeqCst);
            return;
        }
        handle.schedule_meta_agent(
            cluster_members.clone(),
            vec![],
            Arc::new(|_stats, _state| (HashMap::new(), HashMap::new())),
            Arc::new(|_stats, state| state.get_model_states_recursive()),
            None,
            None,
            None,
        );
    });

    server.run().await?;

    let registry = server.registry();
    for id in registry.model_ids() {
        if let Some(model) = registry.model_handle(id) {
            info!(agent_id = %id, state = ?model.state(), "final model state");
        }
    }
    info!(
        hierarchy = %server.hierarchy().lock().expect("hierarchy mutex poisoned").to_string_compact(),
        "final meta-hierarchy"
    );

    Ok(())
}

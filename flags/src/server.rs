use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::Config;
use crate::flag_definitions::FlagRegistry;
use crate::flag_store::{FlagStore, PostgresFlagStore};
use crate::flag_sync::spawn_flag_update_listener;
use crate::pubsub::RedisPubSub;
use crate::router;

pub async fn serve<F>(config: Config, registry: FlagRegistry, listener: TcpListener, shutdown: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let store = Arc::new(
        PostgresFlagStore::new(&config.database_url, config.max_pg_connections)
            .await
            .expect("failed to connect to postgres"),
    );
    let pubsub =
        Arc::new(RedisPubSub::new(config.redis_url.clone()).expect("failed to create redis client"));
    let registry = Arc::new(registry);

    // Hydrate the override cache so a freshly booted instance serves
    // persisted overrides before its first resolver pass.
    match store.get_all_flags().await {
        Ok(rows) => {
            let persisted: HashMap<String, bool> = rows
                .into_iter()
                .map(|row| (row.flag_key, row.override_value))
                .collect();
            registry.hydrate(&persisted);
        }
        Err(e) => tracing::warn!("starting with an empty override cache: {}", e),
    }

    let listener_task = spawn_flag_update_listener(registry.clone(), pubsub.clone());

    let app = router::router(registry, store, pubsub, config.secure_cookies);

    tracing::info!("listening on {:?}", listener.local_addr().unwrap());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .unwrap();

    listener_task.abort();
}

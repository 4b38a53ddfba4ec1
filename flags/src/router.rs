use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::{endpoint, flag_definitions::FlagRegistry, flag_resolver, flag_store, pubsub, sse};

#[derive(Clone)]
pub struct State {
    pub registry: Arc<FlagRegistry>,
    pub store: Arc<dyn flag_store::FlagStore + Send + Sync>,
    pub pubsub: Arc<dyn pubsub::PubSub + Send + Sync>,
    pub secure_cookies: bool,
}

async fn index() -> &'static str {
    "flags"
}

pub fn router(
    registry: Arc<FlagRegistry>,
    store: Arc<dyn flag_store::FlagStore + Send + Sync>,
    pubsub: Arc<dyn pubsub::PubSub + Send + Sync>,
    secure_cookies: bool,
) -> Router {
    let state = State {
        registry,
        store,
        pubsub,
        secure_cookies,
    };

    Router::new()
        .route("/", get(index))
        .route(
            "/api/flags",
            get(endpoint::flags).layer(axum::middleware::from_fn_with_state(
                state.clone(),
                flag_resolver::resolve_flags,
            )),
        )
        .route("/api/admin/flags/override", post(endpoint::override_flag))
        .route("/api/sse", get(sse::stream).post(sse::publish))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

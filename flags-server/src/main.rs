use envconfig::Envconfig;
use tokio::net::TcpListener;
use tokio::signal;

use flags::config::Config;
use flags::flag_definitions::{FlagDefinition, FlagRegistry};
use flags::flag_matching::FlagMatcher;
use flags::server::serve;

/// The statically declared flag catalog. Keys are stable across deploys;
/// overrides for them live in the store.
fn declared_flags() -> FlagRegistry {
    let mut registry = FlagRegistry::new();

    registry
        .register(
            FlagDefinition::with_chance(
                "new-dashboard",
                "Gradual rollout of the redesigned dashboard",
                50,
            )
            .expect("invalid chance"),
        )
        .expect("duplicate flag key");

    registry
        .register(FlagDefinition::with_custom(
            "app-action-buttons",
            "Whether to show the secondary nav buttons",
            |visitor_id| FlagMatcher::new(visitor_id).bucket() % 2 == 0,
        ))
        .expect("duplicate flag key");

    registry
}

async fn shutdown() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    tracing::info!("Shutting down gracefully...");
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("Invalid configuration:");

    let listener = TcpListener::bind(config.address)
        .await
        .expect("failed to bind address");

    serve(config, declared_flags(), listener, shutdown()).await;
}

use std::sync::Arc;

use rand::{distributions::Alphanumeric, Rng};

use crate::flag_definitions::{FlagDefinition, FlagRegistry};
use crate::flag_matching::FlagMatcher;

pub fn random_string(prefix: &str, length: usize) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(Alphanumeric)
        .take(length)
        .map(char::from)
        .collect();
    format!("{}{}", prefix, suffix)
}

/// Registry with one flag of every shape: a full rollout, a disabled
/// rollout, a partial rollout, and a custom parity decision.
pub fn setup_registry() -> Arc<FlagRegistry> {
    let mut registry = FlagRegistry::new();
    registry
        .register(FlagDefinition::with_chance("always-on", "served to everyone", 100).unwrap())
        .expect("failed to register flag");
    registry
        .register(FlagDefinition::with_chance("always-off", "served to no one", 0).unwrap())
        .expect("failed to register flag");
    registry
        .register(FlagDefinition::with_chance("half-rollout", "50% rollout", 50).unwrap())
        .expect("failed to register flag");
    registry
        .register(FlagDefinition::with_custom(
            "even-bucket",
            "visitors in an even bucket",
            |visitor_id| FlagMatcher::new(visitor_id).bucket() % 2 == 0,
        ))
        .expect("failed to register flag");
    Arc::new(registry)
}

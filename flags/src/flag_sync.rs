use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::flag_definitions::FlagRegistry;
use crate::pubsub::PubSub;

/// Channel on which override changes are announced to every running
/// instance and, through the push gateway, to connected clients.
pub const FLAGS_UPDATE_CHANNEL: &str = "flags:update";

/// Wire format of an override change. `value: null` means the override was
/// cleared and decisions fall back to the computed value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagUpdate {
    #[serde(rename = "flagKey")]
    pub flag_key: String,
    pub value: Option<bool>,
}

/// Keeps this instance's override cache in sync with changes applied
/// elsewhere. Best effort: a missed message is repaired by the next
/// successful store read.
pub fn spawn_flag_update_listener(
    registry: Arc<FlagRegistry>,
    pubsub: Arc<dyn PubSub + Send + Sync>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut subscription = match pubsub.subscribe(FLAGS_UPDATE_CHANNEL).await {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::error!("failed to subscribe to {}: {}", FLAGS_UPDATE_CHANNEL, e);
                return;
            }
        };

        while let Some(message) = subscription.recv().await {
            let update: FlagUpdate = match serde_json::from_str(&message) {
                Ok(update) => update,
                Err(e) => {
                    tracing::warn!("ignoring malformed flag update: {}", e);
                    continue;
                }
            };

            let applied = match update.value {
                Some(value) => registry.set_override(&update.flag_key, value),
                None => registry.clear_override(&update.flag_key),
            };
            if applied.is_err() {
                // Another instance may know flags this one does not declare.
                tracing::warn!("flag update for unknown flag {}", update.flag_key);
            }
        }
    })
}

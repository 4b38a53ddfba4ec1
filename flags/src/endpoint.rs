use axum::extract::State;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::api::FlagError;
use crate::flag_resolver::FlagDecisions;
use crate::flag_sync::{FlagUpdate, FLAGS_UPDATE_CHANNEL};
use crate::router;

/// Decision set for the calling visitor, as computed by the resolver
/// middleware layered on this route.
pub async fn flags(Extension(decisions): Extension<FlagDecisions>) -> Json<FlagDecisions> {
    Json(decisions)
}

#[derive(Debug, Deserialize, Serialize)]
pub struct OverrideRequest {
    #[serde(rename = "flagKey")]
    pub flag_key: String,
    /// `null` clears the override instead of forcing a value.
    pub value: Option<bool>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct OverrideResponse {
    pub success: bool,
}

/// Admin override action: persist first, then update the local cache, then
/// announce. By the time we publish the override is durable, so a publish
/// failure is logged and the action still succeeds.
#[instrument(skip_all, fields(flag_key = %payload.flag_key, value = ?payload.value))]
pub async fn override_flag(
    State(state): State<router::State>,
    Json(payload): Json<OverrideRequest>,
) -> Result<Json<OverrideResponse>, FlagError> {
    if state.registry.get(&payload.flag_key).is_none() {
        return Err(FlagError::FlagNotFound);
    }

    match payload.value {
        Some(value) => {
            state
                .store
                .set_flag(&payload.flag_key, value)
                .await
                .map_err(|e| {
                    tracing::error!("failed to persist override: {}", e);
                    FlagError::StorageUnavailable
                })?;
            state.registry.set_override(&payload.flag_key, value)?;
        }
        None => {
            state
                .store
                .delete_flag(&payload.flag_key)
                .await
                .map_err(|e| {
                    tracing::error!("failed to delete override: {}", e);
                    FlagError::StorageUnavailable
                })?;
            state.registry.clear_override(&payload.flag_key)?;
        }
    }

    let update = FlagUpdate {
        flag_key: payload.flag_key,
        value: payload.value,
    };
    let message = serde_json::to_string(&update)?;
    if let Err(e) = state.pubsub.publish(FLAGS_UPDATE_CHANNEL, &message).await {
        tracing::error!("failed to announce override change: {}", e);
    }

    Ok(Json(OverrideResponse { success: true }))
}

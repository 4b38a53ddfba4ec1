use std::collections::HashMap;

use axum::extract::{Request, State};
use axum::http::header::{HeaderMap, HeaderValue, COOKIE, SET_COOKIE};
use axum::middleware::Next;
use axum::response::Response;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::flag_definitions::FlagRegistry;
use crate::flag_store::FlagStore;
use crate::router;

pub const VISITOR_COOKIE: &str = "flag_id";
const VISITOR_COOKIE_MAX_AGE_SECS: u64 = 60 * 60 * 24 * 365;

/// Set by the authentication middleware upstream; the resolver only reads
/// the stable id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub id: String,
}

/// One flag's outcome for a request. The computed value and the admin
/// override stay separate so a client can display both; the effective
/// decision is the override when present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagDecision {
    pub value: bool,
    #[serde(rename = "override")]
    pub override_value: Option<bool>,
}

impl FlagDecision {
    pub fn effective(&self) -> bool {
        self.override_value.unwrap_or(self.value)
    }
}

/// Decision set attached to every request, keyed by flag key. Computed
/// fresh per request, never persisted.
pub type FlagDecisions = HashMap<String, FlagDecision>;

/// The key used to bucket decisions: the authenticated user's id, or an
/// anonymous id minted once and kept in a year-long cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visitor {
    User(String),
    Anonymous { id: String, minted: bool },
}

impl Visitor {
    pub fn id(&self) -> &str {
        match self {
            Visitor::User(id) => id,
            Visitor::Anonymous { id, .. } => id,
        }
    }

    fn minted(&self) -> bool {
        matches!(self, Visitor::Anonymous { minted: true, .. })
    }
}

pub fn identify_visitor(user: Option<&AuthenticatedUser>, headers: &HeaderMap) -> Visitor {
    if let Some(user) = user {
        return Visitor::User(user.id.clone());
    }
    match read_cookie(headers, VISITOR_COOKIE) {
        Some(id) => Visitor::Anonymous { id, minted: false },
        None => Visitor::Anonymous {
            id: Uuid::new_v4().to_string(),
            minted: true,
        },
    }
}

fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

pub fn visitor_cookie(id: &str, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; Max-Age={}; Path=/; HttpOnly; SameSite=Lax",
        VISITOR_COOKIE, id, VISITOR_COOKIE_MAX_AGE_SECS
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Computes the decision set for one visitor.
///
/// Never fails: a store error degrades to the registry's cached overrides
/// (computed values on a fresh instance) instead of failing the request.
#[instrument(skip_all, fields(visitor_id = %visitor_id))]
pub async fn resolve(
    registry: &FlagRegistry,
    store: &(dyn FlagStore + Sync),
    visitor_id: &str,
) -> FlagDecisions {
    let overrides = match store.get_all_flags().await {
        Ok(rows) => {
            let persisted: HashMap<String, bool> = rows
                .into_iter()
                .map(|row| (row.flag_key, row.override_value))
                .collect();
            registry.hydrate(&persisted);
            persisted
        }
        Err(e) => {
            tracing::warn!("serving cached overrides, store read failed: {}", e);
            registry.overrides()
        }
    };

    registry
        .all()
        .iter()
        .map(|flag| {
            (
                flag.key.clone(),
                FlagDecision {
                    value: flag.decide(visitor_id),
                    override_value: overrides.get(&flag.key).copied(),
                },
            )
        })
        .collect()
}

/// Attaches the decision set to the request and, for a first-time
/// anonymous visitor, the minted id cookie to the response.
pub async fn resolve_flags(
    State(state): State<router::State>,
    mut request: Request,
    next: Next,
) -> Response {
    let user = request.extensions().get::<AuthenticatedUser>().cloned();
    let visitor = identify_visitor(user.as_ref(), request.headers());

    let decisions = resolve(&state.registry, state.store.as_ref(), visitor.id()).await;
    request.extensions_mut().insert(decisions);

    let minted = visitor.minted().then(|| visitor.id().to_string());
    let mut response = next.run(request).await;
    if let Some(id) = minted {
        if let Ok(value) = HeaderValue::from_str(&visitor_cookie(&id, state.secure_cookies)) {
            response.headers_mut().append(SET_COOKIE, value);
        }
    }
    response
}

pub mod api;
pub mod config;
pub mod endpoint;
pub mod flag_definitions;
pub mod flag_matching;
pub mod flag_resolver;
pub mod flag_store;
pub mod flag_sync;
pub mod pubsub;
pub mod router;
pub mod server;
pub mod sse;
pub mod test_utils;

pub mod a2a;
pub mod auth_middleware;
pub mod cache;
pub mod config;
pub mod error;
pub mod exchange;
pub mod fingerprint;
pub mod memory_backend;
pub mod meter;
pub mod oidc;
pub mod proxy;
pub mod queue;
pub mod quota;
pub mod router;
pub mod routes;
pub mod session;
pub mod session_middleware;
pub mod state;
pub mod tasks;
pub mod token_encoder;
pub mod usage;
pub mod worker;

pub use config::GatewayConfig;
pub use router::build_router;
pub use state::AppState;

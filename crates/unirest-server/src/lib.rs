pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod server;

pub use auth::BasicCredentials;
pub use cache::{ConnectionCache, ConnectionError, ConnectionSettings, ConnectionStats};
pub use config::{AppConfig, ConnectionsConfig, RemoteBackend, RemoteConfig, ServerConfig};
pub use error::ApiError;
pub use observability::init_tracing;
pub use server::{AppState, ServerBuilder, UnirestServer, build_app};

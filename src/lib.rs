pub mod config;
pub mod csrf;
pub mod error;
pub mod models;
pub mod pagination;
pub mod pipeline;
pub mod rate_limit; // in-memory rate limiting
pub mod repo;
pub mod routes;
pub mod sanitize;
pub mod secret;
pub mod security;
pub mod telemetry;

// Re-export commonly used items for tests / external users
pub use routes::{config, AppState};
pub use security::SecurityHeaders;

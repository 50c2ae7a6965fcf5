pub mod auth;
pub mod error;
pub mod media;
pub mod models;
pub mod openapi;
pub mod rate_limit;
pub mod routes;
pub mod store;

// Re-export commonly used items for tests / external users
pub use routes::{config, AppState};

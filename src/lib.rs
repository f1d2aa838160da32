// Error taxonomy shared by every component
pub mod error;

// TOML configuration and environment overrides
pub mod config;

// Per-subject OAuth credentials and their storage
pub mod credentials;

// Authorization server client and CSRF state
pub mod oauth;

// Valid bearer tokens, refreshed on demand
pub mod token;

// Per-subject fixed-window rate limiting
pub mod rate_limit;

// TTL response cache tiers
pub mod cache;

// Bounded retries with linear backoff
pub mod retry;

// Facade composing the above
pub mod gateway;

// HTTP routes
pub mod api;

// Process wiring for binaries
pub mod server;

pub use error::{ErrorKind, GatewayError};
pub use gateway::Gateway;

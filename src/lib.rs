// Privacy Hub control-plane API.

// Error handling
pub mod api_errors;
pub mod errors;

// Configuration
pub mod config;

// Persistence primitives
pub mod file_store;
pub mod secrets_store;

// Domain state
pub mod catalog;
pub mod jobs;
pub mod rollback;
pub mod sessions;

// Orchestration
pub mod process;
pub mod sources;
pub mod updater;

// Observability
pub mod log_sink;
pub mod metrics;

// HTTP surface
pub mod api;
pub mod app_state;
pub mod security;
pub mod web;

// Input validation
pub mod input_validator;

pub mod api;
pub mod cache;
pub mod config;
pub mod dashboard;
pub mod domain;
pub mod error;
pub mod health;
pub mod pipeline;
pub mod query;
pub mod scheduler;
pub mod store;
pub mod tasks;
pub mod telemetry;

pub mod chat;
pub mod config;
pub mod datasets;
pub mod documents;
pub mod health;
pub mod metrics;
pub mod sessions;
pub mod tools;

pub mod analytics;
pub mod api;
pub mod app_context;
pub mod auth;
pub mod client;
pub mod config;
pub mod devices;
pub mod error;
pub mod events;
pub mod expansion;
pub mod imports;
pub mod ingestion;
pub mod store;

#[cfg(test)]
mod testing;

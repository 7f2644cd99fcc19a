//! Pipeline engine client and the pipeline requests built for message events.

pub mod engine;
pub mod requests;

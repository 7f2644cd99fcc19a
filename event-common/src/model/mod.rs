//! Wire model shared by the ingestion, translation and persistence layers.
//!
//! Field names follow the json produced and consumed by the surrounding platform,
//! so every struct here tolerates missing fields on decode.

pub mod analytics;
pub mod deployment;
pub mod devices;
pub mod event_desc;
pub mod imports;

pub use analytics::*;
pub use deployment::*;
pub use devices::*;
pub use event_desc::*;
pub use imports::*;

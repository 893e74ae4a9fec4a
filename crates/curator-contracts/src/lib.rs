//! Data contracts shared by the orchestration engine and its callers.

pub mod events;
pub mod media;
pub mod plans;
pub mod progress;
pub mod providers;
pub mod runs;

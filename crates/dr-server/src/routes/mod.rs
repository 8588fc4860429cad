//! Route handlers.

pub mod convert;
pub mod events;
pub mod jobs;
pub mod status;

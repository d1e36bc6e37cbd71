//! Data models for Huddle

mod membership;
mod room;

pub use membership::*;
pub use room::*;

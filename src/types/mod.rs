//! Core types for the streaming engine.

pub mod event;
pub mod response;
pub mod tool;
pub mod usage;

pub use event::*;
pub use response::*;
pub use tool::*;
pub use usage::*;

//! The counsel engine: matching, payment gating, the session lifecycle and
//! message delivery. Everything outside this module is transport glue.

pub mod broadcaster;
pub mod catalog;
pub mod channel;
pub mod directory;
pub mod engine;
pub mod locks;
pub mod payments;
pub mod ratings;
pub mod sessions;
pub mod sweeper;

pub use engine::{Engine, EngineSettings};

// crates/scopecore/src/events/mod.rs

mod base;

pub use base::{EventBus, RuntimeEvent};

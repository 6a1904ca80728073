//! Utility modules

pub mod bounded_queue;
pub mod time;

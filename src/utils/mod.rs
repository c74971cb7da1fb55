//! Utility modules for common functionality

pub mod text;
pub mod throttle;

pub use text::truncate;
pub use throttle::Throttle;

// vim: ts=4

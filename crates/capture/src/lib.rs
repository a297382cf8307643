pub mod config;
pub mod pacing;
pub mod pattern;
pub mod publisher;

pub use pacing::Pacer;
pub use publisher::{CaptureSource, PublishedFrame};

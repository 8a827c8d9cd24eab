//! Volume aggregation for the parent's visualization

pub mod history;
pub mod meter;

pub use history::{loudness, VolumeHistory, VolumeSnapshot};
pub use meter::render_meter;

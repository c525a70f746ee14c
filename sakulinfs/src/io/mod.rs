mod file;
mod storage;

pub use file::{FileVolume, FileVolumeBuilder};
pub use storage::{Position, VolumeStorage};

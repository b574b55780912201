pub mod dm;
pub mod loopdev;
pub mod overlay;

pub use loopdev::LoopDevice;
pub use overlay::{Device, OverlayDisk, create_overlay, create_overlay_with_id};

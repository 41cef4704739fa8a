//! Model interface and reference network.

mod output;
pub(crate) mod params;
mod segnet;

pub use output::{ModelOutput, OutputSelector, SegmentationModel};
pub use params::{module_from_host, module_to_host, HostParams};
pub use segnet::{ConvBlock, SegNet3d};

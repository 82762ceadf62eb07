pub mod frame;
pub mod pattern;
pub mod source;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use frame::{ColourSpace, Frame, Region};
pub use pattern::PatternSource;
pub use source::{SourceState, VideoSource};
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Source;

//! Error types shared by frames, observables, sources and targets

use thiserror::Error;

use crate::capture::frame::{ColourSpace, Region};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("could not attach observer: {0}")]
    Attachment(&'static str),

    #[error("could not detach observer: {0}")]
    Detachment(&'static str),

    #[error("view index {index} out of range for frame with {count} view(s)")]
    OutOfRange { index: usize, count: usize },

    #[error("structured view supported only for BGRA, frame is {0}")]
    UnsupportedLayout(ColourSpace),

    #[error("{colour} frame of {width}x{height} is too large to address")]
    InvalidShape {
        colour: ColourSpace,
        width: usize,
        height: usize,
    },

    #[error("a frame needs at least one view")]
    NoViews,

    #[error("buffer holds {actual} bytes, layout requires {expected}")]
    BufferLength { expected: usize, actual: usize },

    #[error("frame references external storage and cannot be written to")]
    NotOwned,

    #[error("region {region:?} invalid for {colour} frame of {width}x{height}")]
    InvalidRegion {
        region: Region,
        colour: ColourSpace,
        width: usize,
        height: usize,
    },

    #[error("video source error: {0}")]
    Source(String),

    #[error("video target error: {0}")]
    Target(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

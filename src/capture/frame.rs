//! Frame buffers with owned or borrowed storage and stereo views

use std::fmt;

use bytes::BytesMut;
use ndarray::ArrayView3;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Pixel layouts a frame can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColourSpace {
    /// Packed 8-bit B, G, R, A
    Bgra,
    /// Planar YUV 4:2:0: full Y plane, then quarter-size U and V planes
    I420,
    /// Packed YUV 4:2:2: U Y V Y per pixel pair
    Uyvy,
}

impl ColourSpace {
    /// Bytes per storage unit (one BGRA pixel, or one 8-bit YUV sample)
    pub fn unit_size(self) -> usize {
        match self {
            ColourSpace::Bgra => 4,
            ColourSpace::I420 | ColourSpace::Uyvy => 1,
        }
    }

    /// Number of storage units one view of `width` x `height` occupies, or
    /// `None` if it does not fit in `usize`
    pub fn checked_pixel_count(self, width: usize, height: usize) -> Option<usize> {
        let area = width.checked_mul(height)?;
        match self {
            ColourSpace::Bgra => Some(area),
            ColourSpace::I420 => area.checked_add(area / 2),
            ColourSpace::Uyvy => area.checked_mul(2),
        }
    }

    pub fn checked_byte_length(self, width: usize, height: usize) -> Option<usize> {
        self.checked_pixel_count(width, height)?.checked_mul(self.unit_size())
    }

    /// Saturates at `usize::MAX`, a length no buffer can have
    pub fn pixel_count(self, width: usize, height: usize) -> usize {
        self.checked_pixel_count(width, height).unwrap_or(usize::MAX)
    }

    /// Saturates at `usize::MAX`, a length no buffer can have
    pub fn byte_length(self, width: usize, height: usize) -> usize {
        self.checked_byte_length(width, height).unwrap_or(usize::MAX)
    }

    fn view_length(self, width: usize, height: usize) -> Result<usize> {
        self.checked_byte_length(width, height).ok_or(Error::InvalidShape {
            colour: self,
            width,
            height,
        })
    }
}

impl fmt::Display for ColourSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColourSpace::Bgra => "BGRA",
            ColourSpace::I420 => "I420",
            ColourSpace::Uyvy => "UYVY",
        };
        f.write_str(name)
    }
}

/// Rectangle inside a frame, in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Region {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Check that the region is non-empty, lies inside a `width` x `height`
    /// frame and respects the chroma subsampling of `colour`
    pub fn validate(self, colour: ColourSpace, width: usize, height: usize) -> Result<()> {
        let inside = self.width > 0
            && self.height > 0
            && self.x.checked_add(self.width).is_some_and(|end| end <= width)
            && self.y.checked_add(self.height).is_some_and(|end| end <= height);
        let aligned = match colour {
            ColourSpace::Bgra => true,
            ColourSpace::Uyvy => self.x % 2 == 0 && self.width % 2 == 0,
            ColourSpace::I420 => [self.x, self.y, self.width, self.height, width, height]
                .iter()
                .all(|v| v % 2 == 0),
        };
        if inside && aligned {
            Ok(())
        } else {
            Err(Error::InvalidRegion {
                region: self,
                colour,
                width,
                height,
            })
        }
    }
}

enum Storage<'a> {
    Owned(Vec<BytesMut>),
    Borrowed(Vec<&'a [u8]>),
}

/// One captured image, made of one view (mono) or several (stereo).
///
/// A frame either owns its views or borrows them from the producer for `'a`.
/// Borrowed frames are what capture backends hand out for vendor buffers that
/// get recycled right after a broadcast; consumers that need the pixels later
/// take an owned copy with [`Frame::to_owned_frame`] or `clone`.
///
/// All views share the colour layout and dimensions, and each is packed
/// without row padding.
pub struct Frame<'a> {
    colour: ColourSpace,
    width: usize,
    height: usize,
    storage: Storage<'a>,
}

impl Frame<'static> {
    /// Placeholder frame with no dimensions, to be bound later by a producer
    pub fn empty(colour: ColourSpace, owns_storage: bool) -> Self {
        let storage = if owns_storage {
            Storage::Owned(vec![BytesMut::new()])
        } else {
            Storage::Borrowed(vec![&[][..]])
        };
        Self {
            colour,
            width: 0,
            height: 0,
            storage,
        }
    }

    /// Single-view frame owning a zeroed buffer.
    ///
    /// # Panics
    ///
    /// Like `Vec` allocation, if the view's byte length overflows `usize`.
    /// Use [`Frame::with_views`] for shapes that come from outside.
    pub fn new(colour: ColourSpace, width: usize, height: usize) -> Self {
        Self::allocate(colour, width, height, colour.byte_length(width, height), 1)
    }

    /// Frame owning `view_count` zeroed buffers of identical shape
    pub fn with_views(
        colour: ColourSpace,
        width: usize,
        height: usize,
        view_count: usize,
    ) -> Result<Self> {
        if view_count == 0 {
            return Err(Error::NoViews);
        }
        let length = colour.view_length(width, height)?;
        Ok(Self::allocate(colour, width, height, length, view_count))
    }

    fn allocate(
        colour: ColourSpace,
        width: usize,
        height: usize,
        length: usize,
        view_count: usize,
    ) -> Self {
        let views = (0..view_count).map(|_| BytesMut::zeroed(length)).collect();
        Self {
            colour,
            width,
            height,
            storage: Storage::Owned(views),
        }
    }
}

impl<'a> Frame<'a> {
    /// Wrap a producer's buffer without copying it
    pub fn wrap(colour: ColourSpace, width: usize, height: usize, data: &'a [u8]) -> Result<Self> {
        Self::wrap_views(colour, width, height, &[data])
    }

    /// Wrap one producer buffer per view without copying them
    pub fn wrap_views(
        colour: ColourSpace,
        width: usize,
        height: usize,
        views: &[&'a [u8]],
    ) -> Result<Self> {
        check_views(colour, width, height, views)?;
        Ok(Self {
            colour,
            width,
            height,
            storage: Storage::Borrowed(views.to_vec()),
        })
    }

    /// Rebind to new dimensions and pixel data.
    ///
    /// Owning frames copy `views` into their own buffers, borrowing frames
    /// keep references to them.
    pub fn bind(&mut self, width: usize, height: usize, views: &[&'a [u8]]) -> Result<()> {
        check_views(self.colour, width, height, views)?;
        match &mut self.storage {
            Storage::Owned(buffers) => {
                buffers.resize_with(views.len(), BytesMut::new);
                for (buffer, view) in buffers.iter_mut().zip(views) {
                    buffer.clear();
                    buffer.extend_from_slice(view);
                }
            }
            Storage::Borrowed(borrowed) => *borrowed = views.to_vec(),
        }
        self.width = width;
        self.height = height;
        Ok(())
    }

    pub fn colour(&self) -> ColourSpace {
        self.colour
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn view_count(&self) -> usize {
        match &self.storage {
            Storage::Owned(buffers) => buffers.len(),
            Storage::Borrowed(views) => views.len(),
        }
    }

    pub fn owns_storage(&self) -> bool {
        matches!(self.storage, Storage::Owned(_))
    }

    /// Raw bytes of one view
    pub fn data(&self, view_index: usize) -> Result<&[u8]> {
        self.check_index(view_index)?;
        Ok(self.view(view_index))
    }

    /// Writable bytes of one view; only owning frames can be written to
    pub fn data_mut(&mut self, view_index: usize) -> Result<&mut [u8]> {
        self.check_index(view_index)?;
        match &mut self.storage {
            Storage::Owned(buffers) => Ok(&mut buffers[view_index][..]),
            Storage::Borrowed(_) => Err(Error::NotOwned),
        }
    }

    /// Iterate over the bytes of every view in order
    pub fn views(&self) -> impl Iterator<Item = &[u8]> + '_ {
        (0..self.view_count()).map(move |index| self.view(index))
    }

    pub fn byte_length(&self, view_index: usize) -> Result<usize> {
        self.check_index(view_index)?;
        Ok(self.colour.byte_length(self.width, self.height))
    }

    pub fn required_byte_length(colour: ColourSpace, width: usize, height: usize) -> usize {
        colour.byte_length(width, height)
    }

    pub fn required_pixel_count(colour: ColourSpace, width: usize, height: usize) -> usize {
        colour.pixel_count(width, height)
    }

    /// (height, width, channel) view of a BGRA frame
    pub fn structured(&self, view_index: usize) -> Result<ArrayView3<'_, u8>> {
        if self.colour != ColourSpace::Bgra {
            return Err(Error::UnsupportedLayout(self.colour));
        }
        let data = self.data(view_index)?;
        ArrayView3::from_shape((self.height, self.width, 4), data).map_err(|_| {
            Error::BufferLength {
                expected: self.colour.byte_length(self.width, self.height),
                actual: data.len(),
            }
        })
    }

    /// Deep copy into newly allocated storage; the copy always owns its views
    pub fn to_owned_frame(&self) -> Frame<'static> {
        Frame {
            colour: self.colour,
            width: self.width,
            height: self.height,
            storage: Storage::Owned(self.views().map(BytesMut::from).collect()),
        }
    }

    /// Owned copy of `region` from every view
    pub fn crop(&self, region: Region) -> Result<Frame<'static>> {
        region.validate(self.colour, self.width, self.height)?;
        let length = self.colour.byte_length(region.width, region.height);
        let views = self
            .views()
            .map(|src| {
                let mut out = BytesMut::zeroed(length);
                self.crop_view(src, region, &mut out);
                out
            })
            .collect();
        Ok(Frame {
            colour: self.colour,
            width: region.width,
            height: region.height,
            storage: Storage::Owned(views),
        })
    }

    fn view(&self, index: usize) -> &[u8] {
        match &self.storage {
            Storage::Owned(buffers) => &buffers[index][..],
            Storage::Borrowed(views) => views[index],
        }
    }

    fn check_index(&self, index: usize) -> Result<()> {
        let count = self.view_count();
        if index < count {
            Ok(())
        } else {
            Err(Error::OutOfRange { index, count })
        }
    }

    fn crop_view(&self, src: &[u8], region: Region, dst: &mut [u8]) {
        match self.colour {
            ColourSpace::Bgra | ColourSpace::Uyvy => {
                let bpp = if self.colour == ColourSpace::Bgra { 4 } else { 2 };
                copy_plane(
                    src,
                    self.width * bpp,
                    dst,
                    region.width * bpp,
                    region.x * bpp,
                    region.y,
                );
            }
            ColourSpace::I420 => {
                let luma = self.width * self.height;
                let chroma = luma / 4;
                let out_luma = region.width * region.height;
                let out_chroma = out_luma / 4;
                copy_plane(
                    &src[..luma],
                    self.width,
                    &mut dst[..out_luma],
                    region.width,
                    region.x,
                    region.y,
                );
                for plane in 0..2 {
                    let from = luma + plane * chroma;
                    let to = out_luma + plane * out_chroma;
                    copy_plane(
                        &src[from..from + chroma],
                        self.width / 2,
                        &mut dst[to..to + out_chroma],
                        region.width / 2,
                        region.x / 2,
                        region.y / 2,
                    );
                }
            }
        }
    }
}

impl Clone for Frame<'_> {
    fn clone(&self) -> Self {
        self.to_owned_frame()
    }
}

impl fmt::Debug for Frame<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("colour", &self.colour)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("view_count", &self.view_count())
            .field("owns_storage", &self.owns_storage())
            .finish()
    }
}

fn check_views(colour: ColourSpace, width: usize, height: usize, views: &[&[u8]]) -> Result<()> {
    if views.is_empty() {
        return Err(Error::NoViews);
    }
    let expected = colour.view_length(width, height)?;
    match views.iter().find(|view| view.len() != expected) {
        Some(view) => Err(Error::BufferLength {
            expected,
            actual: view.len(),
        }),
        None => Ok(()),
    }
}

/// Copy `dst.len() / row_len` rows of `row_len` bytes, starting at byte
/// `x_offset` of row `y_offset` in `src`
fn copy_plane(
    src: &[u8],
    src_stride: usize,
    dst: &mut [u8],
    row_len: usize,
    x_offset: usize,
    y_offset: usize,
) {
    for (row, out) in dst.chunks_exact_mut(row_len).enumerate() {
        let start = (y_offset + row) * src_stride + x_offset;
        out.copy_from_slice(&src[start..start + row_len]);
    }
}

//! Frame data types shared by frame sources and the acquisition loop.
//!
//! A source lends a [`LentFrame`] between `wait` and `release`; its pixel
//! storage belongs to the source and is recycled for the next frame. The
//! borrow checker enforces that: a `LentFrame` borrows the source mutably, so
//! it has to be gone before `release` (or the next `wait`) can be called.
//! Anything that must outlive the release is copied into an owned [`Frame`].

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Frame arrival time, seconds and nanoseconds since the source's epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    /// Seconds component
    pub seconds: u64,
    /// Nanoseconds component (0-999,999,999)
    pub nanos: u32,
}

impl Timestamp {
    pub fn new(seconds: u64, nanos: u32) -> Self {
        Self { seconds, nanos }
    }

    pub fn from_duration(duration: Duration) -> Self {
        Self {
            seconds: duration.as_secs(),
            nanos: duration.subsec_nanos(),
        }
    }

    /// Build from floating-point seconds; negative or non-finite input maps to zero.
    pub fn from_secs_f64(seconds: f64) -> Self {
        Self::from_duration(Duration::try_from_secs_f64(seconds).unwrap_or(Duration::ZERO))
    }

    pub fn to_duration(&self) -> Duration {
        Duration::new(self.seconds, self.nanos)
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.to_duration().as_secs_f64()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanos)
    }
}

/// Storage type of one pixel sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    U8,
    U16,
    U32,
    F32,
    F64,
}

impl ElementType {
    pub fn size_in_bytes(self) -> usize {
        match self {
            ElementType::U8 => 1,
            ElementType::U16 => 2,
            ElementType::U32 | ElementType::F32 => 4,
            ElementType::F64 => 8,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ElementType::U8 => "u8",
            ElementType::U16 => "u16",
            ElementType::U32 => "u32",
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
        };
        f.write_str(name)
    }
}

/// Borrowed pixel data of a lent frame, tagged with its element type.
#[derive(Debug, Clone)]
pub enum FrameData<'a> {
    U8(ArrayView2<'a, u8>),
    U16(ArrayView2<'a, u16>),
    U32(ArrayView2<'a, u32>),
    F32(ArrayView2<'a, f32>),
    F64(ArrayView2<'a, f64>),
}

impl FrameData<'_> {
    pub fn element_type(&self) -> ElementType {
        match self {
            FrameData::U8(_) => ElementType::U8,
            FrameData::U16(_) => ElementType::U16,
            FrameData::U32(_) => ElementType::U32,
            FrameData::F32(_) => ElementType::F32,
            FrameData::F64(_) => ElementType::F64,
        }
    }

    /// `(height, width)` of the frame
    pub fn dim(&self) -> (usize, usize) {
        match self {
            FrameData::U8(v) => v.dim(),
            FrameData::U16(v) => v.dim(),
            FrameData::U32(v) => v.dim(),
            FrameData::F32(v) => v.dim(),
            FrameData::F64(v) => v.dim(),
        }
    }
}

/// Pixel types a session can be started with.
pub trait Pixel: Copy + Into<f64> + Send + Sync + fmt::Debug + 'static {
    const ELEMENT_TYPE: ElementType;

    /// Typed view of `data`, or `None` when it holds another element type.
    fn view<'a>(data: FrameData<'a>) -> Option<ArrayView2<'a, Self>>;
}

macro_rules! impl_pixel {
    ($ty:ty, $variant:ident) => {
        impl Pixel for $ty {
            const ELEMENT_TYPE: ElementType = ElementType::$variant;

            fn view<'a>(data: FrameData<'a>) -> Option<ArrayView2<'a, Self>> {
                match data {
                    FrameData::$variant(view) => Some(view),
                    _ => None,
                }
            }
        }
    };
}

impl_pixel!(u8, U8);
impl_pixel!(u16, U16);
impl_pixel!(u32, U32);
impl_pixel!(f32, F32);
impl_pixel!(f64, F64);

/// Recyclable pixel buffer owned by a frame source.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameBuffer {
    U8(Array2<u8>),
    U16(Array2<u16>),
    U32(Array2<u32>),
    F32(Array2<f32>),
    F64(Array2<f64>),
}

impl FrameBuffer {
    pub fn zeros(element_type: ElementType, shape: (usize, usize)) -> Self {
        match element_type {
            ElementType::U8 => FrameBuffer::U8(Array2::zeros(shape)),
            ElementType::U16 => FrameBuffer::U16(Array2::zeros(shape)),
            ElementType::U32 => FrameBuffer::U32(Array2::zeros(shape)),
            ElementType::F32 => FrameBuffer::F32(Array2::zeros(shape)),
            ElementType::F64 => FrameBuffer::F64(Array2::zeros(shape)),
        }
    }

    pub fn element_type(&self) -> ElementType {
        self.view().element_type()
    }

    pub fn dim(&self) -> (usize, usize) {
        self.view().dim()
    }

    /// Overwrite the buffer with `values`, converting to the element type.
    ///
    /// Integer conversions saturate at the type's range. The buffer is only
    /// reallocated when the shape changes.
    pub fn fill_from(&mut self, values: &Array2<f64>) {
        if self.dim() != values.dim() {
            *self = FrameBuffer::zeros(self.element_type(), values.dim());
        }
        match self {
            FrameBuffer::U8(a) => a.zip_mut_with(values, |d, &v| *d = v as u8),
            FrameBuffer::U16(a) => a.zip_mut_with(values, |d, &v| *d = v as u16),
            FrameBuffer::U32(a) => a.zip_mut_with(values, |d, &v| *d = v as u32),
            FrameBuffer::F32(a) => a.zip_mut_with(values, |d, &v| *d = v as f32),
            FrameBuffer::F64(a) => a.assign(values),
        }
    }

    pub fn view(&self) -> FrameData<'_> {
        match self {
            FrameBuffer::U8(a) => FrameData::U8(a.view()),
            FrameBuffer::U16(a) => FrameData::U16(a.view()),
            FrameBuffer::U32(a) => FrameData::U32(a.view()),
            FrameBuffer::F32(a) => FrameData::F32(a.view()),
            FrameBuffer::F64(a) => FrameData::F64(a.view()),
        }
    }
}

/// A frame lent by a source, valid until the next `release`.
#[derive(Debug, Clone)]
pub struct LentFrame<'a> {
    pub data: FrameData<'a>,
    pub timestamp: Timestamp,
    /// Source sequence number, monotonically increasing within a session
    pub index: u64,
}

/// An independently owned copy of a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame<T> {
    pub data: Array2<T>,
    pub timestamp: Timestamp,
    pub index: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_timestamp_from_secs() {
        let ts = Timestamp::from_secs_f64(2.5);
        assert_eq!(ts, Timestamp::new(2, 500_000_000));
        assert_eq!(ts.as_secs_f64(), 2.5);
        assert_eq!(Timestamp::from_secs_f64(-1.0), Timestamp::default());
        assert_eq!(Timestamp::from_secs_f64(f64::NAN), Timestamp::default());
    }

    #[test]
    fn test_timestamp_display() {
        assert_eq!(Timestamp::new(42, 123_456_789).to_string(), "42.123456789");
        assert_eq!(Timestamp::new(0, 1).to_string(), "0.000000001");
    }

    #[test]
    fn test_pixel_view_checks_element_type() {
        let buffer = FrameBuffer::zeros(ElementType::U16, (2, 3));
        assert!(u16::view(buffer.view()).is_some());
        assert!(u8::view(buffer.view()).is_none());
        assert!(f64::view(buffer.view()).is_none());
    }

    #[test]
    fn test_fill_from_converts_and_saturates() {
        let mut buffer = FrameBuffer::zeros(ElementType::U8, (1, 1));
        buffer.fill_from(&array![[1.7, 300.0, -4.0]]);

        assert_eq!(buffer.dim(), (1, 3));
        assert_eq!(buffer, FrameBuffer::U8(array![[1, 255, 0]]));
    }

    #[test]
    fn test_element_sizes() {
        assert_eq!(ElementType::U8.size_in_bytes(), 1);
        assert_eq!(ElementType::U16.size_in_bytes(), 2);
        assert_eq!(ElementType::F32.size_in_bytes(), 4);
        assert_eq!(ElementType::F64.size_in_bytes(), 8);
        assert_eq!(ElementType::U16.to_string(), "u16");
    }
}

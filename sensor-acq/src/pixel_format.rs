//! Sensor pixel encodings and the element type used to store them.

use serde::{Deserialize, Serialize};

use crate::frame::ElementType;

/// Colour filter arrangement of a Bayer sensor, named by its top-left 2x2 cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BayerPattern {
    Rggb,
    Grbg,
    Gbrg,
    Bggr,
}

/// Raw pixel encoding delivered by a sensor. The `u8` is bits per sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Monochrome(u8),
    Rgb(u8),
    Bgr(u8),
    Xrgb(u8),
    Xbgr(u8),
    Rgbx(u8),
    Bgrx(u8),
    Bayer(BayerPattern, u8),
    Yuv422,
}

/// Smallest unsigned storage for a given sample depth: (max bits, element type)
const STORAGE_BY_DEPTH: [(u8, ElementType); 3] = [
    (8, ElementType::U8),
    (16, ElementType::U16),
    (32, ElementType::U32),
];

impl PixelFormat {
    /// Bits per sample (per channel)
    pub fn bits(&self) -> u8 {
        match *self {
            PixelFormat::Monochrome(bits)
            | PixelFormat::Rgb(bits)
            | PixelFormat::Bgr(bits)
            | PixelFormat::Xrgb(bits)
            | PixelFormat::Xbgr(bits)
            | PixelFormat::Rgbx(bits)
            | PixelFormat::Bgrx(bits)
            | PixelFormat::Bayer(_, bits) => bits,
            PixelFormat::Yuv422 => 8,
        }
    }

    /// Samples stored per pixel; padding channels count
    pub fn channels(&self) -> usize {
        match self {
            PixelFormat::Monochrome(_) | PixelFormat::Bayer(..) => 1,
            PixelFormat::Yuv422 => 2,
            PixelFormat::Rgb(_) | PixelFormat::Bgr(_) => 3,
            PixelFormat::Xrgb(_)
            | PixelFormat::Xbgr(_)
            | PixelFormat::Rgbx(_)
            | PixelFormat::Bgrx(_) => 4,
        }
    }

    pub fn bits_per_pixel(&self) -> usize {
        self.bits() as usize * self.channels()
    }

    pub fn is_color(&self) -> bool {
        !matches!(self, PixelFormat::Monochrome(_))
    }

    /// Element type able to hold one sample, or `None` for a zero or
    /// over-32-bit depth.
    pub fn storage_type(&self) -> Option<ElementType> {
        let bits = self.bits();
        if bits == 0 {
            return None;
        }
        STORAGE_BY_DEPTH
            .iter()
            .find(|(max_bits, _)| bits <= *max_bits)
            .map(|(_, element_type)| *element_type)
    }
}

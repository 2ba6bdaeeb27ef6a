//! Region of interest read out per frame.
//!
//! An ROI is expressed in macro-pixels: `xsub x ysub` sensor pixels form one
//! readout unit, `width x height` units are read starting at sensor pixel
//! `(xoff, yoff)`. ROIs are immutable values; every "setter" validates the
//! candidate against the sensor and returns a new ROI or the violated bound,
//! never a silently corrected region.

use ndarray::{s, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::error::{AcquisitionError, AcquisitionResult};

/// Sensor dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelShape {
    pub width: usize,
    pub height: usize,
}

impl PixelShape {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    Horizontal,
    Vertical,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Axis::Horizontal => f.write_str("horizontal"),
            Axis::Vertical => f.write_str("vertical"),
        }
    }
}

/// The first bound an ROI candidate violates.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoiViolation {
    #[error("{axis} sub-sampling factor must be at least 1, got {value}")]
    NonPositiveSubsampling { axis: Axis, value: i64 },

    #[error("{axis} offset must be non-negative, got {value}")]
    NegativeOffset { axis: Axis, value: i64 },

    #[error("{axis} size must be at least 1 macro-pixel, got {value}")]
    NonPositiveSize { axis: Axis, value: i64 },

    #[error("{axis} extent {offset} + {size} x {subsampling} exceeds sensor size {limit}")]
    ExceedsSensor {
        axis: Axis,
        offset: i64,
        size: i64,
        subsampling: i64,
        limit: usize,
    },
}

impl RoiViolation {
    pub fn axis(&self) -> Axis {
        match *self {
            RoiViolation::NonPositiveSubsampling { axis, .. }
            | RoiViolation::NegativeOffset { axis, .. }
            | RoiViolation::NonPositiveSize { axis, .. }
            | RoiViolation::ExceedsSensor { axis, .. } => axis,
        }
    }
}

fn check_axis(
    axis: Axis,
    subsampling: i64,
    offset: i64,
    size: i64,
    limit: usize,
) -> Result<(), RoiViolation> {
    if subsampling < 1 {
        return Err(RoiViolation::NonPositiveSubsampling {
            axis,
            value: subsampling,
        });
    }
    if offset < 0 {
        return Err(RoiViolation::NegativeOffset {
            axis,
            value: offset,
        });
    }
    if size < 1 {
        return Err(RoiViolation::NonPositiveSize { axis, value: size });
    }
    let extent = size
        .checked_mul(subsampling)
        .and_then(|e| e.checked_add(offset));
    match extent {
        Some(extent) if extent <= limit as i64 => Ok(()),
        _ => Err(RoiViolation::ExceedsSensor {
            axis,
            offset,
            size,
            subsampling,
            limit,
        }),
    }
}

/// Unchecked ROI fields as read from JSON; only reachable through [`Roi::new`].
#[derive(Deserialize)]
struct RoiFields {
    sensor: PixelShape,
    xsub: i64,
    ysub: i64,
    xoff: i64,
    yoff: i64,
    width: i64,
    height: i64,
}

impl TryFrom<RoiFields> for Roi {
    type Error = RoiViolation;

    fn try_from(f: RoiFields) -> Result<Self, Self::Error> {
        Roi::new(f.sensor, (f.xsub, f.ysub), (f.xoff, f.yoff), (f.width, f.height))
    }
}

/// Validated region of interest on a given sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RoiFields")]
pub struct Roi {
    sensor: PixelShape,
    xsub: i64,
    ysub: i64,
    xoff: i64,
    yoff: i64,
    width: i64,
    height: i64,
}

impl Roi {
    /// Build an ROI, checking every bound.
    ///
    /// Horizontal bounds are checked before vertical ones; within an axis the
    /// order is sub-sampling, offset, size, extent.
    pub fn new(
        sensor: PixelShape,
        (xsub, ysub): (i64, i64),
        (xoff, yoff): (i64, i64),
        (width, height): (i64, i64),
    ) -> Result<Self, RoiViolation> {
        check_axis(Axis::Horizontal, xsub, xoff, width, sensor.width)?;
        check_axis(Axis::Vertical, ysub, yoff, height, sensor.height)?;
        Ok(Self {
            sensor,
            xsub,
            ysub,
            xoff,
            yoff,
            width,
            height,
        })
    }

    /// Whole sensor at full resolution; fails for a zero-sized sensor.
    pub fn full(sensor: PixelShape) -> Result<Self, RoiViolation> {
        let width = i64::try_from(sensor.width).unwrap_or(i64::MAX);
        let height = i64::try_from(sensor.height).unwrap_or(i64::MAX);
        Self::new(sensor, (1, 1), (0, 0), (width, height))
    }

    pub fn with_offset(&self, xoff: i64, yoff: i64) -> Result<Self, RoiViolation> {
        Self::new(
            self.sensor,
            (self.xsub, self.ysub),
            (xoff, yoff),
            (self.width, self.height),
        )
    }

    pub fn with_size(&self, width: i64, height: i64) -> Result<Self, RoiViolation> {
        Self::new(
            self.sensor,
            (self.xsub, self.ysub),
            (self.xoff, self.yoff),
            (width, height),
        )
    }

    pub fn with_subsampling(&self, xsub: i64, ysub: i64) -> Result<Self, RoiViolation> {
        Self::new(
            self.sensor,
            (xsub, ysub),
            (self.xoff, self.yoff),
            (self.width, self.height),
        )
    }

    pub fn sensor(&self) -> PixelShape {
        self.sensor
    }

    pub fn subsampling(&self) -> (i64, i64) {
        (self.xsub, self.ysub)
    }

    pub fn offset(&self) -> (i64, i64) {
        (self.xoff, self.yoff)
    }

    /// Size in macro-pixels as `(width, height)`
    pub fn size(&self) -> (i64, i64) {
        (self.width, self.height)
    }

    /// Shape of a frame read through this ROI, `(rows, cols)`
    pub fn frame_dim(&self) -> (usize, usize) {
        (self.height as usize, self.width as usize)
    }

    /// Sparse-sample a full-sensor frame through this ROI.
    ///
    /// Takes the top-left pixel of each macro-pixel.
    ///
    /// # Returns
    /// * `Err(AcquisitionError::ShapeMismatch)` unless `frame` is
    ///   `(sensor.height, sensor.width)`
    pub fn extract<T: Clone>(&self, frame: &ArrayView2<'_, T>) -> AcquisitionResult<Array2<T>> {
        let expected = (self.sensor.height, self.sensor.width);
        if frame.dim() != expected {
            return Err(AcquisitionError::ShapeMismatch {
                expected,
                found: frame.dim(),
            });
        }
        // Validated on construction: all fields positive, extents within the sensor
        let (x0, y0) = (self.xoff as usize, self.yoff as usize);
        let (xs, ys) = (self.xsub as usize, self.ysub as usize);
        let x1 = x0 + self.width as usize * xs;
        let y1 = y0 + self.height as usize * ys;
        Ok(frame.slice(s![y0..y1;ys, x0..x1;xs]).to_owned())
    }
}

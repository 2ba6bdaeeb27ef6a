//! sensor-acq - Frame acquisition control loop and detector calibration runs
//!
//! Drives any backend implementing [`FrameSource`] through a bounded-buffer
//! acquisition session and turns the frames into calibration data:
//!
//! - **Acquisition** - `read_sequence`, `read_single` and `process_stream`
//!   with skip, timeout and truncation handling and guaranteed teardown
//! - **Sources** - the capability contract, capability checks and a scripted mock
//! - **Geometry** - validated regions of interest and pixel format lookups
//! - **Calibration runs** - per-condition moment accumulation, noise-model and
//!   photon-transfer fits, and JSON persistence of the result
//!
//! # Example
//!
//! ```
//! use ndarray::Array2;
//! use sensor_acq::mock::MockFrameSource;
//! use sensor_acq::{read_sequence, AcquisitionOptions, Frame, SourceSpeed};
//!
//! let mut source = MockFrameSource::repeating(Array2::from_elem((4, 4), 12.0))
//!     .with_speed(SourceSpeed::new(30.0, 0.01));
//! let frames: Vec<Frame<u16>> =
//!     read_sequence(&mut source, 3, &AcquisitionOptions::default()).unwrap();
//! assert_eq!(frames.len(), 3);
//! assert_eq!(frames[2].data[[0, 0]], 12);
//! ```

pub mod acquisition;
pub mod calibration_run;
pub mod error;
pub mod frame;
pub mod mock;
pub mod options;
pub mod pixel_format;
pub mod roi;
pub mod source;
pub mod storage;

pub use acquisition::{process_stream, read_sequence, read_single};
pub use calibration_run::{
    measure_condition, run_calibration, CalibrationPlan, DetectorCalibration, ExposureCondition,
    MeasuredCondition,
};
pub use error::{AcquisitionError, AcquisitionResult, ErrorKind};
pub use frame::{ElementType, Frame, FrameBuffer, FrameData, LentFrame, Pixel, Timestamp};
pub use options::{AcquisitionOptions, DEFAULT_BUFFER_COUNT};
pub use pixel_format::{BayerPattern, PixelFormat};
pub use roi::{Axis, PixelShape, Roi, RoiViolation};
pub use source::{require_capabilities, Capability, CheckedSource, FrameSource, SourceSpeed};
pub use storage::CalibrationStore;

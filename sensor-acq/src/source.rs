//! Frame source capability contract.
//!
//! A [`FrameSource`] is the hardware-facing half of acquisition: a backend
//! starts a continuous session, lends frames one at a time and ends the
//! session either gracefully or immediately. The start/wait/release/abort
//! operations are required by the trait itself; graceful stop and speed
//! queries are optional capabilities that a backend advertises through
//! [`FrameSource::supports`]. Wrap a source in [`CheckedSource`] to verify the
//! capabilities a workflow depends on once, up front, instead of discovering
//! a missing one halfway through a run.

use std::fmt;
use std::time::Duration;

use crate::error::{AcquisitionError, AcquisitionResult};
use crate::frame::{ElementType, LentFrame};

/// Optional operations a frame source may implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// `stop`: end the session after the current frame completes
    GracefulStop,
    /// `speed`: report frame rate and exposure time
    SpeedQuery,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Capability::GracefulStop => f.write_str("graceful stop"),
            Capability::SpeedQuery => f.write_str("speed query"),
        }
    }
}

/// Current frame rate and exposure of a source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceSpeed {
    pub frames_per_second: f64,
    /// Exposure time in seconds
    pub exposure: f64,
}

impl SourceSpeed {
    pub fn new(frames_per_second: f64, exposure: f64) -> Self {
        Self {
            frames_per_second,
            exposure,
        }
    }

    /// Default time to wait for `requested_frames` frames.
    ///
    /// `1 s + 1.01 * (requested_frames / fps + exposure)`
    ///
    /// # Returns
    /// * `Err(AcquisitionError::InvalidArgument)` if the frame rate is not
    ///   positive, the exposure is negative or not finite, or the result does
    ///   not fit in a `Duration`
    pub fn default_timeout(&self, requested_frames: usize) -> AcquisitionResult<Duration> {
        let fps = self.frames_per_second;
        if !(fps.is_finite() && fps > 0.0) {
            return Err(AcquisitionError::InvalidArgument(format!(
                "cannot derive a timeout from frame rate {fps}"
            )));
        }
        if !(self.exposure.is_finite() && self.exposure >= 0.0) {
            return Err(AcquisitionError::InvalidArgument(format!(
                "cannot derive a timeout from exposure {}",
                self.exposure
            )));
        }
        let seconds = 1.0 + 1.01 * (requested_frames as f64 / fps + self.exposure);
        Duration::try_from_secs_f64(seconds).map_err(|_| {
            AcquisitionError::InvalidArgument(format!(
                "derived timeout of {seconds} s is out of range (fps {fps}, exposure {})",
                self.exposure
            ))
        })
    }
}

/// Hardware-backed producer of frames.
///
/// At most one session may be active per device; calling `start` while a
/// session is active is a usage error the backend reports as
/// `InvalidArgument`. Frames are lent between `wait` and `release` and their
/// storage may be overwritten by the next frame.
pub trait FrameSource {
    /// Whether an optional operation is implemented
    fn supports(&self, _capability: Capability) -> bool {
        false
    }

    /// Start a continuous session delivering `element_type` pixels through
    /// `buffer_count` recycled buffers.
    fn start(&mut self, element_type: ElementType, buffer_count: usize) -> AcquisitionResult<()>;

    /// Block until the next frame arrives.
    ///
    /// # Returns
    /// * `Ok(LentFrame)` valid until [`FrameSource::release`]
    /// * `Err(AcquisitionError::Timeout)` if nothing arrived within `timeout`
    fn wait(&mut self, timeout: Duration) -> AcquisitionResult<LentFrame<'_>>;

    /// Return the most recently waited frame's buffer to the pool
    fn release(&mut self) -> AcquisitionResult<()>;

    /// End the session after the current frame completes
    fn stop(&mut self) -> AcquisitionResult<()> {
        Err(AcquisitionError::UnsupportedCapability(
            Capability::GracefulStop,
        ))
    }

    /// End the session immediately
    fn abort(&mut self) -> AcquisitionResult<()>;

    /// Current frame rate and exposure time
    fn speed(&self) -> AcquisitionResult<SourceSpeed> {
        Err(AcquisitionError::UnsupportedCapability(
            Capability::SpeedQuery,
        ))
    }
}

impl<S: FrameSource + ?Sized> FrameSource for &mut S {
    fn supports(&self, capability: Capability) -> bool {
        (**self).supports(capability)
    }

    fn start(&mut self, element_type: ElementType, buffer_count: usize) -> AcquisitionResult<()> {
        (**self).start(element_type, buffer_count)
    }

    fn wait(&mut self, timeout: Duration) -> AcquisitionResult<LentFrame<'_>> {
        (**self).wait(timeout)
    }

    fn release(&mut self) -> AcquisitionResult<()> {
        (**self).release()
    }

    fn stop(&mut self) -> AcquisitionResult<()> {
        (**self).stop()
    }

    fn abort(&mut self) -> AcquisitionResult<()> {
        (**self).abort()
    }

    fn speed(&self) -> AcquisitionResult<SourceSpeed> {
        (**self).speed()
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn supports(&self, capability: Capability) -> bool {
        (**self).supports(capability)
    }

    fn start(&mut self, element_type: ElementType, buffer_count: usize) -> AcquisitionResult<()> {
        (**self).start(element_type, buffer_count)
    }

    fn wait(&mut self, timeout: Duration) -> AcquisitionResult<LentFrame<'_>> {
        (**self).wait(timeout)
    }

    fn release(&mut self) -> AcquisitionResult<()> {
        (**self).release()
    }

    fn stop(&mut self) -> AcquisitionResult<()> {
        (**self).stop()
    }

    fn abort(&mut self) -> AcquisitionResult<()> {
        (**self).abort()
    }

    fn speed(&self) -> AcquisitionResult<SourceSpeed> {
        (**self).speed()
    }
}

/// Check that `source` implements every capability in `required`.
pub fn require_capabilities<S: FrameSource + ?Sized>(
    source: &S,
    required: &[Capability],
) -> AcquisitionResult<()> {
    match required.iter().find(|cap| !source.supports(**cap)) {
        Some(missing) => Err(AcquisitionError::UnsupportedCapability(*missing)),
        None => Ok(()),
    }
}

/// A frame source whose optional capabilities were verified at construction.
#[derive(Debug)]
pub struct CheckedSource<S> {
    inner: S,
    required: Vec<Capability>,
}

impl<S: FrameSource> CheckedSource<S> {
    /// Wrap `source`, failing with `UnsupportedCapability` for the first
    /// capability in `required` it does not implement.
    pub fn new(source: S, required: &[Capability]) -> AcquisitionResult<Self> {
        require_capabilities(&source, required)?;
        Ok(Self {
            inner: source,
            required: required.to_vec(),
        })
    }

    pub fn required(&self) -> &[Capability] {
        &self.required
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: FrameSource> FrameSource for CheckedSource<S> {
    fn supports(&self, capability: Capability) -> bool {
        self.inner.supports(capability)
    }

    fn start(&mut self, element_type: ElementType, buffer_count: usize) -> AcquisitionResult<()> {
        self.inner.start(element_type, buffer_count)
    }

    fn wait(&mut self, timeout: Duration) -> AcquisitionResult<LentFrame<'_>> {
        self.inner.wait(timeout)
    }

    fn release(&mut self) -> AcquisitionResult<()> {
        self.inner.release()
    }

    fn stop(&mut self) -> AcquisitionResult<()> {
        self.inner.stop()
    }

    fn abort(&mut self) -> AcquisitionResult<()> {
        self.inner.abort()
    }

    fn speed(&self) -> AcquisitionResult<SourceSpeed> {
        self.inner.speed()
    }
}

//! Scripted in-memory frame source for tests and dry runs.
//!
//! Frames are scripted as `f64` images and converted to whatever element type
//! the session is started with. Every trait call is recorded, so tests can
//! check the exact start/wait/release/stop/abort protocol a loop followed.

use ndarray::Array2;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

use crate::error::{AcquisitionError, AcquisitionResult};
use crate::frame::{ElementType, FrameBuffer, LentFrame, Timestamp};
use crate::roi::Roi;
use crate::source::{Capability, FrameSource, SourceSpeed};

/// Frame period used for timestamps when no speed is configured
const DEFAULT_FRAME_PERIOD: Duration = Duration::from_millis(100);

/// Outcome of one `wait` call.
#[derive(Debug, Clone, PartialEq)]
pub enum MockEvent {
    Frame(Array2<f64>),
    Timeout,
    /// Fails the wait with `AcquisitionError::Hardware`
    Fail(String),
}

/// A recorded trait call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Start {
        element_type: ElementType,
        buffer_count: usize,
    },
    Wait,
    Release,
    Stop,
    Abort,
}

#[derive(Debug)]
pub struct MockFrameSource {
    script: VecDeque<MockEvent>,
    repeating: Option<Array2<f64>>,
    speed: Option<SourceSpeed>,
    graceful_stop: bool,
    failing_abort: bool,
    roi: Option<Roi>,
    element_type: ElementType,
    buffer: Option<FrameBuffer>,
    active: bool,
    lent: bool,
    next_index: u64,
    elapsed: Duration,
    last_timeout: Option<Duration>,
    calls: Vec<MockCall>,
}

impl MockFrameSource {
    /// Source that plays `script` in order, then times out on every wait.
    pub fn new(script: Vec<MockEvent>) -> Self {
        Self {
            script: script.into(),
            repeating: None,
            speed: None,
            graceful_stop: false,
            failing_abort: false,
            roi: None,
            element_type: ElementType::U16,
            buffer: None,
            active: false,
            lent: false,
            next_index: 0,
            elapsed: Duration::ZERO,
            last_timeout: None,
            calls: Vec::new(),
        }
    }

    /// Source that delivers `frame` forever.
    pub fn repeating(frame: Array2<f64>) -> Self {
        let mut source = Self::new(Vec::new());
        source.repeating = Some(frame);
        source
    }

    /// Advertise `SpeedQuery` and report `speed`
    pub fn with_speed(mut self, speed: SourceSpeed) -> Self {
        self.speed = Some(speed);
        self
    }

    /// Advertise `GracefulStop`
    pub fn with_graceful_stop(mut self) -> Self {
        self.graceful_stop = true;
        self
    }

    /// Make `abort` fail (after ending the session) while a session is active
    pub fn with_failing_abort(mut self) -> Self {
        self.failing_abort = true;
        self
    }

    pub fn with_roi(mut self, roi: Roi) -> Self {
        self.roi = Some(roi);
        self
    }

    /// Replace the remaining script; scripted events play before any repeating frame.
    pub fn set_script(&mut self, script: Vec<MockEvent>) {
        self.script = script.into();
    }

    pub fn set_repeating(&mut self, frame: Option<Array2<f64>>) {
        self.repeating = frame;
    }

    pub fn set_speed(&mut self, speed: Option<SourceSpeed>) {
        self.speed = speed;
    }

    pub fn set_roi(&mut self, roi: Option<Roi>) {
        self.roi = roi;
    }

    pub fn roi(&self) -> Option<Roi> {
        self.roi
    }

    pub fn calls(&self) -> &[MockCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Timeout passed to the most recent `wait`
    pub fn last_timeout(&self) -> Option<Duration> {
        self.last_timeout
    }

    fn frame_period(&self) -> Duration {
        self.speed
            .and_then(|s| Duration::try_from_secs_f64(1.0 / s.frames_per_second).ok())
            .unwrap_or(DEFAULT_FRAME_PERIOD)
    }

    fn next_event(&mut self) -> MockEvent {
        self.script
            .pop_front()
            .or_else(|| self.repeating.clone().map(MockEvent::Frame))
            .unwrap_or(MockEvent::Timeout)
    }
}

impl FrameSource for MockFrameSource {
    fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::GracefulStop => self.graceful_stop,
            Capability::SpeedQuery => self.speed.is_some(),
        }
    }

    fn start(&mut self, element_type: ElementType, buffer_count: usize) -> AcquisitionResult<()> {
        self.calls.push(MockCall::Start {
            element_type,
            buffer_count,
        });
        if self.active {
            return Err(AcquisitionError::InvalidArgument(
                "a session is already active on this source".to_string(),
            ));
        }
        if buffer_count == 0 {
            return Err(AcquisitionError::InvalidArgument(
                "buffer count must be at least 1".to_string(),
            ));
        }
        debug!("Mock session started: {element_type}, {buffer_count} buffers");
        self.active = true;
        self.lent = false;
        self.element_type = element_type;
        self.buffer = None;
        self.next_index = 0;
        Ok(())
    }

    fn wait(&mut self, timeout: Duration) -> AcquisitionResult<LentFrame<'_>> {
        self.calls.push(MockCall::Wait);
        self.last_timeout = Some(timeout);
        if !self.active {
            return Err(AcquisitionError::InvalidArgument(
                "wait called without an active session".to_string(),
            ));
        }
        if self.lent {
            return Err(AcquisitionError::InvalidArgument(
                "previous frame was not released".to_string(),
            ));
        }

        let values = match self.next_event() {
            MockEvent::Frame(values) => values,
            MockEvent::Timeout => return Err(AcquisitionError::Timeout { waited: timeout }),
            MockEvent::Fail(message) => return Err(AcquisitionError::Hardware(message)),
        };
        let values = match &self.roi {
            Some(roi) => roi.extract(&values.view())?,
            None => values,
        };

        self.elapsed += self.frame_period();
        let timestamp = Timestamp::from_duration(self.elapsed);
        let index = self.next_index;
        self.next_index += 1;
        self.lent = true;

        let element_type = self.element_type;
        let buffer = self
            .buffer
            .get_or_insert_with(|| FrameBuffer::zeros(element_type, values.dim()));
        buffer.fill_from(&values);

        Ok(LentFrame {
            data: buffer.view(),
            timestamp,
            index,
        })
    }

    fn release(&mut self) -> AcquisitionResult<()> {
        self.calls.push(MockCall::Release);
        if !self.lent {
            return Err(AcquisitionError::InvalidArgument(
                "release called with no frame lent".to_string(),
            ));
        }
        self.lent = false;
        Ok(())
    }

    fn stop(&mut self) -> AcquisitionResult<()> {
        self.calls.push(MockCall::Stop);
        if !self.graceful_stop {
            return Err(AcquisitionError::UnsupportedCapability(
                Capability::GracefulStop,
            ));
        }
        self.active = false;
        self.lent = false;
        Ok(())
    }

    fn abort(&mut self) -> AcquisitionResult<()> {
        self.calls.push(MockCall::Abort);
        let was_active = self.active;
        self.active = false;
        self.lent = false;
        if was_active && self.failing_abort {
            return Err(AcquisitionError::Hardware("abort failed".to_string()));
        }
        Ok(())
    }

    fn speed(&self) -> AcquisitionResult<SourceSpeed> {
        self.speed
            .ok_or(AcquisitionError::UnsupportedCapability(Capability::SpeedQuery))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::frame::FrameData;
    use crate::roi::PixelShape;

    const TIMEOUT: Duration = Duration::from_millis(10);

    #[test]
    fn test_script_then_timeout() {
        let mut source = MockFrameSource::new(vec![MockEvent::Frame(Array2::from_elem((2, 3), 5.0))]);
        source.start(ElementType::U16, 2).unwrap();

        let lent = source.wait(TIMEOUT).unwrap();
        assert_eq!(lent.index, 0);
        assert_eq!(lent.data.dim(), (2, 3));
        assert!(matches!(lent.data, FrameData::U16(v) if v[[1, 2]] == 5));
        source.release().unwrap();

        let err = source.wait(TIMEOUT).unwrap_err();
        assert!(matches!(err, AcquisitionError::Timeout { waited } if waited == TIMEOUT));
    }

    #[test]
    fn test_single_session() {
        let mut source = MockFrameSource::repeating(Array2::zeros((1, 1)));
        source.start(ElementType::U8, 1).unwrap();
        let err = source.start(ElementType::U8, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        source.abort().unwrap();
        assert!(source.start(ElementType::U8, 1).is_ok());
    }

    #[test]
    fn test_lend_protocol() {
        let mut source = MockFrameSource::repeating(Array2::zeros((1, 1)));
        assert!(source.wait(TIMEOUT).is_err());

        source.start(ElementType::F64, 1).unwrap();
        assert!(source.release().is_err());
        source.wait(TIMEOUT).unwrap();
        assert!(source.wait(TIMEOUT).is_err());
        source.release().unwrap();
        assert!(source.wait(TIMEOUT).is_ok());
    }

    #[test]
    fn test_timestamps_follow_speed() {
        let mut source =
            MockFrameSource::repeating(Array2::zeros((1, 1))).with_speed(SourceSpeed::new(4.0, 0.1));
        source.start(ElementType::U16, 1).unwrap();

        let first = source.wait(TIMEOUT).unwrap().timestamp;
        source.release().unwrap();
        let second = source.wait(TIMEOUT).unwrap().timestamp;

        assert_eq!(first.to_duration(), Duration::from_millis(250));
        assert_eq!(second.to_duration(), Duration::from_millis(500));
    }

    #[test]
    fn test_roi_applied_to_frames() {
        let full = Array2::from_shape_fn((4, 6), |(r, c)| (r * 10 + c) as f64);
        let roi = Roi::new(PixelShape::new(6, 4), (2, 2), (1, 0), (2, 2)).unwrap();
        let mut source = MockFrameSource::repeating(full).with_roi(roi);
        source.start(ElementType::U16, 1).unwrap();

        let lent = source.wait(TIMEOUT).unwrap();
        match lent.data {
            FrameData::U16(v) => {
                assert_eq!(v.dim(), (2, 2));
                assert_eq!(v[[1, 1]], 23);
            }
            other => panic!("unexpected element type {:?}", other.element_type()),
        }
    }

    #[test]
    fn test_roi_shape_mismatch_surfaces_as_error() {
        let roi = Roi::new(PixelShape::new(6, 4), (1, 1), (0, 0), (2, 2)).unwrap();
        let mut source = MockFrameSource::repeating(Array2::zeros((3, 3))).with_roi(roi);
        source.start(ElementType::U16, 1).unwrap();

        let err = source.wait(TIMEOUT).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ShapeMismatch);
        // nothing was lent, so the session can still be aborted cleanly
        assert!(source.release().is_err());
        assert!(source.abort().is_ok());
    }

    #[test]
    fn test_failing_abort_still_ends_session() {
        let mut source = MockFrameSource::new(vec![]).with_failing_abort();
        assert!(source.abort().is_ok());

        source.start(ElementType::U16, 1).unwrap();
        assert!(source.abort().is_err());
        assert!(!source.is_active());
    }
}

//! Acquisition control loop.
//!
//! Drives a [`FrameSource`] through `start`, repeated `wait`/`release` and a
//! final `stop`/`abort`, honouring skip counts, per-wait timeouts and the
//! truncation policy. The session is opened with a small fixed buffer count,
//! so memory use does not depend on how many frames are requested.
//!
//! Teardown is tied to a scoped [`Session`] guard: every path that leaves the
//! loop ends the session exactly once. Normal completion calls `stop` (or
//! `abort` when the source has no graceful stop) and reports its failure;
//! every error path aborts, logs a failing abort and returns the original
//! error.
//!
//! Timeout is the only recoverable condition. With `truncate` the loop
//! returns what it has so far; otherwise the session is aborted and the
//! timeout propagates without any further `wait` or `release`.

use ndarray::ArrayView2;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{AcquisitionError, AcquisitionResult};
use crate::frame::{ElementType, Frame, LentFrame, Pixel, Timestamp};
use crate::options::AcquisitionOptions;
use crate::source::{Capability, FrameSource};

/// An active acquisition session; aborts the source when dropped while active.
struct Session<'s, S: FrameSource + ?Sized> {
    source: &'s mut S,
    element_type: ElementType,
    buffer_count: usize,
    active: bool,
}

impl<'s, S: FrameSource + ?Sized> Session<'s, S> {
    fn open(
        source: &'s mut S,
        element_type: ElementType,
        buffer_count: usize,
    ) -> AcquisitionResult<Self> {
        source.start(element_type, buffer_count)?;
        Ok(Self {
            source,
            element_type,
            buffer_count,
            active: true,
        })
    }

    fn wait(&mut self, timeout: Duration) -> AcquisitionResult<LentFrame<'_>> {
        self.source.wait(timeout)
    }

    fn release(&mut self) -> AcquisitionResult<()> {
        self.source.release()
    }

    /// End the session on a success path, reporting teardown failure.
    fn finish(mut self, graceful: bool) -> AcquisitionResult<()> {
        self.active = false;
        if graceful && self.source.supports(Capability::GracefulStop) {
            self.source.stop()
        } else {
            self.source.abort()
        }
    }
}

impl<S: FrameSource + ?Sized> Drop for Session<'_, S> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Err(e) = self.source.abort() {
            warn!(
                "Failed to abort {} session ({} buffers) after error: {}",
                self.element_type, self.buffer_count, e
            );
        }
    }
}

/// One kept frame as seen by the loop's fold step.
struct FrameRef<'a, T> {
    data: ArrayView2<'a, T>,
    timestamp: Timestamp,
    index: u64,
    ordinal: usize,
}

/// Per-wait timeout: the explicit one, or one derived from the source speed.
fn resolve_timeout<S: FrameSource + ?Sized>(
    source: &S,
    options: &AcquisitionOptions,
) -> AcquisitionResult<Duration> {
    if let Some(timeout) = options.timeout() {
        return Ok(timeout);
    }
    if !source.supports(Capability::SpeedQuery) {
        return Err(AcquisitionError::InvalidArgument(
            "no timeout given and the source cannot report its frame rate".to_string(),
        ));
    }
    source.speed()?.default_timeout(1)
}

fn run<T, S, St, F>(
    source: &mut S,
    count: usize,
    options: &AcquisitionOptions,
    init: St,
    mut fold: F,
) -> AcquisitionResult<(St, usize)>
where
    T: Pixel,
    S: FrameSource + ?Sized,
    F: FnMut(St, FrameRef<'_, T>) -> AcquisitionResult<St>,
{
    if count == 0 {
        return Err(AcquisitionError::InvalidArgument(
            "frame count must be at least 1".to_string(),
        ));
    }
    options.validate()?;
    let timeout = resolve_timeout(source, options)?;

    let mut session = Session::open(source, T::ELEMENT_TYPE, options.buffer_count)?;
    debug!(
        "Started {} session: {} buffers, {} frames (+{} skipped), timeout {:?}",
        T::ELEMENT_TYPE,
        options.buffer_count,
        count,
        options.skip,
        timeout
    );

    let mut state = init;
    let mut skip = options.skip;
    let mut processed = 0;

    while processed < count {
        let lent = match session.wait(timeout) {
            Ok(lent) => lent,
            Err(AcquisitionError::Timeout { waited }) if options.truncate => {
                if !options.quiet {
                    warn!(
                        "Timed out after {:?}: acquisition truncated to {} of {} frames",
                        waited, processed, count
                    );
                }
                break;
            }
            Err(e) => return Err(e),
        };

        if skip > 0 {
            skip -= 1;
            session.release()?;
            continue;
        }

        let LentFrame {
            data,
            timestamp,
            index,
        } = lent;
        let found = data.element_type();
        let data = T::view(data).ok_or(AcquisitionError::ElementTypeMismatch {
            expected: T::ELEMENT_TYPE,
            found,
        })?;

        state = fold(
            state,
            FrameRef {
                data,
                timestamp,
                index,
                ordinal: processed,
            },
        )?;
        processed += 1;
        session.release()?;
    }

    session.finish(processed == count)?;
    Ok((state, processed))
}

/// Read `count` frames into independently owned copies.
///
/// # Arguments
/// * `source` - Frame source with no session active
/// * `count` - Frames to keep, at least 1
/// * `options` - Skip, timeout and truncation settings
///
/// # Returns
/// * `Ok(frames)` in arrival order; fewer than `count` only when a wait timed
///   out with `truncate` set
/// * `Err(AcquisitionError::Timeout)` when a wait timed out without `truncate`
/// * Any other source error, unchanged, after the session was aborted
pub fn read_sequence<T, S>(
    source: &mut S,
    count: usize,
    options: &AcquisitionOptions,
) -> AcquisitionResult<Vec<Frame<T>>>
where
    T: Pixel,
    S: FrameSource + ?Sized,
{
    let (frames, _) = run(source, count, options, Vec::new(), |mut frames, frame| {
        frames.push(Frame {
            data: frame.data.to_owned(),
            timestamp: frame.timestamp,
            index: frame.index,
        });
        Ok(frames)
    })?;
    Ok(frames)
}

/// Read one frame. A timeout is always fatal, whatever `options.truncate` says.
pub fn read_single<T, S>(source: &mut S, options: &AcquisitionOptions) -> AcquisitionResult<Frame<T>>
where
    T: Pixel,
    S: FrameSource + ?Sized,
{
    let options = options.clone().with_truncate(false);
    read_sequence(source, 1, &options)?
        .pop()
        .ok_or_else(|| AcquisitionError::Hardware("session ended without a frame".to_string()))
}

/// Fold `count` frames into a state without keeping them.
///
/// Each frame is handed to `fold` as `(state, pixels, timestamp, ordinal)`
/// while still lent by the source and released as soon as `fold` returns.
/// `ordinal` counts kept frames from 0. An error from `fold` aborts the
/// session and is returned unchanged.
///
/// # Returns
/// `(final_state, frames_folded)`
pub fn process_stream<T, S, St, F>(
    source: &mut S,
    count: usize,
    init: St,
    mut fold: F,
    options: &AcquisitionOptions,
) -> AcquisitionResult<(St, usize)>
where
    T: Pixel,
    S: FrameSource + ?Sized,
    F: FnMut(St, ArrayView2<'_, T>, Timestamp, usize) -> AcquisitionResult<St>,
{
    run(source, count, options, init, |state, frame: FrameRef<'_, T>| {
        fold(state, frame.data, frame.timestamp, frame.ordinal)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::mock::{MockCall, MockEvent, MockFrameSource};
    use crate::source::SourceSpeed;
    use ndarray::Array2;

    fn frame(value: f64) -> MockEvent {
        MockEvent::Frame(Array2::from_elem((4, 5), value))
    }

    fn options() -> AcquisitionOptions {
        AcquisitionOptions::default().with_timeout(Duration::from_millis(100))
    }

    fn waits(calls: &[MockCall]) -> usize {
        calls.iter().filter(|c| matches!(c, MockCall::Wait)).count()
    }

    #[test]
    fn test_reads_frames_in_order() {
        let mut source = MockFrameSource::new((1..=5).map(|v| frame(v as f64)).collect());
        let frames: Vec<Frame<u16>> = read_sequence(&mut source, 5, &options()).unwrap();

        assert_eq!(frames.len(), 5);
        for (i, f) in frames.iter().enumerate() {
            assert_eq!(f.data[[0, 0]], i as u16 + 1);
            assert_eq!(f.index, i as u64);
        }
        assert!(!source.is_active());
    }

    #[test]
    fn test_frames_are_independent_copies() {
        let mut source = MockFrameSource::new(vec![frame(7.0), frame(7.0)]);
        let mut frames: Vec<Frame<f64>> = read_sequence(&mut source, 2, &options()).unwrap();

        frames[0].data[[1, 1]] = -1.0;
        assert_eq!(frames[1].data[[1, 1]], 7.0);
    }

    #[test]
    fn test_skip_consumes_extra_frames() {
        let mut source = MockFrameSource::new((0..6).map(|v| frame(v as f64)).collect());
        let options = options().with_skip(2);
        let frames: Vec<Frame<u8>> = read_sequence(&mut source, 3, &options).unwrap();

        let values: Vec<u8> = frames.iter().map(|f| f.data[[0, 0]]).collect();
        assert_eq!(values, vec![2, 3, 4]);
        assert_eq!(waits(source.calls()), 5);
    }

    #[test]
    fn test_truncate_returns_partial_sequence() {
        let script = vec![frame(1.0), frame(2.0), MockEvent::Timeout, frame(3.0)];
        let mut source = MockFrameSource::new(script);
        let options = options().with_truncate(true).with_quiet(true);
        let frames: Vec<Frame<u16>> = read_sequence(&mut source, 4, &options).unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(source.calls().last(), Some(&MockCall::Abort));
        assert!(!source.is_active());
    }

    #[test]
    fn test_timeout_without_truncate_aborts() {
        let script = vec![frame(1.0), MockEvent::Timeout, frame(3.0)];
        let mut source = MockFrameSource::new(script);
        let err = read_sequence::<u16, _>(&mut source, 3, &options()).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        let calls = source.calls();
        let timed_out_wait = calls.iter().rposition(|c| *c == MockCall::Wait).unwrap();
        assert_eq!(&calls[timed_out_wait + 1..], &[MockCall::Abort]);
        assert!(!source.is_active());
    }

    #[test]
    fn test_other_failures_propagate_unchanged() {
        let script = vec![frame(1.0), MockEvent::Fail("sensor overheated".to_string())];
        let mut source = MockFrameSource::new(script);
        let options = options().with_truncate(true);
        let err = read_sequence::<u16, _>(&mut source, 3, &options).unwrap_err();

        match err {
            AcquisitionError::Hardware(msg) => assert_eq!(msg, "sensor overheated"),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(source.calls().last(), Some(&MockCall::Abort));
    }

    #[test]
    fn test_teardown_failure_does_not_mask_error() {
        let script = vec![MockEvent::Fail("link down".to_string())];
        let mut source = MockFrameSource::new(script).with_failing_abort();
        let err = read_sequence::<u16, _>(&mut source, 1, &options()).unwrap_err();

        assert!(matches!(err, AcquisitionError::Hardware(ref m) if m == "link down"));
        assert_eq!(source.calls().last(), Some(&MockCall::Abort));
    }

    #[test]
    fn test_graceful_stop_used_on_success() {
        let mut source = MockFrameSource::repeating(Array2::zeros((2, 2))).with_graceful_stop();
        read_sequence::<u16, _>(&mut source, 3, &options()).unwrap();

        let calls = source.calls();
        assert_eq!(calls.last(), Some(&MockCall::Stop));
        assert_eq!(
            calls.iter().filter(|c| matches!(c, MockCall::Stop | MockCall::Abort)).count(),
            1
        );
    }

    #[test]
    fn test_bounded_buffer_count() {
        let mut source = MockFrameSource::repeating(Array2::zeros((2, 2)));
        read_sequence::<u8, _>(&mut source, 100, &options()).unwrap();

        assert_eq!(
            source.calls()[0],
            MockCall::Start {
                element_type: ElementType::U8,
                buffer_count: crate::options::DEFAULT_BUFFER_COUNT,
            }
        );
    }

    #[test]
    fn test_default_timeout_from_speed() {
        let mut source = MockFrameSource::repeating(Array2::zeros((2, 2)))
            .with_speed(SourceSpeed::new(20.0, 0.25));
        read_sequence::<u16, _>(&mut source, 2, &AcquisitionOptions::default()).unwrap();

        let expected = SourceSpeed::new(20.0, 0.25).default_timeout(1).unwrap();
        assert_eq!(source.last_timeout(), Some(expected));
    }

    #[test]
    fn test_unrepresentable_default_timeout_fails_fast() {
        let mut source = MockFrameSource::repeating(Array2::zeros((2, 2)))
            .with_speed(SourceSpeed::new(1e-300, 0.0));
        let err = read_sequence::<u16, _>(&mut source, 2, &AcquisitionOptions::default())
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(source.calls().is_empty());
    }

    #[test]
    fn test_unrepresentable_explicit_timeout_rejected() {
        let mut source = MockFrameSource::repeating(Array2::zeros((2, 2)))
            .with_speed(SourceSpeed::new(30.0, 0.01));
        let options = AcquisitionOptions {
            timeout_secs: Some(1e30),
            ..Default::default()
        };
        let err = read_sequence::<u16, _>(&mut source, 2, &options).unwrap_err();

        // must not fall back to the speed-derived default
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(source.calls().is_empty());
        assert_eq!(source.last_timeout(), None);
    }

    #[test]
    fn test_missing_timeout_fails_fast() {
        let mut source = MockFrameSource::repeating(Array2::zeros((2, 2)));
        let err = read_sequence::<u16, _>(&mut source, 2, &AcquisitionOptions::default())
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(source.calls().is_empty());
    }

    #[test]
    fn test_invalid_arguments_touch_nothing() {
        let mut source = MockFrameSource::repeating(Array2::zeros((2, 2)));
        assert!(read_sequence::<u16, _>(&mut source, 0, &options()).is_err());

        let bad = AcquisitionOptions {
            timeout_secs: Some(-1.0),
            ..Default::default()
        };
        assert!(read_sequence::<u16, _>(&mut source, 1, &bad).is_err());
        assert!(source.calls().is_empty());
    }

    #[test]
    fn test_read_single_ignores_truncate() {
        let mut source = MockFrameSource::new(vec![MockEvent::Timeout]);
        let options = options().with_truncate(true);
        let err = read_single::<u16, _>(&mut source, &options).unwrap_err();
        assert!(err.is_timeout());

        let mut source = MockFrameSource::new(vec![frame(9.0)]);
        let single: Frame<f32> = read_single(&mut source, &options).unwrap();
        assert_eq!(single.data[[3, 4]], 9.0);
    }

    #[test]
    fn test_process_stream_folds_without_keeping() {
        let mut source = MockFrameSource::new((1..=4).map(|v| frame(v as f64)).collect());
        let (state, n) = process_stream(
            &mut source,
            4,
            (0.0, Vec::new()),
            |(total, mut ordinals), pixels: ArrayView2<'_, u16>, _ts, ordinal| {
                ordinals.push(ordinal);
                Ok((total + pixels.sum() as f64, ordinals))
            },
            &options(),
        )
        .unwrap();

        assert_eq!(n, 4);
        assert_eq!(state.0, 20.0 * 10.0);
        assert_eq!(state.1, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_process_stream_fold_error_aborts() {
        let mut source = MockFrameSource::repeating(Array2::zeros((2, 2)));
        let err = process_stream(
            &mut source,
            10,
            0usize,
            |n, _pixels: ArrayView2<'_, u16>, _ts, _ordinal| {
                if n == 2 {
                    Err(AcquisitionError::InvalidArgument("enough".to_string()))
                } else {
                    Ok(n + 1)
                }
            },
            &options(),
        )
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(source.calls().last(), Some(&MockCall::Abort));
        assert_eq!(waits(source.calls()), 3);
    }
}

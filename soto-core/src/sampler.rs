//! Sampling stage (§4.D): a slotted circular audio buffer fed by an
//! [`AudioSource`], with a mutex-protected coherent snapshot for readers.

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

/// A single stereo PCM sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SampleFrame {
    pub ch0: i16,
    pub ch1: i16,
}

/// Outcome of one [`AudioSource::read`] call.
#[derive(Debug)]
pub enum ReadOutcome {
    /// `n` frames were written into the destination slice.
    Ok(usize),
    /// The device buffer overran (xrun); caller should call `recover`.
    Overrun,
    /// The device has nothing available right now; caller may `wait` and
    /// retry.
    Again,
    /// Unrecoverable device error.
    Fatal(String),
}

/// Outcome of [`AudioSource::wait`].
#[derive(Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready,
    StillUnavailable,
}

/// Outcome of [`AudioSource::recover`].
#[derive(Debug, PartialEq, Eq)]
pub enum RecoverOutcome {
    Ok,
    Failed,
}

/// Boundary contract for whatever actually owns the PCM device (§6). ALSA is
/// the concrete collaborator that implements this in `soto-cli`; `soto-core`
/// only knows this trait.
pub trait AudioSource: Send {
    /// Read up to `dst.len()` frames. Returns the outcome; on success, the
    /// first `n` entries of `dst` are the frames actually read.
    fn read(&mut self, dst: &mut [SampleFrame]) -> ReadOutcome;

    /// Wait up to `timeout` for the device to become ready again.
    fn wait(&mut self, timeout: Duration) -> WaitOutcome;

    /// Attempt to recover from an overrun.
    fn recover(&mut self) -> RecoverOutcome;

    /// The job period this device naturally wants to be read at. A source
    /// may derive this either by reading the negotiated hardware period
    /// directly, or by synthesizing it from `rate` and the number of frames
    /// per read — the spec treats both as valid (§9 open question); which
    /// one a given `AudioSource` does is that source's own policy.
    fn preferred_period(&self) -> Duration;

    /// Frames read per job.
    fn preferred_slot_frames(&self) -> usize;
}

/// Errors surfaced by the sampling stage (§7).
#[derive(Debug)]
pub enum SamplerError {
    /// Underlying device fault, carrying a descriptive message.
    Library(String),
    /// The source negotiated a different sample rate than the caller
    /// requested, and policy forbids silently adjusting to it.
    RateChanged { requested: u32, actual: u32 },
    /// The source's preferred period differs from what the caller requested.
    PeriodChanged { requested: Duration, actual: Duration },
}

impl fmt::Display for SamplerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplerError::Library(msg) => write!(f, "sampler device error: {msg}"),
            SamplerError::RateChanged { requested, actual } => {
                write!(f, "device rate changed: requested {requested}, got {actual}")
            }
            SamplerError::PeriodChanged { requested, actual } => write!(
                f,
                "device period changed: requested {requested:?}, got {actual:?}"
            ),
        }
    }
}

impl std::error::Error for SamplerError {}

/// Divides a job's period to bound the retry wait on a transient "again"
/// condition (§4.D), taken from the original ALSA gateway's wait proportion.
pub const RECOVERY_DIVISOR: u32 = 2;

struct SamplerState {
    write_cursor: usize,
    buffer: Vec<SampleFrame>,
}

/// Slotted circular buffer of audio frames, single-writer (the sampling
/// job), many-readers (anyone calling [`Sampler::snapshot`]).
pub struct Sampler<S: AudioSource> {
    slot_frames: usize,
    slot_count: usize,
    period: Duration,
    state: Mutex<SamplerState>,
    source: Mutex<S>,
}

impl<S: AudioSource> Sampler<S> {
    /// Create a sampler around `source` with `slot_count` slots. If
    /// `requested_period` is given and disagrees with the source's
    /// preferred period, returns [`SamplerError::PeriodChanged`] rather than
    /// silently adopting the source's value.
    pub fn new(
        source: S,
        slot_count: usize,
        requested_period: Option<Duration>,
    ) -> Result<Self, SamplerError> {
        assert!(slot_count > 0, "slot_count must be positive");
        let period = source.preferred_period();
        if let Some(requested) = requested_period {
            if requested != period {
                return Err(SamplerError::PeriodChanged {
                    requested,
                    actual: period,
                });
            }
        }
        let slot_frames = source.preferred_slot_frames();
        let buffer = vec![SampleFrame::default(); slot_count * slot_frames];

        Ok(Sampler {
            slot_frames,
            slot_count,
            period,
            state: Mutex::new(SamplerState {
                write_cursor: 0,
                buffer,
            }),
            source: Mutex::new(source),
        })
    }

    /// Total frames held across every slot.
    pub fn size(&self) -> usize {
        self.slot_count * self.slot_frames
    }

    /// Duration to fill the whole buffer: job period times slot count.
    pub fn period(&self) -> Duration {
        self.period * self.slot_count as u32
    }

    /// The per-job period: how often [`Sampler::run_once`] should be driven.
    /// This is what a caller schedules the sampling task at, as distinct
    /// from [`Sampler::period`], which is the time to fill the whole buffer.
    pub fn job_period(&self) -> Duration {
        self.period
    }

    /// Run a single sampling job: read one slot's worth of frames from the
    /// device, apply the recovery policy on transient errors, and advance
    /// the write cursor on any actual write. This is the function a caller
    /// plugs into a cancellable task's work body.
    pub fn run_once(&self) {
        let mut temp = vec![SampleFrame::default(); self.slot_frames];

        let outcome = {
            let mut source = self.source.lock().unwrap();
            let outcome = source.read(&mut temp);
            match outcome {
                ReadOutcome::Overrun => {
                    if source.recover() == RecoverOutcome::Failed {
                        log::error!("sampler: overrun recovery failed");
                    }
                    return;
                }
                ReadOutcome::Again => {
                    let retry_wait = self.period / RECOVERY_DIVISOR;
                    source.wait(retry_wait);
                    source.read(&mut temp)
                }
                other => other,
            }
        };

        let written = match outcome {
            ReadOutcome::Ok(n) => n,
            ReadOutcome::Overrun => {
                log::warn!("sampler: overrun on retry, leaving slot untouched");
                return;
            }
            ReadOutcome::Again => {
                log::warn!("sampler: device still unavailable after retry, leaving slot untouched");
                return;
            }
            ReadOutcome::Fatal(msg) => {
                log::error!("sampler: fatal device error, leaving slot untouched: {msg}");
                return;
            }
        };

        // Zero the unwritten remainder of the slot on a short read rather
        // than leaving stale data from a prior cycle (§4.D edge case).
        if written < self.slot_frames {
            temp[written..].iter_mut().for_each(|f| *f = SampleFrame::default());
        }

        let mut state = self.state.lock().unwrap();
        let cursor = state.write_cursor;
        let start = cursor * self.slot_frames;
        state.buffer[start..start + self.slot_frames].copy_from_slice(&temp);
        state.write_cursor = (cursor + 1) % self.slot_count;
    }

    /// Copy the whole buffer into `dst`, ordered oldest-first, as two
    /// contiguous memcopies under the same mutex that serializes writes.
    /// `dst.len()` must equal [`Sampler::size`].
    pub fn snapshot(&self, dst: &mut [SampleFrame]) {
        assert_eq!(dst.len(), self.size());
        let state = self.state.lock().unwrap();
        let cursor = state.write_cursor;
        let split = cursor * self.slot_frames;
        let tail_len = state.buffer.len() - split;
        dst[..tail_len].copy_from_slice(&state.buffer[split..]);
        dst[tail_len..].copy_from_slice(&state.buffer[..split]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedSource {
        period: Duration,
        slot_frames: usize,
        reads: std::vec::IntoIter<ReadOutcome>,
    }

    impl AudioSource for ScriptedSource {
        fn read(&mut self, dst: &mut [SampleFrame]) -> ReadOutcome {
            match self.reads.next() {
                Some(ReadOutcome::Ok(n)) => {
                    for (i, frame) in dst.iter_mut().enumerate().take(n) {
                        *frame = SampleFrame {
                            ch0: i as i16,
                            ch1: -(i as i16),
                        };
                    }
                    ReadOutcome::Ok(n)
                }
                Some(other) => other,
                None => ReadOutcome::Ok(0),
            }
        }

        fn wait(&mut self, _timeout: Duration) -> WaitOutcome {
            WaitOutcome::Ready
        }

        fn recover(&mut self) -> RecoverOutcome {
            RecoverOutcome::Ok
        }

        fn preferred_period(&self) -> Duration {
            self.period
        }

        fn preferred_slot_frames(&self) -> usize {
            self.slot_frames
        }
    }

    fn scripted(reads: Vec<ReadOutcome>) -> ScriptedSource {
        ScriptedSource {
            period: Duration::from_millis(10),
            slot_frames: 4,
            reads: reads.into_iter(),
        }
    }

    #[test]
    fn three_slot_wraparound_matches_literal_scenario() {
        let source = scripted(vec![
            ReadOutcome::Ok(4),
            ReadOutcome::Ok(4),
            ReadOutcome::Ok(4),
            ReadOutcome::Ok(4),
        ]);
        let sampler = Sampler::new(source, 3, None).unwrap();

        sampler.run_once();
        sampler.run_once();
        sampler.run_once();

        let mut dst = vec![SampleFrame::default(); sampler.size()];
        sampler.snapshot(&mut dst);
        assert_eq!(dst.len(), 12);
        assert_eq!(sampler.state.lock().unwrap().write_cursor, 0);

        sampler.run_once();
        sampler.snapshot(&mut dst);
        assert_eq!(sampler.state.lock().unwrap().write_cursor, 1);
    }

    #[test]
    fn single_slot_degenerates_to_single_buffered_reading() {
        let source = scripted(vec![ReadOutcome::Ok(4)]);
        let sampler = Sampler::new(source, 1, None).unwrap();
        sampler.run_once();
        let mut dst = vec![SampleFrame::default(); sampler.size()];
        sampler.snapshot(&mut dst);
        assert_eq!(dst.len(), 4);
    }

    #[test]
    fn short_read_zeroes_remainder_instead_of_leaking_stale_data() {
        let source = scripted(vec![ReadOutcome::Ok(4), ReadOutcome::Ok(2)]);
        let sampler = Sampler::new(source, 1, None).unwrap();
        sampler.run_once();
        sampler.run_once();
        let mut dst = vec![SampleFrame::default(); sampler.size()];
        sampler.snapshot(&mut dst);
        assert_eq!(dst[2], SampleFrame::default());
        assert_eq!(dst[3], SampleFrame::default());
    }

    #[test]
    fn overrun_leaves_slot_untouched_and_does_not_advance_cursor() {
        let source = scripted(vec![ReadOutcome::Ok(4), ReadOutcome::Overrun]);
        let sampler = Sampler::new(source, 2, None).unwrap();
        sampler.run_once();
        sampler.run_once();
        assert_eq!(sampler.state.lock().unwrap().write_cursor, 1);
    }

    #[test]
    fn snapshot_does_not_mutate_buffer() {
        let source = scripted(vec![ReadOutcome::Ok(4)]);
        let sampler = Sampler::new(source, 2, None).unwrap();
        sampler.run_once();
        let mut first = vec![SampleFrame::default(); sampler.size()];
        let mut second = vec![SampleFrame::default(); sampler.size()];
        sampler.snapshot(&mut first);
        sampler.snapshot(&mut second);
        assert_eq!(first, second);
    }

    #[test]
    fn period_changed_is_rejected_when_requested_disagrees() {
        let source = scripted(vec![]);
        let err = Sampler::new(source, 2, Some(Duration::from_millis(999))).unwrap_err();
        assert!(matches!(err, SamplerError::PeriodChanged { .. }));
    }
}

//! ALSA implementation of [`soto_core::sampler::AudioSource`] (§6).
//!
//! Mirrors the original ALSA gateway's open/read/recover sequence: negotiate
//! hardware parameters once at open time, then on every job either read a
//! period's worth of frames or classify the failure as an overrun (EPIPE,
//! recoverable via `snd_pcm_recover`), a transient unavailability (EAGAIN),
//! or fatal.

use std::time::Duration;

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};

use soto_core::sampler::{AudioSource, ReadOutcome, RecoverOutcome, SampleFrame, SamplerError, WaitOutcome};

pub struct AlsaSource {
    pcm: PCM,
    period_frames: usize,
    period: Duration,
}

impl AlsaSource {
    /// Open `device` for stereo S16 capture at `rate` Hz. Fails with
    /// [`SamplerError::RateChanged`] if the hardware negotiates a different
    /// rate than requested, rather than silently adopting it.
    pub fn open(device: &str, rate: u32) -> Result<Self, SamplerError> {
        let pcm = PCM::new(device, Direction::Capture, false)
            .map_err(|e| SamplerError::Library(e.to_string()))?;

        {
            let hwp = HwParams::any(&pcm).map_err(|e| SamplerError::Library(e.to_string()))?;
            hwp.set_channels(2).map_err(|e| SamplerError::Library(e.to_string()))?;
            hwp.set_rate(rate, ValueOr::Nearest)
                .map_err(|e| SamplerError::Library(e.to_string()))?;
            hwp.set_format(Format::s16())
                .map_err(|e| SamplerError::Library(e.to_string()))?;
            hwp.set_access(Access::RWInterleaved)
                .map_err(|e| SamplerError::Library(e.to_string()))?;
            pcm.hw_params(&hwp).map_err(|e| SamplerError::Library(e.to_string()))?;
        }

        let negotiated = pcm.hw_params_current().map_err(|e| SamplerError::Library(e.to_string()))?;
        let actual_rate = negotiated.get_rate().map_err(|e| SamplerError::Library(e.to_string()))?;
        if actual_rate != rate {
            return Err(SamplerError::RateChanged {
                requested: rate,
                actual: actual_rate,
            });
        }

        let period_frames = negotiated
            .get_period_size()
            .map_err(|e| SamplerError::Library(e.to_string()))? as usize;
        let period = Duration::from_secs_f64(period_frames as f64 / actual_rate as f64);

        pcm.prepare().map_err(|e| SamplerError::Library(e.to_string()))?;

        Ok(AlsaSource {
            pcm,
            period_frames,
            period,
        })
    }
}

impl AudioSource for AlsaSource {
    fn read(&mut self, dst: &mut [SampleFrame]) -> ReadOutcome {
        let io = match self.pcm.io_i16() {
            Ok(io) => io,
            Err(err) => return ReadOutcome::Fatal(err.to_string()),
        };

        let mut raw = vec![0i16; dst.len() * 2];
        match io.readi(&mut raw) {
            Ok(n) => {
                for (frame, pair) in dst.iter_mut().zip(raw.chunks_exact(2)).take(n) {
                    *frame = SampleFrame {
                        ch0: pair[0],
                        ch1: pair[1],
                    };
                }
                ReadOutcome::Ok(n)
            }
            Err(err) => match err.errno() as i32 {
                libc::EPIPE => ReadOutcome::Overrun,
                libc::EAGAIN => ReadOutcome::Again,
                _ => ReadOutcome::Fatal(err.to_string()),
            },
        }
    }

    fn wait(&mut self, timeout: Duration) -> WaitOutcome {
        match self.pcm.wait(Some(timeout.as_millis() as u32)) {
            Ok(true) => WaitOutcome::Ready,
            _ => WaitOutcome::StillUnavailable,
        }
    }

    fn recover(&mut self) -> RecoverOutcome {
        match self.pcm.recover(libc::EPIPE, true) {
            Ok(_) => RecoverOutcome::Ok,
            Err(_) => RecoverOutcome::Failed,
        }
    }

    fn preferred_period(&self) -> Duration {
        self.period
    }

    fn preferred_slot_frames(&self) -> usize {
        self.period_frames
    }
}

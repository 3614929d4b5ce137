//! Sample rate conversion for the capture path.
//!
//! Capture always runs at the native hardware rate; clients asking for a
//! different rate get their frames through a converter that pulls native
//! frames from a [`FrameProvider`]. The built-in converter uses linear
//! interpolation, which is fast and adequate for speech capture.

use crate::error::BackendError;
use crate::hw::{FrameProvider, Resampler, ResamplerFactory, ResamplerQuality};

/// Linear-interpolation sample rate converter.
///
/// Keeps a small window of input frames so interpolation can straddle
/// provider buffer boundaries without losing samples.
pub struct LinearResampler {
    in_rate: u32,
    out_rate: u32,
    channels: usize,
    /// Fractional read position into the window, in input frames.
    pos: f64,
    /// Buffered interleaved input frames not yet fully consumed.
    window: Vec<i16>,
}

impl LinearResampler {
    fn new(in_rate: u32, out_rate: u32, channels: usize) -> Self {
        Self {
            in_rate,
            out_rate,
            channels,
            pos: 0.0,
            window: Vec::new(),
        }
    }

    fn window_frames(&self) -> usize {
        self.window.len() / self.channels
    }

    /// Pulls at least one frame from the provider into the window.
    fn pull(
        &mut self,
        provider: &mut dyn FrameProvider,
        want_frames: usize,
    ) -> Result<(), BackendError> {
        let frames = {
            let chunk = provider.get_next_buffer(want_frames)?;
            let frames = chunk.len() / self.channels;
            self.window.extend_from_slice(&chunk[..frames * self.channels]);
            frames
        };
        provider.release_buffer(frames);
        if frames == 0 {
            return Err(BackendError::failed("frame provider returned no frames"));
        }
        Ok(())
    }
}

impl Resampler for LinearResampler {
    fn reset(&mut self) {
        self.pos = 0.0;
        self.window.clear();
    }

    fn resample_from_provider(
        &mut self,
        provider: &mut dyn FrameProvider,
        output: &mut [i16],
        frames: &mut usize,
    ) -> Result<(), BackendError> {
        let requested = (*frames).min(output.len() / self.channels);
        let step = f64::from(self.in_rate) / f64::from(self.out_rate);
        let mut produced = 0;

        while produced < requested {
            let base = self.pos.floor() as usize;
            // Interpolation needs frames `base` and `base + 1`.
            while self.window_frames() < base + 2 {
                let want = base + 2 - self.window_frames();
                if let Err(error) = self.pull(provider, want) {
                    *frames = produced;
                    return Err(error);
                }
            }

            let frac = self.pos - base as f64;
            for ch in 0..self.channels {
                let s1 = f64::from(self.window[base * self.channels + ch]);
                let s2 = f64::from(self.window[(base + 1) * self.channels + ch]);
                output[produced * self.channels + ch] = (s1 + (s2 - s1) * frac) as i16;
            }
            produced += 1;
            self.pos += step;

            // Drop frames the read position has moved past.
            let consumed = (self.pos.floor() as usize).min(self.window_frames());
            if consumed > 0 {
                self.window.drain(..consumed * self.channels);
                self.pos -= consumed as f64;
            }
        }

        *frames = produced;
        Ok(())
    }
}

/// Factory producing [`LinearResampler`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearResamplerFactory;

impl ResamplerFactory for LinearResamplerFactory {
    fn create(
        &self,
        in_rate: u32,
        out_rate: u32,
        channels: u32,
        _quality: ResamplerQuality,
    ) -> Result<Box<dyn Resampler>, BackendError> {
        if in_rate == 0 || out_rate == 0 || channels == 0 {
            return Err(BackendError::failed("invalid resampler configuration"));
        }
        Ok(Box::new(LinearResampler::new(
            in_rate,
            out_rate,
            channels as usize,
        )))
    }
}

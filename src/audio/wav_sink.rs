//! Audio sink that renders the playback timeline into a mono 16-bit WAV file.
//!
//! Buffers are written at the sample offset matching their scheduled start,
//! so gaps and overlaps in the schedule are audible in the file. Completion is
//! signalled in real time, when the buffer would have finished playing.

use crate::audio::decoder::{encode_pcm16, AudioBuffer, DEFAULT_SAMPLE_RATE};
use crate::audio::playback::{AudioClock, AudioSink};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct WavSink {
    timeline: Vec<i16>,
    sample_rate: u32,
    clock: Arc<dyn AudioClock>,
    timers: Vec<JoinHandle<()>>,
}

impl WavSink {
    pub fn new(clock: Arc<dyn AudioClock>) -> Self {
        Self::with_sample_rate(clock, DEFAULT_SAMPLE_RATE)
    }

    pub fn with_sample_rate(clock: Arc<dyn AudioClock>, sample_rate: u32) -> Self {
        Self {
            timeline: Vec::new(),
            sample_rate,
            clock,
            timers: Vec::new(),
        }
    }

    fn offset(&self, at: Duration) -> usize {
        (at.as_secs_f64() * self.sample_rate as f64).round() as usize
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.timeline.len() as f64 / self.sample_rate as f64)
    }

    pub fn samples(&self) -> &[i16] {
        &self.timeline
    }

    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        let header = wav::Header::new(wav::WAV_FORMAT_PCM, 1, self.sample_rate, 16);
        let mut file = File::create(path)?;
        wav::write(header, &wav::BitDepth::Sixteen(self.timeline.clone()), &mut file)?;
        debug!(path = %path.display(), samples = self.timeline.len(), "Wrote WAV file");
        Ok(())
    }
}

/// Nearest-sample conversion between rates.
fn resample(samples: &[f32], from: u32, to: u32) -> Vec<f32> {
    if from == to || samples.is_empty() {
        return samples.to_vec();
    }
    let len = (samples.len() as u64 * to as u64 / from as u64) as usize;
    (0..len)
        .map(|i| samples[(i as u64 * from as u64 / to as u64) as usize])
        .collect()
}

impl AudioSink for WavSink {
    fn play(&mut self, buffer: &AudioBuffer, start: Duration) -> oneshot::Receiver<()> {
        if buffer.sample_rate != self.sample_rate {
            warn!(
                from = buffer.sample_rate,
                to = self.sample_rate,
                "Resampling audio buffer for WAV output"
            );
        }
        let pcm = encode_pcm16(&resample(&buffer.samples, buffer.sample_rate, self.sample_rate));

        let offset = self.offset(start);
        let end = offset + pcm.len();
        if self.timeline.len() < end {
            self.timeline.resize(end, 0);
        }
        self.timeline[offset..end].copy_from_slice(&pcm);

        self.timers.retain(|timer| !timer.is_finished());
        let (tx, rx) = oneshot::channel();
        let remaining = (start + buffer.duration()).saturating_sub(self.clock.now());
        self.timers.push(tokio::spawn(async move {
            tokio::time::sleep(remaining).await;
            let _ = tx.send(());
        }));
        rx
    }

    fn stop_all(&mut self) {
        for timer in self.timers.drain(..) {
            timer.abort();
        }
        // Whatever was scheduled past the current position never plays.
        let now = self.offset(self.clock.now());
        if self.timeline.len() > now {
            self.timeline.truncate(now);
        }
    }
}

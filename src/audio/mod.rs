//! # Audio Pipeline
//!
//! Consumer-side handling of `audioChunk` events.
//!
//! ## Key Components:
//! - **decoder**: base64 PCM16 to normalised float buffers
//! - **playback**: gapless scheduling on an audio clock, with a dual-trigger advance and reset
//! - **wav_sink**: an output that renders the schedule into a WAV file
//!
//! ## Audio Format:
//! - **Sample Rate**: 24kHz unless the mime type says otherwise (`audio/pcm;rate=16000`)
//! - **Bit Depth**: 16-bit PCM, little-endian, signed
//! - **Channels**: Mono

pub mod decoder;
pub mod playback;
pub mod wav_sink;

use decoder::decode_chunk;
use playback::{AudioClock, AudioPlayer, AudioSink};
use std::sync::Arc;
use tracing::warn;

/// Decodes streamed chunks and feeds them to a player.
pub struct AudioPipeline<S> {
    player: AudioPlayer<S>,
    decoded: u64,
    dropped: u64,
}

impl<S: AudioSink + 'static> AudioPipeline<S> {
    pub fn new(sink: S, clock: Arc<dyn AudioClock>) -> Self {
        Self {
            player: AudioPlayer::spawn(sink, clock),
            decoded: 0,
            dropped: 0,
        }
    }

    /// Decode and queue one chunk. Malformed chunks are logged and skipped.
    pub fn push_chunk(&mut self, data: &str, mime_type: &str) {
        match decode_chunk(data, mime_type) {
            Ok(buffer) => {
                self.decoded += 1;
                self.player.enqueue(buffer);
            }
            Err(err) => {
                self.dropped += 1;
                warn!(error = %err, mime_type, "Dropping audio chunk");
            }
        }
    }

    /// Stop playback and discard anything queued.
    pub fn reset(&self) {
        self.player.reset();
    }

    pub fn decoded(&self) -> u64 {
        self.decoded
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Wait for queued audio to finish and return the sink.
    pub async fn finish(self) -> Result<S, tokio::task::JoinError> {
        self.player.finish().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use playback::SystemClock;
    use wav_sink::WavSink;

    #[tokio::test(start_paused = true)]
    async fn test_pipeline_skips_bad_chunks() {
        let clock: Arc<dyn AudioClock> = Arc::new(SystemClock::new());
        let mut pipeline = AudioPipeline::new(WavSink::new(clock.clone()), clock);

        let chunk = STANDARD.encode(vec![0u8; 480]);
        pipeline.push_chunk(&chunk, "audio/pcm;rate=24000");
        pipeline.push_chunk("%%%", "audio/pcm;rate=24000");
        pipeline.push_chunk("", "audio/pcm");
        pipeline.push_chunk(&chunk, "audio/pcm;rate=24000");

        assert_eq!(pipeline.decoded(), 2);
        assert_eq!(pipeline.dropped(), 2);

        let sink = pipeline.finish().await.unwrap();
        assert_eq!(sink.samples().len(), 480);
    }
}

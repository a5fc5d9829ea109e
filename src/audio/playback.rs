//! # Gapless Playback Scheduling
//!
//! Buffers are played back to back on a single audio clock.
//!
//! ## Scheduling:
//! A single `next_start` anchor starts at the clock's current time. Each
//! dequeued buffer starts at `max(now, next_start)` and moves the anchor to
//! its own end.
//!
//! ## Advancing:
//! The sink's "finished" signal is not trusted on its own. Two triggers race
//! per buffer: the sink's completion and a fallback timer of
//! `lead + duration + 10 ms`. The first one advances the queue; the other is
//! dropped with the in-flight entry.
//!
//! ## Reset:
//! Clears the queue, cancels the fallback timer, stops everything the sink has
//! scheduled and re-anchors `next_start` to `now + 100 ms`.

use crate::audio::decoder::AudioBuffer;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Sleep};
use tracing::{debug, trace};

pub const FALLBACK_MARGIN: Duration = Duration::from_millis(10);
pub const RESET_LEAD: Duration = Duration::from_millis(100);

/// Monotonic audio clock, measured from an arbitrary origin.
pub trait AudioClock: Send + Sync {
    fn now(&self) -> Duration;
}

/// Clock backed by the runtime's timer, so paused test time drives it too.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioClock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Audio output. `play` schedules a buffer at `start` on the audio clock and
/// returns a receiver that resolves once it has finished.
pub trait AudioSink: Send {
    fn play(&mut self, buffer: &AudioBuffer, start: Duration) -> oneshot::Receiver<()>;
    /// Stop everything scheduled so far.
    fn stop_all(&mut self);
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledBuffer {
    pub buffer: AudioBuffer,
    pub start: Duration,
}

/// The pure scheduling state, independent of any output.
#[derive(Debug)]
pub struct PlaybackSchedule {
    queue: VecDeque<AudioBuffer>,
    next_start: Duration,
}

impl PlaybackSchedule {
    pub fn new(now: Duration) -> Self {
        Self {
            queue: VecDeque::new(),
            next_start: now,
        }
    }

    pub fn enqueue(&mut self, buffer: AudioBuffer) {
        self.queue.push_back(buffer);
    }

    pub fn dequeue(&mut self, now: Duration) -> Option<ScheduledBuffer> {
        let buffer = self.queue.pop_front()?;
        let start = now.max(self.next_start);
        self.next_start = start + buffer.duration();
        Some(ScheduledBuffer { buffer, start })
    }

    pub fn reset(&mut self, now: Duration) {
        self.queue.clear();
        self.next_start = now + RESET_LEAD;
    }

    pub fn next_start(&self) -> Duration {
        self.next_start
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Completed,
    Fallback,
}

struct InFlight {
    done: oneshot::Receiver<()>,
    fallback: Pin<Box<Sleep>>,
}

impl InFlight {
    async fn advance(&mut self) -> Trigger {
        let completed = tokio::select! {
            result = &mut self.done => result.is_ok(),
            _ = self.fallback.as_mut() => return Trigger::Fallback,
        };
        if completed {
            Trigger::Completed
        } else {
            // Sink dropped its signal; only the timer is left.
            self.fallback.as_mut().await;
            Trigger::Fallback
        }
    }
}

async fn advance(in_flight: &mut Option<InFlight>) -> Trigger {
    match in_flight {
        Some(flight) => flight.advance().await,
        None => std::future::pending().await,
    }
}

enum Command {
    Enqueue(AudioBuffer),
    Reset,
}

/// Handle to the playback task.
pub struct AudioPlayer<S> {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<S>,
}

impl<S: AudioSink + 'static> AudioPlayer<S> {
    pub fn spawn(sink: S, clock: Arc<dyn AudioClock>) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_player(sink, clock, rx));
        Self { commands, task }
    }

    pub fn enqueue(&self, buffer: AudioBuffer) {
        let _ = self.commands.send(Command::Enqueue(buffer));
    }

    pub fn reset(&self) {
        let _ = self.commands.send(Command::Reset);
    }

    /// Play out everything queued, then hand the sink back.
    pub async fn finish(self) -> Result<S, tokio::task::JoinError> {
        drop(self.commands);
        self.task.await
    }
}

async fn run_player<S: AudioSink>(
    mut sink: S,
    clock: Arc<dyn AudioClock>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) -> S {
    let mut schedule = PlaybackSchedule::new(clock.now());
    let mut in_flight: Option<InFlight> = None;
    let mut closed = false;

    loop {
        if in_flight.is_none() {
            if let Some(next) = schedule.dequeue(clock.now()) {
                let lead = next.start.saturating_sub(clock.now());
                let fallback = lead + next.buffer.duration() + FALLBACK_MARGIN;
                trace!(
                    start_ms = next.start.as_millis() as u64,
                    samples = next.buffer.len(),
                    "Scheduling audio buffer"
                );
                in_flight = Some(InFlight {
                    done: sink.play(&next.buffer, next.start),
                    fallback: Box::pin(tokio::time::sleep(fallback)),
                });
            } else if closed {
                break;
            }
        }

        tokio::select! {
            command = commands.recv(), if !closed => match command {
                Some(Command::Enqueue(buffer)) => schedule.enqueue(buffer),
                Some(Command::Reset) => {
                    let dropped = schedule.pending() + usize::from(in_flight.is_some());
                    schedule.reset(clock.now());
                    in_flight = None;
                    sink.stop_all();
                    debug!(dropped, "Audio playback reset");
                }
                None => closed = true,
            },
            trigger = advance(&mut in_flight), if in_flight.is_some() => {
                trace!(?trigger, "Audio buffer advanced");
                in_flight = None;
            }
            else => break,
        }
    }

    sink
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Clone, Copy)]
    enum Completion {
        Immediate,
        Never,
        Dropped,
    }

    #[derive(Default)]
    struct Log {
        starts: Vec<Duration>,
        stops: usize,
    }

    struct RecordingSink {
        completion: Completion,
        log: Arc<Mutex<Log>>,
        held: Vec<oneshot::Sender<()>>,
    }

    impl RecordingSink {
        fn new(completion: Completion) -> (Self, Arc<Mutex<Log>>) {
            let log = Arc::new(Mutex::new(Log::default()));
            let sink = Self {
                completion,
                log: log.clone(),
                held: Vec::new(),
            };
            (sink, log)
        }
    }

    impl AudioSink for RecordingSink {
        fn play(&mut self, _buffer: &AudioBuffer, start: Duration) -> oneshot::Receiver<()> {
            self.log.lock().unwrap().starts.push(start);
            let (tx, rx) = oneshot::channel();
            match self.completion {
                Completion::Immediate => {
                    let _ = tx.send(());
                }
                Completion::Never => self.held.push(tx),
                Completion::Dropped => drop(tx),
            }
            rx
        }

        fn stop_all(&mut self) {
            self.log.lock().unwrap().stops += 1;
            self.held.clear();
        }
    }

    fn half_second() -> AudioBuffer {
        AudioBuffer {
            samples: vec![0.0; 12_000],
            sample_rate: 24_000,
        }
    }

    fn secs(d: Duration) -> f64 {
        d.as_secs_f64()
    }

    #[test]
    fn test_schedule_is_gapless() {
        let mut schedule = PlaybackSchedule::new(Duration::ZERO);
        for _ in 0..3 {
            schedule.enqueue(half_second());
        }

        let starts: Vec<Duration> = std::iter::from_fn(|| schedule.dequeue(Duration::ZERO))
            .map(|s| s.start)
            .collect();
        assert_eq!(
            starts,
            vec![Duration::ZERO, Duration::from_millis(500), Duration::from_millis(1000)]
        );
    }

    #[test]
    fn test_late_dequeue_starts_now() {
        let mut schedule = PlaybackSchedule::new(Duration::ZERO);
        schedule.enqueue(half_second());
        let scheduled = schedule.dequeue(Duration::from_secs(2)).unwrap();
        assert_eq!(scheduled.start, Duration::from_secs(2));
        assert_eq!(schedule.next_start(), Duration::from_millis(2500));
    }

    #[test]
    fn test_reset_reanchors() {
        let mut schedule = PlaybackSchedule::new(Duration::ZERO);
        schedule.enqueue(half_second());
        schedule.enqueue(half_second());
        schedule.reset(Duration::from_secs(1));

        assert_eq!(schedule.pending(), 0);
        assert_eq!(schedule.next_start(), Duration::from_millis(1100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_signal_advances() {
        let (sink, log) = RecordingSink::new(Completion::Immediate);
        let player = AudioPlayer::spawn(sink, Arc::new(SystemClock::new()));
        for _ in 0..3 {
            player.enqueue(half_second());
        }
        player.finish().await.unwrap();

        let starts: Vec<f64> = log.lock().unwrap().starts.iter().copied().map(secs).collect();
        assert_eq!(starts.len(), 3);
        assert!((starts[1] - 0.5).abs() < 1e-6);
        assert!((starts[2] - 1.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_timer_advances_silent_sink() {
        for completion in [Completion::Never, Completion::Dropped] {
            let (sink, log) = RecordingSink::new(completion);
            let player = AudioPlayer::spawn(sink, Arc::new(SystemClock::new()));
            player.enqueue(half_second());
            player.enqueue(half_second());
            player.finish().await.unwrap();

            let starts = log.lock().unwrap().starts.clone();
            assert_eq!(starts.len(), 2);
            // Advanced by the timer at duration + 10 ms.
            assert!(secs(starts[1]) >= 0.51 && secs(starts[1]) < 0.52);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_drops_queue_and_reanchors() {
        let (sink, log) = RecordingSink::new(Completion::Never);
        let player = AudioPlayer::spawn(sink, Arc::new(SystemClock::new()));
        for _ in 0..3 {
            player.enqueue(half_second());
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        player.reset();
        player.enqueue(half_second());
        player.finish().await.unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.stops, 1);
        // One buffer before the reset, one after; the two queued ones never play.
        assert_eq!(log.starts.len(), 2);
        assert!((secs(log.starts[1]) - 0.2).abs() < 1e-3);
    }
}

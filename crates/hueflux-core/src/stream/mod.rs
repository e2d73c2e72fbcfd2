// ── Streaming loop ──
//
// Ticks the mixer at a fixed cadence and hands every frame to a
// `FrameSink`. The loop owns its sink; it ends when its token is
// cancelled or the sink reports a fatal failure.

pub mod protocol;
pub mod udp;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::effect::{Frame, Mixer};
use crate::model::BridgeRecord;

pub use protocol::HueStreamEncoder;
pub use udp::{UdpFrameSink, UdpSinkFactory};

// ── Transport seam ───────────────────────────────────────────────────

/// Send failure reported by a [`FrameSink`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    /// The sink cannot recover; streaming must stop.
    pub fatal: bool,
    pub message: String,
}

impl TransportError {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            fatal: true,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            fatal: false,
            message: message.into(),
        }
    }
}

/// Destination for composed frames.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: &Frame) -> Result<(), TransportError>;

    /// Release transport resources. Called once when the loop ends.
    async fn close(&mut self) {}
}

/// Opens a sink for the bridge being streamed to.
#[async_trait]
pub trait SinkFactory: Send + Sync {
    async fn open(&self, bridge: &BridgeRecord) -> Result<Box<dyn FrameSink>, TransportError>;
}

// ── Stats ────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct StreamStats {
    frames_sent: AtomicU64,
    frames_skipped: AtomicU64,
    send_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamStatsSnapshot {
    pub frames_sent: u64,
    /// Ticks missed because a send or the scheduler ran late.
    pub frames_skipped: u64,
    /// Non-fatal send failures.
    pub send_errors: u64,
}

impl StreamStats {
    pub fn snapshot(&self) -> StreamStatsSnapshot {
        StreamStatsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
        }
    }
}

// ── Loop ─────────────────────────────────────────────────────────────

/// Why a streaming loop returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamExit {
    Stopped,
    Failed(TransportError),
}

pub struct StreamingLoop {
    mixer: Arc<Mixer>,
    sink: Box<dyn FrameSink>,
    period: Duration,
    stats: Arc<StreamStats>,
}

impl StreamingLoop {
    pub fn new(mixer: Arc<Mixer>, sink: Box<dyn FrameSink>, period: Duration) -> Self {
        Self {
            mixer,
            sink,
            period,
            stats: Arc::new(StreamStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<StreamStats> {
        Arc::clone(&self.stats)
    }

    /// Run until `cancel` fires or the sink fails fatally. The sink is
    /// closed on both paths.
    pub async fn run(mut self, cancel: CancellationToken) -> StreamExit {
        info!(period_ms = self.period.as_millis(), "streaming loop started");
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last = Instant::now();

        let exit = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break StreamExit::Stopped,
                _ = ticker.tick() => {}
            }

            let now = Instant::now();
            let delta = now.duration_since(last);
            last = now;
            let missed = missed_ticks(delta, self.period);
            if missed > 0 {
                trace!(missed, "streaming loop fell behind");
                self.stats.frames_skipped.fetch_add(missed, Ordering::Relaxed);
            }

            let frame = self.mixer.tick(delta);
            match self.sink.send(&frame).await {
                Ok(()) => {
                    self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) if e.fatal => {
                    warn!(error = %e, "stream transport failed");
                    break StreamExit::Failed(e);
                }
                Err(e) => {
                    debug!(error = %e, "frame dropped");
                    self.stats.send_errors.fetch_add(1, Ordering::Relaxed);
                }
            }
        };

        self.sink.close().await;
        let stats = self.stats.snapshot();
        info!(
            sent = stats.frames_sent,
            skipped = stats.frames_skipped,
            "streaming loop ended"
        );
        exit
    }
}

/// Whole periods that passed without a tick.
fn missed_ticks(delta: Duration, period: Duration) -> u64 {
    if period.is_zero() {
        return 0;
    }
    let periods = delta.as_nanos() / period.as_nanos();
    u64::try_from(periods.saturating_sub(1)).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::effect::{Area, Color, Effect};
    use crate::model::{Light, Location};

    #[derive(Clone, Default)]
    struct Recorder {
        frames: Arc<Mutex<Vec<Frame>>>,
        fail_after: Option<usize>,
    }

    #[async_trait]
    impl FrameSink for Recorder {
        async fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
            let mut frames = self.frames.lock().unwrap();
            if self.fail_after.is_some_and(|n| frames.len() >= n) {
                return Err(TransportError::fatal("connection refused"));
            }
            frames.push(frame.clone());
            Ok(())
        }
    }

    fn red_mixer() -> Arc<Mixer> {
        let mixer = Arc::new(Mixer::new());
        mixer.set_lights(vec![Light::new("1", Location::new(0.0, 0.0, 0.0))]);
        mixer.lock().add_effect(Effect::area("red", 0, vec![Area::ALL], Color::RED));
        mixer
    }

    #[tokio::test(start_paused = true)]
    async fn loop_streams_until_cancelled() {
        let sink = Recorder::default();
        let frames = Arc::clone(&sink.frames);
        let streaming = StreamingLoop::new(red_mixer(), Box::new(sink), Duration::from_millis(20));
        let stats = streaming.stats();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(streaming.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(110)).await;
        cancel.cancel();
        assert_eq!(task.await.unwrap(), StreamExit::Stopped);

        let frames = frames.lock().unwrap();
        assert!(frames.len() >= 5);
        assert_eq!(frames.last().unwrap().color_of("1"), Some(Color::RED));
        assert_eq!(stats.snapshot().frames_sent, u64::try_from(frames.len()).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_send_ends_loop() {
        let sink = Recorder {
            fail_after: Some(3),
            ..Recorder::default()
        };
        let streaming = StreamingLoop::new(red_mixer(), Box::new(sink), Duration::from_millis(20));
        let exit = streaming.run(CancellationToken::new()).await;
        assert_eq!(exit, StreamExit::Failed(TransportError::fatal("connection refused")));
    }

    #[test]
    fn missed_ticks_counts_whole_periods() {
        let period = Duration::from_millis(20);
        assert_eq!(missed_ticks(Duration::from_millis(20), period), 0);
        assert_eq!(missed_ticks(Duration::from_millis(30), period), 0);
        assert_eq!(missed_ticks(Duration::from_millis(65), period), 2);
        assert_eq!(missed_ticks(Duration::ZERO, period), 0);
    }
}

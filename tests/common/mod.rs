//! Test infrastructure for jukebox integration tests.
//!
//! The decoder is replaced by `sh` running a small script, so whole playback
//! flows run without the real media tool. Scripts receive the composed
//! decoder arguments as `$@`.

#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;

// Re-export key types from the main crate
pub use jukebox::config::DecoderConfig;
pub use jukebox::constants::FRAME_SIZE;
pub use jukebox::decoder::ByteStream;
pub use jukebox::event::{Event, EventBus, Subscriber};
pub use jukebox::filters::{AudioFilter, FilterKind};
pub use jukebox::player::{self, PlayerAction, PlayerNotice, PlayerState, SharedPlayer};
pub use jukebox::sink::{FrameWriter, PacedSink};
pub use jukebox::track::{AudioMeta, SharedTrack, Track, TrackSource};

/// Decoder config running `script` through `sh`.
pub fn fake_decoder(script: &str) -> DecoderConfig {
    DecoderConfig {
        executable: "sh".to_string(),
        before_options: vec![
            "-c".to_string(),
            script.to_string(),
            "fake-decoder".to_string(),
        ],
        options: vec![],
    }
}

/// Script printing `frames` frames of silence.
pub fn silence(frames: usize) -> String {
    format!("head -c {} /dev/zero", frames * FRAME_SIZE)
}

/// Creates a track read from a local path.
pub fn mock_track(title: &str) -> SharedTrack {
    Track::new(
        TrackSource::locator(format!("/music/{title}.mp3")),
        AudioMeta::new(title).with_author("Test Artist"),
    )
    .into_shared()
}

/// Creates a track whose input stream can never be opened.
pub fn unplayable_track(title: &str) -> SharedTrack {
    let source = TrackSource::stream(|| -> io::Result<ByteStream> {
        Err(io::Error::other("stream gone"))
    });
    Track::new(source, AudioMeta::new(title)).into_shared()
}

/// Frame writer keeping every frame in memory.
#[derive(Clone, Default)]
pub struct FrameCollector {
    frames: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl FrameCollector {
    pub fn count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().unwrap().clone()
    }
}

impl FrameWriter for FrameCollector {
    fn write_frame(&mut self, frame: &[u8]) -> anyhow::Result<()> {
        self.frames.lock().unwrap().push(frame.to_vec());
        Ok(())
    }
}

/// Test harness wiring a player, its event loop and a frame collecting sink
/// to one bus. Must be created inside a tokio runtime.
pub struct TestHarness {
    pub bus: EventBus,
    pub player: SharedPlayer,
    pub frames: FrameCollector,
}

impl TestHarness {
    /// Creates a harness whose decoder runs `script`, pulling frames as fast
    /// as they are produced.
    pub fn new(script: &str) -> Self {
        Self::build(script, false, FrameCollector::default())
    }

    /// Creates a harness pulling one frame every 20 ms.
    pub fn paced(script: &str) -> Self {
        Self::build(script, true, FrameCollector::default())
    }

    fn build(script: &str, paced: bool, frames: FrameCollector) -> Self {
        let bus = EventBus::new();
        let sink = PacedSink::new(bus.clone(), frames.clone(), paced);
        let player = player::Player::new(bus.clone(), fake_decoder(script), sink);
        let player = player::init(&bus, player);

        Self { bus, player, frames }
    }

    /// Creates a new subscriber for receiving events.
    pub fn subscribe(&self) -> Subscriber {
        self.bus.subscribe()
    }

    /// Sends a player action to the bus.
    pub fn send(&self, action: PlayerAction) {
        self.bus.send(Event::Player(action));
    }

    /// Enqueues tracks and starts playing if idle.
    pub fn enqueue(&self, tracks: Vec<SharedTrack>) {
        self.send(PlayerAction::Enqueue {
            tracks,
            start_playing: true,
        });
    }

    pub fn state(&self) -> PlayerState {
        player::lock(&self.player).state()
    }
}

/// Title of a now playing notice.
pub fn now_playing_title(event: &Event) -> Option<String> {
    match event {
        Event::Notice(PlayerNotice::NowPlaying { meta }) => Some(meta.title.clone()),
        _ => None,
    }
}

pub fn is_queue_ended(event: &Event) -> bool {
    matches!(event, Event::Notice(PlayerNotice::QueueEnded))
}

/// Collects events until a predicate is satisfied or timeout is reached.
pub async fn collect_events_until<F>(
    subscriber: &mut Subscriber,
    timeout: Duration,
    predicate: F,
) -> Vec<Event>
where
    F: Fn(&Event) -> bool,
{
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        match subscriber.try_recv() {
            Ok(event) => {
                let should_stop = predicate(&event);
                events.push(event);
                if should_stop {
                    break;
                }
            }
            Err(TryRecvError::Empty) => {
                if tokio::time::Instant::now() >= deadline {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err(TryRecvError::Lagged(n)) => {
                eprintln!("Warning: subscriber lagged, missed {n} events");
            }
            Err(TryRecvError::Closed) => break,
        }
    }

    events
}

/// Waits for a specific type of event within a timeout.
pub async fn wait_for_event<F>(
    subscriber: &mut Subscriber,
    timeout: Duration,
    matches: F,
) -> Option<Event>
where
    F: Fn(&Event) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        match subscriber.try_recv() {
            Ok(event) if matches(&event) => return Some(event),
            Ok(_) => continue,
            Err(TryRecvError::Empty) => {
                if tokio::time::Instant::now() >= deadline {
                    return None;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Closed) => return None,
        }
    }
}

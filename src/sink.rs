//! Output side of the pipeline: something that pulls PCM frames from the
//! current track at the voice transport's cadence.

use anyhow::Result;
use hound::{SampleFormat, WavSpec};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Instant;

use crate::{
    constants::{BIT_DEPTH, CHANNELS, FRAME_DURATION, SAMPLE_RATE},
    event::{Event, EventBus},
    player::PlayerAction,
    track::{self, SharedTrack},
};

/// The voice transport as seen by the controller.
///
/// A sink reports the end of a track (or a failure to play it) by publishing
/// [`PlayerAction::TrackEnded`] stamped with the session it was started with,
/// and never after that session was stopped or replaced.
pub trait AudioSink: Send {
    /// Starts pulling frames from `track`, replacing whatever was playing.
    /// A `paused` session pulls nothing until resumed.
    fn start(&mut self, track: SharedTrack, session: u64, paused: bool);

    fn pause(&mut self);

    fn resume(&mut self);

    /// Stops pulling frames without reporting the track as ended.
    fn stop(&mut self);
}

/// Destination of the frames pulled by a [`PacedSink`].
pub trait FrameWriter: Send {
    fn write_frame(&mut self, frame: &[u8]) -> Result<()>;
}

pub fn wav_spec() -> WavSpec {
    WavSpec {
        channels: CHANNELS,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: BIT_DEPTH,
        sample_format: SampleFormat::Int,
    }
}

/// Writes frames as one endless WAV stream: the header goes out before the
/// first frame so players recognise the format, then raw samples follow.
pub struct WavStreamWriter<W> {
    out: W,
    header_written: bool,
}

impl<W: Write + Send> WavStreamWriter<W> {
    pub fn new(out: W) -> Self {
        WavStreamWriter {
            out,
            header_written: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> FrameWriter for WavStreamWriter<W> {
    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        if !self.header_written {
            let header = wav_spec().into_header_for_infinite_file();
            self.out.write_all(&header[..])?;
            self.header_written = true;
        }

        // Frames already are interleaved s16le, same as the WAV payload
        self.out.write_all(frame)?;
        self.out.flush()?;

        Ok(())
    }
}

type SharedWriter = Arc<Mutex<Box<dyn FrameWriter>>>;

struct Session {
    paused: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

impl Session {
    fn new(paused: bool) -> Self {
        Session {
            paused: Arc::new(AtomicBool::new(paused)),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Sink running one frame pump thread per started track.
pub struct PacedSink {
    bus: EventBus,
    writer: SharedWriter,
    /// Pull one frame per [`FRAME_DURATION`] rather than as fast as possible
    paced: bool,
    session: Option<Session>,
}

impl PacedSink {
    pub fn new(bus: EventBus, writer: impl FrameWriter + 'static, paced: bool) -> Self {
        PacedSink {
            bus,
            writer: Arc::new(Mutex::new(Box::new(writer))),
            paced,
            session: None,
        }
    }
}

impl AudioSink for PacedSink {
    fn start(&mut self, track: SharedTrack, id: u64, paused: bool) {
        self.stop();

        let session = Session::new(paused);
        let pump = FramePump {
            track,
            session: id,
            bus: self.bus.clone(),
            writer: self.writer.clone(),
            paced: self.paced,
            paused: session.paused.clone(),
            stopped: session.stopped.clone(),
        };

        let spawned = thread::Builder::new()
            .name("frame-pump".to_string())
            .spawn(move || pump.run());

        match spawned {
            Ok(_) => self.session = Some(session),
            Err(e) => {
                error!("Failed to start frame pump: {e}");
                self.bus.send(Event::Player(PlayerAction::TrackEnded {
                    session: id,
                    error: Some(e.to_string()),
                }));
            }
        }
    }

    fn pause(&mut self) {
        if let Some(session) = &self.session {
            session.paused.store(true, Ordering::Release);
        }
    }

    fn resume(&mut self) {
        if let Some(session) = &self.session {
            session.paused.store(false, Ordering::Release);
        }
    }

    fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            session.stopped.store(true, Ordering::Release);
        }
    }
}

impl Drop for PacedSink {
    fn drop(&mut self) {
        self.stop();
    }
}

struct FramePump {
    track: SharedTrack,
    session: u64,
    bus: EventBus,
    writer: SharedWriter,
    paced: bool,
    paused: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

enum Pull {
    Frame(Vec<u8>),
    Idle,
    Stopped,
}

impl FramePump {
    fn run(self) {
        let mut next_frame_at = Instant::now();

        let error = loop {
            let frame = match self.pull() {
                Ok(Pull::Frame(frame)) if frame.is_empty() => break None,
                Ok(Pull::Frame(frame)) => frame,
                Ok(Pull::Idle) => {
                    thread::sleep(FRAME_DURATION);
                    next_frame_at = Instant::now();
                    continue;
                }
                Ok(Pull::Stopped) => return,
                Err(e) => break Some(e),
            };

            let written = self
                .writer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .write_frame(&frame);

            if let Err(e) = written {
                break Some(format!("{e:#}"));
            }

            if self.paced {
                next_frame_at += FRAME_DURATION;
                if let Some(wait) = next_frame_at.checked_duration_since(Instant::now()) {
                    thread::sleep(wait);
                }
            }
        };

        if !self.stopped.load(Ordering::Acquire) {
            self.bus.send(Event::Player(PlayerAction::TrackEnded {
                session: self.session,
                error,
            }));
        }
    }

    fn pull(&self) -> Result<Pull, String> {
        let mut track = track::lock(&self.track);

        // Flags are read under the track lock: once the controller has paused
        // us and cleaned up the track, no read here respawns its decoder
        if self.stopped.load(Ordering::Acquire) {
            return Ok(Pull::Stopped);
        }
        if self.paused.load(Ordering::Acquire) {
            return Ok(Pull::Idle);
        }

        track.read().map(Pull::Frame).map_err(|e| e.to_string())
    }
}

use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{
    config::DecoderConfig,
    decoder::{ByteStream, DecoderInput, DecoderProcess},
    error::PlaybackError,
    filters::{AudioFilter, FilterGraph},
};

/// Opens a fresh byte stream of a track's audio, once per decoder spawn.
pub type StreamOpener = Arc<dyn Fn() -> io::Result<ByteStream> + Send + Sync>;

/// Display information about a track.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct AudioMeta {
    pub title: String,
    pub author: Option<String>,
    pub cover_url: Option<String>,
    /// Duration in seconds
    pub duration: Option<u64>,
}

impl AudioMeta {
    pub fn new(title: impl Into<String>) -> Self {
        AudioMeta {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_cover_url(mut self, cover_url: impl Into<String>) -> Self {
        self.cover_url = Some(cover_url.into());
        self
    }

    pub fn with_duration(mut self, duration: u64) -> Self {
        self.duration = Some(duration);
        self
    }
}

impl Display for AudioMeta {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.author {
            Some(author) => write!(f, "{} ({})", self.title, author)?,
            None => write!(f, "{}", self.title)?,
        }

        if let Some(duration) = self.duration {
            write!(f, " [{}:{:02}]", duration / 60, duration % 60)?;
        }

        Ok(())
    }
}

/// Where a track's audio comes from.
#[derive(Clone)]
pub enum TrackSource {
    /// Local path or remote URL, read by the decoder itself
    Locator(String),
    /// Bytes produced by us and piped into the decoder
    Stream(StreamOpener),
}

impl TrackSource {
    pub fn locator(locator: impl Into<String>) -> Self {
        TrackSource::Locator(locator.into())
    }

    pub fn stream<F>(open: F) -> Self
    where
        F: Fn() -> io::Result<ByteStream> + Send + Sync + 'static,
    {
        TrackSource::Stream(Arc::new(open))
    }

    fn open(&self) -> Result<DecoderInput, PlaybackError> {
        match self {
            TrackSource::Locator(locator) => Ok(DecoderInput::Locator(locator.clone())),
            TrackSource::Stream(open) => open()
                .map(DecoderInput::Stream)
                .map_err(PlaybackError::StreamOpen),
        }
    }
}

impl Debug for TrackSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackSource::Locator(locator) => f.debug_tuple("Locator").field(locator).finish(),
            TrackSource::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// A playable unit. Owns at most one decoder process, which is built lazily
/// and rebuilt whenever the filters or the offset change.
#[derive(Debug)]
pub struct Track {
    source: TrackSource,
    meta: AudioMeta,
    graph: FilterGraph,
    /// Offset the next decoder starts at
    offset: f64,
    decoder: Option<DecoderProcess>,
    config: Arc<DecoderConfig>,
}

/// Track shared between the controller and the sink pulling its frames.
pub type SharedTrack = Arc<Mutex<Track>>;

pub fn lock(track: &SharedTrack) -> MutexGuard<'_, Track> {
    track.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Track {
    pub fn new(source: TrackSource, meta: AudioMeta) -> Self {
        Track {
            source,
            meta,
            graph: FilterGraph::default(),
            offset: 0.0,
            decoder: None,
            config: Arc::new(DecoderConfig::default()),
        }
    }

    pub fn into_shared(self) -> SharedTrack {
        Arc::new(Mutex::new(self))
    }

    pub fn meta(&self) -> &AudioMeta {
        &self.meta
    }

    pub fn source(&self) -> &TrackSource {
        &self.source
    }

    pub fn graph(&self) -> &FilterGraph {
        &self.graph
    }

    pub fn decoder(&self) -> Option<&DecoderProcess> {
        self.decoder.as_ref()
    }

    /// Whether a decoder process currently exists for this track.
    pub fn is_loaded(&self) -> bool {
        self.decoder.is_some()
    }

    /// Decoder settings used for the next spawn.
    pub fn set_decoder_config(&mut self, config: Arc<DecoderConfig>) {
        self.config = config;
    }

    /// Current playback position in seconds.
    pub fn position(&self) -> f64 {
        self.decoder
            .as_ref()
            .map(DecoderProcess::offset)
            .unwrap_or(self.offset)
    }

    /// Pulls the next frame, spawning the decoder first if needed. An empty
    /// frame means the track is over.
    pub fn read(&mut self) -> Result<Vec<u8>, PlaybackError> {
        Ok(self.ensure()?.read_frame())
    }

    /// Restarts decoding `seconds` into the track.
    pub fn seek_to(&mut self, seconds: f64) -> Result<(), PlaybackError> {
        self.cleanup();
        self.offset = seconds.max(0.0);

        let decoder = self.spawn_decoder()?;
        self.decoder = Some(decoder);

        Ok(())
    }

    /// Replaces the filters. A running decoder is restarted at the current
    /// position with the new chain; otherwise the next read picks them up.
    pub fn set_filters(&mut self, filters: &[AudioFilter]) -> Result<(), PlaybackError> {
        let position = self.position();
        self.graph = FilterGraph::new(filters.iter().cloned());

        if self.decoder.is_some() {
            self.seek_to(position)
        } else {
            self.offset = position;
            Ok(())
        }
    }

    /// Terminates the decoder, if any. The position is kept for the next one.
    pub fn cleanup(&mut self) {
        if let Some(mut decoder) = self.decoder.take() {
            self.offset = decoder.offset();
            decoder.cleanup();
        }
    }

    fn ensure(&mut self) -> Result<&mut DecoderProcess, PlaybackError> {
        if let Some(decoder) = self.decoder.take() {
            return Ok(self.decoder.insert(decoder));
        }

        let decoder = self.spawn_decoder()?;
        Ok(self.decoder.insert(decoder))
    }

    fn spawn_decoder(&self) -> Result<DecoderProcess, PlaybackError> {
        let input = self.source.open()?;
        DecoderProcess::spawn(input, &self.graph, self.offset, &self.config)
    }
}

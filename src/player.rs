//! Playback controller: drives the queue, the track currently playing and the
//! sink pulling its frames.

use anyhow::Result;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{
    config::DecoderConfig,
    error::PlaybackError,
    event::{Event, EventBus},
    filters::{AudioFilter, FilterSet},
    queue::Queue,
    sink::AudioSink,
    track::{self, AudioMeta, SharedTrack, Track},
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PlayerState {
    #[default]
    Idle,
    Playing,
    Paused,
}

#[derive(Clone, Debug)]
pub enum PlayerAction {
    /// Add tracks at the end of the queue
    Enqueue {
        tracks: Vec<SharedTrack>,
        start_playing: bool,
    },

    /// Toggle between playing and paused
    PlayOrPause,

    /// Play next track
    Next,

    /// Play previous track
    Prev,

    Shuffle,

    /// Stop playback and empty the queue
    Clear,

    /// Replace the active filters
    SetFilters { filters: Vec<AudioFilter> },

    /// Switch one filter on or off
    ToggleFilter { filter: AudioFilter },

    /// Seek the current track
    Seek { seconds: f64 },

    /// Sink reached the end of the track it was started on in `session`, or
    /// failed playing it
    TrackEnded {
        session: u64,
        error: Option<String>,
    },
}

#[derive(Clone, Debug)]
pub enum PlayerNotice {
    NowPlaying { meta: AudioMeta },
    PausedChanged { paused: bool },
    FiltersChanged { chain: Option<String> },
    QueueEnded,
}

/// Invoked after the controller advanced past a finished track.
pub type TrackEndedCallback = Box<dyn FnMut() -> Result<()> + Send>;

pub struct Player {
    bus: EventBus,
    config: Arc<DecoderConfig>,
    sink: Box<dyn AudioSink>,
    queue: Queue,
    filters: FilterSet,
    current: Option<SharedTrack>,
    state: PlayerState,
    /// Id of the sink session pulling from `current`, bumped on every restart
    session: u64,
    on_track_ended: Option<TrackEndedCallback>,
}

impl Player {
    pub fn new(bus: EventBus, config: DecoderConfig, sink: impl AudioSink + 'static) -> Self {
        Player {
            bus,
            config: Arc::new(config),
            sink: Box::new(sink),
            queue: Queue::new(),
            filters: FilterSet::new(),
            current: None,
            state: PlayerState::Idle,
            session: 0,
            on_track_ended: None,
        }
    }

    pub fn set_on_track_ended<F>(&mut self, callback: F)
    where
        F: FnMut() -> Result<()> + Send + 'static,
    {
        self.on_track_ended = Some(Box::new(callback));
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn is_paused(&self) -> bool {
        self.state == PlayerState::Paused
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlayerState::Playing
    }

    /// Session the sink was last started with. Track ends reported for any
    /// other session are ignored.
    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn current(&self) -> Option<&SharedTrack> {
        self.current.as_ref()
    }

    pub fn now_playing(&self) -> Option<AudioMeta> {
        self.current
            .as_ref()
            .map(|track| track::lock(track).meta().clone())
    }

    /// Position of the current track in seconds.
    pub fn position(&self) -> Option<f64> {
        self.current
            .as_ref()
            .map(|track| track::lock(track).position())
    }

    fn notify(&self, notice: PlayerNotice) {
        self.bus.send(Event::Notice(notice));
    }

    /// Hands `track` to the sink in a fresh session, keeping it paused if the
    /// player is.
    fn start_sink(&mut self, track: SharedTrack) {
        self.session += 1;
        let paused = self.is_paused();
        self.sink.start(track, self.session, paused);
    }

    /// Starts `track` from the beginning with the active filters.
    ///
    /// The previous track's decoder is cleaned up before the new one is
    /// spawned. If spawning fails the previous track carries on from where it
    /// was and the error is returned.
    pub fn play(&mut self, track: SharedTrack) -> Result<(), PlaybackError> {
        // The sink must let go of the old track before its lock is taken here
        self.sink.stop();
        if let Some(current) = &self.current {
            track::lock(current).cleanup();
        }

        let meta = {
            let mut track = track::lock(&track);
            track.set_decoder_config(self.config.clone());

            let prepared = track
                .set_filters(self.filters.as_slice())
                .and_then(|_| track.seek_to(0.0));

            if let Err(e) = prepared {
                error!("Failed to start {}: {e}", track.meta());
                drop(track);
                if let Some(current) = self.current.clone() {
                    self.start_sink(current);
                }
                return Err(e);
            }

            track.meta().clone()
        };

        info!("Playing track: {meta}");

        self.current = Some(track.clone());
        self.state = PlayerState::Playing;
        self.start_sink(track);

        self.notify(PlayerNotice::NowPlaying { meta });

        Ok(())
    }

    /// Toggles pause. Returns whether playback is paused afterwards.
    pub fn play_or_pause(&mut self) -> bool {
        match self.state {
            PlayerState::Playing => {
                info!("Playback paused");
                self.sink.pause();
                self.state = PlayerState::Paused;
            }
            PlayerState::Paused => {
                info!("Playback resumed");
                self.sink.resume();
                self.state = PlayerState::Playing;
            }
            PlayerState::Idle => return false,
        }

        let paused = self.is_paused();
        self.notify(PlayerNotice::PausedChanged { paused });
        paused
    }

    /// Plays the next track in the queue. Returns false, changing nothing,
    /// when there is none. On failure the cursor stays where it was.
    pub fn next_track(&mut self) -> Result<bool, PlaybackError> {
        self.switch_track(Queue::next)
    }

    /// Plays the previous track in the queue. Returns false, changing
    /// nothing, when there is none. On failure the cursor stays where it was.
    pub fn prev_track(&mut self) -> Result<bool, PlaybackError> {
        self.switch_track(Queue::prev)
    }

    fn switch_track(
        &mut self,
        step: fn(&mut Queue) -> Option<SharedTrack>,
    ) -> Result<bool, PlaybackError> {
        let position = self.queue.position();
        let Some(track) = step(&mut self.queue) else {
            return Ok(false);
        };

        if let Err(e) = self.play(track) {
            self.queue.set_position(position);
            return Err(e);
        }

        Ok(true)
    }

    /// Moves forward through the queue until a track starts, skipping the
    /// ones that fail to. Ends the queue when it runs out, returning false.
    pub fn play_next_playable(&mut self) -> bool {
        while let Some(track) = self.queue.next() {
            match self.play(track) {
                Ok(()) => return true,
                Err(e) => warn!("Skipping unplayable track: {e}"),
            }
        }

        self.end_of_queue();
        false
    }

    /// Called when the sink is done with the track it was started on in
    /// `session`. Advances to the next playable track, then runs the track
    /// ended callback. Ends reported for an older session are ignored.
    pub fn on_track_ended(&mut self, session: u64, error: Option<&str>) {
        if session != self.session || self.state == PlayerState::Idle {
            debug!(
                "Ignoring end of session {session}, current session is {}",
                self.session
            );
            return;
        }

        if let Some(error) = error {
            error!("Track ended with error: {error}");
        }

        self.play_next_playable();

        if let Some(callback) = self.on_track_ended.as_mut() {
            if let Err(e) = callback() {
                warn!("Track ended callback failed: {e:#}");
            }
        }
    }

    fn end_of_queue(&mut self) {
        info!("Playback queue ended, {} tracks queued", self.queue.count());

        self.stop();
        self.notify(PlayerNotice::QueueEnded);
    }

    /// Replaces the active filters and applies them to the current track,
    /// which restarts at its current position.
    pub fn set_filters(
        &mut self,
        filters: impl IntoIterator<Item = AudioFilter>,
    ) -> Result<(), PlaybackError> {
        self.filters = filters.into_iter().collect();

        let graph = self.filters.graph();
        info!(
            "Active filters: {}",
            graph.chain_expression().unwrap_or("(none)")
        );

        let filters = self.filters.clone();
        self.restart_current(|track| track.set_filters(filters.as_slice()))?;

        self.notify(PlayerNotice::FiltersChanged {
            chain: graph.chain_expression().map(str::to_string),
        });

        Ok(())
    }

    /// Switches a filter on or off, see [`FilterSet::toggle`]. Returns whether
    /// the filter kind is active afterwards.
    pub fn toggle_filter(&mut self, filter: AudioFilter) -> Result<bool, PlaybackError> {
        let mut filters = self.filters.clone();
        let active = filters.toggle(filter);
        self.set_filters(filters.as_slice().to_vec())?;

        Ok(active)
    }

    /// Restarts the current track at `seconds`. Returns false when nothing is
    /// loaded.
    pub fn seek(&mut self, seconds: f64) -> Result<bool, PlaybackError> {
        self.restart_current(|track| track.seek_to(seconds))
    }

    /// Applies `restart` to the current track with the sink stopped, then
    /// hands the track back to the sink in a new session so an end read
    /// from the replaced decoder is never acted on. Returns false when
    /// nothing is loaded.
    fn restart_current<F>(&mut self, restart: F) -> Result<bool, PlaybackError>
    where
        F: FnOnce(&mut Track) -> Result<(), PlaybackError>,
    {
        let Some(current) = self.current.clone() else {
            return Ok(false);
        };

        self.sink.stop();
        let restarted = restart(&mut *track::lock(&current));
        // Even a failed restart goes back to the sink, which reports it as ended
        self.start_sink(current);

        restarted.map(|_| true)
    }

    /// Appends tracks to the queue, starting playback if asked to and nothing
    /// is loaded.
    pub fn add_to_queue(
        &mut self,
        tracks: impl IntoIterator<Item = SharedTrack>,
        start_playing: bool,
    ) -> Result<(), PlaybackError> {
        self.queue.append(tracks);
        debug!("Queue length: {}", self.queue.count());

        if start_playing && self.state == PlayerState::Idle {
            self.next_track()?;
        }

        Ok(())
    }

    pub fn shuffle(&mut self) {
        self.queue.shuffle();
    }

    /// Stops playback and releases the current track's decoder.
    pub fn stop(&mut self) {
        self.sink.stop();
        self.session += 1;
        if let Some(track) = self.current.take() {
            track::lock(&track).cleanup();
        }
        self.state = PlayerState::Idle;
    }

    /// Stops playback, empties the queue and moves the cursor back in front
    /// of the first track.
    pub fn clear(&mut self) {
        self.stop();
        self.queue.clear();
        self.queue.rewind();
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Type alias for the controller shared with its event loop
pub type SharedPlayer = Arc<Mutex<Player>>;

pub fn lock(player: &SharedPlayer) -> MutexGuard<'_, Player> {
    player.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shares `player` and starts applying [`PlayerAction`]s from the bus to it,
/// one at a time and in order.
pub fn init(bus: &EventBus, player: Player) -> SharedPlayer {
    let player = Arc::new(Mutex::new(player));

    handle_incoming_event_loop(bus.clone(), player.clone());

    player
}

fn handle_incoming_event_loop(bus: EventBus, player: SharedPlayer) {
    // Subscribe before spawning so actions sent right after init are not lost
    let mut bus_rx = bus.subscribe();

    tokio::spawn(async move {
        while let Some(event) = bus_rx.recv().await {
            if let Event::Player(action) = event {
                let player = player.clone();
                let handled =
                    tokio::task::spawn_blocking(move || handle_incoming_event(action, &player))
                        .await;

                if let Err(e) = handled {
                    error!("Player action handler failed: {e}");
                }
            }
        }
    });
}

fn handle_incoming_event(action: PlayerAction, player: &SharedPlayer) {
    let mut player = lock(player);

    let result = match action {
        PlayerAction::Enqueue {
            tracks,
            start_playing,
        } => player.add_to_queue(tracks, start_playing),
        PlayerAction::PlayOrPause => {
            player.play_or_pause();
            Ok(())
        }
        PlayerAction::Next => player.next_track().map(|_| ()),
        PlayerAction::Prev => player.prev_track().map(|_| ()),
        PlayerAction::Shuffle => {
            player.shuffle();
            Ok(())
        }
        PlayerAction::Clear => {
            player.clear();
            Ok(())
        }
        PlayerAction::SetFilters { filters } => player.set_filters(filters),
        PlayerAction::ToggleFilter { filter } => player.toggle_filter(filter).map(|_| ()),
        PlayerAction::Seek { seconds } => player.seek(seconds).map(|_| ()),
        PlayerAction::TrackEnded { session, error } => {
            player.on_track_ended(session, error.as_deref());
            Ok(())
        }
    };

    if let Err(e) = result {
        error!("Error while handling player action: {e}");
    }
}

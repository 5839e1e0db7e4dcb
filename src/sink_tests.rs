//! Unit tests for the sink module

#[cfg(test)]
mod tests {
    use anyhow::{bail, Result};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    use crate::config::DecoderConfig;
    use crate::constants::FRAME_SIZE;
    use crate::event::{Event, EventBus, Subscriber};
    use crate::player::PlayerAction;
    use crate::sink::{wav_spec, AudioSink, FrameWriter, PacedSink, WavStreamWriter};
    use crate::test_support::{fake_decoder, make_test_track, silence};
    use crate::track::SharedTrack;

    #[derive(Clone, Default)]
    struct Collector {
        frames: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl Collector {
        fn count(&self) -> usize {
            self.frames.lock().unwrap().len()
        }
    }

    impl FrameWriter for Collector {
        fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
            self.frames.lock().unwrap().push(frame.to_vec());
            Ok(())
        }
    }

    struct BrokenWriter;

    impl FrameWriter for BrokenWriter {
        fn write_frame(&mut self, _frame: &[u8]) -> Result<()> {
            bail!("Output closed")
        }
    }

    fn track_with(config: DecoderConfig) -> SharedTrack {
        let mut track = make_test_track("Song");
        track.set_decoder_config(Arc::new(config));
        track.into_shared()
    }

    /// Waits for the sink to report a track as ended, returning the session
    /// it was reported for and its error.
    fn wait_track_ended(
        sub: &mut Subscriber,
        timeout: Duration,
    ) -> Option<(u64, Option<String>)> {
        let deadline = Instant::now() + timeout;

        while Instant::now() < deadline {
            match sub.try_recv() {
                Ok(Event::Player(PlayerAction::TrackEnded { session, error })) => {
                    return Some((session, error))
                }
                Ok(_) => {}
                Err(_) => thread::sleep(Duration::from_millis(5)),
            }
        }

        None
    }

    #[test]
    fn test_wav_stream_header() {
        let mut writer = WavStreamWriter::new(Vec::new());
        writer.write_frame(&[1; FRAME_SIZE]).unwrap();
        writer.write_frame(&[2; FRAME_SIZE]).unwrap();

        let out = writer.into_inner();
        let header = wav_spec().into_header_for_infinite_file();

        assert_eq!(&out[..4], b"RIFF");
        assert_eq!(out.len(), header.len() + 2 * FRAME_SIZE);
        assert!(out[header.len()..header.len() + FRAME_SIZE]
            .iter()
            .all(|&b| b == 1));
    }

    #[test]
    fn test_wav_stream_without_frames_is_empty() {
        let writer = WavStreamWriter::new(Vec::new());
        assert!(writer.into_inner().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_pulls_frames_until_track_ends() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        let collector = Collector::default();
        let mut sink = PacedSink::new(bus.clone(), collector.clone(), false);

        sink.start(track_with(fake_decoder(&silence(3))), 7, false);

        let ended = wait_track_ended(&mut sub, Duration::from_secs(5));
        assert_eq!(ended, Some((7, None)));
        assert_eq!(collector.count(), 3);
    }

    #[cfg(unix)]
    #[test]
    fn test_paced_output_follows_frame_duration() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        let mut sink = PacedSink::new(bus.clone(), Collector::default(), true);

        let started = Instant::now();
        sink.start(track_with(fake_decoder(&silence(10))), 1, false);

        assert_eq!(
            wait_track_ended(&mut sub, Duration::from_secs(5)),
            Some((1, None))
        );
        // Ten frames of 20 ms each
        assert!(started.elapsed() >= Duration::from_millis(180));
    }

    #[test]
    fn test_spawn_failure_ends_track_with_error() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        let mut sink = PacedSink::new(bus.clone(), Collector::default(), false);
        let config = DecoderConfig {
            executable: "/nonexistent/decoder-binary".to_string(),
            ..Default::default()
        };

        sink.start(track_with(config), 3, false);

        let ended = wait_track_ended(&mut sub, Duration::from_secs(5));
        assert!(matches!(ended, Some((3, Some(error))) if error.contains("not found")));
    }

    #[cfg(unix)]
    #[test]
    fn test_writer_failure_ends_track_with_error() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        let mut sink = PacedSink::new(bus.clone(), BrokenWriter, false);

        sink.start(track_with(fake_decoder(&silence(3))), 1, false);

        let ended = wait_track_ended(&mut sub, Duration::from_secs(5));
        assert_eq!(ended, Some((1, Some("Output closed".to_string()))));
    }

    #[cfg(unix)]
    #[test]
    fn test_pause_and_resume() {
        let bus = EventBus::new();
        let collector = Collector::default();
        let mut sink = PacedSink::new(bus.clone(), collector.clone(), true);

        sink.start(track_with(fake_decoder(&silence(500))), 1, false);
        thread::sleep(Duration::from_millis(100));

        sink.pause();
        thread::sleep(Duration::from_millis(50));
        let paused_at = collector.count();
        thread::sleep(Duration::from_millis(100));
        assert!(collector.count() <= paused_at + 1);

        sink.resume();
        thread::sleep(Duration::from_millis(100));
        assert!(collector.count() > paused_at + 1);

        sink.stop();
    }

    #[cfg(unix)]
    #[test]
    fn test_paused_start_waits_for_resume() {
        let bus = EventBus::new();
        let collector = Collector::default();
        let mut sink = PacedSink::new(bus.clone(), collector.clone(), true);

        sink.start(track_with(fake_decoder(&silence(500))), 1, true);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(collector.count(), 0);

        sink.resume();
        thread::sleep(Duration::from_millis(100));
        assert!(collector.count() > 0);

        sink.stop();
    }

    #[cfg(unix)]
    #[test]
    fn test_stop_does_not_report_track_end() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        let collector = Collector::default();
        let mut sink = PacedSink::new(bus.clone(), collector.clone(), true);

        sink.start(track_with(fake_decoder(&silence(500))), 1, false);
        thread::sleep(Duration::from_millis(60));
        sink.stop();

        thread::sleep(Duration::from_millis(50));
        let stopped_at = collector.count();
        assert!(stopped_at < 500);

        assert_eq!(wait_track_ended(&mut sub, Duration::from_millis(200)), None);
        assert_eq!(collector.count(), stopped_at);
    }

    #[cfg(unix)]
    #[test]
    fn test_restart_replaces_session() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        let collector = Collector::default();
        let mut sink = PacedSink::new(bus.clone(), collector.clone(), true);

        let first = track_with(fake_decoder(&silence(500)));
        sink.start(first.clone(), 1, false);
        thread::sleep(Duration::from_millis(60));

        sink.start(track_with(fake_decoder(&silence(2))), 2, false);

        // Only the second track reports its end
        assert_eq!(
            wait_track_ended(&mut sub, Duration::from_secs(5)),
            Some((2, None))
        );
        assert_eq!(wait_track_ended(&mut sub, Duration::from_millis(200)), None);

        crate::track::lock(&first).cleanup();
    }
}

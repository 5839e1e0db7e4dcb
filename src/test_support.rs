//! Helpers shared by the unit tests.
//!
//! Decoder tests run `sh` in place of the media tool: the script goes into
//! the pre-options, so it receives the composed decoder arguments as `$@`.

use std::path::Path;

use crate::{
    config::DecoderConfig,
    constants::FRAME_SIZE,
    track::{AudioMeta, SharedTrack, Track, TrackSource},
};

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

/// Script printing `bytes` bytes of silence.
pub fn silence_bytes(bytes: usize) -> String {
    format!("head -c {bytes} /dev/zero")
}

/// Script printing `frames` frames of silence.
pub fn silence(frames: usize) -> String {
    silence_bytes(frames * FRAME_SIZE)
}

/// Script saving its arguments to `args_file`, one per line, before printing
/// `frames` frames of silence.
pub fn recording(args_file: &Path, frames: usize) -> String {
    format!(
        "printf '%s\\n' \"$@\" > '{}'; {}",
        args_file.display(),
        silence(frames)
    )
}

pub fn recorded_args(args_file: &Path) -> Vec<String> {
    std::fs::read_to_string(args_file)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

/// Value passed after `-ss` in the recorded arguments.
pub fn recorded_offset(args_file: &Path) -> Option<String> {
    let args = recorded_args(args_file);
    let pos = args.iter().position(|arg| arg == "-ss")?;
    args.get(pos + 1).cloned()
}

pub fn make_test_track(title: &str) -> Track {
    Track::new(
        TrackSource::locator(format!("/music/{title}.mp3")),
        AudioMeta::new(title),
    )
}

pub fn make_shared_track(title: &str) -> SharedTrack {
    make_test_track(title).into_shared()
}

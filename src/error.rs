use std::io;
use thiserror::Error;

use crate::filters::FilterKind;

#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("{executable} was not found")]
    ExecutableNotFound { executable: String },

    #[error("Failed to spawn {executable}: {source}")]
    ProcessSpawn {
        executable: String,
        #[source]
        source: io::Error,
    },

    #[error("Decoder process was created without its {0} pipe")]
    MissingPipe(&'static str),

    #[error("Failed to open input stream: {0}")]
    StreamOpen(#[source] io::Error),

    #[error("{filter} filter needs a value for \"{label}\"")]
    MissingFilterParameter { filter: FilterKind, label: &'static str },

    #[error("{filter} filter got an invalid value for \"{label}\": {value:?}")]
    InvalidFilterParameter {
        filter: FilterKind,
        label: &'static str,
        value: String,
    },
}

impl PlaybackError {
    /// Whether the error happened while creating the decoder process.
    pub fn is_spawn_error(&self) -> bool {
        matches!(
            self,
            PlaybackError::ExecutableNotFound { .. }
                | PlaybackError::ProcessSpawn { .. }
                | PlaybackError::MissingPipe(_)
        )
    }
}

//! jukebox library crate
//!
//! Streams audio tracks through an external decoder process and serves them
//! as 20 ms PCM frames to a voice transport. The binary is in main.rs.

#[macro_use]
extern crate log;

pub mod config;
pub mod constants;
pub mod decoder;
pub mod error;
pub mod event;
pub mod filters;
pub mod player;
pub mod queue;
pub mod sink;
pub mod source;
pub mod track;

// Test modules
#[cfg(test)]
mod test_support;

#[cfg(test)]
mod sink_tests;

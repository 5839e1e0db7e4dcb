//! External decoder process producing 48 kHz stereo s16le PCM frames.
//!
//! The process writes raw samples to its stdout, which is read one fixed-size
//! frame at a time. When the input is a byte stream rather than a path or URL,
//! a writer thread copies it into the process's stdin.

use std::fmt::{Debug, Formatter};
use std::io::{self, BufRead, BufReader, ErrorKind, Read, Write};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use crate::{
    config::DecoderConfig,
    constants::{CHANNELS, FRAME_DURATION_SECS, FRAME_SIZE, SAMPLE_RATE, STDIN_CHUNK_SIZE},
    error::PlaybackError,
    filters::FilterGraph,
};

/// Input token telling the decoder to read from its stdin.
const STDIN_INPUT: &str = "-";
const STDOUT_OUTPUT: &str = "pipe:1";

pub type ByteStream = Box<dyn Read + Send>;

/// Where the decoder reads its input from.
pub enum DecoderInput {
    /// File path or URL handed to the decoder as-is
    Locator(String),
    /// Bytes pushed into the decoder's stdin
    Stream(ByteStream),
}

impl DecoderInput {
    fn is_piped(&self) -> bool {
        matches!(self, DecoderInput::Stream(_))
    }

    fn token(&self) -> &str {
        match self {
            DecoderInput::Locator(locator) => locator,
            DecoderInput::Stream(_) => STDIN_INPUT,
        }
    }
}

impl Debug for DecoderInput {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DecoderInput::Locator(locator) => f.debug_tuple("Locator").field(locator).finish(),
            DecoderInput::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Composes the decoder argument vector (without the executable).
pub fn build_args(
    input: &str,
    filter_args: &[String],
    offset: f64,
    config: &DecoderConfig,
) -> Vec<String> {
    let mut args = config.before_options.clone();

    args.extend(["-ss".to_string(), offset.to_string()]);
    args.extend(["-i".to_string(), input.to_string()]);
    args.extend([
        "-f".to_string(),
        "s16le".to_string(),
        "-ar".to_string(),
        SAMPLE_RATE.to_string(),
        "-ac".to_string(),
        CHANNELS.to_string(),
        "-loglevel".to_string(),
        "warning".to_string(),
    ]);
    args.extend(filter_args.iter().cloned());
    args.extend(config.options.iter().cloned());
    args.push(STDOUT_OUTPUT.to_string());

    args
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecoderState {
    /// Process spawned, nothing read yet
    Created,
    /// At least one full frame has been read
    Reading,
    /// A read came up short, the stream is over
    Exhausted,
    /// Cleaned up, the process is gone
    Terminated,
}

pub struct DecoderProcess {
    executable: String,
    child: Arc<Mutex<Child>>,
    stdout: Option<ChildStdout>,
    /// Tells the stdin writer to stop feeding
    terminated: Arc<AtomicBool>,
    state: DecoderState,
    /// Speed multiplier of the filter graph the process was spawned with
    frame_weight: f64,
    /// Position in the source, in seconds
    offset: f64,
}

impl Debug for DecoderProcess {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderProcess")
            .field("executable", &self.executable)
            .field("state", &self.state)
            .field("frame_weight", &self.frame_weight)
            .field("offset", &self.offset)
            .finish()
    }
}

impl DecoderProcess {
    /// Spawns the decoder for `input`, starting `offset` seconds in, with the
    /// filter chain of `graph`.
    pub fn spawn(
        input: DecoderInput,
        graph: &FilterGraph,
        offset: f64,
        config: &DecoderConfig,
    ) -> Result<DecoderProcess, PlaybackError> {
        let executable = config.executable.clone();
        let args = build_args(input.token(), &graph.args(), offset, config);

        debug!("Spawning decoder: {executable} {}", args.join(" "));

        let stdin = if input.is_piped() {
            Stdio::piped()
        } else {
            Stdio::null()
        };

        let mut child = Command::new(&executable)
            .args(&args)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| match source.kind() {
                ErrorKind::NotFound => PlaybackError::ExecutableNotFound {
                    executable: executable.clone(),
                },
                _ => PlaybackError::ProcessSpawn {
                    executable: executable.clone(),
                    source,
                },
            })?;

        let pipes = take_pipes(&mut child, input.is_piped());
        let (stdout, stderr, stdin) = match pipes {
            Ok(pipes) => pipes,
            Err(e) => {
                kill(&mut child);
                return Err(e);
            }
        };

        if let Some(stderr) = stderr {
            drain_stderr(executable.clone(), stderr);
        }

        let child = Arc::new(Mutex::new(child));
        let terminated = Arc::new(AtomicBool::new(false));

        if let (DecoderInput::Stream(source), Some(stdin)) = (input, stdin) {
            let writer_child = child.clone();
            let writer_terminated = terminated.clone();
            let spawned = thread::Builder::new()
                .name("decoder-stdin-writer".to_string())
                .spawn(move || pipe_writer(source, stdin, writer_child, writer_terminated));

            if let Err(source) = spawned {
                kill(&mut lock(&child));
                return Err(PlaybackError::ProcessSpawn { executable, source });
            }
        }

        Ok(DecoderProcess {
            executable,
            child,
            stdout: Some(stdout),
            terminated,
            state: DecoderState::Created,
            frame_weight: graph.speed(),
            offset,
        })
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn frame_weight(&self) -> f64 {
        self.frame_weight
    }

    /// Seconds of source audio covered so far, including the starting offset.
    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Reads exactly `frames` frames. Returns an empty buffer once the stream
    /// is over, or without reading when `frames` frames cannot be addressed;
    /// a partial frame is never returned.
    pub fn read_frames(&mut self, frames: usize) -> Vec<u8> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Vec::new();
        };

        let Some(len) = FRAME_SIZE.checked_mul(frames) else {
            warn!("Refusing to read {frames} frames of {} output", self.executable);
            return Vec::new();
        };

        let mut buf = vec![0; len];
        match stdout.read_exact(&mut buf) {
            Ok(()) => {
                self.advance(frames);
                self.state = DecoderState::Reading;
                buf
            }
            Err(e) => {
                if e.kind() == ErrorKind::UnexpectedEof {
                    debug!("{} output exhausted at {:.2}s", self.executable, self.offset);
                } else {
                    warn!("Error while reading {} output: {e}", self.executable);
                }
                self.exhaust();
                Vec::new()
            }
        }
    }

    /// Reads a single frame, see [`DecoderProcess::read_frames`].
    pub fn read_frame(&mut self) -> Vec<u8> {
        self.read_frames(1)
    }

    /// Discards `frames` frames of output. Returns false if the stream ended
    /// before all of them were skipped.
    pub fn skip_frames(&mut self, frames: usize) -> bool {
        let Some(stdout) = self.stdout.as_mut() else {
            return false;
        };

        let Some(wanted) = FRAME_SIZE.checked_mul(frames) else {
            warn!("Refusing to skip {frames} frames of {} output", self.executable);
            return false;
        };
        let wanted = wanted as u64;
        let skipped = io::copy(&mut Read::take(stdout, wanted), &mut io::sink());
        match skipped {
            Ok(skipped) if skipped == wanted => {
                self.advance(frames);
                true
            }
            Ok(_) => {
                self.exhaust();
                false
            }
            Err(e) => {
                warn!("Error while skipping {} output: {e}", self.executable);
                self.exhaust();
                false
            }
        }
    }

    fn advance(&mut self, frames: usize) {
        self.offset += frames as f64 * self.frame_weight * FRAME_DURATION_SECS;
    }

    fn exhaust(&mut self) {
        if self.state != DecoderState::Terminated {
            self.state = DecoderState::Exhausted;
        }
    }

    /// Terminates the process if it is still running and releases its pipes.
    /// Safe to call any number of times.
    pub fn cleanup(&mut self) {
        if self.state == DecoderState::Terminated {
            return;
        }

        self.terminated.store(true, Ordering::Release);
        self.stdout = None;

        let mut child = lock(&self.child);
        match child.try_wait() {
            Ok(Some(status)) => trace!("{} already exited: {status}", self.executable),
            _ => kill(&mut child),
        }
        // Reap the process so it doesn't linger as a zombie
        if let Err(e) = child.wait() {
            warn!("Failed to wait for {}: {e}", self.executable);
        }

        self.state = DecoderState::Terminated;
    }
}

impl Drop for DecoderProcess {
    fn drop(&mut self) {
        self.cleanup();
    }
}

type Pipes = (ChildStdout, Option<BufReader<ChildStderr>>, Option<ChildStdin>);

fn take_pipes(child: &mut Child, piped: bool) -> Result<Pipes, PlaybackError> {
    let stdout = child.stdout.take().ok_or(PlaybackError::MissingPipe("stdout"))?;
    let stderr = child.stderr.take().map(BufReader::new);
    let stdin = if piped {
        Some(child.stdin.take().ok_or(PlaybackError::MissingPipe("stdin"))?)
    } else {
        None
    };

    Ok((stdout, stderr, stdin))
}

fn lock(child: &Mutex<Child>) -> MutexGuard<'_, Child> {
    child.lock().unwrap_or_else(PoisonError::into_inner)
}

fn kill(child: &mut Child) {
    // InvalidInput means the process has already exited
    if let Err(e) = child.kill() {
        if e.kind() != ErrorKind::InvalidInput {
            warn!("Failed to kill decoder process: {e}");
        }
    }
}

/// Copies `source` into the decoder's stdin until the decoder gets cleaned up.
/// An empty or failed read from `source`, or a failed write, kills the process
/// so the frame reader sees the end of the stream.
fn pipe_writer(
    mut source: ByteStream,
    mut stdin: ChildStdin,
    child: Arc<Mutex<Child>>,
    terminated: Arc<AtomicBool>,
) {
    let mut buf = [0; STDIN_CHUNK_SIZE];

    while !terminated.load(Ordering::Acquire) {
        let len = match source.read(&mut buf) {
            Ok(0) => {
                debug!("Input stream exhausted, stopping decoder");
                kill(&mut lock(&child));
                return;
            }
            Ok(len) => len,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("Error while reading input stream: {e}");
                kill(&mut lock(&child));
                return;
            }
        };

        if let Err(e) = stdin.write_all(&buf[..len]) {
            // The reader sees this as the end of the stream
            debug!("Failed to write to decoder stdin: {e}");
            kill(&mut lock(&child));
            return;
        }
    }
}

/// Logs the decoder's stderr line by line until the process closes it.
fn drain_stderr(executable: String, stderr: BufReader<ChildStderr>) {
    let spawned = thread::Builder::new()
        .name("decoder-stderr".to_string())
        .spawn(move || {
            for line in stderr.lines() {
                match line {
                    Ok(line) => warn!("{executable}: {line}"),
                    Err(_) => break,
                }
            }
        });

    if let Err(e) = spawned {
        warn!("Failed to start decoder stderr logger: {e}");
    }
}

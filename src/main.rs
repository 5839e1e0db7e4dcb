use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufWriter;

use jukebox::{
    config::{self, Config},
    event::{self, Event, EventBus},
    player::{self, Player, PlayerNotice},
    sink::{PacedSink, WavStreamWriter},
    source::{DirectSourceManager, SourceManager},
};

#[macro_use]
extern crate log;

const USAGE: &str = "Usage: jukebox [--out <file.wav>] <path|url|directory>...";

struct Args {
    out: Option<String>,
    queries: Vec<String>,
}

fn parse_args() -> Result<Args> {
    let mut out = None;
    let mut queries = vec![];

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--out" | "-o" => out = Some(args.next().context(USAGE)?),
            "--help" | "-h" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            _ => queries.push(arg),
        }
    }

    if queries.is_empty() {
        anyhow::bail!(USAGE);
    }

    Ok(Args { out, queries })
}

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();

    let args = parse_args()?;

    let config = match config::load().await {
        Ok(config) => config,
        Err(e) => {
            info!("Using default config: {e:#}");
            Config::default()
        }
    };

    let bus = EventBus::new();
    event::debug(&bus);

    let sink = match &args.out {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("Failed to create {path}"))?;
            PacedSink::new(
                bus.clone(),
                WavStreamWriter::new(BufWriter::new(file)),
                config.output.paced,
            )
        }
        None => PacedSink::new(
            bus.clone(),
            WavStreamWriter::new(std::io::stdout()),
            config.output.paced,
        ),
    };

    let sources = DirectSourceManager;
    let mut tracks = vec![];
    for query in &args.queries {
        if std::path::Path::new(query).is_dir() {
            tracks.extend(sources.get_playlist(query).await?.tracks);
        } else {
            tracks.push(sources.get_track(query).await?);
        }
    }

    if tracks.is_empty() {
        anyhow::bail!("Nothing to play");
    }

    let mut notices = bus.subscribe();
    let player = player::init(&bus, Player::new(bus.clone(), config.decoder, sink));

    // Starting a track spawns its decoder, keep that off the runtime threads
    let starter = player.clone();
    tokio::task::spawn_blocking(move || {
        let mut player = player::lock(&starter);
        let tracks = tracks.into_iter().map(|track| track.into_shared());

        if let Err(e) = player.add_to_queue(tracks, true) {
            warn!("Failed to start first track: {e}");
            player.play_next_playable();
        }
    })
    .await
    .context("Failed to start playback")?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping playback");
                break;
            }
            event = notices.recv() => match event {
                Some(Event::Notice(PlayerNotice::QueueEnded)) | None => break,
                _ => {}
            },
        }
    }

    tokio::task::spawn_blocking(move || player::lock(&player).stop())
        .await
        .context("Failed to stop playback")?;

    Ok(())
}

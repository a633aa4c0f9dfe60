mod config;
mod lyrics;
mod metadata;
mod ncm;
mod player;
mod queue;
mod session;
mod storage;

use anyhow::Context;
use clap::{Parser, Subcommand};
use metadata::MetadataFacade;
use ncm::api::NcmClient;
use ncm::models::TrackRef;
use player::mpv::MpvBackend;
use queue::SharedQueue;
use session::{Notice, PlaybackSession, PlaybackStatus};
use std::io::Write as _;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "nimbus", version, about = "Cloud music player for the terminal")]
struct Cli {
    /// Override config file path.
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Account authentication.
    Auth {
        #[command(subcommand)]
        cmd: AuthCommand,
    },
    /// Search the catalog and print tracks.
    Search {
        query: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 10)]
        page_size: u32,
    },
    /// Play one or more tracks by id, with synced lyrics on stdout.
    Play {
        ids: Vec<u64>,
        /// Stop after the first track instead of advancing through the rest.
        #[arg(long)]
        no_queue_mode: bool,
        /// Queue position to start from.
        #[arg(long, default_value_t = 0)]
        start: usize,
    },
    /// Manage and play named playlists.
    Playlist {
        #[command(subcommand)]
        cmd: PlaylistCommand,
    },
    /// Print a track's synchronized lyrics.
    Lyrics { id: u64 },
    /// Report what resolves for a track (stream, lyrics, artwork).
    Info { id: u64 },
    /// Download a track's audio to disk.
    Download {
        id: u64,
        #[arg(long, default_value = ".")]
        dir: std::path::PathBuf,
    },
    /// Audio output device management (mpv).
    Audio {
        #[command(subcommand)]
        cmd: AudioCommand,
    },
}

#[derive(Debug, Subcommand)]
enum AudioCommand {
    /// List mpv audio devices.
    List,
    /// Set mpv audio device (name as shown in list).
    Set { device: String },
    /// Clear mpv audio device override.
    Clear,
}

#[derive(Debug, Subcommand)]
enum AuthCommand {
    /// Log in with a cellphone account and store the session cookie.
    Login {
        #[arg(long)]
        phone: String,
        #[arg(long)]
        password: String,
    },
    /// Forget the stored session.
    Logout,
    /// Show whether a stored session exists.
    Status,
}

#[derive(Debug, Subcommand)]
enum PlaylistCommand {
    Create { name: String },
    Delete { name: String },
    List,
    Show { name: String },
    /// Add tracks by id (duplicates are ignored).
    Add { name: String, ids: Vec<u64> },
    Remove { name: String, id: u64 },
    /// Play the whole playlist in queue mode.
    Play {
        name: String,
        /// Queue position to start from.
        #[arg(long, default_value_t = 0)]
        start: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref()).context("load config")?;

    match cli.command {
        Command::Auth { cmd } => handle_auth(&cfg, cmd).await?,
        Command::Search {
            query,
            page,
            page_size,
        } => {
            let client = make_client(&cfg)?;
            let tracks = client.search(&query, page, page_size).await?;
            if tracks.is_empty() {
                println!("No matching tracks.");
            } else {
                print_tracks(&tracks);
            }
        }
        Command::Play {
            ids,
            no_queue_mode,
            start,
        } => {
            anyhow::ensure!(!ids.is_empty(), "pass at least one track id");
            let client = make_client(&cfg)?;
            let tracks = refs_for_ids(&client, &ids).await;
            run_player(&cfg, client, tracks, !no_queue_mode, start).await?;
        }
        Command::Playlist { cmd } => handle_playlist(&cfg, cmd).await?,
        Command::Lyrics { id } => {
            let client = make_client(&cfg)?;
            let raw = client.lyric(id).await?;
            let track = lyrics::LyricTrack::parse(&raw);
            if track.is_empty() {
                println!("No lyrics available.");
            } else {
                for line in track.lines() {
                    println!("[{}] {}", format_time(line.time_ms as f64 / 1000.0), line.text);
                }
            }
        }
        Command::Info { id } => {
            let client = make_client(&cfg)?;
            let track = first_ref(&client, id).await;
            let facade = MetadataFacade::new(client, cfg.playback.url_cache_size);
            let resolved = facade.resolve_for_track(&track).await;
            println!("{}", track.name);
            match resolved.audio_url {
                Ok(url) => println!("  stream:  {url}"),
                Err(e) => println!("  stream:  unavailable ({e})"),
            }
            match resolved.lyrics {
                Ok(l) if !l.is_empty() => println!("  lyrics:  {} lines", l.len()),
                Ok(_) => println!("  lyrics:  none"),
                Err(e) => println!("  lyrics:  unavailable ({e})"),
            }
            match resolved.artwork {
                Ok(bytes) => println!("  artwork: {} bytes", bytes.len()),
                Err(e) => println!("  artwork: unavailable ({e})"),
            }
        }
        Command::Download { id, dir } => {
            let client = make_client(&cfg)?;
            let track = first_ref(&client, id).await;
            let url = client.song_url(id).await?;
            let path = ncm::download::download_audio(client.http(), &url, &dir, &track.name).await?;
            println!("Saved {}", path.display());
        }
        Command::Audio { cmd } => match cmd {
            AudioCommand::List => {
                let out = tokio::process::Command::new("mpv")
                    .args(["--audio-device=help", "--no-video", "--idle=no"])
                    .output()
                    .await
                    .context("run mpv --audio-device=help")?;
                print!("{}", String::from_utf8_lossy(&out.stdout));
                eprint!("{}", String::from_utf8_lossy(&out.stderr));
            }
            AudioCommand::Set { device } => {
                let mut cfg = cfg;
                cfg.player.audio_device = Some(device);
                config::save(&cfg, cli.config.as_deref()).context("save config")?;
                println!("Updated audio device in config.");
            }
            AudioCommand::Clear => {
                let mut cfg = cfg;
                cfg.player.audio_device = None;
                config::save(&cfg, cli.config.as_deref()).context("save config")?;
                println!("Cleared audio device override.");
            }
        },
    }

    Ok(())
}

fn make_client(cfg: &config::Config) -> anyhow::Result<NcmClient> {
    let session = ncm::auth::load_session(&cfg.cookie_path()).unwrap_or_else(ncm::auth::anonymous);
    NcmClient::new(Some(session))
}

async fn handle_auth(cfg: &config::Config, cmd: AuthCommand) -> anyhow::Result<()> {
    match cmd {
        AuthCommand::Login { phone, password } => {
            let client = NcmClient::new(None)?;
            let credentials = ncm::auth::Credentials { phone, password };
            let session = ncm::auth::login(client.http(), &credentials).await?;
            ncm::auth::save_session(&session, &cfg.cookie_path()).context("store session")?;
            println!("Logged in.");
        }
        AuthCommand::Logout => {
            ncm::auth::clear_session(&cfg.cookie_path())?;
            println!("Session cleared.");
        }
        AuthCommand::Status => match ncm::auth::load_session(&cfg.cookie_path()) {
            Some(s) if s.is_authenticated() => println!("Logged in (stored session)."),
            Some(_) => println!("Stored session found, but it is not authenticated."),
            None => println!("Not logged in."),
        },
    }
    Ok(())
}

async fn handle_playlist(cfg: &config::Config, cmd: PlaylistCommand) -> anyhow::Result<()> {
    let store = storage::PlaylistStore::open(&cfg.playlist_db_path())?;
    match cmd {
        PlaylistCommand::Create { name } => {
            if store.create(&name, now_unix())? {
                println!("Created '{name}'.");
            } else {
                println!("Playlist '{name}' already exists.");
            }
        }
        PlaylistCommand::Delete { name } => {
            store.delete(&name)?;
            println!("Deleted '{name}'.");
        }
        PlaylistCommand::List => {
            let names = store.playlists()?;
            if names.is_empty() {
                println!("No playlists yet.");
            }
            for name in names {
                println!("{name}  ({} tracks)", store.tracks(&name)?.len());
            }
        }
        PlaylistCommand::Show { name } => {
            anyhow::ensure!(store.exists(&name)?, "no playlist named '{name}'");
            for (i, t) in store.tracks(&name)?.iter().enumerate() {
                println!("{:02}. {}  (id={})", i + 1, t.name, t.id);
            }
        }
        PlaylistCommand::Add { name, ids } => {
            anyhow::ensure!(store.exists(&name)?, "no playlist named '{name}'");
            anyhow::ensure!(!ids.is_empty(), "pass at least one track id");
            let client = make_client(cfg)?;
            for track in refs_for_ids(&client, &ids).await {
                if store.add(&name, &track)? {
                    println!("Added {}", track.name);
                } else {
                    println!("Skipped {} (already in '{name}')", track.name);
                }
            }
        }
        PlaylistCommand::Remove { name, id } => {
            store.remove(&name, id)?;
            println!("Removed id={id} from '{name}'.");
        }
        PlaylistCommand::Play { name, start } => {
            let tracks = store.tracks(&name)?;
            anyhow::ensure!(!tracks.is_empty(), "playlist '{name}' is empty");
            let client = make_client(cfg)?;
            run_player(cfg, client, tracks, true, start).await?;
        }
    }
    Ok(())
}

/// Drive a playback session to completion, echoing progress, synced lyric
/// lines, and notices to the terminal.
async fn run_player(
    cfg: &config::Config,
    client: NcmClient,
    tracks: Vec<TrackRef>,
    queue_mode: bool,
    start: usize,
) -> anyhow::Result<()> {
    anyhow::ensure!(!tracks.is_empty(), "nothing to play");

    let backend = MpvBackend::spawn(
        cfg.player.audio_device.as_deref(),
        Some(&cfg.mpv_log_path()),
    )
    .await
    .context("start mpv")?;

    let queue = SharedQueue::new();
    queue.replace(tracks, None);
    queue.select(start).context("start position")?;
    let first = queue.current().context("selected track")?;

    println!("Playing {} track(s):", queue.len());
    for (i, t) in queue.snapshot().iter().enumerate() {
        let marker = if i == start { ">" } else { " " };
        println!("{marker} {:02}. {}", i + 1, t.name);
    }

    let facade = MetadataFacade::new(client, cfg.playback.url_cache_size);
    let (session, mut notices) =
        PlaybackSession::new(backend, facade, queue, cfg.playback.tuning());
    let _ = session.set_volume(cfg.player.volume).await;
    session.set_queue_mode(queue_mode);
    session.play(first);

    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    let mut started = false;
    let mut last_lyric: Option<String> = None;

    loop {
        tokio::select! {
            Some(notice) = notices.recv() => match notice {
                Notice::LoadFailed { track, reason } => {
                    eprintln!("\nload failed: {} ({reason})", track.name);
                }
                Notice::TransportFailed { reason } => {
                    eprintln!("\nplayback error: {reason}");
                }
                Notice::MetadataDegraded { field, .. } => {
                    eprintln!("\n({field} unavailable)");
                }
                Notice::EndOfQueue => {
                    println!("\nend of queue");
                }
            },
            _ = ticker.tick() => {
                let st = session.state();
                match st.status {
                    PlaybackStatus::Loading => started = true,
                    PlaybackStatus::Playing | PlaybackStatus::Paused => {
                        started = true;
                        if let Some(line) = session.current_lyric_line()
                            && !line.is_empty()
                            && last_lyric.as_deref() != Some(line.as_str())
                        {
                            println!("\n  {line}");
                            last_lyric = Some(line);
                        }
                        if let Some(track) = &st.current_track {
                            print!(
                                "\r{} / {}  {}    ",
                                format_time(st.position_secs),
                                format_time(st.duration_secs),
                                track.name
                            );
                            let _ = std::io::stdout().flush();
                        }
                    }
                    PlaybackStatus::Stopped => {
                        if started {
                            println!();
                            break;
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

async fn refs_for_ids(client: &NcmClient, ids: &[u64]) -> Vec<TrackRef> {
    let details = match client.track_details(ids).await {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(error = %e, "track detail lookup failed; using bare ids");
            Vec::new()
        }
    };
    ids.iter()
        .map(|&id| {
            details
                .iter()
                .find(|s| s.id == id)
                .map(|s| s.to_ref())
                .unwrap_or_else(|| TrackRef {
                    id,
                    name: format!("track {id}"),
                })
        })
        .collect()
}

async fn first_ref(client: &NcmClient, id: u64) -> TrackRef {
    refs_for_ids(client, &[id]).await.remove(0)
}

fn print_tracks(tracks: &[ncm::models::TrackSummary]) {
    for (i, t) in tracks.iter().enumerate() {
        let album = t
            .album
            .as_deref()
            .map(|a| format!("  [{a}]"))
            .unwrap_or_default();
        let duration = t
            .duration_seconds
            .map(|d| format!("  {}", format_time(d as f64)))
            .unwrap_or_default();
        println!(
            "{:02}. {}{}{}  (id={})",
            i + 1,
            t.display_line(),
            album,
            duration,
            t.id
        );
    }
}

fn format_time(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

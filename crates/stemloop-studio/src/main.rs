//! Stemloop Studio - interactive stem session console
//!
//! Wires the core library together: loads the config, fetches the stem
//! catalog (falling back to the offline placeholder catalog), opens the
//! audio output, and runs a line-oriented command loop while draining
//! session events.

use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam::channel::{unbounded, Receiver};

use stemloop_core::audition::AuditionOutcome;
use stemloop_core::catalog::{self, CatalogClient, HttpStemFetcher};
use stemloop_core::config::{load_config, StudioConfig};
use stemloop_core::render::CacheDecision;
use stemloop_core::session::{MuteOutcome, RenderHint, SessionEvent, StemSession};
use stemloop_core::types::{PreviewQuality, PreviewSection, TrackId};
use stemloop_core::HttpRenderBackend;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    log::info!("stemloop-studio starting up");

    let config: StudioConfig = match StudioConfig::default_path() {
        Some(path) => load_config(&path),
        None => StudioConfig::default(),
    };

    let catalog_client = CatalogClient::new(config.backend_url.clone());
    let tracks = match catalog_client.fetch_catalog() {
        Ok(tracks) => tracks,
        Err(e) => {
            log::warn!("Catalog fetch failed ({}), using offline catalog", e);
            catalog::fallback_catalog()
        }
    };

    let mut session = StemSession::new(
        tracks,
        Arc::new(HttpRenderBackend::new(config.backend_url.clone())),
        Arc::new(HttpStemFetcher::new(config.backend_url.clone())),
        CatalogClient::new(config.backend_url.clone()),
        config.default_bpm,
        config.default_key.clone(),
    );
    session.set_preview_quality(config.preview_quality);
    session.set_preview_section(config.preview_section);

    // Keep the stream handle alive for the whole run. Without a device
    // the session still works, just silently.
    let _output = match session.engine().start_output() {
        Ok(handle) => Some(handle),
        Err(e) => {
            log::warn!("No audio output ({}), continuing silent", e);
            None
        }
    };

    println!("stemloop studio - type 'help' for commands");
    run_repl(&mut session)
}

/// Feed stdin lines through a channel so the main loop can keep pumping
/// session events while idle
fn stdin_lines() -> Receiver<String> {
    let (tx, rx) = unbounded();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
    rx
}

fn run_repl(session: &mut StemSession) -> Result<()> {
    let lines = stdin_lines();
    prompt();

    loop {
        for event in session.pump_events(Instant::now()) {
            report(&event);
        }

        let line = match lines.recv_timeout(Duration::from_millis(100)) {
            Ok(line) => line,
            Err(crossbeam::channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam::channel::RecvTimeoutError::Disconnected) => break,
        };

        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else {
            prompt();
            continue;
        };
        let args: Vec<&str> = parts.collect();

        match command {
            "help" => print_help(),
            "tracks" => print_tracks(session),
            "select" => match (parse_index(&args, 0), parse_index(&args, 1)) {
                (Some(track), Some(stem)) => session.select_stem(TrackId(track), stem),
                _ => println!("usage: select <track> <stem>"),
            },
            "random" => match parse_index(&args, 0) {
                Some(track) => session.randomize_stem(TrackId(track)),
                None => session.randomize_all(Instant::now()),
            },
            "mute" => match parse_index(&args, 0) {
                Some(track) => match session.toggle_mute(TrackId(track)) {
                    MuteOutcome::RenderSuggested(RenderHint::Preview) => {
                        println!("unmuted; run 'generate' to hear this track");
                    }
                    MuteOutcome::RenderSuggested(RenderHint::Full) => {
                        println!("unmuted; this track was skipped by the preview, run 'generatefull'");
                    }
                    MuteOutcome::Ignored => println!("no such track"),
                    _ => {}
                },
                None => println!("usage: mute <track>"),
            },
            "bpm" => match args.first().and_then(|s| s.parse().ok()) {
                Some(bpm) => session.set_bpm(bpm, Instant::now()),
                None => println!("usage: bpm <number>"),
            },
            "key" => {
                if args.is_empty() {
                    println!("current key: {}", session.key());
                } else {
                    session.set_key(&args.join(" "), Instant::now());
                }
            }
            "section" => match args.first() {
                Some(&"start") => session.set_preview_section(PreviewSection::Start),
                Some(&"middle") => session.set_preview_section(PreviewSection::Middle),
                Some(&"end") => session.set_preview_section(PreviewSection::End),
                _ => println!("usage: section start|middle|end"),
            },
            "quality" => match args.first() {
                Some(&"10s") => session.set_preview_quality(PreviewQuality::Short),
                Some(&"30s") => session.set_preview_quality(PreviewQuality::Long),
                _ => println!("usage: quality 10s|30s"),
            },
            "generate" => issue_render(session, true),
            "generatefull" => issue_render(session, false),
            "play" => match session.start_playback() {
                Ok(()) => println!("scheduled for the next bar"),
                Err(e) => println!("cannot play: {}", e),
            },
            "stop" => session.stop_playback(),
            "preview" => match parse_index(&args, 0) {
                Some(track) => match session.toggle_audition(TrackId(track)) {
                    AuditionOutcome::Started => println!("previewing"),
                    AuditionOutcome::LoadStarted => println!("loading original stem..."),
                    AuditionOutcome::Stopped => println!("preview stopped"),
                    AuditionOutcome::Unavailable => println!("nothing to preview on that track"),
                },
                None => println!("usage: preview <track>"),
            },
            "reset" => session.reset_to_defaults(),
            "fingerprint" => println!("{}", session.build_fingerprint()),
            "export" => match session.export_payload() {
                Ok(payload) => println!(
                    "export ready: {} stem(s), {} BPM, {}",
                    payload.stem_count, payload.target_bpm, payload.target_key
                ),
                Err(e) => println!("cannot export: {}", e),
            },
            "quit" | "exit" => break,
            other => println!("unknown command '{}', try 'help'", other),
        }
        prompt();
    }

    session.stop_playback();
    log::info!("stemloop-studio shutting down");
    Ok(())
}

fn issue_render(session: &mut StemSession, preview: bool) {
    match session.generate(preview) {
        Ok(CacheDecision::Issue) => println!("render requested..."),
        Ok(CacheDecision::JoinPending) => println!("already rendering this configuration"),
        Ok(CacheDecision::AlreadyComplete) => println!("this configuration is already rendered"),
        Err(e) => println!("cannot render: {}", e),
    }
}

fn report(event: &SessionEvent) {
    match event {
        SessionEvent::RenderFinished {
            preview,
            installed,
            failures,
        } => {
            println!(
                "\n{} render done: {} stem(s) ready",
                if *preview { "preview" } else { "full" },
                installed
            );
            for (name, reason) in failures {
                println!("  {} failed: {}", name, reason);
            }
            prompt();
        }
        SessionEvent::RenderFailed { preview, error } => {
            println!(
                "\n{} render failed: {}",
                if *preview { "preview" } else { "full" },
                error
            );
            prompt();
        }
        SessionEvent::PreviewCacheInvalidated => {
            println!("\ntempo/key changed; previews need regenerating");
            prompt();
        }
        SessionEvent::AuditionStarted { track } => {
            println!("\npreview playing on {}", track);
            prompt();
        }
        SessionEvent::AuditionEnded { track } => {
            println!("\npreview finished on {}", track);
            prompt();
        }
        SessionEvent::AuditionUnavailable { track } => {
            println!("\npreview unavailable on {}", track);
            prompt();
        }
    }
}

fn print_tracks(session: &StemSession) {
    for track in session.tracks() {
        let state = if track.muted { "muted" } else { "     " };
        let selected = track
            .selected
            .map(|i| i.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "[{}] {:15} {} stem {} of {}",
            track.id.0,
            track.name,
            state,
            selected,
            track.stems.len()
        );
    }
    println!("BPM {} | {}", session.bpm(), session.key());
}

fn print_help() {
    println!("tracks                 show the track table");
    println!("select <track> <stem>  pick a stem");
    println!("random [track]         randomize one track, or everything");
    println!("mute <track>           toggle mute");
    println!("bpm <n> / key <name>   set tempo or key");
    println!("section start|middle|end  excerpt position");
    println!("quality 10s|30s        excerpt length");
    println!("generate / generatefull   request a render");
    println!("play / stop            synchronized mix playback");
    println!("preview <track>        audition one stem");
    println!("reset                  restore default mutes");
    println!("fingerprint            show the configuration identity");
    println!("export                 build the export payload");
    println!("quit");
}

fn parse_index(args: &[&str], position: usize) -> Option<usize> {
    args.get(position).and_then(|s| s.parse().ok())
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

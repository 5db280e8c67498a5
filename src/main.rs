//! CLI entry point.
//!
//! Wires a [`patchline::script::ScriptEngine`] to the default cpal output
//! device (grounded in the teacher's `AudioEngine::build_stream`,
//! `.teacher_ref/audio.rs`), loads an optional patch file and starts
//! watching it for changes (`.teacher_ref/live.rs`'s `LiveSession::run`
//! polling loop), and drops into a `"-> "` REPL matching the original
//! source's `LuaEngine::loop()`.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use clap::Parser;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use patchline::renderer::Renderer;
use patchline::script::ScriptEngine;
use patchline::watcher::Watcher;
use patchline::CHANNELS;

const MAX_VOICES: usize = 64;
const REPL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A live-coded modular audio synthesizer.
#[derive(Parser, Debug)]
#[command(name = "patchline", version, about = "A live-coded modular audio synthesizer")]
struct Cli {
    /// An optional Lua patch to load and watch for changes at startup.
    path: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let mut engine = ScriptEngine::new(MAX_VOICES).expect("failed to start the Lua script host");

    // A device-init failure is logged and swallowed rather than aborting:
    // the REPL and watcher are still useful against a graph nobody renders.
    let _stream = match build_output_stream(&engine) {
        Ok(stream) => Some(stream),
        Err(err) => {
            tracing::error!("audio device unavailable, continuing without sound: {err}");
            None
        }
    };

    let mut watcher = None;
    if let Some(path) = &cli.path {
        if engine.run_file(path) {
            tracing::info!("loaded {}", path.display());
        }
        match Watcher::spawn(path) {
            Ok(w) => watcher = Some(w),
            Err(err) => tracing::error!("failed to watch {}: {err}", path.display()),
        }
    }

    repl(&mut engine, &watcher, cli.path.as_deref());
}

fn build_output_stream(
    engine: &ScriptEngine,
) -> Result<cpal::Stream, Box<dyn std::error::Error>> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or("no audio output device found")?;
    tracing::info!("audio device: {}", device.name()?);

    let config = device.default_output_config()?;
    tracing::info!("audio config: {:?}", config);

    let renderer = Renderer::new(engine.snapshot_handle());
    let channels = config.channels() as usize;

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => {
            build_stream::<f32>(&device, &config.into(), renderer, channels)?
        }
        cpal::SampleFormat::I16 => {
            build_stream::<i16>(&device, &config.into(), renderer, channels)?
        }
        cpal::SampleFormat::U16 => {
            build_stream::<u16>(&device, &config.into(), renderer, channels)?
        }
        other => return Err(format!("unsupported sample format: {other:?}").into()),
    };

    stream.play()?;
    Ok(stream)
}

/// One renderer-backed callback per device sample format, following the
/// teacher's own `AudioEngine::build_stream` generic-over-`T` shape.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    renderer: Renderer,
    device_channels: usize,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let mut scratch: Vec<f32> = Vec::new();

    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let frame_count = data.len() / device_channels;
            scratch.clear();
            scratch.resize(frame_count * CHANNELS, 0.0);
            renderer.render(&mut scratch, frame_count);

            for (frame_idx, frame) in data.chunks_mut(device_channels).enumerate() {
                let sample = scratch[frame_idx * CHANNELS];
                for out in frame.iter_mut() {
                    *out = T::from_sample(sample);
                }
            }
        },
        |err| tracing::error!("audio stream error: {err}"),
        None,
    )
}

/// Read stdin lines off the main thread's loop so the REPL can still poll
/// the watcher channel between keystrokes instead of blocking forever on
/// `Stdin::lines()`.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let stdin = io::stdin();
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

fn repl(engine: &mut ScriptEngine, watcher: &Option<Watcher>, watched_path: Option<&Path>) {
    println!("patchline -- type Lua, or 'exit' to quit");
    let stdin_rx = spawn_stdin_reader();

    print!("-> ");
    io::stdout().flush().ok();

    loop {
        if let Some(w) = watcher {
            if w.try_recv().is_some() {
                if let Some(path) = watched_path {
                    match engine.reload(path) {
                        Ok(true) => tracing::info!("reloaded {}", path.display()),
                        Ok(false) => tracing::warn!(
                            "reload of {} hit a script error; graph left empty",
                            path.display()
                        ),
                        Err(err) => tracing::error!("failed to rebuild the script host: {err}"),
                    }
                }
            }
        }

        match stdin_rx.recv_timeout(REPL_POLL_INTERVAL) {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed == "exit" {
                    break;
                }
                if !trimmed.is_empty() {
                    engine.run_string(trimmed);
                }
                print!("-> ");
                io::stdout().flush().ok();
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

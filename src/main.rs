//! softpcm - Software PCM device CLI

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, RecvTimeoutError};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use softpcm::audio::{
    non_silent_frames, ChannelSession, DeviceContext, Direction, PcmHardware, PcmStream,
    ToneGenerator,
};
use softpcm::config::{Args, Command, DeviceConfig};
use softpcm::sync::DriftTracker;

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command.clone().unwrap_or_default() {
        Command::Caps => {
            init_logging(&args, None)?;
            cmd_caps()
        }
        Command::Config => {
            print!("{}", DeviceConfig::sample_config());
            Ok(())
        }
        Command::Run {
            config,
            rate,
            period,
            buffer,
            seconds,
            no_loopback,
        } => {
            let mut device_config = load_config(config)?;
            if let Some(rate) = rate {
                device_config.rate = rate;
            }
            if let Some(period) = period {
                device_config.period_frames = period;
            }
            if let Some(buffer) = buffer {
                device_config.buffer_frames = buffer;
            }
            if no_loopback {
                device_config.loopback = false;
            }

            init_logging(&args, Some(&device_config))?;
            cmd_run(&device_config, Duration::from_secs(seconds))
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<DeviceConfig> {
    let config = match path {
        Some(path) => DeviceConfig::load(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => DeviceConfig::load_default()?,
    };
    Ok(config)
}

fn init_logging(args: &Args, config: Option<&DeviceConfig>) -> Result<()> {
    // Explicit -v/-q beat the config file
    let level = match config {
        Some(config) if args.verbose == 0 && !args.quiet => config.log_level.clone(),
        _ => args.log_level().to_string(),
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let log_file = args.log.clone().or_else(|| {
        config
            .map(|c| c.log_file.clone())
            .filter(|path| !path.is_empty())
    });

    if let Some(log_file) = log_file {
        let file = std::fs::File::create(&log_file)?;
        subscriber.with_writer(file).with_ansi(false).init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Print the capability descriptor
fn cmd_caps() -> Result<()> {
    println!("softpcm {} capabilities:\n", softpcm::VERSION);
    println!("{}", PcmHardware::default());
    println!();
    Ok(())
}

/// Loop a test tone from playback into capture for `duration`
fn cmd_run(config: &DeviceConfig, duration: Duration) -> Result<()> {
    println!("softpcm - Software PCM device\n");

    config.validate()?;
    let params = config.hw_params();
    let device = DeviceContext::from_config(config)?;

    let (event_tx, event_rx) = bounded(256);
    let playback_session = Arc::new(ChannelSession::from_sender(event_tx.clone()));
    let capture_session = Arc::new(ChannelSession::from_sender(event_tx));

    let mut playback = device.open(Direction::Playback, playback_session.clone())?;
    let mut capture = device.open(Direction::Capture, capture_session.clone())?;

    let period = playback.configure(params)?;
    capture.configure(params)?;
    playback.prepare()?;
    capture.prepare()?;

    if let Some(format) = playback.format() {
        println!("Audio format: {}", format);
    }
    println!(
        "Geometry: {} frames buffer, {} frames period ({:?}), loopback {}",
        params.buffer_frames,
        params.period_frames,
        period,
        if config.loopback { "on" } else { "off" }
    );

    // Prime the whole playback buffer so the first periods carry tone
    let buffer_bytes = playback.buffer_bytes();
    let mut tone = ToneGenerator::new();
    let mut scratch = vec![0u8; buffer_bytes];
    tone.fill(&mut scratch);
    playback.dma().write(0, buffer_bytes, &scratch);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!("\nReceived Ctrl+C, stopping...");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to install Ctrl+C handler: {}", e);
    }

    let mut drift = DriftTracker::new();
    drift.register(Direction::Playback, params.rate);
    drift.register(Direction::Capture, params.rate);

    if let Err(e) = playback.start(true).and_then(|_| capture.start(true)) {
        error!("Failed to start streams: {}", e);
        return Err(e.into());
    }
    println!("\nLoopback running for {:?}. Press Ctrl+C to stop.\n", duration);

    let frame_bytes = device.hardware().frame_bytes();
    let period_bytes = params.period_frames * frame_bytes;
    let mut period_buf = vec![0u8; period_bytes];
    let mut captured_frames = 0usize;
    let mut audible_frames = 0usize;
    let deadline = Instant::now() + duration;

    while running.load(Ordering::SeqCst) && Instant::now() < deadline {
        let event = match event_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        // The period that just elapsed ends at the reported position
        let span_start = (event.position + params.buffer_frames - params.period_frames)
            % params.buffer_frames;
        let offset = span_start * frame_bytes;

        match event.direction {
            Direction::Playback => {
                tone.fill(&mut period_buf);
                playback.dma().write(offset, buffer_bytes, &period_buf);
                drift.update(
                    Direction::Playback,
                    playback.stats().periods_elapsed * params.period_frames as u64,
                );
            }
            Direction::Capture => {
                capture.dma().read(offset, buffer_bytes, &mut period_buf);
                captured_frames += params.period_frames;
                audible_frames += non_silent_frames(&period_buf);
                drift.update(
                    Direction::Capture,
                    capture.stats().periods_elapsed * params.period_frames as u64,
                );
            }
        }
    }

    playback.stop()?;
    capture.stop()?;
    report(&playback, &capture, &device, &drift);
    println!(
        "  Captured:        {} frames, {:.1}% non-silent",
        captured_frames,
        if captured_frames > 0 {
            audible_frames as f64 * 100.0 / captured_frames as f64
        } else {
            0.0
        }
    );
    println!(
        "  Dropped events:  {}",
        playback_session.dropped() + capture_session.dropped()
    );

    playback.close();
    capture.close();
    info!("Loopback session finished");
    println!("\nStopped.");

    Ok(())
}

fn report(playback: &PcmStream, capture: &PcmStream, device: &DeviceContext, drift: &DriftTracker) {
    let ring = device.ring_stats();
    println!("Summary:\n");
    for stream in [playback, capture] {
        let stats = stream.stats();
        println!(
            "  {:<9}        {} periods, {} missed deadlines, position {}, drift {:.2}ms",
            stream.direction(),
            stats.periods_elapsed,
            stats.missed_deadlines,
            stream.query_position(),
            drift.drift_ms(stream.direction()).unwrap_or(0.0)
        );
    }
    println!(
        "  Ring:            {}/{} bytes, {} overflows, {} underruns",
        ring.filled, ring.capacity, ring.overflows, ring.underruns
    );
}

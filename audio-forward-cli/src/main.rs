mod args;

use std::io::{self, BufRead};
use std::process::ExitCode;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;

use audio_forward_core::{AudioSource, ForwardingConfig, SessionController, ToneSource};
use audio_forward_cpal::{list_input_devices, CpalMicSource};

use args::{Args, Command, SourceKind};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), String> {
    if let Command::Devices = args.command {
        return print_devices();
    }
    let Some(config) = args.forwarding_config()? else {
        return Ok(());
    };

    let source = build_source(args, &config);
    let controller = SessionController::new();
    let id = controller
        .start(config, source)
        .map_err(|e| format!("failed to start: {}", e))?;
    log::info!("session {} started", id);
    if let Some(addr) = controller.local_addr() {
        log::info!("bound to {}", addr);
    }

    let outcome = wait_for_stop(&controller, args);
    controller.stop();

    if let Some(diagnostics) = controller.diagnostics() {
        println!("{}", diagnostics.to_json());
    }
    outcome
}

fn build_source(args: &Args, config: &ForwardingConfig) -> Box<dyn AudioSource> {
    match args.source {
        SourceKind::Tone => Box::new(
            ToneSource::new(args.tone_hz, config.frames_per_callback as usize)
                .with_amplitude(args.tone_level),
        ),
        SourceKind::Mic => {
            let mic = match &args.device {
                Some(name) => CpalMicSource::with_device(name.clone()),
                None => CpalMicSource::default_device(),
            };
            Box::new(mic.with_buffer_frames(config.frames_per_callback))
        }
    }
}

fn print_devices() -> Result<(), String> {
    let devices = list_input_devices().map_err(|e| e.to_string())?;
    if devices.is_empty() {
        println!("no input devices");
    }
    for device in devices {
        let marker = if device.is_default { "*" } else { " " };
        println!("{} {}", marker, device.name);
    }
    Ok(())
}

/// Block until Enter, the requested duration, or a session error.
fn wait_for_stop(controller: &SessionController, args: &Args) -> Result<(), String> {
    let (tx, rx) = mpsc::channel();
    // With a fixed duration the sender is held here so stdin never ends the run.
    let _held = match args.duration {
        Some(_) => Some(tx),
        None => {
            thread::Builder::new()
                .name("stdin-watch".into())
                .spawn(move || {
                    let mut line = String::new();
                    let _ = io::stdin().lock().read_line(&mut line);
                    let _ = tx.send(());
                })
                .map_err(|e| format!("failed to spawn stdin thread: {}", e))?;
            println!("forwarding; press Enter to stop");
            None
        }
    };
    let deadline = args.duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    let interval = Duration::from_secs(args.status_interval.max(1));
    let mut next_report = Instant::now() + interval;

    loop {
        let status = controller.status();
        if status.is_error() {
            return Err(status.to_string());
        }

        let now = Instant::now();
        if deadline.is_some_and(|d| now >= d) {
            return Ok(());
        }
        if now >= next_report {
            report(controller);
            next_report = now + interval;
        }

        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return Ok(()),
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
}

fn report(controller: &SessionController) {
    let Some(d) = controller.diagnostics() else {
        return;
    };
    log::info!(
        "{} | {:?} | peer {} | {} frames, {} bytes, {} dropped, {} send errors",
        d.status,
        d.phase,
        d.transport
            .peer
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".into()),
        d.frames_forwarded,
        d.transport.bytes_sent,
        d.handoff.dropped,
        d.transport.send_errors
    );
}

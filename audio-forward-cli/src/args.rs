use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use audio_forward_core::{
    BackpressurePolicy, CaptureOrdering, ForwardingConfig, Framing, RetryPolicy,
    SendFailurePolicy, TransportMode, DEFAULT_PORT,
};

#[derive(Parser, Debug)]
#[command(name = "audio-forward")]
#[command(about = "Forward live PCM audio to a network peer")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// JSON session config; flags below override it
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Where audio comes from
    #[arg(long, value_enum, default_value = "tone", global = true)]
    pub source: SourceKind,

    /// Input device name for `--source mic` (default device otherwise)
    #[arg(long, global = true)]
    pub device: Option<String>,

    /// Tone frequency in Hz for `--source tone`
    #[arg(long, default_value = "440", global = true)]
    pub tone_hz: f32,

    /// Tone peak level, 0.0 to 1.0 of full scale
    #[arg(long, default_value = "0.25", global = true)]
    pub tone_level: f32,

    /// Sample rate in Hz
    #[arg(long, global = true)]
    pub rate: Option<u32>,

    /// Channel count (1 or 2)
    #[arg(long, global = true)]
    pub channels: Option<u16>,

    /// Frames per capture callback
    #[arg(long, global = true)]
    pub frames: Option<u32>,

    /// Wire framing
    #[arg(long, value_enum, global = true)]
    pub framing: Option<FramingArg>,

    /// Queue this many frames instead of keeping only the latest
    #[arg(long, global = true)]
    pub queue: Option<usize>,

    /// Start capture right after the first connection attempt
    #[arg(long, global = true)]
    pub capture_early: bool,

    /// End the session on the first send failure
    #[arg(long, global = true)]
    pub fail_fast: bool,

    /// Stop after this many seconds (default: until Enter)
    #[arg(long, global = true)]
    pub duration: Option<u64>,

    /// Seconds between status lines
    #[arg(long, default_value = "5", global = true)]
    pub status_interval: u64,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Listen for one receiver at a time
    Serve {
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
    /// Connect out to a listening receiver
    Connect {
        host: String,
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Connection attempts before giving up
        #[arg(long)]
        retries: Option<u32>,
        /// Delay between attempts in milliseconds
        #[arg(long)]
        retry_delay_ms: Option<u64>,
    },
    /// Send framed UDP datagrams
    Udp {
        host: String,
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
    /// List input devices
    Devices,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Tone,
    Mic,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FramingArg {
    Raw,
    Packet,
}

impl Args {
    /// Build the session config, or `None` for commands that do not stream.
    pub fn forwarding_config(&self) -> Result<Option<ForwardingConfig>, String> {
        let mut config = match &self.config {
            Some(path) => {
                let json = fs::read_to_string(path)
                    .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
                ForwardingConfig::from_json(&json)?
            }
            None => ForwardingConfig::default(),
        };

        match &self.command {
            Command::Devices => return Ok(None),
            Command::Serve { port } => {
                config.transport = TransportMode::Server { port: *port };
            }
            Command::Connect {
                host,
                port,
                retries,
                retry_delay_ms,
            } => {
                config.transport = TransportMode::Client {
                    host: host.clone(),
                    port: *port,
                };
                config.retry = RetryPolicy {
                    attempts: retries.unwrap_or(config.retry.attempts),
                    delay_ms: retry_delay_ms.unwrap_or(config.retry.delay_ms),
                };
            }
            Command::Udp { host, port } => {
                config.transport = TransportMode::Datagram {
                    host: host.clone(),
                    port: *port,
                };
                config.framing = Framing::Packet;
            }
        }

        if let Some(rate) = self.rate {
            config.format.sample_rate = rate;
        }
        if let Some(channels) = self.channels {
            config.format.channels = channels;
        }
        if let Some(frames) = self.frames {
            config.frames_per_callback = frames;
        }
        if let Some(framing) = self.framing {
            config.framing = match framing {
                FramingArg::Raw => Framing::Raw,
                FramingArg::Packet => Framing::Packet,
            };
        }
        if let Some(capacity) = self.queue {
            config.backpressure = BackpressurePolicy::BoundedQueue { capacity };
        }
        if self.capture_early {
            config.ordering = CaptureOrdering::AfterFirstAttempt;
        }
        if self.fail_fast {
            config.on_send_failure = SendFailurePolicy::FailFast;
        }

        config.validate()?;
        Ok(Some(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(argv: &[&str]) -> Result<Option<ForwardingConfig>, String> {
        Args::try_parse_from(argv).unwrap().forwarding_config()
    }

    #[test]
    fn serve_uses_defaults() {
        let config = config_for(&["audio-forward", "serve"]).unwrap().unwrap();
        assert_eq!(config.transport, TransportMode::Server { port: DEFAULT_PORT });
        assert_eq!(config.framing, Framing::Raw);
        assert_eq!(config.format.sample_rate, 48_000);
        assert_eq!(config.frames_per_callback, 192);
    }

    #[test]
    fn connect_maps_flags() {
        let config = config_for(&[
            "audio-forward",
            "connect",
            "10.0.0.2",
            "--port",
            "4010",
            "--retries",
            "3",
            "--rate",
            "44100",
            "--queue",
            "8",
            "--fail-fast",
        ])
        .unwrap()
        .unwrap();

        assert_eq!(
            config.transport,
            TransportMode::Client {
                host: "10.0.0.2".into(),
                port: 4010
            }
        );
        assert_eq!(config.retry.attempts, 3);
        assert_eq!(config.retry.delay_ms, 300);
        assert_eq!(config.format.sample_rate, 44_100);
        assert_eq!(config.backpressure, BackpressurePolicy::BoundedQueue { capacity: 8 });
        assert_eq!(config.on_send_failure, SendFailurePolicy::FailFast);
    }

    #[test]
    fn udp_forces_packet_framing() {
        let config = config_for(&["audio-forward", "udp", "127.0.0.1"])
            .unwrap()
            .unwrap();
        assert_eq!(config.framing, Framing::Packet);
        assert!(config_for(&["audio-forward", "udp", "127.0.0.1", "--framing", "raw"]).is_err());
    }

    #[test]
    fn tone_flags_parse() {
        let args = Args::try_parse_from(["audio-forward", "serve"]).unwrap();
        assert_eq!(args.tone_hz, 440.0);
        assert_eq!(args.tone_level, 0.25);

        let args =
            Args::try_parse_from(["audio-forward", "--tone-level", "0.8", "serve"]).unwrap();
        assert_eq!(args.tone_level, 0.8);
    }

    #[test]
    fn devices_needs_no_config() {
        assert_eq!(config_for(&["audio-forward", "devices"]).unwrap(), None);
    }

    #[test]
    fn rejects_invalid_format() {
        assert!(config_for(&["audio-forward", "serve", "--channels", "6"]).is_err());
    }
}

//! Binary entry point for `notify-relay`.
//!
//! This module provides the command-line interface for the relay. Every setting can
//! come from a flag, its environment variable, `NOTIFY_RELAY_*` variables, or a
//! config file, in that order of precedence.

use std::process::ExitCode;

use clap::Parser;
use notify_relay::base::{config::Config, types::Void};
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::{Protocol, WithExportConfig};
use tracing::error;
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt};

/// Exit code for anything that goes wrong before the first envelope is received.
const EXIT_STARTUP_FAILURE: u8 = 3;
/// Exit code for a receive loop that failed after startup.
const EXIT_RUNTIME_FAILURE: u8 = 1;

/// notify-relay: Pub/Sub build and monitoring notifications, relayed into team chat.
///
/// One instance handles one event kind. With `--dispatch republish`, formatted
/// messages go to an outbound topic instead, where a second instance running
/// `--event-kind text` delivers them.
#[derive(Parser, Debug)]
#[command(version, author, about, long_about = None)]
struct Args {
    /// Override the config file path (optional).
    ///
    /// By default, the relay will look for a config file at `.hidden/config.toml`
    /// in the current directory.
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,
    /// Increase log verbosity (-v, -vv, etc.).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Project that owns the inbound subscription.
    #[arg(long, env = "PROJECT_ID")]
    project_id: Option<String>,
    /// Inbound subscription name.
    #[arg(long, env = "SUBSCRIPTION_ID")]
    subscription_id: Option<String>,
    /// Chat team to send messages to.
    #[arg(long, env = "TEAM_NAME")]
    team_name: Option<String>,
    /// Chat channel within the team; the team's default channel when unset.
    #[arg(long, env = "CHANNEL")]
    channel: Option<String>,
    /// Payload kind this instance decodes.
    #[arg(long, env = "EVENT_KIND", value_parser = ["build", "incident", "text"])]
    event_kind: Option<String>,
    /// Deliver to chat directly, or republish onto `--topic-id`.
    #[arg(long, env = "DISPATCH", value_parser = ["direct", "republish"])]
    dispatch: Option<String>,
    /// Outbound topic for `--dispatch republish`.
    #[arg(long, env = "TOPIC_ID")]
    topic_id: Option<String>,
    /// Project that owns the outbound topic (defaults to `--project-id`).
    #[arg(long, env = "TOPIC_PROJECT_ID")]
    topic_project_id: Option<String>,
    /// What to do with payloads that cannot be decoded: acknowledge (drop) or leave for inspection.
    #[arg(long, env = "DECODE_FAILURE", value_parser = ["ack", "leave"])]
    decode_failure: Option<String>,
    /// Location of the Keybase executable.
    #[arg(long = "keybase", env = "KEYBASE_LOCATION")]
    keybase_location: Option<String>,
    /// Pub/Sub emulator `host:port`.
    #[arg(long, env = "PUBSUB_EMULATOR_HOST")]
    pubsub_emulator_host: Option<String>,
}

impl Args {
    /// Settings given on the command line (or their unprefixed env vars), keyed by config name.
    fn overrides(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            ("project_id", self.project_id.clone()),
            ("subscription_id", self.subscription_id.clone()),
            ("team_name", self.team_name.clone()),
            ("channel", self.channel.clone()),
            ("event_kind", self.event_kind.clone()),
            ("dispatch", self.dispatch.clone()),
            ("topic_id", self.topic_id.clone()),
            ("topic_project_id", self.topic_project_id.clone()),
            ("decode_failure", self.decode_failure.clone()),
            ("keybase_location", self.keybase_location.clone()),
            ("pubsub_emulator_host", self.pubsub_emulator_host.clone()),
        ]
    }
}

/// Set up logging, with OTLP span export when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
fn init_tracing(verbose: u8) -> Void {
    // Construct the level filter.

    let level = match verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    let level_filter = tracing_subscriber::filter::LevelFilter::from_level(level);

    // Prepare the log layer.

    let stdout = tracing_subscriber::fmt::layer()
        .with_ansi(true)
        .with_level(true)
        .with_file(false)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    // Prepare the otlp layer.

    let otel = match std::env::var_os("OTEL_EXPORTER_OTLP_ENDPOINT") {
        Some(_) => {
            let exporter = opentelemetry_otlp::SpanExporter::builder().with_http().with_protocol(Protocol::HttpBinary).build()?;
            let tracer = opentelemetry_sdk::trace::SdkTracerProvider::builder().with_simple_exporter(exporter).build().tracer("notify-relay");
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    tracing_subscriber::registry().with(otel).with(level_filter).with(stdout).try_init()?;

    Ok(())
}

/// Main entry point for the notify-relay binary.
///
/// Startup failures (configuration, chat session, bus client) exit with code 3.
#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(err) = init_tracing(args.verbose) {
        eprintln!("Failed to initialize logging: {err:#}");
        return ExitCode::from(EXIT_STARTUP_FAILURE);
    }

    ExitCode::from(run(args).await)
}

/// Load the configuration, start the relay, and receive until shutdown; returns the process exit code.
async fn run(args: Args) -> u8 {
    let config = match Config::load(args.config.as_deref(), &args.overrides()) {
        Ok(config) => config,
        Err(err) => {
            error!("Invalid configuration: {:#}", err);
            return EXIT_STARTUP_FAILURE;
        }
    };

    let runtime = match notify_relay::initialize(config).await {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("Failed to start: {:#}", err);
            return EXIT_STARTUP_FAILURE;
        }
    };

    match runtime.start().await {
        Ok(()) => 0,
        Err(err) => {
            error!("Receive loop failed: {:#}", err);
            EXIT_RUNTIME_FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_beats_its_env_var() {
        // Only this test touches these variables.
        unsafe {
            std::env::set_var("TEAM_NAME", "env");
            std::env::set_var("TOPIC_PROJECT_ID", "env-topics");
        }

        let args = Args::try_parse_from(["notify-relay", "--team-name", "flag"]);

        unsafe {
            std::env::remove_var("TEAM_NAME");
            std::env::remove_var("TOPIC_PROJECT_ID");
        }

        let args = args.unwrap();
        assert_eq!(args.team_name.as_deref(), Some("flag"));
        assert_eq!(args.topic_project_id.as_deref(), Some("env-topics"));

        let overrides = args.overrides();
        assert!(overrides.contains(&("team_name", Some("flag".to_string()))));
        assert!(overrides.contains(&("topic_project_id", Some("env-topics".to_string()))));
    }

    #[test]
    fn rejects_unknown_enum_values() {
        assert!(Args::try_parse_from(["notify-relay", "--decode-failure", "drop"]).is_err());
        assert!(Args::try_parse_from(["notify-relay", "--event-kind", "deploy"]).is_err());
    }

    #[tokio::test]
    async fn missing_settings_exit_with_startup_code() {
        let path = std::env::temp_dir().join(format!("notify-relay-empty-{}.toml", std::process::id()));
        std::fs::write(&path, "max_outstanding = 4\n").unwrap();

        let args = Args::try_parse_from(["notify-relay", "--config", path.to_str().unwrap()]).unwrap();
        let code = run(args).await;

        let _ = std::fs::remove_file(&path);

        assert_eq!(code, EXIT_STARTUP_FAILURE);
    }

    #[tokio::test]
    async fn unreadable_config_exits_with_startup_code() {
        let args = Args::try_parse_from(["notify-relay", "--config", "/nonexistent/notify-relay.toml"]).unwrap();
        assert_eq!(run(args).await, EXIT_STARTUP_FAILURE);
    }
}

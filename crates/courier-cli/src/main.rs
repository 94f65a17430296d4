//! Test harness for the courier messaging core against a NATS server.
//!
//! Exit codes: 0 success, 1 argument error, 2 timed out waiting for an expected
//! response, 3 connection or broker error.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use proven_courier::{
    ClientConfig, ConnectionError, ConnectionManager, DecodeError, Gateway, PublishError,
    StreamAdmin, StreamError, SubscribeError,
};
use proven_courier_nats::NatsBroker;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;
use uuid::Uuid;

/// CLI-specific error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid argument or configuration
    #[error("invalid argument: {0}")]
    Argument(String),

    /// Config file could not be read
    #[error("failed to read {path}: {source}")]
    ConfigRead {
        /// Path given on the command line
        path: PathBuf,

        /// Underlying IO error
        source: std::io::Error,
    },

    /// Config file is not valid
    #[error("invalid config file: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Publish error
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// Expected message never arrived
    #[error("no response within {0:?}")]
    ResponseTimeout(Duration),

    /// Stream administration error
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Subscribe error
    #[error(transparent)]
    Subscribe(#[from] SubscribeError),
}

impl Error {
    const fn exit_code(&self) -> u8 {
        match self {
            Self::Argument(_) | Self::ConfigRead { .. } | Self::ConfigParse(_) => 1,
            Self::ResponseTimeout(_) => 2,
            Self::Connection(_) | Self::Publish(_) | Self::Stream(_) | Self::Subscribe(_) => 3,
        }
    }
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// JSON config file; flags override its values
    #[arg(long, env = "COURIER_CONFIG")]
    config: Option<PathBuf>,

    /// Broker URL
    #[arg(long, env = "COURIER_URL")]
    url: Option<Url>,

    /// Connect timeout in milliseconds
    #[arg(long, env = "COURIER_CONNECT_TIMEOUT_MS")]
    connect_timeout_ms: Option<u64>,

    /// Publish through the stream context when available
    #[arg(long, env = "COURIER_USE_DURABLE_STREAMING")]
    use_durable_streaming: Option<bool>,

    /// Default stream name
    #[arg(long, env = "COURIER_STREAM_NAME")]
    stream_name: Option<String>,

    /// Subject pattern captured by the default stream
    #[arg(long, env = "COURIER_SUBJECT_FILTER")]
    subject_filter: Option<String>,

    /// Per-subject message cap of the default stream
    #[arg(long, env = "COURIER_MAX_MESSAGES_PER_SUBJECT")]
    max_messages_per_subject: Option<i64>,

    /// Log filter, e.g. `debug` or `proven_courier=trace`
    #[arg(long, env = "RUST_LOG", default_value = "warn")]
    log: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, Subcommand)]
enum Command {
    /// Connect to the broker, then disconnect
    Ping,

    /// Create or update the default stream and print its info
    Setup,

    /// Print a stream's info
    Info {
        /// Stream name, defaults to the configured stream
        name: Option<String>,
    },

    /// Delete a stream
    Delete {
        /// Stream name, defaults to the configured stream
        name: Option<String>,
    },

    /// Subscribe, publish one message and wait for it to come back
    Roundtrip {
        /// Subject to publish on
        #[arg(long, default_value = "dtr.example")]
        subject: String,

        /// Message content
        #[arg(long, default_value = "hello")]
        content: String,

        /// How long to wait for the message, in milliseconds
        #[arg(long, default_value_t = 5000)]
        wait_ms: u64,
    },
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
struct ProbeMessage {
    id: String,
    content: String,
}

impl Args {
    fn client_config(&self) -> Result<ClientConfig, Error> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
                    path: path.clone(),
                    source,
                })?;
                ClientConfig::from_json(&text)?
            }
            None => ClientConfig::default(),
        };

        if let Some(url) = &self.url {
            config.url = url.to_string();
        }
        if let Some(connect_timeout_ms) = self.connect_timeout_ms {
            config.connect_timeout_ms = connect_timeout_ms;
        }
        if let Some(use_durable_streaming) = self.use_durable_streaming {
            config.use_durable_streaming = use_durable_streaming;
        }
        if let Some(stream_name) = &self.stream_name {
            config.stream_name.clone_from(stream_name);
        }
        if let Some(subject_filter) = &self.subject_filter {
            config.subject_filter.clone_from(subject_filter);
        }
        if let Some(max_messages_per_subject) = self.max_messages_per_subject {
            config.max_messages_per_subject = max_messages_per_subject;
        }

        Url::parse(&config.url)
            .map_err(|e| Error::Argument(format!("invalid broker url '{}': {e}", config.url)))?;

        if config.stream_name.is_empty() {
            return Err(Error::Argument("stream name must not be empty".to_string()));
        }

        Ok(config)
    }
}

async fn run(command: Command, config: ClientConfig) -> Result<(), Error> {
    let manager = ConnectionManager::new(NatsBroker::new());
    let admin = StreamAdmin::new(manager.clone(), config.default_stream());

    manager.connect(config.connection_config()).await?;
    info!(url = %config.url, "connected");

    let result = match command {
        Command::Ping => {
            println!("connected to {}", config.url);
            Ok(())
        }
        Command::Setup => admin
            .ensure_default_stream()
            .await
            .map_err(Error::from)
            .map(|info| print_json(&info)),
        Command::Info { name } => admin
            .get_stream_info(name.as_deref().unwrap_or(&config.stream_name))
            .await
            .map_err(Error::from)
            .map(|info| print_json(&info)),
        Command::Delete { name } => {
            let name = name.unwrap_or_else(|| config.stream_name.clone());
            admin.delete_stream(&name).await.map_err(Error::from).map(|()| {
                println!("deleted stream {name}");
            })
        }
        Command::Roundtrip {
            subject,
            content,
            wait_ms,
        } => {
            let gateway = Gateway::new(manager.clone());
            roundtrip(&gateway, &admin, &config, subject, content, Duration::from_millis(wait_ms))
                .await
        }
    };

    manager.disconnect().await;

    result
}

async fn roundtrip(
    gateway: &Gateway<NatsBroker>,
    admin: &StreamAdmin<NatsBroker>,
    config: &ClientConfig,
    subject: String,
    content: String,
    wait: Duration,
) -> Result<(), Error> {
    // Durable publishes need a stream capturing the subject.
    if config.use_durable_streaming {
        admin.ensure_default_stream().await?;
    }

    let (sender, mut received) = mpsc::unbounded_channel();
    let handle = gateway
        .subscribe_json(
            subject.clone(),
            move |message: Result<ProbeMessage, DecodeError>| {
                let _ = sender.send(message);
            },
        )
        .await?;

    let message = ProbeMessage {
        id: Uuid::new_v4().to_string(),
        content,
    };
    let receipt = gateway.publish(subject, &message).await?;
    debug!(?receipt, id = %message.id, "published probe message");

    let deadline = Instant::now() + wait;
    let outcome = loop {
        match timeout_at(deadline, received.recv()).await {
            Ok(Some(Ok(echo))) if echo == message => break Ok(()),
            Ok(Some(Ok(other))) => debug!(id = %other.id, "ignoring unrelated message"),
            Ok(Some(Err(error))) => warn!(%error, "ignoring undecodable message"),
            Ok(None) | Err(_) => break Err(Error::ResponseTimeout(wait)),
        }
    };

    gateway.unsubscribe(&handle).await?;

    outcome.map(|()| {
        println!(
            "round trip ok: id={} durable={}",
            message.id,
            receipt.is_durable()
        );
    })
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(error) => warn!(%error, "failed to render output"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(error) => {
            let _ = error.print();
            return if error.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let filter = match EnvFilter::try_new(&args.log) {
        Ok(filter) => filter,
        Err(error) => {
            eprintln!("error: invalid log filter '{}': {error}", args.log);
            return ExitCode::from(1);
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let outcome = match args.client_config() {
        Ok(config) => run(args.command, config).await,
        Err(error) => Err(error),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("courier-probe").chain(args.iter().copied()))
            .expect("valid arguments")
    }

    #[test]
    fn test_defaults_match_client_config() {
        let config = parse(&["ping"]).client_config().unwrap();

        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = parse(&[
            "--url",
            "nats://broker:4222",
            "--connect-timeout-ms",
            "1000",
            "--use-durable-streaming",
            "false",
            "--stream-name",
            "evt",
            "--subject-filter",
            "evt.>",
            "--max-messages-per-subject",
            "5000",
            "setup",
        ])
        .client_config()
        .unwrap();

        assert_eq!(config.url, "nats://broker:4222");
        assert_eq!(config.connect_timeout_ms, 1000);
        assert!(!config.use_durable_streaming);
        assert_eq!(config.stream_name, "evt");
        assert_eq!(config.subject_filter, "evt.>");
        assert_eq!(config.max_messages_per_subject, 5000);
    }

    #[test]
    fn test_missing_subcommand_is_an_argument_error() {
        let error = Args::try_parse_from(["courier-probe"]).unwrap_err();

        assert!(error.use_stderr());
    }

    #[test]
    fn test_roundtrip_options() {
        let args = parse(&["roundtrip", "--subject", "dtr.probe", "--wait-ms", "250"]);

        match args.command {
            Command::Roundtrip {
                subject, wait_ms, ..
            } => {
                assert_eq!(subject, "dtr.probe");
                assert_eq!(wait_ms, 250);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::Argument(String::new()).exit_code(), 1);
        assert_eq!(
            Error::ResponseTimeout(Duration::from_secs(1)).exit_code(),
            2
        );
        assert_eq!(
            Error::Connection(ConnectionError::Timeout(Duration::from_secs(1))).exit_code(),
            3
        );
        assert_eq!(Error::Stream(StreamError::NotConnected).exit_code(), 3);
    }
}

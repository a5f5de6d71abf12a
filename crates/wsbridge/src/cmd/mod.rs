use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgGroup, Args, Subcommand};
use tracing::info;
use wsbridge_frame::DEFAULT_NAMESPACE;
use wsbridge_peer::{BridgeServer, ServerConfig, SessionConfig, SessionHandle, DEFAULT_BIND_ADDR};

use crate::exit::{peer_error, CliError, CliResult, INTERNAL, TIMEOUT, USAGE};
use crate::output::OutputFormat;

pub mod listen;
pub mod run;
pub mod say;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Wait for the game and print transfers and polled entries.
    Listen(ListenArgs),
    /// Send a payload to the game as a chunked transfer.
    Send(SendArgs),
    /// Run commands in the game and print their results.
    Run(RunArgs),
    /// Show a chat message to every player.
    Say(SayArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Listen(args) => block_on(listen::run(args, format)),
        Command::Send(args) => block_on(send::run(args, format)),
        Command::Run(args) => block_on(run::run(args, format)),
        Command::Say(args) => block_on(say::run(args)),
        Command::Version(args) => version::run(args),
    }
}

fn block_on<F: Future<Output = CliResult<i32>>>(future: F) -> CliResult<i32> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("runtime setup failed: {err}")))?;
    runtime.block_on(future)
}

/// Where to listen and how the session behaves.
#[derive(Args, Debug)]
pub struct ServerArgs {
    /// Address the game connects to with `/wsserver`.
    #[arg(long, env = "WSBRIDGE_BIND", default_value = DEFAULT_BIND_ADDR)]
    pub bind: String,
    /// Addressing namespace for transfers.
    #[arg(long, env = "WSBRIDGE_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,
    /// How long to wait for a game client (e.g. 300s, 500ms).
    #[arg(long, default_value = "300s")]
    pub accept_timeout: String,
    /// How long a command batch may wait for responses.
    #[arg(long, default_value = "60s")]
    pub request_timeout: String,
    /// How long an inbound transfer may stay open.
    #[arg(long, default_value = "30s")]
    pub transfer_timeout: String,
    /// Do not greet players on connect.
    #[arg(long)]
    pub no_greeting: bool,
}

impl ServerArgs {
    pub fn server_config(&self) -> CliResult<ServerConfig> {
        let defaults = ServerConfig::default();
        Ok(ServerConfig {
            bind_addr: self.bind.clone(),
            session: SessionConfig {
                namespace: self.namespace.clone(),
                request_timeout: parse_duration(&self.request_timeout)?,
                transfer_timeout: parse_duration(&self.transfer_timeout)?,
                ..SessionConfig::default()
            },
            greeting: if self.no_greeting {
                None
            } else {
                defaults.greeting
            },
        })
    }

    pub async fn bind(&self) -> CliResult<BridgeServer> {
        let config = self.server_config()?;
        BridgeServer::bind(config)
            .await
            .map_err(|err| peer_error("bind failed", err))
    }

    /// Wait for the next game client, up to `--accept-timeout`.
    pub async fn accept(&self, server: &mut BridgeServer) -> CliResult<SessionHandle> {
        let accept_timeout = parse_duration(&self.accept_timeout)?;
        info!(
            addr = %server.local_addr(),
            "waiting for game client (/wsserver {})",
            server.local_addr()
        );

        tokio::time::timeout(accept_timeout, server.accept())
            .await
            .map_err(|_| {
                CliError::new(
                    TIMEOUT,
                    format!("no game client connected within {accept_timeout:?}"),
                )
            })?
            .map_err(|err| peer_error("accept failed", err))
    }

    /// Bind, then wait for one game client.
    pub async fn connect(&self) -> CliResult<(BridgeServer, SessionHandle)> {
        let mut server = self.bind().await?;
        let session = self.accept(&mut server).await?;
        Ok((server, session))
    }
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    #[command(flatten)]
    pub server: ServerArgs,
    /// Channels to print transfers for (comma-separated).
    #[arg(long, short = 'c', value_delimiter = ',')]
    pub channels: Vec<String>,
    /// Also poll scoreboard entries.
    #[arg(long)]
    pub poll: bool,
    /// Poll interval (e.g. 50ms).
    #[arg(long, default_value = "50ms")]
    pub poll_interval: String,
    /// Exit after printing N items.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("payload").required(true).args(["json", "data", "file"])))]
pub struct SendArgs {
    #[command(flatten)]
    pub server: ServerArgs,
    /// Channel to send on.
    #[arg(long, short = 'c')]
    pub channel: String,
    /// JSON payload.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Text payload.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// Read a JSON payload from file.
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub server: ServerArgs,
    /// Commands to run as one batch, without the leading slash.
    #[arg(required = true)]
    pub commands: Vec<String>,
    /// Exit with failure if any command reports a failure status.
    #[arg(long)]
    pub strict: bool,
}

#[derive(Args, Debug)]
pub struct SayArgs {
    #[command(flatten)]
    pub server: ServerArgs,
    /// Message to show.
    pub message: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn server_args_build_config() {
        let args = ServerArgs {
            bind: "0.0.0.0:6000".to_string(),
            namespace: "zz".to_string(),
            accept_timeout: "5s".to_string(),
            request_timeout: "2s".to_string(),
            transfer_timeout: "500ms".to_string(),
            no_greeting: true,
        };
        let config = args.server_config().unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:6000");
        assert_eq!(config.session.namespace, "zz");
        assert_eq!(config.session.request_timeout, Duration::from_secs(2));
        assert_eq!(config.session.transfer_timeout, Duration::from_millis(500));
        assert!(config.greeting.is_none());
        assert_eq!(config.session.max_envelope_bytes, 661);
    }
}

mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(
    name = "wsbridge",
    version,
    about = "Chunked transfers and command batches over the game WebSocket"
)]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "wsbridge",
            "send",
            "--channel",
            "data",
            "--data",
            "hello",
        ])
        .expect("send args should parse");

        match cli.command {
            Command::Send(args) => {
                assert_eq!(args.channel, "data");
                assert_eq!(args.server.bind, "127.0.0.1:5218");
            }
            other => panic!("expected send, got {other:?}"),
        }
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "wsbridge",
            "send",
            "--channel",
            "data",
            "--json",
            "{\"x\":1}",
            "--data",
            "hello",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn send_requires_a_payload() {
        let err = Cli::try_parse_from(["wsbridge", "send", "--channel", "data"])
            .expect_err("payload is required");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn parses_run_batch() {
        let cli = Cli::try_parse_from([
            "wsbridge",
            "run",
            "time query daytime",
            "list",
            "--bind",
            "0.0.0.0:7000",
            "--request-timeout",
            "5s",
        ])
        .expect("run args should parse");

        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.commands, vec!["time query daytime", "list"]);
                assert_eq!(args.server.bind, "0.0.0.0:7000");
                assert_eq!(args.server.request_timeout, "5s");
            }
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn parses_listen_channels() {
        let cli = Cli::try_parse_from(["wsbridge", "listen", "-c", "a,b", "--poll", "--count", "3"])
            .expect("listen args should parse");
        match cli.command {
            Command::Listen(args) => {
                assert_eq!(args.channels, vec!["a", "b"]);
                assert!(args.poll);
                assert_eq!(args.count, Some(3));
            }
            other => panic!("expected listen, got {other:?}"),
        }
    }
}

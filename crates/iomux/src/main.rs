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
    name = "iomux",
    version,
    about = "Virtual connections over one byte stream"
)]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(
        long,
        value_name = "FORMAT",
        default_value = "text",
        env = "IOMUX_LOG_FORMAT",
        global = true
    )]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "info",
        env = "IOMUX_LOG_LEVEL",
        global = true
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format).await;

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
    use crate::cmd::Framing;

    #[test]
    fn parses_send_with_child_command() {
        let cli = Cli::try_parse_from([
            "iomux",
            "send",
            "--data",
            "hello",
            "--connections",
            "3",
            "--",
            "iomux",
            "serve",
            "--framing",
            "datagram",
        ])
        .expect("send args should parse");

        let Command::Send(args) = cli.command else {
            panic!("expected send");
        };
        assert_eq!(args.connections, 3);
        assert_eq!(args.framing, Framing::LengthPrefixed);
        assert_eq!(args.command, ["iomux", "serve", "--framing", "datagram"]);
    }

    #[test]
    fn rejects_socket_and_command_together() {
        let err = Cli::try_parse_from([
            "iomux",
            "send",
            "--socket",
            "/tmp/iomux.sock",
            "--data",
            "hello",
            "--",
            "iomux",
            "serve",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn parses_serve_limits() {
        let cli = Cli::try_parse_from([
            "iomux",
            "serve",
            "--framing",
            "datagram",
            "--max-connections",
            "4",
            "--backlog",
            "8",
        ])
        .expect("serve args should parse");

        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.framing, Framing::Datagram);
        assert_eq!(args.max_connections, Some(4));
        assert_eq!(args.backlog, 8);
    }

    #[test]
    fn zero_connections_is_a_usage_error() {
        let err = Cli::try_parse_from(["iomux", "send", "--data", "x", "--connections", "0"])
            .expect_err("zero connections should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }
}

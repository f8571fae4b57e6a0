use clap::{Args, Subcommand, ValueEnum};
use std::path::PathBuf;

use iomux_conn::{StreamConfig, DEFAULT_BACKLOG};
use iomux_frame::FrameMode;
use tokio_util::sync::CancellationToken;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept virtual connections and echo them back.
    Serve(ServeArgs),
    /// Dial virtual connections and print what comes back.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format).await,
        Command::Send(args) => send::run(args, format).await,
        Command::Version(args) => version::run(args),
    }
}

/// Frame delimiting on the physical stream.
///
/// OS pipes and sockets may merge writes, so the CLI defaults to
/// length-prefixed frames. Both peers must agree.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Framing {
    Datagram,
    #[default]
    LengthPrefixed,
}

impl From<Framing> for FrameMode {
    fn from(framing: Framing) -> Self {
        match framing {
            Framing::Datagram => FrameMode::Datagram,
            Framing::LengthPrefixed => FrameMode::LengthPrefixed,
        }
    }
}

impl Framing {
    pub fn stream_config(self) -> StreamConfig {
        StreamConfig::default().with_frame_mode(self.into())
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Serve the first connection on this Unix socket instead of stdin/stdout.
    #[arg(long, value_name = "PATH")]
    pub socket: Option<PathBuf>,
    /// Frame delimiting on the physical stream.
    #[arg(long, value_enum, default_value_t = Framing::default())]
    pub framing: Framing,
    /// Refuse handshakes beyond this many live connections.
    #[arg(long, value_name = "N")]
    pub max_connections: Option<usize>,
    /// Accepted connections queued before handshakes are refused.
    #[arg(long, value_name = "N", default_value_t = DEFAULT_BACKLOG)]
    pub backlog: usize,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Unix socket of a running `iomux serve --socket`.
    #[arg(long, value_name = "PATH", conflicts_with = "command")]
    pub socket: Option<PathBuf>,
    /// Payload written on every connection.
    #[arg(long)]
    pub data: String,
    /// Number of virtual connections to dial.
    #[arg(
        long,
        short = 'n',
        default_value = "1",
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub connections: u32,
    /// Deadline for the whole exchange (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// Frame delimiting on the physical stream.
    #[arg(long, value_enum, default_value_t = Framing::default())]
    pub framing: Framing,
    /// Command to spawn; its stdin/stdout become the physical stream.
    #[arg(last = true, value_name = "CMD")]
    pub command: Vec<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Cancel `scope` on Ctrl-C.
pub fn cancel_on_interrupt(scope: &CancellationToken) {
    let scope = scope.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted");
            scope.cancel();
        }
    });
}

use std::path::Path;

use iomux_conn::{
    listen_with_options, ListenOptions, MuxError, MuxStream, StreamConfig, VirtualConn,
};
use iomux_transport::stdio;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cmd::{cancel_on_interrupt, ServeArgs};
use crate::exit::{mux_error, CliResult, SUCCESS};
use crate::output::{print_summary, OutputFormat, ServeSummary};

const ECHO_BUFFER: usize = 64 * 1024;

pub async fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let scope = CancellationToken::new();
    cancel_on_interrupt(&scope);

    let config = args.framing.stream_config();
    let stream = match &args.socket {
        Some(path) => match open_socket(&scope, path, config).await? {
            Some(stream) => stream,
            None => return Ok(SUCCESS),
        },
        None => MuxStream::with_config(stdio(), config),
    };

    let summary = serve(&scope, stream, &args).await?;
    info!(accepted = summary.accepted, reason = %summary.reason, "serve finished");
    // Over stdio, stdout is the physical stream.
    if args.socket.is_some() {
        print_summary(&summary, format);
    }
    Ok(SUCCESS)
}

async fn serve(
    scope: &CancellationToken,
    stream: MuxStream,
    args: &ServeArgs,
) -> CliResult<ServeSummary> {
    let mut options = ListenOptions::default().with_backlog(args.backlog);
    if let Some(max) = args.max_connections {
        options = options.with_max_connections(max);
    }
    let listener = listen_with_options(scope, stream, options)
        .await
        .map_err(|err| mux_error("listen failed", err))?;

    let mut accepted = 0;
    let reason = loop {
        match listener.accept().await {
            Ok(conn) => {
                accepted += 1;
                info!(id = %conn.id(), "accepted connection");
                tokio::spawn(echo(conn));
            }
            Err(MuxError::StreamClosed(reason)) => break reason,
            Err(MuxError::ContextCanceled) => break "interrupted".to_string(),
            Err(err) => return Err(mux_error("accept failed", err)),
        }
    };
    Ok(ServeSummary { accepted, reason })
}

/// Write every chunk back until the connection ends.
async fn echo(conn: VirtualConn) {
    let mut buf = vec![0u8; ECHO_BUFFER];
    loop {
        let result = match conn.read(&mut buf).await {
            Ok(n) => conn.write(&buf[..n]).await,
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            if ends_echo_quietly(&err) {
                debug!(id = %conn.id(), %err, "echo finished");
            } else {
                warn!(id = %conn.id(), %err, "echo failed");
            }
            return;
        }
    }
}

/// The stream going away, a local close and an interrupt are how echo
/// normally stops.
fn ends_echo_quietly(err: &MuxError) -> bool {
    err.is_stream_fatal() || matches!(err, MuxError::Closed | MuxError::ContextCanceled)
}

/// Wait for the first client on a Unix socket. `None` when interrupted
/// before anyone connected.
#[cfg(unix)]
async fn open_socket(
    scope: &CancellationToken,
    path: &Path,
    config: StreamConfig,
) -> CliResult<Option<MuxStream>> {
    use iomux_transport::UnixDomainSocket;

    use crate::exit::transport_error;

    let socket =
        UnixDomainSocket::bind(path).map_err(|err| transport_error("bind failed", err))?;
    let io = tokio::select! {
        _ = scope.cancelled() => return Ok(None),
        io = socket.accept() => io.map_err(|err| transport_error("accept failed", err))?,
    };
    Ok(Some(MuxStream::with_config(io, config)))
}

#[cfg(not(unix))]
async fn open_socket(
    _scope: &CancellationToken,
    _path: &Path,
    _config: StreamConfig,
) -> CliResult<Option<MuxStream>> {
    Err(crate::exit::CliError::new(
        crate::exit::USAGE,
        "--socket requires Unix domain sockets",
    ))
}

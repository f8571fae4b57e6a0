use std::time::Duration;

use iomux_conn::{dial, DialOptions, MuxStream, StreamConfig};
use iomux_transport::spawn;
use tokio::process::Child;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cmd::{cancel_on_interrupt, SendArgs};
use crate::exit::{
    mux_error, transport_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS, TIMEOUT, USAGE,
};
use crate::output::{print_exchanges, Exchange, OutputFormat};

/// How long a spawned child gets to exit after its stdin closes.
const CHILD_EXIT_GRACE: Duration = Duration::from_secs(2);

pub async fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let deadline = parse_duration(&args.timeout)?;
    let scope = CancellationToken::new();
    cancel_on_interrupt(&scope);

    let config = args.framing.stream_config();
    let (stream, child) = open_stream(&args, config).await?;
    let payload = args.data.clone().into_bytes();
    let outcome = tokio::time::timeout(
        deadline,
        exchange_all(&scope, &stream, args.connections, payload),
    )
    .await;

    // Closing our side lets a spawned `serve` see EOF and exit on its own.
    stream.shutdown();
    if let Some(child) = child {
        reap(child).await;
    }

    let exchanges = outcome.map_err(|_| {
        CliError::new(TIMEOUT, format!("no complete echo within {}", args.timeout))
    })??;
    print_exchanges(&exchanges, format);

    if exchanges.iter().all(|exchange| exchange.echoed) {
        Ok(SUCCESS)
    } else {
        Ok(FAILURE)
    }
}

/// Dial `count` connections at once and round-trip `payload` on each.
async fn exchange_all(
    scope: &CancellationToken,
    stream: &MuxStream,
    count: u32,
    payload: Vec<u8>,
) -> CliResult<Vec<Exchange>> {
    let mut tasks = JoinSet::new();
    for index in 0..count {
        let scope = scope.clone();
        let stream = stream.clone();
        let payload = payload.clone();
        tasks.spawn(async move { (index, round_trip(&scope, &stream, payload).await) });
    }

    let mut exchanges = Vec::with_capacity(count as usize);
    while let Some(joined) = tasks.join_next().await {
        let (index, result) = joined
            .map_err(|err| CliError::new(INTERNAL, format!("connection task failed: {err}")))?;
        exchanges.push((index, result?));
    }
    exchanges.sort_by_key(|(index, _)| *index);
    Ok(exchanges.into_iter().map(|(_, exchange)| exchange).collect())
}

async fn round_trip(
    scope: &CancellationToken,
    stream: &MuxStream,
    payload: Vec<u8>,
) -> CliResult<Exchange> {
    let conn = dial(scope, stream, DialOptions::default())
        .await
        .map_err(|err| mux_error("dial failed", err))?;
    debug!(id = %conn.id(), "dialed connection");

    conn.write(&payload)
        .await
        .map_err(|err| mux_error("write failed", err))?;

    let mut echoed = vec![0u8; payload.len()];
    let mut filled = 0;
    while filled < echoed.len() {
        filled += conn
            .read(&mut echoed[filled..])
            .await
            .map_err(|err| mux_error("read failed", err))?;
    }
    conn.close().map_err(|err| mux_error("close failed", err))?;

    Ok(Exchange {
        id: conn.local_addr().to_string(),
        sent: payload.len(),
        received: filled,
        echoed: echoed == payload,
        payload: echoed,
    })
}

async fn open_stream(
    args: &SendArgs,
    config: StreamConfig,
) -> CliResult<(MuxStream, Option<Child>)> {
    if let Some(path) = &args.socket {
        let stream = connect_socket(path, config).await?;
        return Ok((stream, None));
    }

    let Some((program, rest)) = args.command.split_first() else {
        return Err(CliError::new(
            USAGE,
            "either --socket or a command after `--` is required",
        ));
    };
    let (io, child) = spawn(program, rest).map_err(|err| transport_error("spawn failed", err))?;
    Ok((MuxStream::with_config(io, config), Some(child)))
}

#[cfg(unix)]
async fn connect_socket(path: &std::path::Path, config: StreamConfig) -> CliResult<MuxStream> {
    let io = iomux_transport::UnixDomainSocket::connect(path)
        .await
        .map_err(|err| transport_error("connect failed", err))?;
    Ok(MuxStream::with_config(io, config))
}

#[cfg(not(unix))]
async fn connect_socket(_path: &std::path::Path, _config: StreamConfig) -> CliResult<MuxStream> {
    Err(CliError::new(USAGE, "--socket requires Unix domain sockets"))
}

async fn reap(mut child: Child) {
    match tokio::time::timeout(CHILD_EXIT_GRACE, child.wait()).await {
        Ok(Ok(status)) => debug!(%status, "child exited"),
        Ok(Err(err)) => warn!(%err, "waiting for child failed"),
        Err(_) => {
            warn!("child did not exit after its stdin closed; killing it");
            let _ = child.kill().await;
        }
    }
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, scale) = if let Some(num) = input.strip_suffix("ms") {
        (num, 1)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, 1_000)
    } else if let Some(num) = input.strip_suffix('m') {
        (num, 60_000)
    } else {
        (input, 1_000)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }
    value
        .checked_mul(scale)
        .map(Duration::from_millis)
        .ok_or_else(|| CliError::new(USAGE, format!("duration out of range: {input}")))
}

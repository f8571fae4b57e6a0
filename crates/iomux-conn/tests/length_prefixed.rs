mod common;

use iomux_conn::{dial, listen, DialOptions, MuxStream, StreamConfig, VirtualConn};
use iomux_frame::FrameMode;
use tokio_util::sync::CancellationToken;

use common::within;

fn coalescing_pair() -> (MuxStream, MuxStream) {
    // A small buffer forces frames to be split and merged across reads.
    let (client, server) = tokio::io::duplex(256);
    let config = StreamConfig::default().with_frame_mode(FrameMode::LengthPrefixed);
    (
        MuxStream::with_config(client, config.clone()),
        MuxStream::with_config(server, config),
    )
}

async fn echo(conn: VirtualConn) {
    let mut buf = vec![0u8; 4096];
    while let Ok(n) = conn.read(&mut buf).await {
        if conn.write(&buf[..n]).await.is_err() {
            break;
        }
    }
}

async fn read_exact(conn: &VirtualConn, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut buf = vec![0u8; 1024];
    while out.len() < len {
        let n = within("read", conn.read(&mut buf))
            .await
            .expect("read should succeed");
        out.extend_from_slice(&buf[..n]);
    }
    out
}

#[tokio::test]
async fn echo_over_coalescing_stream() {
    let scope = CancellationToken::new();
    let (client, server) = coalescing_pair();
    let listener = listen(&scope, server).await.expect("listen should succeed");

    let server_task = tokio::spawn(async move {
        while let Ok(conn) = listener.accept().await {
            tokio::spawn(echo(conn));
        }
    });

    let mut conns = Vec::new();
    for _ in 0..4 {
        let conn = within("dial", dial(&scope, &client, DialOptions::default()))
            .await
            .expect("dial should succeed");
        conns.push(conn);
    }

    for (i, conn) in conns.iter().enumerate() {
        let message = format!("message {i} ").repeat(100);
        conn.write(message.as_bytes())
            .await
            .expect("write should succeed");
    }
    for (i, conn) in conns.iter().enumerate() {
        let message = format!("message {i} ").repeat(100);
        assert_eq!(read_exact(conn, message.len()).await, message.as_bytes());
    }

    client.shutdown();
    within("server loop", server_task)
        .await
        .expect("server task should not panic");
}

#[tokio::test]
async fn payloads_above_max_are_split() {
    let scope = CancellationToken::new();
    let (client, server) = tokio::io::duplex(1024);
    let config = StreamConfig::default()
        .with_frame_mode(FrameMode::LengthPrefixed)
        .with_max_payload(100);
    let client = MuxStream::with_config(client, config.clone());
    let server = MuxStream::with_config(server, config);
    let listener = listen(&scope, server).await.expect("listen should succeed");

    let conn = within("dial", dial(&scope, &client, DialOptions::default()))
        .await
        .expect("dial should succeed");
    let payload = vec![7u8; 1000];
    conn.write(&payload).await.expect("write should succeed");

    let accepted = within("accept", listener.accept())
        .await
        .expect("accept should succeed");
    assert_eq!(read_exact(&accepted, payload.len()).await, payload);
}

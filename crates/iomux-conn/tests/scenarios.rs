mod common;

use std::io;
use std::sync::Arc;

use iomux_conn::{dial, listen, DialOptions, MuxError, MuxStream};
use iomux_frame::{ConnectionId, MAX_DATAGRAM_PAYLOAD};
use iomux_transport::pipe;
use tokio_util::sync::CancellationToken;

use common::{scripted, until, within};

fn pair() -> (MuxStream, MuxStream) {
    let (client, server) = pipe();
    (MuxStream::new(client), MuxStream::new(server))
}

async fn read_exact(conn: &iomux_conn::VirtualConn, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut buf = vec![0u8; 8192];
    while out.len() < len {
        let n = within("read", conn.read(&mut buf))
            .await
            .expect("read should succeed");
        out.extend_from_slice(&buf[..n]);
    }
    out
}

#[tokio::test]
async fn dial_write_accept_read() {
    let scope = CancellationToken::new();
    let (client, server) = pair();
    let listener = listen(&scope, server).await.expect("listen should succeed");

    let conn = within("dial", dial(&scope, &client, DialOptions::default()))
        .await
        .expect("dial should succeed");
    assert_eq!(conn.write(b"hello").await.expect("write should succeed"), 5);

    let accepted = within("accept", listener.accept())
        .await
        .expect("accept should succeed");
    assert_eq!(accepted.id(), conn.id());
    assert_eq!(accepted.remote_addr(), conn.local_addr());

    let mut buf = [0u8; 5];
    let n = within("read", accepted.read(&mut buf))
        .await
        .expect("read should succeed");
    assert_eq!(&buf[..n], b"hello");
}

#[tokio::test]
async fn replies_flow_back_to_the_dialer() {
    let scope = CancellationToken::new();
    let (client, server) = pair();
    let listener = listen(&scope, server).await.expect("listen should succeed");

    let conn = within("dial", dial(&scope, &client, DialOptions::default()))
        .await
        .expect("dial should succeed");
    let accepted = within("accept", listener.accept())
        .await
        .expect("accept should succeed");

    accepted.write(b"pong").await.expect("write should succeed");
    assert_eq!(read_exact(&conn, 4).await, b"pong");
}

#[tokio::test]
async fn two_dials_before_accept_stay_isolated() {
    let scope = CancellationToken::new();
    let (client, server) = pair();
    let listener = listen(&scope, server).await.expect("listen should succeed");

    let first = within("dial", dial(&scope, &client, DialOptions::default()))
        .await
        .expect("first dial should succeed");
    let second = within("dial", dial(&scope, &client, DialOptions::default()))
        .await
        .expect("second dial should succeed");
    assert_ne!(first.id(), second.id());

    first.write(b"for-first").await.expect("write should succeed");
    second.write(b"for-second").await.expect("write should succeed");

    let a = within("accept", listener.accept())
        .await
        .expect("accept should succeed");
    let b = within("accept", listener.accept())
        .await
        .expect("accept should succeed");
    assert_eq!(a.id(), first.id());
    assert_eq!(b.id(), second.id());

    assert_eq!(read_exact(&b, 10).await, b"for-second");
    assert_eq!(read_exact(&a, 9).await, b"for-first");

    a.write(b"back-a").await.expect("write should succeed");
    b.write(b"back-b").await.expect("write should succeed");
    assert_eq!(read_exact(&second, 6).await, b"back-b");
    assert_eq!(read_exact(&first, 6).await, b"back-a");
}

#[tokio::test]
async fn cancel_before_ack_unregisters() {
    // Nobody answers on the far end.
    let (near, _far) = pipe();
    let stream = MuxStream::new(near);
    let scope = CancellationToken::new();

    let dialing = {
        let stream = stream.clone();
        let scope = scope.clone();
        tokio::spawn(async move { dial(&scope, &stream, DialOptions::default()).await })
    };
    until("dial registers", || stream.connection_count() == 1).await;

    scope.cancel();
    let result = within("cancelled dial", dialing)
        .await
        .expect("dial task should not panic");
    assert!(matches!(result, Err(MuxError::ContextCanceled)));
    assert_eq!(stream.connection_count(), 0);
}

#[tokio::test]
async fn dial_with_cancelled_scope_fails_fast() {
    let (near, _far) = pipe();
    let stream = MuxStream::new(near);
    let scope = CancellationToken::new();
    scope.cancel();

    let result = dial(&scope, &stream, DialOptions::default()).await;
    assert!(matches!(result, Err(MuxError::ContextCanceled)));
    assert_eq!(stream.connection_count(), 0);
}

#[tokio::test]
async fn stream_failure_ends_accept_and_read() {
    let scope = CancellationToken::new();
    let (io, mut script) = scripted();
    let listener = Arc::new(
        listen(&scope, MuxStream::new(io))
            .await
            .expect("listen should succeed"),
    );

    let id = ConnectionId::random();
    script.feed_frame(id, b"");
    let conn = Arc::new(
        within("accept", listener.accept())
            .await
            .expect("accept should succeed"),
    );
    assert!(script.next_frame().await.is_handshake());

    let reading = {
        let conn = Arc::clone(&conn);
        tokio::spawn(async move {
            let mut buf = [0u8; 16];
            conn.read(&mut buf).await
        })
    };
    let accepting = {
        let listener = Arc::clone(&listener);
        tokio::spawn(async move { listener.accept().await })
    };
    tokio::task::yield_now().await;

    script.fail(io::ErrorKind::ConnectionReset);

    let read = within("blocked read", reading)
        .await
        .expect("read task should not panic");
    assert!(matches!(read, Err(MuxError::StreamClosed(_))));
    let accept = within("blocked accept", accepting)
        .await
        .expect("accept task should not panic");
    assert!(matches!(accept, Err(MuxError::StreamClosed(_))));
    assert!(listener.stream().is_closed());
}

#[tokio::test]
async fn large_write_is_split_and_reassembled() {
    let scope = CancellationToken::new();
    let (client, server) = pair();
    let listener = listen(&scope, server).await.expect("listen should succeed");
    let conn = within("dial", dial(&scope, &client, DialOptions::default()))
        .await
        .expect("dial should succeed");

    let payload: Vec<u8> = (0..3 * MAX_DATAGRAM_PAYLOAD + 17)
        .map(|i| (i % 251) as u8)
        .collect();
    let written = conn.write(&payload).await.expect("write should succeed");
    assert_eq!(written, payload.len());

    let accepted = within("accept", listener.accept())
        .await
        .expect("accept should succeed");
    assert_eq!(read_exact(&accepted, payload.len()).await, payload);
}

#[tokio::test]
async fn small_reads_keep_the_rest_of_a_chunk() {
    let scope = CancellationToken::new();
    let (client, server) = pair();
    let listener = listen(&scope, server).await.expect("listen should succeed");
    let conn = within("dial", dial(&scope, &client, DialOptions::default()))
        .await
        .expect("dial should succeed");
    conn.write(b"hello world").await.expect("write should succeed");

    let accepted = within("accept", listener.accept())
        .await
        .expect("accept should succeed");
    let mut buf = [0u8; 4];
    let mut parts = Vec::new();
    for _ in 0..3 {
        let n = within("read", accepted.read(&mut buf))
            .await
            .expect("read should succeed");
        parts.push(String::from_utf8_lossy(&buf[..n]).into_owned());
    }
    assert_eq!(parts, ["hell", "o wo", "rld"]);
}

#[tokio::test]
async fn cancelled_listener_scope_wins_over_queued_connection() {
    let parent = CancellationToken::new();
    let (client, server) = pair();
    let listener = listen(&parent, server).await.expect("listen should succeed");
    let _conn = within("dial", dial(&parent, &client, DialOptions::default()))
        .await
        .expect("dial should succeed");

    parent.cancel();
    let result = listener.accept().await;
    assert!(matches!(result, Err(MuxError::ContextCanceled)));
}

#[tokio::test]
async fn close_ends_pending_accept() {
    let scope = CancellationToken::new();
    let (_client, server) = pair();
    let listener = Arc::new(listen(&scope, server).await.expect("listen should succeed"));

    let accepting = {
        let listener = Arc::clone(&listener);
        tokio::spawn(async move { listener.accept().await })
    };
    tokio::task::yield_now().await;

    listener.close().expect("close should succeed");
    listener.close().expect("second close should succeed");
    let result = within("pending accept", accepting)
        .await
        .expect("accept task should not panic");
    assert!(matches!(result, Err(MuxError::Closed)));
    assert!(matches!(listener.accept().await, Err(MuxError::Closed)));
    assert!(listener.stream().is_closed());
}

#[tokio::test]
async fn one_listener_per_stream() {
    let scope = CancellationToken::new();
    let (_client, server) = pair();
    let _listener = listen(&scope, server.clone())
        .await
        .expect("first listen should succeed");

    let second = listen(&scope, server).await;
    assert!(matches!(second, Err(MuxError::AlreadyListening)));
}

#[tokio::test]
async fn closed_connection_cannot_be_used() {
    let scope = CancellationToken::new();
    let (client, server) = pair();
    let _listener = listen(&scope, server).await.expect("listen should succeed");
    let conn = within("dial", dial(&scope, &client, DialOptions::default()))
        .await
        .expect("dial should succeed");

    assert_eq!(client.connection_count(), 1);
    conn.close().expect("close should succeed");
    conn.close().expect("second close should succeed");
    assert_eq!(client.connection_count(), 0);
    assert!(!client.is_registered(&conn.id()));

    let mut buf = [0u8; 4];
    assert!(matches!(conn.read(&mut buf).await, Err(MuxError::Closed)));
    assert!(matches!(conn.write(b"late").await, Err(MuxError::Closed)));
}

#[tokio::test]
async fn peer_hangup_releases_dialed_connections() {
    let scope = CancellationToken::new();
    let (client, server) = pair();
    let listener = listen(&scope, server).await.expect("listen should succeed");
    let conn = within("dial", dial(&scope, &client, DialOptions::default()))
        .await
        .expect("dial should succeed");

    listener.close().expect("close should succeed");

    let mut buf = [0u8; 4];
    let result = within("read after hangup", conn.read(&mut buf)).await;
    assert!(matches!(result, Err(MuxError::StreamClosed(_))));
    until("client stream ends", || client.is_closed()).await;
    assert_eq!(client.close_reason().as_deref(), Some("end of stream"));
}

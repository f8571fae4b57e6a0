//! Two peers over one in-memory pipe: the right side echoes, the left
//! side dials a few connections and prints what comes back.
//!
//! Run with:
//!   cargo run -p iomux --example echo-over-pipe
//!
//! The same exchange across processes:
//!   cargo run -p iomux --features cli -- send --connections 3 --data hello \
//!     -- target/debug/iomux serve

use iomux::conn::{dial, listen, DialOptions, MuxStream, VirtualConn};
use iomux::transport::pipe;
use tokio_util::sync::CancellationToken;

async fn echo(conn: VirtualConn) {
    let mut buf = [0u8; 1024];
    while let Ok(n) = conn.read(&mut buf).await {
        if conn.write(&buf[..n]).await.is_err() {
            break;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let scope = CancellationToken::new();
    let (left, right) = pipe();

    let listener = listen(&scope, MuxStream::new(right)).await?;
    tokio::spawn(async move {
        while let Ok(conn) = listener.accept().await {
            eprintln!("accepted {}", conn.remote_addr());
            tokio::spawn(echo(conn));
        }
    });

    let stream = MuxStream::new(left);
    for word in ["alpha", "beta", "gamma"] {
        let conn = dial(&scope, &stream, DialOptions::default()).await?;
        conn.write(word.as_bytes()).await?;

        let mut buf = [0u8; 16];
        let n = conn.read(&mut buf).await?;
        println!("{} -> {}", conn.local_addr(), String::from_utf8_lossy(&buf[..n]));
    }

    stream.shutdown();
    Ok(())
}

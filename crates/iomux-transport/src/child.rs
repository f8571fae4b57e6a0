//! A spawned child process as a physical stream.
//!
//! The child's stdout is the read side and its stdin the write side, so a
//! child running `iomux serve` over its own stdio is the far peer.

use std::process::Stdio;

use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::join::{join, Joined};

/// Physical stream over a child's stdout (read) and stdin (write).
pub type ChildStream = Joined<ChildStdout, ChildStdin>;

/// Spawn `program` with piped stdin/stdout and inherited stderr.
///
/// The child is killed if the returned [`Child`] is dropped before it
/// exits. Dropping or shutting down the stream closes the child's stdin.
pub fn spawn<I, S>(program: &str, args: I) -> Result<(ChildStream, Child)>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    let mut child = command.spawn().map_err(|source| TransportError::Spawn {
        program: program.to_string(),
        source,
    })?;
    debug!(program, pid = ?child.id(), "spawned child process");
    let stream = take_stdio(&mut child)?;
    Ok((stream, child))
}

/// Take the piped stdout/stdin of an already spawned child.
pub fn take_stdio(child: &mut Child) -> Result<ChildStream> {
    let stdout = child.stdout.take().ok_or(TransportError::NotPiped("stdout"))?;
    let stdin = child.stdin.take().ok_or(TransportError::NotPiped("stdin"))?;
    Ok(join(stdout, stdin))
}

#[cfg(all(test, unix))]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn cat_echoes_through_the_joined_stream() {
        let (mut stream, mut child) =
            spawn("cat", std::iter::empty::<&str>()).expect("cat should spawn");

        stream.write_all(b"through cat").await.unwrap();
        stream.flush().await.unwrap();
        let mut buf = [0u8; 11];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"through cat");

        drop(stream);
        let status = child.wait().await.unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let missing = "/nonexistent/iomux-test-binary";
        match spawn(missing, ["x"]) {
            Err(TransportError::Spawn { program, .. }) => assert_eq!(program, missing),
            other => panic!("expected a spawn error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn unpiped_child_is_rejected() {
        let mut child = Command::new("true")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        assert!(matches!(
            take_stdio(&mut child),
            Err(TransportError::NotPiped("stdout"))
        ));
        let _ = child.wait().await;
    }
}

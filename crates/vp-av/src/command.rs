//! Streaming runner for external encoder processes.
//!
//! Spawns the encoder with its status stream captured and feeds each line
//! to a caller-provided closure while the process runs. Cancellation is
//! cooperative: when the token fires the child is killed (best effort) and
//! the exit is reported as cancelled.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use vp_core::{Error, Result};

/// Maximum bytes of trailing status output retained for diagnostics.
pub const STATUS_TAIL_LIMIT: usize = 500;

/// Result of a streamed encoder run.
#[derive(Debug)]
pub struct StreamedExit {
    /// Process exit status.
    pub status: ExitStatus,
    /// Whether a cancellation request arrived while the process ran.
    pub cancelled: bool,
    /// Bounded tail of the status stream, for failure diagnostics.
    pub tail: String,
}

/// An encoder invocation: program plus arguments.
#[derive(Debug, Clone)]
pub struct EncoderCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl EncoderCommand {
    /// Create a new command for the given program path.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Build a command from a full argv; the first element is the program.
    pub fn from_argv(argv: Vec<String>) -> Result<Self> {
        let mut parts = argv.into_iter();
        let program = parts
            .next()
            .ok_or_else(|| Error::Validation("encoder argv is empty".into()))?;
        Ok(Self {
            program: PathBuf::from(program),
            args: parts.collect(),
        })
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Short program name for log and error messages.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// Spawn the encoder and stream its status output line-by-line.
    ///
    /// Both `\n` and `\r` terminate a line, since encoders rewrite their
    /// status line in place with carriage returns. The child's stdout is
    /// discarded; only stderr (the status stream) is read.
    ///
    /// # Errors
    ///
    /// - [`Error::EncoderNotFound`] if the binary does not exist.
    /// - [`Error::Io`] for spawn or wait failures.
    pub async fn execute_streaming(
        &self,
        mut on_line: impl FnMut(&str),
        cancel: &CancellationToken,
    ) -> Result<StreamedExit> {
        let name = self.program_name();

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => Error::encoder_not_found(name.clone()),
                _ => Error::from(e),
            })?;

        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Internal("encoder stderr was not captured".into()))?;

        let mut tail = String::new();
        let mut pending: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 4096];
        let mut cancelled = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                    // The process may already have exited; the race is fine.
                    if let Err(e) = child.start_kill() {
                        tracing::debug!("kill after cancel failed for {name}: {e}");
                    }
                }
                read = stderr.read(&mut chunk) => match read {
                    Ok(0) => break,
                    Ok(n) => {
                        pending.extend_from_slice(&chunk[..n]);
                        drain_lines(&mut pending, &mut tail, &mut on_line);
                    }
                    Err(e) => {
                        tracing::debug!("status stream read error from {name}: {e}");
                        break;
                    }
                },
            }
        }

        // Flush a trailing line without a terminator.
        if !pending.is_empty() {
            let line = String::from_utf8_lossy(&pending);
            let line = line.trim();
            if !line.is_empty() {
                push_tail(&mut tail, line);
                on_line(line);
            }
        }

        let status = child.wait().await?;
        Ok(StreamedExit {
            status,
            cancelled: cancelled || cancel.is_cancelled(),
            tail,
        })
    }
}

/// Split complete lines off `pending`, feeding each to `on_line` and the
/// diagnostic tail. Empty lines (e.g. from `\r\n` pairs) are dropped.
fn drain_lines(pending: &mut Vec<u8>, tail: &mut String, on_line: &mut impl FnMut(&str)) {
    while let Some(pos) = pending.iter().position(|&b| b == b'\n' || b == b'\r') {
        let raw: Vec<u8> = pending.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        push_tail(tail, line);
        on_line(line);
    }
}

/// Append a line to the tail, keeping only the last [`STATUS_TAIL_LIMIT`]
/// bytes.
fn push_tail(tail: &mut String, line: &str) {
    if !tail.is_empty() {
        tail.push('\n');
    }
    tail.push_str(line);
    if tail.len() > STATUS_TAIL_LIMIT {
        let mut cut = tail.len() - STATUS_TAIL_LIMIT;
        while !tail.is_char_boundary(cut) {
            cut += 1;
        }
        tail.drain(..cut);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> EncoderCommand {
        let mut cmd = EncoderCommand::new("/bin/sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[tokio::test]
    async fn streams_stderr_lines() {
        let cmd = sh("printf 'one\\ntwo\\n' >&2");
        let mut lines = Vec::new();
        let exit = cmd
            .execute_streaming(|line| lines.push(line.to_string()), &CancellationToken::new())
            .await
            .unwrap();

        assert!(exit.status.success());
        assert!(!exit.cancelled);
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn carriage_returns_delimit_lines() {
        let cmd = sh("printf 'one\\rtwo\\n' >&2");
        let mut lines = Vec::new();
        cmd.execute_streaming(|line| lines.push(line.to_string()), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(lines, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn trailing_line_without_terminator_is_flushed() {
        let cmd = sh("printf 'tail-line' >&2");
        let mut lines = Vec::new();
        cmd.execute_streaming(|line| lines.push(line.to_string()), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(lines, vec!["tail-line"]);
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_with_tail() {
        let cmd = sh("echo 'something went wrong' >&2; exit 3");
        let exit = cmd
            .execute_streaming(|_| {}, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(exit.status.code(), Some(3));
        assert!(exit.tail.contains("something went wrong"));
    }

    #[tokio::test]
    async fn tail_is_bounded() {
        let cmd = sh("i=0; while [ $i -lt 100 ]; do echo line-$i-padding-padding >&2; i=$((i+1)); done");
        let exit = cmd
            .execute_streaming(|_| {}, &CancellationToken::new())
            .await
            .unwrap();

        assert!(exit.tail.len() <= STATUS_TAIL_LIMIT);
        // The tail keeps the most recent output.
        assert!(exit.tail.contains("line-99"));
        assert!(!exit.tail.contains("line-0-"));
    }

    #[tokio::test]
    async fn missing_binary_is_encoder_not_found() {
        let cmd = EncoderCommand::new("nonexistent_encoder_xyz_12345");
        let result = cmd
            .execute_streaming(|_| {}, &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(Error::EncoderNotFound { .. })));
    }

    #[tokio::test]
    async fn cancellation_kills_the_process() {
        let cmd = sh("sleep 30");
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let exit = cmd.execute_streaming(|_| {}, &cancel).await.unwrap();

        assert!(exit.cancelled);
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }

    #[tokio::test]
    async fn from_argv_rejects_empty() {
        assert!(EncoderCommand::from_argv(Vec::new()).is_err());
    }

    #[test]
    fn push_tail_keeps_recent_bytes() {
        let mut tail = String::new();
        for i in 0..50 {
            push_tail(&mut tail, &format!("line-{i:04}"));
        }
        assert!(tail.len() <= STATUS_TAIL_LIMIT);
        assert!(tail.contains("line-0049"));
    }
}

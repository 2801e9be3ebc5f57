//! # Child-Process I/O (C9)
//!
//! Spawns a shell command with its three standard streams redirected to
//! pipes, the same `/bin/sh -c` contract `pipe_spawn()` uses, and frames
//! its stdout according to one of three modes: `None` (raw byte pass
//! through with no framing at all), `Mpegts` (resyncing 188-byte
//! Transport Stream packet reader), `Text` (newline-delimited), or `Raw`
//! (explicit length-prefixed frames for a host that wants to forward
//! arbitrary blobs). Termination follows a two-stage ladder: a polite
//! `SIGTERM` first, escalating to `SIGKILL` if the child hasn't exited
//! within 1.5 seconds.

use std::process::Stdio;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use log::warn;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout};

use crate::error::{EngineError, Result};
use crate::ts::types::TS_PACKET_SIZE;

const TERMINATE_GRACE: Duration = Duration::from_millis(1_500);
const MPEGTS_RESYNC_SCAN_LIMIT: usize = TS_PACKET_SIZE * 8;

/// How a child process's stdout is split into discrete frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingMode {
    /// No framing; callers read raw bytes off stdout.
    None,
    /// 188-byte Transport Stream packets, resyncing on the `0x47` marker
    /// whenever the stream drifts out of alignment.
    Mpegts,
    /// Newline-delimited text, e.g. a status line protocol.
    Text,
    /// Explicit 4-byte big-endian length prefix followed by that many
    /// bytes of payload.
    Raw,
}

/// A frame read from a child process's stdout, shaped per [`FramingMode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Opaque bytes, produced by `FramingMode::None` or `FramingMode::Raw`.
    Bytes(Vec<u8>),
    /// A single Transport Stream packet (188 bytes), produced by
    /// `FramingMode::Mpegts`.
    TsPacket(Vec<u8>),
    /// A single line of text with the trailing newline stripped, produced
    /// by `FramingMode::Text`.
    Line(String),
}

/// A spawned child process with framed stdout and raw stdin/stderr access.
pub struct ChildProcess {
    child: Child,
    framing: FramingMode,
    stdout_buf: BytesMut,
    terminate_sent: bool,
}

impl ChildProcess {
    /// Spawns `command` via `/bin/sh -c`, redirecting stdin/stdout/stderr
    /// to pipes, and framing stdout per `framing`.
    pub fn spawn(command: &str, framing: FramingMode) -> Result<Self> {
        let child = Command::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false)
            .spawn()?;

        Ok(Self {
            child,
            framing,
            stdout_buf: BytesMut::new(),
            terminate_sent: false,
        })
    }

    /// Writes `data` to the child's stdin.
    pub async fn write_stdin(&mut self, data: &[u8]) -> Result<()> {
        let stdin = self
            .child
            .stdin
            .as_mut()
            .ok_or_else(|| EngineError::Fatal("child stdin not piped".into()))?;
        stdin.write_all(data).await?;
        Ok(())
    }

    /// Reads the next complete frame from the child's stdout, per the
    /// configured [`FramingMode`]. Returns `Ok(None)` on a clean EOF.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.try_extract_frame()? {
                return Ok(Some(frame));
            }

            let stdout = self
                .child
                .stdout
                .as_mut()
                .ok_or_else(|| EngineError::Fatal("child stdout not piped".into()))?;

            let mut chunk = [0u8; 4096];
            let n = stdout.read(&mut chunk).await?;
            if n == 0 {
                return Ok(None);
            }
            self.stdout_buf.extend_from_slice(&chunk[..n]);
        }
    }

    fn try_extract_frame(&mut self) -> Result<Option<Frame>> {
        match self.framing {
            FramingMode::None => {
                if self.stdout_buf.is_empty() {
                    Ok(None)
                } else {
                    let bytes = self.stdout_buf.split().to_vec();
                    Ok(Some(Frame::Bytes(bytes)))
                }
            }
            FramingMode::Mpegts => self.try_extract_ts_packet(),
            FramingMode::Text => self.try_extract_line(),
            FramingMode::Raw => self.try_extract_length_prefixed(),
        }
    }

    /// Reads one 188-byte packet starting at a `0x47` sync byte. If the
    /// buffer has drifted out of alignment (the byte at the expected sync
    /// position isn't `0x47`), scans forward for the next sync byte,
    /// discarding skipped bytes, up to a bounded window — this mirrors how
    /// a TS demuxer recovers after a dropped or corrupted byte from a
    /// misbehaving encoder pipe rather than resyncing forever on garbage
    /// input.
    fn try_extract_ts_packet(&mut self) -> Result<Option<Frame>> {
        loop {
            if self.stdout_buf.len() < TS_PACKET_SIZE {
                return Ok(None);
            }

            if self.stdout_buf[0] == 0x47 {
                let packet = self.stdout_buf.split_to(TS_PACKET_SIZE).to_vec();
                return Ok(Some(Frame::TsPacket(packet)));
            }

            let scan_window = self.stdout_buf.len().min(MPEGTS_RESYNC_SCAN_LIMIT);
            let found = self.stdout_buf[1..scan_window].iter().position(|&b| b == 0x47);

            match found {
                Some(offset) => {
                    warn!("mpegts framing: discarding {} byte(s) to resync", offset + 1);
                    self.stdout_buf.advance(offset + 1);
                }
                None => {
                    warn!(
                        "mpegts framing: no sync byte found in {} byte window, discarding",
                        scan_window
                    );
                    self.stdout_buf.advance(scan_window);
                    if self.stdout_buf.len() < TS_PACKET_SIZE {
                        return Ok(None);
                    }
                }
            }
        }
    }

    fn try_extract_line(&mut self) -> Result<Option<Frame>> {
        if let Some(pos) = self.stdout_buf.iter().position(|&b| b == b'\n') {
            let line_bytes = self.stdout_buf.split_to(pos + 1);
            let trimmed = &line_bytes[..line_bytes.len() - 1];
            let line = String::from_utf8_lossy(trimmed).into_owned();
            Ok(Some(Frame::Line(line)))
        } else {
            Ok(None)
        }
    }

    fn try_extract_length_prefixed(&mut self) -> Result<Option<Frame>> {
        if self.stdout_buf.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([
            self.stdout_buf[0],
            self.stdout_buf[1],
            self.stdout_buf[2],
            self.stdout_buf[3],
        ]) as usize;

        if self.stdout_buf.len() < 4 + len {
            return Ok(None);
        }

        self.stdout_buf.advance(4);
        let payload = self.stdout_buf.split_to(len).to_vec();
        Ok(Some(Frame::Bytes(payload)))
    }

    /// Terminates the child: sends `SIGTERM`, waits up to 1.5 seconds, and
    /// sends `SIGKILL` if it's still alive. Returns the exit status as
    /// `128 + signal` if the child was killed by a signal, matching the
    /// conventional shell exit-code encoding.
    pub async fn terminate(&mut self) -> Result<i32> {
        if let Some(pid) = self.child.id() {
            self.send_signal(pid as i32, libc::SIGTERM);
            self.terminate_sent = true;
        }

        let graceful = timeout(TERMINATE_GRACE, self.child.wait()).await;

        let status = match graceful {
            Ok(status) => status?,
            Err(_elapsed) => {
                warn!("child did not exit within grace period, sending SIGKILL");
                if let Some(pid) = self.child.id() {
                    self.send_signal(pid as i32, libc::SIGKILL);
                }
                self.child.wait().await?
            }
        };

        Ok(Self::encode_exit_status(status))
    }

    /// Polls whether the child has exited without blocking, returning its
    /// encoded exit status if so.
    pub fn try_wait(&mut self) -> Result<Option<i32>> {
        match self.child.try_wait()? {
            Some(status) => Ok(Some(Self::encode_exit_status(status))),
            None => Ok(None),
        }
    }

    fn encode_exit_status(status: std::process::ExitStatus) -> i32 {
        use std::os::unix::process::ExitStatusExt;
        match status.code() {
            Some(code) => code,
            None => 128 + status.signal().unwrap_or(0),
        }
    }

    fn send_signal(&self, pid: i32, sig: i32) {
        // SAFETY: `kill(2)` with a PID we own (this process's direct
        // child) and a standard termination signal has no memory-safety
        // implications; failure (e.g. the child already exited) is
        // reported through errno, which we intentionally ignore here
        // since `wait()` will observe the same outcome regardless.
        unsafe {
            libc::kill(pid, sig);
        }
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if !self.terminate_sent {
            if let Some(pid) = self.child.id() {
                self.send_signal(pid as i32, libc::SIGTERM);
            }
        }
    }
}

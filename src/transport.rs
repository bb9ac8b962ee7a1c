/*
 * This file is part of liquidctl-bridge.
 *
 * Copyright (C) 2025 liquidctl-bridge contributors
 *
 * liquidctl-bridge is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * liquidctl-bridge is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with liquidctl-bridge. If not, see <https://www.gnu.org/licenses/>.
 */

//! Pipe transport
//!
//! A single client handle to the helper's named pipe. On Windows this is
//! `\\.\pipe\<name>`; elsewhere a Unix domain socket in the temp directory.
//! The transport is not synchronized itself; `BridgeClient` owns it behind
//! the same lock as the connection state.
//!
//! Synchronous Windows pipe handles cannot time out a read, so there the
//! handle is wrapped in a [`ThreadedPipe`] whose reads are served by a
//! background thread and bounded with a channel timeout.

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread;
use std::time::{Duration, Instant};

use lc_error::{BridgeError, Result};
use lc_protocol::{frame_length_prefixed, parse_length_prefix, LENGTH_PREFIX_SIZE, MAX_MESSAGE_SIZE};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::pipe::{CONNECT_POLL_MS, ERROR_PIPE_BUSY, READER_THREAD_NAME};

/// How a message is delimited on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// One write per message, one bounded read per response
    #[default]
    Message,
    /// Little-endian u32 length before every body
    LengthPrefixed,
}

/// A connected pipe handle
pub trait PipeStream: Read + Write + Send {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
}

#[cfg(unix)]
impl PipeStream for std::os::unix::net::UnixStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        std::os::unix::net::UnixStream::set_read_timeout(self, timeout)
    }
}

/// Pipe handle whose reads happen on a dedicated thread.
///
/// Each `read` asks the thread for one chunk and waits for it at most the
/// configured timeout. The thread only reads when asked: synchronous Windows
/// handles serialize I/O, so a read left pending would hold up the next
/// write. A read that timed out stays outstanding and is collected by the
/// next `read`. The thread exits when the handle is dropped and its last
/// read returns.
pub struct ThreadedPipe<W> {
    writer: W,
    requests: SyncSender<()>,
    chunks: Receiver<io::Result<Vec<u8>>>,
    outstanding: bool,
    pending: Vec<u8>,
    offset: usize,
    timeout: Mutex<Option<Duration>>,
}

impl<W: Write + Send> ThreadedPipe<W> {
    /// Wrap a handle split into its read and write halves
    pub fn spawn<R: Read + Send + 'static>(reader: R, writer: W) -> io::Result<Self> {
        let (requests, request_rx) = mpsc::sync_channel(1);
        let (chunk_tx, chunks) = mpsc::sync_channel(1);
        thread::Builder::new()
            .name(READER_THREAD_NAME.to_string())
            .spawn(move || serve_reads(reader, request_rx, chunk_tx))?;
        Ok(Self {
            writer,
            requests,
            chunks,
            outstanding: false,
            pending: Vec::new(),
            offset: 0,
            timeout: Mutex::new(None),
        })
    }

    fn next_chunk(&mut self) -> io::Result<Vec<u8>> {
        if !self.outstanding {
            self.requests
                .send(())
                .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
            self.outstanding = true;
        }

        let timeout = *self.timeout.lock();
        let received = match timeout {
            Some(timeout) => self.chunks.recv_timeout(timeout),
            None => self.chunks.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(chunk) => {
                self.outstanding = false;
                chunk
            }
            Err(RecvTimeoutError::Timeout) => Err(io::Error::new(io::ErrorKind::TimedOut, "pipe read timed out")),
            Err(RecvTimeoutError::Disconnected) => Err(io::ErrorKind::BrokenPipe.into()),
        }
    }
}

fn serve_reads<R: Read>(mut reader: R, requests: Receiver<()>, chunks: SyncSender<io::Result<Vec<u8>>>) {
    let mut buffer = vec![0u8; MAX_MESSAGE_SIZE];
    while requests.recv().is_ok() {
        let result = reader.read(&mut buffer).map(|n| buffer[..n].to_vec());
        let done = !matches!(&result, Ok(chunk) if !chunk.is_empty());
        if chunks.send(result).is_err() || done {
            break;
        }
    }
}

impl<W: Write + Send> Read for ThreadedPipe<W> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.offset >= self.pending.len() {
            let chunk = self.next_chunk()?;
            if chunk.is_empty() {
                return Ok(0);
            }
            self.pending = chunk;
            self.offset = 0;
        }
        let available = &self.pending[self.offset..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.offset += n;
        Ok(n)
    }
}

impl<W: Write + Send> Write for ThreadedPipe<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl<W: Write + Send> PipeStream for ThreadedPipe<W> {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        *self.timeout.lock() = timeout;
        Ok(())
    }
}

/// Opens pipe handles; swapped out in tests
pub trait PipeConnector: Send + Sync {
    fn connect(&self) -> io::Result<Box<dyn PipeStream>>;

    /// Human-readable endpoint for logs and errors
    fn describe(&self) -> String;
}

/// The helper's named pipe
#[derive(Debug, Clone)]
pub struct NamedPipe {
    name: String,
}

impl NamedPipe {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Filesystem path of the pipe endpoint
    pub fn path(&self) -> PathBuf {
        #[cfg(windows)]
        {
            PathBuf::from(format!(r"\\.\pipe\{}", self.name))
        }
        #[cfg(not(windows))]
        {
            let candidate = PathBuf::from(&self.name);
            if candidate.is_absolute() {
                candidate
            } else {
                std::env::temp_dir().join(&self.name)
            }
        }
    }
}

impl PipeConnector for NamedPipe {
    #[cfg(unix)]
    fn connect(&self) -> io::Result<Box<dyn PipeStream>> {
        let stream = std::os::unix::net::UnixStream::connect(self.path())?;
        Ok(Box::new(stream))
    }

    #[cfg(windows)]
    fn connect(&self) -> io::Result<Box<dyn PipeStream>> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(self.path())?;
        let reader = file.try_clone()?;
        Ok(Box::new(ThreadedPipe::spawn(reader, file)?))
    }

    fn describe(&self) -> String {
        self.path().display().to_string()
    }
}

/// Errors worth another connect attempt before the deadline
fn is_transient_connect_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused | io::ErrorKind::WouldBlock
    ) || err.raw_os_error() == Some(ERROR_PIPE_BUSY)
}

pub struct PipeTransport {
    connector: Box<dyn PipeConnector>,
    stream: Option<Box<dyn PipeStream>>,
    framing: Framing,
    buffer_size: usize,
}

impl PipeTransport {
    pub fn new(connector: Box<dyn PipeConnector>, framing: Framing, buffer_size: usize) -> Self {
        Self {
            connector,
            stream: None,
            framing,
            buffer_size,
        }
    }

    pub fn endpoint(&self) -> String {
        self.connector.describe()
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Connect, returning false on failure. A no-op when already connected.
    pub fn connect(&mut self, timeout: Duration) -> bool {
        match self.try_connect(timeout) {
            Ok(()) => true,
            Err(e) => {
                warn!("Pipe connect failed: {}", e);
                false
            }
        }
    }

    pub fn try_connect(&mut self, timeout: Duration) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let endpoint = self.connector.describe();
        let deadline = Instant::now() + timeout;
        loop {
            match self.connector.connect() {
                Ok(stream) => {
                    debug!("Connected to {}", endpoint);
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                    return Err(BridgeError::AccessDenied(endpoint));
                }
                Err(e) if is_transient_connect_error(&e) => {
                    if Instant::now() >= deadline {
                        return Err(BridgeError::ConnectTimeout {
                            pipe: endpoint,
                            timeout_ms: timeout.as_millis() as u64,
                        });
                    }
                    thread::sleep(Duration::from_millis(CONNECT_POLL_MS));
                }
                Err(e) => return Err(BridgeError::from_pipe_io(&endpoint, e)),
            }
        }
    }

    /// Write one whole message and flush it
    pub fn write(&mut self, payload: &[u8]) -> Result<()> {
        let endpoint = self.connector.describe();
        let framed;
        let bytes = match self.framing {
            Framing::Message => payload,
            Framing::LengthPrefixed => {
                framed = frame_length_prefixed(payload).map_err(BridgeError::protocol)?;
                &framed[..]
            }
        };

        let stream = self.stream.as_mut().ok_or(BridgeError::ConnectionClosed)?;
        let result = stream.write_all(bytes).and_then(|_| stream.flush());
        if let Err(e) = result {
            self.close();
            return Err(BridgeError::from_pipe_io(&endpoint, e));
        }
        Ok(())
    }

    /// Read one response. Any failure drops the handle.
    pub fn read(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        let result = self.read_message(timeout);
        if result.is_err() {
            self.close();
        }
        result
    }

    fn read_message(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        let endpoint = self.connector.describe();
        let buffer_size = self.buffer_size;
        let framing = self.framing;
        let stream = self.stream.as_mut().ok_or(BridgeError::ConnectionClosed)?;
        stream
            .set_read_timeout(Some(timeout))
            .map_err(|e| BridgeError::from_pipe_io(&endpoint, e))?;

        match framing {
            Framing::Message => {
                let mut buffer = vec![0u8; buffer_size];
                let n = stream
                    .read(&mut buffer)
                    .map_err(|e| BridgeError::from_pipe_io(&endpoint, e))?;
                if n == 0 {
                    return Err(BridgeError::ConnectionClosed);
                }
                // A full buffer means the response may have been cut short
                if n == buffer_size {
                    return Err(BridgeError::MessageTooLarge {
                        size: n,
                        max_size: buffer_size,
                    });
                }
                buffer.truncate(n);
                Ok(buffer)
            }
            Framing::LengthPrefixed => {
                let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
                stream
                    .read_exact(&mut prefix)
                    .map_err(|e| BridgeError::from_pipe_io(&endpoint, e))?;
                let len = parse_length_prefix(prefix);
                if len > buffer_size {
                    return Err(BridgeError::MessageTooLarge {
                        size: len,
                        max_size: buffer_size,
                    });
                }
                let mut body = vec![0u8; len];
                stream
                    .read_exact(&mut body)
                    .map_err(|e| BridgeError::from_pipe_io(&endpoint, e))?;
                Ok(body)
            }
        }
    }

    /// Drop the handle; the next operation must reconnect
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!("Closed pipe {}", self.connector.describe());
        }
    }
}

//! Buffered, framed I/O over a client connection.
//!
//! The dispatcher reads either newline-terminated lines or exactly `n` raw
//! bytes, depending on the current [`Framing`]. Bytes read past the end of
//! one frame stay buffered, so switching framing between frames never loses
//! data the client sent early.

use std::time::Duration;

use sift_common::traits::protocol::Connection;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{ControlError, Result};

/// Longest command line accepted, excluding the terminator
pub const MAX_LINE: usize = 8192;

const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// Newline terminated text
    #[default]
    Line,
    /// Exactly this many raw bytes
    Fixed(usize),
}

#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
    /// A line with its terminator removed
    Line(String),
    Payload(Vec<u8>),
}

pub struct Dispatcher<S: Connection> {
    stream: S,
    buffer: Vec<u8>,
    framing: Framing,
    timeout: Duration,
}

impl<S: Connection> Dispatcher<S> {
    pub fn new(stream: S, timeout: Duration) -> Self {
        Self {
            stream,
            buffer: Vec::with_capacity(READ_CHUNK),
            framing: Framing::Line,
            timeout,
        }
    }

    pub const fn framing(&self) -> Framing {
        self.framing
    }

    pub fn set_framing(&mut self, framing: Framing) {
        if self.framing != framing {
            tracing::trace!("Framing {:?} -> {framing:?}", self.framing);
            self.framing = framing;
        }
    }

    ///
    /// Read the next frame
    ///
    /// # Errors
    /// [`ControlError::Closed`] once the client has gone away, a timeout if
    /// the client stays idle, an oversized line, or any I/O failure
    ///
    pub async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.take_frame()? {
                return Ok(frame);
            }

            let mut chunk = [0; READ_CHUNK];
            let read = tokio::time::timeout(self.timeout, self.stream.read(&mut chunk))
                .await
                .map_err(|_| ControlError::Timeout(self.timeout.as_secs()))??;

            if read == 0 {
                return Err(ControlError::Closed);
            }

            self.buffer.extend_from_slice(&chunk[..read]);
        }
    }

    fn take_frame(&mut self) -> Result<Option<Frame>> {
        match self.framing {
            Framing::Line => {
                let Some(end) = self.buffer.iter().position(|&b| b == b'\n') else {
                    if self.buffer.len() > MAX_LINE {
                        return Err(ControlError::LineTooLong(MAX_LINE));
                    }
                    return Ok(None);
                };

                let mut line = self.buffer.drain(..=end).collect::<Vec<_>>();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }

                if line.len() > MAX_LINE {
                    return Err(ControlError::LineTooLong(MAX_LINE));
                }

                Ok(Some(Frame::Line(String::from_utf8_lossy(&line).into_owned())))
            }
            Framing::Fixed(size) if self.buffer.len() >= size => {
                Ok(Some(Frame::Payload(self.buffer.drain(..size).collect())))
            }
            Framing::Fixed(size) => {
                self.buffer.reserve(size - self.buffer.len());
                Ok(None)
            }
        }
    }

    ///
    /// Write `bytes` and flush them to the client
    ///
    /// # Errors
    /// If the write fails or the client stops reading for longer than the timeout
    ///
    pub async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        tokio::time::timeout(self.timeout, async {
            self.stream.write_all(bytes).await?;
            self.stream.flush().await
        })
        .await
        .map_err(|_| ControlError::Timeout(self.timeout.as_secs()))??;

        Ok(())
    }

    /// Close the connection; errors are ignored since the session is over either way
    pub async fn shutdown(&mut self) {
        if let Err(err) = self.stream.shutdown().await {
            tracing::debug!("Error shutting down connection: {err}");
        }
    }
}

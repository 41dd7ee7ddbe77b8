//! [`RealLink`] – line-oriented request/response over a serial port.
//!
//! `serialport` is blocking, so every round trip runs on the blocking pool
//! with the port handle moved in and handed back afterwards. The read loop
//! enforces the round-trip deadline itself, which means an expired request
//! never leaves the port stranded inside a detached task.

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use megg_types::{LinkMode, MeggError};
use serialport::{ClearBuffer, SerialPort};
use tracing::{debug, info, warn};

use crate::frame::{LinkCommand, LinkReply};
use crate::link::{HardwareLink, LinkSettings};

/// Granularity of a single blocking read.
const READ_SLICE: Duration = Duration::from_millis(50);

/// Upper bound on a buffered reply line.
const MAX_LINE: usize = 512;

struct SerialIo {
    port: Box<dyn SerialPort>,
    /// Bytes received after the last complete line.
    pending: Vec<u8>,
}

pub struct RealLink {
    port_name: String,
    timeout: Duration,
    io: Option<SerialIo>,
}

impl RealLink {
    /// Open `port_name`, wait for the board to reset and verify it answers
    /// `STATUS`.
    ///
    /// # Errors
    ///
    /// [`MeggError::LinkIo`] when the port cannot be opened and
    /// [`MeggError::LinkTimeout`] when the board stays silent.
    pub async fn open(port_name: &str, settings: &LinkSettings) -> Result<Self, MeggError> {
        let port = serialport::new(port_name, settings.baud_rate)
            .timeout(READ_SLICE)
            .open()
            .map_err(|e| MeggError::LinkIo {
                port: port_name.to_string(),
                details: e.to_string(),
            })?;

        let mut link = Self {
            port_name: port_name.to_string(),
            timeout: settings.timeout,
            io: Some(SerialIo {
                port,
                pending: Vec::new(),
            }),
        };

        if !settings.settle.is_zero() {
            tokio::time::sleep(settings.settle).await;
        }

        match link.send(&LinkCommand::Status).await {
            Ok(reply) => {
                info!(port = %port_name, reply = %reply.encode(), "controller board answered");
                Ok(link)
            }
            Err(e) => {
                link.disconnect();
                Err(e)
            }
        }
    }
}

#[async_trait]
impl HardwareLink for RealLink {
    fn mode(&self) -> LinkMode {
        LinkMode::Real
    }

    fn port(&self) -> Option<&str> {
        Some(&self.port_name)
    }

    async fn send(&mut self, command: &LinkCommand) -> Result<LinkReply, MeggError> {
        let io = self
            .io
            .take()
            .ok_or_else(|| MeggError::LinkUnavailable(format!("{} is closed", self.port_name)))?;
        let line = command.encode();
        let port_name = self.port_name.clone();
        let timeout = self.timeout;

        debug!(port = %port_name, tx = %line, "link write");
        let (io, result) = tokio::task::spawn_blocking(move || {
            let mut io = io;
            let result = transact(&mut io, &port_name, &line, timeout);
            (io, result)
        })
        .await
        .map_err(|e| MeggError::LinkUnavailable(format!("serial worker failed: {e}")))?;

        // Port state is unknown after a transport failure.
        match &result {
            Err(e) if e.is_transport() => {
                warn!(port = %self.port_name, error = %e, "serial round trip failed");
                drop(io);
            }
            _ => self.io = Some(io),
        }
        result
    }

    fn disconnect(&mut self) {
        if self.io.take().is_some() {
            info!(port = %self.port_name, "serial link closed");
        }
    }
}

fn transact(
    io: &mut SerialIo,
    port_name: &str,
    line: &str,
    timeout: Duration,
) -> Result<LinkReply, MeggError> {
    let io_err = |e: std::io::Error| MeggError::LinkIo {
        port: port_name.to_string(),
        details: e.to_string(),
    };

    // Stale chatter from the board must not be taken as this command's reply.
    io.pending.clear();
    if let Err(e) = io.port.clear(ClearBuffer::Input) {
        debug!(port = %port_name, error = %e, "failed to clear input buffer");
    }

    io.port
        .write_all(format!("{line}\n").as_bytes())
        .map_err(io_err)?;
    io.port.flush().map_err(io_err)?;

    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; 128];
    loop {
        while let Some(pos) = io.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = io.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&raw);
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            debug!(port = %port_name, rx = %text, "link read");
            let reply = LinkReply::parse(text);
            if !reply.is_informational() {
                return Ok(reply);
            }
        }

        if Instant::now() >= deadline {
            return Err(MeggError::LinkTimeout(timeout));
        }

        match io.port.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                io.pending.extend_from_slice(&buf[..n]);
                if io.pending.len() > MAX_LINE {
                    warn!(port = %port_name, "discarding oversized reply line");
                    io.pending.clear();
                }
            }
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => return Err(io_err(e)),
        }
    }
}

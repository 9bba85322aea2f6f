//! Line-oriented transport
//!
//! Binds the consumer to a pair of text streams (stdin/stdout for the
//! server binary). One message per line in both directions:
//! ```text
//! <routing-key> <json-body>
//! ```
//! Lines are split on raw bytes. A body that is not valid UTF-8 still
//! reaches the dispatcher, which answers it like any other malformed
//! body. End of input closes the transport. There is no redelivery, so
//! a nack is only logged.

use std::io::{self, BufRead, BufReader, Write};
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self as cb, Receiver, RecvTimeoutError, Sender};

use crate::error::{CourierError, Result};
use super::{Channel, Connector, Delivery, Next, Topology};

/// Single-use transport over a reader and a writer
pub struct LineTransport {
    input: Option<Box<dyn BufRead + Send>>,
    output: Option<Box<dyn Write + Send>>,
}

impl LineTransport {
    pub fn new(input: impl BufRead + Send + 'static, output: impl Write + Send + 'static) -> Self {
        Self {
            input: Some(Box::new(input)),
            output: Some(Box::new(output)),
        }
    }

    /// Transport over the process's stdin and stdout
    pub fn stdio() -> Self {
        Self::new(BufReader::new(io::stdin()), io::stdout())
    }
}

impl Connector for LineTransport {
    fn connect(&mut self) -> Result<Box<dyn Channel>> {
        let (input, output) = match (self.input.take(), self.output.take()) {
            (Some(input), Some(output)) => (input, output),
            _ => {
                return Err(CourierError::Config(
                    "line transport can only be connected once".to_string(),
                ))
            }
        };

        // Reading blocks, so it happens on its own thread and lines are
        // handed over through a channel that supports timeouts.
        let (tx, rx) = cb::unbounded();
        thread::Builder::new()
            .name("line-reader".to_string())
            .spawn(move || read_lines(input, tx))?;

        Ok(Box::new(LineChannel {
            lines: rx,
            output,
            next_tag: 1,
        }))
    }

    fn endpoint(&self) -> String {
        "lines".to_string()
    }
}

struct LineChannel {
    lines: Receiver<io::Result<Vec<u8>>>,
    output: Box<dyn Write + Send>,
    next_tag: u64,
}

/// Forward raw lines until end of input, a read error, or a dropped receiver
fn read_lines(mut input: Box<dyn BufRead + Send>, tx: Sender<io::Result<Vec<u8>>>) {
    loop {
        let mut line = Vec::new();
        match input.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {
                if tx.send(Ok(line)).is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e));
                break;
            }
        }
    }
}

/// Split `<routing-key> <body>`; the body may be empty
fn parse_line(line: &[u8]) -> Option<(&[u8], &[u8])> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return None;
    }
    Some(match line.iter().position(u8::is_ascii_whitespace) {
        Some(at) => (&line[..at], line[at..].trim_ascii_start()),
        None => (line, &[][..]),
    })
}

fn write_line(output: &mut dyn Write, routing_key: &str, body: &[u8]) -> io::Result<()> {
    output.write_all(routing_key.as_bytes())?;
    output.write_all(b" ")?;
    output.write_all(body)?;
    output.write_all(b"\n")?;
    output.flush()
}

impl Channel for LineChannel {
    fn declare(&mut self, topology: &Topology) -> Result<()> {
        tracing::debug!(
            queue = %topology.queue,
            routing_keys = ?topology.routing_keys,
            "Line transport ready"
        );
        Ok(())
    }

    fn next_delivery(&mut self, timeout: Duration) -> Result<Next> {
        let line = match self.lines.recv_timeout(timeout) {
            Ok(Ok(line)) => line,
            Ok(Err(e)) => return Err(CourierError::Connection(format!("read failed: {}", e))),
            Err(RecvTimeoutError::Timeout) => return Ok(Next::Idle),
            Err(RecvTimeoutError::Disconnected) => return Ok(Next::Closed),
        };

        let Some((routing_key, body)) = parse_line(&line) else {
            return Ok(Next::Idle);
        };

        // A garbled routing key matches no command and gets the
        // unsupported-event response
        let tag = self.next_tag;
        self.next_tag += 1;
        Ok(Next::Delivery(Delivery {
            tag,
            routing_key: String::from_utf8_lossy(routing_key).into_owned(),
            body: body.to_vec(),
            redelivered: false,
        }))
    }

    fn publish(&mut self, _exchange: &str, routing_key: &str, body: &[u8]) -> Result<()> {
        write_line(&mut self.output, routing_key, body)
            .map_err(|e| CourierError::Connection(format!("write failed: {}", e)))
    }

    fn ack(&mut self, tag: u64) -> Result<()> {
        tracing::trace!(tag, "ack");
        Ok(())
    }

    fn nack(&mut self, tag: u64, requeue: bool) -> Result<()> {
        tracing::warn!(tag, requeue, "Message rejected, line transport cannot redeliver");
        Ok(())
    }
}

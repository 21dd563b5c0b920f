//! # Connection
//!
//! Purpose: Own one socket to the server and perform pipelined round trips
//! for the batching layer.
//!
//! ## Design Principles
//! 1. **One Write, N Reads**: A batch is encoded into a single buffer, written
//!    once, then exactly one reply per call is read back.
//! 2. **Buffer Reuse**: Each connection keeps its own read/write buffers.
//! 3. **Fail Fast**: IO or framing failures poison the batch; no partial reply
//!    is returned.

use std::io::{self, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
#[cfg(unix)]
use std::os::unix::net::UnixStream;

use tracing::{debug, trace, warn};

use crate::call::Call;
use crate::client::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::reply::Reply;
use crate::resp::{encode_calls, read_reply};

/// Performs one network round trip for an ordered batch of calls.
///
/// The returned reply is a `Reply::Batch` whose elements are in call order.
/// Transport failures are returned as `Err`; command errors are embedded in
/// the corresponding element.
pub trait BatchSender {
    fn send_batch(&mut self, calls: Vec<Call>) -> ClientResult<Reply>;
}

enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Stream::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Stream::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Stream::Unix(stream) => stream.flush(),
        }
    }
}

/// Single server connection with reusable buffers.
///
/// Any transport error invalidates the connection: replies of the failed
/// batch may still be in flight, so later batches would read them as their own.
pub struct Connection {
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<Stream>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
    valid: bool,
}

impl Connection {
    /// Opens a connection and selects the configured database.
    pub fn connect(config: &ClientConfig) -> ClientResult<Self> {
        let stream = connect_stream(config)?;
        let mut conn = Connection {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
            valid: true,
        };

        if config.database != 0 {
            let reply = conn.send_batch(vec![Call::bare("SELECT").arg(config.database)])?;
            for elem in reply.elems() {
                if let Some(err) = elem.error() {
                    return Err(ClientError::Reply(err.clone()));
                }
            }
        }
        Ok(conn)
    }

    /// False once a round trip has failed on this connection.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    fn round_trip(&mut self, calls: &[Call]) -> ClientResult<Reply> {
        self.write_buf.clear();
        encode_calls(calls, &mut self.write_buf);
        for call in calls {
            trace!(command = call.command(), args = call.args().len(), "pipelined call");
        }
        debug!(calls = calls.len(), bytes = self.write_buf.len(), "sending batch");

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf)?;
        stream.flush()?;

        let mut elems = Vec::with_capacity(calls.len());
        for _ in 0..calls.len() {
            elems.push(read_reply(&mut self.reader, &mut self.line_buf)?);
        }
        Ok(Reply::batch(elems))
    }
}

impl BatchSender for Connection {
    fn send_batch(&mut self, calls: Vec<Call>) -> ClientResult<Reply> {
        if !self.valid {
            return Err(ClientError::ConnectionBroken);
        }
        if calls.is_empty() {
            return Ok(Reply::batch(Vec::new()));
        }

        let reply = self.round_trip(&calls);
        if let Err(err) = &reply {
            warn!(error = %err, calls = calls.len(), "round trip failed, dropping connection");
            self.valid = false;
        }
        reply
    }
}

#[cfg(unix)]
fn connect_unix(config: &ClientConfig) -> ClientResult<Option<Stream>> {
    let Some(path) = &config.path else {
        return Ok(None);
    };
    let stream = UnixStream::connect(path)?;
    stream.set_read_timeout(config.read_timeout)?;
    stream.set_write_timeout(config.write_timeout)?;
    Ok(Some(Stream::Unix(stream)))
}

#[cfg(not(unix))]
fn connect_unix(_config: &ClientConfig) -> ClientResult<Option<Stream>> {
    Ok(None)
}

fn connect_stream(config: &ClientConfig) -> ClientResult<Stream> {
    if let Some(stream) = connect_unix(config)? {
        return Ok(stream);
    }

    let addr: SocketAddr = config.addr.parse().map_err(|_| ClientError::InvalidAddress)?;
    let stream = match config.connect_timeout {
        Some(timeout) => TcpStream::connect_timeout(&addr, timeout)?,
        None => TcpStream::connect(addr)?,
    };
    stream.set_read_timeout(config.read_timeout)?;
    stream.set_write_timeout(config.write_timeout)?;
    // Disable Nagle to keep request latency low for small payloads.
    stream.set_nodelay(true)?;
    Ok(Stream::Tcp(stream))
}

//! Transport abstraction for pluggable I/O.

use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    sync::{Arc, Condvar, Mutex},
};

/// Ordered byte-stream abstraction the connection runs over.
///
/// This trait allows various transports (TCP, a reliable datagram layer, an
/// in-memory pipe for tests) to be plugged into the connection without
/// coupling to a concrete implementation. Methods take `&self` because one
/// end of a connection reads and writes from different threads.
pub trait Transport: Send + Sync {
    /// Reads up to `buf.len()` bytes from the stream. A return of 0 means
    /// the peer closed its end.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes the entire buffer to the stream.
    fn write_all(&self, buf: &[u8]) -> io::Result<()>;

    /// Returns the local address of the stream.
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Returns the remote address of the stream.
    fn remote_addr(&self) -> io::Result<SocketAddr>;

    /// Shuts the stream down in both directions. Pending reads on the other
    /// side observe end-of-stream.
    fn close(&self) -> io::Result<()>;

    /// Reads exactly `buf.len()` bytes, failing with `UnexpectedEof` if the
    /// stream ends first.
    fn read_exact(&self, buf: &mut [u8]) -> io::Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..])? {
                0 => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "transport closed mid-read",
                    ))
                }
                n => filled += n,
            }
        }
        Ok(())
    }
}

/// Creates a synchronous, in-memory full-duplex stream pair. Everything
/// written to one end becomes readable on the other, in order. Useful for
/// tests and for stacking a connection on top of an existing session layer.
pub fn pipe() -> (Pipe, Pipe) {
    let a = Arc::new(Half::default());
    let b = Arc::new(Half::default());
    let addr_a: SocketAddr = ([127, 0, 0, 1], 19132).into();
    let addr_b: SocketAddr = ([127, 0, 0, 1], 19133).into();
    (
        Pipe { read: Arc::clone(&a), write: Arc::clone(&b), local: addr_a, remote: addr_b },
        Pipe { read: b, write: a, local: addr_b, remote: addr_a },
    )
}

#[derive(Default)]
struct Half {
    state: Mutex<HalfState>,
    readable: Condvar,
}

#[derive(Default)]
struct HalfState {
    buf: VecDeque<u8>,
    closed: bool,
}

/// One end of an in-memory stream pair created by [`pipe`].
pub struct Pipe {
    read: Arc<Half>,
    write: Arc<Half>,
    local: SocketAddr,
    remote: SocketAddr,
}

impl Transport for Pipe {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.read.state.lock().unwrap();
        while state.buf.is_empty() && !state.closed {
            state = self.read.readable.wait(state).unwrap();
        }
        if state.buf.is_empty() {
            return Ok(0);
        }
        let n = buf.len().min(state.buf.len());
        for slot in buf[..n].iter_mut() {
            *slot = state.buf.pop_front().unwrap();
        }
        Ok(n)
    }

    fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        let mut state = self.write.state.lock().unwrap();
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"));
        }
        state.buf.extend(buf.iter().copied());
        self.write.readable.notify_all();
        Ok(())
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local)
    }

    fn remote_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.remote)
    }

    fn close(&self) -> io::Result<()> {
        for half in [&self.read, &self.write] {
            half.state.lock().unwrap().closed = true;
            half.readable.notify_all();
        }
        Ok(())
    }
}

impl Transport for TcpStream {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut stream = self;
        Read::read(&mut stream, buf)
    }

    fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        let mut stream = self;
        Write::write_all(&mut stream, buf)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::local_addr(self)
    }

    fn remote_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }

    fn close(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn test_pipe_round_trip() {
        let (a, b) = pipe();
        a.write_all(b"hello").unwrap();
        let mut buf = [0u8; 5];
        b.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_pipe_read_blocks_until_write() {
        let (a, b) = pipe();
        let writer = thread::spawn(move || {
            a.write_all(b"late").unwrap();
        });
        let mut buf = [0u8; 4];
        b.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"late");
        writer.join().unwrap();
    }

    #[test]
    fn test_pipe_close_wakes_reader_with_eof() {
        let (a, b) = pipe();
        let reader = thread::spawn(move || {
            let mut buf = [0u8; 1];
            Transport::read(&b, &mut buf)
        });
        a.close().unwrap();
        assert_eq!(reader.join().unwrap().unwrap(), 0);
    }

    #[test]
    fn test_pipe_addresses_are_mirrored() {
        let (a, b) = pipe();
        assert_eq!(a.local_addr().unwrap(), b.remote_addr().unwrap());
        assert_eq!(a.remote_addr().unwrap(), b.local_addr().unwrap());
    }
}

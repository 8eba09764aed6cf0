//! TCP link: the Sensor listens, the Base dials. Sockets are nonblocking so the
//! session's own polling loop stays in charge of every wait.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use pltp_core::{Transport, HEADER_LEN, MAX_BODY_LEN};

/// Upper bound for a single peek; one whole frame.
const PEEK_LEN: usize = HEADER_LEN + MAX_BODY_LEN;

pub struct TcpLink {
    listen: SocketAddr,
    peer: SocketAddr,
    dial_timeout: Duration,
    listener: Option<TcpListener>,
    stream: Option<TcpStream>,
}

impl TcpLink {
    pub fn new(listen: SocketAddr, peer: SocketAddr) -> Self {
        Self {
            listen,
            peer,
            dial_timeout: Duration::from_millis(500),
            listener: None,
            stream: None,
        }
    }

    pub fn with_dial_timeout(mut self, d: Duration) -> Self {
        self.dial_timeout = d;
        self
    }

    /// Bound address while advertising.
    #[cfg(test)]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    fn attach(&mut self, stream: TcpStream, from: SocketAddr) -> io::Result<()> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        tracing::debug!(%from, "tcp peer attached");
        self.stream = Some(stream);
        Ok(())
    }

    fn drop_stream(&mut self, why: &str) {
        if self.stream.take().is_some() {
            tracing::debug!(why, "tcp peer detached");
        }
    }

    fn stream(&mut self) -> io::Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
    }
}

impl Transport for TcpLink {
    fn advertise(&mut self, identity: &str, initiator: bool) -> io::Result<()> {
        if initiator {
            return Ok(());
        }
        let listener = TcpListener::bind(self.listen)?;
        listener.set_nonblocking(true)?;
        tracing::info!(identity, addr = %listener.local_addr()?, "listening");
        self.listener = Some(listener);
        Ok(())
    }

    fn connect(&mut self, remote: &str) -> io::Result<()> {
        let stream = TcpStream::connect_timeout(&self.peer, self.dial_timeout)?;
        tracing::debug!(remote, addr = %self.peer, "dialed");
        let peer = self.peer;
        self.attach(stream, peer)
    }

    fn connected(&mut self) -> bool {
        if self.stream.is_none() {
            let accepted = match self.listener.as_ref() {
                Some(l) => l.accept(),
                None => return false,
            };
            match accepted {
                Ok((stream, from)) => {
                    if let Err(e) = self.attach(stream, from) {
                        tracing::warn!(error = %e, "could not configure accepted socket");
                        return false;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return false,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    return false;
                }
            }
        }
        // A zero-length peek on a readable socket means the peer closed.
        let mut probe = [0u8; 1];
        match self.stream.as_ref().map(|s| s.peek(&mut probe)) {
            Some(Ok(0)) => {
                self.drop_stream("closed by peer");
                false
            }
            Some(Ok(_)) => true,
            Some(Err(e)) if e.kind() == io::ErrorKind::WouldBlock => true,
            Some(Err(_)) => {
                self.drop_stream("socket error");
                false
            }
            None => false,
        }
    }

    fn available(&mut self) -> usize {
        let mut buf = [0u8; PEEK_LEN];
        match self.stream.as_ref().map(|s| s.peek(&mut buf)) {
            Some(Ok(0)) => {
                self.drop_stream("closed by peer");
                0
            }
            Some(Ok(n)) => n,
            Some(Err(e)) if e.kind() == io::ErrorKind::WouldBlock => 0,
            Some(Err(_)) => {
                self.drop_stream("socket error");
                0
            }
            None => 0,
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let got = self.stream()?.read(buf);
        match got {
            Ok(0) => {
                self.drop_stream("closed by peer");
                Err(io::ErrorKind::UnexpectedEof.into())
            }
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let stream = self.stream()?;
        let mut rest = bytes;
        while !rest.is_empty() {
            match stream.write(rest) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => rest = &rest[n..],
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream()?.flush()
    }

    fn disconnect(&mut self) {
        if let Some(s) = self.stream.take() {
            let _ = s.shutdown(Shutdown::Both);
        }
        self.listener = None;
    }
}

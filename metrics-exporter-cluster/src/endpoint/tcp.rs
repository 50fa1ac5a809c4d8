use std::{
    io::{self, Write as _},
    net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs as _},
    time::Duration,
};

use tracing::debug;

use super::{EndpointSettings, Transport, TransportError, TransportKind};

fn dial(target: &str, timeout: Option<Duration>) -> Result<TcpStream, TransportError> {
    let connect_error = |source| TransportError::Connect { addr: target.to_string(), source };

    let addrs: Vec<SocketAddr> = target.to_socket_addrs().map_err(connect_error)?.collect();

    let mut last_error = io::Error::new(io::ErrorKind::NotFound, "address resolved to no socket addresses");
    for addr in addrs {
        let result = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };

        match result {
            Ok(stream) => {
                stream.set_write_timeout(timeout).map_err(connect_error)?;
                return Ok(stream);
            }
            Err(e) => {
                debug!(%addr, error = %e, "Failed to connect to resolved address.");
                last_error = e;
            }
        }
    }

    Err(connect_error(last_error))
}

enum StreamState {
    // Intermediate state during write attempts.
    Inconsistent,

    // The previous write failed, so the stream was dropped.
    Disconnected,

    // Connected and ready to write.
    Ready(TcpStream),
}

/// Writes batches over a TCP stream.
///
/// When a write fails, the stream is dropped and re-dialed on the next write.
pub(super) struct TcpTransport {
    target: String,
    timeout: Option<Duration>,
    state: StreamState,
}

impl TcpTransport {
    pub fn connect(target: &str, settings: &EndpointSettings) -> Result<Self, TransportError> {
        let timeout = settings.timeout();
        let stream = dial(target, timeout)?;
        Ok(Self { target: target.to_string(), timeout, state: StreamState::Ready(stream) })
    }
}

impl Transport for TcpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    fn write(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        loop {
            let old_state = std::mem::replace(&mut self.state, StreamState::Inconsistent);
            match old_state {
                StreamState::Inconsistent => unreachable!("transitioned _from_ inconsistent state"),
                StreamState::Disconnected => {
                    let stream = match dial(&self.target, self.timeout) {
                        Ok(stream) => stream,
                        Err(e) => {
                            self.state = StreamState::Disconnected;
                            return Err(e);
                        }
                    };
                    debug!(addr = %self.target, "Reconnected.");
                    self.state = StreamState::Ready(stream);
                }
                StreamState::Ready(mut stream) => {
                    // The deadline applies to this call only.
                    let result = stream.set_write_timeout(self.timeout).and_then(|()| stream.write_all(payload));
                    match result {
                        Ok(()) => self.state = StreamState::Ready(stream),
                        Err(e) => {
                            self.state = StreamState::Disconnected;
                            return Err(if is_timeout(&e) {
                                TransportError::Timeout(self.timeout.unwrap_or_default())
                            } else {
                                TransportError::Io(e)
                            });
                        }
                    }

                    return Ok(());
                }
            }
        }
    }

    fn close(&mut self) -> Result<(), TransportError> {
        match std::mem::replace(&mut self.state, StreamState::Disconnected) {
            StreamState::Ready(stream) => match stream.shutdown(Shutdown::Both) {
                // The peer may already be gone.
                Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(TransportError::Io(e)),
                _ => Ok(()),
            },
            StreamState::Inconsistent | StreamState::Disconnected => Ok(()),
        }
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

#[cfg(test)]
mod tests {
    use std::{io::Read as _, net::TcpListener, thread, time::Duration};

    use super::TcpTransport;
    use crate::endpoint::{EndpointSettings, Transport as _, TransportError};

    fn settings() -> EndpointSettings {
        EndpointSettings { timeout: Duration::from_secs(2), ..Default::default() }
    }

    #[test]
    fn writes_payload() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let mut transport = TcpTransport::connect(&addr, &settings()).unwrap();
        let (mut peer, _) = listener.accept().unwrap();

        transport.write(b"a.b.c 1 10\n").unwrap();
        transport.close().unwrap();

        let mut received = String::new();
        peer.read_to_string(&mut received).unwrap();
        assert_eq!(received, "a.b.c 1 10\n");
    }

    #[test]
    fn connect_failure() {
        // Bind and immediately drop a listener to get a port that refuses connections.
        let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().to_string();

        let result = TcpTransport::connect(&addr, &settings());
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }

    #[test]
    fn close_is_idempotent() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let mut transport = TcpTransport::connect(&addr, &settings()).unwrap();
        assert!(transport.close().is_ok());
        assert!(transport.close().is_ok());
    }

    #[test]
    fn redials_after_failed_write() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut transport = TcpTransport::connect(&addr.to_string(), &settings()).unwrap();

        // The server goes away.
        let (peer, _) = listener.accept().unwrap();
        drop(peer);
        drop(listener);

        // Writes into the closed connection fail once the peer's reset has come back.
        let failed = (0..50).any(|_| {
            let failed = transport.write(b"lost 1 10\n").is_err();
            if !failed {
                thread::sleep(Duration::from_millis(20));
            }
            failed
        });
        assert!(failed, "writes to a closed peer should eventually fail");

        // A server is back on the same address, and the next write dials it.
        let listener = TcpListener::bind(addr).unwrap();
        transport.write(b"a.b.c 1 10\n").unwrap();
        let (mut peer, _) = listener.accept().unwrap();
        transport.close().unwrap();

        let mut received = String::new();
        peer.read_to_string(&mut received).unwrap();
        assert_eq!(received, "a.b.c 1 10\n");
    }

    #[test]
    fn failed_redial_can_be_retried() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut transport = TcpTransport::connect(&addr.to_string(), &settings()).unwrap();
        let (peer, _) = listener.accept().unwrap();
        drop(peer);
        drop(listener);

        let failed = (0..50).any(|_| {
            let failed = transport.write(b"lost 1 10\n").is_err();
            if !failed {
                thread::sleep(Duration::from_millis(20));
            }
            failed
        });
        assert!(failed, "writes to a closed peer should eventually fail");

        // Nothing is listening: the redial itself fails, and so does the one after it.
        assert!(matches!(transport.write(b"a.b.c 1 10\n"), Err(TransportError::Connect { .. })));
        assert!(matches!(transport.write(b"a.b.c 1 10\n"), Err(TransportError::Connect { .. })));
    }
}

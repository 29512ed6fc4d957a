//! SCPI-style text transport over TCP or UDP.
//!
//! Commands are ASCII lines terminated with LF. Set commands get no reply, so
//! by default a command counts as delivered once it is written. Endpoints
//! configured with [`AckMode::ErrorQuery`] follow each command with
//! `SYST:ERR?` and expect a reply such as `+0,"No error"`; any non-zero code
//! fails the command.
//!
//! The XFFTS spectrometer listens for commands on UDP and namespaces them
//! with `XFFTS:`; signal generators usually take raw SCPI on TCP port 5025.
//! Both are expressed through [`InstrumentEndpoint`].

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use tracing::{debug, trace};

use super::{AckMode, CommandChannel, Connector, Instrument, InstrumentEndpoint, Protocol};
use crate::error::{FmError, FmResult};

/// Error query sent after each command in [`AckMode::ErrorQuery`].
const ERROR_QUERY: &str = "SYST:ERR?";

/// Longest reply accepted: one UDP datagram, or one TCP line without its LF.
const MAX_REPLY_LEN: usize = 4096;

/// Opens real sockets to instruments.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScpiConnector;

impl Connector for ScpiConnector {
    fn connect(
        &self,
        instrument: Instrument,
        endpoint: &InstrumentEndpoint,
    ) -> FmResult<Box<dyn CommandChannel>> {
        Ok(Box::new(ScpiSession::connect(instrument, endpoint)?))
    }
}

enum Transport {
    Tcp(TcpStream),
    Udp(UdpSocket),
}

/// An open connection to one instrument. Closed on drop.
pub struct ScpiSession {
    instrument: Instrument,
    transport: Transport,
    prefix: String,
    ack: AckMode,
    timeout: Duration,
}

impl ScpiSession {
    /// Connect to `endpoint`.
    ///
    /// # Errors
    ///
    /// [`FmError::Connection`] if the address does not resolve or the socket
    /// cannot be opened. For UDP this only binds a local socket; an unreachable
    /// instrument shows up on the first send or acknowledgement.
    pub fn connect(instrument: Instrument, endpoint: &InstrumentEndpoint) -> FmResult<Self> {
        let conn_err = |reason: String| FmError::Connection { instrument, reason };

        let addr = resolve(&endpoint.address()).map_err(conn_err)?;
        let timeout = endpoint.timeout();

        let transport = match endpoint.protocol {
            Protocol::Tcp => {
                let stream = TcpStream::connect_timeout(&addr, timeout)
                    .map_err(|e| conn_err(format!("Failed to connect to {addr}: {e}")))?;
                stream
                    .set_read_timeout(Some(timeout))
                    .and_then(|_| stream.set_write_timeout(Some(timeout)))
                    .and_then(|_| stream.set_nodelay(true))
                    .map_err(|e| conn_err(e.to_string()))?;
                Transport::Tcp(stream)
            }
            Protocol::Udp => {
                let local = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
                let socket = UdpSocket::bind(local)
                    .and_then(|s| s.connect(addr).map(|_| s))
                    .map_err(|e| conn_err(format!("Failed to open UDP socket to {addr}: {e}")))?;
                socket
                    .set_read_timeout(Some(timeout))
                    .and_then(|_| socket.set_write_timeout(Some(timeout)))
                    .map_err(|e| conn_err(e.to_string()))?;
                Transport::Udp(socket)
            }
        };

        debug!(
            "Connected to {instrument} at {addr} ({})",
            endpoint.protocol
        );

        Ok(Self {
            instrument,
            transport,
            prefix: endpoint.prefix.clone(),
            ack: endpoint.ack,
            timeout,
        })
    }

    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        let mut msg = line.to_string();
        if !msg.ends_with('\n') {
            msg.push('\n');
        }
        match &mut self.transport {
            Transport::Tcp(stream) => {
                stream.write_all(msg.as_bytes())?;
                stream.flush()
            }
            Transport::Udp(socket) => socket.send(msg.as_bytes()).map(|_| ()),
        }
    }

    /// Read one LF-terminated reply (TCP) or one datagram (UDP).
    fn read_reply(&mut self) -> std::io::Result<String> {
        let bytes = match &mut self.transport {
            Transport::Tcp(stream) => {
                let mut buf = [0u8; 1];
                let mut bytes = Vec::new();
                loop {
                    match stream.read(&mut buf)? {
                        0 => {
                            return Err(std::io::Error::new(
                                ErrorKind::UnexpectedEof,
                                "connection closed by instrument",
                            ))
                        }
                        _ => {
                            if buf[0] == b'\n' {
                                break;
                            }
                            if bytes.len() == MAX_REPLY_LEN {
                                return Err(std::io::Error::new(
                                    ErrorKind::InvalidData,
                                    format!("reply exceeds {MAX_REPLY_LEN} bytes without LF"),
                                ));
                            }
                            bytes.push(buf[0]);
                        }
                    }
                }
                bytes
            }
            Transport::Udp(socket) => {
                let mut buf = vec![0u8; MAX_REPLY_LEN];
                let n = socket.recv(&mut buf)?;
                buf.truncate(n);
                buf
            }
        };

        // Latin-1: every byte maps to the code point of the same value.
        let reply: String = bytes.iter().map(|&b| b as char).collect();
        trace!("{} recv: {:?}", self.instrument, reply);
        Ok(reply)
    }

    fn check_error(&mut self, command: &str) -> FmResult<()> {
        let instrument = self.instrument;
        let timeout = self.timeout;
        let cmd_err = |reason: String| FmError::Command {
            instrument,
            command: command.to_string(),
            reason,
        };

        self.write_line(ERROR_QUERY)
            .map_err(|e| self.link_error(e))?;
        let reply = self.read_reply().map_err(|e| match e.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => {
                cmd_err(format!("no acknowledgement within {timeout:?}"))
            }
            ErrorKind::InvalidData => cmd_err(e.to_string()),
            _ => self.link_error(e),
        })?;

        match parse_error_code(&reply) {
            Some(0) => Ok(()),
            Some(_) => Err(cmd_err(reply.trim().to_string())),
            None => Err(cmd_err(format!("unexpected error query reply {reply:?}"))),
        }
    }

    fn link_error(&self, e: std::io::Error) -> FmError {
        FmError::Connection {
            instrument: self.instrument,
            reason: e.to_string(),
        }
    }
}

impl CommandChannel for ScpiSession {
    fn send(&mut self, command: &str) -> FmResult<()> {
        let line = format!("{}{}", self.prefix, command);
        debug!("{} send: {:?}", self.instrument, line);

        self.write_line(&line).map_err(|e| self.link_error(e))?;

        match self.ack {
            AckMode::None => Ok(()),
            AckMode::ErrorQuery => self.check_error(command),
        }
    }
}

impl Drop for ScpiSession {
    fn drop(&mut self) {
        if let Transport::Tcp(stream) = &self.transport {
            let _ = stream.shutdown(Shutdown::Both);
        }
        debug!("Closed {} connection", self.instrument);
    }
}

fn resolve(address: &str) -> Result<SocketAddr, String> {
    address
        .to_socket_addrs()
        .map_err(|e| format!("Cannot resolve {address}: {e}"))?
        .next()
        .ok_or_else(|| format!("No address found for {address}"))
}

/// Parse the leading integer of a `SYST:ERR?` reply (`+0,"No error"` -> 0).
fn parse_error_code(reply: &str) -> Option<i32> {
    let code = reply.trim().split(',').next()?.trim();
    code.trim_start_matches('+').parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;
    use std::thread;

    fn tcp_endpoint(port: u16) -> InstrumentEndpoint {
        let mut endpoint = InstrumentEndpoint::new("127.0.0.1", port, Protocol::Tcp);
        endpoint.timeout_ms = 2000;
        endpoint
    }

    #[test]
    fn test_parse_error_code() {
        assert_eq!(parse_error_code("+0,\"No error\"\n"), Some(0));
        assert_eq!(parse_error_code("0"), Some(0));
        assert_eq!(parse_error_code("-222,\"Data out of range\""), Some(-222));
        assert_eq!(parse_error_code("garbage"), None);
    }

    #[test]
    fn test_tcp_send_writes_prefixed_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            BufReader::new(stream)
                .lines()
                .collect::<Result<Vec<_>, _>>()
                .unwrap()
        });

        {
            let endpoint = tcp_endpoint(port).with_prefix("XFFTS:");
            let mut session = ScpiSession::connect(Instrument::Spectrometer, &endpoint).unwrap();
            session.send("CMDBLANKTIME 1000").unwrap();
            session.send("CONFIG").unwrap();
        }

        let lines = server.join().unwrap();
        assert_eq!(lines, vec!["XFFTS:CMDBLANKTIME 1000", "XFFTS:CONFIG"]);
    }

    #[test]
    fn test_tcp_error_query_ack() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let mut received = Vec::new();
            for line in BufReader::new(stream).lines() {
                let line = line.unwrap();
                if line == ERROR_QUERY {
                    // Reject the second command only
                    let reply = if received.len() == 1 {
                        "+0,\"No error\"\n"
                    } else {
                        "-222,\"Data out of range\"\n"
                    };
                    writer.write_all(reply.as_bytes()).unwrap();
                } else {
                    received.push(line);
                }
            }
            received
        });

        {
            let endpoint = tcp_endpoint(port).with_ack(AckMode::ErrorQuery);
            let mut session = ScpiSession::connect(Instrument::Synthesizer, &endpoint).unwrap();
            session.send("FREQ:MODE LIST").unwrap();

            match session.send("LIST:FREQ 99") {
                Err(FmError::Command {
                    instrument,
                    command,
                    reason,
                }) => {
                    assert_eq!(instrument, Instrument::Synthesizer);
                    assert_eq!(command, "LIST:FREQ 99");
                    assert!(reason.contains("-222"), "{reason}");
                }
                other => panic!("expected command error, got {other:?}"),
            }
        }

        let received = server.join().unwrap();
        assert_eq!(received, vec!["FREQ:MODE LIST", "LIST:FREQ 99"]);
    }

    #[test]
    fn test_tcp_oversized_reply_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            for line in BufReader::new(stream).lines() {
                // The client may reset the connection with reply bytes unread
                let Ok(line) = line else { break };
                if line == ERROR_QUERY {
                    // Never terminate the reply
                    let _ = writer.write_all(&vec![b'x'; MAX_REPLY_LEN + 16]);
                }
            }
        });

        {
            let endpoint = tcp_endpoint(port).with_ack(AckMode::ErrorQuery);
            let mut session = ScpiSession::connect(Instrument::Synthesizer, &endpoint).unwrap();
            match session.send("FREQ:MODE CW") {
                Err(FmError::Command { reason, .. }) => {
                    assert!(reason.contains("exceeds"), "{reason}")
                }
                other => panic!("expected command error, got {other:?}"),
            }
        }

        server.join().unwrap();
    }

    #[test]
    fn test_tcp_connect_refused() {
        // Bind then drop to get a port with nothing listening
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        match ScpiSession::connect(Instrument::Synthesizer, &tcp_endpoint(port)) {
            Err(FmError::Connection { instrument, .. }) => {
                assert_eq!(instrument, Instrument::Synthesizer)
            }
            Err(other) => panic!("expected connection error, got {other:?}"),
            Ok(_) => panic!("connect should fail"),
        }
    }

    #[test]
    fn test_udp_send_datagrams() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        server
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let port = server.local_addr().unwrap().port();

        let endpoint =
            InstrumentEndpoint::new("127.0.0.1", port, Protocol::Udp).with_prefix("XFFTS:");
        let mut session = ScpiConnector
            .connect(Instrument::Spectrometer, &endpoint)
            .unwrap();
        session.send("CMDSYNCTIME 200000").unwrap();

        let mut buf = [0u8; 128];
        let n = server.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"XFFTS:CMDSYNCTIME 200000\n");
    }
}

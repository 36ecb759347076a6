use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

use super::address::ServerAddress;

pub const MAX_DATAGRAM_SIZE: usize = 64 * 1024;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reliability {
    Reliable,
    Unreliable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    /// Carries the remote's disconnect reason code.
    Disconnected(u32),
    Received(Vec<u8>),
}

/// Datagram session with a single server.
pub trait Transport {
    fn connect(&mut self, address: &ServerAddress) -> io::Result<()>;
    /// Waits at most `timeout` for the first event, then drains whatever else is ready.
    fn poll(&mut self, timeout: Duration) -> io::Result<Vec<TransportEvent>>;
    fn send(&mut self, data: &[u8], reliability: Reliability) -> io::Result<()>;
    /// Asks the remote to close; completion arrives as `Disconnected` from `poll`.
    fn disconnect(&mut self, code: u32);
    /// Drops the session without notifying the remote.
    fn reset(&mut self);
    fn round_trip_time_ms(&self) -> Option<u32>;
    fn bytes_sent_total(&self) -> u64;
    fn bytes_received_total(&self) -> u64;
}

/// Plain UDP transport for local servers and proxies. There is no reliability layer,
/// so `Reliability` is advisory and the session counts as open once a remote is set.
pub struct UdpTransport {
    socket: UdpSocket,
    remote_addr: Option<SocketAddr>,
    recv_buffer: Vec<u8>,
    pending: VecDeque<TransportEvent>,
    idle_timeout: Duration,
    last_receive_time: Instant,
    bytes_sent: u64,
    bytes_received: u64,
}

impl UdpTransport {
    pub fn bind(local: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(local)?;
        socket.set_nonblocking(true)?;

        Ok(Self {
            socket,
            remote_addr: None,
            recv_buffer: vec![0u8; MAX_DATAGRAM_SIZE],
            pending: VecDeque::new(),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            last_receive_time: Instant::now(),
            bytes_sent: 0,
            bytes_received: 0,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn set_idle_timeout(&mut self, timeout: Duration) {
        self.idle_timeout = timeout;
    }

    pub fn is_timed_out(&self) -> bool {
        self.last_receive_time.elapsed() > self.idle_timeout
    }

    fn drain_socket(&mut self) -> io::Result<()> {
        let Some(remote) = self.remote_addr else {
            return Ok(());
        };

        loop {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((size, addr)) => {
                    if addr != remote || size == 0 {
                        continue;
                    }
                    self.bytes_received += size as u64;
                    self.last_receive_time = Instant::now();
                    self.pending
                        .push_back(TransportEvent::Received(self.recv_buffer[..size].to_vec()));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl Transport for UdpTransport {
    fn connect(&mut self, address: &ServerAddress) -> io::Result<()> {
        let remote = address.resolve()?;
        log::info!("Opening UDP session with {}", remote);

        self.remote_addr = Some(remote);
        self.pending.clear();
        self.last_receive_time = Instant::now();
        self.pending.push_back(TransportEvent::Connected);
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> io::Result<Vec<TransportEvent>> {
        let deadline = Instant::now() + timeout;
        loop {
            self.drain_socket()?;

            if self.remote_addr.is_some() && self.is_timed_out() {
                log::warn!("No datagram from the server for {:?}", self.idle_timeout);
                self.remote_addr = None;
                self.pending.push_back(TransportEvent::Disconnected(0));
            }

            if !self.pending.is_empty() || Instant::now() >= deadline {
                return Ok(self.pending.drain(..).collect());
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn send(&mut self, data: &[u8], _reliability: Reliability) -> io::Result<()> {
        let remote = self
            .remote_addr
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "No remote address set"))?;

        if data.len() > MAX_DATAGRAM_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Packet exceeds datagram size",
            ));
        }

        let bytes = self.socket.send_to(data, remote)?;
        self.bytes_sent += bytes as u64;
        Ok(())
    }

    fn disconnect(&mut self, code: u32) {
        if self.remote_addr.take().is_some() {
            self.pending.push_back(TransportEvent::Disconnected(code));
        }
    }

    fn reset(&mut self) {
        self.remote_addr = None;
        self.pending.clear();
        self.last_receive_time = Instant::now();
    }

    fn round_trip_time_ms(&self) -> Option<u32> {
        None
    }

    fn bytes_sent_total(&self) -> u64 {
        self.bytes_sent
    }

    fn bytes_received_total(&self) -> u64 {
        self.bytes_received
    }
}

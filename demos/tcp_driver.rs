//! `SocketDriver` over plain TCP, standing in for a modem on a desktop.

use at_web::{ConnectionState, SocketDriver, SocketHandle, SocketSlots, MAX_SOCKETS};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::{
    collections::VecDeque,
    io::{ErrorKind, Read, Write},
    net::{Shutdown, SocketAddr, TcpListener, TcpStream},
};

#[derive(Debug)]
struct Peer {
    stream: TcpStream,
    received: VecDeque<u8>,
    closed: bool,
}

impl Peer {
    fn fill(&mut self) {
        let mut chunk = [0; 512];
        while !self.closed {
            match self.stream.read(&mut chunk) {
                Ok(0) => self.closed = true,
                Ok(n) => self.received.extend(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => self.closed = true,
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct TcpDriver {
    listener: Option<TcpListener>,
    slots: SocketSlots,
    peers: [Option<Peer>; MAX_SOCKETS],
}

impl TcpDriver {
    fn peer(&mut self, handle: SocketHandle) -> Option<&mut Peer> {
        let peer = self.peers[handle.index() as usize].as_mut()?;
        peer.fill();
        Some(peer)
    }

    fn listen(port: u16) -> std::io::Result<TcpListener> {
        let addr: SocketAddr = ([127, 0, 0, 1], port).into();
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;

        socket.set_reuse_address(true)?;
        socket.bind(&SockAddr::from(addr))?;
        socket.listen(MAX_SOCKETS as i32)?;
        socket.set_nonblocking(true)?;

        Ok(socket.into())
    }
}

impl SocketDriver for TcpDriver {
    fn start_server(&mut self, port: u16) -> bool {
        match Self::listen(port) {
            Ok(listener) => {
                self.listener = Some(listener);
                true
            }
            Err(e) => {
                tracing::error!("Bind on port {port} failed: {e}");
                false
            }
        }
    }

    fn acquire_handle(&mut self) -> Option<SocketHandle> {
        let (stream, _) = self.listener.as_ref()?.accept().ok()?;
        let handle = self.slots.acquire()?;

        stream.set_nonblocking(true).ok()?;
        self.peers[handle.index() as usize] = Some(Peer {
            stream,
            received: VecDeque::new(),
            closed: false,
        });
        Some(handle)
    }

    fn release_handle(&mut self, handle: SocketHandle) {
        if let Some(peer) = self.peers[handle.index() as usize].take() {
            let _ = peer.stream.shutdown(Shutdown::Both);
        }
        self.slots.release(handle);
    }

    fn is_data_available(&mut self, handle: SocketHandle) -> usize {
        self.peer(handle).map_or(0, |peer| peer.received.len())
    }

    fn read_byte(&mut self, handle: SocketHandle) -> (Option<u8>, bool) {
        match self.peer(handle) {
            Some(peer) => {
                let byte = peer.received.pop_front();
                (byte, peer.closed && peer.received.is_empty())
            }
            None => (None, true),
        }
    }

    fn read_bytes(&mut self, handle: SocketHandle, buf: &mut [u8]) -> usize {
        let Some(peer) = self.peer(handle) else {
            return 0;
        };

        let n = buf.len().min(peer.received.len());
        for (slot, byte) in buf.iter_mut().zip(peer.received.drain(..n)) {
            *slot = byte;
        }
        n
    }

    fn write_bytes(&mut self, handle: SocketHandle, bytes: &[u8]) -> bool {
        let Some(peer) = self.peers[handle.index() as usize].as_mut() else {
            return false;
        };

        // Blocking only for the duration of the send
        let sent = peer.stream.set_nonblocking(false).is_ok() && peer.stream.write_all(bytes).is_ok();
        let _ = peer.stream.set_nonblocking(true);
        sent
    }

    fn connection_state(&mut self, handle: SocketHandle) -> ConnectionState {
        match self.peer(handle) {
            Some(peer) if !peer.closed || !peer.received.is_empty() => ConnectionState::Established,
            _ => ConnectionState::Closed,
        }
    }
}

pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

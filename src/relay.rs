//! The event loop: the single task that owns every socket the relay holds.
//!
//! One `Relay` instance is one independent registry of links and streams,
//! so a test can spin up several relays in one process without
//! interference.

use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use std::time::Duration;

use anyhow::Context as _;
use futures_util::future::select_all;
use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::time::Instant;

use crate::duration::format_elapsed;
use crate::link::{Link, LinkCommand, LinkName};
use crate::slots::SlotTable;
use crate::stream::Stream;

pub const MAX_LINKS: usize = 256;
pub const MAX_STREAMS: usize = 256;

const NO_COMMAND_TIMEOUT: Duration = Duration::from_secs(100);
const NO_CONNECTED_TIMEOUT: Duration = Duration::from_secs(10);
const NO_ACTIVITY_TIMEOUT: Duration = Duration::from_secs(8 * 60 * 60);
const STATS_INTERVAL: Duration = Duration::from_secs(3600);
const WAIT_CEILING: Duration = Duration::from_secs(60);
const LISTEN_BACKLOG: u32 = 5;
const STREAM_CHUNK: usize = 4096;

const KEEPALIVE_IDLE: Duration = Duration::from_secs(60);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);
const KEEPALIVE_RETRIES: u32 = 6;

/// Owns the listener and the two slot tables, and drives the readiness loop.
pub struct Relay {
    listener: TcpListener,
    links: SlotTable<Link, MAX_LINKS>,
    streams: SlotTable<Stream, MAX_STREAMS>,
}

impl Relay {
    /// Binds the listening socket: `SO_REUSEADDR`, backlog 5, IPv4 only.
    pub fn bind(addr: SocketAddrV4) -> anyhow::Result<Self> {
        let socket = TcpSocket::new_v4().context("failed to create listening socket")?;
        socket.set_reuseaddr(true).context("failed to set SO_REUSEADDR")?;
        socket
            .bind(SocketAddr::V4(addr))
            .with_context(|| format!("failed to bind {addr}"))?;
        let listener = socket.listen(LISTEN_BACKLOG).context("failed to listen")?;

        info!(%addr, "listener bound");

        Ok(Self {
            listener,
            links: SlotTable::new(),
            streams: SlotTable::new(),
        })
    }

    /// The address actually bound, useful when `bind` was given port 0.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Runs forever. The only way out is an I/O error from a suspension
    /// point that should never actually occur in practice (the listener
    /// accept path already handles its own errors without propagating).
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let mut last_stats = Instant::now();
        loop {
            if last_stats.elapsed() > STATS_INTERVAL {
                self.log_stats();
                last_stats = Instant::now();
            }
            self.tick().await;
        }
    }

    /// One full pass: wait for readiness, accept, service links and
    /// streams, then sweep for timeouts. See the event-loop design note for
    /// why the wait is a readiness signal only, followed by a full
    /// non-blocking drain rather than dispatch of a single winner.
    pub async fn tick(&mut self) {
        self.wait_for_readiness().await;

        self.try_accept_one();
        self.service_links();
        self.service_streams();

        let now = Instant::now();
        self.sweep_links(now);
        self.sweep_streams(now);
    }

    async fn wait_for_readiness(&self) {
        let mut futs: Vec<std::pin::Pin<Box<dyn std::future::Future<Output = io::Result<()>> + '_>>> = Vec::new();
        futs.push(Box::pin(self.listener.readable()));
        for (_, link) in self.links.iter() {
            if let Some(sock) = &link.sock {
                futs.push(Box::pin(sock.readable()));
            }
        }
        for (_, stream) in self.streams.iter() {
            if !stream.connected {
                continue;
            }
            if let Some(left) = &stream.left {
                futs.push(Box::pin(left.readable()));
            }
            if let Some(right) = &stream.right {
                futs.push(Box::pin(right.readable()));
            }
        }
        // We only care that *something* may be ready, or that the 60s
        // ceiling elapsed so the sweep still runs under zero traffic; the
        // actual drain below re-checks every socket non-blockingly.
        let _ = tokio::time::timeout(WAIT_CEILING, select_all(futs)).await;
    }

    fn try_accept_one(&mut self) {
        match self.listener.try_accept() {
            Ok((sock, peer_addr)) => {
                if let Err(error) = configure_keepalive(&sock) {
                    warn!(%error, "set keepalive failed");
                }
                let link = Link::new(sock, peer_addr, Instant::now());
                if let Err(_link) = self.links.insert(link) {
                    warn!(%peer_addr, "link slot full");
                } else {
                    info!(%peer_addr, "accepted");
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(error) => warn!(%error, "accept failed"),
        }
    }

    fn service_links(&mut self) {
        let indices: Vec<usize> = self.links.iter().map(|(idx, _)| idx).collect();
        for idx in indices {
            self.service_one_link(idx);
        }
    }

    fn service_one_link(&mut self, idx: usize) {
        let Some(mut link) = self.links.remove(idx) else {
            return;
        };

        let Some(sock) = &link.sock else {
            return;
        };

        if link.remaining_capacity() == 0 {
            // Buffer full without a terminator: let the 100s no-command
            // timeout reap it rather than reading zero bytes (which would
            // otherwise read as a spurious EOF).
            self.links.put_back(idx, link);
            return;
        }

        let mut chunk = vec![0u8; link.remaining_capacity()];
        match sock.try_read(&mut chunk) {
            Ok(0) => {
                self.close_link(link);
            }
            Ok(n) => {
                link.last_activity = Instant::now();
                link.push_bytes(&chunk[..n]);
                self.dispatch_link_command(idx, link);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.links.put_back(idx, link);
            }
            Err(_) => {
                self.close_link(link);
            }
        }
    }

    fn dispatch_link_command(&mut self, idx: usize, mut link: Link) {
        match link.try_parse() {
            LinkCommand::Incomplete => {
                self.links.put_back(idx, link);
            }
            LinkCommand::KeepAlive => {
                link.clear_buf();
                self.links.put_back(idx, link);
            }
            LinkCommand::Link(name) => {
                self.supersede_existing(&name);
                info!(name = %name, peer = %link.peer_addr, "LINK");
                link.name = LinkName::Named(name);
                link.clear_buf();
                self.links.put_back(idx, link);
            }
            LinkCommand::Connected(name) => {
                self.handle_connected(link, name);
            }
            LinkCommand::Connect { host } => {
                self.handle_connect(link, host);
            }
            LinkCommand::Unknown(line) => {
                warn!(line = %line, peer = %link.peer_addr, "unknown command, closing link");
                self.close_link(link);
            }
        }
    }

    /// Marks every other link already registered under `name` as
    /// superseded. The link being registered has already been pulled out
    /// of the table by the caller, so no self-match is possible.
    fn supersede_existing(&mut self, name: &str) {
        for (_, link) in self.links.iter_mut() {
            if link.name.supersede_if_named(name) {
                warn!(name, peer = %link.peer_addr, "marking old link superseded");
            }
        }
    }

    fn handle_connected(&mut self, mut link: Link, name: String) {
        match self.streams.find(|s| !s.connected && s.name == name) {
            Some(sidx) => {
                let Some(sock) = link.sock.take() else { return };
                let now = Instant::now();
                if let Some(stream) = self.streams.get_mut(sidx) {
                    stream.complete(sock, now);
                    info!(name = %name, "stream is established");
                }
                // Link slot stays freed; the socket was transferred, not closed.
            }
            None => {
                warn!(name = %name, "no waiting stream");
                self.close_link(link);
            }
        }
    }

    fn handle_connect(&mut self, mut link: Link, host: String) {
        let Some(caller_sock) = link.sock.take() else {
            return;
        };

        let Some(empty_idx) = self.streams.find_empty() else {
            warn!(host = %host, "no empty stream slot");
            let _ = caller_sock.try_write(b"HTTP/1.0 400 Bad Request\r\n\r\n");
            self.close_link(link);
            return;
        };

        let Some(peer_idx) = self
            .links
            .find(|l| matches!(&l.name, LinkName::Named(n) if n == &host))
        else {
            warn!(host = %host, "no such link");
            let _ = caller_sock.try_write(b"HTTP/1.0 404 Not found\r\n\r\n");
            self.close_link(link);
            return;
        };

        info!(host = %host, "CONNECT");

        if let Some(peer_link) = self.links.get_mut(peer_idx) {
            if let Some(peer_sock) = &peer_link.sock {
                let _ = peer_sock.try_write(b"NEW\r\n");
            }
        }

        let _ = caller_sock.try_write(b"HTTP/1.0 200 Established\r\n\r\n");

        let stream = Stream::pending(host, caller_sock, Instant::now());
        self.streams.put_back(empty_idx, stream);
    }

    fn service_streams(&mut self) {
        let indices: Vec<usize> = self
            .streams
            .iter()
            .filter(|(_, s)| s.connected)
            .map(|(idx, _)| idx)
            .collect();
        for idx in indices {
            self.service_one_stream(idx);
        }
    }

    fn service_one_stream(&mut self, idx: usize) {
        let Some(mut stream) = self.streams.remove(idx) else {
            return;
        };

        let left_closed = forward_one_direction(&mut stream, Side::LeftToRight);
        let right_closed = !left_closed && forward_one_direction(&mut stream, Side::RightToLeft);

        if left_closed || right_closed {
            self.close_stream(stream);
        } else {
            self.streams.put_back(idx, stream);
        }
    }

    fn sweep_links(&mut self, now: Instant) {
        let indices: Vec<usize> = self.links.iter().map(|(idx, _)| idx).collect();
        for idx in indices {
            let Some(link) = self.links.get(idx) else { continue };
            if now.duration_since(link.last_activity) <= NO_COMMAND_TIMEOUT {
                continue;
            }
            if let Some(link) = self.links.remove(idx) {
                warn!(name = link.name.display(), peer = %link.peer_addr, "no command from link");
                self.close_link(link);
            }
        }
    }

    fn sweep_streams(&mut self, now: Instant) {
        let indices: Vec<usize> = self.streams.iter().map(|(idx, _)| idx).collect();
        for idx in indices {
            let Some(stream) = self.streams.get(idx) else { continue };

            if stream.left.is_none() && stream.right.is_none() {
                if let Some(stream) = self.streams.remove(idx) {
                    warn!(name = %stream.name, "stream disconnected with no sockets, freeing");
                }
                continue;
            }

            let timeout = if stream.connected {
                NO_ACTIVITY_TIMEOUT
            } else {
                NO_CONNECTED_TIMEOUT
            };
            if now.duration_since(stream.last_io) <= timeout {
                continue;
            }
            if let Some(stream) = self.streams.remove(idx) {
                warn!(name = %stream.name, "no activity");
                self.close_stream(stream);
            }
        }
    }

    fn close_link(&self, link: Link) {
        let name = link.name.display().to_owned();
        let duration = format_elapsed(link.established);
        info!(name, peer = %link.peer_addr, duration, "close_link");
        // `link.sock` drops here, closing the OS socket.
    }

    fn close_stream(&self, stream: Stream) {
        let duration = format_elapsed(stream.established);
        info!(
            name = %stream.name,
            duration,
            bytes_l2r = stream.bytes_l2r,
            bytes_r2l = stream.bytes_r2l,
            "close_stream"
        );
        // Both `stream.left` and `stream.right` drop here unconditionally.
    }

    fn log_stats(&self) {
        info!(links = self.links.len(), streams = self.streams.len(), "stats");
    }
}

#[derive(Clone, Copy)]
enum Side {
    LeftToRight,
    RightToLeft,
}

/// Reads up to one 4 KiB chunk from one side of a connected stream and
/// writes it to the other. Returns `true` if the stream should be closed
/// (EOF or a genuine error on either side; `WouldBlock` on either side is
/// not an error).
fn forward_one_direction(stream: &mut Stream, side: Side) -> bool {
    let (reader, writer) = match side {
        Side::LeftToRight => (&stream.left, &stream.right),
        Side::RightToLeft => (&stream.right, &stream.left),
    };
    let (Some(reader), Some(writer)) = (reader, writer) else {
        return false;
    };

    let mut buf = [0u8; STREAM_CHUNK];
    match reader.try_read(&mut buf) {
        Ok(0) => true,
        Ok(n) => match writer.try_write(&buf[..n]) {
            // A short write silently drops the unwritten tail rather than
            // queuing it for the next tick.
            Ok(written) => {
                match side {
                    Side::LeftToRight => stream.bytes_l2r += written as u64,
                    Side::RightToLeft => stream.bytes_r2l += written as u64,
                }
                stream.last_io = Instant::now();
                false
            }
            // The other side isn't ready for more yet: drop this chunk
            // rather than closing the stream over it.
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => false,
            // A genuine write error (e.g. broken pipe) closes the stream.
            Err(_) => true,
        },
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => false,
        Err(_) => true,
    }
}

fn configure_keepalive(sock: &TcpStream) -> io::Result<()> {
    let sock_ref = SockRef::from(sock);
    sock_ref.set_keepalive(true)?;
    let keepalive = TcpKeepalive::new()
        .with_time(KEEPALIVE_IDLE)
        .with_interval(KEEPALIVE_INTERVAL)
        .with_retries(KEEPALIVE_RETRIES);
    sock_ref.set_tcp_keepalive(&keepalive)
}

//! Control-connection state and line protocol parser.

use tokio::net::TcpStream;
use tokio::time::Instant;

/// Maximum size of a link's line-accumulation buffer.
pub const LINK_BUF_CAP: usize = 255;

/// The registered identity of a link slot.
///
/// Names stay valid strings at all times; "superseded" is a real state
/// rather than a sentinel byte or a `~`-prefix mutation of the stored name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkName {
    /// The slot holds no connection.
    Empty,
    /// Accepted but no `LINK` line has completed yet.
    Temporary,
    /// Registered under `name` and reachable via `find_link`.
    Named(String),
    /// Was `Named(name)` until a newer `LINK` claimed the same name. Kept
    /// around only so the timeout sweep can reap it; never matched by
    /// `find_link`.
    Superseded(String),
}

impl LinkName {
    pub fn is_empty(&self) -> bool {
        matches!(self, LinkName::Empty)
    }

    /// If `self` is `Named(target)`, rewrites it to `Superseded(target)` and
    /// returns `true`. A no-op for any other name or a different name,
    /// returning `false`. Pulled out of the relay's supersede loop so the
    /// "last writer wins" rule can be property-tested without real sockets.
    pub fn supersede_if_named(&mut self, target: &str) -> bool {
        if let LinkName::Named(existing) = self {
            if existing == target {
                *self = LinkName::Superseded(std::mem::take(existing));
                return true;
            }
        }
        false
    }

    /// The name this link is registered under, for logging. Falls back to
    /// `"-"` for slots that never completed a `LINK` line.
    pub fn display(&self) -> &str {
        match self {
            LinkName::Empty | LinkName::Temporary => "-",
            LinkName::Named(name) | LinkName::Superseded(name) => name,
        }
    }
}

/// One inbound control connection.
pub struct Link {
    pub name: LinkName,
    pub sock: Option<TcpStream>,
    pub peer_addr: std::net::SocketAddr,
    buf: Vec<u8>,
    pub last_activity: Instant,
    pub established: Instant,
}

impl Link {
    pub fn new(sock: TcpStream, peer_addr: std::net::SocketAddr, now: Instant) -> Self {
        Self {
            name: LinkName::Temporary,
            sock: Some(sock),
            peer_addr,
            buf: Vec::with_capacity(LINK_BUF_CAP),
            last_activity: now,
            established: now,
        }
    }

    /// Bytes of buffer space left before the 255-byte cap.
    pub fn remaining_capacity(&self) -> usize {
        LINK_BUF_CAP - self.buf.len()
    }

    pub fn push_bytes(&mut self, data: &[u8]) {
        debug_assert!(data.len() <= self.remaining_capacity());
        self.buf.extend_from_slice(data);
    }

    pub fn clear_buf(&mut self) {
        self.buf.clear();
    }

    pub fn buf(&self) -> &[u8] {
        &self.buf
    }

    /// Attempts to parse one command out of the accumulated buffer. Does
    /// not mutate the link; the caller is responsible for clearing the
    /// buffer (or not, for `LinkCommand::Incomplete`) based on the result.
    pub fn try_parse(&self) -> LinkCommand {
        parse_buffer(&self.buf)
    }
}

/// Outcome of attempting to parse the command buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum LinkCommand {
    /// A prefix matched but the terminator has not arrived yet; keep
    /// reading into the same buffer.
    Incomplete,
    Link(String),
    Connected(String),
    Connect { host: String },
    KeepAlive,
    /// A `\r\n` was found but no known prefix matched; the link must be
    /// closed.
    Unknown(String),
}

/// Finds the first `\r\n` terminator for a line starting at `start` and
/// returns the index of the `\r`.
fn find_crlf(buf: &[u8], start: usize) -> Option<usize> {
    if start + 1 >= buf.len() {
        return None;
    }
    (start..buf.len() - 1).find(|&i| buf[i] == b'\r' && buf[i + 1] == b'\n')
}

fn find_crlfcrlf(buf: &[u8], start: usize) -> Option<usize> {
    if start + 3 >= buf.len() {
        return None;
    }
    (start..buf.len() - 3).find(|&i| &buf[i..i + 4] == b"\r\n\r\n")
}

/// Pure parser over the raw bytes accumulated so far. Kept free of `Link`
/// so slot-table-less property tests can drive it directly.
pub fn parse_buffer(buf: &[u8]) -> LinkCommand {
    if buf.starts_with(b"LINK ") {
        return match find_crlf(buf, 5) {
            Some(end) => LinkCommand::Link(String::from_utf8_lossy(&buf[5..end]).into_owned()),
            None => LinkCommand::Incomplete,
        };
    }
    if buf.starts_with(b"CONNECTED ") {
        return match find_crlf(buf, 10) {
            Some(end) => LinkCommand::Connected(String::from_utf8_lossy(&buf[10..end]).into_owned()),
            None => LinkCommand::Incomplete,
        };
    }
    if buf.starts_with(b"CONNECT ") {
        return match find_crlfcrlf(buf, 8) {
            Some(end) => {
                let request = &buf[8..end];
                let host = request.split(|&b| b == b':').next().unwrap_or(request);
                LinkCommand::Connect {
                    host: String::from_utf8_lossy(host).into_owned(),
                }
            }
            None => LinkCommand::Incomplete,
        };
    }
    if buf.starts_with(b"KeepAlive\r\n") {
        return LinkCommand::KeepAlive;
    }
    match buf.windows(2).position(|w| w == b"\r\n") {
        Some(end) => LinkCommand::Unknown(String::from_utf8_lossy(&buf[..end]).into_owned()),
        None => LinkCommand::Incomplete,
    }
}

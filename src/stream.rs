//! End-to-end tunnel state: a caller socket bridged to a peer dial-back socket.

use tokio::net::TcpStream;
use tokio::time::Instant;

/// One tunnel, pending (`right` not yet installed) or fully connected.
pub struct Stream {
    /// Target name copied from the `CONNECT` request; used to resolve the
    /// matching `CONNECTED` line.
    pub name: String,
    /// Caller-side socket, installed at creation time.
    pub left: Option<TcpStream>,
    /// Peer-side dial-back socket, installed once `CONNECTED` arrives.
    pub right: Option<TcpStream>,
    pub connected: bool,
    /// Stamped on creation and on every successful byte transfer; drives
    /// both the 10s pending-timeout and the 8h idle-timeout.
    pub last_io: Instant,
    /// Stamped when `right` is installed; used only for the close-duration
    /// log line.
    pub established: Instant,
    pub bytes_l2r: u64,
    pub bytes_r2l: u64,
}

impl Stream {
    /// A freshly accepted `CONNECT`: only the caller side is known.
    pub fn pending(name: String, left: TcpStream, now: Instant) -> Self {
        Self {
            name,
            left: Some(left),
            right: None,
            connected: false,
            last_io: now,
            established: now,
            bytes_l2r: 0,
            bytes_r2l: 0,
        }
    }

    /// Installs the dial-back socket and marks the stream as live.
    pub fn complete(&mut self, right: TcpStream, now: Instant) {
        self.right = Some(right);
        self.connected = true;
        self.last_io = now;
        self.established = now;
    }
}

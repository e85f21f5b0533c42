//! Shared scaffolding for the end-to-end tests: bind a real relay on an
//! ephemeral loopback port and drive it from ordinary `TcpStream`s rather
//! than mocking the socket layer.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use anyhow::Context as _;
use patchpanel::Relay;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

/// Binds a relay on an ephemeral port and runs it on a background task for
/// the lifetime of the test process (the task is simply leaked when the
/// test ends, same as any other `tokio::spawn`-and-forget background job).
pub async fn spawn_relay() -> (SocketAddr, JoinHandle<()>) {
    let mut relay = Relay::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).expect("bind relay");
    let addr = relay.local_addr().expect("local_addr");
    let handle = tokio::spawn(async move {
        let _ = relay.run().await;
    });
    (addr, handle)
}

pub async fn connect(addr: SocketAddr) -> anyhow::Result<TcpStream> {
    TcpStream::connect(addr).await.context("connect to relay")
}

/// Reads until the first `\r\n` (or `\r\n\r\n` for the HTTP status replies,
/// which have no body) and returns the line without the terminator.
pub async fn read_line(stream: &mut TcpStream) -> anyhow::Result<String> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await.context("read line")?;
        if n == 0 {
            anyhow::bail!("eof before CRLF");
        }
        buf.push(byte[0]);
        if buf.ends_with(b"\r\n") {
            buf.truncate(buf.len() - 2);
            return Ok(String::from_utf8_lossy(&buf).into_owned());
        }
    }
}

/// Reads an `HTTP/1.0 ... \r\n\r\n` status reply (no headers, no body) and
/// returns the status line without its terminator. Unlike `read_line`, this
/// consumes the full blank-line terminator so nothing is left behind in the
/// stream for a subsequent read to trip over.
pub async fn read_http_status(stream: &mut TcpStream) -> anyhow::Result<String> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await.context("read http status")?;
        if n == 0 {
            anyhow::bail!("eof before blank line");
        }
        buf.push(byte[0]);
        if buf.ends_with(b"\r\n\r\n") {
            buf.truncate(buf.len() - 4);
            return Ok(String::from_utf8_lossy(&buf).into_owned());
        }
    }
}

pub async fn write_all(stream: &mut TcpStream, data: &[u8]) -> anyhow::Result<()> {
    stream.write_all(data).await.context("write_all")
}

pub async fn read_exact_within(stream: &mut TcpStream, len: usize, timeout: Duration) -> anyhow::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    tokio::time::timeout(timeout, stream.read_exact(&mut buf))
        .await
        .context("timed out reading expected bytes")?
        .context("read_exact")?;
    Ok(buf)
}

pub async fn expect_eof_within(stream: &mut TcpStream, timeout: Duration) -> anyhow::Result<()> {
    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(timeout, stream.read(&mut buf))
        .await
        .context("timed out waiting for eof")?
        .context("read")?;
    anyhow::ensure!(n == 0, "expected eof, got {n} bytes");
    Ok(())
}

//! End-to-end scenarios against a live relay: a full rendezvous round
//! trip, an unknown-target rejection, and duplicate-`LINK` supersession.

mod common;

use std::time::Duration;

use common::{connect, expect_eof_within, read_exact_within, read_http_status, read_line, spawn_relay, write_all};

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn happy_path_bridges_bytes_both_ways() {
    let (addr, _relay) = spawn_relay().await;

    let mut peer = connect(addr).await.unwrap();
    write_all(&mut peer, b"LINK foo\r\n").await.unwrap();

    let mut caller = connect(addr).await.unwrap();
    write_all(&mut caller, b"CONNECT foo:0 HTTP/1.0\r\n\r\n").await.unwrap();

    // The peer's control connection is told to dial back...
    let new_line = read_line(&mut peer).await.unwrap();
    assert_eq!(new_line, "NEW");

    // ...and the caller sees its tunnel established.
    let status = read_http_status(&mut caller).await.unwrap();
    assert_eq!(status, "HTTP/1.0 200 Established");

    let mut data_conn = connect(addr).await.unwrap();
    write_all(&mut data_conn, b"CONNECTED foo\r\n").await.unwrap();

    write_all(&mut caller, b"hello").await.unwrap();
    let got = read_exact_within(&mut data_conn, 5, TIMEOUT).await.unwrap();
    assert_eq!(&got, b"hello");

    write_all(&mut data_conn, b"world").await.unwrap();
    let got = read_exact_within(&mut caller, 5, TIMEOUT).await.unwrap();
    assert_eq!(&got, b"world");

    drop(caller);
    expect_eof_within(&mut data_conn, TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn unknown_target_gets_404_and_is_closed() {
    let (addr, _relay) = spawn_relay().await;

    let mut caller = connect(addr).await.unwrap();
    write_all(&mut caller, b"CONNECT bar:0 HTTP/1.0\r\n\r\n").await.unwrap();

    let status = read_http_status(&mut caller).await.unwrap();
    assert_eq!(status, "HTTP/1.0 404 Not found");
    expect_eof_within(&mut caller, TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn duplicate_link_supersedes_the_older_registration() {
    let (addr, _relay) = spawn_relay().await;

    let mut peer1 = connect(addr).await.unwrap();
    write_all(&mut peer1, b"LINK foo\r\n").await.unwrap();

    let mut peer2 = connect(addr).await.unwrap();
    write_all(&mut peer2, b"LINK foo\r\n").await.unwrap();

    let mut caller = connect(addr).await.unwrap();
    write_all(&mut caller, b"CONNECT foo:0 HTTP/1.0\r\n\r\n").await.unwrap();

    // Only the newer registration (peer2) is told to dial back.
    let new_line = read_line(&mut peer2).await.unwrap();
    assert_eq!(new_line, "NEW");

    let status = read_http_status(&mut caller).await.unwrap();
    assert_eq!(status, "HTTP/1.0 200 Established");

    // peer1 received nothing and is not readable yet; it is still open
    // (the 100s sweep, not this handoff, is what eventually reaps it).
    let mut probe = [0u8; 1];
    let res = tokio::time::timeout(Duration::from_millis(200), tokio::io::AsyncReadExt::read(&mut peer1, &mut probe)).await;
    assert!(res.is_err(), "peer1 should not have received any bytes");
}

//! Integration tests: real TCP clients against a live server.
//!
//! Each test binds a server on an ephemeral port with a deliberately tiny
//! ring and pool, issues requests over std TCP, and checks the response
//! and the close-after-send behavior.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::Duration;

use httpline::{ConfigBuilder, Server, ShutdownHandle};

/// Two buffers and four SQEs: enough for one connection in flight, small
/// enough that recycling bugs surface immediately.
fn start_server() -> (SocketAddr, ShutdownHandle) {
    let config = ConfigBuilder::new()
        .listen("127.0.0.1:0".parse().unwrap())
        .queue_depth(4)
        .buffer_count(2)
        .buffer_size(4096)
        .build()
        .unwrap();
    let mut server = Server::bind(config).unwrap();
    let addr = server.local_addr().unwrap();
    let handle = server.shutdown_handle();
    // Detached: the loop parks in the kernel between tests' requests and
    // exits with the process.
    thread::spawn(move || {
        let _ = server.run();
    });
    wait_for_server(addr);
    (addr, handle)
}

fn wait_for_server(addr: SocketAddr) {
    for _ in 0..200 {
        if TcpStream::connect(addr).is_ok() {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("server did not start on {addr}");
}

fn round_trip(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream.write_all(request).unwrap();
    stream.flush().unwrap();

    // read_to_end returning proves the server closed after the response.
    let mut response = Vec::new();
    stream.read_to_end(&mut response).unwrap();
    String::from_utf8(response).unwrap()
}

#[test]
fn get_returns_json_echo_then_closes() {
    let (addr, handle) = start_server();

    let response = round_trip(addr, b"GET /hello HTTP/1.1\r\nHost: example.com\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
    assert!(response.contains("Content-Type: application/json"));
    assert!(response.contains("\"method\":\"GET\""));
    assert!(response.contains("\"uri\":\"/hello\""));
    assert!(response.contains("\"version\":\"HTTP/1.1\""));
    assert!(response.contains("example.com"));

    handle.stop();
}

#[test]
fn bad_method_gets_400_and_close() {
    let (addr, handle) = start_server();

    let response = round_trip(addr, b"NOTAMETHOD / HTTP/1.1\r\n\r\n");
    assert!(
        response.starts_with("HTTP/1.1 400 Bad Request\r\n"),
        "{response}"
    );
    assert!(response.contains("Content-Length: 0"));
    assert!(response.contains("Connection: close"));

    handle.stop();
}

#[test]
fn split_head_is_reassembled() {
    let (addr, handle) = start_server();

    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream.write_all(b"GET /split HT").unwrap();
    stream.flush().unwrap();
    thread::sleep(Duration::from_millis(50));
    stream.write_all(b"TP/1.1\r\nHost: a\r\n\r\n").unwrap();
    stream.flush().unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).unwrap();
    let response = String::from_utf8(response).unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
    assert!(response.contains("\"uri\":\"/split\""));

    handle.stop();
}

#[test]
fn sequential_requests_recycle_buffers() {
    // Eight connections through a two-buffer pool only works if every
    // index flows recv -> pool -> send -> pool.
    let (addr, handle) = start_server();

    for i in 0..8 {
        let request = format!("GET /req-{i} HTTP/1.1\r\nHost: a\r\n\r\n");
        let response = round_trip(addr, request.as_bytes());
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
        assert!(response.contains(&format!("\"uri\":\"/req-{i}\"")));
    }

    handle.stop();
}

#[test]
fn post_echoes_headers() {
    let (addr, handle) = start_server();

    let response = round_trip(
        addr,
        b"POST /submit-form?user=alex HTTP/1.1\r\nHost: example.com\r\nContent-Type: application/json\r\n\r\n",
    );
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
    assert!(response.contains("\"method\":\"POST\""));
    assert!(response.contains("\"uri\":\"/submit-form?user=alex\""));
    assert!(response.contains("\"name\":\"Content-Type\""));
    assert!(response.contains("\"value\":\"application/json\""));

    handle.stop();
}

use secure_echo_channel::{
    dial, serve, SecureChannelError, SecureStream, HANDSHAKE_TOKEN, REJECTION_TOKEN,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

const TEST_PLAINTEXT: &[u8] = b"hello world\n";

async fn start_server() -> (SocketAddr, JoinHandle<secure_echo_channel::Result<()>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (addr, tokio::spawn(serve(listener)))
}

/// Forwards bytes between a client and `upstream`, recording everything that
/// crosses the wire in either direction.
async fn start_tap(upstream: SocketAddr) -> (SocketAddr, Arc<Mutex<Vec<u8>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let recorder = seen.clone();
    tokio::spawn(async move {
        let (client, _) = listener.accept().await.unwrap();
        let server = TcpStream::connect(upstream).await.unwrap();
        let (client_rd, client_wr) = client.into_split();
        let (server_rd, server_wr) = server.into_split();

        let up = tokio::spawn(forward(client_rd, server_wr, recorder.clone()));
        let down = tokio::spawn(forward(server_rd, client_wr, recorder));
        let _ = tokio::join!(up, down);
    });

    (addr, seen)
}

async fn forward(
    mut from: tokio::net::tcp::OwnedReadHalf,
    mut to: tokio::net::tcp::OwnedWriteHalf,
    seen: Arc<Mutex<Vec<u8>>>,
) {
    let mut buf = [0u8; 4096];
    loop {
        let n = match from.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        seen.lock().unwrap().extend_from_slice(&buf[..n]);
        if to.write_all(&buf[..n]).await.is_err() {
            break;
        }
    }
    let _ = to.shutdown().await;
}

#[tokio::test]
async fn test_secure_echo_server() {
    let (addr, server) = start_server().await;

    let mut channel = dial(addr).await.unwrap();
    assert_eq!(channel.write(TEST_PLAINTEXT).await.unwrap(), TEST_PLAINTEXT.len());

    let mut buf = [0u8; 2048];
    let n = channel.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], TEST_PLAINTEXT);

    channel.close().await.unwrap();
    server.abort();
}

#[tokio::test]
async fn test_echo_is_never_plaintext_on_the_wire() {
    let (server_addr, server) = start_server().await;
    let (tap_addr, seen) = start_tap(server_addr).await;

    let mut channel = dial(tap_addr).await.unwrap();
    channel.write(TEST_PLAINTEXT).await.unwrap();

    let mut buf = [0u8; 2048];
    let n = channel.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], TEST_PLAINTEXT);
    channel.close().await.unwrap();

    let wire = seen.lock().unwrap().clone();
    assert!(wire.starts_with(HANDSHAKE_TOKEN));
    assert!(!wire
        .windows(TEST_PLAINTEXT.len())
        .any(|window| window == TEST_PLAINTEXT));
    server.abort();
}

#[tokio::test]
async fn test_raw_client_gets_rejection_not_echo() {
    let (addr, server) = start_server().await;

    let mut conn = TcpStream::connect(addr).await.unwrap();
    conn.write_all(TEST_PLAINTEXT).await.unwrap();

    let mut response = Vec::new();
    conn.read_to_end(&mut response).await.unwrap();
    assert_ne!(response, TEST_PLAINTEXT);
    assert_eq!(response, REJECTION_TOKEN);
    server.abort();
}

#[tokio::test]
async fn test_rejected_connection_does_not_affect_others() {
    let (addr, server) = start_server().await;

    let mut raw = TcpStream::connect(addr).await.unwrap();
    raw.write_all(b"not the protocol").await.unwrap();

    let mut channel = dial(addr).await.unwrap();
    channel.write(b"still here").await.unwrap();
    let mut buf = [0u8; 64];
    let n = channel.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"still here");

    let mut response = Vec::new();
    raw.read_to_end(&mut response).await.unwrap();
    assert_eq!(response, REJECTION_TOKEN);
    assert!(!server.is_finished());
    server.abort();
}

#[tokio::test]
async fn test_concurrent_clients() {
    let (addr, server) = start_server().await;

    let clients: Vec<_> = (0..8u8)
        .map(|id| {
            tokio::spawn(async move {
                let mut channel = dial(addr).await.unwrap();
                for round in 0..4u8 {
                    let message = vec![id; 64 + round as usize];
                    channel.write(&message).await.unwrap();

                    let mut buf = [0u8; 256];
                    let n = channel.read(&mut buf).await.unwrap();
                    assert_eq!(&buf[..n], &message[..]);
                }
                channel.close().await.unwrap();
            })
        })
        .collect();

    for client in clients {
        client.await.unwrap();
    }
    server.abort();
}

#[tokio::test]
async fn test_dial_against_server_sending_zero_key() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut conn, _) = listener.accept().await.unwrap();
        let mut token = [0u8; HANDSHAKE_TOKEN.len()];
        conn.read_exact(&mut token).await.unwrap();
        conn.write_all(&[0u8; 32]).await.unwrap();

        let mut client_key = [0u8; 32];
        conn.read_exact(&mut client_key).await.unwrap();

        let mut frame = Vec::new();
        let mut buf = [0u8; 2048];
        while frame.len() < TEST_PLAINTEXT.len() + secure_echo_channel::MESSAGE_OVERHEAD {
            let n = conn.read(&mut buf).await.unwrap();
            assert!(n > 0);
            frame.extend_from_slice(&buf[..n]);
        }
        frame
    });

    let mut channel = dial(addr).await.unwrap();
    channel.write(TEST_PLAINTEXT).await.unwrap();

    let frame = server.await.unwrap();
    assert!(!frame
        .windows(TEST_PLAINTEXT.len())
        .any(|window| window == TEST_PLAINTEXT));
}

#[tokio::test]
async fn test_dial_rejected_is_bad_handshake() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut conn, _) = listener.accept().await.unwrap();
        let mut token = [0u8; HANDSHAKE_TOKEN.len()];
        conn.read_exact(&mut token).await.unwrap();
        conn.write_all(REJECTION_TOKEN).await.unwrap();
    });

    let result = dial(addr).await;
    assert!(matches!(result, Err(SecureChannelError::BadHandshake)));
}

#[tokio::test]
async fn test_dial_refused_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = dial(addr).await;
    assert!(matches!(result, Err(SecureChannelError::Io(_))));
}

#[tokio::test]
async fn test_oversized_write_keeps_channel_usable() {
    let (addr, server) = start_server().await;
    let mut channel = dial(addr).await.unwrap();

    let too_big = vec![1u8; secure_echo_channel::MAX_MESSAGE_LEN + 1];
    assert!(matches!(
        channel.write(&too_big).await,
        Err(SecureChannelError::MessageTooLarge { .. })
    ));

    channel.write(TEST_PLAINTEXT).await.unwrap();
    let mut buf = [0u8; 64];
    let n = channel.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], TEST_PLAINTEXT);
    server.abort();
}

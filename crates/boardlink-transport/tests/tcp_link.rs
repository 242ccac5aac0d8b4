//! Integration tests for TCP links against a local board stand-in.
//!
//! The stand-in reads line protocol frames, answers every message carrying an
//! id and reports pin 2 as soon as listening starts.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use boardlink_core::{Error, Pin, PinState};
use boardlink_link::{Connection, FnListener, Link, LinkManager, Links, ResponseAwaiter};
use boardlink_protocol::{Command, LineProtocol};
use boardlink_transport::{TcpConnection, TcpLinkFactory};

async fn spawn_board() -> (u16, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            let _ = seen_tx.send(line.clone());
            let Some(message) = LineProtocol::parse_to_device(&line) else {
                continue;
            };

            if let Command::StartListening(Pin::Analog(2)) = message.command {
                write_half.write_all(b"alp://ared/2/777\n").await.unwrap();
            }
            if let Some(id) = message.id {
                let reply = format!("alp://rply/ok?id={id}&echo={}\n", message.command.name());
                write_half.write_all(reply.as_bytes()).await.unwrap();
            }
        }
    });

    (port, seen_rx)
}

fn links() -> Links {
    Links::new(Arc::new(
        LinkManager::builder().register(TcpLinkFactory).build(),
    ))
}

#[tokio::test]
async fn test_switch_pin_and_await_reply() {
    let (port, mut seen) = spawn_board().await;
    let links = links();
    let link: Arc<dyn Link> = Arc::new(
        links
            .get_link(&format!("boardlink://tcp?host=127.0.0.1&port={port}"))
            .await
            .unwrap(),
    );

    let awaiter = ResponseAwaiter::on_link(Arc::clone(&link)).with_timeout(Duration::from_secs(2));
    let reply = awaiter
        .send_and_wait(|l| l.switch_digital_pin(13, true))
        .await
        .unwrap()
        .into_result()
        .unwrap();

    assert_eq!(reply.id, 1);
    assert!(reply.param("echo").is_some());
    assert_eq!(seen.recv().await.unwrap(), "alp://ppsw/13/1?id=1");

    link.close().unwrap();
    assert_eq!(links.active_links(), 0);
}

#[tokio::test]
async fn test_events_reach_listeners() {
    let (port, _seen) = spawn_board().await;
    let links = links();
    let link = links
        .get_link(&format!("boardlink://tcp?host=127.0.0.1&port={port}"))
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    link.add_listener(Arc::new(FnListener::new(move |event| {
        if let Some(state) = event.as_pin_state() {
            let _ = tx.send(*state);
        }
    })))
    .unwrap();
    link.start_listening(Pin::analog(2)).unwrap();

    let state = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state, PinState::analog(2, 777));
    link.close().unwrap();
}

#[tokio::test]
async fn test_missing_host_fails_before_connecting() {
    let err = links().get_link("boardlink://tcp?port=1").await.unwrap_err();
    assert!(matches!(err, Error::MissingAttribute { ref name, .. } if name == "host"));
}

#[tokio::test]
async fn test_close_shuts_socket_down() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        stream.read_to_end(&mut received).await.unwrap();
        received
    });

    let connection = TcpConnection::connect(&addr.to_string(), Duration::from_secs(1))
        .await
        .unwrap();
    connection.write(b"alp://notn/3\n").unwrap();
    connection.close().unwrap();

    let received = tokio::time::timeout(Duration::from_secs(2), server)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, b"alp://notn/3\n");
    assert!(!connection.is_connected());

    let err = connection.write(b"x").unwrap_err();
    assert!(matches!(err, Error::Disconnected { .. }));
}

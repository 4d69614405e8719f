//! Streamed completions over a raw chunked HTTP server.
//!
//! wiremock answers in one piece, so these tests write the chunks by hand to
//! control where the network splits the body.

use std::time::Duration;

use switchyard::core::completion::{CompletionClient, CompletionTarget};
use switchyard::core::models::Message;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Serve one request, sending `parts` as separate HTTP chunks.
async fn serve_chunked(parts: Vec<Vec<u8>>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0_u8; 4096];
        // Read headers and the (small) JSON body.
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            request.extend_from_slice(&buf[..n]);
            if n == 0 || (request.windows(4).any(|w| w == b"\r\n\r\n") && request.ends_with(b"}")) {
                break;
            }
        }
        socket
            .write_all(
                b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\nconnection: close\r\n\r\n",
            )
            .await
            .unwrap();
        for part in parts {
            socket
                .write_all(format!("{:x}\r\n", part.len()).as_bytes())
                .await
                .unwrap();
            socket.write_all(&part).await.unwrap();
            socket.write_all(b"\r\n").await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        socket.write_all(b"0\r\n\r\n").await.unwrap();
        socket.flush().await.unwrap();
    });
    format!("http://{addr}/v1/chat/completions")
}

#[tokio::test]
async fn cyrillic_split_between_chunks_is_decoded_once_whole() {
    let event = "data: {\"choices\":[{\"delta\":{\"content\":\"Привет\"}}]}\n\ndata: [DONE]\n\n";
    let cut = event.find('П').unwrap() + 1;
    let bytes = event.as_bytes();
    let url = serve_chunked(vec![bytes[..cut].to_vec(), bytes[cut..].to_vec()]).await;

    let client = CompletionClient::with_timeout(Duration::from_secs(10)).unwrap();
    let response = client
        .complete(
            CompletionTarget {
                url: &url,
                key: None,
                provider: "local",
            },
            "tiny-1b",
            &[Message::user("Say hello in Russian")],
            &[],
        )
        .await
        .unwrap();

    assert_eq!(response.text, "Привет");
    assert!(!response.text.contains('\u{FFFD}'));
}

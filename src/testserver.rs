//! Minimal scripted HTTP server for tests that need response sequences on
//! one path (e.g. 503, 503, 200), which a matcher-based mock cannot
//! express. Serves each scripted response on its own connection, then
//! stops; the join handle yields the number of requests served.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub(crate) async fn scripted(responses: Vec<String>) -> (SocketAddr, JoinHandle<usize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let mut served = 0usize;
        for response in responses {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_request(&mut stream).await;
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.ok();
            served += 1;
        }
        served
    });

    (addr, handle)
}

/// Render a raw HTTP/1.1 response. `Connection: close` forces the client
/// to open a fresh connection per attempt, keeping the script in step.
pub(crate) fn response(status: u16, reason: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status} {reason}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        body.len()
    )
}

/// Read one full request (headers plus `Content-Length` body bytes).
async fn read_request(stream: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);

        let Some(end) = headers_end(&buf) else {
            continue;
        };

        let headers = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
        let content_length = headers
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);

        let mut body_len = buf.len() - (end + 4);
        while body_len < content_length {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            body_len += n;
        }
        return;
    }
}

fn headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|window| window == b"\r\n\r\n")
}

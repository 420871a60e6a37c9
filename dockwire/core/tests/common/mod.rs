//! Shared helpers for integration tests
//!
//! A scripted stand-in for the daemon: it reads one HTTP request per
//! connection, records it, then hands the connection to a handler that
//! writes whatever response the test needs.

#![allow(dead_code)]

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::UnixListener;
use tokio::task::JoinHandle;

use dockwire_core::transport::frame;
use dockwire_core::{StreamFrame, StreamType};

/// Route test logs through `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Connections
// ============================================================================

/// Anything the fake daemon can serve on
pub trait DuplexIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> DuplexIo for T {}

/// Boxed server-side connection
pub type Conn = Box<dyn DuplexIo>;

/// A request as the daemon saw it
#[derive(Clone, Debug)]
pub struct Recorded {
    pub head: String,
    pub body: Vec<u8>,
}

impl Recorded {
    /// `METHOD target HTTP/1.1`
    pub fn request_line(&self) -> &str {
        self.head.lines().next().unwrap_or_default()
    }

    /// First header named `name`, case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim())
        })
    }
}

/// Response script for one connection
pub type Handler = Arc<dyn Fn(Recorded, Conn) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure as a [`Handler`]
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Recorded, Conn) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |req, conn| f(req, conn).boxed())
}

/// Handler that writes `response` verbatim and closes
pub fn reply(response: Vec<u8>) -> Handler {
    handler(move |_req, mut conn| {
        let response = response.clone();
        async move {
            use tokio::io::AsyncWriteExt;
            conn.write_all(&response).await.unwrap();
            conn.shutdown().await.unwrap();
        }
    })
}

/// Read one request head plus its `Content-Length` body
pub async fn read_request(conn: &mut Conn) -> Recorded {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];

    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = conn.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed before finishing the request head");
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut recorded = Recorded {
        head,
        body: buf[head_end..].to_vec(),
    };

    let length: usize = recorded
        .header("Content-Length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    while recorded.body.len() < length {
        let n = conn.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed mid-body");
        recorded.body.extend_from_slice(&chunk[..n]);
    }
    recorded
}

/// Read a request, record it, then run `handler`
pub async fn serve_one(mut conn: Conn, handler: Handler, log: Arc<Mutex<Vec<Recorded>>>) {
    let request = read_request(&mut conn).await;
    log.lock().push(request.clone());
    handler(request, conn).await;
}

// ============================================================================
// Fake daemon on a Unix socket
// ============================================================================

/// Fake daemon listening on a socket in a private temp directory
pub struct FakeDaemon {
    _dir: TempDir,
    path: PathBuf,
    requests: Arc<Mutex<Vec<Recorded>>>,
    task: JoinHandle<()>,
}

impl FakeDaemon {
    /// Start serving; every accepted connection runs `handler`
    pub fn start(handler: Handler) -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("docker.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&requests);
        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(serve_one(
                    Box::new(stream),
                    Arc::clone(&handler),
                    Arc::clone(&log),
                ));
            }
        });

        Self {
            _dir: dir,
            path,
            requests,
            task,
        }
    }

    /// Socket path
    pub fn path(&self) -> PathBuf {
        self.path.clone()
    }

    /// `unix://` URL for the socket
    pub fn url(&self) -> String {
        format!("unix://{}", self.path.display())
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().clone()
    }
}

impl Drop for FakeDaemon {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ============================================================================
// Response builders
// ============================================================================

/// Full response with a `Content-Length` body
pub fn response(status: &str, content_type: &str, body: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    out.extend_from_slice(body);
    out
}

/// Chunked response with each slice of `chunks` sent as one chunk
pub fn chunked(content_type: &str, chunks: &[&[u8]]) -> Vec<u8> {
    let mut out = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nTransfer-Encoding: chunked\r\n\r\n"
    )
    .into_bytes();
    for chunk in chunks {
        out.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
        out.extend_from_slice(chunk);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"0\r\n\r\n");
    out
}

/// One multiplexed frame in wire form
pub fn frame_bytes(stream: StreamType, payload: &[u8]) -> Vec<u8> {
    frame::encode(&StreamFrame::new(stream, payload)).unwrap()
}

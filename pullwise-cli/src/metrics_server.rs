//! Minimal HTTP endpoint exposing Prometheus metrics
//!
//! Serves `GET /metrics` (text exposition) and `GET /health`. One request per
//! connection; the connection is closed after the response. The request head
//! is parsed with httparse from a fixed-size buffer, and a client gets
//! [`READ_TIMEOUT`] to send it.

use std::sync::Arc;
use std::time::Duration;

use pullwise_core::metrics::PrometheusMetrics;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Request head size limit (request line plus headers)
const MAX_HEAD_BYTES: usize = 8 * 1024;

const MAX_HEADERS: usize = 32;

/// Time a client gets to send its request head, and again to take the response
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Parsed request head
#[derive(Debug, PartialEq)]
struct Request {
    method: String,
    path: String,
}

#[derive(Debug, PartialEq)]
struct HttpResponse {
    status: u16,
    content_type: &'static str,
    body: String,
}

impl HttpResponse {
    fn new(status: u16, content_type: &'static str, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type,
            body: body.into(),
        }
    }

    fn text(status: u16, body: &str) -> Self {
        Self::new(status, "text/plain; charset=utf-8", body)
    }

    fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            400 => "Bad Request",
            404 => "Not Found",
            405 => "Method Not Allowed",
            408 => "Request Timeout",
            431 => "Request Header Fields Too Large",
            _ => "Internal Server Error",
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.status,
            self.reason(),
            self.content_type,
            self.body.len(),
            self.body
        )
        .into_bytes()
    }
}

/// Bind `addr` and serve until `shutdown` is cancelled
pub async fn spawn(
    addr: &str,
    metrics: Arc<PrometheusMetrics>,
    shutdown: CancellationToken,
) -> anyhow::Result<JoinHandle<()>> {
    let listener = TcpListener::bind(addr).await?;
    info!(address = %listener.local_addr()?, "Serving metrics");
    Ok(tokio::spawn(serve(listener, metrics, shutdown, READ_TIMEOUT)))
}

async fn serve(
    listener: TcpListener,
    metrics: Arc<PrometheusMetrics>,
    shutdown: CancellationToken,
    read_timeout: Duration,
) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Metrics accept error");
                    continue;
                }
            },
        };

        let metrics = metrics.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, &metrics, read_timeout).await {
                debug!(%peer, error = %e, "Metrics connection failed");
            }
        });
    }
    debug!("Metrics endpoint stopped");
}

async fn handle_connection(
    mut stream: TcpStream,
    metrics: &PrometheusMetrics,
    read_timeout: Duration,
) -> std::io::Result<()> {
    let response = match tokio::time::timeout(read_timeout, read_request(&mut stream)).await {
        Ok(Ok(request)) => route(&request, metrics),
        Ok(Err(rejection)) => rejection,
        Err(_) => HttpResponse::text(408, "request timeout\n"),
    };

    let write = async {
        stream.write_all(&response.to_bytes()).await?;
        stream.shutdown().await
    };
    match tokio::time::timeout(read_timeout, write).await {
        Ok(result) => result,
        Err(_) => Err(std::io::ErrorKind::TimedOut.into()),
    }
}

/// Read one request head, or the response that rejects it
async fn read_request<R>(reader: &mut R) -> Result<Request, HttpResponse>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; MAX_HEAD_BYTES];
    let mut filled = 0;

    loop {
        if filled == buf.len() {
            return Err(HttpResponse::text(431, "request head too large\n"));
        }
        let n = reader
            .read(&mut buf[filled..])
            .await
            .map_err(|e| HttpResponse::text(400, &format!("{}\n", e)))?;
        if n == 0 {
            return Err(HttpResponse::text(400, "incomplete request\n"));
        }
        filled += n;

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut request = httparse::Request::new(&mut headers);
        match request.parse(&buf[..filled]) {
            Ok(httparse::Status::Complete(_)) => {
                return Ok(Request {
                    method: request.method.unwrap_or_default().to_string(),
                    path: request.path.unwrap_or("/").to_string(),
                });
            }
            Ok(httparse::Status::Partial) => continue,
            Err(httparse::Error::TooManyHeaders) => {
                return Err(HttpResponse::text(431, "too many headers\n"));
            }
            Err(e) => return Err(HttpResponse::text(400, &format!("{}\n", e))),
        }
    }
}

fn route(request: &Request, metrics: &PrometheusMetrics) -> HttpResponse {
    let path = request.path.split('?').next().unwrap_or(&request.path);

    match (request.method.as_str(), path) {
        ("GET", "/metrics") => match metrics.render() {
            Ok(body) => HttpResponse::new(200, prometheus::TEXT_FORMAT, body),
            Err(e) => HttpResponse::text(500, &format!("{}\n", e)),
        },
        ("GET", "/health") => HttpResponse::text(200, "ok\n"),
        (_, "/metrics" | "/health") => HttpResponse::text(405, "method not allowed\n"),
        _ => HttpResponse::text(404, "not found\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Registry;
    use pullwise_core::metrics::{CounterMetric, MetricsSink};
    use pullwise_core::Status;

    fn metrics() -> Arc<PrometheusMetrics> {
        Arc::new(PrometheusMetrics::new(&Registry::new()).unwrap())
    }

    fn request(method: &str, path: &str) -> Request {
        Request {
            method: method.to_string(),
            path: path.to_string(),
        }
    }

    async fn exchange(addr: std::net::SocketAddr, raw: &[u8]) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    async fn start(read_timeout: Duration) -> (std::net::SocketAddr, CancellationToken, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve(listener, metrics(), shutdown.clone(), read_timeout));
        (addr, shutdown, server)
    }

    #[test]
    fn test_route_metrics() {
        let metrics = metrics();
        metrics.increment(CounterMetric::EventProcess, Status::Success);

        let response = route(&request("GET", "/metrics"), &metrics);
        assert_eq!(response.status, 200);
        assert!(response
            .body
            .contains("event_process_total{status=\"success\"} 1"));
    }

    #[test]
    fn test_route_errors() {
        let metrics = metrics();
        assert_eq!(route(&request("GET", "/nope"), &metrics).status, 404);
        assert_eq!(route(&request("POST", "/metrics"), &metrics).status, 405);
        assert_eq!(route(&request("GET", "/health?verbose=1"), &metrics).status, 200);
    }

    #[tokio::test]
    async fn test_read_request_parses_head() {
        let mut raw: &[u8] = b"GET /metrics?x=1 HTTP/1.1\r\nHost: localhost\r\nAccept: */*\r\n\r\n";
        let parsed = read_request(&mut raw).await.unwrap();
        assert_eq!(parsed, request("GET", "/metrics?x=1"));
    }

    #[tokio::test]
    async fn test_read_request_rejects_bad_heads() {
        let mut truncated: &[u8] = b"GET /metrics HTTP/1.1\r\nHost: local";
        assert_eq!(read_request(&mut truncated).await.unwrap_err().status, 400);

        let mut garbage: &[u8] = b"\x00\x01 nonsense\r\n\r\n";
        assert_eq!(read_request(&mut garbage).await.unwrap_err().status, 400);

        let headers: String = (0..MAX_HEADERS + 1)
            .map(|i| format!("X-Header-{}: v\r\n", i))
            .collect();
        let many = format!("GET /metrics HTTP/1.1\r\n{}\r\n", headers);
        assert_eq!(read_request(&mut many.as_bytes()).await.unwrap_err().status, 431);
    }

    #[tokio::test]
    async fn test_read_request_caps_head_size() {
        // A header line that never ends fills the buffer exactly
        let mut raw = b"GET /metrics HTTP/1.1\r\nX-Pad: ".to_vec();
        raw.resize(MAX_HEAD_BYTES * 2, b'a');
        let rejection = read_request(&mut raw.as_slice()).await.unwrap_err();
        assert_eq!(rejection.status, 431);
    }

    #[tokio::test]
    async fn test_serves_until_shutdown() {
        let metrics = metrics();
        metrics.increment(CounterMetric::QueueConsume, Status::Failure);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve(listener, metrics, shutdown.clone(), READ_TIMEOUT));

        let response = exchange(addr, b"GET /metrics HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("queue_consume_total{status=\"failure\"} 1"));

        shutdown.cancel();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_request_is_rejected() {
        let (addr, shutdown, server) = start(READ_TIMEOUT).await;

        // Exactly fills the head buffer so the server reads every byte sent
        let mut raw = b"GET /metrics HTTP/1.1\r\nX-Pad: ".to_vec();
        raw.resize(MAX_HEAD_BYTES, b'a');
        let response = exchange(addr, &raw).await;
        assert!(response.starts_with("HTTP/1.1 431 "), "{}", response);

        shutdown.cancel();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_slow_client_times_out() {
        let (addr, shutdown, server) = start(Duration::from_millis(50)).await;

        // Head never terminated
        let response = tokio::time::timeout(
            Duration::from_secs(5),
            exchange(addr, b"GET /metrics HTTP/1.1\r\nHost: localhost\r\n"),
        )
        .await
        .expect("server should give up on the client");
        assert!(response.starts_with("HTTP/1.1 408 Request Timeout"), "{}", response);

        // The endpoint still serves other clients
        let response = exchange(addr, b"GET /health HTTP/1.1\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 200 OK"));

        shutdown.cancel();
        server.await.unwrap();
    }
}

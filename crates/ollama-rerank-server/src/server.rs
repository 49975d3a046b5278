use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ollama_rerank_score::{OllamaScoreProvider, ProviderError, ScaledScore, ScoreProvider};
use serde::Serialize;
use serde_json::json;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt,
    BufReader,
};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::config::{AdapterConfig, SERVICE_NAME};
use crate::protocol::RawRerankRequest;
use crate::rerank::{RerankError, Reranker};

const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;
/// Request line plus all header lines.
const MAX_HEAD_BYTES: usize = 64 * 1024;
/// Unread body bytes discarded after a rejection so the client sees the response.
const LINGER_DRAIN_BYTES: u64 = 64 * 1024 * 1024;
const LINGER_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Rerank,
    Health,
    Index,
    Models,
}

/// `/v1/rerank` and `/rerank` are aliases of `/api/rerank` and share its handler.
const ROUTES: &[(&str, &str, Route)] = &[
    ("POST", "/api/rerank", Route::Rerank),
    ("POST", "/v1/rerank", Route::Rerank),
    ("POST", "/rerank", Route::Rerank),
    ("GET", "/health", Route::Health),
    ("GET", "/", Route::Index),
    ("GET", "/api/models", Route::Models),
];

pub struct RerankServer {
    config: AdapterConfig,
    reranker: Reranker,
}

impl RerankServer {
    pub fn new(config: AdapterConfig) -> Result<Self, ProviderError> {
        let provider = OllamaScoreProvider::new(config.score_config())?
            .with_interpreter(Arc::new(ScaledScore::new(config.score_scale)));
        Ok(Self::with_provider(config, Arc::new(provider)))
    }

    pub fn with_provider(config: AdapterConfig, provider: Arc<dyn ScoreProvider>) -> Self {
        let reranker = Reranker::new(provider, config.default_model.clone());
        Self { config, reranker }
    }

    pub async fn serve_http(self: Arc<Self>) -> io::Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr()).await?;
        let local = listener.local_addr()?;
        info!(addr = %local, "ollama rerank adapter listening");
        info!(
            rerank = %format!("http://localhost:{}/api/rerank", local.port()),
            health = %format!("http://localhost:{}/health", local.port()),
            ollama_url = %self.config.ollama_base_url,
            default_model = %self.config.default_model,
            "endpoints ready"
        );
        self.serve(listener).await
    }

    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> io::Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, _peer)) => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(err) = server.handle_http_connection(stream).await {
                            warn!(error = %err, "http request error");
                        }
                    });
                }
                Err(err) => {
                    error!(error = %err, "http accept error");
                }
            }
        }
    }

    async fn handle_http_connection<S>(&self, stream: S) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut reader = BufReader::new(stream);
        let started = Instant::now();
        let head = match read_request_head(&mut reader).await? {
            Incoming::Closed => return Ok(()),
            Incoming::HeadTooLarge => {
                let response = HttpResponse::json(
                    431,
                    &json!({
                        "error": "header_too_large",
                        "message": format!("request head exceeds {MAX_HEAD_BYTES} bytes")
                    }),
                );
                log_request("-", "-", &response, started);
                write_http_response(reader.get_mut(), response).await?;
                return linger_close(reader, LINGER_DRAIN_BYTES).await;
            }
            Incoming::Head(head) => head,
        };

        if head.content_length > MAX_BODY_BYTES {
            let response = HttpResponse::json(
                413,
                &json!({
                    "error": "payload_too_large",
                    "message": format!("request body exceeds {MAX_BODY_BYTES} bytes")
                }),
            );
            log_request(&head.method, &head.path, &response, started);
            write_http_response(reader.get_mut(), response).await?;
            let declared = u64::try_from(head.content_length).unwrap_or(u64::MAX);
            return linger_close(reader, declared.min(LINGER_DRAIN_BYTES)).await;
        }

        if head.expect_continue && head.content_length > 0 {
            let stream = reader.get_mut();
            stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await?;
            stream.flush().await?;
        }

        let mut body = vec![0_u8; head.content_length];
        if head.content_length > 0 {
            reader.read_exact(&mut body).await?;
        }
        let req = HttpRequest {
            method: head.method,
            path: head.path,
            body,
        };
        let (method, path) = (req.method.clone(), req.path.clone());
        let response = self.dispatch_http_request(req).await;
        log_request(&method, &path, &response, started);
        write_http_response(reader.get_mut(), response).await
    }

    async fn dispatch_http_request(&self, req: HttpRequest) -> HttpResponse {
        if req.method == "OPTIONS" {
            return HttpResponse::empty(204);
        }

        let route = ROUTES
            .iter()
            .find(|(method, path, _)| *method == req.method && *path == req.path)
            .map(|(_, _, route)| *route);

        match route {
            Some(Route::Rerank) => self.handle_rerank(&req.body).await,
            Some(Route::Health) => self.handle_health(),
            Some(Route::Index) => handle_index(),
            Some(Route::Models) => self.handle_models(),
            None if ROUTES.iter().any(|(_, path, _)| *path == req.path) => HttpResponse::json(
                405,
                &json!({
                    "error": "method_not_allowed",
                    "message": format!("{} is not supported on {}", req.method, req.path)
                }),
            ),
            None => HttpResponse::json(
                404,
                &json!({
                    "error": "not_found",
                    "message": format!("no route for {} {}", req.method, req.path)
                }),
            ),
        }
    }

    async fn handle_rerank(&self, body: &[u8]) -> HttpResponse {
        let raw = if body.iter().all(u8::is_ascii_whitespace) {
            RawRerankRequest::default()
        } else {
            match serde_json::from_slice::<RawRerankRequest>(body) {
                Ok(raw) => raw,
                Err(err) => {
                    return HttpResponse::json(
                        400,
                        &json!({"error": format!("Invalid JSON body: {err}")}),
                    );
                }
            }
        };

        match self.reranker.rerank(raw).await {
            Ok(response) => HttpResponse::json(200, &response),
            Err(RerankError::Validation(message)) => {
                HttpResponse::json(400, &json!({"error": message}))
            }
            Err(err) => {
                error!(error = %err, "rerank request failed");
                HttpResponse::json(
                    err.status(),
                    &json!({
                        "error": "Internal server error",
                        "message": err.to_string()
                    }),
                )
            }
        }
    }

    fn handle_health(&self) -> HttpResponse {
        HttpResponse::json(
            200,
            &json!({
                "status": "ok",
                "service": SERVICE_NAME,
                "ollama_url": self.config.ollama_base_url,
                "default_model": self.reranker.default_model()
            }),
        )
    }

    fn handle_models(&self) -> HttpResponse {
        let model = self.reranker.default_model();
        HttpResponse::json(
            200,
            &json!({
                "models": [{"id": model, "name": model, "type": "rerank"}]
            }),
        )
    }
}

fn handle_index() -> HttpResponse {
    HttpResponse::json(
        200,
        &json!({
            "service": SERVICE_NAME,
            "version": env!("CARGO_PKG_VERSION"),
            "status": "running",
            "endpoints": {
                "rerank": "/api/rerank",
                "health": "/health",
                "models": "/api/models"
            }
        }),
    )
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    body: Vec<u8>,
}

#[derive(Debug)]
struct RequestHead {
    method: String,
    path: String,
    content_length: usize,
    expect_continue: bool,
}

#[derive(Debug)]
enum Incoming {
    Closed,
    HeadTooLarge,
    Head(RequestHead),
}

struct HttpResponse {
    status: u16,
    content_type: Option<&'static str>,
    body: Vec<u8>,
}

impl HttpResponse {
    fn json<T: Serialize>(status: u16, value: &T) -> Self {
        let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec());
        Self {
            status,
            content_type: Some("application/json"),
            body,
        }
    }

    const fn empty(status: u16) -> Self {
        Self {
            status,
            content_type: None,
            body: Vec::new(),
        }
    }
}

fn log_request(method: &str, path: &str, response: &HttpResponse, started: Instant) {
    info!(
        method = %method,
        path = %path,
        status = response.status,
        elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        "request"
    );
}

/// Reads one line, charging it against `budget`. `None` means the budget ran out
/// before the line ended.
async fn read_capped_line<R>(
    reader: &mut R,
    budget: &mut usize,
) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let limit = u64::try_from(*budget).unwrap_or(u64::MAX);
    let read = (&mut *reader).take(limit).read_line(&mut line).await?;
    *budget = budget.saturating_sub(read);
    if *budget == 0 && !line.ends_with('\n') {
        return Ok(None);
    }
    Ok(Some(line))
}

async fn read_request_head<R>(reader: &mut R) -> io::Result<Incoming>
where
    R: AsyncBufRead + Unpin,
{
    let mut budget = MAX_HEAD_BYTES;
    let Some(line) = read_capped_line(reader, &mut budget).await? else {
        return Ok(Incoming::HeadTooLarge);
    };
    let first = line.trim_end_matches(['\r', '\n']);
    if first.is_empty() {
        return Ok(Incoming::Closed);
    }

    let mut parts = first.split_whitespace();
    let Some(method) = parts.next() else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "invalid http request line (missing method)",
        ));
    };
    let Some(target) = parts.next() else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "invalid http request line (missing path)",
        ));
    };
    let method = method.to_ascii_uppercase();
    let path = target
        .split_once('?')
        .map_or(target, |(path, _)| path)
        .to_string();

    let mut content_length = 0usize;
    let mut expect_continue = false;
    loop {
        let Some(header) = read_capped_line(reader, &mut budget).await? else {
            return Ok(Incoming::HeadTooLarge);
        };
        let header = header.trim_end_matches(['\r', '\n']);
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            let name = name.trim();
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse::<usize>().unwrap_or(0);
            } else if name.eq_ignore_ascii_case("expect") {
                expect_continue = value.trim().eq_ignore_ascii_case("100-continue");
            }
        }
    }

    Ok(Incoming::Head(RequestHead {
        method,
        path,
        content_length,
        expect_continue,
    }))
}

/// Half-closes the connection after a rejection, then discards what the client is
/// still sending so closing does not reset the socket before the response is read.
async fn linger_close<S>(mut reader: BufReader<S>, drain: u64) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    reader.get_mut().shutdown().await?;
    let mut rest = (&mut reader).take(drain);
    let drained =
        tokio::time::timeout(LINGER_TIMEOUT, tokio::io::copy(&mut rest, &mut tokio::io::sink()))
            .await;
    if let Ok(Ok(bytes)) = drained {
        debug!(bytes, "discarded unread request bytes");
    }
    Ok(())
}

async fn write_http_response<W>(stream: &mut W, response: HttpResponse) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let reason = http_reason_phrase(response.status);
    let mut head = format!(
        "HTTP/1.1 {} {}\r\nAccess-Control-Allow-Origin: *\r\nAccess-Control-Allow-Methods: GET, POST, OPTIONS\r\nAccess-Control-Allow-Headers: *\r\n",
        response.status, reason
    );
    if let Some(content_type) = response.content_type {
        head.push_str(&format!("Content-Type: {content_type}\r\n"));
    }
    head.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n",
        response.body.len()
    ));
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(&response.body).await?;
    stream.flush().await
}

const fn http_reason_phrase(status: u16) -> &'static str {
    match status {
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        _ => "OK",
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use ollama_rerank_score::ScoreRequest;
    use serde_json::Value;

    use super::*;

    struct TableProvider(HashMap<&'static str, f32>);

    #[async_trait]
    impl ScoreProvider for TableProvider {
        fn name(&self) -> &'static str {
            "table"
        }

        async fn score(&self, request: ScoreRequest) -> Result<f32, ProviderError> {
            match self.0.get(request.document.as_str()) {
                Some(score) => Ok(*score),
                None => Err(ProviderError::Api {
                    status: 503,
                    body: "backend unavailable".to_string(),
                }),
            }
        }
    }

    fn server() -> RerankServer {
        let provider = TableProvider(HashMap::from([("A", 0.3), ("B", 0.9), ("C", 0.5)]));
        RerankServer::with_provider(AdapterConfig::default(), Arc::new(provider))
    }

    fn request(method: &str, path: &str, body: &str) -> HttpRequest {
        HttpRequest {
            method: method.to_string(),
            path: path.to_string(),
            body: body.as_bytes().to_vec(),
        }
    }

    fn body_json(resp: &HttpResponse) -> Value {
        serde_json::from_slice(&resp.body).expect("json body")
    }

    #[tokio::test]
    async fn rerank_aliases_share_one_handler() {
        let server = server();
        let body = r#"{"query":"Q","documents":["A","B","C"],"top_n":2}"#;
        let mut seen = Vec::new();
        for path in ["/api/rerank", "/v1/rerank", "/rerank"] {
            let resp = server.dispatch_http_request(request("POST", path, body)).await;
            assert_eq!(resp.status, 200);
            seen.push(body_json(&resp));
        }
        assert!(seen.windows(2).all(|w| w[0] == w[1]));
        let v = &seen[0];
        assert_eq!(v["results"].as_array().map(Vec::len), Some(2));
        assert_eq!(v["results"][0]["index"], 1);
        assert_eq!(v["results"][1]["index"], 2);
        assert_eq!(v["usage"]["total_tokens"], 4);
    }

    #[tokio::test]
    async fn validation_and_backend_errors_map_to_status() {
        let server = server();

        let resp = server
            .dispatch_http_request(request("POST", "/api/rerank", r#"{"documents":["A"]}"#))
            .await;
        assert_eq!(resp.status, 400);
        assert_eq!(body_json(&resp)["error"], "Missing required parameter: query");

        let resp = server
            .dispatch_http_request(request("POST", "/api/rerank", ""))
            .await;
        assert_eq!(resp.status, 400);

        let resp = server
            .dispatch_http_request(request("POST", "/api/rerank", "{not json"))
            .await;
        assert_eq!(resp.status, 400);

        let resp = server
            .dispatch_http_request(request(
                "POST",
                "/api/rerank",
                r#"{"query":"q","documents":["A","unknown"]}"#,
            ))
            .await;
        assert_eq!(resp.status, 500);
        let v = body_json(&resp);
        assert_eq!(v["error"], "Internal server error");
        assert!(
            v["message"]
                .as_str()
                .is_some_and(|m| m.contains("backend unavailable"))
        );
    }

    #[tokio::test]
    async fn descriptor_endpoints_report_configuration() {
        let server = server();

        let v = body_json(&server.dispatch_http_request(request("GET", "/health", "")).await);
        assert_eq!(v["status"], "ok");
        assert_eq!(v["service"], SERVICE_NAME);
        assert_eq!(v["ollama_url"], "http://localhost:11434");
        assert_eq!(v["default_model"], "dengcao/Qwen3-Reranker-8B:Q5_K_M");

        let v = body_json(&server.dispatch_http_request(request("GET", "/", "")).await);
        assert_eq!(v["status"], "running");
        assert_eq!(v["endpoints"]["rerank"], "/api/rerank");

        let v = body_json(
            &server
                .dispatch_http_request(request("GET", "/api/models", ""))
                .await,
        );
        assert_eq!(v["models"][0]["id"], "dengcao/Qwen3-Reranker-8B:Q5_K_M");
        assert_eq!(v["models"][0]["type"], "rerank");
    }

    #[tokio::test]
    async fn unknown_routes_and_methods() {
        let server = server();
        let resp = server.dispatch_http_request(request("GET", "/nope", "")).await;
        assert_eq!(resp.status, 404);
        let resp = server
            .dispatch_http_request(request("GET", "/api/rerank", ""))
            .await;
        assert_eq!(resp.status, 405);
        let resp = server
            .dispatch_http_request(request("OPTIONS", "/api/rerank", ""))
            .await;
        assert_eq!(resp.status, 204);
        assert!(resp.body.is_empty());
    }

    async fn head_of(raw: &[u8]) -> Incoming {
        let mut reader = raw;
        read_request_head(&mut reader).await.expect("read head")
    }

    #[tokio::test]
    async fn reads_request_line_and_headers() {
        let Incoming::Head(head) = head_of(
            b"post /v1/rerank?x=1 HTTP/1.1\r\nHost: a\r\ncontent-length: 4\r\nExpect: 100-Continue\r\n\r\nbody",
        )
        .await
        else {
            unreachable!("expected a request head");
        };
        assert_eq!(head.method, "POST");
        assert_eq!(head.path, "/v1/rerank");
        assert_eq!(head.content_length, 4);
        assert!(head.expect_continue);

        assert!(matches!(head_of(b"").await, Incoming::Closed));
    }

    #[tokio::test]
    async fn oversized_head_is_cut_off() {
        let long_line = format!("GET /{} HTTP/1.1\r\n\r\n", "a".repeat(MAX_HEAD_BYTES));
        assert!(matches!(
            head_of(long_line.as_bytes()).await,
            Incoming::HeadTooLarge
        ));

        let mut many = String::from("GET /health HTTP/1.1\r\n");
        while many.len() <= MAX_HEAD_BYTES {
            many.push_str("X-Filler: 0123456789abcdef0123456789abcdef\r\n");
        }
        many.push_str("\r\n");
        assert!(matches!(head_of(many.as_bytes()).await, Incoming::HeadTooLarge));
    }

    #[tokio::test]
    async fn expect_continue_gets_interim_response_before_body() {
        let server = server();
        let (client, conn) = tokio::io::duplex(64 * 1024);
        let body = r#"{"query":"Q","documents":["A","B"]}"#;

        let client_side = async move {
            let (read_half, mut write_half) = tokio::io::split(client);
            let mut read_half = BufReader::new(read_half);
            let head = format!(
                "POST /rerank HTTP/1.1\r\nContent-Length: {}\r\nExpect: 100-continue\r\n\r\n",
                body.len()
            );
            write_half.write_all(head.as_bytes()).await.expect("write head");

            let mut interim = String::new();
            read_half.read_line(&mut interim).await.expect("read interim");
            assert_eq!(interim, "HTTP/1.1 100 Continue\r\n");
            let mut blank = String::new();
            read_half.read_line(&mut blank).await.expect("read blank");
            assert_eq!(blank, "\r\n");

            write_half.write_all(body.as_bytes()).await.expect("write body");
            let mut rest = String::new();
            read_half.read_to_string(&mut rest).await.expect("read response");
            rest
        };

        let (served, response) = tokio::join!(server.handle_http_connection(conn), client_side);
        served.expect("serve connection");
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains(r#""index":1"#));
    }

    #[tokio::test]
    async fn oversized_body_is_answered_and_drained() {
        let server = server();
        let (client, conn) = tokio::io::duplex(8 * 1024);

        let client_side = async move {
            let (mut read_half, mut write_half) = tokio::io::split(client);
            let head = format!(
                "POST /api/rerank HTTP/1.1\r\nContent-Length: {}\r\n\r\n",
                MAX_BODY_BYTES + 1
            );
            write_half.write_all(head.as_bytes()).await.expect("write head");
            // More than the pipe holds: the server has to read it for this to finish.
            write_half
                .write_all(&vec![b'x'; 32 * 1024])
                .await
                .expect("write partial body");
            write_half.shutdown().await.expect("client shutdown");
            let mut response = String::new();
            read_half
                .read_to_string(&mut response)
                .await
                .expect("read response");
            response
        };

        let (served, response) = tokio::join!(server.handle_http_connection(conn), client_side);
        served.expect("serve connection");
        assert!(response.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
        assert!(response.contains("payload_too_large"));
    }

    #[tokio::test]
    async fn oversized_head_is_answered_with_431() {
        let server = server();
        let (client, conn) = tokio::io::duplex(8 * 1024);

        let client_side = async move {
            let (mut read_half, mut write_half) = tokio::io::split(client);
            let head = format!(
                "GET /health HTTP/1.1\r\nCookie: {}\r\n\r\n",
                "c".repeat(MAX_HEAD_BYTES)
            );
            write_half.write_all(head.as_bytes()).await.expect("write head");
            write_half.shutdown().await.expect("client shutdown");
            let mut response = String::new();
            read_half
                .read_to_string(&mut response)
                .await
                .expect("read response");
            response
        };

        let (served, response) = tokio::join!(server.handle_http_connection(conn), client_side);
        served.expect("serve connection");
        assert!(response.starts_with("HTTP/1.1 431 Request Header Fields Too Large\r\n"));
    }

    #[tokio::test]
    async fn response_carries_cors_and_length() {
        let mut out = Vec::new();
        write_http_response(&mut out, HttpResponse::json(200, &json!({"a": 1})))
            .await
            .expect("write");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Access-Control-Allow-Origin: *\r\n"));
        assert!(text.contains("Content-Type: application/json\r\n"));
        assert!(text.contains("Content-Length: 7\r\n"));
        assert!(text.ends_with("\r\n\r\n{\"a\":1}"));
    }
}

//! Wire-format tests against a scripted local HTTP server.
//!
//! Each test boots a loopback listener serving canned responses, points a
//! client at it, and checks parsing, streaming normalisation, retry and
//! error classification without touching the network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use pl_domain::error::Error;
use pl_domain::message::Message;
use pl_domain::stream::StreamEvent;
use pl_providers::{ChatClient, ChatRequest, ClientFactory, ClientOptions, RateLimiter, RetryPolicy};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Mock server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct MockServer {
    base_url: String,
    hits: Arc<AtomicUsize>,
}

impl MockServer {
    /// Serve the given raw HTTP responses, one per connection, in order.
    /// The last response repeats for any further connections.
    async fn start(responses: Vec<String>) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_srv = hits.clone();

        tokio::spawn(async move {
            let mut served = 0usize;
            while let Ok((mut socket, _)) = listener.accept().await {
                let response = responses
                    .get(served)
                    .or_else(|| responses.last())
                    .cloned()
                    .unwrap_or_default();
                served += 1;
                hits_srv.fetch_add(1, Ordering::SeqCst);

                read_request(&mut socket).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            hits,
        }
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// Read one HTTP request: headers, then a Content-Length body if present.
async fn read_request(socket: &mut tokio::net::TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let Ok(n) = socket.read(&mut chunk).await else {
            return;
        };
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(head_end) = find_subslice(&buf, b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..head_end]).to_lowercase();
            let content_length = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            let have = buf.len() - head_end - 4;
            if have >= content_length {
                return;
            }
        }
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn http_response(status: u16, body: &str) -> String {
    format!(
        "HTTP/1.1 {status} MOCK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

fn quick_factory() -> ClientFactory {
    ClientFactory::with(
        Arc::new(RateLimiter::new(100, Duration::from_secs(1))),
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
        },
    )
}

fn ollama_client(base_url: &str) -> Arc<dyn ChatClient> {
    quick_factory()
        .create(ClientOptions::Ollama {
            base_url: base_url.to_owned(),
        })
        .unwrap()
}

fn openai_client(base_url: &str) -> Arc<dyn ChatClient> {
    quick_factory()
        .create(ClientOptions::OpenAi {
            api_key: Some("test-key".into()),
            base_url: Some(base_url.to_owned()),
        })
        .unwrap()
}

fn say_hi_request() -> ChatRequest {
    ChatRequest::new(
        vec![Message::system("be brief"), Message::user("say hi")],
        "llama3",
        0.0,
    )
}

async fn collect_deltas(client: &Arc<dyn ChatClient>, req: &ChatRequest) -> Vec<String> {
    let mut stream = client.chat_stream(req).await.unwrap();
    let mut deltas = Vec::new();
    while let Some(event) = stream.next().await {
        match event.unwrap() {
            StreamEvent::Delta { text } => deltas.push(text),
            StreamEvent::Done => break,
        }
    }
    deltas
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Ollama wire format
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn ollama_chat_round_trip() {
    let server = MockServer::start(vec![http_response(
        200,
        r#"{"message": {"role": "assistant", "content": "Hi there."}, "done": true}"#,
    )])
    .await;

    let client = ollama_client(&server.base_url);
    let reply = client.chat(&say_hi_request()).await.unwrap();
    assert_eq!(reply, "Hi there.");
    assert_eq!(server.hits(), 1); // 200 on the first try, no retries
}

#[tokio::test]
async fn ollama_stream_delta_assembly() {
    let body = concat!(
        "{\"message\": {\"content\": \"Hel\"}}\n",
        "{\"message\": {\"content\": \"lo\"}}\n",
        "{\"message\": {\"content\": \" world\"}}\n",
        "{\"message\": {\"content\": \"\"}, \"done\": true}\n",
    );
    let server = MockServer::start(vec![http_response(200, body), http_response(200, body)]).await;

    let client = ollama_client(&server.base_url);

    let mut req = say_hi_request();
    req.yield_full_response = false;
    assert_eq!(
        collect_deltas(&client, &req).await,
        vec!["Hel", "lo", " world"]
    );

    req.yield_full_response = true;
    assert_eq!(
        collect_deltas(&client, &req).await,
        vec!["Hel", "Hello", "Hello world"]
    );
}

#[tokio::test]
async fn ollama_list_models_parses_tags() {
    let server = MockServer::start(vec![http_response(
        200,
        r#"{"models": [{"name": "llama3:8b"}, {"name": "qwen3:14b"}]}"#,
    )])
    .await;

    let client = ollama_client(&server.base_url);
    let models = client.list_models().await.unwrap();
    assert_eq!(models, vec!["llama3:8b", "qwen3:14b"]);
}

#[tokio::test]
async fn ollama_model_cache_avoids_second_fetch() {
    let server = MockServer::start(vec![http_response(
        200,
        r#"{"models": [{"name": "llama3:8b"}]}"#,
    )])
    .await;

    let client = ollama_client(&server.base_url);
    client.list_models().await.unwrap();
    client.list_models().await.unwrap();
    assert_eq!(server.hits(), 1);

    client.clear_cache();
    client.list_models().await.unwrap();
    assert_eq!(server.hits(), 2);
}

#[tokio::test]
async fn ollama_404_names_the_model() {
    let server =
        MockServer::start(vec![http_response(404, r#"{"error": "model not found"}"#); 1]).await;

    let client = ollama_client(&server.base_url);
    let err = client.chat(&say_hi_request()).await.unwrap_err();
    match err {
        Error::ModelUnavailable { model, .. } => assert_eq!(model, "llama3"),
        other => panic!("unexpected: {other}"),
    }
    assert_eq!(server.hits(), 1); // not retried
}

#[tokio::test]
async fn ollama_empty_body_is_format_error() {
    let server = MockServer::start(vec![http_response(200, r#"{"message": {}}"#)]).await;

    let client = ollama_client(&server.base_url);
    let err = client.chat(&say_hi_request()).await.unwrap_err();
    assert_eq!(err.kind(), "format-error");
    assert_eq!(server.hits(), 1);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// OpenAI-compatible wire format
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn openai_chat_parses_choices() {
    let server = MockServer::start(vec![http_response(
        200,
        r#"{"choices": [{"message": {"role": "assistant", "content": "hello"}}]}"#,
    )])
    .await;

    let client = openai_client(&server.base_url);
    let reply = client.chat(&say_hi_request()).await.unwrap();
    assert_eq!(reply, "hello");
}

#[tokio::test]
async fn openai_stream_sse_assembly() {
    let body = concat!(
        "data: {\"choices\": [{\"delta\": {\"role\": \"assistant\"}}]}\n\n",
        "data: {\"choices\": [{\"delta\": {\"content\": \"test\"}}]}\n\n",
        "data: {\"choices\": [{\"delta\": {\"content\": \" stream\"}}]}\n\n",
        "data: [DONE]\n\n",
    );
    let server = MockServer::start(vec![http_response(200, body), http_response(200, body)]).await;

    let client = openai_client(&server.base_url);

    let mut req = say_hi_request();
    req.yield_full_response = false;
    assert_eq!(collect_deltas(&client, &req).await, vec!["test", " stream"]);

    req.yield_full_response = true;
    assert_eq!(
        collect_deltas(&client, &req).await,
        vec!["test", "test stream"]
    );
}

#[tokio::test]
async fn openai_models_filtered_to_chat_family() {
    let server = MockServer::start(vec![http_response(
        200,
        r#"{"data": [{"id": "gpt-4o"}, {"id": "gpt-3.5-turbo"}, {"id": "dall-e-3"}]}"#,
    )])
    .await;

    let client = openai_client(&server.base_url);
    let models = client.list_models().await.unwrap();
    assert_eq!(models, vec!["gpt-4o", "gpt-3.5-turbo"]);
}

#[tokio::test]
async fn deepseek_models_unfiltered() {
    let server = MockServer::start(vec![http_response(
        200,
        r#"{"data": [{"id": "deepseek-chat"}, {"id": "deepseek-coder"}]}"#,
    )])
    .await;

    let client = quick_factory()
        .create(ClientOptions::DeepSeek {
            api_key: Some("test-key".into()),
            base_url: Some(server.base_url.clone()),
        })
        .unwrap();
    let models = client.list_models().await.unwrap();
    assert_eq!(models, vec!["deepseek-chat", "deepseek-coder"]);
}

#[tokio::test]
async fn openai_401_is_fatal_and_not_retried() {
    let server = MockServer::start(vec![http_response(
        401,
        r#"{"error": {"message": "Invalid API key"}}"#,
    )])
    .await;

    let client = openai_client(&server.base_url);
    let err = client.chat(&say_hi_request()).await.unwrap_err();
    assert_eq!(err.kind(), "auth-failed");
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn openai_429_recovers_with_backoff() {
    let ok = http_response(
        200,
        r#"{"choices": [{"message": {"content": "recovered"}}]}"#,
    );
    let server = MockServer::start(vec![
        http_response(429, r#"{"error": "Too Many Requests"}"#),
        http_response(429, r#"{"error": "Too Many Requests"}"#),
        ok,
    ])
    .await;

    let client = openai_client(&server.base_url);
    let start = Instant::now();
    let reply = client.chat(&say_hi_request()).await.unwrap();
    assert_eq!(reply, "recovered");
    assert_eq!(server.hits(), 3);
    // base + base*2 of backoff before the successful attempt.
    assert!(start.elapsed() >= Duration::from_millis(150));
}

#[tokio::test]
async fn openai_500_exhausts_retries() {
    let server =
        MockServer::start(vec![http_response(500, r#"{"error": "boom"}"#); 3]).await;

    let client = openai_client(&server.base_url);
    let err = client.chat(&say_hi_request()).await.unwrap_err();
    assert_eq!(err.kind(), "transient-network");
    assert_eq!(server.hits(), 3); // max_attempts
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream/non-stream agreement
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn stream_concatenation_matches_non_stream() {
    let stream_body = concat!(
        "data: {\"choices\": [{\"delta\": {\"content\": \"one \"}}]}\n\n",
        "data: {\"choices\": [{\"delta\": {\"content\": \"two\"}}]}\n\n",
        "data: [DONE]\n\n",
    );
    let full_body = r#"{"choices": [{"message": {"content": "one two"}}]}"#;

    let stream_server = MockServer::start(vec![http_response(200, stream_body)]).await;
    let full_server = MockServer::start(vec![http_response(200, full_body)]).await;

    let req = say_hi_request();
    let streamed = collect_deltas(&openai_client(&stream_server.base_url), &req)
        .await
        .concat();
    let whole = openai_client(&full_server.base_url)
        .chat(&req)
        .await
        .unwrap();
    assert_eq!(streamed.trim_end(), whole.trim_end());
}

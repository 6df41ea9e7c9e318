//! Shared SSE streaming infrastructure.
//!
//! The OpenAI-family backends stream completions as server-sent events:
//! chunks are buffered, split on `\n\n`, `data:` payloads are extracted, and
//! each payload is fed to a parser closure that returns zero or more stream
//! events. The `data: [DONE]` sentinel terminates the sequence.

use pl_domain::error::Result;
use pl_domain::stream::{DeltaStream, StreamEvent};

use crate::util::from_reqwest;

/// Extract complete `data:` payloads from an SSE buffer.
///
/// SSE events are delimited by `\n\n`. Each event block may contain
/// `event:`, `data:`, `id:`, or `retry:` lines; only `data:` lines matter
/// here. The buffer is drained in place; a trailing partial event remains
/// for the next call.
pub(crate) fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let mut data_lines = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2); // remove the \n\n delimiter

        for line in block.lines() {
            let line = line.trim();
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    data_lines.push(data.to_string());
                }
            }
        }
    }

    data_lines
}

/// Build a raw fragment stream from an SSE `reqwest::Response` and a
/// payload parser.
///
/// The stream automatically:
/// 1. Buffers incoming chunks and drains complete SSE events
/// 2. Flushes the remaining buffer when the response body closes
/// 3. Emits a fallback `Done` if the parser never produced one
pub(crate) fn sse_response_stream<F>(
    response: reqwest::Response,
    provider: &'static str,
    mut parse_data: F,
) -> DeltaStream
where
    F: FnMut(&str) -> Vec<Result<StreamEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();
        let mut done_emitted = false;
        let mut failed = false;

        'read: loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));

                    for data in drain_data_lines(&mut buffer) {
                        for event in parse_data(&data) {
                            let is_done = matches!(&event, Ok(StreamEvent::Done));
                            yield event;
                            if is_done {
                                // Anything after the terminator is dropped.
                                done_emitted = true;
                                break 'read;
                            }
                        }
                    }
                }
                Ok(None) => {
                    // Body closed -- flush any remaining partial event.
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                        for data in drain_data_lines(&mut buffer) {
                            for event in parse_data(&data) {
                                let is_done = matches!(&event, Ok(StreamEvent::Done));
                                yield event;
                                if is_done {
                                    done_emitted = true;
                                    break 'read;
                                }
                            }
                        }
                    }
                    break 'read;
                }
                Err(e) => {
                    yield Err(from_reqwest(provider, e));
                    failed = true;
                    break 'read;
                }
            }
        }

        if !done_emitted && !failed {
            yield Ok(StreamEvent::Done);
        }
    };

    Box::pin(stream)
}

/// Parse one OpenAI-style SSE payload into stream events.
///
/// `[DONE]` terminates; otherwise the fragment lives at
/// `choices[0].delta.content`. Payloads without content (role prelude,
/// usage-only chunks) produce nothing.
pub(crate) fn parse_openai_data(data: &str) -> Vec<Result<StreamEvent>> {
    if data.trim() == "[DONE]" {
        return vec![Ok(StreamEvent::Done)];
    }

    let v: serde_json::Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "skipping malformed SSE payload");
            return Vec::new();
        }
    };

    let text = v
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .and_then(|choice| choice.get("delta"))
        .and_then(|delta| delta.get("content"))
        .and_then(|content| content.as_str());

    match text {
        Some(t) if !t.is_empty() => vec![Ok(StreamEvent::Delta { text: t.to_owned() })],
        _ => Vec::new(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    // ── drain_data_lines ────────────────────────────────────────────

    #[test]
    fn drain_single_complete_event() {
        let mut buf = String::from("event: message\ndata: {\"hello\":\"world\"}\n\n");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["{\"hello\":\"world\"}"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_multiple_events() {
        let mut buf = String::from("data: first\n\ndata: second\n\n");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["first", "second"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_partial_event_stays_in_buffer() {
        let mut buf = String::from("data: complete\n\ndata: partial");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["complete"]);
        assert_eq!(buf, "data: partial");
    }

    #[test]
    fn drain_done_sentinel_preserved() {
        let mut buf = String::from("data: [DONE]\n\n");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["[DONE]"]);
    }

    #[test]
    fn drain_ignores_non_data_lines() {
        let mut buf = String::from("event: ping\nid: 42\nretry: 5000\ndata: payload\n\n");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["payload"]);
    }

    // ── parse_openai_data ───────────────────────────────────────────

    #[test]
    fn parse_content_delta() {
        let events = parse_openai_data(r#"{"choices": [{"delta": {"content": "test"}}]}"#);
        assert_eq!(
            events.into_iter().map(|e| e.unwrap()).collect::<Vec<_>>(),
            vec![StreamEvent::Delta {
                text: "test".into()
            }]
        );
    }

    #[test]
    fn parse_done_sentinel() {
        let events = parse_openai_data("[DONE]");
        assert_eq!(
            events.into_iter().map(|e| e.unwrap()).collect::<Vec<_>>(),
            vec![StreamEvent::Done]
        );
    }

    #[test]
    fn parse_role_prelude_yields_nothing() {
        let events = parse_openai_data(r#"{"choices": [{"delta": {"role": "assistant"}}]}"#);
        assert!(events.is_empty());
    }

    #[test]
    fn parse_malformed_payload_skipped() {
        assert!(parse_openai_data("{not json").is_empty());
    }

    #[test]
    fn parse_empty_content_skipped() {
        let events = parse_openai_data(r#"{"choices": [{"delta": {"content": ""}}]}"#);
        assert!(events.is_empty());
    }
}

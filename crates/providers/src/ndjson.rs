//! Newline-delimited JSON streaming for the Ollama family.
//!
//! Each line is one JSON object; the fragment lives at `message.content`
//! and the terminator object carries `done: true`.

use pl_domain::error::Result;
use pl_domain::stream::{DeltaStream, StreamEvent};

use crate::util::from_reqwest;

/// Pull complete lines out of the buffer, leaving a trailing partial line.
pub(crate) fn drain_lines(buffer: &mut String) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.find('\n') {
        let line: String = buffer.drain(..=pos).collect();
        let line = line.trim();
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }
    lines
}

/// Parse one NDJSON chunk object into stream events.
///
/// Non-empty `message.content` yields a fragment; `done: true` terminates.
/// Malformed lines are logged and skipped, matching the lenient handling of
/// mid-stream noise on this wire format.
pub(crate) fn parse_ollama_line(line: &str) -> Vec<Result<StreamEvent>> {
    let v: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "skipping malformed stream line");
            return Vec::new();
        }
    };

    let mut events = Vec::new();
    if let Some(text) = v
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
    {
        if !text.is_empty() {
            events.push(Ok(StreamEvent::Delta {
                text: text.to_owned(),
            }));
        }
    }
    if v.get("done").and_then(|d| d.as_bool()) == Some(true) {
        events.push(Ok(StreamEvent::Done));
    }
    events
}

/// Build a raw fragment stream from an NDJSON `reqwest::Response`.
pub(crate) fn ndjson_response_stream(
    response: reqwest::Response,
    provider: &'static str,
) -> DeltaStream {
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();
        let mut done_emitted = false;
        let mut failed = false;

        'read: loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    for line in drain_lines(&mut buffer) {
                        for event in parse_ollama_line(&line) {
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
                    // Body closed -- a final line may lack its newline.
                    let tail = buffer.trim().to_string();
                    if !tail.is_empty() {
                        for event in parse_ollama_line(&tail) {
                            let is_done = matches!(&event, Ok(StreamEvent::Done));
                            yield event;
                            if is_done {
                                done_emitted = true;
                                break 'read;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_complete_lines() {
        let mut buf = String::from("{\"a\":1}\n{\"b\":2}\npartial");
        let lines = drain_lines(&mut buf);
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}"]);
        assert_eq!(buf, "partial");
    }

    #[test]
    fn drain_skips_blank_lines() {
        let mut buf = String::from("\n\n{\"a\":1}\n");
        let lines = drain_lines(&mut buf);
        assert_eq!(lines, vec!["{\"a\":1}"]);
    }

    #[test]
    fn parse_content_fragment() {
        let events = parse_ollama_line(r#"{"message": {"content": "Hel"}}"#);
        assert_eq!(
            events.into_iter().map(|e| e.unwrap()).collect::<Vec<_>>(),
            vec![StreamEvent::Delta { text: "Hel".into() }]
        );
    }

    #[test]
    fn parse_terminator() {
        let events = parse_ollama_line(r#"{"message": {"content": ""}, "done": true}"#);
        assert_eq!(
            events.into_iter().map(|e| e.unwrap()).collect::<Vec<_>>(),
            vec![StreamEvent::Done]
        );
    }

    #[test]
    fn parse_terminator_with_trailing_content() {
        let events = parse_ollama_line(r#"{"message": {"content": "!"}, "done": true}"#);
        assert_eq!(
            events.into_iter().map(|e| e.unwrap()).collect::<Vec<_>>(),
            vec![
                StreamEvent::Delta { text: "!".into() },
                StreamEvent::Done
            ]
        );
    }

    #[test]
    fn parse_malformed_line_skipped() {
        assert!(parse_ollama_line("not json at all").is_empty());
    }
}

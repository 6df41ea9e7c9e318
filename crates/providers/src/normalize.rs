//! Stream-normalisation: fragment vs accumulated emission.
//!
//! Both wire formats produce incremental fragments. Callers choose, via
//! `yield_full_response` on the request, whether each element is the new
//! fragment alone or the accumulated utterance so far.

use futures_util::StreamExt;

use pl_domain::stream::{DeltaStream, StreamEvent};

/// Wrap a raw fragment stream according to the requested emission mode.
///
/// With `yield_full_response = false` the stream passes through untouched.
/// With `true`, each `Delta` carries the whole text received so far:
/// fragments `Hel`, `lo`, ` world` become `Hel`, `Hello`, `Hello world`.
pub(crate) fn apply_emission_mode(stream: DeltaStream, yield_full_response: bool) -> DeltaStream {
    if !yield_full_response {
        return stream;
    }

    let normalised = async_stream::stream! {
        let mut stream = stream;
        let mut buffer = String::new();
        while let Some(event) = stream.next().await {
            match event {
                Ok(StreamEvent::Delta { text }) => {
                    buffer.push_str(&text);
                    yield Ok(StreamEvent::Delta {
                        text: buffer.clone(),
                    });
                }
                other => yield other,
            }
        }
    };
    Box::pin(normalised)
}

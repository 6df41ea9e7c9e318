use std::pin::Pin;

use crate::error::Result;

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// The finite delta sequence produced by a streaming completion.
pub type DeltaStream = BoxStream<'static, Result<StreamEvent>>;

/// Events on a provider delta stream.
///
/// The sequence is finite: zero or more `Delta`s followed by exactly one
/// `Done`. Whether `text` is the raw fragment or the accumulated utterance
/// so far is selected by `yield_full_response` on the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A chunk of assistant text.
    Delta { text: String },
    /// Terminator; nothing follows.
    Done,
}

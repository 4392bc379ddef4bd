//! SSE (Server-Sent Events) streaming for fragment-by-fragment responses.
//!
//! Converts a channel of GenerationEvents into an SSE stream: one `data:`
//! event per fragment, an `error` event if generation fails midway, and
//! end-of-stream after the terminal event.
//!
//! When an [`ExchangeLog`] is attached, the whole exchange is logged at debug
//! level once the stream reaches its terminal event.

use std::convert::Infallible;

use axum::http::header::{HeaderValue, CONTENT_TYPE};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::stream::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::debug;

use crate::chat::bridge::GenerationEvent;

/// Streamed responses always declare UTF-8.
pub const EVENT_STREAM_UTF8: &str = "text/event-stream;charset=UTF-8";

/// SSE forbids carriage returns inside fields.
fn data_event(text: &str) -> Event {
    Event::default().data(text.replace('\r', ""))
}

/// Accumulates a streamed exchange for a single debug record at the end.
#[derive(Debug)]
pub struct ExchangeLog {
    request_id: String,
    fragments: usize,
    response: String,
}

impl ExchangeLog {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            fragments: 0,
            response: String::new(),
        }
    }

    fn record(&mut self, event: &GenerationEvent) {
        match event {
            GenerationEvent::Fragment(text) => {
                self.fragments += 1;
                self.response.push_str(text);
            }
            GenerationEvent::Done { .. } => debug!(
                request_id = self.request_id,
                fragments = self.fragments,
                response = self.response,
                "Chat stream response"
            ),
            GenerationEvent::Error(e) => debug!(
                request_id = self.request_id,
                fragments = self.fragments,
                response = self.response,
                error = %e,
                "Chat stream failed"
            ),
        }
    }
}

/// Convert a generation event receiver into an SSE event stream.
pub fn fragments_to_sse_stream(
    rx: mpsc::Receiver<GenerationEvent>,
    mut exchange: Option<ExchangeLog>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    ReceiverStream::new(rx).map_while(move |event| {
        if let Some(log) = exchange.as_mut() {
            log.record(&event);
        }
        match event {
            GenerationEvent::Fragment(text) => Some(Ok(data_event(&text))),
            GenerationEvent::Done { .. } => None,
            GenerationEvent::Error(e) => Some(Ok(Event::default()
                .event("error")
                .data(e.to_string().replace('\r', "")))),
        }
    })
}

/// Build the SSE response for a generation event receiver.
pub fn sse_response(
    rx: mpsc::Receiver<GenerationEvent>,
    exchange: Option<ExchangeLog>,
) -> Response {
    let mut response = Sse::new(fragments_to_sse_stream(rx, exchange))
        .keep_alive(KeepAlive::default())
        .into_response();
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(EVENT_STREAM_UTF8));
    response
}

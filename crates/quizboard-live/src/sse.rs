// Server-Sent Events transport built on reqwest-eventsource.
//
// Each `open` creates a fresh `EventSource` with its built-in retry disabled:
// reconnect timing belongs to `StreamConnection`, so an attempt ends at the
// first error and the event source is dropped with the stream.

use futures_util::stream;
use futures_util::StreamExt;
use quizboard_core::http::{HttpClient, Method};
use reqwest_eventsource::retry::Never;
use reqwest_eventsource::{Event, RequestBuilderExt};

use crate::stream::{Frame, FrameStream, Transport, TransportError};

/// [`Transport`] speaking `text/event-stream` to the quiz backend.
#[derive(Clone)]
pub struct SseTransport {
    client: HttpClient,
}

impl SseTransport {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

impl Transport for SseTransport {
    fn open(&self, path: &str) -> FrameStream {
        let request = self
            .client
            .request(Method::GET, path)
            .header(reqwest::header::ACCEPT, "text/event-stream");

        let mut es = match request.eventsource() {
            Ok(es) => es,
            Err(e) => {
                let err = TransportError::Connect(format!("failed to create event source: {e}"));
                return stream::iter([Err(err)]).boxed();
            }
        };
        es.set_retry_policy(Box::new(Never));

        es.map(|item| match item {
            Ok(Event::Open) => Ok(Frame::Open),
            Ok(Event::Message(msg)) => Ok(Frame::Message(msg.data)),
            Err(err) => Err(map_error(err)),
        })
        .boxed()
    }
}

/// Classify an event-source failure for logging and the status signal.
fn map_error(err: reqwest_eventsource::Error) -> TransportError {
    match err {
        reqwest_eventsource::Error::InvalidStatusCode(status, _response) => {
            TransportError::Status(status.as_u16())
        }
        reqwest_eventsource::Error::StreamEnded => TransportError::Ended,
        reqwest_eventsource::Error::Transport(e) => TransportError::Connect(e.to_string()),
        other => TransportError::Connect(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

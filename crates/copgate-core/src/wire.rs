//! SSE plumbing between the upstream reader task and the client response
//! body.

use std::io;

use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use futures_util::StreamExt;
use http::header::{CACHE_CONTROL, CONTENT_TYPE};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use copgate_protocol::claude::StreamEvent;
use copgate_protocol::sse::{encode_sse, SseEvent, SseParser};

pub type FrameSender = mpsc::Sender<Result<Bytes, io::Error>>;

/// Encode an Anthropic stream event with its `type` as the SSE event name.
pub fn encode_claude_event(event: &StreamEvent) -> Bytes {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    encode_sse(Some(event.event_name()), &data)
}

/// Re-encode an upstream event preserving its (optional) event name.
pub fn encode_raw_event(event: &SseEvent) -> Bytes {
    encode_sse(event.event.as_deref(), &event.data)
}

/// Build a streaming `text/event-stream` response fed by an mpsc channel.
pub fn sse_response(capacity: usize) -> (FrameSender, Response) {
    let (tx, rx) = mpsc::channel::<Result<Bytes, io::Error>>(capacity);
    let response = Response::builder()
        .status(200)
        .header(CONTENT_TYPE, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .expect("static response parts");
    (tx, response)
}

/// Forward an upstream body verbatim (non-SSE passthrough streaming).
pub fn raw_body_response(status: u16, content_type: &str, response: wreq::Response) -> Response {
    let stream = response
        .bytes_stream()
        .map(|chunk| chunk.map_err(|err| io::Error::other(err.to_string())));
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, content_type)
        .body(Body::from_stream(stream))
        .expect("static response parts")
}

/// Outcome of one [`pump_sse`] step.
pub struct StepOutput {
    pub frames: Vec<Bytes>,
    pub stop: bool,
}

impl StepOutput {
    pub fn frames(frames: Vec<Bytes>) -> Self {
        Self {
            frames,
            stop: false,
        }
    }

    pub fn stop(frames: Vec<Bytes>) -> Self {
        Self { frames, stop: true }
    }
}

/// Read an upstream SSE body to completion, handing each parsed event to
/// `step` and flushing the returned frames to the client channel. A
/// `data: [DONE]` sentinel ends the stream. Returns an error message on
/// upstream transport failure; a closed client channel ends the pump
/// silently (client disconnect cancels the request).
pub async fn pump_sse<F>(
    response: wreq::Response,
    tx: &FrameSender,
    mut step: F,
) -> Result<(), String>
where
    F: FnMut(&SseEvent) -> StepOutput,
{
    let mut parser = SseParser::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => return Err(err.to_string()),
        };
        for event in parser.push_bytes(&chunk) {
            if event.data.trim() == "[DONE]" {
                return Ok(());
            }
            let output = step(&event);
            for frame in output.frames {
                if tx.send(Ok(frame)).await.is_err() {
                    return Ok(());
                }
            }
            if output.stop {
                return Ok(());
            }
        }
    }

    for event in parser.finish() {
        if event.data.trim() == "[DONE]" {
            break;
        }
        let output = step(&event);
        for frame in output.frames {
            if tx.send(Ok(frame)).await.is_err() {
                return Ok(());
            }
        }
        if output.stop {
            break;
        }
    }
    Ok(())
}

/// Best-effort terminal error event for SSE streams that are already 200.
pub async fn send_stream_error(tx: &FrameSender, message: &str) {
    let event = StreamEvent::Error {
        error: copgate_protocol::claude::ErrorDetail::api_error(message),
    };
    let _ = tx.send(Ok(encode_claude_event(&event))).await;
}

//! Network collector: full request lifecycle (start/complete/failed),
//! call-stack enrichment tags for requests that look expensive or
//! suspicious, a WebSocket frame substream, and the correlator feed for
//! large-transfer-then-memory-spike detection.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cdp_protocol::{
    LoadingFailedParams, LoadingFinishedParams, RequestWillBeSentParams, ResponseReceivedParams,
    StackTrace, WebSocketClosedParams, WebSocketCreatedParams, WebSocketFrameErrorParams,
    WebSocketFrameReceivedParams, WebSocketFrameSentParams,
};
use serde_json::{Map, json};

use crate::collectors::{HostCell, emit};
use crate::correlator::Correlator;
use crate::event::{build_record, now_iso8601};
use crate::overview::OverviewBuilder;
use crate::rate_limiter::RateLimiter;
use crate::session::{Session, into_payload};
use crate::writer::WriterRegistry;

const LARGE_TRANSFER_BYTES: u64 = 100 * 1024;
const REPEATED_RESOURCE_SIZE_BYTES: u64 = 10 * 1024;
const REPEATED_RESOURCE_MIN_COUNT: u32 = 3;
const HIGH_FREQUENCY_WINDOW: Duration = Duration::from_secs(10);
const HIGH_FREQUENCY_MIN_COUNT: usize = 10;
const WEBSOCKET_FRAME_TRUNCATE_BYTES: usize = 1024;
const MAX_SYNC_FRAMES: usize = 30;
const MAX_ASYNC_FRAMES: usize = 15;

struct InFlight {
    url: String,
    method: String,
    started_at: Instant,
    post_data_bytes: u64,
    stack: Option<StackTrace>,
}

#[derive(Default)]
struct EnrichmentState {
    endpoint_hits: HashMap<String, VecDeque<Instant>>,
    resource_counts: HashMap<String, (u32, u64)>,
}

pub fn spawn(
    session: Session,
    host: HostCell,
    writers: Arc<WriterRegistry>,
    overview: Arc<OverviewBuilder>,
    correlator: Arc<Correlator>,
    rate_per_sec: u32,
) {
    tokio::spawn(run(session, host, writers, overview, correlator, rate_per_sec));
}

async fn run(
    session: Session,
    host: HostCell,
    writers: Arc<WriterRegistry>,
    overview: Arc<OverviewBuilder>,
    correlator: Arc<Correlator>,
    rate_per_sec: u32,
) {
    let limiter = RateLimiter::new(rate_per_sec);
    let in_flight: Mutex<HashMap<String, InFlight>> = Mutex::new(HashMap::new());
    let enrichment = Mutex::new(EnrichmentState::default());

    let mut will_be_sent = session.subscribe("Network.requestWillBeSent");
    let mut response_received = session.subscribe("Network.responseReceived");
    let mut loading_finished = session.subscribe("Network.loadingFinished");
    let mut loading_failed = session.subscribe("Network.loadingFailed");
    let mut ws_created = session.subscribe("Network.webSocketCreated");
    let mut ws_sent = session.subscribe("Network.webSocketFrameSent");
    let mut ws_received = session.subscribe("Network.webSocketFrameReceived");
    let mut ws_error = session.subscribe("Network.webSocketFrameError");
    let mut ws_closed = session.subscribe("Network.webSocketClosed");

    let mut response_status: HashMap<String, i64> = HashMap::new();

    loop {
        tokio::select! {
            ev = will_be_sent.recv() => {
                let Some(ev) = ev else { return };
                let Ok(p) = serde_json::from_value::<RequestWillBeSentParams>(into_payload(ev)) else { continue };
                if !limiter.try_acquire() { continue; }

                let post_data_bytes: u64 = p.request.post_data_entries.iter()
                    .filter_map(|e| e.bytes.as_ref())
                    .map(|b| b.len() as u64)
                    .sum();
                in_flight.lock().expect("in-flight map poisoned").insert(p.request_id.clone(), InFlight {
                    url: p.request.url.clone(),
                    method: p.request.method.clone(),
                    started_at: Instant::now(),
                    post_data_bytes,
                    stack: p.initiator.stack.clone(),
                });

                let current_host = host.get();
                let timestamp = now_iso8601();
                let mut extra = Map::new();
                extra.insert("target_id".to_owned(), json!(session.target_id()));
                extra.insert("requestId".to_owned(), json!(p.request_id));
                extra.insert("url".to_owned(), json!(p.request.url));
                extra.insert("method".to_owned(), json!(p.request.method));
                extra.insert("postDataBytes".to_owned(), json!(post_data_bytes));
                if post_data_bytes > LARGE_TRANSFER_BYTES {
                    extra.insert("enrichment".to_owned(), json!(["large_upload"]));
                    if let Some(detailed) = build_detailed_stack(p.initiator.stack.as_ref(), "large_upload") {
                        extra.insert("detailedStack".to_owned(), detailed);
                    }
                }
                let record = build_record("network_request_start", &current_host, &timestamp,
                    &["network_request_start", &current_host, &timestamp, &p.request_id], extra);
                emit(&writers, &overview, &current_host, "network", record);
            }
            ev = response_received.recv() => {
                let Some(ev) = ev else { return };
                if let Ok(p) = serde_json::from_value::<ResponseReceivedParams>(into_payload(ev)) {
                    response_status.insert(p.request_id, p.response.status);
                }
            }
            ev = loading_finished.recv() => {
                let Some(ev) = ev else { return };
                let Ok(p) = serde_json::from_value::<LoadingFinishedParams>(into_payload(ev)) else { continue };
                if !limiter.try_acquire() { continue; }

                let started = in_flight.lock().expect("in-flight map poisoned").remove(&p.request_id);
                let status = response_status.remove(&p.request_id);
                let size = p.encoded_data_length as u64;
                let current_host = host.get();

                correlator.observe_network_complete(&current_host, &p.request_id, size, Instant::now());

                let mut tags: Vec<String> = Vec::new();
                if size > LARGE_TRANSFER_BYTES {
                    tags.push("large_download".to_owned());
                }
                if let Some(started) = &started {
                    if let Some(count) = is_high_frequency(&enrichment, &started.url) {
                        tags.push(format!("high_frequency_api_{count}"));
                    }
                    if let Some(count) = is_repeated_resource(&enrichment, &started.url, size) {
                        tags.push(format!("repeated_resource_{count}"));
                    }
                }

                let timestamp = now_iso8601();
                let mut extra = Map::new();
                extra.insert("target_id".to_owned(), json!(session.target_id()));
                extra.insert("requestId".to_owned(), json!(p.request_id));
                extra.insert("encodedDataLengthBytes".to_owned(), json!(size));
                extra.insert("status".to_owned(), json!(status));
                if let Some(started) = &started {
                    extra.insert("url".to_owned(), json!(started.url));
                    extra.insert("method".to_owned(), json!(started.method));
                    extra.insert("durationMs".to_owned(), json!(started.started_at.elapsed().as_secs_f64() * 1000.0));
                }
                if !tags.is_empty() {
                    extra.insert("enrichment".to_owned(), json!(tags));
                    if let Some(started) = &started {
                        if let Some(detailed) = build_detailed_stack(started.stack.as_ref(), &tags[0]) {
                            extra.insert("detailedStack".to_owned(), detailed);
                        }
                    }
                }
                let record = build_record("network_request_complete", &current_host, &timestamp,
                    &["network_request_complete", &current_host, &timestamp, &p.request_id], extra);
                emit(&writers, &overview, &current_host, "network", record);
            }
            ev = loading_failed.recv() => {
                let Some(ev) = ev else { return };
                let Ok(p) = serde_json::from_value::<LoadingFailedParams>(into_payload(ev)) else { continue };
                if !limiter.try_acquire() { continue; }

                let started = in_flight.lock().expect("in-flight map poisoned").remove(&p.request_id);
                response_status.remove(&p.request_id);
                let current_host = host.get();
                let timestamp = now_iso8601();
                let mut extra = Map::new();
                extra.insert("target_id".to_owned(), json!(session.target_id()));
                extra.insert("requestId".to_owned(), json!(p.request_id));
                extra.insert("errorText".to_owned(), json!(p.error_text));
                if let Some(started) = &started {
                    extra.insert("url".to_owned(), json!(started.url));
                    extra.insert("method".to_owned(), json!(started.method));
                }
                let record = build_record("network_request_failed", &current_host, &timestamp,
                    &["network_request_failed", &current_host, &timestamp, &p.request_id], extra);
                emit(&writers, &overview, &current_host, "network", record);
            }
            ev = ws_created.recv() => {
                let Some(ev) = ev else { return };
                if let Ok(p) = serde_json::from_value::<WebSocketCreatedParams>(into_payload(ev)) {
                    emit_ws(&writers, &overview, &host, &session, "network_websocket_connect", &p.request_id, None);
                }
            }
            ev = ws_sent.recv() => {
                let Some(ev) = ev else { return };
                if let Ok(p) = serde_json::from_value::<WebSocketFrameSentParams>(into_payload(ev)) {
                    emit_ws(&writers, &overview, &host, &session, "network_websocket_frame_sent", &p.request_id, Some(&p.response.payload_data));
                }
            }
            ev = ws_received.recv() => {
                let Some(ev) = ev else { return };
                if let Ok(p) = serde_json::from_value::<WebSocketFrameReceivedParams>(into_payload(ev)) {
                    emit_ws(&writers, &overview, &host, &session, "network_websocket_frame_received", &p.request_id, Some(&p.response.payload_data));
                }
            }
            ev = ws_error.recv() => {
                let Some(ev) = ev else { return };
                if let Ok(p) = serde_json::from_value::<WebSocketFrameErrorParams>(into_payload(ev)) {
                    emit_ws(&writers, &overview, &host, &session, "network_websocket_frame_error", &p.request_id, Some(&p.error_message));
                }
            }
            ev = ws_closed.recv() => {
                let Some(ev) = ev else { return };
                if let Ok(p) = serde_json::from_value::<WebSocketClosedParams>(into_payload(ev)) {
                    emit_ws(&writers, &overview, &host, &session, "network_websocket_close", &p.request_id, None);
                }
            }
        }
    }
}

/// Returns the number of hits within the rolling window once that count
/// crosses the threshold, so the caller can report it in the enrichment tag.
fn is_high_frequency(state: &Mutex<EnrichmentState>, url: &str) -> Option<usize> {
    let mut state = state.lock().expect("enrichment state poisoned");
    let now = Instant::now();
    let hits = state.endpoint_hits.entry(url.to_owned()).or_default();
    hits.push_back(now);
    while let Some(front) = hits.front() {
        if now.duration_since(*front) > HIGH_FREQUENCY_WINDOW {
            hits.pop_front();
        } else {
            break;
        }
    }
    (hits.len() > HIGH_FREQUENCY_MIN_COUNT).then_some(hits.len())
}

fn is_repeated_resource(state: &Mutex<EnrichmentState>, url: &str, size: u64) -> Option<usize> {
    let mut state = state.lock().expect("enrichment state poisoned");
    let entry = state.resource_counts.entry(url.to_owned()).or_insert((0, 0));
    entry.0 += 1;
    entry.1 = entry.1.max(size);
    (entry.0 > REPEATED_RESOURCE_MIN_COUNT && entry.1 > REPEATED_RESOURCE_SIZE_BYTES).then_some(entry.0 as usize)
}

/// Builds the `detailedStack` object for an enrichment tag: up to
/// [`MAX_SYNC_FRAMES`] synchronous frames from the initiator's own call
/// stack, followed by up to [`MAX_ASYNC_FRAMES`] frames walked across its
/// `parent` chain of asynchronous call-stack boundaries. Returns `None` when
/// the triggering event carried no stack at all (CDP only attaches one when
/// the initiator is script, not e.g. a parser-driven resource load).
fn build_detailed_stack(stack: Option<&StackTrace>, reason: &str) -> Option<serde_json::Value> {
    let stack = stack?;
    let sync_frames: Vec<_> = stack.call_frames.iter().take(MAX_SYNC_FRAMES).map(frame_json).collect();

    let mut async_frames = Vec::new();
    let mut parent = stack.parent.as_deref();
    while let Some(p) = parent {
        for frame in &p.call_frames {
            if async_frames.len() >= MAX_ASYNC_FRAMES {
                break;
            }
            async_frames.push(frame_json(frame));
        }
        if async_frames.len() >= MAX_ASYNC_FRAMES {
            break;
        }
        parent = p.parent.as_deref();
    }

    Some(json!({
        "reason": reason,
        "syncFrames": sync_frames,
        "asyncFrames": async_frames,
    }))
}

fn frame_json(frame: &cdp_protocol::CallFrame) -> serde_json::Value {
    json!({
        "functionName": frame.function_name,
        "url": frame.url,
        "lineNumber": frame.line_number,
        "columnNumber": frame.column_number,
    })
}

fn emit_ws(
    writers: &WriterRegistry,
    overview: &OverviewBuilder,
    host: &HostCell,
    session: &Session,
    event_type: &str,
    request_id: &str,
    payload: Option<&str>,
) {
    let current_host = host.get();
    let timestamp = now_iso8601();
    let truncated = payload.map(truncate_payload);
    let mut extra = Map::new();
    extra.insert("target_id".to_owned(), json!(session.target_id()));
    extra.insert("requestId".to_owned(), json!(request_id));
    if let Some(p) = truncated {
        extra.insert("payload".to_owned(), json!(p));
    }
    let record = build_record(event_type, &current_host, &timestamp,
        &[event_type, &current_host, &timestamp, request_id], extra);
    emit(writers, overview, &current_host, "network", record);
}

fn truncate_payload(payload: &str) -> String {
    if payload.len() <= WEBSOCKET_FRAME_TRUNCATE_BYTES {
        payload.to_owned()
    } else {
        let mut truncated: String = payload.chars().take(WEBSOCKET_FRAME_TRUNCATE_BYTES).collect();
        truncated.push_str("...[truncated]");
        truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_frequency_trips_after_the_threshold_and_reports_the_count() {
        let state = Mutex::new(EnrichmentState::default());
        for _ in 0..10 {
            assert!(is_high_frequency(&state, "https://api.example.com/x").is_none());
        }
        assert_eq!(is_high_frequency(&state, "https://api.example.com/x"), Some(11));
    }

    #[test]
    fn repeated_resource_requires_both_count_and_size() {
        let state = Mutex::new(EnrichmentState::default());
        for _ in 0..3 {
            assert!(is_repeated_resource(&state, "https://cdn.example.com/a.js", 20 * 1024).is_none());
        }
        assert_eq!(is_repeated_resource(&state, "https://cdn.example.com/a.js", 20 * 1024), Some(4));
    }

    #[test]
    fn repeated_resource_does_not_trip_for_small_responses() {
        let state = Mutex::new(EnrichmentState::default());
        for _ in 0..10 {
            assert!(is_repeated_resource(&state, "https://cdn.example.com/tiny.js", 100).is_none());
        }
    }

    #[test]
    fn truncate_payload_adds_a_marker_past_the_limit() {
        let long = "y".repeat(2000);
        let truncated = truncate_payload(&long);
        assert!(truncated.ends_with("...[truncated]"));
    }

    fn frame(name: &str) -> cdp_protocol::CallFrame {
        cdp_protocol::CallFrame {
            function_name: name.to_owned(),
            url: "app.js".to_owned(),
            line_number: 1,
            column_number: 1,
        }
    }

    #[test]
    fn detailed_stack_is_none_without_an_initiator_stack() {
        assert!(build_detailed_stack(None, "large_download").is_none());
    }

    #[test]
    fn detailed_stack_bounds_sync_and_async_frames_and_carries_the_reason() {
        let stack = StackTrace {
            call_frames: (0..40).map(|i| frame(&format!("sync{i}"))).collect(),
            parent: Some(Box::new(StackTrace {
                call_frames: (0..20).map(|i| frame(&format!("async{i}"))).collect(),
                parent: None,
            })),
        };
        let detailed = build_detailed_stack(Some(&stack), "large_download").unwrap();
        assert_eq!(detailed["reason"], "large_download");
        assert_eq!(detailed["syncFrames"].as_array().unwrap().len(), MAX_SYNC_FRAMES);
        assert_eq!(detailed["asyncFrames"].as_array().unwrap().len(), MAX_ASYNC_FRAMES);
    }
}

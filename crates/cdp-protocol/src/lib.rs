// cdp-protocol: wire types for the Chromium DevTools debugging protocol.
//
// The protocol is JSON-RPC-shaped but not quite JSON-RPC: outgoing calls
// carry `id`/`method`/`params` (plus an optional `sessionId` once a target is
// attached); incoming messages are either a reply (`id` + `result` xor
// `error`) or an unsolicited event (`method` + `params`, no `id`). Both kinds
// may carry `sessionId`, used to route multiplexed per-target traffic.
//
// Only the request/reply envelope and the event payloads the engine
// actually consumes are typed here; everything else travels as
// `serde_json::Value` and is parsed on demand by the caller.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// An outgoing method call.
#[derive(Debug, Clone, Serialize)]
pub struct CallRequest {
    pub id: u64,
    pub method: String,
    pub params: serde_json::Value,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Anything the peer can send us: a reply to one of our calls, or an event.
///
/// Replies always carry `id`; events never do. `#[serde(untagged)]` tries
/// each variant in declaration order, which is sufficient to disambiguate.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IncomingMessage {
    Reply(ReplyMessage),
    Event(EventMessage),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplyMessage {
    pub id: u64,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<ReplyError>,
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplyError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventMessage {
    pub method: String,
    #[serde(default = "serde_json::Value::default")]
    pub params: serde_json::Value,
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Target domain
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetInfo {
    #[serde(rename = "targetId")]
    pub target_id: String,
    #[serde(rename = "type")]
    pub target_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    pub attached: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetTargetsResult {
    #[serde(rename = "targetInfos")]
    pub target_infos: Vec<TargetInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetCreatedEvent {
    #[serde(rename = "targetInfo")]
    pub target_info: TargetInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetInfoChangedEvent {
    #[serde(rename = "targetInfo")]
    pub target_info: TargetInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetDestroyedEvent {
    #[serde(rename = "targetId")]
    pub target_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttachToTargetResult {
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

// ---------------------------------------------------------------------------
// Performance / Memory domains
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct PerformanceMetric {
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetMetricsResult {
    pub metrics: Vec<PerformanceMetric>,
}

/// Result of `Memory.getDOMCounters`.
#[derive(Debug, Clone, Deserialize)]
pub struct DomCountersResult {
    pub documents: i64,
    pub nodes: i64,
    #[serde(rename = "jsEventListeners")]
    pub js_event_listeners: i64,
}

// ---------------------------------------------------------------------------
// Network domain
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RequestWillBeSentParams {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub request: NetworkRequest,
    #[serde(rename = "wallTime")]
    pub wall_time: f64,
    #[serde(default)]
    pub initiator: Initiator,
}

/// The `initiator` object on `Network.requestWillBeSent`; only the call
/// stack is consumed, so the rest of the shape (`type`, etc.) is dropped.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Initiator {
    #[serde(default)]
    pub stack: Option<StackTrace>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkRequest {
    pub url: String,
    pub method: String,
    #[serde(rename = "postDataEntries", default)]
    pub post_data_entries: Vec<PostDataEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostDataEntry {
    #[serde(default)]
    pub bytes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseReceivedParams {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub response: NetworkResponse,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkResponse {
    pub status: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoadingFinishedParams {
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(rename = "encodedDataLength")]
    pub encoded_data_length: f64,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoadingFailedParams {
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(rename = "errorText")]
    pub error_text: String,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketCreatedParams {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketFrame {
    #[serde(rename = "payloadData", default)]
    pub payload_data: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketFrameSentParams {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub timestamp: f64,
    pub response: WebSocketFrame,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketFrameReceivedParams {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub timestamp: f64,
    pub response: WebSocketFrame,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketFrameErrorParams {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub timestamp: f64,
    #[serde(rename = "errorMessage")]
    pub error_message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketClosedParams {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub timestamp: f64,
}

// ---------------------------------------------------------------------------
// Console / Log / Runtime domains
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ConsoleApiCalledParams {
    #[serde(rename = "type")]
    pub level: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
    pub timestamp: f64,
    #[serde(rename = "stackTrace", default)]
    pub stack_trace: Option<StackTrace>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExceptionThrownParams {
    pub timestamp: f64,
    #[serde(rename = "exceptionDetails")]
    pub exception_details: ExceptionDetails,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExceptionDetails {
    pub text: String,
    #[serde(default)]
    pub url: String,
    #[serde(rename = "lineNumber", default)]
    pub line_number: i64,
    #[serde(rename = "columnNumber", default)]
    pub column_number: i64,
    #[serde(rename = "stackTrace", default)]
    pub stack_trace: Option<StackTrace>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogEntryAddedParams {
    pub entry: LogEntry,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogEntry {
    pub level: String,
    pub text: String,
    #[serde(default)]
    pub url: String,
    #[serde(rename = "lineNumber", default)]
    pub line_number: i64,
}

/// A synchronous + (optionally chained) asynchronous call stack.
#[derive(Debug, Clone, Deserialize)]
pub struct StackTrace {
    #[serde(rename = "callFrames", default)]
    pub call_frames: Vec<CallFrame>,
    #[serde(default)]
    pub parent: Option<Box<StackTrace>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallFrame {
    #[serde(rename = "functionName", default)]
    pub function_name: String,
    pub url: String,
    #[serde(rename = "lineNumber")]
    pub line_number: i64,
    #[serde(rename = "columnNumber")]
    pub column_number: i64,
}

// ---------------------------------------------------------------------------
// DOM storage / Storage domains
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct DomStorageId {
    #[serde(rename = "securityOrigin", default)]
    pub security_origin: String,
    #[serde(rename = "isLocalStorage")]
    pub is_local_storage: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DomStorageItemAddedParams {
    #[serde(rename = "storageId")]
    pub storage_id: DomStorageId,
    pub key: String,
    #[serde(rename = "newValue")]
    pub new_value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DomStorageItemRemovedParams {
    #[serde(rename = "storageId")]
    pub storage_id: DomStorageId,
    pub key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DomStorageItemUpdatedParams {
    #[serde(rename = "storageId")]
    pub storage_id: DomStorageId,
    pub key: String,
    #[serde(rename = "newValue")]
    pub new_value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DomStorageItemsClearedParams {
    #[serde(rename = "storageId")]
    pub storage_id: DomStorageId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetUsageAndQuotaResult {
    pub usage: f64,
    pub quota: f64,
}

// ---------------------------------------------------------------------------
// HeapProfiler domain
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SamplingHeapProfile {
    pub head: SamplingHeapProfileNode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SamplingHeapProfileNode {
    #[serde(rename = "callFrame")]
    pub call_frame: CallFrame,
    #[serde(rename = "selfSize")]
    pub self_size: f64,
    #[serde(default)]
    pub children: Vec<SamplingHeapProfileNode>,
}

// ---------------------------------------------------------------------------
// DOM / DOMDebugger / Debugger domains (listener-leak source attribution)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct DomNode {
    #[serde(rename = "nodeId")]
    pub node_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetDocumentResult {
    pub root: DomNode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuerySelectorAllResult {
    #[serde(rename = "nodeIds")]
    pub node_ids: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteObject {
    #[serde(rename = "objectId", default)]
    pub object_id: Option<String>,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolveNodeResult {
    pub object: RemoteObject,
}

/// Result of `Runtime.evaluate` with `returnByValue: true`.
#[derive(Debug, Clone, Deserialize)]
pub struct EvaluateResult {
    pub result: RemoteObject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventListenerInfo {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(rename = "scriptId", default)]
    pub script_id: String,
    #[serde(rename = "lineNumber", default)]
    pub line_number: i64,
    #[serde(rename = "columnNumber", default)]
    pub column_number: i64,
    #[serde(default)]
    pub handler: Option<RemoteObject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetEventListenersResult {
    pub listeners: Vec<EventListenerInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptParsedEvent {
    #[serde(rename = "scriptId")]
    pub script_id: String,
    pub url: String,
    #[serde(rename = "sourceMapURL", default)]
    pub source_map_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FunctionDetails {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallFunctionOnResult {
    pub result: RemoteObject,
}

// ---------------------------------------------------------------------------
// Performance domain (long tasks arrive as Runtime console-style events in
// some engine builds; modeled here as a typed observer payload evaluated
// from the page, see collectors::longtask).
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct LongTaskEntry {
    pub duration: f64,
    #[serde(default)]
    pub attribution: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_with_result_round_trips() {
        let raw = r#"{"id":1,"result":{"ok":true}}"#;
        let msg: IncomingMessage = serde_json::from_str(raw).unwrap();
        match msg {
            IncomingMessage::Reply(r) => {
                assert_eq!(r.id, 1);
                assert!(r.result.is_some());
                assert!(r.error.is_none());
            }
            IncomingMessage::Event(_) => panic!("expected reply"),
        }
    }

    #[test]
    fn event_without_id_parses_as_event() {
        let raw = r#"{"method":"Target.targetCreated","params":{},"sessionId":"S1"}"#;
        let msg: IncomingMessage = serde_json::from_str(raw).unwrap();
        match msg {
            IncomingMessage::Event(e) => {
                assert_eq!(e.method, "Target.targetCreated");
                assert_eq!(e.session_id.as_deref(), Some("S1"));
            }
            IncomingMessage::Reply(_) => panic!("expected event"),
        }
    }

    #[test]
    fn reply_with_error_parses() {
        let raw = r#"{"id":2,"error":{"code":-32000,"message":"boom"}}"#;
        let msg: IncomingMessage = serde_json::from_str(raw).unwrap();
        match msg {
            IncomingMessage::Reply(r) => {
                assert_eq!(r.id, 2);
                assert_eq!(r.error.unwrap().message, "boom");
            }
            IncomingMessage::Event(_) => panic!("expected reply"),
        }
    }

    #[test]
    fn call_request_serializes_without_session_id_when_absent() {
        let req = CallRequest {
            id: 7,
            method: "Target.getTargets".to_owned(),
            params: serde_json::json!({}),
            session_id: None,
        };
        let v = serde_json::to_value(&req).unwrap();
        assert!(v.get("sessionId").is_none());
    }
}

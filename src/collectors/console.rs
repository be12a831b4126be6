//! Console collector: `Runtime.consoleAPICalled`, `Runtime.exceptionThrown`,
//! and `Log.entryAdded`, each rate-limited and feeding the memory-spike
//! correlator's console-error ring.

use std::sync::Arc;
use std::time::Instant;

use cdp_protocol::{
    ConsoleApiCalledParams, ExceptionThrownParams, LogEntryAddedParams, ScriptParsedEvent, StackTrace,
};
use serde_json::{Map, json};

use crate::collectors::{HostCell, emit};
use crate::correlator::Correlator;
use crate::event::{build_record, now_iso8601};
use crate::overview::OverviewBuilder;
use crate::rate_limiter::RateLimiter;
use crate::session::{Session, into_payload};
use crate::source_map::SourceMapResolver;
use crate::writer::WriterRegistry;

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
    let resolver = SourceMapResolver::new();
    let mut console = session.subscribe("Runtime.consoleAPICalled");
    let mut exceptions = session.subscribe("Runtime.exceptionThrown");
    let mut log_entries = session.subscribe("Log.entryAdded");
    let mut scripts_parsed = session.subscribe("Debugger.scriptParsed");

    loop {
        tokio::select! {
            ev = console.recv() => {
                let Some(ev) = ev else { return };
                if !limiter.try_acquire() { continue; }
                if let Ok(p) = serde_json::from_value::<ConsoleApiCalledParams>(into_payload(ev)) {
                    handle_console(&writers, &overview, &correlator, &host, &session, &resolver, p);
                }
            }
            ev = exceptions.recv() => {
                let Some(ev) = ev else { return };
                if !limiter.try_acquire() { continue; }
                if let Ok(p) = serde_json::from_value::<ExceptionThrownParams>(into_payload(ev)) {
                    handle_exception(&writers, &overview, &correlator, &host, &session, &resolver, p);
                }
            }
            ev = log_entries.recv() => {
                let Some(ev) = ev else { return };
                if !limiter.try_acquire() { continue; }
                if let Ok(p) = serde_json::from_value::<LogEntryAddedParams>(into_payload(ev)) {
                    handle_log_entry(&writers, &overview, &host, &session, p);
                }
            }
            ev = scripts_parsed.recv() => {
                let Some(ev) = ev else { return };
                if let Ok(p) = serde_json::from_value::<ScriptParsedEvent>(into_payload(ev)) {
                    resolver.register_script(&p.url, p.source_map_url.as_deref());
                }
            }
        }
    }
}

fn handle_console(
    writers: &WriterRegistry,
    overview: &OverviewBuilder,
    correlator: &Correlator,
    host: &HostCell,
    session: &Session,
    resolver: &SourceMapResolver,
    params: ConsoleApiCalledParams,
) {
    let current_host = host.get();
    let timestamp = now_iso8601();
    let message = render_args(&params.args);

    if params.level == "error" {
        correlator.observe_console_error(&current_host, &message, Instant::now());
    }

    let mut extra = Map::new();
    extra.insert("target_id".to_owned(), json!(session.target_id()));
    extra.insert("level".to_owned(), json!(params.level));
    extra.insert("message".to_owned(), json!(message));
    extra.insert("stackTrace".to_owned(), stack_trace_json(params.stack_trace.as_ref(), resolver));
    let record = build_record(
        "console",
        &current_host,
        &timestamp,
        &["console", &current_host, &timestamp, session.target_id(), &message],
        extra,
    );
    emit(writers, overview, &current_host, "console", record);
}

fn handle_exception(
    writers: &WriterRegistry,
    overview: &OverviewBuilder,
    correlator: &Correlator,
    host: &HostCell,
    session: &Session,
    resolver: &SourceMapResolver,
    params: ExceptionThrownParams,
) {
    let current_host = host.get();
    let timestamp = now_iso8601();
    let details = params.exception_details;

    correlator.observe_console_error(&current_host, &details.text, Instant::now());

    let mut extra = Map::new();
    extra.insert("target_id".to_owned(), json!(session.target_id()));
    extra.insert("message".to_owned(), json!(details.text));
    extra.insert("url".to_owned(), json!(details.url));
    extra.insert("lineNumber".to_owned(), json!(details.line_number));
    extra.insert("columnNumber".to_owned(), json!(details.column_number));
    extra.insert("stackTrace".to_owned(), stack_trace_json(details.stack_trace.as_ref(), resolver));
    let record = build_record(
        "exception",
        &current_host,
        &timestamp,
        &["exception", &current_host, &timestamp, session.target_id(), &details.text],
        extra,
    );
    emit(writers, overview, &current_host, "console", record);
}

fn handle_log_entry(
    writers: &WriterRegistry,
    overview: &OverviewBuilder,
    host: &HostCell,
    session: &Session,
    params: LogEntryAddedParams,
) {
    let current_host = host.get();
    let timestamp = now_iso8601();
    let mut extra = Map::new();
    extra.insert("target_id".to_owned(), json!(session.target_id()));
    extra.insert("level".to_owned(), json!(params.entry.level));
    extra.insert("message".to_owned(), json!(params.entry.text));
    extra.insert("url".to_owned(), json!(params.entry.url));
    let record = build_record(
        "browser_log",
        &current_host,
        &timestamp,
        &["browser_log", &current_host, &timestamp, session.target_id(), &params.entry.text],
        extra,
    );
    emit(writers, overview, &current_host, "console", record);
}

fn render_args(args: &[serde_json::Value]) -> String {
    args.iter()
        .map(|a| {
            a.get("value")
                .and_then(|v| v.as_str())
                .map(str::to_owned)
                .unwrap_or_else(|| a.to_string())
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn stack_trace_json(stack: Option<&StackTrace>, resolver: &SourceMapResolver) -> serde_json::Value {
    match stack {
        None => serde_json::Value::Null,
        Some(s) => json!(s.call_frames.iter().map(|f| frame_json(f, resolver)).collect::<Vec<_>>()),
    }
}

/// One stack frame, plus an `original` sub-object when a source map resolves
/// its generated location. The frame is left unchanged when no map applies.
fn frame_json(frame: &cdp_protocol::CallFrame, resolver: &SourceMapResolver) -> serde_json::Value {
    let mut value = json!({
        "functionName": frame.function_name,
        "url": frame.url,
        "lineNumber": frame.line_number,
        "columnNumber": frame.column_number,
    });
    if let Some(original) = resolver.resolve(
        &frame.url,
        frame.line_number.max(0) as u32,
        frame.column_number.max(0) as u32,
    ) {
        value["original"] = json!({
            "file": original.file,
            "lineNumber": original.line,
            "columnNumber": original.column,
            "name": original.name,
        });
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_args_prefers_primitive_string_value() {
        let args = vec![json!({"type": "string", "value": "boom"})];
        assert_eq!(render_args(&args), "boom");
    }

    #[test]
    fn render_args_joins_multiple_arguments() {
        let args = vec![json!({"value": "a"}), json!({"value": "b"})];
        assert_eq!(render_args(&args), "a b");
    }

    #[test]
    fn stack_trace_json_is_null_when_absent() {
        let resolver = SourceMapResolver::new();
        assert_eq!(stack_trace_json(None, &resolver), serde_json::Value::Null);
    }

    #[test]
    fn frame_json_carries_no_original_without_a_registered_map() {
        let resolver = SourceMapResolver::new();
        let frame = cdp_protocol::CallFrame {
            function_name: "f".to_owned(),
            url: "https://x.test/app.js".to_owned(),
            line_number: 3,
            column_number: 5,
        };
        let value = frame_json(&frame, &resolver);
        assert!(value.get("original").is_none());
    }

    #[test]
    fn frame_json_attaches_original_once_the_script_registers_a_map() {
        use base64::Engine;
        let resolver = SourceMapResolver::new();
        let map = r#"{"version":3,"sources":["original.js"],"names":[],"mappings":"AAAA","file":"out.js"}"#;
        let encoded = base64::engine::general_purpose::STANDARD.encode(map);
        resolver.register_script("https://x.test/app.js", Some(&format!("data:application/json;base64,{encoded}")));
        let frame = cdp_protocol::CallFrame {
            function_name: "f".to_owned(),
            url: "https://x.test/app.js".to_owned(),
            line_number: 0,
            column_number: 0,
        };
        let value = frame_json(&frame, &resolver);
        assert_eq!(value["original"]["file"], "original.js");
    }
}

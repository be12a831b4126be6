//! Deep listener-leak analysis: triggered by the memory collector when the
//! JS event listener count grows suspiciously between two samples. Walks a
//! bounded set of DOM elements and aggregates bound listeners by their
//! script location, so a handler attached in a loop shows up as one entry
//! with a high `bound_elements` count rather than hundreds of anonymous
//! listeners.

use std::collections::HashMap;
use std::time::Duration;

use cdp_protocol::{GetDocumentResult, GetEventListenersResult, QuerySelectorAllResult, ResolveNodeResult};
use serde::Serialize;
use tracing::debug;

use crate::session::Session;

/// Matches the Open Question resolution in SPEC_FULL.md: BFS from the
/// document, capped at 500 descendant elements, rather than the full tree.
const MAX_ELEMENTS: usize = 500;

#[derive(Debug, Clone, Serialize)]
pub struct ListenerSource {
    #[serde(rename = "scriptId")]
    pub script_id: String,
    #[serde(rename = "lineNumber")]
    pub line_number: i64,
    #[serde(rename = "columnNumber")]
    pub column_number: i64,
    #[serde(rename = "boundElements")]
    pub bound_elements: u32,
    pub suspicion: &'static str,
}

/// Run the walk with a hard time budget; a timeout yields an empty result
/// rather than blocking the memory collector's own sampling cadence.
pub async fn run_deep_analysis(session: &Session, budget: Duration) -> Vec<ListenerSource> {
    match tokio::time::timeout(budget, walk(session)).await {
        Ok(sources) => sources,
        Err(_) => {
            debug!(target_id = session.target_id(), "listener-leak deep analysis timed out");
            Vec::new()
        }
    }
}

async fn walk(session: &Session) -> Vec<ListenerSource> {
    let mut counts: HashMap<(String, i64, i64), u32> = HashMap::new();

    let Ok(doc) = session
        .call("DOM.getDocument", serde_json::json!({"depth": 1, "pierce": false}))
        .await
    else {
        return Vec::new();
    };
    let Ok(doc) = serde_json::from_value::<GetDocumentResult>(doc) else {
        return Vec::new();
    };

    let Ok(all) = session
        .call(
            "DOM.querySelectorAll",
            serde_json::json!({"nodeId": doc.root.node_id, "selector": "*"}),
        )
        .await
    else {
        return Vec::new();
    };
    let Ok(all) = serde_json::from_value::<QuerySelectorAllResult>(all) else {
        return Vec::new();
    };

    for node_id in all.node_ids.into_iter().take(MAX_ELEMENTS) {
        let Ok(resolved) = session.call("DOM.resolveNode", serde_json::json!({"nodeId": node_id})).await else {
            continue;
        };
        let Ok(resolved) = serde_json::from_value::<ResolveNodeResult>(resolved) else {
            continue;
        };
        let Some(object_id) = resolved.object.object_id else {
            continue;
        };

        let Ok(listeners) = session
            .call("DOMDebugger.getEventListeners", serde_json::json!({"objectId": object_id}))
            .await
        else {
            continue;
        };
        let Ok(listeners) = serde_json::from_value::<GetEventListenersResult>(listeners) else {
            continue;
        };

        for listener in listeners.listeners {
            let key = (listener.script_id, listener.line_number, listener.column_number);
            *counts.entry(key).or_insert(0) += 1;
        }
    }

    let mut sources: Vec<ListenerSource> = counts
        .into_iter()
        .filter(|(_, count)| *count >= 3)
        .map(|((script_id, line_number, column_number), count)| ListenerSource {
            script_id,
            line_number,
            column_number,
            bound_elements: count,
            suspicion: suspicion_for(count),
        })
        .collect();
    sources.sort_by(|a, b| b.bound_elements.cmp(&a.bound_elements));
    sources
}

fn suspicion_for(bound_elements: u32) -> &'static str {
    if bound_elements >= 10 {
        "high"
    } else {
        "medium"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suspicion_thresholds_match_the_spec_clarification() {
        assert_eq!(suspicion_for(3), "medium");
        assert_eq!(suspicion_for(9), "medium");
        assert_eq!(suspicion_for(10), "high");
        assert_eq!(suspicion_for(500), "high");
    }
}

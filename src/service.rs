//! Answers hub RPC queries from pipeline state
//!
//! Other instances (or an MCP bridge behind the hub) ask for trace data by
//! command name. Commands:
//!
//! | command             | args                       |
//! |---------------------|----------------------------|
//! | `get_trace_data`    | `limit` (default 100)      |
//! | `get_dead_code`     |                            |
//! | `get_performance`   | `limit` (default 20)       |
//! | `get_call_trees`    | `correlation_id` optional  |
//! | `get_full_stack`    |                            |
//! | `get_recent_events` | `limit` (default 100)      |
//! | `get_status`        |                            |

use crate::hub::{types, HubClient, HubResponder};
use crate::pipeline::EventIngestionPipeline;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

const DEFAULT_EVENT_LIMIT: usize = 100;
const DEFAULT_TOP_FUNCTIONS: usize = 20;

#[derive(Debug)]
pub struct TraceQueryService {
    pipeline: Arc<EventIngestionPipeline>,
    responder: Option<HubResponder>,
    instance_id: String,
}

impl TraceQueryService {
    /// Service without a hub; only [`handle`](Self::handle) is useful
    pub fn new(pipeline: Arc<EventIngestionPipeline>) -> Self {
        Self {
            pipeline,
            responder: None,
            instance_id: String::new(),
        }
    }

    /// Answer every `rpc_request` arriving through `hub`
    pub fn attach(pipeline: Arc<EventIngestionPipeline>, hub: &HubClient) -> Arc<Self> {
        let service = Arc::new(Self {
            pipeline,
            responder: Some(hub.responder()),
            instance_id: hub.instance_id().to_string(),
        });

        let handler = Arc::clone(&service);
        hub.on(types::RPC_REQUEST, move |request| {
            // Relaying hubs may fan requests out to every instance
            if let Some(target) = request.data.get("project_id").and_then(Value::as_str) {
                if target != handler.instance_id {
                    return;
                }
            }
            let command = request.command.as_deref().unwrap_or_default();
            let args = request.args.clone().unwrap_or(Value::Null);
            debug!(command, request_id = ?request.request_id, "answering trace query");
            let result = handler.handle(command, &args);
            if let Some(responder) = &handler.responder {
                responder.respond(request, result);
            }
        });
        service
    }

    /// Run one query command
    pub fn handle(&self, command: &str, args: &Value) -> Value {
        match command {
            "get_trace_data" => self.trace_data(arg_usize(args, "limit", DEFAULT_EVENT_LIMIT)),
            "get_dead_code" => self.dead_code(),
            "get_performance" => to_json(
                &self
                    .pipeline
                    .performance_report(arg_usize(args, "limit", DEFAULT_TOP_FUNCTIONS)),
            ),
            "get_call_trees" => {
                let trees = match args.get("correlation_id").and_then(Value::as_str) {
                    Some(id) => self.pipeline.call_trees_for(id),
                    None => self.pipeline.call_trees(),
                };
                json!({ "count": trees.len(), "trees": trees })
            }
            "get_full_stack" => {
                let groups = self.pipeline.full_stack_view();
                json!({ "count": groups.len(), "entry_points": groups })
            }
            "get_recent_events" => {
                let events = self.recent_events(arg_usize(args, "limit", DEFAULT_EVENT_LIMIT));
                json!({ "count": events.len(), "events": events })
            }
            "get_status" => json!({
                "instance_id": self.instance_id,
                "stats": self.pipeline.stats(),
                "throttle": self.pipeline.throttle_stats(),
            }),
            other => json!({ "error": format!("unknown command: {other}") }),
        }
    }

    /// Publish a `trace_update` summary; false when no hub is attached
    pub fn publish_update(&self) -> bool {
        let Some(responder) = &self.responder else {
            return false;
        };
        responder.publish(types::TRACE_UPDATE, self.trace_data(DEFAULT_EVENT_LIMIT))
    }

    fn trace_data(&self, limit: usize) -> Value {
        let stats = self.pipeline.stats();
        let calls: Vec<Value> = self
            .recent_events(limit)
            .into_iter()
            .filter(|e| e.get("type").and_then(Value::as_str) == Some("call"))
            .collect();
        let max_depth = calls
            .iter()
            .filter_map(|c| c.get("depth").and_then(Value::as_u64))
            .max()
            .unwrap_or(0);
        json!({
            "calls": calls,
            "total_calls": stats.calls,
            "completed_calls": stats.completed_calls,
            "total_duration_ms": stats.total_duration_ms,
            "max_depth": max_depth,
        })
    }

    fn dead_code(&self) -> Value {
        let report = self.pipeline.dead_code_report();
        let mut value = to_json(&report);
        if let Value::Object(map) = &mut value {
            map.insert("dead_functions".to_string(), json!(report.dead));
        }
        value
    }

    fn recent_events(&self, limit: usize) -> Vec<Value> {
        self.pipeline
            .recent_events(limit)
            .iter()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

fn arg_usize(args: &Value, key: &str, default: usize) -> usize {
    args.get(key)
        .and_then(Value::as_u64)
        .map(|v| v as usize)
        .unwrap_or(default)
}

fn to_json<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| json!({ "error": e.to_string() }))
}

use std::sync::Arc;
use std::time::Duration;

use proto::{ArgMap, ToolCall, ToolError, ToolResponse, ToolResult, ValidationError};
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use transport::WorkerRpc;

use crate::catalog::{self, Dispatch, SCRIPTED_TOOL_VERB};
use crate::envelope;
use crate::literal::to_table_literal;
use crate::reshape;
use crate::validate::{repair_keys, validate};

/// A call that passed validation and is ready to go on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedCall {
    /// Identifier of the tool in the worker's registry.
    pub canonical: String,
    /// Tool name put in the `tools/call` request.
    pub rpc_tool: String,
    /// `arguments` of the `tools/call` request.
    pub arguments: Value,
}

/// Runs steps up to serialization: key repair, validation, name
/// canonicalization, reshaping, and payload construction.
pub fn prepare(call: &ToolCall) -> Result<PreparedCall, ValidationError> {
    let name = call.name().trim();
    if name.is_empty() {
        return Err(ValidationError::new(
            "<unnamed>",
            "name",
            "The tool call has no name.",
        ));
    }

    let Some(spec) = catalog::lookup(name) else {
        warn!(tool = name, "Unknown tool name, passing it through unchanged");
        return Ok(scripted(name, call.args()));
    };

    let args = repair_keys(spec, call.args().clone());
    validate(spec, &args)?;
    if spec.canonical != name {
        debug!(from = name, to = spec.canonical, "Canonicalized tool name");
    }
    let args = reshape::apply(spec, args);

    Ok(match spec.dispatch {
        Dispatch::Scripted => scripted(spec.canonical, &args),
        Dispatch::Native => PreparedCall {
            canonical: spec.canonical.to_string(),
            rpc_tool: spec.canonical.to_string(),
            arguments: Value::Object(args),
        },
    })
}

fn scripted(canonical: &str, args: &ArgMap) -> PreparedCall {
    let literal = to_table_literal(&Value::Object(args.clone()));
    PreparedCall {
        canonical: canonical.to_string(),
        rpc_tool: SCRIPTED_TOOL_VERB.to_string(),
        arguments: json!({
            "tool_name": canonical,
            "tool_arguments_str": literal,
        }),
    }
}

/// Turns canonical tool calls into worker requests and their results.
pub struct ToolPipeline {
    worker: Arc<dyn WorkerRpc>,
    request_timeout: Duration,
}

impl ToolPipeline {
    pub fn new(worker: Arc<dyn WorkerRpc>, request_timeout: Duration) -> Self {
        Self {
            worker,
            request_timeout,
        }
    }

    /// Executes one call. Every failure is reported inside the returned result.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        info!(call_id = call.id(), tool = call.name(), "Executing tool call");
        let response = match prepare(call) {
            Ok(prepared) => self.dispatch(prepared).await,
            Err(e) => {
                warn!(call_id = call.id(), tool = call.name(), "Argument validation failed: {e}");
                ToolError::from(e).into()
            }
        };

        let result = ToolResult::for_call(call, response);
        if result.is_error() {
            warn!(
                call_id = %result.id,
                status = %result.status(),
                "Tool call finished with an error"
            );
        } else {
            debug!(call_id = %result.id, "Tool call succeeded");
        }
        result
    }

    async fn dispatch(&self, prepared: PreparedCall) -> ToolResponse {
        debug!(
            tool = %prepared.canonical,
            rpc_tool = %prepared.rpc_tool,
            "Dispatching tool call to worker"
        );
        match self
            .worker
            .send_tool_execution_request(&prepared.rpc_tool, prepared.arguments, self.request_timeout)
            .await
        {
            Ok(message) => envelope::interpret(&message),
            Err(e) => ToolError::from(e).into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use proto::{ToolStatus, TransportError};

    use super::*;
    use crate::catalog::CATALOG;

    type Reply = Box<dyn Fn(&str, &Value) -> Result<Value, TransportError> + Send + Sync>;

    /// Worker double that records every request and answers through `reply`.
    struct RecordingWorker {
        calls: Mutex<Vec<(String, Value)>>,
        reply: Reply,
    }

    impl RecordingWorker {
        fn new(reply: impl Fn(&str, &Value) -> Result<Value, TransportError> + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                reply: Box::new(reply),
            })
        }

        fn answering(result: Value) -> Arc<Self> {
            Self::new(move |_, _| Ok(json!({ "jsonrpc": "2.0", "id": "r", "result": result.clone() })))
        }

        fn calls(&self) -> Vec<(String, Value)> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl WorkerRpc for RecordingWorker {
        async fn send_tool_execution_request(
            &self,
            tool_name: &str,
            arguments: Value,
            _deadline: Duration,
        ) -> Result<Value, TransportError> {
            let reply = (self.reply)(tool_name, &arguments);
            self.calls.lock().push((tool_name.to_string(), arguments));
            reply
        }

        fn is_alive(&self) -> bool {
            true
        }

        async fn reconnect(&self, _max_attempts: u32) -> bool {
            true
        }
    }

    fn pipeline(worker: &Arc<RecordingWorker>) -> ToolPipeline {
        ToolPipeline::new(Arc::clone(worker) as Arc<dyn WorkerRpc>, Duration::from_secs(60))
    }

    fn call(name: &str, args: Value) -> ToolCall {
        match args {
            Value::Object(map) => ToolCall::with_id(Some("call-1".to_string()), name, map),
            other => panic!("expected object, got {other}"),
        }
    }

    #[tokio::test]
    async fn get_selection_success_scenario() {
        let worker = RecordingWorker::answering(json!({"content": [{"text": "[]"}], "isError": false}));
        let result = pipeline(&worker).execute(&call("get_selection", json!({}))).await;

        assert_eq!(result.id, "call-1");
        assert_eq!(result.name, "get_selection");
        assert_eq!(
            Value::Object(result.response.to_map()),
            json!({"status": "success", "content": "[]"})
        );

        let calls = worker.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, SCRIPTED_TOOL_VERB);
        assert_eq!(
            calls[0].1,
            json!({"tool_name": "GetSelection", "tool_arguments_str": "return {}"})
        );
    }

    #[tokio::test]
    async fn create_instance_size_becomes_axis_map() {
        let worker = RecordingWorker::answering(json!({"content": [{"text": "Created Part"}], "isError": false}));
        let result = pipeline(&worker)
            .execute(&call(
                "CreateInstance",
                json!({"class_name": "Part", "properties": {"Size": [1, 2, 3]}}),
            ))
            .await;
        assert_eq!(result.status(), ToolStatus::Success);

        let calls = worker.calls();
        let literal = calls[0].1["tool_arguments_str"]
            .as_str()
            .expect("literal payload");
        assert!(literal.contains("Size = { x = 1, y = 2, z = 3 }"), "{literal}");
        assert_eq!(calls[0].1["tool_name"], "CreateInstance");
    }

    #[tokio::test]
    async fn invalid_calls_never_reach_the_worker() {
        let worker = RecordingWorker::answering(json!({"content": [], "isError": false}));
        let pipeline = pipeline(&worker);

        let invalid_calls = [
            ("run_code", json!({"code": "  "})),
            ("insert_model", json!({})),
            ("get_properties", json!({"path": "Workspace.Part", "properties": "Size"})),
            ("set_properties", json!({"path": "Workspace.Part", "properties": {}})),
            ("create_instance", json!({"properties": {"Size": [1, 2, 3]}})),
            ("delete_instance", json!({"path": 42})),
            ("", json!({})),
        ];
        let covered: Vec<_> = invalid_calls
            .iter()
            .filter_map(|(name, _)| catalog::lookup(name))
            .map(|spec| spec.canonical)
            .collect();
        for spec in CATALOG.iter().filter(|spec| !spec.fields.is_empty()) {
            assert!(covered.contains(&spec.canonical), "no invalid case for {}", spec.canonical);
        }

        for (name, args) in invalid_calls {
            let result = pipeline.execute(&call(name, args)).await;
            assert_eq!(result.status(), ToolStatus::Error, "{name}");
            let details = result.response.to_map()["details"].clone();
            assert!(
                details
                    .as_str()
                    .is_some_and(|d| d.starts_with("Invalid arguments provided by AI: Invalid '")),
                "{name}: {details}"
            );
        }
        assert!(worker.calls().is_empty());
    }

    #[tokio::test]
    async fn repaired_keys_pass_validation() {
        let worker = RecordingWorker::answering(json!({"content": [{"text": "1"}], "isError": false}));
        let result = pipeline(&worker)
            .execute(&call("RunCode", json!({"command": "print(1)"})))
            .await;
        assert_eq!(result.status(), ToolStatus::Success);
        assert_eq!(
            worker.calls()[0].1["tool_arguments_str"],
            "return { code = 'print(1)' }"
        );
    }

    #[tokio::test]
    async fn insert_model_is_sent_natively() {
        let worker = RecordingWorker::answering(json!({"content": [{"text": "Inserted Tree"}], "isError": false}));
        let result = pipeline(&worker)
            .execute(&call("InsertModel", json!({"search_query": "low poly tree"})))
            .await;
        assert_eq!(result.status(), ToolStatus::Success);
        assert_eq!(
            worker.calls(),
            vec![("insert_model".to_string(), json!({"query": "low poly tree"}))]
        );
    }

    #[tokio::test]
    async fn unknown_tools_pass_through_as_scripted() {
        let worker = RecordingWorker::answering(json!({"content": [{"text": "ok"}], "isError": false}));
        pipeline(&worker)
            .execute(&call("TeleportPlayer", json!({"target": "Spawn"})))
            .await;
        assert_eq!(
            worker.calls()[0].1,
            json!({"tool_name": "TeleportPlayer", "tool_arguments_str": "return { target = 'Spawn' }"})
        );
    }

    #[tokio::test]
    async fn worker_tool_failure_is_reported_as_such() {
        let worker = RecordingWorker::answering(json!({
            "content": [{"type": "text", "text": "Instance not found"}],
            "isError": true
        }));
        let result = pipeline(&worker)
            .execute(&call("delete_instance", json!({"path": "Workspace.Nope"})))
            .await;
        assert_eq!(
            result.response,
            ToolResponse::ErrorFromWorkerTool {
                tool_message: "Instance not found".to_string()
            }
        );
    }

    #[tokio::test]
    async fn transport_failures_become_error_results() {
        let worker = RecordingWorker::new(|_, _| {
            Err(TransportError::Timeout {
                method: "tools/call".to_string(),
                after: Duration::from_secs(60),
            })
        });
        let result = pipeline(&worker)
            .execute(&call("get_selection", json!({})))
            .await;
        assert_eq!(
            result.response,
            ToolResponse::Error {
                details: "Request 'tools/call' timed out after 60s".to_string()
            }
        );

        let worker = RecordingWorker::new(|_, _| {
            Err(TransportError::Connection("worker stdout closed".to_string()))
        });
        let result = pipeline(&worker)
            .execute(&call("get_selection", json!({})))
            .await;
        assert_eq!(result.status(), ToolStatus::Error);
        assert!(result.response_json().contains("worker stdout closed"));
    }

    #[test]
    fn prepare_exposes_the_wire_payload() {
        let prepared = prepare(&call(
            "set-properties",
            json!({"instance_path": "Workspace.Part", "properties": {"Position": {"X": 1, "Y": 2, "Z": 3}}, "Anchored": true}),
        ))
        .expect("valid call");
        assert_eq!(prepared.canonical, "SetProperties");
        assert_eq!(prepared.rpc_tool, SCRIPTED_TOOL_VERB);
        assert_eq!(
            prepared.arguments["tool_arguments_str"],
            "return { path = 'Workspace.Part', properties = { Position = { x = 1, y = 2, z = 3 }, Anchored = true } }"
        );
    }
}

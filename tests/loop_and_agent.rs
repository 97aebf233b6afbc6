mod common;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};

use dagflow::{
    EntryInput, ErrorKind, InputSlot, NodeKind, ValueType, WorkflowSchema, TOOL_HANDLE,
};

use common::*;

fn entry_with_items(items: Value) -> EntryInput {
    let mut entry = EntryInput::query("go");
    entry.params.insert("items".to_string(), items);
    entry
}

/// start -> loop(items) -> answer; the body concatenates the running
/// `seen` variable with the item and stores it back.
fn accumulating_loop(max_iterations: Option<usize>) -> WorkflowSchema {
    let loop_node = with_input(
        configured(
            "loop",
            NodeKind::Loop,
            json!({ "max_iterations": max_iterations }),
        ),
        reference("array", ValueType::ArrayAny, "start", "items"),
    );
    let concat = with_input(
        configured("cat", NodeKind::TextConcat, json!({"text": "{{seen}}{{item}}"})),
        reference("item", ValueType::Any, "ls", "item"),
    );
    let update = with_input(
        node("upd", NodeKind::VariableUpdate),
        reference("seen", ValueType::String, "cat", "text"),
    );
    let loop_end = with_input(
        node("le", NodeKind::LoopEnd),
        reference("value", ValueType::Any, "cat", "text"),
    );

    WorkflowSchema {
        nodes: vec![
            node("start", NodeKind::Start),
            loop_node,
            child(node("ls", NodeKind::LoopStart), "loop"),
            child(concat, "loop"),
            child(update, "loop"),
            child(loop_end, "loop"),
            answer("done", "{{seen}}"),
        ],
        edges: vec![
            edge("start", "loop"),
            edge("ls", "cat"),
            edge("cat", "upd"),
            edge("upd", "le"),
            edge("loop", "done"),
        ],
    }
}

#[tokio::test]
async fn test_loop_preserves_order_and_carries_variables() {
    let result = engine_builder()
        .build()
        .start_run(
            accumulating_loop(None),
            HashMap::from([("seen".to_string(), json!(""))]),
            entry_with_items(json!(["a", "b", "c"])),
        )
        .await
        .unwrap()
        .completed()
        .unwrap();

    assert!(result.succeeded(), "errors: {:?}", result.errors);
    let loop_response = result.response("loop").unwrap();
    assert_eq!(loop_response.outputs["results"], json!(["a", "ab", "abc"]));
    assert_eq!(loop_response.metadata["iterations"], json!(3));
    assert_eq!(result.answer_text, "abc");
}

#[tokio::test]
async fn test_loop_over_empty_array() {
    let result = engine_builder()
        .build()
        .start_run(
            accumulating_loop(None),
            HashMap::from([("seen".to_string(), json!("-"))]),
            entry_with_items(json!([])),
        )
        .await
        .unwrap()
        .completed()
        .unwrap();
    assert!(result.succeeded());
    assert_eq!(result.response("loop").unwrap().outputs["results"], json!([]));
    assert_eq!(result.answer_text, "-");
}

#[tokio::test]
async fn test_loop_iteration_limit_is_reported_not_fatal() {
    let result = engine_builder()
        .build()
        .start_run(
            accumulating_loop(Some(2)),
            HashMap::from([("seen".to_string(), json!(""))]),
            entry_with_items(json!(["x", "y", "z"])),
        )
        .await
        .unwrap()
        .completed()
        .unwrap();

    assert!(result.succeeded());
    assert_eq!(
        result.response("loop").unwrap().outputs["results"],
        json!(["x", "xy"])
    );
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].kind, ErrorKind::IterationLimit);
    assert!(!result.errors[0].fatal);
    assert_eq!(
        result.errors[0].message,
        "Iteration limit 2 reached in node loop"
    );
}

/// start -> agent; the agent's single tool `lookup` answers with the query
/// it was given, optionally followed by a stop-tool node.
fn agent_graph(max_iterations: usize, with_stop: bool) -> WorkflowSchema {
    let agent = with_input(
        configured(
            "agent",
            NodeKind::ToolAgent,
            json!({"system_prompt": "Use tools.", "max_iterations": max_iterations}),
        ),
        question_input(),
    );
    let mut lookup = node("lookup", NodeKind::RunTool);
    lookup.tool_description = Some("Look a term up".to_string());
    lookup.inputs.push(InputSlot {
        required: true,
        tool_param: true,
        description: Some("term".to_string()),
        ..InputSlot::new("q", ValueType::String)
    });

    let mut nodes = vec![
        node("start", NodeKind::Start),
        agent,
        lookup,
        answer("reply", "found {{$lookup.q$}}"),
    ];
    let mut edges = vec![
        edge("start", "agent"),
        edge("agent", "lookup").with_handles(TOOL_HANDLE, "target"),
        edge("lookup", "reply"),
    ];
    if with_stop {
        nodes.push(node("stop", NodeKind::StopTool));
        edges.push(edge("reply", "stop"));
    }
    WorkflowSchema { nodes, edges }
}

#[tokio::test]
async fn test_tool_agent_bounded_when_model_never_stops() {
    let model = Arc::new(ScriptedModel::always(tool_response(
        "lookup",
        json!({"q": "rust"}),
    )));
    let result = engine_builder()
        .model(model.clone())
        .build()
        .start_run(agent_graph(3, false), HashMap::new(), EntryInput::query("what is rust"))
        .await
        .unwrap()
        .completed()
        .unwrap();

    assert!(result.succeeded());
    assert_eq!(model.calls(), 3);
    let agent = result.response("agent").unwrap();
    assert_eq!(agent.outputs["iterations"], json!(3));
    assert_eq!(agent.outputs["tool_calls"].as_array().unwrap().len(), 3);
    assert_eq!(agent.outputs["tool_calls"][0]["result"], json!("found rust"));

    let limit = result
        .errors
        .iter()
        .find(|e| e.kind == ErrorKind::IterationLimit)
        .unwrap();
    assert!(!limit.fatal);
    assert_eq!(limit.node_id.as_deref(), Some("agent"));

    // The tool definition advertises the tool-parameter slot.
    let requests = model.requests.lock();
    let tool = &requests[0].tools[0];
    assert_eq!(tool.name, "lookup");
    assert_eq!(tool.parameters["properties"]["q"]["type"], json!("string"));
    assert_eq!(tool.parameters["required"], json!(["q"]));
}

#[tokio::test]
async fn test_stop_tool_ends_agent_loop_with_tool_result() {
    let model = Arc::new(ScriptedModel::always(tool_response(
        "lookup",
        json!({"q": "tokio"}),
    )));
    let result = engine_builder()
        .model(model.clone())
        .build()
        .start_run(agent_graph(5, true), HashMap::new(), EntryInput::query("q"))
        .await
        .unwrap()
        .completed()
        .unwrap();

    assert!(result.succeeded());
    assert_eq!(model.calls(), 1);
    assert_eq!(result.answer_text, "found tokio");
    assert!(result.errors.is_empty());
    // Tool-region nodes report through the agent, not the root run.
    assert!(!result.executed("lookup"));
}

#[tokio::test]
async fn test_agent_plain_answer_finishes_immediately() {
    let model = Arc::new(ScriptedModel::new(
        vec![
            tool_response("lookup", json!({"q": "a"})),
            text_response("All done."),
        ],
        text_response("unreachable"),
    ));
    let result = engine_builder()
        .model(model.clone())
        .build()
        .start_run(agent_graph(5, false), HashMap::new(), EntryInput::query("q"))
        .await
        .unwrap()
        .completed()
        .unwrap();

    assert_eq!(model.calls(), 2);
    assert_eq!(result.answer_text, "All done.");
    assert_eq!(result.response("agent").unwrap().outputs["iterations"], json!(2));

    // Second call sees the tool message appended to the conversation.
    let requests = model.requests.lock();
    let last = requests[1].messages.last().unwrap();
    assert_eq!(last.content, "found a");
    assert_eq!(last.tool_call_id.as_deref(), Some("call_lookup"));
}

#[tokio::test]
async fn test_unknown_tool_is_reported_back_to_model() {
    let model = Arc::new(ScriptedModel::new(
        vec![tool_response("nope", json!({}))],
        text_response("ok"),
    ));
    let result = engine_builder()
        .model(model.clone())
        .build()
        .start_run(agent_graph(5, false), HashMap::new(), EntryInput::query("q"))
        .await
        .unwrap()
        .completed()
        .unwrap();

    assert!(result.succeeded());
    let requests = model.requests.lock();
    let tool_message = requests[1].messages.last().unwrap();
    assert_eq!(tool_message.content, "Tool error: unknown tool 'nope'");
}

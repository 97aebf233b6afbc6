mod common;

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{json, Value};

use dagflow::{
    EngineConfig, EntryInput, FileRunStore, MemoryRunStore, NodeKind, NodeSchema,
    ResponseStatus, RunResult, RunStore, UserInput, ValueType, WorkflowError, WorkflowSchema,
};

use common::*;

/// start -> note -> {pick | fixed} -> tea / coffee -> bye
fn drink_graph(chooser: NodeSchema) -> WorkflowSchema {
    WorkflowSchema {
        nodes: vec![
            node("start", NodeKind::Start),
            configured(
                "note",
                NodeKind::TextConcat,
                json!({"text": "order for {{$start.user_question$}}"}),
            ),
            chooser,
            answer("tea", "Tea for {{$start.user_question$}}. "),
            answer("coffee", "Coffee for {{$start.user_question$}}. "),
            answer("bye", "({{$note.text$}})"),
        ],
        edges: vec![
            edge("start", "note"),
            edge("note", "pick"),
            branch("pick", "tea", "tea"),
            branch("pick", "coffee", "coffee"),
            edge("tea", "bye"),
            edge("coffee", "bye"),
        ],
    }
}

fn interactive_pick() -> NodeSchema {
    configured(
        "pick",
        NodeKind::UserSelect,
        json!({
            "description": "What would {{$start.user_question$}} like?",
            "options": [{"id": "tea", "value": "Tea"}, {"id": "coffee", "value": "Coffee"}]
        }),
    )
}

fn fixed_pick(choice: &str) -> NodeSchema {
    with_input(
        configured(
            "pick",
            NodeKind::IfElse,
            json!({"cases": [
                {"case_id": "tea", "conditions": [{"input": "choice", "operator": "is", "value": "tea"}]},
                {"case_id": "coffee", "conditions": [{"input": "choice", "operator": "is", "value": "coffee"}]}
            ]}),
        ),
        dagflow::InputSlot {
            binding: dagflow::Binding::Literal { value: json!(choice) },
            ..dagflow::InputSlot::new("choice", ValueType::String)
        },
    )
}

fn executed_ids(result: &RunResult) -> Vec<String> {
    let mut ids: Vec<String> = result
        .node_responses
        .iter()
        .map(|r| r.node_id.clone())
        .collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn test_resume_matches_uninterrupted_run() {
    let engine = engine_builder().build();

    let suspension = engine
        .start_run(drink_graph(interactive_pick()), HashMap::new(), EntryInput::query("Ada"))
        .await
        .unwrap()
        .suspended()
        .unwrap();
    assert_eq!(suspension.node_id, "pick");
    assert_eq!(suspension.run_id, "run-0");
    match &suspension.request {
        dagflow::InteractionRequest::UserSelect { description, options } => {
            assert_eq!(description, "What would Ada like?");
            assert_eq!(options.len(), 2);
        }
        other => panic!("unexpected request: {:?}", other),
    }
    let before: Vec<&str> = suspension
        .node_responses
        .iter()
        .map(|r| r.node_id.as_str())
        .collect();
    assert_eq!(before, vec!["start", "note"]);

    let resumed = engine
        .resume_run(
            &suspension.token,
            UserInput::Select {
                option: "Coffee".into(),
            },
        )
        .await
        .unwrap()
        .completed()
        .unwrap();

    let direct = engine_builder()
        .build()
        .start_run(drink_graph(fixed_pick("coffee")), HashMap::new(), EntryInput::query("Ada"))
        .await
        .unwrap()
        .completed()
        .unwrap();

    assert!(resumed.succeeded());
    assert_eq!(resumed.run_id, "run-0");
    assert_eq!(resumed.answer_text, "Coffee for Ada. (order for Ada)");
    assert_eq!(resumed.answer_text, direct.answer_text);
    assert_eq!(resumed.final_outputs, direct.final_outputs);
    assert_eq!(executed_ids(&resumed), executed_ids(&direct));

    let pick = resumed.response("pick").unwrap();
    assert_eq!(pick.status, ResponseStatus::Succeeded);
    assert_eq!(pick.outputs["selected_option"], json!("Coffee"));
}

#[tokio::test]
async fn test_resume_keeps_step_budget() {
    // start, note and pick are charged before the suspension.
    let engine = engine_builder()
        .config(EngineConfig {
            max_steps: 4,
            ..EngineConfig::default()
        })
        .build();
    let suspension = engine
        .start_run(drink_graph(interactive_pick()), HashMap::new(), EntryInput::query("Bo"))
        .await
        .unwrap()
        .suspended()
        .unwrap();

    let result = engine
        .resume_run(&suspension.token, UserInput::Select { option: "tea".into() })
        .await
        .unwrap()
        .completed()
        .unwrap();
    assert!(!result.succeeded());
    assert!(result.executed("tea"));
    assert!(!result.executed("bye"));
    assert_eq!(result.fatal_error().unwrap().message, "Max steps exceeded: 4");
}

fn form_graph() -> WorkflowSchema {
    WorkflowSchema {
        nodes: vec![
            node("start", NodeKind::Start),
            configured(
                "form",
                NodeKind::FormInput,
                json!({
                    "description": "Contact details",
                    "fields": [
                        {"key": "email", "label": "Email", "required": true, "value_type": "string"},
                        {"key": "age", "label": "Age", "value_type": "number"}
                    ]
                }),
            ),
            answer("thanks", "Thanks, we will write to {{$form.email$}}"),
        ],
        edges: vec![edge("start", "form"), edge("form", "thanks")],
    }
}

fn form_values(value: Value) -> UserInput {
    match value {
        Value::Object(values) => UserInput::Form { values },
        _ => panic!("form values must be an object"),
    }
}

#[tokio::test]
async fn test_form_input_enforces_required_fields() {
    let engine = engine_builder().build();
    let suspension = engine
        .start_run(form_graph(), HashMap::new(), EntryInput::default())
        .await
        .unwrap()
        .suspended()
        .unwrap();

    let err = engine
        .resume_run(&suspension.token, form_values(json!({"age": 40})))
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Invalid resume input: missing required field 'email'"
    );

    let err = engine
        .resume_run(
            &suspension.token,
            form_values(json!({"email": "a@b.c", "age": "forty"})),
        )
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Invalid resume input: field 'age' expects number, got string"
    );

    let err = engine
        .resume_run(&suspension.token, UserInput::Select { option: "x".into() })
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidResumeInput(_)));

    // A rejected answer leaves the token usable.
    let result = engine
        .resume_run(&suspension.token, form_values(json!({"email": "a@b.c"})))
        .await
        .unwrap()
        .completed()
        .unwrap();
    assert_eq!(result.answer_text, "Thanks, we will write to a@b.c");
    let form = result.response("form").unwrap();
    assert_eq!(form.outputs["age"], Value::Null);
    assert_eq!(form.outputs["form_data"], json!({"email": "a@b.c"}));
}

#[tokio::test]
async fn test_invalid_tokens_are_rejected() {
    let engine = engine_builder().build();

    let err = engine
        .resume_run("%%% not a token", UserInput::Select { option: "a".into() })
        .await
        .unwrap_err();
    assert!(err
        .to_string()
        .starts_with("Invalid continuation token: bad encoding"));

    let garbage = URL_SAFE_NO_PAD.encode(b"{\"version\": 1}");
    let err = engine
        .resume_run(&garbage, UserInput::Select { option: "a".into() })
        .await
        .unwrap_err();
    assert!(err
        .to_string()
        .starts_with("Invalid continuation token: bad payload"));

    let suspension = engine
        .start_run(drink_graph(interactive_pick()), HashMap::new(), EntryInput::query("Cy"))
        .await
        .unwrap()
        .suspended()
        .unwrap();
    let mut envelope: Value =
        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(&suspension.token).unwrap()).unwrap();
    envelope["version"] = json!(99);
    let tampered = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&envelope).unwrap());
    let err = engine
        .resume_run(&tampered, UserInput::Select { option: "tea".into() })
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Invalid continuation token: unsupported version 99"
    );
}

#[tokio::test]
async fn test_resume_from_memory_store_consumes_entry() {
    let store = Arc::new(MemoryRunStore::new());
    let engine = engine_builder().run_store(store.clone()).build();

    let suspension = engine
        .start_run(drink_graph(interactive_pick()), HashMap::new(), EntryInput::query("Di"))
        .await
        .unwrap()
        .suspended()
        .unwrap();
    assert!(store.load(&suspension.run_id).await.unwrap().is_some());

    let result = engine
        .resume_stored(&suspension.run_id, UserInput::Select { option: "tea".into() })
        .await
        .unwrap()
        .completed()
        .unwrap();
    assert_eq!(result.answer_text, "Tea for Di. (order for Di)");
    assert!(store.load(&suspension.run_id).await.unwrap().is_none());

    let err = engine
        .resume_stored(&suspension.run_id, UserInput::Select { option: "tea".into() })
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Run store error: no suspended run run-0");
}

#[tokio::test]
async fn test_resume_from_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileRunStore::new(dir.path()).unwrap());
    let engine = engine_builder().run_store(store).build();

    let suspension = engine
        .start_run(form_graph(), HashMap::new(), EntryInput::default())
        .await
        .unwrap()
        .suspended()
        .unwrap();
    assert!(dir.path().join("run-0.continuation").exists());

    let result = engine
        .resume_stored("run-0", form_values(json!({"email": "x@y.z"})))
        .await
        .unwrap()
        .completed()
        .unwrap();
    assert!(result.succeeded());
    assert_eq!(suspension.run_id, "run-0");
    assert!(!dir.path().join("run-0.continuation").exists());
}

#[tokio::test]
async fn test_engine_without_store_rejects_stored_resume() {
    let err = engine_builder()
        .build()
        .resume_stored("missing", UserInput::Select { option: "a".into() })
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Run store error: no run store configured");
}

//! Structural validation of an indexed graph.

use std::collections::HashMap;

use crate::dsl::{NodeKind, TARGET_HANDLE};
use crate::error::ValidationError;
use crate::nodes::agent::tool_name;
use crate::nodes::executor::NodeExecutorRegistry;

use super::types::{Graph, Scope};

/// Reject graphs that could never run to completion. Called by the builder
/// once scopes and the topological hint are known.
pub fn validate_graph(graph: &Graph) -> Result<(), ValidationError> {
    validate_edges(graph)?;
    validate_tool_names(graph)?;
    validate_loops(graph)?;
    validate_inputs(graph)?;
    validate_entries(graph)?;
    Ok(())
}

fn validate_tool_names(graph: &Graph) -> Result<(), ValidationError> {
    for agent in graph.nodes().iter().filter(|n| n.kind == NodeKind::ToolAgent) {
        let mut seen: HashMap<String, &str> = HashMap::new();
        for entry in graph.tool_entries(&agent.id) {
            let name = tool_name(entry);
            if let Some(first) = seen.insert(name.clone(), &entry.id) {
                return Err(ValidationError::InvalidConfig {
                    node_id: agent.id.clone(),
                    message: format!(
                        "tools {} and {} share the name '{}'",
                        first, entry.id, name
                    ),
                });
            }
        }
    }
    Ok(())
}

fn validate_edges(graph: &Graph) -> Result<(), ValidationError> {
    for edge in graph.edges() {
        let (Some(source), Some(target)) = (graph.node(&edge.source), graph.node(&edge.target))
        else {
            continue;
        };

        if edge.target_handle != TARGET_HANDLE && target.input(&edge.target_handle).is_none() {
            return Err(ValidationError::UnknownTargetHandle {
                edge_id: edge.id.clone(),
                node_id: target.id.clone(),
                handle: edge.target_handle.clone(),
            });
        }

        if edge.is_tool_edge() {
            if source.kind != NodeKind::ToolAgent || edge.target_handle != TARGET_HANDLE {
                return Err(ValidationError::InvalidConfig {
                    node_id: source.id.clone(),
                    message: format!("edge {} is not a valid tool binding", edge.id),
                });
            }
            continue;
        }

        if graph.scope_of(&source.id) != graph.scope_of(&target.id) {
            return Err(ValidationError::BoundaryCrossing {
                edge_id: edge.id.clone(),
            });
        }
    }

    // Tool regions live next to their agent.
    for node in graph.nodes() {
        if let Scope::Tool(entry_id) = graph.scope_of(&node.id) {
            let agent_parent = graph
                .tool_owner(entry_id)
                .and_then(|agent| graph.node(agent))
                .and_then(|agent| agent.parent_id.clone());
            if node.parent_id != agent_parent {
                let edge_id = graph
                    .incoming(&node.id)
                    .first()
                    .map(|index| graph.edge(*index).id.clone())
                    .unwrap_or_else(|| node.id.clone());
                return Err(ValidationError::BoundaryCrossing { edge_id });
            }
        }
    }
    Ok(())
}

fn validate_loops(graph: &Graph) -> Result<(), ValidationError> {
    for node in graph.nodes() {
        match node.kind {
            NodeKind::Loop => {
                let starts = graph.loop_children(&node.id, NodeKind::LoopStart);
                if starts.is_empty() {
                    return Err(ValidationError::MissingLoopStart(node.id.clone()));
                }
                for kind in [NodeKind::LoopStart, NodeKind::LoopEnd] {
                    if graph.loop_children(&node.id, kind).len() > 1 {
                        return Err(ValidationError::DuplicateSentinel {
                            loop_id: node.id.clone(),
                            kind: kind.to_string(),
                        });
                    }
                }
            }
            NodeKind::LoopStart | NodeKind::LoopEnd if node.parent_id.is_none() => {
                return Err(ValidationError::OrphanSentinel {
                    node_id: node.id.clone(),
                    kind: node.kind.to_string(),
                });
            }
            _ => {}
        }
    }
    Ok(())
}

fn validate_inputs(graph: &Graph) -> Result<(), ValidationError> {
    for node in graph.nodes() {
        let scope = graph.scope_of(&node.id);
        let is_tool_entry = matches!(scope, Scope::Tool(entry) if entry == &node.id);

        for slot in &node.inputs {
            let edge_count = graph
                .incoming(&node.id)
                .iter()
                .filter(|index| graph.edge(**index).target_handle == slot.key)
                .count();
            let bindings = edge_count + usize::from(slot.binding.is_bound());

            if !slot.is_dynamic() && bindings > 1 {
                return Err(ValidationError::MultipleBindings {
                    node_id: node.id.clone(),
                    input: slot.key.clone(),
                });
            }
            let filled_by_tool_call = slot.tool_param && is_tool_entry;
            if slot.required && bindings == 0 && slot.default.is_none() && !filled_by_tool_call {
                return Err(ValidationError::UnboundInput {
                    node_id: node.id.clone(),
                    input: slot.key.clone(),
                });
            }

            for reference in slot.binding.refs() {
                if reference.is_global() {
                    continue;
                }
                if !graph.contains(&reference.node_id) {
                    return Err(ValidationError::DanglingReference {
                        node_id: node.id.clone(),
                        input: slot.key.clone(),
                        target: reference.node_id.clone(),
                    });
                }
                if !graph.scope_visible(scope, graph.scope_of(&reference.node_id)) {
                    return Err(ValidationError::InvisibleReference {
                        node_id: node.id.clone(),
                        input: slot.key.clone(),
                        target: reference.node_id.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

fn validate_entries(graph: &Graph) -> Result<(), ValidationError> {
    if !graph
        .nodes()
        .iter()
        .any(|node| node.kind.is_root_entry() && graph.scope_of(&node.id) == &Scope::Root)
    {
        return Err(ValidationError::NoEntryNode);
    }

    for node in graph.nodes() {
        let scope = graph.scope_of(&node.id);
        if node.kind.is_interactive() && scope != &Scope::Root {
            return Err(ValidationError::NestedInteractive(node.id.clone()));
        }
        if graph.incoming(&node.id).is_empty() && !graph.is_scope_entry(node, scope) {
            return Err(ValidationError::UnreachableNode(node.id.clone()));
        }
    }
    Ok(())
}

/// Check that every node kind has an executor and that each executor accepts
/// its node's configuration.
pub fn validate_executors(
    graph: &Graph,
    registry: &NodeExecutorRegistry,
) -> Result<(), ValidationError> {
    for node in graph.nodes() {
        let executor = registry
            .get(node.kind)
            .ok_or_else(|| ValidationError::MissingExecutor(node.kind.to_string()))?;
        executor
            .validate(node)
            .map_err(|e| ValidationError::InvalidConfig {
                node_id: node.id.clone(),
                message: e.to_string(),
            })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::dsl::{
        Binding, EdgeSchema, InputSlot, NodeSchema, ValueType, WorkflowSchema, TOOL_HANDLE,
    };
    use crate::error::ValidationError;
    use crate::graph::build_graph;

    use super::*;

    fn node(id: &str, kind: NodeKind) -> NodeSchema {
        NodeSchema::new(id, kind)
    }

    fn child(id: &str, kind: NodeKind, parent: &str) -> NodeSchema {
        let mut n = NodeSchema::new(id, kind);
        n.parent_id = Some(parent.to_string());
        n
    }

    fn required(key: &str) -> InputSlot {
        InputSlot {
            required: true,
            ..InputSlot::new(key, ValueType::String)
        }
    }

    #[test]
    fn test_unbound_required_input() {
        let mut answer = node("a", NodeKind::Answer);
        answer.inputs.push(required("text"));
        let err = build_graph(WorkflowSchema {
            nodes: vec![node("s", NodeKind::Start), answer],
            edges: vec![EdgeSchema::new("s", "a")],
        })
        .unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnboundInput {
                node_id: "a".into(),
                input: "text".into()
            }
        );
    }

    #[test]
    fn test_default_satisfies_required_input() {
        let mut answer = node("a", NodeKind::Answer);
        answer.inputs.push(InputSlot {
            default: Some(json!("hi")),
            ..required("text")
        });
        assert!(build_graph(WorkflowSchema {
            nodes: vec![node("s", NodeKind::Start), answer],
            edges: vec![EdgeSchema::new("s", "a")],
        })
        .is_ok());
    }

    #[test]
    fn test_multiple_edges_into_required_handle() {
        let mut answer = node("a", NodeKind::Answer);
        answer.inputs.push(required("text"));
        let err = build_graph(WorkflowSchema {
            nodes: vec![
                node("s", NodeKind::Start),
                node("x", NodeKind::TextConcat),
                node("y", NodeKind::TextConcat),
                answer,
            ],
            edges: vec![
                EdgeSchema::new("s", "x"),
                EdgeSchema::new("s", "y"),
                EdgeSchema::new("x", "a").with_handles("text", "text"),
                EdgeSchema::new("y", "a").with_handles("text", "text"),
            ],
        })
        .unwrap_err();
        assert!(matches!(err, ValidationError::MultipleBindings { .. }));
    }

    #[test]
    fn test_dynamic_input_accepts_many_edges() {
        let mut merge = node("m", NodeKind::KnowledgeMerge);
        merge.inputs.push(InputSlot {
            dynamic: true,
            ..required("lists")
        });
        assert!(build_graph(WorkflowSchema {
            nodes: vec![
                node("s", NodeKind::Start),
                node("x", NodeKind::KnowledgeSearch),
                node("y", NodeKind::KnowledgeSearch),
                merge,
            ],
            edges: vec![
                EdgeSchema::new("s", "x"),
                EdgeSchema::new("s", "y"),
                EdgeSchema::new("x", "m").with_handles("quote_list", "lists"),
                EdgeSchema::new("y", "m").with_handles("quote_list", "lists"),
            ],
        })
        .is_ok());
    }

    #[test]
    fn test_edge_into_loop_body_rejected() {
        let err = build_graph(WorkflowSchema {
            nodes: vec![
                node("s", NodeKind::Start),
                node("loop", NodeKind::Loop),
                child("ls", NodeKind::LoopStart, "loop"),
                child("body", NodeKind::TextConcat, "loop"),
            ],
            edges: vec![
                EdgeSchema::new("s", "loop"),
                EdgeSchema::new("ls", "body"),
                EdgeSchema::new("s", "body"),
            ],
        })
        .unwrap_err();
        assert!(matches!(err, ValidationError::BoundaryCrossing { .. }));
    }

    #[test]
    fn test_loop_requires_single_start() {
        let err = build_graph(WorkflowSchema {
            nodes: vec![node("s", NodeKind::Start), node("loop", NodeKind::Loop)],
            edges: vec![EdgeSchema::new("s", "loop")],
        })
        .unwrap_err();
        assert_eq!(err, ValidationError::MissingLoopStart("loop".into()));

        let err = build_graph(WorkflowSchema {
            nodes: vec![
                node("s", NodeKind::Start),
                node("loop", NodeKind::Loop),
                child("ls1", NodeKind::LoopStart, "loop"),
                child("ls2", NodeKind::LoopStart, "loop"),
            ],
            edges: vec![EdgeSchema::new("s", "loop")],
        })
        .unwrap_err();
        assert!(matches!(err, ValidationError::DuplicateSentinel { .. }));
    }

    #[test]
    fn test_loop_start_outside_loop() {
        let err = build_graph(WorkflowSchema {
            nodes: vec![node("s", NodeKind::Start), node("ls", NodeKind::LoopStart)],
            edges: vec![EdgeSchema::new("s", "ls")],
        })
        .unwrap_err();
        assert!(matches!(err, ValidationError::OrphanSentinel { .. }));
    }

    #[test]
    fn test_cycle_rejected() {
        let err = build_graph(WorkflowSchema {
            nodes: vec![
                node("s", NodeKind::Start),
                node("a", NodeKind::TextConcat),
                node("b", NodeKind::TextConcat),
            ],
            edges: vec![
                EdgeSchema::new("s", "a"),
                EdgeSchema::new("a", "b"),
                EdgeSchema::new("b", "a"),
            ],
        })
        .unwrap_err();
        assert_eq!(err, ValidationError::Cycle(vec!["a".into(), "b".into()]));
    }

    #[test]
    fn test_no_entry_and_unreachable() {
        let err = build_graph(WorkflowSchema {
            nodes: vec![node("a", NodeKind::Answer)],
            edges: vec![],
        })
        .unwrap_err();
        assert_eq!(err, ValidationError::NoEntryNode);

        let err = build_graph(WorkflowSchema {
            nodes: vec![node("s", NodeKind::Start), node("a", NodeKind::Answer)],
            edges: vec![],
        })
        .unwrap_err();
        assert_eq!(err, ValidationError::UnreachableNode("a".into()));
    }

    #[test]
    fn test_dangling_and_invisible_references() {
        let mut answer = node("a", NodeKind::Answer);
        answer.inputs.push(InputSlot {
            binding: Binding::Reference {
                node_id: "ghost".into(),
                output_key: "text".into(),
            },
            ..required("text")
        });
        let err = build_graph(WorkflowSchema {
            nodes: vec![node("s", NodeKind::Start), answer.clone()],
            edges: vec![EdgeSchema::new("s", "a")],
        })
        .unwrap_err();
        assert!(matches!(err, ValidationError::DanglingReference { .. }));

        answer.inputs[0].binding = Binding::Reference {
            node_id: "body".into(),
            output_key: "text".into(),
        };
        let err = build_graph(WorkflowSchema {
            nodes: vec![
                node("s", NodeKind::Start),
                node("loop", NodeKind::Loop),
                child("ls", NodeKind::LoopStart, "loop"),
                child("body", NodeKind::TextConcat, "loop"),
                answer,
            ],
            edges: vec![
                EdgeSchema::new("s", "loop"),
                EdgeSchema::new("ls", "body"),
                EdgeSchema::new("loop", "a"),
            ],
        })
        .unwrap_err();
        assert!(matches!(err, ValidationError::InvisibleReference { .. }));
    }

    #[test]
    fn test_interactive_inside_loop_rejected() {
        let err = build_graph(WorkflowSchema {
            nodes: vec![
                node("s", NodeKind::Start),
                node("loop", NodeKind::Loop),
                child("ls", NodeKind::LoopStart, "loop"),
                child("ask", NodeKind::UserSelect, "loop"),
            ],
            edges: vec![EdgeSchema::new("s", "loop"), EdgeSchema::new("ls", "ask")],
        })
        .unwrap_err();
        assert_eq!(err, ValidationError::NestedInteractive("ask".into()));
    }

    #[test]
    fn test_unknown_target_handle() {
        let err = build_graph(WorkflowSchema {
            nodes: vec![node("s", NodeKind::Start), node("a", NodeKind::Answer)],
            edges: vec![EdgeSchema::new("s", "a").with_handles("source", "nope")],
        })
        .unwrap_err();
        assert!(matches!(err, ValidationError::UnknownTargetHandle { .. }));
    }

    #[test]
    fn test_tool_param_may_stay_unbound_on_tool_entry() {
        let mut tool = node("lookup", NodeKind::RunTool);
        tool.inputs.push(InputSlot {
            tool_param: true,
            ..required("city")
        });
        assert!(build_graph(WorkflowSchema {
            nodes: vec![
                node("s", NodeKind::Start),
                node("agent", NodeKind::ToolAgent),
                tool,
            ],
            edges: vec![
                EdgeSchema::new("s", "agent"),
                EdgeSchema::new("agent", "lookup").with_handles(TOOL_HANDLE, "target"),
            ],
        })
        .is_ok());
    }

    #[test]
    fn test_tool_names_must_be_distinct_per_agent() {
        let mut weather = node("weather", NodeKind::RunTool);
        weather.name = "get weather".into();
        let mut forecast = node("forecast", NodeKind::RunTool);
        forecast.name = "get_weather".into();
        let err = build_graph(WorkflowSchema {
            nodes: vec![
                node("s", NodeKind::Start),
                node("agent", NodeKind::ToolAgent),
                weather,
                forecast,
            ],
            edges: vec![
                EdgeSchema::new("s", "agent"),
                EdgeSchema::new("agent", "weather").with_handles(TOOL_HANDLE, "target"),
                EdgeSchema::new("agent", "forecast").with_handles(TOOL_HANDLE, "target"),
            ],
        })
        .unwrap_err();
        assert_eq!(
            err,
            ValidationError::InvalidConfig {
                node_id: "agent".into(),
                message: "tools weather and forecast share the name 'get_weather'".into(),
            }
        );
    }
}

//! Text substitution for prompts, answers and HTTP requests.
//!
//! `{{$nodeId.outputKey$}}` reads a node output (or a global variable when
//! `nodeId` is `global`); `{{name}}` reads a node input first, then a global
//! variable. Strings render raw, other values as JSON, missing values as
//! nothing. Substituted text is expanded again, up to [`MAX_DEPTH`] rounds.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::core::variable_pool::VariablePool;

pub const MAX_DEPTH: usize = 10;

static NODE_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\$([^.{}$]+)\.([^{}$]+)\$\}\}").expect("node reference pattern")
});

static VARIABLE_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([A-Za-z0-9_.\-]+)\}\}").expect("variable pattern"));

/// Render a value the way it appears inside text.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn render(template: &str, pool: &VariablePool, inputs: Option<&HashMap<String, Value>>) -> String {
    let mut current = template.to_string();
    for _ in 0..MAX_DEPTH {
        let next = render_once(&current, pool, inputs);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn render_once(
    text: &str,
    pool: &VariablePool,
    inputs: Option<&HashMap<String, Value>>,
) -> String {
    let with_refs = NODE_REF.replace_all(text, |caps: &Captures| {
        pool.get(caps[1].trim(), caps[2].trim())
            .map(value_to_text)
            .unwrap_or_default()
    });
    VARIABLE_REF
        .replace_all(&with_refs, |caps: &Captures| {
            let name = &caps[1];
            inputs
                .and_then(|inputs| inputs.get(name))
                .or_else(|| pool.variable(name))
                .map(value_to_text)
                .unwrap_or_default()
        })
        .into_owned()
}

/// Render every string inside a JSON value, leaving structure intact.
pub fn render_value(
    value: &Value,
    pool: &VariablePool,
    inputs: Option<&HashMap<String, Value>>,
) -> Value {
    match value {
        Value::String(s) => Value::String(render(s, pool, inputs)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| render_value(item, pool, inputs))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(v, pool, inputs)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pool() -> VariablePool {
        let mut pool = VariablePool::with_variables(HashMap::from([
            ("lang".to_string(), json!("en")),
            ("inner".to_string(), json!("{{lang}}-US")),
        ]));
        pool.set_outputs(
            "search",
            HashMap::from([
                ("count".to_string(), json!(3)),
                ("quotes".to_string(), json!([{"id": "a"}])),
            ]),
        );
        pool
    }

    #[test]
    fn test_node_reference() {
        let out = render("found {{$search.count$}} items", &pool(), None);
        assert_eq!(out, "found 3 items");
    }

    #[test]
    fn test_global_reference_and_variable() {
        let out = render("{{$global.lang$}}/{{lang}}", &pool(), None);
        assert_eq!(out, "en/en");
    }

    #[test]
    fn test_objects_render_as_json() {
        let out = render("{{$search.quotes$}}", &pool(), None);
        assert_eq!(out, r#"[{"id":"a"}]"#);
    }

    #[test]
    fn test_missing_renders_empty() {
        let out = render("[{{$nope.x$}}][{{unknown}}]", &pool(), None);
        assert_eq!(out, "[][]");
    }

    #[test]
    fn test_inputs_shadow_variables() {
        let inputs = HashMap::from([("lang".to_string(), json!("fr"))]);
        assert_eq!(render("{{lang}}", &pool(), Some(&inputs)), "fr");
    }

    #[test]
    fn test_nested_expansion() {
        assert_eq!(render("{{inner}}", &pool(), None), "en-US");
    }

    #[test]
    fn test_self_referencing_variable_terminates() {
        let pool = VariablePool::with_variables(HashMap::from([(
            "loop".to_string(),
            json!("x{{loop}}"),
        )]));
        let out = render("{{loop}}", &pool, None);
        assert!(out.starts_with("xxxxxxxxxx"));
    }

    #[test]
    fn test_render_value_walks_structure() {
        let value = json!({"q": "{{lang}}", "n": [1, "{{$search.count$}}"]});
        assert_eq!(
            render_value(&value, &pool(), None),
            json!({"q": "en", "n": [1, "3"]})
        );
    }
}

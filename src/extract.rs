//! Value lookup and success matching over JSON responses

use serde_json::Value;

/// Resolve a dotted path (`"data.result.code"`) inside a JSON tree.
///
/// Descends only through objects that own the next key. Arrays, primitives
/// and missing keys encountered along the way end the lookup with `None`.
pub fn resolve<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if root.is_null() || path.is_empty() {
        return None;
    }

    path.split('.')
        .try_fold(root, |node, segment| node.as_object()?.get(segment))
}

/// Nested lookup first, then the whole path as one literal key.
///
/// Some APIs use keys that themselves contain dots.
pub fn resolve_with_fallback<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    resolve(root, path).or_else(|| {
        if path.is_empty() {
            None
        } else {
            root.as_object()?.get(path)
        }
    })
}

/// String form used when comparing response values against success values
pub fn coerce_to_string(value: Option<&Value>) -> String {
    match value {
        None => "undefined".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) => "null".to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => match n.as_f64() {
            // 0.0 and -0.0 both print as "0"; integral floats drop the fraction
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 && !n.is_i64() && !n.is_u64() => {
                format!("{}", f as i64)
            }
            _ => n.to_string(),
        },
        Some(other) => other.to_string(),
    }
}

/// Whether `value` equals any member of `candidates` by string form
pub fn matches_any(value: Option<&Value>, candidates: &[Value]) -> bool {
    let actual = coerce_to_string(value);
    candidates
        .iter()
        .any(|candidate| coerce_to_string(Some(candidate)) == actual)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Wrap `value` under the segments of `path`
    fn nest(value: Value, path: &str) -> Value {
        path.rsplit('.')
            .fold(value, |inner, segment| json!({ segment: inner }))
    }

    #[test]
    fn test_resolve_nested_round_trip() {
        for value in [json!(0), json!("ok"), json!([1, 2]), json!({"x": null}), json!(false)] {
            let root = nest(value.clone(), "a.b.c");
            assert_eq!(resolve(&root, "a.b.c"), Some(&value));
        }
    }

    #[test]
    fn test_resolve_top_level_key() {
        let root = json!({"retcode": -5003, "message": "already signed"});
        assert_eq!(resolve(&root, "retcode"), Some(&json!(-5003)));
    }

    #[test]
    fn test_resolve_missing_or_non_object_intermediate() {
        assert_eq!(resolve(&json!({"a": {}}), "a.b.c"), None);
        assert_eq!(resolve(&json!({"a": {"b": 7}}), "a.b.c"), None);
        assert_eq!(resolve(&json!({"a": {"b": [1, 2]}}), "a.b.c"), None);
        assert_eq!(resolve(&json!({"a": {"b": "text"}}), "a.b.c"), None);
        assert_eq!(resolve(&json!([{"a": 1}]), "a"), None);
    }

    #[test]
    fn test_resolve_empty_inputs() {
        assert_eq!(resolve(&Value::Null, "a"), None);
        assert_eq!(resolve(&json!({"": 1}), ""), None);
    }

    #[test]
    fn test_resolve_does_not_index_arrays() {
        let root = json!({"list": [{"code": 0}]});
        assert_eq!(resolve(&root, "list.0.code"), None);
    }

    #[test]
    fn test_fallback_to_literal_dotted_key() {
        let root = json!({"data.code": 0});
        assert_eq!(resolve(&root, "data.code"), None);
        assert_eq!(resolve_with_fallback(&root, "data.code"), Some(&json!(0)));
    }

    #[test]
    fn test_nested_lookup_wins_over_literal_key() {
        let root = json!({"data": {"code": 1}, "data.code": 2});
        assert_eq!(resolve_with_fallback(&root, "data.code"), Some(&json!(1)));
    }

    #[test]
    fn test_string_coercion() {
        assert_eq!(coerce_to_string(None), "undefined");
        assert_eq!(coerce_to_string(Some(&json!(null))), "null");
        assert_eq!(coerce_to_string(Some(&json!(true))), "true");
        assert_eq!(coerce_to_string(Some(&json!(-5003))), "-5003");
        assert_eq!(coerce_to_string(Some(&json!(0.0))), "0");
        assert_eq!(coerce_to_string(Some(&json!(1.5))), "1.5");
        assert_eq!(coerce_to_string(Some(&json!("-5003"))), "-5003");
    }

    #[test]
    fn test_matching_is_string_coercive_and_order_independent() {
        let success = [json!(0), json!(-5003)];
        let reversed = [json!(-5003), json!(0)];

        for candidates in [&success[..], &reversed[..]] {
            assert!(matches_any(Some(&json!("-5003")), candidates));
            assert!(matches_any(Some(&json!(-5003)), candidates));
            assert!(matches_any(Some(&json!(0)), candidates));
            assert!(!matches_any(Some(&json!(-5004)), candidates));
            assert!(!matches_any(None, candidates));
        }
    }

    #[test]
    fn test_string_success_values_match_numbers() {
        assert!(matches_any(Some(&json!(0)), &[json!("0")]));
        assert!(matches_any(Some(&json!(true)), &[json!("true")]));
    }
}

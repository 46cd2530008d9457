//! Response Matcher: judges a response against an expected outcome.
//!
//! The status check is set membership, so `{200, 500}` tolerates either code.
//! The reasons always say which code was accepted, because a pass on a
//! tolerated 500 is still worth reading in the report.

use quill_proto::{BodyAssertion, ExpectedOutcome, HttpResponse, Predicate};
use serde_json::Value;

/// Tolerance for numeric equality in `equal_to`.
pub const EPSILON: f64 = 1e-6;

/// Verdict of [`matches`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub ok: bool,
    pub reasons: Vec<String>,
}

/// Evaluates `response` against `expected`.
///
/// All checks run even after the first failure so the reasons list is complete.
pub fn matches(response: &HttpResponse, expected: &ExpectedOutcome) -> MatchResult {
    let mut ok = true;
    let mut reasons = Vec::new();
    let status = response.status;

    if expected.accepts_status(status) {
        reasons.push(format!(
            "status {status} accepted from {}",
            expected.status_set_display()
        ));
    } else {
        ok = false;
        reasons.push(format!(
            "expected status in {}, got {status}",
            expected.status_set_display()
        ));
    }

    let (applicable, skipped): (Vec<&BodyAssertion>, Vec<&BodyAssertion>) = expected
        .body_assertions
        .iter()
        .partition(|a| a.applies_to(status));

    for assertion in skipped {
        reasons.push(format!("{assertion} not checked for status {status}"));
    }

    if applicable.is_empty() {
        return MatchResult { ok, reasons };
    }

    let document = match response.parse_json() {
        None => {
            reasons.push(format!(
                "body absent, expected {} assertions",
                applicable.len()
            ));
            return MatchResult { ok: false, reasons };
        }
        Some(Err(e)) => {
            reasons.push(format!("body is not valid JSON: {e}"));
            return MatchResult { ok: false, reasons };
        }
        Some(Ok(document)) => document,
    };

    for assertion in applicable {
        if let Err(reason) = check(&document, assertion) {
            ok = false;
            reasons.push(reason);
        }
    }

    MatchResult { ok, reasons }
}

fn check(document: &Value, assertion: &BodyAssertion) -> Result<(), String> {
    let selected = select(document, &assertion.path)?;

    let holds = match (&assertion.predicate, &selected) {
        (Predicate::Exists, Some(Value::Array(items))) if is_indefinite(&assertion.path) => {
            !items.is_empty()
        }
        (Predicate::Exists, found) => found.is_some(),
        (_, None) => {
            return Err(format!(
                "{assertion} failed: {} matched nothing",
                assertion.path
            ));
        }
        (Predicate::NotEmpty, Some(value)) => has_members(value),
        (Predicate::Empty, Some(value)) => is_empty_container(value),
        (Predicate::EqualTo(expected), Some(value)) => values_equal(value, expected),
        (Predicate::NotEqualTo(expected), Some(value)) => !values_equal(value, expected),
    };

    if holds {
        return Ok(());
    }
    Err(match selected {
        Some(actual) => format!("{assertion} failed: got {actual}"),
        None => format!("{assertion} failed: {} matched nothing", assertion.path),
    })
}

/// Selects a value from `document` by JSONPath.
///
/// A definite path yields the single node it names. An indefinite path
/// (wildcard, deep scan, filter, slice or union) always yields an array of
/// its matches, so a one-element collection is judged like a longer one. A
/// path without a leading `$` is treated as relative to the root, so `name`
/// and `$.name` are the same.
pub fn select(document: &Value, path: &str) -> Result<Option<Value>, String> {
    let path = normalize_path(path);
    let found = jsonpath_lib::select(document, &path)
        .map_err(|_| format!("invalid JSONPath '{path}'"))?;
    if is_indefinite(&path) {
        return Ok(Some(Value::Array(found.into_iter().cloned().collect())));
    }
    Ok(found.first().map(|&v| v.clone()))
}

/// True when `path` can match any number of nodes.
fn is_indefinite(path: &str) -> bool {
    if path.contains('*') || path.contains("..") {
        return true;
    }
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for c in path.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') if depth > 0 => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, '?' | ':' | ',') if depth > 0 => return true,
            _ => {}
        }
    }
    false
}

fn normalize_path(path: &str) -> String {
    let path = path.trim();
    if path.starts_with('$') {
        path.to_string()
    } else if path.starts_with('[') {
        format!("${path}")
    } else {
        format!("$.{path}")
    }
}

fn has_members(value: &Value) -> bool {
    match value {
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        _ => false,
    }
}

fn is_empty_container(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Deep equality. Two integers must match exactly; a pair involving a
/// float is compared within [`EPSILON`].
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                return x == y;
            }
            if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
                return x == y;
            }
            if (x.is_u64() || x.is_i64()) && (y.is_u64() || y.is_i64()) {
                // One side is above i64::MAX and the other is negative.
                return false;
            }
            match (x.as_f64(), y.as_f64()) {
                (Some(x), Some(y)) => (x - y).abs() <= EPSILON,
                _ => x == y,
            }
        }
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(status: u16, body: Value) -> HttpResponse {
        HttpResponse::json(status, &body)
    }

    #[test]
    fn test_status_set_membership() {
        let expected = ExpectedOutcome::status([200, 500]);
        for (status, ok) in [(200, true), (500, true), (404, false), (201, false)] {
            let result = matches(&HttpResponse::new(status), &expected);
            assert_eq!(result.ok, ok, "status {status}");
        }
    }

    #[test]
    fn test_reason_names_accepted_code() {
        let expected = ExpectedOutcome::status([200, 500]);
        let result = matches(&HttpResponse::new(500), &expected);
        assert!(result.ok);
        assert_eq!(result.reasons, vec!["status 500 accepted from {200, 500}"]);
    }

    #[test]
    fn test_singleton_mismatch_cites_both_codes() {
        let expected = ExpectedOutcome::status([200]);
        let result = matches(&HttpResponse::new(404), &expected);
        assert!(!result.ok);
        assert_eq!(result.reasons, vec!["expected status in {200}, got 404"]);
    }

    #[test]
    fn test_not_empty_on_arrays_and_objects() {
        let expected =
            ExpectedOutcome::status([200]).with_assertion(BodyAssertion::new("$", Predicate::NotEmpty));

        assert!(matches(&response(200, json!([{"id": 1}])), &expected).ok);
        assert!(matches(&response(200, json!({"id": 1})), &expected).ok);
        assert!(!matches(&response(200, json!([])), &expected).ok);
        assert!(!matches(&response(200, json!("text")), &expected).ok);
    }

    #[test]
    fn test_body_absent_is_distinct_reason() {
        let expected = ExpectedOutcome::status([200])
            .with_assertion(BodyAssertion::new("$.name", Predicate::Exists))
            .with_assertion(BodyAssertion::new("$.author", Predicate::Exists));
        let result = matches(&HttpResponse::new(200), &expected);
        assert!(!result.ok);
        assert!(
            result
                .reasons
                .contains(&"body absent, expected 2 assertions".to_string())
        );
    }

    #[test]
    fn test_price_equality_absorbs_float_formatting() {
        let expected = ExpectedOutcome::status([200]).with_assertion(BodyAssertion::new(
            "$.price",
            Predicate::EqualTo(json!(42.5)),
        ));
        let body = r#"{"price": 42.50000001}"#;
        let result = matches(&HttpResponse::new(200).with_body(body), &expected);
        assert!(result.ok, "{:?}", result.reasons);

        let off = r#"{"price": 42.51}"#;
        assert!(!matches(&HttpResponse::new(200).with_body(off), &expected).ok);
    }

    #[test]
    fn test_equal_to_is_deep() {
        assert!(values_equal(
            &json!({"a": [1, 2.0, {"b": "c"}]}),
            &json!({"a": [1.0, 2, {"b": "c"}]})
        ));
        assert!(!values_equal(&json!({"a": 1}), &json!({"a": 1, "b": 2})));
        assert!(!values_equal(&json!("1"), &json!(1)));
    }

    #[test]
    fn test_large_integer_ids_compare_exactly() {
        assert!(!values_equal(
            &json!(9_007_199_254_740_993_u64),
            &json!(9_007_199_254_740_992_u64)
        ));
        assert!(!values_equal(
            &json!(1_234_567_890_123_456_789_i64),
            &json!(1_234_567_890_123_456_700_i64)
        ));
        assert!(values_equal(
            &json!(9_007_199_254_740_993_u64),
            &json!(9_007_199_254_740_993_u64)
        ));
        assert!(!values_equal(&json!(u64::MAX), &json!(-1)));
        assert!(values_equal(&json!(7), &json!(7.0)));
    }

    #[test]
    fn test_wildcard_judges_one_and_many_alike() {
        let expected = ExpectedOutcome::status([200])
            .with_assertion(BodyAssertion::new("$[*].id", Predicate::NotEmpty));
        let one = matches(&response(200, json!([{"id": 1}])), &expected);
        assert!(one.ok, "{:?}", one.reasons);
        let two = matches(&response(200, json!([{"id": 1}, {"id": 2}])), &expected);
        assert!(two.ok, "{:?}", two.reasons);
        assert!(!matches(&response(200, json!([])), &expected).ok);
    }

    #[test]
    fn test_wildcard_exists_needs_a_match() {
        let expected = ExpectedOutcome::status([200])
            .with_assertion(BodyAssertion::new("$[*].id", Predicate::Exists));
        assert!(matches(&response(200, json!([{"id": 1}])), &expected).ok);
        assert!(!matches(&response(200, json!([{"name": "X"}])), &expected).ok);
    }

    #[test]
    fn test_wildcard_equal_to_a_one_element_list() {
        let expected = ExpectedOutcome::status([200]).with_assertion(BodyAssertion::new(
            "$[*].name",
            Predicate::EqualTo(json!(["X"])),
        ));
        let result = matches(&response(200, json!([{"name": "X"}])), &expected);
        assert!(result.ok, "{:?}", result.reasons);
    }

    #[test]
    fn test_indefinite_paths() {
        for path in ["$[*].id", "$..id", "$[?(@.id > 1)]", "$[0:2]", "$[0,1]", "$.*"] {
            assert!(is_indefinite(path), "{path}");
        }
        for path in ["$", "$.name", "$[0].id", "$['a,b']", "$.books[2].author"] {
            assert!(!is_indefinite(path), "{path}");
        }
    }

    #[test]
    fn test_relative_path_is_rooted() {
        let expected = ExpectedOutcome::status([200])
            .with_assertion(BodyAssertion::new("name", Predicate::EqualTo(json!("X"))));
        assert!(matches(&response(200, json!({"name": "X"})), &expected).ok);
    }

    #[test]
    fn test_missing_path_fails() {
        let expected = ExpectedOutcome::status([200]).with_assertion(BodyAssertion::new(
            "$.name",
            Predicate::NotEqualTo(json!("X")),
        ));
        let result = matches(&response(200, json!({"author": "Y"})), &expected);
        assert!(!result.ok);
        assert!(result.reasons.iter().any(|r| r.contains("matched nothing")));
    }

    #[test]
    fn test_conditional_assertion_skipped_for_other_status() {
        let expected = ExpectedOutcome::status([200, 201]).with_assertion(
            BodyAssertion::new("$.name", Predicate::EqualTo(json!("X"))).when_status([201]),
        );

        // A 200 with no body passes: the only assertion does not apply.
        let result = matches(&HttpResponse::new(200), &expected);
        assert!(result.ok, "{:?}", result.reasons);

        let result = matches(&response(201, json!({"name": "Z"})), &expected);
        assert!(!result.ok);
    }

    #[test]
    fn test_repeated_match_is_stable() {
        let expected =
            ExpectedOutcome::status([200]).with_assertion(BodyAssertion::new("$", Predicate::NotEmpty));
        let resp = response(200, json!([{"id": 1}]));
        assert_eq!(matches(&resp, &expected), matches(&resp, &expected));
    }

    #[test]
    fn test_select_multiple_matches_as_array() {
        let doc = json!([{"id": 1}, {"id": 2}]);
        assert_eq!(select(&doc, "$[*].id").unwrap(), Some(json!([1, 2])));
        assert_eq!(select(&json!([{"id": 1}]), "$[*].id").unwrap(), Some(json!([1])));
        assert_eq!(select(&doc, "$[0].id").unwrap(), Some(json!(1)));
        assert_eq!(select(&doc, "$[5].id").unwrap(), None);
    }
}

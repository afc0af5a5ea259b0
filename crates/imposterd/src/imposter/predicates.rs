//! Predicate matching logic for wire-compatible stub matching.
//!
//! Predicates arrive as loosely typed JSON (`serde_json::Value`): each node is
//! an object carrying exactly one operator key (`equals`, `deepEquals`,
//! `contains`, `startsWith`, `endsWith`, `matches`, `exists`, `not`, `or`,
//! `and`, `inject`) plus optional sibling options (`caseSensitive`,
//! `keyCaseSensitive`, `except`, `jsonpath`, `xpath`). There is no
//! intermediate AST: nodes are interpreted directly off the JSON tree, which
//! keeps stub-insert-time validation (see `scripting::stub_validator`) and
//! matcher-time evaluation reading the same shape.

use crate::behaviors::{extract_jsonpath, extract_xpath};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::warn;

/// Check if a stub matches a request based on its predicates (implicit AND).
#[allow(clippy::too_many_arguments)]
pub fn stub_matches(
    predicates: &[Value],
    method: &str,
    path: &str,
    query: Option<&str>,
    headers: &HashMap<String, String>,
    body: Option<&str>,
    request_from: Option<&str>,
    client_ip: Option<&str>,
    form: Option<&HashMap<String, String>>,
) -> bool {
    predicates.iter().all(|predicate| {
        predicate_matches(
            predicate,
            method,
            path,
            query,
            headers,
            body,
            request_from,
            client_ip,
            form,
        )
    })
}

/// Parse query string for predicate matching, URL-decoding both keys and values
pub fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    query.map_or_else(HashMap::new, parse_query_string)
}

/// Check if a single predicate node matches a request.
#[allow(clippy::too_many_arguments)]
pub fn predicate_matches(
    predicate: &Value,
    method: &str,
    path: &str,
    query: Option<&str>,
    headers: &HashMap<String, String>,
    body: Option<&str>,
    request_from: Option<&str>,
    client_ip: Option<&str>,
    form: Option<&HashMap<String, String>>,
) -> bool {
    let Some(obj) = predicate.as_object() else {
        return false;
    };

    // Logical combinators short-circuit before operator/selector handling.
    if let Some(inner) = obj.get("not") {
        return !predicate_matches(
            inner,
            method,
            path,
            query,
            headers,
            body,
            request_from,
            client_ip,
            form,
        );
    }
    if let Some(Value::Array(children)) = obj.get("or") {
        return children.iter().any(|child| {
            predicate_matches(
                child,
                method,
                path,
                query,
                headers,
                body,
                request_from,
                client_ip,
                form,
            )
        });
    }
    if let Some(Value::Array(children)) = obj.get("and") {
        return children.iter().all(|child| {
            predicate_matches(
                child,
                method,
                path,
                query,
                headers,
                body,
                request_from,
                client_ip,
                form,
            )
        });
    }

    let case_sensitive = obj.get("caseSensitive").and_then(Value::as_bool).unwrap_or(false);
    let key_case_sensitive = obj
        .get("keyCaseSensitive")
        .and_then(Value::as_bool)
        .unwrap_or(case_sensitive);
    let except_pattern = obj.get("except").and_then(Value::as_str).filter(|s| !s.is_empty());

    let apply_except = |value: &str| -> String {
        if let Some(pattern) = except_pattern {
            if let Ok(re) = regex::Regex::new(pattern) {
                return re.replace_all(value, "").to_string();
            }
        }
        value.to_string()
    };

    let str_equals = |expected: &str, actual: &str| -> bool {
        if case_sensitive {
            expected == actual
        } else {
            expected.eq_ignore_ascii_case(actual)
        }
    };
    let str_contains = |haystack: &str, needle: &str| -> bool {
        if case_sensitive {
            haystack.contains(needle)
        } else {
            haystack.to_lowercase().contains(&needle.to_lowercase())
        }
    };
    let str_starts_with = |haystack: &str, needle: &str| -> bool {
        if case_sensitive {
            haystack.starts_with(needle)
        } else {
            haystack.to_lowercase().starts_with(&needle.to_lowercase())
        }
    };
    let str_ends_with = |haystack: &str, needle: &str| -> bool {
        if case_sensitive {
            haystack.ends_with(needle)
        } else {
            haystack.to_lowercase().ends_with(&needle.to_lowercase())
        }
    };

    let query_map = parse_query(query);
    let body_str = body.unwrap_or("");

    // A jsonpath/xpath selector on the predicate node substitutes the
    // extracted scalar as the effective body before the operator runs.
    // Selector failures fail the predicate closed, not the request.
    let extracted_body: String;
    let effective_body: &str = match selector_of(obj) {
        Some(Selector::JsonPath(selector)) => match extract_jsonpath(body_str, &selector) {
            Some(v) => {
                extracted_body = v;
                &extracted_body
            }
            None => return false,
        },
        Some(Selector::XPath { selector, ns }) => {
            if ns.is_some() {
                warn!("XPath namespace bindings are not yet supported; ignoring ns map");
            }
            match extract_xpath(body_str, &selector) {
                Some(v) => {
                    extracted_body = v;
                    &extracted_body
                }
                None => return false,
            }
        }
        None => body_str,
    };

    if let Some(Value::Object(fields)) = obj.get("equals") {
        return check_fields(
            fields, method, path, &query_map, headers, effective_body, &apply_except, str_equals,
            false, request_from, client_ip, form, key_case_sensitive, case_sensitive,
        );
    }
    if let Some(Value::Object(fields)) = obj.get("deepEquals") {
        return check_fields(
            fields, method, path, &query_map, headers, effective_body, &apply_except, str_equals,
            true, request_from, client_ip, form, key_case_sensitive, case_sensitive,
        );
    }
    if let Some(Value::Object(fields)) = obj.get("contains") {
        return check_fields(
            fields, method, path, &query_map, headers, effective_body, &apply_except,
            |expected, actual| str_contains(actual, expected),
            false, request_from, client_ip, form, key_case_sensitive, case_sensitive,
        );
    }
    if let Some(Value::Object(fields)) = obj.get("startsWith") {
        return check_fields(
            fields, method, path, &query_map, headers, effective_body, &apply_except,
            |expected, actual| str_starts_with(actual, expected),
            false, request_from, client_ip, form, key_case_sensitive, case_sensitive,
        );
    }
    if let Some(Value::Object(fields)) = obj.get("endsWith") {
        return check_fields(
            fields, method, path, &query_map, headers, effective_body, &apply_except,
            |expected, actual| str_ends_with(actual, expected),
            false, request_from, client_ip, form, key_case_sensitive, case_sensitive,
        );
    }
    if let Some(Value::Object(fields)) = obj.get("matches") {
        return check_fields_regex(
            fields, method, path, &query_map, headers, effective_body, &apply_except,
            case_sensitive, request_from, client_ip, form, key_case_sensitive,
        );
    }
    if let Some(Value::Object(fields)) = obj.get("exists") {
        return check_exists(fields, &query_map, headers, effective_body, form);
    }
    if let Some(script) = obj.get("inject").and_then(Value::as_str) {
        return evaluate_inject_predicate(script, method, path, &query_map, headers, effective_body);
    }

    // Unrecognized or malformed node: fail closed rather than match everything.
    false
}

enum Selector {
    JsonPath(String),
    XPath {
        selector: String,
        ns: Option<Map<String, Value>>,
    },
}

fn selector_of(obj: &Map<String, Value>) -> Option<Selector> {
    match obj.get("jsonpath") {
        Some(Value::String(s)) => return Some(Selector::JsonPath(s.clone())),
        Some(Value::Object(o)) => {
            if let Some(Value::String(s)) = o.get("selector") {
                return Some(Selector::JsonPath(s.clone()));
            }
        }
        _ => {}
    }
    match obj.get("xpath") {
        Some(Value::String(s)) => {
            return Some(Selector::XPath {
                selector: s.clone(),
                ns: None,
            })
        }
        Some(Value::Object(o)) => {
            if let Some(Value::String(s)) = o.get("selector") {
                let ns = o.get("ns").and_then(Value::as_object).cloned();
                return Some(Selector::XPath {
                    selector: s.clone(),
                    ns,
                });
            }
        }
        _ => {}
    }
    None
}

/// Evaluate `exists` where expected is `false` for a scalar that came back
/// as an empty string (vs. an empty-but-present body/except transform).
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

/// `equals` containment semantics: expected object keys must be present in
/// actual with matching values (extra actual keys ignored); arrays match
/// element-wise; a scalar expected against an array actual compares against
/// the first element.
fn json_contains(expected: &Value, actual: &Value, case_sensitive: bool) -> bool {
    match expected {
        Value::Object(exp) => {
            let Value::Object(act) = actual else {
                return false;
            };
            exp.iter()
                .all(|(k, ev)| act.get(k).is_some_and(|av| json_contains(ev, av, case_sensitive)))
        }
        Value::Array(exp) => {
            let Value::Array(act) = actual else {
                return false;
            };
            exp.len() == act.len()
                && exp
                    .iter()
                    .zip(act.iter())
                    .all(|(e, a)| json_contains(e, a, case_sensitive))
        }
        _ => {
            let actual = match actual {
                Value::Array(arr) => arr.first().unwrap_or(&Value::Null),
                other => other,
            };
            match (scalar_string(expected), scalar_string(actual)) {
                (Some(e), Some(a)) => {
                    if case_sensitive {
                        e == a
                    } else {
                        e.eq_ignore_ascii_case(&a)
                    }
                }
                _ => false,
            }
        }
    }
}

/// `deepEquals` structural equality: same key set, same array length, recursive.
fn json_deep_equals(expected: &Value, actual: &Value, case_sensitive: bool) -> bool {
    match (expected, actual) {
        (Value::Object(e), Value::Object(a)) => {
            e.len() == a.len()
                && e.iter()
                    .all(|(k, ev)| a.get(k).is_some_and(|av| json_deep_equals(ev, av, case_sensitive)))
        }
        (Value::Array(e), Value::Array(a)) => {
            e.len() == a.len()
                && e.iter()
                    .zip(a.iter())
                    .all(|(x, y)| json_deep_equals(x, y, case_sensitive))
        }
        (Value::Null, Value::Null) => true,
        (Value::Bool(e), Value::Bool(a)) => e == a,
        (Value::Number(e), Value::Number(a)) => e == a,
        (Value::String(e), Value::String(a)) => {
            if case_sensitive {
                e == a
            } else {
                e.eq_ignore_ascii_case(a)
            }
        }
        _ => false,
    }
}

/// Structural body comparison for `equals`/`deepEquals` when the expected
/// body value is itself JSON (object or array). Falls back to `None` (string
/// semantics) when the actual body doesn't parse as JSON.
fn structural_body_match(expected: &Value, actual_body: &str, deep: bool, case_sensitive: bool) -> Option<bool> {
    if !matches!(expected, Value::Object(_) | Value::Array(_)) {
        return None;
    }
    let actual_json: Value = serde_json::from_str(actual_body).ok()?;
    Some(if deep {
        json_deep_equals(expected, &actual_json, case_sensitive)
    } else {
        json_contains(expected, &actual_json, case_sensitive)
    })
}

/// Check predicate fields against request values.
/// Supports: method, path, body, query, headers, requestFrom, ip, form
#[allow(clippy::too_many_arguments)]
fn check_fields<F>(
    obj: &Map<String, Value>,
    method: &str,
    path: &str,
    query: &HashMap<String, String>,
    headers: &HashMap<String, String>,
    body: &str,
    apply_except: &impl Fn(&str) -> String,
    compare: F,
    deep_equals: bool,
    request_from: Option<&str>,
    client_ip: Option<&str>,
    form: Option<&HashMap<String, String>>,
    key_case_sensitive: bool,
    case_sensitive: bool,
) -> bool
where
    F: Fn(&str, &str) -> bool,
{
    let key_matches = |expected_key: &str, actual_key: &str| -> bool {
        if key_case_sensitive {
            expected_key == actual_key
        } else {
            expected_key.eq_ignore_ascii_case(actual_key)
        }
    };

    if let Some(expected) = obj.get("method").and_then(Value::as_str) {
        if !compare(expected, method) {
            return false;
        }
    }

    if let Some(expected) = obj.get("path").and_then(Value::as_str) {
        let actual = apply_except(path);
        if !compare(expected, &actual) {
            return false;
        }
    }

    if let Some(expected) = obj.get("body") {
        // `equals`/`deepEquals` against a structured expected value parse
        // the actual body as JSON and compare structurally; everything else
        // (including a non-JSON actual body) falls back to string compare.
        match structural_body_match(expected, body, deep_equals, case_sensitive) {
            Some(result) => {
                if !result {
                    return false;
                }
            }
            None => {
                let expected_str = match expected {
                    Value::String(s) => s.clone(),
                    _ => expected.to_string(),
                };
                let actual = apply_except(body);
                if !compare(&expected_str, &actual) {
                    return false;
                }
            }
        }
    }

    if let Some(expected) = obj.get("requestFrom").and_then(Value::as_str) {
        let actual = apply_except(request_from.unwrap_or(""));
        if !compare(expected, &actual) {
            return false;
        }
    }

    if let Some(expected) = obj.get("ip").and_then(Value::as_str) {
        let actual = apply_except(client_ip.unwrap_or(""));
        if !compare(expected, &actual) {
            return false;
        }
    }

    if let Some(expected_obj) = obj.get("form").and_then(Value::as_object) {
        let actual_form = form.cloned().unwrap_or_default();
        if deep_equals && expected_obj.len() != actual_form.len() {
            return false;
        }
        for (key, expected_val) in expected_obj {
            let expected_str = match expected_val {
                Value::String(s) => s.clone(),
                _ => expected_val.to_string(),
            };
            let actual = actual_form.iter().find(|(k, _)| key_matches(key, k)).map(|(_, v)| v.as_str());
            match actual {
                Some(actual) => {
                    let actual = apply_except(actual);
                    if !compare(&expected_str, &actual) {
                        return false;
                    }
                }
                None => return false,
            }
        }
    }

    if let Some(expected_obj) = obj.get("query").and_then(Value::as_object) {
        if deep_equals && expected_obj.len() != query.len() {
            return false;
        }
        for (key, expected_val) in expected_obj {
            let expected_str = match expected_val {
                Value::String(s) => s.clone(),
                _ => expected_val.to_string(),
            };
            let actual = query.iter().find(|(k, _)| key_matches(key, k)).map(|(_, v)| v.as_str());
            match actual {
                Some(actual) => {
                    let actual = apply_except(actual);
                    if !compare(&expected_str, &actual) {
                        return false;
                    }
                }
                None => return false,
            }
        }
    }

    if let Some(expected_obj) = obj.get("headers").and_then(Value::as_object) {
        if deep_equals && expected_obj.len() != headers.len() {
            return false;
        }
        for (key, expected_val) in expected_obj {
            let expected_str = match expected_val {
                Value::String(s) => s.clone(),
                _ => expected_val.to_string(),
            };
            let actual = headers.iter().find(|(k, _)| key_matches(key, k)).map(|(_, v)| v.as_str());
            match actual {
                Some(actual) => {
                    let actual = apply_except(actual);
                    if !compare(&expected_str, &actual) {
                        return false;
                    }
                }
                None => return false,
            }
        }
    }

    true
}

/// Walk a nested regex mapping against a decoded JSON value in parallel
/// (used by `matches.body` when the predicate supplies an object instead of
/// a single pattern).
fn json_matches_nested(nested: &Map<String, Value>, actual: &Value, case_sensitive: bool) -> bool {
    let Value::Object(actual_obj) = actual else {
        return false;
    };
    nested.iter().all(|(key, expected)| {
        let Some(actual_val) = actual_obj.get(key) else {
            return false;
        };
        match expected {
            Value::Object(inner) => json_matches_nested(inner, actual_val, case_sensitive),
            Value::String(pattern) => {
                let actual_str = scalar_string(actual_val).unwrap_or_default();
                build_regex(pattern, case_sensitive).is_some_and(|re| re.is_match(&actual_str))
            }
            _ => false,
        }
    })
}

fn build_regex(pattern: &str, case_sensitive: bool) -> Option<regex::Regex> {
    if case_sensitive {
        regex::Regex::new(pattern).ok()
    } else {
        regex::RegexBuilder::new(pattern).case_insensitive(true).build().ok()
    }
}

/// Check predicate fields with regex matching.
/// Supports: method, path, body, query, headers, requestFrom, ip, form
#[allow(clippy::too_many_arguments)]
fn check_fields_regex(
    obj: &Map<String, Value>,
    method: &str,
    path: &str,
    query: &HashMap<String, String>,
    headers: &HashMap<String, String>,
    body: &str,
    apply_except: &impl Fn(&str) -> String,
    case_sensitive: bool,
    request_from: Option<&str>,
    client_ip: Option<&str>,
    form: Option<&HashMap<String, String>>,
    key_case_sensitive: bool,
) -> bool {
    let key_matches = |expected_key: &str, actual_key: &str| -> bool {
        if key_case_sensitive {
            expected_key == actual_key
        } else {
            expected_key.eq_ignore_ascii_case(actual_key)
        }
    };

    if let Some(pattern) = obj.get("method").and_then(Value::as_str) {
        if let Some(re) = build_regex(pattern, case_sensitive) {
            if !re.is_match(method) {
                return false;
            }
        }
    }

    if let Some(pattern) = obj.get("path").and_then(Value::as_str) {
        if let Some(re) = build_regex(pattern, case_sensitive) {
            let actual = apply_except(path);
            if !re.is_match(&actual) {
                return false;
            }
        }
    }

    // `matches.body` accepts a scalar regex, or a nested mapping of regexes
    // that walks the decoded JSON body in parallel.
    if let Some(body_val) = obj.get("body") {
        match body_val {
            Value::String(pattern) => {
                if let Some(re) = build_regex(pattern, case_sensitive) {
                    let actual = apply_except(body);
                    if !re.is_match(&actual) {
                        return false;
                    }
                }
            }
            Value::Object(nested) => match serde_json::from_str::<Value>(body) {
                Ok(actual_json) => {
                    if !json_matches_nested(nested, &actual_json, case_sensitive) {
                        return false;
                    }
                }
                Err(_) => return false,
            },
            _ => {}
        }
    }

    if let Some(pattern) = obj.get("requestFrom").and_then(Value::as_str) {
        if let Some(re) = build_regex(pattern, case_sensitive) {
            let actual = apply_except(request_from.unwrap_or(""));
            if !re.is_match(&actual) {
                return false;
            }
        }
    }

    if let Some(pattern) = obj.get("ip").and_then(Value::as_str) {
        if let Some(re) = build_regex(pattern, case_sensitive) {
            let actual = apply_except(client_ip.unwrap_or(""));
            if !re.is_match(&actual) {
                return false;
            }
        }
    }

    if let Some(expected_form) = obj.get("form").and_then(Value::as_object) {
        let actual_form = form.cloned().unwrap_or_default();
        for (key, pattern_val) in expected_form {
            let Value::String(pattern) = pattern_val else {
                continue;
            };
            let Some(re) = build_regex(pattern, case_sensitive) else {
                continue;
            };
            let actual = actual_form.iter().find(|(k, _)| key_matches(key, k)).map(|(_, v)| v.as_str());
            match actual {
                Some(actual) => {
                    let actual = apply_except(actual);
                    if !re.is_match(&actual) {
                        return false;
                    }
                }
                None => return false,
            }
        }
    }

    if let Some(expected_query) = obj.get("query").and_then(Value::as_object) {
        for (key, pattern_val) in expected_query {
            let Value::String(pattern) = pattern_val else {
                continue;
            };
            let Some(re) = build_regex(pattern, case_sensitive) else {
                continue;
            };
            let actual = query.iter().find(|(k, _)| key_matches(key, k)).map(|(_, v)| v.as_str());
            match actual {
                Some(actual) => {
                    let actual = apply_except(actual);
                    if !re.is_match(&actual) {
                        return false;
                    }
                }
                None => return false,
            }
        }
    }

    if let Some(expected_headers) = obj.get("headers").and_then(Value::as_object) {
        for (key, pattern_val) in expected_headers {
            let Value::String(pattern) = pattern_val else {
                continue;
            };
            let Some(re) = build_regex(pattern, case_sensitive) else {
                continue;
            };
            let actual = headers.iter().find(|(k, _)| key_matches(key, k)).map(|(_, v)| v.as_str());
            match actual {
                Some(actual) => {
                    let actual = apply_except(actual);
                    if !re.is_match(&actual) {
                        return false;
                    }
                }
                None => return false,
            }
        }
    }

    true
}

/// Check exists predicate - verifies field presence or absence.
/// Supports: body, query, headers, form
fn check_exists(
    obj: &Map<String, Value>,
    query: &HashMap<String, String>,
    headers: &HashMap<String, String>,
    body: &str,
    form: Option<&HashMap<String, String>>,
) -> bool {
    if let Some(should_exist) = obj.get("body").and_then(Value::as_bool) {
        let exists = !body.is_empty();
        if exists != should_exist {
            return false;
        }
    }

    if let Some(expected_query) = obj.get("query").and_then(Value::as_object) {
        for (key, should_exist_val) in expected_query {
            let should_exist = should_exist_val.as_bool().unwrap_or(true);
            let exists = query.contains_key(key);
            if exists != should_exist {
                return false;
            }
        }
    }

    if let Some(expected_headers) = obj.get("headers").and_then(Value::as_object) {
        for (key, should_exist_val) in expected_headers {
            let should_exist = should_exist_val.as_bool().unwrap_or(true);
            let exists = headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(key));
            if exists != should_exist {
                return false;
            }
        }
    }

    if let Some(expected_form) = obj.get("form").and_then(Value::as_object) {
        let actual_form = form.cloned().unwrap_or_default();
        for (key, should_exist_val) in expected_form {
            let should_exist = should_exist_val.as_bool().unwrap_or(true);
            let exists = actual_form.contains_key(key);
            if exists != should_exist {
                return false;
            }
        }
    }

    true
}

/// `inject` predicate: hand the script source to the scripting bridge with
/// `request` bound; the truthy return is the verdict. Script errors
/// evaluate to false rather than aborting the request.
fn evaluate_inject_predicate(
    script: &str,
    method: &str,
    path: &str,
    query: &HashMap<String, String>,
    headers: &HashMap<String, String>,
    body: &str,
) -> bool {
    use rhai::{Dynamic, Engine, Map as RhaiMap, Scope};

    let engine = Engine::new();
    let mut scope = Scope::new();

    let mut request_map = RhaiMap::new();
    request_map.insert("method".into(), Dynamic::from(method.to_string()));
    request_map.insert("path".into(), Dynamic::from(path.to_string()));
    request_map.insert("body".into(), Dynamic::from(body.to_string()));

    let mut query_map = RhaiMap::new();
    for (k, v) in query {
        query_map.insert(k.clone().into(), Dynamic::from(v.clone()));
    }
    request_map.insert("query".into(), Dynamic::from(query_map));

    let mut headers_map = RhaiMap::new();
    for (k, v) in headers {
        headers_map.insert(k.clone().into(), Dynamic::from(v.clone()));
    }
    request_map.insert("headers".into(), Dynamic::from(headers_map));

    scope.push("request", request_map);

    match engine.eval_with_scope::<Dynamic>(&mut scope, script) {
        Ok(result) => result.as_bool().unwrap_or(false),
        Err(e) => {
            warn!("inject predicate script error: {e}");
            false
        }
    }
}

/// Parse query string into HashMap (public helper)
/// URL-decodes both keys and values to properly handle encoded characters
pub fn parse_query_string(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|s| !s.is_empty())
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let decoded_key = urlencoding::decode(key).unwrap_or_default().into_owned();
            let decoded_value = urlencoding::decode(value).unwrap_or_default().into_owned();
            Some((decoded_key, decoded_value))
        })
        .collect()
}

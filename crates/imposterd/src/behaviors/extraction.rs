//! Extraction methods: regex, JSONPath, XPath.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Method for extracting values from source
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum ExtractionMethod {
    /// Regular expression with capture groups
    Regex { selector: String },
    /// JSONPath expression
    #[serde(rename = "jsonpath")]
    JsonPath { selector: String },
    /// XPath expression for XML
    #[serde(rename = "xpath")]
    XPath { selector: String },
}

impl ExtractionMethod {
    /// Apply extraction to a value
    pub fn extract(&self, value: &str) -> Option<String> {
        match self {
            ExtractionMethod::Regex { selector } => {
                let re = Regex::new(selector).ok()?;
                if let Some(caps) = re.captures(value) {
                    // Return first capture group if exists, otherwise full match
                    caps.get(1)
                        .or_else(|| caps.get(0))
                        .map(|m| m.as_str().to_string())
                } else {
                    None
                }
            }
            ExtractionMethod::JsonPath { selector } => extract_jsonpath(value, selector),
            ExtractionMethod::XPath { selector } => extract_xpath(value, selector),
        }
    }
}

/// One step of a compiled JSONPath expression.
#[derive(Debug, Clone, PartialEq)]
enum ChildSelector {
    Name(String),
    Index(i64),
    Wildcard,
}

#[derive(Debug, Clone, PartialEq)]
enum Step {
    /// Direct child: `.name`, `["name"]`, `[0]`, `[-1]`, `.*`/`[*]`.
    Child(ChildSelector),
    /// Recursive descent: `..name`, `..*`.
    Descendant(ChildSelector),
}

/// Compile a JSONPath string into a sequence of child/descendant steps.
/// Supports `$`, dotted property access, bracketed string keys (`['k']`/`["k"]`),
/// integer indices including negatives, wildcard `*`, and recursive descent `..`.
fn compile_jsonpath(path: &str) -> Vec<Step> {
    let chars: Vec<char> = path.chars().collect();
    let mut i = 0usize;
    let len = chars.len();
    let mut steps = Vec::new();

    if i < len && chars[i] == '$' {
        i += 1;
    }

    while i < len {
        if chars[i] == '.' && i + 1 < len && chars[i + 1] == '.' {
            i += 2;
            let sel = parse_selector_at(&chars, &mut i, len);
            if let Some(sel) = sel {
                steps.push(Step::Descendant(sel));
            }
            continue;
        }

        if chars[i] == '.' {
            i += 1;
            if let Some(sel) = parse_selector_at(&chars, &mut i, len) {
                steps.push(Step::Child(sel));
            }
            continue;
        }

        if chars[i] == '[' {
            if let Some(sel) = parse_bracket(&chars, &mut i, len) {
                steps.push(Step::Child(sel));
            }
            continue;
        }

        // Bareword with no leading '.' (e.g. a path given as "user.name").
        if let Some(sel) = parse_selector_at(&chars, &mut i, len) {
            steps.push(Step::Child(sel));
            continue;
        }

        // Unrecognized character; skip it to make progress.
        i += 1;
    }

    steps
}

/// Parse a selector that is NOT bracketed: a bareword field name, `*`, or a
/// `[...]` immediately following (used right after `..`).
fn parse_selector_at(chars: &[char], i: &mut usize, len: usize) -> Option<ChildSelector> {
    if *i < len && chars[*i] == '[' {
        return parse_bracket(chars, i, len);
    }

    let start = *i;
    while *i < len && chars[*i] != '.' && chars[*i] != '[' {
        *i += 1;
    }
    if *i == start {
        return None;
    }
    let word: String = chars[start..*i].iter().collect();
    if word == "*" {
        Some(ChildSelector::Wildcard)
    } else {
        Some(ChildSelector::Name(word))
    }
}

/// Parse a `[...]` bracket selector starting at `chars[*i] == '['`.
fn parse_bracket(chars: &[char], i: &mut usize, len: usize) -> Option<ChildSelector> {
    if *i >= len || chars[*i] != '[' {
        return None;
    }
    let start = *i + 1;
    let mut end = start;
    while end < len && chars[end] != ']' {
        end += 1;
    }
    if end >= len {
        *i = len;
        return None;
    }
    let content: String = chars[start..end].iter().collect();
    *i = end + 1;

    let trimmed = content.trim();
    if trimmed == "*" {
        return Some(ChildSelector::Wildcard);
    }
    if (trimmed.starts_with('\'') && trimmed.ends_with('\'') && trimmed.len() >= 2)
        || (trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2)
    {
        return Some(ChildSelector::Name(trimmed[1..trimmed.len() - 1].to_string()));
    }
    if let Ok(idx) = trimmed.parse::<i64>() {
        return Some(ChildSelector::Index(idx));
    }
    // Bareword/unquoted key inside brackets, e.g. `[key]`.
    Some(ChildSelector::Name(trimmed.to_string()))
}

fn apply_child(values: &[serde_json::Value], sel: &ChildSelector) -> Vec<serde_json::Value> {
    let mut out = Vec::new();
    for v in values {
        match sel {
            ChildSelector::Name(name) => {
                if let Some(found) = v.get(name) {
                    out.push(found.clone());
                }
            }
            ChildSelector::Wildcard => match v {
                serde_json::Value::Object(map) => out.extend(map.values().cloned()),
                serde_json::Value::Array(arr) => out.extend(arr.iter().cloned()),
                _ => {}
            },
            ChildSelector::Index(idx) => {
                if let serde_json::Value::Array(arr) = v {
                    let len = arr.len() as i64;
                    let resolved = if *idx < 0 { len + idx } else { *idx };
                    if resolved >= 0 && (resolved as usize) < arr.len() {
                        out.push(arr[resolved as usize].clone());
                    }
                }
            }
        }
    }
    out
}

/// Recursively collect every descendant of `value` (including `value` itself)
/// matching `sel`, in document order.
fn collect_descendants(value: &serde_json::Value, sel: &ChildSelector, out: &mut Vec<serde_json::Value>) {
    out.extend(apply_child(std::slice::from_ref(value), sel));
    match value {
        serde_json::Value::Object(map) => {
            for child in map.values() {
                collect_descendants(child, sel, out);
            }
        }
        serde_json::Value::Array(arr) => {
            for child in arr {
                collect_descendants(child, sel, out);
            }
        }
        _ => {}
    }
}

fn apply_descendant(values: &[serde_json::Value], sel: &ChildSelector) -> Vec<serde_json::Value> {
    let mut out = Vec::new();
    for v in values {
        collect_descendants(v, sel, &mut out);
    }
    out
}

/// Evaluate a JSONPath expression against parsed JSON, returning every
/// matching node in document order (the sequence<string> contract of §4.1,
/// pre-stringification).
fn evaluate_jsonpath(json: &serde_json::Value, path: &str) -> Vec<serde_json::Value> {
    let steps = compile_jsonpath(path);
    let mut current = vec![json.clone()];
    for step in &steps {
        current = match step {
            Step::Child(sel) => apply_child(&current, sel),
            Step::Descendant(sel) => apply_descendant(&current, sel),
        };
        if current.is_empty() {
            break;
        }
    }
    current
}

fn stringify_jsonpath_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Extract every match of a JSONPath expression as strings (the full
/// `sequence<string>` contract of §4.1). Non-JSON input or a compile/eval
/// failure that matches nothing yields an empty sequence.
pub fn extract_jsonpath_all(json_str: &str, path: &str) -> Vec<String> {
    let Ok(json) = serde_json::from_str::<serde_json::Value>(json_str) else {
        return Vec::new();
    };
    evaluate_jsonpath(&json, path)
        .iter()
        .map(stringify_jsonpath_value)
        .collect()
}

/// Extract value(s) using JSONPath. Used by copy/lookup behaviors and the
/// predicate `jsonpath` selector, all of which consume a single scalar:
/// multiple matches are joined with commas per §4.1; no match is a fail-closed
/// `None`.
pub fn extract_jsonpath(json_str: &str, path: &str) -> Option<String> {
    let matches = extract_jsonpath_all(json_str, path);
    if matches.is_empty() {
        None
    } else {
        Some(matches.join(","))
    }
}

/// Extract value using XPath
/// Used by copy behaviors and predicate xpath parameter
pub fn extract_xpath(xml_str: &str, path: &str) -> Option<String> {
    use sxd_document::parser;
    use sxd_xpath::{evaluate_xpath, Value};

    let package = parser::parse(xml_str).ok()?;
    let document = package.as_document();

    match evaluate_xpath(&document, path) {
        Ok(Value::String(s)) => Some(s),
        Ok(Value::Number(n)) => Some(n.to_string()),
        Ok(Value::Boolean(b)) => Some(b.to_string()),
        Ok(Value::Nodeset(nodes)) => nodes.iter().next().map(|n| n.string_value()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_regex() {
        let method = ExtractionMethod::Regex {
            selector: r"/users/(\d+)".to_string(),
        };
        assert_eq!(method.extract("/users/123"), Some("123".to_string()));
        assert_eq!(method.extract("/posts/456"), None);
    }

    #[test]
    fn test_extraction_regex_full_match() {
        let method = ExtractionMethod::Regex {
            selector: r".*".to_string(),
        };
        assert_eq!(
            method.extract("hello world"),
            Some("hello world".to_string())
        );
    }

    #[test]
    fn test_extraction_jsonpath() {
        let method = ExtractionMethod::JsonPath {
            selector: "$.user.name".to_string(),
        };
        let json = r#"{"user": {"name": "Alice", "age": 30}}"#;
        assert_eq!(method.extract(json), Some("Alice".to_string()));
    }

    #[test]
    fn test_extraction_jsonpath_array() {
        let method = ExtractionMethod::JsonPath {
            selector: "$.items[0]".to_string(),
        };
        let json = r#"{"items": ["first", "second"]}"#;
        assert_eq!(method.extract(json), Some("first".to_string()));
    }

    #[test]
    fn test_jsonpath_negative_index() {
        let json = r#"{"items": ["first", "second", "third"]}"#;
        assert_eq!(
            extract_jsonpath(json, "$.items[-1]"),
            Some("third".to_string())
        );
    }

    #[test]
    fn test_jsonpath_bracketed_string_key() {
        let json = r#"{"user": {"name": "Alice"}}"#;
        assert_eq!(
            extract_jsonpath(json, "$['user']['name']"),
            Some("Alice".to_string())
        );
        assert_eq!(
            extract_jsonpath(json, "$[\"user\"][\"name\"]"),
            Some("Alice".to_string())
        );
    }

    #[test]
    fn test_jsonpath_wildcard() {
        let json = r#"{"a": 1, "b": 2, "c": 3}"#;
        let mut values = extract_jsonpath_all(json, "$.*");
        values.sort();
        assert_eq!(values, vec!["1", "2", "3"]);

        let json_arr = r#"["x", "y", "z"]"#;
        assert_eq!(extract_jsonpath_all(json_arr, "$[*]"), vec!["x", "y", "z"]);
    }

    #[test]
    fn test_jsonpath_recursive_descent() {
        let json = r#"{"a": {"name": "inner"}, "name": "outer", "b": {"c": {"name": "deep"}}}"#;
        let mut values = extract_jsonpath_all(json, "$..name");
        values.sort();
        assert_eq!(values, vec!["deep", "inner", "outer"]);
    }

    #[test]
    fn test_jsonpath_multiple_matches_join_with_commas_for_scalar_callers() {
        let json = r#"{"a": {"name": "inner"}, "name": "outer"}"#;
        let joined = extract_jsonpath(json, "$..name").unwrap();
        let mut parts: Vec<&str> = joined.split(',').collect();
        parts.sort();
        assert_eq!(parts, vec!["inner", "outer"]);
    }

    #[test]
    fn test_jsonpath_no_match_is_empty_sequence() {
        let json = r#"{"a": 1}"#;
        assert!(extract_jsonpath_all(json, "$.missing").is_empty());
        assert_eq!(extract_jsonpath(json, "$.missing"), None);
    }

    #[test]
    fn test_jsonpath_malformed_json_fails_closed() {
        assert!(extract_jsonpath_all("not json", "$.a").is_empty());
        assert_eq!(extract_jsonpath("not json", "$.a"), None);
    }
}

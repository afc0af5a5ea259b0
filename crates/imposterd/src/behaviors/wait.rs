//! Wait behavior - add latency before response.

use serde::{Deserialize, Serialize};

/// Wait behavior - add latency before response.
///
/// Per the wire contract, the value may be a (non-negative) integer, a
/// numeric string, or a script source that must evaluate to a number.
/// Negative values - whether a literal integer or a script/numeric-string
/// result - are a `wait-invalid` client error, not silently clamped.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum WaitBehavior {
    /// Fixed delay in milliseconds (signed so a negative literal is
    /// representable and can be rejected rather than failing to parse).
    Fixed(i64),
    /// Random delay within range
    Range {
        #[serde(rename = "min")]
        min_ms: u64,
        #[serde(rename = "max")]
        max_ms: u64,
    },
    /// Numeric string or function-expression string that computes the delay
    Function(String),
}

impl WaitBehavior {
    /// Resolve the wait duration in milliseconds, rejecting negative results
    /// with a `wait-invalid` description (spec §4.4, §7).
    pub fn resolve_ms(&self) -> Result<u64, String> {
        match self {
            WaitBehavior::Fixed(ms) => {
                if *ms < 0 {
                    Err(format!("wait behavior produced a negative delay: {ms}"))
                } else {
                    Ok(*ms as u64)
                }
            }
            WaitBehavior::Range { min_ms, max_ms } => {
                use rand::Rng;
                Ok(rand::thread_rng().gen_range(*min_ms..=*max_ms))
            }
            WaitBehavior::Function(func_src) => {
                let trimmed = func_src.trim();
                if let Ok(n) = trimmed.parse::<i64>() {
                    return if n < 0 {
                        Err(format!("wait behavior produced a negative delay: {n}"))
                    } else {
                        Ok(n as u64)
                    };
                }
                match Self::execute_wait_function(trimmed) {
                    Some(ms) => Ok(ms),
                    None => Err(format!(
                        "wait behavior script did not return a numeric value: {trimmed}"
                    )),
                }
            }
        }
    }

    /// Evaluate a function-expression wait body.
    fn execute_wait_function(js_func: &str) -> Option<u64> {
        // Extract the function body
        let trimmed = js_func.trim();
        if !trimmed.starts_with("function") {
            return None;
        }

        // Parse simple patterns:
        // Math.floor(Math.random() * N) + M -> random between M and M+N
        if let Some(body) = extract_function_body(trimmed) {
            // Look for patterns like "Math.floor(Math.random() * 100) + 50"
            // or "return Math.floor(Math.random() * 100) + 50;"
            let body = body
                .replace("return ", "")
                .trim_end_matches(';')
                .to_string();

            // Parse: Math.floor(Math.random() * N) + M
            if body.contains("Math.random()") {
                use rand::Rng;
                // Extract multiplier and offset using regex
                let re = regex::Regex::new(
                    r"Math\.floor\s*\(\s*Math\.random\s*\(\s*\)\s*\*\s*(\d+)\s*\)\s*\+\s*(\d+)",
                )
                .ok()?;

                if let Some(caps) = re.captures(&body) {
                    let range = caps.get(1)?.as_str().parse::<u64>().ok()?;
                    let offset = caps.get(2)?.as_str().parse::<u64>().ok()?;
                    return Some(rand::thread_rng().gen_range(offset..=offset + range));
                }

                // Simpler pattern: Math.random() * N
                let re = regex::Regex::new(r"Math\.random\s*\(\s*\)\s*\*\s*(\d+)").ok()?;
                if let Some(caps) = re.captures(&body) {
                    let range = caps.get(1)?.as_str().parse::<u64>().ok()?;
                    return Some(rand::thread_rng().gen_range(0..=range));
                }
            }

            // Try to parse as simple number
            body.trim().parse::<u64>().ok()
        } else {
            None
        }
    }
}

/// Extract function body from a function-expression string
fn extract_function_body(js_func: &str) -> Option<String> {
    let start = js_func.find('{')?;
    let end = js_func.rfind('}')?;
    if start < end {
        Some(js_func[start + 1..end].trim().to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_behavior_fixed() {
        let wait = WaitBehavior::Fixed(100);
        assert_eq!(wait.resolve_ms().unwrap(), 100);
    }

    #[test]
    fn test_wait_behavior_range() {
        let wait = WaitBehavior::Range {
            min_ms: 100,
            max_ms: 200,
        };
        for _ in 0..10 {
            let duration = wait.resolve_ms().unwrap();
            assert!((100..=200).contains(&duration));
        }
    }

    #[test]
    fn test_wait_behavior_negative_fixed_is_invalid() {
        let wait = WaitBehavior::Fixed(-5);
        assert!(wait.resolve_ms().is_err());
    }

    #[test]
    fn test_wait_behavior_numeric_string() {
        let wait = WaitBehavior::Function("250".to_string());
        assert_eq!(wait.resolve_ms().unwrap(), 250);
    }

    #[test]
    fn test_wait_behavior_negative_numeric_string_is_invalid() {
        let wait = WaitBehavior::Function("-10".to_string());
        assert!(wait.resolve_ms().is_err());
    }

    #[test]
    fn test_wait_behavior_serde() {
        let yaml = "100";
        let wait: WaitBehavior = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(wait, WaitBehavior::Fixed(100)));

        let yaml = "min: 100\nmax: 200";
        let wait: WaitBehavior = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            wait,
            WaitBehavior::Range {
                min_ms: 100,
                max_ms: 200
            }
        ));
    }
}

//! Lookup behavior - query external data sources.

use super::copy::CopySource;
use super::extraction::ExtractionMethod;
use super::request::RequestContext;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

/// Lookup behavior - query external data source
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LookupBehavior {
    /// Key extraction from request
    pub key: LookupKey,
    /// Data source configuration
    #[serde(rename = "fromDataSource")]
    pub from_data_source: DataSource,
    /// Token to replace in response (e.g., "${RESULT}")
    pub into: String,
}

/// Key extraction configuration for lookup
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LookupKey {
    /// Request field to extract key from
    pub from: CopySource,
    /// Extraction method
    #[serde(rename = "using")]
    pub extraction: ExtractionMethod,
}

/// External data source configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DataSource {
    /// CSV data source
    pub csv: CsvDataSource,
}

/// CSV data source configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CsvDataSource {
    /// Path to CSV file
    pub path: String,
    /// Column to use as lookup key
    #[serde(rename = "keyColumn")]
    pub key_column: String,
    /// Delimiter character (default: ',')
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

fn default_delimiter() -> char {
    ','
}

/// CSV data cache for performance
pub struct CsvCache {
    data: RwLock<HashMap<String, Arc<CsvData>>>,
}

impl Default for CsvCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvCache {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }

    /// Get or load CSV data
    pub fn get_or_load(&self, path: &str, delimiter: char) -> Option<Arc<CsvData>> {
        // Check cache first
        {
            let cache = self.data.read();
            if let Some(data) = cache.get(path) {
                return Some(Arc::clone(data));
            }
        }

        // Load from file
        let data = CsvData::load(path, delimiter).ok()?;
        let data = Arc::new(data);

        // Cache it
        {
            let mut cache = self.data.write();
            cache.insert(path.to_string(), Arc::clone(&data));
        }

        Some(data)
    }

    /// Clear cache
    pub fn clear(&self) {
        self.data.write().clear();
    }
}

/// Parsed CSV data
pub struct CsvData {
    /// Column headers
    headers: Vec<String>,
    /// Rows indexed by first column for fast lookup
    rows: HashMap<String, Vec<String>>,
}

impl CsvData {
    /// Load CSV from file
    pub fn load<P: AsRef<Path>>(path: P, delimiter: char) -> Result<Self, std::io::Error> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();

        // Parse header row
        let header_line = lines
            .next()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "Empty CSV"))??;
        let headers: Vec<String> = header_line
            .split(delimiter)
            .map(|s| s.trim().to_string())
            .collect();

        // Parse data rows
        let mut rows = HashMap::new();
        for line in lines {
            let line = line?;
            let values: Vec<String> = line
                .split(delimiter)
                .map(|s| s.trim().to_string())
                .collect();
            if !values.is_empty() {
                rows.insert(values[0].clone(), values);
            }
        }

        Ok(Self { headers, rows })
    }

    /// Lookup a row by key and return its columns, keyed by plain header name
    pub fn lookup(&self, key: &str, key_column: &str) -> HashMap<String, String> {
        let mut result = HashMap::new();

        // Find key column index
        let key_col_idx = self.headers.iter().position(|h| h == key_column);

        if let Some(key_idx) = key_col_idx {
            // Find row where key column matches
            for (row_key, values) in &self.rows {
                let matches = if key_idx == 0 {
                    row_key == key
                } else {
                    values.get(key_idx).map(|v| v == key).unwrap_or(false)
                };

                if matches {
                    // Return all columns keyed by their plain header name; the
                    // caller expands each into the `[col]`/`["col"]`/`['col']`
                    // token forms the wire format accepts.
                    for (i, header) in self.headers.iter().enumerate() {
                        if let Some(value) = values.get(i) {
                            result.insert(header.clone(), value.clone());
                        }
                    }
                    break;
                }
            }
        }

        result
    }
}

/// Process-wide CSV cache shared by every imposter's `lookup` behavior, so
/// repeated lookups against the same data source don't re-read the file.
static GLOBAL_CSV_CACHE: std::sync::OnceLock<CsvCache> = std::sync::OnceLock::new();

/// The shared CSV cache used by request-handling call sites. Tests that need
/// isolation should construct their own `CsvCache` and call
/// `apply_lookup_behaviors` directly instead.
pub fn global_csv_cache() -> &'static CsvCache {
    GLOBAL_CSV_CACHE.get_or_init(CsvCache::new)
}

/// Apply lookup behaviors to response body
pub fn apply_lookup_behaviors(
    body: &str,
    headers: &mut HashMap<String, String>,
    behaviors: &[LookupBehavior],
    request: &RequestContext,
    csv_cache: &CsvCache,
) -> String {
    let mut result = body.to_string();

    for behavior in behaviors {
        // Extract key from request
        let key_value = behavior
            .key
            .from
            .extract(request)
            .and_then(|v| behavior.key.extraction.extract(&v));

        if let Some(key) = key_value {
            // Load CSV data
            if let Some(csv_data) = csv_cache.get_or_load(
                &behavior.from_data_source.csv.path,
                behavior.from_data_source.csv.delimiter,
            ) {
                // Lookup row; a miss silently passes the response through (§4.4).
                let replacements = csv_data.lookup(&key, &behavior.from_data_source.csv.key_column);

                // Apply replacements: each column is substituted under all
                // three accepted token forms - `[col]`, `["col"]`, `['col']`.
                for (column, value) in replacements {
                    for token in [
                        format!("[{column}]"),
                        format!("[\"{column}\"]"),
                        format!("['{column}']"),
                    ] {
                        let full_token = format!("{}{}", behavior.into, token);
                        result = result.replace(&full_token, &value);
                        for header_value in headers.values_mut() {
                            *header_value = header_value.replace(&full_token, &value);
                        }
                    }
                }
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{contents}").unwrap();
        file
    }

    #[test]
    fn test_lookup_replaces_column_tokens_in_body_and_headers() {
        let csv = write_csv("id,name,plan\n1,Alice,gold\n2,Bob,silver\n");

        let behavior = LookupBehavior {
            key: LookupKey {
                from: CopySource::Nested(HashMap::from([(
                    "query".to_string(),
                    "userId".to_string(),
                )])),
                extraction: ExtractionMethod::Regex {
                    selector: r"(\d+)".to_string(),
                },
            },
            from_data_source: DataSource {
                csv: CsvDataSource {
                    path: csv.path().to_string_lossy().to_string(),
                    key_column: "id".to_string(),
                    delimiter: ',',
                },
            },
            into: "${row}".to_string(),
        };

        let request = RequestContext::plain(
            "GET",
            "/users",
            HashMap::from([("userId".to_string(), "1".to_string())]),
            HashMap::new(),
            None,
        );
        let mut headers = HashMap::from([(
            "X-Plan".to_string(),
            "plan=${row}[plan]".to_string(),
        )]);

        let cache = CsvCache::new();
        let body = apply_lookup_behaviors(
            r#"Hello ${row}["name"], your plan is ${row}['plan']"#,
            &mut headers,
            &[behavior],
            &request,
            &cache,
        );

        assert_eq!(body, "Hello Alice, your plan is gold");
        assert_eq!(headers.get("X-Plan").unwrap(), "plan=gold");
    }

    #[test]
    fn test_lookup_missing_row_passes_response_through_unchanged() {
        let csv = write_csv("id,name\n1,Alice\n");

        let behavior = LookupBehavior {
            key: LookupKey {
                from: CopySource::Simple("path".to_string()),
                extraction: ExtractionMethod::Regex {
                    selector: r"/users/(\d+)".to_string(),
                },
            },
            from_data_source: DataSource {
                csv: CsvDataSource {
                    path: csv.path().to_string_lossy().to_string(),
                    key_column: "id".to_string(),
                    delimiter: ',',
                },
            },
            into: "${row}".to_string(),
        };

        let request =
            RequestContext::plain("GET", "/users/999", HashMap::new(), HashMap::new(), None);
        let mut headers = HashMap::new();

        let cache = CsvCache::new();
        let body = apply_lookup_behaviors(
            "Hello ${row}[name]",
            &mut headers,
            &[behavior],
            &request,
            &cache,
        );

        assert_eq!(body, "Hello ${row}[name]");
    }
}

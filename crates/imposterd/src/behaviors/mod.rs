//! wire-compatible response behaviors.
//!
//! This module implements the `_behaviors` response-transformation pipeline,
//! allowing dynamic response modification based on request data.
//!
//! # Supported Behaviors
//!
//! - `wait` - Add latency before response (fixed ms or {min, max} range)
//! - `repeat` - Repeat response N times before cycling to next
//! - `copy` - Copy request fields into response using regex/jsonpath/xpath
//! - `lookup` - Query external CSV data source
//! - `shellTransform` - disabled; presence fails the request (`security-blocked`)
//! - `decorate` - Rhai script to post-process response

// Allow dead code for now as behaviors are designed for future integration
#![allow(dead_code)]

mod copy;
mod cycler;
mod extraction;
mod lookup;
mod request;
mod transform;
mod types;
mod wait;

// Re-export main types
pub use copy::{apply_copy_behaviors, CopyBehavior, CopySource};
pub use cycler::{HasRepeatBehavior, ResponseCycler};
pub use extraction::{extract_jsonpath, extract_xpath, ExtractionMethod};
pub use lookup::{
    apply_lookup_behaviors, global_csv_cache, CsvCache, CsvData, CsvDataSource, DataSource,
    LookupBehavior, LookupKey,
};
pub use request::{header_to_title_case, RequestContext};
pub use transform::{apply_decorate, reject_shell_transform};
pub use types::ResponseBehaviors;
pub use wait::WaitBehavior;

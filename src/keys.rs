//! Key formats for epics, features and tasks.
//!
//! - Epic: `E01`
//! - Feature: `E01-F02` (short form `F02` is accepted where the epic is known)
//! - Task: `T-E01-F02-003`
//!
//! Keys are case-insensitive on input and stored uppercase.

use regex_lite::Regex;
use std::sync::LazyLock;

/// Largest per-feature task sequence number.
pub const MAX_TASK_NUMBER: u32 = 999;

static EPIC_KEY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^E\d{2}$").unwrap());
static FEATURE_KEY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^E\d{2}-F\d{2}$").unwrap());
static FEATURE_SUFFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^F\d{2}$").unwrap());
static TASK_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^T-E\d{2}-F\d{2}-(\d{3})$").unwrap());

/// Canonical (uppercase, trimmed) form of a key.
pub fn normalize(key: &str) -> String {
    key.trim().to_uppercase()
}

pub fn is_epic_key(key: &str) -> bool {
    EPIC_KEY.is_match(key)
}

pub fn is_feature_key(key: &str) -> bool {
    FEATURE_KEY.is_match(key)
}

pub fn is_feature_suffix(key: &str) -> bool {
    FEATURE_SUFFIX.is_match(key)
}

pub fn is_task_key(key: &str) -> bool {
    TASK_KEY.is_match(key)
}

/// Expand a feature reference to its `E{NN}-F{NN}` form.
///
/// `F02` under `E01` becomes `E01-F02`; a key already carrying the epic
/// prefix is returned as is. Anything else is returned unchanged and will
/// fail the feature lookup.
pub fn normalize_feature_key(epic_key: &str, feature_key: &str) -> String {
    let epic = normalize(epic_key);
    let feature = normalize(feature_key);

    if feature.starts_with(&format!("{epic}-")) {
        return feature;
    }
    if is_feature_suffix(&feature) {
        return format!("{epic}-{feature}");
    }
    feature
}

/// `E01-F02` -> `F02`.
pub fn feature_suffix(feature_key: &str) -> &str {
    match feature_key.split_once('-') {
        Some((_, suffix)) => suffix,
        None => feature_key,
    }
}

/// Sequence number of a canonical task key (`T-E01-F02-042` -> 42).
pub fn task_number(task_key: &str) -> Option<u32> {
    TASK_KEY
        .captures(task_key)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Build a task key from its parts, zero-padding the number to 3 digits.
pub fn format_task_key(epic_key: &str, feature_key: &str, number: u32) -> String {
    format!(
        "T-{}-{}-{:03}",
        normalize(epic_key),
        feature_suffix(&normalize(feature_key)),
        number
    )
}

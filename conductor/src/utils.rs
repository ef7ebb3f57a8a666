//! Small shared utilities: timestamps, run IDs, stage-name normalization.

use chrono::Utc;
use uuid::Uuid;

/// Returns the current UTC time as an ISO 8601 formatted string.
#[must_use]
pub fn iso_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Generates a fresh run identifier.
#[must_use]
pub fn generate_run_id() -> Uuid {
    Uuid::new_v4()
}

/// Normalizes a stage name for skip-list and grouping comparisons.
///
/// Lowercases the name and strips a trailing `stage` suffix, so
/// `"AnalyzeStage"`, `"analyzestage"` and `"analyze"` all compare equal.
#[must_use]
pub fn normalize_stage_name(name: &str) -> String {
    let lowered = name.trim().to_ascii_lowercase();
    lowered
        .strip_suffix("stage")
        .map_or(lowered.clone(), |stripped| stripped.trim_end_matches(['_', '-', ' ']).to_string())
}

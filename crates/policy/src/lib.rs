use s3vh_core::ProgressEvent;
use serde_json::{Map as JsonMap, Value as Json};
use tracing::info;

pub const VERSIONING_ENABLED: &str = "Enabled";

/// True when `bucket_name` starts with any non-empty entry of the
/// comma-separated `excluded_bucket_suffixes` list. Entries are trimmed and
/// matched case-sensitively.
pub fn is_bucket_excluded(bucket_name: &str, excluded_bucket_suffixes: &str) -> bool {
    excluded_bucket_suffixes
        .split(',')
        .map(str::trim)
        .filter(|prefix| !prefix.is_empty())
        .any(|prefix| {
            info!(bucket = bucket_name, prefix, "checking bucket exclusion");
            bucket_name.starts_with(prefix)
        })
}

pub fn versioning_enabled(bucket: &JsonMap<String, Json>) -> bool {
    bucket.get("VersioningConfiguration")
        .and_then(|v| v.get("Status"))
        .and_then(Json::as_str)
        == Some(VERSIONING_ENABLED)
}

/// Checks one `AWS::S3::Bucket` property map.
///
/// A bucket matching the exclusion list gets an informational message, but the
/// versioning requirement is still applied to it afterwards.
pub fn validate_object_versioning(bucket: &JsonMap<String, Json>, excluded_bucket_suffixes: &str) -> ProgressEvent {
    info!(properties = ?bucket, "validating S3 bucket");
    let name = bucket.get("BucketName");

    let mut progress = ProgressEvent::success("");
    if let Some(n) = name.and_then(Json::as_str) {
        if is_bucket_excluded(n, excluded_bucket_suffixes) {
            progress = ProgressEvent::success(format!("Object versioning is not required for bucket named: {n}."));
        }
    }

    if !versioning_enabled(bucket) {
        progress = ProgressEvent::failed(format!(
            "S3 bucket {} does not have object versioning enabled.", display_name(name)
        ));
    }

    info!(status = %progress.status, message = %progress.message, "versioning check complete");
    progress
}

fn display_name(name: Option<&Json>) -> String {
    match name {
        None | Some(Json::Null) => "(unnamed)".to_string(),
        Some(Json::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

use s3vh_core::{CallbackContext, HookError, HookHandlerRequest, OperationStatus, ProgressEvent, TypeConfiguration};
use serde_json::{Map as JsonMap, Value as Json};
use tracing::info;

use crate::S3_BUCKET_TARGET;

pub fn pre_create_handler(
    request: &HookHandlerRequest,
    _callback_context: &CallbackContext,
    type_configuration: &TypeConfiguration,
) -> Result<ProgressEvent, HookError> {
    check_target(request, type_configuration)
}

pub fn pre_update_handler(
    request: &HookHandlerRequest,
    _callback_context: &CallbackContext,
    type_configuration: &TypeConfiguration,
) -> Result<ProgressEvent, HookError> {
    check_target(request, type_configuration)
}

/// Deletion is never blocked.
pub fn pre_delete_handler(
    _request: &HookHandlerRequest,
    _callback_context: &CallbackContext,
    _type_configuration: &TypeConfiguration,
) -> Result<ProgressEvent, HookError> {
    Ok(ProgressEvent::success(""))
}

fn check_target(request: &HookHandlerRequest, type_configuration: &TypeConfiguration) -> Result<ProgressEvent, HookError> {
    let mut progress = ProgressEvent::in_progress();
    let target_name = request.hook_context.target_name();
    if target_name == S3_BUCKET_TARGET {
        let bucket = resource_properties(request)?;
        progress = s3vh_policy::validate_object_versioning(bucket, type_configuration.excluded_bucket_suffixes());
    } else {
        info!(target_name, "unknown target type");
        progress.status = OperationStatus::Failed;
        progress.message = format!("Unknown target type: {target_name}");
    }
    Ok(progress)
}

fn resource_properties(request: &HookHandlerRequest) -> Result<&JsonMap<String, Json>, HookError> {
    match &request.hook_context.target_model.resource_properties {
        None => Err(HookError::MissingResourceProperties),
        Some(Json::Object(m)) => Ok(m),
        Some(other) => Err(HookError::invalid_properties(other)),
    }
}

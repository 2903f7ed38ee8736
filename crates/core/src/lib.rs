use serde::{Serialize, Deserialize};
use serde_json::{Map as JsonMap, Value as Json};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;
use tracing::{info_span, warn};

/// Opaque state the host hands back on re-invocation.
pub type CallbackContext = JsonMap<String, Json>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HookInvocationPoint { CreatePreProvision, UpdatePreProvision, DeletePreProvision }

impl HookInvocationPoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookInvocationPoint::CreatePreProvision => "CREATE_PRE_PROVISION",
            HookInvocationPoint::UpdatePreProvision => "UPDATE_PRE_PROVISION",
            HookInvocationPoint::DeletePreProvision => "DELETE_PRE_PROVISION",
        }
    }
}

impl fmt::Display for HookInvocationPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus { InProgress, Success, Failed }

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationStatus::InProgress => "IN_PROGRESS",
            OperationStatus::Success => "SUCCESS",
            OperationStatus::Failed => "FAILED",
        })
    }
}

/// Error codes understood by the provisioning host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandlerErrorCode {
    NotUpdatable,
    InvalidRequest,
    AccessDenied,
    InvalidCredentials,
    AlreadyExists,
    NotFound,
    ResourceConflict,
    Throttling,
    ServiceLimitExceeded,
    NotStabilized,
    GeneralServiceException,
    ServiceInternalError,
    NetworkFailure,
    InternalFailure,
    InvalidTypeConfiguration,
    HandlerInternalFailure,
    NonCompliant,
    Unknown,
    UnsupportedTarget,
}

/// Verdict returned to the host for a single invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub status: OperationStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<HandlerErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_context: Option<CallbackContext>,
}

impl ProgressEvent {
    pub fn in_progress() -> Self { Self::with_status(OperationStatus::InProgress, String::new()) }

    pub fn success(message: impl Into<String>) -> Self {
        Self::with_status(OperationStatus::Success, message.into())
    }

    /// A domain failure: the resource is rejected, no error code attached.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::with_status(OperationStatus::Failed, message.into())
    }

    pub fn failed_with_code(code: HandlerErrorCode, message: impl Into<String>) -> Self {
        Self { error_code: Some(code), ..Self::failed(message) }
    }

    fn with_status(status: OperationStatus, message: String) -> Self {
        Self { status, message, error_code: None, callback_context: None }
    }

    pub fn is_success(&self) -> bool { self.status == OperationStatus::Success }
    pub fn is_failed(&self) -> bool { self.status == OperationStatus::Failed }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetModel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_properties: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_resource_properties: Option<Json>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookContext {
    #[serde(default)] pub aws_account_id: Option<String>,
    #[serde(default)] pub stack_id: Option<String>,
    #[serde(default)] pub change_set_id: Option<String>,
    #[serde(default)] pub hook_type_name: Option<String>,
    #[serde(default)] pub hook_type_version: Option<String>,
    #[serde(default)] pub invocation_point: Option<HookInvocationPoint>,
    #[serde(default)] pub target_name: Option<String>,
    #[serde(default)] pub target_type: Option<String>,
    #[serde(default)] pub target_logical_id: Option<String>,
    #[serde(default)] pub target_model: TargetModel,
}

impl HookContext {
    pub fn target_name(&self) -> &str { self.target_name.as_deref().unwrap_or("") }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookHandlerRequest {
    #[serde(default)]
    pub client_request_token: Option<String>,
    #[serde(default)]
    pub hook_context: HookContext,
}

/// Hook properties configured on the type in the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeConfiguration {
    #[serde(rename = "excludedBucketSuffixes", alias = "ExcludedBucketSuffixes",
            default, skip_serializing_if = "Option::is_none")]
    pub excluded_bucket_suffixes: Option<String>,
}

impl TypeConfiguration {
    pub fn excluded_bucket_suffixes(&self) -> &str {
        self.excluded_bucket_suffixes.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TargetStacks { #[default] All, None }

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FailureMode { #[default] Fail, Warn }

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HookConfiguration {
    #[serde(default)] pub target_stacks: TargetStacks,
    #[serde(default)] pub failure_mode: FailureMode,
    #[serde(default)] pub properties: TypeConfiguration,
}

impl HookConfiguration {
    pub fn enabled(&self) -> bool { self.target_stacks == TargetStacks::All }
}

/// Either the registry's configuration document or bare hook properties.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ConfigurationDocument {
    Registry {
        #[serde(rename = "CloudFormationConfiguration")]
        cloudformation: RegistryConfiguration,
    },
    Flat(TypeConfiguration),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfiguration {
    #[serde(rename = "HookConfiguration")]
    pub hook: HookConfiguration,
}

impl From<ConfigurationDocument> for HookConfiguration {
    fn from(doc: ConfigurationDocument) -> Self {
        match doc {
            ConfigurationDocument::Registry { cloudformation } => cloudformation.hook,
            ConfigurationDocument::Flat(properties) => HookConfiguration { properties, ..Default::default() },
        }
    }
}

/// A test-entrypoint document: the request plus whatever the host would inject.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookPayload {
    #[serde(flatten)]
    pub request: HookHandlerRequest,
    #[serde(default)]
    pub type_configuration: Option<TypeConfiguration>,
    #[serde(default)]
    pub callback_context: Option<CallbackContext>,
}

/// Faults that are not a verdict on the resource itself.
#[derive(Error, Debug)]
pub enum HookError {
    #[error("target model has no resourceProperties")]
    MissingResourceProperties,
    #[error("resourceProperties must be an object, got {0}")]
    InvalidResourceProperties(&'static str),
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HookError {
    pub fn invalid_properties(value: &Json) -> Self { HookError::InvalidResourceProperties(json_kind(value)) }
}

fn json_kind(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

pub type HandlerFn = fn(&HookHandlerRequest, &CallbackContext, &TypeConfiguration) -> Result<ProgressEvent, HookError>;

/// Explicit invocation-point dispatch table for one hook type.
#[derive(Clone)]
pub struct Hook {
    type_name: String,
    handlers: BTreeMap<HookInvocationPoint, HandlerFn>,
}

impl Hook {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self { type_name: type_name.into(), handlers: BTreeMap::new() }
    }

    pub fn handler(mut self, point: HookInvocationPoint, f: HandlerFn) -> Self {
        self.handlers.insert(point, f);
        self
    }

    pub fn type_name(&self) -> &str { &self.type_name }

    pub fn points(&self) -> impl Iterator<Item = HookInvocationPoint> + '_ { self.handlers.keys().copied() }

    /// Runs the handler for `point`. Handler errors and panics never escape;
    /// they come back as FAILED with `InternalFailure`.
    pub fn invoke(
        &self,
        point: HookInvocationPoint,
        request: &HookHandlerRequest,
        callback_context: &CallbackContext,
        type_configuration: &TypeConfiguration,
    ) -> ProgressEvent {
        let span = info_span!("hook", type_name = %self.type_name, point = %point,
                              target_name = request.hook_context.target_name());
        let _enter = span.enter();

        let Some(handler) = self.handlers.get(&point) else {
            warn!("no handler registered");
            return ProgressEvent::failed_with_code(
                HandlerErrorCode::InvalidRequest,
                format!("No handler registered for invocation point {point}"),
            );
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            handler(request, callback_context, type_configuration)
        }));
        let err = match outcome {
            Ok(Ok(progress)) => return progress,
            Ok(Err(e)) => e,
            Err(payload) => HookError::Panicked(panic_message(payload.as_ref())),
        };
        warn!(error = %err, "handler fault");
        ProgressEvent::failed_with_code(HandlerErrorCode::InternalFailure, format!("Unexpected error {err}"))
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("type_name", &self.type_name)
            .field("points", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() { return (*s).to_string(); }
    if let Some(s) = payload.downcast_ref::<String>() { return s.clone(); }
    "unknown panic".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ok_handler(_: &HookHandlerRequest, _: &CallbackContext, _: &TypeConfiguration) -> Result<ProgressEvent, HookError> {
        Ok(ProgressEvent::success("fine"))
    }

    fn faulty_handler(_: &HookHandlerRequest, _: &CallbackContext, _: &TypeConfiguration) -> Result<ProgressEvent, HookError> {
        Err(HookError::MissingResourceProperties)
    }

    fn panicking_handler(_: &HookHandlerRequest, _: &CallbackContext, _: &TypeConfiguration) -> Result<ProgressEvent, HookError> {
        panic!("boom")
    }

    fn run(hook: &Hook, point: HookInvocationPoint) -> ProgressEvent {
        hook.invoke(point, &HookHandlerRequest::default(), &CallbackContext::new(), &TypeConfiguration::default())
    }

    #[test]
    fn dispatches_to_registered_handler() {
        let hook = Hook::new("Test::Hook").handler(HookInvocationPoint::CreatePreProvision, ok_handler);
        let ev = run(&hook, HookInvocationPoint::CreatePreProvision);
        assert!(ev.is_success());
        assert_eq!(ev.message, "fine");
        assert_eq!(hook.points().collect::<Vec<_>>(), vec![HookInvocationPoint::CreatePreProvision]);
    }

    #[test]
    fn unregistered_point_is_invalid_request() {
        let hook = Hook::new("Test::Hook");
        let ev = run(&hook, HookInvocationPoint::DeletePreProvision);
        assert!(ev.is_failed());
        assert_eq!(ev.error_code, Some(HandlerErrorCode::InvalidRequest));
        assert!(ev.message.contains("DELETE_PRE_PROVISION"));
    }

    #[test]
    fn handler_error_becomes_internal_failure() {
        let hook = Hook::new("Test::Hook").handler(HookInvocationPoint::UpdatePreProvision, faulty_handler);
        let ev = run(&hook, HookInvocationPoint::UpdatePreProvision);
        assert!(ev.is_failed());
        assert_eq!(ev.error_code, Some(HandlerErrorCode::InternalFailure));
        assert_eq!(ev.message, "Unexpected error target model has no resourceProperties");
    }

    #[test]
    fn panic_becomes_internal_failure() {
        let hook = Hook::new("Test::Hook").handler(HookInvocationPoint::CreatePreProvision, panicking_handler);
        let ev = run(&hook, HookInvocationPoint::CreatePreProvision);
        assert!(ev.is_failed());
        assert_eq!(ev.error_code, Some(HandlerErrorCode::InternalFailure));
        assert!(ev.message.contains("boom"));
    }

    #[test]
    fn progress_event_wire_format() {
        let ev = ProgressEvent::failed_with_code(HandlerErrorCode::InternalFailure, "x");
        assert_eq!(serde_json::to_value(&ev).unwrap(),
                   json!({ "status": "FAILED", "message": "x", "errorCode": "InternalFailure" }));
        let ok = serde_json::to_value(ProgressEvent::success("")).unwrap();
        assert_eq!(ok, json!({ "status": "SUCCESS", "message": "" }));
        let pending = serde_json::to_value(ProgressEvent::in_progress()).unwrap();
        assert_eq!(pending, json!({ "status": "IN_PROGRESS", "message": "" }));
    }

    #[test]
    fn null_target_name_parses_as_unset() {
        let p: HookPayload = serde_json::from_value(json!({
            "hookContext": { "invocationPoint": "CREATE_PRE_PROVISION", "targetName": null }
        })).unwrap();
        assert!(p.request.hook_context.target_name.is_none());
        assert_eq!(p.request.hook_context.target_name(), "");
    }

    #[test]
    fn payload_parses_host_request() {
        let p: HookPayload = serde_json::from_value(json!({
            "clientRequestToken": "tok",
            "hookContext": {
                "invocationPoint": "UPDATE_PRE_PROVISION",
                "targetName": "AWS::S3::Bucket",
                "targetLogicalId": "Logs",
                "targetModel": { "resourceProperties": { "BucketName": "logs" } }
            },
            "typeConfiguration": { "excludedBucketSuffixes": "tmp-" }
        })).unwrap();
        let ctx = &p.request.hook_context;
        assert_eq!(p.request.client_request_token.as_deref(), Some("tok"));
        assert_eq!(ctx.invocation_point, Some(HookInvocationPoint::UpdatePreProvision));
        assert_eq!(ctx.target_name(), "AWS::S3::Bucket");
        assert_eq!(ctx.target_model.resource_properties, Some(json!({ "BucketName": "logs" })));
        assert_eq!(p.type_configuration.unwrap().excluded_bucket_suffixes(), "tmp-");
        assert!(p.callback_context.is_none());
    }

    #[test]
    fn configuration_document_forms() {
        let flat: ConfigurationDocument = serde_json::from_value(json!({ "excludedBucketSuffixes": "a-,b-" })).unwrap();
        let flat = HookConfiguration::from(flat);
        assert!(flat.enabled());
        assert_eq!(flat.failure_mode, FailureMode::Fail);
        assert_eq!(flat.properties.excluded_bucket_suffixes(), "a-,b-");

        let reg: ConfigurationDocument = serde_json::from_value(json!({
            "CloudFormationConfiguration": { "HookConfiguration": {
                "TargetStacks": "NONE",
                "FailureMode": "WARN",
                "Properties": { "excludedBucketSuffixes": "tmp-" }
            }}
        })).unwrap();
        let reg = HookConfiguration::from(reg);
        assert!(!reg.enabled());
        assert_eq!(reg.failure_mode, FailureMode::Warn);
        assert_eq!(reg.properties.excluded_bucket_suffixes(), "tmp-");
    }

    #[test]
    fn missing_exclusion_list_reads_as_empty() {
        assert_eq!(TypeConfiguration::default().excluded_bucket_suffixes(), "");
    }

    #[test]
    fn invalid_properties_names_json_kind() {
        let e = HookError::invalid_properties(&json!(["a"]));
        assert_eq!(e.to_string(), "resourceProperties must be an object, got array");
    }
}

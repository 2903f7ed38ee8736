use s3vh_core::{Hook, HookInvocationPoint};

pub mod handlers;
pub mod template;

pub use template::{check_template, CfnResource, CfnTemplate, TemplateFinding, TemplateReport};

/// Registry type name of this hook.
pub const TYPE_NAME: &str = "Vlttnv::S3BucketVersioningEnabled::Hook";

pub const S3_BUCKET_TARGET: &str = "AWS::S3::Bucket";

/// Resource types the host routes to this hook.
pub const TARGET_NAMES: &[&str] = &[S3_BUCKET_TARGET];

/// Wires the lifecycle handlers into a dispatch table for the host adapter.
pub fn build_hook() -> Hook {
    Hook::new(TYPE_NAME)
        .handler(HookInvocationPoint::CreatePreProvision, handlers::pre_create_handler)
        .handler(HookInvocationPoint::UpdatePreProvision, handlers::pre_update_handler)
        .handler(HookInvocationPoint::DeletePreProvision, handlers::pre_delete_handler)
}

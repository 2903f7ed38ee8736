use anyhow::{Context, Result};
use s3vh_core::{
    CallbackContext, FailureMode, Hook, HookConfiguration, HookContext, HookHandlerRequest,
    HookInvocationPoint, ProgressEvent, TargetModel,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as Json};
use serde_yaml::Value as Yaml;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use crate::TARGET_NAMES;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CfnResource {
    #[serde(rename="Type")]
    pub type_name: String,
    #[serde(rename="Properties", default)]
    pub properties: JsonMap<String, Json>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CfnTemplate {
    #[serde(rename="AWSTemplateFormatVersion", default)] pub version: Option<String>,
    #[serde(rename="Description", default)] pub description: Option<String>,
    #[serde(rename="Resources", default)] pub resources: BTreeMap<String, CfnResource>,
}

impl CfnTemplate {
    /// Parses a JSON or YAML template. Short-form intrinsics (`!Ref`, `!Sub`, ...)
    /// are rewritten to their long form and left unresolved.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let doc: Yaml = serde_yaml::from_slice(bytes).context("parse template document")?;
        let json = serde_json::to_value(expand_short_form(doc)).context("convert template to JSON")?;
        serde_json::from_value(json).context("read template resources")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("read template {}", path.display()))?;
        Self::from_slice(&bytes).with_context(|| format!("load template {}", path.display()))
    }
}

fn expand_short_form(v: Yaml) -> Yaml {
    match v {
        Yaml::Tagged(tagged) => {
            let tagged = *tagged;
            let tag = tagged.tag.to_string();
            let name = tag.trim_start_matches('!');
            let key = if name == "Ref" || name == "Condition" { name.to_string() } else { format!("Fn::{name}") };
            let mut m = serde_yaml::Mapping::new();
            m.insert(Yaml::String(key), expand_short_form(tagged.value));
            Yaml::Mapping(m)
        }
        Yaml::Sequence(items) => Yaml::Sequence(items.into_iter().map(expand_short_form).collect()),
        Yaml::Mapping(m) => Yaml::Mapping(m.into_iter().map(|(k, v)| (k, expand_short_form(v))).collect()),
        other => other,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateFinding {
    pub logical_id: String,
    pub resource_type: String,
    #[serde(flatten)]
    pub event: ProgressEvent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateReport {
    pub hook_type_name: String,
    pub failure_mode: FailureMode,
    pub findings: Vec<TemplateFinding>,
}

impl TemplateReport {
    pub fn failed(&self) -> impl Iterator<Item = &TemplateFinding> {
        self.findings.iter().filter(|f| f.event.is_failed())
    }

    /// A failure only stops provisioning when the hook runs in FAIL mode.
    pub fn blocks_provisioning(&self) -> bool {
        self.failure_mode == FailureMode::Fail && self.failed().next().is_some()
    }
}

/// Runs the create handler over every resource the hook targets, in
/// logical-id order.
pub fn check_template(hook: &Hook, template: &CfnTemplate, config: &HookConfiguration) -> TemplateReport {
    let mut report = TemplateReport {
        hook_type_name: hook.type_name().to_string(),
        failure_mode: config.failure_mode,
        findings: Vec::new(),
    };
    if !config.enabled() {
        info!("hook disabled by TargetStacks=NONE");
        return report;
    }

    let callback_context = CallbackContext::new();
    for (logical_id, res) in &template.resources {
        if !TARGET_NAMES.contains(&res.type_name.as_str()) { continue; }
        let request = HookHandlerRequest {
            client_request_token: None,
            hook_context: HookContext {
                hook_type_name: Some(hook.type_name().to_string()),
                invocation_point: Some(HookInvocationPoint::CreatePreProvision),
                target_name: Some(res.type_name.clone()),
                target_type: Some("RESOURCE".to_string()),
                target_logical_id: Some(logical_id.clone()),
                target_model: TargetModel {
                    resource_properties: Some(Json::Object(res.properties.clone())),
                    previous_resource_properties: None,
                },
                ..Default::default()
            },
        };
        let event = hook.invoke(HookInvocationPoint::CreatePreProvision, &request, &callback_context, &config.properties);
        info!(logical_id = %logical_id, status = %event.status, "template resource checked");
        report.findings.push(TemplateFinding {
            logical_id: logical_id.clone(),
            resource_type: res.type_name.clone(),
            event,
        });
    }
    report
}

use chrono::{SecondsFormat, Utc};
use kube::CustomResource;
use schemars::schema::{InstanceType, Metadata, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How the operator treats its operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
pub enum ManagementState {
    #[default]
    Managed,
    Unmanaged,
    Removed,
    Force,
}

impl std::fmt::Display for ManagementState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ManagementState::Managed => "Managed",
            ManagementState::Unmanaged => "Unmanaged",
            ManagementState::Removed => "Removed",
            ManagementState::Force => "Force",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
pub enum LogLevel {
    #[default]
    Normal,
    Debug,
    Trace,
    TraceAll,
}

impl LogLevel {
    /// Verbosity passed to the operand containers as `--v`.
    pub fn verbosity(&self) -> u8 {
        match self {
            LogLevel::Normal => 2,
            LogLevel::Debug => 4,
            LogLevel::Trace => 6,
            LogLevel::TraceAll => 8,
        }
    }

    /// Filter directive for the operator's own tracing subscriber.
    pub fn filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Normal => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace | LogLevel::TraceAll => "trace",
        }
    }
}

fn preserve_unknown_fields(_: &mut schemars::gen::SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        metadata: Some(Box::new(Metadata {
            description: Some("Free-form configuration".to_string()),
            ..Default::default()
        })),
        ..Default::default()
    };
    schema
        .extensions
        .insert("x-kubernetes-preserve-unknown-fields".to_string(), Value::Bool(true));
    schema.into()
}

/// Operator configuration for the secrets store CSI driver.
#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "operator.openshift.io",
    version = "v1",
    kind = "ClusterCSIDriver",
    plural = "clustercsidrivers",
    status = "ClusterCSIDriverStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCSIDriverSpec {
    #[serde(default)]
    pub management_state: ManagementState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<LogLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_log_level: Option<LogLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub observed_config: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub unsupported_config_overrides: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperatorCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl OperatorCondition {
    pub fn new(type_: impl Into<String>, status: ConditionStatus) -> Self {
        OperatorCondition {
            type_: type_.into(),
            status,
            last_transition_time: None,
            reason: None,
            message: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>, message: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self.message = Some(message.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCSIDriverStatus {
    #[serde(default)]
    pub conditions: Vec<OperatorCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Inserts or replaces the condition with the same type. The transition time
/// only moves when the status flips.
pub fn set_condition(conditions: &mut Vec<OperatorCondition>, mut condition: OperatorCondition) {
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing
                    .last_transition_time
                    .clone()
                    .or(Some(now));
            } else {
                condition.last_transition_time = Some(now);
            }
            *existing = condition;
        }
        None => {
            condition.last_transition_time = Some(now);
            conditions.push(condition);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn crd_is_cluster_scoped() {
        let crd = ClusterCSIDriver::crd();
        assert_eq!(crd.spec.scope, "Cluster");
        assert_eq!(crd.spec.group, "operator.openshift.io");
        assert_eq!(crd.spec.names.plural, "clustercsidrivers");
    }

    #[test]
    fn spec_defaults_to_managed() {
        let spec: ClusterCSIDriverSpec = serde_json::from_str("{}").unwrap();
        assert_eq!(spec.management_state, ManagementState::Managed);
        assert!(spec.log_level.is_none());
    }

    #[test]
    fn spec_parses_camel_case() {
        let spec: ClusterCSIDriverSpec = serde_json::from_value(serde_json::json!({
            "managementState": "Removed",
            "logLevel": "Trace",
            "operatorLogLevel": "Debug",
            "observedConfig": {"targetcsiconfig": {}}
        }))
        .unwrap();
        assert_eq!(spec.management_state, ManagementState::Removed);
        assert_eq!(spec.log_level, Some(LogLevel::Trace));
        assert_eq!(spec.operator_log_level.unwrap().filter_directive(), "debug");
        assert!(spec.observed_config.is_some());
    }

    #[test]
    fn log_level_verbosity() {
        assert_eq!(LogLevel::Normal.verbosity(), 2);
        assert_eq!(LogLevel::Debug.verbosity(), 4);
        assert_eq!(LogLevel::Trace.verbosity(), 6);
        assert_eq!(LogLevel::TraceAll.verbosity(), 8);
    }

    #[test]
    fn set_condition_keeps_transition_time_when_unchanged() {
        let mut conditions = vec![OperatorCondition {
            last_transition_time: Some("2024-01-01T00:00:00Z".to_string()),
            ..OperatorCondition::new("FooDegraded", ConditionStatus::False)
        }];

        set_condition(
            &mut conditions,
            OperatorCondition::new("FooDegraded", ConditionStatus::False).with_reason("AsExpected", ""),
        );
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time.as_deref(), Some("2024-01-01T00:00:00Z"));
        assert_eq!(conditions[0].reason.as_deref(), Some("AsExpected"));

        set_condition(&mut conditions, OperatorCondition::new("FooDegraded", ConditionStatus::True));
        assert_ne!(conditions[0].last_transition_time.as_deref(), Some("2024-01-01T00:00:00Z"));
        assert_eq!(conditions[0].status, ConditionStatus::True);
    }

    #[test]
    fn set_condition_appends_new_types() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, OperatorCondition::new("A", ConditionStatus::True));
        set_condition(&mut conditions, OperatorCondition::new("B", ConditionStatus::False));
        assert_eq!(conditions.len(), 2);
        assert!(conditions.iter().all(|c| c.last_transition_time.is_some()));
    }
}

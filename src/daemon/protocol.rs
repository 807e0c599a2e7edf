//! RPC wire protocol for daemon communication.
//!
//! Framing is newline-delimited JSON: one request per line, one response
//! per line, half-duplex per connection. The envelope fields are
//! normative; `args` and `data` payloads are operation-specific.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{IssueType, Priority, Status};
use crate::storage::{ListFilters, ReadyFilters};
use crate::sync::ImportOptions;

/// Client/daemon protocol version (the crate version).
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum accepted request line, matching the largest reasonable batch.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Every operation the daemon dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Ping,
    Status,
    Health,
    Metrics,
    Create,
    Update,
    Close,
    Delete,
    List,
    Show,
    Ready,
    Stats,
    DepAdd,
    DepRemove,
    LabelAdd,
    LabelRemove,
    CommentAdd,
    CommentList,
    Batch,
    Export,
    Import,
    EpicStatus,
    GetMutations,
    Shutdown,
}

impl Operation {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Status => "status",
            Self::Health => "health",
            Self::Metrics => "metrics",
            Self::Create => "create",
            Self::Update => "update",
            Self::Close => "close",
            Self::Delete => "delete",
            Self::List => "list",
            Self::Show => "show",
            Self::Ready => "ready",
            Self::Stats => "stats",
            Self::DepAdd => "dep_add",
            Self::DepRemove => "dep_remove",
            Self::LabelAdd => "label_add",
            Self::LabelRemove => "label_remove",
            Self::CommentAdd => "comment_add",
            Self::CommentList => "comment_list",
            Self::Batch => "batch",
            Self::Export => "export",
            Self::Import => "import",
            Self::EpicStatus => "epic_status",
            Self::GetMutations => "get_mutations",
            Self::Shutdown => "shutdown",
        }
    }

    /// Mutations feed the mutation event bus on success.
    #[must_use]
    pub const fn is_mutation(self) -> bool {
        matches!(
            self,
            Self::Create
                | Self::Update
                | Self::Close
                | Self::Delete
                | Self::DepAdd
                | Self::DepRemove
                | Self::LabelAdd
                | Self::LabelRemove
                | Self::CommentAdd
                | Self::Import
        )
    }

    /// Operations exempt from the database-binding check.
    #[must_use]
    pub const fn skips_binding_check(self) -> bool {
        matches!(self, Self::Health | Self::Metrics)
    }

    /// Operations exempt from the client-version check.
    #[must_use]
    pub const fn skips_version_check(self) -> bool {
        matches!(self, Self::Ping | Self::Health)
    }

    /// Operations that never trigger the auto-import hook.
    #[must_use]
    pub const fn skips_auto_import(self) -> bool {
        matches!(
            self,
            Self::Ping | Self::Health | Self::Metrics | Self::Import | Self::Export
        )
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One request line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub operation: Operation,
    #[serde(default)]
    pub args: Value,
    #[serde(default)]
    pub actor: String,
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub cwd: String,
    #[serde(default)]
    pub expected_db: String,
    #[serde(default)]
    pub client_version: String,
}

impl RpcRequest {
    #[must_use]
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            args: Value::Null,
            actor: String::new(),
            request_id: String::new(),
            cwd: String::new(),
            expected_db: String::new(),
            client_version: PROTOCOL_VERSION.to_string(),
        }
    }
}

/// One response line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    #[must_use]
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    #[must_use]
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

// --- Operation argument payloads -------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateArgs {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub design: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceptance_criteria: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_type: Option<IssueType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_minutes: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

/// Partial update; `Some(null)` in the JSON clears a clearable field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateArgs {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub design: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceptance_criteria: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_type: Option<IssueType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_minutes: Option<Option<i32>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseArgs {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdArgs {
    pub id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(flatten)]
    pub filters: ListFilters,
}

pub type ReadyArgs = ReadyFilters;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepArgs {
    pub issue_id: String,
    pub depends_on_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "type")]
    pub dep_type: Option<crate::model::DependencyType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelArgs {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentAddArgs {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    pub operation: Operation,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchArgs {
    pub requests: Vec<BatchItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportArgs {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportArgs {
    /// Log path; the workspace log when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(flatten)]
    pub options: ImportOptions,
}

/// Event published on every successful mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationEvent {
    pub kind: String,
    pub issue_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Check client/daemon version compatibility.
///
/// If both parse as semver, majors must match and the daemon must be >=
/// the client within that major. Unparseable versions are allowed (dev
/// builds).
#[must_use]
pub fn versions_compatible(daemon: &str, client: &str) -> bool {
    let (Ok(daemon), Ok(client)) = (
        semver::Version::parse(daemon),
        semver::Version::parse(client),
    ) else {
        return true;
    };
    daemon.major == client.major && daemon >= client
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_wire_names() {
        assert_eq!(
            serde_json::to_string(&Operation::DepAdd).unwrap(),
            "\"dep_add\""
        );
        let op: Operation = serde_json::from_str("\"comment_list\"").unwrap();
        assert_eq!(op, Operation::CommentList);
    }

    #[test]
    fn request_envelope_roundtrip() {
        let line = r#"{"operation":"create","args":{"title":"T"},"actor":"agent-1",
            "request_id":"r1","cwd":"/tmp","expected_db":"/tmp/.beads/beads.db",
            "client_version":"0.1.0"}"#
            .replace('\n', "");
        let req: RpcRequest = serde_json::from_str(&line).unwrap();
        assert_eq!(req.operation, Operation::Create);
        assert_eq!(req.actor, "agent-1");
        assert_eq!(req.args["title"], "T");
    }

    #[test]
    fn missing_envelope_fields_default() {
        let req: RpcRequest = serde_json::from_str(r#"{"operation":"ping"}"#).unwrap();
        assert!(req.actor.is_empty());
        assert!(req.args.is_null());
    }

    #[test]
    fn response_shape() {
        let ok = RpcResponse::ok(serde_json::json!({"n": 1}));
        let json = serde_json::to_string(&ok).unwrap();
        assert!(json.contains("\"success\":true"));
        assert!(!json.contains("error"));

        let err = RpcResponse::err("boom");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"success\":false"));
        assert!(json.contains("boom"));
    }

    #[test]
    fn pipeline_exemptions() {
        assert!(Operation::Health.skips_binding_check());
        assert!(!Operation::Create.skips_binding_check());
        assert!(Operation::Ping.skips_version_check());
        assert!(Operation::Export.skips_auto_import());
        assert!(!Operation::List.skips_auto_import());
        assert!(Operation::Import.is_mutation());
        assert!(!Operation::Show.is_mutation());
    }

    #[test]
    fn version_compatibility_rule() {
        assert!(versions_compatible("1.4.0", "1.2.0"));
        assert!(!versions_compatible("1.2.0", "1.4.0")); // daemon older
        assert!(!versions_compatible("2.0.0", "1.9.0")); // major mismatch
        assert!(versions_compatible("1.0.0", "dev")); // unparseable allowed
        assert!(versions_compatible("dev", "1.0.0"));
    }
}

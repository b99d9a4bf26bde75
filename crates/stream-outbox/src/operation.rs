//! Pending record mutations.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A business record handed in by the caller: its model kind (the wire
/// `tipo`) and its JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub model_kind: String,
    pub data: Value,
}

impl Record {
    pub fn new(model_kind: impl Into<String>, data: Value) -> Self {
        Self {
            model_kind: model_kind.into(),
            data,
        }
    }

    /// The record's `id` field, if present and non-empty.
    pub fn id(&self) -> Option<String> {
        self.data.get("id").and_then(id_string)
    }
}

/// Render an id value (string or number) as a string.
pub(crate) fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Identity of an operation inside a batch.
///
/// Ids are compared trimmed so identities echoed back by the server with
/// stray whitespace still match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationKey {
    pub tenant_id: Option<String>,
    pub model_kind: String,
    pub id: String,
}

impl OperationKey {
    pub fn new(tenant_id: Option<&str>, model_kind: &str, id: &str) -> Self {
        Self {
            tenant_id: tenant_id.map(str::to_string),
            model_kind: model_kind.to_string(),
            id: id.trim().to_string(),
        }
    }

    /// Same identity with the tenant dropped.
    pub fn without_tenant(self) -> Self {
        Self {
            tenant_id: None,
            ..self
        }
    }

    /// Whether an operation keyed `self` is the one `reported` names.
    ///
    /// A reported key without a tenant matches the record in any tenant.
    pub fn matches(&self, reported: &OperationKey) -> bool {
        self.model_kind == reported.model_kind
            && self.id == reported.id
            && (reported.tenant_id.is_none() || self.tenant_id == reported.tenant_id)
    }
}

/// One pending mutation, serialized exactly as posted to `/stream/data`:
///
/// ```json
/// {"op":"update","tipo":"PRODUTO","tenantId":"123","data":{"id":"1", ...}}
/// {"op":"delete","tipo":"PRODUTO","id":"1"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Operation {
    Update {
        #[serde(rename = "tipo")]
        model_kind: String,
        #[serde(rename = "tenantId", default, skip_serializing_if = "Option::is_none")]
        tenant_id: Option<String>,
        data: Value,
    },
    Delete {
        #[serde(rename = "tipo")]
        model_kind: String,
        #[serde(rename = "tenantId", default, skip_serializing_if = "Option::is_none")]
        tenant_id: Option<String>,
        id: String,
    },
}

impl Operation {
    /// Full-record upsert.
    pub fn update(record: &Record, tenant_id: Option<String>) -> Self {
        Operation::Update {
            model_kind: record.model_kind.clone(),
            tenant_id,
            data: record.data.clone(),
        }
    }

    /// Id-only removal.
    pub fn delete(model_kind: impl Into<String>, id: impl Into<String>, tenant_id: Option<String>) -> Self {
        Operation::Delete {
            model_kind: model_kind.into(),
            tenant_id,
            id: id.into(),
        }
    }

    pub fn model_kind(&self) -> &str {
        match self {
            Operation::Update { model_kind, .. } | Operation::Delete { model_kind, .. } => {
                model_kind
            }
        }
    }

    pub fn tenant_id(&self) -> Option<&str> {
        match self {
            Operation::Update { tenant_id, .. } | Operation::Delete { tenant_id, .. } => {
                tenant_id.as_deref()
            }
        }
    }

    pub fn id(&self) -> Option<String> {
        match self {
            Operation::Update { data, .. } => data.get("id").and_then(id_string),
            Operation::Delete { id, .. } => Some(id.clone()),
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Operation::Delete { .. })
    }

    /// `None` for an update whose record carries no id.
    pub fn key(&self) -> Option<OperationKey> {
        let id = self.id()?;
        Some(OperationKey::new(self.tenant_id(), self.model_kind(), &id))
    }
}

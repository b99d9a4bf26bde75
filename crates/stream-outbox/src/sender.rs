//! Posts batches to `/stream/data` and interprets the answer.

use crate::batch::Batch;
use crate::operation::{id_string, OperationKey};
use crate::{OutboxError, OutboxResult};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use stream_auth::{AuthSession, HttpRequest};
use tracing::{debug, warn};

pub(crate) const DATA_PATH: &str = "/stream/data";

/// Result of a delivery that the server answered with 200.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// Every operation was accepted.
    Delivered { response: Value },
    /// The server rejected the listed operations; the rest were accepted.
    PartialFailure {
        failed: Vec<OperationKey>,
        response: Value,
    },
}

impl DeliveryOutcome {
    pub fn response(&self) -> &Value {
        match self {
            DeliveryOutcome::Delivered { response }
            | DeliveryOutcome::PartialFailure { response, .. } => response,
        }
    }
}

/// An operation identity echoed back by the server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReportedOperation {
    #[serde(rename = "tipo")]
    pub model_kind: String,
    #[serde(default)]
    pub op: Option<String>,
    pub id: Value,
    #[serde(rename = "tenantId", default)]
    pub tenant_id: Option<String>,
}

impl ReportedOperation {
    pub fn key(&self) -> Option<OperationKey> {
        let id = id_string(&self.id)?;
        Some(OperationKey::new(
            self.tenant_id.as_deref(),
            &self.model_kind,
            &id,
        ))
    }
}

#[derive(Debug, Default, Deserialize)]
struct ReportSection {
    #[serde(default)]
    total: u64,
    #[serde(default)]
    itens: Vec<ReportedOperation>,
}

/// Sends batches through an authenticated session.
pub struct DataSender {
    session: Arc<AuthSession>,
}

impl DataSender {
    pub fn new(session: Arc<AuthSession>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<AuthSession> {
        &self.session
    }

    /// POST the batch's operations array.
    ///
    /// Any non-200 answer is a [`OutboxError::Delivery`] and the batch must
    /// be retried as a whole.
    pub async fn send(&self, batch: &Batch) -> OutboxResult<DeliveryOutcome> {
        let body = serde_json::to_value(batch.items())?;
        let response = self
            .session
            .request(HttpRequest::post(DATA_PATH, body))
            .await?;

        if !response.is_ok() {
            warn!(
                batch = %batch.filename(),
                status = response.status,
                "Batch delivery rejected"
            );
            return Err(OutboxError::Delivery {
                status: response.status,
                message: response.message(),
            });
        }

        let failed = failed_operations(&response.body)?;
        debug!(
            batch = %batch.filename(),
            operations = batch.len(),
            failed = failed.len(),
            "Batch delivered"
        );

        if failed.is_empty() {
            Ok(DeliveryOutcome::Delivered {
                response: response.body,
            })
        } else {
            Ok(DeliveryOutcome::PartialFailure {
                failed,
                response: response.body,
            })
        }
    }
}

/// Identities listed under `falhas.itens` of a delivery response.
fn failed_operations(body: &Value) -> OutboxResult<Vec<OperationKey>> {
    let Some(section) = body.get("falhas").filter(|v| !v.is_null()) else {
        return Ok(Vec::new());
    };
    let section: ReportSection = serde_json::from_value(section.clone())?;
    if section.total > 0 && section.itens.is_empty() {
        warn!(total = section.total, "Server reported failures without identities");
    }

    let mut keys = Vec::with_capacity(section.itens.len());
    for item in &section.itens {
        match item.key() {
            Some(key) => keys.push(key),
            None => warn!(model_kind = %item.model_kind, "Failed operation without usable id"),
        }
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn no_failures_section_means_delivered() {
        assert!(failed_operations(&Value::Null).unwrap().is_empty());
        assert!(failed_operations(&json!({ "sucessos": { "total": 3 } }))
            .unwrap()
            .is_empty());
        assert!(failed_operations(&json!({ "falhas": null })).unwrap().is_empty());
    }

    #[test]
    fn parses_failed_identities() {
        let body = json!({
            "sucessos": { "total": 1, "itens": [] },
            "falhas": {
                "total": 2,
                "itens": [
                    { "tipo": "PRODUTO", "op": "update", "id": "3 " },
                    { "tipo": "SECAO", "op": "delete", "id": 7, "tenantId": "t1" }
                ]
            }
        });

        assert_eq!(
            failed_operations(&body).unwrap(),
            vec![
                OperationKey::new(None, "PRODUTO", "3"),
                OperationKey::new(Some("t1"), "SECAO", "7"),
            ]
        );
    }

    #[test]
    fn malformed_failures_section_is_an_error() {
        let body = json!({ "falhas": { "itens": [{ "id": "1" }] } });
        assert!(matches!(failed_operations(&body), Err(OutboxError::Json(_))));
    }
}

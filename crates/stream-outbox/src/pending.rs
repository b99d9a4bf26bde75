//! Server-side backlog of records the server wants re-sent.

use crate::operation::id_string;
use crate::{OutboxError, OutboxResult};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use stream_auth::{AuthSession, HttpRequest};
use tracing::debug;

const PENDING_RESOURCES_PATH: &str = "/stream/pending-resources";

/// Page size used when walking the pending-resources endpoint.
pub const PENDING_RESOURCES_PAGE_SIZE: usize = 100;

/// Ids the server is waiting for, per model kind, for one tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingResources {
    pub tenant_id: String,
    pub models: BTreeMap<String, Vec<String>>,
}

/// Walk every page of pending resources and merge them per tenant.
///
/// Single-tenant pages map model kind to ids and are filed under the
/// session's tenant; multi-tenant pages nest that map under each tenant id.
/// Paging stops at the first page carrying no model kinds.
pub(crate) async fn fetch_pending_resources(
    session: &AuthSession,
) -> OutboxResult<Vec<PendingResources>> {
    let default_tenant = session.credentials().auth_tenant().to_string();
    let mut merged: BTreeMap<String, BTreeMap<String, Vec<String>>> = BTreeMap::new();
    let mut start = 0;

    loop {
        let request = HttpRequest::get(PENDING_RESOURCES_PATH)
            .with_query("start", start)
            .with_query("count", PENDING_RESOURCES_PAGE_SIZE);
        let response = session.request(request).await?;
        if !response.is_ok() {
            return Err(OutboxError::Request {
                path: PENDING_RESOURCES_PATH.to_string(),
                status: response.status,
                message: response.message(),
            });
        }

        let kinds = merge_page(&mut merged, &response.body, &default_tenant);
        debug!(start, kinds, "Fetched pending resources page");
        if kinds == 0 {
            break;
        }
        start += PENDING_RESOURCES_PAGE_SIZE;
    }

    Ok(merged
        .into_iter()
        .map(|(tenant_id, models)| PendingResources { tenant_id, models })
        .collect())
}

/// Fold one page into `merged`. Returns the number of model kinds seen.
fn merge_page(
    merged: &mut BTreeMap<String, BTreeMap<String, Vec<String>>>,
    page: &Value,
    default_tenant: &str,
) -> usize {
    let Some(page) = page.as_object() else {
        return 0;
    };

    let mut kinds = 0;
    for (key, value) in page {
        match value {
            Value::Array(ids) => {
                kinds += 1;
                merge_ids(merged, default_tenant, key, ids);
            }
            Value::Object(models) => {
                kinds += merge_tenant(merged, key, models);
            }
            _ => {}
        }
    }
    kinds
}

fn merge_tenant(
    merged: &mut BTreeMap<String, BTreeMap<String, Vec<String>>>,
    tenant_id: &str,
    models: &Map<String, Value>,
) -> usize {
    let mut kinds = 0;
    for (model_kind, ids) in models {
        if let Value::Array(ids) = ids {
            kinds += 1;
            merge_ids(merged, tenant_id, model_kind, ids);
        }
    }
    kinds
}

fn merge_ids(
    merged: &mut BTreeMap<String, BTreeMap<String, Vec<String>>>,
    tenant_id: &str,
    model_kind: &str,
    ids: &[Value],
) {
    merged
        .entry(tenant_id.to_string())
        .or_default()
        .entry(model_kind.to_string())
        .or_default()
        .extend(ids.iter().filter_map(id_string));
}

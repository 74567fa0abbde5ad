/// Per-request status channel.
///
/// Requests that move to the background leave a pollable status record in
/// the cluster cache: a hash at `request_status:{tenant_key_prefix}:{request_id}`
/// with a bounded TTL. Writes are one transactional pipeline (HSET of the
/// changed fields + EXPIRE); reads are one pipeline (HGETALL + TTL) with the
/// numeric fields coerced back to integers.
///
/// The channel is best-effort by contract: a failure to record status must
/// never propagate to the caller that owned the original request, so every
/// method here translates errors to `false`/`None` after logging.
use std::collections::HashMap;
use std::sync::Arc;

use redis::aio::ConnectionManager;
use tracing::{debug, error, warn};

/// Key prefix of every status record.
pub const REQUEST_STATUS_KEY_PREFIX: &str = "request_status";

/// Lifetime of a status record past its most recent touch, in seconds.
pub const REQUEST_STATUS_TTL_SECS: i64 = 60 * 60;

/// Fields coerced back to integers on read.
const NUMERIC_FIELDS: &[&str] = &["http_code", "time_ms", "start_time", "end_time"];

/// Lifecycle phase of a background request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    /// Accepted and moved to the background.
    Start,
    /// Completed successfully.
    Success,
    /// Completed with an error.
    Failed,
}

impl RequestPhase {
    /// Wire value stored in the hash's `status` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

/// Optional detail fields attached to a status update.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub url: Option<String>,
    pub method: Option<String>,
    pub http_code: Option<i64>,
    pub time_ms: Option<i64>,
    pub error_message: Option<String>,
    /// Epoch timestamp; recorded as `start_time` for [`RequestPhase::Start`],
    /// `end_time` otherwise.
    pub timestamp: Option<i64>,
}

/// A status record read back from the cache.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSnapshot {
    pub request_id: String,
    pub status: String,
    pub url: Option<String>,
    pub method: Option<String>,
    pub http_code: Option<i64>,
    pub time_ms: Option<i64>,
    pub error_message: Option<String>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    /// Remaining TTL at read time.
    pub ttl_seconds: Option<i64>,
}

/// Supplies the tenant namespace for cache keys.
///
/// The default implementation returns the literal `"default"`; multi-tenant
/// builds derive the prefix from request headers (org/space identifiers).
pub trait TenantKeyProvider: Send + Sync {
    /// The opaque tenant prefix for the current request context.
    fn tenant_key_prefix(&self) -> String;

    /// Build the full cache key for a request's status record.
    fn build_status_key(&self, base_prefix: &str, request_id: &str) -> String {
        format!("{base_prefix}:{}:{request_id}", self.tenant_key_prefix())
    }
}

/// Single-tenant provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTenantProvider;

impl TenantKeyProvider for DefaultTenantProvider {
    fn tenant_key_prefix(&self) -> String {
        "default".to_string()
    }
}

/// The status channel over the cluster cache.
pub struct RequestStatusChannel {
    conn: ConnectionManager,
    tenant: Arc<dyn TenantKeyProvider>,
}

impl RequestStatusChannel {
    /// Build over a pooled cache connection and a tenant provider.
    pub fn new(conn: ConnectionManager, tenant: Arc<dyn TenantKeyProvider>) -> Self {
        Self { conn, tenant }
    }

    fn build_key(&self, request_id: &str) -> String {
        self.tenant
            .build_status_key(REQUEST_STATUS_KEY_PREFIX, request_id)
    }

    /// Record a phase change for a request.
    ///
    /// One pipeline: HSET of the diff fields, then EXPIRE to refresh the TTL.
    pub async fn update_status(
        &self,
        request_id: &str,
        phase: RequestPhase,
        update: &StatusUpdate,
    ) -> bool {
        if request_id.is_empty() {
            warn!("missing request_id, skipping status update");
            return false;
        }

        let key = self.build_key(request_id);
        let mut fields: Vec<(String, String)> =
            vec![("status".to_string(), phase.as_str().to_string())];
        if let Some(url) = &update.url {
            fields.push(("url".to_string(), url.clone()));
        }
        if let Some(method) = &update.method {
            fields.push(("method".to_string(), method.clone()));
        }
        if let Some(code) = update.http_code {
            fields.push(("http_code".to_string(), code.to_string()));
        }
        if let Some(time_ms) = update.time_ms {
            fields.push(("time_ms".to_string(), time_ms.to_string()));
        }
        if let Some(message) = &update.error_message {
            fields.push(("error_message".to_string(), message.clone()));
        }
        if let Some(timestamp) = update.timestamp {
            let field = match phase {
                RequestPhase::Start => "start_time",
                _ => "end_time",
            };
            fields.push((field.to_string(), timestamp.to_string()));
        }

        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.cmd("HSET").arg(&key).arg(&fields).ignore();
        pipe.cmd("EXPIRE").arg(&key).arg(REQUEST_STATUS_TTL_SECS).ignore();
        let outcome: redis::RedisResult<()> = pipe.query_async(&mut conn).await;
        match outcome {
            Ok(()) => {
                debug!(key = %key, status = phase.as_str(), "request status updated");
                true
            }
            Err(e) => {
                error!(request_id, error = %e, "failed to update request status");
                false
            }
        }
    }

    /// Read a request's status record, or `None` if it expired or never
    /// existed.
    pub async fn get_status(&self, request_id: &str) -> Option<StatusSnapshot> {
        if request_id.is_empty() {
            warn!("missing request_id, cannot read status");
            return None;
        }

        let key = self.build_key(request_id);
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.cmd("HGETALL").arg(&key);
        pipe.cmd("TTL").arg(&key);
        let (data, ttl): (HashMap<String, String>, i64) =
            match pipe.query_async(&mut conn).await {
                Ok(results) => results,
                Err(e) => {
                    error!(request_id, error = %e, "failed to read request status");
                    return None;
                }
            };

        if data.is_empty() {
            debug!(key = %key, "request status does not exist");
            return None;
        }
        Some(coerce_snapshot(request_id, data, (ttl > 0).then_some(ttl)))
    }

    /// Drop a request's status record early.
    pub async fn delete_status(&self, request_id: &str) -> bool {
        if request_id.is_empty() {
            return false;
        }

        let key = self.build_key(request_id);
        let mut conn = self.conn.clone();
        let removed: redis::RedisResult<usize> =
            redis::cmd("DEL").arg(&key).query_async(&mut conn).await;
        match removed {
            Ok(removed) => removed > 0,
            Err(e) => {
                error!(request_id, error = %e, "failed to delete request status");
                false
            }
        }
    }
}

/// Coerce the raw hash back into a typed snapshot.
///
/// Numeric fields that fail to parse are dropped rather than surfaced as
/// strings; the record is advisory.
fn coerce_snapshot(
    request_id: &str,
    mut data: HashMap<String, String>,
    ttl_seconds: Option<i64>,
) -> StatusSnapshot {
    let mut numeric: HashMap<&str, i64> = HashMap::new();
    for field in NUMERIC_FIELDS.iter().copied() {
        if let Some(raw) = data.get(field) {
            if let Ok(value) = raw.parse::<i64>() {
                numeric.insert(field, value);
            }
        }
    }

    StatusSnapshot {
        request_id: request_id.to_string(),
        status: data.remove("status").unwrap_or_default(),
        url: data.remove("url"),
        method: data.remove("method"),
        http_code: numeric.get("http_code").copied(),
        time_ms: numeric.get("time_ms").copied(),
        error_message: data.remove("error_message"),
        start_time: numeric.get("start_time").copied(),
        end_time: numeric.get("end_time").copied(),
        ttl_seconds,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tenant_builds_flat_key() {
        let tenant = DefaultTenantProvider;
        assert_eq!(
            tenant.build_status_key(REQUEST_STATUS_KEY_PREFIX, "req-1"),
            "request_status:default:req-1"
        );
    }

    #[test]
    fn custom_tenant_prefix_scopes_the_key() {
        struct OrgTenant;
        impl TenantKeyProvider for OrgTenant {
            fn tenant_key_prefix(&self) -> String {
                "org42:space7".to_string()
            }
        }
        assert_eq!(
            OrgTenant.build_status_key(REQUEST_STATUS_KEY_PREFIX, "req-1"),
            "request_status:org42:space7:req-1"
        );
    }

    #[test]
    fn snapshot_coerces_numeric_fields() {
        let mut data = HashMap::new();
        data.insert("status".to_string(), "success".to_string());
        data.insert("http_code".to_string(), "200".to_string());
        data.insert("time_ms".to_string(), "123".to_string());
        data.insert("end_time".to_string(), "1760000000".to_string());
        data.insert("url".to_string(), "/api/memories".to_string());

        let snap = coerce_snapshot("req-1", data, Some(3000));
        assert_eq!(snap.status, "success");
        assert_eq!(snap.http_code, Some(200));
        assert_eq!(snap.time_ms, Some(123));
        assert_eq!(snap.end_time, Some(1_760_000_000));
        assert_eq!(snap.start_time, None);
        assert_eq!(snap.url.as_deref(), Some("/api/memories"));
        assert_eq!(snap.ttl_seconds, Some(3000));
    }

    #[test]
    fn unparsable_numbers_are_dropped() {
        let mut data = HashMap::new();
        data.insert("status".to_string(), "failed".to_string());
        data.insert("http_code".to_string(), "teapot".to_string());
        let snap = coerce_snapshot("req-1", data, None);
        assert_eq!(snap.http_code, None);
    }
}

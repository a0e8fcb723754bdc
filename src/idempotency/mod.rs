use std::future::Future;

use anyhow::Result;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::db::{IpamError, Store};

/// Canonical JSON rendering: object keys sorted recursively, no insignificant
/// whitespace, serde_json's stable scalar formatting. Hashes computed over
/// this form are reproducible across hosts and restarts.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let body: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", body.join(","))
        }
        Value::Array(items) => {
            let body: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", body.join(","))
        }
        scalar => serde_json::to_string(scalar).unwrap_or_default(),
    }
}

/// SHA-256 over the canonical form of the parameters, with `request_id`
/// excluded so the hash describes only the operation itself.
pub fn request_hash(params: &Value) -> String {
    let clean = match params {
        Value::Object(map) => {
            let mut map = map.clone();
            map.remove("request_id");
            Value::Object(map)
        }
        other => other.clone(),
    };

    let mut hasher = Sha256::new();
    hasher.update(canonical_json(&clean).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Run a mutating operation under idempotency semantics.
///
/// A fresh request id executes the operation and stores the outcome; a known
/// request id with matching endpoint/method/parameter-hash replays the stored
/// response without re-executing; a known request id with anything else is a
/// ParameterMismatch. Failed operations are never cached. Returns
/// (status, response, request_id) with the id generated when absent.
pub async fn run_idempotent<F, Fut>(
    store: &Store,
    request_id: Option<String>,
    endpoint: &str,
    method: &str,
    params: Value,
    op: F,
) -> Result<(u16, Value, String)>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(u16, Value)>>,
{
    let request_id = request_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    if let Some(record) = store.get_idempotency_record(&request_id).await? {
        if record.endpoint != endpoint || record.method != method {
            return Err(IpamError::ParameterMismatch(format!(
                "Request ID {} was previously used for {} {}, but current request is {} {}",
                request_id, record.method, record.endpoint, method, endpoint
            ))
            .into());
        }

        let current_hash = request_hash(&params);
        if record.request_hash != current_hash {
            return Err(IpamError::ParameterMismatch(format!(
                "Request ID {} was previously used with different parameters",
                request_id
            ))
            .into());
        }

        return Ok((record.status_code, record.response_data, request_id));
    }

    let (status, response) = op().await?;

    store
        .store_idempotency_record(
            &request_id,
            endpoint,
            method,
            &request_hash(&params),
            &params,
            &response,
            status,
        )
        .await?;

    Ok((status, response, request_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_canonical_json_sorts_keys_recursively() {
        let a = json!({"b": 1, "a": {"z": [1, 2], "y": null}});
        let b = json!({"a": {"y": null, "z": [1, 2]}, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_json(&a), r#"{"a":{"y":null,"z":[1,2]},"b":1}"#);
    }

    #[test]
    fn test_request_hash_ignores_request_id_and_key_order() {
        let a = json!({"cidr": "10.0.0.0/16", "vrf_id": "prod-vrf", "request_id": "r-1"});
        let b = json!({"vrf_id": "prod-vrf", "cidr": "10.0.0.0/16"});
        assert_eq!(request_hash(&a), request_hash(&b));

        let c = json!({"vrf_id": "prod-vrf", "cidr": "10.1.0.0/16"});
        assert_ne!(request_hash(&a), request_hash(&c));
    }

    #[tokio::test]
    async fn test_replay_executes_exactly_once() {
        let store = crate::db::Store::in_memory().await.unwrap();
        let calls = AtomicUsize::new(0);
        let params = json!({"cidr": "10.0.0.0/16"});

        for _ in 0..2 {
            let (status, body, request_id) = run_idempotent(
                &store,
                Some("req-1".to_string()),
                "/api/prefixes",
                "POST",
                params.clone(),
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok((201, json!({"prefix_id": "p-1"})))
                },
            )
            .await
            .unwrap();
            assert_eq!(status, 201);
            assert_eq!(body, json!({"prefix_id": "p-1"}));
            assert_eq!(request_id, "req-1");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_parameter_mismatch_is_refused() {
        let store = crate::db::Store::in_memory().await.unwrap();
        run_idempotent(
            &store,
            Some("req-2".to_string()),
            "/api/prefixes",
            "POST",
            json!({"cidr": "10.0.0.0/16"}),
            || async { Ok((201, json!({"ok": true}))) },
        )
        .await
        .unwrap();

        // Same id, different parameters
        let err = run_idempotent(
            &store,
            Some("req-2".to_string()),
            "/api/prefixes",
            "POST",
            json!({"cidr": "10.1.0.0/16"}),
            || async { panic!("must not execute") },
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IpamError>(),
            Some(IpamError::ParameterMismatch(_))
        ));

        // Same id, different endpoint
        let err = run_idempotent(
            &store,
            Some("req-2".to_string()),
            "/api/vrfs",
            "POST",
            json!({"cidr": "10.0.0.0/16"}),
            || async { panic!("must not execute") },
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IpamError>(),
            Some(IpamError::ParameterMismatch(_))
        ));
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let store = crate::db::Store::in_memory().await.unwrap();
        let params = json!({"cidr": "10.0.0.0/16"});

        let result = run_idempotent(
            &store,
            Some("req-3".to_string()),
            "/api/prefixes",
            "POST",
            params.clone(),
            || async { Err(anyhow::anyhow!("transient failure")) },
        )
        .await;
        assert!(result.is_err());

        // The retry with the same id executes and succeeds
        let (status, _, _) = run_idempotent(
            &store,
            Some("req-3".to_string()),
            "/api/prefixes",
            "POST",
            params,
            || async { Ok((201, json!({"ok": true}))) },
        )
        .await
        .unwrap();
        assert_eq!(status, 201);
    }

    #[tokio::test]
    async fn test_generated_request_id_when_absent() {
        let store = crate::db::Store::in_memory().await.unwrap();
        let (_, _, request_id) = run_idempotent(
            &store,
            None,
            "/api/prefixes",
            "POST",
            json!({}),
            || async { Ok((201, json!({}))) },
        )
        .await
        .unwrap();
        assert!(!request_id.is_empty());
        assert!(store
            .get_idempotency_record(&request_id)
            .await
            .unwrap()
            .is_some());
    }
}

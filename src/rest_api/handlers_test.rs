//! Tests for the REST API routes, driven through the axum router

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::super::server::router;
    use crate::controller::{ControllerState, SyncSettings};
    use crate::gateway::MemoryGateway;
    use crate::model::{Package, Router, ServiceType, Subscriber, SyncStatus};
    use crate::queue::{DisconnectReason, MemoryQueue, SyncJob};
    use crate::store::MemoryStore;

    struct Api {
        store: Arc<MemoryStore>,
        queue: Arc<MemoryQueue>,
        app: axum::Router,
    }

    async fn api() -> Api {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::default());
        store
            .insert_router(Router {
                id: "r1".into(),
                tenant_id: "t1".into(),
                name: "core".to_string(),
                endpoint: "https://10.0.0.1".to_string(),
                username: "api".to_string(),
                password: "secret".to_string(),
            })
            .await;
        store
            .insert_package(Package {
                id: "basic".into(),
                tenant_id: "t1".into(),
                name: "Basic".to_string(),
                ppp_profile: "10mbps".to_string(),
                rate_limit: "10M/10M".to_string(),
            })
            .await;
        let state = Arc::new(ControllerState::new(
            store.clone(),
            Arc::new(MemoryGateway::new()),
            queue.clone(),
            SyncSettings::default(),
        ));
        Api {
            store,
            queue,
            app: router(state),
        }
    }

    fn subscriber(id: &str) -> Subscriber {
        Subscriber {
            id: id.into(),
            tenant_id: "t1".into(),
            router_id: "r1".into(),
            username: id.to_string(),
            service_type: ServiceType::Pppoe,
            password: Some("pw".to_string()),
            static_ip: None,
            package_id: "basic".into(),
            pending_package_id: None,
            is_suspended: false,
            is_manually_disconnected: false,
            provisioned: true,
            sync_status: SyncStatus::Synced,
            sync_error_message: None,
            expires_at: None,
        }
    }

    async fn call(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let api = api().await;
        let (status, body) = call(&api.app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_provision_queues_add() {
        let api = api().await;
        let (status, body) = call(
            &api.app,
            "POST",
            "/api/v1/subscribers",
            Some(json!({
                "id": "u1",
                "tenantId": "t1",
                "routerId": "r1",
                "username": "u1",
                "serviceType": "pppoe",
                "password": "pw",
                "packageId": "basic"
            })),
        )
        .await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(body["jobId"].is_i64());
        assert_eq!(
            api.queue.queued().await,
            vec![SyncJob::Add {
                subscriber_id: "u1".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_provision_with_unknown_package_is_unprocessable() {
        let api = api().await;
        let (status, body) = call(
            &api.app,
            "POST",
            "/api/v1/subscribers",
            Some(json!({
                "id": "u1",
                "tenantId": "t1",
                "routerId": "r1",
                "username": "u1",
                "serviceType": "pppoe",
                "packageId": "gold"
            })),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "inconsistent");
        assert!(api.queue.queued().await.is_empty());
    }

    #[tokio::test]
    async fn test_provision_of_existing_subscriber_conflicts() {
        let api = api().await;
        api.store.insert_subscriber(subscriber("u1")).await;

        let (status, body) = call(
            &api.app,
            "POST",
            "/api/v1/subscribers",
            Some(json!({
                "id": "u1",
                "tenantId": "t1",
                "routerId": "r1",
                "username": "u1",
                "serviceType": "pppoe",
                "password": "pw",
                "packageId": "basic"
            })),
        )
        .await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "already_exists");
        assert!(api.queue.queued().await.is_empty());
    }

    #[tokio::test]
    async fn test_subscriber_status() {
        let api = api().await;
        api.store
            .insert_subscriber(subscriber("u1").errored("Router r1 unreachable: timeout"))
            .await;

        let (status, body) = call(&api.app, "GET", "/api/v1/subscribers/u1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["syncStatus"], "error");
        assert_eq!(body["syncErrorMessage"], "Router r1 unreachable: timeout");

        let (status, body) = call(&api.app, "GET", "/api/v1/subscribers/nobody", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn test_disconnect_is_operator_override() {
        let api = api().await;
        api.store.insert_subscriber(subscriber("u1")).await;

        let (status, _) = call(&api.app, "POST", "/api/v1/subscribers/u1/disconnect", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(
            api.queue.queued().await,
            vec![SyncJob::Disconnect {
                subscriber_id: "u1".into(),
                reason: DisconnectReason::Operator,
                manual: Some(true),
            }]
        );
    }

    #[tokio::test]
    async fn test_renew_suspended_subscriber_reconnects() {
        let api = api().await;
        api.store
            .insert_subscriber(Subscriber {
                is_suspended: true,
                ..subscriber("u1")
            })
            .await;

        let (status, body) = call(
            &api.app,
            "POST",
            "/api/v1/subscribers/u1/renew",
            Some(json!({ "expiresAt": "2030-01-01T00:00:00Z" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "reconnecting");
        assert!(body["jobId"].is_i64());
    }

    #[tokio::test]
    async fn test_deprovision_queues_remove() {
        let api = api().await;
        api.store.insert_subscriber(subscriber("u1")).await;

        let (status, _) = call(&api.app, "DELETE", "/api/v1/subscribers/u1", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(
            api.queue.queued().await,
            vec![SyncJob::Remove {
                subscriber_id: "u1".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_tenant_sweep_trigger() {
        let api = api().await;

        let (status, _) = call(&api.app, "POST", "/api/v1/tenants/t1/sweeps/reconcile", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(
            api.queue.queued().await,
            vec![SyncJob::Reconcile {
                tenant_id: "t1".into()
            }]
        );

        let (status, body) = call(&api.app, "POST", "/api/v1/tenants/t1/sweeps/hourly", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_sweep_kind");
    }

    #[tokio::test]
    async fn test_interface_traffic() {
        let api = api().await;

        let (status, body) = call(
            &api.app,
            "GET",
            "/api/v1/routers/r1/interfaces/ether1/traffic",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["interface"], "ether1");

        let (status, _) = call(
            &api.app,
            "GET",
            "/api/v1/routers/r9/interfaces/ether1/traffic",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[cfg(feature = "metrics")]
    #[tokio::test]
    async fn test_metrics_endpoint() {
        let api = api().await;
        let response = api
            .app
            .clone()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

use chrono::{Duration, Utc};

use super::*;

fn make_subscriber() -> Subscriber {
    Subscriber {
        id: "s1".into(),
        tenant_id: "t1".into(),
        router_id: "r1".into(),
        username: "u1".to_string(),
        service_type: ServiceType::Pppoe,
        password: Some("secret".to_string()),
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

#[test]
fn test_subscriber_json_uses_camel_case() {
    let sub = make_subscriber();
    let json = serde_json::to_value(&sub).unwrap();
    assert_eq!(json["syncStatus"], "synced");
    assert_eq!(json["serviceType"], "pppoe");
    assert_eq!(json["isManuallyDisconnected"], false);
    assert_eq!(json["routerId"], "r1");
}

#[test]
fn test_status_helpers_clear_error_message() {
    let sub = make_subscriber().errored("Router r1 unreachable: timeout");
    assert_eq!(sub.sync_status, SyncStatus::Error);
    assert_eq!(
        sub.sync_error_message.as_deref(),
        Some("Router r1 unreachable: timeout")
    );

    let pending = sub.pending();
    assert_eq!(pending.sync_status, SyncStatus::Pending);
    assert!(pending.sync_error_message.is_none());

    let synced = sub.synced();
    assert_eq!(synced.sync_status, SyncStatus::Synced);
    assert!(synced.sync_error_message.is_none());
}

#[test]
fn test_expiry() {
    let now = Utc::now();
    let mut sub = make_subscriber();
    assert!(!sub.is_expired(now));

    sub.expires_at = Some(now - Duration::hours(1));
    assert!(sub.is_expired(now));

    sub.expires_at = Some(now + Duration::hours(1));
    assert!(!sub.is_expired(now));
}

#[test]
fn test_target_package_prefers_pending() {
    let mut sub = make_subscriber();
    assert_eq!(sub.target_package_id().as_str(), "basic");
    sub.pending_package_id = Some("premium".into());
    assert_eq!(sub.target_package_id().as_str(), "premium");
}

#[test]
fn test_validate_manual_disconnect_invariant() {
    let mut sub = make_subscriber();
    sub.is_manually_disconnected = true;
    assert!(sub.validate().is_err());

    sub.is_suspended = true;
    assert!(sub.validate().is_ok());
}

#[test]
fn test_validate_static_requires_ip() {
    let mut sub = make_subscriber();
    sub.service_type = ServiceType::Static;
    assert!(sub.validate().is_err());

    sub.static_ip = Some("10.10.0.5".to_string());
    assert!(sub.validate().is_ok());
}

#[test]
fn test_router_debug_hides_password() {
    let router = Router {
        id: "r1".into(),
        tenant_id: "t1".into(),
        name: "core".to_string(),
        endpoint: "https://10.0.0.1".to_string(),
        username: "api".to_string(),
        password: "hunter2".to_string(),
    };
    let debug = format!("{router:?}");
    assert!(debug.contains("core"));
    assert!(!debug.contains("hunter2"));
}

#[test]
fn test_enum_parsing() {
    assert_eq!("static".parse::<ServiceType>().unwrap(), ServiceType::Static);
    assert_eq!("error".parse::<SyncStatus>().unwrap(), SyncStatus::Error);
    assert!("bogus".parse::<SyncStatus>().is_err());
}

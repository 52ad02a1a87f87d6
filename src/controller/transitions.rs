//! Pure per-job state transitions
//!
//! Each `plan_*` function takes an immutable subscriber snapshot and returns
//! the record to persist once hardware confirms, plus the router commands
//! that bring hardware to the desired state. No I/O happens here; the
//! [`executor`](super::executor) applies the commands.

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::gateway::{PppSecret, QueuePatch, SecretPatch, SimpleQueue};
use crate::model::{Package, PackageId, ServiceType, Subscriber, SubscriberId};
use crate::queue::DisconnectReason;

/// PPP service name used for subscriber secrets
pub const PPPOE_SERVICE: &str = "pppoe";

/// Queue limit applied to a suspended static subscriber
pub const SUSPENDED_RATE_LIMIT: &str = "0/0";

/// Inputs shared by all transitions of one job
#[derive(Clone, Debug)]
pub struct PlanContext {
    /// PPP profile assigned to suspended PPPoE subscribers
    pub disconnect_profile: String,
    pub now: DateTime<Utc>,
}

/// Set-to-desired router commands, addressed by object name
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HardwareCommand {
    /// Create the secret unless an identical one exists; a different secret
    /// with the same name is a conflict
    EnsureSecret(PppSecret),
    EnsureQueue(SimpleQueue),
    /// Patch an existing secret; missing is an error
    UpdateSecret { name: String, patch: SecretPatch },
    UpdateQueue { name: String, patch: QueuePatch },
    /// Terminate live PPP sessions for a user, if any
    DropActiveSessions { name: String },
    /// Delete the secret; absent counts as done
    RemoveSecret { name: String },
    RemoveQueue { name: String },
}

/// What happens to the record after hardware confirmed
#[derive(Clone, Debug, PartialEq)]
pub enum NextState {
    Save(Subscriber),
    Delete(SubscriberId),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    pub next: NextState,
    pub commands: Vec<HardwareCommand>,
}

/// Subscriber-level job kinds, without their identifiers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Add,
    Update,
    Disconnect {
        reason: DisconnectReason,
        manual: Option<bool>,
    },
    Connect,
    Remove,
}

impl Operation {
    /// Package the operation needs to know about, if any
    pub fn package_id<'a>(&self, subscriber: &'a Subscriber) -> Option<&'a PackageId> {
        match self {
            Operation::Add | Operation::Connect => Some(&subscriber.package_id),
            Operation::Update => Some(subscriber.target_package_id()),
            Operation::Disconnect { .. } | Operation::Remove => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Add => "add",
            Operation::Update => "update",
            Operation::Disconnect { .. } => "disconnect",
            Operation::Connect => "connect",
            Operation::Remove => "remove",
        }
    }
}

/// Dispatch to the matching `plan_*` function
pub fn plan(
    operation: Operation,
    subscriber: &Subscriber,
    package: Option<&Package>,
    ctx: &PlanContext,
) -> Result<Transition> {
    let require_package = || {
        package.ok_or_else(|| {
            Error::Inconsistent(format!(
                "{} for subscriber {} needs a package",
                operation.name(),
                subscriber.id
            ))
        })
    };

    match operation {
        Operation::Add => plan_add(subscriber, require_package()?, ctx),
        Operation::Update => plan_update(subscriber, require_package()?),
        Operation::Disconnect { reason, manual } => {
            plan_disconnect(subscriber, reason, manual, ctx)
        }
        Operation::Connect => plan_connect(subscriber, require_package()?),
        Operation::Remove => plan_remove(subscriber),
    }
}

/// Create the identity object for the current package
///
/// A suspended subscriber is created already disabled, so an `add` emitted
/// by the reconciler never re-enables service.
pub fn plan_add(subscriber: &Subscriber, package: &Package, ctx: &PlanContext) -> Result<Transition> {
    check(subscriber)?;

    let command = match subscriber.service_type {
        ServiceType::Pppoe => HardwareCommand::EnsureSecret(desired_secret(subscriber, package, ctx)),
        ServiceType::Static => HardwareCommand::EnsureQueue(desired_queue(subscriber, package)?),
    };

    Ok(Transition {
        next: NextState::Save(Subscriber {
            provisioned: true,
            ..subscriber.synced()
        }),
        commands: vec![command],
    })
}

/// Apply the pending package, or re-assert the current one
pub fn plan_update(subscriber: &Subscriber, package: &Package) -> Result<Transition> {
    check(subscriber)?;

    // Suspended subscribers keep the disconnect profile; only the record moves.
    let commands = if subscriber.is_suspended {
        Vec::new()
    } else {
        match subscriber.service_type {
            ServiceType::Pppoe => vec![HardwareCommand::UpdateSecret {
                name: subscriber.username.clone(),
                patch: SecretPatch {
                    profile: Some(package.ppp_profile.clone()),
                    ..Default::default()
                },
            }],
            ServiceType::Static => vec![HardwareCommand::UpdateQueue {
                name: subscriber.username.clone(),
                patch: QueuePatch {
                    max_limit: Some(package.rate_limit.clone()),
                    ..Default::default()
                },
            }],
        }
    };

    Ok(Transition {
        next: NextState::Save(Subscriber {
            package_id: package.id.clone(),
            pending_package_id: None,
            ..subscriber.synced()
        }),
        commands,
    })
}

/// Terminate sessions and disable the identity object
pub fn plan_disconnect(
    subscriber: &Subscriber,
    reason: DisconnectReason,
    manual: Option<bool>,
    ctx: &PlanContext,
) -> Result<Transition> {
    check(subscriber)?;

    let comment = disconnect_comment(reason, ctx.now);
    let name = subscriber.username.clone();
    let commands = match subscriber.service_type {
        ServiceType::Pppoe => vec![
            HardwareCommand::DropActiveSessions { name: name.clone() },
            HardwareCommand::UpdateSecret {
                name,
                patch: SecretPatch {
                    profile: Some(ctx.disconnect_profile.clone()),
                    disabled: Some(true),
                    comment: Some(comment),
                    ..Default::default()
                },
            },
        ],
        ServiceType::Static => vec![HardwareCommand::UpdateQueue {
            name,
            patch: QueuePatch {
                max_limit: Some(SUSPENDED_RATE_LIMIT.to_string()),
                disabled: Some(true),
                comment: Some(comment),
                ..Default::default()
            },
        }],
    };

    Ok(Transition {
        next: NextState::Save(Subscriber {
            is_suspended: true,
            is_manually_disconnected: manual.unwrap_or(subscriber.is_manually_disconnected),
            ..subscriber.synced()
        }),
        commands,
    })
}

/// Re-enable service with the current package and clear both suspension flags
pub fn plan_connect(subscriber: &Subscriber, package: &Package) -> Result<Transition> {
    check(subscriber)?;

    let name = subscriber.username.clone();
    let command = match subscriber.service_type {
        ServiceType::Pppoe => HardwareCommand::UpdateSecret {
            name,
            patch: SecretPatch {
                profile: Some(package.ppp_profile.clone()),
                disabled: Some(false),
                comment: Some(String::new()),
                ..Default::default()
            },
        },
        ServiceType::Static => HardwareCommand::UpdateQueue {
            name,
            patch: QueuePatch {
                max_limit: Some(package.rate_limit.clone()),
                disabled: Some(false),
                comment: Some(String::new()),
                ..Default::default()
            },
        },
    };

    Ok(Transition {
        next: NextState::Save(Subscriber {
            is_suspended: false,
            is_manually_disconnected: false,
            ..subscriber.synced()
        }),
        commands: vec![command],
    })
}

/// Delete the identity object, then the record
pub fn plan_remove(subscriber: &Subscriber) -> Result<Transition> {
    let name = subscriber.username.clone();
    let commands = match subscriber.service_type {
        ServiceType::Pppoe => vec![
            HardwareCommand::DropActiveSessions { name: name.clone() },
            HardwareCommand::RemoveSecret { name },
        ],
        ServiceType::Static => vec![HardwareCommand::RemoveQueue { name }],
    };

    Ok(Transition {
        next: NextState::Delete(subscriber.id.clone()),
        commands,
    })
}

/// Router comment written on disconnect, e.g. `disconnected: expired at 2024-05-01T00:00:00Z`
pub fn disconnect_comment(reason: DisconnectReason, at: DateTime<Utc>) -> String {
    format!(
        "disconnected: {} at {}",
        reason,
        at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    )
}

/// The secret a PPPoE subscriber should have on the router
pub fn desired_secret(subscriber: &Subscriber, package: &Package, ctx: &PlanContext) -> PppSecret {
    let profile = if subscriber.is_suspended {
        ctx.disconnect_profile.clone()
    } else {
        package.ppp_profile.clone()
    };
    PppSecret {
        id: None,
        name: subscriber.username.clone(),
        password: subscriber.password.clone(),
        profile,
        service: PPPOE_SERVICE.to_string(),
        disabled: subscriber.is_suspended,
        comment: None,
    }
}

/// The simple queue a static subscriber should have on the router
pub fn desired_queue(subscriber: &Subscriber, package: &Package) -> Result<SimpleQueue> {
    let target = subscriber.static_ip.clone().ok_or_else(|| {
        Error::Inconsistent(format!("static subscriber {} has no IP address", subscriber.id))
    })?;
    let max_limit = if subscriber.is_suspended {
        SUSPENDED_RATE_LIMIT.to_string()
    } else {
        package.rate_limit.clone()
    };
    Ok(SimpleQueue {
        id: None,
        name: subscriber.username.clone(),
        target,
        max_limit,
        disabled: subscriber.is_suspended,
        comment: None,
    })
}

/// Fold a finished transition into a record that changed while the job ran
///
/// Each field the transition changed is taken from `next`, unless the
/// concurrent writer changed it as well; the concurrent writer wins those.
/// When that writer touched more than the sync status, its status is kept so
/// the job it queued settles the record.
pub fn merge_concurrent(snapshot: &Subscriber, next: &Subscriber, current: &Subscriber) -> Subscriber {
    fn pick<T: Clone + PartialEq>(snapshot: &T, next: &T, current: &T) -> T {
        if next != snapshot && current == snapshot {
            next.clone()
        } else {
            current.clone()
        }
    }

    let edited = Subscriber {
        sync_status: snapshot.sync_status,
        sync_error_message: snapshot.sync_error_message.clone(),
        ..current.clone()
    } != *snapshot;
    let (sync_status, sync_error_message) = if edited {
        (current.sync_status, current.sync_error_message.clone())
    } else {
        (next.sync_status, next.sync_error_message.clone())
    };

    let mut merged = Subscriber {
        id: current.id.clone(),
        tenant_id: pick(&snapshot.tenant_id, &next.tenant_id, &current.tenant_id),
        router_id: pick(&snapshot.router_id, &next.router_id, &current.router_id),
        username: pick(&snapshot.username, &next.username, &current.username),
        service_type: pick(&snapshot.service_type, &next.service_type, &current.service_type),
        password: pick(&snapshot.password, &next.password, &current.password),
        static_ip: pick(&snapshot.static_ip, &next.static_ip, &current.static_ip),
        package_id: pick(&snapshot.package_id, &next.package_id, &current.package_id),
        pending_package_id: pick(
            &snapshot.pending_package_id,
            &next.pending_package_id,
            &current.pending_package_id,
        ),
        is_suspended: pick(&snapshot.is_suspended, &next.is_suspended, &current.is_suspended),
        is_manually_disconnected: pick(
            &snapshot.is_manually_disconnected,
            &next.is_manually_disconnected,
            &current.is_manually_disconnected,
        ),
        provisioned: pick(&snapshot.provisioned, &next.provisioned, &current.provisioned),
        sync_status,
        sync_error_message,
        expires_at: pick(&snapshot.expires_at, &next.expires_at, &current.expires_at),
    };
    // An operator disconnect always keeps the subscriber suspended.
    if merged.is_manually_disconnected {
        merged.is_suspended = true;
    }
    merged
}

fn check(subscriber: &Subscriber) -> Result<()> {
    subscriber.validate().map_err(Error::Inconsistent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SyncStatus;
    use chrono::TimeZone;

    fn ctx() -> PlanContext {
        PlanContext {
            disconnect_profile: "disconnected".to_string(),
            now: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
        }
    }

    fn package(id: &str, profile: &str, limit: &str) -> Package {
        Package {
            id: id.into(),
            tenant_id: "t1".into(),
            name: id.to_string(),
            ppp_profile: profile.to_string(),
            rate_limit: limit.to_string(),
        }
    }

    fn pppoe(id: &str) -> Subscriber {
        Subscriber {
            id: id.into(),
            tenant_id: "t1".into(),
            router_id: "r1".into(),
            username: id.to_string(),
            service_type: ServiceType::Pppoe,
            password: Some("secret".to_string()),
            static_ip: None,
            package_id: "basic".into(),
            pending_package_id: None,
            is_suspended: false,
            is_manually_disconnected: false,
            provisioned: false,
            sync_status: SyncStatus::Pending,
            sync_error_message: None,
            expires_at: None,
        }
    }

    fn static_ip(id: &str) -> Subscriber {
        Subscriber {
            service_type: ServiceType::Static,
            password: None,
            static_ip: Some("10.0.0.5".to_string()),
            ..pppoe(id)
        }
    }

    fn saved(transition: &Transition) -> &Subscriber {
        match &transition.next {
            NextState::Save(s) => s,
            NextState::Delete(id) => panic!("expected save, got delete of {id}"),
        }
    }

    #[test]
    fn test_add_pppoe_creates_secret_with_package_profile() {
        let sub = pppoe("u1");
        let t = plan_add(&sub, &package("basic", "10mbps", "10M/10M"), &ctx()).unwrap();

        assert_eq!(
            t.commands,
            vec![HardwareCommand::EnsureSecret(PppSecret {
                id: None,
                name: "u1".to_string(),
                password: Some("secret".to_string()),
                profile: "10mbps".to_string(),
                service: "pppoe".to_string(),
                disabled: false,
                comment: None,
            })]
        );
        let next = saved(&t);
        assert!(next.provisioned);
        assert_eq!(next.sync_status, SyncStatus::Synced);
    }

    #[test]
    fn test_add_static_uses_rate_limit() {
        let t = plan_add(&static_ip("s1"), &package("basic", "10mbps", "5M/10M"), &ctx()).unwrap();
        match &t.commands[0] {
            HardwareCommand::EnsureQueue(q) => {
                assert_eq!(q.target, "10.0.0.5");
                assert_eq!(q.max_limit, "5M/10M");
                assert!(!q.disabled);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_add_suspended_subscriber_is_created_disabled() {
        let sub = Subscriber {
            is_suspended: true,
            ..pppoe("u1")
        };
        let t = plan_add(&sub, &package("basic", "10mbps", "10M/10M"), &ctx()).unwrap();
        match &t.commands[0] {
            HardwareCommand::EnsureSecret(s) => {
                assert!(s.disabled);
                assert_eq!(s.profile, "disconnected");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_update_commits_pending_package() {
        let sub = Subscriber {
            pending_package_id: Some("premium".into()),
            ..pppoe("u1")
        };
        let t = plan_update(&sub, &package("premium", "50mbps", "50M/50M")).unwrap();

        assert_eq!(
            t.commands,
            vec![HardwareCommand::UpdateSecret {
                name: "u1".to_string(),
                patch: SecretPatch {
                    profile: Some("50mbps".to_string()),
                    ..Default::default()
                },
            }]
        );
        let next = saved(&t);
        assert_eq!(next.package_id.as_str(), "premium");
        assert!(next.pending_package_id.is_none());
    }

    #[test]
    fn test_update_of_suspended_subscriber_only_moves_record() {
        let sub = Subscriber {
            is_suspended: true,
            pending_package_id: Some("premium".into()),
            ..pppoe("u1")
        };
        let t = plan_update(&sub, &package("premium", "50mbps", "50M/50M")).unwrap();
        assert!(t.commands.is_empty());
        assert_eq!(saved(&t).package_id.as_str(), "premium");
        assert!(saved(&t).is_suspended);
    }

    #[test]
    fn test_disconnect_pppoe_drops_sessions_then_disables() {
        let t = plan_disconnect(&pppoe("u1"), DisconnectReason::Expired, None, &ctx()).unwrap();

        assert_eq!(t.commands.len(), 2);
        assert_eq!(
            t.commands[0],
            HardwareCommand::DropActiveSessions {
                name: "u1".to_string()
            }
        );
        match &t.commands[1] {
            HardwareCommand::UpdateSecret { patch, .. } => {
                assert_eq!(patch.profile.as_deref(), Some("disconnected"));
                assert_eq!(patch.disabled, Some(true));
                assert_eq!(
                    patch.comment.as_deref(),
                    Some("disconnected: expired at 2024-05-01T00:00:00Z")
                );
            }
            other => panic!("unexpected command {other:?}"),
        }
        let next = saved(&t);
        assert!(next.is_suspended);
        assert!(!next.is_manually_disconnected);
    }

    #[test]
    fn test_disconnect_static_zeroes_limit() {
        let t = plan_disconnect(&static_ip("s1"), DisconnectReason::Operator, Some(true), &ctx())
            .unwrap();
        match &t.commands[..] {
            [HardwareCommand::UpdateQueue { patch, .. }] => {
                assert_eq!(patch.max_limit.as_deref(), Some("0/0"));
                assert_eq!(patch.disabled, Some(true));
            }
            other => panic!("unexpected commands {other:?}"),
        }
        assert!(saved(&t).is_manually_disconnected);
    }

    #[test]
    fn test_disconnect_without_manual_flag_keeps_prior_value() {
        let sub = Subscriber {
            is_suspended: true,
            is_manually_disconnected: true,
            ..pppoe("u1")
        };
        let t = plan_disconnect(&sub, DisconnectReason::Reconcile, None, &ctx()).unwrap();
        assert!(saved(&t).is_manually_disconnected);
    }

    #[test]
    fn test_connect_restores_current_package_and_clears_flags() {
        let sub = Subscriber {
            is_suspended: true,
            is_manually_disconnected: true,
            ..pppoe("u1")
        };
        let t = plan_connect(&sub, &package("basic", "10mbps", "10M/10M")).unwrap();
        match &t.commands[..] {
            [HardwareCommand::UpdateSecret { patch, .. }] => {
                assert_eq!(patch.profile.as_deref(), Some("10mbps"));
                assert_eq!(patch.disabled, Some(false));
            }
            other => panic!("unexpected commands {other:?}"),
        }
        let next = saved(&t);
        assert!(!next.is_suspended);
        assert!(!next.is_manually_disconnected);
    }

    #[test]
    fn test_remove_deletes_record_after_hardware() {
        let t = plan_remove(&static_ip("s1")).unwrap();
        assert_eq!(
            t.commands,
            vec![HardwareCommand::RemoveQueue {
                name: "s1".to_string()
            }]
        );
        assert_eq!(t.next, NextState::Delete("s1".into()));
    }

    #[test]
    fn test_invalid_record_is_inconsistent() {
        let sub = Subscriber {
            is_manually_disconnected: true,
            ..pppoe("u1")
        };
        let err = plan_connect(&sub, &package("basic", "10mbps", "10M/10M")).unwrap_err();
        assert!(matches!(err, Error::Inconsistent(_)));
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_plan_requires_package_for_add() {
        let err = plan(Operation::Add, &pppoe("u1"), None, &ctx()).unwrap_err();
        assert!(matches!(err, Error::Inconsistent(_)));
    }

    #[test]
    fn test_merge_keeps_package_staged_during_connect() {
        let snapshot = Subscriber {
            is_suspended: true,
            ..pppoe("u1")
        };
        let next = Subscriber {
            is_suspended: false,
            ..snapshot.synced()
        };
        let current = Subscriber {
            pending_package_id: Some("premium".into()),
            ..snapshot.pending()
        };

        let merged = merge_concurrent(&snapshot, &next, &current);
        assert!(!merged.is_suspended);
        assert_eq!(merged.pending_package_id, Some("premium".into()));
        assert_eq!(merged.sync_status, SyncStatus::Pending);
    }

    #[test]
    fn test_merge_newer_package_change_wins_over_commit() {
        let snapshot = Subscriber {
            pending_package_id: Some("premium".into()),
            ..pppoe("u1")
        };
        let next = Subscriber {
            package_id: "premium".into(),
            pending_package_id: None,
            ..snapshot.synced()
        };
        let current = Subscriber {
            pending_package_id: Some("gold".into()),
            ..snapshot.pending()
        };

        let merged = merge_concurrent(&snapshot, &next, &current);
        assert_eq!(merged.package_id, PackageId::from("premium"));
        assert_eq!(merged.pending_package_id, Some("gold".into()));
    }

    #[test]
    fn test_merge_status_only_change_takes_job_result() {
        let snapshot = pppoe("u1").pending();
        let next = snapshot.synced();
        let current = snapshot.errored("Router r1 unreachable: timeout");

        let merged = merge_concurrent(&snapshot, &next, &current);
        assert_eq!(merged, next);
    }

    #[test]
    fn test_merge_never_reconnects_operator_disconnect() {
        let snapshot = pppoe("u1");
        let next = snapshot.synced();
        let current = Subscriber {
            is_suspended: true,
            is_manually_disconnected: true,
            ..snapshot.pending()
        };

        let merged = merge_concurrent(&snapshot, &next, &current);
        assert!(merged.is_suspended);
        assert!(merged.is_manually_disconnected);
        assert!(merged.validate().is_ok());
    }
}

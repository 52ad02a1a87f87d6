//! Applies planned hardware commands to an open router session

use tracing::{debug, info};

use super::transitions::HardwareCommand;
use crate::error::{Error, Result};
use crate::gateway::{PppSecret, QueuePatch, RateLimit, RouterSession, SecretPatch, SimpleQueue};

const SECRET: &str = "ppp secret";
const QUEUE: &str = "simple queue";

/// Run commands in order, stopping at the first failure
pub async fn apply(session: &dyn RouterSession, commands: &[HardwareCommand]) -> Result<()> {
    for command in commands {
        apply_one(session, command).await?;
    }
    Ok(())
}

async fn apply_one(session: &dyn RouterSession, command: &HardwareCommand) -> Result<()> {
    match command {
        HardwareCommand::EnsureSecret(desired) => match session.find_secret(&desired.name).await? {
            None => {
                info!("Creating ppp secret {}", desired.name);
                session.add_secret(desired).await
            }
            Some(existing) => match secret_difference(&existing, desired) {
                None => {
                    debug!("ppp secret {} already present", desired.name);
                    Ok(())
                }
                Some(detail) => Err(Error::Conflict {
                    kind: SECRET,
                    name: desired.name.clone(),
                    detail,
                }),
            },
        },

        HardwareCommand::EnsureQueue(desired) => match session.find_queue(&desired.name).await? {
            None => {
                info!("Creating simple queue {}", desired.name);
                session.add_queue(desired).await
            }
            Some(existing) => match queue_difference(&existing, desired) {
                None => {
                    debug!("simple queue {} already present", desired.name);
                    Ok(())
                }
                Some(detail) => Err(Error::Conflict {
                    kind: QUEUE,
                    name: desired.name.clone(),
                    detail,
                }),
            },
        },

        HardwareCommand::UpdateSecret { name, patch } => {
            let existing = session
                .find_secret(name)
                .await?
                .ok_or_else(|| missing(SECRET, name))?;
            if secret_satisfies(&existing, patch) {
                debug!("ppp secret {} already matches", name);
                return Ok(());
            }
            let id = object_id(SECRET, name, existing.id)?;
            session.set_secret(&id, patch).await
        }

        HardwareCommand::UpdateQueue { name, patch } => {
            let existing = session
                .find_queue(name)
                .await?
                .ok_or_else(|| missing(QUEUE, name))?;
            if queue_satisfies(&existing, patch) {
                debug!("simple queue {} already matches", name);
                return Ok(());
            }
            let id = object_id(QUEUE, name, existing.id)?;
            session.set_queue(&id, patch).await
        }

        HardwareCommand::DropActiveSessions { name } => {
            for active in session.find_active_sessions(name).await? {
                info!("Terminating active session {} for {}", active.id, name);
                session.remove_active_session(&active.id).await?;
            }
            Ok(())
        }

        HardwareCommand::RemoveSecret { name } => match session.find_secret(name).await? {
            Some(existing) => {
                let id = object_id(SECRET, name, existing.id)?;
                session.remove_secret(&id).await
            }
            None => {
                debug!("ppp secret {} already absent", name);
                Ok(())
            }
        },

        HardwareCommand::RemoveQueue { name } => match session.find_queue(name).await? {
            Some(existing) => {
                let id = object_id(QUEUE, name, existing.id)?;
                session.remove_queue(&id).await
            }
            None => {
                debug!("simple queue {} already absent", name);
                Ok(())
            }
        },
    }
}

fn missing(kind: &'static str, name: &str) -> Error {
    Error::ObjectMissing {
        kind,
        name: name.to_string(),
    }
}

fn object_id(kind: &'static str, name: &str, id: Option<String>) -> Result<String> {
    id.ok_or_else(|| Error::Inconsistent(format!("{kind} '{name}' was listed without an id")))
}

/// RouterOS reports single-host targets with a `/32` suffix
pub(crate) fn same_target(a: &str, b: &str) -> bool {
    a.trim().trim_end_matches("/32") == b.trim().trim_end_matches("/32")
}

fn secret_difference(existing: &PppSecret, desired: &PppSecret) -> Option<String> {
    let mut diffs = Vec::new();
    if existing.profile != desired.profile {
        diffs.push(format!("profile {} != {}", existing.profile, desired.profile));
    }
    if existing.disabled != desired.disabled {
        diffs.push(format!("disabled {} != {}", existing.disabled, desired.disabled));
    }
    if let (Some(have), Some(want)) = (&existing.password, &desired.password) {
        if have != want {
            diffs.push("password differs".to_string());
        }
    }
    (!diffs.is_empty()).then(|| diffs.join(", "))
}

fn queue_difference(existing: &SimpleQueue, desired: &SimpleQueue) -> Option<String> {
    let mut diffs = Vec::new();
    if !same_target(&existing.target, &desired.target) {
        diffs.push(format!("target {} != {}", existing.target, desired.target));
    }
    if !RateLimit::same(&existing.max_limit, &desired.max_limit) {
        diffs.push(format!(
            "max-limit {} != {}",
            existing.max_limit, desired.max_limit
        ));
    }
    if existing.disabled != desired.disabled {
        diffs.push(format!("disabled {} != {}", existing.disabled, desired.disabled));
    }
    (!diffs.is_empty()).then(|| diffs.join(", "))
}

fn same_comment(existing: &Option<String>, wanted: &str) -> bool {
    existing.as_deref().unwrap_or("") == wanted
}

fn secret_satisfies(existing: &PppSecret, patch: &SecretPatch) -> bool {
    patch.profile.as_ref().map_or(true, |p| &existing.profile == p)
        && patch
            .password
            .as_ref()
            .map_or(true, |p| existing.password.as_ref() == Some(p))
        && patch.disabled.map_or(true, |d| existing.disabled == d)
        && patch
            .comment
            .as_ref()
            .map_or(true, |c| same_comment(&existing.comment, c))
}

fn queue_satisfies(existing: &SimpleQueue, patch: &QueuePatch) -> bool {
    patch
        .target
        .as_ref()
        .map_or(true, |t| same_target(&existing.target, t))
        && patch
            .max_limit
            .as_ref()
            .map_or(true, |m| RateLimit::same(&existing.max_limit, m))
        && patch.disabled.map_or(true, |d| existing.disabled == d)
        && patch
            .comment
            .as_ref()
            .map_or(true, |c| same_comment(&existing.comment, c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{MemoryGateway, RouterGateway};
    use crate::model::{Router, RouterId};

    fn router() -> Router {
        Router {
            id: "r1".into(),
            tenant_id: "t1".into(),
            name: "core".to_string(),
            endpoint: "http://127.0.0.1".to_string(),
            username: "admin".to_string(),
            password: "admin".to_string(),
        }
    }

    fn secret(name: &str, profile: &str) -> PppSecret {
        PppSecret {
            name: name.to_string(),
            password: Some("pw".to_string()),
            profile: profile.to_string(),
            service: "pppoe".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_ensure_secret_is_idempotent() {
        let gateway = MemoryGateway::new();
        let session = gateway.open(&router()).await.unwrap();
        let commands = vec![HardwareCommand::EnsureSecret(secret("u1", "10mbps"))];

        apply(session.as_ref(), &commands).await.unwrap();
        apply(session.as_ref(), &commands).await.unwrap();

        let r1: RouterId = "r1".into();
        assert_eq!(gateway.state(&r1).await.secrets.len(), 1);
        assert_eq!(gateway.writes().await, vec!["r1 add-secret u1".to_string()]);
    }

    #[tokio::test]
    async fn test_ensure_secret_conflict_is_not_retriable() {
        let gateway = MemoryGateway::new();
        let r1: RouterId = "r1".into();
        gateway.insert_secret(&r1, secret("u1", "other")).await;
        let session = gateway.open(&router()).await.unwrap();

        let err = apply(
            session.as_ref(),
            &[HardwareCommand::EnsureSecret(secret("u1", "10mbps"))],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
        assert!(!err.is_retriable());
    }

    #[tokio::test]
    async fn test_update_of_missing_object_fails() {
        let gateway = MemoryGateway::new();
        let session = gateway.open(&router()).await.unwrap();
        let err = apply(
            session.as_ref(),
            &[HardwareCommand::UpdateQueue {
                name: "s1".to_string(),
                patch: QueuePatch::default(),
            }],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::ObjectMissing { .. }));
    }

    #[tokio::test]
    async fn test_update_skips_write_when_already_matching() {
        let gateway = MemoryGateway::new();
        let r1: RouterId = "r1".into();
        gateway
            .insert_queue(
                &r1,
                SimpleQueue {
                    name: "s1".to_string(),
                    target: "10.0.0.5/32".to_string(),
                    max_limit: "5000000/10000000".to_string(),
                    ..Default::default()
                },
            )
            .await;
        let session = gateway.open(&router()).await.unwrap();

        apply(
            session.as_ref(),
            &[HardwareCommand::UpdateQueue {
                name: "s1".to_string(),
                patch: QueuePatch {
                    max_limit: Some("5M/10M".to_string()),
                    ..Default::default()
                },
            }],
        )
        .await
        .unwrap();
        assert!(gateway.writes().await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_absent_is_confirmed() {
        let gateway = MemoryGateway::new();
        let session = gateway.open(&router()).await.unwrap();
        apply(
            session.as_ref(),
            &[
                HardwareCommand::DropActiveSessions {
                    name: "u1".to_string(),
                },
                HardwareCommand::RemoveSecret {
                    name: "u1".to_string(),
                },
            ],
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_drop_active_sessions_only_for_user() {
        let gateway = MemoryGateway::new();
        let r1: RouterId = "r1".into();
        gateway.insert_active(&r1, "u1").await;
        gateway.insert_active(&r1, "u2").await;
        let session = gateway.open(&router()).await.unwrap();

        apply(
            session.as_ref(),
            &[HardwareCommand::DropActiveSessions {
                name: "u1".to_string(),
            }],
        )
        .await
        .unwrap();

        let active = gateway.state(&r1).await.active;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "u2");
    }

    #[test]
    fn test_same_target_ignores_host_mask() {
        assert!(same_target("10.0.0.5", "10.0.0.5/32"));
        assert!(!same_target("10.0.0.5", "10.0.0.6"));
    }
}

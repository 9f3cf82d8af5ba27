//! Audit logging for Fluxo operations.
//!
//! Every create, update, delete, bulk import, login, and logout appends one
//! immutable [`AuditEntry`] to the store. Descriptions are sanitized so
//! secrets passed on the command line never reach the log.

use crate::models::{Actor, AuditAction, AuditEntry};
use crate::storage::Storage;
use crate::Result;
use chrono::Utc;

/// Longest description kept, in characters.
const MAX_DESCRIPTION_LEN: usize = 500;

/// Append an audit entry for an operation.
pub fn record(
    storage: &mut Storage,
    action: AuditAction,
    description: impl Into<String>,
    actor: &Actor,
    target_id: Option<&str>,
) -> Result<AuditEntry> {
    let entry = AuditEntry {
        id: uuid::Uuid::new_v4().to_string(),
        action,
        description: sanitize_description(&description.into()),
        actor_id: actor.id.clone(),
        actor_name: actor.name.clone(),
        timestamp: Utc::now(),
        target_id: target_id.map(str::to_string),
    };

    storage.append_audit(&entry)?;
    tracing::info!(
        action = %entry.action,
        actor = %entry.actor_id,
        target = entry.target_id.as_deref().unwrap_or("-"),
        "audit"
    );
    Ok(entry)
}

/// Mask `password=...` style fragments and cap the length.
pub fn sanitize_description(description: &str) -> String {
    let masked: Vec<String> = description
        .split(' ')
        .map(|word| match word.split_once('=') {
            Some((key, _)) if is_sensitive_key(&key.to_lowercase()) => {
                format!("{}=[REDACTED]", key)
            }
            _ => word.to_string(),
        })
        .collect();
    let joined = masked.join(" ");

    if joined.chars().count() > MAX_DESCRIPTION_LEN {
        let head: String = joined.chars().take(MAX_DESCRIPTION_LEN).collect();
        format!("{}...", head)
    } else {
        joined
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key = key.trim_start_matches('-');
    ["password", "senha", "token", "secret", "confirm"]
        .iter()
        .any(|s| key.contains(s))
}

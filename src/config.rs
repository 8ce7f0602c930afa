use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db;

pub const POLICY_SETTINGS_KEY: &str = "grading.policy";

/// What a period does with a bucket (class standing or exam) that has no
/// eligible components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmptyBucketPolicy {
    /// The empty bucket contributes 0% at its fixed weight.
    #[default]
    CountAsZero,
    /// The empty bucket is dropped and the other one carries 100%.
    Renormalize,
}

/// What a batch save does with a write aimed at a locked component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LockedWritePolicy {
    #[default]
    SkipSilently,
    /// Report the field as a failed row. The rest of the batch still commits.
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct GradingPolicy {
    pub empty_bucket: EmptyBucketPolicy,
    pub locked_write: LockedWritePolicy,
}

/// Settings key of one teacher's policy. The bare [`POLICY_SETTINGS_KEY`]
/// holds the workspace default used by teachers who never set their own.
fn teacher_policy_key(teacher_id: &str) -> String {
    format!("{}:{}", POLICY_SETTINGS_KEY, teacher_id)
}

fn read_policy(conn: &Connection, key: &str) -> Option<GradingPolicy> {
    match db::settings_get_json(conn, key) {
        Ok(None) => None,
        Ok(Some(raw)) => Some(serde_json::from_value(raw).unwrap_or_else(|e| {
            tracing::warn!(key, error = %e, "malformed grading policy setting, using defaults");
            GradingPolicy::default()
        })),
        Err(e) => {
            tracing::warn!(key, error = %e, "failed to read grading policy, using defaults");
            None
        }
    }
}

/// The teacher's policy, else the workspace default, else built-in defaults.
pub fn load_policy(conn: &Connection, teacher_id: &str) -> GradingPolicy {
    read_policy(conn, &teacher_policy_key(teacher_id))
        .or_else(|| read_policy(conn, POLICY_SETTINGS_KEY))
        .unwrap_or_default()
}

pub fn store_policy(conn: &Connection, teacher_id: &str, policy: &GradingPolicy) -> anyhow::Result<()> {
    db::settings_set_json(conn, &teacher_policy_key(teacher_id), &serde_json::to_value(policy)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_reproduce_observed_behaviour() {
        let p = GradingPolicy::default();
        assert_eq!(p.empty_bucket, EmptyBucketPolicy::CountAsZero);
        assert_eq!(p.locked_write, LockedWritePolicy::SkipSilently);
    }

    #[test]
    fn policy_roundtrips_through_settings() {
        let conn = db::open_in_memory().expect("db");
        assert_eq!(load_policy(&conn, "t1"), GradingPolicy::default());

        let p = GradingPolicy {
            empty_bucket: EmptyBucketPolicy::Renormalize,
            locked_write: LockedWritePolicy::Reject,
        };
        store_policy(&conn, "t1", &p).expect("store");
        assert_eq!(load_policy(&conn, "t1"), p);
    }

    #[test]
    fn policies_are_kept_per_teacher() {
        let conn = db::open_in_memory().expect("db");
        let p = GradingPolicy {
            empty_bucket: EmptyBucketPolicy::Renormalize,
            ..GradingPolicy::default()
        };
        store_policy(&conn, "t2", &p).expect("store");
        assert_eq!(load_policy(&conn, "t2"), p);
        assert_eq!(load_policy(&conn, "t1"), GradingPolicy::default());

        // A workspace-wide default applies until the teacher sets their own.
        let workspace = GradingPolicy {
            locked_write: LockedWritePolicy::Reject,
            ..GradingPolicy::default()
        };
        db::settings_set_json(&conn, POLICY_SETTINGS_KEY, &serde_json::to_value(workspace).expect("json"))
            .expect("set");
        assert_eq!(load_policy(&conn, "t1"), workspace);
        assert_eq!(load_policy(&conn, "t2"), p);
    }

    #[test]
    fn partial_or_bad_settings_fall_back() {
        let conn = db::open_in_memory().expect("db");
        db::settings_set_json(&conn, POLICY_SETTINGS_KEY, &json!({ "lockedWrite": "reject" }))
            .expect("set");
        let p = load_policy(&conn, "t1");
        assert_eq!(p.locked_write, LockedWritePolicy::Reject);
        assert_eq!(p.empty_bucket, EmptyBucketPolicy::CountAsZero);

        db::settings_set_json(&conn, POLICY_SETTINGS_KEY, &json!({ "emptyBucket": 7 }))
            .expect("set");
        assert_eq!(load_policy(&conn, "t1"), GradingPolicy::default());
    }
}

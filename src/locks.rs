use serde::Serialize;

use crate::calc::GradeComponent;
use crate::config::LockedWritePolicy;
use crate::error::GradeError;
use crate::store::{authorize_component, GradeStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleOutcome {
    pub success: bool,
    pub is_locked: bool,
}

/// Moves a component to `desired_locked`. Setting the state it already has is
/// accepted and changes nothing.
pub fn toggle(
    store: &dyn GradeStore,
    teacher_id: &str,
    component_id: &str,
    desired_locked: bool,
) -> Result<ToggleOutcome, GradeError> {
    let (component, _class) = authorize_component(store, component_id, teacher_id)?;
    if component.is_locked != desired_locked {
        store.set_component_locked(component_id, desired_locked)?;
        tracing::info!(
            component_id,
            teacher_id,
            locked = desired_locked,
            "component lock changed"
        );
    }
    Ok(ToggleOutcome {
        success: true,
        is_locked: desired_locked,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteDecision {
    Accept,
    /// Drop the field from the batch without reporting it.
    Skip,
    /// Drop the field and report it as a failed row.
    Reject,
}

pub fn gate(component: &GradeComponent, policy: LockedWritePolicy) -> WriteDecision {
    if !component.is_locked {
        return WriteDecision::Accept;
    }
    match policy {
        LockedWritePolicy::SkipSilently => WriteDecision::Skip,
        LockedWritePolicy::Reject => WriteDecision::Reject,
    }
}

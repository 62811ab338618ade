//! Checked transitions over the instance state machine.
//!
//! All status changes in the engine go through [`transition`] so that an
//! illegal edge surfaces as a [`ValidationError::InvalidTransition`]
//! instead of silently corrupting a record.

use corral_core::error::ValidationError;
use corral_core::types::{Instance, InstanceStatus};

/// Moves `instance` to `next`, updating its timestamp. Re-asserting the
/// current status is a no-op.
pub fn transition(
    instance: &mut Instance,
    next: InstanceStatus,
    now: u64,
) -> Result<(), ValidationError> {
    if instance.status == next {
        return Ok(());
    }
    if !instance.status.can_transition_to(next) {
        return Err(ValidationError::InvalidTransition {
            from: instance.status.to_string(),
            to: next.to_string(),
        });
    }
    instance.status = next;
    instance.updated_at = now;
    Ok(())
}

/// Parks `instance` in `Error`, recording the provider fault so an
/// operator can see why. Only legal from states with an edge to `Error`.
pub fn mark_error(
    instance: &mut Instance,
    fault: impl Into<String>,
    now: u64,
) -> Result<(), ValidationError> {
    transition(instance, InstanceStatus::Error, now)?;
    instance.provider_fault = Some(fault.into());
    Ok(())
}

//! Domain types for the corral fleet manager.
//!
//! These types represent the persisted state of entities, pools, runner
//! instances, cached CI jobs, and the controller identity. All types are
//! serializable to/from JSON for storage in redb tables.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Unique identifier for a pool.
pub type PoolId = String;

/// Unique identifier for an entity (repository, organization, enterprise).
pub type EntityId = String;

/// Globally unique, provider-facing instance name.
pub type InstanceName = String;

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ── Entity ─────────────────────────────────────────────────────────

/// The level a pool is attached to on the CI platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Repository,
    Organization,
    Enterprise,
}

/// A repository, organization, or enterprise that owns pools.
///
/// `credentials_name` is an opaque reference to the credential used to
/// authenticate against the CI platform on this entity's behalf; the
/// platform client itself lives outside the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    /// Platform-specific owner (user or org login).
    pub owner: String,
    /// Platform-specific name. Empty for organizations and enterprises.
    pub name: String,
    pub credentials_name: String,
}

impl Entity {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.owner.is_empty() {
            return Err(ValidationError::MissingEntityName);
        }
        if self.kind == EntityKind::Repository && self.name.is_empty() {
            return Err(ValidationError::MissingEntityName);
        }
        Ok(())
    }
}

// ── Pool ───────────────────────────────────────────────────────────

/// Operating systems runners may be created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OsType {
    Linux,
    Windows,
}

/// Architectures the CI platform supports for runners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OsArch {
    Amd64,
    Arm,
    Arm64,
}

/// Default prefix for generated runner names.
pub const DEFAULT_RUNNER_PREFIX: &str = "corral";

/// A named scaling unit bound to one entity.
///
/// The reconciler keeps `min_idle_runners` idle instances warm and never
/// lets the non-terminal total exceed `max_runners`. A disabled pool is
/// never the target of a create action; existing instances are left
/// alone unless explicitly drained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    pub id: PoolId,
    pub entity_id: EntityId,
    /// Selects the provider this pool creates compute through.
    pub provider_name: String,
    pub image: String,
    pub flavor: String,
    pub min_idle_runners: u32,
    pub max_runners: u32,
    /// Labels applied to created runners; a job matches the pool when
    /// every tag appears in the job's labels.
    pub tags: Vec<String>,
    pub enabled: bool,
    pub os_type: OsType,
    pub os_arch: OsArch,
    /// Prefix for generated runner names.
    #[serde(default = "default_runner_prefix")]
    pub runner_prefix: String,
    /// Maximum seconds an instance may stay in `creating` before it is
    /// treated as failed.
    pub bootstrap_timeout_secs: u64,
    pub created_at: u64,
    pub updated_at: u64,
}

fn default_runner_prefix() -> String {
    DEFAULT_RUNNER_PREFIX.to_string()
}

impl Pool {
    /// Validate operator-supplied parameters. Called before the pool is
    /// persisted and again before every scale-up decision.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_runners == 0 {
            return Err(ValidationError::MaxRunnersZero);
        }
        if self.min_idle_runners > self.max_runners {
            return Err(ValidationError::MinIdleExceedsMax {
                min: self.min_idle_runners,
                max: self.max_runners,
            });
        }
        if self.provider_name.is_empty() {
            return Err(ValidationError::MissingProvider);
        }
        if self.tags.is_empty() {
            return Err(ValidationError::MissingTags);
        }
        if self.image.is_empty() {
            return Err(ValidationError::MissingImage);
        }
        if self.flavor.is_empty() {
            return Err(ValidationError::MissingFlavor);
        }
        Ok(())
    }

    /// Generate a fresh, globally unique runner name for this pool.
    pub fn new_runner_name(&self) -> InstanceName {
        format!("{}-{}", self.runner_prefix, Uuid::new_v4())
    }

    /// True when every pool tag appears in the job's labels
    /// (case-insensitive).
    pub fn matches_labels(&self, labels: &[String]) -> bool {
        self.tags.iter().all(|tag| {
            labels
                .iter()
                .any(|label| label.eq_ignore_ascii_case(tag))
        })
    }
}

// ── Instance ───────────────────────────────────────────────────────

/// Provider-lifecycle state of an instance.
///
/// This axis is written by the reconciler (and, for `Running`/`Stopped`/
/// `Error`/`Unknown`, reported by providers). States implying create or
/// remove intent are set exclusively by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Unknown,
    Creating,
    Running,
    Stopped,
    PendingDelete,
    Deleting,
    Deleted,
    Error,
}

impl InstanceStatus {
    /// Terminal states leave the store on the next purge.
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceStatus::Deleted)
    }

    /// States that count toward `max_runners` admission control.
    pub fn counts_toward_cap(&self) -> bool {
        !matches!(self, InstanceStatus::Deleted)
    }

    /// The lifecycle transition table. Same-state writes are treated as
    /// no-ops by callers and are not listed here.
    pub fn can_transition_to(&self, next: InstanceStatus) -> bool {
        use InstanceStatus::*;
        match self {
            Unknown => matches!(next, Creating | Error | PendingDelete),
            Creating => matches!(next, Running | Stopped | Error | PendingDelete),
            Running => matches!(next, Stopped | Error | PendingDelete),
            Stopped => matches!(next, Running | Error | PendingDelete),
            PendingDelete => matches!(next, Deleting),
            Deleting => matches!(next, Deleted | Error),
            Deleted => false,
            Error => matches!(next, PendingDelete),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Unknown => "unknown",
            InstanceStatus::Creating => "creating",
            InstanceStatus::Running => "running",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::PendingDelete => "pending_delete",
            InstanceStatus::Deleting => "deleting",
            InstanceStatus::Deleted => "deleted",
            InstanceStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CI-platform-lifecycle state of the runner on an instance.
///
/// Written by the demand signal, never by the reconciler. Orthogonal to
/// `InstanceStatus`: an instance can be `running` at the provider while
/// `idle`, `active`, or still `pending` registration at the runner level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerStatus {
    /// Created but not yet registered with the CI platform.
    Pending,
    /// Registered and waiting for a job.
    Idle,
    /// A job is assigned.
    Active,
    /// The job completed; the runner will not take more work.
    Terminated,
}

/// One compute unit backing a CI runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    /// Provider-facing identifier, globally unique within this
    /// controller's namespace. Doubles as the idempotency key for
    /// provider create/delete retries.
    pub name: InstanceName,
    pub pool_id: PoolId,
    /// Opaque handle returned by the provider once created.
    pub provider_id: Option<String>,
    pub status: InstanceStatus,
    pub runner_status: RunnerStatus,
    /// Human-readable cause, set when `status` is `Error`.
    pub provider_fault: Option<String>,
    /// Bounded retry counter for provider create/delete attempts.
    pub attempt: u32,
    /// Operator requested removal bypassing provider confirmation.
    pub force_delete: bool,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Instance {
    /// A fresh record in `creating`, before the first provider call.
    pub fn new(pool: &Pool, name: InstanceName, now: u64) -> Self {
        Self {
            name,
            pool_id: pool.id.clone(),
            provider_id: None,
            status: InstanceStatus::Creating,
            runner_status: RunnerStatus::Pending,
            provider_fault: None,
            attempt: 0,
            force_delete: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// True once the instance is booted and its runner has no job.
    pub fn is_idle(&self) -> bool {
        self.status == InstanceStatus::Running
            && matches!(self.runner_status, RunnerStatus::Idle)
    }
}

// ── Controller ─────────────────────────────────────────────────────

/// Process-wide controller identity.
///
/// Generated once at first initialization, persisted, loaded at every
/// start, never mutated. Every runner this controller creates is tagged
/// with the ID so multiple controllers can share one CI account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerInfo {
    pub controller_id: Uuid,
}

impl ControllerInfo {
    pub fn generate() -> Self {
        Self {
            controller_id: Uuid::new_v4(),
        }
    }
}

// ── Job ────────────────────────────────────────────────────────────

/// Lifecycle state of a CI job as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    InProgress,
    Completed,
}

/// A CI-platform-reported unit of work.
///
/// Jobs are not owned by the controller — they are an external signal,
/// cached locally for demand estimation and visibility. Delivery is
/// at-least-once; consumers must be idempotent on `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub status: JobStatus,
    pub labels: Vec<String>,
    /// Set by the platform once a runner picks the job up.
    pub runner_name: Option<String>,
    /// Pool the job was matched to, if any.
    pub pool_id: Option<PoolId>,
    pub updated_at: u64,
}

// ── Provider interface version ─────────────────────────────────────

/// Version of the external provider contract.
///
/// Absence of a declared version in provider configuration means the
/// legacy contract, for backward compatibility with providers written
/// before the extended parameter set existed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterfaceVersion {
    #[default]
    #[serde(rename = "v0.1.0")]
    V0_1_0,
    #[serde(rename = "v0.1.1")]
    V0_1_1,
}

impl InterfaceVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterfaceVersion::V0_1_0 => "v0.1.0",
            InterfaceVersion::V0_1_1 => "v0.1.1",
        }
    }
}

//! Business logic services layer

pub mod audit_recorder;
pub mod credential_vault;
pub mod data_access;
pub mod feature_gate;
pub mod policy_engine;
pub mod principal_directory;
pub mod retention_scheduler;

pub use audit_recorder::{AuditEvent, AuditRecorder};
pub use credential_vault::CredentialVault;
pub use data_access::{ChildOutcome, DataAccessService};
pub use feature_gate::FeatureGate;
pub use policy_engine::PolicyEngine;
pub use principal_directory::PrincipalDirectory;
pub use retention_scheduler::RetentionScheduler;

//! Linkflow Types
//!
//! Entity structs and lifecycle state machines for the coordination layer:
//! executions, their dispatch-side job records, per-node result snapshots,
//! execution logs, and the webhook trigger descriptor.
//!
//! All cross-field invariants (status transitions, attempt bounds) live in
//! entity methods here. Persistence is a separate concern; see the store
//! crate for the port that reads and writes these rows transactionally.

mod credential;
mod enums;
mod execution;
mod job;
mod node_run;
mod partition;
mod webhook;
mod workflow;

pub use credential::{Credential, Variable};
pub use enums::{
  ExecutionMode, ExecutionStatus, JobState, LogLevel, NodeRunStatus, WebhookAuthType,
};
pub use execution::{Execution, TransitionError};
pub use job::JobStatus;
pub use node_run::{ExecutionLog, ExecutionNode};
pub use partition::partition;
pub use webhook::{Webhook, WebhookAuthConfig};
pub use workflow::Workflow;

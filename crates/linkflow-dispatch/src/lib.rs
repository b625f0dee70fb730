//! Linkflow Dispatch
//!
//! The [`Dispatcher`] turns a pending execution into a durable job: it
//! persists the job record, resolves exactly the credentials the workflow's
//! nodes reference, serializes the job message, and appends it to the
//! workspace's partition channel with bounded retries. The engine on the far
//! side answers asynchronously through the callback ingestor.

mod dispatcher;
mod error;
mod message;
mod worker;

pub use dispatcher::{DispatchConfig, DispatchReceipt, Dispatcher};
pub use error::DispatchError;
pub use message::{CredentialPayload, JobMessage, WorkflowGraph};
pub use worker::{DispatchRequest, run_worker};

//! Linkflow Queue
//!
//! The dispatcher reaches the execution engine only through an asynchronous
//! channel, never a direct call. [`JobChannel`] is that boundary: an ordered,
//! partitioned append-only stream of serialized job messages. The in-memory
//! implementation backs local development and tests; a broker-backed
//! implementation satisfies the same trait in production deployments.

use tokio::sync::mpsc;

/// Errors appending to a job channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
  /// The partition's consumer side is gone.
  #[error("channel closed for partition {partition}")]
  Closed { partition: u32 },

  /// The partition index is outside the configured range.
  #[error("unknown partition {partition} (configured: {partitions})")]
  UnknownPartition { partition: u32, partitions: u32 },

  /// Transport-level failure talking to the broker.
  #[error("channel transport error: {message}")]
  Transport { message: String },
}

/// Append-only access to the partitioned job channels.
pub trait JobChannel: Send + Sync {
  /// Append a serialized job message to the given partition's channel.
  fn append(
    &self,
    partition: u32,
    payload: String,
  ) -> impl std::future::Future<Output = Result<(), ChannelError>> + Send;
}

/// In-memory partitioned channel backed by unbounded mpsc queues, one per
/// partition. Consumers take the receiver halves.
pub struct InMemoryJobChannel {
  senders: Vec<mpsc::UnboundedSender<String>>,
}

impl InMemoryJobChannel {
  /// Create the channel set and hand back one receiver per partition.
  pub fn new(partitions: u32) -> (Self, Vec<mpsc::UnboundedReceiver<String>>) {
    let mut senders = Vec::with_capacity(partitions as usize);
    let mut receivers = Vec::with_capacity(partitions as usize);
    for _ in 0..partitions {
      let (tx, rx) = mpsc::unbounded_channel();
      senders.push(tx);
      receivers.push(rx);
    }
    (Self { senders }, receivers)
  }

  /// Number of configured partitions.
  pub fn partitions(&self) -> u32 {
    self.senders.len() as u32
  }
}

impl JobChannel for InMemoryJobChannel {
  async fn append(&self, partition: u32, payload: String) -> Result<(), ChannelError> {
    let sender = self
      .senders
      .get(partition as usize)
      .ok_or(ChannelError::UnknownPartition {
        partition,
        partitions: self.senders.len() as u32,
      })?;

    sender
      .send(payload)
      .map_err(|_| ChannelError::Closed { partition })
  }
}

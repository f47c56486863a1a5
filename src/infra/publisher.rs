//! Channel-backed publisher for finalized anchor events

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::FinalizedAnchorEvent;
use crate::infra::{Publisher, Result, WitnessError};

/// Publishes finalized anchor events onto a bounded tokio channel.
///
/// The receiving half belongs to whatever forwards anchor events downstream
/// (outbox, pub/sub topic). Publishing waits for capacity; a dropped receiver
/// is a publish error.
#[derive(Clone)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<FinalizedAnchorEvent>,
}

impl ChannelPublisher {
    /// Create a publisher and the receiver it feeds
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<FinalizedAnchorEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Publisher for ChannelPublisher {
    async fn publish(&self, finalized: &FinalizedAnchorEvent) -> Result<()> {
        self.tx
            .send(finalized.clone())
            .await
            .map_err(|_| WitnessError::Publish("publish channel closed".into()))?;

        tracing::debug!(
            anchor_event_id = %finalized.index(),
            witnesses = finalized.witnesses.len(),
            "Published finalized anchor event"
        );

        Ok(())
    }
}

use tokio::sync::mpsc;

use crate::db::UserId;
use crate::errors;
use crate::files::FileId;

/// Request to derive thumbnails for a freshly uploaded image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailJob {
    pub user_id: UserId,
    pub file_id: FileId,
    pub local_path: String,
}

/// Fire-and-forget handoff to whatever produces derived artifacts.
/// No retry happens on this side, the consumer owns its own durability.
pub trait JobDispatcher: Send + Sync {
    fn enqueue(&self, job: ThumbnailJob) -> errors::Result<()>;
}

/// Process-wide dispatcher feeding an in-memory queue.
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    sender: mpsc::UnboundedSender<ThumbnailJob>,
}

impl ChannelDispatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ThumbnailJob>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl JobDispatcher for ChannelDispatcher {
    fn enqueue(&self, job: ThumbnailJob) -> errors::Result<()> {
        self.sender
            .send(job)
            .map_err(|err| anyhow!("thumbnail queue is closed, dropped {:?}", err.0))?;
        Ok(())
    }
}

/// Consume jobs until every dispatcher is gone. Generating the thumbnails
/// themselves happens out of process, this only acknowledges the handoff.
pub async fn drain(mut receiver: mpsc::UnboundedReceiver<ThumbnailJob>) -> usize {
    let mut n = 0;
    while let Some(job) = receiver.recv().await {
        n += 1;
        log::info!(
            "thumbnail job for file {} of user {} at {}",
            job.file_id,
            job.user_id,
            job.local_path
        );
    }
    log::debug!("thumbnail queue closed after {n} jobs");
    n
}

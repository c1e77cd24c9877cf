use async_trait::async_trait;

use mediagate_core::AttachmentId;

use crate::error::PipelineError;

/// The host's attachment download pipeline.
///
/// Implemented by the embedding application. The gate calls it to fetch
/// bytes it has to hash; the retry scheduler calls it to release downloads
/// whose content is no longer blocked.
#[async_trait]
pub trait AttachmentPipeline: Send + Sync {
    /// Fetch the raw bytes of an attachment.
    async fn fetch_attachment_bytes(
        &self,
        attachment_id: &AttachmentId,
    ) -> Result<Vec<u8>, PipelineError>;

    /// Flag a previously deferred attachment as ready to download.
    async fn mark_ready_for_download(&self, attachment_id: &AttachmentId)
    -> Result<(), PipelineError>;

    /// Nudge the host to start any pending downloads. Must not block.
    fn begin_downloading_if_necessary(&self);
}

use crate::consensus::ConsensusError;

/// Classified outcome of feeding one block through the processor.
///
/// The processor is the single funnel for classification; the loops above
/// it only decide whether to queue, retry or drop based on these
/// categories. A block that is already stored is not an error (the
/// processor reports it as a non-trunk success and counts it as ignored).
#[derive(thiserror::Error, Debug)]
pub enum ProcessError {
    /// The block number is more than one ahead of anything stored; the
    /// caller may queue it for replay.
    #[error("block is temporarily unprocessable")]
    TemporarilyUnprocessable,
    /// The parent block is not stored yet.
    #[error("parent block is missing")]
    ParentMissing,
    /// The block's timestamp is ahead of local wall time.
    #[error("block timestamp is in the future")]
    FutureBlock,
    /// The parent sits on a branch the finality engine has abandoned.
    #[error("parent is on a branch abandoned by the finality engine")]
    BftRejected,
    /// The block violates a consensus rule; dropped.
    #[error("consensus rejected block: {0}")]
    Critical(String),
    /// Consensus processing failed for a non-rule reason; dropped.
    #[error("failed to process block")]
    Transient(#[source] anyhow::Error),
    /// Commit-path failure (state, repository or BFT commit); fatal for
    /// this block and propagated to the caller.
    #[error(transparent)]
    Fatal(anyhow::Error),
}

impl ProcessError {
    /// Whether the block may succeed later and should be parked in the
    /// future-block cache.
    pub fn is_queueable(&self) -> bool {
        matches!(
            self,
            ProcessError::TemporarilyUnprocessable
                | ProcessError::ParentMissing
                | ProcessError::FutureBlock
        )
    }
}

impl From<ConsensusError> for ProcessError {
    fn from(err: ConsensusError) -> Self {
        match err {
            ConsensusError::FutureBlock => ProcessError::FutureBlock,
            ConsensusError::Critical(reason) => ProcessError::Critical(reason),
            ConsensusError::Other(err) => ProcessError::Transient(err),
        }
    }
}

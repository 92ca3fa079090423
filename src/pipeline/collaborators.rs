use bon::Builder;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use crate::extract::StreamExtractor;
use crate::ledger::DedupStore;
use crate::media::{MediaMerger, MediaSplitter};
use crate::progress::ProgressDisplay;
use crate::transport::UploadTransport;

/// External services the stages call out to.
///
/// ```rust,ignore
/// let collaborators = Collaborators::builder()
///     .extractor(Arc::new(PageExtractor::new(http.clone())?))
///     .merger(ffmpeg.clone())
///     .splitter(ffmpeg)
///     .dedup(Arc::new(FjallDedupStore::open("data/dedup")?))
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct Collaborators {
    pub extractor: Arc<dyn StreamExtractor>,
    pub merger: Arc<dyn MediaMerger>,
    pub splitter: Arc<dyn MediaSplitter>,
    /// Required when remote distribution is enabled
    pub transport: Option<Arc<dyn UploadTransport>>,
    pub dedup: Arc<dyn DedupStore>,
    /// Where progress bars are drawn; share it with the log writer. A
    /// private stderr display is used when absent.
    pub display: Option<ProgressDisplay>,
}

/// Dedup keys of jobs currently between dispatch and their terminal state.
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    keys: Mutex<HashSet<String>>,
}

impl InFlight {
    /// `false` when the key is already claimed.
    pub(crate) fn claim(&self, key: &str) -> bool {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string())
    }

    pub(crate) fn release(&self, key: &str) {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

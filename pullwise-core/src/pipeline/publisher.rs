//! Posts generated reviews back to the pull request

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::providers::VersionControl;
use crate::retry::{Retrier, RetryPolicy};
use crate::{Error, Result};

#[derive(Clone)]
pub struct Publisher {
    vcs: Arc<dyn VersionControl>,
    retrier: Retrier<Error>,
}

impl Publisher {
    pub fn new(vcs: Arc<dyn VersionControl>) -> Self {
        Self {
            vcs,
            retrier: Retrier::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy<Error>) -> Self {
        self.retrier = Retrier::new(policy);
        self
    }

    /// Post `body` as a comment on pull request `number`
    pub async fn publish(
        &self,
        cancel: &CancellationToken,
        owner: &str,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<()> {
        self.retrier
            .run(cancel, || self.vcs.post_comment(owner, repo, number, body))
            .await?;
        info!(owner, repo, number, "Published review comment");
        Ok(())
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("retrier", &self.retrier)
            .finish_non_exhaustive()
    }
}

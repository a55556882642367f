use std::future::Future;

use super::{DbError, factory::SessionFactory};

/// Transactional
///
/// Commit-or-rollback around one use case, applied at use-case entry points.
///
/// `run` executes the operation against the ambient session. `Ok` commits it; `Err` rolls it
/// back and hands the operation's own error back untouched. When wrappers nest on the same
/// session, only the outermost one finalizes. Nothing is retried.
#[derive(Clone)]
pub struct Transactional {
    sessions: SessionFactory,
}

impl Transactional {
    pub fn new(sessions: SessionFactory) -> Self {
        Self { sessions }
    }

    pub async fn run<F, Fut, T, E>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<DbError>,
    {
        let session = self.sessions.resolve()?;
        let depth = session.enter_transaction();

        let result = op().await;
        if !depth.is_outermost() {
            return result;
        }

        match result {
            Ok(value) => match session.commit().await {
                Ok(()) => Ok(value),
                Err(err) => {
                    tracing::error!(error = %err, "commit failed, rolling back");
                    if let Err(rollback_err) = session.rollback().await {
                        tracing::error!(error = %rollback_err, "rollback after failed commit failed");
                    }
                    Err(err.into())
                }
            },
            Err(err) => {
                if let Err(rollback_err) = session.rollback().await {
                    tracing::error!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}

//! Fixed-interval retry loops

use super::{CallDescriptor, ExistsFn, HookContext};
use crate::error::{ActionError, EngineError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Ceiling of the delete/disassociate retry loop
pub const DELETE_RETRY_CEILING: Duration = Duration::from_secs(15 * 60);

/// Re-issue a failed delete-type call until the object is gone.
///
/// Each round checks existence first and only re-invokes the call while the
/// object still exists. Not-found from either step counts as success; a
/// non-transient failure of the existence check ends the loop.
pub(super) async fn retry_until_gone(
    descriptor: &CallDescriptor<'_>,
    hook: HookContext<'_>,
    exists: &ExistsFn<'_>,
    ceiling: Duration,
    initial: ActionError,
) -> Result<()> {
    if initial.is_not_found() {
        tracing::debug!(action = %descriptor.action, "already gone");
        return Ok(());
    }

    let deadline = Instant::now() + ceiling;
    let mut last_error = EngineError::Transient {
        action: descriptor.action.clone(),
        resource_id: hook.resource_id.to_string(),
        source: initial,
    };
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        tracing::warn!(
            action = %descriptor.action,
            resource = %hook.resource_id,
            attempt,
            error = %last_error,
            "retrying until the object is gone"
        );

        match exists(hook).await {
            Ok(false) => return Ok(()),
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) if e.is_retryable() => last_error = e,
            Err(e) => {
                tracing::error!(action = %descriptor.action, error = %e, "existence check failed, giving up");
                return Err(e);
            }
            Ok(true) => match descriptor.invoke(hook).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => {
                    last_error = EngineError::Transient {
                        action: descriptor.action.clone(),
                        resource_id: hook.resource_id.to_string(),
                        source: e,
                    }
                }
            },
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(EngineError::Timeout {
                what: format!("{} on {} to take effect", descriptor.action, hook.resource_id),
                timeout: ceiling,
                last_state: last_error.to_string(),
            });
        }
        sleep(hook.poll_interval.min(deadline - now)).await;
    }
}

/// Retry `f` on a fixed interval while it fails with a retryable error
pub async fn retry_while<T, F, Fut>(what: &str, ceiling: Duration, interval: Duration, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let deadline = Instant::now() + ceiling;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(EngineError::Timeout {
                        what: what.to_string(),
                        timeout: ceiling,
                        last_state: e.to_string(),
                    });
                }
                tracing::warn!(what, error = %e, "retryable failure, polling again");
                sleep(interval.min(deadline - now)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

//! Optimistic local mutation with a compensating undo.

use std::future::Future;

use tokio::sync::RwLock;

use crate::Result;

/// Apply `mutate` to the slot at once, then run `commit`. If the commit
/// fails, `rollback` receives whatever `mutate` returned and undoes the
/// change.
///
/// The slot lock is released while `commit` runs, so readers see the
/// optimistic value in the meantime. `rollback` only touches the part it was
/// handed; unrelated updates made during the commit survive.
pub async fn apply_with_rollback<T, U, O, Fut>(
    slot: &RwLock<T>,
    mutate: impl FnOnce(&mut T) -> U,
    commit: impl FnOnce() -> Fut,
    rollback: impl FnOnce(&mut T, U),
) -> Result<O>
where
    Fut: Future<Output = Result<O>>,
{
    let undo = {
        let mut guard = slot.write().await;
        mutate(&mut guard)
    };

    match commit().await {
        Ok(output) => Ok(output),
        Err(error) => {
            tracing::warn!("Rolling back optimistic update: {}", error);
            rollback(&mut *slot.write().await, undo);
            Err(error)
        }
    }
}

//! Scoped toggle: "set a remote flag to X while a block runs, restore
//! afterward", lifted out of the ATM/profile flows as a reusable primitive
//! (spec §4.6, §9).
//!
//! Grounded on `examples/original_source/src/luxos/luxminer.py`'s
//! `with_atm` async context manager. A `Drop` guard cannot run async
//! restore code, so this is implemented as a plain `async fn` that always
//! runs the restore step after the body — success or failure — rather than
//! relying on unwind-driven cleanup.

use tracing::error;

/// Run `body` with a remote flag set to `target`, restoring the original
/// value afterward regardless of how `body` exits.
///
/// - `read` fetches the current value.
/// - `write` sets a new value.
/// - If the current value already equals `target`, no write is issued, but
///   the original value is still yielded to `body` (spec: "still yield the
///   original value; do not issue a write").
/// - Restoration always runs, even if `body` returns an error. If `body`
///   succeeded but restoration fails, the restore error is returned
///   (spec: "if restore fails, the failure is reported but not hidden").
///   If `body` failed, the restore is still attempted best-effort and its
///   failure is logged, but `body`'s error is what's returned — a failing
///   operation's own error should not be masked by a best-effort cleanup
///   failure.
pub async fn with_toggle<T, V, E, ReadFut, WriteFut, BodyFut>(
    read: impl Fn() -> ReadFut,
    write: impl Fn(V) -> WriteFut,
    target: V,
    body: impl FnOnce(V) -> BodyFut,
) -> Result<T, E>
where
    V: Clone + PartialEq,
    ReadFut: std::future::Future<Output = Result<V, E>>,
    WriteFut: std::future::Future<Output = Result<(), E>>,
    BodyFut: std::future::Future<Output = Result<T, E>>,
{
    let original = read().await?;
    if original != target {
        write(target.clone()).await?;
    }

    let body_result = body(original.clone()).await;

    if original != target {
        if let Err(e) = write(original).await {
            error!("scoped toggle restore failed");
            if body_result.is_ok() {
                return Err(e);
            }
        }
    }

    body_result
}

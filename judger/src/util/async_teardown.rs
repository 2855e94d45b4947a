use async_trait::async_trait;

/// Data structure that needs to be teared down asynchronously.
///
/// This trait is used in the place of `AsyncDrop`, which is unfortunately
/// not available for now. Types implementing it own some external resource
/// (a container, a directory on disk) and must have `teardown()` awaited on
/// every exit path. Their `Drop` impls only perform a best-effort fallback
/// for the paths where that cannot happen, e.g. unwinding or a dropped future.
#[async_trait]
pub trait AsyncTeardown: Sync + Send {
    async fn teardown(&mut self);
}

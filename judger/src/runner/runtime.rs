use async_trait::async_trait;
use futures::stream::BoxStream;

use super::model::{AttachedIo, UnitSpec};

/// The container runtime operations the judge relies on.
///
/// [`super::docker::DockerRuntime`] is the production implementation. Keeping
/// this as a trait lets the sandbox protocol be exercised against a fake.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Whether `image` is present in the local image store.
    async fn image_present(&self, image: &str) -> anyhow::Result<bool>;

    /// Pull `image`, returning once the pull has fully completed.
    async fn pull_image(&self, image: &str) -> anyhow::Result<()>;

    /// Create a stopped execution unit. Returns its id.
    async fn create_unit(&self, spec: &UnitSpec) -> anyhow::Result<String>;

    /// Attach the multiplexed stdin/stdout/stderr channel. Must be called
    /// before [`Self::start_unit`] so that no output is missed.
    async fn attach_unit(&self, id: &str) -> anyhow::Result<AttachedIo>;

    async fn start_unit(&self, id: &str) -> anyhow::Result<()>;

    /// Kill the unit's processes. Killing a unit that already stopped is not
    /// an error.
    async fn kill_unit(&self, id: &str) -> anyhow::Result<()>;

    /// Forcibly remove the unit and its resources. Removing a unit that is
    /// already gone is not an error.
    async fn remove_unit(&self, id: &str) -> anyhow::Result<()>;

    /// Memory usage samples of a running unit, in bytes. The stream ends when
    /// the unit stops; it may yield nothing at all.
    fn memory_samples(&self, id: &str) -> BoxStream<'static, u64>;
}

use std::sync::Arc;

use anyhow::Context;
use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::lang::LanguageRegistry;

use super::runtime::ContainerRuntime;

/// Makes sure runtime images are present before containers get created from
/// them.
///
/// The first call for an image inspects the local store and pulls on a miss;
/// concurrent callers for the same image wait on that one attempt. Once an
/// image is known to be present, later calls return without touching the
/// runtime. A failed attempt is not cached and will be retried.
pub struct ImageProvisioner {
    runtime: Arc<dyn ContainerRuntime>,
    ready: DashMap<String, Arc<OnceCell<()>>>,
}

impl ImageProvisioner {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        ImageProvisioner {
            runtime,
            ready: DashMap::new(),
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn ensure_available(&self, image: &str) -> anyhow::Result<()> {
        // Clone the cell out so no map shard stays locked across the await.
        let cell = self.ready.entry(image.to_owned()).or_default().clone();
        cell.get_or_try_init(|| self.provision(image)).await?;
        Ok(())
    }

    /// Whether `image` was already provisioned through this instance.
    pub fn is_ready(&self, image: &str) -> bool {
        self.ready
            .get(image)
            .map_or(false, |cell| cell.initialized())
    }

    /// Provision the images of every registered language, one after another.
    pub async fn provision_all(&self, registry: &LanguageRegistry) -> anyhow::Result<()> {
        for spec in registry.iter() {
            self.ensure_available(&spec.image)
                .await
                .with_context(|| format!("Failed to provision image for {}", spec.language))?;
        }
        Ok(())
    }

    async fn provision(&self, image: &str) -> anyhow::Result<()> {
        if self.runtime.image_present(image).await? {
            tracing::debug!("Image already present");
            return Ok(());
        }
        tracing::info!("Image not found locally, pulling");
        self.runtime
            .pull_image(image)
            .await
            .with_context(|| format!("Failed to pull image {}", image))?;
        tracing::info!("Image pulled");
        Ok(())
    }
}

//! Container engine client.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures::StreamExt;

use crate::error::EngineError;
use crate::shutdown::ShutdownListener;

/// Operations the launcher needs from a container engine.
#[async_trait]
pub trait ContainerEngine: Send + Sync + 'static {
    /// Whether the image is present in the local cache.
    async fn image_exists(&self, image: &str) -> Result<bool, EngineError>;

    /// Pull the image from its registry, reporting progress as it goes.
    ///
    /// Returns [`EngineError::Interrupted`] if `shutdown` fires mid-pull.
    async fn pull_image(&self, image: &str, shutdown: &mut ShutdownListener)
        -> Result<(), EngineError>;

    /// Create a container running `image` and return its id.
    async fn create_container(&self, image: &str) -> Result<String, EngineError>;

    /// Start a created container.
    async fn start_container(&self, id: &str) -> Result<(), EngineError>;

    /// Force-remove a container.
    async fn remove_container(&self, id: &str) -> Result<(), EngineError>;

    /// Release client resources.
    async fn close(&self) -> Result<(), EngineError> {
        Ok(())
    }
}

/// [`ContainerEngine`] backed by the Docker API through bollard.
///
/// The daemon endpoint and credentials come from the usual Docker
/// environment variables (`DOCKER_HOST` and friends).
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Build a client from the environment and check the daemon answers.
    pub async fn connect() -> Result<Self, EngineError> {
        let docker = Docker::connect_with_defaults().map_err(EngineError::Connect)?;
        let version = docker.version().await.map_err(EngineError::Connect)?;

        tracing::info!(
            version = ?version.version,
            api_version = ?version.api_version,
            "Connected to container engine"
        );

        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn image_exists(&self, image: &str) -> Result<bool, EngineError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn pull_image(
        &self,
        image: &str,
        shutdown: &mut ShutdownListener,
    ) -> Result<(), EngineError> {
        let (from_image, tag) = split_reference(image);
        let options = CreateImageOptions {
            from_image: from_image.to_string(),
            tag: tag.to_string(),
            ..Default::default()
        };
        let mut progress = std::pin::pin!(self.docker.create_image(Some(options), None, None));

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Err(EngineError::Interrupted),
                next = progress.next() => next,
            };
            let Some(info) = next else {
                break;
            };
            let info = info?;
            if let Some(error) = info.error {
                return Err(EngineError::Pull(error));
            }
            tracing::info!(
                image = %image,
                layer = info.id.as_deref().unwrap_or(""),
                status = info.status.as_deref().unwrap_or(""),
                progress = info.progress.as_deref().unwrap_or(""),
                "Pull progress"
            );
        }

        Ok(())
    }

    async fn create_container(&self, image: &str) -> Result<String, EngineError> {
        let config = Config {
            image: Some(image.to_string()),
            ..Default::default()
        };
        let response = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await?;

        for warning in &response.warnings {
            tracing::warn!(container_id = %response.id, warning = %warning, "Engine warning on create");
        }

        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), EngineError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker.remove_container(id, Some(options)).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        // bollard holds no session state; the connector is released on drop.
        tracing::debug!("Container engine client closed");
        Ok(())
    }
}

/// Split an image reference into the `fromImage` and `tag` pull parameters.
///
/// An empty tag makes the engine pull every tag of the repository, so an
/// untagged reference pulls `latest`. Digest references are passed whole.
fn split_reference(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[name_start..].rfind(':') {
        Some(i) => {
            let colon = name_start + i;
            (&image[..colon], &image[colon + 1..])
        }
        None => (image, "latest"),
    }
}

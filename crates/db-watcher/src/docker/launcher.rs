//! Container launcher: inspect, pull, create, start.

use crate::docker::engine::ContainerEngine;
use crate::error::{EngineError, LaunchError, LaunchPhase};
use crate::shutdown::ShutdownListener;

/// Launcher behavior switches.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Inspect the local cache and pull absent images before creating.
    pub pull_if_missing: bool,

    /// Force-remove a container that was created but failed to start.
    pub cleanup_on_start_failure: bool,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            pull_if_missing: true,
            cleanup_on_start_failure: true,
        }
    }
}

/// A single launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub image: String,
    pub pull_if_missing: bool,
}

/// A started container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    /// Engine-assigned container id.
    pub id: String,

    pub image: String,

    /// Whether the image was pulled for this launch.
    pub pulled: bool,
}

/// Turns image references into running containers.
pub struct Launcher<E: ContainerEngine> {
    engine: E,
    options: LaunchOptions,
    closed: bool,
}

impl<E: ContainerEngine> Launcher<E> {
    pub fn new(engine: E, options: LaunchOptions) -> Self {
        Self {
            engine,
            options,
            closed: false,
        }
    }

    /// Build a request for `image`, optionally overriding the configured
    /// pull behavior.
    pub fn request(&self, image: &str, pull_if_missing: Option<bool>) -> LaunchRequest {
        LaunchRequest {
            image: image.to_string(),
            pull_if_missing: pull_if_missing.unwrap_or(self.options.pull_if_missing),
        }
    }

    /// Create and start a container for the request.
    ///
    /// `shutdown` is checked before every phase; an engine call already in
    /// flight runs to completion, an image pull is interrupted.
    pub async fn launch(
        &self,
        request: &LaunchRequest,
        shutdown: &mut ShutdownListener,
    ) -> Result<ContainerHandle, LaunchError> {
        let image = request.image.as_str();
        let mut pulled = false;

        if request.pull_if_missing {
            ensure_running(image, LaunchPhase::Inspect, shutdown)?;
            let present = self
                .engine
                .image_exists(image)
                .await
                .map_err(|source| LaunchError::Inspect {
                    image: image.to_string(),
                    source,
                })?;

            if !present {
                ensure_running(image, LaunchPhase::Pull, shutdown)?;
                tracing::info!(image = %image, "Image not found locally, pulling");
                self.engine
                    .pull_image(image, shutdown)
                    .await
                    .map_err(|source| match source {
                        EngineError::Interrupted => LaunchError::Cancelled {
                            image: image.to_string(),
                            phase: LaunchPhase::Pull,
                        },
                        source => LaunchError::Pull {
                            image: image.to_string(),
                            source,
                        },
                    })?;
                pulled = true;
                tracing::info!(image = %image, "Image pulled");
            }
        }

        ensure_running(image, LaunchPhase::Create, shutdown)?;
        let id = self
            .engine
            .create_container(image)
            .await
            .map_err(|source| LaunchError::Create {
                image: image.to_string(),
                source,
            })?;
        tracing::debug!(container_id = %id, image = %image, "Container created");

        if shutdown.is_cancelled() {
            self.discard(&id, image).await;
            return Err(LaunchError::Cancelled {
                image: image.to_string(),
                phase: LaunchPhase::Start,
            });
        }

        if let Err(source) = self.engine.start_container(&id).await {
            let removed = self.discard(&id, image).await;
            return Err(LaunchError::Start {
                image: image.to_string(),
                container_id: id,
                removed,
                source,
            });
        }

        tracing::info!(container_id = %id, image = %image, "Container started");

        Ok(ContainerHandle {
            id,
            image: image.to_string(),
            pulled,
        })
    }

    /// Apply the cleanup policy to a created container that will not run.
    /// Returns whether it was removed.
    async fn discard(&self, id: &str, image: &str) -> bool {
        if !self.options.cleanup_on_start_failure {
            tracing::warn!(
                container_id = %id,
                image = %image,
                "Leaving created container behind, cleanup disabled"
            );
            return false;
        }

        match self.engine.remove_container(id).await {
            Ok(()) => {
                tracing::info!(container_id = %id, image = %image, "Removed unstarted container");
                true
            }
            Err(e) => {
                tracing::warn!(
                    container_id = %id,
                    image = %image,
                    error = %e,
                    "Failed to remove unstarted container"
                );
                false
            }
        }
    }

    /// Release the engine client. Later calls are no-ops.
    pub async fn close(&mut self) -> Result<(), EngineError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.engine.close().await
    }
}

fn ensure_running(
    image: &str,
    phase: LaunchPhase,
    shutdown: &ShutdownListener,
) -> Result<(), LaunchError> {
    if shutdown.is_cancelled() {
        return Err(LaunchError::Cancelled {
            image: image.to_string(),
            phase,
        });
    }
    Ok(())
}

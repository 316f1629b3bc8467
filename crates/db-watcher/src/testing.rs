//! In-memory stand-ins for the database session and the container engine.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::docker::ContainerEngine;
use crate::error::EngineError;
use crate::postgres::NotificationSession;
use crate::shutdown::ShutdownListener;

/// Observations recorded by a [`FakeSession`].
#[derive(Default)]
pub(crate) struct SessionRecord {
    listens: Mutex<Vec<String>>,
    pub recv_calls: AtomicUsize,
    pub closes: AtomicUsize,
}

impl SessionRecord {
    pub fn listens(&self) -> Vec<String> {
        self.listens.lock().unwrap().clone()
    }
}

/// Feeds notifications (or wait errors) into a [`FakeSession`].
pub(crate) struct SessionFeed {
    tx: mpsc::UnboundedSender<Result<String, sqlx::Error>>,
}

impl SessionFeed {
    pub fn send(&self, payload: &str) {
        self.tx.send(Ok(payload.to_string())).unwrap();
    }

    pub fn fail(&self, message: &str) {
        self.tx
            .send(Err(sqlx::Error::Protocol(message.to_string())))
            .unwrap();
    }
}

/// Session whose `recv` yields whatever the feed provides and otherwise
/// blocks, like a quiet database.
pub(crate) struct FakeSession {
    feed: mpsc::UnboundedReceiver<Result<String, sqlx::Error>>,
    seen: Arc<SessionRecord>,
    pub fail_listen: bool,
}

pub(crate) fn fake_session() -> (FakeSession, SessionFeed, Arc<SessionRecord>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let seen = Arc::new(SessionRecord::default());
    let session = FakeSession {
        feed: rx,
        seen: seen.clone(),
        fail_listen: false,
    };
    (session, SessionFeed { tx }, seen)
}

#[async_trait]
impl NotificationSession for FakeSession {
    async fn listen(&mut self, channel: &str) -> Result<(), sqlx::Error> {
        self.seen.listens.lock().unwrap().push(channel.to_string());
        if self.fail_listen {
            return Err(sqlx::Error::Protocol(format!(
                "permission denied for channel {channel}"
            )));
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<String, sqlx::Error> {
        self.seen.recv_calls.fetch_add(1, Ordering::SeqCst);
        match self.feed.recv().await {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), sqlx::Error> {
        self.seen.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Mutable state behind a [`FakeEngine`].
#[derive(Default)]
pub(crate) struct EngineState {
    /// Images in the local cache.
    pub local: HashSet<String>,
    /// Images the registry can serve.
    pub registry: HashSet<String>,
    pub fail_inspect: bool,
    /// Images whose containers fail to start.
    pub fail_start: HashSet<String>,
    pub fail_remove: bool,
    /// How long `pull_image` takes; a stop request cuts it short.
    pub pull_delay: Option<Duration>,
    /// How long `create_container` takes.
    pub create_delay: Option<Duration>,
    /// Make `create_container` panic.
    pub panic_on_create: bool,
    /// Live containers as `(id, image)`.
    pub containers: Vec<(String, String)>,
    pub calls: Vec<String>,
    pub closes: usize,
    next_id: usize,
}

/// Container engine that keeps everything in memory.
#[derive(Clone, Default)]
pub(crate) struct FakeEngine {
    state: Arc<Mutex<EngineState>>,
}

impl FakeEngine {
    pub fn with_local(images: &[&str]) -> Self {
        let engine = Self::default();
        engine
            .state()
            .local
            .extend(images.iter().map(|i| i.to_string()));
        engine
    }

    pub fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Images that reached `create`, in order.
    pub fn created_images(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|c| c.strip_prefix("create:").map(str::to_string))
            .collect()
    }
}

fn api_error(status_code: u16, message: String) -> EngineError {
    EngineError::Api(bollard::errors::Error::DockerResponseServerError {
        status_code,
        message,
    })
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn image_exists(&self, image: &str) -> Result<bool, EngineError> {
        let mut state = self.state();
        state.calls.push(format!("inspect:{image}"));
        if state.fail_inspect {
            return Err(api_error(500, "inspect failed".to_string()));
        }
        Ok(state.local.contains(image))
    }

    async fn pull_image(
        &self,
        image: &str,
        shutdown: &mut ShutdownListener,
    ) -> Result<(), EngineError> {
        if shutdown.is_cancelled() {
            return Err(EngineError::Interrupted);
        }
        let delay = {
            let mut state = self.state();
            state.calls.push(format!("pull:{image}"));
            state.pull_delay
        };
        if let Some(delay) = delay {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Err(EngineError::Interrupted),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let mut state = self.state();
        if !state.registry.contains(image) {
            return Err(api_error(404, format!("manifest for {image} not found")));
        }
        state.local.insert(image.to_string());
        Ok(())
    }

    async fn create_container(&self, image: &str) -> Result<String, EngineError> {
        let (delay, panic) = {
            let mut state = self.state();
            state.calls.push(format!("create:{image}"));
            (state.create_delay, state.panic_on_create)
        };
        if panic {
            panic!("engine client bug while creating {image}");
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if !state.local.contains(image) {
            return Err(api_error(404, format!("No such image: {image}")));
        }
        state.next_id += 1;
        let id = format!("container-{}", state.next_id);
        state.containers.push((id.clone(), image.to_string()));
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        state.calls.push(format!("start:{id}"));
        let image = state
            .containers
            .iter()
            .find(|(cid, _)| cid == id)
            .map(|(_, image)| image.clone())
            .ok_or_else(|| api_error(404, format!("No such container: {id}")))?;
        if state.fail_start.contains(&image) {
            return Err(api_error(500, "exec format error".to_string()));
        }
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        state.calls.push(format!("remove:{id}"));
        if state.fail_remove {
            return Err(api_error(409, "removal in progress".to_string()));
        }
        state.containers.retain(|(cid, _)| cid != id);
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.state().closes += 1;
        Ok(())
    }
}

//! Controller lifecycle and event loop.
//!
//! A [`Controller`] owns the notification listener and the launcher. Starting
//! it subscribes to the channel and spawns the run loop; the returned
//! [`RunningController`] (or any [`StopHandle`] cloned from it) stops it.
//! Whichever way the loop ends, the listener is closed before the launcher.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::docker::{ContainerEngine, Launcher};
use crate::error::ControllerError;
use crate::notification::ImageNotification;
use crate::postgres::{NotificationListener, NotificationSession};
use crate::shutdown::{ShutdownListener, ShutdownSignal};

/// Controller lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Created,
    Running,
    Stopping,
    Stopped,
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Payloads taken from the listener.
    pub received: u64,

    /// Containers started.
    pub launched: u64,

    /// Launches that failed.
    pub failed: u64,

    /// Payloads that could not be decoded.
    pub skipped: u64,
}

/// Bridges notifications to container launches.
pub struct Controller<S: NotificationSession, E: ContainerEngine> {
    source: NotificationListener<S>,
    launcher: Launcher<E>,
    channel: String,
    signal: ShutdownSignal,
    state: Arc<watch::Sender<ControllerState>>,
}

impl<S: NotificationSession, E: ContainerEngine> Controller<S, E> {
    /// Create a controller for `channel`.
    pub fn new(
        source: NotificationListener<S>,
        launcher: Launcher<E>,
        channel: impl Into<String>,
    ) -> Self {
        let (state, _) = watch::channel(ControllerState::Created);
        Self {
            source,
            launcher,
            channel: channel.into(),
            signal: ShutdownSignal::new(),
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> ControllerState {
        *self.state.borrow()
    }

    /// Subscribe and spawn the run loop.
    ///
    /// A subscription failure closes both collaborators and is returned;
    /// the controller never reaches `Running` in that case.
    pub async fn start(self) -> Result<RunningController, ControllerError> {
        let Controller {
            mut source,
            mut launcher,
            channel,
            signal,
            state,
        } = self;

        let notifications = match source.subscribe(&channel, signal.listener()).await {
            Ok(rx) => rx,
            Err(e) => {
                tracing::error!(channel = %channel, error = %e, "Failed to start listening");
                if let Err(close_err) = source.close().await {
                    tracing::warn!(error = %close_err, "Failed to close notification listener");
                }
                if let Err(close_err) = launcher.close().await {
                    tracing::warn!(error = %close_err, "Failed to close container launcher");
                }
                state.send_replace(ControllerState::Stopped);
                return Err(e.into());
            }
        };

        state.send_replace(ControllerState::Running);
        tracing::info!(channel = %channel, "Controller running");

        let run = Run {
            source,
            launcher,
            channel,
            notifications,
            stop: signal.listener(),
            signal: signal.clone(),
            state: state.clone(),
        };

        Ok(RunningController {
            task: tokio::spawn(run.run()),
            handle: StopHandle { signal, state },
        })
    }
}

/// Stops a running controller. Cheap to clone; stopping more than once is
/// harmless.
#[derive(Clone)]
pub struct StopHandle {
    signal: ShutdownSignal,
    state: Arc<watch::Sender<ControllerState>>,
}

impl StopHandle {
    /// Signal the run loop to stop. Returns `true` for the call that
    /// actually signaled.
    pub fn stop(&self) -> bool {
        if !self.signal.trigger() {
            return false;
        }
        mark_stopping(&self.state);
        tracing::info!("Stop requested");
        true
    }

    pub fn state(&self) -> ControllerState {
        *self.state.borrow()
    }

    /// Wait until the run loop has ended.
    ///
    /// Also resolves if the run task panicked; the collaborators are then
    /// dropped rather than closed.
    pub async fn stopped(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| *s == ControllerState::Stopped).await;
    }
}

/// A started controller.
pub struct RunningController {
    task: JoinHandle<Result<RunSummary, ControllerError>>,
    handle: StopHandle,
}

impl RunningController {
    pub fn stop_handle(&self) -> StopHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> ControllerState {
        self.handle.state()
    }

    /// Stop the loop and wait for shutdown to complete.
    pub async fn stop(self) -> Result<RunSummary, ControllerError> {
        self.handle.stop();
        self.join().await
    }

    /// Wait for the loop to end, by a stop signal or by a fatal error.
    pub async fn join(self) -> Result<RunSummary, ControllerError> {
        self.task.await?
    }
}

struct Run<S: NotificationSession, E: ContainerEngine> {
    source: NotificationListener<S>,
    launcher: Launcher<E>,
    channel: String,
    notifications: mpsc::Receiver<String>,
    stop: ShutdownListener,
    signal: ShutdownSignal,
    state: Arc<watch::Sender<ControllerState>>,
}

impl<S: NotificationSession, E: ContainerEngine> Run<S, E> {
    async fn run(mut self) -> Result<RunSummary, ControllerError> {
        let mut summary = RunSummary::default();

        let outcome = loop {
            let next = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break Ok(()),
                next = self.notifications.recv() => next,
            };

            let Some(payload) = next else {
                if self.stop.is_cancelled() {
                    break Ok(());
                }
                tracing::error!(channel = %self.channel, "Notification stream ended");
                break Err(ControllerError::SourceEnded(self.channel.clone()));
            };

            summary.received += 1;
            self.handle(&payload, &mut summary).await;
        };

        self.shutdown().await;

        tracing::info!(
            received = summary.received,
            launched = summary.launched,
            failed = summary.failed,
            skipped = summary.skipped,
            "Controller stopped"
        );

        outcome.map(|()| summary)
    }

    /// Launch a container for one payload. Failures stay with the payload.
    async fn handle(&mut self, payload: &str, summary: &mut RunSummary) {
        let notification = match ImageNotification::parse(payload) {
            Ok(notification) => notification,
            Err(e) => {
                tracing::warn!(payload = %payload, error = %e, "Skipping notification");
                summary.skipped += 1;
                return;
            }
        };

        tracing::info!(image = %notification.image, "Received notification for image");

        let request = self
            .launcher
            .request(&notification.image, notification.pull_if_missing);

        match self.launcher.launch(&request, &mut self.stop).await {
            Ok(handle) => {
                summary.launched += 1;
                tracing::debug!(
                    container_id = %handle.id,
                    image = %handle.image,
                    pulled = handle.pulled,
                    "Launch complete"
                );
            }
            Err(e) => {
                summary.failed += 1;
                tracing::error!(
                    image = %e.image(),
                    phase = %e.phase(),
                    error = %e,
                    "Failed to launch container"
                );
            }
        }
    }

    async fn shutdown(&mut self) {
        mark_stopping(&self.state);
        self.signal.trigger();

        if let Err(e) = self.source.close().await {
            tracing::error!(error = %e, "Failed to close notification listener");
        }
        if let Err(e) = self.launcher.close().await {
            tracing::error!(error = %e, "Failed to close container launcher");
        }

        self.state.send_replace(ControllerState::Stopped);
    }
}

impl<S: NotificationSession, E: ContainerEngine> Drop for Run<S, E> {
    fn drop(&mut self) {
        // Reached without `shutdown` only when the task unwinds.
        self.signal.trigger();
        self.state.send_if_modified(|current| {
            if *current == ControllerState::Stopped {
                return false;
            }
            *current = ControllerState::Stopped;
            true
        });
    }
}

fn mark_stopping(state: &watch::Sender<ControllerState>) {
    state.send_if_modified(|current| {
        if *current == ControllerState::Running {
            *current = ControllerState::Stopping;
            true
        } else {
            false
        }
    });
}

//! Error types for the watcher.
//!
//! Each collaborator has its own error enum so the controller can decide
//! which failures are fatal (connection, subscription) and which are
//! isolated to a single event (launch).

use std::fmt;
use thiserror::Error;

/// Errors raised by the PostgreSQL notification source.
#[derive(Error, Debug)]
pub enum ListenerError {
    /// Could not open the database session.
    #[error("unable to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    /// The database did not answer in time.
    #[error("timed out connecting to database after {0:?}")]
    ConnectTimeout(std::time::Duration),

    /// `LISTEN` on the channel failed.
    #[error("unable to listen on channel '{channel}': {source}")]
    Subscribe {
        channel: String,
        #[source]
        source: sqlx::Error,
    },

    /// The session already carries a subscription.
    #[error("session is already subscribed to '{0}'")]
    AlreadySubscribed(String),

    /// The session was closed before subscribing.
    #[error("session is closed")]
    Closed,

    /// Closing the session failed.
    #[error("unable to close database session: {0}")]
    Close(#[source] sqlx::Error),
}

/// Errors raised by the container engine client.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Could not reach the engine daemon.
    #[error("failed to connect to container engine: {0}")]
    Connect(#[source] bollard::errors::Error),

    /// An engine API call failed.
    #[error(transparent)]
    Api(#[from] bollard::errors::Error),

    /// The image pull stream reported an error record.
    #[error("pull reported an error: {0}")]
    Pull(String),

    /// The pull stream was interrupted by shutdown.
    #[error("pull interrupted by shutdown")]
    Interrupted,
}

/// The step of a launch that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchPhase {
    Inspect,
    Pull,
    Create,
    Start,
}

impl fmt::Display for LaunchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LaunchPhase::Inspect => "inspect",
            LaunchPhase::Pull => "pull",
            LaunchPhase::Create => "create",
            LaunchPhase::Start => "start",
        };
        f.write_str(name)
    }
}

/// A failed container launch.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("error inspecting image {image}: {source}")]
    Inspect {
        image: String,
        #[source]
        source: EngineError,
    },

    #[error("failed to pull image {image}: {source}")]
    Pull {
        image: String,
        #[source]
        source: EngineError,
    },

    #[error("unable to create container from {image}: {source}")]
    Create {
        image: String,
        #[source]
        source: EngineError,
    },

    /// Start failed after the container was created.
    ///
    /// `removed` reports whether the created container was cleaned up.
    #[error("unable to start container {container_id} ({image}): {source}")]
    Start {
        image: String,
        container_id: String,
        removed: bool,
        #[source]
        source: EngineError,
    },

    /// Shutdown was signaled before the phase could begin.
    #[error("launch of {image} cancelled before {phase}")]
    Cancelled { image: String, phase: LaunchPhase },
}

impl LaunchError {
    /// The phase this launch failed in.
    pub fn phase(&self) -> LaunchPhase {
        match self {
            LaunchError::Inspect { .. } => LaunchPhase::Inspect,
            LaunchError::Pull { .. } => LaunchPhase::Pull,
            LaunchError::Create { .. } => LaunchPhase::Create,
            LaunchError::Start { .. } => LaunchPhase::Start,
            LaunchError::Cancelled { phase, .. } => *phase,
        }
    }

    /// The image reference the launch was for.
    pub fn image(&self) -> &str {
        match self {
            LaunchError::Inspect { image, .. }
            | LaunchError::Pull { image, .. }
            | LaunchError::Create { image, .. }
            | LaunchError::Start { image, .. }
            | LaunchError::Cancelled { image, .. } => image,
        }
    }
}

/// Errors that end a controller run.
#[derive(Error, Debug)]
pub enum ControllerError {
    /// Subscribing to the notification channel failed.
    #[error("failed to start listening: {0}")]
    Subscribe(#[from] ListenerError),

    /// The notification stream ended without a stop signal.
    #[error("notification stream on '{0}' ended unexpectedly")]
    SourceEnded(String),

    /// The run task panicked or was aborted.
    #[error("controller task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Notification payload parse errors.
#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("empty notification payload")]
    Empty,

    #[error("invalid notification envelope: {0}")]
    Envelope(#[from] serde_json::Error),

    #[error("unsupported notification version {0}")]
    UnsupportedVersion(u32),

    #[error("unsupported notification kind '{0}'")]
    UnsupportedKind(String),
}

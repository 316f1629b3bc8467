//! Channel subscription and notification pump.
//!
//! The pump runs in its own task, waits on the session and hands payloads to
//! the consumer through a channel of capacity one. It exits when the run is
//! cancelled, when the listener is closed, when the consumer goes away, or
//! when wait errors exhaust the retry policy.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::ListenerError;
use crate::postgres::session::NotificationSession;
use crate::retry::RetryPolicy;
use crate::shutdown::{ShutdownListener, ShutdownSignal};

/// Owns a notification session and its background pump.
pub struct NotificationListener<S: NotificationSession> {
    /// Session, present while no pump holds it.
    session: Option<S>,

    /// Retry policy for wait errors.
    policy: RetryPolicy,

    /// Fired by `close` to stop the pump.
    closing: ShutdownSignal,

    /// Pump task; yields the session back when it exits.
    pump: Option<JoinHandle<S>>,

    /// Subscribed channel.
    channel: Option<String>,

    closed: bool,
}

impl<S: NotificationSession> NotificationListener<S> {
    /// Wrap an open session.
    pub fn new(session: S, policy: RetryPolicy) -> Self {
        Self {
            session: Some(session),
            policy,
            closing: ShutdownSignal::new(),
            pump: None,
            channel: None,
            closed: false,
        }
    }

    /// Channel this listener is subscribed to, if any.
    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    /// Subscribe to `channel` and start the pump.
    ///
    /// Returns the consumer end of the handoff. The stream ends when
    /// `shutdown` fires, when the listener is closed, or when the session
    /// keeps failing past the retry policy.
    pub async fn subscribe(
        &mut self,
        channel: &str,
        shutdown: ShutdownListener,
    ) -> Result<mpsc::Receiver<String>, ListenerError> {
        if self.closed {
            return Err(ListenerError::Closed);
        }
        if let Some(existing) = &self.channel {
            return Err(ListenerError::AlreadySubscribed(existing.clone()));
        }
        let mut session = self.session.take().ok_or(ListenerError::Closed)?;

        if let Err(source) = session.listen(channel).await {
            self.session = Some(session);
            return Err(ListenerError::Subscribe {
                channel: channel.to_string(),
                source,
            });
        }

        tracing::info!(channel = %channel, "Listening for notifications");

        let (tx, rx) = mpsc::channel(1);
        let pump = Pump {
            session,
            tx,
            shutdown,
            closing: self.closing.listener(),
            policy: self.policy.clone(),
            channel: channel.to_string(),
        };
        self.pump = Some(tokio::spawn(pump.run()));
        self.channel = Some(channel.to_string());

        Ok(rx)
    }

    /// Stop the pump and close the session.
    ///
    /// Only the first call does any work.
    pub async fn close(&mut self) -> Result<(), ListenerError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.closing.trigger();

        if let Some(pump) = self.pump.take() {
            match pump.await {
                Ok(session) => self.session = Some(session),
                Err(e) => tracing::error!(error = %e, "Notification pump task failed"),
            }
        }

        if let Some(mut session) = self.session.take() {
            session.close().await.map_err(ListenerError::Close)?;
        }

        tracing::debug!(channel = ?self.channel, "Notification listener closed");
        Ok(())
    }
}

struct Pump<S> {
    session: S,
    tx: mpsc::Sender<String>,
    shutdown: ShutdownListener,
    closing: ShutdownListener,
    policy: RetryPolicy,
    channel: String,
}

impl<S: NotificationSession> Pump<S> {
    async fn run(self) -> S {
        let Pump {
            mut session,
            tx,
            mut shutdown,
            mut closing,
            policy,
            channel,
        } = self;
        let mut failures: u32 = 0;

        loop {
            if shutdown.is_cancelled() || closing.is_cancelled() {
                break;
            }

            let received = tokio::select! {
                biased;
                _ = stopped(&mut shutdown, &mut closing) => break,
                received = session.recv() => received,
            };

            match received {
                Ok(payload) => {
                    failures = 0;
                    tracing::debug!(channel = %channel, payload = %payload, "Forwarding notification");

                    tokio::select! {
                        biased;
                        _ = stopped(&mut shutdown, &mut closing) => break,
                        sent = tx.send(payload) => {
                            if sent.is_err() {
                                tracing::debug!(channel = %channel, "Notification consumer dropped");
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    if policy.exhausted(failures) {
                        tracing::error!(
                            channel = %channel,
                            failures,
                            error = %e,
                            "Giving up waiting for notifications"
                        );
                        break;
                    }

                    let delay = policy.delay(failures);
                    tracing::warn!(
                        channel = %channel,
                        attempt = failures,
                        max_failures = policy.max_consecutive_failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Error waiting for notification, retrying"
                    );

                    tokio::select! {
                        biased;
                        _ = stopped(&mut shutdown, &mut closing) => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        tracing::debug!(channel = %channel, "Notification pump stopped");
        session
    }
}

/// Resolve when either the run or the listener is shutting down.
async fn stopped(shutdown: &mut ShutdownListener, closing: &mut ShutdownListener) {
    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = closing.cancelled() => {}
    }
}

//! User-visible notification delivery.
//!
//! Producers anywhere in the daemon push [`Notification`]s into a bounded
//! queue; a single consumer loop renders them in order on one sink. The
//! loop owns the sink for its entire lifetime, which is what rendering
//! surfaces with thread affinity require.

use std::time::Duration;

use anyhow::Result;
use log::{info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Delay substituted when a notification leaves its delay unset.
pub const DEFAULT_DELAY: Duration = Duration::from_millis(2500);

/// Bounded queue depth between producers and the delivery loop.
const QUEUE_CAPACITY: usize = 10;

/// How long a producer blocks on a full queue before giving up.
///
/// Policy: bounded-block with a short timeout, then warn and drop. A slow
/// sink never wedges the supervision loop, and drops are never silent.
const SEND_TIMEOUT: Duration = Duration::from_millis(250);

/// A user-visible message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub message: String,
    /// How long the sink should display the message. Zero means "use
    /// [`DEFAULT_DELAY`]", resolved at delivery time.
    pub delay: Duration,
}

impl Notification {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            delay: Duration::ZERO,
        }
    }
}

/// Rendering surface for notifications. The on-screen display and OS
/// toast integrations live behind this seam.
pub trait NotificationSink: Send {
    fn show(&mut self, notification: &Notification);
}

/// Default sink that writes notifications to the log.
pub struct LogSink;

impl NotificationSink for LogSink {
    fn show(&mut self, notification: &Notification) {
        info!("[notify] {}: {}", notification.title, notification.message);
    }
}

/// Creates a bounded notification channel bound to `sink`.
pub fn channel(sink: Box<dyn NotificationSink>) -> (NotifySender, Notifier) {
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    (NotifySender { tx }, Notifier { rx, sink })
}

/// Producer handle, cheap to clone.
#[derive(Clone)]
pub struct NotifySender {
    tx: mpsc::Sender<Notification>,
}

impl NotifySender {
    /// Enqueues a notification, blocking up to [`SEND_TIMEOUT`] when the
    /// queue is full. Timeouts and closed-channel errors are logged,
    /// never propagated to the producer.
    pub async fn send(&self, notification: Notification) {
        if let Err(e) = self.tx.send_timeout(notification, SEND_TIMEOUT).await {
            warn!("notification dropped: {e}");
        }
    }
}

/// Single-consumer delivery loop.
pub struct Notifier {
    rx: mpsc::Receiver<Notification>,
    sink: Box<dyn NotificationSink>,
}

impl Notifier {
    /// Consumes the queue until cancellation or until every sender hangs up.
    pub async fn serve(mut self, token: CancellationToken) -> Result<()> {
        info!("starting notify loop");
        loop {
            tokio::select! {
                () = token.cancelled() => {
                    info!("exiting notify loop");
                    break;
                }
                msg = self.rx.recv() => {
                    let Some(mut notification) = msg else { break };
                    if notification.delay.is_zero() {
                        notification.delay = DEFAULT_DELAY;
                    }
                    self.sink.show(&notification);
                }
            }
        }
        Ok(())
    }
}

//! Supervision of restartable subsystems.
//!
//! One-for-one policy: each child runs in its own loop task and only the
//! failed child is restarted; siblings are untouched. Every restart emits
//! exactly one user-visible notification. A child that cannot even start
//! ([`Error::StartupFailure`]) is escalated fatally instead of retried,
//! since an identical retry will not succeed without operator help.

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use anyhow::Result;
use log::{error, info};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::{
    error::Error,
    notify::{Notification, NotifySender},
};

/// How long shutdown waits for children to return after cancellation
/// before the process gives up on them. In-flight hardware writes are
/// fast and uninterruptible, so this only needs to cover one of them.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

type StartFn =
    Arc<dyn Fn(CancellationToken) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;
type RestartFn = Arc<dyn Fn(&anyhow::Error) -> bool + Send + Sync>;

/// One supervised child: a name, a start function that builds and runs
/// the child to completion, and a restart predicate consulted on failure.
#[derive(Clone)]
pub struct ChildSpec {
    name: &'static str,
    start: StartFn,
    restart: RestartFn,
}

impl ChildSpec {
    /// Creates a spec with the default predicate: restart on any error.
    ///
    /// There is deliberately no backoff and no max-attempt cutoff; a
    /// bounded-retry policy would slot in through
    /// [`ChildSpec::restart_when`].
    pub fn new<F, Fut>(name: &'static str, start: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name,
            start: Arc::new(move |token| Box::pin(start(token))),
            restart: Arc::new(|_| true),
        }
    }

    /// Replaces the restart predicate. The predicate sees the error that
    /// terminated the child; returning `false` stops supervision of that
    /// child without restarting it.
    pub fn restart_when<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&anyhow::Error) -> bool + Send + Sync + 'static,
    {
        self.restart = Arc::new(predicate);
        self
    }
}

/// Restart-policy-driven parent for the hardware subsystems.
pub struct Supervisor {
    children: Vec<ChildSpec>,
    notify: NotifySender,
}

impl Supervisor {
    pub fn new(notify: NotifySender) -> Self {
        Self {
            children: Vec::new(),
            notify,
        }
    }

    pub fn child(mut self, spec: ChildSpec) -> Self {
        self.children.push(spec);
        self
    }

    /// Runs all children until they stop cleanly or the token is
    /// cancelled. Returns an error only on fatal escalation.
    pub async fn start(&self, token: CancellationToken) -> Result<()> {
        let mut children = JoinSet::new();
        for spec in &self.children {
            info!("supervising \"{}\"", spec.name);
            children.spawn(supervise(spec.clone(), token.clone(), self.notify.clone()));
        }

        let mut first_error = None;
        while let Some(joined) = children.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    // Fatal child failure takes the whole tree down.
                    token.cancel();
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(e) => {
                    token.cancel();
                    if first_error.is_none() {
                        first_error = Some(anyhow::anyhow!("supervised task panicked: {e}"));
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

async fn supervise(
    spec: ChildSpec,
    token: CancellationToken,
    notify: NotifySender,
) -> Result<()> {
    loop {
        if token.is_cancelled() {
            return Ok(());
        }

        match (spec.start)(token.child_token()).await {
            Ok(()) => {
                info!("\"{}\" stopped cleanly, not restarting", spec.name);
                return Ok(());
            }
            Err(e) if e.downcast_ref::<Error>().is_some_and(|e| {
                matches!(e, Error::StartupFailure(_))
            }) =>
            {
                error!("\"{}\" failed to start: {e:#}", spec.name);
                notify
                    .send(Notification::new(
                        "rogctld supervisor",
                        format!("{} cannot be started: {e}", spec.name),
                    ))
                    .await;
                return Err(e);
            }
            Err(e) => {
                if token.is_cancelled() || !(spec.restart)(&e) {
                    return Ok(());
                }
                error!("\"{}\" returned an error: {e:#}", spec.name);
                notify
                    .send(Notification::new(
                        "rogctld supervisor",
                        format!("{} will be restarted: {e}", spec.name),
                    ))
                    .await;
            }
        }
    }
}

use std::{future::Future, io};

use futures::future::pending;
use log::{error, info};
use tokio::sync::watch;

/// Fires once, wakes every [`Shutdown`] clone.
pub struct ShutdownTrigger(watch::Sender<bool>);

#[derive(Clone)]
pub struct Shutdown(watch::Receiver<bool>);

pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (sender, receiver) = watch::channel(false);

    (ShutdownTrigger(sender), Shutdown(receiver))
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }
}

impl Shutdown {
    /// Resolves once shutdown is triggered or the trigger is dropped.
    pub async fn wait(&mut self) {
        while !*self.0.borrow_and_update() {
            if self.0.changed().await.is_err() {
                return;
            }
        }
    }

    #[cfg(test)]
    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }
}

/// Fires `trigger` once `signal` resolves. If listening fails, the trigger
/// is held forever so the process keeps running without signal handling.
pub async fn trigger_on_signal(
    signal: impl Future<Output = io::Result<()>>,
    trigger: ShutdownTrigger,
) {
    match signal.await {
        Ok(()) => {
            info!("Received a termination signal, shutting down...");
            trigger.trigger();
        }
        Err(err) => {
            error!("Couldn't listen for termination signals, running without them! {err:?}");
            pending::<()>().await;
        }
    }
}

/// Waits for SIGINT, or SIGTERM on unix.
pub async fn wait_for_signal() -> io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

#[cfg(test)]
mod tests {
    use std::{
        future::ready,
        io::{Error, ErrorKind},
        time::Duration,
    };

    use super::{channel, trigger_on_signal};

    #[tokio::test]
    async fn every_clone_observes_the_trigger() {
        let (trigger, mut first) = channel();
        let mut second = first.clone();

        assert!(!first.is_triggered());
        trigger.trigger();

        first.wait().await;
        second.wait().await;
        assert!(second.is_triggered());
    }

    #[tokio::test]
    async fn dropping_the_trigger_releases_waiters() {
        let (trigger, mut shutdown) = channel();

        drop(trigger);

        shutdown.wait().await;
        assert!(!shutdown.is_triggered());
    }

    #[tokio::test]
    async fn received_signals_fire_the_trigger() {
        let (trigger, mut shutdown) = channel();

        trigger_on_signal(ready(Ok(())), trigger).await;

        shutdown.wait().await;
        assert!(shutdown.is_triggered());
    }

    #[tokio::test(start_paused = true)]
    async fn failing_signal_handlers_keep_the_controllers_running() {
        let (trigger, mut shutdown) = channel();

        let listener = tokio::spawn(trigger_on_signal(
            ready(Err(Error::new(ErrorKind::Other, "no signal support"))),
            trigger,
        ));

        let waited = tokio::time::timeout(Duration::from_secs(3600), shutdown.wait()).await;

        assert!(waited.is_err());
        assert!(!shutdown.is_triggered());
        listener.abort();
    }
}

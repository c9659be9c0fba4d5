//! Delivery of job notifications.
//!
//! The coordinator publishes every persisted transition on the event bus,
//! marking the ones the job's notification settings ask for. The
//! [`NotificationWorker`] forwards those to a [`Notifier`].

use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use jobforge_events::{EventBus, JobEvent, Subscription};

pub trait Notifier: Send + Sync {
    fn notify(&self, event: &JobEvent) -> Result<(), String>;
}

impl<N> Notifier for Arc<N>
where
    N: Notifier + ?Sized,
{
    fn notify(&self, event: &JobEvent) -> Result<(), String> {
        (**self).notify(event)
    }
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: &JobEvent) -> Result<(), String> {
        info!(
            job_id = %event.job_id,
            job = %event.job_name,
            state = %event.to,
            reason = event.reason.as_deref().unwrap_or(""),
            recipients = ?event.recipients,
            "job notification"
        );
        Ok(())
    }
}

/// Collects delivered notifications in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    delivered: Mutex<Vec<JobEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<JobEvent> {
        self.delivered.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: &JobEvent) -> Result<(), String> {
        self.delivered
            .lock()
            .map_err(|_| "notifier lock poisoned".to_string())?
            .push(event.clone());
        Ok(())
    }
}

/// Handle to stop and join a notification worker.
#[derive(Debug)]
pub struct NotificationHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl NotificationHandle {
    /// Request shutdown and wait for the worker to stop.
    ///
    /// Events already received are delivered first.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

#[derive(Debug)]
pub struct NotificationWorker;

impl NotificationWorker {
    /// Subscribe to `bus` and forward events marked for notification.
    pub fn spawn<B, N>(bus: &B, notifier: N) -> std::io::Result<NotificationHandle>
    where
        B: EventBus<JobEvent>,
        N: Notifier + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub = bus.subscribe();

        let join = thread::Builder::new()
            .name("notifications".to_string())
            .spawn(move || worker_loop(&sub, &shutdown_rx, &notifier))?;

        Ok(NotificationHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn worker_loop<N: Notifier>(sub: &Subscription<JobEvent>, shutdown_rx: &mpsc::Receiver<()>, notifier: &N) {
    let tick = Duration::from_millis(250);

    loop {
        if shutdown_rx.try_recv().is_ok() {
            // Drain what was published before shutdown.
            while let Ok(event) = sub.try_recv() {
                deliver(notifier, &event);
            }
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(event) => deliver(notifier, &event),
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn deliver<N: Notifier>(notifier: &N, event: &JobEvent) {
    if !event.notify {
        return;
    }
    if let Err(err) = notifier.notify(event) {
        warn!(job_id = %event.job_id, state = %event.to, error = %err, "notification delivery failed");
    }
}

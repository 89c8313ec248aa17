//! Orchestration loop
//!
//! Per mailbox, two tasks share the mailbox handle:
//! - the bulk task runs a learn cycle, exports a backup, then sleeps for the
//!   configured interval
//! - the watch task classifies mails as they arrive in `new/`
//!
//! Both stop at their next suspension point once the shutdown token is
//! cancelled; stores are closed after every task has returned.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::DaemonConfig;
use crate::error::Result;
use crate::mailbox::{Mailbox, MailboxRegistry};
use crate::maildir::MaildirWatcher;

pub struct Daemon {
    registry: Arc<MailboxRegistry>,
    learn_interval: Duration,
    queue_capacity: usize,
    shutdown: CancellationToken,
}

impl Daemon {
    pub fn new(registry: Arc<MailboxRegistry>, config: &DaemonConfig) -> Self {
        Self {
            registry,
            learn_interval: config.learn_interval(),
            queue_capacity: config.event_queue_capacity,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the daemon when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until the shutdown token is cancelled
    pub async fn run(self) -> Result<()> {
        info!(
            "Starting junk filter for {} mailbox(es), learning every {:?}",
            self.registry.len(),
            self.learn_interval
        );

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        for mailbox in self.registry.iter() {
            let span = info_span!("mailbox", path = %mailbox.root().display());

            tasks.push(tokio::spawn(
                bulk_loop(
                    Arc::clone(mailbox),
                    self.learn_interval,
                    self.shutdown.clone(),
                )
                .instrument(span.clone()),
            ));

            tasks.push(tokio::spawn(
                watch_loop(
                    Arc::clone(mailbox),
                    self.queue_capacity,
                    self.shutdown.clone(),
                )
                .instrument(span),
            ));
        }

        for task in tasks {
            if let Err(e) = task.await {
                error!("Mailbox task panicked: {}", e);
            }
        }

        self.registry.close_all().await;
        info!("Junk filter stopped");
        Ok(())
    }
}

async fn bulk_loop(mailbox: Arc<Mailbox>, interval: Duration, shutdown: CancellationToken) {
    loop {
        match mailbox.run_cycle(&shutdown).await {
            Ok(report) => info!(
                "Learn cycle done: {} learned, {} relearned, {} classified, {} deferred, {} failed",
                report.learned,
                report.relearned,
                report.classified_good + report.classified_junk,
                report.deferred,
                report.failed
            ),
            Err(e) => error!("Learn cycle failed: {}", e),
        }

        if shutdown.is_cancelled() {
            break;
        }

        if let Err(e) = mailbox.backup().await {
            error!("Backup failed: {}", e);
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = sleep(interval) => {}
        }
    }
    debug!("Bulk task stopped");
}

async fn watch_loop(mailbox: Arc<Mailbox>, capacity: usize, shutdown: CancellationToken) {
    let (watcher, mut arrivals) = match MaildirWatcher::new(&mailbox.new_dir(), capacity) {
        Ok(pair) => pair,
        Err(e) => {
            // The bulk cycle still picks up new mail
            error!("Failed to watch {}: {}", mailbox.new_dir().display(), e);
            return;
        }
    };
    info!("Watching {} for arrivals", watcher.watch_path().display());

    loop {
        let arrival = tokio::select! {
            _ = shutdown.cancelled() => break,
            arrival = arrivals.recv() => arrival,
        };

        let Some(arrival) = arrival else {
            warn!("Arrival channel closed");
            break;
        };

        if let Err(e) = mailbox.on_arrival(&arrival.id).await {
            warn!("Failed to classify {}: {}", arrival.id, e);
        }
    }

    drop(watcher);
    debug!("Watch task stopped");
}

/// Resolve on SIGINT or SIGTERM
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    let signal = {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut term), Ok(mut int)) => tokio::select! {
                _ = term.recv() => "SIGTERM",
                _ = int.recv() => "SIGINT",
            },
            _ => {
                warn!("Unable to install signal handlers, falling back to ctrl-c");
                ctrl_c().await
            }
        }
    };

    #[cfg(not(unix))]
    let signal = ctrl_c().await;

    info!("Received {}, shutting down", signal);
}

async fn ctrl_c() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "SIGINT",
        Err(e) => {
            error!("Unable to listen for shutdown signal: {}", e);
            "error"
        }
    }
}

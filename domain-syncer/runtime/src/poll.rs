use crate::{
    core::{ChangedDomains, ClientError, DomainClient},
    cursor::CursorSink,
    index::DomainApi,
    metrics::{PollKind, PollResult},
    Controller,
};
use backon::{ExponentialBuilder, Retryable};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::time::{self, Duration};
use tracing::{debug, info, trace, warn};

/// Drives the two polling loops: an incremental loop that queues the domains
/// the policy service reports as changed, and a resync loop that periodically
/// queues every domain that should be mirrored.
pub struct Poller<C, A, S> {
    controller: Controller<C, A>,
    sink: S,
    cursor: Mutex<String>,
    update_interval: Duration,
    resync_interval: Duration,
}

// === impl Poller ===

impl<C, A, S> Poller<C, A, S>
where
    C: DomainClient,
    A: DomainApi,
    S: CursorSink,
{
    const INITIAL_BACKOFF: Duration = Duration::from_secs(2);

    /// Creates a poller whose cursor starts at the latest modification time of
    /// the mirrored domains.
    ///
    /// The controller must have synced its indexes.
    pub fn new(
        controller: Controller<C, A>,
        sink: S,
        update_interval: Duration,
        resync_interval: Duration,
    ) -> Self {
        let cursor = controller.store().latest_cursor();
        Self {
            controller,
            sink,
            cursor: Mutex::new(cursor),
            update_interval,
            resync_interval,
        }
    }

    pub fn cursor(&self) -> String {
        self.cursor.lock().clone()
    }

    /// Lists the domains changed since the cursor and queues the valid ones.
    ///
    /// When the listing returns a new cursor, the cursor advances and is
    /// recorded in the sink. Failing to record the cursor is not an error.
    pub async fn poll_changes(&self) -> Result<usize, ClientError> {
        let cursor = self.cursor();
        let ChangedDomains { domains, cursor } = self
            .controller
            .client()
            .list_changed_domains(&cursor)
            .await?;

        let mut queued = 0;
        for domain in domains.iter().map(|d| d.name()) {
            if self.controller.is_valid_domain(domain) {
                self.controller.enqueue(domain);
                queued += 1;
            } else {
                trace!(%domain, "Ignoring change to unmirrored domain");
            }
        }

        if !cursor.is_empty() {
            *self.cursor.lock() = cursor.clone();
            if let Err(error) = self.sink.record(&cursor).await {
                warn!(%cursor, %error, "Failed to record cursor");
            }
        }

        Ok(queued)
    }

    /// Polls for changes, retrying failures with exponential backoff for up to
    /// half the update interval.
    pub(crate) async fn poll_with_backoff(&self) -> bool {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(Self::INITIAL_BACKOFF)
            .with_factor(2.0)
            .without_max_delay()
            .without_max_times()
            .with_total_delay(Some(self.update_interval / 2));

        let metrics = self.controller.metrics();
        let res = (|| self.poll_changes())
            .retry(backoff)
            .sleep(time::sleep)
            .notify(|error: &ClientError, backoff: Duration| {
                warn!(%error, ?backoff, "Failed to poll changes; retrying");
                metrics.polled(PollKind::Changes, PollResult::Retried);
            })
            .await;
        match res {
            Ok(queued) => {
                debug!(queued, cursor = %self.cursor(), "Polled changes");
                metrics.polled(PollKind::Changes, PollResult::Ok);
                true
            }
            Err(error) => {
                warn!(%error, "Failed to poll changes");
                metrics.polled(PollKind::Changes, PollResult::Failed);
                false
            }
        }
    }

    /// Queues every domain that should be mirrored: the domain of each
    /// namespace that is not excluded, the admin and system domains, and each
    /// trust target that is still mirrored.
    ///
    /// Returns the number of domains queued.
    pub fn resync(&self) -> usize {
        let names = self.controller.names();
        let store = self.controller.store();

        let namespaces = self.controller.namespaces().read().names();
        let mut domains = namespaces
            .iter()
            .filter(|ns| !names.is_excluded(ns))
            .map(|ns| names.namespace_to_domain(ns))
            .collect::<Vec<_>>();
        domains.extend(names.admin_domain().map(str::to_string));
        domains.extend(names.system_domains());
        domains.extend(
            store
                .trust_targets()
                .into_iter()
                .filter(|target| store.get_by_name(target).is_some()),
        );
        domains.sort();
        domains.dedup();

        for domain in &domains {
            self.controller.enqueue(domain);
        }
        self.controller
            .metrics()
            .polled(PollKind::Resync, PollResult::Ok);
        domains.len()
    }

    /// Polls for changes every update interval until `drain` is signaled.
    pub async fn run_updates(self: Arc<Self>, drain: drain::Watch) {
        loop {
            tokio::select! {
                _ = time::sleep(self.update_interval) => {}
                _ = drain.clone().signaled() => break,
            }
            tokio::select! {
                _ = self.poll_with_backoff() => {}
                _ = drain.clone().signaled() => break,
            }
        }
        debug!("Stopped polling changes");
    }

    /// Resyncs every resync interval until `drain` is signaled.
    pub async fn run_resync(self: Arc<Self>, drain: drain::Watch) {
        loop {
            tokio::select! {
                _ = time::sleep(self.resync_interval) => {}
                _ = drain.clone().signaled() => break,
            }
            let queued = self.resync();
            info!(queued, "Resynced");
        }
        debug!("Stopped resyncing");
    }
}

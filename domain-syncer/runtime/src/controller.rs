use crate::{
    core::{filter_msd_rules, ClientError, DomainClient, NameMapper},
    index::{self, DomainApi, SharedNamespaces, Store},
    k8s::{Event, Namespace, PolicyDomain, ResourceExt, Watch},
    metrics::{ControllerMetrics, Outcome},
    queue::Queue,
};
use futures::prelude::*;
use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::{sync::watch, task::JoinSet, time::Duration};
use tracing::{debug, info, info_span, trace, warn, Instrument};

#[derive(Copy, Clone, Debug)]
pub struct Config {
    /// The number of times a failed sync is retried before it is dropped.
    pub retry_limit: usize,

    /// Strips roles and policies generated by the policy service's
    /// multi-service-domain feature before mirroring.
    pub exclude_msd_rules: bool,

    /// The spacing between rate-limited queue admissions.
    pub queue_interval: Duration,
}

/// Syncs policy domains from the policy service into `PolicyDomain`
/// resources.
///
/// Domain names are queued by the namespace and domain watches and by the
/// poller; workers pop names off the queue and sync each one.
pub struct Controller<C, A> {
    client: Arc<C>,
    store: Store<A>,
    names: Arc<NameMapper>,
    namespaces: SharedNamespaces,
    queue: Queue<String>,
    metrics: ControllerMetrics,
    config: Config,
    synced: Arc<Synced>,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("failed to fetch domain: {0}")]
    Fetch(#[source] ClientError),

    #[error(transparent)]
    Store(#[from] index::Error),

    #[error("sync panicked: {0}")]
    Panicked(String),
}

/// Tracks the watches that have not yet delivered their initial list.
#[derive(Debug)]
struct Synced {
    pending: AtomicUsize,
    tx: watch::Sender<bool>,
}

// === impl Config ===

impl Default for Config {
    fn default() -> Self {
        Self {
            retry_limit: 3,
            exclude_msd_rules: false,
            queue_interval: Duration::from_millis(250),
        }
    }
}

// === impl Controller ===

impl<C, A: Clone> Clone for Controller<C, A> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            store: self.store.clone(),
            names: self.names.clone(),
            namespaces: self.namespaces.clone(),
            queue: self.queue.clone(),
            metrics: self.metrics.clone(),
            config: self.config,
            synced: self.synced.clone(),
        }
    }
}

impl<C, A> Controller<C, A>
where
    C: DomainClient,
    A: DomainApi,
{
    /// The number of watches that must report their initial list before the
    /// controller is synced.
    const WATCHES: usize = 2;

    pub fn new(
        client: C,
        store: Store<A>,
        names: NameMapper,
        namespaces: SharedNamespaces,
        config: Config,
        metrics: ControllerMetrics,
    ) -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            client: Arc::new(client),
            store,
            names: Arc::new(names),
            namespaces,
            queue: Queue::new(config.queue_interval),
            metrics,
            config,
            synced: Arc::new(Synced {
                pending: AtomicUsize::new(Self::WATCHES),
                tx,
            }),
        }
    }

    pub fn store(&self) -> &Store<A> {
        &self.store
    }

    pub fn names(&self) -> &NameMapper {
        &self.names
    }

    pub fn namespaces(&self) -> &SharedNamespaces {
        &self.namespaces
    }

    pub fn queue(&self) -> &Queue<String> {
        &self.queue
    }

    pub(crate) fn client(&self) -> &C {
        &self.client
    }

    pub(crate) fn metrics(&self) -> &ControllerMetrics {
        &self.metrics
    }

    /// Becomes true once both watches have delivered their initial lists.
    pub fn synced(&self) -> watch::Receiver<bool> {
        self.synced.tx.subscribe()
    }

    /// Tests whether `domain` may be mirrored.
    ///
    /// A domain is valid when it is the admin domain, the domain of a system
    /// namespace that is not excluded, the domain of a live namespace that is not excluded, or the
    /// trust target of a mirrored domain.
    pub fn is_valid_domain(&self, domain: &str) -> bool {
        if self.names.is_admin_domain(domain) || self.names.is_system_domain(domain) {
            return true;
        }
        if self.namespace_exists(domain) {
            return true;
        }
        self.store.is_trust_target(domain)
    }

    /// Tests whether `domain` is the domain of a live namespace that is not
    /// excluded.
    fn namespace_exists(&self, domain: &str) -> bool {
        let ns = self.names.domain_to_namespace(domain);
        // `kube.system` escapes to `kube-system`, but a system namespace maps
        // to a subdomain of the admin domain.
        if self.names.namespace_to_domain(&ns) != domain {
            return false;
        }
        !self.names.is_excluded(&ns) && self.namespaces.read().contains(&ns)
    }

    pub fn enqueue(&self, domain: &str) {
        trace!(%domain, "Queued");
        self.queue.add_rate_limited(domain.to_string());
    }

    fn enqueue_namespace(&self, ns: &str) {
        if self.names.is_excluded(ns) {
            trace!(%ns, "Ignoring excluded namespace");
            return;
        }
        self.enqueue(&self.names.namespace_to_domain(ns));
    }

    /// Queues the admin domain and the domains of all system namespaces.
    pub fn enqueue_admin_system_domains(&self) {
        if let Some(admin) = self.names.admin_domain() {
            self.enqueue(admin);
        }
        for domain in self.names.system_domains() {
            self.enqueue(&domain);
        }
    }

    /// Brings the mirror of `domain` in line with the policy service.
    pub async fn sync(&self, domain: &str) -> Result<Outcome, SyncError> {
        if !self.is_valid_domain(domain) {
            return self.remove(domain, "invalid").await;
        }

        let mut signed = match self.client.fetch_domain(domain).await {
            Ok(Some(signed)) => signed,
            Ok(None) => return self.remove(domain, "not found").await,
            Err(error) if error.is_not_found() => return self.remove(domain, "not found").await,
            Err(error) => {
                if let Err(error) = self
                    .store
                    .set_error_status(domain, &error.to_string())
                    .await
                {
                    warn!(%domain, %error, "Failed to record sync error");
                }
                return Err(SyncError::Fetch(error));
            }
        };

        if self.config.exclude_msd_rules {
            filter_msd_rules(&mut signed.domain);
        }

        let applied = self.store.create_or_update(domain, &signed).await?;

        if self.names.is_admin_domain(domain) || self.namespace_exists(domain) {
            for target in signed.trust_domains() {
                if target == domain || self.store.get_by_name(target).is_some() {
                    continue;
                }
                debug!(%domain, %target, "Queueing trust domain");
                self.enqueue(target);
            }
        }

        Ok(applied.into())
    }

    async fn remove(&self, domain: &str, reason: &'static str) -> Result<Outcome, SyncError> {
        if self.store.remove(domain).await? {
            info!(%domain, %reason, "Removed mirror");
            return Ok(Outcome::Deleted);
        }
        trace!(%domain, %reason, "Nothing to remove");
        Ok(Outcome::Absent)
    }

    /// Processes the next item from the queue.
    ///
    /// Returns false once the queue has shut down.
    pub async fn process_next(&self) -> bool {
        let Some(domain) = self.queue.get().await else {
            return false;
        };

        let result = AssertUnwindSafe(self.sync(&domain))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(SyncError::Panicked(panic_message(panic))));
        match result {
            Ok(outcome) => {
                debug!(%domain, ?outcome, "Synced");
                self.metrics.synced(outcome);
                self.queue.forget(&domain);
            }
            Err(error) => {
                self.metrics.synced(Outcome::Failed);
                let requeues = self.queue.num_requeues(&domain);
                if requeues <= self.config.retry_limit {
                    warn!(%domain, %error, requeues, "Sync failed; retrying");
                    self.metrics.requeued();
                    self.queue.add_rate_limited(domain.clone());
                } else {
                    warn!(%domain, %error, "Sync failed; dropping");
                    self.metrics.dropped();
                    self.queue.forget(&domain);
                }
            }
        }

        self.queue.done(&domain);
        true
    }

    /// Runs `workers` workers until `drain` is signaled.
    ///
    /// On shutdown the queue stops admitting items and the workers drain the
    /// items that are already ready.
    pub async fn run_workers(self, workers: usize, drain: drain::Watch) {
        let mut tasks = JoinSet::new();
        for id in 0..workers.max(1) {
            let worker = self.clone();
            tasks.spawn(
                async move { while worker.process_next().await {} }
                    .instrument(info_span!("worker", id)),
            );
        }

        let release = drain.signaled().await;
        info!("Shutting down");
        self.queue.shut_down();
        release
            .release_after(async move {
                while let Some(res) = tasks.join_next().await {
                    if let Err(error) = res {
                        warn!(%error, "Worker failed");
                    }
                }
            })
            .await;
    }

    /// Indexes namespaces, queueing the domain of each namespace that changes.
    pub async fn watch_namespaces(self, mut events: Watch<Namespace>) {
        while let Some(event) = events.recv().await {
            match event {
                Event::Added(ns) | Event::Updated { new: ns, .. } => {
                    let name = ns.name_any();
                    self.namespaces.write().apply(&name);
                    self.metrics.index_applied("namespaces");
                    self.enqueue_namespace(&name);
                }
                Event::Deleted { obj, already_gone } => {
                    let name = obj.name_any();
                    debug!(ns = %name, already_gone, "Deleted");
                    self.namespaces.write().delete(&name);
                    self.metrics.index_applied("namespaces");
                    self.enqueue_namespace(&name);
                }
                Event::Synced => self.mark_synced("namespaces"),
            }
        }
        warn!("Namespace watch ended");
    }

    /// Indexes mirrored domains, queueing domains that were changed by other
    /// writers.
    ///
    /// The store writes the controller's own changes through to the index, so
    /// their watch events carry a resource version the index already holds.
    pub async fn watch_domains(self, mut events: Watch<PolicyDomain>) {
        while let Some(event) = events.recv().await {
            match event {
                Event::Added(domain) | Event::Updated { new: domain, .. } => {
                    let name = domain.name_any();
                    let version = domain.resource_version();
                    let prior = self.store.index().write().apply(domain);
                    self.metrics.index_applied("domains");
                    if prior.and_then(|p| p.resource_version()) != version {
                        self.enqueue(&name);
                    }
                }
                Event::Deleted { obj, already_gone } => {
                    let name = obj.name_any();
                    let prior = self.store.index().write().delete(&name);
                    self.metrics.index_applied("domains");
                    if prior.is_some() {
                        debug!(domain = %name, already_gone, "Deleted externally");
                        self.enqueue(&name);
                    }
                }
                Event::Synced => self.mark_synced("domains"),
            }
        }
        warn!("Domain watch ended");
    }

    fn mark_synced(&self, watch: &'static str) {
        info!(%watch, "Initial list complete");
        if self.synced.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.synced.tx.send_replace(true);
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        return msg.to_string();
    }
    if let Some(msg) = panic.downcast_ref::<String>() {
        return msg.clone();
    }
    "unknown panic".to_string()
}

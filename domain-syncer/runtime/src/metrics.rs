use domain_syncer_k8s_index::Applied;
use prometheus_client::{
    encoding::{EncodeLabelSet, EncodeLabelValue},
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct ControllerMetrics {
    syncs: Family<SyncLabels, Counter>,
    requeues: Counter,
    dropped: Counter,
    polls: Family<PollLabels, Counter>,
    index_applies: Family<IndexLabels, Counter>,
}

/// How a sync ended.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Outcome {
    Created,
    Updated,
    Unchanged,
    Deleted,
    /// The domain was not mirrored and did not need to be.
    Absent,
    Failed,
}

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub(crate) enum PollKind {
    Changes,
    Resync,
}

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub(crate) enum PollResult {
    Ok,
    Retried,
    Failed,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct SyncLabels {
    outcome: Outcome,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct PollLabels {
    kind: PollKind,
    result: PollResult,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct IndexLabels {
    kind: &'static str,
}

// === impl ControllerMetrics ===

impl ControllerMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let metrics = Self::default();
        prom.register("sync", "Count of domain syncs", metrics.syncs.clone());
        prom.register(
            "requeues",
            "Count of failed syncs that were queued again",
            metrics.requeues.clone(),
        );
        prom.register(
            "dropped",
            "Count of failed syncs that exhausted their retries",
            metrics.dropped.clone(),
        );
        prom.register(
            "poll",
            "Count of polls of the policy service",
            metrics.polls.clone(),
        );
        prom.register(
            "index_applies",
            "Count of watch updates applied to the indexes",
            metrics.index_applies.clone(),
        );
        metrics
    }

    pub(crate) fn synced(&self, outcome: Outcome) {
        self.syncs.get_or_create(&SyncLabels { outcome }).inc();
    }

    pub(crate) fn requeued(&self) {
        self.requeues.inc();
    }

    pub(crate) fn dropped(&self) {
        self.dropped.inc();
    }

    pub(crate) fn polled(&self, kind: PollKind, result: PollResult) {
        self.polls.get_or_create(&PollLabels { kind, result }).inc();
    }

    pub(crate) fn index_applied(&self, kind: &'static str) {
        self.index_applies
            .get_or_create(&IndexLabels { kind })
            .inc();
    }

    #[cfg(test)]
    pub(crate) fn sync_count(&self, outcome: Outcome) -> u64 {
        self.syncs.get_or_create(&SyncLabels { outcome }).get()
    }

    #[cfg(test)]
    pub(crate) fn dropped_count(&self) -> u64 {
        self.dropped.get()
    }
}

impl From<Applied> for Outcome {
    fn from(applied: Applied) -> Self {
        match applied {
            Applied::Created => Self::Created,
            Applied::Updated => Self::Updated,
            Applied::Unchanged => Self::Unchanged,
        }
    }
}

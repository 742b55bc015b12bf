use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use futures::prelude::*;
use kube::{runtime::watcher, Resource, ResourceExt};
use std::{collections::VecDeque, pin::Pin};
use tokio::time;
use tracing::{info, warn, Instrument};

/// A change to a watched resource.
///
/// Raw watch events are decoded once, here, so consumers never need to
/// interpret relists or restarts.
#[derive(Clone, Debug, PartialEq)]
pub enum Event<T> {
    Added(T),

    Updated { old: T, new: T },

    /// `already_gone` is set when the deletion was only noticed because the
    /// object was missing from a relist.
    Deleted { obj: T, already_gone: bool },

    /// The initial list has been delivered. Emitted once per watch.
    Synced,
}

type Rx<T> = Pin<Box<dyn Stream<Item = watcher::Result<watcher::Event<T>>> + Send + 'static>>;

/// Wraps a watch stream, tracking the objects it has reported.
pub struct Watch<T> {
    synced: bool,
    span: tracing::Span,
    rx: Rx<T>,
    known: HashMap<String, T>,
    relisting: Option<HashSet<String>>,
    pending: VecDeque<Event<T>>,
}

// === impl Watch ===

impl<T, W> From<W> for Watch<T>
where
    T: Resource + Clone,
    W: Stream<Item = watcher::Result<watcher::Event<T>>> + Send + 'static,
{
    fn from(watch: W) -> Self {
        Self::new(watch.boxed())
    }
}

impl<T> Watch<T>
where
    T: Resource + Clone,
{
    pub fn new(rx: Rx<T>) -> Self {
        Self {
            rx,
            synced: false,
            span: tracing::Span::current(),
            known: HashMap::default(),
            relisting: None,
            pending: VecDeque::new(),
        }
    }

    pub fn instrument(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Receives the next change.
    ///
    /// If the stream fails, logs the error and sleeps for 1s before polling for
    /// a restart. Returns `None` only if the underlying stream ends.
    pub async fn recv(&mut self) -> Option<Event<T>> {
        loop {
            if let Some(ev) = self.pending.pop_front() {
                return Some(ev);
            }

            let ev = self.rx.next().instrument(self.span.clone()).await?;
            match ev {
                Ok(ev) => self.decode(ev),
                Err(error) => {
                    info!(parent: &self.span, %error, "Failed");
                    time::sleep(time::Duration::from_secs(1)).await;
                    info!(parent: &self.span, "Restarting");
                }
            }
        }
    }

    fn decode(&mut self, ev: watcher::Event<T>) {
        match ev {
            watcher::Event::Init => {
                self.relisting = Some(HashSet::default());
            }

            watcher::Event::InitApply(obj) => {
                let Some(key) = self.key(&obj) else { return };
                if let Some(relisting) = self.relisting.as_mut() {
                    relisting.insert(key.clone());
                }
                self.apply(key, obj);
            }

            watcher::Event::InitDone => {
                if let Some(listed) = self.relisting.take() {
                    let gone = self
                        .known
                        .keys()
                        .filter(|k| !listed.contains(*k))
                        .cloned()
                        .collect::<Vec<_>>();
                    for key in gone {
                        if let Some(obj) = self.known.remove(&key) {
                            self.pending.push_back(Event::Deleted {
                                obj,
                                already_gone: true,
                            });
                        }
                    }
                }

                if !self.synced {
                    self.synced = true;
                    self.pending.push_back(Event::Synced);
                }
            }

            watcher::Event::Apply(obj) => {
                let Some(key) = self.key(&obj) else { return };
                self.apply(key, obj);
            }

            watcher::Event::Delete(obj) => {
                let Some(key) = self.key(&obj) else { return };
                self.known.remove(&key);
                self.pending.push_back(Event::Deleted {
                    obj,
                    already_gone: false,
                });
            }
        }
    }

    fn apply(&mut self, key: String, obj: T) {
        let ev = match self.known.insert(key, obj.clone()) {
            None => Event::Added(obj),
            Some(old) => Event::Updated { old, new: obj },
        };
        self.pending.push_back(ev);
    }

    fn key(&self, obj: &T) -> Option<String> {
        let Some(name) = obj.meta().name.as_deref() else {
            warn!(parent: &self.span, "Dropping event for an object without a name");
            return None;
        };
        match obj.namespace() {
            Some(ns) => Some(format!("{ns}/{name}")),
            None => Some(name.to_string()),
        }
    }
}

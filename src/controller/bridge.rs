//! Translates workload watch events into work queue adds.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::watcher;
use log::warn;

use super::{object_key, queue::WorkQueue};

pub struct EventBridge {
    queue: Arc<WorkQueue>,
    /// Keys observed since startup; lets adds be told apart from updates.
    seen: HashSet<String>,
    /// Keys re-listed during the current init window.
    relisted: HashSet<String>,
    relisting: bool,
}

impl EventBridge {
    pub fn new(queue: Arc<WorkQueue>) -> Self {
        Self {
            queue,
            seen: HashSet::new(),
            relisted: HashSet::new(),
            relisting: false,
        }
    }

    /// Consumes the watch stream until it ends or the queue shuts down.
    pub async fn run<S>(mut self, mut events: S)
    where
        S: Stream<Item = Result<watcher::Event<Deployment>, watcher::Error>> + Unpin,
    {
        let queue = self.queue.clone();
        loop {
            tokio::select! {
                _ = queue.closed() => break,
                maybe = events.next() => match maybe {
                    Some(Ok(event)) => self.handle(&event),
                    Some(Err(err)) => warn!("workload watch error: {err}"),
                    None => break,
                },
            }
        }
    }

    /// Never blocks and never touches the remote API; deduplication is the
    /// queue's job.
    pub(crate) fn handle(&mut self, event: &watcher::Event<Deployment>) {
        match event {
            watcher::Event::Init => {
                self.relisted.clear();
                self.relisting = true;
            }
            watcher::Event::InitApply(workload) => {
                let key = object_key(workload);
                if self.relisting {
                    self.relisted.insert(key.clone());
                }
                if self.seen.insert(key.clone()) {
                    self.queue.add(key);
                }
            }
            watcher::Event::InitDone => {
                if self.relisting {
                    // A workload deleted while the watch was down produces no
                    // Delete event; diff the re-list against what was seen.
                    let gone: Vec<String> = self
                        .seen
                        .iter()
                        .filter(|key| !self.relisted.contains(*key))
                        .cloned()
                        .collect();
                    for key in gone {
                        self.seen.remove(&key);
                        self.queue.add(key);
                    }
                    self.relisted.clear();
                    self.relisting = false;
                }
            }
            watcher::Event::Apply(workload) => {
                let key = object_key(workload);
                if self.seen.insert(key.clone()) {
                    self.queue.add(key);
                }
                // An Apply for an already-seen key is an update and is not
                // requeued, so changes to the pod template or port naming of
                // a live workload are never re-reconciled.
                // TODO: enqueue updates once the sync path can patch an
                // existing Service instead of only creating one.
            }
            watcher::Event::Delete(workload) => {
                let key = object_key(workload);
                self.seen.remove(&key);
                self.queue.add(key);
            }
        }
    }
}

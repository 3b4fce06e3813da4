//! Per-group FIFO queues plus the running-set invariant: at most one
//! instance per group may run at a time.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::domain::entities::JobInstance;

/// Owns every group's pending queue and its (at most one) running instance.
#[derive(Default)]
pub struct GroupQueues {
    queues: BTreeMap<String, VecDeque<JobInstance>>,
    running: BTreeMap<String, JobInstance>,
}

impl GroupQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self, group: &str) -> bool {
        self.running.contains_key(group)
    }

    pub fn running(&self, group: &str) -> Option<&JobInstance> {
        self.running.get(group)
    }

    pub fn running_mut(&mut self, group: &str) -> Option<&mut JobInstance> {
        self.running.get_mut(group)
    }

    /// Whether `group`'s queue already holds a pending instance of `template`.
    pub fn has_pending(&self, group: &str, template_name: &str) -> bool {
        self.queues
            .get(group)
            .map(|q| q.iter().any(|i| i.template_name == template_name))
            .unwrap_or(false)
    }

    pub fn push(&mut self, instance: JobInstance) {
        self.queues
            .entry(instance.group.clone())
            .or_default()
            .push_back(instance);
    }

    /// Promotes `instance` into the running set. Caller must have already
    /// confirmed the group has no running instance.
    pub fn mark_running(&mut self, instance: JobInstance) {
        self.running.insert(instance.group.clone(), instance);
    }

    pub fn remove_running(&mut self, group: &str) -> Option<JobInstance> {
        self.running.remove(group)
    }

    /// Iterates group keys in deterministic (sorted) order, per the
    /// "stable deterministic order" scheduling guarantee. A group with a
    /// running instance but an empty backlog must still appear here, since
    /// `pop_front` drops the key from `queues` the moment the backlog
    /// drains.
    pub fn group_keys(&self) -> Vec<String> {
        self.queues
            .keys()
            .chain(self.running.keys())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn pop_front(&mut self, group: &str) -> Option<JobInstance> {
        let instance = self.queues.get_mut(group)?.pop_front();
        if matches!(self.queues.get(group), Some(q) if q.is_empty()) {
            self.queues.remove(group);
        }
        instance
    }

    pub fn peek_front(&self, group: &str) -> Option<&JobInstance> {
        self.queues.get(group).and_then(|q| q.front())
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    pub fn pending_count(&self, group: &str) -> usize {
        self.queues.get(group).map(VecDeque::len).unwrap_or(0)
    }
}

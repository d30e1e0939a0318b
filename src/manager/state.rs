use crate::operation::{OperationRecord, OptimisticPlaceholder};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Placeholders and authoritative records, always replaced together
#[derive(Debug, Clone, Default)]
pub struct OperationList {
    pub placeholders: Vec<OptimisticPlaceholder>,
    pub records: Vec<OperationRecord>,
}

impl OperationList {
    pub fn record(&self, id: &str) -> Option<&OperationRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn placeholder(&self, id: &str) -> Option<&OptimisticPlaceholder> {
        self.placeholders.iter().find(|p| p.key.as_str() == id)
    }
}

/// Owner of every record the tracker materializes.
///
/// Writers build a new list and swap it in under one write lock, so readers
/// never observe a half-applied tick. The lock is never held across an await.
#[derive(Default)]
pub struct OperationStore {
    list: RwLock<Arc<OperationList>>,
}

impl OperationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_placeholder(&self, placeholder: OptimisticPlaceholder) {
        let mut guard = self.write();
        let mut list = OperationList::clone(&guard);
        list.placeholders.retain(|p| p.key != placeholder.key);
        list.placeholders.push(placeholder);
        *guard = Arc::new(list);
    }

    /// Replace the authoritative record for `id` with `f(current)`.
    ///
    /// Any placeholder the new record supersedes is dropped in the same swap.
    pub fn apply<F>(&self, id: &str, f: F) -> OperationRecord
    where
        F: FnOnce(Option<&OperationRecord>) -> OperationRecord,
    {
        let mut guard = self.write();
        let next = f(guard.record(id));

        let mut list = OperationList::clone(&guard);
        match list.records.iter_mut().find(|r| r.id == id) {
            Some(slot) => *slot = next.clone(),
            None => list.records.push(next.clone()),
        }
        list.placeholders.retain(|p| !p.key.matches(&next));
        *guard = Arc::new(list);

        next
    }

    /// Authoritative record, or the placeholder standing in for it
    pub fn get(&self, id: &str) -> Option<OperationRecord> {
        let list = self.snapshot();
        list.record(id)
            .or_else(|| list.placeholder(id).map(|p| &p.record))
            .cloned()
    }

    /// Authoritative records followed by placeholders still waiting for their first poll
    pub fn list(&self) -> Vec<OperationRecord> {
        let list = self.snapshot();
        list.records
            .iter()
            .cloned()
            .chain(list.placeholders.iter().map(|p| p.record.clone()))
            .collect()
    }

    pub fn remove(&self, id: &str) -> Option<OperationRecord> {
        let mut guard = self.write();
        let removed = guard
            .record(id)
            .or_else(|| guard.placeholder(id).map(|p| &p.record))
            .cloned();

        if removed.is_some() {
            let mut list = OperationList::clone(&guard);
            list.records.retain(|r| r.id != id);
            list.placeholders.retain(|p| p.key.as_str() != id);
            *guard = Arc::new(list);
        }
        removed
    }

    pub fn snapshot(&self) -> Arc<OperationList> {
        self.read().clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, Arc<OperationList>> {
        self.list.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Arc<OperationList>> {
        self.list.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

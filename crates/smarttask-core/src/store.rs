use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::storage::{KvStore, TASKS_KEY, UndecodableSlot};
use crate::task::{Priority, Task};

/// Owner of the authoritative task list. Every mutation writes the whole list
/// back to the task slot before returning.
///
/// Storage failures never reach the caller: they are logged, kept as a notice
/// for [`TaskStore::take_warning`], and the in-memory list stays authoritative.
/// A task slot that could not be read at load is never written afterwards.
#[derive(Debug)]
pub struct TaskStore<S: KvStore> {
    kv: S,
    tasks: Vec<Task>,
    next_id: u64,
    slot_readable: bool,
    warning: Option<String>,
}

impl<S: KvStore> TaskStore<S> {
    /// Hydrates the store from the task slot. Absent, unreadable or malformed
    /// data yields an empty store. Duplicate ids in the loaded list are
    /// renumbered so every held task is addressable.
    #[tracing::instrument(skip(kv))]
    pub fn load(kv: S) -> Self {
        let mut store = Self {
            kv,
            tasks: vec![],
            next_id: 1,
            slot_readable: true,
            warning: None,
        };

        match store.kv.get(TASKS_KEY) {
            Ok(Some(raw)) => store.hydrate(&raw),
            Ok(None) => debug!("no stored tasks; starting empty"),
            Err(err) => store.read_failed(&err),
        }

        store.next_id = store
            .tasks
            .iter()
            .map(|t| t.id)
            .max()
            .map_or(1, |max| max.checked_add(1).unwrap_or(1));

        let renumbered = store.renumber_duplicate_ids();
        if renumbered > 0 {
            store.persist();
        }

        info!(count = store.tasks.len(), next_id = store.next_id, "loaded task store");
        store
    }

    fn read_failed(&mut self, err: &anyhow::Error) {
        self.slot_readable = false;
        self.note_failure("failed to read stored tasks", err);

        let Some(undecodable) = err.downcast_ref::<UndecodableSlot>() else {
            return;
        };
        let backup_key = format!("{TASKS_KEY}.corrupt");
        match self.kv.set(&backup_key, &undecodable.lossy) {
            Ok(()) => {
                self.warning = Some(format!(
                    "stored tasks are not valid text; kept a readable copy in slot \
                     {backup_key} and left the original untouched"
                ));
            }
            Err(err) => self.note_failure("failed to back up unreadable tasks", &err),
        }
    }

    fn renumber_duplicate_ids(&mut self) -> usize {
        let mut seen = HashSet::with_capacity(self.tasks.len());
        let mut renumbered = 0;
        for idx in 0..self.tasks.len() {
            let id = self.tasks[idx].id;
            if seen.insert(id) {
                continue;
            }
            let fresh = self.allocate_id();
            warn!(old_id = id, new_id = fresh, "duplicate task id in stored data; renumbered");
            self.tasks[idx].id = fresh;
            seen.insert(fresh);
            renumbered += 1;
        }
        renumbered
    }

    /// Hands out `next_id`, skipping any id a held task already uses. Wraps to
    /// 1 past `u64::MAX`.
    fn allocate_id(&mut self) -> u64 {
        let mut id = self.next_id;
        while self.tasks.iter().any(|t| t.id == id) {
            id = id.checked_add(1).unwrap_or(1);
        }
        self.next_id = id.checked_add(1).unwrap_or(1);
        id
    }

    fn hydrate(&mut self, raw: &str) {
        if raw.trim().is_empty() {
            return;
        }
        match serde_json::from_str::<Vec<Task>>(raw) {
            Ok(tasks) => self.tasks = tasks,
            Err(err) => {
                warn!(error = %err, "stored tasks are malformed; starting empty");
                let backup_key = format!("{TASKS_KEY}.corrupt");
                if let Err(err) = self.kv.set(&backup_key, raw) {
                    self.note_failure("failed to back up malformed tasks", &err);
                } else {
                    self.warning = Some(format!(
                        "stored tasks were unreadable; kept a copy in slot {backup_key}"
                    ));
                }
            }
        }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: u64) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Distinct categories in store order.
    pub fn categories(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for task in &self.tasks {
            if !out.contains(&task.category.as_str()) {
                out.push(task.category.as_str());
            }
        }
        out
    }

    pub fn storage(&self) -> &S {
        &self.kv
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.kv
    }

    /// Returns and clears the most recent storage notice, if any.
    pub fn take_warning(&mut self) -> Option<String> {
        self.warning.take()
    }

    #[tracing::instrument(skip(self, text, category, now))]
    pub fn add(
        &mut self,
        text: &str,
        category: &str,
        priority: Priority,
        now: DateTime<Utc>,
    ) -> Option<Task> {
        let text = text.trim();
        if text.is_empty() {
            debug!("ignoring add with empty text");
            return None;
        }

        let id = self.allocate_id();

        let task = Task::new_pending(
            id,
            text.to_string(),
            category.trim().to_string(),
            priority,
            now,
        );
        self.tasks.insert(0, task.clone());
        self.persist();

        debug!(id, count = self.tasks.len(), "task added");
        Some(task)
    }

    /// Returns whether `id` was found. An empty `new_text` leaves the task
    /// untouched and still reports found.
    #[tracing::instrument(skip(self, new_text))]
    pub fn update_text(&mut self, id: u64, new_text: &str) -> bool {
        let Some(task) = self.tasks.iter_mut().find(|t| t.id == id) else {
            return false;
        };

        let new_text = new_text.trim();
        if new_text.is_empty() {
            debug!(id, "ignoring edit with empty text");
            return true;
        }

        task.text = new_text.to_string();
        self.persist();
        true
    }

    #[tracing::instrument(skip(self))]
    pub fn toggle_complete(&mut self, id: u64) -> bool {
        let Some(task) = self.tasks.iter_mut().find(|t| t.id == id) else {
            return false;
        };
        task.completed = !task.completed;
        debug!(id, completed = task.completed, "toggled task");
        self.persist();
        true
    }

    #[tracing::instrument(skip(self))]
    pub fn delete(&mut self, id: u64) -> bool {
        let Some(idx) = self.tasks.iter().position(|t| t.id == id) else {
            return false;
        };
        self.tasks.remove(idx);
        self.persist();
        true
    }

    #[tracing::instrument(skip(self))]
    pub fn clear_completed(&mut self) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|t| !t.completed);
        let removed = before - self.tasks.len();
        info!(before, after = self.tasks.len(), "cleared completed tasks");
        self.persist();
        removed
    }

    #[tracing::instrument(skip(self))]
    pub fn clear_all(&mut self) -> usize {
        let removed = self.tasks.len();
        self.tasks.clear();
        info!(removed, "cleared all tasks");
        self.persist();
        removed
    }

    fn persist(&mut self) {
        if !self.slot_readable {
            self.warning = Some(
                "stored tasks could not be read at startup, so they were not overwritten"
                    .to_string(),
            );
            return;
        }

        let payload = match serde_json::to_string(&self.tasks) {
            Ok(payload) => payload,
            Err(err) => {
                self.note_failure("failed to serialize tasks", &anyhow::Error::from(err));
                return;
            }
        };

        if let Err(err) = self.kv.set(TASKS_KEY, &payload) {
            self.note_failure("failed to save tasks", &err);
        }
    }

    fn note_failure(&mut self, what: &str, err: &anyhow::Error) {
        warn!(error = %format!("{err:#}"), "{what}");
        self.warning = Some(format!("{what}: {err:#}"));
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::storage::MemoryKv;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 16, 5, 0, 0).unwrap()
    }

    fn reload(store: TaskStore<MemoryKv>) -> TaskStore<MemoryKv> {
        TaskStore::load(store.storage().clone())
    }

    #[test]
    fn add_prepends_and_trims() {
        let mut store = TaskStore::load(MemoryKv::new());
        store.add("Buy milk", "Home", Priority::Low, t0()).unwrap();
        let added = store
            .add("  Call Bob  ", "Work", Priority::High, t0() + Duration::seconds(5))
            .unwrap();

        assert_eq!(added.text, "Call Bob");
        assert_eq!(store.len(), 2);
        assert_eq!(store.tasks()[0].text, "Call Bob");
        assert_eq!(store.tasks()[1].text, "Buy milk");
        assert!(!store.tasks()[0].completed);
    }

    #[test]
    fn empty_add_never_changes_length() {
        let mut store = TaskStore::load(MemoryKv::new());
        assert!(store.add("", "General", Priority::Medium, t0()).is_none());
        assert!(store.add("   ", "General", Priority::Medium, t0()).is_none());
        assert!(store.is_empty());
        assert_eq!(store.storage().get(TASKS_KEY).unwrap(), None);
    }

    #[test]
    fn ids_are_unique_within_the_same_instant() {
        let mut store = TaskStore::load(MemoryKv::new());
        let a = store.add("a", "General", Priority::Low, t0()).unwrap();
        let b = store.add("b", "General", Priority::Low, t0()).unwrap();
        assert_ne!(a.id, b.id);

        store.delete(b.id);
        let c = store.add("c", "General", Priority::Low, t0()).unwrap();
        assert_ne!(c.id, a.id);
        assert_ne!(c.id, b.id);
    }

    #[test]
    fn round_trip_preserves_order_and_fields() {
        let mut store = TaskStore::load(MemoryKv::new());
        let first = store.add("first", "Work", Priority::High, t0()).unwrap();
        store.add("second", "Home", Priority::Low, t0() + Duration::minutes(1)).unwrap();
        let third = store
            .add("third", "Work", Priority::Medium, t0() + Duration::minutes(2))
            .unwrap();
        store.add("fourth", "Home", Priority::Low, t0() + Duration::minutes(3)).unwrap();
        store.toggle_complete(first.id);
        assert!(store.delete(third.id));

        let expected = store.tasks().to_vec();
        let reloaded = reload(store);
        assert_eq!(reloaded.tasks(), expected.as_slice());
        let texts: Vec<&str> = reloaded.tasks().iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["fourth", "second", "first"]);
    }

    #[test]
    fn reload_continues_id_sequence() {
        let mut store = TaskStore::load(MemoryKv::new());
        store.add("a", "General", Priority::Low, t0()).unwrap();
        let b = store.add("b", "General", Priority::Low, t0()).unwrap();

        let mut reloaded = reload(store);
        let c = reloaded.add("c", "General", Priority::Low, t0()).unwrap();
        assert!(c.id > b.id);
    }

    #[test]
    fn double_toggle_restores_flag() {
        let mut store = TaskStore::load(MemoryKv::new());
        let task = store.add("a", "General", Priority::Low, t0()).unwrap();
        assert!(store.toggle_complete(task.id));
        assert!(store.get(task.id).unwrap().completed);
        assert!(store.toggle_complete(task.id));
        assert!(!store.get(task.id).unwrap().completed);
        assert!(!store.toggle_complete(9999));
    }

    #[test]
    fn update_text_rules() {
        let mut store = TaskStore::load(MemoryKv::new());
        let task = store.add("draft", "General", Priority::Low, t0()).unwrap();

        assert!(store.update_text(task.id, "   "));
        assert_eq!(store.get(task.id).unwrap().text, "draft");

        assert!(store.update_text(task.id, " final "));
        let updated = store.get(task.id).unwrap();
        assert_eq!(updated.text, "final");
        assert_eq!(updated.created_at, t0());
        assert_eq!(updated.category, "General");

        assert!(!store.update_text(task.id + 1, "nope"));
    }

    #[test]
    fn delete_missing_id_leaves_sequence_unchanged() {
        let mut store = TaskStore::load(MemoryKv::new());
        store.add("a", "General", Priority::Low, t0()).unwrap();
        store.add("b", "General", Priority::Low, t0()).unwrap();
        let before = store.tasks().to_vec();

        assert!(!store.delete(4242));
        assert_eq!(store.tasks(), before.as_slice());
    }

    #[test]
    fn clear_completed_returns_removed_count() {
        let mut store = TaskStore::load(MemoryKv::new());
        let a = store.add("a", "General", Priority::Low, t0()).unwrap();
        store.add("b", "General", Priority::Low, t0()).unwrap();
        let c = store.add("c", "General", Priority::Low, t0()).unwrap();
        store.toggle_complete(a.id);
        store.toggle_complete(c.id);

        assert_eq!(store.clear_completed(), 2);
        assert_eq!(store.len(), 1);
        assert!(store.tasks().iter().all(|t| !t.completed));
        assert_eq!(store.clear_completed(), 0);
    }

    #[test]
    fn clear_all_returns_prior_length_and_persists() {
        let mut store = TaskStore::load(MemoryKv::new());
        store.add("a", "General", Priority::Low, t0()).unwrap();
        store.add("b", "General", Priority::Low, t0()).unwrap();

        assert_eq!(store.clear_all(), 2);
        assert!(reload(store).is_empty());
    }

    #[test]
    fn malformed_slot_loads_empty_and_keeps_backup() {
        let mut kv = MemoryKv::new();
        kv.set(TASKS_KEY, "{not json").unwrap();

        let mut store = TaskStore::load(kv);
        assert!(store.is_empty());
        assert!(store.take_warning().is_some());
        assert_eq!(
            store.storage().get("smarttasks_v1.corrupt").unwrap().as_deref(),
            Some("{not json")
        );
    }

    #[test]
    fn duplicate_stored_ids_are_renumbered_and_persisted() {
        let mut kv = MemoryKv::new();
        kv.set(
            TASKS_KEY,
            r#"[{"id":1718000000123,"text":"A","category":"Work","priority":"high","completed":false,"createdAt":"2024-06-10T06:13:20.123Z"},
                {"id":1718000000123,"text":"B","category":"Work","priority":"low","completed":false,"createdAt":"2024-06-10T06:13:20.123Z"}]"#,
        )
        .unwrap();

        let mut store = TaskStore::load(kv);
        let a_id = store.tasks()[0].id;
        let b_id = store.tasks()[1].id;
        assert_eq!(a_id, 1_718_000_000_123);
        assert_eq!(b_id, 1_718_000_000_124);

        assert!(store.toggle_complete(b_id));
        assert!(store.get(b_id).unwrap().completed);
        assert!(!store.get(a_id).unwrap().completed);

        let reloaded = reload(store);
        let ids: Vec<u64> = reloaded.tasks().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![a_id, b_id]);
        assert_eq!(reloaded.get(b_id).unwrap().text, "B");
    }

    #[test]
    fn max_stored_id_does_not_collide_on_next_add() {
        let mut kv = MemoryKv::new();
        let stored = vec![
            Task::new_pending(u64::MAX, "top".to_string(), "General".to_string(), Priority::Low, t0()),
            Task::new_pending(1, "one".to_string(), "General".to_string(), Priority::Low, t0()),
        ];
        kv.set(TASKS_KEY, &serde_json::to_string(&stored).unwrap()).unwrap();

        let mut store = TaskStore::load(kv);
        let added = store.add("next", "General", Priority::Low, t0()).unwrap();
        assert_eq!(added.id, 2);
        let again = store.add("after", "General", Priority::Low, t0()).unwrap();
        assert_eq!(again.id, 3);
    }

    #[test]
    fn unreadable_slot_is_never_overwritten() {
        let mut kv = MemoryKv::new();
        kv.set(TASKS_KEY, "[]").unwrap();
        kv.fail_reads = true;

        let mut store = TaskStore::load(kv);
        assert!(store.is_empty());
        assert!(store.take_warning().unwrap().contains("failed to read stored tasks"));

        let task = store.add("session only", "General", Priority::Low, t0()).unwrap();
        assert_eq!(store.get(task.id).unwrap().text, "session only");
        assert!(store.take_warning().unwrap().contains("not overwritten"));

        store.storage_mut().fail_reads = false;
        assert_eq!(store.storage().get(TASKS_KEY).unwrap().as_deref(), Some("[]"));
    }

    #[test]
    fn write_failure_is_a_warning_and_memory_stays_authoritative() {
        let mut store = TaskStore::load(MemoryKv::failing());
        let task = store.add("kept in memory", "General", Priority::Low, t0()).unwrap();

        let warning = store.take_warning().unwrap();
        assert!(warning.contains("failed to save tasks"));
        assert_eq!(store.get(task.id).unwrap().text, "kept in memory");

        assert!(store.toggle_complete(task.id));
        assert!(store.get(task.id).unwrap().completed);
        assert!(store.take_warning().is_some());
        assert!(store.take_warning().is_none());
    }

    #[test]
    fn categories_are_distinct_in_store_order() {
        let mut store = TaskStore::load(MemoryKv::new());
        store.add("a", "Work", Priority::Low, t0()).unwrap();
        store.add("b", "Home", Priority::Low, t0()).unwrap();
        store.add("c", "Work", Priority::Low, t0()).unwrap();
        assert_eq!(store.categories(), vec!["Work", "Home"]);
    }
}

// ── Device rule lists ──
//
// Shared add/edit/remove/save bookkeeping for the attachment and block
// lists. A removed row is kept aside until save, where its `remove` is
// issued after every changed row has been saved.

use qubes_admin::AdminClient;

use crate::error::CoreError;

/// One editable row of a device rule list.
pub trait DeviceRule {
    fn is_changed(&self) -> bool;

    /// Push the edited state to the system. No-op when unchanged.
    fn save(&mut self, client: &dyn AdminClient) -> Result<(), CoreError>;

    /// Undo the rule on the system.
    fn remove(&self, client: &dyn AdminClient) -> Result<(), CoreError>;

    /// Single-line text used in unsaved-change summaries.
    fn describe(&self) -> String;
}

/// Rows plus the rows removed since the last save.
#[derive(Debug, Clone)]
pub struct DeviceRuleList<R> {
    rows: Vec<R>,
    removed: Vec<R>,
}

impl<R> Default for DeviceRuleList<R> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            removed: Vec::new(),
        }
    }
}

impl<R: DeviceRule> DeviceRuleList<R> {
    pub fn new(rows: Vec<R>) -> Self {
        Self {
            rows,
            removed: Vec::new(),
        }
    }

    pub fn rows(&self) -> &[R] {
        &self.rows
    }

    pub fn row_mut(&mut self, index: usize) -> Option<&mut R> {
        self.rows.get_mut(index)
    }

    pub fn removed(&self) -> &[R] {
        &self.removed
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push(&mut self, row: R) {
        self.rows.push(row);
    }

    /// Move a row to the removed list. Returns `None` for a bad index.
    pub fn remove(&mut self, index: usize) -> Option<&R> {
        if index >= self.rows.len() {
            return None;
        }
        let row = self.rows.remove(index);
        self.removed.push(row);
        self.removed.last()
    }

    /// Replace all rows and forget removals.
    pub fn replace(&mut self, rows: Vec<R>) {
        self.rows = rows;
        self.removed.clear();
    }

    /// Save changed rows, then remove the removed ones.
    ///
    /// Stops at the first failure; rows already saved stay saved and the
    /// removed list is only cleared once every removal went through.
    pub fn save(&mut self, client: &dyn AdminClient) -> Result<(), CoreError> {
        for row in &mut self.rows {
            row.save(client)?;
        }
        for row in &self.removed {
            row.remove(client)?;
        }
        self.removed.clear();
        Ok(())
    }

    /// Summary lines, one per changed or removed row.
    pub fn unsaved_lines(&self, changed: &str, removed: &str) -> Vec<String> {
        self.rows
            .iter()
            .filter(|r| r.is_changed())
            .map(|r| format!("{changed}{}", r.describe()))
            .chain(self.removed.iter().map(|r| format!("{removed}{}", r.describe())))
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use qubes_admin::MemoryQubes;

    use super::*;

    static REMOVED: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug)]
    struct Fake {
        name: &'static str,
        changed: bool,
    }

    impl DeviceRule for Fake {
        fn is_changed(&self) -> bool {
            self.changed
        }

        fn save(&mut self, _client: &dyn AdminClient) -> Result<(), CoreError> {
            self.changed = false;
            Ok(())
        }

        fn remove(&self, _client: &dyn AdminClient) -> Result<(), CoreError> {
            REMOVED.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn describe(&self) -> String {
            self.name.to_owned()
        }
    }

    #[test]
    fn save_clears_changed_and_removed() {
        let client = MemoryQubes::new();
        let mut list = DeviceRuleList::new(vec![
            Fake { name: "a", changed: true },
            Fake { name: "b", changed: false },
            Fake { name: "c", changed: false },
        ]);
        list.remove(2).unwrap();
        assert!(list.remove(9).is_none());

        assert_eq!(list.unsaved_lines("Changed: ", "Removed: "), ["Changed: a", "Removed: c"]);

        list.save(&client).unwrap();
        assert!(list.unsaved_lines("Changed: ", "Removed: ").is_empty());
        assert_eq!(REMOVED.load(Ordering::SeqCst), 1);
        assert_eq!(list.len(), 2);
    }
}

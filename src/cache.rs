use crate::data::FavoriteRow;
use crate::key::{FavoriteKeySource, FavoriteWordKey};

/// In-memory mirror of the favorites visible in the active view.
///
/// Rows are kept newest first. Only the engine writes to it, either inside a
/// toggle transaction or by a full reload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimisticList {
    rows: Vec<FavoriteRow>,
}

impl OptimisticList {
    pub fn new(rows: Vec<FavoriteRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[FavoriteRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, key: &FavoriteWordKey) -> bool {
        self.rows.iter().any(|row| row.favorite_key() == *key)
    }

    pub fn count(&self, key: &FavoriteWordKey) -> usize {
        self.rows
            .iter()
            .filter(|row| row.favorite_key() == *key)
            .count()
    }

    pub fn snapshot(&self) -> Vec<FavoriteRow> {
        self.rows.clone()
    }

    /// Drops every sense row of the identity; returns how many went away.
    pub fn remove_identity(&mut self, key: &FavoriteWordKey) -> usize {
        let before = self.rows.len();
        self.rows.retain(|row| row.favorite_key() != *key);
        before - self.rows.len()
    }

    /// Puts `row` at the front unless its identity is already present.
    pub fn insert_front(&mut self, row: FavoriteRow) -> bool {
        if self.contains(&row.favorite_key()) {
            return false;
        }
        self.rows.insert(0, row);
        true
    }

    pub fn replace(&mut self, rows: Vec<FavoriteRow>) {
        self.rows = rows;
    }

    /// Puts the identity's rows back the way `snapshot` had them.
    ///
    /// Rows of other identities are left as they are now, so a concurrent
    /// transaction on another key keeps its own state.
    pub fn restore_identity(&mut self, snapshot: &[FavoriteRow], key: &FavoriteWordKey) {
        self.remove_identity(key);
        for (position, row) in snapshot.iter().enumerate() {
            if row.favorite_key() != *key {
                continue;
            }
            let at = position.min(self.rows.len());
            self.rows.insert(at, row.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::key_for;

    fn row(headword: &str, pos: &str, sense_index: u32) -> FavoriteRow {
        FavoriteRow {
            headword: headword.to_string(),
            canonical_pos: pos.to_string(),
            sense_index,
            gloss: String::new(),
            gloss_lang: "en".to_string(),
            category_id: None,
            created_at: 0,
        }
    }

    #[test]
    fn remove_identity_is_word_level() {
        let mut list = OptimisticList::new(vec![
            row("Haus", "Nomen", 0),
            row("Baum", "Nomen", 0),
            row("haus", "NOMEN", 1),
            row("Haus", "Nomen", 2),
        ]);
        assert_eq!(list.remove_identity(&key_for("Haus", "Nomen")), 3);
        assert_eq!(list.rows(), &[row("Baum", "Nomen", 0)]);
    }

    #[test]
    fn insert_front_refuses_duplicates() {
        let mut list = OptimisticList::new(vec![row("Baum", "Nomen", 0)]);
        assert!(list.insert_front(row("Haus", "Nomen", 0)));
        assert!(!list.insert_front(row(" haus", "nomen", 1)));
        assert_eq!(list.len(), 2);
        assert_eq!(list.rows()[0].headword, "Haus");
    }

    #[test]
    fn restore_identity_reproduces_snapshot() {
        let snapshot = vec![
            row("Baum", "Nomen", 0),
            row("Haus", "Nomen", 0),
            row("Tisch", "Nomen", 0),
            row("Haus", "Nomen", 1),
        ];
        let key = key_for("Haus", "Nomen");

        let mut removed = OptimisticList::new(snapshot.clone());
        removed.remove_identity(&key);
        removed.restore_identity(&snapshot, &key);
        assert_eq!(removed.rows(), snapshot.as_slice());

        let fresh = vec![row("Baum", "Nomen", 0)];
        let mut added = OptimisticList::new(fresh.clone());
        added.insert_front(row("Haus", "Nomen", 0));
        added.restore_identity(&fresh, &key);
        assert_eq!(added.rows(), fresh.as_slice());
    }

    #[test]
    fn restore_identity_keeps_other_keys() {
        let snapshot = vec![row("Baum", "Nomen", 0)];
        let mut list = OptimisticList::new(snapshot.clone());
        list.insert_front(row("Haus", "Nomen", 0));
        list.insert_front(row("Tisch", "Nomen", 0));
        list.restore_identity(&snapshot, &key_for("Haus", "Nomen"));
        let words: Vec<_> = list.rows().iter().map(|r| r.headword.as_str()).collect();
        assert_eq!(words, vec!["Tisch", "Baum"]);
    }
}

//! Which loaded items the user wants.

use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};

/// Mapping from item id to "wanted".
///
/// Only ids handed to [`SelectionSet::new`] are accepted; every other id is
/// rejected with [`Error::UnknownItem`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSet {
    wanted: HashMap<String, bool>,
}

impl SelectionSet {
    /// Selection over `ids` with nothing wanted.
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            wanted: ids.into_iter().map(|id| (id.into(), false)).collect(),
        }
    }

    /// Mark one item as wanted or not.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownItem`] if `id` is not loaded.
    pub fn set_wanted(&mut self, id: &str, wanted: bool) -> Result<()> {
        let slot = self
            .wanted
            .get_mut(id)
            .ok_or_else(|| Error::UnknownItem(id.to_string()))?;
        *slot = wanted;
        Ok(())
    }

    /// Flip one item, returning its new state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownItem`] if `id` is not loaded.
    pub fn toggle(&mut self, id: &str) -> Result<bool> {
        let slot = self
            .wanted
            .get_mut(id)
            .ok_or_else(|| Error::UnknownItem(id.to_string()))?;
        *slot = !*slot;
        Ok(*slot)
    }

    /// Want every loaded item.
    pub fn select_all(&mut self) {
        self.wanted.values_mut().for_each(|w| *w = true);
    }

    /// Want nothing.
    pub fn clear_all(&mut self) {
        self.wanted.values_mut().for_each(|w| *w = false);
    }

    /// Ids currently wanted.
    #[must_use]
    pub fn wanted_ids(&self) -> HashSet<String> {
        self.wanted
            .iter()
            .filter(|(_, wanted)| **wanted)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Whether `id` is wanted. Unknown ids are not.
    #[must_use]
    pub fn is_wanted(&self, id: &str) -> bool {
        self.wanted.get(id).copied().unwrap_or(false)
    }

    /// Whether `id` is a loaded item.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.wanted.contains_key(id)
    }

    /// Number of loaded items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.wanted.len()
    }

    /// Whether no items are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.wanted.is_empty()
    }

    /// Number of wanted items.
    #[must_use]
    pub fn wanted_count(&self) -> usize {
        self.wanted.values().filter(|w| **w).count()
    }
}

//! Grouping of per-item actions into one remote call per distinct key.

use std::collections::HashMap;
use std::hash::Hash;

/// Items partitioned by action key.
///
/// Groups keep the order in which their key was first seen and items keep
/// their input order, so grouping the same input twice yields identical
/// groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionGroups<K, T> {
    groups: Vec<(K, Vec<T>)>,
}

impl<K, T> Default for ActionGroups<K, T> {
    fn default() -> Self {
        Self { groups: Vec::new() }
    }
}

/// Partition `items` by `key_fn`. Every item lands in exactly one group.
pub fn group_by<K, T, I, F>(items: I, mut key_fn: F) -> ActionGroups<K, T>
where
    K: Eq + Hash + Clone,
    I: IntoIterator<Item = T>,
    F: FnMut(&T) -> K,
{
    let mut slots: HashMap<K, usize> = HashMap::new();
    let mut groups: Vec<(K, Vec<T>)> = Vec::new();
    for item in items {
        let key = key_fn(&item);
        match slots.get(&key) {
            Some(&slot) => groups[slot].1.push(item),
            None => {
                slots.insert(key.clone(), groups.len());
                groups.push((key, vec![item]));
            }
        }
    }
    ActionGroups { groups }
}

impl<K, T> ActionGroups<K, T> {
    /// Number of groups, i.e. remote calls needed.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of items across all groups.
    pub fn item_count(&self) -> usize {
        self.groups.iter().map(|(_, items)| items.len()).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &[T])> {
        self.groups.iter().map(|(k, items)| (k, items.as_slice()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.groups.iter().map(|(k, _)| k)
    }

    /// Transform every item, keeping keys and order.
    pub fn map_items<U, F>(self, mut f: F) -> ActionGroups<K, U>
    where
        F: FnMut(T) -> U,
    {
        ActionGroups {
            groups: self
                .groups
                .into_iter()
                .map(|(k, items)| (k, items.into_iter().map(&mut f).collect()))
                .collect(),
        }
    }
}

impl<K: PartialEq, T> ActionGroups<K, T> {
    pub fn get(&self, key: &K) -> Option<&[T]> {
        self.groups
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, items)| items.as_slice())
    }
}

impl<K, T> IntoIterator for ActionGroups<K, T> {
    type Item = (K, Vec<T>);
    type IntoIter = std::vec::IntoIter<(K, Vec<T>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.into_iter()
    }
}

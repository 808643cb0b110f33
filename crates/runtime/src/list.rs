//! List values and their set algebra
//!
//! A list value is an ordered set of `(origin, name, value)` triples over one
//! or more origins (named list-definition namespaces). An empty list keeps its
//! origins so that type-preserving operations (`LIST_ALL`, inversion, shifts)
//! still know which definitions they range over.

use std::collections::BTreeSet;
use std::fmt;

use indexmap::IndexMap;

/// One entry of a list value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListItem {
    pub origin: String,
    pub name: String,
    pub value: i64,
}

/// Immutable list definitions loaded with the story: origin → name → value.
#[derive(Debug, Clone, Default)]
pub struct ListDefs(IndexMap<String, IndexMap<String, i64>>);

impl ListDefs {
    pub fn new(defs: IndexMap<String, IndexMap<String, i64>>) -> Self {
        Self(defs)
    }

    pub fn origin(&self, origin: &str) -> Option<&IndexMap<String, i64>> {
        self.0.get(origin)
    }

    /// Look up the item with the given value in an origin.
    pub fn item(&self, origin: &str, value: i64) -> Option<ListItem> {
        let names = self.0.get(origin)?;
        names.iter().find_map(|(name, v)| {
            (*v == value).then(|| ListItem {
                origin: origin.to_string(),
                name: name.clone(),
                value,
            })
        })
    }

    /// All items defined by an origin, in definition order.
    pub fn items_of(&self, origin: &str) -> Vec<ListItem> {
        match self.0.get(origin) {
            Some(names) => names
                .iter()
                .map(|(name, v)| ListItem {
                    origin: origin.to_string(),
                    name: name.clone(),
                    value: *v,
                })
                .collect(),
            None => Vec::new(),
        }
    }
}

/// An ordered set of list items.
///
/// Items stay sorted by `(value, origin)` with duplicates removed. `origins`
/// carries the category of the list even when `items` is empty.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListValue {
    items: Vec<ListItem>,
    origins: BTreeSet<String>,
}

impl ListValue {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty list over the given origins.
    pub fn with_origins(origins: impl IntoIterator<Item = String>) -> Self {
        Self {
            items: Vec::new(),
            origins: origins.into_iter().collect(),
        }
    }

    pub fn items(&self) -> &[ListItem] {
        &self.items
    }

    pub fn origins(&self) -> &BTreeSet<String> {
        &self.origins
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Insert an item, preserving order and uniqueness.
    pub fn insert(&mut self, item: ListItem) {
        self.origins.insert(item.origin.clone());
        let key = |i: &ListItem| (i.value, i.origin.clone(), i.name.clone());
        match self.items.binary_search_by_key(&key(&item), key) {
            Ok(_) => {}
            Err(pos) => self.items.insert(pos, item),
        }
    }

    pub fn single(item: ListItem) -> Self {
        let mut list = Self::new();
        list.insert(item);
        list
    }

    /// Set union; the result ranges over both operands' origins.
    pub fn union(&self, other: &ListValue) -> ListValue {
        let mut out = self.clone();
        for item in &other.items {
            out.insert(item.clone());
        }
        out.origins.extend(other.origins.iter().cloned());
        out
    }

    /// Set difference, preserving this list's origins.
    pub fn difference(&self, other: &ListValue) -> ListValue {
        let mut out = self.clone();
        out.items
            .retain(|i| !other.items.iter().any(|o| o.origin == i.origin && o.name == i.name));
        out
    }

    /// Set intersection, preserving this list's origins.
    pub fn intersect(&self, other: &ListValue) -> ListValue {
        let mut out = self.clone();
        out.items
            .retain(|i| other.items.iter().any(|o| o.origin == i.origin && o.name == i.name));
        out
    }

    /// Whether every item of `other` is present here; vacuously true when
    /// `other` is empty.
    pub fn has_all(&self, other: &ListValue) -> bool {
        other
            .items
            .iter()
            .all(|o| self.items.iter().any(|i| i.origin == o.origin && i.name == o.name))
    }

    /// Shift every item's value by `delta`, dropping items that fall outside
    /// their origin's definition.
    pub fn shift(&self, delta: i64, defs: &ListDefs) -> ListValue {
        let mut out = ListValue::with_origins(self.origins.iter().cloned());
        for item in &self.items {
            if let Some(shifted) = defs.item(&item.origin, item.value + delta) {
                out.insert(shifted);
            }
        }
        out
    }

    /// Re-derive item names from the definitions, dropping items an origin
    /// defines no name for. Items of unknown origins pass through.
    pub fn resolve(&self, defs: &ListDefs) -> ListValue {
        let mut out = ListValue::with_origins(self.origins.iter().cloned());
        for item in &self.items {
            if defs.origin(&item.origin).is_some() {
                if let Some(known) = defs.item(&item.origin, item.value) {
                    out.insert(known);
                }
            } else {
                out.insert(item.clone());
            }
        }
        out
    }

    /// Smallest item as a single-entry list; empty lists keep their origins.
    pub fn min(&self) -> ListValue {
        match self.items.first() {
            Some(item) => {
                let mut out = ListValue::with_origins(self.origins.iter().cloned());
                out.insert(item.clone());
                out
            }
            None => self.clone(),
        }
    }

    /// Largest item as a single-entry list; empty lists keep their origins.
    pub fn max(&self) -> ListValue {
        match self.items.last() {
            Some(item) => {
                let mut out = ListValue::with_origins(self.origins.iter().cloned());
                out.insert(item.clone());
                out
            }
            None => self.clone(),
        }
    }

    /// Value of the last (largest) item, or 0 for an empty list.
    pub fn value_of(&self) -> i64 {
        self.items.last().map(|i| i.value).unwrap_or(0)
    }

    pub fn min_value(&self) -> i64 {
        self.items.first().map(|i| i.value).unwrap_or(0)
    }

    pub fn max_value(&self) -> i64 {
        self.items.last().map(|i| i.value).unwrap_or(0)
    }

    /// Every item defined by every origin this list ranges over.
    pub fn all(&self, defs: &ListDefs) -> ListValue {
        let mut out = ListValue::with_origins(self.origins.iter().cloned());
        for origin in &self.origins {
            for item in defs.items_of(origin) {
                out.insert(item);
            }
        }
        out
    }

    /// Every defined item not present in this list.
    pub fn invert(&self, defs: &ListDefs) -> ListValue {
        let mut out = self.all(defs);
        out.items
            .retain(|i| !self.items.iter().any(|o| o.origin == i.origin && o.name == i.name));
        out
    }

    /// Items whose value lies in `[lo, hi]`.
    pub fn range(&self, lo: i64, hi: i64) -> ListValue {
        let mut out = ListValue::with_origins(self.origins.iter().cloned());
        for item in &self.items {
            if item.value >= lo && item.value <= hi {
                out.insert(item.clone());
            }
        }
        out
    }
}

impl fmt::Display for ListValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.items.iter().map(|i| i.name.as_str()).collect();
        write!(f, "{}", names.join(", "))
    }
}

//! Per-room lookup tables (gifts, emoticons) loaded once at start.

use rustc_hash::FxHashMap;
use serde::Serialize;

/// Metadata about a gift.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GiftInfo {
    pub name: String,
    pub icon: String,
    /// Unit price in the platform's display currency.
    pub price: f64,
}

/// Read-only gift table keyed by whatever the platform uses to identify gifts
/// on the wire (id or name).
#[derive(Debug, Clone, Default)]
pub struct GiftCatalog {
    gifts: FxHashMap<String, GiftInfo>,
}

impl GiftCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless the key is already present; the first entry wins.
    pub fn insert(&mut self, key: impl Into<String>, info: GiftInfo) {
        self.gifts.entry(key.into()).or_insert(info);
    }

    pub fn get(&self, key: &str) -> Option<&GiftInfo> {
        self.gifts.get(key)
    }

    pub fn icon(&self, key: &str) -> String {
        self.get(key).map(|g| g.icon.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.gifts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gifts.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, GiftInfo)> for GiftCatalog {
    fn from_iter<T: IntoIterator<Item = (K, GiftInfo)>>(iter: T) -> Self {
        let mut catalog = Self::new();
        for (k, v) in iter {
            catalog.insert(k, v);
        }
        catalog
    }
}

//! Style cascade: table → row group → row → cell.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use ahash::AHashMap;

use crate::spec::{Result, StyleMap, TableExportError};

/// Merge `child` over `parent`; child keys win, missing keys are inherited.
pub fn cascade_style(parent: &StyleMap, child: &StyleMap) -> StyleMap {
    let mut dict_style = parent.clone();
    for (c_key, c_value) in child {
        dict_style.insert(c_key.clone(), c_value.clone());
    }
    dict_style
}

/// Memoization statistics of a [`StyleCascade`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SpecCascadeStats {
    /// Lookups answered from the cache.
    pub cnt_hits: u64,
    /// Merges actually computed.
    pub cnt_computed: u64,
    /// Distinct (parent, element) pairs cached.
    pub cnt_entries: usize,
}

/// Read-through cache of cascaded styles keyed by (parent map, element map).
///
/// Safe to share across row workers: each distinct pair is merged at most once.
/// Scope one instance per export job, or call [`StyleCascade::clear`].
#[derive(Debug, Default)]
pub struct StyleCascade {
    dict_memo: RwLock<AHashMap<Arc<StyleMap>, AHashMap<StyleMap, Arc<StyleMap>>>>,
    cnt_hits: AtomicU64,
    cnt_computed: AtomicU64,
}

impl StyleCascade {
    /// Empty cascade cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolved style of `element` under `parent`.
    pub fn resolve(&self, parent: &Arc<StyleMap>, element: &StyleMap) -> Result<Arc<StyleMap>> {
        if element.is_empty() {
            self.cnt_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(parent));
        }

        {
            let dict_memo = self
                .dict_memo
                .read()
                .map_err(|_| TableExportError::LockPoisoned("style cascade"))?;
            if let Some(style) = dict_memo
                .get(parent.as_ref())
                .and_then(|dict_children| dict_children.get(element))
            {
                self.cnt_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Arc::clone(style));
            }
        }

        let mut dict_memo = self
            .dict_memo
            .write()
            .map_err(|_| TableExportError::LockPoisoned("style cascade"))?;
        let dict_children = dict_memo.entry(Arc::clone(parent)).or_default();
        if let Some(style) = dict_children.get(element) {
            self.cnt_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(style));
        }

        let style = Arc::new(cascade_style(parent, element));
        dict_children.insert(element.clone(), Arc::clone(&style));
        self.cnt_computed.fetch_add(1, Ordering::Relaxed);
        Ok(style)
    }

    /// Current hit/compute counters.
    pub fn stats(&self) -> SpecCascadeStats {
        let cnt_entries = self
            .dict_memo
            .read()
            .map(|dict_memo| dict_memo.values().map(|dict_children| dict_children.len()).sum::<usize>())
            .unwrap_or(0);
        SpecCascadeStats {
            cnt_hits: self.cnt_hits.load(Ordering::Relaxed),
            cnt_computed: self.cnt_computed.load(Ordering::Relaxed),
            cnt_entries,
        }
    }

    /// Drop every cached entry.
    pub fn clear(&self) -> Result<()> {
        self.dict_memo
            .write()
            .map_err(|_| TableExportError::LockPoisoned("style cascade"))?
            .clear();
        Ok(())
    }
}

/// Build a style map from `(key, value)` pairs.
pub fn derive_style_map<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> StyleMap
where
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Parse an inline CSS declaration list (`"color: red; font-size: 10pt"`).
///
/// Property names are lowercased; empty and value-less declarations are skipped.
pub fn parse_inline_style(text: &str) -> StyleMap {
    let mut dict_style = StyleMap::new();
    for c_decl in text.split(';') {
        let Some((c_key, c_value)) = c_decl.split_once(':') else {
            continue;
        };
        let c_key = c_key.trim().to_ascii_lowercase();
        let c_value = c_value.trim();
        if c_key.is_empty() || c_value.is_empty() {
            continue;
        }
        dict_style.insert(c_key, c_value.to_string());
    }
    dict_style
}

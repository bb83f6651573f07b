//! Cross-sheet cache and freshness tracking.
//!
//! The evaluator never blocks on a sheet that has not been loaded yet:
//! a cache miss records the name as the single outstanding request and
//! comes back as a typed `NeedsSheet` signal, so the one reference
//! involved fails as unavailable and the owning recalculation loop can
//! fetch the sheet, register it, and re-run the whole pass.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::sheet::Sheet;

/// Where a cached sheet stands in the external recalculation protocol.
/// The engine stores this for the scheduler; it never changes it itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RecalcState {
    #[default]
    AsLoaded,
    Recalcing,
    RecalcDone,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetCacheEntry {
    pub sheet: Option<Sheet>,
    pub recalc_state: RecalcState,
    /// The name as first requested, before case folding.
    pub name: String,
}

/// Signal that a referenced sheet is not loaded. Carries the name the
/// host must fetch before re-running the pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeedsSheet {
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct SheetCache {
    entries: FxHashMap<String, SheetCacheEntry>,
    waiting_for: Option<String>,
}

fn fold_name(name: &str) -> String {
    name.to_uppercase()
}

impl SheetCache {
    pub fn new() -> SheetCache {
        SheetCache::default()
    }

    /// Look up a sheet by name, never blocking. A miss records the name
    /// as the outstanding request; only one request is tracked at a
    /// time, so discovering N missing sheets costs N passes.
    pub fn load(&mut self, name: &str) -> Result<&Sheet, NeedsSheet> {
        let key = fold_name(name);
        let has_sheet = self
            .entries
            .get(&key)
            .map(|e| e.sheet.is_some())
            .unwrap_or(false);
        if !has_sheet {
            self.entries.entry(key.clone()).or_insert(SheetCacheEntry {
                sheet: None,
                recalc_state: RecalcState::AsLoaded,
                name: name.to_string(),
            });
            self.waiting_for = Some(key);
            return Err(NeedsSheet {
                name: name.to_string(),
            });
        }
        match self.entries.get(&key).and_then(|e| e.sheet.as_ref()) {
            Some(sheet) => Ok(sheet),
            None => Err(NeedsSheet {
                name: name.to_string(),
            }),
        }
    }

    /// Register a sheet from its serialized JSON form and clear the
    /// waiting flag.
    pub fn register(&mut self, name: &str, serialized: &str) -> Result<&Sheet, String> {
        let sheet: Sheet = serde_json::from_str(serialized)
            .map_err(|e| format!("Cannot parse sheet {}: {}", name, e))?;
        Ok(self.register_sheet(name, sheet))
    }

    /// Register an already-built sheet and clear the waiting flag.
    pub fn register_sheet(&mut self, name: &str, sheet: Sheet) -> &Sheet {
        let key = fold_name(name);
        if self.waiting_for.as_deref() == Some(key.as_str()) {
            self.waiting_for = None;
        }
        let entry = self
            .entries
            .entry(key)
            .or_insert(SheetCacheEntry {
                sheet: None,
                recalc_state: RecalcState::AsLoaded,
                name: name.to_string(),
            });
        entry.recalc_state = RecalcState::AsLoaded;
        entry.sheet.insert(sheet)
    }

    /// The single outstanding load request, if any.
    pub fn pending_request(&self) -> Option<&str> {
        self.waiting_for.as_deref()
    }

    pub fn clear_pending(&mut self) {
        self.waiting_for = None;
    }

    /// Drop a cached sheet. The external loader calls this when a sheet
    /// changes on disk.
    pub fn invalidate(&mut self, name: &str) {
        self.entries.remove(&fold_name(name));
    }

    pub fn entry(&self, name: &str) -> Option<&SheetCacheEntry> {
        self.entries.get(&fold_name(name))
    }

    pub fn set_recalc_state(&mut self, name: &str, state: RecalcState) {
        if let Some(entry) = self.entries.get_mut(&fold_name(name)) {
            entry.recalc_state = state;
        }
    }
}

/// Pass-scoped record of what a recalculation touched: external sheets
/// dereferenced and volatile functions invoked. The recalculation loop
/// reads this for staleness reporting and rebuilds it every pass.
#[derive(Debug, Clone, Default)]
pub struct FreshnessInfo {
    pub sheets_touched: FxHashSet<String>,
    pub volatile_used: FxHashSet<String>,
}

impl FreshnessInfo {
    pub fn new() -> FreshnessInfo {
        FreshnessInfo::default()
    }

    pub fn reset(&mut self) {
        self.sheets_touched.clear();
        self.volatile_used.clear();
    }
}

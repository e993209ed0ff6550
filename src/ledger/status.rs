use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use super::Ledger;
use crate::ir::SyncState;

/// Snapshot of a ledger's contents by sync state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LedgerStatus {
    pub device_id: String,
    pub products: usize,
    pub images: usize,
    pub annotations: usize,
    /// Every state appears, with zero counts included.
    pub by_state: BTreeMap<SyncState, usize>,
}

impl LedgerStatus {
    pub(super) fn from_ledger(ledger: &Ledger) -> Self {
        let mut by_state: BTreeMap<SyncState, usize> =
            SyncState::ALL.iter().map(|s| (*s, 0)).collect();
        let mut annotations = 0;
        for image in ledger.images() {
            *by_state.entry(image.sync_state).or_insert(0) += 1;
            annotations += image.annotations.len();
        }
        Self {
            device_id: ledger.device_id().to_string(),
            products: ledger.catalog().len(),
            images: ledger.images().len(),
            annotations,
            by_state,
        }
    }

    pub fn count(&self, state: SyncState) -> usize {
        self.by_state.get(&state).copied().unwrap_or(0)
    }

    /// Images waiting for the next export.
    pub fn pending_export(&self) -> usize {
        self.count(SyncState::Annotated)
    }

    /// Images exported but not yet confirmed by the central store.
    pub fn awaiting_sync(&self) -> usize {
        self.count(SyncState::Exported)
    }
}

impl fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Ledger for device '{}'", self.device_id)?;
        writeln!(f, "  Products:    {}", self.products)?;
        writeln!(f, "  Images:      {}", self.images)?;
        writeln!(f, "  Annotations: {}", self.annotations)?;
        writeln!(f)?;
        for state in SyncState::ALL {
            writeln!(f, "  {:<10} {}", state.name(), self.count(state))?;
        }
        Ok(())
    }
}

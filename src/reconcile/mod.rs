//! Camera-to-PDV reconciliation.
//!
//! Compares what the camera counted against what the point-of-sale system
//! recorded and reports products the camera saw more of than were sold.
//! Only camera overage is flagged: camera coverage is partial, so a camera
//! count below the PDV count says nothing about shrink.

mod report;

pub use report::{DivergenceReport, TotalLoss};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-product unit counts, keyed by product identifier.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductCount(BTreeMap<String, u64>);

impl ProductCount {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Adds `qty` units of `product`, saturating at `u64::MAX`.
    pub fn add(&mut self, product: &str, qty: u64) {
        let count = self.0.entry(product.to_string()).or_insert(0);
        *count = count.saturating_add(qty);
    }

    /// Sets the count for `product`, replacing any previous value.
    pub fn set(&mut self, product: impl Into<String>, qty: u64) {
        self.0.insert(product.into(), qty);
    }

    /// Count for `product`, 0 when absent.
    pub fn get(&self, product: &str) -> u64 {
        self.0.get(product).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Merges another count into this one, summing per product.
    pub fn merge(&mut self, other: &ProductCount) {
        for (product, qty) in other.iter() {
            self.add(product, qty);
        }
    }
}

impl<S: Into<String>> FromIterator<(S, u64)> for ProductCount {
    fn from_iter<I: IntoIterator<Item = (S, u64)>>(iter: I) -> Self {
        let mut counts = ProductCount::new();
        for (product, qty) in iter {
            let product = product.into();
            counts.add(&product, qty);
        }
        counts
    }
}

/// Unit prices in cents, keyed by product identifier.
///
/// Supplied by the caller; the core never looks prices up.
pub type PriceTable = BTreeMap<String, i64>;

/// Compares camera counts against PDV counts.
///
/// For every product the camera saw, a PDV count above or equal to the
/// camera count is fine; a lower one (absent counts as 0) is recorded as a
/// shortfall. Products present only in the PDV data are never flagged.
pub fn compare(camera_items: &ProductCount, pdv_items: &ProductCount) -> DivergenceReport {
    let missing_items: BTreeMap<String, u64> = camera_items
        .iter()
        .filter_map(|(product, camera_qty)| {
            let pdv_qty = pdv_items.get(product);
            (camera_qty > pdv_qty).then(|| (product.to_string(), camera_qty - pdv_qty))
        })
        .collect();

    if !missing_items.is_empty() {
        tracing::info!(
            products = missing_items.len(),
            units = missing_items
                .values()
                .fold(0u64, |total, qty| total.saturating_add(*qty)),
            "camera count exceeds PDV"
        );
    }

    DivergenceReport::new(missing_items)
}

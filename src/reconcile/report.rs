//! Divergence report types.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use super::PriceTable;

/// Monetary value of a divergence.
///
/// The reconciler only counts units, so reports start out `Unresolved`;
/// callers must not read a loss figure until prices were applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TotalLoss {
    /// No price data was applied (or some product had no price).
    Unresolved,
    /// Sum of shortfall × unit price, in cents.
    Amount { cents: i64 },
}

/// Result of comparing camera counts against PDV counts.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DivergenceReport {
    /// True when at least one product has a shortfall.
    pub has_divergence: bool,
    /// Product → units seen by the camera but not recorded by the PDV.
    pub missing_items: BTreeMap<String, u64>,
    pub total_loss: TotalLoss,
}

impl DivergenceReport {
    pub(crate) fn new(missing_items: BTreeMap<String, u64>) -> Self {
        Self {
            has_divergence: !missing_items.is_empty(),
            missing_items,
            total_loss: TotalLoss::Unresolved,
        }
    }

    /// Total units missing across all products, saturating at `u64::MAX`.
    pub fn missing_units(&self) -> u64 {
        self.missing_items
            .values()
            .fold(0u64, |total, qty| total.saturating_add(*qty))
    }

    /// Returns a copy with `total_loss` computed from caller-supplied prices.
    ///
    /// Stays `Unresolved` unless every missing product has a price.
    pub fn with_unit_prices(&self, prices: &PriceTable) -> Self {
        let mut total: i64 = 0;
        let mut resolved = true;
        for (product, qty) in &self.missing_items {
            match prices.get(product) {
                Some(price) => {
                    let line = i64::try_from(*qty)
                        .ok()
                        .and_then(|q| q.checked_mul(*price))
                        .and_then(|line| total.checked_add(line));
                    match line {
                        Some(sum) => total = sum,
                        None => resolved = false,
                    }
                }
                None => resolved = false,
            }
        }

        let mut report = self.clone();
        report.total_loss = if resolved {
            TotalLoss::Amount { cents: total }
        } else {
            TotalLoss::Unresolved
        };
        report
    }
}

impl fmt::Display for DivergenceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.has_divergence {
            return writeln!(f, "No divergence: camera counts do not exceed PDV records");
        }

        writeln!(
            f,
            "Divergence found: {} product(s), {} unit(s) not recorded by PDV:",
            self.missing_items.len(),
            self.missing_units()
        )?;
        writeln!(f)?;
        for (product, qty) in &self.missing_items {
            writeln!(f, "  - {}: {}", product, qty)?;
        }
        writeln!(f)?;
        match self.total_loss {
            TotalLoss::Unresolved => writeln!(f, "Total loss: unresolved (no unit prices applied)"),
            TotalLoss::Amount { cents } => writeln!(
                f,
                "Total loss: {}{}.{:02}",
                if cents < 0 { "-" } else { "" },
                cents.unsigned_abs() / 100,
                cents.unsigned_abs() % 100
            ),
        }
    }
}

#![allow(dead_code)]

use proptest::prelude::*;
use proptest::strategy::BoxedStrategy;
use proptest::test_runner::{Config as ProptestConfig, FileFailurePersistence};
use shrinkwatch::detect::RawDetection;
use shrinkwatch::ir::NormalizedBox;
use shrinkwatch::reconcile::ProductCount;

pub const PRODUCT_NAMES: [&str; 6] = [
    "SKOL 350ml",
    "Brahma 350ml",
    "Heineken 600ml",
    "Coca-Cola 2L",
    "Guarana Antarctica 2L",
    "Agua Crystal 500ml",
];

pub fn proptest_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(64);

    let mut config = ProptestConfig::with_failure_persistence(FileFailurePersistence::WithSource(
        "proptest-regressions",
    ));
    config.cases = cases;
    config.max_shrink_iters = 1024;
    config
}

/// Counts over a subset of [`PRODUCT_NAMES`].
pub fn arb_product_count(max_qty: u64) -> BoxedStrategy<ProductCount> {
    prop::collection::btree_map(
        prop::sample::select(PRODUCT_NAMES.to_vec()),
        0..=max_qty,
        0..PRODUCT_NAMES.len(),
    )
    .prop_map(|map| map.into_iter().collect::<ProductCount>())
    .boxed()
}

/// A box fully inside the unit square.
pub fn arb_normalized_box() -> BoxedStrategy<NormalizedBox> {
    (0.01f64..=1.0, 0.01f64..=1.0, 0.0f64..=1.0, 0.0f64..=1.0)
        .prop_map(|(w, h, fx, fy)| {
            let cx = w / 2.0 + fx * (1.0 - w);
            let cy = h / 2.0 + fy * (1.0 - h);
            NormalizedBox::new(cx, cy, w, h).expect("box inside the unit square")
        })
        .boxed()
}

/// A well-formed model output for a model with `classes` class names.
pub fn arb_raw_detection(classes: usize) -> BoxedStrategy<RawDetection> {
    (
        0..classes,
        0.0f64..=1.0,
        0.0f64..600.0,
        0.0f64..400.0,
        1.0f64..40.0,
        1.0f64..80.0,
    )
        .prop_map(|(class_id, confidence, x1, y1, w, h)| RawDetection {
            class_id,
            confidence,
            bbox: [x1, y1, x1 + w, y1 + h],
        })
        .boxed()
}

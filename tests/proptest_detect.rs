mod proptest_helpers;

use proptest::prelude::*;
use proptest_helpers::arb_raw_detection;
use shrinkwatch::detect::{count_products, tally, DetectionModel, Detector, Frame, RawDetection};
use shrinkwatch::ShrinkError;

struct FixedModel {
    names: Vec<String>,
    outputs: Vec<RawDetection>,
}

impl DetectionModel for FixedModel {
    fn class_names(&self) -> &[String] {
        &self.names
    }

    fn infer(&self, _frame: &Frame) -> Result<Vec<RawDetection>, ShrinkError> {
        Ok(self.outputs.clone())
    }
}

fn names() -> Vec<String> {
    vec![
        "SKOL 350ml".to_string(),
        "Brahma 350ml".to_string(),
        "Coca-Cola 2L".to_string(),
    ]
}

proptest! {
    #![proptest_config(proptest_helpers::proptest_config())]

    #[test]
    fn detect_keeps_exactly_outputs_at_or_above_threshold(
        outputs in prop::collection::vec(arb_raw_detection(3), 0..32),
        threshold in 0.0f64..=1.0,
    ) {
        let expected = outputs.iter().filter(|o| o.confidence >= threshold).count();
        let detector = Detector::new(
            FixedModel { names: names(), outputs },
            threshold,
        )
        .expect("valid threshold");
        let frame = Frame::new("shelf.jpg", 640, 480, Vec::new());

        let detections = detector.detect(&frame).expect("detect");
        prop_assert_eq!(detections.len(), expected);
        prop_assert!(detections.iter().all(|d| d.confidence >= threshold));
    }

    #[test]
    fn tally_agrees_with_count_products(
        outputs in prop::collection::vec(arb_raw_detection(3), 0..32),
    ) {
        let detector = Detector::new(FixedModel { names: names(), outputs }, 0.0)
            .expect("valid threshold");
        let frame = Frame::new("shelf.jpg", 640, 480, Vec::new());
        let detections = detector.detect(&frame).expect("detect");

        let counts = tally(&detections);
        let total: u64 = counts.iter().map(|(_, qty)| qty).sum();
        prop_assert_eq!(total as usize, detections.len());
        for name in names() {
            prop_assert_eq!(counts.get(&name) as usize, count_products(&detections, &name));
        }
    }
}

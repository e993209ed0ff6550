//! Core records for shrinkwatch.
//!
//! These types are shared by the detection/reconciliation path and the
//! offline collection pipeline.
//!
//! # Design Principles
//!
//! 1. **Type Safety**: Newtype IDs keep device-local product IDs, image IDs
//!    and global class IDs from being mixed up.
//!
//! 2. **Validated Construction**: Boxes, detections and annotations are built
//!    through constructors that enforce their range invariants, so the rest
//!    of the crate never has to re-check them.
//!
//! # Example
//!
//! ```
//! use shrinkwatch::ir::{Annotation, NormalizedBox, ProductId};
//!
//! let bbox = NormalizedBox::new(0.5, 0.5, 0.25, 0.4).unwrap();
//! let annotation = Annotation::new(ProductId::new(1), bbox);
//! assert_eq!(annotation.product_id.as_u64(), 1);
//! ```

mod bbox;
mod checksum;
mod ids;
pub mod labels;
mod model;

pub use bbox::{NormalizedBox, PixelBox};
pub use checksum::Checksum;
pub use ids::{BundleId, ClassId, ImageId, ProductId};
pub use model::{Annotation, CollectedImage, Detection, Product, SyncState};

pub(crate) mod fsutil;

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use shrinkwatch::bundle::{export_bundle, ExportOptions};
use shrinkwatch::ir::{Annotation, ImageId, NormalizedBox, ProductId};
use shrinkwatch::ledger::Ledger;
use walkdir::WalkDir;

pub fn bmp_bytes(width: u32, height: u32) -> Vec<u8> {
    let row_stride = (width * 3).div_ceil(4) * 4;
    let pixel_array_size = row_stride * height;
    let file_size = 54 + pixel_array_size;

    let mut bytes = Vec::with_capacity(file_size as usize);
    bytes.extend_from_slice(b"BM");
    bytes.extend_from_slice(&file_size.to_le_bytes());
    bytes.extend_from_slice(&[0, 0, 0, 0]);
    bytes.extend_from_slice(&54u32.to_le_bytes());

    bytes.extend_from_slice(&40u32.to_le_bytes());
    bytes.extend_from_slice(&(width as i32).to_le_bytes());
    bytes.extend_from_slice(&(height as i32).to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&24u16.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&pixel_array_size.to_le_bytes());
    bytes.extend_from_slice(&2835u32.to_le_bytes());
    bytes.extend_from_slice(&2835u32.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());

    bytes.resize(file_size as usize, 0);
    bytes
}

pub fn write_bmp(path: &Path, width: u32, height: u32) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dir");
    }
    fs::write(path, bmp_bytes(width, height)).expect("write bmp file");
}

pub fn boxed(product: ProductId, cx: f64, cy: f64, w: f64, h: f64) -> Annotation {
    Annotation::new(product, NormalizedBox::new(cx, cy, w, h).expect("valid box"))
}

/// Creates a ledger whose catalog holds `products`, in order.
pub fn ledger_with_products(root: &Path, device_id: &str, products: &[&str]) -> (Ledger, Vec<ProductId>) {
    let mut ledger = Ledger::init(root, device_id).expect("init ledger");
    let ids = products
        .iter()
        .map(|name| ledger.add_product(name).expect("add product"))
        .collect();
    (ledger, ids)
}

/// Captures a distinct BMP (its width is `seed`) and annotates it with one
/// centered box per product.
pub fn capture_annotated(ledger: &mut Ledger, seed: u32, products: &[ProductId]) -> ImageId {
    let id = ledger
        .capture_bytes(&format!("shelf-{seed}.bmp"), &bmp_bytes(seed, 2))
        .expect("capture");
    let annotations = products
        .iter()
        .map(|p| boxed(*p, 0.5, 0.5, 0.25, 0.5))
        .collect();
    ledger.annotate(id, annotations).expect("annotate");
    id
}

/// Exports every ANNOTATED image and returns the bundle directory.
pub fn export_all(ledger: &mut Ledger, out_dir: &Path) -> PathBuf {
    let outcome = export_bundle(ledger, out_dir, &ExportOptions::default()).expect("export");
    outcome.bundle.expect("bundle written").dir
}

/// Relative path → bytes for every file under `root`.
pub fn snapshot_tree(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    WalkDir::new(root)
        .into_iter()
        .map(|entry| entry.expect("walk"))
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            let rel = entry
                .path()
                .strip_prefix(root)
                .expect("under root")
                .to_path_buf();
            (rel, fs::read(entry.path()).expect("read file"))
        })
        .collect()
}

/// Rewrites `manifest.json` in a bundle through a JSON edit.
pub fn edit_manifest(bundle_dir: &Path, edit: impl FnOnce(&mut serde_json::Value)) {
    let path = bundle_dir.join("manifest.json");
    let mut value: serde_json::Value =
        serde_json::from_slice(&fs::read(&path).expect("read manifest")).expect("parse manifest");
    edit(&mut value);
    fs::write(&path, serde_json::to_vec_pretty(&value).expect("serialize")).expect("write manifest");
}

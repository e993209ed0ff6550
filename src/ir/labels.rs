//! Training label files.
//!
//! The merged dataset uses the plain-text label format the training pipeline
//! consumes: one line per box, `class_id x_center y_center width height`,
//! coordinates normalized to `[0, 1]`. Class names live in `data.yaml`.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::{ClassId, NormalizedBox};
use crate::error::ShrinkError;

pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "png", "jpeg", "bmp", "webp"];
pub const LABEL_EXTENSION: &str = "txt";

/// One parsed label line.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LabelRow {
    pub class_id: ClassId,
    pub cx: f64,
    pub cy: f64,
    pub w: f64,
    pub h: f64,
}

/// Formats one label line (without trailing newline).
pub fn format_label_line(class_id: ClassId, bbox: &NormalizedBox) -> String {
    let (cx, cy, w, h) = bbox.to_cxcywh();
    format!("{} {:.6} {:.6} {:.6} {:.6}", class_id, cx, cy, w, h)
}

/// Parses one label line. Blank lines yield `Ok(None)`.
pub fn parse_label_line(
    line: &str,
    file_path: &Path,
    line_num: usize,
) -> Result<Option<LabelRow>, ShrinkError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    // Take at most 6 tokens so pathological inputs do not allocate unbounded memory.
    let tokens: Vec<&str> = trimmed.split_whitespace().take(6).collect();

    if tokens.len() != 5 {
        return Err(ShrinkError::LabelParse {
            path: file_path.to_path_buf(),
            line: line_num,
            message: format!("expected 5 tokens, found {}", tokens.len()),
        });
    }

    let class_id = tokens[0]
        .parse::<u32>()
        .map_err(|_| ShrinkError::LabelParse {
            path: file_path.to_path_buf(),
            line: line_num,
            message: format!(
                "invalid class_id '{}'; expected non-negative integer",
                tokens[0]
            ),
        })?;

    let cx = parse_f64_token(tokens[1], "x_center", file_path, line_num)?;
    let cy = parse_f64_token(tokens[2], "y_center", file_path, line_num)?;
    let w = parse_f64_token(tokens[3], "width", file_path, line_num)?;
    let h = parse_f64_token(tokens[4], "height", file_path, line_num)?;

    Ok(Some(LabelRow {
        class_id: ClassId::new(class_id),
        cx,
        cy,
        w,
        h,
    }))
}

/// Fuzz-only entrypoint for single-line label parsing.
#[cfg(feature = "fuzzing")]
pub fn fuzz_parse_label_line(input: &str) -> Result<(), ShrinkError> {
    let _ = parse_label_line(input, Path::new("<fuzz>"), 1)?;
    Ok(())
}

/// Reads every row of a label file.
pub fn read_label_file(path: &Path) -> Result<Vec<LabelRow>, ShrinkError> {
    let content = fs::read_to_string(path)?;
    let mut rows = Vec::new();
    for (line_idx, line) in content.lines().enumerate() {
        if let Some(row) = parse_label_line(line, path, line_idx + 1)? {
            rows.push(row);
        }
    }
    Ok(rows)
}

fn parse_f64_token(
    raw: &str,
    field_name: &str,
    file_path: &Path,
    line_num: usize,
) -> Result<f64, ShrinkError> {
    raw.parse::<f64>().map_err(|_| ShrinkError::LabelParse {
        path: file_path.to_path_buf(),
        line: line_num,
        message: format!("invalid {field_name} '{raw}'; expected floating-point number"),
    })
}

/// Renders a `data.yaml` class list, one `id: 'name'` entry per class.
pub fn render_data_yaml<'a>(classes: impl IntoIterator<Item = (ClassId, &'a str)>) -> String {
    let mut yaml = String::from("names:\n");
    for (id, name) in classes {
        yaml.push_str(&format!("  {}: {}\n", id, yaml_single_quoted(name)));
    }
    yaml
}

/// Quotes `raw` as a YAML single-quoted scalar.
pub(crate) fn yaml_single_quoted(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', "''"))
}

/// Recursively collects files under `root` whose extension is in `extensions`.
pub fn collect_files_with_extensions(
    root: &Path,
    extensions: &[&str],
) -> Result<Vec<PathBuf>, ShrinkError> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(|source| ShrinkError::Traverse {
            path: root.to_path_buf(),
            message: source.to_string(),
        })?;

        if entry.file_type().is_file() && has_extension(entry.path(), extensions) {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort();
    Ok(files)
}

pub fn has_extension(path: &Path, allowed: &[&str]) -> bool {
    let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
        return false;
    };

    allowed
        .iter()
        .any(|allowed_ext| ext.eq_ignore_ascii_case(allowed_ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_label_line_accepts_valid_rows() {
        let parsed = parse_label_line("2 0.5 0.25 0.3 0.1", Path::new("a.txt"), 1)
            .expect("parse should succeed")
            .expect("line should produce a row");

        assert_eq!(
            parsed,
            LabelRow {
                class_id: ClassId::new(2),
                cx: 0.5,
                cy: 0.25,
                w: 0.3,
                h: 0.1,
            }
        );
    }

    #[test]
    fn parse_label_line_skips_empty_rows() {
        let parsed = parse_label_line("   ", Path::new("a.txt"), 2).expect("parse should succeed");
        assert!(parsed.is_none());
    }

    #[test]
    fn parse_label_line_rejects_wrong_token_counts() {
        let err = parse_label_line("0 0.1 0.2", Path::new("a.txt"), 3).unwrap_err();
        assert!(matches!(err, ShrinkError::LabelParse { line: 3, .. }));

        let err = parse_label_line("0 0.1 0.2 0.3 0.4 0.5", Path::new("a.txt"), 4).unwrap_err();
        assert!(matches!(err, ShrinkError::LabelParse { .. }));
    }

    #[test]
    fn format_then_parse_line() {
        let bbox = NormalizedBox::new(0.5, 0.25, 0.3, 0.1).unwrap();
        let line = format_label_line(ClassId::new(7), &bbox);
        assert_eq!(line, "7 0.500000 0.250000 0.300000 0.100000");

        let row = parse_label_line(&line, Path::new("a.txt"), 1)
            .unwrap()
            .unwrap();
        assert_eq!(row.class_id, ClassId::new(7));
    }

    #[test]
    fn data_yaml_quotes_names() {
        let yaml = render_data_yaml([(ClassId::new(0), "SKOL 350ml"), (ClassId::new(1), "Guaraná d'água")]);
        assert_eq!(yaml, "names:\n  0: 'SKOL 350ml'\n  1: 'Guaraná d''água'\n");
    }

    #[test]
    fn collect_files_filters_extensions() {
        let temp = tempfile::tempdir().expect("create temp dir");
        fs::create_dir_all(temp.path().join("a")).unwrap();
        fs::write(temp.path().join("a/one.TXT"), "").unwrap();
        fs::write(temp.path().join("a/two.jpg"), "").unwrap();

        let files = collect_files_with_extensions(temp.path(), &[LABEL_EXTENSION]).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("one.TXT"));
    }
}

use std::fmt;

use serde::Serialize;

use crate::ir::ClassId;

/// Per-class counts for one dataset store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ClassStats {
    pub id: ClassId,
    pub name: String,
    /// Images whose primary class is this one.
    pub images: usize,
    /// Boxes of this class across all label files.
    pub annotations: usize,
    pub trained: usize,
    pub untrained: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DatasetStats {
    pub images: usize,
    pub annotations: usize,
    pub trained: usize,
    pub untrained: usize,
    pub classes: Vec<ClassStats>,
}

impl fmt::Display for DatasetStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Dataset: {} image(s), {} annotation(s), {} class(es)",
            self.images,
            self.annotations,
            self.classes.len()
        )?;
        writeln!(
            f,
            "  trained: {}  untrained: {}",
            self.trained, self.untrained
        )?;
        if self.classes.is_empty() {
            return Ok(());
        }

        let name_width = self
            .classes
            .iter()
            .map(|c| c.name.chars().count())
            .max()
            .unwrap_or(0)
            .max(5);
        writeln!(f)?;
        writeln!(
            f,
            "  {:>4}  {:<name_width$}  {:>7}  {:>7}  {:>9}",
            "id", "class", "images", "boxes", "untrained"
        )?;
        for class in &self.classes {
            writeln!(
                f,
                "  {:>4}  {:<name_width$}  {:>7}  {:>7}  {:>9}",
                class.id.as_u32(),
                class.name,
                class.images,
                class.annotations,
                class.untrained
            )?;
        }
        Ok(())
    }
}

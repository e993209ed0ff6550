//! Stable product name → training class ID mapping.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::ShrinkError;
use crate::ir::ClassId;

/// Highest ID [`ClassIndex::register`] accepts.
///
/// `data.yaml` lists every ID up to the highest one, so pinned IDs are kept
/// within a range a training run can use.
pub const MAX_REGISTERED_CLASS_ID: u32 = 9_999;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassEntry {
    pub id: ClassId,
    pub name: String,
}

/// Append-only class index, persisted as `classes.json`.
///
/// IDs are zero-based and never reused: `next_id` is persisted alongside the
/// classes, so an ID stays retired even if its entry were ever removed by
/// hand.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassIndex {
    next_id: u32,
    classes: Vec<ClassEntry>,
}

impl ClassIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Class ID for `name`, if registered.
    pub fn get(&self, name: &str) -> Option<ClassId> {
        self.classes.iter().find(|c| c.name == name).map(|c| c.id)
    }

    /// Name registered under `id`.
    pub fn name(&self, id: ClassId) -> Option<&str> {
        self.classes
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.name.as_str())
    }

    /// Returns the ID for `name`, allocating the next free ID for new names.
    ///
    /// The boolean is true when the class was allocated by this call.
    pub fn resolve_or_allocate(&mut self, name: &str) -> (ClassId, bool) {
        if let Some(id) = self.get(name) {
            return (id, false);
        }
        let id = ClassId::new(self.next_id);
        self.next_id += 1;
        self.classes.push(ClassEntry {
            id,
            name: name.to_string(),
        });
        (id, true)
    }

    /// Registers `name` under a chosen ID.
    ///
    /// For seeding an index from an existing training setup. The ID must not
    /// be in use and must not have been handed out before; registering a
    /// name that already has exactly this ID is a no-op.
    pub fn register(&mut self, id: ClassId, name: &str) -> Result<(), ShrinkError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ShrinkError::ClassConflict {
                message: "class name must not be empty".to_string(),
            });
        }
        match (self.get(name), self.name(id)) {
            (Some(existing), _) if existing == id => return Ok(()),
            (Some(existing), _) => {
                return Err(ShrinkError::ClassConflict {
                    message: format!("'{name}' is already registered as class {existing}"),
                })
            }
            (None, Some(other)) => {
                return Err(ShrinkError::ClassConflict {
                    message: format!("class {id} is already taken by '{other}'"),
                })
            }
            (None, None) => {}
        }
        if id.as_u32() < self.next_id {
            return Err(ShrinkError::ClassConflict {
                message: format!("class {id} was retired and cannot be reused"),
            });
        }
        let next_id = id
            .as_u32()
            .checked_add(1)
            .filter(|_| id.as_u32() <= MAX_REGISTERED_CLASS_ID)
            .ok_or_else(|| ShrinkError::ClassConflict {
                message: format!(
                    "class {id} is out of range (highest allowed is {MAX_REGISTERED_CLASS_ID})"
                ),
            })?;

        self.classes.push(ClassEntry {
            id,
            name: name.to_string(),
        });
        self.classes.sort_by_key(|c| c.id);
        self.next_id = next_id;
        Ok(())
    }

    /// All classes ordered by ID.
    pub fn iter(&self) -> impl Iterator<Item = &ClassEntry> {
        self.classes.iter()
    }

    /// Class names indexed by ID; gaps are filled with placeholder names.
    pub fn names_by_id(&self) -> Vec<String> {
        let mut names: Vec<String> = (0..self.next_id).map(|i| format!("class_{i}")).collect();
        for class in &self.classes {
            if let Some(slot) = names.get_mut(class.id.as_u32() as usize) {
                slot.clone_from(&class.name);
            }
        }
        names
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn next_id(&self) -> ClassId {
        ClassId::new(self.next_id)
    }

    /// Checks the index loaded from disk; returns a description of the first
    /// problem found.
    pub(crate) fn check(&self) -> Result<(), String> {
        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for class in &self.classes {
            if class.id.as_u32() >= self.next_id {
                return Err(format!(
                    "class {} is not below next_id {}",
                    class.id, self.next_id
                ));
            }
            if !ids.insert(class.id) {
                return Err(format!("class id {} is used twice", class.id));
            }
            if class.name.trim().is_empty() {
                return Err(format!("class {} has an empty name", class.id));
            }
            if !names.insert(class.name.as_str()) {
                return Err(format!("class name '{}' is used twice", class.name));
            }
        }
        Ok(())
    }
}

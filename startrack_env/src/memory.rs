//! In-memory ImageStore for tests and embedding.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::{Mutex, MutexGuard};

use crate::store::{select_inputs, EntryKind};
use crate::{EnvError, ImageStack, ImageStore, RgbStack};

#[derive(Debug, Clone)]
enum InputEntry {
    Stack(ImageStack),
    Corrupt(String),
    Directory,
}

/// A persisted artifact.
#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
    Text(String),
    Overlay(RgbStack),
}

/// Store holding inputs and outputs in memory.
///
/// Outputs are kept behind a mutex so the store can be shared across
/// worker threads like the filesystem one.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inputs: BTreeMap<String, InputEntry>,
    outputs: Mutex<BTreeMap<String, Artifact>>,
    read_only: BTreeSet<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a readable stack under its own name.
    pub fn add_stack(&mut self, stack: ImageStack) {
        self.inputs
            .insert(stack.name().to_string(), InputEntry::Stack(stack));
    }

    /// Adds an entry that fails to decode with `reason`.
    pub fn add_corrupt(&mut self, name: impl Into<String>, reason: impl Into<String>) {
        self.inputs
            .insert(name.into(), InputEntry::Corrupt(reason.into()));
    }

    /// Adds a sub-directory entry (never listed as an input).
    pub fn add_directory(&mut self, name: impl Into<String>) {
        self.inputs.insert(name.into(), InputEntry::Directory);
    }

    /// Makes every later write to `name` fail with a permission error.
    pub fn reject_writes(&mut self, name: impl Into<String>) {
        self.read_only.insert(name.into());
    }

    fn check_writable(&self, name: &str) -> Result<(), EnvError> {
        if self.read_only.contains(name) {
            return Err(EnvError::io(
                self.describe_output() + "/" + name,
                io::Error::new(io::ErrorKind::PermissionDenied, "read-only output"),
            ));
        }
        Ok(())
    }

    fn outputs(&self) -> MutexGuard<'_, BTreeMap<String, Artifact>> {
        self.outputs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Names of every written artifact, sorted.
    pub fn output_names(&self) -> Vec<String> {
        self.outputs().keys().cloned().collect()
    }

    /// Text artifact by name.
    pub fn text(&self, name: &str) -> Option<String> {
        match self.outputs().get(name)? {
            Artifact::Text(text) => Some(text.clone()),
            Artifact::Overlay(_) => None,
        }
    }

    /// Overlay artifact by name.
    pub fn overlay(&self, name: &str) -> Option<RgbStack> {
        match self.outputs().get(name)? {
            Artifact::Overlay(overlay) => Some(overlay.clone()),
            Artifact::Text(_) => None,
        }
    }
}

impl ImageStore for MemoryStore {
    fn list_inputs(&self, suffix: &str) -> Result<Vec<String>, EnvError> {
        let entries = self.inputs.iter().map(|(name, entry)| {
            let kind = match entry {
                InputEntry::Directory => EntryKind::Directory,
                InputEntry::Stack(_) | InputEntry::Corrupt(_) => EntryKind::File,
            };
            (name.clone(), kind)
        });
        Ok(select_inputs(entries, suffix))
    }

    fn open_stack(&self, name: &str) -> Result<ImageStack, EnvError> {
        match self.inputs.get(name) {
            Some(InputEntry::Stack(stack)) => Ok(stack.clone()),
            Some(InputEntry::Corrupt(reason)) => Err(EnvError::invalid_image(name, reason.clone())),
            Some(InputEntry::Directory) | None => Err(EnvError::NotFound(name.to_string())),
        }
    }

    fn write_overlay(&self, name: &str, overlay: &RgbStack) -> Result<(), EnvError> {
        self.check_writable(name)?;
        self.outputs()
            .insert(name.to_string(), Artifact::Overlay(overlay.clone()));
        Ok(())
    }

    fn write_text(&self, name: &str, contents: &str) -> Result<(), EnvError> {
        self.check_writable(name)?;
        self.outputs()
            .insert(name.to_string(), Artifact::Text(contents.to_string()));
        Ok(())
    }

    fn describe_input(&self, name: &str) -> String {
        format!("memory://{}", name)
    }

    fn describe_output(&self) -> String {
        "memory://output".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Calibration, Dimensions};

    fn tiny_stack(name: &str) -> ImageStack {
        let dims = Dimensions::time_lapse(2, 2, 1);
        ImageStack::new(name, dims, Calibration::default(), vec![0.0; 4]).unwrap()
    }

    #[test]
    fn test_memory_store_lists_files_only() {
        let mut store = MemoryStore::new();
        store.add_stack(tiny_stack("b.tif"));
        store.add_stack(tiny_stack("a.tif"));
        store.add_corrupt("c.tif", "truncated");
        store.add_directory("dir.tif");

        let inputs = store.list_inputs(".tif").unwrap();
        assert_eq!(inputs, vec!["a.tif", "b.tif", "c.tif"]);
    }

    #[test]
    fn test_memory_store_open_errors() {
        let mut store = MemoryStore::new();
        store.add_corrupt("c.tif", "truncated");
        store.add_directory("dir.tif");

        assert!(matches!(store.open_stack("c.tif"), Err(EnvError::InvalidImage { .. })));
        assert!(matches!(store.open_stack("dir.tif"), Err(EnvError::NotFound(_))));
        assert!(matches!(store.open_stack("missing.tif"), Err(EnvError::NotFound(_))));
    }

    #[test]
    fn test_memory_store_records_outputs() {
        let store = MemoryStore::new();
        store.write_text("Log.txt", "done\n").unwrap();
        store.write_overlay("a.tif_Overlay.tif", &RgbStack::new(1, 1)).unwrap();

        assert_eq!(store.output_names(), vec!["Log.txt", "a.tif_Overlay.tif"]);
        assert_eq!(store.text("Log.txt").as_deref(), Some("done\n"));
        assert!(store.text("a.tif_Overlay.tif").is_none());
        assert!(store.overlay("a.tif_Overlay.tif").is_some());
    }

    #[test]
    fn test_memory_store_rejected_writes() {
        let mut store = MemoryStore::new();
        store.reject_writes("Log.txt");

        assert!(matches!(store.write_text("Log.txt", "x"), Err(EnvError::Io { .. })));
        assert!(store.write_text("other.txt", "x").is_ok());
        assert_eq!(store.output_names(), vec!["other.txt"]);
    }
}

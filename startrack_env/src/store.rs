//! The image store interface used by the batch driver.

use crate::{EnvError, ImageStack, RgbStack};

/// Where stacks come from and where results go.
///
/// This trait abstracts the filesystem so the pipeline runs the same way
/// against a real input directory ([`crate::FsStore`]) and against an
/// in-memory fixture ([`crate::MemoryStore`]).
///
/// Output names are plain file names (e.g. `cell1.tif_Spots.txt`); the store
/// decides where they land.
pub trait ImageStore: Send + Sync {
    /// Lists top-level input entries whose name ends with `suffix`.
    ///
    /// Only regular files are returned, sorted by name. Sub-directories are
    /// never descended into.
    fn list_inputs(&self, suffix: &str) -> Result<Vec<String>, EnvError>;

    /// Loads one input stack by name.
    fn open_stack(&self, name: &str) -> Result<ImageStack, EnvError>;

    /// Persists a rendered overlay under `name`.
    fn write_overlay(&self, name: &str, overlay: &RgbStack) -> Result<(), EnvError>;

    /// Persists a text artifact (tables, run log) under `name`.
    fn write_text(&self, name: &str, contents: &str) -> Result<(), EnvError>;

    /// Human-readable location of an input, for log messages.
    fn describe_input(&self, name: &str) -> String;

    /// Human-readable location of the output area, for log messages.
    fn describe_output(&self) -> String;
}

/// Kind of a directory entry as seen by [`select_inputs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Other,
}

/// Keeps the regular files whose name ends with `suffix`, sorted by name.
///
/// The match is case-sensitive.
pub fn select_inputs<I>(entries: I, suffix: &str) -> Vec<String>
where
    I: IntoIterator<Item = (String, EntryKind)>,
{
    let mut names: Vec<String> = entries
        .into_iter()
        .filter(|(name, kind)| *kind == EntryKind::File && name.ends_with(suffix))
        .map(|(name, _)| name)
        .collect();
    names.sort();
    names.dedup();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_select_inputs_filters_suffix_and_kind() {
        let entries = vec![
            ("b.tif".to_string(), EntryKind::File),
            ("a.tif".to_string(), EntryKind::File),
            ("notes.txt".to_string(), EntryKind::File),
            ("nested.tif".to_string(), EntryKind::Directory),
            ("TrackMateAnalysis".to_string(), EntryKind::Directory),
            ("c.TIF".to_string(), EntryKind::File),
            ("d.tiff".to_string(), EntryKind::File),
            ("link.tif".to_string(), EntryKind::Other),
        ];

        let selected = select_inputs(entries, ".tif");
        assert_eq!(selected, vec!["a.tif".to_string(), "b.tif".to_string()]);
    }

    #[test]
    fn test_select_inputs_empty() {
        let selected = select_inputs(Vec::new(), ".tif");
        assert!(selected.is_empty());
    }

    fn arb_entry() -> impl Strategy<Value = (String, EntryKind)> {
        (
            "[a-z]{1,6}(\\.tif|\\.TIF|\\.png|)",
            prop_oneof![Just(EntryKind::File), Just(EntryKind::Directory), Just(EntryKind::Other)],
        )
    }

    proptest! {
        #[test]
        fn prop_selected_inputs_are_sorted_matching_files(entries in prop::collection::vec(arb_entry(), 0..20)) {
            let selected = select_inputs(entries.clone(), ".tif");

            prop_assert!(selected.windows(2).all(|w| w[0] < w[1]));
            for name in &selected {
                prop_assert!(name.ends_with(".tif"));
                prop_assert!(entries.iter().any(|(n, k)| n == name && *k == EntryKind::File));
            }
            for (name, kind) in &entries {
                if *kind == EntryKind::File && name.ends_with(".tif") {
                    prop_assert!(selected.contains(name));
                }
            }
        }
    }
}

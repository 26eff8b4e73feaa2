//! Production implementation of ImageStore on a local directory.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::store::{select_inputs, EntryKind};
use crate::{tiff_io, EnvError, ImageStack, ImageStore, RgbStack};

/// Name of the results directory created inside the input directory.
pub const OUTPUT_DIR_NAME: &str = "TrackMateAnalysis";

/// Store backed by an input directory and its `TrackMateAnalysis/` child.
#[derive(Debug, Clone)]
pub struct FsStore {
    input_dir: PathBuf,
    output_dir: PathBuf,
}

impl FsStore {
    /// Opens `input_dir` and creates the output directory if absent.
    pub fn open(input_dir: impl AsRef<Path>) -> Result<Self, EnvError> {
        let input_dir = input_dir.as_ref().to_path_buf();
        if !input_dir.is_dir() {
            return Err(EnvError::NotFound(format!(
                "input directory {}",
                input_dir.display()
            )));
        }

        let output_dir = input_dir.join(OUTPUT_DIR_NAME);
        fs::create_dir_all(&output_dir).map_err(|e| EnvError::io(output_dir.display(), e))?;
        debug!("Output directory: {}", output_dir.display());

        Ok(Self {
            input_dir,
            output_dir,
        })
    }

    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

impl ImageStore for FsStore {
    fn list_inputs(&self, suffix: &str) -> Result<Vec<String>, EnvError> {
        let read_dir =
            fs::read_dir(&self.input_dir).map_err(|e| EnvError::io(self.input_dir.display(), e))?;

        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| EnvError::io(self.input_dir.display(), e))?;
            // Non UTF-8 names cannot be matched against the suffix.
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let path = entry.path();
            let kind = if path.is_file() {
                EntryKind::File
            } else if path.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::Other
            };
            entries.push((name, kind));
        }

        Ok(select_inputs(entries, suffix))
    }

    fn open_stack(&self, name: &str) -> Result<ImageStack, EnvError> {
        let path = self.input_dir.join(name);
        if !path.is_file() {
            return Err(EnvError::NotFound(path.display().to_string()));
        }
        tiff_io::read_stack(&path, name)
    }

    fn write_overlay(&self, name: &str, overlay: &RgbStack) -> Result<(), EnvError> {
        tiff_io::write_rgb_stack(&self.output_dir.join(name), overlay)
    }

    fn write_text(&self, name: &str, contents: &str) -> Result<(), EnvError> {
        let path = self.output_dir.join(name);
        fs::write(&path, contents).map_err(|e| EnvError::io(path.display(), e))
    }

    fn describe_input(&self, name: &str) -> String {
        self.input_dir.join(name).display().to_string()
    }

    fn describe_output(&self) -> String {
        self.output_dir.display().to_string()
    }
}

//! Safety checks run before anything is written.
//!
//! The input dataset is never overwritten, and the merged output must not
//! look like a checkpoint of its own run (it would be picked up by the next
//! merge or mistaken for a finished batch).

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

use crate::checkpoint::CheckpointNaming;

/// Canonical form when the file exists, the path as given otherwise.
fn resolved(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Validates that the final output path is safe to write.
///
/// Checks:
/// - Output cannot be the input dataset
/// - Output inside the checkpoint directory cannot carry a checkpoint name
pub fn validate_output_path(
    output: &Path,
    input: &Path,
    checkpoint_dir: &Path,
    naming: &CheckpointNaming,
) -> Result<()> {
    if output == input || resolved(output) == resolved(input) {
        bail!(
            "Safety check failed: output '{}' cannot be the same as input '{}'",
            output.display(),
            input.display()
        );
    }

    let output_name = output.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let parent = output.parent().unwrap_or_else(|| Path::new(""));
    let in_checkpoint_dir = parent == checkpoint_dir || resolved(parent) == resolved(checkpoint_dir);
    if in_checkpoint_dir && naming.parse_index(output_name).is_some() {
        bail!(
            "Safety check failed: output '{}' is named like a checkpoint of '{}'",
            output.display(),
            checkpoint_dir.display()
        );
    }

    Ok(())
}

/// The input must not live where checkpoints are written under the same
/// naming, or it would be read back as a batch.
pub fn validate_input_path(input: &Path, checkpoint_dir: &Path, naming: &CheckpointNaming) -> Result<()> {
    let name = input.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let parent = input.parent().unwrap_or_else(|| Path::new(""));
    if naming.parse_index(name).is_some() && resolved(parent) == resolved(checkpoint_dir) {
        bail!(
            "Safety check failed: input '{}' is itself a checkpoint file",
            input.display()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naming() -> CheckpointNaming {
        CheckpointNaming::new("batch", "csv").unwrap()
    }

    #[test]
    fn test_valid_output() {
        let output = PathBuf::from("/tmp/songs_enriched.csv");
        let input = PathBuf::from("/data/songs.csv");
        assert!(validate_output_path(&output, &input, Path::new("/tmp/batches"), &naming()).is_ok());
    }

    #[test]
    fn test_output_equals_input() {
        let path = PathBuf::from("/data/songs.csv");
        let result = validate_output_path(&path, &path, Path::new("/data/batches"), &naming());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("cannot be the same as input"));
    }

    #[test]
    fn test_output_named_like_checkpoint() {
        let output = PathBuf::from("/data/batches/batch_0007.csv");
        let input = PathBuf::from("/data/songs.csv");
        let result = validate_output_path(&output, &input, Path::new("/data/batches"), &naming());
        assert!(result.unwrap_err().to_string().contains("named like a checkpoint"));

        // Same name elsewhere is fine.
        let elsewhere = PathBuf::from("/data/batch_0007.csv");
        assert!(validate_output_path(&elsewhere, &input, Path::new("/data/batches"), &naming()).is_ok());
    }

    #[test]
    fn test_input_inside_checkpoint_dir() {
        let dir = Path::new("/data/batches");
        assert!(validate_input_path(Path::new("/data/batches/batch_0000.csv"), dir, &naming()).is_err());
        assert!(validate_input_path(Path::new("/data/batches/songs.csv"), dir, &naming()).is_ok());
    }
}

//! Output-directory rotation: when a setup handler needs a directory that
//! already exists (a job is being retried), the prior attempt is preserved
//! under a numbered `-fail_i` suffix rather than overwritten.

use std::path::{Path, PathBuf};

use mackenzie_core::error::{MackenzieError, Result};

const MAX_ROTATIONS: u32 = 100;

/// Create a fresh `output_dir` with mode 0770. If it already exists, rename it to
/// `{output_dir}-fail_{i}` for the smallest unused `i` in `[1, MAX_ROTATIONS]`,
/// then create a fresh directory in its place. Errors if all 100 slots are taken.
pub fn mkdir_output_dir(output_dir: &Path) -> Result<()> {
    if output_dir.exists() {
        let mut rotated = false;
        for i in 1..=MAX_ROTATIONS {
            let fail_dir = fail_dir_path(output_dir, i);
            if fail_dir.exists() {
                continue;
            }
            std::fs::rename(output_dir, &fail_dir)?;
            rotated = true;
            break;
        }
        if !rotated {
            return Err(MackenzieError::Transient(format!(
                "{output_dir:?} has exhausted all {MAX_ROTATIONS} preserved failure slots"
            )));
        }
    }

    std::fs::create_dir_all(output_dir)?;
    set_mode_0770(output_dir)?;
    Ok(())
}

fn fail_dir_path(output_dir: &Path, i: u32) -> PathBuf {
    let mut name = output_dir.as_os_str().to_owned();
    name.push(format!("-fail_{i}"));
    PathBuf::from(name)
}

#[cfg(unix)]
fn set_mode_0770(dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o770))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode_0770(_dir: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotates_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let output_dir = dir.path().join("task1");

        mkdir_output_dir(&output_dir).unwrap();
        std::fs::write(output_dir.join("marker"), b"first").unwrap();

        mkdir_output_dir(&output_dir).unwrap();
        assert!(output_dir.exists());
        assert!(!output_dir.join("marker").exists());

        let fail1 = fail_dir_path(&output_dir, 1);
        assert!(fail1.join("marker").exists());
    }

    #[test]
    fn exhausts_rotation_slots() {
        let dir = tempfile::tempdir().unwrap();
        let output_dir = dir.path().join("task1");
        std::fs::create_dir_all(&output_dir).unwrap();
        for i in 1..=MAX_ROTATIONS {
            std::fs::create_dir_all(fail_dir_path(&output_dir, i)).unwrap();
        }
        let err = mkdir_output_dir(&output_dir).unwrap_err();
        assert!(matches!(err, MackenzieError::Transient(_)));
    }
}

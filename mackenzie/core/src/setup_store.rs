//! Content-addressed setup catalog, shared verbatim between the controller's
//! `add_setup` handler and the agent's `sync_setups` phase — both "install a setup"
//! the same way: hash-verify, untar, record.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::db::{Db, JsonTree};
use crate::error::{MackenzieError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupRecord {
    pub name: String,
    pub tar_hash: String,
}

pub struct SetupStore {
    setup_root: PathBuf,
    names: JsonTree,
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}



impl SetupStore {
    pub fn new(db: &Db, setup_root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&setup_root)?;
        Ok(Self {
            setup_root,
            names: db.tree("setup")?,
        })
    }

    pub fn tar_path(&self, name: &str) -> PathBuf {
        self.setup_root.join(format!("{name}.tar.gz"))
    }

    pub fn extracted_path(&self, name: &str) -> PathBuf {
        self.setup_root.join(name)
    }

    /// Install `tar_bytes` as `name`. Idempotent when the hash matches an existing
    /// record; a semantic conflict otherwise. Call from inside `Db::with_write_lock`.
    pub fn install(&self, name: &str, tar_bytes: &[u8]) -> Result<()> {
        let new_hash = hex_sha256(tar_bytes);

        if let Some(existing) = self.names.get::<SetupRecord>(name)? {
            if existing.tar_hash != new_hash {
                return Err(MackenzieError::SemanticConflict(format!(
                    "setup {name:?} already bound to tar_hash {:?}, refusing {new_hash:?}",
                    existing.tar_hash
                )));
            }
            return Ok(());
        }

        let tar_path = self.tar_path(name);
        let tmp_path = self.setup_root.join(format!("{name}.tar.gz.tmp"));
        {
            let mut f = std::fs::File::create(&tmp_path)?;
            f.write_all(tar_bytes)?;
            f.sync_all()?;
        }
        std::fs::rename(&tmp_path, &tar_path)?;

        let extracted = self.extracted_path(name);
        extract_tar_gz(&tar_path, &extracted)?;
        if !extracted.is_dir() {
            return Err(MackenzieError::Transient(format!(
                "extracting {name:?} did not produce {extracted:?}"
            )));
        }

        self.names.insert(
            name,
            &SetupRecord {
                name: name.to_string(),
                tar_hash: new_hash,
            },
        )?;
        Ok(())
    }

    pub fn all_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .names
            .scan_all::<SetupRecord>()?
            .into_iter()
            .map(|r| r.name)
            .collect();
        names.sort();
        Ok(names)
    }

    pub fn read_tar(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.tar_path(name);
        std::fs::read(&path)
            .map_err(|_| MackenzieError::NotFound(format!("setup {name:?} has no tar on disk")))
    }
}

fn extract_tar_gz(tar_gz_path: &Path, dest: &Path) -> Result<()> {
    let file = std::fs::File::open(tar_gz_path)?;
    let decoder = flate2::read::GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);
    std::fs::create_dir_all(dest)?;
    archive.unpack(dest)?;
    Ok(())
}

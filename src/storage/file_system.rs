use std::fs;
use std::path::{Path, PathBuf};

use bip39::Mnemonic;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::models::{Metadata, WalletState};
use crate::error::StorageError;

const METADATA_FILE: &str = "metadata.json";
const MNEMONIC_FILE: &str = "mnemonic.txt";
const STATE_FILE: &str = "state.json";

/// One directory per wallet below `base_path`, holding its header, its
/// recovery phrase and its persisted engine state.
#[derive(Clone, Debug)]
pub struct Storage {
    base_path: PathBuf,
}

impl Storage {
    /// Storage rooted at `./wallets`
    pub fn new() -> Self {
        Self::new_with_base_dir(PathBuf::from("./wallets"))
    }

    pub fn new_with_base_dir(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    pub fn base_dir(&self) -> &PathBuf {
        &self.base_path
    }

    pub fn wallet_dir(&self, name: &str) -> PathBuf {
        self.base_path.join(name)
    }

    fn file(&self, name: &str, file: &str) -> PathBuf {
        self.wallet_dir(name).join(file)
    }

    pub fn create_wallet(&self, name: &str) -> Result<(), StorageError> {
        fs::create_dir_all(self.wallet_dir(name))?;
        Ok(())
    }

    /// A wallet exists once its header has been written
    pub fn wallet_exists(&self, name: &str) -> bool {
        self.file(name, METADATA_FILE).exists()
    }

    pub fn save_metadata(&self, name: &str, meta: &Metadata) -> Result<(), StorageError> {
        write_json(&self.file(name, METADATA_FILE), meta)
    }

    pub fn load_metadata(&self, name: &str) -> Result<Metadata, StorageError> {
        read_json(&self.file(name, METADATA_FILE))?
            .ok_or_else(|| missing(&self.file(name, METADATA_FILE)))
    }

    pub fn save_mnemonic(&self, name: &str, mnemonic: &Mnemonic) -> Result<(), StorageError> {
        write_atomic(&self.file(name, MNEMONIC_FILE), mnemonic.to_string().as_bytes())
    }

    pub fn load_mnemonic(&self, name: &str) -> Result<Mnemonic, StorageError> {
        let path = self.file(name, MNEMONIC_FILE);
        if !path.exists() {
            return Err(missing(&path));
        }
        let phrase = fs::read_to_string(&path)?;
        Mnemonic::parse(phrase.trim()).map_err(|e| {
            StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unreadable recovery phrase in {}: {}", path.display(), e),
            ))
        })
    }

    pub fn save_state(&self, name: &str, state: &WalletState) -> Result<(), StorageError> {
        write_json(&self.file(name, STATE_FILE), state)
    }

    /// Persisted engine state; a wallet that never saved any starts empty.
    pub fn load_state(&self, name: &str) -> Result<WalletState, StorageError> {
        Ok(read_json(&self.file(name, STATE_FILE))?.unwrap_or_default())
    }

    pub fn delete_wallet(&self, name: &str) -> Result<(), StorageError> {
        let dir = self.wallet_dir(name);
        if !dir.exists() {
            return Err(StorageError::DirectoryNotFound(dir.display().to_string()));
        }

        log::warn!("🗑️  Removing wallet '{}' at {}", name, dir.display());
        fs::remove_dir_all(&dir)?;
        Ok(())
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self::new()
    }
}

fn missing(path: &Path) -> StorageError {
    StorageError::FileNotFound(path.display().to_string())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&contents)?))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let json = serde_json::to_string_pretty(value)?;
    write_atomic(path, json.as_bytes())
}

/// Write to a sibling temp file, then rename over the target
fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

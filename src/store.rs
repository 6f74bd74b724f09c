use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{BridgeError, Result};

/// A ranked member of the bridged community
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub rating: i64,
}

impl User {
    pub fn new(id: impl Into<String>, rating: i64) -> Self {
        Self {
            id: id.into(),
            rating,
        }
    }
}

/// Load the ledger file. A missing file is an empty ledger.
pub fn load(path: &Path) -> Result<HashMap<String, User>> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "ledger file does not exist, starting empty");
            return Ok(HashMap::new());
        }
        Err(e) => return Err(BridgeError::io(path, e)),
    };

    let users: HashMap<String, User> =
        serde_json::from_str(&data).map_err(|e| BridgeError::decode(path, e))?;
    info!(path = %path.display(), users = users.len(), "ledger loaded");
    Ok(users)
}

/// Write the full record set as indented JSON, replacing the target via rename.
pub fn save(path: &Path, users: &HashMap<String, User>) -> Result<()> {
    let sorted: BTreeMap<&String, &User> = users.iter().collect();
    let data = serde_json::to_string_pretty(&sorted)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| BridgeError::io(parent, e))?;
    }

    let tmp = temp_path(path);
    fs::write(&tmp, data).map_err(|e| BridgeError::io(&tmp, e))?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(BridgeError::io(path, e));
    }

    debug!(path = %path.display(), users = users.len(), "ledger saved");
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "ledger".into());
    name.push(".tmp");
    path.with_file_name(name)
}

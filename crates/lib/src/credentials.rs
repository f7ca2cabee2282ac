//! Credential store: one directory per user holding opaque credential blobs.
//!
//! Layout: `<base>/raccoon-<userId>/<key>.json`. The primary record (`creds.json`) carries
//! a boolean `registered` marker; the protocol library treats a registered credential set
//! as already linked and skips pairing.

use crate::channels::phone_from_jid;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

/// Opaque credential blobs keyed by name (file stem).
pub type Credentials = BTreeMap<String, serde_json::Value>;

/// Key of the primary credential record.
pub const PRIMARY_RECORD: &str = "creds";

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("credential io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("credential encode error for {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("user id {0:?} is not usable as a directory name")]
    InvalidUserId(String),
}

/// True when `name` is exactly one normal path component, so joining it onto a directory
/// stays inside that directory.
fn is_plain_file_name(name: &str) -> bool {
    if name.contains(['/', '\\']) {
        return false;
    }
    let mut parts = Path::new(name).components();
    matches!(
        (parts.next(), parts.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Writes per-user credential directories under a base directory.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    base_dir: PathBuf,
}

impl CredentialStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Directory for one user's credentials.
    pub fn auth_dir(&self, user_id: &str) -> PathBuf {
        self.base_dir.join(format!("raccoon-{}", user_id))
    }

    /// Write every non-null blob as `<key>.json` and mark the primary record registered.
    /// Returns the user's credential directory. Re-writing identical input leaves the
    /// directory byte-identical.
    pub async fn write(
        &self,
        user_id: &str,
        credentials: &Credentials,
    ) -> Result<PathBuf, CredentialError> {
        if user_id.is_empty() || !is_plain_file_name(user_id) {
            return Err(CredentialError::InvalidUserId(user_id.to_string()));
        }
        let dir = self.auth_dir(user_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| CredentialError::Io {
                path: dir.clone(),
                source,
            })?;

        for (key, value) in credentials {
            if value.is_null() {
                continue;
            }
            if !is_plain_file_name(key) {
                log::warn!("credentials {}: skipping unsafe key {:?}", user_id, key);
                continue;
            }
            let contents = match value {
                serde_json::Value::String(s) => s.clone(),
                other => serde_json::to_string(other).map_err(|source| CredentialError::Encode {
                    key: key.clone(),
                    source,
                })?,
            };
            let path = dir.join(format!("{}.json", key));
            tokio::fs::write(&path, contents)
                .await
                .map_err(|source| CredentialError::Io { path, source })?;
        }

        if let Err(e) = self.mark_registered(&dir).await {
            log::debug!(
                "credentials {}: could not patch registered marker: {}",
                user_id,
                e
            );
        }
        Ok(dir)
    }

    /// Set `registered: true` on the primary record when it exists without it.
    async fn mark_registered(&self, dir: &Path) -> anyhow::Result<()> {
        let path = dir.join(format!("{}.json", PRIMARY_RECORD));
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let mut record: serde_json::Value = serde_json::from_str(&raw)?;
        let Some(obj) = record.as_object_mut() else {
            return Ok(());
        };
        if obj.get("registered").and_then(|v| v.as_bool()) == Some(true) {
            return Ok(());
        }
        obj.insert("registered".to_string(), serde_json::Value::Bool(true));
        tokio::fs::write(&path, serde_json::to_string(&record)?).await?;
        Ok(())
    }
}

/// Best-effort phone extraction from the primary record's `me.id` (e.g. `15551234567:3@s.whatsapp.net`).
/// The record may be embedded as an object or as a JSON string.
pub fn phone_from_credentials(credentials: &Credentials) -> Option<String> {
    let record = credentials.get(PRIMARY_RECORD)?;
    let parsed;
    let record = match record {
        serde_json::Value::String(s) => {
            parsed = serde_json::from_str::<serde_json::Value>(s).ok()?;
            &parsed
        }
        other => other,
    };
    let id = record.get("me")?.get("id")?.as_str()?;
    phone_from_jid(id)
}

use figment::{providers::Env, Figment};
use rocket::data::{ByteUnit, ToByteUnit};
use serde::Deserialize;
use std::path::PathBuf;

pub const DEFAULT_FOLDER_PATH: &str = "/tmp/files_manager";

/// base64 inflates contents by a third, this fits uploads of ~48MiB
fn default_upload_limit() -> ByteUnit {
    64.mebibytes()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(crate = "rocket::serde", default)]
pub struct FilesConfig {
    /// where the blob store writes uploaded bytes
    pub folder_path: PathBuf,
    /// largest upload request body, base64 data included. Overrides
    /// rocket's `limits.json`.
    pub upload_limit: ByteUnit,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            folder_path: PathBuf::from(DEFAULT_FOLDER_PATH),
            upload_limit: default_upload_limit(),
        }
    }
}

impl FilesConfig {
    /// Rocket's own figment (Rocket.toml + ROCKET_ env vars) with the bare
    /// FOLDER_PATH env var on top.
    pub fn figment() -> Figment {
        rocket::Config::figment().merge(Env::raw().only(&["FOLDER_PATH"]))
    }
}

//! Publication of finished artifacts into the public upload directory.

use super::UploadResult;
use crate::models::published::Attribution;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::fs;
use tracing::{info, warn};

const FALLBACK_NAME: &str = "unnamed";

/// Reduce a client-supplied filename to a single safe path component.
///
/// Directory parts are dropped, whitespace runs become `_`, anything other than
/// alphanumerics, `.`, `_` and `-` is removed, and leading or trailing dots and
/// underscores are trimmed.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);

    let joined = base.split_whitespace().collect::<Vec<_>>().join("_");
    let cleaned: String = joined
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    let trimmed = cleaned.trim_matches(|c| c == '.' || c == '_');

    if trimmed.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Split `name` into stem and extension (with its dot). Dotfiles have no extension.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => name.split_at(pos),
        _ => (name, ""),
    }
}

#[derive(Clone, Debug)]
pub struct Finalizer {
    upload_dir: PathBuf,
}

impl Finalizer {
    pub fn new(upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// First unused name of the form `{prefix}{stem}[_{n}]{ext}`.
    ///
    /// The suffix goes before the extension of the original filename, never
    /// inside the attribution prefix.
    pub async fn resolve_name(
        &self,
        original_filename: &str,
        attribution: &Attribution,
    ) -> io::Result<String> {
        let safe = sanitize_filename(original_filename);
        let (stem, ext) = split_extension(&safe);
        let prefix = attribution.prefix();

        let mut candidate = format!("{}{}", prefix, safe);
        let mut counter = 1u32;
        while fs::try_exists(self.upload_dir.join(&candidate)).await? {
            candidate = format!("{}{}_{}{}", prefix, stem, counter, ext);
            counter += 1;
        }
        Ok(candidate)
    }

    /// Move `artifact` into the upload directory under a collision-free,
    /// attributed name and return that name.
    ///
    /// Never overwrites. Callers must serialise calls that may race for a name.
    pub async fn publish(
        &self,
        artifact: &Path,
        original_filename: &str,
        attribution: &Attribution,
    ) -> UploadResult<String> {
        fs::create_dir_all(&self.upload_dir).await?;
        let name = self.resolve_name(original_filename, attribution).await?;
        let destination = self.upload_dir.join(&name);

        move_file(artifact, &destination).await?;
        info!("published {} as {}", original_filename, name);
        Ok(name)
    }
}

/// Rename, falling back to copy + remove when source and target live on
/// different filesystems.
async fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    let rename_err = match fs::rename(from, to).await {
        Ok(()) => return Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => return Err(err),
        Err(err) => err,
    };

    warn!(
        "rename {} -> {} failed ({}), copying instead",
        from.display(),
        to.display(),
        rename_err
    );
    if let Err(err) = fs::copy(from, to).await {
        let _ = fs::remove_file(to).await;
        return Err(err);
    }
    fs::remove_file(from).await
}

// Copyright 2025 JiangLong.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Fetching helper binaries (kubectl, sonobuoy, clusterloader2) on demand.

use crate::shared::{CancelScope, Result, TesterError};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::info;

/// Host OS and architecture in release-artifact naming.
pub fn host_os_arch() -> (&'static str, &'static str) {
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    };
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };
    (os, arch)
}

pub fn is_executable(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && has_exec_bit(&meta),
        Err(_) => false,
    }
}

#[cfg(unix)]
fn has_exec_bit(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn has_exec_bit(_meta: &std::fs::Metadata) -> bool {
    true
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}

async fn fetch_bytes(url: &str, cancel: &CancelScope) -> Result<Vec<u8>> {
    let download = async {
        let resp = reqwest::get(url).await?.error_for_status()?;
        Ok::<_, TesterError>(resp.bytes().await?.to_vec())
    };
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TesterError::Cancelled),
        res = download => res,
    }
}

fn temp_sibling(path: &Path) -> Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    Ok(NamedTempFile::new_in(dir)?)
}

/// Download `url` into `path` unless an executable is already there.
///
/// The payload lands in a temp file next to `path`, gets its exec bit, and is
/// renamed into place, so a partial download never shadows the target.
pub async fn ensure_binary(path: &Path, url: &str, cancel: &CancelScope) -> Result<()> {
    if is_executable(path) {
        return Ok(());
    }
    info!(path = %path.display(), url = %url, "downloading binary");
    let bytes = fetch_bytes(url, cancel).await?;

    let mut tmp = temp_sibling(path)?;
    tmp.write_all(&bytes)?;
    tmp.flush()?;
    set_executable(tmp.path())?;
    if !is_executable(tmp.path()) {
        return Err(TesterError::command(
            url,
            format!("downloaded file {} is not executable", tmp.path().display()),
        ));
    }
    tmp.persist(path)
        .map_err(|e| TesterError::Io(e.error))?;
    info!(path = %path.display(), size = bytes.len(), "installed binary");
    Ok(())
}

/// Download a `.tar.gz` release and place the entry named `binary_name` at `path`.
pub async fn ensure_binary_from_tar_gz(
    path: &Path,
    url: &str,
    binary_name: &str,
    cancel: &CancelScope,
) -> Result<()> {
    if is_executable(path) {
        return Ok(());
    }
    if !url.ends_with("tar.gz") {
        return Err(TesterError::command(url, "release archive is not tar.gz compressed"));
    }
    info!(path = %path.display(), url = %url, "downloading release archive");
    let bytes = fetch_bytes(url, cancel).await?;

    let staging = tempfile::tempdir()?;
    unpack_tar_gz(&bytes, staging.path())?;

    let extracted = staging.path().join(binary_name);
    if !extracted.exists() {
        return Err(TesterError::command(
            url,
            format!("archive does not contain '{}'", binary_name),
        ));
    }
    let mut tmp = temp_sibling(path)?;
    tmp.write_all(&std::fs::read(&extracted)?)?;
    tmp.flush()?;
    set_executable(tmp.path())?;
    tmp.persist(path).map_err(|e| TesterError::Io(e.error))?;
    info!(path = %path.display(), "installed binary from archive");
    Ok(())
}

pub fn unpack_tar_gz(bytes: &[u8], dest: &Path) -> Result<()> {
    let decoder = GzDecoder::new(bytes);
    let mut archive = tar::Archive::new(decoder);
    archive.unpack(dest)?;
    Ok(())
}

/// Compress directory `src` into the `.tar.gz` at `dest`.
pub fn pack_dir_tar_gz(src: &Path, dest: &Path) -> Result<()> {
    let file = std::fs::File::create(dest)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all(".", src)?;
    builder.into_inner()?.finish()?;
    Ok(())
}

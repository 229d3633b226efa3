// 单文件传输：路径推导与带进度的 SFTP 读写
pub mod progress;

use crate::utils::error::{IsshoError, Result};
use crate::utils::file::{base_name, ensure_parent_dir, expand_remote_tilde, expand_tilde};
use log::debug;
use ssh2::Sftp;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

pub use progress::ProgressTracker;

pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Progress callback: `(bytes transferred so far, bytes total)`.
pub type Progress<'a> = &'a mut dyn FnMut(u64, u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPaths {
    pub local: PathBuf,
    pub remote: String,
}

/// Fills in whichever side is missing with the other side's file name, then
/// expands `~` locally and remotely.
pub fn transfer_paths(
    local: Option<&Path>,
    remote: Option<&str>,
    remote_home: &str,
) -> Result<TransferPaths> {
    let (local, remote) = match (local, remote) {
        (Some(local), Some(remote)) => (local.to_path_buf(), remote.to_string()),
        (None, Some(remote)) => (PathBuf::from(base_name(remote)), remote.to_string()),
        (Some(local), None) => {
            let local_str = local.to_string_lossy();
            let name = base_name(&local_str).to_string();
            (local.to_path_buf(), name)
        }
        (None, None) => {
            return Err(IsshoError::invalid_config(
                "a transfer needs a local or a remote path",
            ))
        }
    };
    Ok(TransferPaths {
        local: expand_tilde(local),
        remote: expand_remote_tilde(&remote, remote_home),
    })
}

pub fn download(sftp: &Sftp, remote: &str, local: &Path, progress: Progress<'_>) -> Result<u64> {
    let mut remote_file = sftp.open(Path::new(remote))?;
    let total = remote_file.stat()?.size.unwrap_or(0);
    ensure_parent_dir(local)?;
    let mut local_file = File::create(local)?;

    debug!("Downloading {} -> {} ({} bytes)", remote, local.display(), total);
    copy_with_progress(&mut remote_file, &mut local_file, total, progress)
}

pub fn upload(sftp: &Sftp, local: &Path, remote: &str, progress: Progress<'_>) -> Result<u64> {
    let mut local_file = File::open(local)?;
    let total = local_file.metadata()?.len();
    let mut remote_file = sftp.create(Path::new(remote))?;

    debug!("Uploading {} -> {} ({} bytes)", local.display(), remote, total);
    copy_with_progress(&mut local_file, &mut remote_file, total, progress)
}

pub fn copy_with_progress(
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    total: u64,
    progress: Progress<'_>,
) -> Result<u64> {
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut transferred = 0u64;

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        writer.write_all(&buffer[..bytes_read])?;
        transferred += bytes_read as u64;
        progress(transferred, total.max(transferred));
    }

    writer.flush()?;
    if transferred == 0 {
        progress(0, total);
    }
    Ok(transferred)
}

//! Flat archive expansion.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info};
use zip::ZipArchive;

use crate::ExpandError;
use crate::validation::validate_member_path;

const COPY_BUFFER_SIZE: usize = 256 * 1024;

/// A file extracted from an archive into the staging area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedMember {
    /// Where the member was written.
    pub path: PathBuf,
    /// Final component of the member's archive name.
    pub name: String,
    /// Full name inside the archive.
    pub archive_name: String,
    pub size: u64,
}

/// Expands every file member of `archive` into `dest_dir` (flat layout).
///
/// Members are written with create-new semantics and fsynced. Name
/// collisions are disambiguated with a hash suffix of the member's archive
/// name. On failure every member written so far is removed and the archive
/// is left in place; on success the archive is deleted.
pub fn expand_archive(archive: &Path, dest_dir: &Path) -> Result<Vec<ExpandedMember>, ExpandError> {
    std::fs::create_dir_all(dest_dir)?;

    let mut members = Vec::new();
    if let Err(e) = extract_members(archive, dest_dir, &mut members) {
        for member in &members {
            let _ = std::fs::remove_file(&member.path);
        }
        return Err(e);
    }

    std::fs::remove_file(archive)?;
    info!(
        archive = %archive.display(),
        members = members.len(),
        "archive expanded"
    );
    Ok(members)
}

fn extract_members(
    archive: &Path,
    dest_dir: &Path,
    members: &mut Vec<ExpandedMember>,
) -> Result<(), ExpandError> {
    let file = File::open(archive)?;
    let mut zip = ZipArchive::new(BufReader::new(file))?;
    let mut taken = HashSet::new();
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        if entry.is_dir() {
            continue;
        }

        let archive_name = entry.name().to_string();
        validate_member_path(&archive_name)?;

        let display = display_name(&archive_name);
        let local = local_name(&archive_name, &display, &mut taken)?;
        let path = dest_dir.join(&local);

        let mut out = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;

        match copy_member(&mut entry, &mut out, &mut buf, &archive_name) {
            Ok(size) => {
                debug!(member = %archive_name, local = %local, bytes = size, "member extracted");
                members.push(ExpandedMember {
                    path,
                    name: display,
                    archive_name,
                    size,
                });
            }
            Err(e) => {
                drop(out);
                let _ = std::fs::remove_file(&path);
                return Err(e);
            }
        }
    }

    Ok(())
}

/// Copies one member. Read failures mean the archive is damaged; write
/// failures are reported as I/O (or disk full).
fn copy_member(
    entry: &mut impl Read,
    out: &mut File,
    buf: &mut [u8],
    archive_name: &str,
) -> Result<u64, ExpandError> {
    let mut written: u64 = 0;
    loop {
        let n = entry
            .read(buf)
            .map_err(|e| ExpandError::Corrupt(format!("{archive_name}: {e}")))?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
        written += n as u64;
    }
    out.sync_all()?;
    Ok(written)
}

fn display_name(archive_name: &str) -> String {
    let normalized = archive_name.replace('\\', "/");
    Path::new(&normalized)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or(normalized)
}

/// Picks a unique local name for a member in the flat destination.
fn local_name(
    archive_name: &str,
    display: &str,
    taken: &mut HashSet<String>,
) -> Result<String, ExpandError> {
    if taken.insert(display.to_string()) {
        return Ok(display.to_string());
    }

    let digest = Sha256::digest(archive_name.as_bytes());
    let suffix = hex::encode(&digest[..4]);
    let candidate = match display.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}-{suffix}.{ext}"),
        _ => format!("{display}-{suffix}"),
    };

    if taken.insert(candidate.clone()) {
        Ok(candidate)
    } else {
        Err(ExpandError::Collision(archive_name.to_string()))
    }
}

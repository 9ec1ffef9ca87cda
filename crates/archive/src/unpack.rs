use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use tracing::{debug, warn};

use crate::ArchiveError;
use crate::validation::validate_entry_name;

/// Extracts a tar+gzip archive into `destination_dir`.
///
/// Entries are unpacked into a hidden staging directory inside
/// `destination_dir`; top-level entries are moved into place only after the
/// whole archive decoded cleanly, replacing same-named existing entries.
/// If a move fails, the destination is restored to its previous contents.
/// Returns the relative paths of the extracted files, in archive order.
pub fn unpack(archive_path: &Path, destination_dir: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
    std::fs::create_dir_all(destination_dir)?;

    let staging = tempfile::Builder::new()
        .prefix(".vimsicles-unpack-")
        .tempdir_in(destination_dir)?;

    let file = File::open(archive_path)?;
    let extracted = extract_entries(file, staging.path())?;

    let mut staged = std::fs::read_dir(staging.path())?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    staged.sort();

    // Replaced entries are parked here and removed with it on success.
    let replaced = tempfile::Builder::new()
        .prefix(".vimsicles-replaced-")
        .tempdir_in(destination_dir)?;
    commit(&staged, destination_dir, replaced.path(), |from, to| {
        std::fs::rename(from, to)
    })?;

    debug!(
        archive = %archive_path.display(),
        files = extracted.len(),
        "archive extracted"
    );
    Ok(extracted)
}

fn extract_entries(file: File, staging: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
    let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));
    archive.set_overwrite(true);
    archive.set_preserve_permissions(false);

    let mut extracted = Vec::new();
    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        let path = entry.path().map_err(corrupt)?.into_owned();
        let name = path
            .to_str()
            .ok_or_else(|| ArchiveError::Corrupt(format!("non UTF-8 entry: {}", path.display())))?;
        validate_entry_name(name).map_err(|e| ArchiveError::Corrupt(e.to_string()))?;

        let entry_type = entry.header().entry_type();
        if !(entry_type.is_file() || entry_type.is_dir()) {
            warn!(entry = %name, ?entry_type, "skipping unsupported archive entry");
            continue;
        }

        if !entry.unpack_in(staging).map_err(corrupt)? {
            return Err(ArchiveError::Corrupt(format!("entry escapes destination: {name}")));
        }
        if entry_type.is_file() {
            extracted.push(path);
        }
    }

    Ok(extracted)
}

/// Moves `staged` top-level entries into `destination_dir`.
///
/// A same-named existing entry is first moved into `replaced`. On the first
/// failed move every earlier move is undone, newest first.
fn commit<F>(
    staged: &[PathBuf],
    destination_dir: &Path,
    replaced: &Path,
    mut rename: F,
) -> std::io::Result<()>
where
    F: FnMut(&Path, &Path) -> std::io::Result<()>,
{
    let mut moves: Vec<(PathBuf, PathBuf)> = Vec::new();

    let mut failure = None;
    for source in staged {
        let Some(name) = source.file_name() else {
            continue;
        };
        let target = destination_dir.join(name);

        match std::fs::symlink_metadata(&target) {
            Ok(_) => {
                let parked = replaced.join(name);
                if let Err(e) = rename(&target, &parked) {
                    failure = Some(e);
                    break;
                }
                moves.push((target.clone(), parked));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                failure = Some(e);
                break;
            }
        }

        if let Err(e) = rename(source, &target) {
            failure = Some(e);
            break;
        }
        moves.push((source.clone(), target));
    }

    let Some(err) = failure else {
        return Ok(());
    };
    warn!(error = %err, "moving extracted entries failed, restoring destination");
    for (from, to) in moves.iter().rev() {
        if let Err(e) = std::fs::rename(to, from) {
            warn!(path = %from.display(), error = %e, "failed to restore entry");
        }
    }
    Err(err)
}

fn corrupt(err: std::io::Error) -> ArchiveError {
    ArchiveError::Corrupt(err.to_string())
}

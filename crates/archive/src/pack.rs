use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use flate2::Compression;
use flate2::write::GzEncoder;
use tar::{Builder, EntryType, Header, HeaderMode};
use tracing::{debug, warn};

use crate::digest::DigestWriter;
use crate::validation::{validate_archive_name, validate_entry_name};
use crate::{ARCHIVE_EXTENSION, ArchiveError};

/// Where the bytes of a [`SourceFile`] come from.
enum SourceData {
    Path(PathBuf),
    Bytes(Vec<u8>),
    Reader {
        len: u64,
        reader: Box<dyn Read + Send>,
    },
}

/// A logical file to be packed: a name inside the archive plus a byte source.
pub struct SourceFile {
    name: String,
    data: SourceData,
}

impl SourceFile {
    /// A file on disk, stored under its own file name.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self, ArchiveError> {
        let path = path.into();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                ArchiveError::InvalidEntry(format!("no usable file name: {}", path.display()))
            })?
            .to_string();
        Ok(Self::named_path(name, path))
    }

    /// A file on disk, stored under `name`.
    pub fn named_path(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            data: SourceData::Path(path.into()),
        }
    }

    /// In-memory content stored under `name`.
    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: SourceData::Bytes(bytes.into()),
        }
    }

    /// A stream of exactly `len` bytes stored under `name`.
    pub fn from_reader(name: impl Into<String>, len: u64, reader: Box<dyn Read + Send>) -> Self {
        Self {
            name: name.into(),
            data: SourceData::Reader { len, reader },
        }
    }

    /// Logical name inside the archive.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for SourceFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.data {
            SourceData::Path(p) => format!("path({})", p.display()),
            SourceData::Bytes(b) => format!("bytes({})", b.len()),
            SourceData::Reader { len, .. } => format!("reader({len})"),
        };
        f.debug_struct("SourceFile")
            .field("name", &self.name)
            .field("source", &source)
            .finish()
    }
}

/// A packed archive on disk, removed when dropped.
#[derive(Debug)]
pub struct PackedArchive {
    path: PathBuf,
    name: String,
    digest: String,
    size: u64,
    entries: usize,
}

impl PackedArchive {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Archive file name (also the name announced on the wire).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lowercase hex MD5 of the archive bytes.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Archive size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of logical files packed.
    pub fn entries(&self) -> usize {
        self.entries
    }
}

impl Drop for PackedArchive {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %err, "failed to remove packed archive");
            }
        }
    }
}

/// Returns a fresh archive name of the form `transfer_<unix-millis>.tar.gz`.
pub fn archive_name() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    format!("transfer_{millis}.{ARCHIVE_EXTENSION}")
}

/// Packs `files` into `scratch_dir/archive_name` as a deterministic tar+gzip
/// stream, hashing the bytes as they are written.
///
/// Entry order follows `files`; headers carry a fixed mode and zero mtime so
/// identical input always yields identical bytes and digest.
pub fn pack(
    files: Vec<SourceFile>,
    scratch_dir: &Path,
    archive_name: &str,
) -> Result<PackedArchive, ArchiveError> {
    if files.is_empty() {
        return Err(ArchiveError::Empty);
    }
    validate_archive_name(archive_name)?;

    {
        let mut seen = HashSet::new();
        for file in &files {
            validate_entry_name(&file.name)?;
            if !seen.insert(file.name.as_str()) {
                return Err(ArchiveError::InvalidEntry(format!(
                    "duplicate name: {}",
                    file.name
                )));
            }
        }
    }

    std::fs::create_dir_all(scratch_dir)?;
    let path = scratch_dir.join(archive_name);
    let entries = files.len();

    match write_archive(&path, files) {
        Ok((digest, size)) => {
            debug!(archive = %archive_name, entries, size, %digest, "archive packed");
            Ok(PackedArchive {
                path,
                name: archive_name.to_string(),
                digest,
                size,
                entries,
            })
        }
        Err(e) => {
            let _ = std::fs::remove_file(&path);
            Err(e)
        }
    }
}

fn write_archive(path: &Path, files: Vec<SourceFile>) -> Result<(String, u64), ArchiveError> {
    let file = File::create(path)?;
    let writer = DigestWriter::new(BufWriter::new(file));
    let encoder = GzEncoder::new(writer, Compression::default());
    let mut builder = Builder::new(encoder);
    builder.mode(HeaderMode::Deterministic);

    for source in files {
        append_source(&mut builder, source)?;
    }

    let encoder = builder.into_inner()?;
    let writer = encoder.finish()?;
    let (mut buffered, digest, size) = writer.finish();
    buffered.flush()?;
    Ok((digest, size))
}

fn append_source<W: Write>(
    builder: &mut Builder<W>,
    source: SourceFile,
) -> Result<(), ArchiveError> {
    let SourceFile { name, data } = source;
    match data {
        SourceData::Path(path) => {
            let file = File::open(&path)?;
            let len = file.metadata()?.len();
            append_entry(builder, &name, len, file)
        }
        SourceData::Bytes(bytes) => append_entry(builder, &name, bytes.len() as u64, &bytes[..]),
        SourceData::Reader { len, reader } => append_entry(builder, &name, len, reader),
    }
}

/// Appends exactly `len` bytes from `data`.
///
/// The header is written before the body, so a source that ends early or
/// keeps going past `len` (a file that changed while packing, or a reader
/// with a wrong length) fails the whole pack.
fn append_entry<W: Write, R: Read>(
    builder: &mut Builder<W>,
    name: &str,
    len: u64,
    mut data: R,
) -> Result<(), ArchiveError> {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(len);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);

    let mut body = CountingReader::new((&mut data).take(len));
    builder.append_data(&mut header, name, &mut body)?;
    if body.count < len {
        return Err(ArchiveError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("{name}: expected {len} bytes, source ended after {}", body.count),
        )));
    }
    if data.read(&mut [0u8; 1])? != 0 {
        return Err(ArchiveError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("{name}: source is longer than {len} bytes"),
        )));
    }
    Ok(())
}

struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R> CountingReader<R> {
    fn new(inner: R) -> Self {
        Self { inner, count: 0 }
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

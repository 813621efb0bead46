//! GOB archive reader.
//!
//! A GOB is a flat directory of named members followed by their data. Lookups match
//! a case-insensitive *substring* of the member name and the first registered member
//! wins, so two members whose names share the needle cannot be told apart.

use std::{
    collections::HashMap,
    fs::File,
    io::{self, BufReader, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
};

use binrw::binread;
use common::{DecodeError, Format, PaddedName, Record, RecordReader};
use parking_lot::Mutex;
use thiserror::Error;

pub const MAGIC: &[u8; 3] = b"GOB";

#[derive(Debug, Error)]
pub enum GobError {
    #[error("unable to read archive {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed archive {path:?}")]
    Decode {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },
}

#[binread]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[br(little)]
pub struct Header {
    pub magic: [u8; 3],
    pub version: u8,
    // Neither offset is needed for extraction; entries follow the header directly.
    pub first_item_offset: i32,
    pub manifest_offset: i32,
    pub item_count: i32,
}

impl Record for Header {
    const SIZE: usize = 16;
}

#[binread]
#[br(little)]
struct Entry {
    offset: u32,
    length: u32,
    name: PaddedName<128>,
}

impl Record for Entry {
    const SIZE: usize = 136;
}

/// One member of an archive directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub name: String,
    pub offset: u32,
    pub length: u32,
    folded_name: String,
}

impl Item {
    pub fn new(name: impl Into<String>, offset: u32, length: u32) -> Self {
        let name = name.into();
        let folded_name = name.to_lowercase();
        Self {
            name,
            offset,
            length,
            folded_name,
        }
    }

    /// Case-insensitive substring match against the member name.
    pub fn matches(&self, needle: &str) -> bool {
        self.folded_name.contains(&needle.to_lowercase())
    }
}

/// The ordered directory of an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub version: u8,
    pub items: Vec<Item>,
}

impl Manifest {
    /// Decodes a header and its directory from the start of `data`.
    pub fn from_slice(data: &[u8]) -> Result<Manifest, DecodeError> {
        let mut reader = RecordReader::new(data, Format::Gob);
        let header: Header = reader.read("header")?;
        let count = Self::item_count(&header)?;

        let mut items = Vec::with_capacity(count.min(reader.remaining().len() / Entry::SIZE));
        for _ in 0..count {
            let entry: Entry = reader.read("directory entry")?;
            items.push(Item::new(entry.name.name, entry.offset, entry.length));
        }

        Ok(Manifest {
            version: header.version,
            items,
        })
    }

    /// Reads only the header and directory from `reader`.
    pub fn read<R: Read>(reader: &mut R) -> Result<Manifest, DecodeError> {
        let mut header_bytes = [0u8; Header::SIZE];
        Self::fill(reader, &mut header_bytes, "header")?;
        let (header, _) = common::decode_record::<Header>(&header_bytes, 0, Format::Gob, "header")?;
        let count = Self::item_count(&header)?;

        let mut items = Vec::new();
        let mut entry_bytes = [0u8; Entry::SIZE];
        for _ in 0..count {
            Self::fill(reader, &mut entry_bytes, "directory entry")?;
            let (entry, _) =
                common::decode_record::<Entry>(&entry_bytes, 0, Format::Gob, "directory entry")?;
            items.push(Item::new(entry.name.name, entry.offset, entry.length));
        }

        Ok(Manifest {
            version: header.version,
            items,
        })
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Manifest, GobError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| GobError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let manifest = Self::read(&mut BufReader::new(file)).map_err(|source| match source {
            DecodeError::Io { source, .. } => GobError::Io {
                path: path.to_path_buf(),
                source,
            },
            source => GobError::Decode {
                path: path.to_path_buf(),
                source,
            },
        })?;
        log::debug!("{:?}: {} items", path, manifest.items.len());
        Ok(manifest)
    }

    /// The first item whose name contains `needle`, ignoring case.
    pub fn find(&self, needle: &str) -> Option<&Item> {
        self.items.iter().find(|item| item.matches(needle))
    }

    fn item_count(header: &Header) -> Result<usize, DecodeError> {
        if &header.magic != MAGIC {
            return Err(DecodeError::BadMagic {
                format: Format::Gob,
                found: header.magic.to_vec(),
            });
        }
        usize::try_from(header.item_count).map_err(|_| DecodeError::Unsupported {
            format: Format::Gob,
            field: "item count",
            value: header.item_count.into(),
        })
    }

    fn fill<R: Read>(
        reader: &mut R,
        buffer: &mut [u8],
        field: &'static str,
    ) -> Result<(), DecodeError> {
        reader.read_exact(buffer).map_err(|source| match source.kind() {
            io::ErrorKind::UnexpectedEof => DecodeError::BufferTooShort {
                format: Format::Gob,
                field,
                offset: 0,
                needed: buffer.len(),
                available: 0,
            },
            _ => DecodeError::Io {
                path: PathBuf::new(),
                source,
            },
        })
    }
}

/// Reads one member's bytes straight from the archive file.
pub fn read_item<P: AsRef<Path>>(path: P, item: &Item) -> Result<Vec<u8>, GobError> {
    let path = path.as_ref();
    let io_error = |source| GobError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(io_error)?;
    file.seek(SeekFrom::Start(item.offset.into())).map_err(io_error)?;
    let mut data = vec![0; item.length as usize];
    file.read_exact(&mut data).map_err(io_error)?;
    Ok(data)
}

/// Manifests of every archive opened so far, keyed by path.
///
/// Archives are treated as immutable for the lifetime of this value.
#[derive(Debug, Default)]
pub struct Archives {
    manifests: Mutex<HashMap<PathBuf, Arc<Manifest>>>,
}

impl Archives {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_manifest<P: AsRef<Path>>(&self, path: P) -> Result<Arc<Manifest>, GobError> {
        let path = path.as_ref();
        let mut manifests = self.manifests.lock();
        if let Some(manifest) = manifests.get(path) {
            return Ok(Arc::clone(manifest));
        }

        let manifest = Arc::new(Manifest::open(path)?);
        manifests.insert(path.to_path_buf(), Arc::clone(&manifest));
        Ok(manifest)
    }

    /// The bytes of the first member whose name contains `needle`, or `None`.
    pub fn extract<P: AsRef<Path>>(
        &self,
        path: P,
        needle: &str,
    ) -> Result<Option<Vec<u8>>, GobError> {
        let path = path.as_ref();
        let manifest = self.open_manifest(path)?;
        match manifest.find(needle) {
            Some(item) => {
                log::trace!("{:?}: extracting {} ({} bytes)", path, item.name, item.length);
                read_item(path, item).map(Some)
            }
            None => Ok(None),
        }
    }
}

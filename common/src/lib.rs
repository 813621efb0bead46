use std::{borrow::Cow, fmt, io::Read, io::Seek, path::Path};

use binrw::{BinRead, BinResult, Endian};

mod binary;
mod error;
pub mod lines;

pub use binary::{decode_record, Record, RecordReader};
pub use error::{BoxError, DecodeError};
pub use lines::{Fields, Line, LineParser};

pub type Vec2 = [f32; 2];
pub type Vec3 = [f32; 3];

/// The asset format a record or error belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Format {
    Gob,
    Palette,
    Material,
    Bitmap,
    Font,
    Model,
    Level,
    Keyframe,
    Puppet,
}

impl Format {
    pub fn extension(&self) -> &'static str {
        match self {
            Format::Gob => "gob",
            Format::Palette => "cmp",
            Format::Material => "mat",
            Format::Bitmap => "bm",
            Format::Font => "sft",
            Format::Model => "3do",
            Format::Level => "jkl",
            Format::Keyframe => "key",
            Format::Puppet => "pup",
        }
    }

    pub fn from_name(name: &str) -> Option<Format> {
        let (_, extension) = name.rsplit_once('.')?;
        [
            Format::Gob,
            Format::Palette,
            Format::Material,
            Format::Bitmap,
            Format::Font,
            Format::Model,
            Format::Level,
            Format::Keyframe,
            Format::Puppet,
        ]
        .into_iter()
        .find(|format| format.extension().eq_ignore_ascii_case(extension))
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.extension().to_ascii_uppercase())
    }
}

/// Decoding of one asset format from raw bytes.
///
/// `Ctx` carries whatever the format needs to resolve references to other assets.
/// Self-contained formats use the default `()` context.
pub trait Decode<Ctx: ?Sized = ()>: Sized {
    fn decode(data: &[u8], ctx: &Ctx) -> Result<Self, DecodeError>;

    fn decode_path<P: AsRef<Path>>(path: P, ctx: &Ctx) -> Result<Self, DecodeError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|source| DecodeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::decode(&data, ctx)
    }
}

/// Text assets are plain ASCII; anything else is replaced rather than rejected.
pub fn text(data: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(data)
}

/// A fixed-width, null padded ASCII name.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct PaddedName<const N: usize> {
    pub name: String,
}

impl<const N: usize> BinRead for PaddedName<N> {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: Endian,
        args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let bytes = <[u8; N]>::read_options(reader, endian, args)?;
        let end = bytes.iter().position(|b| *b == 0).unwrap_or(N);
        Ok(PaddedName {
            name: String::from_utf8_lossy(&bytes[..end]).into_owned(),
        })
    }
}

impl<const N: usize> Record for PaddedName<N> {
    const SIZE: usize = N;
}

impl<const N: usize> fmt::Debug for PaddedName<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.name, f)
    }
}

impl<const N: usize> fmt::Display for PaddedName<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.name, f)
    }
}

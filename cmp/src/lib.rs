use std::{fmt, sync::Arc};

use binrw::binread;
use serde::{Serialize, Serializer};

use common::{decode_record, Decode, DecodeError, Format, Record};

pub const PALETTE_SIZE: usize = 256;

#[binread]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[br(little)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// 256 RGB triples, indexed by material and bitmap pixel values.
#[binread]
#[derive(Clone, PartialEq, Eq)]
#[br(little)]
pub struct Palette(pub [Rgb; PALETTE_SIZE]);

impl Palette {
    pub fn color(&self, index: u8) -> Rgb {
        self.0[index as usize]
    }

    pub fn colors(&self) -> &[Rgb; PALETTE_SIZE] {
        &self.0
    }
}

impl Record for Palette {
    const SIZE: usize = PALETTE_SIZE * 3;
}

impl Default for Palette {
    fn default() -> Self {
        Palette([Rgb::default(); PALETTE_SIZE])
    }
}

impl fmt::Debug for Palette {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Palette").finish()
    }
}

impl Serialize for Palette {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter())
    }
}

#[binread]
#[br(little)]
struct ColorMapRecord {
    tag: [u8; 4],
    version: i32,
    transparency: i32,
    #[br(pad_before = 52)]
    palette: Palette,
}

impl Record for ColorMapRecord {
    const SIZE: usize = 4 + 4 + 4 + 52 + Palette::SIZE;
}

/// A decoded CMP file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ColorMap {
    pub version: i32,
    pub transparency: i32,
    pub palette: Arc<Palette>,
}

impl Decode for ColorMap {
    fn decode(data: &[u8], _ctx: &()) -> Result<Self, DecodeError> {
        let (record, _) = decode_record::<ColorMapRecord>(data, 0, Format::Palette, "header")?;
        log::trace!(
            "colormap {:?} version {}",
            String::from_utf8_lossy(&record.tag),
            record.version
        );
        Ok(ColorMap {
            version: record.version,
            transparency: record.transparency,
            palette: Arc::new(record.palette),
        })
    }
}

use std::sync::Arc;

use binrw::binread;
use serde::Serialize;

use bm::Bitmap;
use cmp::Palette;
use common::{Decode, DecodeError, Format, Record, RecordReader};

#[binread]
#[derive(Debug)]
#[br(little)]
struct Header {
    tag: [u8; 4],
    _reserved: [i32; 4],
    #[br(pad_after = 16)]
    table_count: i32,
}

impl Record for Header {
    const SIZE: usize = 40;
}

#[binread]
#[br(little)]
struct TableRange {
    first: i16,
    last: i16,
}

impl Record for TableRange {
    const SIZE: usize = 4;
}

#[binread]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[br(little)]
pub struct CharDef {
    /// Left edge of the glyph in the atlas bitmap.
    pub x_offset: i32,
    pub width: i32,
}

impl Record for CharDef {
    const SIZE: usize = 8;
}

/// Glyphs for the contiguous character range `first..=last`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CharacterTable {
    pub first: i16,
    pub last: i16,
    pub chars: Vec<CharDef>,
}

impl CharacterTable {
    pub fn get(&self, code: i16) -> Option<&CharDef> {
        let offset = usize::try_from(i32::from(code) - i32::from(self.first)).ok()?;
        self.chars.get(offset)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Font {
    pub tables: Vec<CharacterTable>,
    pub bitmap: Bitmap,
}

impl Font {
    /// Looks `c` up in the first table whose range covers it.
    pub fn glyph(&self, c: char) -> Option<&CharDef> {
        let code = i16::try_from(u32::from(c)).ok()?;
        self.tables.iter().find_map(|table| table.get(code))
    }

    /// Gives the atlas `palette` unless its bitmap carries one already.
    pub fn fill_palette(&mut self, palette: Arc<Palette>) {
        if self.bitmap.palette.is_none() {
            self.bitmap.palette = Some(palette);
        }
    }
}

impl Decode for Font {
    fn decode(data: &[u8], _ctx: &()) -> Result<Self, DecodeError> {
        let mut reader = RecordReader::new(data, Format::Font);
        let header: Header = reader.read("header")?;
        let table_count = usize::try_from(header.table_count).map_err(|_| DecodeError::Unsupported {
            format: Format::Font,
            field: "table count",
            value: header.table_count.into(),
        })?;

        let mut tables = Vec::with_capacity(table_count.min(data.len() / TableRange::SIZE));
        for _ in 0..table_count {
            let range: TableRange = reader.read("character table range")?;
            if range.last < range.first {
                return Err(DecodeError::Unsupported {
                    format: Format::Font,
                    field: "character table range",
                    value: i64::from(range.last) - i64::from(range.first),
                });
            }

            let count = (i32::from(range.last) - i32::from(range.first) + 1) as usize;
            let mut chars = Vec::with_capacity(count);
            for _ in 0..count {
                chars.push(reader.read::<CharDef>("character definition")?);
            }
            tables.push(CharacterTable {
                first: range.first,
                last: range.last,
                chars,
            });
        }

        let (bitmap, _) = Bitmap::decode_prefix(reader.remaining())?;
        log::trace!(
            "font {:?} with {} tables",
            String::from_utf8_lossy(&header.tag),
            tables.len()
        );
        Ok(Font { tables, bitmap })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn font_bytes(tables: &[(i16, i16)], palette_included: i32) -> Vec<u8> {
        let mut data = b"SFNT".to_vec();
        data.extend_from_slice(&[0; 16]);
        data.extend_from_slice(&(tables.len() as i32).to_le_bytes());
        data.extend_from_slice(&[0; 16]);
        for &(first, last) in tables {
            data.extend_from_slice(&first.to_le_bytes());
            data.extend_from_slice(&last.to_le_bytes());
            for code in first..=last {
                data.extend_from_slice(&(i32::from(code) * 10).to_le_bytes());
                data.extend_from_slice(&8i32.to_le_bytes());
            }
        }

        let mut bitmap = b"BM ".to_vec();
        bitmap.push(0x1E);
        for field in [0i32, 0, palette_included, 1, 0, 0, 0, 0, 8] {
            bitmap.extend_from_slice(&field.to_le_bytes());
        }
        bitmap.resize(128, 0);
        bitmap.extend_from_slice(&2i32.to_le_bytes());
        bitmap.extend_from_slice(&1i32.to_le_bytes());
        bitmap.extend_from_slice(&[5, 6]);
        if palette_included == bm::PALETTE_INCLUDED {
            bitmap.extend_from_slice(&[1; 768]);
        }

        data.extend(bitmap);
        data
    }

    #[test]
    fn decodes_tables_and_trailing_bitmap() {
        let font = Font::decode(&font_bytes(&[(32, 34), (65, 65)], 0), &()).unwrap();
        assert_eq!(2, font.tables.len());
        assert_eq!(3, font.tables[0].chars.len());
        assert_eq!(1, font.tables[1].chars.len());
        assert_eq!(Some(&CharDef { x_offset: 330, width: 8 }), font.glyph('!'));
        assert_eq!(Some(&CharDef { x_offset: 650, width: 8 }), font.glyph('A'));
        assert_eq!(None, font.glyph('B'));
        assert_eq!(vec![5, 6], font.bitmap.first_image().unwrap().data);
        assert!(font.bitmap.palette.is_none());
    }

    #[test]
    fn fill_palette_keeps_embedded_palette() {
        let mut font = Font::decode(&font_bytes(&[(65, 66)], bm::PALETTE_INCLUDED), &()).unwrap();
        let embedded = font.bitmap.palette.clone().unwrap();
        font.fill_palette(Arc::new(Palette::default()));
        assert!(Arc::ptr_eq(&embedded, font.bitmap.palette.as_ref().unwrap()));

        let mut font = Font::decode(&font_bytes(&[(65, 66)], 0), &()).unwrap();
        let fallback = Arc::new(Palette::default());
        font.fill_palette(Arc::clone(&fallback));
        assert!(Arc::ptr_eq(&fallback, font.bitmap.palette.as_ref().unwrap()));
    }

    #[test]
    fn inverted_range_is_unsupported() {
        assert!(matches!(
            Font::decode(&font_bytes(&[(66, 65)], 0), &()),
            Err(DecodeError::Unsupported { .. })
        ));
    }

    #[test]
    fn negative_ranges_do_not_overflow() {
        let font = Font::decode(&font_bytes(&[(i16::MIN, i16::MIN + 1)], 0), &()).unwrap();
        let table = &font.tables[0];
        assert_eq!(Some(&CharDef { x_offset: -327670, width: 8 }), table.get(i16::MIN + 1));
        assert_eq!(None, table.get(100));
        assert_eq!(None, table.get(i16::MAX));
        assert_eq!(None, font.glyph('d'));
    }

    #[test]
    fn truncated_tables_are_an_error() {
        let data = font_bytes(&[(32, 126)], 0);
        assert!(matches!(
            Font::decode(&data[..100], &()),
            Err(DecodeError::BufferTooShort { field: "character definition", .. })
        ));
    }
}

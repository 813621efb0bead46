use std::io::Cursor;

use binrw::{BinRead, Endian};

use crate::{DecodeError, Format};

/// A fixed-width little-endian record.
///
/// `SIZE` must equal the number of bytes the `BinRead` implementation consumes.
pub trait Record: for<'a> BinRead<Args<'a> = ()> {
    const SIZE: usize;
}

/// Decodes one record at `cursor`, returning it with the number of bytes consumed.
///
/// Only the record's own `SIZE` bytes are ever handed to the reader.
pub fn decode_record<R: Record>(
    data: &[u8],
    cursor: usize,
    format: Format,
    field: &'static str,
) -> Result<(R, usize), DecodeError> {
    let available = data.len().saturating_sub(cursor);
    if available < R::SIZE {
        return Err(DecodeError::BufferTooShort {
            format,
            field,
            offset: cursor,
            needed: R::SIZE,
            available,
        });
    }

    let mut reader = Cursor::new(&data[cursor..cursor + R::SIZE]);
    let record = R::read_options(&mut reader, Endian::Little, ())
        .map_err(|source| DecodeError::Binary { format, field, source })?;
    Ok((record, R::SIZE))
}

/// Sequential reader over a byte buffer for length-driven payloads.
#[derive(Debug, Clone)]
pub struct RecordReader<'a> {
    data: &'a [u8],
    cursor: usize,
    format: Format,
}

impl<'a> RecordReader<'a> {
    pub fn new(data: &'a [u8], format: Format) -> Self {
        Self { data, cursor: 0, format }
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.cursor..]
    }

    pub fn read<R: Record>(&mut self, field: &'static str) -> Result<R, DecodeError> {
        let (record, size) = decode_record(self.data, self.cursor, self.format, field)?;
        self.cursor += size;
        Ok(record)
    }

    pub fn skip_records<R: Record>(
        &mut self,
        count: usize,
        field: &'static str,
    ) -> Result<(), DecodeError> {
        let length = count.checked_mul(R::SIZE).ok_or(DecodeError::Unsupported {
            format: self.format,
            field,
            value: count as i64,
        })?;
        self.take(length, field).map(|_| ())
    }

    pub fn take(&mut self, length: usize, field: &'static str) -> Result<&'a [u8], DecodeError> {
        let available = self.data.len() - self.cursor;
        if available < length {
            return Err(DecodeError::BufferTooShort {
                format: self.format,
                field,
                offset: self.cursor,
                needed: length,
                available,
            });
        }
        let bytes = &self.data[self.cursor..self.cursor + length];
        self.cursor += length;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use binrw::binread;

    use super::*;

    #[binread]
    #[derive(Debug, PartialEq)]
    #[br(little)]
    struct Pair {
        first: i32,
        second: [u8; 2],
        third: i16,
    }

    impl Record for Pair {
        const SIZE: usize = 8;
    }

    #[test]
    fn decodes_little_endian_record() {
        let data = [0xFE, 0xFF, 0xFF, 0xFF, b'a', b'b', 0x02, 0x01, 0xAA];
        let (pair, size) = decode_record::<Pair>(&data, 0, Format::Bitmap, "pair").unwrap();
        assert_eq!(8, size);
        assert_eq!(
            Pair {
                first: -2,
                second: *b"ab",
                third: 0x0102
            },
            pair
        );
    }

    #[test]
    fn short_buffer_is_an_error() {
        let data = [0u8; 11];
        match decode_record::<Pair>(&data, 4, Format::Bitmap, "pair") {
            Err(DecodeError::BufferTooShort {
                offset,
                needed,
                available,
                ..
            }) => {
                assert_eq!(4, offset);
                assert_eq!(8, needed);
                assert_eq!(7, available);
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert!(decode_record::<Pair>(&data, 20, Format::Bitmap, "pair").is_err());
    }

    #[test]
    fn reader_tracks_position() {
        let data = [1, 0, 0, 0, 0, 0, 0, 0, 9, 8, 7];
        let mut reader = RecordReader::new(&data, Format::Material);
        let pair: Pair = reader.read("pair").unwrap();
        assert_eq!(1, pair.first);
        assert_eq!(8, reader.position());
        assert_eq!(&[9, 8], reader.take(2, "bytes").unwrap());
        assert!(reader.take(2, "bytes").is_err());
        assert_eq!(&[7], reader.remaining());
    }
}

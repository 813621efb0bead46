use std::{fmt, sync::Arc};

use binrw::binread;
use serde::Serialize;

use cmp::Palette;
use common::{Decode, DecodeError, Format, Record, RecordReader};

/// `palette_included` value announcing a trailing palette.
pub const PALETTE_INCLUDED: i32 = 2;

#[binread]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[br(little)]
pub struct Header {
    pub tag: [u8; 3],
    pub version: u8,
    pub unknown1: i32,
    pub unknown2: i32,
    pub palette_included: i32,
    pub image_count: i32,
    pub x_offset: i32,
    pub y_offset: i32,
    pub transparent: i32,
    pub unknown3: i32,
    pub bits_per_pixel: i32,
    pub blue_bits: i32,
    pub green_bits: i32,
    pub red_bits: i32,
    #[br(pad_after = 52)]
    pub unknown4: [i32; 6],
}

impl Record for Header {
    const SIZE: usize = 128;
}

impl Header {
    /// Bytes per pixel: 1 for 8-bit images, 2 for anything else.
    pub fn pixel_size(&self) -> usize {
        if self.bits_per_pixel == 8 {
            1
        } else {
            2
        }
    }
}

#[binread]
#[br(little)]
struct ImageSize {
    width: i32,
    height: i32,
}

impl Record for ImageSize {
    const SIZE: usize = 8;
}

#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("data_size", &self.data.len())
            .finish()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Bitmap {
    pub header: Header,
    /// One slot per declared image; images with a negative dimension stay `None`.
    pub images: Vec<Option<Image>>,
    #[serde(skip)]
    pub palette: Option<Arc<Palette>>,
}

impl Bitmap {
    pub fn has_embedded_palette(&self) -> bool {
        self.header.palette_included == PALETTE_INCLUDED
    }

    pub fn first_image(&self) -> Option<&Image> {
        self.images.iter().flatten().next()
    }

    /// Decodes a bitmap from the start of `data`, returning it with the bytes consumed.
    pub fn decode_prefix(data: &[u8]) -> Result<(Bitmap, usize), DecodeError> {
        let mut reader = RecordReader::new(data, Format::Bitmap);
        let header: Header = reader.read("header")?;
        let image_count = usize::try_from(header.image_count).map_err(|_| DecodeError::Unsupported {
            format: Format::Bitmap,
            field: "image count",
            value: header.image_count.into(),
        })?;

        let mut images = Vec::with_capacity(image_count.min(data.len() / ImageSize::SIZE));
        for index in 0..image_count {
            let size: ImageSize = reader.read("image size")?;
            let (width, height) = match (u32::try_from(size.width), u32::try_from(size.height)) {
                (Ok(width), Ok(height)) => (width, height),
                _ => {
                    log::trace!("skipping image {} sized {}x{}", index, size.width, size.height);
                    images.push(None);
                    continue;
                }
            };

            let length = (width as usize)
                .checked_mul(height as usize)
                .and_then(|pixels| pixels.checked_mul(header.pixel_size()))
                .ok_or(DecodeError::Unsupported {
                    format: Format::Bitmap,
                    field: "image size",
                    value: i64::from(width) * i64::from(height),
                })?;
            let data = reader.take(length, "image pixels")?.to_vec();
            images.push(Some(Image { width, height, data }));
        }

        let palette = if header.palette_included == PALETTE_INCLUDED {
            Some(Arc::new(reader.read::<Palette>("palette")?))
        } else {
            None
        };

        log::trace!(
            "bitmap with {} images at {} bits, embedded palette: {}",
            images.len(),
            header.bits_per_pixel,
            palette.is_some()
        );
        Ok((
            Bitmap {
                header,
                images,
                palette,
            },
            reader.position(),
        ))
    }
}

impl Decode for Bitmap {
    fn decode(data: &[u8], _ctx: &()) -> Result<Self, DecodeError> {
        Self::decode_prefix(data).map(|(bitmap, _)| bitmap)
    }
}

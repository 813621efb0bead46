use std::{fmt, sync::Arc};

use binrw::binread;
use serde::Serialize;

use common::{Decode, DecodeError, Format, Record, RecordReader};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub enum MaterialKind {
    /// A single palette index stored as four little-endian bytes, 1x1.
    #[default]
    FlatColor,
    /// Palette indexed pixels of the first (full size) mipmap.
    Textured,
}

#[binread]
#[derive(Debug)]
#[br(little)]
pub struct Header {
    pub tag: [u8; 4],
    pub version: i32,
    pub kind: i32,
    pub texture_count: i32,
    pub texture_count_dup: i32,
    pub unknown: [i32; 2],
    pub reserved: [i32; 12],
}

impl Record for Header {
    const SIZE: usize = 76;
}

// Per texture sub-header. Only its size matters; every field is skipped.
#[binread]
#[br(little)]
struct TextureHeader {
    _kind: i32,
    _color: i32,
    _unknown: [i32; 8],
}

impl Record for TextureHeader {
    const SIZE: usize = 40;
}

#[binread]
#[br(little)]
struct ColorHeader {
    _kind: i32,
    color: i32,
    _unknown: [i32; 4],
}

impl Record for ColorHeader {
    const SIZE: usize = 24;
}

#[binread]
#[br(little)]
struct TextureData {
    width: i32,
    height: i32,
    #[br(pad_before = 12)]
    mipmaps: i32,
}

impl Record for TextureData {
    const SIZE: usize = 24;
}

#[derive(Clone, PartialEq, Serialize)]
pub struct Material {
    pub kind: MaterialKind,
    #[serde(skip)]
    pub texture: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    pub mipmaps: i32,
    /// Tiling factors are chosen by whoever places the material, never by the decoder.
    pub x_tile: f32,
    pub y_tile: f32,
    pub transparent: bool,
}

impl Material {
    pub fn is_flat_color(&self) -> bool {
        self.kind == MaterialKind::FlatColor
    }

    /// The palette index of a flat color material.
    pub fn color_index(&self) -> Option<u32> {
        match (self.kind, self.texture.as_ref()) {
            (MaterialKind::FlatColor, &[a, b, c, d]) => Some(u32::from_le_bytes([a, b, c, d])),
            _ => None,
        }
    }

    /// A copy sharing this material's pixels with new tiling factors.
    pub fn with_tiling(&self, x_tile: f32, y_tile: f32) -> Material {
        Material {
            x_tile,
            y_tile,
            ..self.clone()
        }
    }
}

impl Default for Material {
    fn default() -> Self {
        Self {
            kind: MaterialKind::default(),
            texture: Arc::from(Vec::new()),
            width: 0,
            height: 0,
            mipmaps: 0,
            x_tile: 0.0,
            y_tile: 0.0,
            transparent: false,
        }
    }
}

impl fmt::Debug for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Material")
            .field("kind", &self.kind)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("x_tile", &self.x_tile)
            .field("y_tile", &self.y_tile)
            .field("transparent", &self.transparent)
            .field("texture_size", &self.texture.len())
            .finish()
    }
}

fn dimension(value: i32, field: &'static str) -> Result<u32, DecodeError> {
    u32::try_from(value).map_err(|_| DecodeError::Unsupported {
        format: Format::Material,
        field,
        value: value.into(),
    })
}

impl Decode for Material {
    fn decode(data: &[u8], _ctx: &()) -> Result<Self, DecodeError> {
        let mut reader = RecordReader::new(data, Format::Material);
        let header: Header = reader.read("header")?;

        match header.kind {
            0 => {
                let color: ColorHeader = reader.read("color header")?;
                Ok(Material {
                    kind: MaterialKind::FlatColor,
                    texture: Arc::from(color.color.to_le_bytes().to_vec()),
                    width: 1,
                    height: 1,
                    ..Material::default()
                })
            }
            2 => {
                let texture_count =
                    usize::try_from(header.texture_count).map_err(|_| DecodeError::Unsupported {
                        format: Format::Material,
                        field: "texture count",
                        value: header.texture_count.into(),
                    })?;
                reader.skip_records::<TextureHeader>(texture_count, "texture header")?;
                let texture_data: TextureData = reader.read("texture data header")?;
                let width = dimension(texture_data.width, "texture width")?;
                let height = dimension(texture_data.height, "texture height")?;

                let pixel_count = (width as usize)
                    .checked_mul(height as usize)
                    .ok_or(DecodeError::Unsupported {
                        format: Format::Material,
                        field: "texture size",
                        value: i64::from(width) * i64::from(height),
                    })?;
                let pixels = reader.take(pixel_count, "texture pixels")?;
                let transparent = pixels.contains(&0);
                log::trace!(
                    "material {}x{} with {} textures, transparent: {}",
                    width,
                    height,
                    header.texture_count,
                    transparent
                );

                Ok(Material {
                    kind: MaterialKind::Textured,
                    texture: Arc::from(pixels),
                    width,
                    height,
                    mipmaps: texture_data.mipmaps,
                    transparent,
                    ..Material::default()
                })
            }
            kind => Err(DecodeError::Unsupported {
                format: Format::Material,
                field: "material type",
                value: kind.into(),
            }),
        }
    }
}

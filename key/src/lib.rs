use serde::Serialize;

use common::{lines, lines::parse_int, Decode, DecodeError, Format, LineParser, Vec3};

const FORMAT: Format = Format::Keyframe;

/// Header flag values seen in shipped keyframes.
pub mod flags {
    pub const LOOP: u32 = 0x00;
    pub const HOLD_LAST_FRAME_UNTIL_EVENT: u32 = 0x14;
    pub const STOP_AFTER_LAST_FRAME: u32 = 0x2c;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Playback {
    Loop,
    HoldLastFrameUntilEvent,
    StopAfterLastFrame,
    Other(u32),
}

impl From<u32> for Playback {
    fn from(value: u32) -> Self {
        match value {
            flags::LOOP => Playback::Loop,
            flags::HOLD_LAST_FRAME_UNTIL_EVENT => Playback::HoldLastFrameUntilEvent,
            flags::STOP_AFTER_LAST_FRAME => Playback::StopAfterLastFrame,
            other => Playback::Other(other),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Entry {
    pub frame: i32,
    pub flags: u32,
    pub offset: Vec3,
    /// Pitch, yaw and roll.
    pub orientation: Vec3,
    pub delta_offset: Vec3,
    pub delta_orientation: Vec3,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Node {
    pub mesh_name: String,
    pub entries: Vec<Entry>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Keyframe {
    pub flags: u32,
    pub kind: u32,
    pub frames: i32,
    pub fps: f32,
    pub joints: i32,
    pub nodes: Vec<Node>,
}

impl Keyframe {
    pub fn playback(&self) -> Playback {
        self.flags.into()
    }

    pub fn duration_secs(&self) -> f32 {
        if self.fps > 0.0 {
            self.frames as f32 / self.fps
        } else {
            0.0
        }
    }

    pub fn node(&self, mesh_name: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.mesh_name.eq_ignore_ascii_case(mesh_name))
    }
}

fn expect_int(parser: &mut LineParser<'_>, keyword: &'static str) -> Result<i64, DecodeError> {
    let value = parser.expect_keyword(keyword)?;
    let token = value.split_whitespace().next().unwrap_or(value);
    parse_int(token).ok_or_else(|| DecodeError::InvalidField {
        format: FORMAT,
        line: parser.current().map_or(0, |line| line.number),
        field: keyword,
        value: value.to_string(),
    })
}

fn narrow<T: TryFrom<i64>>(value: i64, field: &'static str) -> Result<T, DecodeError> {
    T::try_from(value).map_err(|_| DecodeError::Unsupported {
        format: FORMAT,
        field,
        value,
    })
}

fn parse_header(parser: &mut LineParser<'_>, keyframe: &mut Keyframe) -> Result<(), DecodeError> {
    keyframe.flags = narrow(expect_int(parser, "flags")?, "flags")?;
    keyframe.kind = narrow(expect_int(parser, "type")?, "type")?;
    keyframe.frames = narrow(expect_int(parser, "frames")?, "frames")?;
    keyframe.fps = parser.expect_value("fps")?;
    keyframe.joints = narrow(expect_int(parser, "joints")?, "joints")?;
    Ok(())
}

fn parse_nodes(parser: &mut LineParser<'_>) -> Result<Vec<Node>, DecodeError> {
    let count = parser.expect_count("nodes")?;
    let mut nodes = Vec::new();
    for _ in 0..count {
        parser.expect_keyword("node")?;
        let mesh_name = parser.expect_keyword("mesh name")?.to_string();
        let entry_count = parser.expect_count("entries")?;

        let mut entries = Vec::new();
        for _ in 0..entry_count {
            let fields = parser.expect_line("keyframe entry")?.fields(FORMAT);
            fields.require(9, "keyframe entry")?;
            let deltas = parser.expect_line("keyframe entry deltas")?.fields(FORMAT);
            deltas.require(6, "keyframe entry deltas")?;

            entries.push(Entry {
                frame: fields.int(1, "frame")?,
                flags: fields.flags(2, "entry flags")?,
                offset: fields.vec3(3, "offset")?,
                orientation: fields.vec3(6, "orientation")?,
                delta_offset: deltas.vec3(0, "delta offset")?,
                delta_orientation: deltas.vec3(3, "delta orientation")?,
            });
        }
        nodes.push(Node { mesh_name, entries });
    }
    Ok(nodes)
}

impl Decode for Keyframe {
    fn decode(data: &[u8], _ctx: &()) -> Result<Self, DecodeError> {
        let text = common::text(data);
        let lines = lines::lines(&text);
        let mut parser = LineParser::new(&lines, FORMAT);
        let mut keyframe = Keyframe::default();

        while let Some(section) = parser.advance_to_next_section() {
            match section {
                "header" => parse_header(&mut parser, &mut keyframe)?,
                "markers" => {
                    // Marker times and types are not used; they are only stepped over.
                    let count = parser.expect_count("markers")?;
                    let skipped = parser.process_declared_count(count, |_| Ok(()))?;
                    log::trace!("skipped {} keyframe markers", skipped);
                }
                "keyframe nodes" => keyframe.nodes = parse_nodes(&mut parser)?,
                other => log::trace!("skipping key section {:?}", other),
            }
        }

        Ok(keyframe)
    }
}

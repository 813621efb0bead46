use serde::Serialize;

use common::{lines, lines::parse_int, Decode, DecodeError, Fields, Format, Line, LineParser};

const FORMAT: Format = Format::Puppet;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SubMode {
    pub name: String,
    pub keyframe: String,
    pub flags: u32,
    pub lo_priority: i32,
    pub hi_priority: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Mode {
    pub number: i32,
    /// Index of the mode this one extends; `-1` when the line has no `basedon=`.
    /// Whether a mode inherits at all is tracked by `inherited`, not by this value.
    pub based_on: i32,
    /// Set when the mode line carries a `basedon=` value, even `-1`.
    pub inherited: bool,
    pub submodes: Vec<SubMode>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Joint {
    pub joint: i32,
    /// Hierarchy node of the model the joint drives.
    pub node: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Puppet {
    pub modes: Vec<Mode>,
    pub joints: Vec<Joint>,
}

impl Puppet {
    /// Sub-modes of `mode` followed by those inherited along its `based_on` chain.
    pub fn submodes(&self, mode: usize) -> Vec<&SubMode> {
        let mut submodes = Vec::new();
        let mut current = self.modes.get(mode);
        let mut visited = 0;
        while let Some(mode) = current {
            submodes.extend(&mode.submodes);
            visited += 1;
            if mode.based_on < 0 || visited > self.modes.len() {
                break;
            }
            current = self.modes.get(mode.based_on as usize);
        }
        submodes
    }

    /// The sub-mode called `name` in `mode` or anything it inherits from.
    pub fn find_submode(&self, mode: usize, name: &str) -> Option<&SubMode> {
        self.submodes(mode).into_iter().find(|submode| submode.name.eq_ignore_ascii_case(name))
    }

    pub fn node_for_joint(&self, joint: i32) -> Option<i32> {
        self.joints.iter().find(|entry| entry.joint == joint).map(|entry| entry.node)
    }
}

fn int_value(fields: &Fields<'_>, value: &str, field: &'static str) -> Result<i32, DecodeError> {
    parse_int(value)
        .and_then(|value| i32::try_from(value).ok())
        .ok_or_else(|| fields.invalid(field, value))
}

fn parse_mode(line: &Line) -> Result<Mode, DecodeError> {
    let fields = line.fields(FORMAT);
    let mut mode = Mode {
        based_on: -1,
        ..Mode::default()
    };
    for token in fields.tokens() {
        match token.split_once('=') {
            Some(("mode", value)) => mode.number = int_value(&fields, value, "mode")?,
            Some(("basedon", value)) => {
                mode.based_on = int_value(&fields, value, "basedon")?;
                mode.inherited = true;
            }
            _ => {}
        }
    }
    Ok(mode)
}

fn parse_submode(line: &Line) -> Result<SubMode, DecodeError> {
    let fields = line.fields(FORMAT);
    fields.require(5, "submode")?;
    Ok(SubMode {
        name: fields.str(0, "submode name")?.to_string(),
        keyframe: fields.str(1, "submode keyframe")?.to_string(),
        flags: fields.flags(2, "submode flags")?,
        lo_priority: fields.int(3, "submode low priority")?,
        hi_priority: fields.int(4, "submode high priority")?,
    })
}

fn parse_joints(parser: &mut LineParser<'_>, joints: &mut Vec<Joint>) -> Result<(), DecodeError> {
    loop {
        let line = parser.expect_line("end")?;
        if line.is_end() {
            return Ok(());
        }
        let (joint, node) = line.assignment().ok_or_else(|| parser.unexpected(line, "joint=node"))?;
        let fields = line.fields(FORMAT);
        joints.push(Joint {
            joint: int_value(&fields, joint.trim(), "joint")?,
            node: int_value(&fields, node, "joint node")?,
        });
    }
}

impl Decode for Puppet {
    fn decode(data: &[u8], _ctx: &()) -> Result<Self, DecodeError> {
        let text = common::text(data);
        let lines = lines::lines(&text);
        let mut parser = LineParser::new(&lines, FORMAT);
        let mut puppet = Puppet::default();

        while let Some(line) = parser.next_line() {
            if line.text.starts_with("mode=") {
                puppet.modes.push(parse_mode(line)?);
            } else if line.text == "joints" {
                parse_joints(&mut parser, &mut puppet.joints)?;
            } else {
                let submode = parse_submode(line)?;
                match puppet.modes.last_mut() {
                    Some(mode) => mode.submodes.push(submode),
                    None => return Err(parser.unexpected(line, "mode=")),
                }
            }
        }

        for mode in &puppet.modes {
            DecodeError::check_optional_index(
                FORMAT,
                "basedon",
                mode.based_on,
                puppet.modes.len(),
            )?;
        }
        log::trace!(
            "puppet with {} modes and {} joints",
            puppet.modes.len(),
            puppet.joints.len()
        );
        Ok(puppet)
    }
}

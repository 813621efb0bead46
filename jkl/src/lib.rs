//! JKL level decoder.
//!
//! Only the sections needed to draw a level are interpreted: materials, the world
//! geometry, models, templates and things. Everything else is skipped.

use std::{collections::BTreeMap, sync::Arc};

use serde::Serialize;

use cmp::ColorMap;
use common::{lines, BoxError, Decode, DecodeError, Fields, Format, Line, LineParser, Vec3};
use jk3do::{resource_error, Face, Mesh, Model, ModelResources, NoResources};
use mat::Material;

const FORMAT: Format = Format::Level;

/// Assets a level refers to by name, on top of those its models need.
pub trait LevelResources: ModelResources {
    fn model(&self, name: &str) -> Result<Arc<Model>, BoxError>;
}

impl LevelResources for NoResources {
    fn model(&self, _name: &str) -> Result<Arc<Model>, BoxError> {
        Ok(Arc::default())
    }
}

/// Level specific attributes of a world surface; the rest lives in the level mesh's face.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SurfaceAttributes {
    pub surface_flags: u32,
    /// Index of the adjoin this surface opens onto, or `-1`.
    pub adjoin: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Template {
    pub name: String,
    pub base: String,
    pub model: String,
    pub size: f32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Thing {
    pub template: String,
    pub name: String,
    pub position: Vec3,
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
    pub sector: Option<i32>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Level {
    /// World materials with the tiling given by the level.
    pub materials: Vec<Material>,
    pub color_maps: Vec<Arc<ColorMap>>,
    /// World geometry; one face per surface.
    pub mesh: Mesh,
    /// Parallel to `mesh.faces`.
    pub surfaces: Vec<SurfaceAttributes>,
    pub models: BTreeMap<String, Arc<Model>>,
    /// Only templates that name a model.
    pub templates: BTreeMap<String, Template>,
    pub things: Vec<Thing>,
}

impl Level {
    /// Position of each surface's first corner in a buffer holding every surface's
    /// corners in order, drawable or not.
    pub fn surface_vertex_offsets(&self) -> Vec<usize> {
        self.mesh
            .faces
            .iter()
            .scan(0, |offset, face| {
                let start = *offset;
                *offset += face.vertex_ids.len();
                Some(start)
            })
            .collect()
    }

    /// The model and scale a thing is drawn with, if its template names one.
    pub fn thing_model(&self, thing: &Thing) -> Option<(&Arc<Model>, f32)> {
        let template = self.templates.get(&thing.template)?;
        let model = self.models.get(&template.model)?;
        Some((model, template.size))
    }
}

impl<R: LevelResources + ?Sized> Decode<R> for Level {
    fn decode(data: &[u8], resources: &R) -> Result<Self, DecodeError> {
        let text = common::text(data);
        let lines = lines::lines(&text);
        let mut parser = LineParser::new(&lines, FORMAT);
        let mut level = Level {
            mesh: Mesh {
                name: "world".to_string(),
                ..Mesh::default()
            },
            ..Level::default()
        };

        while let Some(section) = parser.advance_to_next_section() {
            match section {
                "materials" => parse_materials(&mut parser, &mut level, resources)?,
                "georesource" => parse_georesource(&mut parser, &mut level, resources)?,
                "models" => parse_models(&mut parser, &mut level, resources)?,
                "templates" => parse_templates(&mut parser, &mut level)?,
                "things" => parse_things(&mut parser, &mut level)?,
                other => log::trace!("skipping jkl section {:?}", other),
            }
        }

        log::trace!(
            "level with {} surfaces, {} models, {} templates, {} things",
            level.mesh.faces.len(),
            level.models.len(),
            level.templates.len(),
            level.things.len()
        );
        Ok(level)
    }
}

/// Runs `per_line` over the list announced by each `keyword N` line of the section.
fn for_each_declared<'a, F>(
    parser: &mut LineParser<'a>,
    keyword: &str,
    mut per_line: F,
) -> Result<(), DecodeError>
where
    F: FnMut(&'a Line) -> Result<(), DecodeError>,
{
    while let Some(line) = parser.next_in_section() {
        if let Some(count) = line.declared_count(keyword, FORMAT) {
            parser.process_declared_count(count?, &mut per_line)?;
        }
    }
    Ok(())
}

fn parse_materials<R: LevelResources + ?Sized>(
    parser: &mut LineParser<'_>,
    level: &mut Level,
    resources: &R,
) -> Result<(), DecodeError> {
    for_each_declared(parser, "world materials", |line| {
        let fields = line.fields(FORMAT);
        fields.require(4, "world material")?;
        let name = fields.str(1, "material name")?;
        let material = resources.material(name).map_err(resource_error(FORMAT, name))?;
        level
            .materials
            .push(material.with_tiling(fields.float(2, "x tile")?, fields.float(3, "y tile")?));
        Ok(())
    })
}

fn parse_georesource<R: LevelResources + ?Sized>(
    parser: &mut LineParser<'_>,
    level: &mut Level,
    resources: &R,
) -> Result<(), DecodeError> {
    while let Some(line) = parser.next_in_section() {
        if let Some(count) = line.declared_count("world colormaps", FORMAT) {
            parser.process_declared_count(count?, |line| {
                let name = line.fields(FORMAT).str(1, "colormap name")?;
                let color_map = resources.color_map(name).map_err(resource_error(FORMAT, name))?;
                level.color_maps.push(color_map);
                Ok(())
            })?;
        } else if let Some(count) = line.declared_count("world vertices", FORMAT) {
            parser.process_declared_count(count?, |line| {
                level.mesh.vertices.push(line.fields(FORMAT).vec3(1, "world vertex")?);
                Ok(())
            })?;
        } else if let Some(count) = line.declared_count("world texture vertices", FORMAT) {
            parser.process_declared_count(count?, |line| {
                level
                    .mesh
                    .texture_vertices
                    .push(line.fields(FORMAT).vec2(1, "world texture vertex")?);
                Ok(())
            })?;
        } else if let Some(count) = line.declared_count("world surfaces", FORMAT) {
            let count = count?;
            parser.process_declared_count(count, |line| {
                let (face, attributes) = parse_surface(&line.fields(FORMAT))?;
                level.mesh.check_face(FORMAT, &face, level.materials.len())?;
                level.mesh.faces.push(face);
                level.surfaces.push(attributes);
                Ok(())
            })?;

            let surface_count = level.mesh.faces.len();
            level.mesh.face_normals = vec![[0.0; 3]; surface_count];
            parser.process_declared_count(count, |line| {
                let fields = line.fields(FORMAT);
                let id = fields.index("surface normal id")?;
                DecodeError::check_index(FORMAT, "surface normal id", id, surface_count)?;
                level.mesh.face_normals[id as usize] = fields.vec3(1, "surface normal")?;
                Ok(())
            })?;
        }
    }
    Ok(())
}

/// Column of the vertex count in a surface line. `(vertex, texture vertex)` pairs
/// follow it, then one light intensity per vertex.
const SURFACE_VERTEX_COUNT: usize = 9;

fn parse_surface(fields: &Fields<'_>) -> Result<(Face, SurfaceAttributes), DecodeError> {
    fields.require(SURFACE_VERTEX_COUNT + 1, "surface")?;
    let vertex_count = fields.count(SURFACE_VERTEX_COUNT, "surface vertex count")?;
    let pairs_start = SURFACE_VERTEX_COUNT + 1;
    let intensities_start = vertex_count
        .checked_mul(2)
        .and_then(|pairs| pairs.checked_add(pairs_start))
        .ok_or_else(|| fields.invalid("surface vertex count", &vertex_count.to_string()))?;
    fields.require(intensities_start + vertex_count, "surface vertex ids")?;

    let mut face = Face {
        material: fields.int(1, "surface material")?,
        flags: fields.flags(3, "face flags")?,
        geometry_mode: fields.int(4, "surface geometry mode")?,
        lighting_mode: fields.int(5, "surface lighting mode")?,
        texture_mode: fields.int(6, "surface texture mode")?,
        extra_light: fields.float(8, "surface extra light")?,
        ..Face::default()
    };
    for corner in 0..vertex_count {
        let column = pairs_start + corner * 2;
        face.vertex_ids.push(fields.int(column, "vertex id")?);
        face.texture_vertex_ids.push(fields.int(column + 1, "texture vertex id")?);
        face.light_intensities
            .push(fields.float(intensities_start + corner, "light intensity")?);
    }

    let attributes = SurfaceAttributes {
        surface_flags: fields.flags(2, "surface flags")?,
        adjoin: fields.int(7, "surface adjoin")?,
    };
    Ok((face, attributes))
}

fn parse_models<R: LevelResources + ?Sized>(
    parser: &mut LineParser<'_>,
    level: &mut Level,
    resources: &R,
) -> Result<(), DecodeError> {
    for_each_declared(parser, "world models", |line| {
        let name = line.fields(FORMAT).str(1, "model name")?;
        let mut model = resources.model(name).map_err(resource_error(FORMAT, name))?;
        if let Some(color_map) = level.color_maps.first() {
            model = Arc::new(model.with_color_map(Arc::clone(color_map)));
        }
        level.models.insert(name.to_string(), model);
        Ok(())
    })
}

fn parse_templates(parser: &mut LineParser<'_>, level: &mut Level) -> Result<(), DecodeError> {
    for_each_declared(parser, "world templates", |line| {
        let fields = line.fields(FORMAT);
        fields.require(2, "template")?;

        let mut model = None;
        let mut size = 1.0;
        for token in &fields.tokens()[2..] {
            match token.split_once('=') {
                Some(("model3d", value)) => model = Some(value),
                Some(("size", value)) => {
                    size = value
                        .parse()
                        .map_err(|_| fields.invalid("template size", value))?;
                }
                _ => {}
            }
        }

        if let Some(model) = model {
            let name = fields.str(0, "template name")?;
            level.templates.insert(
                name.to_string(),
                Template {
                    name: name.to_string(),
                    base: fields.str(1, "template base")?.to_string(),
                    model: model.to_string(),
                    size,
                },
            );
        }
        Ok(())
    })
}

fn parse_things(parser: &mut LineParser<'_>, level: &mut Level) -> Result<(), DecodeError> {
    for_each_declared(parser, "world things", |line| {
        let fields = line.fields(FORMAT);
        fields.require(9, "thing")?;
        let sector = match fields.get(9) {
            Some(_) => Some(fields.int(9, "thing sector")?),
            None => None,
        };
        level.things.push(Thing {
            template: fields.str(1, "thing template")?.to_string(),
            name: fields.str(2, "thing name")?.to_string(),
            position: fields.vec3(3, "thing position")?,
            pitch: fields.float(6, "thing pitch")?,
            yaw: fields.float(7, "thing yaw")?,
            roll: fields.float(8, "thing roll")?,
            sector,
        });
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEVEL: &str = "SECTION: JK
Version 1
World Gravity 4.00

SECTION: COPYRIGHT
................................
....(c) lucasarts entertainment.

SECTION: MATERIALS
World materials 3
0:\tfloor.mat\t1.0\t1.0
1:\twall.mat\t2.0\t0.5
end

SECTION: GEORESOURCE
World Colormaps 1
0:\tdflt.cmp

World vertices 4
0:\t0.0\t0.0\t0.0
1:\t1.0\t0.0\t0.0
2:\t1.0\t1.0\t0.0
3:\t0.0\t1.0\t0.0

World texture vertices 2
0:\t0.0\t0.0
1:\t1.0\t1.0

World adjoins 1
0:\t0x7\t1\t0.00

World surfaces 3
0:\t0\t0x4\t0x4\t4\t3\t4\t-1\t0.00\t3\t0,0\t1,1\t2,-1\t0.5\t0.6\t0.7
1:\t-1\t0x0\t0x0\t0\t3\t4\t0\t0.00\t3\t0,-1\t2,-1\t3,-1\t1.0\t1.0\t1.0
2:\t1\t0x4\t0x4\t4\t3\t4\t-1\t0.25\t4\t0,0\t1,0\t2,1\t3,1\t0.1\t0.2\t0.3\t0.4
0:\t0.0\t0.0\t1.0
2:\t0.0\t1.0\t0.0
1:\t0.0\t0.0\t-1.0

SECTION: SECTORS
World sectors 1

SECTION: MODELS
World models 1
0:\tkyle.3do

SECTION: TEMPLATES
World templates 3
_actor\tnone\ttype=actor
_walkplayer\t_actor\tmodel3d=kyle.3do\tsize=0.06\tpuppet=ky.pup
_decor\tnone\tmodel3d=crate.3do
end

SECTION: THINGS
World things 5
0: walkplayer walkplayer 0.5 0.5 0.1 0.0 90.0 0.0 0 thingflags=0x0
1: _decor crate1 1.0 2.0 3.0 0.0 0.0 0.0
end
";

    struct Tracker;

    impl ModelResources for Tracker {
        fn material(&self, name: &str) -> Result<Arc<Material>, BoxError> {
            Ok(Arc::new(Material {
                width: name.len() as u32,
                ..Material::default()
            }))
        }

        fn color_map(&self, _name: &str) -> Result<Arc<ColorMap>, BoxError> {
            Ok(Arc::new(ColorMap {
                version: 42,
                ..ColorMap::default()
            }))
        }

        fn default_color_map(&self) -> Result<Arc<ColorMap>, BoxError> {
            Ok(Arc::default())
        }
    }

    impl LevelResources for Tracker {
        fn model(&self, _name: &str) -> Result<Arc<Model>, BoxError> {
            Ok(Arc::new(Model {
                radius: 3.0,
                ..Model::default()
            }))
        }
    }

    fn decode(text: &str) -> Result<Level, DecodeError> {
        Level::decode(text.as_bytes(), &NoResources)
    }

    #[test]
    fn declared_counts_larger_than_content_are_tolerated() {
        let level = decode(LEVEL).unwrap();
        assert_eq!(2, level.materials.len());
        assert_eq!((2.0, 0.5), (level.materials[1].x_tile, level.materials[1].y_tile));
        assert_eq!(2, level.things.len());
    }

    #[test]
    fn decodes_world_geometry() {
        let level = decode(LEVEL).unwrap();
        assert_eq!(1, level.color_maps.len());
        assert_eq!(4, level.mesh.vertices.len());
        assert_eq!(2, level.mesh.texture_vertices.len());
        assert_eq!(3, level.mesh.faces.len());
        assert_eq!(3, level.surfaces.len());

        let first = &level.mesh.faces[0];
        assert_eq!(vec![0, 1, 2], first.vertex_ids);
        assert_eq!(vec![0, 1, -1], first.texture_vertex_ids);
        assert_eq!(vec![0.5, 0.6, 0.7], first.light_intensities);
        assert_eq!(4, first.flags);
        assert_eq!(SurfaceAttributes { surface_flags: 4, adjoin: -1 }, level.surfaces[0]);
        assert_eq!(0, level.surfaces[1].adjoin);
        assert_eq!(0.25, level.mesh.faces[2].extra_light);

        assert_eq!(
            vec![[0.0, 0.0, 1.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]],
            level.mesh.face_normals
        );
    }

    #[test]
    fn undrawable_surfaces_are_kept() {
        let level = decode(LEVEL).unwrap();
        let hidden = &level.mesh.faces[1];
        assert!(!hidden.is_drawable());
        assert_eq!(-1, hidden.material);
        assert_eq!(vec![0, 3, 6], level.surface_vertex_offsets());
    }

    #[test]
    fn surfaces_have_parallel_lists() {
        let level = decode(LEVEL).unwrap();
        for face in &level.mesh.faces {
            assert_eq!(face.vertex_ids.len(), face.texture_vertex_ids.len());
            assert_eq!(face.vertex_ids.len(), face.light_intensities.len());
        }
    }

    #[test]
    fn keeps_walkplayer_thing() {
        let level = decode(LEVEL).unwrap();
        let player = &level.things[0];
        assert_eq!("walkplayer", player.template);
        assert_eq!("walkplayer", player.name);
        assert_eq!([0.5, 0.5, 0.1], player.position);
        assert_eq!(90.0, player.yaw);
        assert_eq!(Some(0), player.sector);
        assert_eq!(None, level.things[1].sector);
    }

    #[test]
    fn only_model_templates_are_kept() {
        let level = decode(LEVEL).unwrap();
        assert_eq!(2, level.templates.len());
        let player = &level.templates["_walkplayer"];
        assert_eq!("kyle.3do", player.model);
        assert_eq!("_actor", player.base);
        assert_eq!(0.06, player.size);
        assert_eq!(1.0, level.templates["_decor"].size);
    }

    #[test]
    fn models_take_level_colormap() {
        let level = Level::decode(LEVEL.as_bytes(), &Tracker).unwrap();
        let model = &level.models["kyle.3do"];
        assert_eq!(3.0, model.radius);
        assert_eq!(42, model.color_map.version);
        assert_eq!(9, level.materials[0].width);

        let thing = Thing {
            template: "_walkplayer".to_string(),
            ..Thing::default()
        };
        let (model, size) = level.thing_model(&thing).unwrap();
        assert_eq!(3.0, model.radius);
        assert_eq!(0.06, size);
    }

    #[test]
    fn short_surface_is_an_error() {
        let text = LEVEL.replace("2,-1\t0.5\t0.6\t0.7", "2,-1\t0.5\t0.6");
        assert!(matches!(
            decode(&text),
            Err(DecodeError::MissingField {
                field: "surface vertex ids",
                ..
            })
        ));
    }

    #[test]
    fn out_of_range_surface_references_are_errors() {
        let text = LEVEL.replace("1,1\t2,-1", "1,1\t4,-1");
        assert!(matches!(
            decode(&text),
            Err(DecodeError::IndexOutOfRange { field: "vertex id", index: 4, .. })
        ));

        let text = LEVEL.replace("2:\t1\t0x4", "2:\t2\t0x4");
        assert!(matches!(
            decode(&text),
            Err(DecodeError::IndexOutOfRange { field: "face material", .. })
        ));

        let text = LEVEL.replace("1:\t0.0\t0.0\t-1.0", "3:\t0.0\t0.0\t-1.0");
        assert!(matches!(
            decode(&text),
            Err(DecodeError::IndexOutOfRange { field: "surface normal id", .. })
        ));
    }

    #[test]
    fn malformed_thing_is_an_error() {
        let text = LEVEL.replace("1.0 2.0 3.0", "1.0 two 3.0");
        assert!(matches!(
            decode(&text),
            Err(DecodeError::InvalidField { field: "thing position", .. })
        ));
    }
}

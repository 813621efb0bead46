//! 3DO model decoder.
//!
//! A model is a material list, one or more geosets (level of detail variants) of
//! meshes, and a hierarchy of nodes that place those meshes. Meshes of a geoset are
//! parsed in parallel from their own slice of lines.

use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;

use cmp::ColorMap;
use common::{lines, BoxError, Decode, DecodeError, Fields, Format, Line, LineParser, Vec2, Vec3};
use mat::Material;

const FORMAT: Format = Format::Model;

/// Assets a model refers to by name.
pub trait ModelResources {
    fn material(&self, name: &str) -> Result<Arc<Material>, BoxError>;

    fn color_map(&self, name: &str) -> Result<Arc<ColorMap>, BoxError>;

    /// The colormap every model starts out with.
    fn default_color_map(&self) -> Result<Arc<ColorMap>, BoxError>;
}

/// Resolves every reference to an empty asset.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoResources;

impl ModelResources for NoResources {
    fn material(&self, _name: &str) -> Result<Arc<Material>, BoxError> {
        Ok(Arc::default())
    }

    fn color_map(&self, _name: &str) -> Result<Arc<ColorMap>, BoxError> {
        Ok(Arc::default())
    }

    fn default_color_map(&self) -> Result<Arc<ColorMap>, BoxError> {
        Ok(Arc::default())
    }
}

/// Wraps a failed resource lookup into a decode error of `format`.
pub fn resource_error(format: Format, name: &str) -> impl FnOnce(BoxError) -> DecodeError + '_ {
    move |source| DecodeError::Resource {
        format,
        name: name.to_string(),
        source,
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Face {
    /// Index into the owner's material list, or `-1` for none.
    pub material: i32,
    pub flags: u32,
    /// `0` marks a face that is not drawn.
    pub geometry_mode: i32,
    /// Carried through as found; its meaning is not known.
    pub lighting_mode: i32,
    pub texture_mode: i32,
    pub extra_light: f32,
    pub vertex_ids: Vec<i32>,
    /// Parallel to `vertex_ids`; `-1` for an untextured corner.
    pub texture_vertex_ids: Vec<i32>,
    /// Parallel to `vertex_ids`.
    pub light_intensities: Vec<f32>,
}

impl Face {
    pub fn is_drawable(&self) -> bool {
        self.geometry_mode != 0
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Mesh {
    pub name: String,
    pub radius: f32,
    pub geometry_mode: i32,
    pub lighting_mode: i32,
    pub texture_mode: i32,
    pub vertices: Vec<Vec3>,
    pub texture_vertices: Vec<Vec2>,
    pub vertex_normals: Vec<Vec3>,
    pub faces: Vec<Face>,
    /// One per face.
    pub face_normals: Vec<Vec3>,
}

impl Mesh {
    /// Checks the references of `face` against this mesh's vertex tables.
    pub fn check_face(
        &self,
        format: Format,
        face: &Face,
        material_count: usize,
    ) -> Result<(), DecodeError> {
        DecodeError::check_optional_index(format, "face material", face.material, material_count)?;
        for (&vertex, &texture_vertex) in face.vertex_ids.iter().zip(&face.texture_vertex_ids) {
            DecodeError::check_index(format, "vertex id", vertex, self.vertices.len())?;
            DecodeError::check_optional_index(
                format,
                "texture vertex id",
                texture_vertex,
                self.texture_vertices.len(),
            )?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Geoset {
    pub meshes: Vec<Mesh>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct HierarchyNode {
    pub flags: u32,
    pub kind: u32,
    /// Mesh of each geoset this node places, or `-1`.
    pub mesh: i32,
    pub parent: i32,
    pub child: i32,
    pub sibling: i32,
    pub child_count: i32,
    pub offset: Vec3,
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
    pub pivot: Vec3,
    pub name: String,
}

impl HierarchyNode {
    pub fn is_root(&self) -> bool {
        self.parent == -1
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Model {
    pub version: String,
    pub radius: f32,
    pub insert_offset: Vec3,
    /// Materials in declaration order, each tiled 1x1.
    pub materials: Vec<Material>,
    pub color_map: Arc<ColorMap>,
    pub geosets: Vec<Geoset>,
    pub hierarchy: Vec<HierarchyNode>,
}

impl Model {
    /// A copy of this model drawn with `color_map`.
    pub fn with_color_map(&self, color_map: Arc<ColorMap>) -> Model {
        Model {
            color_map,
            ..self.clone()
        }
    }

    /// Index of the node named `name`.
    pub fn node(&self, name: &str) -> Option<usize> {
        self.hierarchy.iter().position(|node| node.name.eq_ignore_ascii_case(name))
    }
}

impl<R: ModelResources + ?Sized> Decode<R> for Model {
    fn decode(data: &[u8], resources: &R) -> Result<Self, DecodeError> {
        let text = common::text(data);
        let lines = lines::lines(&text);
        let mut parser = LineParser::new(&lines, FORMAT);

        let mut model = Model {
            color_map: resources
                .default_color_map()
                .map_err(resource_error(FORMAT, "default colormap"))?,
            ..Model::default()
        };

        while let Some(section) = parser.advance_to_next_section() {
            match section {
                "header" => {
                    model.version = parser.expect_keyword("3do")?.to_string();
                }
                "modelresource" => {
                    model.materials = parse_materials(&mut parser, resources)?;
                }
                "geometrydef" => {
                    model.radius = parser.expect_value("radius")?;
                    let line = parser.expect_line("insert offset")?;
                    if line.keyword_value("insert offset").is_none() {
                        return Err(parser.unexpected(line, "insert offset"));
                    }
                    model.insert_offset = line.fields(FORMAT).vec3(2, "insert offset")?;
                    model.geosets = parse_geosets(&mut parser, model.materials.len())?;
                }
                "hierarchydef" => {
                    let mesh_count = model.geosets.first().map_or(0, |geoset| geoset.meshes.len());
                    model.hierarchy = parse_hierarchy(&mut parser, mesh_count)?;
                }
                other => log::trace!("skipping 3do section {:?}", other),
            }
        }

        log::trace!(
            "model with {} materials, {} geosets, {} nodes",
            model.materials.len(),
            model.geosets.len(),
            model.hierarchy.len()
        );
        Ok(model)
    }
}

fn parse_materials<R: ModelResources + ?Sized>(
    parser: &mut LineParser<'_>,
    resources: &R,
) -> Result<Vec<Material>, DecodeError> {
    let count = parser.expect_count("materials")?;
    let mut materials = Vec::new();
    parser.process_declared_count(count, |line| {
        let fields = line.fields(FORMAT);
        let name = fields.str(1, "material name")?;
        let material = resources.material(name).map_err(resource_error(FORMAT, name))?;
        materials.push(material.with_tiling(1.0, 1.0));
        Ok(())
    })?;
    Ok(materials)
}

fn is_mesh_boundary(line: &Line) -> bool {
    line.keyword_value("mesh").is_some()
        || line.keyword_value("geoset").is_some()
        || line.section_marker().is_some()
        || line.is_end()
}

fn parse_geosets(
    parser: &mut LineParser<'_>,
    material_count: usize,
) -> Result<Vec<Geoset>, DecodeError> {
    let count = parser.expect_count("geosets")?;
    let mut geosets = Vec::new();
    for _ in 0..count {
        parser.expect_keyword("geoset")?;
        let mesh_count = parser.expect_count("meshes")?;

        let mut blocks = Vec::new();
        for _ in 0..mesh_count {
            parser.expect_keyword("mesh")?;
            blocks.push(parser.take_block(is_mesh_boundary));
        }

        // Each block is self-contained, so the meshes of one geoset decode in parallel
        // and the geoset is complete once all of them are.
        let meshes = blocks
            .par_iter()
            .map(|block| parse_mesh(block, material_count))
            .collect::<Result<Vec<_>, _>>()?;
        geosets.push(Geoset { meshes });
    }
    Ok(geosets)
}

fn parse_mesh(block: &[Line], material_count: usize) -> Result<Mesh, DecodeError> {
    let mut parser = LineParser::new(block, FORMAT);
    let mut mesh = Mesh {
        name: parser.expect_keyword("name")?.to_string(),
        radius: parser.expect_value("radius")?,
        geometry_mode: parser.expect_value("geometrymode")?,
        lighting_mode: parser.expect_value("lightingmode")?,
        texture_mode: parser.expect_value("texturemode")?,
        ..Mesh::default()
    };

    let vertex_count = parser.expect_count("vertices")?;
    for _ in 0..vertex_count {
        let line = parser.expect_line("vertex")?;
        mesh.vertices.push(line.fields(FORMAT).vec3(1, "vertex")?);
    }

    let texture_vertex_count = parser.expect_count("texture vertices")?;
    for _ in 0..texture_vertex_count {
        let line = parser.expect_line("texture vertex")?;
        mesh.texture_vertices.push(line.fields(FORMAT).vec2(1, "texture vertex")?);
    }

    parser.expect_exact("vertex normals")?;
    for _ in 0..vertex_count {
        let line = parser.expect_line("vertex normal")?;
        mesh.vertex_normals.push(line.fields(FORMAT).vec3(1, "vertex normal")?);
    }

    let face_count = parser.expect_count("faces")?;
    for _ in 0..face_count {
        let line = parser.expect_line("face")?;
        let face = parse_face(&line.fields(FORMAT))?;
        mesh.check_face(FORMAT, &face, material_count)?;
        mesh.faces.push(face);
    }

    parser.expect_exact("face normals")?;
    mesh.face_normals = vec![[0.0; 3]; face_count];
    for _ in 0..face_count {
        let fields = parser.expect_line("face normal")?.fields(FORMAT);
        let id = fields.index("face normal id")?;
        DecodeError::check_index(FORMAT, "face normal id", id, face_count)?;
        mesh.face_normals[id as usize] = fields.vec3(1, "face normal")?;
    }

    Ok(mesh)
}

/// Column of the vertex count in a face line; `(vertex, texture vertex)` pairs follow it.
const FACE_VERTEX_COUNT: usize = 7;

fn parse_face(fields: &Fields<'_>) -> Result<Face, DecodeError> {
    fields.require(FACE_VERTEX_COUNT + 1, "face")?;
    let vertex_count = fields.count(FACE_VERTEX_COUNT, "face vertex count")?;
    let pairs_end = vertex_count
        .checked_mul(2)
        .and_then(|pairs| pairs.checked_add(FACE_VERTEX_COUNT + 1))
        .ok_or_else(|| fields.invalid("face vertex count", &vertex_count.to_string()))?;
    fields.require(pairs_end, "face vertex ids")?;

    let mut face = Face {
        material: fields.int(1, "face material")?,
        flags: fields.flags(2, "face type")?,
        geometry_mode: fields.int(3, "face geometry mode")?,
        lighting_mode: fields.int(4, "face lighting mode")?,
        texture_mode: fields.int(5, "face texture mode")?,
        extra_light: fields.float(6, "face extra light")?,
        vertex_ids: Vec::with_capacity(vertex_count),
        texture_vertex_ids: Vec::with_capacity(vertex_count),
        light_intensities: Vec::with_capacity(vertex_count),
    };
    for column in (FACE_VERTEX_COUNT + 1..pairs_end).step_by(2) {
        face.vertex_ids.push(fields.int(column, "vertex id")?);
        face.texture_vertex_ids.push(fields.int(column + 1, "texture vertex id")?);
        face.light_intensities.push(1.0);
    }
    Ok(face)
}

fn parse_hierarchy(
    parser: &mut LineParser<'_>,
    mesh_count: usize,
) -> Result<Vec<HierarchyNode>, DecodeError> {
    let count = parser.expect_count("hierarchy nodes")?;
    let mut nodes = Vec::new();
    parser.process_declared_count(count, |line| {
        let fields = line.fields(FORMAT);
        fields.require(18, "hierarchy node")?;
        nodes.push(HierarchyNode {
            flags: fields.flags(1, "node flags")?,
            kind: fields.flags(2, "node type")?,
            mesh: fields.int(3, "node mesh")?,
            parent: fields.int(4, "node parent")?,
            child: fields.int(5, "node child")?,
            sibling: fields.int(6, "node sibling")?,
            child_count: fields.int(7, "node child count")?,
            offset: fields.vec3(8, "node offset")?,
            pitch: fields.float(11, "node pitch")?,
            yaw: fields.float(12, "node yaw")?,
            roll: fields.float(13, "node roll")?,
            pivot: fields.vec3(14, "node pivot")?,
            name: fields.str(17, "node name")?.to_string(),
        });
        Ok(())
    })?;

    check_hierarchy(&nodes, mesh_count)?;
    Ok(nodes)
}

/// Every link must be `-1` or in range, and every parent chain must reach a root.
fn check_hierarchy(nodes: &[HierarchyNode], mesh_count: usize) -> Result<(), DecodeError> {
    for node in nodes {
        DecodeError::check_optional_index(FORMAT, "node mesh", node.mesh, mesh_count)?;
        DecodeError::check_optional_index(FORMAT, "node parent", node.parent, nodes.len())?;
        DecodeError::check_optional_index(FORMAT, "node child", node.child, nodes.len())?;
        DecodeError::check_optional_index(FORMAT, "node sibling", node.sibling, nodes.len())?;
    }

    for (index, node) in nodes.iter().enumerate() {
        let mut parent = node.parent;
        let mut steps = 0;
        while parent != -1 {
            steps += 1;
            if steps > nodes.len() {
                return Err(DecodeError::HierarchyCycle { format: FORMAT, node: index });
            }
            parent = nodes[parent as usize].parent;
        }
    }
    Ok(())
}

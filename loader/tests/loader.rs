use std::{path::PathBuf, sync::Arc, thread};

use gob::GobError;
use loader::{LoadError, Loader, LoaderConfig};

fn archive(members: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut offset = 16 + members.len() * 136;
    let mut data = b"GOB ".to_vec();
    data.extend_from_slice(&0x14i32.to_le_bytes());
    data.extend_from_slice(&0x0Ci32.to_le_bytes());
    data.extend_from_slice(&(members.len() as i32).to_le_bytes());
    for (name, bytes) in members {
        data.extend_from_slice(&(offset as u32).to_le_bytes());
        data.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        let mut padded = [0u8; 128];
        padded[..name.len()].copy_from_slice(name.as_bytes());
        data.extend_from_slice(&padded);
        offset += bytes.len();
    }
    for (_, bytes) in members {
        data.extend_from_slice(bytes);
    }
    data
}

fn colormap(shade: u8) -> Vec<u8> {
    let mut data = b"CMP ".to_vec();
    data.extend_from_slice(&0x1Ei32.to_le_bytes());
    data.extend_from_slice(&0i32.to_le_bytes());
    data.extend_from_slice(&[0; 52]);
    data.extend(std::iter::repeat(shade).take(768));
    data
}

fn material(width: i32, height: i32) -> Vec<u8> {
    let mut data = b"MAT ".to_vec();
    for field in [0x32i32, 2, 1, 1] {
        data.extend_from_slice(&field.to_le_bytes());
    }
    data.resize(76 + 40, 0);
    data.extend_from_slice(&width.to_le_bytes());
    data.extend_from_slice(&height.to_le_bytes());
    data.extend_from_slice(&[0; 16]);
    data.extend(std::iter::repeat(1).take((width * height) as usize));
    data
}

fn bitmap() -> Vec<u8> {
    let mut data = b"BM ".to_vec();
    data.push(0x1E);
    for field in [0i32, 0, 0, 1, 0, 0, 0, 0, 8] {
        data.extend_from_slice(&field.to_le_bytes());
    }
    data.resize(128, 0);
    data.extend_from_slice(&1i32.to_le_bytes());
    data.extend_from_slice(&1i32.to_le_bytes());
    data.push(3);
    data
}

fn font() -> Vec<u8> {
    let mut data = b"SFNT".to_vec();
    data.extend_from_slice(&[0; 16]);
    data.extend_from_slice(&1i32.to_le_bytes());
    data.extend_from_slice(&[0; 16]);
    data.extend_from_slice(&65i16.to_le_bytes());
    data.extend_from_slice(&65i16.to_le_bytes());
    data.extend_from_slice(&0i32.to_le_bytes());
    data.extend_from_slice(&4i32.to_le_bytes());
    data.extend(bitmap());
    data
}

const MODEL: &str = "SECTION: HEADER
3DO 2.1
SECTION: MODELRESOURCE
MATERIALS 1
0: floor.mat
SECTION: GEOMETRYDEF
RADIUS 1.0
INSERT OFFSET 0 0 0
GEOSETS 1
GEOSET 0
MESHES 1
MESH 0
NAME cube
RADIUS 1.0
GEOMETRYMODE 4
LIGHTINGMODE 3
TEXTUREMODE 3
VERTICES 3
0: 0 0 0
1: 1 0 0
2: 0 1 0
TEXTURE VERTICES 0
VERTEX NORMALS
0: 0 0 1
1: 0 0 1
2: 0 0 1
FACES 1
0: 0 0x0 4 3 3 0.0 3 0,-1 1,-1 2,-1
FACE NORMALS
0: 0 0 1
SECTION: HIERARCHYDEF
HIERARCHY NODES 1
0: 0x0 0x1 0 -1 -1 -1 0 0 0 0 0 0 0 0 0 0 cube
";

fn level(things: usize) -> Vec<u8> {
    let mut text = String::from(
        "SECTION: MATERIALS
World materials 1
0: floor.mat 1.0 1.0
end
SECTION: GEORESOURCE
World Colormaps 1
0: level.cmp
SECTION: MODELS
World models 1
0: cube.3do
SECTION: TEMPLATES
World templates 1
_box none model3d=cube.3do size=2.0
end
SECTION: THINGS
",
    );
    text.push_str(&format!("World things {}\n", things));
    for index in 0..things {
        text.push_str(&format!("{}: _box box{} 0 0 0 0 0 0 0\n", index, index));
    }
    text.push_str("end\n");
    text.into_bytes()
}

struct Fixture {
    _dir: tempfile::TempDir,
    config: LoaderConfig,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let resource = dir.path().join("res.gob");
        let episode = dir.path().join("ep.gob");

        std::fs::write(
            &resource,
            archive(&[
                ("misc\\dflt.cmp", colormap(1)),
                ("misc\\uicolormap.cmp", colormap(2)),
                ("misc\\level.cmp", colormap(3)),
                ("mat\\floor.mat", material(2, 2)),
                ("mat\\broken.mat", b"MAT".to_vec()),
                ("ui\\bm\\logo.bm", bitmap()),
                ("ui\\sft\\small.sft", font()),
                ("3do\\cube.3do", MODEL.as_bytes().to_vec()),
                ("jkl\\01.jkl", level(1)),
            ]),
        )
        .unwrap();
        std::fs::write(
            &episode,
            archive(&[
                ("jkl\\01.jkl", level(2)),
                ("misc\\dflt.cmp", colormap(9)),
                ("mat\\episode.mat", material(1, 1)),
            ]),
        )
        .unwrap();

        let config = LoaderConfig {
            resource_archives: vec![resource],
            episode_archives: vec![episode],
            ..LoaderConfig::default()
        };
        Fixture { _dir: dir, config }
    }

    fn loader(&self) -> Loader {
        Loader::new(self.config.clone())
    }
}

#[test]
fn resources_search_resource_archives_first() {
    let fixture = Fixture::new();
    let loader = fixture.loader();
    assert_eq!(cmp::Rgb::new(1, 1, 1), loader.load_cmp("dflt.cmp").unwrap().palette.color(0));
    assert_eq!(1, loader.load_mat("episode.mat").unwrap().width);
}

#[test]
fn levels_search_episode_archives_first() {
    let fixture = Fixture::new();
    let loader = fixture.loader();
    let level = loader.load_jkl("01.jkl").unwrap();
    assert_eq!(2, level.things.len());
}

#[test]
fn raw_access_is_scoped_to_one_archive_list() {
    let fixture = Fixture::new();
    let loader = fixture.loader();
    assert_eq!(Some(level(1)), loader.load_resource("01.jkl").unwrap());
    assert_eq!(Some(level(2)), loader.load_episode("01.JKL").unwrap());
    assert_eq!(None, loader.load_episode("floor.mat").unwrap());
    assert_eq!(Some(material(1, 1)), loader.extract("episode.mat").unwrap());
}

#[test]
fn loads_are_cached() {
    let fixture = Fixture::new();
    let loader = fixture.loader();
    let first = loader.load_mat("floor.mat").unwrap();
    let second = loader.load_mat("FLOOR.MAT").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!((2, 2), (first.width, first.height));
}

#[test]
fn missing_and_corrupt_assets_load_empty() {
    let fixture = Fixture::new();
    let loader = fixture.loader();

    let missing = loader.load_mat("nothere.mat").unwrap();
    assert_eq!(mat::Material::default(), *missing);
    assert!(Arc::ptr_eq(&missing, &loader.load_mat("nothere.mat").unwrap()));

    let broken = loader.load_mat("broken.mat").unwrap();
    assert_eq!(mat::Material::default(), *broken);
    assert!(loader.load_3do("nothere.3do").unwrap().geosets.is_empty());
}

#[test]
fn missing_archive_is_an_error() {
    let fixture = Fixture::new();
    let mut config = fixture.config.clone();
    config.resource_archives.insert(0, PathBuf::from("/nonexistent/Res2.gob"));
    let loader = Loader::new(config);
    assert!(matches!(
        loader.load_mat("floor.mat"),
        Err(LoadError::Archive(GobError::Io { .. }))
    ));
}

#[test]
fn nested_archive_failure_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let resource = dir.path().join("res.gob");
    let model = MODEL.replace("floor.mat", "absent.mat");
    std::fs::write(&resource, archive(&[("3do\\cube.3do", model.into_bytes())])).unwrap();
    let loader = Loader::new(LoaderConfig {
        resource_archives: vec![resource],
        episode_archives: vec![PathBuf::from("/nonexistent/JK1CTF.GOB")],
        ..LoaderConfig::default()
    });

    for _ in 0..2 {
        assert!(matches!(
            loader.load_3do("cube.3do"),
            Err(LoadError::Archive(GobError::Io { .. }))
        ));
    }
}

#[test]
fn concurrent_loads_share_one_decode() {
    let fixture = Fixture::new();
    let loader = fixture.loader();
    let models: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| loader.load_3do("cube.3do").unwrap()))
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });
    assert!(models.iter().all(|model| Arc::ptr_eq(model, &models[0])));
    assert_eq!(1, models[0].geosets[0].meshes[0].faces.len());
}

#[test]
fn models_resolve_through_loader() {
    let fixture = Fixture::new();
    let loader = fixture.loader();
    let model = loader.load_3do("cube.3do").unwrap();
    assert_eq!(2, model.materials[0].width);
    assert_eq!(1.0, model.materials[0].x_tile);
    assert!(Arc::ptr_eq(&model.color_map, &loader.load_cmp("dflt.cmp").unwrap()));
}

#[test]
fn level_models_use_level_colormap() {
    let fixture = Fixture::new();
    let loader = fixture.loader();
    let level = loader.load_jkl("01.jkl").unwrap();
    let model = &level.models["cube.3do"];
    assert_eq!(cmp::Rgb::new(3, 3, 3), model.color_map.palette.color(0));
    assert_eq!(2.0, level.templates["_box"].size);

    // The cached model keeps its own colormap.
    let cached = loader.load_3do("cube.3do").unwrap();
    assert_eq!(cmp::Rgb::new(1, 1, 1), cached.color_map.palette.color(0));
}

#[test]
fn palette_fallbacks() {
    let fixture = Fixture::new();
    let loader = fixture.loader();

    let bitmap = loader.load_bm("logo.bm").unwrap();
    let default = loader.load_cmp("dflt.cmp").unwrap();
    assert!(Arc::ptr_eq(bitmap.palette.as_ref().unwrap(), &default.palette));

    let font = loader.load_sft("small.sft").unwrap();
    let ui = loader.load_cmp("uicolormap.cmp").unwrap();
    assert!(Arc::ptr_eq(font.bitmap.palette.as_ref().unwrap(), &ui.palette));
    assert_eq!(4, font.glyph('A').unwrap().width);
}

#[test]
fn list_manifest_filters() {
    let fixture = Fixture::new();
    let loader = fixture.loader();

    let materials = loader.list_manifest(".MAT").unwrap();
    let names: Vec<&str> = materials.iter().map(|listing| listing.item.name.as_str()).collect();
    assert_eq!(vec!["mat\\floor.mat", "mat\\broken.mat", "mat\\episode.mat"], names);
    assert_eq!(fixture.config.episode_archives[0], materials[2].archive);

    assert_eq!(2, loader.list_manifest("01").unwrap().len());
    assert_eq!(4, loader.list_manifest("misc\\").unwrap().len());
    assert_eq!(12, loader.list_manifest("").unwrap().len());
}

#[test]
fn config_from_json_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("loader.json");
    let json = r#"{ "resource_archives": ["a.gob"], "default_palette": "other.cmp" }"#;
    std::fs::write(&path, json).unwrap();

    let config = LoaderConfig::from_json_file(&path).unwrap();
    assert_eq!(vec![PathBuf::from("a.gob")], config.resource_archives);
    assert_eq!("other.cmp", config.default_palette);
    assert_eq!(3, config.episode_archives.len());

    std::fs::write(&path, "not json").unwrap();
    assert!(matches!(
        LoaderConfig::from_json_file(&path),
        Err(LoadError::ConfigFormat { .. })
    ));
    assert!(matches!(
        LoaderConfig::from_json_file(dir.path().join("missing.json")),
        Err(LoadError::ConfigIo { .. })
    ));
}

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use mm2rng_core::ips::apply_ips;
use mm2rng_core::{run, ErrorKind, RandomiserSettings, Region};
use tempfile::TempDir;

const IMAGE_SIZE: usize = 0x400;

const PROFILE: &str = r#"{
    "passes": [
        { "name": "stages", "kind": "shuffle", "address": 16, "values": [0, 1, 2, 3, 4, 5, 6, 7] },
        { "name": "weakness", "kind": "weighted", "addresses": [32, 33, 34, 35],
          "choices": [{ "value": 1, "weight": 1 }, { "value": 2, "weight": 3 }] },
        { "name": "music", "kind": "music",
          "slots": [{ "usage": "stage", "address": 64 }, { "usage": "boss", "address": 66 }] }
    ],
    "fixups": [
        { "name": "press_damage", "kind": "bytes", "address": 16, "data": [255] },
        { "name": "banner", "kind": "seed_banner", "address": 128, "tile_base": 10, "regions": ["usa"] },
        { "name": "portraits", "kind": "outcome_table", "sources": ["stages"], "address": 96,
          "values": [80, 81, 82, 83, 84, 85, 86, 87] }
    ]
}"#;

const TRACKS: &str = r#"{ "sound_tracks": [
    { "enabled": true, "title": "Air", "uses": ["Stage"], "start_address": "0x200", "track_data": "0102" },
    { "enabled": true, "title": "Crash", "uses": ["STAGE", "boss"], "start_address": "0x210" },
    { "enabled": true, "title": "Boss", "uses": ["Boss"], "start_address": "0x220" }
] }"#;

fn prepatch() -> Vec<u8> {
    let mut data = b"PATCH".to_vec();
    data.extend_from_slice(&[0x00, 0x00, 0x00, 0x00, 0x04, 0xDE, 0xAD, 0xBE, 0xEF]);
    data.extend_from_slice(&[0x00, 0x00, 0x10, 0x00, 0x00, 0x00, 0x08, 0x77]);
    data.extend_from_slice(b"EOF");
    data
}

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::write(root.join("source.nes"), vec![0u8; IMAGE_SIZE]).unwrap();
        fs::write(root.join("profile.json"), PROFILE).unwrap();
        fs::write(root.join("tracks.json"), TRACKS).unwrap();
        fs::write(root.join("prepatch.ips"), prepatch()).unwrap();
        Self { dir }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn settings(&self, seed: Option<i64>, out: &str) -> RandomiserSettings {
        let root = self.root();
        RandomiserSettings {
            seed,
            region: Region::Usa,
            source_path: root.join("source.nes"),
            prepatch_path: Some(root.join("prepatch.ips")),
            profile_path: root.join("profile.json"),
            soundtrack_path: Some(root.join("tracks.json")),
            output_dir: root.join(out),
            pass_toggles: BTreeMap::new(),
            emit_ips: false,
            debug: false,
        }
    }
}

#[test]
fn same_seed_same_image() {
    let fx = Fixture::new();
    let a = run(fx.settings(Some(123_456), "a")).unwrap();
    let b = run(fx.settings(Some(123_456), "b")).unwrap();

    assert_eq!(a.seed, 123_456);
    assert_eq!(a.output_path.file_name(), b.output_path.file_name());
    assert_eq!(
        fs::read(&a.output_path).unwrap(),
        fs::read(&b.output_path).unwrap()
    );
    assert_eq!(a.passes, ["stages", "weakness", "music"]);
}

#[test]
fn output_layers_prepatch_then_edits() {
    let fx = Fixture::new();
    let report = run(fx.settings(Some(27), "out")).unwrap();
    assert_eq!(
        report.output_path.file_name().unwrap().to_str().unwrap(),
        "MM2-RNG-BB.nes"
    );

    let image = fs::read(&report.output_path).unwrap();
    assert_eq!(image.len(), IMAGE_SIZE);
    // Prepatch bytes nobody overwrote survive.
    assert_eq!(&image[0..4], &[0xDE, 0xAD, 0xBE, 0xEF]);
    // The fix-up wins over the stage shuffle at the same offset.
    assert_eq!(image[16], 255);
    // Seed banner: "BB" drawn from tile 10.
    assert_eq!(&image[128..130], &[11, 11]);

    let mut stages = image[17..24].to_vec();
    stages.sort_unstable();
    assert!(stages.windows(2).all(|w| w[0] < w[1]));

    // The source image is untouched.
    let source = fs::read(fx.root().join("source.nes")).unwrap();
    assert!(source.iter().all(|&b| b == 0));
}

#[test]
fn existing_output_is_replaced() {
    let fx = Fixture::new();
    let out = fx.root().join("out");
    fs::create_dir_all(&out).unwrap();
    fs::write(out.join("MM2-RNG-BB.nes"), b"stale").unwrap();

    let report = run(fx.settings(Some(27), "out")).unwrap();
    assert_eq!(fs::read(report.output_path).unwrap().len(), IMAGE_SIZE);
}

#[test]
fn emits_ips_and_spoiler_log() {
    let fx = Fixture::new();
    let mut settings = fx.settings(Some(99), "out");
    settings.emit_ips = true;
    settings.debug = true;
    let report = run(settings).unwrap();

    let ips = fs::read(report.output_path.with_extension("ips")).unwrap();
    let mut image = vec![0u8; IMAGE_SIZE];
    apply_ips(&mut image, &prepatch()).unwrap();
    apply_ips(&mut image, &ips).unwrap();
    assert_eq!(image, fs::read(&report.output_path).unwrap());

    let log = fs::read_to_string(report.output_path.with_extension("log")).unwrap();
    assert!(log.contains(&report.seed_code));
    assert!(log.contains("portraits: follows stages"));
}

#[test]
fn disabled_pass_skips_dependent_fixup() {
    let fx = Fixture::new();
    let mut settings = fx.settings(Some(5), "out");
    settings.pass_toggles.insert("stages".to_string(), false);
    let report = run(settings).unwrap();

    assert_eq!(report.passes, ["weakness", "music"]);
    let image = fs::read(&report.output_path).unwrap();
    assert!(image[96..104].iter().all(|&b| b == 0));
}

#[test]
fn missing_source_is_reported() {
    let fx = Fixture::new();
    let mut settings = fx.settings(Some(1), "out");
    settings.source_path = fx.root().join("missing.nes");
    let err = run(settings).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SourceUnavailable);
    assert!(!fx.root().join("out").exists());
}

#[test]
fn malformed_prepatch_aborts_without_output() {
    let fx = Fixture::new();
    fs::write(fx.root().join("prepatch.ips"), b"PATCH\x00\x00").unwrap();
    let err = run(fx.settings(Some(1), "out")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedPatch);

    let leftovers = fs::read_dir(fx.root().join("out"))
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}

fn entry_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn unexportable_edit_aborts_before_output() {
    // An edit at 0x454F46 would read back as the IPS footer.
    let fx = Fixture::new();
    let root = fx.root();
    fs::write(root.join("big.nes"), vec![0u8; 0x45_4F50]).unwrap();
    fs::write(
        root.join("eof.json"),
        r#"{ "fixups": [{ "name": "eof", "kind": "bytes", "address": 4542278, "data": [1] }] }"#,
    )
    .unwrap();

    let mut settings = fx.settings(Some(27), "out");
    settings.source_path = root.join("big.nes");
    settings.profile_path = root.join("eof.json");
    settings.prepatch_path = None;
    settings.emit_ips = true;
    let err = run(settings).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);

    let out = root.join("out");
    assert!(!out.join("MM2-RNG-BB.nes").exists());
    if out.exists() {
        assert!(entry_names(&out).is_empty());
    }
}

#[test]
fn failed_side_file_discards_output() {
    let fx = Fixture::new();
    let out = fx.root().join("out");
    fs::create_dir_all(out.join("MM2-RNG-BB.log")).unwrap();

    let mut settings = fx.settings(Some(27), "out");
    settings.emit_ips = true;
    settings.debug = true;
    let err = run(settings).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OutputConflict);

    // The image and the already written .ips are gone again.
    assert_eq!(entry_names(&out), ["MM2-RNG-BB.log"]);
}

#[test]
fn output_dir_that_is_a_file_conflicts() {
    let fx = Fixture::new();
    fs::write(fx.root().join("out"), b"not a directory").unwrap();
    let before = entry_names(fx.root());

    let err = run(fx.settings(Some(27), "out")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OutputConflict);
    assert_eq!(entry_names(fx.root()), before);
    assert_eq!(fs::read(fx.root().join("out")).unwrap(), b"not a directory");
}

#[test]
fn output_path_taken_by_a_directory_conflicts() {
    let fx = Fixture::new();
    let out = fx.root().join("out");
    fs::create_dir_all(out.join("MM2-RNG-BB.nes")).unwrap();

    let err = run(fx.settings(Some(27), "out")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OutputConflict);
    // No temporary working copy is left next to the conflict.
    assert_eq!(entry_names(&out), ["MM2-RNG-BB.nes"]);
    assert!(out.join("MM2-RNG-BB.nes").is_dir());
}

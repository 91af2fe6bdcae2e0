//! Integration test: PNG fixtures on disk -> run -> compressed document,
//! including resumption from a torn checkpoint and the large-side index.

#![allow(clippy::unwrap_used)]

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use glyphsim_io::{
    CheckedRasterizer, DirectoryRasterizer, FontManifest, ProgressLog, RunConfig, RunPaths,
    Workload, WorkerPool, build_index, run, write_index,
};
use glyphsim_pipeline::{GrayImage, ScoringConfig, unit_id};
use image::Luma;
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;

const CONTEXTS: [&str; 2] = ["Sans", "Serif"];

fn draw(img: &mut GrayImage, x: i32, y: i32, w: u32, h: u32) {
    draw_filled_rect_mut(img, Rect::at(x, y).of_size(w, h), Luma([0]));
}

fn shape(text: &str, context: &str) -> Option<GrayImage> {
    let mut img = GrayImage::from_pixel(64, 64, Luma([255]));
    match text {
        "l" | "I" => draw(&mut img, 28, 12, 6, 36),
        "i" => {
            draw(&mut img, 28, 22, 6, 26);
            draw(&mut img, 28, 12, 6, 5);
        }
        "t" => {
            draw(&mut img, 28, 12, 6, 36);
            draw(&mut img, 22, 22, 18, 4);
        }
        "m" => draw(&mut img, 8, 24, 44, 24),
        "rn" => {
            draw(&mut img, 12, 24, 6, 24);
            draw(&mut img, 30, 24, 6, 24);
            draw(&mut img, 44, 28, 6, 20);
            draw(&mut img, 12, 24, 38, 4);
        }
        _ => return None,
    }
    if context == "Serif" {
        // Foot serif under every shape.
        let bottom = (0..64u32)
            .rev()
            .find(|&y| (0..64).any(|x| img.get_pixel(x, y).0[0] == 0))?;
        let left = (0..64u32).find(|&x| img.get_pixel(x, bottom).0[0] == 0)?;
        draw(
            &mut img,
            i32::try_from(left).unwrap() - 2,
            i32::try_from(bottom).unwrap() + 1,
            10,
            2,
        );
    }
    Some(img)
}

struct Fixture {
    dir: tempfile::TempDir,
}

impl Fixture {
    fn new(texts: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        for context in CONTEXTS {
            let context_dir = dir.path().join("renders").join(context);
            std::fs::create_dir_all(&context_dir).unwrap();
            for text in texts {
                if let Some(img) = shape(text, context) {
                    img.save(context_dir.join(format!("{}.png", unit_id(text))))
                        .unwrap();
                }
            }
        }
        std::fs::write(
            dir.path().join("fonts.json"),
            r#"{"contexts": [
                {"name": "Sans", "ranges": [[32, 126]]},
                {"name": "Serif", "ranges": [[32, 126]]}
            ]}"#,
        )
        .unwrap();
        Self { dir }
    }

    fn rasterizer(&self) -> CheckedRasterizer<DirectoryRasterizer> {
        CheckedRasterizer::new(DirectoryRasterizer::new(self.dir.path().join("renders")))
    }

    fn manifest(&self) -> FontManifest {
        FontManifest::load(&self.dir.path().join("fonts.json")).unwrap()
    }

    fn paths(&self, name: &str) -> RunPaths {
        let dir = self.dir.path().join(name);
        std::fs::create_dir_all(&dir).unwrap();
        RunPaths {
            checkpoint: dir.join("progress.jsonl"),
            output: dir.join("results.json.gz"),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

fn strings(texts: &[&str]) -> Vec<String> {
    texts.iter().map(ToString::to_string).collect()
}

fn decompress(path: &Path) -> String {
    let mut text = String::new();
    GzDecoder::new(File::open(path).unwrap())
        .read_to_string(&mut text)
        .unwrap();
    text
}

fn config(workers: usize) -> RunConfig {
    RunConfig {
        scoring: ScoringConfig::default(),
        workers: Some(workers),
    }
}

#[test]
fn full_run_writes_identical_pair_both_ways() {
    let texts = ["l", "I", "t", "m"];
    let fixture = Fixture::new(&texts);
    let workload = Workload {
        name: "latin".to_string(),
        sources: strings(&texts),
        targets: strings(&texts),
        large_index: None,
    };
    let paths = fixture.paths("run");
    let report = run(
        &workload,
        &fixture.rasterizer(),
        &fixture.manifest(),
        &config(2),
        &paths,
    )
    .unwrap();
    assert!(report.is_complete());
    assert_eq!(report.computed, 4);

    let doc: serde_json::Value = serde_json::from_str(&decompress(&paths.output)).unwrap();
    assert_eq!(doc["metadata"]["workload"], "latin");
    assert_eq!(doc["metadata"]["contexts"], serde_json::json!(["Sans", "Serif"]));
    let pairs = doc["pairs"].as_array().unwrap();
    assert_eq!(pairs.len(), report.pairs);
    for (source, target) in [("l", "I"), ("I", "l")] {
        let pair = pairs
            .iter()
            .find(|p| p["source"] == source && p["target"] == target)
            .unwrap();
        assert_eq!(pair["maxSameContextSsim"], 1.0);
        assert_eq!(pair["sameContext"], 2);
    }
    // "m" is far wider than the bars and never survives the width gate.
    assert!(pairs.iter().all(|p| p["target"] != "m" || p["source"] == "rn"));
    assert!(doc["incompleteUnits"].as_array().unwrap().is_empty());
    assert_eq!(ProgressLog::open(&paths.checkpoint).unwrap().len(), 4);
}

#[test]
fn torn_checkpoint_resumes_to_identical_output() {
    let texts = ["l", "I", "i", "t", "rn", "m"];
    let fixture = Fixture::new(&texts);
    let workload = Workload {
        name: "latin".to_string(),
        sources: strings(&texts),
        targets: strings(&texts),
        large_index: None,
    };
    let rasterizer = fixture.rasterizer();
    let manifest = fixture.manifest();

    let first = fixture.paths("first");
    run(&workload, &rasterizer, &manifest, &config(3), &first).unwrap();
    let expected = decompress(&first.output);

    // Two complete records and half of a third, as after a crash
    // mid-write.
    let log = std::fs::read_to_string(&first.checkpoint).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), texts.len());
    let torn = format!("{}\n{}\n{}", lines[0], lines[1], &lines[2][..lines[2].len() / 2]);
    let second = fixture.paths("second");
    std::fs::write(&second.checkpoint, torn).unwrap();

    let report = run(&workload, &rasterizer, &manifest, &config(1), &second).unwrap();
    assert_eq!(report.resumed, 2);
    assert_eq!(report.computed, texts.len() - 2);
    assert_eq!(decompress(&second.output), expected);
}

#[test]
fn finished_checkpoint_recomputes_nothing() {
    let texts = ["l", "I", "t"];
    let fixture = Fixture::new(&texts);
    let workload = Workload {
        name: "latin".to_string(),
        sources: strings(&texts),
        targets: strings(&texts),
        large_index: None,
    };
    let paths = fixture.paths("run");
    let rasterizer = fixture.rasterizer();
    let manifest = fixture.manifest();
    run(&workload, &rasterizer, &manifest, &config(2), &paths).unwrap();
    let expected = decompress(&paths.output);

    let report = run(&workload, &rasterizer, &manifest, &config(2), &paths).unwrap();
    assert_eq!(report.resumed, 3);
    assert_eq!(report.computed, 0);
    assert_eq!(decompress(&paths.output), expected);
}

#[test]
fn large_side_index_supplies_targets() {
    let large = ["I", "i", "t", "m", "rn"];
    let fixture = Fixture::new(&["l", "I", "i", "t", "m", "rn"]);
    let rasterizer = fixture.rasterizer();
    let manifest = fixture.manifest();
    let scoring = ScoringConfig::default();

    let pool = WorkerPool::new(2).unwrap();
    let index = build_index(&strings(&large), &rasterizer, &manifest, &scoring, &pool);
    assert_eq!(index.len(), large.len() * CONTEXTS.len());
    let index_path = fixture.path("large.jsonl");
    write_index(&index_path, &index).unwrap();

    let workload = Workload {
        name: "large".to_string(),
        sources: strings(&["l"]),
        targets: Vec::new(),
        large_index: Some(index_path),
    };
    let paths = fixture.paths("run");
    let report = run(&workload, &rasterizer, &manifest, &config(2), &paths).unwrap();
    assert!(report.is_complete());

    let doc: serde_json::Value = serde_json::from_str(&decompress(&paths.output)).unwrap();
    let targets: Vec<&str> = doc["pairs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["target"].as_str().unwrap())
        .collect();
    assert!(targets.contains(&"I"));
    assert!(!targets.contains(&"m"));
    assert!(!targets.contains(&"rn"));
}

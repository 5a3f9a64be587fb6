use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::Path;

fn write_pages(dir: &Path, widths: &[u32]) {
    for (i, width) in widths.iter().enumerate() {
        let shade = (i as u8).wrapping_mul(40);
        let page = image::RgbImage::from_pixel(*width, 12, image::Rgb([shade, 128, 255 - shade]));
        page.save(dir.join(format!("{:03}.png", i + 1))).expect("write page fixture");
    }
}

fn json_stdout(args: &[&str]) -> Value {
    let output = cargo_bin_cmd!("pageflow")
        .args(args)
        .env_remove("RUST_LOG")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("stdout should contain valid json")
}

fn indices(value: &Value) -> Vec<u64> {
    value
        .as_array()
        .expect("array")
        .iter()
        .map(|v| v.as_u64().expect("index"))
        .collect()
}

#[test]
fn version_prints_package_version() {
    cargo_bin_cmd!("pageflow")
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn plan_emits_tiers_and_queue_in_priority_order() {
    let value = json_stdout(&["plan", "--current", "5", "--total", "20"]);

    assert_eq!(value["direction"], "forward");
    assert_eq!(indices(&value["immediate"]), vec![5]);
    assert_eq!(indices(&value["next_high"]), vec![6]);
    assert_eq!(indices(&value["prev_high"]), vec![4]);
    let normal = indices(&value["normal"]);
    assert!(!normal.is_empty());
    assert!(normal.iter().all(|page| ![4, 5, 6].contains(page)));

    let queue = value["queue"].as_array().expect("queue");
    assert_eq!(queue.len(), 3 + normal.len());
    assert_eq!(queue[0]["index"], 5);
    assert_eq!(queue[0]["priority"], 100);
    assert_eq!(queue[0]["tier"], "immediate");
    let priorities: Vec<u64> = queue.iter().map(|t| t["priority"].as_u64().unwrap()).collect();
    assert!(priorities.windows(2).all(|pair| pair[0] >= pair[1]));
}

#[test]
fn plan_follows_backward_reading_and_double_pages() {
    let value = json_stdout(&[
        "plan",
        "--current",
        "10",
        "--total",
        "20",
        "--direction",
        "backward",
        "--preload-size",
        "0",
    ]);
    assert_eq!(value["direction"], "backward");
    assert_eq!(indices(&value["next_high"]), vec![9]);
    assert_eq!(indices(&value["prev_high"]), vec![11]);
    assert!(indices(&value["normal"]).is_empty());

    let value = json_stdout(&["plan", "--current", "4", "--total", "20", "--double-page"]);
    assert_eq!(indices(&value["immediate"]), vec![4, 5]);
    assert_eq!(indices(&value["next_high"]), vec![6, 7]);
    assert_eq!(indices(&value["prev_high"]), vec![3]);
}

#[test]
fn plan_rejects_page_outside_document() {
    cargo_bin_cmd!("pageflow")
        .args(["plan", "--current", "20", "--total", "20"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("out of range"));
}

#[test]
fn simulate_reports_every_visited_page() {
    let pages = tempfile::tempdir().expect("tempdir");
    write_pages(pages.path(), &[10, 20, 30]);
    fs::write(pages.path().join("notes.txt"), b"not a page").expect("write note");

    let dir = pages.path().to_str().expect("utf-8 path");
    let value = json_stdout(&["simulate", dir]);

    assert_eq!(value["page_count"], 3);
    let visits = value["visits"].as_array().expect("visits");
    assert_eq!(visits.len(), 3);
    for (i, visit) in visits.iter().enumerate() {
        assert_eq!(visit["index"], i as u64);
        assert_eq!(visit["width"], [10, 20, 30][i]);
        assert_eq!(visit["height"], 12);
        assert!(visit.get("error").is_none());
    }
    assert_eq!(visits[0]["from_cache"], false);

    assert_eq!(value["cache"]["entries"], 3);
    assert_eq!(value["queue"]["completed"], 3);
    assert!(value["upscale"].is_null());
}

#[test]
fn simulate_reports_missing_pages_and_keeps_going() {
    let pages = tempfile::tempdir().expect("tempdir");
    write_pages(pages.path(), &[10, 20]);

    let dir = pages.path().to_str().expect("utf-8 path");
    let value = json_stdout(&["simulate", dir, "--pages", "0,7,1"]);

    let visits = value["visits"].as_array().expect("visits");
    assert_eq!(visits.len(), 3);
    assert!(visits[0].get("error").is_none());
    assert!(visits[1]["error"].as_str().expect("error").contains('7'));
    assert_eq!(visits[2]["index"], 1);
    assert_eq!(visits[2]["width"], 20);
}

#[test]
fn simulate_upscale_persists_results_for_the_next_run() {
    let pages = tempfile::tempdir().expect("tempdir");
    let store = tempfile::tempdir().expect("tempdir");
    write_pages(pages.path(), &[10, 20, 30]);

    let dir = pages.path().to_str().expect("utf-8 path");
    let store_dir = store.path().to_str().expect("utf-8 path");

    let first = json_stdout(&["simulate", dir, "--upscale", "--store", store_dir]);
    let upscale = &first["upscale"];
    assert!(upscale["submitted"].as_u64().unwrap() >= 1);
    assert!(upscale["completed"].as_u64().unwrap() >= 1);
    assert_eq!(upscale["statuses"][2]["status"], "done");
    let stored = fs::read_dir(store.path()).expect("store dir").count() as u64;
    assert_eq!(stored, upscale["completed"].as_u64().unwrap());

    let second = json_stdout(&["simulate", dir, "--upscale", "--store", store_dir]);
    assert!(second["upscale"]["store_hits"].as_u64().unwrap() >= 1);
    assert_eq!(second["upscale"]["statuses"][2]["status"], "done");
}

#[test]
fn simulate_fails_on_empty_folder() {
    let pages = tempfile::tempdir().expect("tempdir");
    cargo_bin_cmd!("pageflow")
        .arg("simulate")
        .arg(pages.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("no page images"));
}

#[test]
fn config_merges_file_over_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("pageflow.toml");
    fs::write(&path, "concurrency = 2\npreload_size = 6\n").expect("write config");

    cargo_bin_cmd!("pageflow")
        .arg("config")
        .arg("--config")
        .arg(&path)
        .env_remove("PAGEFLOW_CONCURRENCY")
        .env_remove("PAGEFLOW_PRELOAD_SIZE")
        .assert()
        .success()
        .stdout(predicate::str::contains("concurrency = 2"))
        .stdout(predicate::str::contains("preload_size = 6"))
        .stdout(predicate::str::contains("[upscale]"));
}

#[test]
fn config_rejects_invalid_values() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("pageflow.toml");
    fs::write(&path, "concurrency = 0\n").expect("write config");

    cargo_bin_cmd!("pageflow")
        .arg("config")
        .arg("--config")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load config"));
}

#[test]
fn prune_keeps_fresh_results() {
    let store = tempfile::tempdir().expect("tempdir");
    let store_dir = store.path().to_str().expect("utf-8 path");

    let value = json_stdout(&["prune", store_dir, "--max-age-days", "30"]);
    assert_eq!(value["removed"], 0);
    assert_eq!(value["remaining"], 0);
}

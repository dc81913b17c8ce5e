mod common;

use std::fs;

use assert_matches::assert_matches;

use osu_beatmap_harvester::config::FilterConfig;
use osu_beatmap_harvester::domain::MediaKind;
use osu_beatmap_harvester::error::HarvestError;
use osu_beatmap_harvester::extract::{ExtractTarget, extract_media};

use common::{KB, zip_bytes};

fn write_archive(dir: &std::path::Path, members: &[(&str, usize)]) -> std::path::PathBuf {
    let path = dir.join("set.zip");
    fs::write(&path, zip_bytes(members)).unwrap();
    path
}

#[test]
fn size_thresholds_decide_what_stays() {
    let temp = tempfile::tempdir().unwrap();
    let archive = write_archive(
        temp.path(),
        &[
            ("small.jpg", 399 * KB),
            ("large.png", 401 * KB),
            ("short.mp3", 943_718),
            ("long.mp3", 1_153_434),
            ("notes.osu", 10 * KB),
        ],
    );
    let item_dir = temp.path().join("7-A-B");
    let pool_dir = temp.path().join("imgs");
    let target = ExtractTarget {
        item_dir: &item_dir,
        pool_dir: &pool_dir,
        name: "7-A-B",
    };

    let report = extract_media(&archive, target, &FilterConfig::default()).unwrap();

    assert!(!item_dir.join("small.jpg").exists());
    assert!(item_dir.join("large.png").is_file());
    assert!(!item_dir.join("short.mp3").exists());
    assert!(item_dir.join("long.mp3").is_file());
    assert!(!item_dir.join("notes.osu").exists());
    assert_eq!(report.ignored, 1);
    assert_eq!(report.removed.len(), 2);
    assert_eq!(report.kept.len(), 2);
    assert_eq!(
        report.kept.iter().map(|file| file.kind).collect::<Vec<_>>(),
        vec![MediaKind::Image, MediaKind::Audio]
    );
    assert_eq!(report.pooled, vec![pool_dir.join("7-A-B-large.png")]);
    assert!(!pool_dir.join("7-A-B-small.jpg").exists());
    assert!(archive.is_file());
}

#[test]
fn nested_members_are_renamed_in_place() {
    let temp = tempfile::tempdir().unwrap();
    let archive = write_archive(temp.path(), &[("sb dir/bg one.jpg", 500 * KB)]);
    let item_dir = temp.path().join("1-x-y");
    let pool_dir = temp.path().join("imgs");
    let target = ExtractTarget {
        item_dir: &item_dir,
        pool_dir: &pool_dir,
        name: "1-x-y",
    };

    extract_media(&archive, target, &FilterConfig::default()).unwrap();

    assert!(item_dir.join("sb_dir/bg_one.jpg").is_file());
    assert!(!item_dir.join("sb dir").exists());
    assert!(pool_dir.join("1-x-y-bg_one.jpg").is_file());
}

#[test]
fn collision_removes_item_directory() {
    let temp = tempfile::tempdir().unwrap();
    let archive = write_archive(
        temp.path(),
        &[("bg image.jpg", 500 * KB), ("bg_image.jpg", 500 * KB)],
    );
    let item_dir = temp.path().join("2-a-b");
    let pool_dir = temp.path().join("imgs");
    let target = ExtractTarget {
        item_dir: &item_dir,
        pool_dir: &pool_dir,
        name: "2-a-b",
    };

    let result = extract_media(&archive, target, &FilterConfig::default());

    assert_matches!(result, Err(HarvestError::Extraction(_)));
    assert!(!item_dir.exists());
    assert!(!pool_dir.exists());
}

#[test]
fn corrupt_archive_is_an_extraction_error() {
    let temp = tempfile::tempdir().unwrap();
    let archive = temp.path().join("broken.zip");
    fs::write(&archive, b"not a zip").unwrap();
    let item_dir = temp.path().join("3-a-b");
    let pool_dir = temp.path().join("imgs");
    let target = ExtractTarget {
        item_dir: &item_dir,
        pool_dir: &pool_dir,
        name: "3-a-b",
    };

    let result = extract_media(&archive, target, &FilterConfig::default());

    assert_matches!(result, Err(HarvestError::Extraction(_)));
    assert!(!item_dir.exists());
}

#[test]
fn same_file_name_in_two_folders_gets_distinct_pool_names() {
    let temp = tempfile::tempdir().unwrap();
    let archive = write_archive(
        temp.path(),
        &[("a/bg.jpg", 500 * KB), ("b/bg.jpg", 500 * KB)],
    );
    let item_dir = temp.path().join("4-a-b");
    let pool_dir = temp.path().join("imgs");
    let target = ExtractTarget {
        item_dir: &item_dir,
        pool_dir: &pool_dir,
        name: "4-a-b",
    };

    let report = extract_media(&archive, target, &FilterConfig::default()).unwrap();

    assert_eq!(
        report.pooled,
        vec![pool_dir.join("4-a-b-bg.jpg"), pool_dir.join("4-a-b-b-bg.jpg")]
    );
    assert!(pool_dir.join("4-a-b-bg.jpg").is_file());
    assert!(pool_dir.join("4-a-b-b-bg.jpg").is_file());
}

#[test]
fn pool_failure_removes_item_directory() {
    let temp = tempfile::tempdir().unwrap();
    let archive = write_archive(temp.path(), &[("bg.jpg", 500 * KB)]);
    let item_dir = temp.path().join("5-a-b");
    let pool_dir = temp.path().join("imgs");
    fs::write(&pool_dir, b"not a directory").unwrap();
    let target = ExtractTarget {
        item_dir: &item_dir,
        pool_dir: &pool_dir,
        name: "5-a-b",
    };

    let result = extract_media(&archive, target, &FilterConfig::default());

    assert_matches!(result, Err(HarvestError::Filesystem(_)));
    assert!(!item_dir.exists());
}

mod common;

use assert_matches::assert_matches;

use osu_beatmap_harvester::config::SiteConfig;
use osu_beatmap_harvester::credentials::Credential;
use osu_beatmap_harvester::domain::BeatmapSetItem;
use osu_beatmap_harvester::error::HarvestError;
use osu_beatmap_harvester::session::{BeatmapSite, OsuSession};

use common::StubServer;

const LANDING: &str = r#"<html><head><meta name="csrf-token" content="tok123"></head></html>"#;

fn site_config(server: &StubServer) -> SiteConfig {
    SiteConfig {
        base_url: server.base_url.clone(),
        timeout_secs: 10,
        ..SiteConfig::default()
    }
}

fn credential() -> Credential {
    Credential::new("peppy", "wrong")
}

#[test]
fn rejected_login_is_fatal_after_one_post() {
    let server = StubServer::start(|method, path| match (method, path) {
        ("GET", "/home") => (200, LANDING.to_string()),
        ("POST", "/session") => (403, "denied".to_string()),
        _ => (404, String::new()),
    });

    let result = OsuSession::authenticate(&site_config(&server), &credential());

    assert_matches!(result, Err(HarvestError::LoginFailed { status: 403 }));
    assert_eq!(server.count("POST", "/session"), 1);
    assert_eq!(server.count("GET", "/home"), 1);
}

#[test]
fn login_posts_token_and_referer() {
    let server = StubServer::start(|method, path| match (method, path) {
        ("GET", "/home") => (200, LANDING.to_string()),
        ("POST", "/session") => (200, "{}".to_string()),
        _ => (404, String::new()),
    });

    OsuSession::authenticate(&site_config(&server), &credential()).unwrap();

    let post = server
        .requests()
        .into_iter()
        .find(|request| request.method == "POST")
        .unwrap();
    let head = post.head.to_ascii_lowercase();
    assert!(head.contains(&format!("referer: {}/home", server.base_url)));
    assert!(head.contains("application/x-www-form-urlencoded"));
}

#[test]
fn landing_page_without_marker_is_token_error() {
    let server = StubServer::start(|method, path| match (method, path) {
        ("GET", "/home") => (200, "<html><head><title>osu!</title></head></html>".to_string()),
        _ => (200, String::new()),
    });

    let result = OsuSession::authenticate(&site_config(&server), &credential());

    assert_matches!(result, Err(HarvestError::TokenExtraction));
    assert_eq!(server.count("POST", "/session"), 0);
}

#[test]
fn search_and_download_after_login() {
    let server = StubServer::start(|method, path| match (method, path) {
        ("GET", "/home") => (200, LANDING.to_string()),
        ("POST", "/session") => (200, "{}".to_string()),
        ("GET", "/beatmapsets/search") => (
            200,
            r#"{"beatmapsets": [{"id": 42, "title": "Song A", "artist": "DJ X", "favourite_count": 9}], "cursor_string": "next"}"#
                .to_string(),
        ),
        ("GET", "/beatmapsets/42/download") => (429, "slow down".to_string()),
        _ => (404, String::new()),
    });
    let session = OsuSession::authenticate(&site_config(&server), &credential()).unwrap();

    let page = session
        .search(&[("sort".to_string(), "favourites_desc".to_string())])
        .unwrap();
    assert_eq!(page.beatmapsets[0].id, 42);
    assert_eq!(page.cursor_string.as_deref(), Some("next"));

    let temp = tempfile::tempdir().unwrap();
    let result = session.download(
        &BeatmapSetItem::new(42, "Song A", "DJ X"),
        true,
        &temp.path().join("42.zip"),
    );
    assert_matches!(result, Err(HarvestError::DownloadFailed { status: 429 }));
    let download = server
        .requests()
        .into_iter()
        .find(|request| request.path == "/beatmapsets/42/download")
        .unwrap();
    assert!(download.head.contains("noVideo=1"));
}

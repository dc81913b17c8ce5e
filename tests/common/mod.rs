#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use osu_beatmap_harvester::config::{
    CursorMode, FilterConfig, RunConfig, UploadConfig, UploadScope,
};
use osu_beatmap_harvester::domain::{BeatmapSetItem, Category};
use osu_beatmap_harvester::error::HarvestError;
use osu_beatmap_harvester::library::Library;
use osu_beatmap_harvester::paginator::{SearchEntry, SearchPage};
use osu_beatmap_harvester::pipeline::Harvester;
use osu_beatmap_harvester::session::BeatmapSite;
use osu_beatmap_harvester::upload::{ObjectStore, Transform, UploadSync};

pub const KB: usize = 1024;
pub const MB: usize = 1024 * 1024;

/// Search catalog served in fixed-size pages, plus per-id archives.
#[derive(Default)]
pub struct MockSite {
    pub catalog: Vec<SearchEntry>,
    pub page_size: usize,
    pub archives: HashMap<u64, Vec<u8>>,
    /// Number of failed downloads before an id starts succeeding.
    pub flaky: Mutex<HashMap<u64, u32>>,
    pub searches: Mutex<Vec<Vec<(String, String)>>>,
    pub downloads: Mutex<Vec<u64>>,
}

impl MockSite {
    pub fn new(catalog: Vec<SearchEntry>, page_size: usize) -> Self {
        Self {
            catalog,
            page_size,
            ..Self::default()
        }
    }

    pub fn with_archive(mut self, id: u64, archive: Vec<u8>) -> Self {
        self.archives.insert(id, archive);
        self
    }

    pub fn with_flaky(self, id: u64, failures: u32) -> Self {
        self.flaky.lock().unwrap().insert(id, failures);
        self
    }

    pub fn search_count(&self) -> usize {
        self.searches.lock().unwrap().len()
    }

    pub fn download_count(&self) -> usize {
        self.downloads.lock().unwrap().len()
    }

    fn offset_for(&self, cursor: &str) -> usize {
        if let Ok(offset) = cursor.parse::<usize>() {
            return offset;
        }
        let decoded = STANDARD.decode(cursor).expect("cursor is base64");
        let value: serde_json::Value = serde_json::from_slice(&decoded).expect("cursor is json");
        let id = value["id"].as_u64().expect("cursor has id");
        self.catalog
            .iter()
            .position(|entry| entry.id == id)
            .map(|pos| pos + 1)
            .expect("cursor id in catalog")
    }
}

impl BeatmapSite for MockSite {
    fn search(&self, params: &[(String, String)]) -> Result<SearchPage, HarvestError> {
        self.searches.lock().unwrap().push(params.to_vec());
        let offset = params
            .iter()
            .find(|(key, _)| key == "cursor_string")
            .map(|(_, value)| self.offset_for(value))
            .unwrap_or(0)
            .min(self.catalog.len());
        let end = (offset + self.page_size).min(self.catalog.len());
        Ok(SearchPage {
            beatmapsets: self.catalog[offset..end].to_vec(),
            cursor_string: (end < self.catalog.len()).then(|| end.to_string()),
        })
    }

    fn download(
        &self,
        item: &BeatmapSetItem,
        _no_video: bool,
        destination: &Path,
    ) -> Result<(), HarvestError> {
        self.downloads.lock().unwrap().push(item.id);
        if let Some(remaining) = self.flaky.lock().unwrap().get_mut(&item.id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(HarvestError::DownloadFailed { status: 429 });
            }
        }
        match self.archives.get(&item.id) {
            Some(bytes) => {
                std::fs::write(destination, bytes).unwrap();
                Ok(())
            }
            None => Err(HarvestError::DownloadFailed { status: 429 }),
        }
    }
}

/// In-memory object store recording every put.
#[derive(Default)]
pub struct MemoryStore {
    pub objects: Mutex<HashSet<String>>,
    pub puts: Mutex<Vec<(String, Option<Transform>)>>,
    pub failing_keys: HashSet<String>,
}

impl MemoryStore {
    pub fn keys(&self) -> HashSet<String> {
        self.objects.lock().unwrap().clone()
    }

    pub fn put_count(&self) -> usize {
        self.puts.lock().unwrap().len()
    }
}

impl ObjectStore for MemoryStore {
    fn exists(&self, key: &str) -> Result<bool, HarvestError> {
        Ok(self.objects.lock().unwrap().contains(key))
    }

    fn put(
        &self,
        key: &str,
        local_file: &Path,
        transform: Option<Transform>,
    ) -> Result<(), HarvestError> {
        assert!(local_file.is_file(), "missing local file {}", local_file.display());
        self.puts.lock().unwrap().push((key.to_string(), transform));
        if self.failing_keys.contains(key) {
            return Err(HarvestError::ObjectStoreStatus {
                status: 500,
                message: "boom".to_string(),
            });
        }
        self.objects.lock().unwrap().insert(key.to_string());
        Ok(())
    }
}

pub fn entry(id: u64, title: &str, artist: &str, favourite_count: u64) -> SearchEntry {
    SearchEntry {
        id,
        title: title.to_string(),
        artist: artist.to_string(),
        favourite_count,
    }
}

pub fn numbered_catalog(count: u64) -> Vec<SearchEntry> {
    (1..=count)
        .map(|id| entry(id, &format!("Song {id}"), "Artist", 1000 - id))
        .collect()
}

/// Builds an uncompressed zip whose members are filled with `size` bytes.
pub fn zip_bytes(members: &[(&str, usize)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);
    for (name, size) in members {
        writer.start_file(*name, options).unwrap();
        writer.write_all(&vec![7u8; *size]).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn category(name: &str) -> Category {
    name.parse().unwrap()
}

pub fn quick_run() -> RunConfig {
    RunConfig {
        pacing_ms: 0,
        max_consecutive_failures: 5,
        no_video: true,
    }
}

pub fn upload_config(scope: UploadScope) -> UploadConfig {
    UploadConfig {
        endpoint: "unused".to_string(),
        bucket: String::new(),
        root_prefix: "osu".to_string(),
        token_env: None,
        workers: 3,
        scope,
        convert_images: true,
    }
}

pub fn harvester(
    site: MockSite,
    root: &Path,
    scope: Option<UploadScope>,
) -> Harvester<MockSite, MemoryStore> {
    let library = Library::new(root.to_path_buf()).unwrap();
    let harvester = Harvester::new(
        site,
        library,
        FilterConfig::default(),
        quick_run(),
        CursorMode::Server,
    );
    match scope {
        Some(scope) => harvester.with_uploader(UploadSync::new(
            MemoryStore::default(),
            &upload_config(scope),
            FilterConfig::default(),
        )),
        None => harvester,
    }
}

/// One request seen by [`StubServer`].
#[derive(Debug, Clone)]
pub struct StubRequest {
    pub method: String,
    pub path: String,
    pub head: String,
}

/// Plain HTTP/1.1 server answering every request from a closure, one
/// connection per request.
pub struct StubServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<StubRequest>>>,
}

impl StubServer {
    pub fn start<F>(respond: F) -> Self
    where
        F: Fn(&str, &str) -> (u16, String) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&requests);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else {
                    continue;
                };
                let Some(request) = read_request(&mut stream) else {
                    continue;
                };
                let (status, body) = respond(&request.method, &request.path);
                let payload = if request.method == "HEAD" { "" } else { body.as_str() };
                log.lock().unwrap().push(request);
                let response = format!(
                    "HTTP/1.1 {status} Stub\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes());
                let _ = stream.flush();
            }
        });
        Self { base_url, requests }
    }

    pub fn requests(&self) -> Vec<StubRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, method: &str, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|request| request.method == method && request.path == path)
            .count()
    }
}

fn read_request(stream: &mut TcpStream) -> Option<StubRequest> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = find(&buffer, b"\r\n\r\n") {
            break pos + 4;
        }
        let read = stream.read(&mut chunk).ok()?;
        if read == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..read]);
    };

    let head = String::from_utf8_lossy(&buffer[..head_end]).into_owned();
    let lower = head.to_ascii_lowercase();
    let content_length = lower
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok());
    let chunked = lower.contains("transfer-encoding: chunked");
    loop {
        let body = &buffer[head_end..];
        let complete = match content_length {
            Some(length) => body.len() >= length,
            None if chunked => body.ends_with(b"0\r\n\r\n"),
            None => true,
        };
        if complete {
            break;
        }
        let read = stream.read(&mut chunk).ok()?;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
    }

    let mut request_line = head.lines().next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let target = request_line.next()?;
    let path = target.split('?').next().unwrap_or(target).to_string();
    Some(StubRequest { method, path, head })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

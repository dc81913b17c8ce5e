use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, mpsc};
use std::thread;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::Url;
use reqwest::blocking::{Body, Client};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::{FilterConfig, UploadConfig, UploadScope};
use crate::domain::{Category, IMAGE_POOL_DIR, MediaKind};
use crate::error::HarvestError;
use crate::library::walk_dir;

/// Server-side conversion requested along with a put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Webp,
}

impl Transform {
    /// Value of the `Pic-Operations` header for `key`.
    pub fn pic_operations(&self, key: &str) -> String {
        let rule = match self {
            Transform::Webp => "imageMogr2/format/webp",
        };
        serde_json::json!({
            "is_pic_info": 1,
            "rules": [{ "fileid": key, "rule": rule }],
        })
        .to_string()
    }
}

/// Key-value blob store with existence probe and put.
pub trait ObjectStore: Send + Sync {
    fn exists(&self, key: &str) -> Result<bool, HarvestError>;
    fn put(
        &self,
        key: &str,
        local_file: &Path,
        transform: Option<Transform>,
    ) -> Result<(), HarvestError>;
}

#[derive(Clone)]
pub struct HttpObjectStore {
    client: Client,
    endpoint: Url,
    bucket: String,
}

impl HttpObjectStore {
    pub fn new(config: &UploadConfig) -> Result<Self, HarvestError> {
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|err| HarvestError::ObjectStoreHttp(format!("{}: {err}", config.endpoint)))?;
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("osu-harvest/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| HarvestError::ObjectStoreHttp(err.to_string()))?,
        );
        if let Some(var) = &config.token_env {
            match std::env::var(var) {
                Ok(token) if !token.trim().is_empty() => {
                    let mut value = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
                        .map_err(|err| HarvestError::ObjectStoreHttp(err.to_string()))?;
                    value.set_sensitive(true);
                    headers.insert(AUTHORIZATION, value);
                }
                _ => warn!(env = %var, "object store token variable is unset"),
            }
        }
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|err| HarvestError::ObjectStoreHttp(err.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            bucket: config.bucket.clone(),
        })
    }

    pub fn object_url(&self, key: &str) -> Result<Url, HarvestError> {
        let mut url = self.endpoint.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                HarvestError::ObjectStoreHttp(format!("endpoint cannot be a base: {}", self.endpoint))
            })?;
            segments.pop_if_empty();
            if !self.bucket.is_empty() {
                segments.push(&self.bucket);
            }
            segments.extend(key.split('/').filter(|segment| !segment.is_empty()));
        }
        Ok(url)
    }
}

impl ObjectStore for HttpObjectStore {
    fn exists(&self, key: &str) -> Result<bool, HarvestError> {
        let response = self
            .client
            .head(self.object_url(key)?)
            .send()
            .map_err(|err| HarvestError::ObjectStoreHttp(err.to_string()))?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(HarvestError::ObjectStoreStatus {
                status: status.as_u16(),
                message: format!("HEAD {key}"),
            }),
        }
    }

    fn put(
        &self,
        key: &str,
        local_file: &Path,
        transform: Option<Transform>,
    ) -> Result<(), HarvestError> {
        let file =
            fs::File::open(local_file).map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        let mut request = self.client.put(self.object_url(key)?).body(Body::from(file));
        if let Some(transform) = transform {
            request = request.header("Pic-Operations", transform.pic_operations(key));
        }
        let response = request
            .send()
            .map_err(|err| HarvestError::ObjectStoreHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "object store put failed".to_string());
            return Err(HarvestError::ObjectStoreStatus { status, message });
        }
        Ok(())
    }
}

/// Mirrors keys as files below a local directory. Transforms are not applied.
#[derive(Debug, Clone)]
pub struct DirObjectStore {
    root: PathBuf,
}

impl DirObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        key.split('/')
            .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }
}

impl ObjectStore for DirObjectStore {
    fn exists(&self, key: &str) -> Result<bool, HarvestError> {
        Ok(self.path_for(key).is_file())
    }

    fn put(
        &self,
        key: &str,
        local_file: &Path,
        _transform: Option<Transform>,
    ) -> Result<(), HarvestError> {
        let target = self.path_for(key);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        }
        fs::copy(local_file, &target).map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

/// Store selected by `upload.endpoint`: an `http(s)://` URL or a local directory.
#[derive(Clone)]
pub enum ConfiguredStore {
    Http(HttpObjectStore),
    Dir(DirObjectStore),
}

impl ConfiguredStore {
    pub fn from_config(config: &UploadConfig) -> Result<Self, HarvestError> {
        let endpoint = config.endpoint.trim();
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return Ok(Self::Http(HttpObjectStore::new(config)?));
        }
        let mut root = PathBuf::from(endpoint);
        if !config.bucket.is_empty() {
            root.push(&config.bucket);
        }
        Ok(Self::Dir(DirObjectStore::new(root)))
    }
}

impl ObjectStore for ConfiguredStore {
    fn exists(&self, key: &str) -> Result<bool, HarvestError> {
        match self {
            Self::Http(store) => store.exists(key),
            Self::Dir(store) => store.exists(key),
        }
    }

    fn put(
        &self,
        key: &str,
        local_file: &Path,
        transform: Option<Transform>,
    ) -> Result<(), HarvestError> {
        match self {
            Self::Http(store) => store.put(key, local_file, transform),
            Self::Dir(store) => store.put(key, local_file, transform),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadFailure {
    pub key: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadReport {
    pub uploaded: Vec<String>,
    pub present: Vec<String>,
    /// Local files that are walked but not pushed under the current scope.
    pub skipped: Vec<String>,
    pub failed: Vec<UploadFailure>,
}

impl UploadReport {
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug)]
struct UploadJob {
    key: String,
    local_file: PathBuf,
    transform: Option<Transform>,
}

enum JobOutcome {
    Present(String),
    Uploaded(String),
    Failed(UploadFailure),
}

/// Builds the primary object key `{root}/{category}/{item}/{relative}`.
pub fn object_key(root_prefix: &str, category: &Category, item_name: &str, relative: &str) -> String {
    join_key(&[root_prefix, category.as_str(), item_name, relative])
}

/// Builds the flattened gallery key `{root}/{category}/imgs/{item}#{relative}`.
pub fn pool_key(root_prefix: &str, category: &Category, item_name: &str, relative: &str) -> String {
    join_key(&[
        root_prefix,
        category.as_str(),
        IMAGE_POOL_DIR,
        &format!("{item_name}#{relative}"),
    ])
}

fn join_key(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|part| part.trim_matches('/'))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Idempotent local-to-remote mirror of one item directory.
pub struct UploadSync<O: ObjectStore> {
    store: O,
    root_prefix: String,
    workers: usize,
    scope: UploadScope,
    convert_images: bool,
    filter: FilterConfig,
}

impl<O: ObjectStore> UploadSync<O> {
    pub fn new(store: O, config: &UploadConfig, filter: FilterConfig) -> Self {
        Self {
            store,
            root_prefix: config.root_prefix.clone(),
            workers: config.workers.max(1),
            scope: config.scope,
            convert_images: config.convert_images,
            filter,
        }
    }

    pub fn store(&self) -> &O {
        &self.store
    }

    /// Probes every candidate key and puts the ones that are missing.
    ///
    /// Probes and puts run on a bounded worker pool; every worker has finished
    /// before this returns. Individual failures land in the report.
    pub fn sync(
        &self,
        category: &Category,
        local_dir: &Path,
        item_name: &str,
    ) -> Result<UploadReport, HarvestError> {
        let mut report = UploadReport::default();
        let jobs = self.plan(category, local_dir, item_name, &mut report)?;
        if jobs.is_empty() {
            return Ok(report);
        }

        let workers = self.workers.min(jobs.len());
        let queue = Mutex::new(jobs.into_iter());
        let (tx, rx) = mpsc::channel();
        thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                let queue = &queue;
                scope.spawn(move || {
                    loop {
                        let next = queue.lock().unwrap_or_else(PoisonError::into_inner).next();
                        let Some(job) = next else {
                            break;
                        };
                        if tx.send(self.process(job)).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(tx);

        for outcome in rx {
            match outcome {
                JobOutcome::Present(key) => report.present.push(key),
                JobOutcome::Uploaded(key) => report.uploaded.push(key),
                JobOutcome::Failed(failure) => report.failed.push(failure),
            }
        }
        report.uploaded.sort();
        report.present.sort();
        report.failed.sort_by(|a, b| a.key.cmp(&b.key));

        if report.success() {
            info!(
                dir = %local_dir.display(),
                uploaded = report.uploaded.len(),
                present = report.present.len(),
                "upload sync complete"
            );
        } else {
            error!(
                dir = %local_dir.display(),
                failed = report.failed.len(),
                "not all files uploaded; rerun sync to retry"
            );
        }
        Ok(report)
    }

    fn plan(
        &self,
        category: &Category,
        local_dir: &Path,
        item_name: &str,
        report: &mut UploadReport,
    ) -> Result<Vec<UploadJob>, HarvestError> {
        let mut files: Vec<PathBuf> = walk_dir(local_dir)?
            .into_iter()
            .filter(|path| path.is_file())
            .collect();
        files.sort();

        let image_transform = self.convert_images.then_some(Transform::Webp);
        let mut jobs = Vec::new();
        for path in files {
            let Ok(relative) = path.strip_prefix(local_dir) else {
                continue;
            };
            let relative = relative.to_string_lossy().replace('\\', "/");
            match self.filter.classify(&relative) {
                Some(MediaKind::Image) => {
                    jobs.push(UploadJob {
                        key: object_key(&self.root_prefix, category, item_name, &relative),
                        local_file: path.clone(),
                        transform: image_transform,
                    });
                    jobs.push(UploadJob {
                        key: pool_key(&self.root_prefix, category, item_name, &relative),
                        local_file: path,
                        transform: image_transform,
                    });
                }
                Some(MediaKind::Audio) if self.scope == UploadScope::All => {
                    jobs.push(UploadJob {
                        key: object_key(&self.root_prefix, category, item_name, &relative),
                        local_file: path,
                        transform: None,
                    });
                }
                _ => report.skipped.push(relative),
            }
        }
        Ok(jobs)
    }

    fn process(&self, job: UploadJob) -> JobOutcome {
        match self.store.exists(&job.key) {
            Ok(true) => return JobOutcome::Present(job.key),
            Ok(false) => {}
            Err(err) => warn!(key = %job.key, %err, "existence probe failed, uploading anyway"),
        }
        debug!(key = %job.key, file = %job.local_file.display(), "uploading");
        match self.store.put(&job.key, &job.local_file, job.transform) {
            Ok(()) => JobOutcome::Uploaded(job.key),
            Err(err) => {
                error!(key = %job.key, %err, "upload failed");
                JobOutcome::Failed(UploadFailure {
                    key: job.key,
                    message: err.to_string(),
                })
            }
        }
    }
}

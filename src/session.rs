use std::fs::File;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, REFERER, USER_AGENT};
use tracing::{debug, info};

use crate::config::SiteConfig;
use crate::credentials::Credential;
use crate::domain::BeatmapSetItem;
use crate::error::HarvestError;
use crate::paginator::SearchPage;

/// Authenticated access to the beatmap site.
pub trait BeatmapSite: Send + Sync {
    fn search(&self, params: &[(String, String)]) -> Result<SearchPage, HarvestError>;

    /// Streams the item's archive to `destination`.
    ///
    /// A non-success status yields [`HarvestError::DownloadFailed`].
    fn download(
        &self,
        item: &BeatmapSetItem,
        no_video: bool,
        destination: &Path,
    ) -> Result<(), HarvestError>;
}

/// Cookie-carrying session obtained through the site's login form.
#[derive(Clone, Debug)]
pub struct OsuSession {
    client: Client,
    base_url: String,
}

impl OsuSession {
    pub fn authenticate(config: &SiteConfig, credential: &Credential) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|err| HarvestError::SiteHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .cookie_store(true)
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| HarvestError::SiteHttp(err.to_string()))?;
        let session = Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        };
        session.login(credential)?;
        Ok(session)
    }

    fn home_url(&self) -> String {
        format!("{}/home", self.base_url)
    }

    fn login(&self, credential: &Credential) -> Result<(), HarvestError> {
        info!(user = %credential.username, "logging in");
        let home = self
            .client
            .get(self.home_url())
            .send()
            .and_then(Response::text)
            .map_err(|err| HarvestError::SiteHttp(err.to_string()))?;
        let token = extract_csrf_token(&home)?;

        let form = [
            ("username", credential.username.as_str()),
            ("password", credential.password.as_str()),
            ("_token", token.as_str()),
        ];
        let response = self
            .client
            .post(format!("{}/session", self.base_url))
            .header(REFERER, self.home_url())
            .form(&form)
            .send()
            .map_err(|err| HarvestError::SiteHttp(err.to_string()))?;
        if !response.status().is_success() {
            return Err(HarvestError::LoginFailed {
                status: response.status().as_u16(),
            });
        }
        info!("login successful");
        Ok(())
    }
}

impl BeatmapSite for OsuSession {
    fn search(&self, params: &[(String, String)]) -> Result<SearchPage, HarvestError> {
        let response = self
            .client
            .get(format!("{}/beatmapsets/search", self.base_url))
            .query(params)
            .send()
            .map_err(|err| HarvestError::SiteHttp(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::SiteHttp(format!("search returned status {status}")));
        }
        let body = response
            .text()
            .map_err(|err| HarvestError::SiteHttp(err.to_string()))?;
        SearchPage::from_json(&body)
    }

    fn download(
        &self,
        item: &BeatmapSetItem,
        no_video: bool,
        destination: &Path,
    ) -> Result<(), HarvestError> {
        let url = item.download_url(&self.base_url, no_video);
        debug!(%url, "requesting archive");
        let mut response = self
            .client
            .get(&url)
            .header(REFERER, item.page_url(&self.base_url))
            .send()
            .map_err(|err| HarvestError::SiteHttp(err.to_string()))?;
        if !response.status().is_success() {
            return Err(HarvestError::DownloadFailed {
                status: response.status().as_u16(),
            });
        }
        let mut file =
            File::create(destination).map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| HarvestError::SiteHttp(err.to_string()))?;
        Ok(())
    }
}

fn csrf_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?s)csrf-token.*?content="([^"]*)""#).expect("static csrf pattern")
    })
}

/// Pulls the CSRF token out of the landing page's `<meta name="csrf-token">` tag.
pub fn extract_csrf_token(html: &str) -> Result<String, HarvestError> {
    csrf_pattern()
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|token| token.as_str().to_string())
        .filter(|token| !token.is_empty())
        .ok_or(HarvestError::TokenExtraction)
}

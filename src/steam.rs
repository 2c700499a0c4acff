use crate::library::{lenient_app_id, lenient_u64, workshop_url};
use regex::Regex;
use scraper::{Html, Selector};
use serde::Deserialize;
use std::{sync::OnceLock, time::Duration};
use thiserror::Error;

pub const DEFAULT_API_URL: &str =
    "https://api.steampowered.com/ISteamRemoteStorage/GetPublishedFileDetails/v1/";
const USER_AGENT: &str = "workshop-downloader";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Network error: HTTP status {0}")]
    Status(u16),
    #[error("Malformed API response: {0}")]
    Decode(String),
    #[error("No details in API response.")]
    MissingDetails,
}

/// Raw per-item answer from the details endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileDetails {
    pub result_code: i64,
    pub title: Option<String>,
    pub app_id: Option<u64>,
    pub file_size: u64,
    pub description: Option<String>,
    pub preview_url: Option<String>,
}

/// Source of Workshop metadata. The resolver only talks to this seam so it can
/// be exercised without the network.
pub trait MetadataProvider: Send + Sync {
    fn fetch_details(&self, id: &str) -> Result<FileDetails, ProviderError>;
    fn fetch_dependency_ids(&self, id: &str) -> Result<Vec<String>, ProviderError>;
}

pub struct SteamApi {
    agent: ureq::Agent,
    api_url: String,
}

impl SteamApi {
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .user_agent(USER_AGENT)
            .build();
        Self {
            agent,
            api_url: api_url.into(),
        }
    }
}

impl MetadataProvider for SteamApi {
    fn fetch_details(&self, id: &str) -> Result<FileDetails, ProviderError> {
        let response = self
            .agent
            .post(&self.api_url)
            .send_form(&[("itemcount", "1"), ("publishedfileids[0]", id)])
            .map_err(map_transport)?;
        let envelope: DetailsEnvelope = response
            .into_json()
            .map_err(|err| ProviderError::Decode(err.to_string()))?;
        envelope
            .response
            .publishedfiledetails
            .into_iter()
            .next()
            .map(FileDetails::from)
            .ok_or(ProviderError::MissingDetails)
    }

    fn fetch_dependency_ids(&self, id: &str) -> Result<Vec<String>, ProviderError> {
        let html = self
            .agent
            .get(&workshop_url(id))
            .call()
            .map_err(map_transport)?
            .into_string()
            .map_err(|err| ProviderError::Network(err.to_string()))?;
        Ok(parse_required_items(&html))
    }
}

fn map_transport(err: ureq::Error) -> ProviderError {
    match err {
        ureq::Error::Status(code, _) => ProviderError::Status(code),
        other => ProviderError::Network(other.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct DetailsEnvelope {
    #[serde(default)]
    response: DetailsResponse,
}

#[derive(Debug, Default, Deserialize)]
struct DetailsResponse {
    #[serde(default)]
    publishedfiledetails: Vec<RawDetails>,
}

#[derive(Debug, Deserialize)]
struct RawDetails {
    #[serde(default)]
    result: i64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default, deserialize_with = "lenient_app_id")]
    consumer_app_id: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    file_size: u64,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    preview_url: Option<String>,
}

impl From<RawDetails> for FileDetails {
    fn from(raw: RawDetails) -> Self {
        Self {
            result_code: raw.result,
            title: raw.title,
            app_id: raw.consumer_app_id,
            file_size: raw.file_size,
            description: raw.description,
            preview_url: raw.preview_url.filter(|url| !url.is_empty()),
        }
    }
}

fn cached(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static pattern"))
}

/// Pulls the ids linked from the "Required items" block of a Workshop page.
pub fn parse_required_items(html: &str) -> Vec<String> {
    static ID_PARAM: OnceLock<Regex> = OnceLock::new();

    let Ok(links) = Selector::parse("div#RequiredItems a[href]") else {
        return Vec::new();
    };
    let id_param = cached(&ID_PARAM, r"id=(\d+)");
    let document = Html::parse_document(html);
    let mut ids: Vec<String> = Vec::new();
    for href in document
        .select(&links)
        .filter_map(|link| link.value().attr("href"))
    {
        let Some(id) = id_param.captures(href).map(|caps| caps[1].to_string()) else {
            continue;
        };
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

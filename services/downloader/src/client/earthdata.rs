//! NASA Earthdata client for MODIS granules.
//!
//! Granules are found through the CMR search API and downloaded with an
//! Earthdata Login bearer token. Username/password logins are exchanged for a
//! token once, when the client is created.

use std::path::Path;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use fetch_common::{DownloadRequest, RetrievalError, RetrievalResult};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use super::transfer::{Auth, Transfer};
use super::{check_status, transport_error, Retrieved, Retriever};
use crate::config::EarthdataSettings;
use crate::credentials::EarthdataCredentials;

const SEARCH_AFTER_HEADER: &str = "CMR-Search-After";

#[derive(Debug, Deserialize)]
struct UrsToken {
    access_token: String,
    #[serde(default)]
    expiration_date: Option<String>,
}

impl UrsToken {
    fn is_valid_on(&self, today: NaiveDate) -> bool {
        match self
            .expiration_date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%m/%d/%Y").ok())
        {
            Some(expires) => expires > today,
            None => true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    hits: Option<u64>,
    #[serde(default)]
    items: Vec<GranuleItem>,
}

#[derive(Debug, Deserialize)]
struct GranuleItem {
    meta: GranuleMeta,
    umm: GranuleUmm,
}

#[derive(Debug, Deserialize)]
struct GranuleMeta {
    #[serde(rename = "concept-id")]
    concept_id: String,
}

#[derive(Debug, Deserialize)]
struct GranuleUmm {
    #[serde(rename = "RelatedUrls", default)]
    related_urls: Vec<RelatedUrl>,
}

#[derive(Debug, Deserialize)]
struct RelatedUrl {
    #[serde(rename = "URL")]
    url: String,
    #[serde(rename = "Type", default)]
    url_type: Option<String>,
}

/// A granule and the HTTPS links of its data files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Granule {
    pub id: String,
    pub links: Vec<String>,
}

impl From<GranuleItem> for Granule {
    fn from(item: GranuleItem) -> Self {
        let links = item
            .umm
            .related_urls
            .into_iter()
            .filter(|u| u.url_type.as_deref() == Some("GET DATA") && u.url.starts_with("https://"))
            .map(|u| u.url)
            .collect();
        Self {
            id: item.meta.concept_id,
            links,
        }
    }
}

/// File name of a data link: last path segment without query string.
pub fn file_name_of(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().filter(|name| !name.is_empty())
}

/// CMR `temporal` value covering whole days.
fn temporal_param(request: &DownloadRequest) -> String {
    let range = request.temporal.as_range();
    format!(
        "{}T00:00:00Z,{}T23:59:59Z",
        range.start().format("%Y-%m-%d"),
        range.end().format("%Y-%m-%d")
    )
}

/// Client for CMR granule search and Earthdata downloads.
pub struct EarthdataClient {
    client: Client,
    token: String,
    cmr_url: String,
    page_size: u32,
    transfer: Transfer,
    overwrite: bool,
}

impl EarthdataClient {
    /// Authenticate and build a client.
    pub async fn login(
        client: Client,
        credentials: EarthdataCredentials,
        settings: &EarthdataSettings,
        overwrite: bool,
    ) -> RetrievalResult<Self> {
        let token = match credentials {
            EarthdataCredentials::Token(token) => token,
            EarthdataCredentials::Login { username, password } => {
                fetch_token(&client, &settings.urs_url, &username, &password).await?
            }
        };
        info!("Authenticated with Earthdata Login");

        Ok(Self {
            transfer: Transfer::new(client.clone()),
            client,
            token,
            cmr_url: settings.cmr_url.trim_end_matches('/').to_string(),
            page_size: settings.page_size,
            overwrite,
        })
    }

    /// All granules matching the request's product, area and dates.
    #[instrument(skip(self, request), fields(short_name = %request.product))]
    pub async fn search(&self, request: &DownloadRequest) -> RetrievalResult<Vec<Granule>> {
        let url = format!("{}/granules.umm_json", self.cmr_url);
        let temporal = temporal_param(request);
        let bounding_box = request.area.to_cmr_bounding_box();
        let page_size = self.page_size.to_string();

        let mut granules = Vec::new();
        let mut search_after: Option<String> = None;

        loop {
            let mut call = self
                .client
                .get(&url)
                .bearer_auth(&self.token)
                .query(&[
                    ("short_name", request.product.as_str()),
                    ("bounding_box", bounding_box.as_str()),
                    ("temporal", temporal.as_str()),
                    ("page_size", page_size.as_str()),
                ]);
            if let Some(token) = &search_after {
                call = call.header(SEARCH_AFTER_HEADER, token);
            }

            let response = check_status(call.send().await.map_err(transport_error)?).await?;
            search_after = response
                .headers()
                .get(SEARCH_AFTER_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            let page: SearchPage = response.json().await.map_err(transport_error)?;
            let page_len = page.items.len();
            granules.extend(page.items.into_iter().map(Granule::from));
            debug!(page = page_len, total = granules.len(), hits = ?page.hits, "CMR search page");

            let done = page_len == 0
                || search_after.is_none()
                || page.hits.map_or(false, |hits| granules.len() as u64 >= hits);
            if done {
                break;
            }
        }

        info!(count = granules.len(), "Granules found");
        Ok(granules)
    }

    async fn download_link(&self, link: &str, dir: &Path) -> RetrievalResult<Option<u64>> {
        let name = file_name_of(link)
            .ok_or_else(|| RetrievalError::MalformedRequest(format!("No file name in link: {}", link)))?;
        let dest = dir.join(name);

        if !self.overwrite && tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            debug!(path = %dest.display(), "File already exists, skipping download");
            return Ok(None);
        }

        self.transfer
            .fetch(link, Auth::Bearer(&self.token), &dest, None)
            .await
            .map(Some)
    }

    /// Download every data link of `granules` into `dir`.
    ///
    /// All links are attempted; the first failure is returned once they are done.
    async fn download_granules(&self, granules: &[Granule], dir: &Path) -> RetrievalResult<Retrieved> {
        let links: Vec<&str> = granules
            .iter()
            .flat_map(|g| g.links.iter().map(String::as_str))
            .collect();

        let mut retrieved = Retrieved {
            path: dir.to_path_buf(),
            files: 0,
            skipped_files: 0,
            bytes: 0,
        };
        let mut first_error = None;
        let mut failed = 0usize;

        for link in &links {
            match self.download_link(link, dir).await {
                Ok(Some(bytes)) => {
                    retrieved.files += 1;
                    retrieved.bytes += bytes;
                }
                Ok(None) => retrieved.skipped_files += 1,
                Err(e) => {
                    warn!(url = %link, error = %e, "Granule download failed");
                    failed += 1;
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(err) => {
                warn!(failed = failed, total = links.len(), "Some granules failed");
                Err(err)
            }
            None => Ok(retrieved),
        }
    }
}

#[async_trait]
impl Retriever for EarthdataClient {
    #[instrument(skip(self, request), fields(short_name = %request.product, path = %request.destination.display()))]
    async fn retrieve(&self, request: &DownloadRequest) -> RetrievalResult<Retrieved> {
        let granules = self.search(request).await?;
        if granules.is_empty() {
            return Err(RetrievalError::DataNotAvailable(format!(
                "No {} granules for {} in {}",
                request.product, request.temporal, request.area
            )));
        }

        self.download_granules(&granules, &request.destination).await
    }
}

/// Exchange an Earthdata username/password for a bearer token.
async fn fetch_token(
    client: &Client,
    urs_url: &str,
    username: &str,
    password: &str,
) -> RetrievalResult<String> {
    let base = urs_url.trim_end_matches('/');
    let today = Utc::now().date_naive();

    let response = client
        .get(format!("{}/api/users/tokens", base))
        .basic_auth(username, Some(password))
        .send()
        .await
        .map_err(transport_error)?;
    let existing: Vec<UrsToken> = check_status(response)
        .await?
        .json()
        .await
        .map_err(transport_error)?;

    if let Some(token) = existing.into_iter().find(|t| t.is_valid_on(today)) {
        return Ok(token.access_token);
    }

    debug!("No valid Earthdata token, creating one");
    let response = client
        .post(format!("{}/api/users/token", base))
        .basic_auth(username, Some(password))
        .send()
        .await
        .map_err(transport_error)?;
    let created: UrsToken = check_status(response)
        .await?
        .json()
        .await
        .map_err(transport_error)?;
    Ok(created.access_token)
}

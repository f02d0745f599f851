//! Copernicus Climate Data Store client for ERA5 requests.
//!
//! A retrieval is an asynchronous job on the CDS side:
//! submit → poll until `successful` → read the result asset → stream it.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Datelike;
use fetch_common::{DownloadRequest, RetrievalError, RetrievalResult, TemporalSelector};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, instrument};

use super::transfer::{discard_partial, Auth, Transfer};
use super::{check_status, transport_error, Retrieved, Retriever};
use crate::credentials::CdsCredentials;

const TOKEN_HEADER: &str = "PRIVATE-TOKEN";

#[derive(Debug, Deserialize)]
struct JobStatus {
    #[serde(rename = "jobID")]
    job_id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct JobResults {
    asset: Asset,
}

#[derive(Debug, Deserialize)]
struct Asset {
    value: AssetValue,
}

#[derive(Debug, Deserialize)]
struct AssetValue {
    href: String,
    #[serde(rename = "file:size")]
    size: Option<u64>,
}

/// Build the `inputs` object of a CDS process execution.
pub fn cds_inputs(request: &DownloadRequest) -> RetrievalResult<Value> {
    let data_format = request.format.cds_name().ok_or_else(|| {
        RetrievalError::MalformedRequest(format!("{:?} output is not a CDS data format", request.format))
    })?;

    let (years, months, days) = match request.temporal {
        TemporalSelector::Day(day) => (
            vec![format!("{:04}", day.year())],
            vec![format!("{:02}", day.month())],
            vec![format!("{:02}", day.day())],
        ),
        TemporalSelector::Range(range) => {
            let (start, end) = (range.start(), range.end());
            if (start.year(), start.month()) != (end.year(), end.month()) {
                return Err(RetrievalError::MalformedRequest(format!(
                    "CDS date range must stay within one month: {}",
                    range
                )));
            }
            (
                vec![format!("{:04}", start.year())],
                vec![format!("{:02}", start.month())],
                range.days().map(|d| format!("{:02}", d.day())).collect(),
            )
        }
    };

    let mut inputs = json!({
        "product_type": ["reanalysis"],
        "variable": request.variables,
        "year": years,
        "month": months,
        "day": days,
        "time": request.times,
        "data_format": data_format,
        "download_format": "unarchived",
        "area": request.area.to_cds_area(),
    });
    if !request.levels.is_empty() {
        inputs["pressure_level"] = json!(request.levels);
    }
    Ok(inputs)
}

/// Client for the CDS retrieve API.
pub struct CdsClient {
    client: Client,
    credentials: CdsCredentials,
    transfer: Transfer,
    poll_interval: Duration,
    job_timeout: Duration,
}

impl CdsClient {
    pub fn new(
        client: Client,
        credentials: CdsCredentials,
        poll_interval: Duration,
        job_timeout: Duration,
    ) -> Self {
        Self {
            transfer: Transfer::new(client.clone()),
            client,
            credentials,
            poll_interval,
            job_timeout,
        }
    }

    fn execution_url(&self, dataset: &str) -> String {
        format!(
            "{}/retrieve/v1/processes/{}/execution",
            self.credentials.url, dataset
        )
    }

    fn job_url(&self, job_id: &str) -> String {
        format!("{}/retrieve/v1/jobs/{}", self.credentials.url, job_id)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> RetrievalResult<T> {
        let response = self
            .client
            .get(url)
            .header(TOKEN_HEADER, &self.credentials.key)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response).await?.json().await.map_err(transport_error)
    }

    async fn submit(&self, dataset: &str, inputs: Value) -> RetrievalResult<JobStatus> {
        let response = self
            .client
            .post(self.execution_url(dataset))
            .header(TOKEN_HEADER, &self.credentials.key)
            .json(&json!({ "inputs": inputs }))
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response).await?.json().await.map_err(transport_error)
    }

    /// Poll until the job leaves the queue.
    async fn wait_for(&self, mut job: JobStatus) -> RetrievalResult<()> {
        let started = Instant::now();
        loop {
            match job.status.as_str() {
                "successful" => return Ok(()),
                "failed" | "dismissed" | "rejected" => {
                    let detail = match self
                        .get_json::<Value>(&format!("{}/results", self.job_url(&job.job_id)))
                        .await
                    {
                        Err(e) => e.to_string(),
                        Ok(body) => body.to_string(),
                    };
                    return Err(RetrievalError::RemoteJobFailed(format!(
                        "job {} {}: {}",
                        job.job_id, job.status, detail
                    )));
                }
                _ => {}
            }

            if started.elapsed() >= self.job_timeout {
                return Err(RetrievalError::Timeout);
            }

            debug!(job = %job.job_id, status = %job.status, "Waiting for CDS job");
            tokio::time::sleep(self.poll_interval).await;
            job = self.get_json(&self.job_url(&job.job_id)).await?;
        }
    }

    /// Fetch a job's result asset. Every job has its own href, so a partial
    /// file left by an earlier job is dropped rather than resumed.
    async fn download_asset(&self, asset: &AssetValue, dest: &Path) -> RetrievalResult<u64> {
        discard_partial(dest).await?;
        self.transfer
            .fetch(&asset.href, Auth::Anonymous, dest, asset.size)
            .await
    }
}

#[async_trait]
impl Retriever for CdsClient {
    #[instrument(skip(self, request), fields(dataset = %request.product, path = %request.destination.display()))]
    async fn retrieve(&self, request: &DownloadRequest) -> RetrievalResult<Retrieved> {
        let inputs = cds_inputs(request)?;

        let job = self.submit(&request.product, inputs).await?;
        info!(job = %job.job_id, status = %job.status, "Submitted CDS job");
        let job_id = job.job_id.clone();

        self.wait_for(job).await?;

        let results: JobResults = self
            .get_json(&format!("{}/results", self.job_url(&job_id)))
            .await?;

        let bytes = self
            .download_asset(&results.asset.value, &request.destination)
            .await?;

        Ok(Retrieved {
            path: request.destination.clone(),
            files: 1,
            skipped_files: 0,
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::products::era5::{self, Era5Product};
    use crate::client::test_server::{Reply, Seen, TestServer};
    use chrono::NaiveDate;
    use fetch_common::paths::partial_path;
    use fetch_common::{AreaOfInterest, DateRange, OutputFormat, OutputLayout};

    fn request(product: Era5Product) -> DownloadRequest {
        era5::build_request(
            product,
            NaiveDate::from_ymd_opt(2025, 5, 31).unwrap(),
            AreaOfInterest::new(90.0, 60.0, 20.0, 160.0),
            OutputFormat::Grib,
            &OutputLayout::new("/tmp/ERA5"),
        )
    }

    #[test]
    fn test_pressure_level_inputs() {
        let inputs = cds_inputs(&request(Era5Product::PressureLevels)).unwrap();

        assert_eq!(inputs["product_type"], json!(["reanalysis"]));
        assert_eq!(inputs["year"], json!(["2025"]));
        assert_eq!(inputs["month"], json!(["05"]));
        assert_eq!(inputs["day"], json!(["31"]));
        assert_eq!(inputs["time"].as_array().unwrap().len(), 24);
        assert_eq!(inputs["pressure_level"].as_array().unwrap().len(), 37);
        assert_eq!(inputs["variable"][0], "geopotential");
        assert_eq!(inputs["data_format"], "grib");
        assert_eq!(inputs["download_format"], "unarchived");
        assert_eq!(inputs["area"], json!([90.0, 60.0, 20.0, 160.0]));
    }

    #[test]
    fn test_single_level_inputs_omit_pressure_levels() {
        let inputs = cds_inputs(&request(Era5Product::SingleLevels)).unwrap();
        assert!(inputs.get("pressure_level").is_none());
        assert_eq!(inputs["variable"].as_array().unwrap().len(), 19);
    }

    #[test]
    fn test_inputs_are_deterministic() {
        let req = request(Era5Product::PressureLevels);
        assert_eq!(cds_inputs(&req).unwrap(), cds_inputs(&req).unwrap());
    }

    #[test]
    fn test_range_within_month() {
        let mut req = request(Era5Product::SingleLevels);
        req.temporal = TemporalSelector::Range(
            DateRange::parse("2025-05-01", "2025-05-03").unwrap(),
        );
        let inputs = cds_inputs(&req).unwrap();
        assert_eq!(inputs["day"], json!(["01", "02", "03"]));

        req.temporal = TemporalSelector::Range(
            DateRange::parse("2025-05-31", "2025-06-01").unwrap(),
        );
        assert!(matches!(cds_inputs(&req), Err(RetrievalError::MalformedRequest(_))));
    }

    #[test]
    fn test_granule_format_rejected() {
        let mut req = request(Era5Product::SingleLevels);
        req.format = OutputFormat::Granules;
        assert!(matches!(cds_inputs(&req), Err(RetrievalError::MalformedRequest(_))));
    }

    #[test]
    fn test_parse_job_responses() {
        let status: JobStatus = serde_json::from_str(
            r#"{"processID":"reanalysis-era5-single-levels","type":"process","jobID":"a1b2","status":"accepted"}"#,
        )
        .unwrap();
        assert_eq!(status.job_id, "a1b2");
        assert_eq!(status.status, "accepted");

        let results: JobResults = serde_json::from_str(
            r#"{"asset":{"value":{"type":"application/x-grib","href":"https://object-store.example/a1b2.grib","file:size":1234}}}"#,
        )
        .unwrap();
        assert_eq!(results.asset.value.href, "https://object-store.example/a1b2.grib");
        assert_eq!(results.asset.value.size, Some(1234));
    }

    #[test]
    fn test_endpoint_urls() {
        let client = CdsClient::new(
            Client::new(),
            CdsCredentials {
                url: "https://cds.example/api".to_string(),
                key: "k".to_string(),
            },
            Duration::from_secs(1),
            Duration::from_secs(10),
        );
        assert_eq!(
            client.execution_url("reanalysis-era5-pressure-levels"),
            "https://cds.example/api/retrieve/v1/processes/reanalysis-era5-pressure-levels/execution"
        );
        assert_eq!(client.job_url("a1b2"), "https://cds.example/api/retrieve/v1/jobs/a1b2");
    }

    fn client_for(url: &str, job_timeout: Duration) -> CdsClient {
        CdsClient::new(
            Client::new(),
            CdsCredentials {
                url: url.to_string(),
                key: "secret".to_string(),
            },
            Duration::from_millis(1),
            job_timeout,
        )
    }

    fn job(status: &str) -> JobStatus {
        JobStatus {
            job_id: "j1".to_string(),
            status: status.to_string(),
        }
    }

    #[tokio::test]
    async fn test_wait_for_failed_states() {
        let server = TestServer::start(|_| {
            Reply::json(
                400,
                json!({"title": "The job has failed", "detail": "no data for requested date"}),
            )
        })
        .await;
        let client = client_for(&server.url, Duration::from_secs(60));

        for status in ["failed", "dismissed", "rejected"] {
            match client.wait_for(job(status)).await {
                Err(RetrievalError::RemoteJobFailed(msg)) => {
                    assert!(msg.contains(status));
                    assert!(msg.contains("no data for requested date"));
                }
                other => panic!("expected RemoteJobFailed for {}, got {:?}", status, other),
            }
        }
        assert_eq!(server.requests_to("/retrieve/v1/jobs/j1/results").len(), 3);
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        // Nothing listens here; a timed-out job must not be polled again.
        let client = client_for("http://127.0.0.1:9", Duration::ZERO);
        let result = client.wait_for(job("running")).await;
        assert!(matches!(result, Err(RetrievalError::Timeout)));
    }

    #[tokio::test]
    async fn test_wait_for_polls_until_successful() {
        let server =
            TestServer::start(|_| Reply::json(200, json!({"jobID": "j1", "status": "successful"}))).await;
        let client = client_for(&server.url, Duration::from_secs(60));

        client.wait_for(job("accepted")).await.unwrap();
        let polls = server.requests_to("/retrieve/v1/jobs/j1");
        assert_eq!(polls.len(), 1);
        assert_eq!(polls[0].header("private-token"), Some("secret"));
    }

    fn cds_archive() -> impl Fn(&Seen) -> Reply + Send + Sync + 'static {
        |req| match (req.method.as_str(), req.path()) {
            ("POST", "/retrieve/v1/processes/reanalysis-era5-single-levels/execution") => {
                Reply::json(201, json!({"jobID": "j2", "status": "accepted"}))
            }
            ("GET", "/retrieve/v1/jobs/j2") => Reply::json(200, json!({"jobID": "j2", "status": "successful"})),
            ("GET", "/retrieve/v1/jobs/j2/results") => Reply::json(
                200,
                json!({"asset": {"value": {
                    "href": format!("{}/assets/j2.grib", req.base_url()),
                    "file:size": 16
                }}}),
            ),
            // A range request would splice this job's tail onto older bytes.
            ("GET", "/assets/j2.grib") if req.header("range").is_some() => {
                Reply::new(206, "BBBBBBBB").with_header("Content-Range", "bytes 8-15/16")
            }
            ("GET", "/assets/j2.grib") => Reply::new(200, "CCCCCCCCCCCCCCCC"),
            _ => Reply::new(404, "not found"),
        }
    }

    #[tokio::test]
    async fn test_retrieve_never_resumes_partial_from_earlier_job() {
        // Shorter than the asset, and exactly its size.
        for stale in [&b"AAAAAAAA"[..], &b"AAAAAAAAAAAAAAAA"[..]] {
            let server = TestServer::start(cds_archive()).await;
            let dir = tempfile::tempdir().unwrap();
            let layout = OutputLayout::new(dir.path());
            let req = era5::build_request(
                Era5Product::SingleLevels,
                NaiveDate::from_ymd_opt(2025, 5, 31).unwrap(),
                AreaOfInterest::new(90.0, 60.0, 20.0, 160.0),
                OutputFormat::Grib,
                &layout,
            );
            fetch_common::paths::prepare_file(&req.destination).unwrap();
            std::fs::write(partial_path(&req.destination), stale).unwrap();

            let retrieved = client_for(&server.url, Duration::from_secs(60))
                .retrieve(&req)
                .await
                .unwrap();

            assert_eq!(retrieved.bytes, 16);
            assert_eq!(std::fs::read(&req.destination).unwrap(), b"CCCCCCCCCCCCCCCC");
            assert!(!partial_path(&req.destination).exists());

            let asset_requests = server.requests_to("/assets/j2.grib");
            assert_eq!(asset_requests.len(), 1);
            assert!(asset_requests[0].header("range").is_none());
        }
    }
}

use std::fs::File;
use std::thread;
use std::time::Duration;

use camino::Utf8PathBuf;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use tracing::debug;

use crate::domain::RegionCode;
use crate::error::EtlError;
use crate::fs_util;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Downloaded verbatim to `destination`.
    File,
    /// Downloaded and extracted into the `destination` directory.
    Zip,
}

/// A remote artifact and the local path it materializes at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataSource {
    pub kind: SourceKind,
    pub url: String,
    pub destination: Utf8PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<RegionCode>,
}

impl DataSource {
    pub fn file(url: impl Into<String>, destination: Utf8PathBuf) -> Self {
        Self {
            kind: SourceKind::File,
            url: url.into(),
            destination,
            region: None,
        }
    }

    pub fn zip(url: impl Into<String>, destination: Utf8PathBuf) -> Self {
        Self {
            kind: SourceKind::Zip,
            url: url.into(),
            destination,
            region: None,
        }
    }

    pub fn for_region(mut self, region: RegionCode) -> Self {
        self.region = Some(region);
        self
    }

    pub fn is_materialized(&self) -> bool {
        fs_util::is_materialized(self.destination.as_std_path())
    }
}

/// Materializes data sources locally. Retries, if any, happen in here.
pub trait SourceFetcher: Send + Sync {
    fn fetch(&self, source: &DataSource) -> Result<(), EtlError>;
}

#[derive(Clone)]
pub struct HttpSourceFetcher {
    client: Client,
}

impl HttpSourceFetcher {
    pub fn new() -> Result<Self, EtlError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("census-tract-etl/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| EtlError::SourceHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| EtlError::SourceHttp(err.to_string()))?;
        Ok(Self { client })
    }

    fn send_with_retries(&self, url: &str) -> Result<reqwest::blocking::Response, EtlError> {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match self.client.get(url).send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (1 << attempt);
                        debug!(url, status, attempt, "retrying source download");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (1 << attempt);
                        debug!(url, attempt, error = %err, "retrying source download");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(EtlError::SourceHttp(err.to_string()));
                }
            }
        }
    }
}

impl SourceFetcher for HttpSourceFetcher {
    fn fetch(&self, source: &DataSource) -> Result<(), EtlError> {
        debug!(url = %source.url, destination = %source.destination, "fetching source");
        let mut response = self.send_with_retries(&source.url)?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "source request failed".to_string());
            return Err(EtlError::SourceStatus { status, message });
        }

        // The download never lands inside the destination, so an interrupted
        // fetch cannot leave it materialized.
        let staging_dir = source
            .destination
            .parent()
            .map(|parent| parent.to_path_buf())
            .ok_or_else(|| EtlError::Filesystem("invalid destination path".to_string()))?;
        std::fs::create_dir_all(staging_dir.as_std_path())
            .map_err(|err| EtlError::Filesystem(err.to_string()))?;

        let mut temp = tempfile::Builder::new()
            .prefix(".tract-etl-download")
            .tempfile_in(staging_dir.as_std_path())
            .map_err(|err| EtlError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, temp.as_file_mut())
            .map_err(|err| EtlError::SourceHttp(err.to_string()))?;

        match source.kind {
            SourceKind::Zip => {
                let entries =
                    fs_util::extract_zip_staged(temp.path(), source.destination.as_std_path())?;
                debug!(entries, destination = %source.destination, "extracted archive");
            }
            SourceKind::File => {
                temp.persist(source.destination.as_std_path())
                    .map_err(|err| EtlError::Filesystem(err.to_string()))?;
            }
        }
        Ok(())
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

/// Copies sources out of a local mirror directory instead of the network.
/// The mirror holds files named after the last URL segment.
#[derive(Debug, Clone)]
pub struct MirrorSourceFetcher {
    root: Utf8PathBuf,
}

impl MirrorSourceFetcher {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }
}

impl SourceFetcher for MirrorSourceFetcher {
    fn fetch(&self, source: &DataSource) -> Result<(), EtlError> {
        let name = source
            .url
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| EtlError::SourceHttp(format!("no file name in {}", source.url)))?;
        let mirrored = self.root.join(name);
        if !mirrored.as_std_path().is_file() {
            return Err(EtlError::SourceHttp(format!("{mirrored} not found in mirror")));
        }
        match source.kind {
            SourceKind::Zip => {
                fs_util::extract_zip_staged(
                    mirrored.as_std_path(),
                    source.destination.as_std_path(),
                )?;
            }
            SourceKind::File => {
                let parent = source
                    .destination
                    .parent()
                    .ok_or_else(|| EtlError::Filesystem("invalid destination path".to_string()))?;
                std::fs::create_dir_all(parent.as_std_path())
                    .map_err(|err| EtlError::Filesystem(err.to_string()))?;
                let mut input = File::open(mirrored.as_std_path())
                    .map_err(|err| EtlError::Filesystem(err.to_string()))?;
                let mut temp = tempfile::Builder::new()
                    .prefix(".tract-etl-copy")
                    .tempfile_in(parent.as_std_path())
                    .map_err(|err| EtlError::Filesystem(err.to_string()))?;
                std::io::copy(&mut input, temp.as_file_mut())
                    .map_err(|err| EtlError::Filesystem(err.to_string()))?;
                temp.persist(source.destination.as_std_path())
                    .map_err(|err| EtlError::Filesystem(err.to_string()))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(503));
        assert!(is_retryable_status(429));
        assert!(!is_retryable_status(404));
    }

    #[test]
    fn mirror_copies_plain_files() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        std::fs::create_dir_all(root.join("mirror").as_std_path()).unwrap();
        std::fs::write(root.join("mirror").join("fips_states_2010.csv").as_std_path(), b"fips\n01\n")
            .unwrap();

        let fetcher = MirrorSourceFetcher::new(root.join("mirror"));
        let source = DataSource::file(
            "https://example.org/ref/fips_states_2010.csv",
            root.join("out").join("fips.csv"),
        );
        assert!(!source.is_materialized());
        fetcher.fetch(&source).unwrap();
        assert!(source.is_materialized());
        assert_eq!(
            std::fs::read_to_string(root.join("out").join("fips.csv").as_std_path()).unwrap(),
            "fips\n01\n"
        );
        let names: Vec<String> = std::fs::read_dir(root.join("out").as_std_path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["fips.csv".to_string()]);
    }

    #[test]
    fn mirror_archive_with_escaping_entry_is_not_materialized() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        std::fs::create_dir_all(root.join("mirror").as_std_path()).unwrap();
        let archive = root.join("mirror").join("tl_2010_04_tract10.zip");
        let mut writer =
            zip::ZipWriter::new(std::fs::File::create(archive.as_std_path()).unwrap());
        writer
            .start_file("tl_2010_04_tract10.prj", zip::write::SimpleFileOptions::default())
            .unwrap();
        std::io::Write::write_all(&mut writer, b"GEOGCS[\"GCS_North_American_1983\"]").unwrap();
        writer
            .start_file("../escape.shp", zip::write::SimpleFileOptions::default())
            .unwrap();
        std::io::Write::write_all(&mut writer, b"shape").unwrap();
        writer.finish().unwrap();

        let fetcher = MirrorSourceFetcher::new(root.join("mirror"));
        let source = DataSource::zip(
            "https://example.org/tl_2010_04_tract10.zip",
            root.join("shp").join("04"),
        );

        assert_matches!(fetcher.fetch(&source), Err(EtlError::Filesystem(_)));
        assert!(!source.is_materialized());
        assert!(!root.join("shp").join("04").as_std_path().exists());
    }

    #[test]
    fn mirror_reports_missing_files() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let fetcher = MirrorSourceFetcher::new(root.clone());
        let source = DataSource::zip("https://example.org/tl_2010_03_tract10.zip", root.join("03"));

        assert_matches!(fetcher.fetch(&source), Err(EtlError::SourceHttp(_)));
    }
}

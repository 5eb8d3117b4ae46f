//! The extract/transform/load contract shared by every data source.
//!
//! A pipeline run threads each stage's output into the next by value:
//! nothing accumulates on the pipeline itself, so two runs never share
//! state.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

use crate::error::EtlError;
use crate::source::{DataSource, SourceFetcher};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Skip sources whose destination is already on disk.
    pub use_cached_sources: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            use_cached_sources: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchSummary {
    pub fetched: usize,
    pub cached: usize,
}

pub trait ExtractTransformLoad {
    type Extracted;
    type Transformed;
    type Loaded: Serialize;

    fn name(&self) -> &'static str;

    fn data_sources(&self) -> Vec<DataSource>;

    fn extract(
        &self,
        fetcher: &dyn SourceFetcher,
        options: &ExtractOptions,
        sink: &dyn ProgressSink,
    ) -> Result<Self::Extracted, EtlError>;

    fn transform(
        &self,
        extracted: Self::Extracted,
        sink: &dyn ProgressSink,
    ) -> Result<Self::Transformed, EtlError>;

    fn load(
        &self,
        transformed: Self::Transformed,
        sink: &dyn ProgressSink,
    ) -> Result<Self::Loaded, EtlError>;
}

/// Runs the three stages in order. Any stage error aborts the run; later
/// stages never see a partial result.
pub fn run_etl<E: ExtractTransformLoad>(
    etl: &E,
    fetcher: &dyn SourceFetcher,
    options: &ExtractOptions,
    sink: &dyn ProgressSink,
) -> Result<E::Loaded, EtlError> {
    let started = Instant::now();
    info!(pipeline = etl.name(), "starting pipeline");

    sink.event(ProgressEvent {
        message: format!("phase=Extract; {}", etl.name()),
        elapsed: None,
    });
    let extracted = etl.extract(fetcher, options, sink)?;

    sink.event(ProgressEvent {
        message: format!("phase=Transform; {}", etl.name()),
        elapsed: Some(started.elapsed()),
    });
    let transformed = etl.transform(extracted, sink)?;

    sink.event(ProgressEvent {
        message: format!("phase=Load; {}", etl.name()),
        elapsed: Some(started.elapsed()),
    });
    let loaded = etl.load(transformed, sink)?;

    let elapsed = started.elapsed();
    info!(pipeline = etl.name(), elapsed_ms = elapsed.as_millis() as u64, "pipeline complete");
    sink.event(ProgressEvent {
        message: format!("phase=Done; {}", etl.name()),
        elapsed: Some(elapsed),
    });
    Ok(loaded)
}

/// Materializes every source through `fetcher`, in order. A failed region
/// source is reported as [`EtlError::SourceUnavailable`] and stops the fetch.
pub fn fetch_data_sources(
    sources: &[DataSource],
    fetcher: &dyn SourceFetcher,
    options: &ExtractOptions,
    sink: &dyn ProgressSink,
) -> Result<FetchSummary, EtlError> {
    let mut summary = FetchSummary::default();
    for (position, source) in sources.iter().enumerate() {
        if options.use_cached_sources && source.is_materialized() {
            debug!(destination = %source.destination, "source already materialized, skipping");
            summary.cached += 1;
            continue;
        }
        sink.event(ProgressEvent {
            message: format!(
                "phase=Fetch; {} ({} of {})",
                source.url,
                position + 1,
                sources.len()
            ),
            elapsed: None,
        });
        fetcher.fetch(source).map_err(|err| match &source.region {
            Some(region) => EtlError::SourceUnavailable {
                region: region.clone(),
                reason: err.to_string(),
            },
            None => err,
        })?;
        summary.fetched += 1;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use camino::Utf8PathBuf;

    use super::*;

    #[derive(Default)]
    struct RecordingFetcher {
        fetched: Mutex<Vec<String>>,
    }

    impl SourceFetcher for RecordingFetcher {
        fn fetch(&self, source: &DataSource) -> Result<(), EtlError> {
            if source.url.ends_with("03.zip") {
                return Err(EtlError::SourceStatus {
                    status: 404,
                    message: "not found".to_string(),
                });
            }
            self.fetched.lock().unwrap().push(source.url.clone());
            Ok(())
        }
    }

    struct Silent;

    impl ProgressSink for Silent {
        fn event(&self, _event: ProgressEvent) {}
    }

    fn source(root: &Utf8PathBuf, code: &str) -> DataSource {
        DataSource::zip(format!("https://example.org/{code}.zip"), root.join(code))
            .for_region(code.parse().unwrap())
    }

    #[test]
    fn cached_sources_are_skipped() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        std::fs::create_dir_all(root.join("01").as_std_path()).unwrap();
        std::fs::write(root.join("01").join("a.shp").as_std_path(), b"x").unwrap();

        let fetcher = RecordingFetcher::default();
        let sources = vec![source(&root, "01"), source(&root, "02")];
        let summary =
            fetch_data_sources(&sources, &fetcher, &ExtractOptions::default(), &Silent).unwrap();

        assert_eq!(summary, FetchSummary { fetched: 1, cached: 1 });
        assert_eq!(*fetcher.fetched.lock().unwrap(), vec!["https://example.org/02.zip"]);
    }

    #[test]
    fn refetch_ignores_existing_destinations() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        std::fs::create_dir_all(root.join("01").as_std_path()).unwrap();
        std::fs::write(root.join("01").join("a.shp").as_std_path(), b"x").unwrap();

        let fetcher = RecordingFetcher::default();
        let options = ExtractOptions {
            use_cached_sources: false,
        };
        let summary = fetch_data_sources(&[source(&root, "01")], &fetcher, &options, &Silent).unwrap();
        assert_eq!(summary.fetched, 1);
    }

    #[test]
    fn failed_region_source_is_unavailable_and_stops() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let fetcher = RecordingFetcher::default();
        let sources = vec![source(&root, "03"), source(&root, "04")];

        let err = fetch_data_sources(&sources, &fetcher, &ExtractOptions::default(), &Silent)
            .unwrap_err();
        assert_matches!(err, EtlError::SourceUnavailable { region, .. } if region.as_str() == "03");
        assert!(fetcher.fetched.lock().unwrap().is_empty());
    }
}

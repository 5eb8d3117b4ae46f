//! The census tract pipeline: per-region TIGER/Line tract shapefiles in,
//! per-region and national tract lists plus a national WGS84 boundary file
//! out.

use std::time::Instant;

use camino::Utf8PathBuf;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::info;

use crate::assemble::{CoercionWarning, NationalAssembler};
use crate::cache::MaterializationCache;
use crate::catalog::RegionCatalog;
use crate::convert::{GeometryReader, RegionConverter};
use crate::domain::RegionCode;
use crate::error::EtlError;
use crate::etl::{
    ExtractOptions, ExtractTransformLoad, FetchSummary, ProgressEvent, ProgressSink,
    fetch_data_sources,
};
use crate::index::{DEFAULT_REGION_FIELD, DEFAULT_TRACT_ID_FIELD, TractIndex, TractIndexBuilder};
use crate::layout::DataLayout;
use crate::source::{DataSource, SourceFetcher};
use crate::writer::{NationalCsvPolicy, OutputWriter};

pub const DEFAULT_SOURCE_BASE_URL: &str = "https://www2.census.gov/geo/tiger/TIGER2010/TRACT/2010";

#[derive(Debug, Clone)]
pub struct CensusSettings {
    pub source_base_url: String,
    pub parallel_conversion: bool,
    pub tract_id_field: String,
    pub region_field: String,
    pub national_csv_policy: NationalCsvPolicy,
}

impl Default for CensusSettings {
    fn default() -> Self {
        Self {
            source_base_url: DEFAULT_SOURCE_BASE_URL.to_string(),
            parallel_conversion: false,
            tract_id_field: DEFAULT_TRACT_ID_FIELD.to_string(),
            region_field: DEFAULT_REGION_FIELD.to_string(),
            national_csv_policy: NationalCsvPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConversionSummary {
    pub converted: usize,
    pub cached: usize,
}

/// Output of the transform stage, consumed whole by `load`.
#[derive(Debug, Clone)]
pub struct CensusTransformed {
    pub fetch: FetchSummary,
    pub conversions: ConversionSummary,
    pub index: TractIndex,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactReport {
    pub path: Utf8PathBuf,
    pub action: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct CensusReport {
    pub pipeline: &'static str,
    pub fetch: FetchSummary,
    pub conversions: ConversionSummary,
    pub region_lists: Vec<Utf8PathBuf>,
    pub national_csv: ArtifactReport,
    pub national_tracts: usize,
    pub national_geometry: Utf8PathBuf,
    pub national_features: usize,
    pub missing_regions: Vec<RegionCode>,
    pub coercion_warnings: Vec<CoercionWarning>,
    pub completed_at: String,
}

pub struct CensusEtl<R: GeometryReader, C: MaterializationCache> {
    layout: DataLayout,
    catalog: RegionCatalog,
    settings: CensusSettings,
    reader: R,
    cache: C,
}

impl<R: GeometryReader, C: MaterializationCache> CensusEtl<R, C> {
    pub fn new(
        layout: DataLayout,
        catalog: RegionCatalog,
        settings: CensusSettings,
        reader: R,
        cache: C,
    ) -> Self {
        Self {
            layout,
            catalog,
            settings,
            reader,
            cache,
        }
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    pub fn catalog(&self) -> &RegionCatalog {
        &self.catalog
    }

    fn source_url(&self, region: &RegionCode) -> String {
        format!(
            "{}/tl_2010_{}_tract10.zip",
            self.settings.source_base_url.trim_end_matches('/'),
            region
        )
    }

    fn convert_regions(&self, sink: &dyn ProgressSink) -> Result<ConversionSummary, EtlError> {
        let converter = RegionConverter::new(self.layout.clone(), &self.reader, &self.cache);
        let regions = self.catalog.codes();

        let results = if self.settings.parallel_conversion {
            sink.event(ProgressEvent {
                message: format!("phase=Convert; {} regions in parallel", regions.len()),
                elapsed: None,
            });
            converter.convert_all(regions, true)?
        } else {
            let mut results = Vec::with_capacity(regions.len());
            for (position, region) in regions.iter().enumerate() {
                sink.event(ProgressEvent {
                    message: format!(
                        "phase=Convert; FIPS {} to GeoJSON ({} of {})",
                        region,
                        position + 1,
                        regions.len()
                    ),
                    elapsed: None,
                });
                results.push(converter.convert(region)?);
            }
            results
        };

        let converted = results.iter().filter(|result| result.was_written()).count();
        Ok(ConversionSummary {
            converted,
            cached: results.len() - converted,
        })
    }
}

impl<R: GeometryReader, C: MaterializationCache> ExtractTransformLoad for CensusEtl<R, C> {
    type Extracted = FetchSummary;
    type Transformed = CensusTransformed;
    type Loaded = CensusReport;

    fn name(&self) -> &'static str {
        "census"
    }

    /// One zipped tract shapefile per catalog region, extracted into that
    /// region's shape directory.
    fn data_sources(&self) -> Vec<DataSource> {
        self.catalog
            .codes()
            .iter()
            .map(|region| {
                DataSource::zip(self.source_url(region), self.layout.shape_dir(region))
                    .for_region(region.clone())
            })
            .collect()
    }

    fn extract(
        &self,
        fetcher: &dyn SourceFetcher,
        options: &ExtractOptions,
        sink: &dyn ProgressSink,
    ) -> Result<FetchSummary, EtlError> {
        let summary = fetch_data_sources(&self.data_sources(), fetcher, options, sink)?;
        info!(fetched = summary.fetched, cached = summary.cached, "census sources ready");
        Ok(summary)
    }

    fn transform(
        &self,
        fetch: FetchSummary,
        sink: &dyn ProgressSink,
    ) -> Result<CensusTransformed, EtlError> {
        let started = Instant::now();
        let conversions = self.convert_regions(sink)?;
        info!(
            converted = conversions.converted,
            cached = conversions.cached,
            "normalized region files ready"
        );

        sink.event(ProgressEvent {
            message: "phase=Index; collecting tract identifiers".to_string(),
            elapsed: Some(started.elapsed()),
        });
        let index = TractIndexBuilder::new(&self.layout)
            .with_fields(&self.settings.tract_id_field, &self.settings.region_field)
            .build(&self.catalog)?;
        info!(
            regions = index.region_count(),
            tracts = index.national().len(),
            missing = index.missing().len(),
            "tract index built"
        );

        Ok(CensusTransformed {
            fetch,
            conversions,
            index,
        })
    }

    fn load(
        &self,
        transformed: CensusTransformed,
        sink: &dyn ProgressSink,
    ) -> Result<CensusReport, EtlError> {
        let CensusTransformed {
            fetch,
            conversions,
            index,
        } = transformed;
        let writer = OutputWriter::new(&self.layout, &self.cache);

        // Nothing is written until the national assembly succeeded, so a
        // failed load never creates a national artifact.
        sink.event(ProgressEvent {
            message: "phase=Assemble; national geometry".to_string(),
            elapsed: None,
        });
        let assembly = NationalAssembler::new(&self.layout)
            .with_tract_id_field(&self.settings.tract_id_field)
            .assemble()?;

        sink.event(ProgressEvent {
            message: format!("phase=Write; {} region tract lists", index.region_count()),
            elapsed: None,
        });
        let region_lists = writer.write_region_lists(&index)?;
        let national_csv = writer.write_national_list(&index, self.settings.national_csv_policy)?;
        if !national_csv.was_written() {
            info!(path = %national_csv.path(), "national tract list exists, kept");
        }
        let national_geometry = writer.write_national_geometry(&assembly)?;
        info!(
            features = assembly.table.len(),
            files = assembly.region_files,
            warnings = assembly.warnings.len(),
            "national geometry written"
        );

        Ok(CensusReport {
            pipeline: self.name(),
            fetch,
            conversions,
            region_lists,
            national_csv: ArtifactReport {
                path: national_csv.path().to_path_buf(),
                action: national_csv.action(),
            },
            national_tracts: index.national().len(),
            national_geometry,
            national_features: assembly.table.len(),
            missing_regions: index.missing().to_vec(),
            coercion_warnings: assembly.warnings,
            completed_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        })
    }
}

#[cfg(test)]
mod tests {
    use camino::Utf8Path;

    use super::*;
    use crate::cache::FsCache;
    use crate::features::FeatureTable;

    struct NoReader;

    impl GeometryReader for NoReader {
        fn read(&self, path: &Utf8Path) -> Result<FeatureTable, EtlError> {
            Err(EtlError::Filesystem(format!("unexpected read of {path}")))
        }
    }

    fn etl(base_url: &str) -> CensusEtl<NoReader, FsCache> {
        let catalog = RegionCatalog::from_codes(["01", "72"].map(|code| code.parse().unwrap()));
        let settings = CensusSettings {
            source_base_url: base_url.to_string(),
            ..CensusSettings::default()
        };
        CensusEtl::new(
            DataLayout::new(Utf8Path::new("/data")),
            catalog,
            settings,
            NoReader,
            FsCache,
        )
    }

    #[test]
    fn data_sources_follow_catalog_order() {
        let sources = etl(DEFAULT_SOURCE_BASE_URL).data_sources();

        assert_eq!(sources.len(), 2);
        assert_eq!(
            sources[0].url,
            "https://www2.census.gov/geo/tiger/TIGER2010/TRACT/2010/tl_2010_01_tract10.zip"
        );
        assert_eq!(sources[0].destination, Utf8Path::new("/data/sources/census/shp/01"));
        assert_eq!(sources[1].region.as_ref().map(RegionCode::as_str), Some("72"));
    }

    #[test]
    fn base_url_trailing_slash_is_ignored() {
        let sources = etl("http://mirror.local/tracts/").data_sources();
        assert_eq!(sources[0].url, "http://mirror.local/tracts/tl_2010_01_tract10.zip");
    }
}

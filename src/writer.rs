use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::assemble::NationalAssembly;
use crate::cache::{MaterializationCache, Materialized, materialize_if_absent};
use crate::domain::{GeoFileType, TractId};
use crate::error::EtlError;
use crate::index::TractIndex;
use crate::layout::DataLayout;

/// Overwrite policy of the national tract list. The per-region lists and the
/// national geometry file are always rewritten; `us.csv` historically is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NationalCsvPolicy {
    #[default]
    WriteIfAbsent,
    Overwrite,
}

pub struct OutputWriter<'a, C: MaterializationCache> {
    layout: &'a DataLayout,
    cache: C,
}

impl<'a, C: MaterializationCache> OutputWriter<'a, C> {
    pub fn new(layout: &'a DataLayout, cache: C) -> Self {
        Self { layout, cache }
    }

    /// Writes `<csv_root>/<region>.csv` for every region in the index.
    pub fn write_region_lists(&self, index: &TractIndex) -> Result<Vec<Utf8PathBuf>, EtlError> {
        debug!("Loading individual state csv files");
        let mut written = Vec::with_capacity(index.region_count());
        for (region, tracts) in index.per_region() {
            let path = self.layout.path_for(region, GeoFileType::Csv);
            written.push(self.cache.materialize(&path, &tract_csv_bytes(tracts)?)?);
        }
        Ok(written)
    }

    pub fn write_national_list(
        &self,
        index: &TractIndex,
        policy: NationalCsvPolicy,
    ) -> Result<Materialized, EtlError> {
        debug!("Loading national US.csv");
        let path = self.layout.national_csv_path();
        match policy {
            NationalCsvPolicy::WriteIfAbsent => {
                materialize_if_absent(&self.cache, &path, || tract_csv_bytes(index.national()))
            }
            NationalCsvPolicy::Overwrite => {
                let content = tract_csv_bytes(index.national())?;
                Ok(Materialized::Written(self.cache.materialize(&path, &content)?))
            }
        }
    }

    pub fn write_national_geometry(&self, assembly: &NationalAssembly) -> Result<Utf8PathBuf, EtlError> {
        debug!("Saving national GeoJSON file");
        let path = self.layout.national_geometry_path();
        let content = assembly.table.to_geojson_bytes()?;
        self.cache.materialize(&path, &content)
    }
}

/// One bare identifier per line, no header, quoted only when necessary.
pub fn tract_csv_bytes(tracts: &[TractId]) -> Result<Vec<u8>, EtlError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .quote_style(csv::QuoteStyle::Necessary)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    for tract in tracts {
        writer
            .write_record([tract.as_str()])
            .map_err(|err| EtlError::Filesystem(err.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|err| EtlError::Filesystem(err.to_string()))
}

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{debug, warn};

use crate::catalog::RegionCatalog;
use crate::domain::{Coercion, RegionCode, TractId};
use crate::error::EtlError;
use crate::features::FeatureTable;
use crate::layout::{DataLayout, region_from_file_name, sort_by_file_name};

pub const DEFAULT_TRACT_ID_FIELD: &str = "GEOID10";
pub const DEFAULT_REGION_FIELD: &str = "STATEFP10";

/// Tract identifiers of one pipeline run, per region and nationally.
///
/// Built from scratch on every run and handed by value to the load stage.
/// `national` is the concatenation of the per-file sequences in sorted
/// file-name order, so `national.len()` always equals the sum of the
/// per-region lengths.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TractIndex {
    per_region: BTreeMap<RegionCode, Vec<TractId>>,
    national: Vec<TractId>,
    /// Catalog regions without a normalized file; excluded, not an error.
    missing: Vec<RegionCode>,
}

impl TractIndex {
    pub fn per_region(&self) -> &BTreeMap<RegionCode, Vec<TractId>> {
        &self.per_region
    }

    pub fn region(&self, region: &RegionCode) -> Option<&[TractId]> {
        self.per_region.get(region).map(Vec::as_slice)
    }

    pub fn national(&self) -> &[TractId] {
        &self.national
    }

    pub fn missing(&self) -> &[RegionCode] {
        &self.missing
    }

    pub fn region_count(&self) -> usize {
        self.per_region.len()
    }

    fn record(&mut self, region: RegionCode, tracts: Vec<TractId>) {
        self.national.extend(tracts.iter().cloned());
        match self.per_region.get_mut(&region) {
            Some(existing) => {
                // Two files claiming the same region: keep both in file order
                // so the per-region and national counts stay equal.
                warn!(region = %region, "region appears in more than one normalized file, appending");
                existing.extend(tracts);
            }
            None => {
                self.per_region.insert(region, tracts);
            }
        }
    }
}

pub struct TractIndexBuilder<'a> {
    layout: &'a DataLayout,
    tract_id_field: String,
    region_field: String,
}

impl<'a> TractIndexBuilder<'a> {
    pub fn new(layout: &'a DataLayout) -> Self {
        Self {
            layout,
            tract_id_field: DEFAULT_TRACT_ID_FIELD.to_string(),
            region_field: DEFAULT_REGION_FIELD.to_string(),
        }
    }

    pub fn with_fields(mut self, tract_id_field: &str, region_field: &str) -> Self {
        self.tract_id_field = tract_id_field.to_string();
        self.region_field = region_field.to_string();
        self
    }

    pub fn build(&self, catalog: &RegionCatalog) -> Result<TractIndex, EtlError> {
        debug!("Transforming tracts");
        let files = self.layout.normalized_files()?;
        self.build_from_files(catalog, files)
    }

    /// Builds the index from an explicit file list. The list is sorted by
    /// file name first, so the caller's discovery order never leaks into
    /// the national ordering.
    pub fn build_from_files(
        &self,
        catalog: &RegionCatalog,
        mut files: Vec<Utf8PathBuf>,
    ) -> Result<TractIndex, EtlError> {
        sort_by_file_name(&mut files);

        let mut index = TractIndex::default();
        for file in &files {
            debug!("Adding {} for file {}", self.tract_id_field, file.file_name().unwrap_or_default());
            let table = FeatureTable::read_normalized(file)?;
            let tracts = self.tract_ids(&table, file)?;
            let region = self.region_key(&table, file)?;
            if !catalog.contains(&region) {
                warn!(region = %region, path = %file, "normalized file for a region outside the catalog");
            }
            index.record(region, tracts);
        }

        index.missing = skip_missing_regions(catalog, &index);
        Ok(index)
    }

    fn tract_ids(&self, table: &FeatureTable, path: &Utf8Path) -> Result<Vec<TractId>, EtlError> {
        if !table.is_empty() && !table.has_column(&self.tract_id_field) {
            return Err(EtlError::MissingColumn {
                column: self.tract_id_field.clone(),
                path: path.to_path_buf(),
            });
        }
        Ok(table
            .features
            .iter()
            .map(|feature| {
                let value = feature
                    .attribute(&self.tract_id_field)
                    .cloned()
                    .unwrap_or_default();
                TractId::from_attribute(&value)
            })
            .collect())
    }

    /// The region attribute of the file's first row wins over the file
    /// name; disagreement is logged. The file name is the fallback when the
    /// attribute is absent or the file is empty.
    fn region_key(&self, table: &FeatureTable, path: &Utf8Path) -> Result<RegionCode, EtlError> {
        let from_content = table
            .features
            .first()
            .and_then(|feature| feature.attribute(&self.region_field))
            .and_then(|value| match Coercion::from_value(value) {
                Coercion::Coerced(code) => code.as_str().parse::<RegionCode>().ok(),
                Coercion::Retained(_) => None,
            });
        let from_name = region_from_file_name(path);

        match (from_content, from_name) {
            (Some(content), Some(name)) => {
                if content != name {
                    warn!(
                        path = %path,
                        content = %content,
                        file_name = %name,
                        "region attribute disagrees with file name, using attribute"
                    );
                }
                Ok(content)
            }
            (Some(content), None) => Ok(content),
            (None, Some(name)) => {
                warn!(path = %path, region = %name, "no usable {} value, using file name", self.region_field);
                Ok(name)
            }
            (None, None) => Err(EtlError::MissingColumn {
                column: self.region_field.clone(),
                path: path.to_path_buf(),
            }),
        }
    }
}

/// Catalog regions with no normalized file are left out of the index.
fn skip_missing_regions(catalog: &RegionCatalog, index: &TractIndex) -> Vec<RegionCode> {
    let missing: Vec<RegionCode> = catalog
        .codes()
        .iter()
        .filter(|code| !index.per_region.contains_key(*code))
        .cloned()
        .collect();
    for code in &missing {
        debug!(region = %code, "no normalized file, region excluded");
    }
    missing
}

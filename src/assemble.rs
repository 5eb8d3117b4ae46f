use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::crs::Crs;
use crate::domain::Coercion;
use crate::error::EtlError;
use crate::features::FeatureTable;
use crate::index::DEFAULT_TRACT_ID_FIELD;
use crate::layout::{DataLayout, sort_by_file_name};

/// A tract identifier that kept its original value during coercion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoercionWarning {
    pub row: usize,
    pub file: String,
    pub value: Value,
}

#[derive(Debug, Clone)]
pub struct NationalAssembly {
    pub table: FeatureTable,
    pub region_files: usize,
    pub warnings: Vec<CoercionWarning>,
}

/// Unions every normalized region file into one WGS84 feature table.
pub struct NationalAssembler<'a> {
    layout: &'a DataLayout,
    tract_id_field: String,
}

impl<'a> NationalAssembler<'a> {
    pub fn new(layout: &'a DataLayout) -> Self {
        Self {
            layout,
            tract_id_field: DEFAULT_TRACT_ID_FIELD.to_string(),
        }
    }

    pub fn with_tract_id_field(mut self, field: &str) -> Self {
        self.tract_id_field = field.to_string();
        self
    }

    /// Re-scans the geometry root; it does not reuse the index builder's list.
    pub fn assemble(&self) -> Result<NationalAssembly, EtlError> {
        let files = self.layout.normalized_files()?;
        self.assemble_files(files)
    }

    pub fn assemble_files(&self, mut files: Vec<Utf8PathBuf>) -> Result<NationalAssembly, EtlError> {
        sort_by_file_name(&mut files);

        let mut national = FeatureTable::new(Crs::TARGET);
        // Source file of each row, for coercion diagnostics.
        let mut row_files: Vec<(usize, &Utf8Path)> = Vec::with_capacity(files.len());
        for file in &files {
            debug!("Adding national GeoJSON file {}", file.file_name().unwrap_or_default());
            let table = FeatureTable::read_normalized(file)?;
            row_files.push((national.len(), file.as_path()));
            if table.crs != Crs::TARGET {
                debug!(path = %file, from = %table.crs, to = %Crs::TARGET, "Converting to CRS");
            }
            let source_crs = table.crs;
            national
                .features
                .extend(table.features.into_iter().map(|mut feature| {
                    feature.geometry = feature
                        .geometry
                        .map(|geometry| source_crs.reproject_to_wgs84(&geometry));
                    feature
                }));
        }

        if row_files.is_empty() {
            return Err(EtlError::AssemblyEmpty);
        }

        let warnings = self.coerce_tract_ids(&mut national, &row_files);
        Ok(NationalAssembly {
            table: national,
            region_files: files.len(),
            warnings,
        })
    }

    /// Lenient coercion: identifiers without a faithful string form keep
    /// their original value and are reported instead of failing the run.
    fn coerce_tract_ids(
        &self,
        table: &mut FeatureTable,
        row_files: &[(usize, &Utf8Path)],
    ) -> Vec<CoercionWarning> {
        let mut warnings = Vec::new();
        for (row, feature) in table.features.iter_mut().enumerate() {
            let value = feature
                .properties
                .get(&self.tract_id_field)
                .cloned()
                .unwrap_or_default();
            match Coercion::from_value(&value) {
                Coercion::Coerced(id) => {
                    feature
                        .properties
                        .insert(self.tract_id_field.clone(), Value::String(id.as_str().to_string()));
                }
                Coercion::Retained(original) => {
                    let file = source_file(row_files, row);
                    warn!(row, file = %file, value = %original, "tract id could not be coerced to a string, keeping original value");
                    warnings.push(CoercionWarning {
                        row,
                        file,
                        value: original,
                    });
                }
            }
        }
        warnings
    }
}

fn source_file(row_files: &[(usize, &Utf8Path)], row: usize) -> String {
    let position = row_files.partition_point(|(start, _)| *start <= row);
    row_files
        .get(position.saturating_sub(1))
        .and_then(|(_, path)| path.file_name())
        .unwrap_or_default()
        .to_string()
}

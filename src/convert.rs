use std::collections::HashMap;
use std::fs;

use camino::Utf8Path;
use geo_types::Geometry;
use geojson::JsonObject;
use rayon::prelude::*;
use serde_json::{Number, Value};
use shapefile::dbase::FieldValue;
use shapefile::{Reader, Shape};
use tracing::{debug, warn};

use crate::cache::{MaterializationCache, Materialized, materialize_if_absent};
use crate::crs::Crs;
use crate::domain::{GeoFileType, RegionCode};
use crate::error::EtlError;
use crate::features::{FeatureTable, TractFeature};
use crate::layout::DataLayout;

/// Parses a raw per-region geometry file into a feature table.
pub trait GeometryReader: Send + Sync {
    fn read(&self, path: &Utf8Path) -> Result<FeatureTable, EtlError>;
}

impl<T: GeometryReader + ?Sized> GeometryReader for &T {
    fn read(&self, path: &Utf8Path) -> Result<FeatureTable, EtlError> {
        (**self).read(path)
    }
}

/// Reads ESRI shapefiles (`.shp` + `.dbf`, CRS from the `.prj` sidecar).
#[derive(Debug, Clone, Copy, Default)]
pub struct ShapefileReader;

impl GeometryReader for ShapefileReader {
    fn read(&self, path: &Utf8Path) -> Result<FeatureTable, EtlError> {
        let crs = read_prj(path)?;
        let mut reader = Reader::from_path(path.as_std_path())
            .map_err(|err| EtlError::Filesystem(format!("open {path}: {err}")))?;

        let mut table = FeatureTable::new(crs);
        for item in reader.iter_shapes_and_records() {
            let (shape, record) =
                item.map_err(|err| EtlError::Filesystem(format!("{path}: {err}")))?;
            let geometry = match shape {
                Shape::NullShape => None,
                shape => Some(
                    Geometry::<f64>::try_from(shape)
                        .map_err(|err| EtlError::Filesystem(format!("{path}: {err}")))?,
                ),
            };
            let fields: HashMap<String, FieldValue> = record.into();
            let properties = fields
                .into_iter()
                .map(|(name, value)| (name, field_to_json(value)))
                .collect::<JsonObject>();
            table.features.push(TractFeature {
                properties,
                geometry,
            });
        }
        Ok(table)
    }
}

fn read_prj(shp_path: &Utf8Path) -> Result<Crs, EtlError> {
    let prj_path = shp_path.with_extension("prj");
    match fs::read_to_string(prj_path.as_std_path()) {
        Ok(wkt) => Crs::from_prj(&wkt),
        Err(_) => {
            // TIGER/Line tract files are always NAD83.
            warn!(path = %prj_path, "no .prj sidecar, assuming NAD83");
            Ok(Crs::Nad83)
        }
    }
}

pub(crate) fn field_to_json(value: FieldValue) -> Value {
    match value {
        FieldValue::Character(Some(text)) => Value::String(text.trim_end().to_string()),
        FieldValue::Memo(text) => Value::String(text),
        FieldValue::Numeric(Some(number)) => float_value(number),
        FieldValue::Float(Some(number)) => float_value(f64::from(number)),
        FieldValue::Double(number) | FieldValue::Currency(number) => float_value(number),
        FieldValue::Integer(number) => Value::from(number),
        FieldValue::Logical(Some(flag)) => Value::Bool(flag),
        _ => Value::Null,
    }
}

fn float_value(number: f64) -> Value {
    if number.fract() == 0.0 && number.abs() < i64::MAX as f64 {
        return Value::from(number as i64);
    }
    Number::from_f64(number).map(Value::Number).unwrap_or(Value::Null)
}

/// Converts each region's raw shapefile into its normalized GeoJSON file,
/// once. An existing normalized file is never re-parsed or rewritten.
pub struct RegionConverter<R: GeometryReader, C: MaterializationCache> {
    layout: DataLayout,
    reader: R,
    cache: C,
}

impl<R: GeometryReader, C: MaterializationCache> RegionConverter<R, C> {
    pub fn new(layout: DataLayout, reader: R, cache: C) -> Self {
        Self {
            layout,
            reader,
            cache,
        }
    }

    pub fn convert(&self, region: &RegionCode) -> Result<Materialized, EtlError> {
        let raw_path = self.layout.path_for(region, GeoFileType::Shp);
        let normalized_path = self.layout.path_for(region, GeoFileType::GeoJson);

        let result = materialize_if_absent(&self.cache, &normalized_path, || {
            let table = self
                .reader
                .read(&raw_path)
                .map_err(|err| EtlError::Conversion {
                    region: region.clone(),
                    message: err.to_string(),
                })?;
            debug!(region = %region, features = table.len(), crs = %table.crs, "normalized region");
            table.to_geojson_bytes()
        })?;

        if !result.was_written() {
            debug!(region = %region, path = %normalized_path, "normalized file exists, skipping");
        }
        Ok(result)
    }

    /// Converts every region, in parallel when asked. Results come back in
    /// the order of `regions`; the first failure aborts the batch.
    pub fn convert_all(
        &self,
        regions: &[RegionCode],
        parallel: bool,
    ) -> Result<Vec<Materialized>, EtlError> {
        if parallel {
            regions
                .par_iter()
                .map(|region| self.convert(region))
                .collect()
        } else {
            regions.iter().map(|region| self.convert(region)).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use camino::Utf8PathBuf;
    use serde_json::json;

    use super::*;
    use crate::cache::FsCache;

    #[derive(Default)]
    struct CountingReader {
        reads: Mutex<usize>,
    }

    impl GeometryReader for CountingReader {
        fn read(&self, _path: &Utf8Path) -> Result<FeatureTable, EtlError> {
            *self.reads.lock().unwrap() += 1;
            let mut properties = JsonObject::new();
            properties.insert("GEOID10".to_string(), json!("01001020100"));
            Ok(FeatureTable {
                crs: Crs::Nad83,
                features: vec![TractFeature {
                    properties,
                    geometry: None,
                }],
            })
        }
    }

    struct BrokenReader;

    impl GeometryReader for BrokenReader {
        fn read(&self, path: &Utf8Path) -> Result<FeatureTable, EtlError> {
            Err(EtlError::Filesystem(format!("open {path}: not a shapefile")))
        }
    }

    fn temp_layout() -> (tempfile::TempDir, DataLayout) {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let layout = DataLayout::new(&root);
        (temp, layout)
    }

    #[test]
    fn second_conversion_is_a_no_op() {
        let (_temp, layout) = temp_layout();
        let converter = RegionConverter::new(layout.clone(), CountingReader::default(), FsCache);
        let region: RegionCode = "01".parse().unwrap();

        let first = converter.convert(&region).unwrap();
        let path = layout.path_for(&region, GeoFileType::GeoJson);
        let modified = fs::metadata(path.as_std_path()).unwrap().modified().unwrap();
        let second = converter.convert(&region).unwrap();

        assert!(first.was_written());
        assert_eq!(second, Materialized::Cached(path.clone()));
        assert_eq!(*converter.reader.reads.lock().unwrap(), 1);
        assert_eq!(
            fs::metadata(path.as_std_path()).unwrap().modified().unwrap(),
            modified
        );
    }

    #[test]
    fn reader_failure_is_a_conversion_error_for_the_region() {
        let (_temp, layout) = temp_layout();
        let converter = RegionConverter::new(layout.clone(), BrokenReader, FsCache);
        let region: RegionCode = "02".parse().unwrap();

        let err = converter.convert(&region).unwrap_err();
        assert_matches!(err, EtlError::Conversion { region, .. } if region.as_str() == "02");
        assert!(!layout.path_for(&"02".parse().unwrap(), GeoFileType::GeoJson).as_std_path().exists());
    }

    #[test]
    fn parallel_conversion_keeps_region_order() {
        let (_temp, layout) = temp_layout();
        let converter = RegionConverter::new(layout.clone(), CountingReader::default(), FsCache);
        let regions: Vec<RegionCode> = ["05", "01", "03"].iter().map(|c| c.parse().unwrap()).collect();

        let results = converter.convert_all(&regions, true).unwrap();
        let names: Vec<_> = results
            .iter()
            .map(|result| result.path().file_name().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["05.geojson", "01.geojson", "03.geojson"]);
    }

    #[test]
    fn dbf_fields_map_to_json() {
        assert_eq!(
            field_to_json(FieldValue::Character(Some("01001020100".to_string()))),
            json!("01001020100")
        );
        assert_eq!(field_to_json(FieldValue::Numeric(Some(12345.0))), json!(12345));
        assert_eq!(field_to_json(FieldValue::Numeric(Some(0.5))), json!(0.5));
        assert_eq!(field_to_json(FieldValue::Character(None)), Value::Null);
    }
}

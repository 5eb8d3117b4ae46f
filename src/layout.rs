use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;

use crate::domain::{GeoFileType, RegionCode};
use crate::error::EtlError;

pub const NATIONAL_TRACT_CSV: &str = "us.csv";
pub const NATIONAL_GEOMETRY_FILE: &str = "us_geo.geojson";
pub const NORMALIZED_EXTENSION: &str = "geojson";

/// On-disk layout of the census pipeline, rooted at the data directory.
#[derive(Debug, Clone)]
pub struct DataLayout {
    sources_root: Utf8PathBuf,
    geometry_root: Utf8PathBuf,
    csv_root: Utf8PathBuf,
}

impl DataLayout {
    pub fn new(data_root: &Utf8Path) -> Self {
        Self {
            sources_root: data_root.join("sources").join("census"),
            geometry_root: data_root.join("census").join("geojson"),
            csv_root: data_root.join("census").join("csv"),
        }
    }

    pub fn new_with_paths(
        sources_root: Utf8PathBuf,
        geometry_root: Utf8PathBuf,
        csv_root: Utf8PathBuf,
    ) -> Self {
        Self {
            sources_root,
            geometry_root,
            csv_root,
        }
    }

    pub fn sources_root(&self) -> &Utf8Path {
        &self.sources_root
    }

    pub fn geometry_root(&self) -> &Utf8Path {
        &self.geometry_root
    }

    pub fn csv_root(&self) -> &Utf8Path {
        &self.csv_root
    }

    /// Directory a region's shapefile archive is extracted into.
    pub fn shape_dir(&self, region: &RegionCode) -> Utf8PathBuf {
        self.sources_root.join("shp").join(region.as_str())
    }

    pub fn path_for(&self, region: &RegionCode, file_type: GeoFileType) -> Utf8PathBuf {
        match file_type {
            GeoFileType::Shp => self
                .shape_dir(region)
                .join(format!("tl_2010_{region}_tract10.shp")),
            GeoFileType::GeoJson => self
                .geometry_root
                .join(format!("{region}.{NORMALIZED_EXTENSION}")),
            GeoFileType::Csv => self.csv_root.join(format!("{region}.csv")),
        }
    }

    pub fn national_csv_path(&self) -> Utf8PathBuf {
        self.csv_root.join(NATIONAL_TRACT_CSV)
    }

    pub fn national_geometry_path(&self) -> Utf8PathBuf {
        self.geometry_root.join(NATIONAL_GEOMETRY_FILE)
    }

    /// Normalized per-region files currently on disk, sorted by file name.
    /// The national ordering is defined by this sort, never by directory
    /// enumeration order.
    pub fn normalized_files(&self) -> Result<Vec<Utf8PathBuf>, EtlError> {
        if !self.geometry_root.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let pattern = normalized_file_pattern()?;
        let entries = fs::read_dir(self.geometry_root.as_std_path())
            .map_err(|err| EtlError::Filesystem(format!("read {}: {err}", self.geometry_root)))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| EtlError::Filesystem(err.to_string()))?;
            if !entry.path().is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if pattern.is_match(&name) {
                files.push(self.geometry_root.join(name));
            }
        }
        sort_by_file_name(&mut files);
        Ok(files)
    }
}

pub fn sort_by_file_name(files: &mut [Utf8PathBuf]) {
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
}

/// Region code encoded in a normalized file's name (`06.geojson` -> `06`).
pub fn region_from_file_name(path: &Utf8Path) -> Option<RegionCode> {
    path.file_stem().and_then(|stem| stem.parse().ok())
}

fn normalized_file_pattern() -> Result<Regex, EtlError> {
    Regex::new(&format!(r"^[0-9][0-9A-Za-z_]*\.{NORMALIZED_EXTENSION}$"))
        .map_err(|err| EtlError::Filesystem(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> DataLayout {
        DataLayout::new(Utf8Path::new("/data"))
    }

    #[test]
    fn layout_paths() {
        let layout = layout();
        let region: RegionCode = "06".parse().unwrap();

        let shp = layout.path_for(&region, GeoFileType::Shp);
        assert!(shp.ends_with("sources/census/shp/06/tl_2010_06_tract10.shp"));
        assert!(layout.path_for(&region, GeoFileType::GeoJson).ends_with("census/geojson/06.geojson"));
        assert!(layout.path_for(&region, GeoFileType::Csv).ends_with("census/csv/06.csv"));
        assert!(layout.national_csv_path().ends_with("census/csv/us.csv"));
        assert!(layout.national_geometry_path().ends_with("census/geojson/us_geo.geojson"));
    }

    #[test]
    fn explicit_roots_are_used_verbatim() {
        let layout = DataLayout::new_with_paths(
            Utf8PathBuf::from("/raw"),
            Utf8PathBuf::from("/geo"),
            Utf8PathBuf::from("/out"),
        );
        let region: RegionCode = "11".parse().unwrap();
        assert_eq!(layout.shape_dir(&region), Utf8PathBuf::from("/raw/shp/11"));
        assert_eq!(layout.sources_root(), Utf8Path::new("/raw"));
        assert_eq!(layout.national_csv_path(), Utf8PathBuf::from("/out/us.csv"));
    }

    #[test]
    fn normalized_files_skip_national_and_foreign_files() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let layout = DataLayout::new(&root);
        fs::create_dir_all(layout.geometry_root().as_std_path()).unwrap();
        for name in ["10.geojson", "02.geojson", "us_geo.geojson", "01.geojson.tmp", "notes.txt"] {
            fs::write(layout.geometry_root().join(name).as_std_path(), b"{}").unwrap();
        }

        let names: Vec<_> = layout
            .normalized_files()
            .unwrap()
            .iter()
            .map(|path| path.file_name().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["02.geojson", "10.geojson"]);
    }

    #[test]
    fn missing_geometry_root_yields_no_files() {
        let layout = DataLayout::new(Utf8Path::new("/nonexistent/census-tract-etl"));
        assert!(layout.normalized_files().unwrap().is_empty());
    }

    #[test]
    fn region_from_file_name_parses_stem() {
        let region = region_from_file_name(Utf8Path::new("/x/72.geojson")).unwrap();
        assert_eq!(region.as_str(), "72");
        assert!(region_from_file_name(Utf8Path::new("/x/us_geo.geojson")).is_none());
    }
}

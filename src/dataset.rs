use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::ZipArchive;

use crate::error::{Result, ServiceError};

/// 公開可能なデータ形式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    GeoJson,
    /// ZIP にまとめた Shapefile
    Shapefile,
    Csv,
}

impl DatasetKind {
    /// addItem の `type`
    pub fn item_type(&self) -> &'static str {
        match self {
            DatasetKind::GeoJson => "GeoJson",
            DatasetKind::Shapefile => "Shapefile",
            DatasetKind::Csv => "CSV",
        }
    }

    /// publish の `filetype`
    pub fn file_type(&self) -> &'static str {
        match self {
            DatasetKind::GeoJson => "geojson",
            DatasetKind::Shapefile => "shapefile",
            DatasetKind::Csv => "csv",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            DatasetKind::GeoJson => "application/geo+json",
            DatasetKind::Shapefile => "application/zip",
            DatasetKind::Csv => "text/csv",
        }
    }

    fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "geojson" | "json" => Some(DatasetKind::GeoJson),
            "zip" => Some(DatasetKind::Shapefile),
            "csv" => Some(DatasetKind::Csv),
            _ => None,
        }
    }
}

/// 読み込み済みで、アップロード前の検査を通ったデータセット
#[derive(Debug, Clone)]
pub struct LocalDataset {
    pub path: PathBuf,
    pub kind: DatasetKind,
    pub bytes: Vec<u8>,
    /// 分かる場合のみ（GeoJSON の地物数、CSV の行数）
    pub record_count: Option<usize>,
}

/// Shapefile として最低限必要な構成ファイル
const SHAPEFILE_MEMBERS: [&str; 3] = ["shp", "shx", "dbf"];

impl LocalDataset {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let kind = DatasetKind::from_path(path).ok_or_else(|| {
            ServiceError::Dataset(format!(
                "Unsupported dataset {:?}: expected .geojson, .json, .zip or .csv",
                path
            ))
        })?;

        let bytes = fs::read(path)
            .map_err(|e| ServiceError::Dataset(format!("Failed to read {:?}: {}", path, e)))?;
        debug!(path = ?path, kind = ?kind, bytes = bytes.len(), "read dataset");

        let record_count = match kind {
            DatasetKind::GeoJson => Some(check_geojson(&bytes)?),
            DatasetKind::Shapefile => {
                check_shapefile_zip(&bytes)?;
                None
            }
            DatasetKind::Csv => Some(check_csv(&bytes)?),
        };

        info!(path = ?path, kind = ?kind, records = ?record_count, "dataset ready");

        Ok(Self {
            path: path.to_path_buf(),
            kind,
            bytes,
            record_count,
        })
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("dataset")
            .to_string()
    }

    /// 拡張子を除いたファイル名（タイトルの既定値）
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("dataset")
            .to_string()
    }
}

fn check_geojson(bytes: &[u8]) -> Result<usize> {
    let value: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| ServiceError::Dataset(format!("Invalid GeoJSON: {}", e)))?;

    if value.get("type").and_then(|t| t.as_str()) != Some("FeatureCollection") {
        return Err(ServiceError::Dataset(
            "GeoJSON must be a FeatureCollection".to_string(),
        ));
    }

    value
        .get("features")
        .and_then(|f| f.as_array())
        .map(|f| f.len())
        .ok_or_else(|| ServiceError::Dataset("GeoJSON has no features array".to_string()))
}

fn check_shapefile_zip(bytes: &[u8]) -> Result<()> {
    let archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ServiceError::Dataset(format!("Invalid ZIP archive: {}", e)))?;

    let extensions: Vec<String> = archive
        .file_names()
        .filter_map(|name| Path::new(name).extension()?.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .collect();

    let missing: Vec<&str> = SHAPEFILE_MEMBERS
        .iter()
        .copied()
        .filter(|ext| !extensions.iter().any(|e| e.as_str() == *ext))
        .collect();

    if !missing.is_empty() {
        return Err(ServiceError::Dataset(format!(
            "Shapefile archive is missing .{} member(s)",
            missing.join(", .")
        )));
    }
    Ok(())
}

fn check_csv(bytes: &[u8]) -> Result<usize> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| ServiceError::Dataset(format!("CSV is not UTF-8: {}", e)))?;
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());

    match lines.next() {
        Some(_) => Ok(lines.count()),
        None => Err(ServiceError::Dataset("CSV has no header row".to_string())),
    }
}

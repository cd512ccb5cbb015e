use gdal::vsi;
use gdal::Dataset;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

use crate::error::{Result, ServiceError};

/// TIFF から読み出した画素値と位置情報
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRaster {
    pub width: usize,
    pub height: usize,
    pub band_count: usize,
    pub no_data: Option<f64>,
    pub geo_transform: Option<[f64; 6]>,
    /// バンド順、各バンドは行優先
    pub values: Vec<f64>,
}

static MEM_FILE_SEQ: AtomicUsize = AtomicUsize::new(0);

fn raster_err(context: &str, e: gdal::errors::GdalError) -> ServiceError {
    ServiceError::Raster(format!("{}: {}", context, e))
}

/// GDAL のメモリ上ファイルを通して TIFF をデコードする
pub fn decode_tiff(bytes: Vec<u8>) -> Result<DecodedRaster> {
    let seq = MEM_FILE_SEQ.fetch_add(1, Ordering::Relaxed);
    let path = format!("/vsimem/geoservice_{}_{}.tif", std::process::id(), seq);

    vsi::create_mem_file(path.as_str(), bytes)
        .map_err(|e| raster_err("Failed to stage TIFF in memory", e))?;

    // 成功・失敗に関わらずメモリファイルを削除する
    let decoded = read_dataset(&path);
    if let Err(e) = vsi::unlink_mem_file(path.as_str()) {
        debug!(path = %path, error = %e, "failed to unlink in-memory file");
    }
    decoded
}

fn read_dataset(path: &str) -> Result<DecodedRaster> {
    let dataset = Dataset::open(path).map_err(|e| raster_err("Failed to open TIFF", e))?;

    let (width, height) = dataset.raster_size();
    let band_count = dataset.raster_count() as usize;
    if band_count == 0 || width == 0 || height == 0 {
        return Err(ServiceError::Raster("TIFF contains no pixels".to_string()));
    }

    let mut values = Vec::with_capacity(width * height * band_count);
    let mut no_data = None;

    for index in 1..=band_count {
        let band = dataset
            .rasterband(index)
            .map_err(|e| raster_err("Failed to get raster band", e))?;
        if no_data.is_none() {
            no_data = band.no_data_value();
        }
        let buffer = band
            .read_as::<f64>((0, 0), (width, height), (width, height), None)
            .map_err(|e| raster_err("Failed to read raster band", e))?;
        values.extend_from_slice(buffer.data());
    }

    debug!(
        width = width,
        height = height,
        bands = band_count,
        "decoded TIFF"
    );

    Ok(DecodedRaster {
        width,
        height,
        band_count,
        no_data,
        geo_transform: dataset.geo_transform().ok(),
        values,
    })
}

use anyhow::{Context, Result};
use gdal::raster::Buffer;
use gdal::spatial_ref::SpatialRef;
use gdal::DriverManager;
use std::path::Path;

use crate::model::RasterTile;

#[derive(Default)]
pub struct GeoTiffWriter {}

impl GeoTiffWriter {
    pub fn new() -> Self {
        Self {}
    }

    pub fn write(&self, tile: &RasterTile, output_path: &Path) -> Result<()> {
        let (rows, cols) = tile.shape();
        anyhow::ensure!(
            tile.values.len() == rows * cols * tile.band_count,
            "Raster has {} values, expected {} ({} bands of {} x {})",
            tile.values.len(),
            rows * cols * tile.band_count,
            tile.band_count,
            cols,
            rows
        );

        tracing::info!(
            "Writing raster to GeoTIFF: {} x {} pixels, {} band(s)",
            cols,
            rows,
            tile.band_count
        );

        // GTiffドライバーを取得
        let driver =
            DriverManager::get_driver_by_name("GTiff").context("Failed to get GTiff driver")?;

        // データセットを作成
        let mut dataset = driver
            .create_with_band_type::<f64, _>(output_path, cols, rows, tile.band_count)
            .context("Failed to create dataset")?;

        self.set_geo_metadata(&mut dataset, tile)?;

        // バンドごとに書き込み
        for index in 0..tile.band_count {
            let values = tile
                .band(index)
                .with_context(|| format!("Missing values for band {}", index + 1))?;

            let mut band = dataset
                .rasterband(index + 1)
                .with_context(|| format!("Failed to get raster band {}", index + 1))?;

            if let Some(no_data) = tile.no_data {
                band.set_no_data_value(Some(no_data))
                    .context("Failed to set no data value")?;
            }

            let mut buffer = Buffer::new((cols, rows), values.to_vec());
            band.write((0, 0), (cols, rows), &mut buffer)
                .with_context(|| format!("Failed to write band {}", index + 1))?;
        }

        Ok(())
    }

    fn set_geo_metadata(&self, dataset: &mut gdal::Dataset, tile: &RasterTile) -> Result<()> {
        // ジオトランスフォームを設定
        dataset
            .set_geo_transform(&tile.geo_transform())
            .context("Failed to set geo transform")?;

        // 座標系を設定
        if let Some(epsg) = tile.epsg() {
            let srs = SpatialRef::from_epsg(epsg)
                .context(format!("Failed to create SpatialRef from EPSG:{}", epsg))?;
            let wkt = srs
                .to_wkt()
                .context("Failed to convert SpatialRef to WKT")?;
            dataset
                .set_projection(&wkt)
                .context("Failed to set projection")?;
        } else if let Some(wkt) = tile
            .spatial_reference
            .as_ref()
            .and_then(|sr| sr.wkt.as_deref())
        {
            dataset
                .set_projection(wkt)
                .context("Failed to set projection")?;
        } else {
            // EPSGコードもWKTも無い場合は警告
            tracing::warn!("Raster has no usable spatial reference; writing without projection");
        }

        Ok(())
    }
}

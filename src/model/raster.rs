use super::geometry::{Envelope, SpatialReference};

/// イメージサービスから取得したグリッド
/// 値はバンドごとに並び、各バンドは左上から行優先で格納する
#[derive(Debug, Clone, PartialEq)]
pub struct RasterTile {
    pub width: usize,
    pub height: usize,
    pub band_count: usize,
    pub extent: Envelope,
    pub spatial_reference: Option<SpatialReference>,
    pub no_data: Option<f64>,
    pub values: Vec<f64>,
}

/// 1バンドの統計（NoData は除く）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub valid_count: usize,
}

impl RasterTile {
    /// (行数, 列数)
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn x_res(&self) -> f64 {
        self.extent.width() / self.width as f64
    }

    pub fn y_res(&self) -> f64 {
        self.extent.height() / self.height as f64
    }

    /// GDAL形式のジオトランスフォーム（北が上）
    pub fn geo_transform(&self) -> [f64; 6] {
        [
            self.extent.xmin,
            self.x_res(),
            0.0,
            self.extent.ymax,
            0.0,
            -self.y_res(),
        ]
    }

    /// EPSGコード（タイル自身の値がなければ範囲の空間参照系から）
    pub fn epsg(&self) -> Option<u32> {
        self.spatial_reference
            .as_ref()
            .or(self.extent.spatial_reference.as_ref())
            .and_then(SpatialReference::epsg)
    }

    pub fn band(&self, index: usize) -> Option<&[f64]> {
        if index >= self.band_count {
            return None;
        }
        let size = self.width * self.height;
        self.values.get(index * size..(index + 1) * size)
    }

    pub fn get(&self, band: usize, row: usize, col: usize) -> Option<f64> {
        if row >= self.height || col >= self.width {
            return None;
        }
        self.band(band).map(|b| b[row * self.width + col])
    }

    fn is_no_data(&self, value: f64) -> bool {
        value.is_nan() || self.no_data.is_some_and(|nd| value == nd)
    }

    pub fn band_stats(&self, index: usize) -> Option<BandStats> {
        let band = self.band(index)?;

        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        let mut valid_count = 0;

        for &value in band {
            if self.is_no_data(value) {
                continue;
            }
            min = min.min(value);
            max = max.max(value);
            sum += value;
            valid_count += 1;
        }

        if valid_count == 0 {
            return None;
        }

        Some(BandStats {
            min,
            max,
            mean: sum / valid_count as f64,
            valid_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_tile() -> RasterTile {
        RasterTile {
            width: 3,
            height: 2,
            band_count: 2,
            extent: Envelope::new(135.0, 35.0, 135.003, 35.002),
            spatial_reference: Some(SpatialReference::from_wkid(4326)),
            no_data: Some(-9999.0),
            values: vec![
                100.0, 101.0, 102.0, 103.0, -9999.0, 105.0, // band 0
                1.0, 2.0, 3.0, 4.0, 5.0, 6.0, // band 1
            ],
        }
    }

    #[test]
    fn test_geo_transform() {
        let tile = create_test_tile();
        let transform = tile.geo_transform();
        assert_eq!(transform[0], 135.0);
        assert!((transform[1] - 0.001).abs() < 1e-12);
        assert_eq!(transform[3], 35.002);
        assert!((transform[5] + 0.001).abs() < 1e-12);
    }

    #[test]
    fn test_band_access() {
        let tile = create_test_tile();
        assert_eq!(tile.shape(), (2, 3));
        assert_eq!(tile.band(1).unwrap(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(tile.get(0, 1, 2), Some(105.0));
        assert_eq!(tile.get(1, 0, 1), Some(2.0));
        assert!(tile.band(2).is_none());
        assert!(tile.get(0, 2, 0).is_none());
    }

    #[test]
    fn test_band_stats_skip_no_data() {
        let tile = create_test_tile();
        let stats = tile.band_stats(0).unwrap();
        assert_eq!(stats.valid_count, 5);
        assert_eq!(stats.min, 100.0);
        assert_eq!(stats.max, 105.0);
        assert!((stats.mean - 102.2).abs() < 1e-9);
    }

    #[test]
    fn test_epsg_falls_back_to_extent() {
        let mut tile = create_test_tile();
        tile.spatial_reference = None;
        assert_eq!(tile.epsg(), None);
        tile.extent = tile
            .extent
            .clone()
            .with_spatial_reference(SpatialReference::from_wkid(102100));
        assert_eq!(tile.epsg(), Some(3857));
    }
}

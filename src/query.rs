use crate::http::Params;
use crate::model::Envelope;

/// フィーチャクエリの条件
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// サーバー側で評価される where 句
    pub where_clause: String,
    /// None なら全列
    pub out_fields: Option<Vec<String>>,
    pub return_geometry: bool,
    /// 範囲で絞り込む空間フィルター（intersects）
    pub filter_extent: Option<Envelope>,
    pub out_sr: Option<u32>,
    pub order_by: Option<String>,
    /// 取得する最大件数（None なら全件をページングで取得）
    pub max_records: Option<usize>,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            where_clause: "1=1".to_string(),
            out_fields: None,
            return_geometry: true,
            filter_extent: None,
            out_sr: None,
            order_by: None,
            max_records: None,
        }
    }
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn where_clause(mut self, predicate: impl Into<String>) -> Self {
        let predicate = predicate.into();
        self.where_clause = if predicate.trim().is_empty() {
            "1=1".to_string()
        } else {
            predicate
        };
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        // 空白を除き、空の指定は全列（None）として扱う
        let fields: Vec<String> = fields
            .into_iter()
            .map(|f| f.into().trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();
        self.out_fields = if fields.is_empty() { None } else { Some(fields) };
        self
    }

    pub fn geometry(mut self, return_geometry: bool) -> Self {
        self.return_geometry = return_geometry;
        self
    }

    pub fn intersecting(mut self, extent: Envelope) -> Self {
        self.filter_extent = Some(extent);
        self
    }

    pub fn out_sr(mut self, wkid: u32) -> Self {
        self.out_sr = Some(wkid);
        self
    }

    pub fn order_by(mut self, clause: impl Into<String>) -> Self {
        self.order_by = Some(clause.into());
        self
    }

    pub fn limit(mut self, max_records: usize) -> Self {
        self.max_records = Some(max_records);
        self
    }

    /// 列を絞り込む場合のみ列名を返す（未指定・空・`*` は全列）
    pub(crate) fn projection(&self) -> Option<&[String]> {
        match &self.out_fields {
            Some(fields) if !fields.is_empty() && !fields.iter().any(|f| f == "*") => {
                Some(fields.as_slice())
            }
            _ => None,
        }
    }

    pub(crate) fn out_fields_param(&self) -> String {
        match self.projection() {
            Some(fields) => fields.join(","),
            None => "*".to_string(),
        }
    }

    /// 1ページ分のクエリパラメータ
    pub(crate) fn to_params(&self, offset: usize, page_size: Option<usize>) -> Params {
        let mut params: Params = vec![
            ("where".into(), self.where_clause.clone()),
            ("outFields".into(), self.out_fields_param()),
            ("returnGeometry".into(), self.return_geometry.to_string()),
        ];

        if let Some(extent) = &self.filter_extent {
            params.push(("geometry".into(), extent.to_param()));
            params.push(("geometryType".into(), "esriGeometryEnvelope".into()));
            params.push(("spatialRel".into(), "esriSpatialRelIntersects".into()));
            if let Some(wkid) = extent.spatial_reference.as_ref().and_then(|sr| sr.wkid) {
                params.push(("inSR".into(), wkid.to_string()));
            }
        }
        if let Some(wkid) = self.out_sr {
            params.push(("outSR".into(), wkid.to_string()));
        }
        if let Some(order_by) = &self.order_by {
            params.push(("orderByFields".into(), order_by.clone()));
        }
        if offset > 0 {
            params.push(("resultOffset".into(), offset.to_string()));
        }
        if let Some(size) = page_size {
            params.push(("resultRecordCount".into(), size.to_string()));
        }
        params
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelType {
    U8,
    S16,
    U16,
    S32,
    F32,
    F64,
}

impl PixelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PixelType::U8 => "U8",
            PixelType::S16 => "S16",
            PixelType::U16 => "U16",
            PixelType::S32 => "S32",
            PixelType::F32 => "F32",
            PixelType::F64 => "F64",
        }
    }
}

/// ラスタ取得の条件
#[derive(Debug, Clone, PartialEq)]
pub struct RasterRequest {
    /// サービスの座標系での範囲
    pub bbox: Envelope,
    /// 出力サイズ (width, height)
    pub size: (u32, u32),
    pub pixel_type: Option<PixelType>,
    pub no_data: Option<f64>,
    pub band_ids: Option<Vec<u32>>,
}

impl RasterRequest {
    pub const DEFAULT_SIZE: (u32, u32) = (400, 400);

    pub fn new(bbox: Envelope) -> Self {
        Self {
            bbox,
            size: Self::DEFAULT_SIZE,
            pixel_type: None,
            no_data: None,
            band_ids: None,
        }
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.size = (width, height);
        self
    }

    pub fn pixel_type(mut self, pixel_type: PixelType) -> Self {
        self.pixel_type = Some(pixel_type);
        self
    }

    pub fn no_data(mut self, value: f64) -> Self {
        self.no_data = Some(value);
        self
    }

    pub fn bands(mut self, band_ids: Vec<u32>) -> Self {
        self.band_ids = Some(band_ids);
        self
    }

    pub(crate) fn to_params(&self) -> Params {
        let mut params: Params = vec![
            ("bbox".into(), self.bbox.to_param()),
            ("size".into(), format!("{},{}", self.size.0, self.size.1)),
            ("format".into(), "tiff".into()),
        ];
        if let Some(wkid) = self.bbox.spatial_reference.as_ref().and_then(|sr| sr.wkid) {
            params.push(("bboxSR".into(), wkid.to_string()));
            params.push(("imageSR".into(), wkid.to_string()));
        }
        if let Some(pixel_type) = self.pixel_type {
            params.push(("pixelType".into(), pixel_type.as_str().into()));
        }
        if let Some(no_data) = self.no_data {
            params.push(("noData".into(), no_data.to_string()));
        }
        if let Some(bands) = &self.band_ids {
            let ids: Vec<String> = bands.iter().map(u32::to_string).collect();
            params.push(("bandIds".into(), ids.join(",")));
        }
        params
    }
}

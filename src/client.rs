use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::auth::Session;
use crate::config::Config;
use crate::dataset::LocalDataset;
use crate::error::{Result, ServiceError};
use crate::http::{FilePart, HttpClient, Params, ReqwestClient};
use crate::model::{
    EditOutcome, EditResult, Envelope, Feature, FeatureLayer, FeatureService, FeatureServiceInfo,
    FeatureSet, Field, ImageService, ImageServiceInfo, LayerInfo, PublishOutcome, RasterTile,
    Service,
};
use crate::query::{Query, RasterRequest};
use crate::reader::decode_tiff;

/// URL の末尾から推定したリソースの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UrlKind {
    FeatureServer,
    ImageServer,
    Layer,
    Unknown,
}

/// クエリ文字列を除き、末尾の `/` を落としたURLと種類を返す
pub(crate) fn classify_url(url: &str) -> Result<(String, UrlKind)> {
    let mut parsed = Url::parse(url.trim())
        .map_err(|e| ServiceError::Query(format!("Invalid service URL '{}': {}", url, e)))?;
    parsed.set_query(None);
    parsed.set_fragment(None);

    let segments: Vec<String> = parsed
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).map(str::to_string).collect())
        .unwrap_or_default();

    let kind = match segments.as_slice() {
        [.., last] if last.eq_ignore_ascii_case("FeatureServer") => UrlKind::FeatureServer,
        [.., last] if last.eq_ignore_ascii_case("MapServer") => UrlKind::FeatureServer,
        [.., last] if last.eq_ignore_ascii_case("ImageServer") => UrlKind::ImageServer,
        [.., server, id]
            if id.parse::<u32>().is_ok()
                && (server.eq_ignore_ascii_case("FeatureServer")
                    || server.eq_ignore_ascii_case("MapServer")) =>
        {
            UrlKind::Layer
        }
        _ => UrlKind::Unknown,
    };

    Ok((parsed.as_str().trim_end_matches('/').to_string(), kind))
}

/// GDAL のジオトランスフォームから範囲を求める（北が上の画像のみ）
fn extent_from_transform(gt: &[f64; 6], width: usize, height: usize) -> Envelope {
    let x2 = gt[0] + gt[1] * width as f64;
    let y2 = gt[3] + gt[5] * height as f64;
    Envelope::new(gt[0].min(x2), gt[3].min(y2), gt[0].max(x2), gt[3].max(y2))
}

#[derive(Deserialize)]
struct CountResponse {
    count: u64,
}

#[derive(Deserialize)]
struct ExportImageResponse {
    href: String,
    extent: Option<Envelope>,
}

#[derive(Deserialize, Default)]
struct EditResponse {
    #[serde(rename = "addResults", default)]
    add: Vec<EditResult>,
    #[serde(rename = "updateResults", default)]
    update: Vec<EditResult>,
    #[serde(rename = "deleteResults", default)]
    delete: Vec<EditResult>,
}

#[derive(Deserialize)]
struct AddItemResponse {
    #[serde(default)]
    success: bool,
    id: Option<String>,
}

#[derive(Deserialize)]
struct PublishedService {
    #[serde(rename = "serviceurl")]
    service_url: Option<String>,
    #[serde(rename = "serviceItemId")]
    service_item_id: Option<String>,
    error: Option<Value>,
}

#[derive(Deserialize)]
struct PublishResponse {
    #[serde(default)]
    services: Vec<PublishedService>,
}

/// フィーチャサービスとイメージサービスのクライアント
/// セッションは生成時に渡し、すべての呼び出しで使う
pub struct Client<C: HttpClient = ReqwestClient> {
    http: C,
    session: Session,
}

impl Client<ReqwestClient> {
    /// reqwest のクライアントを作り、認証情報があれば認証する
    pub fn from_config(config: &Config) -> Result<Self> {
        let http = ReqwestClient::with_timeout(config.timeout_secs)?;
        let session = match &config.credentials {
            Some(credentials) => Session::authenticate(&http, &config.host, credentials)?,
            None => {
                warn!("No credentials configured; only public services are reachable");
                Session::anonymous(&config.host)
            }
        };
        Ok(Self::new(http, session))
    }
}

impl<C: HttpClient> Client<C> {
    pub fn new(http: C, session: Session) -> Self {
        Self { http, session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn http(&self) -> &C {
        &self.http
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str, params: Params) -> Result<T> {
        let params = self.session.params(params)?;
        crate::response::parse_json(self.http.get(url, &params)?)
    }

    fn post_json<T: DeserializeOwned>(&self, url: &str, params: Params) -> Result<T> {
        let params = self.session.params(params)?;
        crate::response::parse_json(self.http.post_form(url, &params)?)
    }

    /// サービスを開いてメタデータを読む
    pub fn open(&self, url: &str) -> Result<Service> {
        let (url, kind) = classify_url(url)?;
        if kind == UrlKind::Layer {
            return Err(ServiceError::Query(format!(
                "{} points at a single layer; open it with open_layer",
                url
            )));
        }

        let value: Value = self.get_json(&url, Vec::new())?;

        // URL から判別できなければ応答の形で判断する
        let is_image = match kind {
            UrlKind::ImageServer => true,
            UrlKind::FeatureServer => false,
            _ => value.get("layers").is_none() && value.get("pixelSizeX").is_some(),
        };

        let service = if is_image {
            let info: ImageServiceInfo = serde_json::from_value(value)?;
            Service::Image(ImageService { url, info })
        } else if kind == UrlKind::FeatureServer || value.get("layers").is_some() {
            let info: FeatureServiceInfo = serde_json::from_value(value)?;
            Service::Feature(FeatureService { url, info })
        } else {
            return Err(ServiceError::Query(format!(
                "{} is neither a feature service nor an image service",
                url
            )));
        };

        info!(url = %service.url(), kind = service.kind_name(), "opened service");
        Ok(service)
    }

    /// レイヤーまたはテーブルを URL で開く（`.../FeatureServer/0`）
    pub fn open_layer(&self, url: &str) -> Result<FeatureLayer> {
        let (url, _) = classify_url(url)?;
        let info: LayerInfo = self.get_json(&url, Vec::new())?;
        debug!(url = %url, name = %info.name, fields = info.fields.len(), "opened layer");
        Ok(FeatureLayer { url, info })
    }

    pub fn list_layers(&self, service: &FeatureService) -> Result<Vec<FeatureLayer>> {
        service
            .layer_summaries()
            .map(|summary| self.open_layer(&service.layer_url(summary.id)))
            .collect()
    }

    pub fn list_fields<'a>(&self, layer: &'a FeatureLayer) -> &'a [Field] {
        layer.fields()
    }

    fn check_fields(&self, layer: &FeatureLayer, query: &Query) -> Result<()> {
        let Some(fields) = query.projection() else {
            return Ok(());
        };
        if layer.fields().is_empty() {
            return Ok(());
        }
        for name in fields {
            if layer.info.field(name).is_none() {
                return Err(ServiceError::Query(format!(
                    "Unknown field '{}' in layer '{}'",
                    name,
                    layer.name()
                )));
            }
        }
        Ok(())
    }

    /// クエリを実行し、`exceededTransferLimit` が立つ間ページを辿る
    pub fn select(&self, layer: &FeatureLayer, query: &Query) -> Result<FeatureSet> {
        self.check_fields(layer, query)?;

        let url = format!("{}/query", layer.url);
        let oid_field = layer.object_id_field().map(str::to_string);
        let mut result = FeatureSet::default();
        let mut seen: HashSet<i64> = HashSet::new();
        let mut offset = 0;

        loop {
            let page_size = query.max_records.map(|max| max - result.len());
            let page: FeatureSet = self.get_json(&url, query.to_params(offset, page_size))?;
            let received = page.len();
            let more = page.exceeded_transfer_limit;

            // resultOffset を無視するサーバーは同じページを返し続ける
            let ids: Vec<i64> = match oid_field.as_deref().or(page.object_id_field.as_deref()) {
                Some(oid) => page.features.iter().filter_map(|f| f.object_id(oid)).collect(),
                None => Vec::new(),
            };
            let repeated = if offset == 0 || received == 0 {
                false
            } else if ids.is_empty() {
                page.features.first() == result.features.first()
            } else {
                ids.iter().all(|id| seen.contains(id))
            };
            if repeated {
                warn!(layer = %layer.name(), offset = offset, "server ignored resultOffset");
                return Err(ServiceError::InvalidResponse(format!(
                    "Layer '{}' returned the same page again at offset {}; narrow the query or set a limit",
                    layer.name(),
                    offset
                )));
            }
            seen.extend(ids);

            result.extend(page);
            offset += received;

            debug!(layer = %layer.name(), received = received, total = result.len(), "query page");

            let reached_max = query.max_records.is_some_and(|max| result.len() >= max);
            if !more || received == 0 || reached_max {
                break;
            }
            if layer.info.supports_pagination() == Some(false) {
                return Err(ServiceError::Query(format!(
                    "Layer '{}' does not support pagination and the result exceeds {} rows; narrow the query or set a limit",
                    layer.name(),
                    received
                )));
            }
        }

        if let Some(max) = query.max_records {
            result.features.truncate(max);
        }
        result.exceeded_transfer_limit = false;

        if result.object_id_field.is_none() {
            result.object_id_field = oid_field;
        }
        if let Some(fields) = query.projection() {
            result.retain_columns(fields);
        }
        if !query.return_geometry {
            for feature in &mut result.features {
                feature.geometry = None;
            }
        }

        info!(layer = %layer.name(), rows = result.len(), "select finished");
        Ok(result)
    }

    pub fn count(&self, layer: &FeatureLayer, where_clause: &str) -> Result<u64> {
        let query = Query::new().where_clause(where_clause);
        let params: Params = vec![
            ("where".into(), query.where_clause),
            ("returnCountOnly".into(), "true".into()),
        ];
        let response: CountResponse = self.get_json(&format!("{}/query", layer.url), params)?;
        Ok(response.count)
    }

    /// `request.bbox` の範囲のラスタを取得する
    pub fn fetch_raster(&self, image: &ImageService, request: &RasterRequest) -> Result<RasterTile> {
        let bbox = &request.bbox;
        if !bbox.is_valid() {
            return Err(ServiceError::Range(format!(
                "Bounding box {} is empty or not finite",
                bbox.to_param()
            )));
        }

        let service_epsg = image.spatial_reference().and_then(|sr| sr.epsg());
        let bbox_epsg = bbox.spatial_reference.as_ref().and_then(|sr| sr.epsg());
        let same_crs = bbox_epsg.is_none() || service_epsg.is_none() || bbox_epsg == service_epsg;
        if same_crs && !image.extent().intersects(bbox) {
            return Err(ServiceError::Range(format!(
                "Bounding box {} lies outside the service extent {}",
                bbox.to_param(),
                image.extent().to_param()
            )));
        }

        let (width, height) = request.size;
        if width == 0 || height == 0 {
            return Err(ServiceError::Query("Image size must be positive".to_string()));
        }
        let too_wide = image.info.max_image_width.is_some_and(|max| width > max);
        let too_tall = image.info.max_image_height.is_some_and(|max| height > max);
        if too_wide || too_tall {
            return Err(ServiceError::Query(format!(
                "Image size {}x{} exceeds the service limit",
                width, height
            )));
        }

        let export: ExportImageResponse =
            self.get_json(&format!("{}/exportImage", image.url), request.to_params())?;
        debug!(href = %export.href, "downloading exported image");

        let mut params = Params::new();
        if let Some(token) = self.session.token_value()? {
            params.push(("token".into(), token.to_string()));
        }
        let response = self.http.get(&export.href, &params)?;
        if !response.is_success() {
            return Err(ServiceError::from_remote(
                response.status as i64,
                format!("Failed to download exported image from {}", export.href),
            ));
        }

        let decoded = decode_tiff(response.body)?;
        let from_transform = decoded
            .geo_transform
            .map(|gt| extent_from_transform(&gt, decoded.width, decoded.height));
        let mut extent = match (export.extent, from_transform) {
            (Some(reported), Some(actual)) => {
                let tolerance = actual.width() / decoded.width as f64;
                if (reported.xmin - actual.xmin).abs() > tolerance
                    || (reported.ymax - actual.ymax).abs() > tolerance
                {
                    warn!(
                        reported = %reported.to_param(),
                        actual = %actual.to_param(),
                        "exported extent does not match the TIFF georeferencing"
                    );
                }
                reported
            }
            (Some(reported), None) => reported,
            (None, Some(actual)) => actual,
            (None, None) => bbox.clone(),
        };

        // 出力画像の座標系: 応答の範囲 > 要求した bbox > サービス
        let spatial_reference = extent
            .spatial_reference
            .clone()
            .or_else(|| bbox.spatial_reference.clone())
            .or_else(|| image.spatial_reference().cloned());
        if extent.spatial_reference.is_none() {
            extent.spatial_reference = spatial_reference.clone();
        }

        let tile = RasterTile {
            width: decoded.width,
            height: decoded.height,
            band_count: decoded.band_count,
            extent,
            spatial_reference,
            no_data: request
                .no_data
                .or(decoded.no_data)
                .or(image.info.no_data_value),
            values: decoded.values,
        };

        // 別の座標系の bbox は事前に範囲判定できないため、結果で判定する
        if !same_crs && (0..tile.band_count).all(|band| tile.band_stats(band).is_none()) {
            return Err(ServiceError::Range(format!(
                "Bounding box {} returned only no-data pixels; it lies outside the service extent {}",
                bbox.to_param(),
                image.extent().to_param()
            )));
        }

        info!(
            url = %image.url,
            width = tile.width,
            height = tile.height,
            bands = tile.band_count,
            epsg = ?tile.epsg(),
            "fetched raster"
        );
        Ok(tile)
    }

    /// ローカルのデータセットをアップロードし、ホストレイヤーとして公開する
    pub fn publish(&self, dataset: &LocalDataset, name: &str) -> Result<PublishOutcome> {
        self.session.require_token()?;
        if name.trim().is_empty() {
            return Err(ServiceError::Query("Layer name must not be empty".to_string()));
        }
        let username = self.session.username(&self.http)?;

        // 1. 元データをアイテムとしてアップロード
        let add_url = self
            .session
            .sharing_url(&format!("content/users/{}/addItem", username));
        let params = self.session.params(vec![
            ("title".into(), name.to_string()),
            ("type".into(), dataset.kind.item_type().into()),
            ("filename".into(), dataset.file_name()),
        ])?;
        let file = FilePart {
            field: "file".into(),
            file_name: dataset.file_name(),
            mime: dataset.kind.mime().into(),
            bytes: dataset.bytes.clone(),
        };
        let added: AddItemResponse =
            crate::response::parse_json(self.http.post_multipart(&add_url, &params, file)?)?;
        let item_id = match (added.success, added.id) {
            (true, Some(id)) => id,
            _ => {
                return Err(ServiceError::InvalidResponse(
                    "addItem did not return an item id".to_string(),
                ))
            }
        };
        debug!(item_id = %item_id, "uploaded dataset");

        // 2. アイテムからフィーチャレイヤーを公開
        let publish_url = self
            .session
            .sharing_url(&format!("content/users/{}/publish", username));
        let publish_parameters = json!({ "name": name, "maxRecordCount": 2000 });
        let published: PublishResponse = self.post_json(
            &publish_url,
            vec![
                ("itemID".into(), item_id.clone()),
                ("filetype".into(), dataset.kind.file_type().into()),
                ("publishParameters".into(), publish_parameters.to_string()),
            ],
        )?;

        let service = published.services.into_iter().next().ok_or_else(|| {
            ServiceError::InvalidResponse("publish returned no services".to_string())
        })?;
        if let Some(error) = service.error.filter(|e| !e.is_null()) {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(500);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Publishing failed");
            return Err(ServiceError::from_remote(code, message));
        }
        let service_url = service.service_url.ok_or_else(|| {
            ServiceError::InvalidResponse("publish returned no service URL".to_string())
        })?;

        info!(name = %name, url = %service_url, "published layer");
        Ok(PublishOutcome {
            item_id,
            service_item_id: service.service_item_id,
            service_url,
        })
    }

    pub fn add_features(&self, layer: &FeatureLayer, features: &[Feature]) -> Result<EditOutcome> {
        if features.is_empty() {
            return Ok(EditOutcome::default());
        }
        let response = self.apply(layer, "addFeatures", features)?;
        Ok(self.outcome(layer, "add", response.add))
    }

    /// 既存の行を更新する（オブジェクト ID 必須）
    pub fn update_features(
        &self,
        layer: &FeatureLayer,
        features: &[Feature],
    ) -> Result<EditOutcome> {
        let oid = layer.object_id_field().ok_or_else(|| {
            ServiceError::Query(format!(
                "Layer '{}' has no object id field; rows cannot be targeted",
                layer.name()
            ))
        })?;
        for (i, feature) in features.iter().enumerate() {
            if feature.object_id(oid).is_none() {
                return Err(ServiceError::Query(format!(
                    "Row {} has no '{}' value; updates must identify the record",
                    i, oid
                )));
            }
        }
        if features.is_empty() {
            return Ok(EditOutcome::default());
        }

        let response = self.apply(layer, "updateFeatures", features)?;
        Ok(self.outcome(layer, "update", response.update))
    }

    pub fn delete_features(&self, layer: &FeatureLayer, object_ids: &[i64]) -> Result<EditOutcome> {
        if object_ids.is_empty() {
            return Ok(EditOutcome::default());
        }
        let ids: Vec<String> = object_ids.iter().map(i64::to_string).collect();
        let response: EditResponse = self.post_json(
            &format!("{}/deleteFeatures", layer.url),
            vec![("objectIds".into(), ids.join(","))],
        )?;
        Ok(self.outcome(layer, "delete", response.delete))
    }

    fn apply(&self, layer: &FeatureLayer, operation: &str, features: &[Feature]) -> Result<EditResponse> {
        let payload = serde_json::to_string(features)?;
        self.post_json(
            &format!("{}/{}", layer.url, operation),
            vec![
                ("features".into(), payload),
                ("rollbackOnFailure".into(), "true".into()),
            ],
        )
    }

    fn outcome(&self, layer: &FeatureLayer, operation: &str, results: Vec<EditResult>) -> EditOutcome {
        let outcome = EditOutcome { results };
        let failed = outcome.failed().count();
        if failed > 0 {
            warn!(layer = %layer.name(), operation = operation, failed = failed, "some edits failed");
        }
        info!(layer = %layer.name(), operation = operation, records = outcome.len(), "edit applied");
        outcome
    }
}

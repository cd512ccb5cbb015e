use serde::{Deserialize, Serialize};

use super::field::{Field, FieldType};
use super::geometry::{Envelope, GeometryType, SpatialReference};

/// サービスのルートに列挙されるレイヤー／テーブル
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSummary {
    pub id: u32,
    pub name: String,
    #[serde(
        rename = "geometryType",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub geometry_type: Option<GeometryType>,
}

/// フィーチャサービスのメタデータ（`.../FeatureServer?f=json`）
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureServiceInfo {
    #[serde(rename = "currentVersion", default)]
    pub current_version: Option<f64>,
    #[serde(rename = "serviceDescription", default)]
    pub description: Option<String>,
    #[serde(default)]
    pub layers: Vec<LayerSummary>,
    #[serde(default)]
    pub tables: Vec<LayerSummary>,
    #[serde(rename = "spatialReference", default)]
    pub spatial_reference: Option<SpatialReference>,
    #[serde(default)]
    pub capabilities: Option<String>,
    #[serde(rename = "maxRecordCount", default)]
    pub max_record_count: Option<u32>,
}

/// イメージサービスのメタデータ（`.../ImageServer?f=json`）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageServiceInfo {
    #[serde(default)]
    pub name: Option<String>,
    pub extent: Envelope,
    #[serde(rename = "pixelSizeX", default)]
    pub pixel_size_x: Option<f64>,
    #[serde(rename = "pixelSizeY", default)]
    pub pixel_size_y: Option<f64>,
    #[serde(rename = "bandCount", default)]
    pub band_count: Option<u32>,
    #[serde(rename = "pixelType", default)]
    pub pixel_type: Option<String>,
    #[serde(rename = "spatialReference", default)]
    pub spatial_reference: Option<SpatialReference>,
    #[serde(rename = "noDataValue", default)]
    pub no_data_value: Option<f64>,
    #[serde(rename = "maxImageWidth", default)]
    pub max_image_width: Option<u32>,
    #[serde(rename = "maxImageHeight", default)]
    pub max_image_height: Option<u32>,
}

/// レイヤーまたはテーブルのメタデータ（`.../FeatureServer/0?f=json`）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerInfo {
    pub id: u32,
    pub name: String,
    #[serde(rename = "type", default)]
    pub layer_type: Option<String>,
    #[serde(rename = "geometryType", default)]
    pub geometry_type: Option<GeometryType>,
    #[serde(rename = "objectIdField", default)]
    pub object_id_field: Option<String>,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default)]
    pub capabilities: Option<String>,
    #[serde(rename = "maxRecordCount", default)]
    pub max_record_count: Option<u32>,
    #[serde(default)]
    pub extent: Option<Envelope>,
    #[serde(rename = "advancedQueryCapabilities", default)]
    pub advanced_query: Option<AdvancedQueryCapabilities>,
}

/// クエリの拡張機能（ページングなど）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdvancedQueryCapabilities {
    #[serde(rename = "supportsPagination", default)]
    pub supports_pagination: Option<bool>,
}

impl LayerInfo {
    /// 明示されていなければ None（古いサーバーは項目自体を返さない）
    pub fn supports_pagination(&self) -> Option<bool> {
        self.advanced_query
            .as_ref()
            .and_then(|a| a.supports_pagination)
    }

    /// objectIdField が無い古いサービスでは OID 型の列から求める
    pub fn object_id_field(&self) -> Option<&str> {
        self.object_id_field.as_deref().or_else(|| {
            self.fields
                .iter()
                .find(|f| f.field_type == FieldType::ObjectId)
                .map(|f| f.name.as_str())
        })
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.matches(name))
    }
}

fn has_capability(capabilities: Option<&str>, name: &str) -> bool {
    capabilities
        .map(|c| c.split(',').any(|cap| cap.trim().eq_ignore_ascii_case(name)))
        .unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureService {
    pub url: String,
    pub info: FeatureServiceInfo,
}

impl FeatureService {
    pub fn layer_url(&self, id: u32) -> String {
        format!("{}/{}", self.url, id)
    }

    /// 公開されているレイヤーとテーブル（サービス順）
    pub fn layer_summaries(&self) -> impl Iterator<Item = &LayerSummary> {
        self.info.layers.iter().chain(self.info.tables.iter())
    }

    pub fn layer_count(&self) -> usize {
        self.info.layers.len() + self.info.tables.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageService {
    pub url: String,
    pub info: ImageServiceInfo,
}

impl ImageService {
    pub fn extent(&self) -> &Envelope {
        &self.info.extent
    }

    pub fn spatial_reference(&self) -> Option<&SpatialReference> {
        self.info
            .spatial_reference
            .as_ref()
            .or(self.info.extent.spatial_reference.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureLayer {
    pub url: String,
    pub info: LayerInfo,
}

impl FeatureLayer {
    pub fn id(&self) -> u32 {
        self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn fields(&self) -> &[Field] {
        &self.info.fields
    }

    pub fn object_id_field(&self) -> Option<&str> {
        self.info.object_id_field()
    }

    pub fn supports(&self, capability: &str) -> bool {
        has_capability(self.info.capabilities.as_deref(), capability)
    }
}

/// 開いたサービスの種類
#[derive(Debug, Clone, PartialEq)]
pub enum Service {
    Feature(FeatureService),
    Image(ImageService),
}

impl Service {
    pub fn url(&self) -> &str {
        match self {
            Service::Feature(s) => &s.url,
            Service::Image(s) => &s.url,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Service::Feature(_) => "FeatureServer",
            Service::Image(_) => "ImageServer",
        }
    }

    pub fn into_feature(self) -> Option<FeatureService> {
        match self {
            Service::Feature(s) => Some(s),
            Service::Image(_) => None,
        }
    }

    pub fn into_image(self) -> Option<ImageService> {
        match self {
            Service::Image(s) => Some(s),
            Service::Feature(_) => None,
        }
    }
}

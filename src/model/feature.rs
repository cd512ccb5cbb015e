use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::field::Field;
use super::geometry::{Geometry, GeometryType, SpatialReference};

/// 1行分の属性とジオメトリ
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Feature {
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,
}

impl Feature {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    /// 属性値を取得（名前の大文字小文字は無視）
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name).or_else(|| {
            self.attributes
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v)
        })
    }

    pub fn object_id(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(Value::as_i64)
    }
}

/// クエリ結果
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureSet {
    #[serde(
        rename = "objectIdFieldName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub object_id_field: Option<String>,
    #[serde(
        rename = "geometryType",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub geometry_type: Option<GeometryType>,
    #[serde(
        rename = "spatialReference",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub spatial_reference: Option<SpatialReference>,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default)]
    pub features: Vec<Feature>,
    #[serde(rename = "exceededTransferLimit", default, skip_serializing)]
    pub exceeded_transfer_limit: bool,
}

impl FeatureSet {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn columns(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn has_geometry(&self) -> bool {
        self.features.iter().any(|f| f.geometry.is_some())
    }

    /// 列の値を行順に返す
    pub fn column(&self, name: &str) -> Vec<Option<&Value>> {
        self.features.iter().map(|f| f.get(name)).collect()
    }

    pub fn object_ids(&self) -> Vec<i64> {
        match &self.object_id_field {
            Some(oid) => self
                .features
                .iter()
                .filter_map(|f| f.object_id(oid))
                .collect(),
            None => Vec::new(),
        }
    }

    /// 指定した列だけを残す
    pub fn retain_columns(&mut self, names: &[String]) {
        let keep = |name: &str| names.iter().any(|n| n.eq_ignore_ascii_case(name));
        self.fields.retain(|f| keep(&f.name));
        for feature in &mut self.features {
            feature.attributes.retain(|k, _| keep(k));
        }
    }

    /// ページングで得た次のページを連結する
    pub fn extend(&mut self, page: FeatureSet) {
        if self.fields.is_empty() {
            self.fields = page.fields;
        }
        if self.object_id_field.is_none() {
            self.object_id_field = page.object_id_field;
        }
        if self.geometry_type.is_none() {
            self.geometry_type = page.geometry_type;
        }
        if self.spatial_reference.is_none() {
            self.spatial_reference = page.spatial_reference;
        }
        self.features.extend(page.features);
        self.exceeded_transfer_limit = page.exceeded_transfer_limit;
    }
}

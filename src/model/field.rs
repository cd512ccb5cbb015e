use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 属性列の型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    #[serde(rename = "esriFieldTypeOID")]
    ObjectId,
    #[serde(rename = "esriFieldTypeGlobalID")]
    GlobalId,
    #[serde(rename = "esriFieldTypeGUID")]
    Guid,
    #[serde(rename = "esriFieldTypeString")]
    String,
    #[serde(rename = "esriFieldTypeSmallInteger")]
    SmallInteger,
    #[serde(rename = "esriFieldTypeInteger")]
    Integer,
    #[serde(rename = "esriFieldTypeBigInteger")]
    BigInteger,
    #[serde(rename = "esriFieldTypeSingle")]
    Single,
    #[serde(rename = "esriFieldTypeDouble")]
    Double,
    #[serde(rename = "esriFieldTypeDate")]
    Date,
    #[serde(rename = "esriFieldTypeGeometry")]
    Geometry,
    #[serde(rename = "esriFieldTypeBlob")]
    Blob,
    #[serde(rename = "esriFieldTypeRaster")]
    Raster,
    #[serde(rename = "esriFieldTypeXML")]
    Xml,
    #[serde(other)]
    Unknown,
}

impl FieldType {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldType::ObjectId
                | FieldType::SmallInteger
                | FieldType::Integer
                | FieldType::BigInteger
                | FieldType::Single
                | FieldType::Double
        )
    }
}

fn default_true() -> bool {
    true
}

/// 属性列の定義
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default = "default_true")]
    pub editable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<Value>,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            alias: None,
            length: None,
            nullable: true,
            editable: true,
            domain: None,
        }
    }

    /// フィールド名はサーバー側で大文字小文字を区別しない
    pub fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

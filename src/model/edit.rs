use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub description: String,
}

/// 1レコード分の編集結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditResult {
    #[serde(rename = "objectId", default)]
    pub object_id: Option<i64>,
    #[serde(rename = "globalId", default, skip_serializing_if = "Option::is_none")]
    pub global_id: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<EditError>,
}

/// 追加・更新・削除の各レコードの結果
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EditOutcome {
    pub results: Vec<EditResult>,
}

impl EditOutcome {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &EditResult> {
        self.results.iter().filter(|r| r.success)
    }

    pub fn failed(&self) -> impl Iterator<Item = &EditResult> {
        self.results.iter().filter(|r| !r.success)
    }

    /// 成功したレコードのID
    pub fn object_ids(&self) -> Vec<i64> {
        self.succeeded().filter_map(|r| r.object_id).collect()
    }
}

/// ローカルデータセットの公開結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishOutcome {
    /// アップロードした元データのアイテムID
    pub item_id: String,
    pub service_item_id: Option<String>,
    pub service_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_from_apply_edits_json() {
        let json = r#"[
            {"objectId": 11, "success": true},
            {"objectId": 12, "success": false,
             "error": {"code": 1019, "description": "Object is missing."}}
        ]"#;
        let results: Vec<EditResult> = serde_json::from_str(json).unwrap();
        let outcome = EditOutcome { results };

        assert_eq!(outcome.len(), 2);
        assert!(!outcome.all_succeeded());
        assert_eq!(outcome.object_ids(), vec![11]);

        let failed: Vec<_> = outcome.failed().collect();
        assert_eq!(failed[0].error.as_ref().unwrap().code, 1019);
    }
}

use thiserror::Error;

/// サービス呼び出しで発生するエラー
#[derive(Debug, Error)]
pub enum ServiceError {
    /// エンドポイントに到達できない、またはタイムアウト
    #[error("connection error: {0}")]
    Connection(String),

    /// トークンが無い、無効、期限切れ、または権限不足
    #[error("authentication error: {0}")]
    Auth(String),

    /// 不正な where 句、未知のフィールド、識別子の欠落など
    #[error("query error: {0}")]
    Query(String),

    /// バウンディングボックスがサービスの範囲外
    #[error("range error: {0}")]
    Range(String),

    /// 上記以外のサーバー側エラー
    #[error("service error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("raster error: {0}")]
    Raster(String),
}

impl ServiceError {
    /// サーバーが返したエラーコードを種別に振り分ける
    pub fn from_remote(code: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            401 | 403 | 498 | 499 => ServiceError::Auth(message),
            400 => ServiceError::Query(message),
            _ => ServiceError::Remote { code, message },
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ServiceError::Auth(_))
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(e: serde_json::Error) -> Self {
        ServiceError::InvalidResponse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_codes_map_to_kinds() {
        assert!(ServiceError::from_remote(498, "Invalid token.").is_auth());
        assert!(ServiceError::from_remote(499, "Token Required").is_auth());
        assert!(ServiceError::from_remote(403, "You do not have permissions").is_auth());
        assert!(matches!(
            ServiceError::from_remote(400, "Unable to complete operation."),
            ServiceError::Query(_)
        ));
        assert!(matches!(
            ServiceError::from_remote(500, "Internal"),
            ServiceError::Remote { code: 500, .. }
        ));
    }

    #[test]
    fn test_display_includes_message() {
        let err = ServiceError::from_remote(503, "Service unavailable");
        assert_eq!(err.to_string(), "service error 503: Service unavailable");
    }
}

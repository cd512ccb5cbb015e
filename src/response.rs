use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, ServiceError};
use crate::http::HttpResponse;

/// JSON 応答を型に変換する
///
/// サービスは HTTP 200 のまま `{"error": {...}}` を返すことがあるため、
/// ステータスより先に本文のエラーを確認する。
pub(crate) fn parse_json<T: DeserializeOwned>(response: HttpResponse) -> Result<T> {
    let value: Value = match serde_json::from_slice(&response.body) {
        Ok(value) => value,
        Err(e) => {
            if !response.is_success() {
                let text = String::from_utf8_lossy(&response.body);
                return Err(ServiceError::from_remote(
                    response.status as i64,
                    format!("HTTP {}: {}", response.status, text.trim()),
                ));
            }
            return Err(ServiceError::InvalidResponse(format!(
                "Expected JSON response: {}",
                e
            )));
        }
    };

    if value.get("error").is_some_and(|e| !e.is_null()) {
        return Err(remote_error(&value, response.status));
    }

    if !response.is_success() {
        return Err(ServiceError::from_remote(
            response.status as i64,
            format!("HTTP {}", response.status),
        ));
    }

    Ok(serde_json::from_value(value)?)
}

fn remote_error(body: &Value, status: u16) -> ServiceError {
    let error = &body["error"];

    // OAuth エンドポイントは文字列でエラーを返す
    if let Some(kind) = error.as_str() {
        let description = body
            .get("error_description")
            .and_then(Value::as_str)
            .unwrap_or(kind);
        return ServiceError::Auth(description.to_string());
    }

    let code = error
        .get("code")
        .and_then(Value::as_i64)
        .unwrap_or(status as i64);
    let mut message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("Unknown error")
        .to_string();

    let details: Vec<&str> = error
        .get("details")
        .and_then(Value::as_array)
        .map(|d| d.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    if !details.is_empty() {
        message = format!("{} ({})", message, details.join("; "));
    }

    debug!(code = code, message = %message, "service reported an error");
    ServiceError::from_remote(code, message)
}

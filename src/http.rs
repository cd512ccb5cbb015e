use crate::error::{Result, ServiceError};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// クエリ文字列またはフォームのパラメータ（送信順）
pub type Params = Vec<(String, String)>;

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn json(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            content_type: Some("application/json".to_string()),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// マルチパートで送るファイル
#[derive(Debug, Clone)]
pub struct FilePart {
    pub field: String,
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// 同期 HTTP クライアント
/// 2xx 以外も応答として返す（サービスはエラーを JSON で返すため）
pub trait HttpClient: Send + Sync {
    fn get(&self, url: &str, params: &[(String, String)]) -> Result<HttpResponse>;

    fn post_form(&self, url: &str, params: &[(String, String)]) -> Result<HttpResponse>;

    /// ファイルを1つ含むマルチパートの POST
    fn post_multipart(
        &self,
        url: &str,
        params: &[(String, String)],
        file: FilePart,
    ) -> Result<HttpResponse>;
}

const USER_AGENT: &str = concat!("geoservice/", env!("CARGO_PKG_VERSION"));

/// タイムアウト（秒）
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Clone)]
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT_SECS)
    }

    pub fn with_timeout(timeout_secs: u64) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ServiceError::Connection(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    fn finish(
        &self,
        url: &str,
        result: reqwest::Result<reqwest::blocking::Response>,
    ) -> Result<HttpResponse> {
        let response = result.map_err(|e| {
            warn!(
                url = url,
                error = %e,
                is_connect = e.is_connect(),
                is_timeout = e.is_timeout(),
                "HTTP request failed"
            );
            ServiceError::Connection(format!("Request to {} failed: {}", url, e))
        })?;

        let status = response.status().as_u16();
        debug!(url = url, status = status, "HTTP response received");

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response
            .bytes()
            .map_err(|e| ServiceError::Connection(format!("Failed to read response: {}", e)))?;
        trace!(url = url, bytes = body.len(), "HTTP response body read");

        Ok(HttpResponse {
            status,
            content_type,
            body: body.to_vec(),
        })
    }
}

impl HttpClient for ReqwestClient {
    fn get(&self, url: &str, params: &[(String, String)]) -> Result<HttpResponse> {
        trace!(url = url, "HTTP GET request starting");
        let result = self.client.get(url).query(params).send();
        self.finish(url, result)
    }

    fn post_form(&self, url: &str, params: &[(String, String)]) -> Result<HttpResponse> {
        trace!(url = url, "HTTP POST request starting");
        let result = self.client.post(url).form(params).send();
        self.finish(url, result)
    }

    fn post_multipart(
        &self,
        url: &str,
        params: &[(String, String)],
        file: FilePart,
    ) -> Result<HttpResponse> {
        trace!(url = url, file = %file.file_name, "HTTP multipart POST starting");

        let part = reqwest::blocking::multipart::Part::bytes(file.bytes)
            .file_name(file.file_name)
            .mime_str(&file.mime)
            .map_err(|e| ServiceError::Dataset(format!("Invalid MIME type: {}", e)))?;

        let mut form = reqwest::blocking::multipart::Form::new();
        for (key, value) in params {
            form = form.text(key.clone(), value.clone());
        }
        let form = form.part(file.field, part);

        let result = self.client.post(url).multipart(form).send();
        self.finish(url, result)
    }
}

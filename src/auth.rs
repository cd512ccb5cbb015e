use serde::Deserialize;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

use crate::error::{Result, ServiceError};
use crate::http::{HttpClient, Params};
use crate::response::parse_json;

/// 既定のポータル
pub const DEFAULT_HOST: &str = "https://www.arcgis.com";

/// generateToken で要求するトークンの有効期間（分）
const TOKEN_EXPIRATION_MINUTES: u32 = 120;

/// ポータルの認証情報
#[derive(Clone, PartialEq)]
pub enum Credentials {
    /// 発行済みのトークン
    Token(String),
    /// API キー（そのままトークンとして使う）
    ApiKey(String),
    /// ユーザー名とパスワード（generateToken）
    User { username: String, password: String },
    /// アプリの client_id / client_secret（OAuth2 client credentials）
    Client {
        client_id: String,
        client_secret: String,
    },
}

// 秘密情報をログに出さない
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Token(_) => write!(f, "Token(***)"),
            Credentials::ApiKey(_) => write!(f, "ApiKey(***)"),
            Credentials::User { username, .. } => write!(f, "User({})", username),
            Credentials::Client { client_id, .. } => write!(f, "Client({})", client_id),
        }
    }
}

/// 発行されたアクセストークン
#[derive(Clone, PartialEq)]
pub struct Token {
    pub value: String,
    pub username: Option<String>,
    pub expires_at: Option<SystemTime>,
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("username", &self.username)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            username: None,
            expires_at: None,
        }
    }

    pub fn expires_at(mut self, at: SystemTime) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|at| at <= SystemTime::now())
    }
}

#[derive(Deserialize)]
struct GenerateTokenResponse {
    token: String,
    /// エポックからのミリ秒
    expires: Option<u64>,
}

#[derive(Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    /// 秒
    expires_in: Option<u64>,
    username: Option<String>,
}

#[derive(Deserialize)]
struct SelfResponse {
    username: Option<String>,
}

/// ポータルとトークンの組
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    host: String,
    token: Option<Token>,
}

impl Session {
    /// トークンなし（公開サービスのみ）
    pub fn anonymous(host: impl Into<String>) -> Self {
        Self {
            host: normalize_host(host.into()),
            token: None,
        }
    }

    pub fn with_token(host: impl Into<String>, token: Token) -> Self {
        Self {
            host: normalize_host(host.into()),
            token: Some(token),
        }
    }

    /// 認証情報をトークンに交換する
    /// 交換の失敗は [`ServiceError::Auth`]、通信の失敗は [`ServiceError::Connection`]
    pub fn authenticate<C: HttpClient>(
        http: &C,
        host: impl Into<String>,
        credentials: &Credentials,
    ) -> Result<Self> {
        let host = normalize_host(host.into());
        debug!(host = %host, credentials = ?credentials, "authenticating");

        let token = match credentials {
            Credentials::Token(value) | Credentials::ApiKey(value) => Token::new(value.clone()),
            Credentials::User { username, password } => {
                generate_token(http, &host, username, password).map_err(into_auth)?
            }
            Credentials::Client {
                client_id,
                client_secret,
            } => client_credentials(http, &host, client_id, client_secret).map_err(into_auth)?,
        };

        info!(host = %host, username = ?token.username, "authenticated");
        Ok(Self::with_token(host, token))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub fn sharing_url(&self, path: &str) -> String {
        format!("{}/sharing/rest/{}", self.host, path.trim_start_matches('/'))
    }

    /// 期限切れのトークンはリクエスト前に弾く
    pub fn token_value(&self) -> Result<Option<&str>> {
        match &self.token {
            Some(token) if token.is_expired() => {
                Err(ServiceError::Auth("Token has expired".to_string()))
            }
            Some(token) => Ok(Some(token.value.as_str())),
            None => Ok(None),
        }
    }

    pub fn require_token(&self) -> Result<&Token> {
        self.token_value()?;
        self.token.as_ref().ok_or_else(|| {
            ServiceError::Auth("This operation requires an authenticated session".to_string())
        })
    }

    /// 共通パラメータ（f=json とトークン）を付与する
    pub fn params(&self, mut params: Params) -> Result<Params> {
        params.push(("f".into(), "json".into()));
        if let Some(token) = self.token_value()? {
            params.push(("token".into(), token.to_string()));
        }
        Ok(params)
    }

    /// トークンの持ち主のユーザー名
    pub fn username<C: HttpClient>(&self, http: &C) -> Result<String> {
        let token = self.require_token()?;
        if let Some(username) = &token.username {
            return Ok(username.clone());
        }

        let url = self.sharing_url("community/self");
        let response = http.get(&url, &self.params(Vec::new())?)?;
        let me: SelfResponse = parse_json(response).map_err(into_auth)?;
        me.username.ok_or_else(|| {
            ServiceError::Auth("Token is not associated with a portal user".to_string())
        })
    }
}

fn normalize_host(host: String) -> String {
    host.trim_end_matches('/').to_string()
}

fn into_auth(err: ServiceError) -> ServiceError {
    match err {
        ServiceError::Connection(_) | ServiceError::Auth(_) => err,
        other => ServiceError::Auth(other.to_string()),
    }
}

fn generate_token<C: HttpClient>(
    http: &C,
    host: &str,
    username: &str,
    password: &str,
) -> Result<Token> {
    let url = format!("{}/sharing/rest/generateToken", host);
    let params: Params = vec![
        ("username".into(), username.to_string()),
        ("password".into(), password.to_string()),
        ("referer".into(), host.to_string()),
        ("expiration".into(), TOKEN_EXPIRATION_MINUTES.to_string()),
        ("f".into(), "json".into()),
    ];

    let response: GenerateTokenResponse = parse_json(http.post_form(&url, &params)?)?;
    Ok(Token {
        value: response.token,
        username: Some(username.to_string()),
        expires_at: response
            .expires
            .map(|ms| UNIX_EPOCH + Duration::from_millis(ms)),
    })
}

fn client_credentials<C: HttpClient>(
    http: &C,
    host: &str,
    client_id: &str,
    client_secret: &str,
) -> Result<Token> {
    let url = format!("{}/sharing/rest/oauth2/token", host);
    let params: Params = vec![
        ("client_id".into(), client_id.to_string()),
        ("client_secret".into(), client_secret.to_string()),
        ("grant_type".into(), "client_credentials".into()),
        ("f".into(), "json".into()),
    ];

    let response: OAuthTokenResponse = parse_json(http.post_form(&url, &params)?)?;
    Ok(Token {
        value: response.access_token,
        username: response.username,
        expires_at: response
            .expires_in
            .map(|secs| SystemTime::now() + Duration::from_secs(secs)),
    })
}

use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{
    ACCEPT, ACCEPT_ENCODING, AUTHORIZATION, CONNECTION, HeaderMap, HeaderValue, USER_AGENT,
};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::base_system::context::Config;
use crate::error::DownloadError;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("GET {url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("GET {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http client init failed: {0}")]
    Client(#[source] reqwest::Error),
}

/// 已认证的资源获取能力：相对路径拼到 API 根地址，绝对 URL 原样请求。
pub trait ResourceFetch: Send + Sync {
    fn fetch(&self, path: &str) -> Result<Vec<u8>, FetchError>;
}

#[derive(Debug, Clone)]
pub struct SafariWebConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    pub connect_timeout: Option<Duration>,
    pub max_retries: u32,
    pub min_wait: Duration,
    pub max_wait: Duration,
    pub user_agent: String,
    pub client_id: String,
    pub client_secret: String,
}

impl SafariWebConfig {
    pub fn from_config(cfg: &Config) -> Self {
        let min_wait = Duration::from_millis(cfg.min_wait_time.max(1));
        Self {
            base_url: normalize_base(&cfg.base_url),
            request_timeout: cfg.request_timeout(),
            connect_timeout: cfg.connect_timeout(),
            max_retries: cfg.max_retries.max(1),
            min_wait,
            max_wait: Duration::from_millis(cfg.max_wait_time).max(min_wait),
            user_agent: cfg.user_agent.clone(),
            client_id: cfg.client_id.clone(),
            client_secret: cfg.client_secret.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    access_token: String,
    #[serde(default)]
    token_type: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

pub struct SafariClient {
    client: Client,
    config: SafariWebConfig,
    token: Option<String>,
}

impl SafariClient {
    pub fn new(config: SafariWebConfig) -> Result<Self, FetchError> {
        let mut default_headers = HeaderMap::new();
        // reqwest 未启用 gzip 解码，要求服务端返回原始字节
        default_headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        default_headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        default_headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .unwrap_or(HeaderValue::from_static("Mozilla/5.0")),
        );

        let mut builder = Client::builder()
            .default_headers(default_headers)
            .timeout(config.request_timeout);
        if let Some(connect) = config.connect_timeout {
            builder = builder.connect_timeout(connect);
        }
        let client = builder.build().map_err(FetchError::Client)?;

        Ok(Self {
            client,
            config,
            token: None,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.token = (!token.trim().is_empty()).then_some(token);
        self
    }

    pub fn is_authorized(&self) -> bool {
        self.token.is_some()
    }

    /// OAuth 密码模式登录，成功后保存 bearer token。
    pub fn authorize(&mut self, username: &str, password: &str) -> Result<(), DownloadError> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(DownloadError::AuthenticationFailure(
                "username and password are required".to_string(),
            ));
        }

        let url = format!("{}/oauth2/access_token/", self.config.base_url);
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("grant_type", "password"),
            ("username", username),
            ("password", password),
        ];

        let resp = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .map_err(|source| FetchError::Network {
                url: url.clone(),
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(DownloadError::AuthenticationFailure(format!(
                "login endpoint returned status {}",
                status.as_u16()
            )));
        }

        let body = resp.bytes().map_err(|source| FetchError::Network {
            url: url.clone(),
            source,
        })?;
        let auth: AuthResponse =
            serde_json::from_slice(&body).map_err(DownloadError::decode("login"))?;
        if auth.access_token.trim().is_empty() {
            return Err(DownloadError::AuthenticationFailure(
                "login response carried no access token".to_string(),
            ));
        }

        debug!(
            target: "network",
            token_type = %auth.token_type,
            expires_in = ?auth.expires_in,
            "access token issued"
        );
        info!(target: "network", "登录成功");
        self.token = Some(auth.access_token);
        Ok(())
    }

    pub(crate) fn resolve_url(&self, path: &str) -> String {
        let path = path.trim();
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.config.base_url, path.trim_start_matches('/'))
    }

    /// 只有发往 API 根地址的请求才带 token，CDN 资源不泄露凭证。
    fn wants_auth(&self, url: &str) -> bool {
        url.strip_prefix(&self.config.base_url)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }

    fn get_once(&self, url: &str) -> Result<reqwest::blocking::Response, reqwest::Error> {
        let mut req = self.client.get(url);
        if self.wants_auth(url)
            && let Some(token) = &self.token
        {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        req.send()
    }
}

impl ResourceFetch for SafariClient {
    fn fetch(&self, path: &str) -> Result<Vec<u8>, FetchError> {
        let url = self.resolve_url(path);
        let tries = self.config.max_retries.max(1);
        let mut attempt = 0u32;

        loop {
            let last = attempt + 1 >= tries;
            debug!(target: "network", attempt, "GET {}", url);

            match self.get_once(&url) {
                Ok(resp) if resp.status().is_success() => {
                    let bytes = resp.bytes().map_err(|source| FetchError::Network {
                        url: url.clone(),
                        source,
                    })?;
                    return Ok(bytes.to_vec());
                }
                Ok(resp) => {
                    let status = resp.status();
                    if last || !is_retryable(status) {
                        return Err(FetchError::Status {
                            url,
                            status: status.as_u16(),
                        });
                    }
                    warn!(target: "network", status = status.as_u16(), "服务端限频或异常，退避后重试: {}", url);
                }
                Err(source) => {
                    if last {
                        return Err(FetchError::Network { url, source });
                    }
                    warn!(target: "network", error = %source, "请求失败，退避后重试: {}", url);
                }
            }

            std::thread::sleep(backoff_delay(
                self.config.min_wait,
                self.config.max_wait,
                attempt,
            ));
            attempt += 1;
        }
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

pub(crate) fn backoff_delay(min: Duration, max: Duration, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt.min(10)).unwrap_or(u32::MAX);
    min.saturating_mul(factor).min(max.max(min))
}

fn normalize_base(base: &str) -> String {
    base.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base: &str) -> SafariWebConfig {
        SafariWebConfig {
            base_url: normalize_base(base),
            request_timeout: Duration::from_secs(5),
            connect_timeout: None,
            max_retries: 3,
            min_wait: Duration::from_millis(1),
            max_wait: Duration::from_millis(5),
            user_agent: "test-agent".to_string(),
            client_id: "cid".to_string(),
            client_secret: "secret".to_string(),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let min = Duration::from_millis(100);
        let max = Duration::from_millis(700);
        assert_eq!(backoff_delay(min, max, 0), Duration::from_millis(100));
        assert_eq!(backoff_delay(min, max, 2), Duration::from_millis(400));
        assert_eq!(backoff_delay(min, max, 3), max);
        assert_eq!(backoff_delay(min, max, 40), max);
    }

    #[test]
    fn resolves_relative_and_absolute_paths() {
        let client = SafariClient::new(test_config("https://api.example.com/")).unwrap();
        assert_eq!(
            client.resolve_url("/api/v1/book/1/"),
            "https://api.example.com/api/v1/book/1/"
        );
        assert_eq!(
            client.resolve_url("api/v1/book/1/"),
            "https://api.example.com/api/v1/book/1/"
        );
        assert_eq!(
            client.resolve_url("https://cdn.example.com/a.png"),
            "https://cdn.example.com/a.png"
        );
        assert!(client.wants_auth("https://api.example.com/api/v1/book/1/"));
        assert!(!client.wants_auth("https://api.example.com.evil.net/x"));
        assert!(!client.wants_auth("https://cdn.example.com/a.png"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fetch_sends_bearer_token_to_api_host() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/book/42/"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"title\":\"t\"}"))
            .mount(&server)
            .await;

        let base = server.uri();
        let body = tokio::task::spawn_blocking(move || {
            let client = SafariClient::new(test_config(&base))
                .unwrap()
                .with_token("tok");
            client.fetch("/api/v1/book/42/")
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(body, b"{\"title\":\"t\"}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn non_success_status_is_reported_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let base = server.uri();
        let err = tokio::task::spawn_blocking(move || {
            SafariClient::new(test_config(&base))
                .unwrap()
                .fetch("missing")
        })
        .await
        .unwrap()
        .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn server_errors_are_retried_up_to_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let base = server.uri();
        let err = tokio::task::spawn_blocking(move || {
            SafariClient::new(test_config(&base))
                .unwrap()
                .fetch("/flaky")
        })
        .await
        .unwrap()
        .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 503, .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn authorize_stores_token_and_rejects_bad_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/access_token/"))
            .and(body_string_contains("username=good"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"access_token":"abc","token_type":"bearer","expires_in":3600}"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth2/access_token/"))
            .and(body_string_contains("username=bad"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let base = server.uri();
        let (ok, err) = tokio::task::spawn_blocking(move || {
            let mut good = SafariClient::new(test_config(&base)).unwrap();
            good.authorize("good", "pw").unwrap();
            let mut bad = SafariClient::new(test_config(&base)).unwrap();
            (good.is_authorized(), bad.authorize("bad", "pw").unwrap_err())
        })
        .await
        .unwrap();
        assert!(ok);
        assert!(matches!(err, DownloadError::AuthenticationFailure(_)));
    }
}

//! HTTP provider for the Instagram web API

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{HeaderMap, COOKIE, RETRY_AFTER, SET_COOKIE, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;

use super::{MetricProvider, RawCount, Session, SourceError};
use crate::config::SourceCredentials;
use crate::model::ProfileKey;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 13; Pixel 7) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36";
const APP_ID: &str = "936619743392459";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Follower counts over the provider's web endpoints
pub struct HttpMetricProvider {
    client: reqwest::Client,
    base_url: String,
    user_agent: String,
}

impl HttpMetricProvider {
    pub fn new(base_url: impl Into<String>) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SourceError::TransientNetwork(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        })
    }

    fn get(&self, path: &str, session: &Session) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .header(USER_AGENT, &session.user_agent)
            .header("x-ig-app-id", APP_ID)
            .header(COOKIE, format!("sessionid={}", session.token))
    }
}

#[async_trait]
impl MetricProvider for HttpMetricProvider {
    async fn login(&self, credentials: &SourceCredentials) -> Result<Session, SourceError> {
        let timestamp = chrono::Utc::now().timestamp();
        let enc_password = format!("#PWD_INSTAGRAM_BROWSER:0:{}:{}", timestamp, credentials.password);

        let response = self
            .client
            .post(format!("{}/api/v1/web/accounts/login/ajax/", self.base_url))
            .header(USER_AGENT, &self.user_agent)
            .header("x-ig-app-id", APP_ID)
            .form(&[
                ("username", credentials.username.as_str()),
                ("enc_password", enc_password.as_str()),
            ])
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(classify_status(status, &body, retry_after(&headers)));
        }

        let login: LoginResponse = serde_json::from_str(&body)
            .map_err(|e| SourceError::TransientNetwork(format!("Malformed login response: {}", e)))?;
        if !login.authenticated {
            return Err(SourceError::AuthenticationFailed(
                login.message.unwrap_or_else(|| "credentials rejected".to_string()),
            ));
        }

        let token = session_cookie(&headers).ok_or_else(|| {
            SourceError::AuthenticationFailed("login response carried no session cookie".to_string())
        })?;

        Ok(Session::new(token, self.user_agent.clone()))
    }

    async fn validate(&self, session: &Session) -> Result<bool, SourceError> {
        let response = self
            .get("/api/v1/accounts/current_user/?edit=true", session)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(transport_error)?;

        if status.is_success() {
            return Ok(true);
        }
        match classify_status(status, &body, retry_after(&headers)) {
            SourceError::AuthenticationFailed(_) => Ok(false),
            other => Err(other),
        }
    }

    async fn follower_count(
        &self,
        session: &Session,
        profile: &ProfileKey,
    ) -> Result<RawCount, SourceError> {
        let response = self
            .get(
                &format!("/api/v1/users/web_profile_info/?username={}", profile.as_str()),
                session,
            )
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            let err = classify_status(status, &body, retry_after(&headers));
            if let SourceError::ProfileNotFound(_) = err {
                return Err(SourceError::ProfileNotFound(profile.to_string()));
            }
            return Err(err);
        }

        parse_profile_body(profile, &body)
    }
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    authenticated: bool,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProfileEnvelope {
    data: Option<ProfileData>,
}

#[derive(Debug, Deserialize)]
struct ProfileData {
    user: Option<ProfileUser>,
}

#[derive(Debug, Deserialize)]
struct ProfileUser {
    edge_followed_by: EdgeCount,
}

#[derive(Debug, Deserialize)]
struct EdgeCount {
    count: u64,
}

/// Extract a follower count from a profile response body.
///
/// JSON bodies carry the exact count. An HTML page is parsed for its
/// `og:description` summary, which only has an abbreviated figure.
pub(crate) fn parse_profile_body(profile: &ProfileKey, body: &str) -> Result<RawCount, SourceError> {
    let trimmed = body.trim_start();
    if trimmed.starts_with('{') {
        let envelope: ProfileEnvelope = serde_json::from_str(trimmed)
            .map_err(|e| SourceError::TransientNetwork(format!("Malformed profile response: {}", e)))?;
        return envelope
            .data
            .and_then(|d| d.user)
            .map(|u| RawCount::exact(u.edge_followed_by.count))
            .ok_or_else(|| SourceError::ProfileNotFound(profile.to_string()));
    }

    if is_login_page(trimmed) {
        return Err(SourceError::AuthenticationFailed("redirected to login page".to_string()));
    }

    let caps = og_followers_pattern().captures(trimmed).ok_or_else(|| {
        SourceError::TransientNetwork("profile page did not contain a follower count".to_string())
    })?;
    let value = parse_abbreviated_count(&caps[1]).ok_or_else(|| {
        SourceError::TransientNetwork(format!("unparseable follower count '{}'", &caps[1]))
    })?;
    Ok(RawCount::estimated(value))
}

fn og_followers_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)<meta[^>]+(?:property|name)="og:description"[^>]+content="\s*([0-9][0-9.,]*\s*[kmb]?)\s+followers"#)
            .expect("og:description pattern is valid")
    })
}

fn is_login_page(body: &str) -> bool {
    body.contains("\"LoginAndSignupPage\"") || body.contains("/accounts/login/?next=")
}

/// Parse counts such as `1,234`, `12.5K`, `3M` or `1.2b`
pub fn parse_abbreviated_count(raw: &str) -> Option<u64> {
    let cleaned: String = raw.chars().filter(|c| !c.is_whitespace() && *c != ',').collect();
    let (digits, multiplier) = match cleaned.chars().last()?.to_ascii_lowercase() {
        'k' => (&cleaned[..cleaned.len() - 1], 1_000.0),
        'm' => (&cleaned[..cleaned.len() - 1], 1_000_000.0),
        'b' => (&cleaned[..cleaned.len() - 1], 1_000_000_000.0),
        _ => (cleaned.as_str(), 1.0),
    };

    if multiplier == 1.0 {
        return digits.parse().ok();
    }
    let value: f64 = digits.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * multiplier).round() as u64)
}

/// Map a non-success response to an error kind
pub(crate) fn classify_status(
    status: StatusCode,
    body: &str,
    retry_after: Option<Duration>,
) -> SourceError {
    let lowered = body.to_ascii_lowercase();

    if status == StatusCode::TOO_MANY_REQUESTS || lowered.contains("please wait a few minutes") {
        return SourceError::RateLimited { retry_after };
    }
    if status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || lowered.contains("login_required")
        || lowered.contains("checkpoint_required")
        || lowered.contains("challenge_required")
    {
        return SourceError::AuthenticationFailed(format!("status {}", status.as_u16()));
    }
    if status == StatusCode::NOT_FOUND {
        return SourceError::ProfileNotFound(format!("status {}", status.as_u16()));
    }
    SourceError::TransientNetwork(format!("unexpected status {}", status.as_u16()))
}

fn transport_error(e: reqwest::Error) -> SourceError {
    SourceError::TransientNetwork(e.to_string())
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|cookie| cookie.split(';').next())
        .filter_map(|pair| pair.trim().strip_prefix("sessionid="))
        .find(|value| !value.is_empty() && *value != "\"\"")
        .map(str::to_string)
}

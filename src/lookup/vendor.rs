//! # Vendor Tracking Source
//!
//! Primary lookup against the carrier's tracking API. Results are not cached
//! here; the vendor caches on its side.
//!
//! When login credentials are configured the client logs in once and keeps
//! the session in the shared cache under `session_cache_key` until shortly
//! before it expires. The session supplies the tracking API key and the
//! `ClientID`/`token` headers. Without credentials a static API key is used.

use super::catalog::{parse_extra_services, ShipmentStatus};
use super::models::{ExtraService, ShipmentRecord, TrackingEvent};
use super::timeline::parse_local_datetime;
use super::{PrimarySource, ShipmentCode};
use crate::caching::CacheClient;
use crate::core::config::VendorConfig;
use crate::core::error::{TrackingError, TrackingResult};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Sessions are renewed when they expire within this margin
const SESSION_REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Login session returned by the client API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSession {
    #[serde(rename = "IsError", default)]
    pub is_error: bool,
    #[serde(rename = "Message", default)]
    pub message: Option<String>,
    #[serde(rename = "ClientID", default)]
    pub client_id: Value,
    #[serde(rename = "Token", default)]
    pub token: Option<String>,
    #[serde(rename = "ExpireDate", default)]
    pub expire_date: Option<DateTime<FixedOffset>>,
    #[serde(rename = "TrackingApiKey", default)]
    pub tracking_api_key: Option<String>,
}

impl ClientSession {
    /// Time left before expiry, if any
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expire_date
            .and_then(|expires| (expires.with_timezone(&Utc) - now).to_std().ok())
    }

    /// Usable if it stays valid past the refresh margin
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.remaining(now)
            .map_or(false, |left| left > SESSION_REFRESH_MARGIN)
    }

    fn client_id_header(&self) -> Option<String> {
        match &self.client_id {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TrackingResponse {
    #[serde(default)]
    order: Option<VendorOrder>,
    #[serde(default)]
    tracking: Vec<VendorEvent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct VendorOrder {
    order_code: Option<String>,
    sender_address: String,
    receiver_address: String,
    quantity: Option<Value>,
    content: String,
    status: Value,
    status_name: Option<String>,
    services: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct VendorEvent {
    time: String,
    location: String,
    status: Value,
    status_name: Option<String>,
    note: String,
}

fn status_label(status: &Value, name: Option<&str>) -> String {
    name.map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .or_else(|| ShipmentStatus::from_json(status).map(|s| s.title().to_string()))
        .or_else(|| status.as_str().map(str::to_string))
        .unwrap_or_default()
}

fn quantity(value: Option<&Value>) -> u32 {
    match value {
        Some(Value::Number(n)) => n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
    .and_then(|q| u32::try_from(q).ok())
    .unwrap_or(1)
}

/// Vendor services come either as a combined string or a list of codes
fn services(value: &Value) -> Vec<ExtraService> {
    match value {
        Value::String(s) => parse_extra_services(s),
        Value::Array(items) => {
            let joined: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
            parse_extra_services(&joined.join(","))
        }
        _ => Vec::new(),
    }
}

fn normalize(
    code: &ShipmentCode,
    order: VendorOrder,
    tracking: Vec<VendorEvent>,
    offset: FixedOffset,
) -> ShipmentRecord {
    let mut events: Vec<TrackingEvent> = tracking
        .into_iter()
        .filter_map(|event| {
            let Some(time) = parse_local_datetime(&event.time, offset) else {
                warn!("Dropping vendor event with unreadable time '{}' for {}", event.time, code);
                return None;
            };
            Some(TrackingEvent {
                time,
                location: event.location,
                status: status_label(&event.status, event.status_name.as_deref()),
                notes: event.note,
            })
        })
        .collect();
    events.sort_by_key(|event| event.time);

    ShipmentRecord {
        code: order
            .order_code
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| code.to_string()),
        origin: order.sender_address,
        destination: order.receiver_address,
        quantity: quantity(order.quantity.as_ref()),
        description: order.content,
        status: status_label(&order.status, order.status_name.as_deref()),
        extra_services: services(&order.services),
        events,
    }
}

/// Client for the vendor tracking API
pub struct VendorClient {
    http: reqwest::Client,
    config: VendorConfig,
    cache: Arc<CacheClient>,
    offset: FixedOffset,
}

impl VendorClient {
    pub fn new(
        config: VendorConfig,
        cache: Arc<CacheClient>,
        offset: FixedOffset,
    ) -> TrackingResult<Self> {
        if config.tracking_url.is_none() {
            return Err(TrackingError::config("vendor.tracking_url is required"));
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TrackingError::internal(format!("failed to build vendor HTTP client: {}", e)))?;

        Ok(Self {
            http,
            config,
            cache,
            offset,
        })
    }

    fn endpoint(base: Option<&str>, path: &str) -> TrackingResult<String> {
        let base = base.ok_or_else(|| TrackingError::config("vendor base URL is not configured"))?;
        Ok(format!("{}{}", base.trim_end_matches('/'), path))
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> TrackingResult<T> {
        let response = request
            .send()
            .await
            .map_err(|e| TrackingError::vendor(format!("{} request failed: {}", what, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TrackingError::vendor(format!("{} answered with HTTP {}", what, status)));
        }

        response
            .json()
            .await
            .map_err(|e| TrackingError::vendor(format!("malformed {} response: {}", what, e)))
    }

    async fn login(&self, username: &str, password: &str) -> TrackingResult<ClientSession> {
        let url = Self::endpoint(self.config.base_url.as_deref(), "/api/Client/ClientLogin")?;
        let request = self
            .http
            .post(url)
            .json(&json!({ "Username": username, "Password": password }));

        let session: ClientSession = self.post_json(request, "login").await?;
        if session.is_error {
            return Err(TrackingError::vendor(format!(
                "login rejected: {}",
                session.message.as_deref().unwrap_or("no message")
            )));
        }
        Ok(session)
    }

    /// The current login session, from the cache or a fresh login.
    ///
    /// `None` when no credentials are configured.
    pub async fn session(&self, now: DateTime<Utc>) -> TrackingResult<Option<ClientSession>> {
        let (Some(username), Some(password)) = (&self.config.username, &self.config.password) else {
            return Ok(None);
        };

        if let Some(cached) = self
            .cache
            .get::<ClientSession>(&self.config.session_cache_key)
            .await
        {
            if cached.is_fresh(now) {
                debug!("Using cached vendor session");
                return Ok(Some(cached));
            }
        }

        info!("Logging in to vendor API");
        let session = self.login(username, password).await?;

        match session.remaining(now) {
            Some(ttl) if !ttl.is_zero() => {
                self.cache
                    .set(&self.config.session_cache_key, &session, Some(ttl))
                    .await;
            }
            _ => warn!("Vendor session has no usable expiry, not caching it"),
        }

        Ok(Some(session))
    }

    /// Track a shipment at the vendor. `None` when the vendor has no order.
    pub async fn track(
        &self,
        code: &ShipmentCode,
        now: DateTime<Utc>,
    ) -> TrackingResult<Option<ShipmentRecord>> {
        let session = self.session(now).await?;

        let api_key = session
            .as_ref()
            .and_then(|s| s.tracking_api_key.clone())
            .or_else(|| self.config.api_key.clone())
            .ok_or_else(|| TrackingError::config("no vendor tracking API key available"))?;

        let url = Self::endpoint(self.config.tracking_url.as_deref(), "/api/Order/v1/Tracking")?;
        let mut request = self
            .http
            .post(url)
            .json(&json!({ "orderCode": code.as_str(), "apiKey": api_key }));

        if let Some(session) = &session {
            if let Some(client_id) = session.client_id_header() {
                request = request.header("ClientID", client_id);
            }
            if let Some(token) = &session.token {
                request = request.header("token", token);
            }
        }

        let response: TrackingResponse = self.post_json(request, "tracking").await?;
        Ok(response
            .order
            .map(|order| normalize(code, order, response.tracking, self.offset)))
    }
}

#[async_trait]
impl PrimarySource for VendorClient {
    async fn fetch(&self, code: &ShipmentCode) -> TrackingResult<Option<ShipmentRecord>> {
        self.track(code, Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::InMemoryCache;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn offset() -> FixedOffset {
        FixedOffset::east_opt(7 * 3600).unwrap()
    }

    fn cache() -> Arc<CacheClient> {
        Arc::new(CacheClient::new(Arc::new(InMemoryCache::new())))
    }

    fn code() -> ShipmentCode {
        ShipmentCode::parse("ABC123456").unwrap()
    }

    fn config(server: &MockServer) -> VendorConfig {
        VendorConfig {
            enabled: true,
            base_url: Some(server.uri()),
            tracking_url: Some(server.uri()),
            api_key: Some("STATIC-KEY".to_string()),
            ..VendorConfig::default()
        }
    }

    fn order_body() -> Value {
        json!({
            "order": {
                "orderCode": "abc123456",
                "senderAddress": "Kho HCM",
                "receiverAddress": "12 Lê Lợi, Hà Nội",
                "quantity": 3,
                "content": "Hồ sơ",
                "status": 4,
                "services": ["PTT", "BP", "ZZ"]
            },
            "tracking": [
                {"time": "2024-03-02 09:00:00", "location": "Hà Nội", "status": "PHATTHANHCONG", "note": "Đã nhận"},
                {"time": "2024-03-01T08:00:00+07:00", "location": "Kho HCM", "status": 1, "note": ""},
                {"time": "not a date", "location": "?", "status": 2, "note": ""}
            ]
        })
    }

    #[tokio::test]
    async fn test_tracking_with_static_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/Order/v1/Tracking"))
            .and(body_json(json!({"orderCode": "ABC123456", "apiKey": "STATIC-KEY"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(order_body()))
            .expect(1)
            .mount(&server)
            .await;

        let client = VendorClient::new(config(&server), cache(), offset()).unwrap();
        let record = client.track(&code(), Utc::now()).await.unwrap().unwrap();

        assert_eq!(record.code, "ABC123456");
        assert_eq!(record.quantity, 3);
        assert_eq!(record.status, "Phát thành công");
        let ids: Vec<_> = record.extra_services.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![5, 6]);

        let statuses: Vec<_> = record.events.iter().map(|e| e.status.as_str()).collect();
        assert_eq!(statuses, vec!["Mới", "Phát thành công"]);
    }

    #[tokio::test]
    async fn test_missing_order_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"order": null, "tracking": []})))
            .mount(&server)
            .await;

        let client = VendorClient::new(config(&server), cache(), offset()).unwrap();
        assert_eq!(client.track(&code(), Utc::now()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failures_are_vendor_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = VendorClient::new(config(&server), cache(), offset()).unwrap();
        let err = client.track(&code(), Utc::now()).await.unwrap_err();
        assert!(matches!(err, TrackingError::Vendor { .. }));
    }

    #[tokio::test]
    async fn test_session_is_cached_until_near_expiry() {
        let server = MockServer::start().await;
        let now = Utc::now();
        let expires = (now + chrono::Duration::hours(2)).with_timezone(&offset());

        Mock::given(method("POST"))
            .and(path("/api/Client/ClientLogin"))
            .and(body_json(json!({"Username": "user", "Password": "secret"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "IsError": false,
                "ClientID": 627,
                "Token": "tok",
                "ExpireDate": expires.to_rfc3339(),
                "TrackingApiKey": "SESSION-KEY"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/Order/v1/Tracking"))
            .and(header("ClientID", "627"))
            .and(header("token", "tok"))
            .and(body_json(json!({"orderCode": "ABC123456", "apiKey": "SESSION-KEY"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(order_body()))
            .expect(2)
            .mount(&server)
            .await;

        let cache = cache();
        let client = VendorClient::new(
            VendorConfig {
                username: Some("user".to_string()),
                password: Some("secret".to_string()),
                ..config(&server)
            },
            cache.clone(),
            offset(),
        )
        .unwrap();

        assert!(client.track(&code(), now).await.unwrap().is_some());
        assert!(client.track(&code(), now).await.unwrap().is_some());
        assert!(cache.exists("247:client:data").await);
    }

    #[test]
    fn test_session_freshness() {
        let now = Utc::now();
        let session = |minutes: i64| ClientSession {
            is_error: false,
            message: None,
            client_id: json!("C-1"),
            token: None,
            expire_date: Some((now + chrono::Duration::minutes(minutes)).with_timezone(&offset())),
            tracking_api_key: None,
        };

        assert!(session(60).is_fresh(now));
        assert!(!session(4).is_fresh(now));
        assert!(!session(-1).is_fresh(now));
        assert_eq!(session(60).client_id_header(), Some("C-1".to_string()));
    }

    #[tokio::test]
    async fn test_rejected_login() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/Client/ClientLogin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "IsError": true,
                "Message": "Sai mật khẩu"
            })))
            .mount(&server)
            .await;

        let client = VendorClient::new(
            VendorConfig {
                username: Some("user".to_string()),
                password: Some("wrong".to_string()),
                ..config(&server)
            },
            cache(),
            offset(),
        )
        .unwrap();

        let err = client.session(Utc::now()).await.unwrap_err();
        assert!(err.to_string().contains("Sai mật khẩu"));
    }
}

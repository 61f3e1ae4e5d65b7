//! Transport to the server of record.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;

use crate::config::SyncSettings;
use crate::error::{Error, Result, TransportError};
use crate::models::{ModelName, ObjectKey};
use crate::sync::protocol::{BatchSyncRequest, BatchSyncResponse};
use crate::util::compact_text;

const BATCH_SYNC_PATH: &str = "/sync/batch";

/// One batch call per sync cycle, plus a lightweight reachability probe
#[allow(async_fn_in_trait)]
pub trait SyncTransport {
    /// Submit the whole batch as one request
    async fn submit_batch(
        &self,
        request: &BatchSyncRequest,
    ) -> std::result::Result<BatchSyncResponse, TransportError>;

    /// Check whether the server can be reached at all
    async fn probe(&self) -> std::result::Result<(), TransportError>;

    /// Current version of an object on the server. `None` when the object
    /// is gone or its model carries no version.
    async fn current_version(
        &self,
        key: &ObjectKey,
    ) -> std::result::Result<Option<i64>, TransportError>;
}

/// REST resource holding one object of the given model
fn object_path(key: &ObjectKey) -> Option<String> {
    let collection = match key.model_name {
        ModelName::FloorPlan => "/floors/floor-plans",
        ModelName::Room => "/floors/rooms",
        ModelName::Booking => "/bookings/bookings",
    };
    key.object_id
        .as_deref()
        .map(|id| format!("{collection}/{id}/"))
}

#[derive(Debug, Deserialize)]
struct VersionedObject {
    version: Option<i64>,
}

/// HTTP implementation of `SyncTransport`
#[derive(Clone)]
pub struct HttpSyncClient {
    base_url: String,
    probe_path: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpSyncClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpSyncClient")
            .field("base_url", &self.base_url)
            .field("probe_path", &self.probe_path)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl HttpSyncClient {
    /// Build a client from validated settings
    pub fn new(settings: &SyncSettings) -> Result<Self> {
        let base_url = settings.require_server_url()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|error| Error::Config(format!("failed to build HTTP client: {error}")))?;

        Ok(Self {
            base_url,
            probe_path: settings.probe_path.clone(),
            auth_token: settings.auth_token.clone(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

impl SyncTransport for HttpSyncClient {
    async fn submit_batch(
        &self,
        request: &BatchSyncRequest,
    ) -> std::result::Result<BatchSyncResponse, TransportError> {
        let response = self
            .authorize(self.client.post(self.url(BATCH_SYNC_PATH)))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(request)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let body = response.text().await.map_err(classify_send_error)?;
        serde_json::from_str::<BatchSyncResponse>(&body).map_err(|error| {
            TransportError::InvalidResponse(format!(
                "{error}: {}",
                compact_text(&body)
            ))
        })
    }

    async fn probe(&self) -> std::result::Result<(), TransportError> {
        let response = self
            .authorize(self.client.get(self.url(&self.probe_path)))
            .send()
            .await
            .map_err(classify_send_error)?;

        // Any answer short of a server-side outage proves reachability
        if response.status().is_server_error() {
            Err(TransportError::Unreachable(format!(
                "probe returned HTTP {}",
                response.status().as_u16()
            )))
        } else {
            Ok(())
        }
    }

    async fn current_version(
        &self,
        key: &ObjectKey,
    ) -> std::result::Result<Option<i64>, TransportError> {
        let Some(path) = object_path(key) else {
            return Ok(None);
        };
        let response = self
            .authorize(self.client.get(self.url(&path)))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let body = response.text().await.map_err(classify_send_error)?;
        serde_json::from_str::<VersionedObject>(&body)
            .map(|object| object.version)
            .map_err(|error| {
                TransportError::InvalidResponse(format!("{error}: {}", compact_text(&body)))
            })
    }
}

fn classify_send_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() || error.is_connect() || error.is_request() {
        TransportError::Unreachable(error.to_string())
    } else if error.is_decode() || error.is_body() {
        TransportError::InvalidResponse(error.to_string())
    } else {
        TransportError::Unreachable(error.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
    detail: Option<String>,
}

/// Gateway-class statuses mean the server of record is not there to answer.
fn classify_status(status: StatusCode, body: &str) -> TransportError {
    if matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    ) {
        return TransportError::Unreachable(format!("HTTP {}", status.as_u16()));
    }

    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|payload| payload.error.or(payload.message).or(payload.detail))
        .map_or_else(|| compact_text(body), |message| message.trim().to_string());

    TransportError::Rejected {
        status: status.as_u16(),
        message: if message.is_empty() {
            format!("HTTP {}", status.as_u16())
        } else {
            message
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_statuses_are_unreachable() {
        for status in [
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::GATEWAY_TIMEOUT,
        ] {
            assert!(classify_status(status, "").is_unreachable());
        }
    }

    #[test]
    fn client_errors_are_rejections_with_server_message() {
        let error = classify_status(StatusCode::BAD_REQUEST, r#"{"error": "No changes provided"}"#);
        assert_eq!(
            error,
            TransportError::Rejected {
                status: 400,
                message: "No changes provided".to_string()
            }
        );
    }

    #[test]
    fn empty_rejection_body_falls_back_to_status() {
        let error = classify_status(StatusCode::INTERNAL_SERVER_ERROR, "  ");
        assert_eq!(
            error,
            TransportError::Rejected {
                status: 500,
                message: "HTTP 500".to_string()
            }
        );
    }

    #[test]
    fn object_paths_follow_the_rest_resources() {
        assert_eq!(
            object_path(&ObjectKey::new(ModelName::FloorPlan, "42")).as_deref(),
            Some("/floors/floor-plans/42/")
        );
        assert_eq!(
            object_path(&ObjectKey::new(ModelName::Booking, "7")).as_deref(),
            Some("/bookings/bookings/7/")
        );
        let unsaved = ObjectKey {
            model_name: ModelName::Room,
            object_id: None,
        };
        assert_eq!(object_path(&unsaved), None);
    }

    #[test]
    fn versioned_object_tolerates_missing_version() {
        let floor: VersionedObject =
            serde_json::from_str(r#"{"id": 42, "name": "Level 4", "version": 5}"#).unwrap();
        assert_eq!(floor.version, Some(5));
        let room: VersionedObject = serde_json::from_str(r#"{"id": 3, "capacity": 8}"#).unwrap();
        assert_eq!(room.version, None);
    }

    #[test]
    fn new_requires_server_url() {
        assert!(HttpSyncClient::new(&SyncSettings::default()).is_err());
    }

    #[test]
    fn debug_redacts_token() {
        let settings = SyncSettings {
            server_url: Some("https://floors.example.com/api".to_string()),
            auth_token: Some("secret".to_string()),
            ..SyncSettings::default()
        };
        let client = HttpSyncClient::new(&settings).unwrap();
        let debug = format!("{client:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
        assert_eq!(client.url(BATCH_SYNC_PATH), "https://floors.example.com/api/sync/batch");
    }

    #[tokio::test]
    async fn unreachable_server_is_classified_as_unreachable() {
        // Port 9 (discard) on localhost is closed in test environments
        let settings = SyncSettings {
            server_url: Some("http://127.0.0.1:9".to_string()),
            request_timeout_secs: 2,
            ..SyncSettings::default()
        };
        let client = HttpSyncClient::new(&settings).unwrap();
        let error = client.probe().await.unwrap_err();
        assert!(error.is_unreachable());
    }
}

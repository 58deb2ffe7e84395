//! Push notification delivery.
//!
//! ## OneSignal
//!
//! Endpoint: `POST https://onesignal.com/api/v1/notifications`
//!
//! Devices that subscribed to an address carry a `bchAddress` tag holding the
//! canonical address, so a notification targets them with a tag filter rather
//! than a device list.

use {
    crate::address_set::Address,
    async_trait::async_trait,
    serde::Serialize,
    std::time::Duration,
    thiserror::Error,
};

pub const ONESIGNAL_NOTIFICATIONS_URL: &str = "https://onesignal.com/api/v1/notifications";

/// Device tag that holds the subscribed address.
pub const ADDRESS_TAG: &str = "bchAddress";

#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("notification request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("notification rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Delivers one human-readable message to every device subscribed to an
/// address. Best effort: callers log failures and move on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, target: &Address, message: &str, link_url: &str) -> Result<(), NotifierError>;
}

#[derive(Debug, Serialize)]
struct TagFilter<'a> {
    field: &'static str,
    key: &'static str,
    relation: &'static str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct Contents<'a> {
    en: &'a str,
}

#[derive(Debug, Serialize)]
struct NotificationRequest<'a> {
    app_id: &'a str,
    contents: Contents<'a>,
    url: &'a str,
    filters: [TagFilter<'a>; 1],
}

pub struct OneSignalNotifier {
    app_id: String,
    api_key: String,
    endpoint: String,
    client: reqwest::Client,
}

impl OneSignalNotifier {
    pub fn new(app_id: impl Into<String>, api_key: impl Into<String>) -> Result<Self, NotifierError> {
        Self::with_endpoint(app_id, api_key, ONESIGNAL_NOTIFICATIONS_URL)
    }

    pub fn with_endpoint(
        app_id: impl Into<String>,
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Result<Self, NotifierError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            app_id: app_id.into(),
            api_key: api_key.into(),
            endpoint: endpoint.into(),
            client,
        })
    }

    fn request_body<'a>(&'a self, target: &'a Address, message: &'a str, link_url: &'a str) -> NotificationRequest<'a> {
        NotificationRequest {
            app_id: &self.app_id,
            contents: Contents { en: message },
            url: link_url,
            filters: [TagFilter {
                field: "tag",
                key: ADDRESS_TAG,
                relation: "=",
                value: target.as_str(),
            }],
        }
    }
}

#[async_trait]
impl Notifier for OneSignalNotifier {
    async fn send(&self, target: &Address, message: &str, link_url: &str) -> Result<(), NotifierError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::AUTHORIZATION, format!("Basic {}", self.api_key))
            .json(&self.request_body(target, message, link_url))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifierError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        log::debug!("📨 Notification sent to {}: {}", target, message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn test_request_body_targets_address_tag() {
        let notifier = OneSignalNotifier::new("app-123", "secret").unwrap();
        let address = Address::parse("qz4v8lrnv786e42n7xg0czpelp439aytusray7cnh4").unwrap();

        let body = serde_json::to_value(notifier.request_body(
            &address,
            "Received $24.50 (0.098 BCH)",
            "https://explorer.example/tx/abc",
        ))
        .unwrap();

        assert_eq!(
            body,
            json!({
                "app_id": "app-123",
                "contents": {"en": "Received $24.50 (0.098 BCH)"},
                "url": "https://explorer.example/tx/abc",
                "filters": [{
                    "field": "tag",
                    "key": "bchAddress",
                    "relation": "=",
                    "value": "bitcoincash:qz4v8lrnv786e42n7xg0czpelp439aytusray7cnh4"
                }]
            })
        );
    }
}

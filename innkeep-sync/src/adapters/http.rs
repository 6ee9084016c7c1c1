use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use innkeep_core::platform::{
    AdapterError, Credential, ExternalReservation, Platform, PlatformAdapter, PlatformConnection,
    RefreshedCredential,
};
use innkeep_core::reservation::StayDates;
use innkeep_shared::Masked;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Channel-manager style REST adapter. One instance per marketplace, each with its own base URL.
pub struct HttpPlatformAdapter {
    platform: Platform,
    base_url: String,
    client: Client,
}

#[derive(Serialize)]
struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

#[derive(Serialize)]
struct BlockRequest {
    ranges: Vec<DateRange>,
}

impl BlockRequest {
    fn from_stays(ranges: &[StayDates]) -> Self {
        Self {
            ranges: ranges
                .iter()
                .map(|r| DateRange {
                    start: r.check_in,
                    end: r.check_out,
                })
                .collect(),
        }
    }
}

#[derive(Deserialize)]
struct ReservationList {
    reservations: Vec<RemoteReservation>,
}

#[derive(Deserialize)]
struct RemoteReservation {
    id: String,
    check_in: NaiveDate,
    check_out: NaiveDate,
    #[serde(default)]
    guest_name: Option<String>,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
    property_id: &'a str,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// 429 and 5xx are retried later; every other refusal needs the owner.
pub fn classify_status(status: StatusCode, body: &str) -> AdapterError {
    let message = format!("{} {}", status.as_u16(), body.chars().take(200).collect::<String>());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        AdapterError::Transient(message)
    } else {
        AdapterError::Terminal(message)
    }
}

fn transport_error(err: reqwest::Error) -> AdapterError {
    AdapterError::Transient(format!("request failed: {}", err))
}

impl HttpPlatformAdapter {
    pub fn new(platform: Platform, base_url: impl Into<String>) -> Self {
        Self::with_client(platform, base_url, Client::new())
    }

    pub fn with_client(platform: Platform, base_url: impl Into<String>, client: Client) -> Self {
        Self {
            platform,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    fn unit_url(&self, connection: &PlatformConnection, tail: &str) -> String {
        format!(
            "{}/properties/{}/units/{}/{}",
            self.base_url, connection.external_property_id, connection.external_unit_id, tail
        )
    }

    fn authed(&self, method: Method, url: String, credential: &Credential) -> RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(credential.access_token.expose())
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, AdapterError> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }
}

#[async_trait]
impl PlatformAdapter for HttpPlatformAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn block(
        &self,
        connection: &PlatformConnection,
        credential: &Credential,
        ranges: &[StayDates],
    ) -> Result<(), AdapterError> {
        let url = self.unit_url(connection, "blocks");
        debug!("{} block {} range(s) at {}", self.platform, ranges.len(), url);
        let request = self
            .authed(Method::POST, url, credential)
            .json(&BlockRequest::from_stays(ranges));
        self.send(request).await.map(|_| ())
    }

    async fn unblock(
        &self,
        connection: &PlatformConnection,
        credential: &Credential,
        ranges: &[StayDates],
    ) -> Result<(), AdapterError> {
        let url = self.unit_url(connection, "blocks");
        debug!("{} unblock {} range(s) at {}", self.platform, ranges.len(), url);
        let request = self
            .authed(Method::DELETE, url, credential)
            .json(&BlockRequest::from_stays(ranges));
        self.send(request).await.map(|_| ())
    }

    async fn list_reservations(
        &self,
        connection: &PlatformConnection,
        credential: &Credential,
    ) -> Result<Vec<ExternalReservation>, AdapterError> {
        let url = self.unit_url(connection, "reservations");
        let response = self.send(self.authed(Method::GET, url, credential)).await?;
        let list: ReservationList = response
            .json()
            .await
            .map_err(|e| AdapterError::Transient(format!("unreadable reservation list: {}", e)))?;

        // Entries with impossible dates are skipped rather than failing the whole listing.
        Ok(list
            .reservations
            .into_iter()
            .filter_map(|r| {
                StayDates::new(r.check_in, r.check_out)
                    .ok()
                    .map(|stay| ExternalReservation {
                        external_id: r.id,
                        stay,
                        guest_name: r.guest_name,
                    })
            })
            .collect())
    }

    async fn refresh_credential(
        &self,
        connection: &PlatformConnection,
        refresh_token: &str,
    ) -> Result<RefreshedCredential, AdapterError> {
        let url = format!("{}/oauth/refresh", self.base_url);
        let request = self.client.post(url).json(&RefreshRequest {
            refresh_token,
            property_id: &connection.external_property_id,
        });
        let response = self.send(request).await?;
        let body: RefreshResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::Transient(format!("unreadable refresh response: {}", e)))?;

        let expires_at: Option<DateTime<Utc>> = body
            .expires_in
            .and_then(Duration::try_seconds)
            .map(|lifetime| Utc::now() + lifetime);
        Ok(RefreshedCredential {
            credential: Credential {
                access_token: Masked::new(body.access_token),
                refresh_token: body.refresh_token.map(Masked::new),
            },
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::connection;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credential() -> Credential {
        Credential {
            access_token: Masked::from("tok-123"),
            refresh_token: None,
        }
    }

    fn stay() -> StayDates {
        StayDates::new(
            NaiveDate::from_ymd_opt(2030, 7, 10).unwrap(),
            NaiveDate::from_ymd_opt(2030, 7, 15).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_status_classification() {
        assert!(!classify_status(StatusCode::SERVICE_UNAVAILABLE, "").is_terminal());
        assert!(!classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_terminal());
        assert!(classify_status(StatusCode::UNAUTHORIZED, "").is_terminal());
        assert!(classify_status(StatusCode::FORBIDDEN, "").is_terminal());
        assert!(classify_status(StatusCode::UNPROCESSABLE_ENTITY, "").is_terminal());
    }

    #[tokio::test]
    async fn test_block_posts_ranges_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/properties/ext-prop/units/ext-unit/blocks"))
            .and(header("authorization", "Bearer tok-123"))
            .and(body_json(serde_json::json!({
                "ranges": [{"start": "2030-07-10", "end": "2030-07-15"}]
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = HttpPlatformAdapter::new(Platform::Airbnb, server.uri());
        let conn = connection(Platform::Airbnb, "sealed");
        adapter.block(&conn, &credential(), &[stay()]).await.unwrap();
    }

    #[tokio::test]
    async fn test_failures_map_to_transient_or_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let adapter = HttpPlatformAdapter::new(Platform::Vrbo, server.uri());
        let conn = connection(Platform::Vrbo, "sealed");
        let blocked = adapter.block(&conn, &credential(), &[stay()]).await.unwrap_err();
        assert!(!blocked.is_terminal());
        let unblocked = adapter.unblock(&conn, &credential(), &[stay()]).await.unwrap_err();
        assert!(unblocked.is_terminal());
    }

    #[tokio::test]
    async fn test_lists_reservations_and_refreshes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/properties/ext-prop/units/ext-unit/reservations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "reservations": [
                    {"id": "HM123", "check_in": "2030-07-10", "check_out": "2030-07-15", "guest_name": "Ada"},
                    {"id": "BROKEN", "check_in": "2030-07-15", "check_out": "2030-07-10"}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok-456",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;

        let adapter = HttpPlatformAdapter::new(Platform::BookingCom, format!("{}/", server.uri()));
        let conn = connection(Platform::BookingCom, "sealed");

        let listed = adapter.list_reservations(&conn, &credential()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].external_id, "HM123");
        assert_eq!(listed[0].stay, stay());

        let refreshed = adapter.refresh_credential(&conn, "refresh-1").await.unwrap();
        assert_eq!(refreshed.credential.access_token.expose(), "tok-456");
        assert!(refreshed.credential.refresh_token.is_none());
        assert!(refreshed.expires_at.is_some());
    }
}

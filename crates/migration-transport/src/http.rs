//! `reqwest`-backed implementation of [`SqlTransport`] and
//! [`ProvisioningTransport`] against the remote HTTP SQL-execution API.

use async_trait::async_trait;
use reqwest::{Client as HttpClient, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, TransportError};
use crate::{ProvisioningTransport, SqlTransport};

#[derive(Debug, Serialize)]
struct ExecuteBatchRequest<'a> {
    database: &'a str,
    statements: &'a [String],
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Serialize)]
struct ProvisionRequest<'a> {
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    database: &'a str,
    sql: &'a str,
}

#[derive(Debug, Deserialize)]
struct QueryCountResponse {
    count: i64,
}

/// Talks to the remote SQL-execution organization endpoint over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpSqlTransport {
    http_client: HttpClient,
    base_url: Url,
    organization: String,
    api_key: String,
}

impl HttpSqlTransport {
    pub fn new(base_url: Url, organization: impl Into<String>, api_key: impl Into<String>) -> Self {
        let http_client = HttpClient::builder()
            .user_agent("migration-engine/1.0")
            .build()
            .expect("failed to build HTTP client");
        Self {
            http_client,
            base_url,
            organization: organization.into(),
            api_key: api_key.into(),
        }
    }

    pub fn from_url(
        base_url: &str,
        organization: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self::new(Url::parse(base_url)?, organization, api_key))
    }

    async fn handle_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
            return Err(TransportError::Timeout);
        }
        let text = response.text().await?;
        match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => Err(TransportError::ServerError {
                status: status.as_u16(),
                message: body.message,
            }),
            Err(_) => Err(TransportError::UnexpectedResponse(text)),
        }
    }

    async fn handle_count_response(&self, response: reqwest::Response) -> Result<i64> {
        let status = response.status();
        if status.is_success() {
            let body: QueryCountResponse = response.json().await?;
            return Ok(body.count);
        }
        if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
            return Err(TransportError::Timeout);
        }
        let text = response.text().await?;
        match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => Err(TransportError::ServerError {
                status: status.as_u16(),
                message: body.message,
            }),
            Err(_) => Err(TransportError::UnexpectedResponse(text)),
        }
    }
}

#[async_trait]
impl SqlTransport for HttpSqlTransport {
    async fn execute_batch(&self, database_name: &str, auth_token: &str, stmts: &[String]) -> Result<()> {
        let url = self
            .base_url
            .join(&format!("/v1/org/{}/databases/{}/execute", self.organization, database_name))?;
        let response = self
            .http_client
            .post(url)
            .bearer_auth(auth_token)
            .header("X-Api-Key", &self.api_key)
            .json(&ExecuteBatchRequest {
                database: database_name,
                statements: stmts,
            })
            .send()
            .await
            .map_err(|e| if e.is_timeout() { TransportError::Timeout } else { TransportError::Http(e) })?;
        self.handle_response(response).await
    }

    async fn query_count(&self, database_name: &str, auth_token: &str, sql: &str) -> Result<i64> {
        let url = self
            .base_url
            .join(&format!("/v1/org/{}/databases/{}/query", self.organization, database_name))?;
        let response = self
            .http_client
            .post(url)
            .bearer_auth(auth_token)
            .header("X-Api-Key", &self.api_key)
            .json(&QueryRequest { database: database_name, sql })
            .send()
            .await
            .map_err(|e| if e.is_timeout() { TransportError::Timeout } else { TransportError::Http(e) })?;
        self.handle_count_response(response).await
    }
}

#[async_trait]
impl ProvisioningTransport for HttpSqlTransport {
    async fn create_database(&self, name: &str) -> Result<()> {
        let url = self
            .base_url
            .join(&format!("/v1/org/{}/databases", self.organization))?;
        let response = self
            .http_client
            .post(url)
            .header("X-Api-Key", &self.api_key)
            .json(&ProvisionRequest { name })
            .send()
            .await
            .map_err(|e| if e.is_timeout() { TransportError::Timeout } else { TransportError::Http(e) })?;
        self.handle_response(response).await
    }

    async fn delete_database(&self, name: &str) -> Result<()> {
        let url = self
            .base_url
            .join(&format!("/v1/org/{}/databases/{}", self.organization, name))?;
        let response = self
            .http_client
            .delete(url)
            .header("X-Api-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| if e.is_timeout() { TransportError::Timeout } else { TransportError::Http(e) })?;
        self.handle_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_url_rejects_malformed_base_url() {
        let err = HttpSqlTransport::from_url("not a url", "acme", "key").unwrap_err();
        assert!(matches!(err, TransportError::Url(_)));
    }

    #[tokio::test]
    async fn execute_batch_request_body_shape() {
        // Exercises request construction without a live server: confirms
        // serialization succeeds and doesn't panic on an empty batch.
        let body = ExecuteBatchRequest {
            database: "tenant_1",
            statements: &[],
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("tenant_1"));
    }
}

use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_RANGE, CONTENT_TYPE},
    Client, Method,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error};

use shared_config::AppConfig;

use crate::error::DbError;

/// `Prefer` values understood by PostgREST.
pub const RETURN_REPRESENTATION: &str = "return=representation";
pub const COUNT_EXACT: &str = "count=exact";

#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            anon_key: config.supabase_anon_key.clone(),
        }
    }

    fn get_headers(&self, prefer: Option<&str>) -> Result<HeaderMap, DbError> {
        let mut headers = HeaderMap::new();

        let key = HeaderValue::from_str(&self.anon_key)
            .map_err(|e| DbError::Other(format!("invalid anon key header: {}", e)))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.anon_key))
            .map_err(|e| DbError::Other(format!("invalid authorization header: {}", e)))?;

        headers.insert(HeaderName::from_static("apikey"), key);
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(prefer) = prefer {
            let value = HeaderValue::from_str(prefer)
                .map_err(|e| DbError::Other(format!("invalid prefer header: {}", e)))?;
            headers.insert(HeaderName::from_static("prefer"), value);
        }

        Ok(headers)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        prefer: Option<&str>,
    ) -> Result<reqwest::Response, DbError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);

        let mut req = self.client.request(method, &url).headers(self.get_headers(prefer)?);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("API error ({}): {}", status, error_text);
            return Err(DbError::from_status(status.as_u16(), &error_text));
        }

        Ok(response)
    }

    pub async fn request<T>(&self, method: Method, path: &str, body: Option<Value>) -> Result<T, DbError>
    where
        T: DeserializeOwned,
    {
        let response = self.send(method, path, body, None).await?;
        Ok(response.json::<T>().await?)
    }

    /// Like `request`, with a `Prefer` header (e.g. `return=representation` for writes).
    pub async fn request_with_prefer<T>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        prefer: &str,
    ) -> Result<T, DbError>
    where
        T: DeserializeOwned,
    {
        let response = self.send(method, path, body, Some(prefer)).await?;
        Ok(response.json::<T>().await?)
    }

    /// GET with `Prefer: count=exact`; the total comes from the `Content-Range` header.
    pub async fn request_with_count<T>(&self, path: &str) -> Result<(T, Option<u64>), DbError>
    where
        T: DeserializeOwned,
    {
        let response = self.send(Method::GET, path, None, Some(COUNT_EXACT)).await?;

        let total = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_content_range_total);

        Ok((response.json::<T>().await?, total))
    }

    pub fn get_base_url(&self) -> &str {
        &self.base_url
    }
}

/// `0-9/42` -> 42, `*/0` -> 0, `0-9/*` -> None.
pub fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit_once('/').and_then(|(_, total)| total.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> SupabaseClient {
        let config = AppConfig {
            supabase_url: server.uri(),
            supabase_anon_key: "test-anon-key".to_string(),
            ..AppConfig::default()
        };
        SupabaseClient::new(&config)
    }

    #[test]
    fn test_content_range_parsing() {
        assert_eq!(parse_content_range_total("0-9/42"), Some(42));
        assert_eq!(parse_content_range_total("*/0"), Some(0));
        assert_eq!(parse_content_range_total("0-9/*"), None);
    }

    #[tokio::test]
    async fn test_sends_api_key_and_decodes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/things"))
            .and(header("apikey", "test-anon-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 1 }])))
            .mount(&server)
            .await;

        let rows: Vec<Value> = client_for(&server)
            .request(Method::GET, "/rest/v1/things", None)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_count_and_error_classification() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/counted"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-range", "0-1/7")
                    .set_body_json(json!([{}, {}])),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/unique"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({ "code": "23505" })))
            .mount(&server)
            .await;

        let client = client_for(&server);

        let (rows, total): (Vec<Value>, _) = client.request_with_count("/rest/v1/counted").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(total, Some(7));

        let conflict = client
            .request_with_prefer::<Vec<Value>>(Method::POST, "/rest/v1/unique", Some(json!({})), RETURN_REPRESENTATION)
            .await;
        assert_matches!(conflict, Err(DbError::Conflict(_)));
    }
}

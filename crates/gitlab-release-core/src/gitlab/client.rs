//! Retrying GitLab HTTP client.
//!
//! Wraps `reqwest` with the resolved credential header, the explicitly
//! selected proxy and the retry policy. Every non-2xx response that survives
//! the retries is turned into an [`ApiError`] with the status and body as
//! received, so callers can map the statuses they know and rethrow the rest.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::{ResolvedConfig, TokenHeader};
use crate::error::{ApiError, PluginError, Result};
use crate::retry::{retry_with_backoff, RetryPolicy};

fn user_agent() -> String {
    format!("gitlab-release/{}", crate::VERSION)
}

/// GitLab API client bound to one credential.
#[derive(Debug, Clone)]
pub struct GitLabClient {
    http: reqwest::Client,
    token: Option<String>,
    token_header: TokenHeader,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Option<Vec<Value>>,
}

impl GitLabClient {
    /// Build a client from the resolved configuration.
    pub fn new(config: &ResolvedConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(user_agent())
            .timeout(Duration::from_millis(config.retry.timeout_ms))
            .no_proxy();

        if let Some(selection) = &config.proxy {
            debug!(scheme = %selection.scheme, "routing GitLab requests through proxy");
            builder = builder.proxy(reqwest::Proxy::all(&selection.url)?);
        }

        Ok(Self {
            http: builder.build()?,
            token: config.gitlab_token.clone(),
            token_header: config.token_header,
            retry: config.retry.clone(),
        })
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.send(Method::GET, url, |request| request).await?;
        Ok(response.json().await?)
    }

    pub async fn post_json<B, T>(&self, url: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .send(Method::POST, url, |request| request.json(body))
            .await?;
        Ok(response.json().await?)
    }

    /// `POST` a file as the `file` field of a multipart form.
    pub async fn post_file<T: DeserializeOwned>(
        &self,
        url: &str,
        file_name: &str,
        contents: &[u8],
    ) -> Result<T> {
        let response = self
            .send(Method::POST, url, |request| {
                let part = Part::bytes(contents.to_vec()).file_name(file_name.to_string());
                request.multipart(Form::new().part("file", part))
            })
            .await?;
        Ok(response.json().await?)
    }

    /// `PUT` raw bytes (generic package upload).
    pub async fn put_bytes<T: DeserializeOwned>(&self, url: &str, contents: &[u8]) -> Result<T> {
        let response = self
            .send(Method::PUT, url, |request| request.body(contents.to_vec()))
            .await?;
        Ok(response.json().await?)
    }

    /// Run a GraphQL query and return its `data`, if any.
    pub async fn graphql<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &str,
        variables: Value,
    ) -> Result<Option<T>> {
        let body = json!({ "query": query, "variables": variables });
        let response: GraphQlResponse<T> = self.post_json(url, &body).await?;
        if let Some(errors) = response.errors.filter(|e| !e.is_empty()) {
            debug!(count = errors.len(), "GraphQL query returned errors");
        }
        Ok(response.data)
    }

    /// Send a request with retries; fail with [`ApiError`] on a non-2xx status.
    async fn send<F>(&self, method: Method, url: &str, build: F) -> Result<Response>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        debug!(%method, url, "GitLab request");
        let outcome = retry_with_backoff(
            &self.retry,
            || build(self.request(method.clone(), url)).send(),
            |outcome| match outcome {
                Ok(response) => self.retry.is_retryable_status(response.status().as_u16()),
                Err(err) => err.is_connect() || err.is_timeout(),
            },
        )
        .await;

        let response = outcome.map_err(PluginError::Http)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        debug!(%method, url, status = status.as_u16(), "GitLab request failed");
        Err(ApiError {
            method: method.to_string(),
            url: url.to_string(),
            status: status.as_u16(),
            body,
        }
        .into())
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let request = self
            .http
            .request(method, url)
            .header(reqwest::header::ACCEPT, "application/json");
        match &self.token {
            Some(token) => request.header(self.token_header.as_str(), token),
            None => request,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve_config, PluginConfig};
    use crate::context::Context;
    use std::collections::HashMap;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(retry_limit: u32) -> GitLabClient {
        let ctx = Context {
            env: HashMap::from([("GL_TOKEN".to_string(), "secret".to_string())]),
            ..Default::default()
        };
        let mut config = resolve_config(&PluginConfig::default(), &ctx);
        config.retry = RetryPolicy {
            limit: retry_limit,
            backoff_base_ms: 1,
            ..RetryPolicy::default()
        };
        GitLabClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_sends_private_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/thing"))
            .and(header("PRIVATE-TOKEN", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let body: Value = client(0)
            .get_json(&format!("{}/thing", server.uri()))
            .await
            .unwrap();
        assert_eq!(body, json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_sends_versioned_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/agent"))
            .and(header("user-agent", format!("gitlab-release/{}", crate::VERSION).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let body: Value = client(0)
            .get_json(&format!("{}/agent", server.uri()))
            .await
            .unwrap();
        assert_eq!(body, json!({}));
    }

    #[tokio::test]
    async fn test_non_success_becomes_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .mount(&server)
            .await;

        let err = client(0)
            .get_json::<Value>(&format!("{}/missing", server.uri()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_retries_retryable_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 1})))
            .mount(&server)
            .await;

        let body: Value = client(3)
            .post_json(&format!("{}/flaky", server.uri()), &json!({}))
            .await
            .unwrap();
        assert_eq!(body, json!({"id": 1}));
    }

    #[tokio::test]
    async fn test_does_not_retry_client_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/denied"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(3)
            .get_json::<Value>(&format!("{}/denied", server.uri()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(401));
    }
}

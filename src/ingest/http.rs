// src/ingest/http.rs
use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

use crate::error::{FetchError, ParseError};

/// Error bodies are cut to this many chars before they land in run errors.
const ERROR_BODY_MAX: usize = 320;

/// Shared HTTP client: every request carries the aggregator user agent and is
/// bounded by `timeout`.
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: Client,
    user_agent: String,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            user_agent: user_agent.to_string(),
            timeout,
        }
    }

    fn request(&self, url: &str) -> RequestBuilder {
        self.client
            .get(url)
            .timeout(self.timeout)
            .header(USER_AGENT, &self.user_agent)
    }

    /// GET `url` and return the body as text.
    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        self.send(url, self.request(url)).await
    }

    /// GET `url` with optional bearer auth and query, decoding the JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        bearer: Option<&str>,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let mut req = self
            .request(url)
            .header(ACCEPT, "application/json")
            .query(query);
        if let Some(token) = bearer {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = self.send(url, req).await?;
        serde_json::from_str(&body).map_err(|e| FetchError::Parse(ParseError::Json(e.to_string())))
    }

    async fn send(&self, url: &str, req: RequestBuilder) -> Result<String, FetchError> {
        let resp = req.send().await.map_err(|e| self.map_err(url, e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body: body.chars().take(ERROR_BODY_MAX).collect(),
            });
        }
        resp.text().await.map_err(|e| {
            if e.is_timeout() {
                self.timeout_error()
            } else {
                FetchError::Body {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        })
    }

    fn map_err(&self, url: &str, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            self.timeout_error()
        } else {
            FetchError::Request {
                url: url.to_string(),
                message: e.to_string(),
            }
        }
    }

    fn timeout_error(&self) -> FetchError {
        FetchError::Timeout(self.timeout)
    }
}

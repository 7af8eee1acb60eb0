//! HTTP transport for check-in requests

use crate::config::{HttpMethod, HttpStatusPolicy, TargetConfig};
use crate::cookies::CookieJar;
use crate::errors::{AgentError, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde_json::{Map, Value};
use std::error::Error as _;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::debug;

/// Result of one check-in request
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Parsed response body
    Success(Value),
    /// Non-2xx status
    HttpError(u16),
    /// Deadline expired; the request was dropped
    Timeout,
    TransportOrParseError(String),
}

/// Issues the request for one target
#[async_trait]
pub trait CheckinExecutor: Send + Sync {
    /// Never fails: every failure mode is an [`Outcome`]
    async fn execute(&self, target: &TargetConfig) -> Outcome;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    policy: HttpStatusPolicy,
}

impl HttpTransport {
    /// Create a new transport, optionally sending cookies from `jar`
    pub fn new(jar: Option<Arc<CookieJar>>, policy: HttpStatusPolicy) -> Result<Self> {
        let mut builder =
            Client::builder().user_agent(format!("checkin_agent/{}", env!("CARGO_PKG_VERSION")));

        if let Some(jar) = jar {
            builder = builder.cookie_provider(jar);
        }

        let client = builder.build().map_err(AgentError::Http)?;

        Ok(Self { client, policy })
    }

    fn build_request(&self, target: &TargetConfig) -> RequestBuilder {
        let method = match target.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
        };

        let request = self
            .client
            .request(method, &target.url)
            .header(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));

        match (target.method, &target.request_param) {
            (HttpMethod::Post, Some(param)) => {
                let mut body = Map::new();
                body.insert(target.request_param_key.clone(), Value::String(param.clone()));
                request.json(&body)
            }
            _ => request,
        }
    }

    async fn attempt(&self, target: &TargetConfig) -> Outcome {
        debug!(
            "Sending {:?} check-in for item {} to {}",
            target.method, target.id, target.url
        );

        let response = match self.build_request(target).send().await {
            Ok(response) => response,
            Err(e) => return Outcome::TransportOrParseError(describe(&e)),
        };

        self.handle_response(response).await
    }

    /// Turn the HTTP response into an outcome according to the status policy
    async fn handle_response(&self, response: Response) -> Outcome {
        let status = response.status();

        if !status.is_success() {
            let code = status.as_u16();
            return match self.policy {
                HttpStatusPolicy::Strict => Outcome::HttpError(code),
                HttpStatusPolicy::Permissive => match response.json::<Value>().await {
                    Ok(body) => {
                        debug!("Status {} carried a JSON body, matching on it", code);
                        Outcome::Success(body)
                    }
                    Err(_) => Outcome::HttpError(code),
                },
            };
        }

        match response.json::<Value>().await {
            Ok(body) => Outcome::Success(body),
            Err(e) => Outcome::TransportOrParseError(describe(&e)),
        }
    }
}

#[async_trait]
impl CheckinExecutor for HttpTransport {
    async fn execute(&self, target: &TargetConfig) -> Outcome {
        match timeout(target.timeout(), self.attempt(target)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                debug!("Item {} timed out after {}ms", target.id, target.timeout_ms);
                Outcome::Timeout
            }
        }
    }
}

/// Error text including the innermost cause
fn describe(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message = format!("{}: {}", message, cause);
        source = cause.source();
    }
    message
}

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub mod bookmarks;
pub mod saved;
pub mod socket;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum SlackError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("slack api {method} returned error: {error}")]
    Api { method: String, error: String },
    #[error("unexpected response from {method}: {message}")]
    Decode { method: String, message: String },
}

/// Thin Web API client. Every Slack method answers 200 with an `ok` flag, so
/// the flag is checked here before the body is decoded into `T`.
#[derive(Clone)]
pub struct SlackClient {
    http: reqwest::Client,
}

impl SlackClient {
    pub fn new() -> Result<Self, SlackError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("backlog-hub/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub async fn post_form<T: DeserializeOwned>(
        &self,
        base: &Url,
        method: &str,
        token: &str,
        form: &[(&str, &str)],
    ) -> Result<T, SlackError> {
        let url = base.join(method)?;
        let body: Value = self
            .http
            .post(url)
            .bearer_auth(token)
            .form(form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        decode_api_response(method, body)
    }
}

pub fn decode_api_response<T: DeserializeOwned>(method: &str, body: Value) -> Result<T, SlackError> {
    let ok = body.get("ok").and_then(Value::as_bool).unwrap_or(false);
    if !ok {
        let error = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error")
            .to_string();
        return Err(SlackError::Api {
            method: method.to_string(),
            error,
        });
    }
    serde_json::from_value(body).map_err(|err| SlackError::Decode {
        method: method.to_string(),
        message: err.to_string(),
    })
}

use std::time::Duration;

use anyhow::Context;
use reqwest::{header::CONTENT_TYPE, Method};
use serde::de::DeserializeOwned;
use tracing::debug;

use vent_common::{
    config::CloudConfig,
    sign_request,
    types::{CloudResponse, PropertiesResult, TokenResult},
    Credentials, Property, SignedRequest, SwitchCommand, Token,
};

use crate::error::{ControlError, Result};

pub const TOKEN_PATH: &str = "/v1.0/token?grant_type=1";

pub fn properties_path(device_id: &str) -> String {
    format!("/v2.0/cloud/thing/{device_id}/shadow/properties")
}

pub fn issue_path(device_id: &str) -> String {
    format!("/v2.0/cloud/thing/{device_id}/shadow/properties/issue")
}

/// Why a cloud call did not produce a usable payload.
#[derive(Debug)]
struct CallFailure {
    msg: Option<String>,
    body: String,
    status: Option<u16>,
}

impl CallFailure {
    fn message(&self) -> String {
        self.msg.clone().unwrap_or_else(|| self.body.clone())
    }
}

#[derive(Clone)]
pub struct CloudSession {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
}

impl CloudSession {
    pub fn new(config: &CloudConfig, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build cloud http client")?;
        Ok(Self::with_client(config, http))
    }

    pub fn with_client(config: &CloudConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials: config.credentials(),
        }
    }

    pub async fn acquire_token(&self) -> Result<Token> {
        let issued_at_ms = now_ms();
        let response = self
            .call::<TokenResult>(None, Method::GET, TOKEN_PATH, String::new())
            .await
            .map_err(|failure| ControlError::Authentication {
                endpoint: TOKEN_PATH.to_string(),
                message: failure.message(),
                status: failure.status,
            })?;

        let Some(result) = response.result else {
            return Err(ControlError::Authentication {
                endpoint: TOKEN_PATH.to_string(),
                message: "token response carried no result".to_string(),
                status: None,
            });
        };

        debug!("cloud token acquired");
        Ok(Token {
            value: result.access_token,
            issued_at_ms,
        })
    }

    /// Signs one call. The returned `canonical_path` is the request target to
    /// use, since canonicalization may reorder the caller's query.
    pub fn build_signed_headers(
        &self,
        token: Option<&Token>,
        method: &Method,
        path: &str,
        body: &str,
    ) -> SignedRequest {
        sign_request(
            &self.credentials,
            token.map(|token| token.value.as_str()),
            now_ms(),
            method.as_str(),
            path,
            &[],
            body,
        )
    }

    pub async fn issue_command(&self, token: &Token, device_id: &str, is_on: bool) -> Result<()> {
        let path = issue_path(device_id);
        let command_error = |message: String, status: Option<u16>| ControlError::Command {
            endpoint: path.clone(),
            message,
            status,
        };

        let body = serde_json::to_string(&SwitchCommand::new(is_on))
            .map_err(|err| command_error(format!("failed to encode command: {err}"), None))?;

        self.call::<serde_json::Value>(Some(token), Method::POST, &path, body)
            .await
            .map_err(|failure| command_error(failure.body, failure.status))?;

        Ok(())
    }

    pub async fn fetch_properties(&self, token: &Token, device_id: &str) -> Result<Vec<Property>> {
        let path = properties_path(device_id);
        let response = self
            .call::<PropertiesResult>(Some(token), Method::GET, &path, String::new())
            .await
            .map_err(|failure| ControlError::Query {
                endpoint: path.clone(),
                message: failure.message(),
                status: failure.status,
            })?;

        let Some(result) = response.result else {
            return Err(ControlError::Query {
                endpoint: path,
                message: "properties response carried no result".to_string(),
                status: None,
            });
        };
        Ok(result.properties)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        token: Option<&Token>,
        method: Method,
        path: &str,
        body: String,
    ) -> std::result::Result<CloudResponse<T>, CallFailure> {
        let signed = self.build_signed_headers(token, &method, path, &body);
        let url = format!("{}{}", self.base_url, signed.canonical_path);

        let mut request = self.http.request(method, &url);
        for (name, value) in signed.headers() {
            request = request.header(name, value);
        }
        if !body.is_empty() {
            request = request.header(CONTENT_TYPE, "application/json").body(body);
        }

        let response = request.send().await.map_err(|err| CallFailure {
            msg: Some(format!("request failed: {err}")),
            body: err.to_string(),
            status: err.status().map(|status| status.as_u16()),
        })?;

        let status = response.status();
        let raw = response.text().await.map_err(|err| CallFailure {
            msg: Some(format!("failed to read response: {err}")),
            body: err.to_string(),
            status: Some(status.as_u16()),
        })?;

        if !status.is_success() {
            return Err(CallFailure {
                msg: None,
                body: raw,
                status: Some(status.as_u16()),
            });
        }

        let parsed: CloudResponse<T> = serde_json::from_str(&raw).map_err(|err| CallFailure {
            msg: Some(format!("undecodable response ({err}): {raw}")),
            body: raw.clone(),
            status: Some(status.as_u16()),
        })?;

        if !parsed.success {
            return Err(CallFailure {
                msg: parsed.msg,
                body: raw,
                status: Some(status.as_u16()),
            });
        }

        Ok(parsed)
    }
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

//! Registrar REST client: anonymous registration and token reactivation.
//!
//! Both calls go over HTTPS with a 2-second total timeout. SSL
//! verification is configurable (dev gateways commonly run self-signed
//! certs) rather than forced off, per spec §9's note on the source's
//! inconsistent handling of that flag.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RetunnelError, Result};

const REGISTRAR_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize)]
struct RegisterRequest {
    email: String,
}

#[derive(Debug, Serialize)]
struct ReactivateRequest {
    old_token: String,
}

#[derive(Debug, Deserialize)]
pub struct RegistrationResult {
    pub auth_token: String,
    pub email: String,
}

/// Outcome of a reactivation attempt, distinguishing "unknown token" (404)
/// from any other failure so the caller can fall back to registration.
pub enum ReactivateOutcome {
    Reactivated(RegistrationResult),
    TokenNotFound,
}

pub struct RegistrarClient {
    http: reqwest::Client,
    api_url: String,
}

impl RegistrarClient {
    pub fn new(api_url: impl Into<String>, verify_ssl: bool) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REGISTRAR_TIMEOUT)
            .danger_accept_invalid_certs(!verify_ssl)
            .build()?;
        Ok(Self {
            http,
            api_url: api_url.into(),
        })
    }

    /// `POST /api/v1/auth/register` with a synthetic anonymous email.
    pub async fn register_anonymous(&self) -> Result<RegistrationResult> {
        let email = format!("anon-{:08x}@retunnel.com", rand::random::<u32>());
        let url = format!("{}/api/v1/auth/register", self.api_url.trim_end_matches('/'));
        let resp = self
            .http
            .post(&url)
            .json(&RegisterRequest { email })
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(RetunnelError::Api {
                message: format!("registration failed: {}", resp.status()),
                status: Some(resp.status().as_u16()),
            });
        }
        Ok(resp.json::<RegistrationResult>().await?)
    }

    /// `POST /api/v1/auth/reactivate-token`. A 404 response is reported
    /// as `TokenNotFound` rather than an error so callers can fall back
    /// to `register_anonymous` per spec §4.5.
    pub async fn reactivate_token(&self, old_token: &str) -> Result<ReactivateOutcome> {
        let url = format!(
            "{}/api/v1/auth/reactivate-token",
            self.api_url.trim_end_matches('/')
        );
        let resp = self
            .http
            .post(&url)
            .json(&ReactivateRequest {
                old_token: old_token.to_owned(),
            })
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(ReactivateOutcome::TokenNotFound);
        }
        if !resp.status().is_success() {
            return Err(RetunnelError::Api {
                message: format!("token reactivation failed: {}", resp.status()),
                status: Some(resp.status().as_u16()),
            });
        }
        Ok(ReactivateOutcome::Reactivated(
            resp.json::<RegistrationResult>().await?,
        ))
    }

    /// Runs token repair: reactivate the old token, falling back to a
    /// fresh anonymous registration on a 404.
    pub async fn repair_token(&self, old_token: Option<&str>) -> Result<RegistrationResult> {
        match old_token {
            Some(token) => match self.reactivate_token(token).await? {
                ReactivateOutcome::Reactivated(result) => Ok(result),
                ReactivateOutcome::TokenNotFound => self.register_anonymous().await,
            },
            None => self.register_anonymous().await,
        }
    }
}

// Integration tests live in `tests/registrar.rs` — they exercise this
// client against a real (mocked) HTTP server, which fits better as a
// black-box test of the crate's public API than a unit test here.

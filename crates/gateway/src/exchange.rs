use crate::error::AppError;
use serde::Deserialize;

/// Token-exchange client (C2), ported from `_exchange_jwt_descope`: trades an
/// external JWT for a trusted one at a provider-specific endpoint using the
/// `urn:ietf:params:oauth:grant-type:jwt-bearer` grant.
///
/// Only invoked by C3 after C1 fails with a *transient* cause (`KidUnknown`
/// or `IssuerUnknown`); permanent failures short-circuit before reaching it.
#[derive(Clone)]
pub struct ExchangeClient {
    http: reqwest::Client,
    exchange_url: String,
    client_id: String,
    client_secret: String,
    issuer: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    access_token: String,
}

impl ExchangeClient {
    pub fn new(
        http: reqwest::Client,
        exchange_url: String,
        client_id: String,
        client_secret: String,
        issuer: String,
    ) -> Self {
        Self {
            http,
            exchange_url,
            client_id,
            client_secret,
            issuer,
        }
    }

    /// Exchange `external_jwt` for a token trusted by our own issuer.
    pub async fn exchange(&self, external_jwt: &str) -> Result<String, AppError> {
        let form = [
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", external_jwt),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("issuer", self.issuer.as_str()),
        ];

        let resp = self
            .http
            .post(&self.exchange_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AppError::ExchangeFailed(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::ExchangeFailed(format!("{status}: {body}")));
        }

        let parsed: ExchangeResponse = resp
            .json()
            .await
            .map_err(|e| AppError::ExchangeFailed(e.to_string()))?;
        Ok(parsed.access_token)
    }
}

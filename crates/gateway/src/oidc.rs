use crate::error::AppError;
use anyhow::Context as _;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};
use tokio::sync::RwLock;

const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(5);
const SUPPORTED_ALGS: [Algorithm; 2] = [Algorithm::RS256, Algorithm::ES256];

/// OIDC/JWT validator with a refreshing JWKS cache (C1).
///
/// Generic over issuer, so the same type serves the primary Auth0-style
/// issuer and, when token exchange is enabled, the Descope-style provider
/// issuer with a second instance.
#[derive(Clone)]
pub struct OidcValidator {
    inner: Arc<Inner>,
}

struct Inner {
    issuer: String,
    audiences: Vec<String>,
    jwks_uri: String,
    leeway_secs: u64,
    refresh_after: Duration,
    http: reqwest::Client,
    jwks: RwLock<JwksCache>,
}

#[derive(Clone, Default)]
struct JwksCache {
    next_refresh_after: Option<Instant>,
    last_refresh_attempt: Option<Instant>,
    keys_by_kid: HashMap<String, DecodingKey>,
}

#[derive(Debug, Clone)]
pub struct OidcConfig {
    pub issuer: String,
    pub audiences: Vec<String>,
    pub jwks_uri: String,
    pub leeway_secs: u64,
    pub jwks_refresh_secs: u64,
}

impl OidcValidator {
    /// Build a validator for `issuer`, discovering its JWKS endpoint unless
    /// `jwks_uri_override` names one explicitly.
    pub async fn discover(
        http: reqwest::Client,
        issuer: &str,
        audience: &str,
        leeway_secs: u64,
        jwks_refresh_secs: u64,
        jwks_uri_override: Option<&str>,
    ) -> anyhow::Result<Self> {
        let jwks_uri = match jwks_uri_override {
            Some(v) => v.to_string(),
            None => discover_jwks_uri(&http, issuer).await?,
        };
        Ok(Self::new(
            http,
            OidcConfig {
                issuer: issuer.to_string(),
                audiences: vec![audience.to_string()],
                jwks_uri,
                leeway_secs,
                jwks_refresh_secs,
            },
        ))
    }

    #[must_use]
    pub fn new(http: reqwest::Client, cfg: OidcConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                issuer: cfg.issuer,
                audiences: cfg.audiences,
                jwks_uri: cfg.jwks_uri,
                leeway_secs: cfg.leeway_secs,
                refresh_after: Duration::from_secs(cfg.jwks_refresh_secs.max(5)),
                http,
                jwks: RwLock::new(JwksCache::default()),
            }),
        }
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.inner.issuer
    }

    /// Verify `jwt` and return its decoded claims, classifying failures as
    /// permanent or transient per spec §4.1/§7.
    ///
    /// Step 1 parses the header without verifying the signature so that
    /// `AlgNotAllowed`/`KidMissing`/the `crit` check never touch the network.
    /// Only a `kid` miss triggers a JWKS refresh, and at most one.
    pub async fn validate(&self, jwt: &str) -> Result<serde_json::Value, AppError> {
        let header = jsonwebtoken::decode_header(jwt)
            .map_err(|e| AppError::Malformed(e.to_string()))?;

        if jwt_has_crit_header(jwt).map_err(|e| AppError::Malformed(e.to_string()))? {
            return Err(AppError::Malformed("unsupported crit header".to_string()));
        }

        if !SUPPORTED_ALGS.contains(&header.alg) {
            return Err(AppError::AlgNotAllowed);
        }
        let kid = header.kid.as_deref().ok_or(AppError::KidMissing)?;

        if let Some(key) = self.get_key_if_present(kid).await {
            return self.decode_with_key(jwt, &key, header.alg);
        }

        self.refresh_jwks_if_needed(Some(kid))
            .await
            .map_err(|e| AppError::UpstreamIO(e.to_string()))?;

        let key = self
            .get_key_if_present(kid)
            .await
            .ok_or(AppError::KidUnknown)?;

        self.decode_with_key(jwt, &key, header.alg)
    }

    fn decode_with_key(
        &self,
        jwt: &str,
        key: &DecodingKey,
        alg: Algorithm,
    ) -> Result<serde_json::Value, AppError> {
        let mut validation = Validation::new(alg);
        validation.leeway = self.inner.leeway_secs;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_issuer(&[self.inner.issuer.as_str()]);
        if !self.inner.audiences.is_empty() {
            let aud: Vec<&str> = self.inner.audiences.iter().map(String::as_str).collect();
            validation.set_audience(&aud);
        }

        let claims = jsonwebtoken::decode::<serde_json::Value>(jwt, key, &validation)
            .map(|data| data.claims)
            .map_err(classify_decode_error)?;

        check_iat_not_in_future(&claims, self.inner.leeway_secs)?;

        Ok(claims)
    }

    async fn get_key_if_present(&self, kid: &str) -> Option<DecodingKey> {
        let cache = self.inner.jwks.read().await;
        cache.keys_by_kid.get(kid).cloned()
    }

    async fn refresh_jwks_if_needed(&self, maybe_kid: Option<&str>) -> anyhow::Result<()> {
        let now = Instant::now();

        {
            let cache = self.inner.jwks.read().await;
            let stale = cache.next_refresh_after.is_none_or(|t| now >= t);
            let missing = maybe_kid.is_some_and(|kid| !cache.keys_by_kid.contains_key(kid));
            if !stale && !missing {
                return Ok(());
            }
        }

        let mut cache = self.inner.jwks.write().await;
        let stale = cache.next_refresh_after.is_none_or(|t| now >= t);
        let missing = maybe_kid.is_some_and(|kid| !cache.keys_by_kid.contains_key(kid));
        if !stale && !missing {
            return Ok(());
        }

        // Avoid tight refresh loops (e.g. a client sends random kids).
        if let Some(last) = cache.last_refresh_attempt
            && now.duration_since(last) < MIN_REFRESH_INTERVAL
        {
            return Ok(());
        }
        cache.last_refresh_attempt = Some(now);

        let (keys_by_kid, cache_ttl) = fetch_jwks(&self.inner.http, &self.inner.jwks_uri).await?;
        cache.keys_by_kid = keys_by_kid;
        cache.next_refresh_after = Some(now + cache_ttl.unwrap_or(self.inner.refresh_after));

        Ok(())
    }
}

/// `jsonwebtoken` only validates `exp`/`nbf`; `iat` is checked manually here,
/// mirroring `_verify_jwt_direct`/`_verify_jwt_against`'s `verify_iat: True`.
/// A future-dated `iat` beyond leeway is treated as permanent (`Malformed`),
/// not exchanged.
fn check_iat_not_in_future(claims: &serde_json::Value, leeway_secs: u64) -> Result<(), AppError> {
    let Some(iat) = claims.get("iat").and_then(|v| v.as_i64()) else {
        return Ok(());
    };
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    if iat > now + leeway_secs as i64 {
        return Err(AppError::Malformed("iat is in the future".to_string()));
    }
    Ok(())
}

/// Maps a `jsonwebtoken` decode failure onto the closed taxonomy. Expired
/// signatures are permanent; a rejected issuer is treated as transient since
/// it is the signal C3 uses to try token exchange against a second issuer.
fn classify_decode_error(err: jsonwebtoken::errors::Error) -> AppError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => AppError::Expired,
        ErrorKind::InvalidIssuer => AppError::IssuerUnknown,
        _ => AppError::Malformed(err.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct OidcDiscovery {
    jwks_uri: String,
}

async fn discover_jwks_uri(http: &reqwest::Client, issuer: &str) -> anyhow::Result<String> {
    let issuer = issuer.trim_end_matches('/');
    let url = format!("{issuer}/.well-known/openid-configuration");
    let resp = http
        .get(&url)
        .send()
        .await
        .with_context(|| format!("GET discovery {url}"))?
        .error_for_status()
        .with_context(|| format!("discovery status {url}"))?;
    let doc: OidcDiscovery = resp.json().await.context("parse discovery json")?;
    if doc.jwks_uri.trim().is_empty() {
        anyhow::bail!("discovery returned empty jwks_uri");
    }
    Ok(doc.jwks_uri)
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kty: String,
    #[serde(default)]
    kid: Option<String>,
    #[serde(rename = "use", default)]
    use_: Option<String>,
    // RSA public key params (base64url-encoded).
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
    // EC public key params (base64url-encoded).
    #[serde(default)]
    crv: Option<String>,
    #[serde(default)]
    x: Option<String>,
    #[serde(default)]
    y: Option<String>,
}

async fn fetch_jwks(
    http: &reqwest::Client,
    jwks_uri: &str,
) -> anyhow::Result<(HashMap<String, DecodingKey>, Option<Duration>)> {
    let resp = http
        .get(jwks_uri)
        .send()
        .await
        .with_context(|| format!("GET jwks {jwks_uri}"))?
        .error_for_status()
        .with_context(|| format!("jwks status {jwks_uri}"))?;

    let cache_ttl = parse_cache_control_max_age(resp.headers());
    let jwks: JwksResponse = resp.json().await.context("parse jwks json")?;

    let mut out: HashMap<String, DecodingKey> = HashMap::new();
    for k in jwks.keys {
        if let Some(use_) = &k.use_
            && use_ != "sig"
        {
            continue;
        }
        let Some(kid) = k.kid.clone() else { continue };

        let key = match k.kty.as_str() {
            "RSA" => match (&k.n, &k.e) {
                (Some(n), Some(e)) => DecodingKey::from_rsa_components(n, e).ok(),
                _ => None,
            },
            "EC" if k.crv.as_deref() == Some("P-256") => match (&k.x, &k.y) {
                (Some(x), Some(y)) => DecodingKey::from_ec_components(x, y).ok(),
                _ => None,
            },
            _ => None,
        };
        if let Some(key) = key {
            out.insert(kid, key);
        }
    }

    if out.is_empty() {
        anyhow::bail!("jwks contains no usable RS256/ES256 keys");
    }

    Ok((out, cache_ttl))
}

fn parse_cache_control_max_age(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let v = headers.get(reqwest::header::CACHE_CONTROL)?.to_str().ok()?;
    for part in v.split(',').map(str::trim) {
        let Some(rest) = part.strip_prefix("max-age=") else {
            continue;
        };
        if let Ok(secs) = rest.parse::<u64>() {
            return Some(Duration::from_secs(secs));
        }
    }
    None
}

fn jwt_has_crit_header(jwt: &str) -> anyhow::Result<bool> {
    let mut parts = jwt.split('.');
    let header_b64 = parts
        .next()
        .ok_or_else(|| anyhow::anyhow!("invalid jwt (missing header part)"))?;
    if parts.next().is_none() {
        anyhow::bail!("invalid jwt (missing payload part)");
    }
    if parts.next().is_none() {
        anyhow::bail!("invalid jwt (missing signature part)");
    }
    if parts.next().is_some() {
        anyhow::bail!("invalid jwt (unexpected extra parts)");
    }

    let header_json = URL_SAFE_NO_PAD
        .decode(header_b64)
        .context("base64url decode jwt header")?;
    let header: serde_json::Value =
        serde_json::from_slice(&header_json).context("parse jwt header json")?;

    let header = header
        .as_object()
        .ok_or_else(|| anyhow::anyhow!("invalid jwt header (expected JSON object)"))?;
    Ok(header.contains_key("crit"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crit_header_detected() {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","kid":"k1","crit":["b64"]}"#);
        let jwt = format!("{header}.payload.sig");
        assert!(jwt_has_crit_header(&jwt).unwrap());
    }

    #[test]
    fn no_crit_header() {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","kid":"k1"}"#);
        let jwt = format!("{header}.payload.sig");
        assert!(!jwt_has_crit_header(&jwt).unwrap());
    }

    #[test]
    fn iat_within_leeway_is_accepted() {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64;
        let claims = serde_json::json!({"iat": now});
        assert!(check_iat_not_in_future(&claims, 60).is_ok());
    }

    #[test]
    fn iat_far_in_future_is_rejected() {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64;
        let claims = serde_json::json!({"iat": now + 3600});
        assert!(check_iat_not_in_future(&claims, 60).is_err());
    }

    #[test]
    fn missing_iat_is_accepted() {
        let claims = serde_json::json!({});
        assert!(check_iat_not_in_future(&claims, 60).is_ok());
    }
}

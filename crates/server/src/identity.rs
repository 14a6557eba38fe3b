//! Derives the stable key a request is rate limited under.

mod claims;
mod principals;

use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use anyhow::Context;
use axum::extract::ConnectInfo;
use config::IdentityConfig;
use http::{HeaderMap, HeaderName, Request, header::AUTHORIZATION};
use jwt_compact::{
    AlgorithmExt, TimeOptions, UntrustedToken,
    alg::{Hs256, Hs256Key},
};
use secrecy::ExposeSecret;
use serde::Deserialize;

pub use claims::CustomClaims;
pub use principals::{PrincipalStore, StaticPrincipals, TokenPrincipals};

/// Key used when a request carries neither a credential nor a usable address.
pub const UNKNOWN_CLIENT: &str = "unknown";

const BEARER_TOKEN_LENGTH: usize = 6;

/// Body of the credential envelope header.
#[derive(Deserialize)]
struct Envelope {
    access_token: String,
}

/// Resolves a request to a client key.
///
/// A verified credential naming a known principal resolves to the principal
/// id, so a user keeps one quota across addresses. Every other request is
/// keyed by its network address. Resolution never fails.
#[derive(Clone)]
pub struct ClientKeyResolver {
    key: Option<Arc<Hs256Key>>,
    token_header: HeaderName,
    principal_claim: String,
    principals: Arc<dyn PrincipalStore>,
}

impl ClientKeyResolver {
    /// Build a resolver from configuration.
    pub fn from_config(config: &IdentityConfig) -> anyhow::Result<Self> {
        let token_header = HeaderName::try_from(config.token_header.as_str())
            .with_context(|| format!("invalid token header name '{}'", config.token_header))?;

        let key = config
            .jwt_secret
            .as_ref()
            .map(|secret| Arc::new(Hs256Key::new(secret.expose_secret().as_bytes())));

        let principals: Arc<dyn PrincipalStore> = match &config.principals {
            Some(ids) => Arc::new(StaticPrincipals::new(ids.iter().cloned())),
            None => Arc::new(TokenPrincipals),
        };

        if key.is_none() {
            log::debug!("No JWT secret configured, clients are identified by address only");
        }

        Ok(Self {
            key,
            token_header,
            principal_claim: config.principal_claim.clone(),
            principals,
        })
    }

    /// Replace the principal directory.
    pub fn with_principals(mut self, principals: Arc<dyn PrincipalStore>) -> Self {
        self.principals = principals;
        self
    }

    /// The client key of a request with the given headers, sent from `address`.
    pub async fn resolve(&self, headers: &HeaderMap, address: Option<IpAddr>) -> String {
        if let Some(principal) = self.principal(headers).await {
            return principal;
        }

        match address {
            Some(ip) => ip.to_string(),
            None => UNKNOWN_CLIENT.to_string(),
        }
    }

    async fn principal(&self, headers: &HeaderMap) -> Option<String> {
        let key = self.key.as_ref()?;
        let token = self.credential(headers)?;

        let claims = match verify(key, &token) {
            Ok(claims) => claims,
            Err(reason) => {
                log::debug!("Ignoring credential: {reason}");
                return None;
            }
        };

        let principal_id = claims
            .get_claim(&self.principal_claim)
            .or_else(|| claims.get_claim("sub"))?;

        let found = self.principals.find(&principal_id).await;

        if found.is_none() {
            log::debug!("Ignoring credential for unknown principal '{principal_id}'");
        }

        found
    }

    /// The raw token, from the envelope header or else a bearer authorization.
    fn credential(&self, headers: &HeaderMap) -> Option<String> {
        if let Some(value) = headers.get(&self.token_header) {
            let envelope = value
                .to_str()
                .ok()
                .and_then(|value| serde_json::from_str::<Envelope>(value).ok());

            if envelope.is_none() {
                log::debug!("Ignoring malformed credential envelope in '{}'", self.token_header);
            }

            return envelope.map(|envelope| envelope.access_token);
        }

        let value = headers.get(AUTHORIZATION)?.to_str().ok()?;

        // RFC 7235: the scheme is case-insensitive
        if value.len() > BEARER_TOKEN_LENGTH + 1
            && value[..BEARER_TOKEN_LENGTH].eq_ignore_ascii_case("bearer")
            && value.as_bytes()[BEARER_TOKEN_LENGTH] == b' '
        {
            Some(value[BEARER_TOKEN_LENGTH + 1..].trim().to_string())
        } else {
            None
        }
    }
}

fn verify(key: &Hs256Key, token: &str) -> Result<CustomClaims, &'static str> {
    let untrusted = UntrustedToken::new(token).map_err(|_| "not a JWT")?;

    let token = Hs256
        .validator::<CustomClaims>(key)
        .validate(&untrusted)
        .map_err(|_| "signature mismatch")?;

    let claims = token.claims();
    let time_options = TimeOptions::default();

    if claims.expiration.is_some() && claims.validate_expiration(&time_options).is_err() {
        return Err("token expired");
    }

    if claims.not_before.is_some() && claims.validate_maturity(&time_options).is_err() {
        return Err("token not yet valid");
    }

    Ok(claims.custom.clone())
}

/// The caller's address: the TCP peer, then the first `X-Forwarded-For` hop, then `X-Real-IP`.
pub fn client_address<B>(req: &Request<B>) -> Option<IpAddr> {
    if let Some(connect_info) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return Some(connect_info.0.ip());
    }

    let forwarded = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|ip| ip.trim().parse::<IpAddr>().ok());

    if forwarded.is_some() {
        return forwarded;
    }

    req.headers()
        .get("x-real-ip")?
        .to_str()
        .ok()?
        .trim()
        .parse::<IpAddr>()
        .ok()
}

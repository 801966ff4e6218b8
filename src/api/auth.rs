//! Purpose: Resolve inbound credentials and mint service-scoped credentials for proxied reads.
//! Exports: `Credentials`, `AccessVerifier`, `ServiceAuth`, `AuthHeaders`, signing-key helpers.
//! Role: Narrow stand-in for the node's credential verifier plus the outbound signer.
//! Invariants: Minted tokens bind issuer, audience, and expiry; signing keys are never logged.
//! Invariants: Pass-through copies the inbound `authorization` header verbatim or sends none.
use super::store::ApiResult;
use crate::core::error::{Error, ErrorKind};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use getrandom::fill as fill_random;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use time::OffsetDateTime;

pub const SERVICE_TOKEN_TTL_SECS: i64 = 60;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Credentials {
    Access { did: String },
    Role { admin: bool },
    Anonymous,
}

impl Credentials {
    pub fn requester(&self) -> Option<&str> {
        match self {
            Credentials::Access { did } => Some(did),
            _ => None,
        }
    }

    pub fn require_access(&self) -> ApiResult<&str> {
        self.requester().ok_or_else(|| {
            Error::new(ErrorKind::AuthRequired)
                .with_message("Authentication Required")
                .with_hint("Send an access token as `Authorization: Bearer <token>`.")
        })
    }

    pub fn is_role(&self) -> bool {
        matches!(self, Credentials::Role { .. })
    }
}

#[derive(Clone, Debug, Default)]
pub struct AccessVerifier {
    sessions: HashMap<String, String>,
    admin_token: Option<String>,
}

impl AccessVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(mut self, token: impl Into<String>, did: impl Into<String>) -> Self {
        self.sessions.insert(token.into(), did.into());
        self
    }

    pub fn with_admin_token(mut self, token: impl Into<String>) -> Self {
        self.admin_token = Some(token.into());
        self
    }

    pub fn verify(&self, headers: &HeaderMap) -> ApiResult<Credentials> {
        let Some(value) = headers.get(AUTHORIZATION) else {
            return Ok(Credentials::Anonymous);
        };
        let value = value.to_str().unwrap_or_default();
        let Some(token) = value.strip_prefix("Bearer ") else {
            return Err(Error::new(ErrorKind::AuthRequired)
                .with_message("unsupported authorization scheme"));
        };
        if self.admin_token.as_deref() == Some(token) {
            return Ok(Credentials::Role { admin: true });
        }
        match self.sessions.get(token) {
            Some(did) => Ok(Credentials::Access { did: did.clone() }),
            None => Err(Error::new(ErrorKind::AuthRequired).with_message("invalid access token")),
        }
    }
}

/// Headers forwarded on a proxied aggregator call.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AuthHeaders {
    pub authorization: Option<String>,
    pub proxy_hop: Option<String>,
}

impl AuthHeaders {
    pub fn passthru(inbound: &HeaderMap) -> Self {
        Self {
            authorization: inbound
                .get(AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string),
            proxy_hop: None,
        }
    }

    pub fn with_proxy_hop(mut self, service_did: impl Into<String>) -> Self {
        self.proxy_hop = Some(service_did.into());
        self
    }
}

#[derive(Clone)]
pub struct ServiceAuth {
    audience: String,
    key: Vec<u8>,
}

impl std::fmt::Debug for ServiceAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAuth")
            .field("audience", &self.audience)
            .finish_non_exhaustive()
    }
}

impl ServiceAuth {
    pub fn new(audience: impl Into<String>, key: Vec<u8>) -> Self {
        Self {
            audience: audience.into(),
            key,
        }
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    pub fn mint(&self, issuer: &str) -> AuthHeaders {
        let exp = OffsetDateTime::now_utc().unix_timestamp() + SERVICE_TOKEN_TTL_SECS;
        let token = self.sign(issuer, exp);
        AuthHeaders {
            authorization: Some(format!("Bearer {token}")),
            proxy_hop: None,
        }
    }

    fn sign(&self, issuer: &str, exp: i64) -> String {
        let payload = format!("iss={issuer}&aud={}&exp={exp}", self.audience);
        let sig = self.signature(&payload);
        format!("{payload}.{sig}")
    }

    fn signature(&self, payload: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.key);
        hasher.update(payload.as_bytes());
        hex_encode(&hasher.finalize())
    }
}

pub fn generate_signing_key() -> ApiResult<String> {
    let mut bytes = [0u8; 32];
    fill_random(&mut bytes).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message(format!("failed to generate signing key: {err}"))
    })?;
    Ok(hex_encode(&bytes))
}

pub fn read_signing_key(path: &Path) -> ApiResult<Vec<u8>> {
    let text = std::fs::read_to_string(path).map_err(|err| {
        Error::new(ErrorKind::InvalidRequest)
            .with_message(format!("failed to read signing key file {}", path.display()))
            .with_source(err)
    })?;
    hex_decode(text.trim()).ok_or_else(|| {
        Error::new(ErrorKind::InvalidRequest)
            .with_message(format!("signing key file {} is not hex", path.display()))
            .with_hint("Generate one with `pdsview serve init`.")
    })
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(nibble_hex(byte >> 4));
        out.push(nibble_hex(byte & 0x0f));
    }
    out
}

fn nibble_hex(nibble: u8) -> char {
    match nibble {
        0..=9 => char::from(b'0' + nibble),
        _ => char::from(b'a' + (nibble - 10)),
    }
}

fn hex_decode(text: &str) -> Option<Vec<u8>> {
    if text.is_empty() || text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|idx| u8::from_str_radix(text.get(idx..idx + 2)?, 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{
        AccessVerifier, AuthHeaders, Credentials, SERVICE_TOKEN_TTL_SECS, ServiceAuth, hex_decode,
        read_signing_key,
    };
    use crate::core::error::ErrorKind;
    use axum::http::{HeaderMap, HeaderValue};

    fn headers(auth: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(auth) = auth {
            headers.insert("authorization", HeaderValue::from_str(auth).expect("header"));
        }
        headers
    }

    #[test]
    fn verifier_resolves_access_role_and_anonymous() {
        let verifier = AccessVerifier::new()
            .with_session("alice-token", "did:ex:alice")
            .with_admin_token("admin-token");
        assert_eq!(
            verifier.verify(&headers(Some("Bearer alice-token"))).expect("access"),
            Credentials::Access {
                did: "did:ex:alice".to_string()
            }
        );
        assert!(verifier.verify(&headers(Some("Bearer admin-token"))).expect("role").is_role());
        assert_eq!(verifier.verify(&headers(None)).expect("anon"), Credentials::Anonymous);
        let err = verifier.verify(&headers(Some("Bearer nope"))).expect_err("bad token");
        assert_eq!(err.kind(), ErrorKind::AuthRequired);
    }

    #[test]
    fn minted_token_binds_issuer_audience_and_expiry() {
        let signer = ServiceAuth::new("did:web:aggregator.test", b"secret".to_vec());
        let before = time::OffsetDateTime::now_utc().unix_timestamp();
        let headers = signer.mint("did:ex:alice");
        let token = headers
            .authorization
            .as_deref()
            .and_then(|value| value.strip_prefix("Bearer "))
            .expect("bearer");
        let (payload, sig) = token.rsplit_once('.').expect("signed");
        let exp: i64 = payload
            .strip_prefix("iss=did:ex:alice&aud=did:web:aggregator.test&exp=")
            .expect("claims")
            .parse()
            .expect("exp");
        assert!(exp >= before + SERVICE_TOKEN_TTL_SECS);
        assert_eq!(sig, signer.signature(payload));

        let other = ServiceAuth::new("did:web:aggregator.test", b"other".to_vec());
        assert_ne!(sig, other.signature(payload));
    }

    #[test]
    fn passthru_copies_authorization() {
        let forwarded = AuthHeaders::passthru(&headers(Some("Bearer admin-token")));
        assert_eq!(forwarded.authorization.as_deref(), Some("Bearer admin-token"));
        assert_eq!(AuthHeaders::passthru(&headers(None)).authorization, None);
    }

    #[test]
    fn signing_key_file_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("signing.key");
        std::fs::write(&path, "00ff10\n").expect("write");
        assert_eq!(read_signing_key(&path).expect("key"), vec![0x00, 0xff, 0x10]);
        assert_eq!(hex_decode("abc"), None);
        assert_eq!(hex_decode("zz"), None);
    }
}

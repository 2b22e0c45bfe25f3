//! Token & Cookie Service (spec §4.2): HMAC-SHA256–signed payloads,
//! serialized as `v1.<base64url(payload)>.<hex(sig)>`.
//!
//! Grounded on the HMAC-over-Basic-Auth pattern in this codebase's proxy
//! ancestry (constant-time compare via `subtle`, hex-encoded digest), here
//! generalized from a single shared-secret header check to two distinct
//! signed-payload formats with their own expiry rules.

use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const FORMAT_VERSION: &str = "v1";
const SECRET_LEN: usize = 32;

/// `ts_session` cookie payload. `exp` is mandatory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCookiePayload {
    pub username: String,
    pub iat: u64,
    pub exp: u64,
}

/// Access token kind, carried in the `type` field of [`AccessTokenPayload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessTokenKind {
    Tunnel,
    Session,
}

/// Access token payload (query `token` or header `x-session-token`).
/// `exp` absent means open-ended, gated only by session liveness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenPayload {
    #[serde(rename = "type")]
    pub kind: AccessTokenKind,
    pub session_id: String,
    pub iat: u64,
    pub exp: Option<u64>,
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs()
}

/// Signs and verifies the two payload formats above. Holds the server's
/// 32-byte secret, generated once and persisted to disk.
#[derive(Clone)]
pub struct TokenService {
    secret: Vec<u8>,
}

impl TokenService {
    /// Loads the secret from `path`, generating and atomically persisting a
    /// fresh one (mode 0600) if the file does not exist yet. Rotating the
    /// file invalidates every cookie and token signed with the old secret.
    pub fn load_or_create(path: &Path) -> anyhow::Result<Self> {
        if let Ok(hex_secret) = fs::read_to_string(path) {
            let trimmed = hex_secret.trim();
            let secret = hex::decode(trimmed)?;
            if secret.len() == SECRET_LEN {
                return Ok(Self { secret });
            }
            tracing::warn!(path = %path.display(), "session secret file has unexpected length, regenerating");
        }

        let mut secret = vec![0u8; SECRET_LEN];
        rand::thread_rng().fill_bytes(&mut secret);
        write_secret_atomically(path, &secret)?;
        Ok(Self { secret })
    }

    pub fn sign_session_cookie(&self, payload: &SessionCookiePayload) -> String {
        self.sign(payload)
    }

    pub fn verify_session_cookie(&self, token: &str) -> Option<SessionCookiePayload> {
        let payload: SessionCookiePayload = self.verify(token)?;
        if payload.exp <= now_secs() {
            return None;
        }
        Some(payload)
    }

    pub fn sign_access_token(&self, payload: &AccessTokenPayload) -> String {
        self.sign(payload)
    }

    pub fn verify_access_token(&self, token: &str) -> Option<AccessTokenPayload> {
        let payload: AccessTokenPayload = self.verify(token)?;
        if let Some(exp) = payload.exp {
            if exp <= now_secs() {
                return None;
            }
        }
        Some(payload)
    }

    fn sign<T: Serialize>(&self, payload: &T) -> String {
        let json = serde_json::to_vec(payload).expect("payload always serializes");
        let encoded = URL_SAFE_NO_PAD.encode(&json);
        let sig = self.mac_hex(encoded.as_bytes());
        format!("{FORMAT_VERSION}.{encoded}.{sig}")
    }

    /// Verifies structure and signature only; callers are responsible for
    /// interpreting `exp`. Every failure mode (malformed, bad signature,
    /// wrong version) collapses to `None` — callers never learn which.
    fn verify<T: DeserializeOwned>(&self, token: &str) -> Option<T> {
        let mut parts = token.splitn(3, '.');
        let version = parts.next()?;
        let encoded = parts.next()?;
        let sig_hex = parts.next()?;
        if parts.next().is_some() || version != FORMAT_VERSION {
            return None;
        }

        let expected_hex = self.mac_hex(encoded.as_bytes());
        if expected_hex.len() != sig_hex.len()
            || expected_hex.as_bytes().ct_eq(sig_hex.as_bytes()).unwrap_u8() != 1
        {
            return None;
        }

        let json = URL_SAFE_NO_PAD.decode(encoded).ok()?;
        serde_json::from_slice(&json).ok()
    }

    fn mac_hex(&self, data: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key size");
        mac.update(data);
        hex::encode(mac.finalize().into_bytes())
    }
}

fn write_secret_atomically(path: &Path, secret: &[u8]) -> anyhow::Result<()> {
    crate::util::write_atomically(path, hex::encode(secret).as_bytes(), 0o600)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService {
            secret: vec![7u8; SECRET_LEN],
        }
    }

    #[test]
    fn session_cookie_round_trips() {
        let svc = service();
        let payload = SessionCookiePayload {
            username: "alice".into(),
            iat: now_secs(),
            exp: now_secs() + 3600,
        };
        let token = svc.sign_session_cookie(&payload);
        let verified = svc.verify_session_cookie(&token).unwrap();
        assert_eq!(verified.username, "alice");
    }

    #[test]
    fn expired_session_cookie_is_rejected() {
        let svc = service();
        let payload = SessionCookiePayload {
            username: "alice".into(),
            iat: 0,
            exp: 1,
        };
        let token = svc.sign_session_cookie(&payload);
        assert!(svc.verify_session_cookie(&token).is_none());
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let svc = service();
        let payload = SessionCookiePayload {
            username: "alice".into(),
            iat: now_secs(),
            exp: now_secs() + 3600,
        };
        let mut token = svc.sign_session_cookie(&payload);
        token.push('x');
        assert!(svc.verify_session_cookie(&token).is_none());
    }

    #[test]
    fn access_token_without_exp_is_open_ended() {
        let svc = service();
        let payload = AccessTokenPayload {
            kind: AccessTokenKind::Tunnel,
            session_id: "sess-1".into(),
            iat: now_secs(),
            exp: None,
        };
        let token = svc.sign_access_token(&payload);
        let verified = svc.verify_access_token(&token).unwrap();
        assert_eq!(verified.session_id, "sess-1");
    }

    #[test]
    fn different_secrets_cannot_verify_each_other() {
        let a = service();
        let mut b_secret = vec![7u8; SECRET_LEN];
        b_secret[0] = 8;
        let b = TokenService { secret: b_secret };

        let payload = SessionCookiePayload {
            username: "alice".into(),
            iat: now_secs(),
            exp: now_secs() + 60,
        };
        let token = a.sign_session_cookie(&payload);
        assert!(b.verify_session_cookie(&token).is_none());
    }
}

//! Signed bearer tokens
//!
//! Every token is a JWT signed with the configured [`JwtConfig`] and carries
//! these claims:
//!
//! | Claim      | Description                                                  |
//! | ---------- | ------------------------------------------------------------ |
//! | `sub`      | Subject id.                                                  |
//! | `sid`      | Session id shared by the access and refresh token of a pair. |
//! | `jti`      | Unique token id, the key of the revocation list.             |
//! | `typ`      | `access`, `refresh` or `reset`.                              |
//! | `ver`      | Subject token version at issue time.                         |
//! | `iat`      | Issued at, seconds since the epoch.                          |
//! | `exp`      | Expiry, seconds since the epoch.                             |
//! | `iss`      | Optional issuer.                                             |
//! | `metadata` | Optional client metadata (IP, user agent).                   |
//!
//! Signature and claim-shape validation is done by `jsonwebtoken`. Expiry is
//! not checked on decode; the token service compares `exp` against the engine
//! [`Clock`](crate::clock::Clock), and revocation accepts expired tokens.

use std::fmt;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::{Error, error::TokenError, storage::Origin};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
    Reset,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
            TokenKind::Reset => "reset",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub sid: String,
    pub jti: String,
    pub typ: TokenKind,
    pub ver: u64,
    pub iat: i64,
    pub exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TokenMetadata>,
}

impl TokenClaims {
    pub fn issued_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.iat, 0).unwrap_or_default()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_default()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.exp
    }
}

/// Client details optionally embedded in tokens
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

impl From<&Origin> for TokenMetadata {
    fn from(origin: &Origin) -> Self {
        Self {
            user_agent: origin.user_agent.clone(),
            ip_address: origin.ip_address.clone(),
        }
    }
}

/// Access and refresh token minted from one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub session_id: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

/// Signing algorithm and key material
#[derive(Clone)]
pub enum JwtAlgorithm {
    /// RS256 - RSA with SHA-256, PEM encoded keys
    RS256 {
        private_key: Vec<u8>,
        public_key: Vec<u8>,
    },
    /// HS256 - HMAC with SHA-256
    HS256 { secret_key: Vec<u8> },
}

impl fmt::Debug for JwtAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JwtAlgorithm::RS256 { .. } => f.write_str("RS256"),
            JwtAlgorithm::HS256 { .. } => f.write_str("HS256"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub algorithm: JwtAlgorithm,
    pub issuer: Option<String>,
    /// Whether to embed the client IP and user agent in issued tokens
    pub include_metadata: bool,
}

impl JwtConfig {
    pub fn new_rs256(private_key: Vec<u8>, public_key: Vec<u8>) -> Self {
        Self {
            algorithm: JwtAlgorithm::RS256 {
                private_key,
                public_key,
            },
            issuer: None,
            include_metadata: false,
        }
    }

    pub fn new_hs256(secret_key: Vec<u8>) -> Self {
        Self {
            algorithm: JwtAlgorithm::HS256 { secret_key },
            issuer: None,
            include_metadata: false,
        }
    }

    /// HS256 with a fresh random 256-bit secret. Tokens do not survive a restart.
    pub fn new_random_hs256() -> Self {
        use rand::RngCore;

        let mut secret_key = vec![0u8; 32];
        rand::rng().fill_bytes(&mut secret_key);
        Self::new_hs256(secret_key)
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    pub fn with_metadata(mut self, include_metadata: bool) -> Self {
        self.include_metadata = include_metadata;
        self
    }

    pub fn jwt_algorithm(&self) -> Algorithm {
        match &self.algorithm {
            JwtAlgorithm::RS256 { .. } => Algorithm::RS256,
            JwtAlgorithm::HS256 { .. } => Algorithm::HS256,
        }
    }

    pub fn get_encoding_key(&self) -> Result<EncodingKey, Error> {
        match &self.algorithm {
            JwtAlgorithm::RS256 { private_key, .. } => EncodingKey::from_rsa_pem(private_key)
                .map_err(|e| TokenError::Signing(format!("Invalid RSA private key: {e}")).into()),
            JwtAlgorithm::HS256 { secret_key } => Ok(EncodingKey::from_secret(secret_key)),
        }
    }

    pub fn get_decoding_key(&self) -> Result<DecodingKey, Error> {
        match &self.algorithm {
            JwtAlgorithm::RS256 { public_key, .. } => DecodingKey::from_rsa_pem(public_key)
                .map_err(|e| TokenError::Signing(format!("Invalid RSA public key: {e}")).into()),
            JwtAlgorithm::HS256 { secret_key } => Ok(DecodingKey::from_secret(secret_key)),
        }
    }

    /// Signature, algorithm and issuer checks. Expiry is left to the caller.
    pub fn get_validation(&self) -> Validation {
        let mut validation = Validation::new(self.jwt_algorithm());
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        validation
    }

    pub fn encode(&self, claims: &TokenClaims) -> Result<String, Error> {
        let header = Header::new(self.jwt_algorithm());
        let key = self.get_encoding_key()?;
        encode(&header, claims, &key)
            .map_err(|e| TokenError::Signing(format!("Failed to encode JWT: {e}")).into())
    }

    /// Decode and verify the signature of `token`.
    pub fn decode(&self, token: &str) -> Result<TokenClaims, Error> {
        let key = self.get_decoding_key()?;
        decode::<TokenClaims>(token, &key, &self.get_validation())
            .map(|data| data.claims)
            .map_err(|e| TokenError::Malformed(e.to_string()).into())
    }
}

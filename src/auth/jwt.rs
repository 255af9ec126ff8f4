/// Token Codec
///
/// Signs and verifies compact three-part tokens (header.payload.signature)
/// with a server-held shared secret. The secret and algorithm are handed in
/// at construction; nothing here reads global state.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Duration;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{
    decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::{ExposeSecret, SecretString};

use crate::auth::claims::{AccessClaims, TokenKind};
use crate::error::AppError;

/// Why a token failed verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    Expired,
    InvalidSignature,
    Malformed,
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenError::Expired => write!(f, "token has expired"),
            TokenError::InvalidSignature => write!(f, "token signature does not match"),
            TokenError::Malformed => write!(f, "token is malformed"),
        }
    }
}

impl std::error::Error for TokenError {}

pub struct TokenCodec {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(secret: &SecretString, algorithm: Algorithm) -> Self {
        let bytes = secret.expose_secret().as_bytes();

        let mut validation = Validation::new(algorithm);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            algorithm,
            encoding_key: EncodingKey::from_secret(bytes),
            decoding_key: DecodingKey::from_secret(bytes),
            validation,
        }
    }

    /// Sign a fresh token for `subject` that expires `ttl` from now
    pub fn issue(
        &self,
        subject: &str,
        kind: TokenKind,
        ttl: Duration,
    ) -> Result<String, AppError> {
        self.encode(&AccessClaims::new(subject, kind, ttl))
    }

    /// Sign the given claims as they are
    pub fn encode(&self, claims: &AccessClaims) -> Result<String, AppError> {
        encode(&Header::new(self.algorithm), claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
    }

    /// Verify signature and expiry, returning the embedded claims
    ///
    /// Structure is checked before the signature so that any damage to the
    /// signature segment reports `InvalidSignature` rather than `Malformed`.
    pub fn verify(&self, token: &str) -> Result<AccessClaims, TokenError> {
        check_structure(token)?;

        decode::<AccessClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                // Header and payload already decoded, so base64 trouble is in the signature
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm | ErrorKind::Base64(_) => {
                    TokenError::InvalidSignature
                }
                _ => TokenError::Malformed,
            })
    }
}

/// Header and payload must decode; the signature is only checked for its
/// alphabet, so a damaged signature (even one gaining a `.`) is reported as a
/// signature failure instead of a malformed token.
fn check_structure(token: &str) -> Result<(), TokenError> {
    let mut segments = token.splitn(3, '.');
    let (Some(header), Some(payload), Some(signature)) =
        (segments.next(), segments.next(), segments.next())
    else {
        return Err(TokenError::Malformed);
    };
    if header.is_empty() || payload.is_empty() || signature.is_empty() {
        return Err(TokenError::Malformed);
    }

    let header = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|_| TokenError::Malformed)?;
    serde_json::from_slice::<Header>(&header).map_err(|_| TokenError::Malformed)?;

    let payload = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| TokenError::Malformed)?;
    serde_json::from_slice::<serde_json::Value>(&payload).map_err(|_| TokenError::Malformed)?;

    let is_base64url = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_';
    if !signature.chars().all(is_base64url) {
        return Err(TokenError::InvalidSignature);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> TokenCodec {
        TokenCodec::new(
            &SecretString::from("test-secret-key-at-least-32-characters-long".to_string()),
            Algorithm::HS256,
        )
    }

    fn flip_char(c: char) -> char {
        if c == 'A' {
            'B'
        } else {
            'A'
        }
    }

    #[test]
    fn test_issue_and_verify() {
        let codec = codec();
        let token = codec.issue("alice", TokenKind::Access, Duration::minutes(30)).unwrap();

        assert_eq!(token.split('.').count(), 3);
        let claims = codec.verify(&token).expect("Failed to verify token");
        assert_eq!(claims.sub, "alice");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_verify_returns_original_claims() {
        let codec = codec();
        let claims = AccessClaims::new("bob", TokenKind::Refresh, Duration::days(7));
        let token = codec.encode(&claims).unwrap();

        assert_eq!(codec.verify(&token).unwrap(), claims);
    }

    #[test]
    fn test_expired_token() {
        let codec = codec();
        let token = codec.issue("alice", TokenKind::Access, Duration::seconds(-5)).unwrap();

        assert_eq!(codec.verify(&token), Err(TokenError::Expired));
    }

    #[test]
    fn test_altered_signature_byte() {
        let codec = codec();
        let token = codec.issue("alice", TokenKind::Access, Duration::minutes(30)).unwrap();
        let signature_start = token.rfind('.').unwrap() + 1;

        for offset in [0, 10, token.len() - signature_start - 1] {
            let position = signature_start + offset;
            let mut chars: Vec<char> = token.chars().collect();
            chars[position] = flip_char(chars[position]);
            let tampered: String = chars.into_iter().collect();

            assert_eq!(
                codec.verify(&tampered),
                Err(TokenError::InvalidSignature),
                "offset {}",
                offset
            );
        }
    }

    #[test]
    fn test_signature_byte_replaced_with_non_alphabet_char() {
        let codec = codec();
        let token = codec.issue("alice", TokenKind::Access, Duration::minutes(30)).unwrap();
        let signature_start = token.rfind('.').unwrap() + 1;
        let last = token.len() - 1;

        for position in [signature_start, signature_start + 10, last] {
            for replacement in [".", "=", "+", "/"] {
                let tampered = format!(
                    "{}{}{}",
                    &token[..position],
                    replacement,
                    &token[position + 1..]
                );

                assert_eq!(
                    codec.verify(&tampered),
                    Err(TokenError::InvalidSignature),
                    "{:?} at {}",
                    replacement,
                    position
                );
            }
        }
    }

    #[test]
    fn test_tampered_payload() {
        let codec = codec();
        let token = codec.issue("alice", TokenKind::Access, Duration::minutes(30)).unwrap();
        let parts: Vec<&str> = token.split('.').collect();
        let forged_claims = serde_json::json!({
            "sub": "mallory",
            "exp": 4102444800i64,
            "iat": 0,
            "jti": "x",
            "kind": "access"
        });
        let forged_payload = URL_SAFE_NO_PAD.encode(forged_claims.to_string());
        let forged = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);

        assert_eq!(codec.verify(&forged), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_wrong_secret() {
        let token = codec().issue("alice", TokenKind::Access, Duration::minutes(30)).unwrap();
        let other = TokenCodec::new(
            &SecretString::from("another-secret-key-at-least-32-characters".to_string()),
            Algorithm::HS256,
        );

        assert_eq!(other.verify(&token), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_wrong_algorithm() {
        let secret = SecretString::from("test-secret-key-at-least-32-characters-long".to_string());
        let token = TokenCodec::new(&secret, Algorithm::HS512)
            .issue("alice", TokenKind::Access, Duration::minutes(30))
            .unwrap();

        assert_eq!(codec().verify(&token), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_malformed_tokens() {
        let codec = codec();

        for garbage in ["", "garbage", "a.b", "a.b.c.d", "..", "invalid.token.here"] {
            assert_eq!(codec.verify(garbage), Err(TokenError::Malformed), "{:?}", garbage);
        }
    }

    #[test]
    fn test_debug_does_not_print_keys() {
        let printed = format!("{:?}", codec());
        assert!(!printed.contains("test-secret"));
    }
}

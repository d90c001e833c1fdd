use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::Deserialize;

#[derive(Deserialize)]
struct ExpiryClaim {
    exp: i64,
}

/// Expiry of a JWT in epoch milliseconds, read from its `exp` claim.
///
/// The signature is not verified; the token only tells us when to refresh.
/// Returns `None` for opaque tokens and tokens without `exp`.
pub fn token_expiry_ms(token: &str) -> Option<i64> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    decode::<ExpiryClaim>(token, &DecodingKey::from_secret(&[]), &validation)
        .ok()
        .map(|data| data.claims.exp.saturating_mul(1000))
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::{EncodingKey, Header, encode};

    use super::*;

    #[test]
    fn reads_exp_without_the_secret() {
        let token = encode(
            &Header::default(),
            &serde_json::json!({"sub": "ada", "exp": 2_000_000_000}),
            &EncodingKey::from_secret(b"server-secret"),
        )
        .unwrap();
        assert_eq!(token_expiry_ms(&token), Some(2_000_000_000_000));
    }

    #[test]
    fn opaque_and_claimless_tokens() {
        assert_eq!(token_expiry_ms("opaque-session-id"), None);
        let token = encode(
            &Header::default(),
            &serde_json::json!({"sub": "ada"}),
            &EncodingKey::from_secret(b"k"),
        )
        .unwrap();
        assert_eq!(token_expiry_ms(&token), None);
    }
}

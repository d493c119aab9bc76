use harness_core::client::error::ClientError;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// # Summary
/// 计算 `hex(HMAC_SHA256(secret, payload))`。
pub fn sign_payload(secret: &str, payload: &str) -> Result<String, ClientError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ClientError::Signing(e.to_string()))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// # Summary
/// 鉴权签名，载荷为 `{timestamp}{method}{path}`。
///
/// # Arguments
/// * `timestamp`: Unix 毫秒，需与 auth 消息中的 `timestamp` 字段一致。
pub fn sign(secret: &str, timestamp: &str, method: &str, path: &str) -> Result<String, ClientError> {
    sign_payload(secret, &format!("{timestamp}{method}{path}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc4231_vector() {
        let sig = sign_payload("Jefe", "what do ya want for nothing?").unwrap();
        assert_eq!(
            sig,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_sign_concatenates_fields() {
        let direct = sign_payload("secret", "1700000000000GET/ws").unwrap();
        let composed = sign("secret", "1700000000000", "GET", "/ws").unwrap();
        assert_eq!(direct, composed);
        assert_eq!(composed.len(), 64);
    }
}

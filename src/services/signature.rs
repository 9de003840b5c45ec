//! Notification signature verification.
//!
//! The gateway signs each notification with
//! `SHA512(order_id + status_code + gross_amount + server_key)`, hex encoded.
//! Comparison is constant-time.

use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;

/// Verifies notification signatures with the shared server key.
#[derive(Clone)]
pub struct SignatureVerifier {
    server_key: String,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier").finish_non_exhaustive()
    }
}

impl SignatureVerifier {
    pub fn new(server_key: impl Into<String>) -> Self {
        Self {
            server_key: server_key.into(),
        }
    }

    /// Hex signature the gateway would send for these fields.
    pub fn expected_signature(&self, order_id: &str, status_code: &str, gross_amount: &str) -> String {
        let mut hasher = Sha512::new();
        hasher.update(order_id.as_bytes());
        hasher.update(status_code.as_bytes());
        hasher.update(gross_amount.as_bytes());
        hasher.update(self.server_key.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Check `signature` against the notification body.
    ///
    /// Returns false, never panics, when the payload lacks any of the signed
    /// fields. `gross_amount` is taken exactly as sent (string or number).
    pub fn verify(&self, payload: &serde_json::Value, signature: &str) -> bool {
        let (Some(order_id), Some(status_code), Some(gross_amount)) = (
            field_text(payload, "order_id"),
            field_text(payload, "status_code"),
            field_text(payload, "gross_amount"),
        ) else {
            return false;
        };

        let expected = self.expected_signature(&order_id, &status_code, &gross_amount);
        let received = signature.trim().to_ascii_lowercase();

        expected.as_bytes().ct_eq(received.as_bytes()).into()
    }
}

fn field_text(payload: &serde_json::Value, key: &str) -> Option<String> {
    match payload.get(key)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> serde_json::Value {
        json!({
            "order_id": "CREDITS-alice-20250101",
            "status_code": "200",
            "gross_amount": "50000.00",
            "transaction_status": "settlement"
        })
    }

    #[test]
    fn accepts_matching_signature() {
        let verifier = SignatureVerifier::new("server-key");
        let sig = verifier.expected_signature("CREDITS-alice-20250101", "200", "50000.00");

        assert_eq!(sig.len(), 128);
        assert!(verifier.verify(&payload(), &sig));
        assert!(verifier.verify(&payload(), &sig.to_ascii_uppercase()));
    }

    #[test]
    fn rejects_signature_from_other_key() {
        let sig = SignatureVerifier::new("other-key").expected_signature(
            "CREDITS-alice-20250101",
            "200",
            "50000.00",
        );

        assert!(!SignatureVerifier::new("server-key").verify(&payload(), &sig));
    }

    #[test]
    fn rejects_tampered_amount() {
        let verifier = SignatureVerifier::new("server-key");
        let sig = verifier.expected_signature("CREDITS-alice-20250101", "200", "50000.00");
        let mut tampered = payload();
        tampered["gross_amount"] = json!("500000.00");

        assert!(!verifier.verify(&tampered, &sig));
    }

    #[test]
    fn malformed_payload_is_false_not_panic() {
        let verifier = SignatureVerifier::new("server-key");

        assert!(!verifier.verify(&json!({}), "abc"));
        assert!(!verifier.verify(&json!("string body"), "abc"));
        assert!(!verifier.verify(&json!({"order_id": 1, "status_code": null, "gross_amount": "1"}), "abc"));
        assert!(!verifier.verify(&payload(), ""));
    }

    #[test]
    fn numeric_amount_is_signed_as_sent() {
        let verifier = SignatureVerifier::new("server-key");
        let body = json!({"order_id": "A-1", "status_code": "201", "gross_amount": 15000});
        let sig = verifier.expected_signature("A-1", "201", "15000");

        assert!(verifier.verify(&body, &sig));
    }
}

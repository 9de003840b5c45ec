//! Gateway status vocabulary to internal payment status.
//!
//! | raw status                      | normalized |
//! |---------------------------------|------------|
//! | `capture`, `settle`, `settlement` | Paid     |
//! | `pending`                       | Pending    |
//! | `deny`, `cancel`, `expire`, `failure` | Unpaid |
//! | anything else                   | Unpaid     |
//!
//! The gateway spells settlement both ways; it is stored as `settle`.

use crate::models::payment_event::PaymentStatus;

/// Canonical spelling of a gateway status, as stored on the event.
pub fn canonical_status(raw_status: &str) -> String {
    let status = raw_status.trim().to_ascii_lowercase();
    if status == "settlement" {
        "settle".to_string()
    } else {
        status
    }
}

/// Map a gateway status onto the internal status. Total: unknown statuses
/// are terminal-unpaid.
pub fn normalize(raw_status: &str) -> PaymentStatus {
    match canonical_status(raw_status).as_str() {
        "capture" | "settle" => PaymentStatus::Paid,
        "pending" => PaymentStatus::Pending,
        "deny" | "cancel" | "expire" | "failure" => PaymentStatus::Unpaid,
        _ => PaymentStatus::Unpaid,
    }
}

/// Like [`normalize`], but a card `capture` held for fraud review is still
/// pending and one the fraud check denied is unpaid.
pub fn normalize_with_fraud(raw_status: &str, fraud_status: Option<&str>) -> PaymentStatus {
    let status = normalize(raw_status);
    if canonical_status(raw_status) != "capture" {
        return status;
    }

    match fraud_status.map(|f| f.trim().to_ascii_lowercase()).as_deref() {
        Some("challenge") => PaymentStatus::Pending,
        Some("deny") => PaymentStatus::Unpaid,
        _ => status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settlement_and_settle_are_synonyms() {
        assert_eq!(normalize("settlement"), PaymentStatus::Paid);
        assert_eq!(normalize("settle"), PaymentStatus::Paid);
        assert_eq!(canonical_status("settlement"), canonical_status("settle"));
    }

    #[test]
    fn mapping_table() {
        assert_eq!(normalize("capture"), PaymentStatus::Paid);
        assert_eq!(normalize("pending"), PaymentStatus::Pending);
        for status in ["deny", "cancel", "expire", "failure"] {
            assert_eq!(normalize(status), PaymentStatus::Unpaid, "{status}");
        }
    }

    #[test]
    fn unknown_status_is_unpaid() {
        assert_eq!(normalize("refund"), PaymentStatus::Unpaid);
        assert_eq!(normalize(""), PaymentStatus::Unpaid);
        assert_eq!(canonical_status("refund"), "refund");
    }

    #[test]
    fn status_is_case_and_whitespace_insensitive() {
        assert_eq!(normalize(" Settlement "), PaymentStatus::Paid);
        assert_eq!(canonical_status(" Settlement "), "settle");
    }

    #[test]
    fn fraud_status_only_affects_capture() {
        assert_eq!(
            normalize_with_fraud("capture", Some("challenge")),
            PaymentStatus::Pending
        );
        assert_eq!(normalize_with_fraud("capture", Some("deny")), PaymentStatus::Unpaid);
        assert_eq!(normalize_with_fraud("capture", Some("accept")), PaymentStatus::Paid);
        assert_eq!(normalize_with_fraud("capture", None), PaymentStatus::Paid);
        assert_eq!(
            normalize_with_fraud("settlement", Some("challenge")),
            PaymentStatus::Paid
        );
    }
}

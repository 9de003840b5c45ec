//! Work out which team a payment event belongs to.
//!
//! Resolution order:
//! 1. the team already stored on the event
//! 2. the invoice whose `order_id` matches (the event is linked to it)
//! 3. the order id itself: `CREDITS-{team}-{timestamp}` or
//!    `{team}-{suffix}`
//!
//! Team names may contain `-`, so step 3 tries every split point from the
//! right and accepts the longest prefix that names an existing team.

use uuid::Uuid;

use crate::error::AppError;
use crate::models::payment_event::PaymentEvent;
use crate::store::StoreTx;

/// Prefix of order ids generated for credit purchases.
pub const CREDITS_PREFIX: &str = "CREDITS-";

/// Where the team came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub team: Option<String>,
    /// Invoice found by order id, to be linked to the event
    pub invoice_id: Option<Uuid>,
}

/// Candidate team names embedded in an order id, most specific first.
///
/// `CREDITS-acme-corp-20250101` yields `acme-corp`, then `acme`.
pub fn order_id_candidates(order_id: &str) -> Vec<String> {
    let body = order_id.strip_prefix(CREDITS_PREFIX).unwrap_or(order_id);

    body.char_indices()
        .rev()
        .filter(|(_, c)| *c == '-')
        .map(|(i, _)| &body[..i])
        .filter(|candidate| !candidate.is_empty())
        .map(str::to_string)
        .collect()
}

pub async fn resolve(
    tx: &mut dyn StoreTx,
    existing: Option<&PaymentEvent>,
    order_id: &str,
) -> Result<Resolution, AppError> {
    if let Some(team) = existing.and_then(|e| e.team.clone()) {
        return Ok(Resolution {
            team: Some(team),
            invoice_id: None,
        });
    }

    if let Some(invoice) = tx.find_invoice_by_order(order_id).await? {
        return Ok(Resolution {
            team: Some(invoice.team),
            invoice_id: Some(invoice.id),
        });
    }

    for candidate in order_id_candidates(order_id) {
        if tx.team_exists(&candidate).await? {
            return Ok(Resolution {
                team: Some(candidate),
                invoice_id: None,
            });
        }
    }

    Ok(Resolution {
        team: None,
        invoice_id: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credits_order_id() {
        assert_eq!(order_id_candidates("CREDITS-alice-20250101"), vec!["alice"]);
    }

    #[test]
    fn hyphenated_team_prefers_longest_prefix() {
        assert_eq!(
            order_id_candidates("CREDITS-acme-corp-20250101120000"),
            vec!["acme-corp", "acme"]
        );
    }

    #[test]
    fn plain_team_suffix_order_id() {
        assert_eq!(order_id_candidates("bob-x9f2k"), vec!["bob"]);
    }

    #[test]
    fn order_id_without_separator_has_no_candidates() {
        assert!(order_id_candidates("ORDER42").is_empty());
        assert!(order_id_candidates("CREDITS-").is_empty());
        assert!(order_id_candidates("-abc").is_empty());
    }
}

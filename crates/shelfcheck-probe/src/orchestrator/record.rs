//! Builds persisted rows from verdicts and terminal failures.

use chrono::{DateTime, Utc};
use shelfcheck_core::{truncate_diagnostic, ErrorClass, ProbeResult, ProbeTask};

use crate::error::ProbeError;
use crate::parse::ItemVerdict;

pub(crate) fn from_verdict(
    task: &ProbeTask,
    verdict: &ItemVerdict,
    currency_code: &str,
    captured_at: DateTime<Utc>,
    diagnostic_max_bytes: usize,
) -> ProbeResult {
    let mut row = empty_row(task, currency_code, captured_at);
    match verdict {
        ItemVerdict::Available {
            price,
            list_price,
            quantity,
            option_id,
        } => {
            row.available = true;
            row.price = *price;
            row.list_price = *list_price;
            row.quantity = *quantity;
            row.fulfillment_option_id.clone_from(option_id);
        }
        ItemVerdict::Unavailable {
            reason,
            price,
            list_price,
        } => {
            row.price = *price;
            row.list_price = *list_price;
            row.diagnostic = Some(truncate_diagnostic(reason, diagnostic_max_bytes));
        }
        ItemVerdict::Unparseable { reason, raw } => {
            row.error_class = Some(ErrorClass::PartialData);
            row.error_message = Some(reason.clone());
            row.diagnostic = Some(truncate_diagnostic(raw, diagnostic_max_bytes));
        }
    }
    row
}

pub(crate) fn from_failure(
    task: &ProbeTask,
    err: &ProbeError,
    class: ErrorClass,
    attempts: u32,
    captured_at: DateTime<Utc>,
    diagnostic_max_bytes: usize,
) -> ProbeResult {
    let mut row = empty_row(task, &task.channel.currency, captured_at);
    row.error_class = Some(class);
    row.error_message = Some(format!("{err} (attempts: {attempts})"));
    row.diagnostic = err
        .excerpt()
        .filter(|e| !e.is_empty())
        .map(|e| truncate_diagnostic(e, diagnostic_max_bytes));
    row
}

fn empty_row(task: &ProbeTask, currency_code: &str, captured_at: DateTime<Utc>) -> ProbeResult {
    ProbeResult {
        identity: task.identity(),
        merchandise_key: task.item.merchandise_key.clone(),
        available: false,
        quantity: None,
        price: None,
        list_price: None,
        currency_code: currency_code.to_owned(),
        captured_at,
        error_class: None,
        error_message: None,
        diagnostic: None,
        fulfillment_option_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use shelfcheck_core::{FulfillmentPoint, SalesChannel, TrackedItem};

    fn task() -> ProbeTask {
        ProbeTask {
            storefront: "mercado-norte".to_owned(),
            point: FulfillmentPoint {
                key: "pp-1".to_owned(),
                postal_code: None,
                geo: None,
                external_option_id: Some("pp-1".to_owned()),
            },
            item: TrackedItem {
                sku_id: "42".to_owned(),
                seller_id: "1".to_owned(),
                merchandise_key: "7891000100103".to_owned(),
            },
            channel: SalesChannel {
                id: "1".to_owned(),
                currency: "BRL".to_owned(),
                locale: "pt-BR".to_owned(),
                country: "BRA".to_owned(),
            },
        }
    }

    #[test]
    fn unavailable_is_not_an_error() {
        let verdict = ItemVerdict::Unavailable {
            reason: "no matching fulfillment option".to_owned(),
            price: Some(Decimal::new(500, 2)),
            list_price: None,
        };
        let row = from_verdict(&task(), &verdict, "BRL", Utc::now(), 4096);
        assert!(!row.available);
        assert_eq!(row.error_class, None);
        assert_eq!(
            row.diagnostic.as_deref(),
            Some("no matching fulfillment option")
        );
    }

    #[test]
    fn unparseable_is_partial_data() {
        let verdict = ItemVerdict::Unparseable {
            reason: "line missing".to_owned(),
            raw: "{}".repeat(10),
        };
        let row = from_verdict(&task(), &verdict, "BRL", Utc::now(), 6);
        assert_eq!(row.error_class, Some(ErrorClass::PartialData));
        assert_eq!(row.diagnostic.as_deref(), Some("{}{}{}"));
    }

    #[test]
    fn failure_carries_class_message_and_excerpt() {
        let err = ProbeError::Blocked {
            url: "https://store.example/api".to_owned(),
            marker: "captcha".to_owned(),
            excerpt: "<html>captcha</html>".to_owned(),
        };
        let row = from_failure(&task(), &err, ErrorClass::Blocked, 1, Utc::now(), 4096);
        assert!(!row.available);
        assert_eq!(row.error_class, Some(ErrorClass::Blocked));
        assert!(row.error_message.unwrap().contains("attempts: 1"));
        assert_eq!(row.diagnostic.as_deref(), Some("<html>captcha</html>"));
        assert_eq!(row.currency_code, "BRL");
    }
}

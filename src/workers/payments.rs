use chrono::{Duration, Utc};
use teloxide::Bot;
use tracing::warn;

use crate::db::models::PaymentCredit;
use crate::handlers::payments::notify_payment_credited;
use crate::state::AppState;

const BATCH_SIZE: i64 = 50;
const RECHECK_WINDOW_HOURS: i64 = 24;

/// Re-checks recent pending payments; returns the credits this pass applied.
pub async fn reconcile_pending(state: &AppState) -> anyhow::Result<Vec<PaymentCredit>> {
    let since = Utc::now() - Duration::hours(RECHECK_WINDOW_HOURS);
    let pending = state.db.pending_payments(since, BATCH_SIZE).await?;
    let mut credits = Vec::new();
    for payment in pending {
        match state.payments.check_payment(&payment.payment_id).await {
            Ok(check) => credits.extend(check.credit),
            Err(err) => warn!("Checking payment {} failed: {err}", payment.payment_id),
        }
    }
    Ok(credits)
}

pub async fn run_once(bot: Bot, state: AppState) -> anyhow::Result<usize> {
    let credits = reconcile_pending(&state).await?;
    for credit in &credits {
        notify_payment_credited(&bot, &state, credit).await;
    }
    Ok(credits.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::db::database::Database;
    use crate::db::models::{PaymentRecord, PaymentStatus};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn payment(payment_id: &str, age_hours: i64) -> PaymentRecord {
        PaymentRecord {
            payment_id: payment_id.to_string(),
            user_id: 7,
            qty: 20,
            amount: 429.0,
            offer: "t20".to_string(),
            status: PaymentStatus::Pending,
            created_at: Utc::now() - Duration::hours(age_hours),
        }
    }

    #[tokio::test]
    async fn recent_succeeded_payments_are_credited_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/payments/pay_new"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "pay_new",
                "status": "succeeded",
                "amount": {"value": "429.00", "currency": "RUB"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/payments/pay_old"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let base_url = server.uri();
        let config = test_config(&[
            ("YOOKASSA_SHOP_ID", "shop"),
            ("YOOKASSA_SECRET_KEY", "secret"),
            ("YOOKASSA_BASE_URL", base_url.as_str()),
        ]);
        let db = Database::init("sqlite::memory:").await.unwrap();
        let state = AppState::new(config, db, "photofly_bot").unwrap();
        state.db.get_user(7).await.unwrap();
        state.db.insert_payment(&payment("pay_new", 1)).await.unwrap();
        state.db.insert_payment(&payment("pay_old", 30)).await.unwrap();

        let credits = reconcile_pending(&state).await.unwrap();
        assert_eq!(credits.len(), 1);
        assert_eq!(credits[0].user_id, 7);
        assert_eq!(credits[0].balance, 20);

        assert!(reconcile_pending(&state).await.unwrap().is_empty());
        assert_eq!(state.db.get_user(7).await.unwrap().balance, 20);
    }
}

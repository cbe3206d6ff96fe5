use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;
use uuid::Uuid;

use crate::config::require;
use crate::db::models::PaymentStatus;
use crate::error::AppError;
use crate::providers::{decode, send_json};
use crate::utils::timing::log_upstream_timing;

pub const PROVIDER: &str = "yookassa";

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderPayment {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub confirmation: Option<Confirmation>,
    #[serde(default)]
    pub metadata: Option<PaymentMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Confirmation {
    #[serde(default)]
    pub confirmation_url: Option<String>,
}

/// Round-tripped through the provider; values must be strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PaymentMetadata {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub qty: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub offer: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DescribedPayment {
    pub user_id: i64,
    pub qty: i64,
    pub amount: f64,
    pub offer: String,
}

impl PaymentMetadata {
    pub fn new(user_id: i64, qty: i64, amount: f64, offer: &str) -> Self {
        PaymentMetadata {
            user_id: Some(user_id.to_string()),
            qty: Some(qty.to_string()),
            amount: Some(format_amount(amount)),
            offer: Some(offer.to_string()),
        }
    }

    /// The payment as described by its own metadata, if complete.
    pub fn describe(&self) -> Option<DescribedPayment> {
        Some(DescribedPayment {
            user_id: self.user_id.as_deref()?.trim().parse().ok()?,
            qty: self.qty.as_deref()?.trim().parse().ok()?,
            amount: self.amount.as_deref()?.trim().parse().ok()?,
            offer: self
                .offer
                .clone()
                .unwrap_or_else(|| "custom".to_string()),
        })
    }
}

pub struct PaymentRequest<'a> {
    pub user_id: i64,
    pub qty: i64,
    pub amount: f64,
    pub currency: &'a str,
    pub title: &'a str,
    pub return_url: &'a str,
    pub offer: &'a str,
}

/// Provider amounts are decimal strings with two places.
pub fn format_amount(amount: f64) -> String {
    format!("{amount:.2}")
}

pub fn map_payment_status(status: &str) -> Result<PaymentStatus, AppError> {
    match status.trim() {
        "pending" | "waiting_for_capture" => Ok(PaymentStatus::Pending),
        "succeeded" => Ok(PaymentStatus::Succeeded),
        "canceled" => Ok(PaymentStatus::Canceled),
        other => Err(AppError::UnmappedStatus {
            provider: PROVIDER,
            status: other.to_string(),
        }),
    }
}

#[derive(Clone)]
pub struct YooKassaClient {
    http: Client,
    base_url: String,
    shop_id: String,
    secret_key: String,
}

impl YooKassaClient {
    pub fn new(http: Client, base_url: &str, shop_id: &str, secret_key: &str) -> Self {
        YooKassaClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            shop_id: shop_id.trim().to_string(),
            secret_key: secret_key.trim().to_string(),
        }
    }

    fn credentials(&self) -> Result<(&str, &str), AppError> {
        Ok((
            require(&self.shop_id, "YOOKASSA_SHOP_ID")?,
            require(&self.secret_key, "YOOKASSA_SECRET_KEY")?,
        ))
    }

    pub async fn create_payment(&self, request: &PaymentRequest<'_>) -> Result<ProviderPayment, AppError> {
        let (shop_id, secret_key) = self.credentials()?;
        let idempotence_key = Uuid::new_v4().to_string();
        let body = json!({
            "amount": {
                "value": format_amount(request.amount),
                "currency": request.currency,
            },
            "capture": true,
            "confirmation": {
                "type": "redirect",
                "return_url": request.return_url,
            },
            "description": request.title,
            "metadata": PaymentMetadata::new(request.user_id, request.qty, request.amount, request.offer),
        });
        let builder = self
            .http
            .post(format!("{}/payments", self.base_url))
            .basic_auth(shop_id, Some(secret_key))
            .header("Idempotence-Key", idempotence_key)
            .json(&body);
        let value = log_upstream_timing(
            PROVIDER,
            "create_payment",
            Some(json!({ "user_id": request.user_id, "qty": request.qty })),
            || send_json(PROVIDER, builder),
        )
        .await?;
        decode(PROVIDER, value)
    }

    /// `{base}/payments/{id}` with the id as a single escaped path segment.
    fn payment_url(&self, payment_id: &str) -> Result<Url, AppError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|err| AppError::Configuration(format!("YOOKASSA_BASE_URL is invalid: {err}")))?;
        url.path_segments_mut()
            .map_err(|_| AppError::Configuration("YOOKASSA_BASE_URL cannot take a path".to_string()))?
            .pop_if_empty()
            .extend(["payments", payment_id]);
        Ok(url)
    }

    pub async fn get_payment(&self, payment_id: &str) -> Result<ProviderPayment, AppError> {
        let (shop_id, secret_key) = self.credentials()?;
        let builder = self
            .http
            .get(self.payment_url(payment_id)?)
            .basic_auth(shop_id, Some(secret_key));
        let value = log_upstream_timing(
            PROVIDER,
            "get_payment",
            Some(json!({ "payment_id": payment_id })),
            || send_json(PROVIDER, builder),
        )
        .await?;
        decode(PROVIDER, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn maps_payment_statuses() {
        assert_eq!(map_payment_status("pending").unwrap(), PaymentStatus::Pending);
        assert_eq!(
            map_payment_status("waiting_for_capture").unwrap(),
            PaymentStatus::Pending
        );
        assert_eq!(map_payment_status("succeeded").unwrap(), PaymentStatus::Succeeded);
        assert_eq!(map_payment_status("canceled").unwrap(), PaymentStatus::Canceled);
        assert!(matches!(
            map_payment_status("refunded"),
            Err(AppError::UnmappedStatus { .. })
        ));
    }

    #[test]
    fn metadata_describes_the_payment() {
        let metadata = PaymentMetadata::new(42, 20, 429.0, "t20");
        assert_eq!(metadata.amount.as_deref(), Some("429.00"));
        assert_eq!(
            metadata.describe(),
            Some(DescribedPayment {
                user_id: 42,
                qty: 20,
                amount: 429.0,
                offer: "t20".to_string()
            })
        );
        assert_eq!(PaymentMetadata::default().describe(), None);
    }

    #[tokio::test]
    async fn create_payment_sends_idempotence_key_and_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/payments"))
            .and(header_exists("Idempotence-Key"))
            .and(header("authorization", "Basic c2hvcDpzZWNyZXQ="))
            .and(body_partial_json(json!({
                "amount": {"value": "386.00", "currency": "RUB"},
                "capture": true,
                "confirmation": {"type": "redirect", "return_url": "https://t.me/photofly_bot"},
                "metadata": {"user_id": "7", "qty": "20", "amount": "386.00", "offer": "t20"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "2d8b7c1e-000f-5000-8000-1a2b3c4d5e6f",
                "status": "pending",
                "confirmation": {"type": "redirect", "confirmation_url": "https://yoomoney.ru/checkout/x"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = YooKassaClient::new(Client::new(), &server.uri(), "shop", "secret");
        let payment = client
            .create_payment(&PaymentRequest {
                user_id: 7,
                qty: 20,
                amount: 386.0,
                currency: "RUB",
                title: "20 генераций",
                return_url: "https://t.me/photofly_bot",
                offer: "t20",
            })
            .await
            .unwrap();
        assert_eq!(payment.status, "pending");
        assert_eq!(
            payment.confirmation.and_then(|c| c.confirmation_url).as_deref(),
            Some("https://yoomoney.ru/checkout/x")
        );
    }

    #[test]
    fn payment_id_stays_inside_its_path_segment() {
        let client = YooKassaClient::new(Client::new(), "https://api.yookassa.ru/v3/", "shop", "secret");
        assert_eq!(
            client.payment_url("2d8b7c1e-000f-5000-8000-1a2b3c4d5e6f").unwrap().as_str(),
            "https://api.yookassa.ru/v3/payments/2d8b7c1e-000f-5000-8000-1a2b3c4d5e6f"
        );
        assert_eq!(
            client.payment_url("../refunds?x=1").unwrap().as_str(),
            "https://api.yookassa.ru/v3/payments/..%2Frefunds%3Fx=1"
        );
    }

    #[tokio::test]
    async fn missing_credentials_are_a_configuration_error() {
        let client = YooKassaClient::new(Client::new(), "http://127.0.0.1:9", "", "secret");
        let err = client.get_payment("p").await.unwrap_err();
        assert!(matches!(err, AppError::Configuration(message) if message.contains("YOOKASSA_SHOP_ID")));
    }
}

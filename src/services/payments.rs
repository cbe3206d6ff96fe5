use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::{discounted_price, Config, Offer, FLASH_OFFER_TAG};
use crate::db::database::{round_money, Database};
use crate::db::models::{PaymentCredit, PaymentRecord, PaymentStatus};
use crate::error::AppError;
use crate::providers::yookassa::{map_payment_status, PaymentRequest, YooKassaClient};

const MAX_PAYMENT_ID_LEN: usize = 64;

/// Provider ids are UUID-like: ASCII letters, digits, `-` and `_`.
fn is_payment_id(value: &str) -> bool {
    value.len() <= MAX_PAYMENT_ID_LEN
        && value
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_')
}

pub struct NewPayment<'a> {
    pub user_id: i64,
    pub qty: i64,
    pub amount: f64,
    pub title: &'a str,
    pub offer: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedPayment {
    pub payment_id: String,
    pub confirmation_url: String,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentCheck {
    pub payment_id: String,
    pub status: PaymentStatus,
    /// Set only by the check that actually credited the payment.
    pub credit: Option<PaymentCredit>,
}

pub fn offer_title(qty: i64) -> String {
    format!("PhotoFly: {qty} генераций")
}

#[derive(Clone)]
pub struct PaymentService {
    config: Arc<Config>,
    db: Database,
    yookassa: YooKassaClient,
    return_url: String,
}

impl PaymentService {
    pub fn new(config: Arc<Config>, db: Database, yookassa: YooKassaClient, bot_username: &str) -> Self {
        let return_url = config.payment_return_url(bot_username);
        PaymentService {
            config,
            db,
            yookassa,
            return_url,
        }
    }

    pub async fn create_payment(&self, payment: &NewPayment<'_>) -> Result<CreatedPayment, AppError> {
        if payment.qty <= 0 {
            return Err(AppError::Validation("qty must be positive".to_string()));
        }
        if !payment.amount.is_finite() || payment.amount <= 0.0 {
            return Err(AppError::Validation("amount must be positive".to_string()));
        }
        let amount = round_money(payment.amount);
        self.db.get_user(payment.user_id).await?;

        let created = self
            .yookassa
            .create_payment(&PaymentRequest {
                user_id: payment.user_id,
                qty: payment.qty,
                amount,
                currency: &self.config.payment_currency,
                title: payment.title,
                return_url: &self.return_url,
                offer: payment.offer,
            })
            .await?;
        let confirmation_url = created
            .confirmation
            .and_then(|confirmation| confirmation.confirmation_url)
            .ok_or_else(|| AppError::UpstreamUnavailable {
                provider: crate::providers::yookassa::PROVIDER,
                detail: format!("payment {} has no confirmation url", created.id),
            })?;

        self.db
            .insert_payment(&PaymentRecord {
                payment_id: created.id.clone(),
                user_id: payment.user_id,
                qty: payment.qty,
                amount,
                offer: payment.offer.to_string(),
                status: PaymentStatus::Pending,
                created_at: Utc::now(),
            })
            .await?;
        info!(
            "Payment {} created for user {}: {} credits for {:.2} {}",
            created.id, payment.user_id, payment.qty, amount, self.config.payment_currency
        );
        Ok(CreatedPayment {
            payment_id: created.id,
            confirmation_url,
            amount,
        })
    }

    /// Buys a tariff or the flash offer; referred users get the referral discount.
    pub async fn create_offer_payment(&self, user_id: i64, offer: &Offer) -> Result<CreatedPayment, AppError> {
        let user = self.db.get_user(user_id).await?;
        let price = if user.referred_by.is_some() {
            discounted_price(offer.price, self.config.referral_discount_percent)
        } else {
            offer.price
        };
        let title = offer_title(offer.qty);
        self.create_payment(&NewPayment {
            user_id,
            qty: offer.qty,
            amount: price as f64,
            title: &title,
            offer: &offer.tag,
        })
        .await
    }

    /// Reconciles a payment with the provider, crediting it at most once.
    pub async fn check_payment(&self, payment_id: &str) -> Result<PaymentCheck, AppError> {
        let payment_id = payment_id.trim();
        if payment_id.is_empty() {
            return Err(AppError::Validation("payment_id is required".to_string()));
        }
        if !is_payment_id(payment_id) {
            return Err(AppError::Validation("payment_id is malformed".to_string()));
        }
        let remote = match self.yookassa.get_payment(payment_id).await {
            Ok(remote) => remote,
            Err(AppError::UpstreamRejected { status: 404, .. }) => {
                return Err(AppError::NotFound(format!("Unknown payment {payment_id}")));
            }
            Err(err) => return Err(err),
        };
        let status = map_payment_status(&remote.status)?;

        if self.db.get_payment(payment_id).await?.is_none() {
            let described = remote
                .metadata
                .as_ref()
                .and_then(|metadata| metadata.describe())
                .ok_or_else(|| AppError::NotFound(format!("Unknown payment {payment_id}")))?;
            warn!(
                "Payment {} was not stored locally, adopting it for user {}",
                payment_id, described.user_id
            );
            self.db.get_user(described.user_id).await?;
            self.db
                .insert_payment(&PaymentRecord {
                    payment_id: payment_id.to_string(),
                    user_id: described.user_id,
                    qty: described.qty,
                    amount: round_money(described.amount),
                    offer: described.offer,
                    status: PaymentStatus::Pending,
                    created_at: Utc::now(),
                })
                .await?;
        }

        let credit = match status {
            PaymentStatus::Succeeded => {
                let credit = self
                    .db
                    .finalize_payment(payment_id, self.config.referral_percent, FLASH_OFFER_TAG)
                    .await?;
                if let Some(credit) = &credit {
                    info!(
                        "Payment {} credited {} credits to user {}, balance {}",
                        payment_id, credit.qty, credit.user_id, credit.balance
                    );
                    if let Some(referral) = &credit.referral {
                        info!(
                            "Referrer {} earned {:.2} from payment {}",
                            referral.referrer_id, referral.amount, payment_id
                        );
                    }
                }
                credit
            }
            PaymentStatus::Canceled => {
                if self.db.cancel_payment(payment_id).await? {
                    info!("Payment {} was canceled", payment_id);
                }
                None
            }
            PaymentStatus::Pending => None,
        };

        Ok(PaymentCheck {
            payment_id: payment_id.to_string(),
            status,
            credit,
        })
    }
}

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Internal lifecycle of an upstream task (training or prediction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Canceled
        )
    }

    /// Coarse 0/5/50/100 progress scale.
    pub fn progress(self) -> i64 {
        match self {
            JobStatus::Pending => 5,
            JobStatus::Running => 50,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Canceled => 100,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            "canceled" => Ok(JobStatus::Canceled),
            other => Err(anyhow!("Unknown stored job status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Canceled,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Canceled => "canceled",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(PaymentStatus::Pending),
            "succeeded" => Ok(PaymentStatus::Succeeded),
            "canceled" => Ok(PaymentStatus::Canceled),
            other => Err(anyhow!("Unknown stored payment status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserState {
    pub id: i64,
    pub balance: i64,
    pub has_model: bool,
    pub model_id: Option<String>,
    pub job_id: Option<String>,
    pub referred_by: Option<i64>,
    pub ref_code: String,
    pub ref_earn_total: f64,
    pub ref_earn_ready: f64,
    pub paid_any: bool,
    pub first_seen_ts: i64,
    pub flash_sent: bool,
    pub flash_bought: bool,
    /// In-flight payments: payment id -> offer tag.
    pub purchases: BTreeMap<String, String>,
}

impl UserState {
    pub fn new(id: i64, now_ts: i64) -> Self {
        UserState {
            id,
            balance: 0,
            has_model: false,
            model_id: None,
            job_id: None,
            referred_by: None,
            ref_code: referral_code(id),
            ref_earn_total: 0.0,
            ref_earn_ready: 0.0,
            paid_any: false,
            first_seen_ts: now_ts,
            flash_sent: false,
            flash_bought: false,
            purchases: BTreeMap::new(),
        }
    }
}

pub fn referral_code(user_id: i64) -> String {
    format!("ref_{user_id}")
}

/// Parses a `/start` argument of the form `ref_<id>`.
pub fn parse_referral_code(arg: &str) -> Option<i64> {
    arg.trim()
        .strip_prefix("ref_")
        .and_then(|value| value.trim().parse::<i64>().ok())
}

#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: i64,
    pub balance: i64,
    pub has_model: bool,
    pub model_id: Option<String>,
    pub job_id: Option<String>,
    pub referred_by: Option<i64>,
    pub ref_code: String,
    pub ref_earn_total: f64,
    pub ref_earn_ready: f64,
    pub paid_any: bool,
    pub first_seen_ts: i64,
    pub flash_sent: bool,
    pub flash_bought: bool,
    pub purchases: String,
}

impl From<UserRow> for UserState {
    fn from(row: UserRow) -> Self {
        UserState {
            id: row.id,
            balance: row.balance,
            has_model: row.has_model,
            model_id: row.model_id,
            job_id: row.job_id,
            referred_by: row.referred_by,
            ref_code: row.ref_code,
            ref_earn_total: row.ref_earn_total,
            ref_earn_ready: row.ref_earn_ready,
            paid_any: row.paid_any,
            first_seen_ts: row.first_seen_ts,
            flash_sent: row.flash_sent,
            flash_bought: row.flash_bought,
            purchases: serde_json::from_str(&row.purchases).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRecord {
    pub payment_id: String,
    pub user_id: i64,
    pub qty: i64,
    pub amount: f64,
    pub offer: String,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct PaymentRow {
    pub payment_id: String,
    pub user_id: i64,
    pub qty: i64,
    pub amount: f64,
    pub offer: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for PaymentRecord {
    type Error = anyhow::Error;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(PaymentRecord {
            payment_id: row.payment_id,
            user_id: row.user_id,
            qty: row.qty,
            amount: row.amount,
            offer: row.offer,
            status: row.status.parse()?,
            created_at: row.created_at,
        })
    }
}

/// What `finalize_payment` changed when it credited a payment.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentCredit {
    pub user_id: i64,
    pub qty: i64,
    pub balance: i64,
    pub offer: String,
    pub referral: Option<ReferralCredit>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferralCredit {
    pub referrer_id: i64,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub job_id: String,
    pub user_id: i64,
    pub chat_id: Option<i64>,
    pub training_id: String,
    pub status: JobStatus,
    pub progress: i64,
    pub model_id: Option<String>,
    pub next_poll_at: i64,
    pub poll_attempts: i64,
    pub notified: bool,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Applies a freshly observed status; progress never moves backwards.
    pub fn observe(&mut self, status: JobStatus) {
        self.status = status;
        self.progress = self.progress.max(status.progress());
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub job_id: String,
    pub user_id: i64,
    pub chat_id: Option<i64>,
    pub training_id: String,
    pub status: String,
    pub progress: i64,
    pub model_id: Option<String>,
    pub next_poll_at: i64,
    pub poll_attempts: i64,
    pub notified: bool,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for JobRecord {
    type Error = anyhow::Error;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(JobRecord {
            job_id: row.job_id,
            user_id: row.user_id,
            chat_id: row.chat_id,
            training_id: row.training_id,
            status: row.status.parse()?,
            progress: row.progress,
            model_id: row.model_id,
            next_poll_at: row.next_poll_at,
            poll_attempts: row.poll_attempts,
            notified: row.notified,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn referral_code_round_trips_through_start_argument() {
        assert_eq!(parse_referral_code(&referral_code(4242)), Some(4242));
        assert_eq!(parse_referral_code("ref_ 17"), Some(17));
        assert_eq!(parse_referral_code("promo_17"), None);
        assert_eq!(parse_referral_code("ref_abc"), None);
    }

    #[test]
    fn observed_progress_never_regresses() {
        let now = Utc::now();
        let mut job = JobRecord {
            job_id: "job_1".to_string(),
            user_id: 1,
            chat_id: None,
            training_id: "tr".to_string(),
            status: JobStatus::Pending,
            progress: 5,
            model_id: None,
            next_poll_at: 0,
            poll_attempts: 0,
            notified: false,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        job.observe(JobStatus::Running);
        assert_eq!(job.progress, 50);
        job.observe(JobStatus::Pending);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 50);
        job.observe(JobStatus::Succeeded);
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn stored_status_strings_parse_back() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Succeeded,
            JobStatus::Failed,
            JobStatus::Canceled,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("processing".parse::<JobStatus>().is_err());
    }
}

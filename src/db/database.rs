use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::db::models::{
    referral_code, JobRecord, JobRow, JobStatus, PaymentCredit, PaymentRecord, PaymentRow,
    PaymentStatus, ReferralCredit, UserRow, UserState,
};

const USER_COLUMNS: &str = "id, balance, has_model, model_id, job_id, referred_by, ref_code, \
    ref_earn_total, ref_earn_ready, paid_any, first_seen_ts, flash_sent, flash_bought, purchases";
const JOB_COLUMNS: &str = "job_id, user_id, chat_id, training_id, status, progress, model_id, \
    next_poll_at, poll_attempts, notified, last_error, created_at, updated_at";
const PAYMENT_COLUMNS: &str = "payment_id, user_id, qty, amount, offer, status, created_at";

/// Rounds a currency amount to kopecks.
pub fn round_money(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn init(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid DATABASE_URL {database_url}"))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (\
                id INTEGER PRIMARY KEY,\
                balance INTEGER NOT NULL DEFAULT 0,\
                has_model INTEGER NOT NULL DEFAULT 0,\
                model_id TEXT,\
                job_id TEXT,\
                referred_by INTEGER,\
                ref_code TEXT NOT NULL,\
                ref_earn_total REAL NOT NULL DEFAULT 0,\
                ref_earn_ready REAL NOT NULL DEFAULT 0,\
                paid_any INTEGER NOT NULL DEFAULT 0,\
                first_seen_ts INTEGER NOT NULL,\
                flash_sent INTEGER NOT NULL DEFAULT 0,\
                flash_bought INTEGER NOT NULL DEFAULT 0,\
                purchases TEXT NOT NULL DEFAULT '{}'\
            );",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS payments (\
                payment_id TEXT PRIMARY KEY,\
                user_id INTEGER NOT NULL,\
                qty INTEGER NOT NULL,\
                amount REAL NOT NULL,\
                offer TEXT NOT NULL,\
                status TEXT NOT NULL DEFAULT 'pending',\
                created_at TEXT NOT NULL,\
                credited_at TEXT\
            );",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS jobs (\
                job_id TEXT PRIMARY KEY,\
                user_id INTEGER NOT NULL,\
                chat_id INTEGER,\
                training_id TEXT NOT NULL,\
                status TEXT NOT NULL,\
                progress INTEGER NOT NULL DEFAULT 0,\
                model_id TEXT,\
                next_poll_at INTEGER NOT NULL,\
                poll_attempts INTEGER NOT NULL DEFAULT 0,\
                notified INTEGER NOT NULL DEFAULT 0,\
                last_error TEXT,\
                created_at TEXT NOT NULL,\
                updated_at TEXT NOT NULL\
            );",
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_payments_status ON payments(status, created_at);")
            .execute(&pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_due ON jobs(status, next_poll_at);")
            .execute(&pool)
            .await?;

        info!("Database tables created successfully");
        Ok(Database { pool })
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn find_user(&self, user_id: i64) -> Result<Option<UserState>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ?"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(UserState::from))
    }

    /// Returns the user, creating a default record on first contact.
    pub async fn get_user(&self, user_id: i64) -> Result<UserState> {
        let fresh = UserState::new(user_id, Utc::now().timestamp());
        sqlx::query(
            "INSERT OR IGNORE INTO users (id, ref_code, first_seen_ts, purchases) VALUES (?, ?, ?, '{}')",
        )
        .bind(fresh.id)
        .bind(&fresh.ref_code)
        .bind(fresh.first_seen_ts)
        .execute(&self.pool)
        .await?;

        self.find_user(user_id)
            .await?
            .with_context(|| format!("User {user_id} vanished after insert"))
    }

    /// Overwrites every field of the user record.
    pub async fn save_user(&self, user: &UserState) -> Result<()> {
        let purchases = serde_json::to_string(&user.purchases)?;
        sqlx::query(
            "INSERT INTO users (id, balance, has_model, model_id, job_id, referred_by, ref_code, \
                ref_earn_total, ref_earn_ready, paid_any, first_seen_ts, flash_sent, flash_bought, purchases) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
                balance = excluded.balance, has_model = excluded.has_model, \
                model_id = excluded.model_id, job_id = excluded.job_id, \
                referred_by = excluded.referred_by, ref_code = excluded.ref_code, \
                ref_earn_total = excluded.ref_earn_total, ref_earn_ready = excluded.ref_earn_ready, \
                paid_any = excluded.paid_any, first_seen_ts = excluded.first_seen_ts, \
                flash_sent = excluded.flash_sent, flash_bought = excluded.flash_bought, \
                purchases = excluded.purchases",
        )
        .bind(user.id)
        .bind(user.balance)
        .bind(user.has_model)
        .bind(&user.model_id)
        .bind(&user.job_id)
        .bind(user.referred_by)
        .bind(&user.ref_code)
        .bind(user.ref_earn_total)
        .bind(user.ref_earn_ready)
        .bind(user.paid_any)
        .bind(user.first_seen_ts)
        .bind(user.flash_sent)
        .bind(user.flash_bought)
        .bind(purchases)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Attaches a referrer once; self-referral and unknown referrers are ignored.
    pub async fn set_referrer_if_absent(&self, user_id: i64, referrer_id: i64) -> Result<bool> {
        if user_id == referrer_id {
            return Ok(false);
        }
        let result = sqlx::query(
            "UPDATE users SET referred_by = ? \
             WHERE id = ? AND referred_by IS NULL AND EXISTS (SELECT 1 FROM users WHERE id = ?)",
        )
        .bind(referrer_id)
        .bind(user_id)
        .bind(referrer_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Takes `cost` credits if the balance covers them; returns the new balance.
    pub async fn reserve_credits(&self, user_id: i64, cost: i64) -> Result<Option<i64>> {
        let balance = sqlx::query_scalar::<_, i64>(
            "UPDATE users SET balance = balance - ? WHERE id = ? AND balance >= ? RETURNING balance",
        )
        .bind(cost)
        .bind(user_id)
        .bind(cost)
        .fetch_optional(&self.pool)
        .await?;
        Ok(balance)
    }

    pub async fn refund_credits(&self, user_id: i64, amount: i64) -> Result<()> {
        sqlx::query("UPDATE users SET balance = balance + ? WHERE id = ?")
            .bind(amount)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_user_job(&self, user_id: i64, job_id: &str) -> Result<()> {
        let updated = sqlx::query("UPDATE users SET job_id = ? WHERE id = ?")
            .bind(job_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if updated == 0 {
            anyhow::bail!("user {user_id} not found while linking job {job_id}");
        }
        Ok(())
    }

    pub async fn mark_model_ready(&self, user_id: i64, model_id: &str, job_id: &str) -> Result<()> {
        let updated = sqlx::query("UPDATE users SET has_model = 1, model_id = ?, job_id = ? WHERE id = ?")
            .bind(model_id)
            .bind(job_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if updated == 0 {
            anyhow::bail!("user {user_id} not found while storing model {model_id}");
        }
        Ok(())
    }

    pub async fn users_due_for_flash_offer(
        &self,
        first_seen_before: i64,
        limit: i64,
    ) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM users \
             WHERE flash_sent = 0 AND flash_bought = 0 AND first_seen_ts <= ? \
             ORDER BY first_seen_ts LIMIT ?",
        )
        .bind(first_seen_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    pub async fn mark_flash_sent(&self, user_id: i64) -> Result<()> {
        sqlx::query("UPDATE users SET flash_sent = 1 WHERE id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Stores a pending payment and remembers it in the buyer's purchases map.
    pub async fn insert_payment(&self, payment: &PaymentRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO payments (payment_id, user_id, qty, amount, offer, status, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&payment.payment_id)
        .bind(payment.user_id)
        .bind(payment.qty)
        .bind(payment.amount)
        .bind(&payment.offer)
        .bind(payment.status.as_str())
        .bind(payment.created_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 1 && payment.status == PaymentStatus::Pending {
            let purchases = sqlx::query_scalar::<_, String>("SELECT purchases FROM users WHERE id = ?")
                .bind(payment.user_id)
                .fetch_optional(&mut *tx)
                .await?;
            if let Some(purchases) = purchases {
                let mut purchases = parse_purchases(&purchases);
                purchases.insert(payment.payment_id.clone(), payment.offer.clone());
                sqlx::query("UPDATE users SET purchases = ? WHERE id = ?")
                    .bind(serde_json::to_string(&purchases)?)
                    .bind(payment.user_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_payment(&self, payment_id: &str) -> Result<Option<PaymentRecord>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE payment_id = ?"
        ))
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(PaymentRecord::try_from).transpose()
    }

    /// Credits a succeeded payment at most once.
    ///
    /// The status flip and every balance change share one transaction, so a
    /// payment observed as succeeded by several pollers is credited by exactly
    /// one of them. Returns `None` when the payment was already final.
    pub async fn finalize_payment(
        &self,
        payment_id: &str,
        referral_percent: f64,
        flash_offer_tag: &str,
    ) -> Result<Option<PaymentCredit>> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            "UPDATE payments SET status = 'succeeded', credited_at = ? \
             WHERE payment_id = ? AND status = 'pending'",
        )
        .bind(Utc::now())
        .bind(payment_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if claimed != 1 {
            tx.rollback().await?;
            return Ok(None);
        }

        let payment: PaymentRecord = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE payment_id = ?"
        ))
        .bind(payment_id)
        .fetch_one(&mut *tx)
        .await?
        .try_into()?;

        let now_ts = Utc::now().timestamp();
        sqlx::query(
            "INSERT OR IGNORE INTO users (id, ref_code, first_seen_ts, purchases) VALUES (?, ?, ?, '{}')",
        )
        .bind(payment.user_id)
        .bind(referral_code(payment.user_id))
        .bind(now_ts)
        .execute(&mut *tx)
        .await?;

        let user: UserState = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ?"
        ))
        .bind(payment.user_id)
        .fetch_one(&mut *tx)
        .await?
        .into();

        let mut purchases = user.purchases.clone();
        purchases.remove(payment_id);
        let flash_bought = user.flash_bought || payment.offer == flash_offer_tag;
        let balance = user.balance + payment.qty;

        sqlx::query(
            "UPDATE users SET balance = ?, paid_any = 1, flash_bought = ?, purchases = ? WHERE id = ?",
        )
        .bind(balance)
        .bind(flash_bought)
        .bind(serde_json::to_string(&purchases)?)
        .bind(user.id)
        .execute(&mut *tx)
        .await?;

        let mut referral = None;
        if let Some(referrer_id) = user.referred_by {
            let amount = round_money(payment.amount * referral_percent / 100.0);
            let updated = sqlx::query(
                "UPDATE users SET ref_earn_total = ref_earn_total + ?, ref_earn_ready = ref_earn_ready + ? \
                 WHERE id = ?",
            )
            .bind(amount)
            .bind(amount)
            .bind(referrer_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if updated == 1 {
                referral = Some(ReferralCredit {
                    referrer_id,
                    amount,
                });
            } else {
                warn!(
                    "Referrer {} of user {} not found, commission skipped",
                    referrer_id, user.id
                );
            }
        }

        tx.commit().await?;

        Ok(Some(PaymentCredit {
            user_id: user.id,
            qty: payment.qty,
            balance,
            offer: payment.offer,
            referral,
        }))
    }

    /// Marks a pending payment canceled and drops it from the purchases map.
    pub async fn cancel_payment(&self, payment_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let user_id = sqlx::query_scalar::<_, i64>(
            "UPDATE payments SET status = 'canceled' WHERE payment_id = ? AND status = 'pending' \
             RETURNING user_id",
        )
        .bind(payment_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(user_id) = user_id else {
            tx.rollback().await?;
            return Ok(false);
        };

        let purchases = sqlx::query_scalar::<_, String>("SELECT purchases FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;
        if let Some(purchases) = purchases {
            let mut purchases = parse_purchases(&purchases);
            purchases.remove(payment_id);
            sqlx::query("UPDATE users SET purchases = ? WHERE id = ?")
                .bind(serde_json::to_string(&purchases)?)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(true)
    }

    pub async fn pending_payments(
        &self,
        created_after: chrono::DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PaymentRecord>> {
        let rows = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE status = 'pending' AND created_at >= ? ORDER BY created_at LIMIT ?"
        ))
        .bind(created_after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(PaymentRecord::try_from).collect()
    }

    pub async fn insert_job(&self, job: &JobRecord) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO jobs ({JOB_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&job.job_id)
        .bind(job.user_id)
        .bind(job.chat_id)
        .bind(&job.training_id)
        .bind(job.status.as_str())
        .bind(job.progress)
        .bind(&job.model_id)
        .bind(job.next_poll_at)
        .bind(job.poll_attempts)
        .bind(job.notified)
        .bind(&job.last_error)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ?"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(JobRecord::try_from).transpose()
    }

    /// Persists the polled state of a job. Stored progress is never lowered.
    pub async fn update_job(&self, job: &JobRecord) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET status = ?, progress = MAX(progress, ?), model_id = ?, next_poll_at = ?, \
                poll_attempts = ?, last_error = ?, updated_at = ? \
             WHERE job_id = ?",
        )
        .bind(job.status.as_str())
        .bind(job.progress)
        .bind(&job.model_id)
        .bind(job.next_poll_at)
        .bind(job.poll_attempts)
        .bind(&job.last_error)
        .bind(Utc::now())
        .bind(&job.job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Jobs whose poll time has come, plus finished jobs nobody was told about.
    pub async fn due_jobs(&self, now_ts: i64, limit: i64) -> Result<Vec<JobRecord>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE (status IN ('pending', 'running') AND next_poll_at <= ?) \
                OR (status IN ('succeeded', 'failed', 'canceled') AND notified = 0) \
             ORDER BY next_poll_at LIMIT ?"
        ))
        .bind(now_ts)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(JobRecord::try_from).collect()
    }

    pub async fn mark_job_notified(&self, job_id: &str) -> Result<()> {
        sqlx::query("UPDATE jobs SET notified = 1 WHERE job_id = ?")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count_jobs_by_status(&self, status: JobStatus) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM jobs WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn parse_purchases(raw: &str) -> std::collections::BTreeMap<String, String> {
    serde_json::from_str(raw).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_db() -> Database {
        Database::init("sqlite::memory:").await.expect("in-memory db")
    }

    fn pending_payment(payment_id: &str, user_id: i64, qty: i64, amount: f64) -> PaymentRecord {
        PaymentRecord {
            payment_id: payment_id.to_string(),
            user_id,
            qty,
            amount,
            offer: "t20".to_string(),
            status: PaymentStatus::Pending,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn get_user_creates_default_record_once() {
        let db = memory_db().await;
        let first = db.get_user(77).await.unwrap();
        assert_eq!(first.balance, 0);
        assert_eq!(first.ref_code, "ref_77");
        assert!(!first.has_model);

        let mut changed = first.clone();
        changed.balance = 9;
        changed.purchases.insert("pay_1".to_string(), "t20".to_string());
        db.save_user(&changed).await.unwrap();

        let again = db.get_user(77).await.unwrap();
        assert_eq!(again, changed);
    }

    #[tokio::test]
    async fn job_and_model_updates_require_an_existing_user() {
        let db = memory_db().await;
        assert!(db.set_user_job(404, "job_x").await.is_err());
        assert!(db.mark_model_ready(404, "owner/model:v1", "job_x").await.is_err());

        db.get_user(404).await.unwrap();
        db.set_user_job(404, "job_x").await.unwrap();
        db.mark_model_ready(404, "owner/model:v1", "job_x").await.unwrap();
        let user = db.get_user(404).await.unwrap();
        assert!(user.has_model);
        assert_eq!(user.job_id.as_deref(), Some("job_x"));
    }

    #[tokio::test]
    async fn referrer_is_set_only_once_and_never_to_self() {
        let db = memory_db().await;
        db.get_user(1).await.unwrap();
        db.get_user(2).await.unwrap();
        db.get_user(3).await.unwrap();

        assert!(!db.set_referrer_if_absent(2, 2).await.unwrap());
        assert!(!db.set_referrer_if_absent(2, 999).await.unwrap());
        assert!(db.set_referrer_if_absent(2, 1).await.unwrap());
        assert!(!db.set_referrer_if_absent(2, 3).await.unwrap());
        assert_eq!(db.get_user(2).await.unwrap().referred_by, Some(1));
    }

    #[tokio::test]
    async fn reserve_credits_refuses_when_balance_is_short() {
        let db = memory_db().await;
        let mut user = db.get_user(5).await.unwrap();
        user.balance = 2;
        db.save_user(&user).await.unwrap();

        assert_eq!(db.reserve_credits(5, 3).await.unwrap(), None);
        assert_eq!(db.get_user(5).await.unwrap().balance, 2);

        db.refund_credits(5, 4).await.unwrap();
        assert_eq!(db.reserve_credits(5, 3).await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn finalize_payment_credits_exactly_once_with_referral() {
        let db = memory_db().await;
        db.get_user(10).await.unwrap();
        db.get_user(20).await.unwrap();
        db.set_referrer_if_absent(20, 10).await.unwrap();
        db.insert_payment(&pending_payment("pay_a", 20, 20, 429.0))
            .await
            .unwrap();
        assert_eq!(
            db.get_user(20).await.unwrap().purchases.get("pay_a").map(String::as_str),
            Some("t20")
        );

        let credit = db
            .finalize_payment("pay_a", 20.0, "flash")
            .await
            .unwrap()
            .expect("first finalize credits");
        assert_eq!(credit.qty, 20);
        assert_eq!(credit.balance, 20);
        let referral = credit.referral.expect("referrer credited");
        assert_eq!(referral.referrer_id, 10);
        assert!((referral.amount - 85.8).abs() < 1e-9);

        for _ in 0..3 {
            assert!(db.finalize_payment("pay_a", 20.0, "flash").await.unwrap().is_none());
        }

        let buyer = db.get_user(20).await.unwrap();
        assert_eq!(buyer.balance, 20);
        assert!(buyer.paid_any);
        assert!(buyer.purchases.is_empty());
        let referrer = db.get_user(10).await.unwrap();
        assert!((referrer.ref_earn_total - 85.8).abs() < 1e-9);
        assert!((referrer.ref_earn_ready - 85.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn flash_offer_purchase_sets_the_one_shot_flag() {
        let db = memory_db().await;
        db.get_user(30).await.unwrap();
        let mut payment = pending_payment("pay_f", 30, 50, 379.0);
        payment.offer = "flash".to_string();
        db.insert_payment(&payment).await.unwrap();
        db.finalize_payment("pay_f", 20.0, "flash").await.unwrap();

        let user = db.get_user(30).await.unwrap();
        assert!(user.flash_bought);
        assert!(db.users_due_for_flash_offer(i64::MAX, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn canceled_payment_is_never_credited() {
        let db = memory_db().await;
        db.get_user(40).await.unwrap();
        db.insert_payment(&pending_payment("pay_c", 40, 20, 429.0))
            .await
            .unwrap();
        assert!(db.cancel_payment("pay_c").await.unwrap());
        assert!(!db.cancel_payment("pay_c").await.unwrap());
        assert!(db.finalize_payment("pay_c", 20.0, "flash").await.unwrap().is_none());
        assert_eq!(db.get_user(40).await.unwrap().balance, 0);
        assert!(db
            .pending_payments(Utc::now() - chrono::Duration::hours(1), 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn due_jobs_include_unnotified_terminal_jobs() {
        let db = memory_db().await;
        let now = Utc::now();
        let base = JobRecord {
            job_id: "job_a".to_string(),
            user_id: 1,
            chat_id: Some(1),
            training_id: "tr_a".to_string(),
            status: JobStatus::Running,
            progress: 50,
            model_id: None,
            next_poll_at: 100,
            poll_attempts: 0,
            notified: false,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        db.insert_job(&base).await.unwrap();
        db.insert_job(&JobRecord {
            job_id: "job_b".to_string(),
            next_poll_at: 500,
            ..base.clone()
        })
        .await
        .unwrap();
        db.insert_job(&JobRecord {
            job_id: "job_c".to_string(),
            status: JobStatus::Succeeded,
            progress: 100,
            next_poll_at: 900,
            ..base.clone()
        })
        .await
        .unwrap();

        let due = db.due_jobs(200, 10).await.unwrap();
        let ids = due.iter().map(|job| job.job_id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["job_a", "job_c"]);

        db.mark_job_notified("job_c").await.unwrap();
        let due = db.due_jobs(200, 10).await.unwrap();
        assert_eq!(due.len(), 1);
    }

    #[tokio::test]
    async fn update_job_never_lowers_stored_progress() {
        let db = memory_db().await;
        let now = Utc::now();
        let mut job = JobRecord {
            job_id: "job_p".to_string(),
            user_id: 1,
            chat_id: None,
            training_id: "tr_p".to_string(),
            status: JobStatus::Running,
            progress: 50,
            model_id: None,
            next_poll_at: 0,
            poll_attempts: 1,
            notified: false,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        db.insert_job(&job).await.unwrap();
        job.status = JobStatus::Pending;
        job.progress = 5;
        db.update_job(&job).await.unwrap();

        let stored = db.get_job("job_p").await.unwrap().unwrap();
        assert_eq!(stored.progress, 50);
    }

    #[test]
    fn money_rounds_to_two_places() {
        assert!((round_money(429.0 * 0.20) - 85.8).abs() < 1e-9);
        assert!((round_money(0.125) - 0.13).abs() < 1e-9);
    }
}

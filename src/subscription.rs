//! Plans, access checks and the JSON store behind the bot
//!
//! The store keeps users, subscriptions and collection jobs in a single
//! JSON file that is rewritten after every mutation.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};

pub const CURRENCY: &str = "RUB";
/// Completed jobs older than this are dropped by [`SubscriptionStore::cleanup_jobs`].
pub const JOB_RETENTION_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plan {
    pub code: &'static str,
    pub name: &'static str,
    pub days: i64,
    pub price: f64,
}

pub const PLANS: [Plan; 5] = [
    Plan {
        code: "trial",
        name: "Trial",
        days: 3,
        price: 0.0,
    },
    Plan {
        code: "daily",
        name: "Daily",
        days: 1,
        price: 50.0,
    },
    Plan {
        code: "weekly",
        name: "Weekly",
        days: 7,
        price: 250.0,
    },
    Plan {
        code: "monthly",
        name: "Monthly",
        days: 30,
        price: 800.0,
    },
    Plan {
        code: "yearly",
        name: "Yearly",
        days: 365,
        price: 5000.0,
    },
];

impl Plan {
    pub fn find(code: &str) -> Option<&'static Plan> {
        let code = code.trim().to_lowercase();
        PLANS.iter().find(|p| p.code == code)
    }

    pub fn trial() -> &'static Plan {
        &PLANS[0]
    }

    pub fn describe(&self) -> String {
        format!(
            "{} ({}): {} days, {:.0} {}",
            self.name, self.code, self.days, self.price, CURRENCY
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub user_id: i64,
    pub plan: String,
    pub starts_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub price: f64,
    pub currency: String,
}

impl Subscription {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    /// Whole days remaining, floored.
    pub fn days_left(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().div_euclid(86_400).max(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Active { days_left: i64 },
    Expired { days_ago: i64 },
    Missing,
}

impl Access {
    pub fn is_granted(&self) -> bool {
        matches!(self, Access::Active { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub uid: Uuid,
    pub user_id: i64,
    pub channel: String,
    pub methods: Vec<String>,
    pub status: JobStatus,
    pub items: usize,
    pub file_path: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StoreStats {
    pub users: usize,
    pub active_subscriptions: usize,
    pub total_jobs: usize,
    pub completed_jobs: usize,
    pub revenue: f64,
    pub sales: usize,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct UserStats {
    pub total_jobs: usize,
    pub completed_jobs: usize,
    pub total_members: usize,
}

impl UserStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_jobs == 0 {
            0.0
        } else {
            self.completed_jobs as f64 / self.total_jobs as f64 * 100.0
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    users: Vec<UserRecord>,
    #[serde(default)]
    subscriptions: Vec<Subscription>,
    #[serde(default)]
    jobs: Vec<Job>,
}

impl StoreData {
    fn latest_subscription(&self, user_id: i64) -> Option<&Subscription> {
        self.subscriptions
            .iter()
            .filter(|s| s.user_id == user_id)
            .max_by_key(|s| s.expires_at)
    }

    fn new_subscription(&mut self, user_id: i64, plan: &str, days: i64, price: f64, now: DateTime<Utc>) -> Subscription {
        let subscription = Subscription {
            user_id,
            plan: plan.to_string(),
            starts_at: now,
            expires_at: now + Duration::days(days),
            price,
            currency: CURRENCY.to_string(),
        };
        self.subscriptions.push(subscription.clone());
        subscription
    }
}

pub struct SubscriptionStore {
    path: PathBuf,
    data: Mutex<StoreData>,
}

impl SubscriptionStore {
    /// Open the store, starting empty when the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)?,
            Err(err) if err.kind() == ErrorKind::NotFound => StoreData::default(),
            Err(err) => return Err(Error::IoError(err)),
        };
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreData>> {
        self.data
            .lock()
            .map_err(|_| Error::Unknown("store lock poisoned".into()))
    }

    fn persist(&self, data: &StoreData) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(data)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Register a user once; a new user starts on the trial plan.
    /// Returns true when the user was created.
    pub fn ensure_user(
        &self,
        user_id: i64,
        username: Option<&str>,
        first_name: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut data = self.lock()?;
        if let Some(user) = data.users.iter_mut().find(|u| u.id == user_id) {
            user.last_activity = now;
            if username.is_some() {
                user.username = username.map(str::to_string);
            }
            self.persist(&data)?;
            return Ok(false);
        }

        data.users.push(UserRecord {
            id: user_id,
            username: username.map(str::to_string),
            first_name: first_name.to_string(),
            created_at: now,
            last_activity: now,
        });
        let trial = Plan::trial();
        data.new_subscription(user_id, trial.code, trial.days, trial.price, now);
        self.persist(&data)?;
        info!("Registered user {} with {} plan", user_id, trial.code);
        Ok(true)
    }

    pub fn user(&self, user_id: i64) -> Result<Option<UserRecord>> {
        Ok(self.lock()?.users.iter().find(|u| u.id == user_id).cloned())
    }

    /// Start `plan` at `now`, replacing nothing.
    pub fn grant(&self, user_id: i64, plan_code: &str, now: DateTime<Utc>) -> Result<Subscription> {
        let plan = Plan::find(plan_code)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown plan '{}'", plan_code)))?;
        let mut data = self.lock()?;
        let subscription = data.new_subscription(user_id, plan.code, plan.days, plan.price, now);
        self.persist(&data)?;
        info!("Granted {} to {}", plan.code, user_id);
        Ok(subscription)
    }

    /// Push the latest expiry back by `days`, or open an `admin` subscription.
    pub fn extend(&self, user_id: i64, days: i64, now: DateTime<Utc>) -> Result<Subscription> {
        if days <= 0 {
            return Err(Error::InvalidArgument("days must be positive".into()));
        }
        let mut data = self.lock()?;
        let latest = data
            .subscriptions
            .iter()
            .enumerate()
            .filter(|(_, s)| s.user_id == user_id)
            .max_by_key(|(_, s)| s.expires_at)
            .map(|(idx, _)| idx);

        let subscription = match latest {
            Some(idx) => {
                let sub = &mut data.subscriptions[idx];
                sub.expires_at += Duration::days(days);
                sub.clone()
            }
            None => data.new_subscription(user_id, "admin", days, 0.0, now),
        };
        self.persist(&data)?;
        info!("Extended {} by {} days", user_id, days);
        Ok(subscription)
    }

    pub fn active_subscription(&self, user_id: i64, now: DateTime<Utc>) -> Result<Option<Subscription>> {
        let data = self.lock()?;
        Ok(data
            .latest_subscription(user_id)
            .filter(|s| s.is_active(now))
            .cloned())
    }

    pub fn check_access(&self, user_id: i64, is_admin: bool, now: DateTime<Utc>) -> Result<Access> {
        if is_admin {
            return Ok(Access::Active { days_left: i64::MAX });
        }
        let data = self.lock()?;
        Ok(match data.latest_subscription(user_id) {
            Some(s) if s.is_active(now) => Access::Active {
                days_left: s.days_left(now),
            },
            Some(s) => Access::Expired {
                days_ago: (now - s.expires_at).num_seconds().div_euclid(86_400),
            },
            None => Access::Missing,
        })
    }

    pub fn record_job(&self, user_id: i64, channel: &str, methods: &[String], now: DateTime<Utc>) -> Result<Uuid> {
        let uid = Uuid::new_v4();
        let mut data = self.lock()?;
        data.jobs.push(Job {
            uid,
            user_id,
            channel: channel.to_string(),
            methods: methods.to_vec(),
            status: JobStatus::Running,
            items: 0,
            file_path: None,
            error: None,
            created_at: now,
            completed_at: None,
        });
        self.persist(&data)?;
        Ok(uid)
    }

    /// Close a job. `outcome` carries the item count and file, or an error text.
    pub fn finish_job(
        &self,
        uid: Uuid,
        outcome: std::result::Result<(usize, Option<String>), String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut data = self.lock()?;
        let job = data
            .jobs
            .iter_mut()
            .find(|j| j.uid == uid)
            .ok_or_else(|| Error::NotFound(format!("job {}", uid)))?;
        match outcome {
            Ok((items, file_path)) => {
                job.status = JobStatus::Completed;
                job.items = items;
                job.file_path = file_path;
            }
            Err(message) => {
                job.status = JobStatus::Failed;
                job.error = Some(message);
            }
        }
        job.completed_at = Some(now);
        self.persist(&data)
    }

    pub fn job(&self, uid: Uuid) -> Result<Option<Job>> {
        Ok(self.lock()?.jobs.iter().find(|j| j.uid == uid).cloned())
    }

    pub fn user_stats(&self, user_id: i64) -> Result<UserStats> {
        let data = self.lock()?;
        let mut stats = UserStats::default();
        for job in data.jobs.iter().filter(|j| j.user_id == user_id) {
            stats.total_jobs += 1;
            if job.status == JobStatus::Completed {
                stats.completed_jobs += 1;
                stats.total_members += job.items;
            }
        }
        Ok(stats)
    }

    pub fn stats(&self, now: DateTime<Utc>) -> Result<StoreStats> {
        let data = self.lock()?;
        let active_users: std::collections::HashSet<i64> = data
            .subscriptions
            .iter()
            .filter(|s| s.is_active(now))
            .map(|s| s.user_id)
            .collect();
        let paid: Vec<&Subscription> = data.subscriptions.iter().filter(|s| s.price > 0.0).collect();
        Ok(StoreStats {
            users: data.users.len(),
            active_subscriptions: active_users.len(),
            total_jobs: data.jobs.len(),
            completed_jobs: data
                .jobs
                .iter()
                .filter(|j| j.status == JobStatus::Completed)
                .count(),
            revenue: paid.iter().map(|s| s.price).sum(),
            sales: paid.len(),
        })
    }

    pub fn user_ids(&self) -> Result<Vec<i64>> {
        Ok(self.lock()?.users.iter().map(|u| u.id).collect())
    }

    /// Drop finished jobs completed more than a week before `now`.
    pub fn cleanup_jobs(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - Duration::days(JOB_RETENTION_DAYS);
        let mut data = self.lock()?;
        let before = data.jobs.len();
        data.jobs
            .retain(|j| j.completed_at.map_or(true, |done| done >= cutoff));
        let removed = before - data.jobs.len();
        if removed > 0 {
            self.persist(&data)?;
            info!("Removed {} old jobs", removed);
        }
        Ok(removed)
    }
}

/// Open the store or fall back to an in-place empty one when the file is corrupt.
pub fn open_or_reset(path: impl Into<PathBuf>) -> Result<SubscriptionStore> {
    let path = path.into();
    match SubscriptionStore::open(&path) {
        Ok(store) => Ok(store),
        Err(Error::SerializationError(msg)) => {
            warn!("Store {} unreadable ({}), backing it up", path.display(), msg);
            fs::rename(&path, path.with_extension("json.bak"))?;
            SubscriptionStore::open(path)
        }
        Err(err) => Err(err),
    }
}

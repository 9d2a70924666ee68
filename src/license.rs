//! License lifecycle: `fresh -> used`, never back.
//!
//! This module holds the storage-independent half of activation: the
//! status model, the ordered precondition guard chain and subscription
//! arithmetic. The transaction that runs the guards under a row lock
//! lives in `server::database`.

use std::fmt;
use std::str::FromStr;

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseStatus {
    Fresh,
    Used,
}

impl LicenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseStatus::Fresh => "fresh",
            LicenseStatus::Used => "used",
        }
    }
}

impl fmt::Display for LicenseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LicenseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fresh" => Ok(LicenseStatus::Fresh),
            "used" => Ok(LicenseStatus::Used),
            other => Err(format!("unknown license status: {other}")),
        }
    }
}

/// Why a license cannot be activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LicenseStateError {
    #[error("license not found")]
    NotFound,
    #[error("license is not assigned to a user")]
    Unassigned,
    #[error("license has already been used")]
    AlreadyUsed,
    #[error("user already holds an active license for this product")]
    DuplicateSubscription,
}

/// A license row as read from storage.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "server", derive(sqlx::FromRow))]
pub struct LicenseRecord {
    pub id: i64,
    pub license_key: String,
    pub product_id: i64,
    pub user_id: Option<i64>,
    pub status: String,
    pub duration_days: i64,
}

impl LicenseRecord {
    /// Parsed status. Unknown values are treated as not fresh.
    pub fn status(&self) -> Option<LicenseStatus> {
        self.status.parse().ok()
    }

    pub fn is_fresh(&self) -> bool {
        self.status() == Some(LicenseStatus::Fresh)
    }
}

/// Which optional guards apply to an activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationPolicy {
    pub require_assigned_user: bool,
    pub reject_duplicate_subscription: bool,
}

impl Default for ActivationPolicy {
    fn default() -> Self {
        Self {
            require_assigned_user: true,
            reject_duplicate_subscription: true,
        }
    }
}

/// Guard chain over the locked license row, in order: exists, assigned
/// (if required), fresh.
///
/// # Example
/// ```
/// use loadergate::license::{check_preconditions, ActivationPolicy, LicenseRecord, LicenseStateError};
///
/// let policy = ActivationPolicy::default();
/// assert_eq!(
///     check_preconditions(None, &policy).unwrap_err(),
///     LicenseStateError::NotFound
/// );
/// ```
pub fn check_preconditions(
    license: Option<LicenseRecord>,
    policy: &ActivationPolicy,
) -> Result<LicenseRecord, LicenseStateError> {
    let license = license.ok_or(LicenseStateError::NotFound)?;

    if policy.require_assigned_user && license.user_id.is_none() {
        return Err(LicenseStateError::Unassigned);
    }

    if !license.is_fresh() {
        return Err(LicenseStateError::AlreadyUsed);
    }

    Ok(license)
}

/// Final guard: the user must not already hold a used license for the
/// same product.
pub fn check_duplicate(
    policy: &ActivationPolicy,
    user_holds_product: bool,
) -> Result<(), LicenseStateError> {
    if policy.reject_duplicate_subscription && user_holds_product {
        Err(LicenseStateError::DuplicateSubscription)
    } else {
        Ok(())
    }
}

/// The committed result of a successful activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationRecord {
    pub activation_id: i64,
    pub license_id: i64,
    pub license_key: String,
    pub product_id: i64,
    pub user_id: Option<i64>,
    pub hwid: String,
    pub activated_at: NaiveDateTime,
}

/// Whole days left on a subscription, rounded up and floored at zero.
///
/// # Example
/// ```
/// use chrono::{Duration, NaiveDate};
/// use loadergate::license::days_remaining;
///
/// let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
/// assert_eq!(days_remaining(start, 30, start + Duration::hours(1)), 30);
/// assert_eq!(days_remaining(start, 30, start + Duration::days(31)), 0);
/// ```
pub fn days_remaining(activated_at: NaiveDateTime, duration_days: i64, now: NaiveDateTime) -> i64 {
    const SECS_PER_DAY: i64 = 86_400;

    let expires_at = activated_at + Duration::days(duration_days);
    let left = (expires_at - now).num_seconds();
    if left <= 0 {
        0
    } else {
        (left + SECS_PER_DAY - 1) / SECS_PER_DAY
    }
}

/// One entry of a user's subscription listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub product_name: String,
    pub latest_version: String,
    pub patch_note: Option<String>,
    pub days_remaining: i64,
}

/// Joined license/activation/product row behind a [`Subscription`].
#[derive(Debug, Clone)]
#[cfg_attr(feature = "server", derive(sqlx::FromRow))]
pub struct SubscriptionRow {
    pub product_name: String,
    pub latest_version: String,
    pub patch_note: Option<String>,
    pub activated_at: NaiveDateTime,
    pub duration_days: i64,
}

impl SubscriptionRow {
    pub fn into_subscription(self, now: NaiveDateTime) -> Subscription {
        Subscription {
            days_remaining: days_remaining(self.activated_at, self.duration_days, now),
            product_name: self.product_name,
            latest_version: self.latest_version,
            patch_note: self.patch_note,
        }
    }
}

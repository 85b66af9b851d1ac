//! Sharing agreements and per-participant contribution terms.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::validation::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgreementKind {
    /// Fires when a matching vendor charges the owner's source account.
    VendorTriggered,
    /// Fires on a schedule.
    RecurringDate,
}

impl fmt::Display for AgreementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            AgreementKind::VendorTriggered => "VENDOR_TRIGGERED",
            AgreementKind::RecurringDate => "RECURRING_DATE",
        };
        write!(f, "{}", value)
    }
}

impl FromStr for AgreementKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "VENDOR_TRIGGERED" => Ok(AgreementKind::VendorTriggered),
            "RECURRING_DATE" => Ok(AgreementKind::RecurringDate),
            other => Err(format!("unknown agreement kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntervalUnit {
    Days,
    Months,
}

impl fmt::Display for IntervalUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            IntervalUnit::Days => "DAYS",
            IntervalUnit::Months => "MONTHS",
        };
        write!(f, "{}", value)
    }
}

impl FromStr for IntervalUnit {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "DAYS" => Ok(IntervalUnit::Days),
            "MONTHS" => Ok(IntervalUnit::Months),
            other => Err(format!("unknown interval unit: {}", other)),
        }
    }
}

/// Recurrence terms for a RECURRING_DATE agreement. `frequency` is
/// interpreted against `interval`: MONTHS with frequency 2 means every two
/// months.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recurrence {
    pub interval: IntervalUnit,
    pub frequency: u32,
    pub next_scheduled_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
}

impl Recurrence {
    /// The date one recurrence step after `from`. Month stepping clamps to
    /// the last day of short months (Jan 31 + 1 month = Feb 28/29).
    pub fn advance(&self, from: NaiveDate) -> NaiveDate {
        match self.interval {
            IntervalUnit::Days => from + Duration::days(i64::from(self.frequency)),
            IntervalUnit::Months => add_months(from, self.frequency),
        }
    }
}

fn add_months(date: NaiveDate, months: u32) -> NaiveDate {
    let zero_based = date.month0() + months;
    let year = date.year() + (zero_based / 12) as i32;
    let month = zero_based % 12 + 1;
    let day = date.day();

    NaiveDate::from_ymd_opt(year, month, day)
        .unwrap_or_else(|| last_day_of_month(year, month))
}

fn last_day_of_month(year: i32, month: u32) -> NaiveDate {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1).expect("valid month start")
        - Duration::days(1)
}

/// A cost-sharing contract between an owner and one or more participants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agreement {
    pub id: Uuid,
    pub owner_user_id: Uuid,
    /// Account watched for matching charges. May be a credit card.
    pub owner_source_account_id: Uuid,
    /// Account that receives participant contributions. Must be depository.
    pub owner_destination_account_id: Uuid,
    pub nickname: String,
    pub kind: AgreementKind,
    /// Required iff kind == VendorTriggered.
    pub vendor_id: Option<Uuid>,
    /// Required iff kind == RecurringDate.
    pub recurrence: Option<Recurrence>,
    pub is_active: bool,
    pub is_pending: bool,
    pub created_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl Agreement {
    pub fn new_vendor_triggered(
        owner_user_id: Uuid,
        owner_source_account_id: Uuid,
        owner_destination_account_id: Uuid,
        nickname: impl Into<String>,
        vendor_id: Uuid,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_user_id,
            owner_source_account_id,
            owner_destination_account_id,
            nickname: nickname.into(),
            kind: AgreementKind::VendorTriggered,
            vendor_id: Some(vendor_id),
            recurrence: None,
            is_active: false,
            is_pending: true,
            created_at: Utc::now(),
            deactivated_at: None,
        }
    }

    pub fn new_recurring(
        owner_user_id: Uuid,
        owner_source_account_id: Uuid,
        owner_destination_account_id: Uuid,
        nickname: impl Into<String>,
        recurrence: Recurrence,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_user_id,
            owner_source_account_id,
            owner_destination_account_id,
            nickname: nickname.into(),
            kind: AgreementKind::RecurringDate,
            vendor_id: None,
            recurrence: Some(recurrence),
            is_active: false,
            is_pending: true,
            created_at: Utc::now(),
            deactivated_at: None,
        }
    }

    /// Exactly one trigger kind's required fields must be populated.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.kind {
            AgreementKind::VendorTriggered => {
                if self.vendor_id.is_none() {
                    return Err(ValidationError::new(
                        "vendor_id",
                        "required for vendor-triggered agreements",
                    ));
                }
                if self.recurrence.is_some() {
                    return Err(ValidationError::new(
                        "recurrence",
                        "must not be set for vendor-triggered agreements",
                    ));
                }
            }
            AgreementKind::RecurringDate => {
                if self.vendor_id.is_some() {
                    return Err(ValidationError::new(
                        "vendor_id",
                        "must not be set for recurring agreements",
                    ));
                }
                let recurrence = self.recurrence.as_ref().ok_or_else(|| {
                    ValidationError::new("recurrence", "required for recurring agreements")
                })?;
                if recurrence.frequency == 0 {
                    return Err(ValidationError::new(
                        "recurrence.frequency",
                        "must be at least 1",
                    ));
                }
                if let Some(end) = recurrence.end_date {
                    if end < recurrence.next_scheduled_date {
                        return Err(ValidationError::new(
                            "recurrence.end_date",
                            "must not precede the first scheduled date",
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

/// How one participant contributes to an agreement's bills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Contribution {
    SplitEvenly,
    /// Whole percentage of the total, 0..=100.
    Percentage(i64),
    /// Fixed amount in minor units.
    Fixed(i64),
}

impl Contribution {
    pub fn kind(&self) -> &'static str {
        match self {
            Contribution::SplitEvenly => "SPLIT_EVENLY",
            Contribution::Percentage(_) => "PERCENTAGE",
            Contribution::Fixed(_) => "FIXED",
        }
    }

    pub fn value(&self) -> Option<i64> {
        match self {
            Contribution::SplitEvenly => None,
            Contribution::Percentage(value) | Contribution::Fixed(value) => Some(*value),
        }
    }

    /// Rebuild from the persisted (kind, value) pair, rejecting unknown
    /// kinds and missing values.
    pub fn from_parts(kind: &str, value: Option<i64>) -> Result<Self, String> {
        match (kind, value) {
            ("SPLIT_EVENLY", _) => Ok(Contribution::SplitEvenly),
            ("PERCENTAGE", Some(value)) => Ok(Contribution::Percentage(value)),
            ("FIXED", Some(value)) => Ok(Contribution::Fixed(value)),
            ("PERCENTAGE", None) | ("FIXED", None) => {
                Err(format!("contribution kind {} requires a value", kind))
            }
            (other, _) => Err(format!("unknown contribution kind: {}", other)),
        }
    }
}

/// One participant's terms under an agreement. May originate from an
/// unconverted email invite, in which case `user_id` is empty until
/// `convert_invite` binds it exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantAgreement {
    pub id: Uuid,
    pub agreement_id: Uuid,
    pub user_id: Option<Uuid>,
    pub invite_email: Option<String>,
    pub is_converted: bool,
    pub contribution: Contribution,
    pub payment_account_id: Option<Uuid>,
    pub is_active: bool,
    pub is_pending: bool,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl ParticipantAgreement {
    pub fn for_user(agreement_id: Uuid, user_id: Uuid, contribution: Contribution) -> Self {
        Self {
            id: Uuid::new_v4(),
            agreement_id,
            user_id: Some(user_id),
            invite_email: None,
            is_converted: true,
            contribution,
            payment_account_id: None,
            is_active: false,
            is_pending: true,
            created_at: Utc::now(),
            activated_at: None,
            deactivated_at: None,
        }
    }

    pub fn for_invite(
        agreement_id: Uuid,
        email: impl Into<String>,
        contribution: Contribution,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            agreement_id,
            user_id: None,
            invite_email: Some(email.into()),
            is_converted: false,
            contribution,
            payment_account_id: None,
            is_active: false,
            is_pending: true,
            created_at: Utc::now(),
            activated_at: None,
            deactivated_at: None,
        }
    }
}

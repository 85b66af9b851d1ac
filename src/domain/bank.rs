//! Bank-provider transaction values as ingested from webhooks or pulls.
//! Not persisted by this core; consumed by the trigger detector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankTransaction {
    /// Provider-assigned transaction id; doubles as the occurrence key for
    /// vendor-triggered transfers.
    pub transaction_id: String,
    pub account_id: Uuid,
    pub user_id: Uuid,
    /// Minor units. Positive values are charges against the account.
    pub amount: i64,
    /// Raw merchant string as supplied by the bank.
    pub merchant_name: String,
    /// ACH originator id, when present.
    pub ppd_id: Option<String>,
    pub posted_at: DateTime<Utc>,
}

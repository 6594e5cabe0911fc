use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::order::PaymentRecord;

/// Gateway result code meaning "captured"
pub const RESULT_CODE_SUCCESS: &str = "00";

/// Callback body sent by the payment collaborator. The gateway may deliver the
/// same callback more than once; handling is idempotent by `order_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCallback {
    pub order_id: Uuid,
    pub result_code: String,
    pub transaction_id: String,
    pub amount: i64,
    pub paid_at: DateTime<Utc>,
}

impl PaymentCallback {
    pub fn is_success(&self) -> bool {
        self.result_code == RESULT_CODE_SUCCESS
    }

    pub fn record(&self) -> PaymentRecord {
        PaymentRecord {
            transaction_id: self.transaction_id.clone(),
            amount: self.amount,
            paid_at: self.paid_at,
        }
    }
}

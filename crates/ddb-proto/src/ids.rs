use chrono::Utc;
use uuid::Uuid;

fn stamped(prefix: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    let unique = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{millis}-{}", &unique[..8])
}

/// `MSG-<unix millis>-<8 hex chars>`
pub fn generate_message_id() -> String {
    stamped("MSG")
}

/// `TXN-<unix millis>-<8 hex chars>`
pub fn generate_transaction_id() -> String {
    stamped("TXN")
}

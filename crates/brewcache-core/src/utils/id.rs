use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};

/// Length of the random suffix in generated ids
const TOKEN_LENGTH: usize = 7;

/// Lowercase alphanumeric token of `len` characters
pub fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

/// Id for a new custom equipment: `custom-<animationType>-<millis>-<token>`
pub fn equipment_id(animation_type: &str) -> String {
    format!(
        "custom-{}-{}-{}",
        animation_type,
        Utc::now().timestamp_millis(),
        random_token(TOKEN_LENGTH)
    )
}

/// Id for a new method: `method-<millis>-<token>`
pub fn method_id() -> String {
    format!(
        "method-{}-{}",
        Utc::now().timestamp_millis(),
        random_token(TOKEN_LENGTH)
    )
}

/// Id for a bean or note record
pub fn record_id() -> String {
    format!("{}-{}", Utc::now().timestamp_millis(), random_token(TOKEN_LENGTH))
}

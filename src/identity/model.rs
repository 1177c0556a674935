use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Row written to the identity table.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct IdentityProfile {
    pub telegram_id: i64,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
    pub language_code: Option<String>,
}

/// Representation returned by PostgREST; only the key is needed. Supabase
/// tables use either uuid or bigint keys.
#[derive(Deserialize, Debug)]
pub struct UpsertedRow {
    pub id: Value,
}

impl UpsertedRow {
    pub fn id_string(&self) -> Option<String> {
        match &self.id {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

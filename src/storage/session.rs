//! Per-level session results.

use crate::storage::csv::format_row;
use serde::{Deserialize, Serialize};

/// Header of the session info file.
pub const INFO_HEADER: [&str; 7] = [
    "session_id",
    "name",
    "age",
    "medical_history",
    "level_number",
    "duration_seconds",
    "ease_rating_1to5",
];

/// One completed level of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub name: String,
    pub age: u32,
    pub medical_history: String,
    pub level_number: u32,
    pub duration_seconds: f64,
    /// Participant's ease rating, 1 (hard) to 5 (easy)
    pub ease_rating: u8,
}

impl SessionInfo {
    /// Format as a CSV row; the duration keeps three decimals.
    pub fn to_row(&self) -> String {
        format_row(&[
            self.session_id.clone(),
            self.name.clone(),
            self.age.to_string(),
            self.medical_history.clone(),
            self.level_number.to_string(),
            format!("{:.3}", self.duration_seconds),
            self.ease_rating.to_string(),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_format() {
        let info = SessionInfo {
            session_id: "595".into(),
            name: "Doe, J".into(),
            age: 31,
            medical_history: "none".into(),
            level_number: 2,
            duration_seconds: 12.34567,
            ease_rating: 4,
        };
        assert_eq!(info.to_row(), "595,\"Doe, J\",31,none,2,12.346,4\n");
    }
}

//! Domain types for the flight-request workflow.
//!
//! Status enums own the transition tables; nothing outside these types
//! decides whether a move between two statuses is legal.

pub mod notification;
pub mod plan;
pub mod request;

pub use notification::{EntityType, Notification, RecipientRole, StatusChange, TransitionEvent};
pub use plan::{CopilotSlot, FlightPlan, PlanDraft, PlanFilter, PlanStatus, ValidatedPlan};
pub use request::{FlightRequest, HistoryEntry, Priority, RequestFilter, RequestInput, RequestStatus};

use chrono::NaiveTime;

use crate::error::{Error, Result};

/// Storage format for times of day.
pub(crate) const TIME_FORMAT: &str = "%H:%M:%S";

/// Parse a time of day written as `HH:MM` or `HH:MM:SS`.
///
/// # Errors
///
/// Returns a validation error naming `field` if the text is not a time.
pub fn parse_time(field: &'static str, text: &str) -> Result<NaiveTime> {
    let text = text.trim();
    NaiveTime::parse_from_str(text, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(text, TIME_FORMAT))
        .map_err(|_| Error::invalid_field(field, format!("'{text}' is not a time (HH:MM)")))
}

/// Trim a location code and force it to uppercase.
#[must_use]
pub fn normalize_location(code: &str) -> String {
    code.trim().to_uppercase()
}

/// `Some` trimmed text, or `None` when blank.
pub(crate) fn non_blank(text: Option<&str>) -> Option<String> {
    text.map(str::trim).filter(|t| !t.is_empty()).map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time_short_and_long() {
        let t = parse_time("departure", "09:00").unwrap();
        assert_eq!(t, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        let t = parse_time("departure", " 21:15:30 ").unwrap();
        assert_eq!(t, NaiveTime::from_hms_opt(21, 15, 30).unwrap());
    }

    #[test]
    fn test_parse_time_rejects_garbage() {
        let err = parse_time("departure", "9h").unwrap_err();
        assert!(err.fields().unwrap().contains("departure"));
    }

    #[test]
    fn test_normalize_location() {
        assert_eq!(normalize_location(" cgr "), "CGR");
        assert_eq!(normalize_location("sbcg"), "SBCG");
    }

    #[test]
    fn test_non_blank() {
        assert_eq!(non_blank(Some("  x ")), Some("x".to_string()));
        assert_eq!(non_blank(Some("   ")), None);
        assert_eq!(non_blank(None), None);
    }
}

//! Alarm/event instances
//!
//! An `EventInstance` is raised by an event detector and later returns to
//! normal, gets acknowledged by a user, or is deactivated with its source.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{ModelError, Result};

/// User identifier
pub type UserId = u32;

// ============================================================================
// Alarm Levels
// ============================================================================

/// Alarm severity, ordered from least to most severe
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmLevel {
    /// Event is not logged at all
    Ignore,
    /// Event is raised but not stored
    DoNotLog,
    #[default]
    None,
    Information,
    Important,
    Warning,
    Urgent,
    Critical,
    LifeSafety,
}

impl AlarmLevel {
    pub fn code(&self) -> i32 {
        match self {
            AlarmLevel::Ignore => -3,
            AlarmLevel::DoNotLog => -2,
            AlarmLevel::None => 0,
            AlarmLevel::Information => 1,
            AlarmLevel::Important => 2,
            AlarmLevel::Warning => 3,
            AlarmLevel::Urgent => 4,
            AlarmLevel::Critical => 5,
            AlarmLevel::LifeSafety => 6,
        }
    }

    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            -3 => Ok(AlarmLevel::Ignore),
            -2 => Ok(AlarmLevel::DoNotLog),
            0 => Ok(AlarmLevel::None),
            1 => Ok(AlarmLevel::Information),
            2 => Ok(AlarmLevel::Important),
            3 => Ok(AlarmLevel::Warning),
            4 => Ok(AlarmLevel::Urgent),
            5 => Ok(AlarmLevel::Critical),
            6 => Ok(AlarmLevel::LifeSafety),
            _ => Err(ModelError::InvalidCode {
                kind: "AlarmLevel",
                value: code,
            }),
        }
    }
}

// ============================================================================
// Return Causes
// ============================================================================

/// Why an active event stopped being active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnCause {
    ReturnToNormal,
    SourceDisabled,
}

impl ReturnCause {
    pub fn code(&self) -> i32 {
        match self {
            ReturnCause::ReturnToNormal => 1,
            ReturnCause::SourceDisabled => 4,
        }
    }

    /// Decode a stored return cause
    ///
    /// `0` is the column default and means "no cause" (the event has not
    /// returned, or return is not applicable). It is deliberately not a
    /// variant.
    pub fn from_value(value: i32) -> Result<Option<Self>> {
        match value {
            0 => Ok(None),
            1 => Ok(Some(ReturnCause::ReturnToNormal)),
            4 => Ok(Some(ReturnCause::SourceDisabled)),
            _ => Err(ModelError::InvalidCode {
                kind: "ReturnCause",
                value,
            }),
        }
    }

    /// Encode an optional cause, `None` maps to `0`
    pub fn to_value(cause: Option<Self>) -> i32 {
        cause.map(|c| c.code()).unwrap_or(0)
    }
}

// ============================================================================
// Event Instance
// ============================================================================

/// One raised alarm/event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventInstance {
    pub id: i64,
    /// Event type name, e.g. "DATA_POINT" or "SYSTEM"
    pub type_name: String,
    pub alarm_level: AlarmLevel,
    pub message: String,
    pub active_timestamp: i64,
    /// Whether this event can return to normal at all
    pub rtn_applicable: bool,
    #[serde(default)]
    pub rtn_timestamp: Option<i64>,
    #[serde(default)]
    pub rtn_cause: Option<ReturnCause>,
    #[serde(default)]
    pub acknowledged_timestamp: Option<i64>,
    #[serde(default)]
    pub acknowledged_by: Option<UserId>,
    /// Users allowed to see this event, resolved once at raise time
    #[serde(default)]
    pub ids_to_notify: HashSet<UserId>,
}

impl EventInstance {
    pub fn new(
        id: i64,
        type_name: impl Into<String>,
        alarm_level: AlarmLevel,
        active_timestamp: i64,
    ) -> Self {
        Self {
            id,
            type_name: type_name.into(),
            alarm_level,
            message: String::new(),
            active_timestamp,
            rtn_applicable: true,
            rtn_timestamp: None,
            rtn_cause: None,
            acknowledged_timestamp: None,
            acknowledged_by: None,
            ids_to_notify: HashSet::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_rtn_applicable(mut self, rtn_applicable: bool) -> Self {
        self.rtn_applicable = rtn_applicable;
        self
    }

    pub fn notify<I: IntoIterator<Item = UserId>>(mut self, users: I) -> Self {
        self.ids_to_notify.extend(users);
        self
    }

    /// Active iff it can return to normal and has not yet done so
    pub fn is_active(&self) -> bool {
        self.rtn_applicable && self.rtn_timestamp.is_none()
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged_timestamp.is_some()
    }

    pub fn should_notify(&self, user_id: UserId) -> bool {
        self.ids_to_notify.contains(&user_id)
    }

    /// Mark the event returned with the given cause
    pub fn return_to_normal(&mut self, time: i64, cause: ReturnCause) {
        if self.is_active() {
            self.rtn_timestamp = Some(time);
            self.rtn_cause = Some(cause);
        }
    }

    pub fn acknowledge(&mut self, time: i64, user_id: Option<UserId>) {
        if !self.is_acknowledged() {
            self.acknowledged_timestamp = Some(time);
            self.acknowledged_by = user_id;
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_return_cause_zero_is_no_cause() {
        assert_eq!(ReturnCause::from_value(0).unwrap(), None);
        assert_eq!(
            ReturnCause::from_value(1).unwrap(),
            Some(ReturnCause::ReturnToNormal)
        );
        assert_eq!(
            ReturnCause::from_value(4).unwrap(),
            Some(ReturnCause::SourceDisabled)
        );
        assert!(ReturnCause::from_value(2).is_err());
        assert_eq!(ReturnCause::to_value(None), 0);
        assert_eq!(ReturnCause::to_value(Some(ReturnCause::SourceDisabled)), 4);
    }

    #[test]
    fn test_alarm_level_ordering_and_codes() {
        assert!(AlarmLevel::Critical > AlarmLevel::Warning);
        assert!(AlarmLevel::None > AlarmLevel::DoNotLog);
        assert_eq!(AlarmLevel::from_code(6).unwrap(), AlarmLevel::LifeSafety);
        assert_eq!(AlarmLevel::from_code(-2).unwrap(), AlarmLevel::DoNotLog);
        assert!(AlarmLevel::from_code(42).is_err());
    }

    #[test]
    fn test_event_active_lifecycle() {
        let mut evt = EventInstance::new(1, "DATA_POINT", AlarmLevel::Urgent, 1_000);
        assert!(evt.is_active());

        evt.return_to_normal(2_000, ReturnCause::ReturnToNormal);
        assert!(!evt.is_active());
        assert_eq!(evt.rtn_timestamp, Some(2_000));

        // Second return keeps the first timestamp
        evt.return_to_normal(3_000, ReturnCause::SourceDisabled);
        assert_eq!(evt.rtn_timestamp, Some(2_000));
        assert_eq!(evt.rtn_cause, Some(ReturnCause::ReturnToNormal));
    }

    #[test]
    fn test_event_not_rtn_applicable_is_never_active() {
        let evt = EventInstance::new(2, "SYSTEM", AlarmLevel::Information, 0)
            .with_rtn_applicable(false);
        assert!(!evt.is_active());
    }

    #[test]
    fn test_acknowledge_once() {
        let mut evt = EventInstance::new(3, "SYSTEM", AlarmLevel::Warning, 0);
        evt.acknowledge(10, Some(5));
        evt.acknowledge(20, Some(6));
        assert_eq!(evt.acknowledged_timestamp, Some(10));
        assert_eq!(evt.acknowledged_by, Some(5));
    }

    #[test]
    fn test_notify_allowlist() {
        let evt = EventInstance::new(4, "SYSTEM", AlarmLevel::Warning, 0).notify([1, 2]);
        assert!(evt.should_notify(1));
        assert!(!evt.should_notify(3));
    }
}

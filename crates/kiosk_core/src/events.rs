//! Notices and events the controller publishes for front ends.

use shared::domain::{SessionId, Step};

use crate::error::{ErrorCategory, FlowError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Message the kiosk operator must see before deciding what to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    level: NoticeLevel,
    category: Option<ErrorCategory>,
    message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            category: None,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            category: None,
            message: message.into(),
        }
    }

    pub fn from_error(err: &FlowError) -> Self {
        Self {
            level: NoticeLevel::Error,
            category: Some(err.category()),
            message: err.to_string(),
        }
    }

    pub fn level(&self) -> NoticeLevel {
        self.level
    }

    pub fn category(&self) -> Option<ErrorCategory> {
        self.category
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum KioskEvent {
    StepChanged { session_id: SessionId, step: Step },
    Notice(Notice),
    SessionReset { session_id: SessionId },
}

/// Result of an action the controller accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub step: Step,
    pub advanced: bool,
    pub notice: Option<Notice>,
}

impl Outcome {
    pub(crate) fn advanced(step: Step, notice: Option<Notice>) -> Self {
        Self {
            step,
            advanced: true,
            notice,
        }
    }

    pub(crate) fn stayed(step: Step, notice: Option<Notice>) -> Self {
        Self {
            step,
            advanced: false,
            notice,
        }
    }
}

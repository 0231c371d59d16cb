use std::fmt;

use reqwest::StatusCode;
use serde_json::Value;
use shared::{
    domain::{DoctorId, InvalidNationalId, Step},
    error::ApiError,
};
use thiserror::Error;

/// Shown when the booking service fails without a structured error body.
pub const GENERIC_BOOKING_ERROR: &str = "Database Error";

/// Failure talking to one of the kiosk's collaborator services.
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    #[error("{0}")]
    Transport(String),
    #[error("HTTP {status} {}{}", reason_phrase(.status), body_suffix(.body))]
    Status { status: u16, body: Option<Value> },
    #[error("malformed response from {endpoint}: {detail}")]
    MalformedBody {
        endpoint: &'static str,
        detail: String,
    },
}

impl CollaboratorError {
    pub fn malformed(endpoint: &'static str, detail: impl fmt::Display) -> Self {
        Self::MalformedBody {
            endpoint,
            detail: detail.to_string(),
        }
    }

    /// Structured detail the service sent back, if any.
    pub fn detail(&self) -> Option<String> {
        match self {
            Self::Status {
                body: Some(body), ..
            } => Some(ApiError::describe(body)),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            Self::Transport(format!("request timed out: {value}"))
        } else {
            Self::Transport(value.to_string())
        }
    }
}

fn reason_phrase(status: &u16) -> &'static str {
    StatusCode::from_u16(*status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .unwrap_or("")
}

fn body_suffix(body: &Option<Value>) -> String {
    match body {
        Some(body) => format!(" - {body}"),
        None => String::new(),
    }
}

/// Operator-facing actions on the check-in flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowAction {
    EditNationalId,
    SubmitNationalId,
    Biometric,
    ConfirmIdentity,
    SelectDoctor,
    SelectPaymentMethod,
    ConfirmAndPay,
    PrintReceipt,
    Finish,
}

impl fmt::Display for FlowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlowAction::EditNationalId => "editing the ID number",
            FlowAction::SubmitNationalId => "ID verification",
            FlowAction::Biometric => "biometric authentication",
            FlowAction::ConfirmIdentity => "identity confirmation",
            FlowAction::SelectDoctor => "doctor selection",
            FlowAction::SelectPaymentMethod => "payment method selection",
            FlowAction::ConfirmAndPay => "confirm & pay",
            FlowAction::PrintReceipt => "printing the receipt",
            FlowAction::Finish => "finishing the session",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rejected locally before any collaborator call.
    Validation,
    /// A collaborator call failed.
    Collaborator,
    /// Checkout UI or gateway key could not be obtained.
    Integration,
    /// Action not allowed in the current flow state.
    Flow,
}

/// Why an action was refused. The session is left exactly as it was.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    InvalidNationalId(#[from] InvalidNationalId),
    #[error("Please select a doctor first!")]
    NoDoctorSelected,
    #[error("doctor {0} is not offered at this kiosk")]
    UnknownDoctor(DoctorId),
    #[error("no verified patient in this session")]
    NoPatient,
    #[error("{action} is not available on the {step} screen")]
    WrongStep { action: FlowAction, step: Step },
    #[error("{0} is already in progress")]
    Busy(FlowAction),
    #[error("the session was reset while a request was in flight")]
    SessionChanged,
    #[error("Biometric authentication failed ({0}). You can still use Aadhaar.")]
    Biometric(CollaboratorError),
    #[error("Payment/booking failed: {0}")]
    Payment(CollaboratorError),
    #[error("payment gateway key unavailable; no key from the order or public-key endpoint")]
    GatewayKeyUnavailable,
    #[error("checkout unavailable: {0}")]
    CheckoutUnavailable(String),
    #[error("Payment verification failed: {0}")]
    VerificationFailed(CollaboratorError),
    #[error("{0}")]
    BookingFailed(String),
}

impl FlowError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            FlowError::InvalidNationalId(_)
            | FlowError::NoDoctorSelected
            | FlowError::UnknownDoctor(_) => ErrorCategory::Validation,
            FlowError::NoPatient
            | FlowError::WrongStep { .. }
            | FlowError::Busy(_)
            | FlowError::SessionChanged => ErrorCategory::Flow,
            FlowError::Biometric(_)
            | FlowError::Payment(_)
            | FlowError::VerificationFailed(_)
            | FlowError::BookingFailed(_) => ErrorCategory::Collaborator,
            FlowError::GatewayKeyUnavailable | FlowError::CheckoutUnavailable(_) => {
                ErrorCategory::Integration
            }
        }
    }
}

use chrono::{DateTime, Local};
use shared::domain::{Doctor, Patient, PaymentMethod, SessionId, Step};

use crate::error::{FlowAction, FlowError};

/// State of one patient's walk through the kiosk. Replaced wholesale on finish.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: SessionId,
    pub step: Step,
    /// Raw operator input; normalized only on submit.
    pub national_id: String,
    pub patient: Option<Patient>,
    pub selected_doctor: Option<Doctor>,
    pub payment_method: PaymentMethod,
    pub booked_at: Option<DateTime<Local>>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: SessionId::generate(),
            step: Step::Identity,
            national_id: String::new(),
            patient: None,
            selected_doctor: None,
            payment_method: PaymentMethod::default(),
            booked_at: None,
        }
    }

    pub(crate) fn expect_step(&self, step: Step, action: FlowAction) -> Result<(), FlowError> {
        if self.step == step {
            Ok(())
        } else {
            Err(FlowError::WrongStep {
                action,
                step: self.step,
            })
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

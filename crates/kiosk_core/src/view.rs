//! Screen descriptors derived from a session. Pure: no I/O, no clock.

use std::fmt;

use chrono::NaiveDate;
use shared::domain::{Doctor, DoctorId, PaymentMethod, Step, NATIONAL_ID_DIGITS};

use crate::{registry::DoctorRegistry, session::Session};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoctorOption {
    pub id: DoctorId,
    pub label: String,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentOption {
    pub method: PaymentMethod,
    pub label: &'static str,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screen {
    Identity {
        title: &'static str,
        prompt: String,
        national_id: String,
        placeholder: &'static str,
    },
    Confirm {
        title: &'static str,
        name: String,
        age: String,
    },
    DoctorPayment {
        title: &'static str,
        doctors: Vec<DoctorOption>,
        payment_prompt: &'static str,
        payment_methods: Vec<PaymentOption>,
    },
    Receipt(Receipt),
}

impl Screen {
    pub fn step(&self) -> Step {
        match self {
            Screen::Identity { .. } => Step::Identity,
            Screen::Confirm { .. } => Step::Confirm,
            Screen::DoctorPayment { .. } => Step::DoctorPayment,
            Screen::Receipt(_) => Step::Receipt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub hospital_name: String,
    pub patient_name: String,
    pub doctor: Option<Doctor>,
    pub payment_method: PaymentMethod,
    pub date: Option<NaiveDate>,
}

impl fmt::Display for Receipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.hospital_name.to_uppercase())?;
        writeln!(f, "Patient: {}", self.patient_name)?;
        match &self.doctor {
            Some(doctor) => {
                writeln!(f, "Doctor: {}", doctor.name)?;
                writeln!(f, "Fee: ₹{} | Experience: {}", doctor.fee, doctor.experience)?;
            }
            None => writeln!(f, "Doctor: -")?,
        }
        writeln!(f, "Payment Method: {}", self.payment_method)?;
        match self.date {
            Some(date) => write!(f, "Date: {}", date.format("%d/%m/%Y")),
            None => write!(f, "Date: -"),
        }
    }
}

pub fn doctor_label(doctor: &Doctor) -> String {
    format!(
        "{} | Fee: ₹{} | {}",
        doctor.name, doctor.fee, doctor.experience
    )
}

pub fn receipt(session: &Session, hospital_name: &str) -> Receipt {
    Receipt {
        hospital_name: hospital_name.to_string(),
        patient_name: session
            .patient
            .as_ref()
            .map(|patient| patient.name.clone())
            .unwrap_or_default(),
        doctor: session.selected_doctor.clone(),
        payment_method: session.payment_method,
        date: session.booked_at.map(|at| at.date_naive()),
    }
}

pub fn screen(session: &Session, registry: &DoctorRegistry, hospital_name: &str) -> Screen {
    match session.step {
        Step::Identity => Screen::Identity {
            title: "Welcome",
            prompt: format!("Please enter your {NATIONAL_ID_DIGITS}-digit Aadhar Number"),
            national_id: session.national_id.clone(),
            placeholder: "0000 0000 0000",
        },
        Step::Confirm => {
            let (name, age) = session
                .patient
                .as_ref()
                .map(|patient| (patient.name.clone(), patient.age.to_string()))
                .unwrap_or_default();
            Screen::Confirm {
                title: "Verify Identity",
                name,
                age,
            }
        }
        Step::DoctorPayment => {
            let selected = session.selected_doctor.as_ref().map(|doctor| doctor.id);
            Screen::DoctorPayment {
                title: "Select Doctor",
                doctors: registry
                    .doctors()
                    .iter()
                    .map(|doctor| DoctorOption {
                        id: doctor.id,
                        label: doctor_label(doctor),
                        selected: selected == Some(doctor.id),
                    })
                    .collect(),
                payment_prompt: "Choose Payment Method:",
                payment_methods: PaymentMethod::ALL
                    .into_iter()
                    .map(|method| PaymentOption {
                        method,
                        label: method.label(),
                        selected: method == session.payment_method,
                    })
                    .collect(),
            }
        }
        Step::Receipt => Screen::Receipt(receipt(session, hospital_name)),
    }
}

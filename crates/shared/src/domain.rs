use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident, $inner:ty) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub $inner);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

id_newtype!(DoctorId, u32);
id_newtype!(SessionId, Uuid);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Screens of the check-in flow, in the order a patient walks through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    #[default]
    Identity,
    Confirm,
    DoctorPayment,
    Receipt,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Identity => "identity",
            Step::Confirm => "confirm",
            Step::DoctorPayment => "doctor & payment",
            Step::Receipt => "receipt",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    Card,
    Upi,
    Netbanking,
    Cash,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 4] = [
        PaymentMethod::Card,
        PaymentMethod::Upi,
        PaymentMethod::Netbanking,
        PaymentMethod::Cash,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::Upi => "upi",
            PaymentMethod::Netbanking => "netbanking",
            PaymentMethod::Cash => "cash",
        }
    }

    /// Label shown next to the method on the doctor & payment screen.
    pub fn label(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "Card",
            PaymentMethod::Upi => "UPI",
            PaymentMethod::Netbanking => "Netbanking",
            PaymentMethod::Cash => "Pay at Hospital (Cash)",
        }
    }

    pub fn uses_gateway(&self) -> bool {
        !matches!(self, PaymentMethod::Cash)
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown payment method '{0}'")]
pub struct UnknownPaymentMethod(pub String);

impl FromStr for PaymentMethod {
    type Err = UnknownPaymentMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        PaymentMethod::ALL
            .into_iter()
            .find(|method| method.as_str() == lower)
            .ok_or_else(|| UnknownPaymentMethod(s.to_string()))
    }
}

/// Age as reported by an identity service. Only its presence is required;
/// services that send it as a string or a float are taken at their word.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Age {
    Years(u32),
    Reported(Value),
}

impl fmt::Display for Age {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Age::Years(years) => fmt::Display::fmt(years, f),
            Age::Reported(Value::String(text)) => f.write_str(text.trim()),
            Age::Reported(Value::Number(number)) => match number.as_f64() {
                Some(value) if value.fract() == 0.0 && value.abs() < 1e9 => {
                    write!(f, "{}", value as i64)
                }
                _ => fmt::Display::fmt(number, f),
            },
            Age::Reported(Value::Null) => Ok(()),
            Age::Reported(other) => fmt::Display::fmt(other, f),
        }
    }
}

/// Identity record for the patient being checked in.
///
/// Fields the identity service returns beyond `name` and `age` are kept in
/// `extra` and forwarded untouched when the booking is submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub name: String,
    pub age: Age,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Patient {
    pub const FALLBACK_AGE: u32 = 30;

    pub fn new(name: impl Into<String>, age: u32) -> Self {
        Self {
            name: name.into(),
            age: Age::Years(age),
            extra: Map::new(),
        }
    }

    /// Locally synthesized record used when the identity lookup fails.
    pub fn fallback_for(national_id: &NationalId) -> Self {
        Self::new(format!("Patient {}", national_id.last4()), Self::FALLBACK_AGE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Doctor {
    pub id: DoctorId,
    pub name: String,
    /// Consultation fee in major currency units.
    pub fee: u32,
    pub experience: String,
}

impl Doctor {
    pub fn new(id: u32, name: impl Into<String>, fee: u32, experience: impl Into<String>) -> Self {
        Self {
            id: DoctorId(id),
            name: name.into(),
            fee,
            experience: experience.into(),
        }
    }

    pub fn fee_minor_units(&self) -> u64 {
        u64::from(self.fee) * 100
    }
}

pub const NATIONAL_ID_DIGITS: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Please enter a valid {NATIONAL_ID_DIGITS}-digit Aadhaar number")]
pub struct InvalidNationalId;

/// A national ID number that passed validation: exactly twelve ASCII digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct NationalId(String);

impl NationalId {
    /// Strips every whitespace character and accepts the rest iff it is
    /// exactly twelve decimal digits.
    pub fn parse(raw: &str) -> Result<Self, InvalidNationalId> {
        let cleaned: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        if cleaned.len() == NATIONAL_ID_DIGITS && cleaned.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(cleaned))
        } else {
            Err(InvalidNationalId)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn last4(&self) -> &str {
        &self.0[self.0.len() - 4..]
    }
}

impl fmt::Display for NationalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

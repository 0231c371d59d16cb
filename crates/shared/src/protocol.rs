//! Request and response shapes exchanged with the kiosk's collaborator services.

use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::domain::{Doctor, PaymentMethod, Patient};

pub const SHORT_URL_KEYS: &[&str] = &["short_url", "shortUrl", "shorturl", "shortLink"];
pub const ORDER_ID_KEYS: &[&str] = &["id", "order_id", "orderId"];
pub const GATEWAY_KEY_KEYS: &[&str] = &["key", "key_id"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BiometricRequest {
    pub template: String,
    pub mode: String,
}

/// Booking body: the patient record's fields with `doctor` and
/// `paymentMethod` alongside. Those two always come from the booking, even
/// when the identity record carried keys of the same name.
#[derive(Debug, Clone)]
pub struct BookingRequest<'a> {
    pub patient: &'a Patient,
    pub doctor: &'a Doctor,
    pub payment_method: PaymentMethod,
}

const BOOKING_DOCTOR_KEY: &str = "doctor";
const BOOKING_METHOD_KEY: &str = "paymentMethod";

impl Serialize for BookingRequest<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("name", &self.patient.name)?;
        map.serialize_entry("age", &self.patient.age)?;
        for (key, value) in &self.patient.extra {
            if key != BOOKING_DOCTOR_KEY && key != BOOKING_METHOD_KEY {
                map.serialize_entry(key, value)?;
            }
        }
        map.serialize_entry(BOOKING_DOCTOR_KEY, self.doctor)?;
        map.serialize_entry(BOOKING_METHOD_KEY, &self.payment_method)?;
        map.end()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentLinkCustomer {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentLinkRequest {
    /// Major currency units; the gateway service converts.
    pub amount: u32,
    pub customer: PaymentLinkCustomer,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderRequest {
    pub amount: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayOrder {
    pub order_id: String,
    pub key: Option<String>,
}

impl GatewayOrder {
    pub fn from_value(value: &Value) -> Option<Self> {
        Some(Self {
            order_id: first_string(value, ORDER_ID_KEYS)?,
            key: first_string(value, GATEWAY_KEY_KEYS),
        })
    }
}

/// Payload the checkout UI hands back on completion. The kiosk never looks
/// inside; it is forwarded as-is to the verification endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct PaymentCallback(pub Value);

pub fn short_url_from_value(value: &Value) -> Option<String> {
    first_string(value, SHORT_URL_KEYS)
}

pub fn gateway_key_from_value(value: &Value) -> Option<String> {
    first_string(value, GATEWAY_KEY_KEYS)
}

/// Gateway responses arrive either as a JSON object or as a JSON document
/// serialized into a JSON string; both decode to the inner value.
pub fn decode_loose_json(bytes: &[u8]) -> serde_json::Result<Value> {
    match serde_json::from_slice::<Value>(bytes)? {
        Value::String(inner) => serde_json::from_str(&inner),
        other => Ok(other),
    }
}

/// First non-empty string (or number, rendered) found under any of `keys`.
pub fn first_string(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

//! Contracts for the identity, booking and payment-gateway services, and the
//! HTTP client that speaks them.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::{
    domain::{NationalId, Patient},
    protocol::{
        decode_loose_json, gateway_key_from_value, short_url_from_value, BiometricRequest,
        BookingRequest, GatewayOrder, OrderRequest, PaymentCallback, PaymentLinkRequest,
    },
};
use tracing::debug;
use url::Url;

use crate::{api_base::ApiBase, error::CollaboratorError};

pub const FETCH_IDENTITY_PATH: &str = "/api/fetch-aadhar";
pub const BIOMETRIC_PATH: &str = "/api/biometric/authenticate";
pub const ADD_PATIENT_PATH: &str = "/api/add-patient";
pub const PAYMENT_LINK_PATH: &str = "/api/razorpay/create-payment-link";
pub const CREATE_ORDER_PATH: &str = "/api/razorpay/create-order";
pub const PUBLIC_KEY_PATH: &str = "/api/razorpay/public-key";
pub const VERIFY_PATH: &str = "/api/razorpay/verify";

#[async_trait]
pub trait KioskBackend: Send + Sync {
    async fn fetch_identity(&self, national_id: &NationalId) -> Result<Patient, CollaboratorError>;
    async fn authenticate_biometric(
        &self,
        request: &BiometricRequest,
    ) -> Result<Patient, CollaboratorError>;
    async fn add_patient(&self, request: &BookingRequest<'_>) -> Result<(), CollaboratorError>;
    /// `Ok(None)` when the service answered without a usable short URL.
    async fn create_payment_link(
        &self,
        request: &PaymentLinkRequest,
    ) -> Result<Option<String>, CollaboratorError>;
    async fn create_order(&self, request: &OrderRequest) -> Result<GatewayOrder, CollaboratorError>;
    async fn fetch_public_key(&self) -> Result<Option<String>, CollaboratorError>;
    async fn verify_payment(&self, callback: &PaymentCallback) -> Result<(), CollaboratorError>;
}

pub struct HttpKioskBackend {
    http: Client,
    base: ApiBase,
}

impl HttpKioskBackend {
    pub fn new(base: ApiBase) -> Self {
        Self::with_client(Client::new(), base)
    }

    pub fn with_timeout(base: ApiBase, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(http, base))
    }

    pub fn with_client(http: Client, base: ApiBase) -> Self {
        Self { http, base }
    }

    pub fn base(&self) -> &ApiBase {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, CollaboratorError> {
        self.base
            .endpoint(path)
            .map_err(|err| CollaboratorError::Transport(format!("invalid endpoint {path}: {err}")))
    }

    /// Sends the request and returns the raw body of a 2xx response.
    async fn send(
        &self,
        endpoint: &'static str,
        request: RequestBuilder,
    ) -> Result<Vec<u8>, CollaboratorError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        debug!(endpoint, status = status.as_u16(), bytes = body.len(), "collaborator response");

        if status.is_success() {
            return Ok(body.to_vec());
        }

        let body = match serde_json::from_slice::<Value>(&body) {
            Ok(json) => Some(json),
            Err(_) => {
                let text = String::from_utf8_lossy(&body).trim().to_string();
                (!text.is_empty()).then_some(Value::String(text))
            }
        };
        Err(CollaboratorError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        request: RequestBuilder,
    ) -> Result<T, CollaboratorError> {
        let body = self.send(endpoint, request).await?;
        serde_json::from_slice(&body).map_err(|err| CollaboratorError::malformed(endpoint, err))
    }

    async fn send_loose(
        &self,
        endpoint: &'static str,
        request: RequestBuilder,
    ) -> Result<Value, CollaboratorError> {
        let body = self.send(endpoint, request).await?;
        decode_loose_json(&body).map_err(|err| CollaboratorError::malformed(endpoint, err))
    }
}

#[async_trait]
impl KioskBackend for HttpKioskBackend {
    async fn fetch_identity(&self, national_id: &NationalId) -> Result<Patient, CollaboratorError> {
        let url = self.endpoint(&format!("{FETCH_IDENTITY_PATH}/{national_id}"))?;
        self.send_json("fetch-aadhar", self.http.get(url)).await
    }

    async fn authenticate_biometric(
        &self,
        request: &BiometricRequest,
    ) -> Result<Patient, CollaboratorError> {
        let url = self.endpoint(BIOMETRIC_PATH)?;
        self.send_json("biometric/authenticate", self.http.post(url).json(request))
            .await
    }

    async fn add_patient(&self, request: &BookingRequest<'_>) -> Result<(), CollaboratorError> {
        let url = self.endpoint(ADD_PATIENT_PATH)?;
        self.send("add-patient", self.http.post(url).json(request))
            .await
            .map(|_| ())
    }

    async fn create_payment_link(
        &self,
        request: &PaymentLinkRequest,
    ) -> Result<Option<String>, CollaboratorError> {
        let url = self.endpoint(PAYMENT_LINK_PATH)?;
        let body = self
            .send_loose("create-payment-link", self.http.post(url).json(request))
            .await?;
        Ok(short_url_from_value(&body))
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<GatewayOrder, CollaboratorError> {
        let url = self.endpoint(CREATE_ORDER_PATH)?;
        let body = self
            .send_loose("create-order", self.http.post(url).json(request))
            .await?;
        GatewayOrder::from_value(&body)
            .ok_or_else(|| CollaboratorError::malformed("create-order", "no order id in response"))
    }

    async fn fetch_public_key(&self) -> Result<Option<String>, CollaboratorError> {
        let url = self.endpoint(PUBLIC_KEY_PATH)?;
        let body = self.send_loose("public-key", self.http.get(url)).await?;
        Ok(gateway_key_from_value(&body))
    }

    async fn verify_payment(&self, callback: &PaymentCallback) -> Result<(), CollaboratorError> {
        let url = self.endpoint(VERIFY_PATH)?;
        self.send("verify", self.http.post(url).json(callback))
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
#[path = "tests/backend_tests.rs"]
mod tests;

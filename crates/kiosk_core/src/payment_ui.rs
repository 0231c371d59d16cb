//! Checkout UI capability the controller hands control to for online payments.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Serialize;
use shared::protocol::PaymentCallback;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutPrefill {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutTheme {
    pub color: String,
}

/// Options the embedded checkout is opened with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutOptions {
    pub key: String,
    /// Minor currency units (fee × 100).
    pub amount: u64,
    pub currency: String,
    pub name: String,
    pub description: String,
    pub order_id: String,
    pub prefill: CheckoutPrefill,
    pub theme: CheckoutTheme,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckoutOutcome {
    /// The checkout's completion callback fired with this payload.
    Completed(PaymentCallback),
    /// The patient closed the checkout without paying.
    Dismissed,
}

#[async_trait]
pub trait PaymentUiProvider: Send + Sync {
    /// Loads the checkout on first use; a no-op once loaded.
    async fn load(&self) -> Result<()>;
    async fn open_checkout(&self, options: CheckoutOptions) -> Result<CheckoutOutcome>;
    /// Shows a hosted payment link to the patient (new window, QR, ...).
    async fn open_payment_link(&self, url: &str) -> Result<()>;
}

pub struct MissingPaymentUi;

#[async_trait]
impl PaymentUiProvider for MissingPaymentUi {
    async fn load(&self) -> Result<()> {
        Err(anyhow!("checkout UI is not available on this kiosk"))
    }

    async fn open_checkout(&self, _options: CheckoutOptions) -> Result<CheckoutOutcome> {
        Err(anyhow!("checkout UI is not available on this kiosk"))
    }

    async fn open_payment_link(&self, url: &str) -> Result<()> {
        Err(anyhow!("cannot open payment link {url}: no display available"))
    }
}

use super::*;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use shared::protocol::{GatewayOrder, PaymentCallback};
use tokio::sync::Notify;

use crate::{error::CollaboratorError, events::NoticeLevel};

struct FakeBackend {
    identity: Result<Patient, CollaboratorError>,
    biometric: Result<Patient, CollaboratorError>,
    booking_error: Option<CollaboratorError>,
    payment_link: Option<String>,
    order_key: Option<String>,
    public_key: Result<Option<String>, CollaboratorError>,
    verify_error: Option<CollaboratorError>,
    order_error: Option<CollaboratorError>,
    link_error: Option<CollaboratorError>,
    identity_gate: Option<Arc<Notify>>,
    booking_gate: Option<Arc<Notify>>,
    calls: Mutex<Vec<&'static str>>,
    identity_requests: Mutex<Vec<String>>,
    biometric_requests: Mutex<Vec<BiometricRequest>>,
    bookings: Mutex<Vec<Value>>,
    verified: Mutex<Vec<PaymentCallback>>,
}

impl FakeBackend {
    fn ok() -> Self {
        Self {
            identity: Ok(Patient::new("Asha", 45)),
            biometric: Ok(Patient::new("Meena Gupta", 29)),
            booking_error: None,
            payment_link: None,
            order_key: Some("rzp_test_order_key".into()),
            public_key: Ok(Some("rzp_test_public".into())),
            verify_error: None,
            order_error: None,
            link_error: None,
            identity_gate: None,
            booking_gate: None,
            calls: Mutex::new(Vec::new()),
            identity_requests: Mutex::new(Vec::new()),
            biometric_requests: Mutex::new(Vec::new()),
            bookings: Mutex::new(Vec::new()),
            verified: Mutex::new(Vec::new()),
        }
    }

    fn unreachable() -> CollaboratorError {
        CollaboratorError::Transport("error sending request: connection refused".into())
    }

    async fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().await.clone()
    }

    async fn record(&self, call: &'static str) {
        self.calls.lock().await.push(call);
    }
}

#[async_trait]
impl KioskBackend for FakeBackend {
    async fn fetch_identity(&self, national_id: &NationalId) -> Result<Patient, CollaboratorError> {
        self.record("fetch_identity").await;
        self.identity_requests
            .lock()
            .await
            .push(national_id.to_string());
        if let Some(gate) = &self.identity_gate {
            gate.notified().await;
        }
        self.identity.clone()
    }

    async fn authenticate_biometric(
        &self,
        request: &BiometricRequest,
    ) -> Result<Patient, CollaboratorError> {
        self.record("authenticate_biometric").await;
        self.biometric_requests.lock().await.push(request.clone());
        self.biometric.clone()
    }

    async fn add_patient(&self, request: &BookingRequest<'_>) -> Result<(), CollaboratorError> {
        self.record("add_patient").await;
        if let Some(gate) = &self.booking_gate {
            gate.notified().await;
        }
        self.bookings
            .lock()
            .await
            .push(serde_json::to_value(request).expect("booking json"));
        match &self.booking_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn create_payment_link(
        &self,
        _request: &PaymentLinkRequest,
    ) -> Result<Option<String>, CollaboratorError> {
        self.record("create_payment_link").await;
        match &self.link_error {
            Some(err) => Err(err.clone()),
            None => Ok(self.payment_link.clone()),
        }
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<GatewayOrder, CollaboratorError> {
        self.record("create_order").await;
        if let Some(err) = &self.order_error {
            return Err(err.clone());
        }
        Ok(GatewayOrder {
            order_id: format!("order_{}", request.amount),
            key: self.order_key.clone(),
        })
    }

    async fn fetch_public_key(&self) -> Result<Option<String>, CollaboratorError> {
        self.record("fetch_public_key").await;
        self.public_key.clone()
    }

    async fn verify_payment(&self, callback: &PaymentCallback) -> Result<(), CollaboratorError> {
        self.record("verify_payment").await;
        self.verified.lock().await.push(callback.clone());
        match &self.verify_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

struct FakePaymentUi {
    outcome: CheckoutOutcome,
    fail_load: bool,
    opened: Mutex<Vec<CheckoutOptions>>,
    links: Mutex<Vec<String>>,
}

impl FakePaymentUi {
    fn completing() -> Self {
        Self {
            outcome: CheckoutOutcome::Completed(PaymentCallback(json!({
                "razorpay_order_id": "order_200",
                "razorpay_payment_id": "pay_1",
                "razorpay_signature": "sig"
            }))),
            fail_load: false,
            opened: Mutex::new(Vec::new()),
            links: Mutex::new(Vec::new()),
        }
    }

    fn with_outcome(outcome: CheckoutOutcome) -> Self {
        Self {
            outcome,
            ..Self::completing()
        }
    }
}

#[async_trait]
impl PaymentUiProvider for FakePaymentUi {
    async fn load(&self) -> Result<()> {
        if self.fail_load {
            return Err(anyhow!("Failed to load checkout script"));
        }
        Ok(())
    }

    async fn open_checkout(&self, options: CheckoutOptions) -> Result<CheckoutOutcome> {
        self.opened.lock().await.push(options);
        Ok(self.outcome.clone())
    }

    async fn open_payment_link(&self, url: &str) -> Result<()> {
        self.links.lock().await.push(url.to_string());
        Ok(())
    }
}

fn build(
    backend: FakeBackend,
    ui: FakePaymentUi,
    options: FlowOptions,
) -> (CheckinController, Arc<FakeBackend>, Arc<FakePaymentUi>) {
    let backend = Arc::new(backend);
    let ui = Arc::new(ui);
    let controller = CheckinController::new(
        backend.clone(),
        ui.clone(),
        DoctorRegistry::default(),
        options,
    );
    (controller, backend, ui)
}

fn controller_with(backend: FakeBackend) -> (CheckinController, Arc<FakeBackend>, Arc<FakePaymentUi>) {
    build(backend, FakePaymentUi::completing(), FlowOptions::default())
}

async fn wait_for_call(backend: &FakeBackend, call: &str) {
    for _ in 0..200 {
        if backend.calls().await.iter().any(|made| *made == call) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("{call} was never made");
}

fn patient_from(value: Value) -> Patient {
    serde_json::from_value(value).expect("patient record")
}

async fn walk_to_doctor_payment(controller: &CheckinController) {
    controller
        .set_national_id("1234 5678 9012")
        .await
        .expect("enter id");
    controller.submit_national_id().await.expect("submit id");
    controller.confirm_identity().await.expect("confirm");
}

async fn choose(controller: &CheckinController, doctor: u32, method: PaymentMethod) {
    controller
        .select_doctor(Some(DoctorId(doctor)))
        .await
        .expect("select doctor");
    controller
        .set_payment_method(method)
        .await
        .expect("select method");
}

#[tokio::test]
async fn lookup_success_adopts_record_and_advances() {
    let (controller, backend, _) = controller_with(FakeBackend::ok());
    controller
        .set_national_id(" 1234 5678\t9012 ")
        .await
        .expect("enter id");

    let outcome = controller.submit_national_id().await.expect("submit");
    assert_eq!(outcome.step, Step::Confirm);
    assert!(outcome.advanced);
    assert_eq!(outcome.notice, None);

    let session = controller.session().await;
    assert_eq!(session.patient, Some(Patient::new("Asha", 45)));
    assert_eq!(
        backend.identity_requests.lock().await.as_slice(),
        ["123456789012".to_string()]
    );
}

#[tokio::test]
async fn lookup_failure_uses_fallback_and_still_advances() {
    let (controller, _, _) = controller_with(FakeBackend {
        identity: Err(FakeBackend::unreachable()),
        ..FakeBackend::ok()
    });
    controller
        .set_national_id("1234 5678 9012")
        .await
        .expect("enter id");

    let outcome = controller.submit_national_id().await.expect("submit");
    assert_eq!(outcome.step, Step::Confirm);
    let notice = outcome.notice.expect("failure must be surfaced");
    assert_eq!(notice.level(), NoticeLevel::Warning);
    assert!(notice.message().contains("connection refused"));

    let session = controller.session().await;
    assert_eq!(session.step, Step::Confirm);
    assert_eq!(session.patient, Some(Patient::new("Patient 9012", 30)));
}

#[tokio::test]
async fn lookup_http_error_also_falls_back() {
    let (controller, _, _) = controller_with(FakeBackend {
        identity: Err(CollaboratorError::Status {
            status: 502,
            body: None,
        }),
        ..FakeBackend::ok()
    });
    controller
        .set_national_id("987654321098")
        .await
        .expect("enter id");

    let outcome = controller.submit_national_id().await.expect("submit");
    assert!(outcome
        .notice
        .expect("notice")
        .message()
        .contains("HTTP 502 Bad Gateway"));
    assert_eq!(
        controller.session().await.patient,
        Some(Patient::new("Patient 1098", 30))
    );
}

#[tokio::test]
async fn malformed_id_is_rejected_without_lookup() {
    let (controller, backend, _) = controller_with(FakeBackend::ok());
    for raw in ["12345", "1234 5678 901x", "1234567890123", ""] {
        controller.set_national_id(raw).await.expect("enter id");
        let err = controller
            .submit_national_id()
            .await
            .expect_err("must be rejected");
        assert!(matches!(err, FlowError::InvalidNationalId(_)), "input {raw:?}");
    }

    assert!(backend.calls().await.is_empty());
    let session = controller.session().await;
    assert_eq!(session.step, Step::Identity);
    assert_eq!(session.patient, None);
}

#[tokio::test]
async fn biometric_failure_stays_on_identity_without_fallback() {
    let (controller, _, _) = controller_with(FakeBackend {
        biometric: Err(FakeBackend::unreachable()),
        ..FakeBackend::ok()
    });

    let err = controller
        .authenticate_biometric()
        .await
        .expect_err("must fail");
    assert!(matches!(err, FlowError::Biometric(_)));
    assert!(err.to_string().contains("You can still use Aadhaar"));

    let session = controller.session().await;
    assert_eq!(session.step, Step::Identity);
    assert_eq!(session.patient, None);
}

#[tokio::test]
async fn biometric_sends_fresh_template_per_attempt() {
    let (controller, backend, _) = controller_with(FakeBackend {
        biometric: Err(FakeBackend::unreachable()),
        ..FakeBackend::ok()
    });
    let _ = controller.authenticate_biometric().await;
    let _ = controller.authenticate_biometric().await;

    let requests = backend.biometric_requests.lock().await;
    assert_eq!(requests.len(), 2);
    assert_ne!(requests[0].template, requests[1].template);
    assert!(requests.iter().all(|r| r.mode == "mock"));
    assert!(Uuid::parse_str(&requests[0].template).is_ok());
}

#[tokio::test]
async fn biometric_success_advances_to_confirm() {
    let (controller, _, _) = controller_with(FakeBackend::ok());
    let outcome = controller
        .authenticate_biometric()
        .await
        .expect("biometric");
    assert_eq!(outcome.step, Step::Confirm);
    assert_eq!(
        controller.session().await.patient,
        Some(Patient::new("Meena Gupta", 29))
    );
}

#[tokio::test]
async fn confirm_identity_moves_to_doctor_payment_without_changes() {
    let (controller, _, _) = controller_with(FakeBackend::ok());
    controller
        .set_national_id("123456789012")
        .await
        .expect("enter id");
    controller.submit_national_id().await.expect("submit");
    let before = controller.session().await;

    let outcome = controller.confirm_identity().await.expect("confirm");
    assert_eq!(outcome.step, Step::DoctorPayment);

    let after = controller.session().await;
    assert_eq!(after.patient, before.patient);
    assert_eq!(after.selected_doctor, None);
    assert_eq!(after.payment_method, PaymentMethod::Card);
}

#[tokio::test]
async fn actions_on_wrong_screen_are_refused() {
    let (controller, _, _) = controller_with(FakeBackend::ok());

    let err = controller.confirm_identity().await.expect_err("wrong step");
    assert!(matches!(
        err,
        FlowError::WrongStep {
            action: FlowAction::ConfirmIdentity,
            step: Step::Identity
        }
    ));
    assert!(controller.confirm_and_pay().await.is_err());
    assert!(controller.finish().await.is_err());
    assert!(controller.receipt().await.is_err());
    assert!(controller
        .select_doctor(Some(DoctorId(1)))
        .await
        .is_err());
    assert_eq!(controller.session().await.step, Step::Identity);
}

#[tokio::test]
async fn pay_without_doctor_is_blocked_before_any_call() {
    let (controller, backend, _) = controller_with(FakeBackend::ok());
    walk_to_doctor_payment(&controller).await;
    let calls_before = backend.calls().await;
    let before = controller.session().await;

    let err = controller.confirm_and_pay().await.expect_err("blocked");
    assert!(matches!(err, FlowError::NoDoctorSelected));
    assert_eq!(err.to_string(), "Please select a doctor first!");
    assert_eq!(backend.calls().await, calls_before);
    assert_eq!(controller.session().await, before);
}

#[tokio::test]
async fn unknown_doctor_is_rejected() {
    let (controller, _, _) = controller_with(FakeBackend::ok());
    walk_to_doctor_payment(&controller).await;

    let err = controller
        .select_doctor(Some(DoctorId(99)))
        .await
        .expect_err("unknown");
    assert!(matches!(err, FlowError::UnknownDoctor(DoctorId(99))));
    assert_eq!(controller.session().await.selected_doctor, None);
}

#[tokio::test]
async fn cash_books_directly_without_gateway() {
    let (controller, backend, ui) = controller_with(FakeBackend::ok());
    walk_to_doctor_payment(&controller).await;
    choose(&controller, 1, PaymentMethod::Cash).await;

    let outcome = controller.confirm_and_pay().await.expect("pay");
    assert_eq!(outcome.step, Step::Receipt);

    assert_eq!(
        backend.calls().await,
        vec!["fetch_identity", "add_patient"]
    );
    assert!(ui.opened.lock().await.is_empty());

    let bookings = backend.bookings.lock().await;
    assert_eq!(bookings[0]["name"], "Asha");
    assert_eq!(bookings[0]["doctor"]["id"], 1);
    assert_eq!(bookings[0]["paymentMethod"], "cash");

    let session = controller.session().await;
    assert_eq!(session.step, Step::Receipt);
    assert!(session.booked_at.is_some());
}

#[tokio::test]
async fn card_payment_verifies_then_books() {
    let (controller, backend, ui) = controller_with(FakeBackend {
        order_key: None,
        ..FakeBackend::ok()
    });
    walk_to_doctor_payment(&controller).await;
    choose(&controller, 1, PaymentMethod::Card).await;

    let outcome = controller.confirm_and_pay().await.expect("pay");
    assert_eq!(outcome.step, Step::Receipt);
    assert_eq!(
        outcome.notice.as_ref().map(Notice::message),
        Some("Payment successful!")
    );
    assert_eq!(
        backend.calls().await,
        vec![
            "fetch_identity",
            "create_order",
            "fetch_public_key",
            "verify_payment",
            "add_patient"
        ]
    );

    let opened = ui.opened.lock().await;
    assert_eq!(opened.len(), 1);
    let options = &opened[0];
    assert_eq!(options.key, "rzp_test_public");
    assert_eq!(options.amount, 20_000);
    assert_eq!(options.currency, "INR");
    assert_eq!(options.order_id, "order_200");
    assert_eq!(
        options.description,
        "Consultation fee for Dr. Vijay Pathak (Cardiologist)"
    );
    assert_eq!(options.prefill.name, "Asha");

    let verified = backend.verified.lock().await;
    assert_eq!(verified[0].0["razorpay_payment_id"], "pay_1");
}

#[tokio::test]
async fn order_key_skips_public_key_lookup() {
    let (controller, backend, ui) = controller_with(FakeBackend::ok());
    walk_to_doctor_payment(&controller).await;
    choose(&controller, 2, PaymentMethod::Netbanking).await;

    controller.confirm_and_pay().await.expect("pay");
    assert!(!backend.calls().await.contains(&"fetch_public_key"));
    assert_eq!(ui.opened.lock().await[0].key, "rzp_test_order_key");
    assert_eq!(ui.opened.lock().await[0].amount, 50_000);
}

#[tokio::test]
async fn missing_gateway_key_blocks_checkout() {
    let (controller, backend, ui) = controller_with(FakeBackend {
        order_key: None,
        public_key: Err(FakeBackend::unreachable()),
        ..FakeBackend::ok()
    });
    walk_to_doctor_payment(&controller).await;
    choose(&controller, 3, PaymentMethod::Card).await;

    let err = controller.confirm_and_pay().await.expect_err("no key");
    assert!(matches!(err, FlowError::GatewayKeyUnavailable));
    assert!(ui.opened.lock().await.is_empty());
    assert!(!backend.calls().await.contains(&"add_patient"));
    assert_eq!(controller.session().await.step, Step::DoctorPayment);
}

#[tokio::test]
async fn configured_fallback_key_is_used_when_gateway_has_none() {
    let options = FlowOptions {
        fallback_checkout_key: Some("rzp_live_configured".into()),
        ..FlowOptions::default()
    };
    let (controller, _, ui) = build(
        FakeBackend {
            order_key: None,
            public_key: Ok(None),
            ..FakeBackend::ok()
        },
        FakePaymentUi::completing(),
        options,
    );
    walk_to_doctor_payment(&controller).await;
    choose(&controller, 3, PaymentMethod::Card).await;

    controller.confirm_and_pay().await.expect("pay");
    assert_eq!(ui.opened.lock().await[0].key, "rzp_live_configured");
}

#[tokio::test]
async fn checkout_load_failure_is_surfaced() {
    let (controller, _, _) = build(
        FakeBackend::ok(),
        FakePaymentUi {
            fail_load: true,
            ..FakePaymentUi::completing()
        },
        FlowOptions::default(),
    );
    walk_to_doctor_payment(&controller).await;
    choose(&controller, 1, PaymentMethod::Card).await;

    let err = controller.confirm_and_pay().await.expect_err("no checkout");
    assert!(matches!(err, FlowError::CheckoutUnavailable(_)));
    assert!(err.to_string().contains("Failed to load checkout script"));
}

#[tokio::test]
async fn verification_failure_stays_and_skips_booking() {
    let (controller, backend, _) = controller_with(FakeBackend {
        verify_error: Some(CollaboratorError::Status {
            status: 400,
            body: Some(json!({"status": "INVALID_SIGNATURE"})),
        }),
        ..FakeBackend::ok()
    });
    walk_to_doctor_payment(&controller).await;
    choose(&controller, 1, PaymentMethod::Card).await;

    let err = controller.confirm_and_pay().await.expect_err("not verified");
    assert!(matches!(err, FlowError::VerificationFailed(_)));
    assert!(err.to_string().contains("INVALID_SIGNATURE"));
    assert!(!backend.calls().await.contains(&"add_patient"));
    assert_eq!(controller.session().await.step, Step::DoctorPayment);
}

#[tokio::test]
async fn dismissed_checkout_keeps_the_patient_on_payment() {
    let (controller, backend, _) = build(
        FakeBackend::ok(),
        FakePaymentUi::with_outcome(CheckoutOutcome::Dismissed),
        FlowOptions::default(),
    );
    walk_to_doctor_payment(&controller).await;
    choose(&controller, 4, PaymentMethod::Card).await;

    let outcome = controller.confirm_and_pay().await.expect("dismissed");
    assert!(!outcome.advanced);
    assert_eq!(outcome.step, Step::DoctorPayment);
    assert!(!backend.calls().await.contains(&"verify_payment"));
}

#[tokio::test]
async fn upi_link_is_opened_without_booking() {
    let (controller, backend, ui) = controller_with(FakeBackend {
        payment_link: Some("https://rzp.io/i/mock-payment-link".into()),
        ..FakeBackend::ok()
    });
    walk_to_doctor_payment(&controller).await;
    choose(&controller, 5, PaymentMethod::Upi).await;

    let outcome = controller.confirm_and_pay().await.expect("link");
    assert!(!outcome.advanced);
    assert_eq!(outcome.step, Step::DoctorPayment);
    assert_eq!(
        outcome.notice.as_ref().map(Notice::level),
        Some(NoticeLevel::Info)
    );
    assert_eq!(
        ui.links.lock().await.as_slice(),
        ["https://rzp.io/i/mock-payment-link".to_string()]
    );
    assert_eq!(
        backend.calls().await,
        vec!["fetch_identity", "create_payment_link"]
    );
}

#[tokio::test]
async fn upi_without_link_falls_through_to_checkout() {
    let (controller, backend, ui) = controller_with(FakeBackend::ok());
    walk_to_doctor_payment(&controller).await;
    choose(&controller, 5, PaymentMethod::Upi).await;

    let outcome = controller.confirm_and_pay().await.expect("pay");
    assert_eq!(outcome.step, Step::Receipt);
    assert!(ui.links.lock().await.is_empty());
    assert_eq!(
        backend.calls().await,
        vec![
            "fetch_identity",
            "create_payment_link",
            "create_order",
            "verify_payment",
            "add_patient"
        ]
    );
    assert_eq!(backend.bookings.lock().await[0]["paymentMethod"], "upi");
}

#[tokio::test]
async fn booking_failure_surfaces_service_detail() {
    let (controller, _, _) = controller_with(FakeBackend {
        booking_error: Some(CollaboratorError::Status {
            status: 500,
            body: Some(json!({"status": "DB_ERROR", "message": "queue table locked"})),
        }),
        ..FakeBackend::ok()
    });
    walk_to_doctor_payment(&controller).await;
    choose(&controller, 1, PaymentMethod::Cash).await;

    let err = controller.confirm_and_pay().await.expect_err("booking");
    assert_eq!(err.to_string(), "queue table locked");
    assert_eq!(controller.session().await.step, Step::DoctorPayment);
}

#[tokio::test]
async fn booking_failure_without_body_uses_generic_message() {
    let (controller, _, _) = controller_with(FakeBackend {
        booking_error: Some(FakeBackend::unreachable()),
        ..FakeBackend::ok()
    });
    walk_to_doctor_payment(&controller).await;
    choose(&controller, 1, PaymentMethod::Cash).await;

    let err = controller.confirm_and_pay().await.expect_err("booking");
    assert_eq!(err.to_string(), GENERIC_BOOKING_ERROR);
}

#[tokio::test]
async fn second_pay_while_first_in_flight_is_refused() {
    let gate = Arc::new(Notify::new());
    let (controller, backend, _) = controller_with(FakeBackend {
        booking_gate: Some(gate.clone()),
        ..FakeBackend::ok()
    });
    let controller = Arc::new(controller);
    walk_to_doctor_payment(&controller).await;
    choose(&controller, 1, PaymentMethod::Cash).await;

    let first = tokio::spawn({
        let controller = Arc::clone(&controller);
        async move { controller.confirm_and_pay().await }
    });
    wait_for_call(&backend, "add_patient").await;

    let err = controller.confirm_and_pay().await.expect_err("duplicate");
    assert!(matches!(err, FlowError::Busy(FlowAction::ConfirmAndPay)));
    let err = controller
        .select_doctor(Some(DoctorId(2)))
        .await
        .expect_err("locked while paying");
    assert!(matches!(err, FlowError::Busy(FlowAction::ConfirmAndPay)));
    let err = controller
        .set_payment_method(PaymentMethod::Card)
        .await
        .expect_err("locked while paying");
    assert!(matches!(err, FlowError::Busy(FlowAction::ConfirmAndPay)));

    gate.notify_one();
    let outcome = first.await.expect("join").expect("first pay");
    assert_eq!(outcome.step, Step::Receipt);
    assert_eq!(
        backend
            .calls()
            .await
            .iter()
            .filter(|call| **call == "add_patient")
            .count(),
        1
    );

    let receipt = controller.receipt().await.expect("receipt");
    assert_eq!(receipt.doctor.map(|d| d.id), Some(DoctorId(1)));
    assert_eq!(receipt.payment_method, PaymentMethod::Cash);
}

#[tokio::test]
async fn lookup_in_flight_refuses_edits_and_second_sign_in() {
    let gate = Arc::new(Notify::new());
    let (controller, backend, _) = controller_with(FakeBackend {
        identity_gate: Some(gate.clone()),
        ..FakeBackend::ok()
    });
    let controller = Arc::new(controller);
    controller
        .set_national_id("1234 5678 9012")
        .await
        .expect("enter id");

    let first = tokio::spawn({
        let controller = Arc::clone(&controller);
        async move { controller.submit_national_id().await }
    });
    wait_for_call(&backend, "fetch_identity").await;

    let err = controller
        .set_national_id("9999 9999 9999")
        .await
        .expect_err("locked while looking up");
    assert!(matches!(err, FlowError::Busy(FlowAction::SubmitNationalId)));
    let err = controller
        .submit_national_id()
        .await
        .expect_err("duplicate");
    assert!(matches!(err, FlowError::Busy(FlowAction::SubmitNationalId)));
    let err = controller
        .authenticate_biometric()
        .await
        .expect_err("second sign-in");
    assert!(matches!(err, FlowError::Busy(FlowAction::SubmitNationalId)));

    gate.notify_one();
    let outcome = first.await.expect("join").expect("first submit");
    assert_eq!(outcome.step, Step::Confirm);
    assert_eq!(backend.calls().await, vec!["fetch_identity"]);
    assert_eq!(controller.session().await.national_id, "1234 5678 9012");
}

#[tokio::test]
async fn loosely_typed_age_is_adopted_on_both_sign_in_paths() {
    let (controller, _, _) = controller_with(FakeBackend {
        identity: Ok(patient_from(json!({"name": "Asha", "age": "45"}))),
        ..FakeBackend::ok()
    });
    controller
        .set_national_id("1234 5678 9012")
        .await
        .expect("enter id");
    let outcome = controller.submit_national_id().await.expect("submit");
    assert_eq!(outcome.notice, None);
    let patient = controller.session().await.patient.expect("patient");
    assert_eq!(patient.name, "Asha");
    assert_eq!(patient.age.to_string(), "45");

    let (controller, _, _) = controller_with(FakeBackend {
        biometric: Ok(patient_from(json!({"name": "Meena", "age": 29.0}))),
        ..FakeBackend::ok()
    });
    let outcome = controller
        .authenticate_biometric()
        .await
        .expect("biometric");
    assert_eq!(outcome.step, Step::Confirm);
    match controller.screen().await {
        Screen::Confirm { name, age, .. } => {
            assert_eq!(name, "Meena");
            assert_eq!(age, "29");
        }
        other => panic!("unexpected screen: {other:?}"),
    }
}

#[tokio::test]
async fn order_failure_is_surfaced_before_checkout() {
    let (controller, backend, ui) = controller_with(FakeBackend {
        order_error: Some(CollaboratorError::Status {
            status: 502,
            body: Some(json!({"error": "gateway down"})),
        }),
        ..FakeBackend::ok()
    });
    walk_to_doctor_payment(&controller).await;
    choose(&controller, 1, PaymentMethod::Card).await;

    let err = controller.confirm_and_pay().await.expect_err("no order");
    assert!(matches!(err, FlowError::Payment(_)));
    assert!(err.to_string().starts_with("Payment/booking failed: HTTP 502"));
    assert!(ui.opened.lock().await.is_empty());
    assert!(!backend.calls().await.contains(&"add_patient"));
    assert_eq!(controller.session().await.step, Step::DoctorPayment);
}

#[tokio::test]
async fn payment_link_failure_is_surfaced_without_booking() {
    let (controller, backend, ui) = controller_with(FakeBackend {
        link_error: Some(FakeBackend::unreachable()),
        ..FakeBackend::ok()
    });
    walk_to_doctor_payment(&controller).await;
    choose(&controller, 5, PaymentMethod::Upi).await;

    let err = controller.confirm_and_pay().await.expect_err("no link");
    assert!(matches!(err, FlowError::Payment(_)));
    assert!(ui.links.lock().await.is_empty());
    assert!(ui.opened.lock().await.is_empty());
    assert_eq!(
        backend.calls().await,
        vec!["fetch_identity", "create_payment_link"]
    );
    assert_eq!(controller.session().await.step, Step::DoctorPayment);
}

#[tokio::test]
async fn receipt_does_not_touch_session() {
    let (controller, _, _) = controller_with(FakeBackend::ok());
    walk_to_doctor_payment(&controller).await;
    choose(&controller, 2, PaymentMethod::Cash).await;
    controller.confirm_and_pay().await.expect("pay");
    let before = controller.session().await;

    let receipt = controller.receipt().await.expect("receipt");
    assert_eq!(receipt.patient_name, "Asha");
    assert_eq!(receipt.doctor.map(|d| d.fee), Some(500));
    assert_eq!(receipt.payment_method, PaymentMethod::Cash);
    assert!(receipt.date.is_some());
    assert_eq!(controller.session().await, before);
}

#[tokio::test]
async fn finish_starts_a_fresh_session() {
    let (controller, _, _) = controller_with(FakeBackend::ok());
    walk_to_doctor_payment(&controller).await;
    choose(&controller, 2, PaymentMethod::Cash).await;
    controller.confirm_and_pay().await.expect("pay");
    let finished = controller.session().await;

    let outcome = controller.finish().await.expect("finish");
    assert_eq!(outcome.step, Step::Identity);

    let fresh = controller.session().await;
    assert_ne!(fresh.id, finished.id);
    assert_eq!(fresh.step, Step::Identity);
    assert!(fresh.national_id.is_empty());
    assert_eq!(fresh.patient, None);
    assert_eq!(fresh.selected_doctor, None);
    assert_eq!(fresh.payment_method, PaymentMethod::Card);
    assert_eq!(fresh.booked_at, None);
}

#[tokio::test]
async fn events_report_steps_and_refusals() {
    let (controller, _, _) = controller_with(FakeBackend::ok());
    let mut events = controller.subscribe_events();

    controller
        .set_national_id("123456789012")
        .await
        .expect("enter id");
    controller.submit_national_id().await.expect("submit");
    let _ = controller.finish().await;

    match events.recv().await.expect("event") {
        KioskEvent::StepChanged { step, .. } => assert_eq!(step, Step::Confirm),
        other => panic!("unexpected event: {other:?}"),
    }
    match events.recv().await.expect("event") {
        KioskEvent::Notice(notice) => {
            assert_eq!(notice.level(), NoticeLevel::Error);
            assert_eq!(notice.category(), Some(crate::error::ErrorCategory::Flow));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn screen_follows_the_session() {
    let (controller, _, _) = controller_with(FakeBackend::ok());
    assert_eq!(controller.screen().await.step(), Step::Identity);

    controller
        .set_national_id("123456789012")
        .await
        .expect("enter id");
    controller.submit_national_id().await.expect("submit");
    match controller.screen().await {
        Screen::Confirm { name, age, .. } => {
            assert_eq!(name, "Asha");
            assert_eq!(age, "45");
        }
        other => panic!("unexpected screen: {other:?}"),
    }
}

//! Check-in flow controller: owns the session, runs collaborator calls and
//! moves the kiosk through identity, confirmation, doctor & payment and receipt.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex as StdMutex, PoisonError},
};

use chrono::Local;
use shared::{
    domain::{Doctor, DoctorId, NationalId, Patient, PaymentMethod, SessionId, Step},
    protocol::{
        BiometricRequest, BookingRequest, OrderRequest, PaymentLinkCustomer, PaymentLinkRequest,
    },
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    backend::KioskBackend,
    error::{FlowAction, FlowError, GENERIC_BOOKING_ERROR},
    events::{KioskEvent, Notice, Outcome},
    payment_ui::{CheckoutOptions, CheckoutOutcome, CheckoutPrefill, CheckoutTheme, PaymentUiProvider},
    registry::DoctorRegistry,
    session::Session,
    view::{self, Receipt, Screen},
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Deployment-specific knobs of the check-in flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowOptions {
    pub hospital_name: String,
    pub currency: String,
    pub theme_color: String,
    pub biometric_mode: String,
    /// Checkout key used only when neither the order nor the public-key
    /// endpoint returns one. Unset by default.
    pub fallback_checkout_key: Option<String>,
}

impl Default for FlowOptions {
    fn default() -> Self {
        Self {
            hospital_name: "City Hospital".into(),
            currency: "INR".into(),
            theme_color: "#007bff".into(),
            biometric_mode: "mock".into(),
            fallback_checkout_key: None,
        }
    }
}

/// Marks an action as in flight until dropped.
struct InFlightGuard<'a> {
    in_flight: &'a StdMutex<HashSet<FlowAction>>,
    action: FlowAction,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.action);
    }
}

/// Snapshot of what a payment needs, taken before any call is made.
struct PaymentContext {
    session_id: SessionId,
    patient: Patient,
    doctor: Doctor,
    method: PaymentMethod,
}

pub struct CheckinController {
    backend: Arc<dyn KioskBackend>,
    payment_ui: Arc<dyn PaymentUiProvider>,
    registry: DoctorRegistry,
    options: FlowOptions,
    session: Mutex<Session>,
    in_flight: StdMutex<HashSet<FlowAction>>,
    events: broadcast::Sender<KioskEvent>,
}

impl CheckinController {
    pub fn new(
        backend: Arc<dyn KioskBackend>,
        payment_ui: Arc<dyn PaymentUiProvider>,
        registry: DoctorRegistry,
        options: FlowOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            backend,
            payment_ui,
            registry,
            options,
            session: Mutex::new(Session::new()),
            in_flight: StdMutex::new(HashSet::new()),
            events,
        }
    }

    pub fn registry(&self) -> &DoctorRegistry {
        &self.registry
    }

    pub fn options(&self) -> &FlowOptions {
        &self.options
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<KioskEvent> {
        self.events.subscribe()
    }

    pub async fn session(&self) -> Session {
        self.session.lock().await.clone()
    }

    pub async fn screen(&self) -> Screen {
        let session = self.session.lock().await;
        view::screen(&session, &self.registry, &self.options.hospital_name)
    }

    pub async fn set_national_id(&self, raw: &str) -> Result<Outcome, FlowError> {
        let result = self.set_national_id_inner(raw).await;
        self.surface(FlowAction::EditNationalId, result)
    }

    async fn set_national_id_inner(&self, raw: &str) -> Result<Outcome, FlowError> {
        let mut session = self.session.lock().await;
        self.ensure_idle(&[FlowAction::SubmitNationalId, FlowAction::Biometric])?;
        session.expect_step(Step::Identity, FlowAction::EditNationalId)?;
        session.national_id = raw.to_string();
        Ok(Outcome::stayed(session.step, None))
    }

    /// Validates the entered ID and looks it up. A failed lookup does not
    /// block check-in: a fallback record is adopted and the flow advances.
    pub async fn submit_national_id(&self) -> Result<Outcome, FlowError> {
        let result = self.submit_national_id_inner().await;
        self.surface(FlowAction::SubmitNationalId, result)
    }

    async fn submit_national_id_inner(&self) -> Result<Outcome, FlowError> {
        let _guard = self.begin(FlowAction::SubmitNationalId, &[FlowAction::Biometric])?;
        let (session_id, raw) = {
            let session = self.session.lock().await;
            session.expect_step(Step::Identity, FlowAction::SubmitNationalId)?;
            (session.id, session.national_id.clone())
        };
        let national_id = NationalId::parse(&raw)?;

        match self.backend.fetch_identity(&national_id).await {
            Ok(patient) => {
                info!(session = %session_id, "national id lookup succeeded");
                self.advance(session_id, Step::Identity, Step::Confirm, None, |session| {
                    session.patient = Some(patient);
                })
                .await
            }
            Err(err) => {
                warn!(session = %session_id, error = %err, "national id lookup failed, using fallback record");
                let notice = Notice::warning(format!(
                    "Aadhaar lookup failed; using offline fallback.\n\nDetails: {err}"
                ));
                let fallback = Patient::fallback_for(&national_id);
                self.advance(
                    session_id,
                    Step::Identity,
                    Step::Confirm,
                    Some(notice),
                    |session| session.patient = Some(fallback),
                )
                .await
            }
        }
    }

    /// Biometric sign-in. Unlike the ID path there is no fallback record:
    /// a failure leaves the kiosk on the identity screen.
    pub async fn authenticate_biometric(&self) -> Result<Outcome, FlowError> {
        let result = self.authenticate_biometric_inner().await;
        self.surface(FlowAction::Biometric, result)
    }

    async fn authenticate_biometric_inner(&self) -> Result<Outcome, FlowError> {
        let _guard = self.begin(FlowAction::Biometric, &[FlowAction::SubmitNationalId])?;
        let session_id = {
            let session = self.session.lock().await;
            session.expect_step(Step::Identity, FlowAction::Biometric)?;
            session.id
        };

        let request = BiometricRequest {
            template: Uuid::new_v4().to_string(),
            mode: self.options.biometric_mode.clone(),
        };
        let patient = self
            .backend
            .authenticate_biometric(&request)
            .await
            .map_err(FlowError::Biometric)?;

        info!(session = %session_id, "biometric authentication succeeded");
        self.advance(session_id, Step::Identity, Step::Confirm, None, |session| {
            session.patient = Some(patient);
        })
        .await
    }

    pub async fn confirm_identity(&self) -> Result<Outcome, FlowError> {
        let result = self.confirm_identity_inner().await;
        self.surface(FlowAction::ConfirmIdentity, result)
    }

    async fn confirm_identity_inner(&self) -> Result<Outcome, FlowError> {
        let session_id = {
            let session = self.session.lock().await;
            session.expect_step(Step::Confirm, FlowAction::ConfirmIdentity)?;
            session.id
        };
        self.advance(session_id, Step::Confirm, Step::DoctorPayment, None, |_| {})
            .await
    }

    /// `None` clears the selection.
    pub async fn select_doctor(&self, doctor_id: Option<DoctorId>) -> Result<Outcome, FlowError> {
        let result = self.select_doctor_inner(doctor_id).await;
        self.surface(FlowAction::SelectDoctor, result)
    }

    async fn select_doctor_inner(&self, doctor_id: Option<DoctorId>) -> Result<Outcome, FlowError> {
        let doctor = match doctor_id {
            Some(id) => Some(
                self.registry
                    .get(id)
                    .cloned()
                    .ok_or(FlowError::UnknownDoctor(id))?,
            ),
            None => None,
        };
        let mut session = self.session.lock().await;
        self.ensure_idle(&[FlowAction::ConfirmAndPay])?;
        session.expect_step(Step::DoctorPayment, FlowAction::SelectDoctor)?;
        session.selected_doctor = doctor;
        Ok(Outcome::stayed(session.step, None))
    }

    pub async fn set_payment_method(&self, method: PaymentMethod) -> Result<Outcome, FlowError> {
        let result = self.set_payment_method_inner(method).await;
        self.surface(FlowAction::SelectPaymentMethod, result)
    }

    async fn set_payment_method_inner(&self, method: PaymentMethod) -> Result<Outcome, FlowError> {
        let mut session = self.session.lock().await;
        self.ensure_idle(&[FlowAction::ConfirmAndPay])?;
        session.expect_step(Step::DoctorPayment, FlowAction::SelectPaymentMethod)?;
        session.payment_method = method;
        Ok(Outcome::stayed(session.step, None))
    }

    /// Collects payment for the selected doctor and books the visit.
    ///
    /// Cash books directly. UPI first tries a hosted payment link; when one
    /// is opened the kiosk stays on this screen and booking happens outside
    /// the flow. Card, netbanking and UPI without a link go through the
    /// embedded checkout and a server-side verification before booking.
    pub async fn confirm_and_pay(&self) -> Result<Outcome, FlowError> {
        let result = self.confirm_and_pay_inner().await;
        self.surface(FlowAction::ConfirmAndPay, result)
    }

    async fn confirm_and_pay_inner(&self) -> Result<Outcome, FlowError> {
        let _guard = self.begin(FlowAction::ConfirmAndPay, &[])?;
        let ctx = {
            let session = self.session.lock().await;
            session.expect_step(Step::DoctorPayment, FlowAction::ConfirmAndPay)?;
            let doctor = session
                .selected_doctor
                .clone()
                .ok_or(FlowError::NoDoctorSelected)?;
            let patient = session.patient.clone().ok_or(FlowError::NoPatient)?;
            PaymentContext {
                session_id: session.id,
                patient,
                doctor,
                method: session.payment_method,
            }
        };
        info!(
            session = %ctx.session_id,
            doctor = %ctx.doctor.id,
            method = %ctx.method,
            "confirm & pay"
        );

        match ctx.method {
            PaymentMethod::Cash => self.book(&ctx, None).await,
            PaymentMethod::Upi => {
                let request = PaymentLinkRequest {
                    amount: ctx.doctor.fee,
                    customer: PaymentLinkCustomer {
                        name: ctx.patient.name.clone(),
                    },
                };
                let link = self
                    .backend
                    .create_payment_link(&request)
                    .await
                    .map_err(FlowError::Payment)?;
                match link {
                    Some(url) => {
                        self.payment_ui
                            .open_payment_link(&url)
                            .await
                            .map_err(|err| FlowError::CheckoutUnavailable(format!("{err:#}")))?;
                        info!(session = %ctx.session_id, %url, "opened payment link");
                        // TODO: poll the link status so the booking can finish in-flow.
                        let notice =
                            Notice::info("Opened payment link; after payment complete the booking.");
                        self.publish_notice(&notice);
                        Ok(Outcome::stayed(Step::DoctorPayment, Some(notice)))
                    }
                    None => {
                        debug!(session = %ctx.session_id, "no payment link returned, using checkout");
                        self.pay_with_checkout(&ctx).await
                    }
                }
            }
            PaymentMethod::Card | PaymentMethod::Netbanking => self.pay_with_checkout(&ctx).await,
        }
    }

    async fn pay_with_checkout(&self, ctx: &PaymentContext) -> Result<Outcome, FlowError> {
        let order = self
            .backend
            .create_order(&OrderRequest {
                amount: ctx.doctor.fee,
            })
            .await
            .map_err(FlowError::Payment)?;

        let key = match order.key {
            Some(key) => Some(key),
            None => match self.backend.fetch_public_key().await {
                Ok(key) => key,
                Err(err) => {
                    warn!(session = %ctx.session_id, error = %err, "could not fetch gateway public key");
                    None
                }
            },
        };
        let key = match key {
            Some(key) => key,
            None => {
                let key = self
                    .options
                    .fallback_checkout_key
                    .clone()
                    .ok_or(FlowError::GatewayKeyUnavailable)?;
                warn!(session = %ctx.session_id, "using configured fallback checkout key");
                key
            }
        };

        self.payment_ui
            .load()
            .await
            .map_err(|err| FlowError::CheckoutUnavailable(format!("{err:#}")))?;

        let options = CheckoutOptions {
            key,
            amount: ctx.doctor.fee_minor_units(),
            currency: self.options.currency.clone(),
            name: self.options.hospital_name.clone(),
            description: format!("Consultation fee for {}", ctx.doctor.name),
            order_id: order.order_id,
            prefill: CheckoutPrefill {
                name: ctx.patient.name.clone(),
            },
            theme: CheckoutTheme {
                color: self.options.theme_color.clone(),
            },
        };
        info!(session = %ctx.session_id, order_id = %options.order_id, "opening checkout");
        let outcome = self
            .payment_ui
            .open_checkout(options)
            .await
            .map_err(|err| FlowError::CheckoutUnavailable(format!("{err:#}")))?;

        let callback = match outcome {
            CheckoutOutcome::Completed(callback) => callback,
            CheckoutOutcome::Dismissed => {
                let notice = Notice::info("Payment was not completed.");
                self.publish_notice(&notice);
                return Ok(Outcome::stayed(Step::DoctorPayment, Some(notice)));
            }
        };

        // A charge that fails verification is not reconciled here.
        self.backend
            .verify_payment(&callback)
            .await
            .map_err(FlowError::VerificationFailed)?;
        info!(session = %ctx.session_id, "payment verified");

        self.book(ctx, Some(Notice::info("Payment successful!"))).await
    }

    async fn book(&self, ctx: &PaymentContext, notice: Option<Notice>) -> Result<Outcome, FlowError> {
        let request = BookingRequest {
            patient: &ctx.patient,
            doctor: &ctx.doctor,
            payment_method: ctx.method,
        };
        if let Err(err) = self.backend.add_patient(&request).await {
            error!(session = %ctx.session_id, error = %err, "booking failed");
            return Err(FlowError::BookingFailed(
                err.detail()
                    .unwrap_or_else(|| GENERIC_BOOKING_ERROR.to_string()),
            ));
        }

        info!(session = %ctx.session_id, "booking saved");
        let booked_at = Local::now();
        self.advance(
            ctx.session_id,
            Step::DoctorPayment,
            Step::Receipt,
            notice,
            |session| {
                session.selected_doctor = Some(ctx.doctor.clone());
                session.payment_method = ctx.method;
                session.booked_at = Some(booked_at);
            },
        )
        .await
    }

    /// Receipt for printing. Does not touch the session.
    pub async fn receipt(&self) -> Result<Receipt, FlowError> {
        let session = self.session.lock().await;
        session
            .expect_step(Step::Receipt, FlowAction::PrintReceipt)
            .map_err(|err| {
                self.publish_notice(&Notice::from_error(&err));
                err
            })?;
        Ok(view::receipt(&session, &self.options.hospital_name))
    }

    /// Discards the finished session and starts a fresh one for the next patient.
    pub async fn finish(&self) -> Result<Outcome, FlowError> {
        let result = self.finish_inner().await;
        self.surface(FlowAction::Finish, result)
    }

    async fn finish_inner(&self) -> Result<Outcome, FlowError> {
        let mut session = self.session.lock().await;
        session.expect_step(Step::Receipt, FlowAction::Finish)?;
        let previous = session.id;
        *session = Session::new();
        info!(previous = %previous, session = %session.id, "session reset");
        let _ = self.events.send(KioskEvent::SessionReset {
            session_id: session.id,
        });
        Ok(Outcome::advanced(session.step, None))
    }

    /// Marks `action` in flight unless it, or one of `conflicts`, already is.
    fn begin(
        &self,
        action: FlowAction,
        conflicts: &[FlowAction],
    ) -> Result<InFlightGuard<'_>, FlowError> {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(busy) = conflicts.iter().find(|other| in_flight.contains(*other)) {
            return Err(FlowError::Busy(*busy));
        }
        if !in_flight.insert(action) {
            return Err(FlowError::Busy(action));
        }
        Ok(InFlightGuard {
            in_flight: &self.in_flight,
            action,
        })
    }

    fn ensure_idle(&self, actions: &[FlowAction]) -> Result<(), FlowError> {
        let in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match actions.iter().find(|action| in_flight.contains(*action)) {
            Some(action) => Err(FlowError::Busy(*action)),
            None => Ok(()),
        }
    }

    /// Applies `apply` and moves to `to`, provided the session is still the
    /// one the request was made for and still on `from`.
    async fn advance(
        &self,
        session_id: SessionId,
        from: Step,
        to: Step,
        notice: Option<Notice>,
        apply: impl FnOnce(&mut Session),
    ) -> Result<Outcome, FlowError> {
        let mut session = self.session.lock().await;
        if session.id != session_id || session.step != from {
            warn!(session = %session_id, "session changed while a request was in flight");
            return Err(FlowError::SessionChanged);
        }
        apply(&mut *session);
        session.step = to;
        debug!(session = %session_id, step = %to, "step changed");

        let _ = self.events.send(KioskEvent::StepChanged {
            session_id,
            step: to,
        });
        if let Some(notice) = &notice {
            self.publish_notice(notice);
        }
        Ok(Outcome::advanced(to, notice))
    }

    fn publish_notice(&self, notice: &Notice) {
        let _ = self.events.send(KioskEvent::Notice(notice.clone()));
    }

    fn surface(
        &self,
        action: FlowAction,
        result: Result<Outcome, FlowError>,
    ) -> Result<Outcome, FlowError> {
        if let Err(err) = &result {
            debug!(%action, category = ?err.category(), error = %err, "action refused");
            self.publish_notice(&Notice::from_error(err));
        }
        result
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;

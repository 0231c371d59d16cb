pub mod api_base;
pub mod backend;
pub mod controller;
pub mod error;
pub mod events;
pub mod payment_ui;
pub mod registry;
pub mod session;
pub mod view;

pub use api_base::{ApiBase, DEFAULT_STATIC_HOST_SUFFIXES};
pub use backend::{HttpKioskBackend, KioskBackend};
pub use controller::{CheckinController, FlowOptions};
pub use error::{CollaboratorError, ErrorCategory, FlowAction, FlowError};
pub use events::{KioskEvent, Notice, NoticeLevel, Outcome};
pub use payment_ui::{CheckoutOptions, CheckoutOutcome, MissingPaymentUi, PaymentUiProvider};
pub use registry::{DoctorRegistry, RegistryError};
pub use session::Session;
pub use view::{Receipt, Screen};

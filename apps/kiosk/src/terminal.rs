//! Line-oriented operator front end for the check-in flow.

use std::{io::Write, sync::Arc};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use kiosk_core::{
    CheckinController, CheckoutOptions, CheckoutOutcome, FlowError, Notice, NoticeLevel, Outcome,
    PaymentUiProvider, Screen,
};
use serde_json::json;
use shared::{
    domain::{DoctorId, PaymentMethod},
    protocol::PaymentCallback,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader, Lines, Stdin},
    sync::Mutex,
};
use tracing::debug;

/// Stdin shared between the operator loop and the checkout prompts.
pub type Input = Arc<Mutex<Lines<BufReader<Stdin>>>>;

pub fn stdin_input() -> Input {
    Arc::new(Mutex::new(BufReader::new(tokio::io::stdin()).lines()))
}

async fn prompt(input: &Input, text: &str) -> Result<Option<String>> {
    print!("{text}");
    std::io::stdout().flush()?;
    Ok(input.lock().await.next_line().await?)
}

/// Stands in for the gateway's hosted checkout: the operator keys in the
/// payment id and signature the gateway reported.
pub struct TerminalPaymentUi {
    input: Input,
}

impl TerminalPaymentUi {
    pub fn new(input: Input) -> Self {
        Self { input }
    }
}

#[async_trait]
impl PaymentUiProvider for TerminalPaymentUi {
    async fn load(&self) -> Result<()> {
        debug!("terminal checkout ready");
        Ok(())
    }

    async fn open_checkout(&self, options: CheckoutOptions) -> Result<CheckoutOutcome> {
        println!("--- {} checkout ---", options.name);
        println!("{}", options.description);
        println!(
            "Amount: {} {}.{:02}",
            options.currency,
            options.amount / 100,
            options.amount % 100
        );
        println!("Order: {}  Key: {}", options.order_id, options.key);
        println!("Customer: {}", options.prefill.name);

        let payment_id = prompt(&self.input, "payment id (blank to cancel): ")
            .await?
            .map(|line| line.trim().to_string())
            .unwrap_or_default();
        if payment_id.is_empty() {
            return Ok(CheckoutOutcome::Dismissed);
        }
        let signature = prompt(&self.input, "signature: ")
            .await?
            .ok_or_else(|| anyhow!("input closed during checkout"))?;

        Ok(CheckoutOutcome::Completed(PaymentCallback(json!({
            "razorpay_order_id": options.order_id,
            "razorpay_payment_id": payment_id,
            "razorpay_signature": signature.trim(),
        }))))
    }

    async fn open_payment_link(&self, url: &str) -> Result<()> {
        println!("Scan or open to pay: {url}");
        Ok(())
    }
}

fn render(screen: &Screen) {
    println!();
    match screen {
        Screen::Identity {
            title,
            prompt,
            national_id,
            placeholder,
        } => {
            println!("== {title} ==");
            println!("{prompt}");
            if national_id.is_empty() {
                println!("[{placeholder}]");
            } else {
                println!("[{national_id}]");
            }
            println!("(enter the number, or 'b' for biometric)");
        }
        Screen::Confirm { title, name, age } => {
            println!("== {title} ==");
            println!("Name: {name}");
            println!("Age: {age}");
            println!("('y' to confirm)");
        }
        Screen::DoctorPayment {
            title,
            doctors,
            payment_prompt,
            payment_methods,
        } => {
            println!("== {title} ==");
            for doctor in doctors {
                let mark = if doctor.selected { '*' } else { ' ' };
                println!(" {mark} {}. {}", doctor.id, doctor.label);
            }
            println!("{payment_prompt}");
            for method in payment_methods {
                let mark = if method.selected { '*' } else { ' ' };
                println!(" {mark} {} ({})", method.label, method.method);
            }
            println!("('d <id>', 'm <method>', 'pay')");
        }
        Screen::Receipt(receipt) => {
            println!("== Success! ==");
            println!("{receipt}");
            println!("('print', 'finish')");
        }
    }
}

fn show_notice(notice: &Notice) {
    match notice.level() {
        NoticeLevel::Info => println!("{}", notice.message()),
        NoticeLevel::Warning | NoticeLevel::Error => eprintln!("! {}", notice.message()),
    }
}

enum Command {
    Quit,
    Unknown(String),
    Run(Result<Outcome, FlowError>),
}

async fn dispatch(controller: &CheckinController, screen: &Screen, line: &str) -> Command {
    let line = line.trim();
    if line.eq_ignore_ascii_case("quit") {
        return Command::Quit;
    }
    let (verb, arg) = match line.split_once(char::is_whitespace) {
        Some((verb, arg)) => (verb, arg.trim()),
        None => (line, ""),
    };

    let result = match screen {
        Screen::Identity { .. } => {
            if line.eq_ignore_ascii_case("b") {
                controller.authenticate_biometric().await
            } else {
                match controller.set_national_id(line).await {
                    Ok(_) => controller.submit_national_id().await,
                    Err(err) => Err(err),
                }
            }
        }
        Screen::Confirm { .. } => match verb {
            "y" | "" => controller.confirm_identity().await,
            _ => return Command::Unknown(line.to_string()),
        },
        Screen::DoctorPayment { .. } => match verb {
            "d" if arg.is_empty() => controller.select_doctor(None).await,
            "d" => match arg.parse::<u32>() {
                Ok(id) => controller.select_doctor(Some(DoctorId(id))).await,
                Err(_) => return Command::Unknown(line.to_string()),
            },
            "m" => match arg.parse::<PaymentMethod>() {
                Ok(method) => controller.set_payment_method(method).await,
                Err(err) => return Command::Unknown(err.to_string()),
            },
            "pay" => controller.confirm_and_pay().await,
            _ => return Command::Unknown(line.to_string()),
        },
        Screen::Receipt(_) => match verb {
            "print" => match controller.receipt().await {
                Ok(receipt) => {
                    println!("{receipt}");
                    return Command::Run(Ok(Outcome {
                        step: screen.step(),
                        advanced: false,
                        notice: None,
                    }));
                }
                Err(err) => Err(err),
            },
            "finish" | "" => controller.finish().await,
            _ => return Command::Unknown(line.to_string()),
        },
    };
    Command::Run(result)
}

/// Renders the current screen and feeds operator lines to the controller
/// until `quit` or end of input.
pub async fn run(controller: &CheckinController, input: &Input) -> Result<()> {
    loop {
        let screen = controller.screen().await;
        render(&screen);
        let Some(line) = prompt(input, "> ").await? else {
            return Ok(());
        };

        match dispatch(controller, &screen, &line).await {
            Command::Quit => return Ok(()),
            Command::Unknown(what) => eprintln!("? {what}"),
            Command::Run(Ok(outcome)) => {
                if let Some(notice) = &outcome.notice {
                    show_notice(notice);
                }
            }
            Command::Run(Err(err)) => eprintln!("! {err}"),
        }
    }
}

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use payorder::application::callback::{CallbackKind, CallbackNotice};
use payorder::application::engine::{CreatePayment, PaymentEngine};
use payorder::application::gateways::GatewayRegistry;
use payorder::config::EngineConfig;
use payorder::domain::payment::Payment;
use payorder::domain::ports::{ChannelGateway, PaymentFilter, PaymentRepository};
use payorder::domain::types::{PaymentChannel, PaymentType};
use payorder::error::PaymentError;
use payorder::infrastructure::in_memory::InMemoryPaymentRepository;
use payorder::infrastructure::notifier::RecordingNotifier;
use payorder::infrastructure::simulated::SimulatedGateway;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::io::{Error, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

pub const SECRET: &str = "test-secret";

/// In-memory storage whose writes can be made to fail for chosen payments.
#[derive(Clone, Default)]
pub struct FlakyRepository {
    inner: InMemoryPaymentRepository,
    failing: Arc<Mutex<HashSet<String>>>,
}

impl FlakyRepository {
    pub fn fail_saves_for(&self, code: &str) {
        self.failing.lock().unwrap().insert(code.to_string());
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }
}

#[async_trait]
impl PaymentRepository for FlakyRepository {
    async fn save(&self, payment: &mut Payment) -> payorder::error::Result<()> {
        if self.failing.lock().unwrap().contains(payment.code()) {
            return Err(PaymentError::InternalError(Box::new(Error::other(format!(
                "write of {} failed",
                payment.code()
            )))));
        }
        self.inner.save(payment).await
    }

    async fn find_by_code(&self, code: &str) -> payorder::error::Result<Option<Payment>> {
        self.inner.find_by_code(code).await
    }

    async fn filter(&self, filter: &PaymentFilter) -> payorder::error::Result<Vec<Payment>> {
        self.inner.filter(filter).await
    }
}

/// An engine wired to in-memory storage, a recording notifier and two
/// simulated channels.
pub struct Harness {
    pub engine: Arc<PaymentEngine>,
    pub repository: FlakyRepository,
    pub notifier: Arc<RecordingNotifier>,
    pub online: Arc<SimulatedGateway>,
    pub wallet: Arc<SimulatedGateway>,
}

pub fn harness() -> Harness {
    harness_with(EngineConfig::default(), SimulatedGateway::new(PaymentChannel::Online, SECRET))
}

pub fn harness_with(config: EngineConfig, online: SimulatedGateway) -> Harness {
    let repository = FlakyRepository::default();
    let notifier = Arc::new(RecordingNotifier::new());
    let online = Arc::new(online);
    let wallet = Arc::new(SimulatedGateway::new(PaymentChannel::Wallet, SECRET));
    let registry = GatewayRegistry::new()
        .with(online.clone())
        .with(wallet.clone());

    let engine = Arc::new(PaymentEngine::new(
        Arc::new(repository.clone()),
        registry,
        notifier.clone(),
        config,
    ));
    Harness {
        engine,
        repository,
        notifier,
        online,
        wallet,
    }
}

impl Harness {
    pub async fn create(&self, code: &str, reseller: &str, amount: Decimal) -> Payment {
        self.create_typed(code, reseller, amount, PaymentType::Final).await
    }

    pub async fn create_typed(
        &self,
        code: &str,
        reseller: &str,
        amount: Decimal,
        r#type: PaymentType,
    ) -> Payment {
        self.engine
            .create_payment(CreatePayment {
                code: Some(code.to_string()),
                order_id: Some(format!("ORD-{code}")),
                reseller_id: reseller.to_string(),
                currency: None,
                amount,
                r#type,
                deadline: None,
                related_business: None,
                description: None,
            })
            .await
            .unwrap()
    }

    pub async fn payment(&self, code: &str) -> Payment {
        self.engine.get_payment(code).await.unwrap()
    }
}

/// A callback as the online channel would send it.
pub fn signed_callback(
    gateway: &SimulatedGateway,
    kind: CallbackKind,
    correlation_id: &str,
    success: bool,
) -> CallbackNotice {
    let payload = SimulatedGateway::callback_payload(correlation_id, kind.transaction_type(), success);
    CallbackNotice {
        channel: ChannelGateway::channel(gateway),
        kind,
        correlation_id: correlation_id.to_string(),
        payment_code: None,
        success,
        completed_at: Utc::now(),
        signature: gateway.sign(&payload),
        payload,
    }
}

pub fn write_script(rows: &[&str]) -> NamedTempFile {
    let mut csv = NamedTempFile::new().unwrap();
    writeln!(csv, "{}", HEADER.join(",")).unwrap();
    for row in rows {
        writeln!(csv, "{row}").unwrap();
    }
    csv
}

const HEADER: [&str; 7] = ["op", "payment", "reseller", "amount", "channel", "reference", "detail"];

/// Writes a script that creates `payments` payments spread over 50
/// resellers and settles each one in full through a random channel.
pub fn generate_script(path: &Path, payments: usize) -> Result<(), Error> {
    let mut rng = StdRng::seed_from_u64(payments as u64);
    let mut wtr = csv::WriterBuilder::new().from_path(path)?;
    wtr.write_record(HEADER)?;

    let channels = ["online", "wallet", "wire_transfer"];
    for i in 1..=payments {
        let code = format!("P{i}");
        let reseller = format!("R{}", rng.gen_range(1..=50));
        let amount = format!("{}.{:02}", rng.gen_range(1..10_000), rng.gen_range(0..100));
        let channel = channels[rng.gen_range(0..channels.len())];

        wtr.write_record(["create", &code, &reseller, &amount, "", "", ""])?;
        wtr.write_record(["pay", &code, "", &amount, channel, "", ""])?;
        wtr.write_record(["callback", &code, "", "", "", "", "success"])?;
    }

    wtr.flush()?;
    Ok(())
}

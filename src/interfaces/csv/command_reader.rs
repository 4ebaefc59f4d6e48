use crate::application::callback::CallbackKind;
use crate::domain::payment::RelatedBusiness;
use crate::domain::ports::GatewayStatus;
use crate::domain::types::{PaymentChannel, PaymentType, RelatedBusinessType};
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Pay,
    Merge,
    Callback,
    Refund,
    RefundCallback,
    Gateway,
    Reconcile,
    Sweep,
    Freeze,
    Unfreeze,
    Cancel,
    Stop,
    Reopen,
}

/// One raw line of a command script.
///
/// Columns: `op, payment, reseller, amount, channel, reference, detail`.
/// Which columns matter depends on `op`; see [`Command`].
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptRow {
    pub op: Operation,
    pub payment: Option<String>,
    pub reseller: Option<String>,
    pub amount: Option<String>,
    pub channel: Option<String>,
    pub reference: Option<String>,
    pub detail: Option<String>,
}

/// Names a channel reference directly, or through the payment carrying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Reference(String),
    Payment(String),
}

/// A validated script command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `create,P1,R1,1000,,advance,credit_record:CR-1`
    Create {
        code: String,
        reseller_id: String,
        amount: Decimal,
        r#type: PaymentType,
        related_business: Option<RelatedBusiness>,
    },
    /// `pay,P1;P2,,600;400,online,,`
    Pay {
        codes: Vec<String>,
        amounts: Vec<Decimal>,
        channel: PaymentChannel,
    },
    /// `merge,P1;P2,,700,wallet,,` fills the payments in order.
    Merge {
        codes: Vec<String>,
        total: Decimal,
        channel: PaymentChannel,
    },
    /// `callback,P1,,,,,success` or `refund_callback,,,,online,REF,failed`
    Callback {
        kind: CallbackKind,
        target: Target,
        channel: Option<PaymentChannel>,
        success: bool,
    },
    /// `refund,P1,,100,,,damaged goods`
    Refund {
        code: String,
        amount: Decimal,
        reason: Option<String>,
    },
    /// `gateway,P1,,,,,success` scripts what the channel will report.
    Gateway {
        target: Target,
        channel: Option<PaymentChannel>,
        status: GatewayStatus,
    },
    /// `reconcile,P1,,,,,`
    Reconcile { target: Target },
    /// `sweep,,,,,,45` sweeps as if 45 minutes had passed.
    Sweep { advance_minutes: i64 },
    Freeze { code: String, reason: String },
    Unfreeze { code: String },
    Cancel { code: String, reason: String },
    Stop { code: String, reason: String },
    Reopen { code: String },
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn required(value: Option<String>, column: &str, op: Operation) -> Result<String> {
    present(value).ok_or_else(|| {
        PaymentError::InvalidArgument(format!("{op:?} requires the {column} column"))
    })
}

fn parse_decimal(value: &str) -> Result<Decimal> {
    Decimal::from_str(value.trim())
        .map_err(|e| PaymentError::InvalidArgument(format!("invalid amount '{value}': {e}")))
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_outcome(value: Option<String>) -> Result<bool> {
    match present(value).as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("success") => Ok(true),
        Some("failed") => Ok(false),
        other => Err(PaymentError::InvalidArgument(format!(
            "callback outcome must be success or failed, got {other:?}"
        ))),
    }
}

fn parse_gateway_status(value: Option<String>) -> Result<GatewayStatus> {
    match present(value).as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("success") => Ok(GatewayStatus::Success),
        Some("failed") => Ok(GatewayStatus::Failed),
        Some("processing") => Ok(GatewayStatus::Processing),
        Some("unknown") => Ok(GatewayStatus::Unknown),
        other => Err(PaymentError::InvalidArgument(format!(
            "unknown channel status {other:?}"
        ))),
    }
}

fn parse_related_business(value: &str) -> Result<RelatedBusiness> {
    let (kind, id) = value.split_once(':').ok_or_else(|| {
        PaymentError::InvalidArgument(format!("related business must be type:id, got '{value}'"))
    })?;
    Ok(RelatedBusiness {
        id: id.trim().to_string(),
        r#type: RelatedBusinessType::from_str(kind)?,
        expires_at: None,
    })
}

fn parse_target(payment: Option<String>, reference: Option<String>, op: Operation) -> Result<Target> {
    match (present(reference), present(payment)) {
        (Some(reference), _) => Ok(Target::Reference(reference)),
        (None, Some(code)) => Ok(Target::Payment(code)),
        (None, None) => Err(PaymentError::InvalidArgument(format!(
            "{op:?} requires a payment or a reference"
        ))),
    }
}

fn parse_channel(value: Option<String>) -> Result<Option<PaymentChannel>> {
    present(value).map(|c| PaymentChannel::from_str(&c)).transpose()
}

impl TryFrom<ScriptRow> for Command {
    type Error = PaymentError;

    fn try_from(row: ScriptRow) -> Result<Self> {
        let op = row.op;
        let command = match op {
            Operation::Create => Command::Create {
                code: required(row.payment, "payment", op)?,
                reseller_id: required(row.reseller, "reseller", op)?,
                amount: parse_decimal(&required(row.amount, "amount", op)?)?,
                r#type: present(row.reference)
                    .map(|t| PaymentType::from_str(&t))
                    .transpose()?
                    .unwrap_or(PaymentType::Final),
                related_business: present(row.detail)
                    .map(|d| parse_related_business(&d))
                    .transpose()?,
            },
            Operation::Pay => {
                let codes = parse_list(&required(row.payment, "payment", op)?);
                let amounts = parse_list(&required(row.amount, "amount", op)?)
                    .iter()
                    .map(|a| parse_decimal(a))
                    .collect::<Result<Vec<_>>>()?;
                Command::Pay {
                    codes,
                    amounts,
                    channel: PaymentChannel::from_str(&required(row.channel, "channel", op)?)?,
                }
            }
            Operation::Merge => Command::Merge {
                codes: parse_list(&required(row.payment, "payment", op)?),
                total: parse_decimal(&required(row.amount, "amount", op)?)?,
                channel: PaymentChannel::from_str(&required(row.channel, "channel", op)?)?,
            },
            Operation::Callback | Operation::RefundCallback => Command::Callback {
                kind: if op == Operation::Callback {
                    CallbackKind::Payment
                } else {
                    CallbackKind::Refund
                },
                target: parse_target(row.payment, row.reference, op)?,
                channel: parse_channel(row.channel)?,
                success: parse_outcome(row.detail)?,
            },
            Operation::Refund => Command::Refund {
                code: required(row.payment, "payment", op)?,
                amount: parse_decimal(&required(row.amount, "amount", op)?)?,
                reason: present(row.detail),
            },
            Operation::Gateway => Command::Gateway {
                target: parse_target(row.payment, row.reference, op)?,
                channel: parse_channel(row.channel)?,
                status: parse_gateway_status(row.detail)?,
            },
            Operation::Reconcile => Command::Reconcile {
                target: parse_target(row.payment, row.reference, op)?,
            },
            Operation::Sweep => Command::Sweep {
                advance_minutes: match present(row.detail) {
                    Some(minutes) => minutes.trim().parse().map_err(|_| {
                        PaymentError::InvalidArgument(format!("invalid minutes '{minutes}'"))
                    })?,
                    None => 0,
                },
            },
            Operation::Freeze => Command::Freeze {
                code: required(row.payment, "payment", op)?,
                reason: present(row.detail).unwrap_or_else(|| "frozen".to_string()),
            },
            Operation::Unfreeze => Command::Unfreeze {
                code: required(row.payment, "payment", op)?,
            },
            Operation::Cancel => Command::Cancel {
                code: required(row.payment, "payment", op)?,
                reason: present(row.detail).unwrap_or_else(|| "canceled".to_string()),
            },
            Operation::Stop => Command::Stop {
                code: required(row.payment, "payment", op)?,
                reason: present(row.detail).unwrap_or_else(|| "stopped".to_string()),
            },
            Operation::Reopen => Command::Reopen {
                code: required(row.payment, "payment", op)?,
            },
        };
        Ok(command)
    }
}

/// Reads script commands from a CSV source.
///
/// This reader wraps `csv::Reader` and provides an iterator over
/// `Result<Command>`. It trims whitespace and accepts short records, so
/// trailing empty columns may be left out.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    /// Creates a new `CommandReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Returns an iterator that lazily reads and validates commands, one per
    /// line, so a bad line does not stop the rest of the script.
    pub fn commands(self) -> impl Iterator<Item = Result<Command>> {
        self.reader.into_deserialize::<ScriptRow>().map(|result| {
            result
                .map_err(PaymentError::from)
                .and_then(Command::try_from)
        })
    }
}

use crate::domain::payment::Payment;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Serialize)]
struct PaymentRow<'a> {
    payment: &'a str,
    reseller: &'a str,
    status: &'static str,
    refund_status: &'static str,
    target: String,
    paid: String,
    refunded: String,
    actual: String,
    pending: String,
}

impl<'a> From<&'a Payment> for PaymentRow<'a> {
    fn from(payment: &'a Payment) -> Self {
        Self {
            payment: payment.code(),
            reseller: payment.reseller_id(),
            status: payment.status().as_str(),
            refund_status: payment.refund_status().as_str(),
            target: payment.target_amount().to_string(),
            paid: payment.paid_amount().to_string(),
            refunded: payment.refunded_amount().to_string(),
            actual: payment.actual_amount().to_string(),
            pending: payment.pending_amount().to_string(),
        }
    }
}

/// Writes the final state of payments as CSV, amounts with two decimals.
pub struct PaymentWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> PaymentWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_payments<'a, I>(&mut self, payments: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a Payment>,
    {
        for payment in payments {
            self.writer.serialize(PaymentRow::from(payment))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

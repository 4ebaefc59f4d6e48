use super::money::{Amount, Money};
use super::transaction::PaymentTransaction;
use super::types::{
    PaymentChannel, PaymentStatus, PaymentType, RefundStatus, RelatedBusinessType,
    TransactionType,
};
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// The business object a payment settles besides (or instead of) an order,
/// e.g. a credit record being repaid or a delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelatedBusiness {
    pub id: String,
    pub r#type: RelatedBusinessType,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Input for [`Payment::create`].
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub code: String,
    pub order_id: Option<String>,
    pub reseller_id: String,
    pub currency: String,
    pub amount: Decimal,
    pub r#type: PaymentType,
    pub deadline: Option<DateTime<Utc>>,
    pub related_business: Option<RelatedBusiness>,
    pub description: Option<String>,
}

/// A refund against one settled payment transaction.
#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub amount: Decimal,
    pub original_transaction_id: Uuid,
    pub business_order_id: Option<String>,
    pub reason: Option<String>,
}

/// Every field of a [`Payment`], used to rebuild one from storage.
#[derive(Debug, Clone)]
pub struct PaymentParts {
    pub code: String,
    pub order_id: Option<String>,
    pub reseller_id: String,
    pub currency: String,
    pub target_amount: Amount,
    pub paid_amount: Money,
    pub refunded_amount: Money,
    pub r#type: PaymentType,
    pub status: PaymentStatus,
    pub refund_status: RefundStatus,
    pub deadline: Option<DateTime<Utc>>,
    pub related_business: Option<RelatedBusiness>,
    pub description: Option<String>,
    pub status_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
    pub transactions: Vec<PaymentTransaction>,
}

/// Aggregate root tracking what a reseller owes for one obligation and what
/// has been collected or returned so far.
///
/// All state transitions go through methods on this type. The aggregate
/// holds at most one running (processing) transaction; settled transactions
/// move to the history and are never touched again except for a late
/// correlation id.
#[derive(Debug, Clone, PartialEq)]
pub struct Payment {
    code: String,
    order_id: Option<String>,
    reseller_id: String,
    currency: String,
    target_amount: Amount,
    paid_amount: Money,
    refunded_amount: Money,
    r#type: PaymentType,
    status: PaymentStatus,
    refund_status: RefundStatus,
    deadline: Option<DateTime<Utc>>,
    related_business: Option<RelatedBusiness>,
    description: Option<String>,
    status_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: u64,
    running: Option<PaymentTransaction>,
    history: Vec<PaymentTransaction>,
}

impl Payment {
    pub fn create(new: NewPayment, now: DateTime<Utc>) -> Result<Self> {
        if new.code.trim().is_empty() {
            return Err(PaymentError::InvalidArgument(
                "payment code is required".to_string(),
            ));
        }
        if new.reseller_id.trim().is_empty() {
            return Err(PaymentError::InvalidArgument(
                "reseller is required".to_string(),
            ));
        }
        let target_amount = Amount::new(new.amount)?;
        if new.r#type == PaymentType::CreditRepayment
            && new.related_business.as_ref().map(|b| b.r#type)
                != Some(RelatedBusinessType::CreditRecord)
        {
            return Err(PaymentError::InvalidArgument(
                "credit repayment must reference a credit record".to_string(),
            ));
        }

        Ok(Self {
            code: new.code,
            order_id: new.order_id,
            reseller_id: new.reseller_id,
            currency: new.currency,
            target_amount,
            paid_amount: Money::ZERO,
            refunded_amount: Money::ZERO,
            r#type: new.r#type,
            status: PaymentStatus::Unpaid,
            refund_status: RefundStatus::NoRefund,
            deadline: new.deadline,
            related_business: new.related_business,
            description: new.description,
            status_reason: None,
            created_at: now,
            updated_at: now,
            version: 0,
            running: None,
            history: Vec::new(),
        })
    }

    /// Rebuilds a payment from stored parts, rejecting data that breaks the
    /// aggregate invariants.
    pub fn rehydrate(parts: PaymentParts) -> Result<Self> {
        let mut running = None;
        let mut history = Vec::with_capacity(parts.transactions.len());
        for tx in parts.transactions {
            if tx.is_processing() {
                if running.is_some() {
                    return Err(PaymentError::InvalidState(format!(
                        "payment {} has more than one processing transaction",
                        parts.code
                    )));
                }
                running = Some(tx);
            } else {
                history.push(tx);
            }
        }

        let payment = Self {
            code: parts.code,
            order_id: parts.order_id,
            reseller_id: parts.reseller_id,
            currency: parts.currency,
            target_amount: parts.target_amount,
            paid_amount: parts.paid_amount,
            refunded_amount: parts.refunded_amount,
            r#type: parts.r#type,
            status: parts.status,
            refund_status: parts.refund_status,
            deadline: parts.deadline,
            related_business: parts.related_business,
            description: parts.description,
            status_reason: parts.status_reason,
            created_at: parts.created_at,
            updated_at: parts.updated_at,
            version: parts.version,
            running,
            history,
        };
        payment.check_invariants()?;
        Ok(payment)
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn order_id(&self) -> Option<&str> {
        self.order_id.as_deref()
    }

    pub fn reseller_id(&self) -> &str {
        &self.reseller_id
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn target_amount(&self) -> Money {
        self.target_amount.into()
    }

    pub fn paid_amount(&self) -> Money {
        self.paid_amount
    }

    pub fn refunded_amount(&self) -> Money {
        self.refunded_amount
    }

    /// Money actually kept: paid minus refunded.
    pub fn actual_amount(&self) -> Money {
        self.paid_amount - self.refunded_amount
    }

    /// Money still owed: target minus paid.
    pub fn pending_amount(&self) -> Money {
        self.target_amount() - self.paid_amount
    }

    /// Money that can still be returned.
    pub fn refundable_amount(&self) -> Money {
        self.paid_amount - self.refunded_amount
    }

    pub fn payment_type(&self) -> PaymentType {
        self.r#type
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn refund_status(&self) -> RefundStatus {
        self.refund_status
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    pub fn related_business(&self) -> Option<&RelatedBusiness> {
        self.related_business.as_ref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn status_reason(&self) -> Option<&str> {
        self.status_reason.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Optimistic concurrency version, advanced by the repository on save.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    pub fn running_transaction(&self) -> Option<&PaymentTransaction> {
        self.running.as_ref()
    }

    /// Settled transactions in settlement order, followed by the running one.
    pub fn transactions(&self) -> impl Iterator<Item = &PaymentTransaction> {
        self.history.iter().chain(self.running.iter())
    }

    pub fn find_transaction(&self, id: Uuid) -> Option<&PaymentTransaction> {
        self.transactions().find(|tx| tx.id == id)
    }

    /// Looks up a transaction by channel correlation id, preferring the
    /// running one.
    pub fn find_by_correlation(&self, correlation_id: &str) -> Option<&PaymentTransaction> {
        let matches = |tx: &&PaymentTransaction| tx.correlation_id.as_deref() == Some(correlation_id);
        self.running
            .iter()
            .find(matches)
            .or_else(|| self.history.iter().rev().find(matches))
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_frozen(&self) -> bool {
        self.status == PaymentStatus::Frozen
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.is_terminal()
            && self.pending_amount().is_positive()
            && self.deadline.is_some_and(|deadline| deadline < now)
    }

    // ------------------------------------------------------------------
    // Payment
    // ------------------------------------------------------------------

    pub fn can_pay(&self) -> bool {
        matches!(
            self.status,
            PaymentStatus::Unpaid | PaymentStatus::PartialPaid
        ) && self.pending_amount().is_positive()
            && self.running.is_none()
    }

    /// Opens a processing payment transaction and returns its id.
    pub fn execute_payment(
        &mut self,
        channel: PaymentChannel,
        amount: Amount,
        now: DateTime<Utc>,
        expiry: Duration,
    ) -> Result<Uuid> {
        self.ensure_no_running()?;
        if !self.can_pay() {
            return Err(PaymentError::InvalidState(format!(
                "payment {} cannot be paid in status {} with pending {}",
                self.code,
                self.status,
                self.pending_amount()
            )));
        }
        if Money::from(amount) > self.pending_amount() {
            return Err(PaymentError::InvalidArgument(format!(
                "amount {} exceeds pending {} of payment {}",
                amount,
                self.pending_amount(),
                self.code
            )));
        }

        let tx = PaymentTransaction::new_payment(&self.code, channel, amount, now, now + expiry);
        let id = tx.id;
        self.running = Some(tx);
        self.status = PaymentStatus::Paying;
        self.touch(now);
        Ok(id)
    }

    /// Records the channel correlation id of a transaction once it is known.
    pub fn attach_correlation_id(&mut self, transaction_id: Uuid, correlation_id: &str) -> Result<()> {
        let tx = self
            .running
            .iter_mut()
            .chain(self.history.iter_mut())
            .find(|tx| tx.id == transaction_id)
            .ok_or_else(|| {
                PaymentError::NotFound(format!(
                    "transaction {} on payment {}",
                    transaction_id, self.code
                ))
            })?;
        tx.attach_correlation_id(correlation_id)
    }

    pub fn handle_payment_callback(
        &mut self,
        transaction_id: Uuid,
        success: bool,
        completed_at: DateTime<Utc>,
    ) -> Result<()> {
        let tx = self.settle_running(transaction_id, TransactionType::Payment, success, completed_at)?;

        if success {
            self.paid_amount += tx.amount.into();
            if self.status == PaymentStatus::Paying {
                self.status = self.status_from_amounts();
            }
        } else if self.status == PaymentStatus::Paying {
            self.status = PaymentStatus::Failed;
        }
        self.touch(completed_at);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Refund
    // ------------------------------------------------------------------

    pub fn can_refund(&self) -> bool {
        self.paid_amount.is_positive()
            && self.refunded_amount < self.paid_amount
            && self.running.is_none()
            && !matches!(self.status, PaymentStatus::Frozen | PaymentStatus::Canceled)
    }

    /// Checks a refund request without changing anything and returns the
    /// payment transaction it would return money from.
    pub fn validate_refund(&self, request: &RefundRequest) -> Result<&PaymentTransaction> {
        self.ensure_no_running()?;
        if !self.can_refund() {
            return Err(PaymentError::InvalidState(format!(
                "payment {} cannot be refunded in status {} (paid {}, refunded {})",
                self.code, self.status, self.paid_amount, self.refunded_amount
            )));
        }
        let amount = Amount::new(request.amount)?;
        if Money::from(amount) > self.refundable_amount() {
            return Err(PaymentError::InvalidArgument(format!(
                "refund {} exceeds refundable {} of payment {}",
                amount,
                self.refundable_amount(),
                self.code
            )));
        }

        let original = self
            .history
            .iter()
            .find(|tx| tx.id == request.original_transaction_id)
            .filter(|tx| tx.is_successful(TransactionType::Payment))
            .ok_or_else(|| {
                PaymentError::InvalidArgument(format!(
                    "transaction {} is not a successful payment of {}",
                    request.original_transaction_id, self.code
                ))
            })?;

        let remainder = self.refundable_remainder(original);
        if Money::from(amount) > remainder {
            return Err(PaymentError::InvalidArgument(format!(
                "refund {} exceeds remaining {} of transaction {}",
                amount, remainder, original.id
            )));
        }
        Ok(original)
    }

    /// Opens a processing refund transaction and returns its id.
    pub fn execute_refund(&mut self, request: RefundRequest, now: DateTime<Utc>) -> Result<Uuid> {
        let original = self.validate_refund(&request)?;
        let tx = PaymentTransaction::new_refund(
            &self.code,
            original,
            Amount::new(request.amount)?,
            request.business_order_id,
            request.reason,
            now,
        );
        let id = tx.id;
        self.running = Some(tx);
        self.refund_status = RefundStatus::Refunding;
        self.touch(now);
        Ok(id)
    }

    pub fn handle_refund_callback(
        &mut self,
        transaction_id: Uuid,
        success: bool,
        completed_at: DateTime<Utc>,
    ) -> Result<()> {
        let tx = self.settle_running(transaction_id, TransactionType::Refund, success, completed_at)?;

        if success {
            self.refunded_amount += tx.amount.into();
            self.refund_status = self.refund_status_from_amounts();
        } else {
            self.refund_status = RefundStatus::RefundFailed;
        }
        self.touch(completed_at);
        Ok(())
    }

    /// How much of a settled payment transaction has not been refunded yet.
    pub fn refundable_remainder(&self, original: &PaymentTransaction) -> Money {
        let refunded: Money = self
            .history
            .iter()
            .filter(|tx| {
                tx.is_successful(TransactionType::Refund)
                    && tx.original_transaction_id == Some(original.id)
            })
            .map(|tx| Money::from(tx.amount))
            .sum();
        Money::from(original.amount) - refunded
    }

    pub fn latest_successful_payment(&self) -> Option<&PaymentTransaction> {
        self.history
            .iter()
            .filter(|tx| tx.is_successful(TransactionType::Payment))
            .max_by_key(|tx| tx.completed_at)
    }

    /// The most recently completed successful payment transaction that still
    /// has money left to refund.
    pub fn latest_refundable_payment(&self) -> Option<&PaymentTransaction> {
        self.history
            .iter()
            .filter(|tx| tx.is_successful(TransactionType::Payment))
            .filter(|tx| self.refundable_remainder(tx).is_positive())
            .max_by_key(|tx| tx.completed_at)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub fn cancel(&mut self, reason: &str, now: DateTime<Utc>) -> Result<()> {
        if self.status != PaymentStatus::Unpaid
            || !self.paid_amount.is_zero()
            || self.transactions().next().is_some()
        {
            return Err(PaymentError::InvalidState(format!(
                "payment {} can only be canceled before any payment attempt",
                self.code
            )));
        }
        self.status = PaymentStatus::Canceled;
        self.status_reason = Some(reason.to_string());
        self.touch(now);
        Ok(())
    }

    pub fn freeze(&mut self, reason: &str, now: DateTime<Utc>) -> Result<()> {
        if self.is_terminal() || self.is_frozen() {
            return Err(PaymentError::InvalidState(format!(
                "payment {} cannot be frozen in status {}",
                self.code, self.status
            )));
        }
        self.status = PaymentStatus::Frozen;
        self.status_reason = Some(reason.to_string());
        self.touch(now);
        Ok(())
    }

    pub fn unfreeze(&mut self, now: DateTime<Utc>) -> Result<()> {
        if !self.is_frozen() {
            return Err(PaymentError::InvalidState(format!(
                "payment {} is not frozen",
                self.code
            )));
        }
        self.status = match &self.running {
            Some(tx) if tx.r#type == TransactionType::Payment => PaymentStatus::Paying,
            _ => self.status_from_amounts(),
        };
        self.status_reason = None;
        self.touch(now);
        Ok(())
    }

    pub fn stop(&mut self, reason: &str, now: DateTime<Utc>) -> Result<()> {
        if self.is_terminal() {
            return Err(PaymentError::InvalidState(format!(
                "payment {} is already {}",
                self.code, self.status
            )));
        }
        self.status = PaymentStatus::Stopped;
        self.status_reason = Some(reason.to_string());
        self.touch(now);
        Ok(())
    }

    /// Returns a FAILED payment to the status its amounts imply so that a new
    /// attempt can be made.
    pub fn reopen(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != PaymentStatus::Failed {
            return Err(PaymentError::InvalidState(format!(
                "only failed payments can be reopened, {} is {}",
                self.code, self.status
            )));
        }
        self.status = self.status_from_amounts();
        self.status_reason = None;
        self.touch(now);
        Ok(())
    }

    /// Verifies the money-conservation invariants against the transaction
    /// history.
    pub fn check_invariants(&self) -> Result<()> {
        let settled = |r#type: TransactionType| -> Money {
            self.history
                .iter()
                .filter(|tx| tx.is_successful(r#type))
                .map(|tx| Money::from(tx.amount))
                .sum()
        };

        let violation = if settled(TransactionType::Payment) != self.paid_amount {
            Some("paid amount differs from successful payments")
        } else if settled(TransactionType::Refund) != self.refunded_amount {
            Some("refunded amount differs from successful refunds")
        } else if self.pending_amount() < Money::ZERO {
            Some("paid amount exceeds target")
        } else if self.refunded_amount > self.paid_amount {
            Some("refunded amount exceeds paid amount")
        } else if self.history.iter().any(|tx| tx.is_processing())
            || self.running.as_ref().is_some_and(|tx| !tx.is_processing())
        {
            Some("processing transaction outside the running slot")
        } else {
            None
        };

        match violation {
            Some(message) => Err(PaymentError::InvalidState(format!(
                "payment {}: {}",
                self.code, message
            ))),
            None => Ok(()),
        }
    }

    fn ensure_no_running(&self) -> Result<()> {
        match &self.running {
            Some(tx) => Err(PaymentError::InvalidState(format!(
                "payment {} already has {} transaction {} in progress",
                self.code, tx.r#type, tx.id
            ))),
            None => Ok(()),
        }
    }

    fn settle_running(
        &mut self,
        transaction_id: Uuid,
        expected: TransactionType,
        success: bool,
        completed_at: DateTime<Utc>,
    ) -> Result<PaymentTransaction> {
        match self.running.take() {
            Some(mut tx) if tx.id == transaction_id => {
                if tx.r#type != expected {
                    let found = tx.r#type;
                    self.running = Some(tx);
                    return Err(PaymentError::InvalidArgument(format!(
                        "transaction {} is a {}, not a {}",
                        transaction_id, found, expected
                    )));
                }
                if let Err(err) = tx.settle(success, completed_at) {
                    self.running = Some(tx);
                    return Err(err);
                }
                self.history.push(tx.clone());
                Ok(tx)
            }
            other => {
                self.running = other;
                match self.history.iter().find(|tx| tx.id == transaction_id) {
                    Some(tx) => Err(PaymentError::AlreadyProcessed(format!(
                        "transaction {} of payment {} is already {}",
                        tx.id, self.code, tx.status
                    ))),
                    None => Err(PaymentError::NotFound(format!(
                        "processing transaction {} on payment {}",
                        transaction_id, self.code
                    ))),
                }
            }
        }
    }

    fn status_from_amounts(&self) -> PaymentStatus {
        if self.pending_amount().is_zero() {
            PaymentStatus::Paid
        } else if self.paid_amount.is_positive() {
            PaymentStatus::PartialPaid
        } else {
            PaymentStatus::Unpaid
        }
    }

    fn refund_status_from_amounts(&self) -> RefundStatus {
        if self.refunded_amount.is_positive() && self.refunded_amount == self.paid_amount {
            RefundStatus::FullRefunded
        } else if self.refunded_amount.is_positive() {
            RefundStatus::PartialRefunded
        } else {
            RefundStatus::NoRefund
        }
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        debug_assert!(self.check_invariants().is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn new_payment(amount: Decimal) -> Payment {
        Payment::create(
            NewPayment {
                code: "P1".to_string(),
                order_id: Some("ORD-1".to_string()),
                reseller_id: "R1".to_string(),
                currency: "CNY".to_string(),
                amount,
                r#type: PaymentType::Final,
                deadline: None,
                related_business: None,
                description: None,
            },
            Utc::now(),
        )
        .unwrap()
    }

    fn amount(value: Decimal) -> Amount {
        Amount::new(value).unwrap()
    }

    fn pay(payment: &mut Payment, value: Decimal, success: bool) -> Uuid {
        let tx = payment
            .execute_payment(PaymentChannel::Online, amount(value), Utc::now(), Duration::minutes(30))
            .unwrap();
        payment.handle_payment_callback(tx, success, Utc::now()).unwrap();
        tx
    }

    fn refund(payment: &mut Payment, original: Uuid, value: Decimal, success: bool) -> Uuid {
        let tx = payment
            .execute_refund(
                RefundRequest {
                    amount: value,
                    original_transaction_id: original,
                    business_order_id: None,
                    reason: Some("return".to_string()),
                },
                Utc::now(),
            )
            .unwrap();
        payment.handle_refund_callback(tx, success, Utc::now()).unwrap();
        tx
    }

    #[test]
    fn test_create_validations() {
        let base = NewPayment {
            code: "P1".to_string(),
            order_id: None,
            reseller_id: "R1".to_string(),
            currency: "CNY".to_string(),
            amount: dec!(100),
            r#type: PaymentType::Advance,
            deadline: None,
            related_business: None,
            description: None,
        };

        let created = Payment::create(base.clone(), Utc::now()).unwrap();
        assert_eq!(created.status(), PaymentStatus::Unpaid);
        assert_eq!(created.refund_status(), RefundStatus::NoRefund);
        assert_eq!(created.paid_amount(), Money::ZERO);

        let zero = NewPayment { amount: dec!(0), ..base.clone() };
        assert!(matches!(
            Payment::create(zero, Utc::now()),
            Err(PaymentError::InvalidArgument(_))
        ));

        let no_reseller = NewPayment { reseller_id: " ".to_string(), ..base.clone() };
        assert!(matches!(
            Payment::create(no_reseller, Utc::now()),
            Err(PaymentError::InvalidArgument(_))
        ));

        let credit_without_record = NewPayment {
            r#type: PaymentType::CreditRepayment,
            related_business: Some(RelatedBusiness {
                id: "D1".to_string(),
                r#type: RelatedBusinessType::DeliveryOrder,
                expires_at: None,
            }),
            ..base.clone()
        };
        assert!(matches!(
            Payment::create(credit_without_record, Utc::now()),
            Err(PaymentError::InvalidArgument(_))
        ));

        let credit = NewPayment {
            r#type: PaymentType::CreditRepayment,
            related_business: Some(RelatedBusiness {
                id: "CR-1".to_string(),
                r#type: RelatedBusinessType::CreditRecord,
                expires_at: None,
            }),
            ..base
        };
        assert!(Payment::create(credit, Utc::now()).is_ok());
    }

    #[test]
    fn test_full_payment_scenario() {
        let mut payment = new_payment(dec!(10000.00));
        let tx = payment
            .execute_payment(PaymentChannel::Online, amount(dec!(10000.00)), Utc::now(), Duration::minutes(30))
            .unwrap();
        assert_eq!(payment.status(), PaymentStatus::Paying);
        assert!(payment.running_transaction().is_some());

        payment.handle_payment_callback(tx, true, Utc::now()).unwrap();
        assert_eq!(payment.status(), PaymentStatus::Paid);
        assert_eq!(payment.actual_amount(), Money::new(dec!(10000.00)));
        assert!(payment.running_transaction().is_none());
        assert!(payment.check_invariants().is_ok());
    }

    #[test]
    fn test_partial_payments_scenario() {
        let mut payment = new_payment(dec!(10000.00));
        pay(&mut payment, dec!(3000.00), true);
        assert_eq!(payment.status(), PaymentStatus::PartialPaid);
        assert_eq!(payment.paid_amount(), Money::new(dec!(3000.00)));

        pay(&mut payment, dec!(7000.00), true);
        assert_eq!(payment.status(), PaymentStatus::Paid);
        assert_eq!(payment.paid_amount(), Money::new(dec!(10000.00)));
        assert_eq!(payment.pending_amount(), Money::ZERO);
    }

    #[test]
    fn test_failed_payment_keeps_amounts() {
        let mut payment = new_payment(dec!(500));
        pay(&mut payment, dec!(200), true);
        pay(&mut payment, dec!(300), false);
        assert_eq!(payment.status(), PaymentStatus::Failed);
        assert_eq!(payment.paid_amount(), Money::new(dec!(200)));
        assert!(!payment.can_pay());

        payment.reopen(Utc::now()).unwrap();
        assert_eq!(payment.status(), PaymentStatus::PartialPaid);
        assert!(payment.can_pay());
    }

    #[test]
    fn test_single_running_transaction() {
        let mut payment = new_payment(dec!(1000));
        payment
            .execute_payment(PaymentChannel::Online, amount(dec!(400)), Utc::now(), Duration::minutes(30))
            .unwrap();
        let second = payment.execute_payment(
            PaymentChannel::Wallet,
            amount(dec!(100)),
            Utc::now(),
            Duration::minutes(30),
        );
        assert!(matches!(second, Err(PaymentError::InvalidState(_))));
        assert_eq!(payment.transactions().filter(|tx| tx.is_processing()).count(), 1);
    }

    #[test]
    fn test_payment_over_pending_is_rejected() {
        let mut payment = new_payment(dec!(1000));
        let result = payment.execute_payment(
            PaymentChannel::Online,
            amount(dec!(1000.01)),
            Utc::now(),
            Duration::minutes(30),
        );
        assert!(matches!(result, Err(PaymentError::InvalidArgument(_))));
        assert_eq!(payment.status(), PaymentStatus::Unpaid);
    }

    #[test]
    fn test_duplicate_callback_is_already_processed() {
        let mut payment = new_payment(dec!(1000));
        let tx = pay(&mut payment, dec!(1000), true);

        let again = payment.handle_payment_callback(tx, true, Utc::now());
        assert!(matches!(again, Err(PaymentError::AlreadyProcessed(_))));
        assert_eq!(payment.paid_amount(), Money::new(dec!(1000)));

        let unknown = payment.handle_payment_callback(Uuid::new_v4(), true, Utc::now());
        assert!(matches!(unknown, Err(PaymentError::NotFound(_))));
    }

    #[test]
    fn test_refund_callback_on_payment_transaction_is_rejected() {
        let mut payment = new_payment(dec!(1000));
        let tx = payment
            .execute_payment(PaymentChannel::Online, amount(dec!(1000)), Utc::now(), Duration::minutes(30))
            .unwrap();
        let result = payment.handle_refund_callback(tx, true, Utc::now());
        assert!(matches!(result, Err(PaymentError::InvalidArgument(_))));
        assert!(payment.running_transaction().is_some());
    }

    #[test]
    fn test_refund_scenario() {
        let mut payment = new_payment(dec!(10000.00));
        let original = pay(&mut payment, dec!(10000.00), true);

        refund(&mut payment, original, dec!(3000.00), true);
        assert_eq!(payment.refund_status(), RefundStatus::PartialRefunded);
        assert_eq!(payment.actual_amount(), Money::new(dec!(7000.00)));

        refund(&mut payment, original, dec!(7000.00), true);
        assert_eq!(payment.refund_status(), RefundStatus::FullRefunded);
        assert_eq!(payment.actual_amount(), Money::ZERO);
        assert!(!payment.can_refund());
        assert!(payment.check_invariants().is_ok());
    }

    #[test]
    fn test_refund_over_refundable_is_rejected() {
        let mut payment = new_payment(dec!(10000.00));
        let original = pay(&mut payment, dec!(10000.00), true);

        let result = payment.execute_refund(
            RefundRequest {
                amount: dec!(15000.00),
                original_transaction_id: original,
                business_order_id: None,
                reason: None,
            },
            Utc::now(),
        );
        assert!(matches!(result, Err(PaymentError::InvalidArgument(_))));
        assert!(payment.running_transaction().is_none());
        assert_eq!(payment.refund_status(), RefundStatus::NoRefund);
    }

    #[test]
    fn test_refund_limited_by_original_transaction() {
        let mut payment = new_payment(dec!(10000.00));
        let first = pay(&mut payment, dec!(3000.00), true);
        pay(&mut payment, dec!(7000.00), true);

        let result = payment.execute_refund(
            RefundRequest {
                amount: dec!(4000.00),
                original_transaction_id: first,
                business_order_id: None,
                reason: None,
            },
            Utc::now(),
        );
        assert!(matches!(result, Err(PaymentError::InvalidArgument(_))));
    }

    #[test]
    fn test_refund_requires_successful_original() {
        let mut payment = new_payment(dec!(1000));
        pay(&mut payment, dec!(500), true);
        let failed = pay_failed_then_reopen(&mut payment);

        let result = payment.execute_refund(
            RefundRequest {
                amount: dec!(100),
                original_transaction_id: failed,
                business_order_id: None,
                reason: None,
            },
            Utc::now(),
        );
        assert!(matches!(result, Err(PaymentError::InvalidArgument(_))));
    }

    fn pay_failed_then_reopen(payment: &mut Payment) -> Uuid {
        let tx = pay(payment, dec!(100), false);
        payment.reopen(Utc::now()).unwrap();
        tx
    }

    #[test]
    fn test_failed_refund_keeps_amounts() {
        let mut payment = new_payment(dec!(1000));
        let original = pay(&mut payment, dec!(1000), true);
        refund(&mut payment, original, dec!(400), false);
        assert_eq!(payment.refund_status(), RefundStatus::RefundFailed);
        assert_eq!(payment.refunded_amount(), Money::ZERO);
        assert!(payment.can_refund());
    }

    #[test]
    fn test_latest_refundable_payment() {
        let mut payment = new_payment(dec!(1000));
        let first = pay(&mut payment, dec!(400), true);
        let second = pay(&mut payment, dec!(600), true);
        assert_eq!(payment.latest_refundable_payment().map(|tx| tx.id), Some(second));

        refund(&mut payment, second, dec!(600), true);
        assert_eq!(payment.latest_refundable_payment().map(|tx| tx.id), Some(first));
        assert_eq!(payment.latest_successful_payment().map(|tx| tx.id), Some(second));
    }

    #[test]
    fn test_cancel_rules() {
        let mut untouched = new_payment(dec!(1000));
        untouched.cancel("order withdrawn", Utc::now()).unwrap();
        assert_eq!(untouched.status(), PaymentStatus::Canceled);
        assert!(untouched.cancel("again", Utc::now()).is_err());

        let mut attempted = new_payment(dec!(1000));
        pay(&mut attempted, dec!(100), false);
        attempted.reopen(Utc::now()).unwrap();
        assert!(matches!(
            attempted.cancel("too late", Utc::now()),
            Err(PaymentError::InvalidState(_))
        ));
    }

    #[test]
    fn test_freeze_blocks_and_unfreeze_recomputes() {
        let mut payment = new_payment(dec!(1000));
        pay(&mut payment, dec!(300), true);

        payment.freeze("risk review", Utc::now()).unwrap();
        assert!(!payment.can_pay());
        assert!(!payment.can_refund());
        assert!(payment.freeze("twice", Utc::now()).is_err());

        payment.unfreeze(Utc::now()).unwrap();
        assert_eq!(payment.status(), PaymentStatus::PartialPaid);
        assert!(payment.unfreeze(Utc::now()).is_err());
    }

    #[test]
    fn test_callback_while_frozen_keeps_frozen() {
        let mut payment = new_payment(dec!(1000));
        let tx = payment
            .execute_payment(PaymentChannel::Online, amount(dec!(1000)), Utc::now(), Duration::minutes(30))
            .unwrap();
        payment.freeze("dispute", Utc::now()).unwrap();
        payment.handle_payment_callback(tx, true, Utc::now()).unwrap();
        assert_eq!(payment.status(), PaymentStatus::Frozen);
        assert_eq!(payment.paid_amount(), Money::new(dec!(1000)));

        payment.unfreeze(Utc::now()).unwrap();
        assert_eq!(payment.status(), PaymentStatus::Paid);
    }

    #[test]
    fn test_unfreeze_with_running_payment_returns_to_paying() {
        let mut payment = new_payment(dec!(1000));
        payment
            .execute_payment(PaymentChannel::Online, amount(dec!(500)), Utc::now(), Duration::minutes(30))
            .unwrap();
        payment.freeze("check", Utc::now()).unwrap();
        payment.unfreeze(Utc::now()).unwrap();
        assert_eq!(payment.status(), PaymentStatus::Paying);
    }

    #[test]
    fn test_stop_is_terminal() {
        let mut payment = new_payment(dec!(1000));
        payment.stop("contract ended", Utc::now()).unwrap();
        assert!(payment.is_terminal());
        assert!(payment.stop("again", Utc::now()).is_err());
        assert!(payment.freeze("late", Utc::now()).is_err());
        assert!(!payment.can_pay());
    }

    #[test]
    fn test_rehydrate_rejects_broken_amounts() {
        let mut payment = new_payment(dec!(1000));
        pay(&mut payment, dec!(400), true);

        let parts = PaymentParts {
            code: payment.code().to_string(),
            order_id: None,
            reseller_id: payment.reseller_id().to_string(),
            currency: "CNY".to_string(),
            target_amount: amount(dec!(1000)),
            paid_amount: Money::new(dec!(999)),
            refunded_amount: Money::ZERO,
            r#type: PaymentType::Final,
            status: PaymentStatus::PartialPaid,
            refund_status: RefundStatus::NoRefund,
            deadline: None,
            related_business: None,
            description: None,
            status_reason: None,
            created_at: payment.created_at(),
            updated_at: payment.updated_at(),
            version: 1,
            transactions: payment.transactions().cloned().collect(),
        };
        assert!(matches!(
            Payment::rehydrate(parts),
            Err(PaymentError::InvalidState(_))
        ));
    }

    #[test]
    fn test_overdue() {
        let now = Utc::now();
        let payment = Payment::create(
            NewPayment {
                code: "P9".to_string(),
                order_id: None,
                reseller_id: "R1".to_string(),
                currency: "CNY".to_string(),
                amount: dec!(10),
                r#type: PaymentType::Other,
                deadline: Some(now - Duration::days(1)),
                related_business: None,
                description: None,
            },
            now,
        )
        .unwrap();
        assert!(payment.is_overdue(now));
        assert!(!payment.is_overdue(now - Duration::days(2)));
    }
}

//! Checks run on a batch before anything is sent to a channel.

use crate::domain::money::{Amount, Money};
use crate::domain::payment::Payment;
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use std::collections::HashSet;

pub fn ensure_distinct<S: AsRef<str>>(codes: &[S]) -> Result<()> {
    if codes.is_empty() {
        return Err(PaymentError::InvalidArgument(
            "at least one payment is required".to_string(),
        ));
    }
    let mut seen = HashSet::with_capacity(codes.len());
    for code in codes {
        if !seen.insert(code.as_ref()) {
            return Err(PaymentError::InvalidArgument(format!(
                "payment {} appears more than once",
                code.as_ref()
            )));
        }
    }
    Ok(())
}

/// All payments must belong to the same reseller, share a currency and be
/// payable. Returns the reseller id.
pub fn validate_payment_set(payments: &[Payment]) -> Result<&str> {
    let first = payments.first().ok_or_else(|| {
        PaymentError::InvalidArgument("at least one payment is required".to_string())
    })?;

    for payment in payments {
        if payment.reseller_id() != first.reseller_id() {
            return Err(PaymentError::InvalidArgument(format!(
                "payment {} belongs to reseller {}, expected {}",
                payment.code(),
                payment.reseller_id(),
                first.reseller_id()
            )));
        }
        if payment.currency() != first.currency() {
            return Err(PaymentError::InvalidArgument(format!(
                "payment {} is in {}, expected {}",
                payment.code(),
                payment.currency(),
                first.currency()
            )));
        }
        if !payment.can_pay() {
            return Err(PaymentError::InvalidState(format!(
                "payment {} cannot be paid in status {}",
                payment.code(),
                payment.status()
            )));
        }
    }
    Ok(first.reseller_id())
}

/// Every allocated amount must be positive and within its payment's pending
/// amount, and together they must add up to the channel total.
pub fn validate_allocation(
    payments: &[Payment],
    allocated: &[Decimal],
    total: Decimal,
) -> Result<Vec<Amount>> {
    if allocated.len() != payments.len() {
        return Err(PaymentError::InvalidArgument(format!(
            "{} amounts allocated for {} payments",
            allocated.len(),
            payments.len()
        )));
    }

    let mut amounts = Vec::with_capacity(allocated.len());
    for (payment, value) in payments.iter().zip(allocated) {
        let amount = Amount::new(*value).map_err(|_| {
            PaymentError::InvalidArgument(format!(
                "allocation {} for payment {} must be positive",
                value,
                payment.code()
            ))
        })?;
        if Money::from(amount) > payment.pending_amount() {
            return Err(PaymentError::InvalidArgument(format!(
                "allocation {} exceeds pending {} of payment {}",
                amount,
                payment.pending_amount(),
                payment.code()
            )));
        }
        amounts.push(amount);
    }

    let sum: Decimal = allocated.iter().sum();
    if sum != total {
        return Err(PaymentError::InvalidArgument(format!(
            "allocations add up to {sum}, channel amount is {total}"
        )));
    }
    Ok(amounts)
}

/// Spreads a channel total over payments in the given order, filling each
/// pending amount before moving to the next. Payments left uncovered get
/// zero.
pub fn allocate_sequentially(payments: &[Payment], total: Decimal) -> Result<Vec<Decimal>> {
    if total <= Decimal::ZERO {
        return Err(PaymentError::InvalidArgument(format!(
            "channel amount must be positive, got {total}"
        )));
    }

    let mut remaining = total;
    let allocation: Vec<Decimal> = payments
        .iter()
        .map(|payment| {
            let share = remaining.min(payment.pending_amount().value());
            remaining -= share;
            share
        })
        .collect();

    if remaining > Decimal::ZERO {
        return Err(PaymentError::InvalidArgument(format!(
            "channel amount {total} exceeds the pending total by {remaining}"
        )));
    }
    Ok(allocation)
}

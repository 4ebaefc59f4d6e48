//! Application layer orchestrating the payment aggregate.
//!
//! `PaymentEngine` is the single entry point. Its operations are spread over
//! several modules (execution, refunds, callbacks, reconciliation), each adding
//! an `impl PaymentEngine` block. All of them serialize work on a payment
//! through the shared `PaymentLocks` table.

pub mod callback;
pub mod engine;
pub mod execution;
pub mod gateways;
pub mod locks;
pub mod reconciliation;
pub mod refund;
pub mod validation;

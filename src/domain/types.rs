//! Closed status and classification enums of the payment domain.
//!
//! Every variant carries an explicit storage code that never changes, so the
//! persisted form stays stable even if variants are reordered or renamed in
//! memory. The textual name is what the CLI and logs use.

use crate::error::PaymentError;
use std::fmt;
use std::str::FromStr;

macro_rules! coded_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($variant:ident = ($code:literal, $text:literal)),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Stable storage code.
            pub fn code(self) -> u8 {
                match self {
                    $($name::$variant => $code),+
                }
            }

            pub fn from_code(code: u8) -> Result<Self, PaymentError> {
                match code {
                    $($code => Ok($name::$variant),)+
                    other => Err(PaymentError::InvalidArgument(format!(
                        "unknown {} code {}",
                        stringify!($name),
                        other
                    ))),
                }
            }

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = PaymentError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                let wanted = value.trim().to_ascii_lowercase();
                $name::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == wanted)
                    .ok_or_else(|| {
                        PaymentError::InvalidArgument(format!(
                            "unknown {} '{}'",
                            stringify!($name),
                            value
                        ))
                    })
            }
        }
    };
}

coded_enum! {
    pub enum PaymentStatus {
        Unpaid = (0, "unpaid"),
        Paying = (1, "paying"),
        PartialPaid = (2, "partial_paid"),
        Paid = (3, "paid"),
        Failed = (4, "failed"),
        Frozen = (5, "frozen"),
        Stopped = (6, "stopped"),
        Canceled = (7, "canceled"),
    }
}

impl PaymentStatus {
    /// STOPPED and CANCELED can never be left.
    pub fn is_terminal(self) -> bool {
        matches!(self, PaymentStatus::Stopped | PaymentStatus::Canceled)
    }
}

coded_enum! {
    pub enum RefundStatus {
        NoRefund = (0, "no_refund"),
        Refunding = (1, "refunding"),
        PartialRefunded = (2, "partial_refunded"),
        FullRefunded = (3, "full_refunded"),
        RefundFailed = (4, "refund_failed"),
    }
}

coded_enum! {
    pub enum PaymentType {
        Advance = (1, "advance"),
        Final = (2, "final"),
        Other = (3, "other"),
        CreditRepayment = (4, "credit_repayment"),
    }
}

coded_enum! {
    pub enum TransactionType {
        Payment = (1, "payment"),
        Refund = (2, "refund"),
    }
}

coded_enum! {
    pub enum TransactionStatus {
        Processing = (0, "processing"),
        Success = (1, "success"),
        Failed = (2, "failed"),
    }
}

coded_enum! {
    /// External payment rails a reseller can settle through.
    pub enum PaymentChannel {
        Online = (1, "online"),
        Wallet = (2, "wallet"),
        WireTransfer = (3, "wire_transfer"),
        CreditAccount = (4, "credit_account"),
    }
}

coded_enum! {
    pub enum RelatedBusinessType {
        CreditRecord = (1, "credit_record"),
        DeliveryOrder = (2, "delivery_order"),
    }
}

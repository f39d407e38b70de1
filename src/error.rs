//! Error kinds surfaced by the approval engine
//!
//! All three enums are expected business outcomes, not crashes: validation
//! failures are fixed by correcting input, balance failures carry the live
//! remaining balance, and state conflicts tell the caller to refresh.

use crate::context::CertificateState;
use crate::money::Money;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("period start must be on or before period end")]
    PeriodInverted,
    #[error("certificate period is not set")]
    MissingPeriod,
    #[error("certificate is not attached to a subcontract")]
    MissingSubcontract,
    #[error("certificate details reference a different subcontract")]
    SubcontractMismatch,
    #[error("certificate needs a certified amount, a completion percentage, or both")]
    MissingFigures,
    #[error("certified amount must be positive")]
    NonPositiveAmount,
    #[error("subcontract total amount must be positive")]
    NonPositiveTotal,
    #[error("supplied amount {supplied} disagrees with the percentage-derived amount {derived}")]
    FiguresDisagree { supplied: Money, derived: Money },
    #[error("rejection requires a non-empty reason")]
    MissingReason,
    #[error("payment requires a non-empty payment reference")]
    MissingPaymentReference,
    #[error("approver {0} may not approve their own submission")]
    SelfApproval(String),
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient balance: {requested} requested, {remaining} remaining")]
    InsufficientBalance { requested: Money, remaining: Money },
    #[error("release of {requested} would take the certified total below zero (currently {certified})")]
    ReleaseUnderflow { requested: Money, certified: Money },
    #[error("monetary overflow updating subcontract totals")]
    Overflow,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum StateError {
    #[error("expected certificate in {expected:?}, found {actual:?}")]
    StateConflict {
        expected: CertificateState,
        actual: CertificateState,
    },
    #[error(
        "certified totals moved since submission (frozen {frozen}, current {current}); resubmit to refresh figures"
    )]
    StaleFigures { frozen: Money, current: Money },
}

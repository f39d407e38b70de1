//! The subcontract ledger: the only code that moves certified and paid totals
//!
//! `reserve` is the single choke point enforcing the certified-total bound;
//! `release` is its administrative inverse; `record_payment` only moves the
//! paid total. Callers persist the mutated record themselves, under the
//! per-subcontract serialization owned by the service layer.

use crate::error::LedgerError;
use crate::money::Money;
use crate::subcontract::{Subcontract, SubcontractTotals};

/// Checks that `amount` still fits the subcontract's remaining balance.
///
/// Shared by the advisory check at submission and the real one inside
/// [`reserve`], so both report the same error with the live remaining balance.
pub fn check_available(sub: &Subcontract, amount: Money) -> Result<(), LedgerError> {
    let next = sub
        .total_certified
        .checked_add(amount)
        .ok_or(LedgerError::Overflow)?;
    if next > sub.total_amount {
        return Err(LedgerError::InsufficientBalance {
            requested: amount,
            remaining: sub.remaining_balance(),
        });
    }
    Ok(())
}

/// Commits a certified amount against the subcontract.
///
/// Refuses rather than letting the certified total exceed the contract
/// value; on success the retention held is recomputed from the new certified
/// total and the version counter is bumped.
pub fn reserve(sub: &mut Subcontract, amount: Money) -> Result<SubcontractTotals, LedgerError> {
    check_available(sub, amount)?;

    sub.total_certified = sub
        .total_certified
        .checked_add(amount)
        .ok_or(LedgerError::Overflow)?;
    sub.retention_held = sub.retention_percentage.apply_to(sub.total_certified);
    sub.version += 1;

    Ok(sub.totals())
}

/// Administrative correction: releases a previously reserved amount.
pub fn release(sub: &mut Subcontract, amount: Money) -> Result<SubcontractTotals, LedgerError> {
    if amount > sub.total_certified {
        return Err(LedgerError::ReleaseUnderflow {
            requested: amount,
            certified: sub.total_certified,
        });
    }

    sub.total_certified = sub
        .total_certified
        .checked_sub(amount)
        .ok_or(LedgerError::Overflow)?;
    sub.retention_held = sub.retention_percentage.apply_to(sub.total_certified);
    sub.version += 1;

    Ok(sub.totals())
}

/// Records a payment of the net payable. The certified amount was already
/// committed at approval, so only the paid total moves.
pub fn record_payment(
    sub: &mut Subcontract,
    net_payable: Money,
) -> Result<SubcontractTotals, LedgerError> {
    sub.total_paid = sub
        .total_paid
        .checked_add(net_payable)
        .ok_or(LedgerError::Overflow)?;
    sub.version += 1;

    Ok(sub.totals())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Percent;
    use crate::subcontract::Currency;

    fn subcontract(total_minor: i64, retention_pct: u32) -> Subcontract {
        Subcontract::new(
            "sub_1test".to_string(),
            "proj_1test".to_string(),
            Currency::USD,
            Money::from_minor(total_minor),
            Percent::from_whole(retention_pct).unwrap(),
        )
    }

    #[test]
    fn reserve_updates_totals_and_recomputes_retention() {
        let mut sub = subcontract(1_000_000, 10);

        let totals = reserve(&mut sub, Money::from_minor(500_000)).unwrap();
        assert_eq!(totals.total_certified, Money::from_minor(500_000));
        assert_eq!(totals.retention_held, Money::from_minor(50_000));
        assert_eq!(totals.remaining_balance, Money::from_minor(500_000));
        assert_eq!(totals.version, 1);
    }

    #[test]
    fn reserve_refuses_beyond_total() {
        let mut sub = subcontract(1_000_000, 10);
        reserve(&mut sub, Money::from_minor(500_000)).unwrap();

        let err = reserve(&mut sub, Money::from_minor(600_000)).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientBalance {
                requested: Money::from_minor(600_000),
                remaining: Money::from_minor(500_000),
            }
        );
        // refused reservations leave the record untouched
        assert_eq!(sub.total_certified, Money::from_minor(500_000));
        assert_eq!(sub.version, 1);
    }

    #[test]
    fn release_is_symmetric_and_bounded() {
        let mut sub = subcontract(1_000_000, 10);
        reserve(&mut sub, Money::from_minor(300_000)).unwrap();

        let totals = release(&mut sub, Money::from_minor(300_000)).unwrap();
        assert_eq!(totals.total_certified, Money::ZERO);
        assert_eq!(totals.retention_held, Money::ZERO);

        let err = release(&mut sub, Money::from_minor(1)).unwrap_err();
        assert_eq!(
            err,
            LedgerError::ReleaseUnderflow {
                requested: Money::from_minor(1),
                certified: Money::ZERO,
            }
        );
    }

    #[test]
    fn payment_moves_only_paid_total() {
        let mut sub = subcontract(1_000_000, 10);
        reserve(&mut sub, Money::from_minor(500_000)).unwrap();

        let totals = record_payment(&mut sub, Money::from_minor(450_000)).unwrap();
        assert_eq!(totals.total_paid, Money::from_minor(450_000));
        assert_eq!(totals.total_certified, Money::from_minor(500_000));
        assert_eq!(totals.remaining_balance, Money::from_minor(500_000));
    }
}

//! Subcontract records and their running totals
use crate::money::{Money, Percent};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Eq, Ord, PartialEq, PartialOrd)]
pub enum Currency {
    #[n(0)]
    USD,
    #[n(1)]
    GBP,
    #[n(2)]
    EUR,
}

/// A subcontract agreed under a project.
///
/// The mutable totals are owned by the ledger operations in [`crate::ledger`];
/// nothing else writes them. `retention_held` is always recomputed from the
/// certified total, never edited independently.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Subcontract {
    #[n(0)]
    pub subcontract_id: String,
    #[n(1)]
    pub project_id: String,
    #[n(2)]
    pub currency: Currency, // label only, no conversion
    #[n(3)]
    pub total_amount: Money,
    #[n(4)]
    pub retention_percentage: Percent,
    #[n(5)]
    pub total_certified: Money,
    #[n(6)]
    pub total_paid: Money,
    #[n(7)]
    pub retention_held: Money,
    // bumped on every ledger write
    #[n(8)]
    pub version: u64,
}

impl Subcontract {
    pub fn new(
        subcontract_id: String,
        project_id: String,
        currency: Currency,
        total_amount: Money,
        retention_percentage: Percent,
    ) -> Self {
        Self {
            subcontract_id,
            project_id,
            currency,
            total_amount,
            retention_percentage,
            total_certified: Money::ZERO,
            total_paid: Money::ZERO,
            retention_held: Money::ZERO,
            version: 0,
        }
    }

    /// The ceiling on any future certificate against this subcontract.
    pub fn remaining_balance(&self) -> Money {
        self.total_amount
            .checked_sub(self.total_certified)
            .unwrap_or(Money::ZERO)
    }

    pub fn totals(&self) -> SubcontractTotals {
        SubcontractTotals {
            total_amount: self.total_amount,
            total_certified: self.total_certified,
            total_paid: self.total_paid,
            retention_held: self.retention_held,
            remaining_balance: self.remaining_balance(),
            version: self.version,
        }
    }

    /// Load a subcontract record from the database
    pub fn load_from_db(db: &sled::Db, subcontract_id: &str) -> anyhow::Result<Self> {
        let bytes = db
            .get(subcontract_id.as_bytes())?
            .ok_or_else(|| anyhow::anyhow!("subcontract not found: {subcontract_id}"))?;
        Ok(minicbor::decode(&bytes)?)
    }

    /// Save this subcontract record back to the database
    pub fn save_to_db(&self, db: &sled::Db) -> anyhow::Result<()> {
        db.insert(self.subcontract_id.as_bytes(), minicbor::to_vec(self)?)?;
        Ok(())
    }
}

/// Read-only snapshot of a subcontract's totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubcontractTotals {
    pub total_amount: Money,
    pub total_certified: Money,
    pub total_paid: Money,
    pub retention_held: Money,
    pub remaining_balance: Money,
    pub version: u64,
}

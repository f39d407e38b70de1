//! Service layer API for certificate workflow operations
//!
//! The service is the coordinator: every certificate transition for a given
//! subcontract runs under that subcontract's lock, so "check the remaining
//! balance, then reserve it" is atomic per subcontract while unrelated
//! subcontracts proceed in parallel. Locks are never nested.
use super::certificate::{CertFigures, CertificateDetails, TimeStamp};
use super::context::{CertificateContext, CertificateState, Decision, DecisionKind};
use super::error::{LedgerError, StateError, ValidationError};
use super::ledger;
use super::money::{Money, Percent};
use super::subcontract::{Currency, Subcontract, SubcontractTotals};
use super::utils;
use sled::{Batch, Db};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Cross-cutting approval constraints.
#[derive(Debug, Clone)]
pub struct ApprovalPolicy {
    /// When false, the actor who submitted a certificate may not approve it.
    pub allow_self_approval: bool,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            allow_self_approval: false,
        }
    }
}

/// Which certificates a listing should return.
#[derive(Debug, Clone, Default)]
pub struct CertificateFilter {
    pub subcontract_id: Option<String>,
    pub project_id: Option<String>,
    pub status: Option<CertificateState>,
}

impl CertificateFilter {
    fn matches(&self, ctx: &CertificateContext) -> bool {
        if let Some(sub_id) = &self.subcontract_id {
            if &ctx.subcontract_id != sub_id {
                return false;
            }
        }
        if let Some(project_id) = &self.project_id {
            if &ctx.project_id != project_id {
                return false;
            }
        }
        if let Some(status) = self.status {
            if ctx.current_state() != status {
                return false;
            }
        }
        true
    }
}

pub struct ApprovalService {
    instance: Arc<sled::Db>,
    policy: ApprovalPolicy,
    // one lock per subcontract id; the registry itself is only held long
    // enough to clone the entry out
    subcontract_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ApprovalService {
    pub fn new(instance: Arc<Db>) -> Self {
        Self::with_policy(instance, ApprovalPolicy::default())
    }

    pub fn with_policy(instance: Arc<Db>, policy: ApprovalPolicy) -> Self {
        Self {
            instance,
            policy,
            subcontract_locks: Mutex::new(HashMap::new()),
        }
    }

    fn subcontract_lock(&self, subcontract_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .subcontract_locks
            .lock()
            .expect("subcontract lock registry poisoned");
        locks
            .entry(subcontract_id.to_string())
            .or_default()
            .clone()
    }

    /// Load a certificate context from the database
    fn load_certificate(&self, cert_id: &str) -> anyhow::Result<CertificateContext> {
        CertificateContext::load_from_db(&self.instance, cert_id)
    }

    /// Load a subcontract record from the database
    fn load_subcontract(&self, subcontract_id: &str) -> anyhow::Result<Subcontract> {
        Subcontract::load_from_db(&self.instance, subcontract_id)
    }

    /// Agree a new subcontract under a project
    pub fn create_subcontract(
        &self,
        project_id: String,
        currency: Currency,
        total_amount: Money,
        retention_percentage: Percent,
    ) -> anyhow::Result<Subcontract> {
        if !total_amount.is_positive() {
            return Err(ValidationError::NonPositiveTotal.into());
        }

        let subcontract_id = utils::new_uuid_to_bech32(utils::SUBCONTRACT_HRP)?;
        let subcontract = Subcontract::new(
            subcontract_id,
            project_id,
            currency,
            total_amount,
            retention_percentage,
        );
        subcontract.save_to_db(&self.instance)?;

        info!(
            subcontract_id = %subcontract.subcontract_id,
            total_amount = %subcontract.total_amount,
            retention = %subcontract.retention_percentage,
            "subcontract created"
        );
        Ok(subcontract)
    }

    /// Create a new draft certificate against a subcontract
    pub fn create_certificate(
        &self,
        details: CertificateDetails,
        created_by: String,
    ) -> anyhow::Result<CertificateContext> {
        // Validate and serialize certificate details
        let (details_hash, details_cbor) = details.validate_and_finalise()?;

        let subcontract_id = details
            .subcontract_id()
            .ok_or(ValidationError::MissingSubcontract)?
            .to_string();
        // The subcontract must exist before anything references it
        let subcontract = self.load_subcontract(&subcontract_id)?;

        let cert_id = utils::new_uuid_to_bech32(utils::CERTIFICATE_HRP)?;
        let mut ctx = CertificateContext::new_with(
            cert_id.clone(),
            subcontract_id,
            subcontract.project_id.clone(),
            details_hash.clone(),
        );
        ctx.insert_decision(Decision::new(
            cert_id,
            created_by,
            TimeStamp::new(),
            DecisionKind::Create {
                details_hash: details_hash.clone(),
            },
        ));

        // Batch insert: certificate details and certificate context
        let mut batch = Batch::default();
        batch.insert(details_hash.as_bytes(), details_cbor);
        batch.insert(ctx.cert_id.as_bytes(), minicbor::to_vec(&ctx)?);
        self.instance.apply_batch(batch)?;

        info!(cert_id = %ctx.cert_id, subcontract_id = %ctx.subcontract_id, "certificate drafted");
        Ok(ctx)
    }

    /// Replace the details of a draft certificate
    pub fn update_certificate(
        &self,
        cert_id: String,
        details: CertificateDetails,
        actor: String,
    ) -> anyhow::Result<CertificateContext> {
        let lock = self.subcontract_lock(&self.load_certificate(&cert_id)?.subcontract_id);
        let _guard = lock.lock().expect("subcontract lock poisoned");

        let mut ctx = self.load_certificate(&cert_id)?;
        expect_state(&ctx, CertificateState::Draft)?;

        let (details_hash, details_cbor) = details.validate_and_finalise()?;
        if details.subcontract_id() != Some(ctx.subcontract_id.as_str()) {
            return Err(ValidationError::SubcontractMismatch.into());
        }

        ctx.details_hash = details_hash.clone();
        ctx.insert_decision(Decision::new(
            cert_id,
            actor,
            TimeStamp::new(),
            DecisionKind::Update {
                details_hash: details_hash.clone(),
            },
        ));

        let mut batch = Batch::default();
        batch.insert(details_hash.as_bytes(), details_cbor);
        batch.insert(ctx.cert_id.as_bytes(), minicbor::to_vec(&ctx)?);
        self.instance.apply_batch(batch)?;

        Ok(ctx)
    }

    /// Submit a draft certificate for approval
    ///
    /// Freezes the monetary figures against the ledger totals of this moment.
    /// The ledger itself is not touched; the real reservation happens at
    /// approval.
    pub fn submit_certificate(
        &self,
        cert_id: String,
        actor: String,
    ) -> anyhow::Result<CertificateContext> {
        let lock = self.subcontract_lock(&self.load_certificate(&cert_id)?.subcontract_id);
        let _guard = lock.lock().expect("subcontract lock poisoned");

        let mut ctx = self.load_certificate(&cert_id)?;
        expect_state(&ctx, CertificateState::Draft)?;

        let subcontract = self.load_subcontract(&ctx.subcontract_id)?;
        let details = self.certificate_details(&ctx)?;

        let figures = freeze_figures(&details, &subcontract)?;
        ctx.figures = Some(figures);
        ctx.insert_decision(Decision::new(
            cert_id,
            actor,
            TimeStamp::new(),
            DecisionKind::Submit {
                details_hash: ctx.details_hash.clone(),
            },
        ));
        ctx.save_to_db(&self.instance)?;

        info!(
            cert_id = %ctx.cert_id,
            subcontract_id = %ctx.subcontract_id,
            amount = %figures.amount_certified,
            net_payable = %figures.net_payable,
            "certificate submitted for approval"
        );
        Ok(ctx)
    }

    /// Approve a certificate that is in PendingApproval state
    ///
    /// This is the only operation that commits money to the ledger. It is
    /// fully serialized per subcontract: of two racing approvals whose
    /// combined amounts do not fit, exactly one wins and the other is refused
    /// with the live remaining balance.
    pub fn approve_certificate(
        &self,
        cert_id: String,
        approver_id: String,
    ) -> anyhow::Result<CertificateContext> {
        let lock = self.subcontract_lock(&self.load_certificate(&cert_id)?.subcontract_id);
        let _guard = lock.lock().expect("subcontract lock poisoned");

        let mut ctx = self.load_certificate(&cert_id)?;
        expect_state(&ctx, CertificateState::PendingApproval)?;

        if !self.policy.allow_self_approval && ctx.submitted_by() == Some(approver_id.as_str()) {
            return Err(ValidationError::SelfApproval(approver_id).into());
        }

        let figures = ctx
            .figures
            .ok_or_else(|| anyhow::anyhow!("pending certificate {} has no frozen figures", cert_id))?;
        let mut subcontract = self.load_subcontract(&ctx.subcontract_id)?;

        // The frozen figures must still match the ledger. A balance breach is
        // reported as such; figures that still fit but were frozen against an
        // older certified total are refused for resubmission, never silently
        // recomputed.
        if figures.previous_certified != subcontract.total_certified {
            ledger::check_available(&subcontract, figures.amount_certified)?;
            warn!(
                cert_id = %ctx.cert_id,
                frozen = %figures.previous_certified,
                current = %subcontract.total_certified,
                "refusing approval of stale figures"
            );
            return Err(StateError::StaleFigures {
                frozen: figures.previous_certified,
                current: subcontract.total_certified,
            }
            .into());
        }

        let totals = ledger::reserve(&mut subcontract, figures.amount_certified)?;

        ctx.insert_decision(Decision::new(
            cert_id,
            approver_id,
            TimeStamp::new(),
            DecisionKind::Approve,
        ));

        // Batch insert: certificate context and subcontract totals move together
        let mut batch = Batch::default();
        batch.insert(ctx.cert_id.as_bytes(), minicbor::to_vec(&ctx)?);
        batch.insert(
            subcontract.subcontract_id.as_bytes(),
            minicbor::to_vec(&subcontract)?,
        );
        self.instance.apply_batch(batch)?;

        info!(
            cert_id = %ctx.cert_id,
            subcontract_id = %ctx.subcontract_id,
            amount = %figures.amount_certified,
            total_certified = %totals.total_certified,
            remaining = %totals.remaining_balance,
            "certificate approved"
        );
        Ok(ctx)
    }

    /// Reject a certificate that is in PendingApproval state
    pub fn reject_certificate(
        &self,
        cert_id: String,
        approver_id: String,
        reason: String,
    ) -> anyhow::Result<CertificateContext> {
        if reason.trim().is_empty() {
            return Err(ValidationError::MissingReason.into());
        }

        let lock = self.subcontract_lock(&self.load_certificate(&cert_id)?.subcontract_id);
        let _guard = lock.lock().expect("subcontract lock poisoned");

        let mut ctx = self.load_certificate(&cert_id)?;
        expect_state(&ctx, CertificateState::PendingApproval)?;

        ctx.insert_decision(Decision::new(
            cert_id,
            approver_id,
            TimeStamp::new(),
            DecisionKind::Reject { reason },
        ));
        ctx.save_to_db(&self.instance)?;

        info!(cert_id = %ctx.cert_id, "certificate rejected");
        Ok(ctx)
    }

    /// Record payment of an approved certificate
    ///
    /// The certified amount was committed at approval; only the paid total
    /// moves here.
    pub fn mark_certificate_paid(
        &self,
        cert_id: String,
        actor: String,
        payment_ref: String,
    ) -> anyhow::Result<CertificateContext> {
        if payment_ref.trim().is_empty() {
            return Err(ValidationError::MissingPaymentReference.into());
        }

        let lock = self.subcontract_lock(&self.load_certificate(&cert_id)?.subcontract_id);
        let _guard = lock.lock().expect("subcontract lock poisoned");

        let mut ctx = self.load_certificate(&cert_id)?;
        expect_state(&ctx, CertificateState::Approved)?;

        let figures = ctx
            .figures
            .ok_or_else(|| anyhow::anyhow!("approved certificate {} has no frozen figures", cert_id))?;
        let mut subcontract = self.load_subcontract(&ctx.subcontract_id)?;
        ledger::record_payment(&mut subcontract, figures.net_payable)?;

        ctx.insert_decision(Decision::new(
            cert_id,
            actor,
            TimeStamp::new(),
            DecisionKind::MarkPaid { payment_ref },
        ));

        let mut batch = Batch::default();
        batch.insert(ctx.cert_id.as_bytes(), minicbor::to_vec(&ctx)?);
        batch.insert(
            subcontract.subcontract_id.as_bytes(),
            minicbor::to_vec(&subcontract)?,
        );
        self.instance.apply_batch(batch)?;

        info!(
            cert_id = %ctx.cert_id,
            net_payable = %figures.net_payable,
            "certificate paid"
        );
        Ok(ctx)
    }

    /// Void an approved-but-erroneous certificate, releasing its reservation
    ///
    /// Administrative correction only; a paid certificate can no longer be
    /// voided.
    pub fn void_certificate(
        &self,
        cert_id: String,
        actor: String,
        reason: String,
    ) -> anyhow::Result<CertificateContext> {
        if reason.trim().is_empty() {
            return Err(ValidationError::MissingReason.into());
        }

        let lock = self.subcontract_lock(&self.load_certificate(&cert_id)?.subcontract_id);
        let _guard = lock.lock().expect("subcontract lock poisoned");

        let mut ctx = self.load_certificate(&cert_id)?;
        expect_state(&ctx, CertificateState::Approved)?;

        let figures = ctx
            .figures
            .ok_or_else(|| anyhow::anyhow!("approved certificate {} has no frozen figures", cert_id))?;
        let mut subcontract = self.load_subcontract(&ctx.subcontract_id)?;
        ledger::release(&mut subcontract, figures.amount_certified)?;

        ctx.insert_decision(Decision::new(
            cert_id,
            actor,
            TimeStamp::new(),
            DecisionKind::Void { reason },
        ));

        let mut batch = Batch::default();
        batch.insert(ctx.cert_id.as_bytes(), minicbor::to_vec(&ctx)?);
        batch.insert(
            subcontract.subcontract_id.as_bytes(),
            minicbor::to_vec(&subcontract)?,
        );
        self.instance.apply_batch(batch)?;

        warn!(cert_id = %ctx.cert_id, amount = %figures.amount_certified, "certificate voided");
        Ok(ctx)
    }

    /// Clone a rejected certificate's details into a fresh draft
    ///
    /// The rejected record stays in place as part of the audit trail; the new
    /// certificate gets its own id and starts over from Draft.
    pub fn recreate_certificate(
        &self,
        cert_id: String,
        actor: String,
    ) -> anyhow::Result<CertificateContext> {
        let rejected = self.load_certificate(&cert_id)?;
        expect_state(&rejected, CertificateState::Rejected)?;

        // the stored details are immutable and shared by hash
        if self.instance.get(rejected.details_hash.as_bytes())?.is_none() {
            return Err(anyhow::anyhow!(
                "certificate details not found: {}",
                rejected.details_hash
            ));
        }

        let new_id = utils::new_uuid_to_bech32(utils::CERTIFICATE_HRP)?;
        let mut ctx = CertificateContext::new_with(
            new_id.clone(),
            rejected.subcontract_id.clone(),
            rejected.project_id.clone(),
            rejected.details_hash.clone(),
        );
        ctx.insert_decision(Decision::new(
            new_id,
            actor,
            TimeStamp::new(),
            DecisionKind::Create {
                details_hash: rejected.details_hash,
            },
        ));
        ctx.save_to_db(&self.instance)?;

        info!(cert_id = %ctx.cert_id, recreated_from = %cert_id, "certificate recreated");
        Ok(ctx)
    }

    /// Fetch a certificate context
    pub fn get_certificate(&self, cert_id: &str) -> anyhow::Result<CertificateContext> {
        self.load_certificate(cert_id)
    }

    /// Fetch the immutable details a certificate currently points at
    pub fn certificate_details(
        &self,
        ctx: &CertificateContext,
    ) -> anyhow::Result<CertificateDetails> {
        let bytes = self
            .instance
            .get(ctx.details_hash.as_bytes())?
            .ok_or_else(|| {
                anyhow::anyhow!("certificate details not found: {}", ctx.details_hash)
            })?;
        Ok(minicbor::decode(&bytes)?)
    }

    /// Fetch a subcontract record
    pub fn get_subcontract(&self, subcontract_id: &str) -> anyhow::Result<Subcontract> {
        self.load_subcontract(subcontract_id)
    }

    /// Read-only snapshot of a subcontract's running totals
    pub fn subcontract_totals(&self, subcontract_id: &str) -> anyhow::Result<SubcontractTotals> {
        Ok(self.load_subcontract(subcontract_id)?.totals())
    }

    /// Lazily list certificates matching a filter
    ///
    /// Backed by a prefix scan over the certificate keyspace; restart by
    /// calling again.
    pub fn list_certificates(
        &self,
        filter: CertificateFilter,
    ) -> impl Iterator<Item = anyhow::Result<CertificateContext>> {
        self.instance
            .scan_prefix(utils::key_prefix(utils::CERTIFICATE_HRP))
            .filter_map(move |entry| match entry {
                Ok((_, bytes)) => match minicbor::decode::<CertificateContext>(&bytes) {
                    Ok(ctx) if filter.matches(&ctx) => Some(Ok(ctx)),
                    Ok(_) => None,
                    Err(err) => Some(Err(err.into())),
                },
                Err(err) => Some(Err(err.into())),
            })
    }
}

fn expect_state(ctx: &CertificateContext, expected: CertificateState) -> Result<(), StateError> {
    let actual = ctx.current_state();
    if actual != expected {
        return Err(StateError::StateConflict { expected, actual });
    }
    Ok(())
}

/// Compute the figures frozen at submission from the details and the
/// subcontract's current totals.
///
/// The certified amount and the cumulative completion percentage must agree:
/// a missing one is derived from the other, and when both are supplied they
/// are cross-checked exactly.
fn freeze_figures(
    details: &CertificateDetails,
    sub: &Subcontract,
) -> anyhow::Result<CertFigures> {
    let previous = sub.total_certified;
    let supplied_pct = details.percentage_complete();

    let amount = match (details.amount_certified(), supplied_pct) {
        (Some(amount), None) => amount,
        (None, Some(pct)) => pct
            .apply_to(sub.total_amount)
            .checked_sub(previous)
            .ok_or(LedgerError::Overflow)?,
        (Some(amount), Some(pct)) => {
            let derived = pct
                .apply_to(sub.total_amount)
                .checked_sub(previous)
                .ok_or(LedgerError::Overflow)?;
            if derived != amount {
                return Err(ValidationError::FiguresDisagree {
                    supplied: amount,
                    derived,
                }
                .into());
            }
            amount
        }
        (None, None) => return Err(ValidationError::MissingFigures.into()),
    };

    if !amount.is_positive() {
        return Err(ValidationError::NonPositiveAmount.into());
    }
    // advisory check against the current ledger state; the real one runs at
    // approval, inside the reservation
    ledger::check_available(sub, amount)?;

    let cumulative = previous.checked_add(amount).ok_or(LedgerError::Overflow)?;
    let percentage = match supplied_pct {
        Some(pct) => pct,
        None => Percent::ratio_of(cumulative, sub.total_amount).ok_or_else(|| {
            anyhow::anyhow!(
                "completion percentage not derivable for {cumulative} of {}",
                sub.total_amount
            )
        })?,
    };

    let retention = sub.retention_percentage.apply_to(amount);
    let net_payable = amount.checked_sub(retention).ok_or(LedgerError::Overflow)?;

    Ok(CertFigures {
        previous_certified: previous,
        amount_certified: amount,
        percentage_complete: percentage,
        retention_amount: retention,
        net_payable,
        cumulative_certified: cumulative,
    })
}

//! Certificate context and its append-only decision chain
//!
//! A certificate's status is never stored directly; it is derived by folding
//! the chain of decision records. Decisions are append-only and survive every
//! later transition, so the chain doubles as the audit trail.

use super::certificate::{CertFigures, TimeStamp};
use chrono::Utc;

/// Derived status of a certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum CertificateState {
    #[n(0)]
    Draft,
    #[n(1)]
    PendingApproval,
    #[n(2)]
    Approved,
    #[n(3)]
    Rejected,
    #[n(4)]
    Paid,
    #[n(5)]
    Voided,
}

impl CertificateState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CertificateState::Rejected | CertificateState::Paid | CertificateState::Voided
        )
    }
}

/// One immutable record per attempted state transition.
#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct Decision {
    #[n(0)]
    pub cert_id: String,
    #[n(1)]
    pub actor: String,
    #[n(2)]
    pub decided_at: TimeStamp<Utc>,
    #[n(3)]
    pub kind: DecisionKind,
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub enum DecisionKind {
    #[n(0)]
    Create {
        #[n(0)]
        details_hash: String,
    },
    #[n(1)]
    Update {
        #[n(0)]
        details_hash: String,
    },
    #[n(2)]
    Submit {
        #[n(0)]
        details_hash: String,
    },
    #[n(3)]
    Approve,
    #[n(4)]
    Reject {
        #[n(0)]
        reason: String,
    },
    #[n(5)]
    MarkPaid {
        #[n(0)]
        payment_ref: String,
    },
    #[n(6)]
    Void {
        #[n(0)]
        reason: String,
    },
}

impl Decision {
    pub fn new(
        cert_id: String,
        actor: String,
        decided_at: TimeStamp<Utc>,
        kind: DecisionKind,
    ) -> Self {
        Self {
            cert_id,
            actor,
            decided_at,
            kind,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, minicbor::Encode, minicbor::Decode)]
pub struct CertificateContext {
    #[n(0)]
    pub cert_id: String,
    #[n(1)]
    pub subcontract_id: String,
    #[n(2)]
    pub project_id: String,
    #[n(3)]
    pub details_hash: String,
    // frozen at submission, absent while the certificate is a draft
    #[n(4)]
    pub figures: Option<CertFigures>,
    #[n(5)]
    pub decisions: Vec<Decision>,
}

impl CertificateContext {
    pub fn new_with(
        cert_id: String,
        subcontract_id: String,
        project_id: String,
        details_hash: String,
    ) -> Self {
        Self {
            cert_id,
            subcontract_id,
            project_id,
            details_hash,
            figures: None,
            decisions: vec![],
        }
    }

    pub fn insert_decision(&mut self, decision: Decision) {
        self.decisions.push(decision);
    }

    /// Derive the current status by folding the decision chain.
    ///
    /// Decisions that are not legal moves from the state reached so far are
    /// skipped, which makes terminal states absorbing: nothing appended after
    /// a Reject, MarkPaid or Void changes the outcome.
    pub fn current_state(&self) -> CertificateState {
        let mut state = CertificateState::Draft;
        for decision in &self.decisions {
            state = match (state, &decision.kind) {
                (CertificateState::Draft, DecisionKind::Create { .. }) => CertificateState::Draft,
                (CertificateState::Draft, DecisionKind::Update { .. }) => CertificateState::Draft,
                (CertificateState::Draft, DecisionKind::Submit { .. }) => {
                    CertificateState::PendingApproval
                }
                (CertificateState::PendingApproval, DecisionKind::Approve) => {
                    CertificateState::Approved
                }
                (CertificateState::PendingApproval, DecisionKind::Reject { .. }) => {
                    CertificateState::Rejected
                }
                (CertificateState::Approved, DecisionKind::MarkPaid { .. }) => {
                    CertificateState::Paid
                }
                (CertificateState::Approved, DecisionKind::Void { .. }) => CertificateState::Voided,
                (current, _) => current,
            };
        }
        state
    }

    pub fn requires_approval(&self) -> bool {
        self.current_state() == CertificateState::PendingApproval
    }

    pub fn is_terminal(&self) -> bool {
        self.current_state().is_terminal()
    }

    /// Actor of the most recent Submit decision, if any.
    pub fn submitted_by(&self) -> Option<&str> {
        self.decisions.iter().rev().find_map(|d| match &d.kind {
            DecisionKind::Submit { .. } => Some(d.actor.as_str()),
            _ => None,
        })
    }

    /// Reason of the most recent Reject decision, if any.
    pub fn rejection_reason(&self) -> Option<&str> {
        self.decisions.iter().rev().find_map(|d| match &d.kind {
            DecisionKind::Reject { reason } => Some(reason.as_str()),
            _ => None,
        })
    }

    /// Emit the decision chain as tracing events, oldest first.
    pub fn view_history(&self) {
        for decision in &self.decisions {
            tracing::info!(
                cert_id = %self.cert_id,
                actor = %decision.actor,
                decided_at = %decision.decided_at.to_datetime_utc(),
                kind = ?decision.kind,
                "decision"
            );
        }
    }

    /// Load a certificate context from the database
    pub fn load_from_db(db: &sled::Db, cert_id: &str) -> anyhow::Result<Self> {
        let bytes = db
            .get(cert_id.as_bytes())?
            .ok_or_else(|| anyhow::anyhow!("certificate not found: {cert_id}"))?;
        Ok(minicbor::decode(&bytes)?)
    }

    /// Save this certificate context back to the database
    pub fn save_to_db(&self, db: &sled::Db) -> anyhow::Result<()> {
        db.insert(self.cert_id.as_bytes(), minicbor::to_vec(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(kind: DecisionKind) -> Decision {
        Decision::new(
            "cert_1test".to_string(),
            "user_1test".to_string(),
            TimeStamp::new(),
            kind,
        )
    }

    #[test]
    fn empty_chain_is_draft() {
        let ctx = CertificateContext::new_with(
            "cert_1test".into(),
            "sub_1test".into(),
            "proj_1test".into(),
            "hash".into(),
        );
        assert_eq!(ctx.current_state(), CertificateState::Draft);
        assert!(!ctx.is_terminal());
    }

    #[test]
    fn happy_path_chain_derives_paid() {
        let mut ctx = CertificateContext::new_with(
            "cert_1test".into(),
            "sub_1test".into(),
            "proj_1test".into(),
            "hash".into(),
        );
        ctx.insert_decision(decision(DecisionKind::Create {
            details_hash: "hash".into(),
        }));
        ctx.insert_decision(decision(DecisionKind::Submit {
            details_hash: "hash".into(),
        }));
        assert!(ctx.requires_approval());

        ctx.insert_decision(decision(DecisionKind::Approve));
        assert_eq!(ctx.current_state(), CertificateState::Approved);

        ctx.insert_decision(decision(DecisionKind::MarkPaid {
            payment_ref: "pay_1test".into(),
        }));
        assert_eq!(ctx.current_state(), CertificateState::Paid);
        assert!(ctx.is_terminal());
    }

    #[test]
    fn rejection_absorbs_later_decisions() {
        let mut ctx = CertificateContext::new_with(
            "cert_1test".into(),
            "sub_1test".into(),
            "proj_1test".into(),
            "hash".into(),
        );
        ctx.insert_decision(decision(DecisionKind::Submit {
            details_hash: "hash".into(),
        }));
        ctx.insert_decision(decision(DecisionKind::Reject {
            reason: "scope incomplete".into(),
        }));
        ctx.insert_decision(decision(DecisionKind::Approve));

        assert_eq!(ctx.current_state(), CertificateState::Rejected);
        assert_eq!(ctx.rejection_reason(), Some("scope incomplete"));
    }
}

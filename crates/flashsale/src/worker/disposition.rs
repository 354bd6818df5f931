use crate::{DecodeError, OrderId};
use core::fmt;

/// How the worker settled one delivered entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// The order was written and the entry acknowledged.
    Persisted,
    /// The order had been written by an earlier delivery; the entry was
    /// acknowledged without writing again.
    AlreadyPersisted,
    /// Another holder had the claimant's lock. The entry stays pending and is
    /// retried on redelivery.
    LockContended,
    /// The claim could not be fulfilled. It was dead-lettered for manual
    /// reconciliation and acknowledged.
    Reconciled(ReconcileReason),
}

/// Why a claim needs manual reconciliation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileReason {
    /// The durable stock ran out although the fast store admitted the claim.
    DurableStockExhausted,
    /// The claimant already has an order under a different id.
    ConflictingOrder { existing: OrderId },
    /// The entry does not carry a claim.
    Undecodable(DecodeError),
}

impl fmt::Display for ReconcileReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DurableStockExhausted => f.write_str("durable stock exhausted"),
            Self::ConflictingOrder { existing } => {
                write!(f, "claimant already holds order {existing}")
            }
            Self::Undecodable(err) => write!(f, "undecodable entry: {err}"),
        }
    }
}

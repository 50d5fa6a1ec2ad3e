//! Transactions: the unit-of-work boundary of a MeshBase.
//!
//! A MeshBase has at most one active transaction at a time, owned by one
//! thread. Every mutation of a MeshObject checks that the calling thread owns
//! the active transaction of the object's MeshBase and appends its change
//! event to it. On commit the change log is drained and published.

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::TransactionError;
use crate::event::MeshObjectEvent;
use crate::identifier::MeshBaseIdentifier;
use crate::mesh_base::MeshBase;
use crate::time::now_millis;

/// Identifies a transaction within its MeshBase.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(u64);

impl TransactionId {
    /// Creates a new TransactionId from a raw u64 value.
    pub fn new(id: u64) -> Self {
        TransactionId(id)
    }

    /// Returns the raw u64 value of this transaction ID.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// State of a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    /// Mutations may be performed.
    Active,
    /// The change log has been published.
    Committed,
}

/// A unit of work on one MeshBase.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    mesh_base: MeshBaseIdentifier,
    owner: ThreadId,
    started_at: i64,
    state: Mutex<TransactionState>,
    changes: Mutex<Vec<MeshObjectEvent>>,
}

impl Transaction {
    fn new(id: TransactionId, mesh_base: MeshBaseIdentifier) -> Self {
        Self {
            id,
            mesh_base,
            owner: thread::current().id(),
            started_at: now_millis(),
            state: Mutex::new(TransactionState::Active),
            changes: Mutex::new(Vec::new()),
        }
    }

    /// The transaction's identifier.
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// The MeshBase the transaction belongs to.
    pub fn mesh_base(&self) -> &MeshBaseIdentifier {
        &self.mesh_base
    }

    /// When the transaction was started.
    pub fn started_at(&self) -> i64 {
        self.started_at
    }

    /// The current state.
    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    /// True if the calling thread owns this transaction.
    pub fn is_owned_by_current_thread(&self) -> bool {
        self.owner == thread::current().id()
    }

    /// A snapshot of the change log, in order of occurrence.
    pub fn changes(&self) -> Vec<MeshObjectEvent> {
        self.changes.lock().clone()
    }

    pub(crate) fn add_change(&self, event: MeshObjectEvent) {
        self.changes.lock().push(event);
    }

    /// Flips the state to committed; false if that happened already.
    fn mark_committed(&self) -> bool {
        let mut state = self.state.lock();
        if *state == TransactionState::Committed {
            return false;
        }
        *state = TransactionState::Committed;
        true
    }
}

/// Receives committed transactions.
pub trait TransactionListener: Send + Sync {
    /// Called once per committed transaction, after its change log is final.
    fn transaction_committed(&self, transaction: &Transaction);
}

/// The per-MeshBase slot holding the active transaction.
pub(crate) struct TransactionSlot {
    current: Mutex<Option<Arc<Transaction>>>,
    released: Condvar,
    next_id: AtomicU64,
}

impl TransactionSlot {
    pub(crate) fn new() -> Self {
        Self {
            current: Mutex::new(None),
            released: Condvar::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Takes the slot, waiting up to `wait` for another thread to release it.
    /// `Some(Duration::ZERO)` never waits; `None` waits indefinitely.
    pub(crate) fn acquire(
        &self,
        mesh_base: &MeshBaseIdentifier,
        wait: Option<Duration>,
    ) -> Result<Arc<Transaction>, TransactionError> {
        let me = thread::current().id();
        let deadline = wait.map(|w| Instant::now() + w);
        let mut current = self.current.lock();
        loop {
            let holder = current.as_ref().map(|tx| (tx.owner, tx.id));
            match holder {
                None => break,
                Some((owner, id)) if owner == me => {
                    return Err(TransactionError::ActiveAlready {
                        mesh_base: mesh_base.clone(),
                        transaction: id.as_u64(),
                    });
                }
                Some((_, id)) => match (wait, deadline) {
                    (Some(w), _) if w.is_zero() => {
                        return Err(TransactionError::Busy {
                            mesh_base: mesh_base.clone(),
                            transaction: id.as_u64(),
                        });
                    }
                    (Some(w), Some(deadline)) => {
                        if self.released.wait_until(&mut current, deadline).timed_out()
                            && current.is_some()
                        {
                            return Err(TransactionError::Timeout {
                                mesh_base: mesh_base.clone(),
                                waited_ms: w.as_millis() as u64,
                            });
                        }
                    }
                    _ => self.released.wait(&mut current),
                },
            }
        }
        let id = TransactionId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let tx = Arc::new(Transaction::new(id, mesh_base.clone()));
        *current = Some(tx.clone());
        debug!("Started transaction {} on {}", id, mesh_base);
        Ok(tx)
    }

    /// The active transaction if the calling thread owns it.
    pub(crate) fn owned_by_current_thread(&self) -> Option<Arc<Transaction>> {
        self.current
            .lock()
            .as_ref()
            .filter(|tx| tx.is_owned_by_current_thread())
            .cloned()
    }

    pub(crate) fn current(&self) -> Option<Arc<Transaction>> {
        self.current.lock().clone()
    }

    /// Verifies the calling thread owns the active transaction.
    pub(crate) fn check(&self, mesh_base: &MeshBaseIdentifier) -> Result<Arc<Transaction>, TransactionError> {
        match self.current.lock().as_ref() {
            None => Err(TransactionError::NotActive {
                mesh_base: mesh_base.clone(),
            }),
            Some(tx) if !tx.is_owned_by_current_thread() => Err(TransactionError::WrongThread {
                mesh_base: mesh_base.clone(),
                transaction: tx.id.as_u64(),
            }),
            Some(tx) => Ok(tx.clone()),
        }
    }

    /// Marks the transaction committed and frees the slot. Returns false if
    /// the transaction had been committed already.
    pub(crate) fn release(&self, tx: &Transaction) -> bool {
        if !tx.mark_committed() {
            return false;
        }
        let mut current = self.current.lock();
        if current.as_ref().map(|c| c.id) == Some(tx.id) {
            *current = None;
        }
        self.released.notify_all();
        true
    }
}

/// Scope of a transaction obtained from a MeshBase.
///
/// The owning guard commits on [`TransactionGuard::commit`] or when dropped.
/// A guard that merely re-entered a transaction the thread already owned
/// commits nothing.
pub struct TransactionGuard {
    base: Arc<MeshBase>,
    transaction: Arc<Transaction>,
    owned: bool,
}

impl TransactionGuard {
    pub(crate) fn new(base: Arc<MeshBase>, transaction: Arc<Transaction>, owned: bool) -> Self {
        Self {
            base,
            transaction,
            owned,
        }
    }

    /// The transaction.
    pub fn transaction(&self) -> &Arc<Transaction> {
        &self.transaction
    }

    /// True if dropping or committing this guard ends the transaction.
    pub fn is_owner(&self) -> bool {
        self.owned
    }

    /// Commits the transaction if this guard owns it.
    pub fn commit(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if self.owned {
            self.owned = false;
            self.base.commit_transaction(&self.transaction);
        }
    }
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        self.finish();
    }
}

impl fmt::Debug for TransactionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionGuard")
            .field("transaction", &self.transaction.id)
            .field("owned", &self.owned)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Change;
    use crate::identifier::MeshObjectIdentifier;

    fn base_id() -> MeshBaseIdentifier {
        MeshBaseIdentifier::new("test")
    }

    #[test]
    fn test_acquire_and_release() {
        let slot = TransactionSlot::new();
        let tx = slot.acquire(&base_id(), None).unwrap();
        assert_eq!(tx.state(), TransactionState::Active);
        assert!(slot.check(&base_id()).is_ok());
        assert!(slot.release(&tx));
        assert_eq!(tx.state(), TransactionState::Committed);
        assert!(!slot.release(&tx));
        assert!(matches!(slot.check(&base_id()), Err(TransactionError::NotActive { .. })));
    }

    #[test]
    fn test_same_thread_cannot_acquire_twice() {
        let slot = TransactionSlot::new();
        let _tx = slot.acquire(&base_id(), None).unwrap();
        let err = slot.acquire(&base_id(), None).unwrap_err();
        assert!(matches!(err, TransactionError::ActiveAlready { .. }));
        assert!(slot.owned_by_current_thread().is_some());
    }

    #[test]
    fn test_other_thread_is_rejected_and_waits() {
        let slot = Arc::new(TransactionSlot::new());
        let tx = slot.acquire(&base_id(), None).unwrap();

        let other = slot.clone();
        let checked = thread::spawn(move || other.check(&base_id())).join().unwrap();
        assert!(matches!(checked, Err(TransactionError::WrongThread { .. })));

        let other = slot.clone();
        let busy = thread::spawn(move || other.acquire(&base_id(), Some(Duration::ZERO)).map(|t| t.id()))
            .join()
            .unwrap();
        assert!(matches!(busy, Err(TransactionError::Busy { .. })));

        let other = slot.clone();
        let timed_out =
            thread::spawn(move || other.acquire(&base_id(), Some(Duration::from_millis(20))).map(|t| t.id()))
                .join()
                .unwrap();
        assert!(matches!(timed_out, Err(TransactionError::Timeout { .. })));

        let other = slot.clone();
        let waiter = thread::spawn(move || {
            let tx = other.acquire(&base_id(), None).unwrap();
            let id = tx.id();
            other.release(&tx);
            id
        });
        thread::sleep(Duration::from_millis(20));
        slot.release(&tx);
        let second = waiter.join().unwrap();
        assert_ne!(second, tx.id());
    }

    #[test]
    fn test_change_log_keeps_order() {
        let slot = TransactionSlot::new();
        let tx = slot.acquire(&base_id(), None).unwrap();
        for i in 0..3 {
            tx.add_change(MeshObjectEvent::new(
                MeshObjectIdentifier::new(base_id(), format!("o{}", i)),
                i,
                None,
                Change::Created,
            ));
        }
        let times: Vec<i64> = tx.changes().iter().map(|e| e.time).collect();
        assert_eq!(times, vec![0, 1, 2]);
    }

    #[test]
    fn test_transaction_id_display() {
        assert_eq!(TransactionId::new(7).to_string(), "tx-7");
    }
}

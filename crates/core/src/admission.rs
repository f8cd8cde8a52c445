//! Admission control for transfers and listings.
//!
//! A [`Gate`] is a fixed-capacity pool of slots backed by a tokio semaphore. Callers that
//! find the gate full wait in arrival order until a slot frees up; nothing is rejected for
//! being busy. A [`Slot`] gives its permit back when dropped, so a slot held across an
//! operation is released on every exit path: normal return, `?` propagation, or the
//! surrounding future being dropped because the client went away.
//!
//! Waiting can be bounded with [`Gate::acquire_timeout`] or interrupted with
//! [`Gate::acquire_or_cancel`]. An interrupted wait never holds a permit.

use crate::config::Limits;
use crate::constants::{LIST_GATE, TRANSFER_GATE};
use crate::error::{AdmissionError, AdmissionResult};
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A named, fixed-capacity admission pool.
///
/// Cloning is cheap and clones share the same slots.
#[derive(Clone, Debug)]
pub struct Gate {
    name: &'static str,
    capacity: NonZeroUsize,
    semaphore: Arc<Semaphore>,
}

/// One unit of permission from a [`Gate`], held for the duration of one operation.
#[derive(Debug)]
#[must_use = "dropping a slot releases it immediately"]
pub struct Slot {
    gate: &'static str,
    _permit: OwnedSemaphorePermit,
}

impl Drop for Slot {
    fn drop(&mut self) {
        tracing::debug!(gate = self.gate, "slot released");
    }
}

impl Gate {
    pub fn new(name: &'static str, capacity: NonZeroUsize) -> Self {
        Self {
            name,
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity.get())),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Number of slots free right now.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Number of slots currently held.
    pub fn in_use(&self) -> usize {
        self.capacity().saturating_sub(self.available())
    }

    /// Waits until a slot is free and takes it.
    pub async fn acquire(&self) -> AdmissionResult<Slot> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| AdmissionError::Closed { gate: self.name })?;

        tracing::debug!(gate = self.name, in_use = self.in_use(), "slot acquired");
        Ok(Slot {
            gate: self.name,
            _permit: permit,
        })
    }

    /// Like [`Gate::acquire`], failing with `DeadlineExceeded` if no slot frees up in time.
    pub async fn acquire_timeout(&self, timeout: Duration) -> AdmissionResult<Slot> {
        self.admit(Some(timeout), std::future::pending()).await
    }

    /// Like [`Gate::acquire`], failing with `Canceled` once `cancelled` resolves.
    ///
    /// A signal that has already fired wins over a free slot.
    pub async fn acquire_or_cancel<F>(&self, cancelled: F) -> AdmissionResult<Slot>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            () = cancelled => {
                tracing::warn!(gate = self.name, "wait for slot canceled");
                Err(AdmissionError::Canceled { gate: self.name })
            }
            slot = self.acquire() => slot,
        }
    }

    /// Waits for a slot until `cancelled` resolves or, when given, `deadline` elapses.
    pub async fn admit<F>(&self, deadline: Option<Duration>, cancelled: F) -> AdmissionResult<Slot>
    where
        F: Future<Output = ()>,
    {
        let Some(timeout) = deadline else {
            return self.acquire_or_cancel(cancelled).await;
        };

        match tokio::time::timeout(timeout, self.acquire_or_cancel(cancelled)).await {
            Ok(slot) => slot,
            Err(_) => {
                tracing::warn!(gate = self.name, ?timeout, "deadline elapsed waiting for slot");
                Err(AdmissionError::DeadlineExceeded {
                    gate: self.name,
                    timeout,
                })
            }
        }
    }
}

/// The two independent gates of the service, created once at startup.
#[derive(Clone, Debug)]
pub struct AdmissionController {
    transfer: Gate,
    list: Gate,
}

impl AdmissionController {
    pub fn new(transfer_limit: NonZeroUsize, list_limit: NonZeroUsize) -> Self {
        Self {
            transfer: Gate::new(TRANSFER_GATE, transfer_limit),
            list: Gate::new(LIST_GATE, list_limit),
        }
    }

    pub fn from_limits(limits: &Limits) -> Self {
        Self::new(limits.upload_download, limits.list_files)
    }

    /// Gate shared by uploads, downloads and deletes.
    pub fn transfer(&self) -> &Gate {
        &self.transfer
    }

    /// Gate used by listings.
    pub fn list(&self) -> &Gate {
        &self.list
    }
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::from_limits(&Limits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn gate(capacity: usize) -> Gate {
        Gate::new("test", NonZeroUsize::new(capacity).unwrap())
    }

    #[tokio::test]
    async fn test_acquire_and_drop_tracks_in_use() {
        let gate = gate(2);
        assert_eq!(gate.in_use(), 0);

        let first = gate.acquire().await.unwrap();
        let second = gate.acquire().await.unwrap();
        assert_eq!(gate.in_use(), 2);
        assert_eq!(gate.available(), 0);

        drop(first);
        assert_eq!(gate.in_use(), 1);
        drop(second);
        assert_eq!(gate.available(), 2);
    }

    #[tokio::test]
    async fn test_clones_share_slots() {
        let gate = gate(1);
        let other = gate.clone();

        let _slot = gate.acquire().await.unwrap();
        assert_eq!(other.available(), 0);
    }

    #[tokio::test]
    async fn test_full_gate_blocks_until_release() {
        let gate = gate(2);
        let first = gate.acquire().await.unwrap();
        let _second = gate.acquire().await.unwrap();

        let err = gate
            .acquire_timeout(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AdmissionError::DeadlineExceeded { gate: "test", .. }
        ));
        assert_eq!(gate.in_use(), 2);

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("waiter should be admitted after a release")
            .unwrap()
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_holders_never_exceed_capacity() {
        const CAPACITY: usize = 3;
        let gate = gate(CAPACITY);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..(CAPACITY * 4) {
            let gate = gate.clone();
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _slot = gate.acquire().await.unwrap();
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= CAPACITY);
        assert_eq!(peak.load(Ordering::SeqCst), CAPACITY);
        assert_eq!(gate.available(), CAPACITY);
    }

    #[tokio::test]
    async fn test_cancelled_wait_returns_promptly_without_leaking() {
        let gate = gate(1);
        let holder = gate.acquire().await.unwrap();

        let (cancel_tx, cancel_rx) = tokio::sync::oneshot::channel::<()>();
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.acquire_or_cancel(async move {
                    let _ = cancel_rx.await;
                })
                .await
                .map(|_| ())
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel_tx.send(()).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("cancelled wait should not hang")
            .unwrap();
        assert!(matches!(result, Err(AdmissionError::Canceled { gate: "test" })));

        drop(holder);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn test_dropped_wait_does_not_consume_slot() {
        let gate = gate(1);
        let holder = gate.acquire().await.unwrap();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());

        drop(holder);
        assert_eq!(gate.available(), 1);
        let _slot = gate
            .acquire_timeout(Duration::from_millis(50))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_already_fired_cancel_wins_over_free_slot() {
        let gate = gate(1);
        let result = gate.acquire_or_cancel(std::future::ready(())).await;
        assert!(matches!(result, Err(AdmissionError::Canceled { .. })));
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn test_admit_without_deadline_waits_for_release() {
        let gate = gate(1);
        let holder = gate.acquire().await.unwrap();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.admit(None, std::future::pending())
                    .await
                    .map(|slot| slot.gate)
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(holder);
        let admitted = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(admitted.unwrap(), "test");
    }

    #[tokio::test]
    async fn test_controller_gates_are_independent() {
        let controller =
            AdmissionController::new(NonZeroUsize::new(1).unwrap(), NonZeroUsize::new(2).unwrap());
        let _transfer = controller.transfer().acquire().await.unwrap();

        assert_eq!(controller.transfer().available(), 0);
        assert_eq!(controller.list().available(), 2);
        assert_eq!(controller.transfer().name(), TRANSFER_GATE);
        assert_eq!(controller.list().name(), LIST_GATE);
    }

    #[test]
    fn test_default_controller_uses_reference_limits() {
        let controller = AdmissionController::default();
        assert_eq!(controller.transfer().capacity(), 10);
        assert_eq!(controller.list().capacity(), 100);
    }
}

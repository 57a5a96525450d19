use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use parking_lot::{Condvar, Mutex};

use crate::common::types::{Rid, TxnId};
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionState,
};
use crate::transaction::concurrency::transaction_manager::TransactionManager;

/// Lock modes for row-granularity locks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    /// Shared locks coexist; every other pairing conflicts
    fn compatible(self, other: LockMode) -> bool {
        matches!((self, other), (LockMode::Shared, LockMode::Shared))
    }
}

#[derive(Debug, Clone)]
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

impl LockRequest {
    fn new(txn_id: TxnId, mode: LockMode) -> Self {
        Self {
            txn_id,
            mode,
            granted: false,
        }
    }
}

/// Another transaction's request stands in the way of (txn_id, mode)
fn conflicts(request: &LockRequest, txn_id: TxnId, mode: LockMode) -> bool {
    request.txn_id != txn_id && !request.mode.compatible(mode)
}

struct LockRequestQueue {
    requests: VecDeque<LockRequest>,
    /// Transaction currently upgrading its shared lock, if any
    upgrading: Option<TxnId>,
    cv: Arc<Condvar>,
}

impl Default for LockRequestQueue {
    fn default() -> Self {
        Self {
            requests: VecDeque::new(),
            upgrading: None,
            cv: Arc::new(Condvar::new()),
        }
    }
}

/// Row-granularity two-phase lock manager with wound-wait deadlock
/// avoidance.
///
/// Older transactions (smaller IDs) never wait for younger ones: a
/// conflicting younger transaction is wounded (aborted, its requests
/// dropped) and a younger requester waits for its elders on the queue's
/// condition variable. A background detector can additionally sweep for
/// residual waits-for cycles.
pub struct LockManager {
    latch: Mutex<HashMap<Rid, LockRequestQueue>>,
    waits_for: Mutex<BTreeMap<TxnId, Vec<TxnId>>>,
    txn_manager: Arc<TransactionManager>,
}

impl LockManager {
    pub fn new(txn_manager: Arc<TransactionManager>) -> Self {
        Self {
            latch: Mutex::new(HashMap::new()),
            waits_for: Mutex::new(BTreeMap::new()),
            txn_manager,
        }
    }

    /// Take a shared lock on `rid`.
    ///
    /// READ_UNCOMMITTED readers do not lock at all. Otherwise the request
    /// waits for conflicting older transactions, wounds conflicting
    /// younger ones, and fails only if the caller is (or becomes)
    /// aborted or is no longer in its growing phase.
    pub fn lock_shared(&self, txn: &Transaction, rid: Rid) -> bool {
        if txn.isolation_level() == IsolationLevel::ReadUncommitted {
            if txn.state() == TransactionState::Shrinking {
                txn.set_state(TransactionState::Aborted);
                return false;
            }
            return true;
        }
        self.lock_with_mode(txn, rid, LockMode::Shared)
    }

    /// Take an exclusive lock on `rid`
    pub fn lock_exclusive(&self, txn: &Transaction, rid: Rid) -> bool {
        self.lock_with_mode(txn, rid, LockMode::Exclusive)
    }

    fn lock_with_mode(&self, txn: &Transaction, rid: Rid, mode: LockMode) -> bool {
        if txn.state() != TransactionState::Growing {
            txn.set_state(TransactionState::Aborted);
            return false;
        }

        let mut table = self.latch.lock();
        let queue = table.entry(rid).or_default();
        queue.requests.push_back(LockRequest::new(txn.id(), mode));
        let cv = Arc::clone(&queue.cv);

        loop {
            if txn.state() == TransactionState::Aborted {
                let queue = table
                    .get_mut(&rid)
                    .expect("queue exists while a request is queued");
                Self::remove_request(queue, txn.id(), mode);
                queue.cv.notify_all();
                return false;
            }

            {
                let queue = table
                    .get_mut(&rid)
                    .expect("queue exists while a request is queued");
                if self.wound_younger(queue, txn.id(), mode, rid) {
                    queue.cv.notify_all();
                }
                if !Self::has_conflicting_older(queue, txn.id(), mode) {
                    Self::grant(queue, txn.id());
                    break;
                }
            }
            cv.wait(&mut table);
        }

        match mode {
            LockMode::Shared => txn.insert_shared(rid),
            LockMode::Exclusive => txn.insert_exclusive(rid),
        }
        true
    }

    /// Upgrade a held shared lock to exclusive. Only one upgrade may be
    /// in flight per RID; a second concurrent upgrader is aborted.
    pub fn lock_upgrade(&self, txn: &Transaction, rid: Rid) -> bool {
        if txn.state() != TransactionState::Growing {
            txn.set_state(TransactionState::Aborted);
            return false;
        }

        let mut table = self.latch.lock();
        let queue = table.entry(rid).or_default();

        let holds_shared = queue
            .requests
            .iter()
            .any(|r| r.txn_id == txn.id() && r.granted && r.mode == LockMode::Shared);
        if !holds_shared || queue.upgrading.is_some() {
            txn.set_state(TransactionState::Aborted);
            return false;
        }

        queue.upgrading = Some(txn.id());
        queue.requests.push_back(LockRequest::new(txn.id(), LockMode::Exclusive));
        let cv = Arc::clone(&queue.cv);

        loop {
            if txn.state() == TransactionState::Aborted {
                let queue = table
                    .get_mut(&rid)
                    .expect("queue exists while a request is queued");
                Self::remove_request(queue, txn.id(), LockMode::Exclusive);
                if queue.upgrading == Some(txn.id()) {
                    queue.upgrading = None;
                }
                queue.cv.notify_all();
                return false;
            }

            {
                let queue = table
                    .get_mut(&rid)
                    .expect("queue exists while a request is queued");
                if self.wound_younger(queue, txn.id(), LockMode::Exclusive, rid) {
                    queue.cv.notify_all();
                }
                let granted_meanwhile = queue
                    .requests
                    .iter()
                    .any(|r| r.txn_id == txn.id() && r.mode == LockMode::Exclusive && r.granted);
                if granted_meanwhile
                    || !Self::has_conflicting_older(queue, txn.id(), LockMode::Exclusive)
                {
                    Self::remove_request(queue, txn.id(), LockMode::Shared);
                    Self::grant(queue, txn.id());
                    queue.upgrading = None;
                    break;
                }
            }
            cv.wait(&mut table);
        }

        txn.erase_shared(&rid);
        txn.insert_exclusive(rid);
        true
    }

    /// Release `txn`'s lock on `rid`. Returns false when no request of
    /// this transaction is queued there; lock sets are untouched then.
    ///
    /// The first release moves a growing transaction to its shrinking
    /// phase, except a shared lock released early under READ_COMMITTED.
    pub fn unlock(&self, txn: &Transaction, rid: Rid) -> bool {
        let mut table = self.latch.lock();
        let Some(queue) = table.get_mut(&rid) else {
            return false;
        };
        let Some(pos) = queue.requests.iter().position(|r| r.txn_id == txn.id()) else {
            return false;
        };
        let released = queue.requests.remove(pos).expect("position is in range");
        if queue.upgrading == Some(txn.id()) {
            queue.upgrading = None;
        }

        txn.erase_shared(&rid);
        txn.erase_exclusive(&rid);

        let keeps_growing = txn.isolation_level() == IsolationLevel::ReadCommitted
            && released.mode == LockMode::Shared;
        if txn.state() == TransactionState::Growing && !keeps_growing {
            txn.set_state(TransactionState::Shrinking);
        }

        if self.regrant(queue, rid) {
            queue.cv.notify_all();
        }
        true
    }

    /// Abort a younger transaction and purge it from this queue
    fn wound_transaction(&self, victim_id: TxnId, wounded_by: TxnId, rid: Rid) {
        if let Some(victim) = self.txn_manager.get_transaction(victim_id) {
            log::debug!("txn {} wounds txn {} on {}", wounded_by, victim_id, rid);
            victim.set_state(TransactionState::Aborted);
            victim.erase_shared(&rid);
            victim.erase_exclusive(&rid);
        }
    }

    /// Wound every younger transaction whose request conflicts with
    /// (txn_id, mode). Returns whether anything was wounded.
    fn wound_younger(
        &self,
        queue: &mut LockRequestQueue,
        txn_id: TxnId,
        mode: LockMode,
        rid: Rid,
    ) -> bool {
        let mut wounded = false;
        queue.requests.retain(|request| {
            let wound = request.txn_id > txn_id && conflicts(request, txn_id, mode);
            if wound {
                self.wound_transaction(request.txn_id, txn_id, rid);
                wounded = true;
            }
            !wound
        });
        if wounded {
            if let Some(upgrader) = queue.upgrading {
                if !queue.requests.iter().any(|r| r.txn_id == upgrader) {
                    queue.upgrading = None;
                }
            }
        }
        wounded
    }

    fn has_conflicting_older(queue: &LockRequestQueue, txn_id: TxnId, mode: LockMode) -> bool {
        queue
            .requests
            .iter()
            .any(|r| r.txn_id < txn_id && conflicts(r, txn_id, mode))
    }

    fn grant(queue: &mut LockRequestQueue, txn_id: TxnId) {
        if let Some(request) = queue
            .requests
            .iter_mut()
            .find(|r| r.txn_id == txn_id && !r.granted)
        {
            request.granted = true;
        }
    }

    fn remove_request(queue: &mut LockRequestQueue, txn_id: TxnId, mode: LockMode) {
        if let Some(pos) = queue
            .requests
            .iter()
            .position(|r| r.txn_id == txn_id && r.mode == mode)
        {
            queue.requests.remove(pos);
        }
    }

    /// Walk the queue after a release: grant every waiting request that
    /// is compatible with the currently granted set, wounding a younger
    /// granted holder that blocks an older waiter. Returns whether any
    /// request was newly granted.
    fn regrant(&self, queue: &mut LockRequestQueue, rid: Rid) -> bool {
        let mut newly_granted = false;
        loop {
            let mut progressed = false;

            let waiting: Vec<(TxnId, LockMode)> = queue
                .requests
                .iter()
                .filter(|r| !r.granted)
                .map(|r| (r.txn_id, r.mode))
                .collect();
            for (waiter_id, waiter_mode) in waiting {
                let len_before = queue.requests.len();
                queue.requests.retain(|request| {
                    let wound = request.granted
                        && request.txn_id > waiter_id
                        && conflicts(request, waiter_id, waiter_mode);
                    if wound {
                        self.wound_transaction(request.txn_id, waiter_id, rid);
                    }
                    !wound
                });
                if queue.requests.len() != len_before {
                    progressed = true;
                }
            }

            for i in 0..queue.requests.len() {
                if queue.requests[i].granted {
                    continue;
                }
                let (candidate_id, candidate_mode) =
                    (queue.requests[i].txn_id, queue.requests[i].mode);
                // A wounded waiter cleans itself up when it wakes
                match self.txn_manager.get_transaction(candidate_id) {
                    Some(candidate) if candidate.state() != TransactionState::Aborted => {}
                    _ => continue,
                }
                let compatible_with_granted = queue.requests.iter().all(|r| {
                    !r.granted || r.txn_id == candidate_id || r.mode.compatible(candidate_mode)
                });
                if compatible_with_granted {
                    queue.requests[i].granted = true;
                    progressed = true;
                    newly_granted = true;
                }
            }

            if !progressed {
                break;
            }
        }
        newly_granted
    }

    /// Record that `t1` waits for `t2`
    pub fn add_edge(&self, t1: TxnId, t2: TxnId) {
        let mut waits_for = self.waits_for.lock();
        let edges = waits_for.entry(t1).or_default();
        if !edges.contains(&t2) {
            edges.push(t2);
        }
    }

    pub fn remove_edge(&self, t1: TxnId, t2: TxnId) {
        if let Some(edges) = self.waits_for.lock().get_mut(&t1) {
            edges.retain(|&t| t != t2);
        }
    }

    /// All waits-for edges, sorted
    pub fn edge_list(&self) -> Vec<(TxnId, TxnId)> {
        let waits_for = self.waits_for.lock();
        let mut edges = Vec::new();
        for (&from, targets) in waits_for.iter() {
            for &to in targets {
                edges.push((from, to));
            }
        }
        edges.sort_unstable();
        edges
    }

    /// Search the waits-for graph for a cycle, exploring from the lowest
    /// transaction ID so the result is deterministic. A found cycle
    /// reports its youngest member.
    pub fn has_cycle(&self) -> Option<TxnId> {
        let waits_for = self.waits_for.lock();
        let mut finished: HashSet<TxnId> = HashSet::new();

        for &start in waits_for.keys() {
            if finished.contains(&start) {
                continue;
            }
            let mut on_path = Vec::new();
            if let Some(victim) = Self::dfs(&waits_for, start, &mut on_path, &mut finished) {
                return Some(victim);
            }
        }
        None
    }

    fn dfs(
        graph: &BTreeMap<TxnId, Vec<TxnId>>,
        node: TxnId,
        on_path: &mut Vec<TxnId>,
        finished: &mut HashSet<TxnId>,
    ) -> Option<TxnId> {
        if let Some(pos) = on_path.iter().position(|&t| t == node) {
            return on_path[pos..].iter().copied().max();
        }
        if finished.contains(&node) {
            return None;
        }

        on_path.push(node);
        let mut neighbors = graph.get(&node).cloned().unwrap_or_default();
        neighbors.sort_unstable();
        for next in neighbors {
            if let Some(victim) = Self::dfs(graph, next, on_path, finished) {
                return Some(victim);
            }
        }
        on_path.pop();
        finished.insert(node);
        None
    }

    /// One detection round: rebuild the waits-for graph from the lock
    /// table (each waiting request waits for each granted request on its
    /// RID), then abort the youngest member of every cycle and wake all
    /// queues so the affected waiters can bail out or proceed.
    pub fn detect_and_break_cycles(&self) {
        let mut table = self.latch.lock();

        {
            let mut waits_for = self.waits_for.lock();
            waits_for.clear();
            for queue in table.values() {
                for waiter in queue.requests.iter().filter(|r| !r.granted) {
                    for holder in queue.requests.iter().filter(|r| r.granted) {
                        if waiter.txn_id != holder.txn_id {
                            waits_for.entry(waiter.txn_id).or_default().push(holder.txn_id);
                        }
                    }
                }
            }
            for edges in waits_for.values_mut() {
                edges.sort_unstable();
                edges.dedup();
            }
        }

        while let Some(victim_id) = self.has_cycle() {
            log::debug!("deadlock detector aborts txn {}", victim_id);
            if let Some(victim) = self.txn_manager.get_transaction(victim_id) {
                victim.set_state(TransactionState::Aborted);
            }

            for (&rid, queue) in table.iter_mut() {
                if !queue.requests.iter().any(|r| r.txn_id == victim_id) {
                    continue;
                }
                queue.requests.retain(|r| r.txn_id != victim_id);
                if queue.upgrading == Some(victim_id) {
                    queue.upgrading = None;
                }
                if let Some(victim) = self.txn_manager.get_transaction(victim_id) {
                    victim.erase_shared(&rid);
                    victim.erase_exclusive(&rid);
                }
            }

            let mut waits_for = self.waits_for.lock();
            waits_for.remove(&victim_id);
            for edges in waits_for.values_mut() {
                edges.retain(|&t| t != victim_id);
            }
        }

        for queue in table.values() {
            queue.cv.notify_all();
        }
    }

    /// Spawn the background deadlock detector; it runs a detection round
    /// every `interval` until the returned handle is shut down or
    /// dropped.
    pub fn start_deadlock_detection(self: Arc<Self>, interval: Duration) -> DeadlockDetectionHandle {
        let lock_manager = self;
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let worker = thread::spawn(move || {
            while !stop_flag.load(Ordering::Relaxed) {
                thread::sleep(interval);
                if stop_flag.load(Ordering::Relaxed) {
                    break;
                }
                lock_manager.detect_and_break_cycles();
            }
        });

        DeadlockDetectionHandle {
            stop,
            worker: Some(worker),
        }
    }
}

/// Owner handle for the detector thread; stops and joins the worker at
/// the next sleep boundary when shut down or dropped.
pub struct DeadlockDetectionHandle {
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl DeadlockDetectionHandle {
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for DeadlockDetectionHandle {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

//! Commit pipeline.
//!
//! Linearizes concurrent batch submissions into strict seqnum order
//! while pipelining the two expensive stages (WAL append, memtable
//! apply). The stages per batch:
//!
//! 1. **Enqueue** — under the pipeline mutex, reserve `count` seqnums
//!    from the monotonic counter (reservation order *is* commit
//!    order) and join the WAL queue. Backpressure stalls here, before
//!    any reservation.
//! 2. **WAL leader election** — the first pending batch becomes the
//!    group leader. The leader asks the environment to pair the group
//!    with its target memtable and WAL segment (rotating when full),
//!    writes every payload in one lock hold, and syncs per the
//!    configured [`SyncMode`]. Followers wait for the leader's signal.
//! 3. **Memtable apply** — each committer applies its own batch at
//!    its reserved seqnums. Applies run in parallel: skip-list
//!    insertion is concurrency-safe and the ranges are disjoint.
//! 4. **Publish** — visibility advances only contiguously. A batch
//!    becomes visible once every earlier batch has been applied;
//!    waiters are signaled through a condvar.
//!
//! ## Failure
//!
//! A WAL append failure latches the pipeline **fatal**: reserved
//! seqnums are surrendered (the counter never rewinds), every
//! in-flight commit returns the error, and all further writes are
//! rejected until the engine restarts.


use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use tracing::{error, trace};

use crate::batch::Batch;
use crate::error::{Error, Result};
use crate::key::SeqNum;
use crate::memtable::Memtable;

// ------------------------------------------------------------------------------------------------
// SyncMode
// ------------------------------------------------------------------------------------------------

/// WAL durability policy applied at commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Never fsync on commit; durability rides on rotation and close.
    None,
    /// Fsync after each batch payload.
    PerBatch,
    /// One fsync per leader-written group (amortized).
    #[default]
    Group,
}

// ------------------------------------------------------------------------------------------------
// CommitEnv
// ------------------------------------------------------------------------------------------------

/// The engine-side surface the pipeline drives.
///
/// Implemented by the engine handle; the pipeline stays free of
/// filesystem and version-set concerns.
pub trait CommitEnv: Send + Sync {
    /// Blocks while the engine is in write stall (too many immutable
    /// memtables). Called at Enqueue, before seqnum reservation.
    fn wait_for_stall(&self) -> Result<()>;

    /// Pairs the upcoming group with its target memtable and WAL
    /// segment, rotating both when the memtable would overflow.
    /// Runs under the engine mutex and must register the group's
    /// `batches` appliers on the returned memtable
    /// ([`Memtable::begin_applies`]) before releasing it, so the
    /// flush worker can never observe the memtable quiesced between
    /// pairing and apply.
    fn prepare_group(&self, group_bytes: usize, batches: usize) -> Result<Arc<Memtable>>;

    /// Appends the group's payloads to the current WAL per `mode`.
    fn wal_append(&self, payloads: &[&[u8]], mode: SyncMode) -> Result<()>;
}

// ------------------------------------------------------------------------------------------------
// Internal state
// ------------------------------------------------------------------------------------------------

/// One batch's entry in the publish queue.
struct PendingCommit {
    base: SeqNum,
    count: u32,
    applied: AtomicBool,
}

/// One batch's entry in the WAL group queue.
struct GroupMember {
    payload: Vec<u8>,
    /// Set by the leader once the member's group is durable.
    wal_done: AtomicBool,
    /// Target memtable, set by the leader at pairing time.
    mem: Mutex<Option<Arc<Memtable>>>,
}

struct PipelineState {
    next_seq: SeqNum,
    publish_queue: VecDeque<Arc<PendingCommit>>,
    wal_queue: VecDeque<Arc<GroupMember>>,
    leader_active: bool,
    fatal: Option<String>,
}

// ------------------------------------------------------------------------------------------------
// CommitPipeline
// ------------------------------------------------------------------------------------------------

/// The engine's write sequencer.
pub struct CommitPipeline {
    state: Mutex<PipelineState>,
    /// Signals WAL-group completion to followers.
    group_cv: Condvar,
    /// Signals visibility advancement to publish waiters.
    publish_cv: Condvar,
    /// Last published (visible) sequence number.
    visible: AtomicU64,
}

impl CommitPipeline {
    /// Creates a pipeline resuming at `next_seq`, with everything at
    /// or below `visible` already published (recovery state).
    pub fn new(next_seq: SeqNum, visible: SeqNum) -> Self {
        Self {
            state: Mutex::new(PipelineState {
                next_seq,
                publish_queue: VecDeque::new(),
                wal_queue: VecDeque::new(),
                leader_active: false,
                fatal: None,
            }),
            group_cv: Condvar::new(),
            publish_cv: Condvar::new(),
            visible: AtomicU64::new(visible),
        }
    }

    /// The currently published sequence number. Reads capture this as
    /// their snapshot.
    pub fn visible_seq(&self) -> SeqNum {
        self.visible.load(Ordering::Acquire)
    }

    /// Rejects all future commits with `reason` (engine close or a
    /// fatal error elsewhere). In-flight commits drain with the error.
    pub fn reject_new(&self, reason: &str) {
        if let Ok(mut state) = self.state.lock() {
            if state.fatal.is_none() {
                state.fatal = Some(reason.to_string());
            }
        }
        self.group_cv.notify_all();
        self.publish_cv.notify_all();
    }

    /// Whether the pipeline has latched fatal.
    pub fn is_fatal(&self) -> bool {
        self.state
            .lock()
            .map(|s| s.fatal.is_some())
            .unwrap_or(true)
    }

    /// Commits a batch: assigns its seqnum range, makes it durable
    /// per `mode`, applies it, and returns once it is visible.
    ///
    /// Returns the batch's base sequence number.
    pub fn commit(
        &self,
        env: &dyn CommitEnv,
        batch: &mut Batch,
        mode: SyncMode,
    ) -> Result<SeqNum> {
        if batch.is_empty() {
            return Ok(self.visible_seq());
        }

        // Stage 1a: backpressure, before any reservation.
        env.wait_for_stall()?;

        // Stage 1b: Enqueue — reserve seqnums, join the WAL queue.
        let (pending, member, leader) = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| Error::Invariant("commit pipeline mutex poisoned".into()))?;
            if let Some(reason) = &state.fatal {
                return Err(Error::Closed(reason.clone()));
            }

            let base = state.next_seq;
            state.next_seq += batch.count() as u64;
            batch.set_base_seq(base);

            let pending = Arc::new(PendingCommit {
                base,
                count: batch.count(),
                applied: AtomicBool::new(false),
            });
            state.publish_queue.push_back(Arc::clone(&pending));

            let member = Arc::new(GroupMember {
                payload: batch.repr().to_vec(),
                wal_done: AtomicBool::new(false),
                mem: Mutex::new(None),
            });
            state.wal_queue.push_back(Arc::clone(&member));

            let leader = !state.leader_active;
            if leader {
                state.leader_active = true;
            }
            trace!(base, count = batch.count(), leader, "batch enqueued");
            (pending, member, leader)
        };

        // Stage 2: WAL. The leader drains groups until the queue is
        // empty; followers wait for their member's signal.
        if leader {
            self.run_leader(env, mode)?;
        }
        self.wait_wal_done(&member)?;

        // Stage 3: apply at the reserved seqnums, in parallel with
        // other committers.
        let mem = member
            .mem
            .lock()
            .map_err(|_| Error::Invariant("group member mutex poisoned".into()))?
            .clone()
            .ok_or_else(|| Error::Invariant("WAL group completed without memtable".into()))?;

        let apply_result = mem.apply(batch, pending.base);
        mem.finish_apply();
        if let Err(e) = apply_result {
            let msg = format!("memtable apply failed: {e}");
            error!(base = pending.base, error = %msg, "commit pipeline fatal");
            self.latch_fatal(&msg);
            return Err(Error::Invariant(msg));
        }

        // Stage 4: publish contiguously and wait for visibility.
        self.publish(&pending)
    }

    /// Leader loop: repeatedly drain the WAL queue as one group,
    /// pair it, write it, and signal its members.
    fn run_leader(&self, env: &dyn CommitEnv, mode: SyncMode) -> Result<()> {
        loop {
            let members: Vec<Arc<GroupMember>> = {
                let mut state = self
                    .state
                    .lock()
                    .map_err(|_| Error::Invariant("commit pipeline mutex poisoned".into()))?;
                if state.wal_queue.is_empty() {
                    state.leader_active = false;
                    return Ok(());
                }
                state.wal_queue.drain(..).collect()
            };

            let group_bytes: usize = members.iter().map(|m| m.payload.len()).sum();
            let result = env.prepare_group(group_bytes, members.len()).and_then(|mem| {
                let payloads: Vec<&[u8]> =
                    members.iter().map(|m| m.payload.as_slice()).collect();
                env.wal_append(&payloads, mode).inspect_err(|_| {
                    // The group never pairs; release its claims.
                    for _ in 0..members.len() {
                        mem.finish_apply();
                    }
                })?;
                Ok(mem)
            });

            match result {
                Ok(mem) => {
                    for m in &members {
                        if let Ok(mut slot) = m.mem.lock() {
                            *slot = Some(Arc::clone(&mem));
                        }
                        m.wal_done.store(true, Ordering::Release);
                    }
                    self.group_cv.notify_all();
                }
                Err(e) => {
                    let msg = format!("WAL append failed: {e}");
                    error!(error = %msg, "commit pipeline fatal");
                    self.latch_fatal(&msg);
                    return Err(e);
                }
            }
        }
    }

    fn wait_wal_done(&self, member: &GroupMember) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| Error::Invariant("commit pipeline mutex poisoned".into()))?;
        loop {
            if member.wal_done.load(Ordering::Acquire) {
                return Ok(());
            }
            if let Some(reason) = &state.fatal {
                return Err(Error::Closed(reason.clone()));
            }
            state = self
                .group_cv
                .wait(state)
                .map_err(|_| Error::Invariant("commit pipeline mutex poisoned".into()))?;
        }
    }

    /// Marks `pending` applied, ratchets the visible seqnum over every
    /// contiguous applied prefix, and blocks until `pending` itself is
    /// visible.
    fn publish(&self, pending: &Arc<PendingCommit>) -> Result<SeqNum> {
        pending.applied.store(true, Ordering::Release);

        let mut state = self
            .state
            .lock()
            .map_err(|_| Error::Invariant("commit pipeline mutex poisoned".into()))?;

        let mut advanced = false;
        while let Some(front) = state.publish_queue.front() {
            if !front.applied.load(Ordering::Acquire) {
                break;
            }
            let end = front.base + front.count as u64 - 1;
            self.visible.store(end, Ordering::Release);
            state.publish_queue.pop_front();
            advanced = true;
        }
        if advanced {
            self.publish_cv.notify_all();
        }

        let target = pending.base + pending.count as u64 - 1;
        loop {
            if self.visible.load(Ordering::Acquire) >= target {
                trace!(base = pending.base, visible = target, "batch visible");
                return Ok(pending.base);
            }
            if let Some(reason) = &state.fatal {
                return Err(Error::Closed(reason.clone()));
            }
            state = self
                .publish_cv
                .wait(state)
                .map_err(|_| Error::Invariant("commit pipeline mutex poisoned".into()))?;
        }
    }

    fn latch_fatal(&self, msg: &str) {
        if let Ok(mut state) = self.state.lock() {
            if state.fatal.is_none() {
                state.fatal = Some(msg.to_string());
            }
            state.leader_active = false;
        }
        self.group_cv.notify_all();
        self.publish_cv.notify_all();
    }
}

impl std::fmt::Debug for CommitPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitPipeline")
            .field("visible", &self.visible_seq())
            .finish_non_exhaustive()
    }
}

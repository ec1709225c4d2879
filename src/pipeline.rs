// Three-stage batch pipeline over a ring of three containers.
//
// Worker 1 reads bytes, worker 2 hashes them, worker 3 touches the map. At
// stage s worker 1 holds container s mod 3, worker 2 holds (s-1) mod 3 and
// worker 3 holds (s-2) mod 3, so each worker trails its upstream neighbor by
// exactly one batch and no two workers ever hold the same container:
//
//   stage 1              : W1(A)
//   stage 2              : W1(B) W2(A)
//   stage 3..batch_count : W1 W2 W3 on distinct containers
//   stage batch_count+1  : W2 W3            (W1 exhausted)
//   stage batch_count+2  : W3               (drain)
//
// The coordinator rendezvouses with every scheduled worker at each stage
// boundary: start signals fan out, then the coordinator blocks until each
// scheduled worker reports done. Locks protect only flag transitions, never
// the processing itself; a worker blocks only at its start-of-stage wait.

use std::sync::{Condvar, Mutex, TryLockError};

use crate::affinity::{self, Placement};
use crate::config::FilterConfig;

// ---------------------------------------------------------------------------
// Batch plan
// ---------------------------------------------------------------------------

/// Partition of a shingle stream into pipeline batches.
///
/// The last batch is not necessarily completely full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    shingle_count: u64,
    batch_size: usize,
    batch_count: u32,
    last_batch_size: usize,
}

impl BatchPlan {
    pub fn new(shingle_count: u64, batch_size: usize) -> Self {
        debug_assert!(batch_size > 0);
        let full = (shingle_count / batch_size as u64) as u32;
        let remainder = (shingle_count % batch_size as u64) as usize;
        let (batch_count, last_batch_size) = if remainder > 0 {
            (full + 1, remainder)
        } else {
            (full, batch_size)
        };
        Self {
            shingle_count,
            batch_size,
            batch_count,
            last_batch_size,
        }
    }

    /// Total number of shingle slots (sum of all batch sizes).
    #[inline]
    pub fn shingle_count(&self) -> u64 {
        self.shingle_count
    }

    /// Size of a full batch.
    #[inline]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Total number of batches. The pipeline requires at least 3.
    #[inline]
    pub fn batch_count(&self) -> u32 {
        self.batch_count
    }

    /// Number of completely full batches, before the remainder rounds up.
    /// The demo-string hooks key off this count.
    #[inline]
    pub fn full_batch_count(&self) -> u32 {
        (self.shingle_count / self.batch_size as u64) as u32
    }

    /// Size of batch `batch_id` (1-based).
    #[inline]
    pub fn size_of(&self, batch_id: u32) -> usize {
        debug_assert!(batch_id >= 1 && batch_id <= self.batch_count);
        if batch_id == self.batch_count {
            self.last_batch_size
        } else {
            self.batch_size
        }
    }
}

// ---------------------------------------------------------------------------
// Containers
// ---------------------------------------------------------------------------

/// One slot of the three-deep container ring: a batch of input bytes plus
/// the hash arrays derived from them.
pub struct Container {
    /// Byte buffer: `batch_size + LC` bytes (carry prefix + fresh input).
    pub buf: Vec<u8>,
    /// Common fingerprints, one u64 per shingle slot.
    pub com: Vec<u64>,
    /// Diversified fingerprints, byte-packed rows of DV, plus one scratch
    /// row for the hash engine's uniform roll step.
    pub div: Vec<u8>,
}

impl Container {
    fn new(batch_size: usize, carry_len: usize, filter_count: usize) -> Self {
        Self {
            buf: vec![0u8; batch_size + carry_len],
            com: vec![0u64; batch_size],
            div: vec![0u8; (batch_size + 1) * filter_count],
        }
    }
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

/// A pipeline stage: processes one batch per rendezvous, in batch order.
pub trait BatchWorker: Send {
    fn process(&mut self, batch_id: u32, batch_size: usize, container: &mut Container);
}

/// Stage identity: placement plus the documented per-container exit codes.
#[derive(Debug, Clone, Copy)]
enum Role {
    Reader,
    Hasher,
    MapAccess,
}

impl Role {
    fn placement(self) -> Placement {
        match self {
            Role::Reader | Role::Hasher => Placement::Shared,
            Role::MapAccess => Placement::Isolated,
        }
    }

    /// Exit code for a busy-container violation on ring slot `slot`.
    fn busy_exit_code(self, slot: usize) -> i32 {
        match self {
            Role::Reader => [13, 15, 17][slot],
            Role::Hasher => [19, 20, 21][slot],
            Role::MapAccess => [22, 23, 24][slot],
        }
    }
}

/// Exit code for a short read in the reader on ring slot `slot`.
pub(crate) fn short_read_exit_code(slot: usize) -> i32 {
    [14, 16, 18][slot]
}

/// Ring slot for a 1-based batch id.
#[inline]
pub(crate) fn ring_slot(batch_id: u32) -> usize {
    ((batch_id - 1) % 3) as usize
}

/// Terminate the process with a documented exit code.
///
/// Used for failures detected mid-pipeline, where no recoverable state
/// remains and unwinding would leave the rendezvous peers blocked forever.
pub(crate) fn fatal(code: i32, msg: &str) -> ! {
    log::error!("{msg}");
    std::process::exit(code);
}

// ---------------------------------------------------------------------------
// Rendezvous
// ---------------------------------------------------------------------------

/// Bi-directional coordinator/worker rendezvous: a "go" flag the worker
/// sleeps on and a "done" flag the coordinator sleeps on.
struct Rendezvous {
    go: Mutex<bool>,
    go_cv: Condvar,
    done: Mutex<bool>,
    done_cv: Condvar,
}

impl Rendezvous {
    fn new() -> Self {
        Self {
            go: Mutex::new(false),
            go_cv: Condvar::new(),
            done: Mutex::new(false),
            done_cv: Condvar::new(),
        }
    }

    fn start(&self) {
        *lock_flag(&self.go) = true;
        self.go_cv.notify_one();
    }

    fn wait_start(&self) {
        let mut go = lock_flag(&self.go);
        while !*go {
            go = wait_flag(&self.go_cv, go);
        }
        *go = false;
    }

    fn signal_done(&self) {
        *lock_flag(&self.done) = true;
        self.done_cv.notify_one();
    }

    fn wait_done(&self) {
        let mut done = lock_flag(&self.done);
        while !*done {
            done = wait_flag(&self.done_cv, done);
        }
        *done = false;
    }
}

// Flag mutexes carry no invariants beyond the boolean itself, so a poisoned
// lock (a panicking peer) is recoverable for the purpose of shutting down.
fn lock_flag(flag: &Mutex<bool>) -> std::sync::MutexGuard<'_, bool> {
    flag.lock().unwrap_or_else(|e| e.into_inner())
}

fn wait_flag<'a>(
    cv: &Condvar,
    guard: std::sync::MutexGuard<'a, bool>,
) -> std::sync::MutexGuard<'a, bool> {
    cv.wait(guard).unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// The coordinator: owns the container ring and drives the stage schedule.
pub struct Pipeline {
    plan: BatchPlan,
    containers: [Mutex<Container>; 3],
}

impl Pipeline {
    pub fn new(cfg: &FilterConfig, plan: BatchPlan) -> Self {
        let make = || {
            Mutex::new(Container::new(
                plan.batch_size(),
                cfg.carry_len(),
                cfg.filter_count,
            ))
        };
        Self {
            plan,
            containers: [make(), make(), make()],
        }
    }

    pub fn plan(&self) -> &BatchPlan {
        &self.plan
    }

    /// Run the full stage schedule, rendezvousing with each worker at every
    /// stage boundary. Returns when worker 3 has drained the last batch.
    ///
    /// Callers must have checked `plan.batch_count() >= 3`.
    pub fn run<R, H, M>(&self, reader: &mut R, hasher: &mut H, map_worker: &mut M)
    where
        R: BatchWorker,
        H: BatchWorker,
        M: BatchWorker,
    {
        debug_assert!(self.plan.batch_count() >= 3);
        let rendezvous = [Rendezvous::new(), Rendezvous::new(), Rendezvous::new()];
        let batch_count = self.plan.batch_count();

        std::thread::scope(|scope| {
            scope.spawn(|| self.worker_loop(reader, &rendezvous[0], Role::Reader));
            scope.spawn(|| self.worker_loop(hasher, &rendezvous[1], Role::Hasher));
            scope.spawn(|| self.worker_loop(map_worker, &rendezvous[2], Role::MapAccess));

            affinity::pin_current_thread(Placement::Shared);

            // Worker k joins at stage k and leaves after stage
            // batch_count + k - 1.
            for stage in 1..=batch_count + 2 {
                let scheduled = [
                    stage <= batch_count,
                    stage >= 2 && stage <= batch_count + 1,
                    stage >= 3,
                ];
                for (rdv, _) in rendezvous.iter().zip(scheduled).filter(|&(_, on)| on) {
                    rdv.start();
                }
                for (rdv, _) in rendezvous.iter().zip(scheduled).filter(|&(_, on)| on) {
                    rdv.wait_done();
                }
            }
        });
    }

    fn worker_loop<W: BatchWorker>(&self, worker: &mut W, rendezvous: &Rendezvous, role: Role) {
        affinity::pin_current_thread(role.placement());
        for batch_id in 1..=self.plan.batch_count() {
            rendezvous.wait_start();
            let slot = ring_slot(batch_id);
            let mut container = match self.containers[slot].try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::WouldBlock) | Err(TryLockError::Poisoned(_)) => fatal(
                    role.busy_exit_code(slot),
                    &format!("{role:?}: container {slot} busy at batch {batch_id}"),
                ),
            };
            worker.process(batch_id, self.plan.size_of(batch_id), &mut container);
            drop(container);
            rendezvous.signal_done();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn plan_exact_multiple() {
        let plan = BatchPlan::new(24, 8);
        assert_eq!(plan.batch_count(), 3);
        assert_eq!(plan.size_of(1), 8);
        assert_eq!(plan.size_of(3), 8);
        assert_eq!(plan.full_batch_count(), 3);
    }

    #[test]
    fn plan_with_remainder() {
        let plan = BatchPlan::new(26, 8);
        assert_eq!(plan.batch_count(), 4);
        assert_eq!(plan.size_of(3), 8);
        assert_eq!(plan.size_of(4), 2);
        assert_eq!(plan.full_batch_count(), 3);
    }

    #[test]
    fn plan_single_short_batch() {
        let plan = BatchPlan::new(5, 8);
        assert_eq!(plan.batch_count(), 1);
        assert_eq!(plan.size_of(1), 5);
    }

    #[test]
    fn ring_slot_cycles() {
        assert_eq!(ring_slot(1), 0);
        assert_eq!(ring_slot(2), 1);
        assert_eq!(ring_slot(3), 2);
        assert_eq!(ring_slot(4), 0);
    }

    /// Records (worker, batch_id) observations so the schedule is checkable.
    struct Recorder<'a> {
        worker: usize,
        seq: &'a AtomicU32,
        log: Vec<(u32, u32)>,
    }

    impl BatchWorker for Recorder<'_> {
        fn process(&mut self, batch_id: u32, batch_size: usize, container: &mut Container) {
            assert!(batch_size > 0);
            assert!(container.buf.len() >= batch_size);
            // Stamp the container so downstream stages can verify ordering.
            if self.worker == 1 {
                container.com[0] = batch_id as u64;
            } else {
                assert_eq!(container.com[0], batch_id as u64, "stale container contents");
            }
            self.log.push((batch_id, self.seq.fetch_add(1, Ordering::SeqCst)));
        }
    }

    fn run_recorded(shingles: u64, batch_size: usize) -> [Vec<(u32, u32)>; 3] {
        let cfg = FilterConfig {
            reference_len: shingles,
            batch_size,
            ..FilterConfig::default()
        };
        let plan = BatchPlan::new(shingles, batch_size);
        let pipeline = Pipeline::new(&cfg, plan);
        let seq = AtomicU32::new(0);
        let mut w1 = Recorder { worker: 1, seq: &seq, log: Vec::new() };
        let mut w2 = Recorder { worker: 2, seq: &seq, log: Vec::new() };
        let mut w3 = Recorder { worker: 3, seq: &seq, log: Vec::new() };
        pipeline.run(&mut w1, &mut w2, &mut w3);
        [w1.log, w2.log, w3.log]
    }

    #[test]
    fn all_workers_see_every_batch_in_order() {
        let [l1, l2, l3] = run_recorded(40, 8); // 5 batches
        for log in [&l1, &l2, &l3] {
            let ids: Vec<u32> = log.iter().map(|&(id, _)| id).collect();
            assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        }
    }

    #[test]
    fn downstream_workers_trail_by_one_batch() {
        let [l1, l2, l3] = run_recorded(32, 8); // 4 batches
        // W2 processes batch b only after W1 finished batch b, and W3 only
        // after W2 finished it; sequence numbers are globally ordered.
        for (&(b1, s1), &(b2, s2)) in l1.iter().zip(&l2) {
            assert_eq!(b1, b2);
            assert!(s2 > s1, "hasher overtook reader on batch {b1}");
        }
        for (&(b2, s2), &(b3, s3)) in l2.iter().zip(&l3) {
            assert_eq!(b2, b3);
            assert!(s3 > s2, "map worker overtook hasher on batch {b2}");
        }
    }

    #[test]
    fn minimum_depth_pipeline_runs() {
        let [l1, _, l3] = run_recorded(24, 8); // exactly 3 batches
        assert_eq!(l1.len(), 3);
        assert_eq!(l3.len(), 3);
    }
}

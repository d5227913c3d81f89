//! Fixed worker pool for per-stage work.
//!
//! The pool owns `n_workers - 1` OS threads; the thread that calls
//! [`ThreadPool::run`] acts as the last worker, so a pool of size one runs
//! everything inline. Tasks are closures of the worker id; stage indices
//! are handed out through a shared atomic counter owned by the caller, so
//! any worker may claim any stage.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};

type Task = &'static (dyn Fn(usize) + Sync);

pub struct ThreadPool {
    task_tx: Vec<Sender<Task>>,
    done_rx: Receiver<()>,
    handles: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Spawns `n_workers - 1` pool threads; `n_workers < 1` is treated as a
    /// caller-only pool. `priority` is a best-effort scheduling hint
    /// applied to the pool threads (linux only, ignored without the
    /// required privilege).
    pub fn new(n_workers: usize, priority: Option<i32>) -> Self {
        let n_spawned = n_workers.max(1) - 1;

        let (done_tx, done_rx) = bounded::<()>(n_spawned);
        let mut task_tx = Vec::with_capacity(n_spawned);
        let mut handles = Vec::with_capacity(n_spawned);
        for worker_id in 0..n_spawned {
            let (tx, rx) = unbounded::<Task>();
            let done = done_tx.clone();
            task_tx.push(tx);
            handles.push(std::thread::spawn(move || {
                set_thread_priority(priority);
                // Runs until the sender is dropped on pool shutdown.
                for task in rx.iter() {
                    task(worker_id);
                    let _ = done.send(());
                }
            }));
        }

        Self { task_tx, done_rx, handles }
    }

    /// Total number of workers, including the caller.
    pub fn n_workers(&self) -> usize {
        self.task_tx.len() + 1
    }

    /// Runs `task(worker_id)` once on every worker and blocks until all of
    /// them have finished. The caller participates with the last id.
    pub fn run(&self, task: &(dyn Fn(usize) + Sync)) {
        // SAFETY: the borrow is erased to hand the task to the pool
        // threads; `run` does not return before every worker has
        // acknowledged completion, so the reference never outlives the
        // actual closure.
        let task: Task = unsafe {
            std::mem::transmute::<&(dyn Fn(usize) + Sync), Task>(task)
        };

        for tx in &self.task_tx {
            tx.send(task).expect("pool thread exited prematurely");
        }
        task(self.task_tx.len());
        for _ in 0..self.task_tx.len() {
            self.done_rx.recv().expect("pool thread exited prematurely");
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.task_tx.clear();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(target_os = "linux")]
fn set_thread_priority(priority: Option<i32>) {
    if let Some(priority) = priority {
        let param = libc::sched_param { sched_priority: priority };
        unsafe {
            libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param);
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn set_thread_priority(_priority: Option<i32>) {}

/// Write-disjoint result arena for one parallel section.
///
/// Each slot is written by exactly one worker: slot indices are claimed
/// through [`TaskCounter`]-style atomic increments, so no two workers ever
/// hold the same index.
pub struct StageSlots<T> {
    slots: Vec<UnsafeCell<Option<T>>>,
}

// SAFETY: workers only touch disjoint slots (see `write`), so sharing the
// arena across threads is sound whenever the payload can be moved between
// threads.
unsafe impl<T: Send> Sync for StageSlots<T> {}

impl<T> StageSlots<T> {
    pub fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| UnsafeCell::new(None)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Stores the result for slot `index`.
    ///
    /// # Safety
    ///
    /// `index` must have been claimed exclusively by the calling worker
    /// (one `fetch_add` ticket per index) and must be written at most once
    /// per section.
    pub unsafe fn write(&self, index: usize, value: T) {
        unsafe { *self.slots[index].get() = Some(value) };
    }

    /// Consumes the arena; `None` entries mark stages that were never
    /// reached (e.g. a worker aborted on a provider failure).
    pub fn into_results(self) -> Vec<Option<T>> {
        self.slots.into_iter().map(UnsafeCell::into_inner).collect()
    }
}

/// Shared stage ticket dispenser for one parallel section.
pub struct TaskCounter {
    next: AtomicUsize,
}

impl TaskCounter {
    pub fn new() -> Self {
        Self { next: AtomicUsize::new(0) }
    }

    /// Claims the next stage index.
    pub fn next(&self) -> usize {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for TaskCounter {
    fn default() -> Self {
        Self::new()
    }
}

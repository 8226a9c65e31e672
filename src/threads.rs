//! The stage thread pool.
//!
//! One fixed-size pool of workers pulls integer task ids off a single
//! atomic counter until it runs dry. Results land in per-task slots and
//! are handed back in task order, so parallel runs reduce
//! deterministically and outputs stay byte-identical across runs.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, OnceLock,
    },
    time::Instant,
};

pub const MAX_THREADS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreadPriority {
    Low,
    #[default]
    Normal,
    High,
}

/// The one big lock. Anything shared that mutates during a parallel
/// region (counters, allocator stats, log output beyond the logger's
/// own lock) must hold this.
pub fn thread_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

pub fn default_thread_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_THREADS)
}

struct Progress {
    started: Instant,
    // (elapsed seconds, completed) samples for the estimate window
    window: Vec<(f64, usize)>,
    last_percent: usize,
}

struct WorkQueue {
    counter: AtomicUsize,
    count: usize,
    estimate: bool,
    progress: Mutex<Progress>,
}

impl WorkQueue {
    fn new(count: usize, estimate: bool) -> Self {
        Self {
            counter: AtomicUsize::new(0),
            count,
            estimate,
            progress: Mutex::new(Progress {
                started: Instant::now(),
                window: Vec::new(),
                last_percent: usize::MAX,
            }),
        }
    }

    /// Next task id, or None once the work is exhausted. Also ticks the
    /// pacifier line.
    fn get_work(&self) -> Option<usize> {
        let i = self.counter.fetch_add(1, Ordering::SeqCst);
        if i >= self.count {
            return None;
        }

        let mut progress = self.progress.lock().unwrap();
        let percent = i * 10 / self.count;
        if percent != progress.last_percent {
            progress.last_percent = percent;

            if self.estimate {
                let elapsed = progress.started.elapsed().as_secs_f64();
                progress.window.push((elapsed, i));
                // sliding window over the last handful of ticks
                if progress.window.len() > 8 {
                    progress.window.remove(0);
                }
                if let Some(remaining) = estimate_remaining(&progress.window, i, self.count) {
                    log::debug!("{}0%...(ETA {:.0}s)", percent, remaining);
                } else {
                    log::debug!("{}0%...", percent);
                }
            } else {
                log::debug!("{}0%...", percent);
            }
        }

        Some(i)
    }
}

fn estimate_remaining(window: &[(f64, usize)], done: usize, count: usize) -> Option<f64> {
    let (t0, w0) = *window.first()?;
    let (t1, w1) = *window.last()?;
    if w1 <= w0 || t1 <= t0 {
        return None;
    }
    let rate = (w1 - w0) as f64 / (t1 - t0);
    Some((count - done) as f64 / rate)
}

/// Runs `work(task)` for every task id in `0..count` across the pool
/// and returns the results in task-id order.
pub fn run_threads_on<T, F>(threads: usize, count: usize, estimate: bool, work: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync,
{
    let threads = threads.clamp(1, MAX_THREADS);
    let queue = WorkQueue::new(count, estimate);
    let results: Mutex<Vec<Option<T>>> = Mutex::new((0..count).map(|_| None).collect());

    std::thread::scope(|scope| {
        for _ in 0..threads.min(count.max(1)) {
            scope.spawn(|| {
                // drain into a local buffer; publish under the lock in
                // one go per task to keep lock traffic low
                while let Some(i) = queue.get_work() {
                    let result = work(i);
                    results.lock().unwrap()[i] = Some(result);
                }
            });
        }
    });

    results
        .into_inner()
        .unwrap()
        .into_iter()
        .map(|r| r.expect("internal error: worker skipped a task (please file an issue)"))
        .collect()
}

/// Applies the requested scheduling priority to the current process.
/// Best effort: silently a no-op where the platform API is missing.
pub fn set_priority(priority: ThreadPriority) {
    #[cfg(unix)]
    {
        let nice = match priority {
            ThreadPriority::Low => 10,
            ThreadPriority::Normal => return,
            ThreadPriority::High => -10,
        };
        // SAFETY: setpriority with PRIO_PROCESS/0 touches only this
        // process and cannot invalidate memory.
        unsafe {
            let _ = libc_setpriority(nice);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = priority;
    }
}

#[cfg(unix)]
unsafe fn libc_setpriority(nice: i32) -> i32 {
    extern "C" {
        fn setpriority(which: i32, who: u32, prio: i32) -> i32;
    }
    const PRIO_PROCESS: i32 = 0;
    setpriority(PRIO_PROCESS, 0, nice)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn results_come_back_in_task_order() {
        let results = run_threads_on(4, 100, false, |i| i * i);
        assert_eq!(results.len(), 100);
        for (i, r) in results.iter().enumerate() {
            assert_eq!(*r, i * i);
        }
    }

    #[test]
    fn zero_work_is_fine() {
        let results: Vec<usize> = run_threads_on(4, 0, false, |i| i);
        assert!(results.is_empty());
    }

    #[test]
    fn single_thread_matches_parallel() {
        let serial = run_threads_on(1, 37, false, |i| i as u64 * 3 + 1);
        let parallel = run_threads_on(8, 37, false, |i| i as u64 * 3 + 1);
        assert_eq!(serial, parallel);
    }

    #[test]
    fn shared_accumulator_under_thread_lock() {
        let total = Mutex::new(0u64);
        run_threads_on(4, 50, false, |i| {
            let _guard = thread_lock().lock().unwrap();
            *total.lock().unwrap() += i as u64;
        });
        assert_eq!(*total.lock().unwrap(), (0..50).sum::<u64>());
    }
}

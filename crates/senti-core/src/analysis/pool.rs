use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Run `f` over every job with at most `max_in_flight` running at once.
///
/// Excess jobs wait in a queue; nothing is rejected. Results come back in
/// job order.
pub fn run_bounded<T, R, F>(jobs: Vec<T>, max_in_flight: usize, f: F) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync,
{
    let total = jobs.len();
    if total == 0 {
        return Vec::new();
    }
    let workers = max_in_flight.clamp(1, total);
    if workers == 1 {
        return jobs.into_iter().map(f).collect();
    }

    let queue: Mutex<VecDeque<(usize, T)>> = Mutex::new(jobs.into_iter().enumerate().collect());
    let results: Mutex<Vec<Option<R>>> = Mutex::new((0..total).map(|_| None).collect());

    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| {
                loop {
                    // Pop under the lock, run outside it.
                    let next = queue.lock().pop_front();
                    let Some((index, job)) = next else { break };
                    let out = f(job);
                    results.lock()[index] = Some(out);
                }
            });
        }
    });

    // Every slot was filled: each queued job was popped by exactly one worker
    // and scope() joined them all.
    results.into_inner().into_iter().flatten().collect()
}

/// Run `f` on its own thread and wait at most `timeout` for it.
///
/// Returns `None` on timeout. The thread is detached and its late result is
/// discarded when it finishes.
pub fn call_with_timeout<R, F>(timeout: Duration, f: F) -> Option<R>
where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // The receiver may be gone after a timeout.
        let _ = tx.send(f());
    });
    rx.recv_timeout(timeout).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[test]
    fn test_results_in_job_order() {
        let out = run_bounded((0..50u32).collect(), 4, |n: u32| {
            thread::sleep(Duration::from_millis(u64::from(n % 3)));
            n * 2
        });
        assert_eq!(out, (0..50u32).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_never_exceeds_bound() {
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        run_bounded((0..24).collect::<Vec<u32>>(), 3, |_| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(10));
            active.fetch_sub(1, Ordering::SeqCst);
        });
        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency {peak}");
        assert!(peak >= 2, "work never ran in parallel");
    }

    #[test]
    fn test_empty_and_zero_bound() {
        let out: Vec<u32> = run_bounded(Vec::<u32>::new(), 4, |n| n);
        assert!(out.is_empty());
        assert_eq!(run_bounded(vec![1, 2, 3], 0, |n: u32| n + 1), vec![2, 3, 4]);
    }

    #[test]
    fn test_call_with_timeout() {
        assert_eq!(call_with_timeout(Duration::from_secs(5), || 7), Some(7));

        let start = Instant::now();
        let late = call_with_timeout(Duration::from_millis(50), || {
            thread::sleep(Duration::from_secs(2));
            1
        });
        assert_eq!(late, None);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}

use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handles of every background thread, shared so workers can spawn workers.
#[derive(Clone, Default)]
pub struct WorkerSet {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl WorkerSet {
    fn lock(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn spawn<F>(&self, name: &str, job: F) -> io::Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new().name(name.to_string()).spawn(job)?;
        let mut handles = self.lock();
        handles.retain(|handle| !handle.is_finished());
        handles.push(handle);
        Ok(())
    }

    pub fn active(&self) -> usize {
        self.lock().iter().filter(|handle| !handle.is_finished()).count()
    }

    /// Waits up to `timeout` for every worker, returning how many were
    /// abandoned still running.
    pub fn join_all(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        while self.active() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        let handles: Vec<JoinHandle<()>> = self.lock().drain(..).collect();
        let mut abandoned = 0;
        for handle in handles {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                abandoned += 1;
            }
        }
        abandoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_shared_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn join_all_waits_for_short_workers() {
        let workers = WorkerSet::default();
        workers
            .spawn("short", || thread::sleep(Duration::from_millis(30)))
            .unwrap();
        assert_eq!(workers.join_all(Duration::from_secs(2)), 0);
        assert_eq!(workers.active(), 0);
    }

    #[test]
    fn join_all_abandons_workers_past_the_deadline() {
        let workers = WorkerSet::default();
        let token = CancellationToken::new();
        let seen = token.clone();
        workers
            .spawn("stuck", move || {
                while !seen.is_cancelled() {
                    thread::sleep(Duration::from_millis(5));
                }
            })
            .unwrap();
        assert_eq!(workers.join_all(Duration::from_millis(50)), 1);
        token.cancel();
    }
}

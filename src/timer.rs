//! Cancellable one-shot timer backing the relay auto-off table.

use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

/// Runs a closure once after a delay unless cancelled first.
///
/// Dropping the handle cancels the timer; cancelling after the closure has
/// started running has no effect, matching a fired timer.
pub struct OneShot {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl OneShot {
    pub fn start<F>(delay: Duration, func: F) -> OneShot
    where
        F: FnOnce() + Send + 'static,
    {
        let state = Arc::new((Mutex::new(false), Condvar::new()));
        let thread_state = Arc::clone(&state);
        thread::spawn(move || {
            let (lock, cvar) = &*thread_state;
            let cancelled = lock.lock().expect("timer state poisoned");
            let (cancelled, _timeout) = cvar
                .wait_timeout_while(cancelled, delay, |cancelled| !*cancelled)
                .expect("timer state poisoned");
            let fire = !*cancelled;
            drop(cancelled);
            if fire {
                func();
            }
        });
        OneShot { state }
    }

    pub fn cancel(&self) {
        let (lock, cvar) = &*self.state;
        if let Ok(mut cancelled) = lock.lock() {
            *cancelled = true;
        }
        cvar.notify_all();
    }
}

impl Drop for OneShot {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn fires_once_after_delay() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let timer = OneShot::start(Duration::from_millis(50), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 0);
        thread::sleep(Duration::from_millis(300));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        drop(timer);
    }

    #[test]
    fn cancel_prevents_firing() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let timer = OneShot::start(Duration::from_secs(30), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        timer.cancel();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn drop_cancels() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        {
            let _timer = OneShot::start(Duration::from_millis(50), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        thread::sleep(Duration::from_millis(300));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}

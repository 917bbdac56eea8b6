//! SIGINT/SIGTERM handling for the interactive binary.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use signal_hook::iterator::{Handle, Signals};

/// Stops the signal thread when dropped.
pub struct SignalHookGuard {
    handle: Handle,
    thread: Option<JoinHandle<()>>,
}

impl Drop for SignalHookGuard {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Runs `cleanup` at most once when SIGINT or SIGTERM arrives.
pub fn install_signal_handlers<F>(cleanup: F) -> io::Result<SignalHookGuard>
where
    F: Fn() + Send + Sync + 'static,
{
    let cleanup = Arc::new(cleanup);
    let ran = Arc::new(AtomicBool::new(false));
    let mut signals = Signals::new([libc::SIGINT, libc::SIGTERM])?;
    let handle = signals.handle();

    let thread = thread::Builder::new()
        .name("signal-handler".to_string())
        .spawn(move || {
            for _ in signals.forever() {
                run_cleanup_once(&cleanup, &ran);
            }
        })?;

    Ok(SignalHookGuard {
        handle,
        thread: Some(thread),
    })
}

fn run_cleanup_once<F>(cleanup: &Arc<F>, ran: &AtomicBool)
where
    F: Fn() + Send + Sync + 'static + ?Sized,
{
    if !ran.swap(true, Ordering::SeqCst) {
        cleanup();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::run_cleanup_once;

    #[test]
    fn cleanup_runs_once_for_repeated_signals() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let cleanup = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let ran = AtomicBool::new(false);

        run_cleanup_once(&cleanup, &ran);
        run_cleanup_once(&cleanup, &ran);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

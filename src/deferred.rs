//! Background worker for deferred native-memory frees.
//!
//! Only [`NativeStore`](crate::store::native::NativeStore) uses this; mapped
//! regions must unmap synchronously because the OS may reuse the address
//! range immediately. The worker logs and swallows its own errors - it is
//! the one piece of the crate that reports through a side channel rather
//! than a `Result`.

use std::sync::mpsc::{self, Sender};
use std::sync::OnceLock;
use std::thread;

type Job = Box<dyn FnOnce() + Send + 'static>;

static SENDER: OnceLock<Sender<Job>> = OnceLock::new();

fn sender() -> &'static Sender<Job> {
    SENDER.get_or_init(|| {
        let (tx, rx) = mpsc::channel::<Job>();
        thread::Builder::new()
            .name("chronobytes-deferred-free".into())
            .spawn(move || {
                for job in rx {
                    job();
                }
            })
            .expect("failed to spawn deferred-free worker");
        tx
    })
}

/// Enqueues a deallocation job to run on the background worker.
///
/// The caller must have already made the memory inaccessible through the
/// store's public API (e.g. by nulling an `AtomicPtr`) before calling this,
/// since the job may run arbitrarily late.
pub fn defer(job: impl FnOnce() + Send + 'static) {
    // The channel only errs if the receiver was dropped, which never
    // happens for the 'static worker thread spawned above; if it somehow
    // did, running the job inline still frees the memory rather than
    // leaking it.
    if let Err(mpsc::SendError(job)) = sender().send(Box::new(job)) {
        job();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn runs_on_worker_thread() {
        let done = Arc::new(AtomicBool::new(false));
        let done2 = done.clone();
        defer(move || done2.store(true, Ordering::SeqCst));

        for _ in 0..100 {
            if done.load(Ordering::SeqCst) {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("deferred job did not run in time");
    }
}

use crossbeam::channel::{self, Sender};
use std::{
    any::Any,
    io,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread::{self, JoinHandle},
};

/// Queued jobs allowed per worker before [`ThreadPool::submit`] blocks.
pub(crate) const QUEUE_PER_WORKER: usize = 64;

/// Fixed set of worker threads consuming jobs from one bounded queue.
///
/// A full queue blocks the submitter, so the accept loop stops taking
/// connections while every worker is busy. A panicking job is logged and dropped; the worker keeps going. Dropping
/// the pool closes the queue and waits for queued and running jobs.
pub(crate) struct ThreadPool<J: Send + 'static> {
    sender: Option<Sender<J>>,
    workers: Vec<JoinHandle<()>>,
}

impl<J: Send + 'static> ThreadPool<J> {
    pub(crate) fn new<F>(size: usize, work: F) -> io::Result<Self>
    where
        F: Fn(J) + Send + Sync + 'static,
    {
        let size = size.max(1);
        let (sender, receiver) = channel::bounded::<J>(size * QUEUE_PER_WORKER);
        let work = Arc::new(work);

        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            let receiver = receiver.clone();
            let work = work.clone();

            let handle = thread::Builder::new()
                .name(format!("trellis-worker-{id}"))
                .spawn(move || {
                    for job in receiver.iter() {
                        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| work(job))) {
                            log::error!("worker {id}: job panicked: {}", panic_message(&*payload));
                        }
                    }
                })?;
            workers.push(handle);
        }

        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    /// Queues a job, waiting for room when the queue is full.
    ///
    /// The job is handed back when the pool is shutting down.
    #[inline]
    pub(crate) fn submit(&self, job: J) -> Result<(), J> {
        match &self.sender {
            Some(sender) => sender.send(job).map_err(|err| err.into_inner()),
            None => Err(job),
        }
    }

    #[cfg(test)]
    fn size(&self) -> usize {
        self.workers.len()
    }

    #[cfg(test)]
    fn is_full(&self) -> bool {
        self.sender.as_ref().is_some_and(Sender::is_full)
    }

    /// Closes the queue and waits for every worker to finish.
    pub(crate) fn join(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl<J: Send + 'static> Drop for ThreadPool<J> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    match payload.downcast_ref::<&'static str>() {
        Some(message) => *message,
        None => payload
            .downcast_ref::<String>()
            .map_or("unknown panic", String::as_str),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    #[test]
    fn runs_every_job() {
        let done = Arc::new(AtomicUsize::new(0));
        let counter = done.clone();
        let pool = ThreadPool::new(4, move |n: usize| {
            counter.fetch_add(n, Ordering::SeqCst);
        })
        .unwrap();
        assert_eq!(pool.size(), 4);

        for n in 1..=100 {
            pool.submit(n).unwrap();
        }
        pool.join();

        assert_eq!(done.load(Ordering::SeqCst), 5050);
    }

    #[test]
    fn survives_panics() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let pool = ThreadPool::new(1, move |n: u32| {
            if n % 2 == 0 {
                panic!("even job {n}");
            }
            log.lock().unwrap().push(n);
        })
        .unwrap();

        for n in 1..=5 {
            pool.submit(n).unwrap();
        }
        drop(pool);

        assert_eq!(*seen.lock().unwrap(), [1, 3, 5]);
    }

    #[test]
    fn queue_is_bounded() {
        let (started_tx, started) = channel::bounded::<()>(1);
        let (release, gate) = channel::bounded::<()>(0);
        let pool = ThreadPool::new(1, move |_: usize| {
            let _ = started_tx.try_send(());
            let _ = gate.recv();
        })
        .unwrap();

        pool.submit(0).unwrap();
        started.recv().unwrap();

        for n in 1..=QUEUE_PER_WORKER {
            assert!(!pool.is_full(), "{n}");
            pool.submit(n).unwrap();
        }
        assert!(pool.is_full());

        drop(release);
        pool.join();
    }

    #[test]
    fn zero_size_gets_one_worker() {
        let pool = ThreadPool::new(0, |_: ()| {}).unwrap();
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn panic_messages() {
        let payload = panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(&*payload), "static");

        let payload = panic::catch_unwind(|| panic!("formatted {}", 7)).unwrap_err();
        assert_eq!(panic_message(&*payload), "formatted 7");

        let payload = panic::catch_unwind(|| std::panic::panic_any(42u8)).unwrap_err();
        assert_eq!(panic_message(&*payload), "unknown panic");
    }
}

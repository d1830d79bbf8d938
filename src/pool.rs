/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Worker threads that run method bodies, continuations and rollbacks.
//!
//! A pool with a positive size runs that many long-lived workers which take jobs from a shared channel.
//! A pool of size zero spawns a fresh thread for every job.
//!
//! A job may block on work it submits itself, for example a method body waiting for the continuation of
//! a nested call. Jobs submitted from one of the pool's own workers therefore run on a thread of their
//! own instead of queueing behind their submitter, and so do the continuations of calls issued from a
//! worker. Call control loops and connection readers never run on a pool: see [spawn_dedicated].

use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

type Job = Box<dyn FnOnce() + Send + 'static>;

static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    // Id of the fixed pool the current thread is a worker of, 0 elsewhere.
    static WORKER_OF: Cell<usize> = Cell::new(0);
}

/// Cloneable handle to a pool. Fixed workers stop once the [WorkerPool] and all of its handles are dropped.
#[derive(Clone)]
pub struct PoolHandle {
    id: usize,
    name: Arc<str>,
    jobs: Option<Sender<Job>>,
}

impl PoolHandle {
    /// Run `job` on the pool.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        match &self.jobs {
            Some(_) if self.is_own_worker() => spawn_detached(&self.name, Box::new(job)),
            Some(jobs) => {
                if let Err(mpsc::SendError(job)) = jobs.send(Box::new(job)) {
                    log::warn!("Worker pool {} has shut down, running job on a detached thread.", self.name);
                    spawn_detached(&self.name, job);
                }
            }
            None => spawn_detached(&self.name, Box::new(job)),
        }
    }

    /// Whether the calling thread is one of this pool's fixed workers.
    pub fn is_own_worker(&self) -> bool {
        WORKER_OF.with(|worker_of| worker_of.get() == self.id)
    }
}

pub struct WorkerPool {
    handle: PoolHandle,
    size: usize,
}

impl WorkerPool {
    /// Start a pool of `size` workers, or a thread-per-job pool if `size` is zero.
    pub fn new(name: &str, size: usize) -> WorkerPool {
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        if size == 0 {
            return WorkerPool {
                handle: PoolHandle {
                    id,
                    name: Arc::from(name),
                    jobs: None,
                },
                size: 0,
            };
        }

        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        for index in 0..size {
            let receiver = receiver.clone();
            thread::Builder::new()
                .name(format!("{}-{}", name, index))
                .spawn(move || worker(id, receiver))
                .expect("Programming error: failed to spawn worker thread.");
        }

        WorkerPool {
            handle: PoolHandle {
                id,
                name: Arc::from(name),
                jobs: Some(sender),
            },
            size,
        }
    }

    pub fn handle(&self) -> PoolHandle {
        self.handle.clone()
    }

    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        self.handle.execute(job)
    }

    /// Number of long-lived workers, zero for a thread-per-job pool.
    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Workers exit on their own once the last PoolHandle is dropped. The pool may be dropped from one
        // of its own jobs, so it never joins them.
        self.handle.jobs = None;
        log::debug!("Worker pool {} released by its owner.", self.handle.name);
    }
}

fn worker(pool_id: usize, jobs: Arc<Mutex<Receiver<Job>>>) {
    WORKER_OF.with(|worker_of| worker_of.set(pool_id));
    loop {
        let job = {
            let jobs = jobs.lock().expect("Programming error: job queue lock poisoned.");
            jobs.recv()
        };
        match job {
            Ok(job) => job(),
            Err(_) => return,
        }
    }
}

/// Run `job` on a named thread of its own, outside of any pool. Used for work that blocks for the whole
/// lifetime of a call.
pub(crate) fn spawn_dedicated(name: String, job: impl FnOnce() + Send + 'static) {
    if let Err(error) = thread::Builder::new().name(name.clone()).spawn(job) {
        log::error!("Failed to spawn thread {}: {}", name, error);
    }
}

fn spawn_detached(name: &str, job: Job) {
    if let Err(error) = thread::Builder::new()
        .name(format!("{}-task", name))
        .spawn(job)
    {
        log::error!("Failed to spawn a thread for pool {}: {}", name, error);
    }
}

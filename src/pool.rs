//! Fixed-size worker pool running connection handlers

use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed set of named threads pulling jobs from one channel.
///
/// Dropping the pool (or calling `join`) closes the channel and waits
/// until every queued job has run.
pub struct WorkerPool {
    name: String,
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers named `<name>-<n>`. A size of zero is raised to one.
    pub fn new(name: &str, size: usize) -> io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(size.max(1));
        for n in 0..size.max(1) {
            let receiver = Arc::clone(&receiver);
            let handle = thread::Builder::new()
                .name(format!("{name}-{n}"))
                .spawn(move || work(&receiver))?;
            workers.push(handle);
        }

        debug!(pool = name, size = workers.len(), "worker pool started");
        Ok(Self {
            name: name.to_owned(),
            sender: Some(sender),
            workers,
        })
    }

    /// Queue a job for the next free worker
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(sender) = &self.sender {
            if sender.send(Box::new(job)).is_err() {
                error!(pool = %self.name, "all workers have exited, job dropped");
            }
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Stop accepting jobs and wait for the queued ones to finish
    pub fn join(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        drop(self.sender.take());
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!(pool = %self.name, "worker panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn work(receiver: &Mutex<Receiver<Job>>) {
    loop {
        // the guard is released before the job runs
        let next = receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recv();
        match next {
            Ok(job) => job(),
            Err(_) => break,
        }
    }
}

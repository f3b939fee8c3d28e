//! Background workers that execute asynchronous operations.
//!
//! Submitted jobs run on a fixed set of named worker threads fed by a
//! `crossbeam-channel`. Shutdown stops accepting work, lets the workers finish
//! everything already accepted and joins them.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};

use super::error::{Error, Result};
use crate::config::EngineConfig;
use crate::logging::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    Stop,
}

struct EngineInner {
    sender: Sender<Message>,
    accepting: RwLock<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    config: EngineConfig,
}

/// Owner of the worker pool. Dropping it shuts the pool down.
pub struct Engine {
    inner: Arc<EngineInner>,
}

/// Cheap handle used by async handles to submit work.
#[derive(Clone)]
pub struct EngineHandle {
    inner: Arc<EngineInner>,
}

/// Proof that the engine accepts work; held while a job is being queued so
/// shutdown cannot slip in between the check and the send.
pub(crate) struct Permit<'a> {
    _accepting: RwLockReadGuard<'a, bool>,
    sender: &'a Sender<Message>,
}

impl Permit<'_> {
    pub fn submit<F>(self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // Workers outlive every permit, so the channel is still connected.
        let _ = self.sender.send(Message::Run(Box::new(job)));
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let (sender, receiver) = unbounded();
        let engine = Self {
            inner: Arc::new(EngineInner {
                sender,
                accepting: RwLock::new(true),
                workers: Mutex::new(Vec::with_capacity(config.worker_threads)),
                config,
            }),
        };

        for index in 0..engine.inner.config.worker_threads {
            if let Err(e) = engine.spawn_worker(index, receiver.clone()) {
                engine.shutdown();
                return Err(Error::Io(e));
            }
        }
        debug!(
            workers = engine.inner.config.worker_threads,
            "async i/o engine started"
        );
        Ok(engine)
    }

    /// Process-wide engine, started on first use from the default config plus
    /// environment overrides.
    pub fn global() -> Result<&'static Engine> {
        static GLOBAL: OnceLock<Engine> = OnceLock::new();
        if let Some(engine) = GLOBAL.get() {
            return Ok(engine);
        }
        let engine = Engine::new(EngineConfig::default().with_env_overrides()?)?;
        Ok(GLOBAL.get_or_init(|| engine))
    }

    fn spawn_worker(&self, index: usize, receiver: Receiver<Message>) -> std::io::Result<()> {
        let config = &self.inner.config;
        let mut builder =
            thread::Builder::new().name(format!("{}-worker-{}", config.thread_name_prefix, index));
        if let Some(size) = config.stack_size {
            builder = builder.stack_size(size);
        }
        let handle = builder.spawn(move || worker_loop(index, receiver))?;
        self.inner.workers.lock().push(handle);
        Ok(())
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn is_shutdown(&self) -> bool {
        !*self.inner.accepting.read()
    }

    /// Stop accepting work, finish what was accepted and join the workers.
    pub fn shutdown(&self) {
        {
            let mut accepting = self.inner.accepting.write();
            if !*accepting {
                return;
            }
            *accepting = false;
        }

        let workers: Vec<_> = self.inner.workers.lock().drain(..).collect();
        for _ in &workers {
            let _ = self.inner.sender.send(Message::Stop);
        }
        let current = thread::current().id();
        for worker in workers {
            if worker.thread().id() != current {
                let _ = worker.join();
            }
        }
        debug!("async i/o engine shut down");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl EngineHandle {
    /// Reserve the right to submit one job.
    pub(crate) fn permit(&self) -> Result<Permit<'_>> {
        let accepting = self.inner.accepting.read();
        if !*accepting {
            return Err(Error::EngineShutdown);
        }
        Ok(Permit {
            _accepting: accepting,
            sender: &self.inner.sender,
        })
    }

    pub fn is_shutdown(&self) -> bool {
        !*self.inner.accepting.read()
    }
}

#[cfg_attr(not(feature = "logging"), allow(unused_variables))]
fn worker_loop(index: usize, receiver: Receiver<Message>) {
    debug!(worker = index, "async i/o worker started");
    while let Ok(message) = receiver.recv() {
        match message {
            Message::Run(job) => {
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    warn!(worker = index, "async i/o job panicked");
                }
            }
            Message::Stop => break,
        }
    }
    debug!(worker = index, "async i/o worker stopped");
}

//! Adapter calls as pollable handles.
//!
//! Adapters are blocking. A `PendingCall` runs one call either inline (the
//! result is ready before `start` returns) or on a short-lived worker thread.
//! The session polls handles from its own thread; dropping a handle discards
//! whatever the worker eventually produces.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Run adapter calls on the session thread.
    #[default]
    Inline,
    /// Run each adapter call on its own worker thread.
    Threaded,
}

/// Poll result of a `PendingCall`.
#[derive(Debug)]
pub enum CallState<T> {
    Pending,
    Done(T),
    /// The worker went away without answering (panicked).
    Lost,
}

pub struct PendingCall<T> {
    inner: Inner<T>,
}

enum Inner<T> {
    Ready(Option<T>),
    Remote(Receiver<T>),
}

impl<T: Send + 'static> PendingCall<T> {
    pub fn start<F>(mode: ExecutionMode, name: &str, job: F) -> Result<Self>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        match mode {
            ExecutionMode::Inline => Ok(Self {
                inner: Inner::Ready(Some(job())),
            }),
            ExecutionMode::Threaded => {
                let (tx, rx) = mpsc::channel();
                thread::Builder::new()
                    .name(name.to_string())
                    .spawn(move || {
                        // Receiver may be gone if the session stopped.
                        let _ = tx.send(job());
                    })
                    .map_err(|e| anyhow!("failed to spawn {} worker: {}", name, e))?;
                Ok(Self {
                    inner: Inner::Remote(rx),
                })
            }
        }
    }
}

impl<T> PendingCall<T> {
    /// Non-blocking poll. After `Done` or `Lost` the handle is spent.
    pub fn poll(&mut self) -> CallState<T> {
        match &mut self.inner {
            Inner::Ready(slot) => match slot.take() {
                Some(value) => CallState::Done(value),
                None => CallState::Lost,
            },
            Inner::Remote(rx) => match rx.try_recv() {
                Ok(value) => CallState::Done(value),
                Err(TryRecvError::Empty) => CallState::Pending,
                Err(TryRecvError::Disconnected) => CallState::Lost,
            },
        }
    }

    /// Block up to `timeout` for the result.
    pub fn wait(&mut self, timeout: Duration) -> CallState<T> {
        if let Inner::Remote(rx) = &mut self.inner {
            return match rx.recv_timeout(timeout) {
                Ok(value) => CallState::Done(value),
                Err(RecvTimeoutError::Timeout) => CallState::Pending,
                Err(RecvTimeoutError::Disconnected) => CallState::Lost,
            };
        }
        self.poll()
    }
}

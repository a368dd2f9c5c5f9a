// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use crate::error::CegarError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Cooperative cancellation channel. Clones share the same flag, so a handle can be passed to
/// another thread that requests the shutdown while the analysis polls it at loop boundaries.
#[derive(Debug, Clone, Default)]
pub struct ShutdownNotifier {
    inner: Arc<Shared>,
}

#[derive(Debug, Default)]
struct Shared {
    requested: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl ShutdownNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only the first reason is kept.
    pub fn request_shutdown(&self, reason: impl Into<String>) {
        if let Ok(mut r) = self.inner.reason.lock() {
            if r.is_none() {
                *r = Some(reason.into());
            }
        }
        self.inner.requested.store(true, Ordering::SeqCst);
    }

    pub fn should_shutdown(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<String> {
        self.inner.reason.lock().ok().and_then(|r| r.clone())
    }

    pub fn check(&self) -> Result<(), CegarError> {
        if self.should_shutdown() {
            let reason = self.reason().unwrap_or_else(|| "shutdown requested".to_string());
            Err(CegarError::Cancelled(reason))
        } else {
            Ok(())
        }
    }
}

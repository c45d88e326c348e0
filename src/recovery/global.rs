//! Process-wide error funnels: the panic hook and supervised tasks.

use super::{AutoRecovery, ContextKind, ErrorContext};
use crate::error::{Error, Result};
use crate::utils::{absorb_async, is_absorbing};
use std::any::Any;
use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug)]
struct GlobalEvent {
    kind: ContextKind,
    message: String,
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl AutoRecovery {
    /// Chain a panic hook that forwards uncaught panics into `handle_error`
    /// with a `GlobalError` context. Panics raised inside an absorbing scope
    /// are already handled locally and are not forwarded. The previous hook
    /// still runs. Returns false if this instance already installed one.
    pub fn install_global_handlers(self: &Arc<Self>) -> bool {
        if self.global_installed.swap(true, Ordering::AcqRel) {
            return false;
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<GlobalEvent>();
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if is_absorbing() {
                previous(info);
                return;
            }
            let mut message = panic_message(info.payload());
            if let Some(location) = info.location() {
                message = format!("{} at {}:{}", message, location.file(), location.line());
            }
            // The receiver is gone once the recovery system is dropped.
            let _ = tx.send(GlobalEvent {
                kind: ContextKind::GlobalError,
                message,
            });
            previous(info);
        }));

        let weak = Arc::downgrade(self);
        let drain = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(recovery) = weak.upgrade() else { break };
                let context = ErrorContext::new(event.kind).component("global");
                recovery.handle_error(&Error::Panic(event.message), context).await;
            }
        });
        self.tasks.lock().push(drain);
        info!("Global error handlers installed");
        true
    }

    /// Spawn a task whose error or panic is routed into `handle_error`
    /// with an `UnhandledRejection` context instead of being lost.
    pub fn spawn_supervised<F>(self: &Arc<Self>, label: impl Into<String>, task: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let label = label.into();
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let error = match absorb_async(task).await {
                Ok(Ok(())) => return,
                Ok(Err(e)) => e,
                Err(payload) => Error::Panic(panic_message(payload.as_ref())),
            };
            warn!(task = %label, error = %error, "Supervised task failed");
            if let Some(recovery) = weak.upgrade() {
                let context = ErrorContext::new(ContextKind::UnhandledRejection).component(label);
                recovery.handle_error(&error, context).await;
            }
        })
    }
}

//! Registry mapping inbound method names to handlers.
//!
//! Handlers may be async (any `Fn(Method) -> impl Future<Output = Option<Reply>>`)
//! or plain functions registered through
//! [`MethodDispatcher::add_sync_handler`]. Unknown names are an error only when
//! the sender expects a reply.

use crate::wire::{Method, Reply};
use crate::{Result, SocketError};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Handler for one inbound method name.
#[async_trait::async_trait]
pub trait MethodHandler: Send + Sync + 'static {
    /// Handle a decoded method and optionally produce a reply for it.
    async fn handle(&self, method: Method) -> Option<Reply>;
}

#[async_trait::async_trait]
impl<F, Fut> MethodHandler for F
where
    F: Fn(Method) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<Reply>> + Send + 'static,
{
    async fn handle(&self, method: Method) -> Option<Reply> {
        (self)(method).await
    }
}

/// Adapter running a synchronous function as a [`MethodHandler`].
struct SyncHandler<F>(F);

#[async_trait::async_trait]
impl<F> MethodHandler for SyncHandler<F>
where
    F: Fn(&Method) -> Option<Reply> + Send + Sync + 'static,
{
    async fn handle(&self, method: Method) -> Option<Reply> {
        (self.0)(&method)
    }
}

/// Method-name keyed handler table.
///
/// Registration is open so that methods unknown to this crate can still be
/// served. Lookups clone the handler out of the table before awaiting it, so a
/// handler may add or remove registrations while it runs.
#[derive(Default)]
pub struct MethodDispatcher {
    handlers: RwLock<HashMap<String, Arc<dyn MethodHandler>>>,
}

impl std::fmt::Debug for MethodDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodDispatcher")
            .field("methods", &self.method_names())
            .finish()
    }
}

impl MethodDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous handler for `name`.
    pub fn add_handler(&self, name: impl Into<String>, handler: impl MethodHandler) {
        let name = name.into();
        debug!("Registering handler for {}", name);
        self.write_handlers().insert(name, Arc::new(handler));
    }

    /// Register a synchronous handler.
    pub fn add_sync_handler<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(&Method) -> Option<Reply> + Send + Sync + 'static,
    {
        self.add_handler(name, SyncHandler(handler));
    }

    /// Remove the handler for `name`. Returns whether one was registered.
    pub fn remove_handler(&self, name: &str) -> bool {
        self.write_handlers().remove(name).is_some()
    }

    /// Whether a handler is registered for `name`.
    pub fn has_handler(&self, name: &str) -> bool {
        self.read_handlers().contains_key(name)
    }

    /// Registered method names, sorted.
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read_handlers().keys().cloned().collect();
        names.sort();
        names
    }

    /// Dispatch a method to its handler.
    ///
    /// Returns the handler's reply, `Ok(None)` for an unhandled discard method,
    /// or [`SocketError::UnknownMethod`] for an unhandled method that expects a
    /// reply. The caller turns that error into an error reply with
    /// [`SocketError::to_rpc_error`].
    pub async fn handle(&self, method: Method) -> Result<Option<Reply>> {
        let handler = self.read_handlers().get(&method.method).cloned();

        match handler {
            Some(handler) => Ok(handler.handle(method).await),
            None if method.discard => {
                debug!("No handler for discarded method {}", method.method);
                Ok(None)
            }
            None => Err(SocketError::UnknownMethod {
                method: method.method,
            }),
        }
    }

    fn read_handlers(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<dyn MethodHandler>>> {
        // A panicking handler never holds this lock, so poisoning is recoverable.
        self.handlers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_handlers(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<dyn MethodHandler>>> {
        self.handlers.write().unwrap_or_else(|e| e.into_inner())
    }
}

//! Service context: the pipeline, handler and dispatch policy shared by a
//! set of sessions, plus the registry of those sessions.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use metrics::{counter, gauge};
use tether_core::SessionId;
use tether_settings::{DispatchMode, DispatchSettings, TetherSettings};
use tracing::{debug, info};

use crate::dispatch::{
    DispatchPolicy, ExecutorDispatch, HandlerExecutor, InlineDispatch, OrderedExecutor,
    TokioExecutor,
};
use crate::errors::ServiceError;
use crate::filter::{FilterChain, FilterChainBuilder, IoFilter};
use crate::handler::IoHandler;
use crate::metrics::{SESSIONS_ACTIVE, SESSIONS_CREATED_TOTAL};
use crate::session::Session;
use crate::sink::TransportSink;

/// Shared context of an acceptor or connector.
pub struct IoService {
    name: String,
    chain: FilterChain,
    handler: Option<Arc<dyn IoHandler>>,
    dispatch: Arc<dyn DispatchPolicy>,
    sessions: DashMap<SessionId, Arc<Session>>,
}

impl IoService {
    /// Start building a service.
    pub fn builder(name: impl Into<String>) -> IoServiceBuilder {
        IoServiceBuilder::new(name)
    }

    pub(crate) fn assemble(
        name: String,
        chain: FilterChain,
        handler: Option<Arc<dyn IoHandler>>,
        dispatch: Arc<dyn DispatchPolicy>,
    ) -> Arc<Self> {
        info!(service = %name, stages = chain.len(), ?dispatch, "service built");
        Arc::new(Self {
            name,
            chain,
            handler,
            dispatch,
            sessions: DashMap::new(),
        })
    }

    /// Service name, used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pipeline shared by every session.
    pub fn filter_chain(&self) -> &FilterChain {
        &self.chain
    }

    /// Application handler, if any.
    pub fn handler(&self) -> Option<&Arc<dyn IoHandler>> {
        self.handler.as_ref()
    }

    /// Dispatch policy shared by every session.
    pub fn dispatch(&self) -> &Arc<dyn DispatchPolicy> {
        &self.dispatch
    }

    /// Create and register a session writing to `sink`.
    ///
    /// The handler's `session_created` runs inline on the calling thread
    /// before this returns.
    pub fn create_session(self: &Arc<Self>, sink: Arc<dyn TransportSink>) -> Arc<Session> {
        let session = Session::new(self, sink);
        let _ = self.sessions.insert(session.id(), Arc::clone(&session));
        counter!(SESSIONS_CREATED_TOTAL).increment(1);
        gauge!(SESSIONS_ACTIVE).increment(1.0);
        debug!(service = %self.name, session_id = %session.id(), "session created");
        session.notify_created();
        session
    }

    /// Snapshot of the registered sessions.
    pub fn managed_sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Registered session with `id`.
    pub fn managed_session(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|e| Arc::clone(e.value()))
    }

    /// Number of registered sessions.
    pub fn managed_session_count(&self) -> usize {
        self.sessions.len()
    }

    pub(crate) fn unregister(&self, id: SessionId) -> bool {
        let removed = self.sessions.remove(&id).is_some();
        if removed {
            gauge!(SESSIONS_ACTIVE).decrement(1.0);
            debug!(service = %self.name, session_id = %id, "session unregistered");
        }
        removed
    }
}

impl fmt::Debug for IoService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoService")
            .field("name", &self.name)
            .field("chain", &self.chain)
            .field("has_handler", &self.handler.is_some())
            .field("dispatch", &self.dispatch)
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

/// Builder for [`IoService`].
///
/// Dispatch is resolved at [`build`](Self::build), first match wins:
/// 1. an explicit [`dispatch`](Self::dispatch) policy
/// 2. an explicit [`executor`](Self::executor), which selects executor dispatch
/// 3. the dispatch settings: inline, or executor mode on the current tokio
///    runtime's blocking pool
///
/// Dispatch settings come from [`tether_settings::get_settings`] unless
/// [`with_settings`](Self::with_settings) supplies others.
///
/// With executor dispatch and `ordered` set (the default), the executor is
/// wrapped in an [`OrderedExecutor`] so each session's events reach the
/// handler in the order they happened.
pub struct IoServiceBuilder {
    name: String,
    chain: FilterChainBuilder,
    handler: Option<Arc<dyn IoHandler>>,
    dispatch: Option<Arc<dyn DispatchPolicy>>,
    executor: Option<Arc<dyn HandlerExecutor>>,
    settings: DispatchSettings,
}

impl IoServiceBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chain: FilterChain::builder(),
            handler: None,
            dispatch: None,
            executor: None,
            settings: tether_settings::get_settings().dispatch.clone(),
        }
    }

    /// Append a stage at the tail end of the pipeline.
    pub fn filter(self, filter: impl IoFilter + 'static) -> Result<Self, ServiceError> {
        self.filter_arc(Arc::new(filter))
    }

    /// Append a shared stage at the tail end of the pipeline.
    pub fn filter_arc(mut self, filter: Arc<dyn IoFilter>) -> Result<Self, ServiceError> {
        let _ = self.chain.add_last(filter)?;
        Ok(self)
    }

    /// Replace the pipeline with a prepared one.
    #[must_use]
    pub fn filter_chain(mut self, chain: FilterChainBuilder) -> Self {
        self.chain = chain;
        self
    }

    /// Application handler.
    #[must_use]
    pub fn handler(self, handler: impl IoHandler + 'static) -> Self {
        self.handler_arc(Arc::new(handler))
    }

    /// Shared application handler.
    #[must_use]
    pub fn handler_arc(mut self, handler: Arc<dyn IoHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Use `policy` as is.
    #[must_use]
    pub fn dispatch(mut self, policy: Arc<dyn DispatchPolicy>) -> Self {
        self.dispatch = Some(policy);
        self
    }

    /// Dispatch handler events to `executor`.
    #[must_use]
    pub fn executor(mut self, executor: Arc<dyn HandlerExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Take dispatch options from loaded settings.
    #[must_use]
    pub fn with_settings(mut self, settings: &TetherSettings) -> Self {
        self.settings = settings.dispatch.clone();
        self
    }

    /// Assemble the service.
    pub fn build(self) -> Result<Arc<IoService>, ServiceError> {
        let dispatch: Arc<dyn DispatchPolicy> = match (self.dispatch, self.executor) {
            (Some(policy), _) => policy,
            (None, Some(executor)) => Arc::new(ExecutorDispatch::new(order(executor, &self.settings))),
            (None, None) => match self.settings.mode {
                DispatchMode::Inline => Arc::new(InlineDispatch),
                DispatchMode::Executor => {
                    let executor = TokioExecutor::current().ok_or(ServiceError::NoExecutor)?;
                    Arc::new(ExecutorDispatch::new(order(
                        Arc::new(executor),
                        &self.settings,
                    )))
                }
            },
        };
        Ok(IoService::assemble(
            self.name,
            self.chain.build(),
            self.handler,
            dispatch,
        ))
    }
}

fn order(executor: Arc<dyn HandlerExecutor>, settings: &DispatchSettings) -> Arc<dyn HandlerExecutor> {
    if settings.ordered {
        Arc::new(OrderedExecutor::new(executor, settings.drain_batch))
    } else {
        executor
    }
}

impl fmt::Debug for IoServiceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoServiceBuilder")
            .field("name", &self.name)
            .field("chain", &self.chain)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::QueuedExecutor;
    use crate::sink::ChannelSink;
    use assert_matches::assert_matches;

    struct Pass(&'static str);

    impl IoFilter for Pass {
        fn name(&self) -> &str {
            self.0
        }
    }

    fn sink() -> Arc<dyn TransportSink> {
        Arc::new(ChannelSink::new().0)
    }

    #[test]
    fn inline_by_default() {
        let service = IoService::builder("test").build().unwrap();
        assert!(format!("{:?}", service.dispatch()).contains("InlineDispatch"));
        assert!(service.filter_chain().is_empty());
        assert!(service.handler().is_none());
    }

    #[test]
    fn duplicate_filter_fails_builder() {
        let result = IoService::builder("test")
            .filter(Pass("a"))
            .and_then(|b| b.filter(Pass("a")));
        assert_matches!(result, Err(ServiceError::DuplicateFilter(_)));
    }

    #[test]
    fn executor_mode_without_runtime_fails() {
        let mut settings = TetherSettings::default();
        settings.dispatch.mode = DispatchMode::Executor;
        let result = IoService::builder("test").with_settings(&settings).build();
        assert_matches!(result, Err(ServiceError::NoExecutor));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn executor_mode_uses_current_runtime() {
        let mut settings = TetherSettings::default();
        settings.dispatch.mode = DispatchMode::Executor;
        let service = IoService::builder("test").with_settings(&settings).build().unwrap();
        let debug = format!("{:?}", service.dispatch());
        assert!(debug.contains("OrderedExecutor"));
        assert!(debug.contains("TokioExecutor"));
    }

    #[test]
    fn explicit_executor_unordered() {
        let mut settings = TetherSettings::default();
        settings.dispatch.ordered = false;
        let service = IoService::builder("test")
            .with_settings(&settings)
            .executor(Arc::new(QueuedExecutor::new()))
            .build()
            .unwrap();
        let debug = format!("{:?}", service.dispatch());
        assert!(debug.contains("QueuedExecutor"));
        assert!(!debug.contains("OrderedExecutor"));
    }

    #[test]
    fn registry_tracks_sessions() {
        let service = IoService::builder("test").build().unwrap();
        let a = service.create_session(sink());
        let b = service.create_session(sink());
        assert_eq!(service.managed_session_count(), 2);
        assert!(b.id() > a.id());
        assert_eq!(service.managed_session(a.id()).unwrap().id(), a.id());

        assert!(service.unregister(a.id()));
        assert!(!service.unregister(a.id()));
        assert_eq!(service.managed_sessions().len(), 1);
    }

    #[test]
    fn sessions_share_the_chain() {
        let service = IoService::builder("test")
            .filter(Pass("a"))
            .unwrap()
            .build()
            .unwrap();
        let a = service.create_session(sink());
        let b = service.create_session(sink());
        assert!(std::ptr::eq(
            a.filter_chain().stages().as_ptr(),
            b.filter_chain().stages().as_ptr()
        ));
    }
}

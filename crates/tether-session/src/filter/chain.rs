//! Pipeline storage and per-traversal continuations.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tether_core::{BoxError, FailureOrigin, HookResult, Message, StageFailure, WriteRequest};
use tracing::debug;

use super::IoFilter;
use crate::errors::ServiceError;
use crate::handler::event;
use crate::session::Session;

/// Immutable, shareable filter pipeline.
#[derive(Clone)]
pub struct FilterChain {
    stages: Arc<[Arc<dyn IoFilter>]>,
}

impl FilterChain {
    /// Start building a pipeline.
    pub fn builder() -> FilterChainBuilder {
        FilterChainBuilder::default()
    }

    /// Pipeline with no stages.
    pub fn empty() -> Self {
        Self {
            stages: Arc::from(Vec::new()),
        }
    }

    /// Stages in index order.
    pub fn stages(&self) -> &[Arc<dyn IoFilter>] {
        &self.stages
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether there are no stages.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage names in index order.
    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Stage named `name`.
    pub fn get(&self, name: &str) -> Option<Arc<dyn IoFilter>> {
        self.stages.iter().find(|s| s.name() == name).cloned()
    }

    /// Run a lifecycle hook on every stage, first to last.
    pub(crate) fn fire_forward(
        &self,
        event: &'static str,
        mut hook: impl FnMut(&dyn IoFilter) -> HookResult,
    ) -> HookResult {
        for stage in self.stages.iter() {
            guard_stage(event, stage.as_ref(), || hook(stage.as_ref()))?;
        }
        Ok(())
    }

    /// Run a hook on every stage, last to first.
    pub(crate) fn fire_reverse(
        &self,
        event: &'static str,
        mut hook: impl FnMut(&dyn IoFilter) -> HookResult,
    ) -> HookResult {
        for stage in self.stages.iter().rev() {
            guard_stage(event, stage.as_ref(), || hook(stage.as_ref()))?;
        }
        Ok(())
    }
}

impl Default for FilterChain {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Builder for a [`FilterChain`]. Stage names must be unique.
#[derive(Default)]
pub struct FilterChainBuilder {
    stages: Vec<Arc<dyn IoFilter>>,
}

impl FilterChainBuilder {
    /// Append at the tail end (closest to the handler).
    pub fn add_last(&mut self, filter: Arc<dyn IoFilter>) -> Result<&mut Self, ServiceError> {
        self.check_unique(filter.as_ref())?;
        self.stages.push(filter);
        Ok(self)
    }

    /// Insert at index 0 (closest to the transport).
    pub fn add_first(&mut self, filter: Arc<dyn IoFilter>) -> Result<&mut Self, ServiceError> {
        self.check_unique(filter.as_ref())?;
        self.stages.insert(0, filter);
        Ok(self)
    }

    /// Insert directly before the stage named `base`.
    pub fn add_before(
        &mut self,
        base: &str,
        filter: Arc<dyn IoFilter>,
    ) -> Result<&mut Self, ServiceError> {
        let index = self.index_of(base)?;
        self.check_unique(filter.as_ref())?;
        self.stages.insert(index, filter);
        Ok(self)
    }

    /// Insert directly after the stage named `base`.
    pub fn add_after(
        &mut self,
        base: &str,
        filter: Arc<dyn IoFilter>,
    ) -> Result<&mut Self, ServiceError> {
        let index = self.index_of(base)?;
        self.check_unique(filter.as_ref())?;
        self.stages.insert(index + 1, filter);
        Ok(self)
    }

    /// Remove the stage named `name`. Returns whether it existed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.stages.len();
        self.stages.retain(|s| s.name() != name);
        self.stages.len() < before
    }

    /// Freeze into a shareable pipeline.
    pub fn build(&self) -> FilterChain {
        debug!(stages = ?self.stages.iter().map(|s| s.name()).collect::<Vec<_>>(), "filter chain built");
        FilterChain {
            stages: Arc::from(self.stages.clone()),
        }
    }

    fn index_of(&self, name: &str) -> Result<usize, ServiceError> {
        self.stages
            .iter()
            .position(|s| s.name() == name)
            .ok_or_else(|| ServiceError::UnknownFilter(name.to_string()))
    }

    fn check_unique(&self, filter: &dyn IoFilter) -> Result<(), ServiceError> {
        if self.stages.iter().any(|s| s.name() == filter.name()) {
            return Err(ServiceError::DuplicateFilter(filter.name().to_string()));
        }
        Ok(())
    }
}

impl fmt::Debug for FilterChainBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterChainBuilder")
            .field("stages", &self.stages.len())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Continuations
// ─────────────────────────────────────────────────────────────────────────────

/// Inbound continuation: the rest of the pipeline after the current stage.
///
/// Created fresh for every traversal, so concurrent traversals of the same
/// session never share a position.
pub struct ReadNext<'c> {
    session: &'c Arc<Session>,
    stages: &'c [Arc<dyn IoFilter>],
}

impl<'c> ReadNext<'c> {
    pub(crate) fn new(session: &'c Arc<Session>, stages: &'c [Arc<dyn IoFilter>]) -> Self {
        Self { session, stages }
    }

    /// Pass `message` to the next stage, or to the handler past the tail.
    ///
    /// A handler failure is reported to the exception path right here and
    /// never returned, so stages that emit several messages keep going and
    /// see the same outcome under every dispatch policy. Errors returned
    /// come from downstream stages only.
    pub fn call(&self, message: Message<'_>) -> HookResult {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                let next = ReadNext::new(self.session, rest);
                guard_stage(event::MESSAGE_RECEIVED, stage.as_ref(), || {
                    stage.message_received(self.session, message, &next)
                })
            }
            None => {
                if let Err(failure) = self.session.deliver_received(message) {
                    self.session.fire_exception(failure);
                }
                Ok(())
            }
        }
    }

    /// Stages left before the handler.
    pub fn remaining(&self) -> usize {
        self.stages.len()
    }
}

impl fmt::Debug for ReadNext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadNext")
            .field("session", &self.session.id())
            .field("remaining", &self.stages.len())
            .finish()
    }
}

/// Outbound continuation: the stages between the current one and the sink.
pub struct WriteNext<'c> {
    session: &'c Arc<Session>,
    stages: &'c [Arc<dyn IoFilter>],
}

impl<'c> WriteNext<'c> {
    pub(crate) fn new(session: &'c Arc<Session>, stages: &'c [Arc<dyn IoFilter>]) -> Self {
        Self { session, stages }
    }

    /// Pass `request` to the previous stage, or to the transport below index 0.
    pub fn call(&self, request: WriteRequest) -> HookResult {
        match self.stages.split_last() {
            Some((stage, rest)) => {
                let next = WriteNext::new(self.session, rest);
                guard_stage(event::MESSAGE_WRITING, stage.as_ref(), || {
                    stage.message_writing(self.session, request, &next)
                })
            }
            None => {
                self.session.sink().enqueue_for_write(request);
                Ok(())
            }
        }
    }

    /// Stages left before the transport.
    pub fn remaining(&self) -> usize {
        self.stages.len()
    }
}

impl fmt::Debug for WriteNext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteNext")
            .field("session", &self.session.id())
            .field("remaining", &self.stages.len())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Failure capture
// ─────────────────────────────────────────────────────────────────────────────

/// Run one stage hook, turning an error or panic into a [`StageFailure`]
/// attributed to that stage. Failures from further down pass through as is.
fn guard_stage(
    event: &'static str,
    stage: &dyn IoFilter,
    hook: impl FnOnce() -> HookResult,
) -> HookResult {
    let origin = || FailureOrigin::Stage(stage.name().to_string());
    match panic::catch_unwind(AssertUnwindSafe(hook)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) if err.is::<StageFailure>() => Err(err),
        Ok(Err(err)) => Err(Box::new(StageFailure::from_error(event, origin(), err))),
        Err(payload) => Err(Box::new(StageFailure::from_panic(event, origin(), &*payload))),
    }
}

/// Recover the [`StageFailure`] at a traversal boundary.
pub(crate) fn into_failure(event: &'static str, err: BoxError) -> StageFailure {
    match err.downcast::<StageFailure>() {
        Ok(failure) => *failure,
        Err(other) => StageFailure::from_error(event, FailureOrigin::Dispatch, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    struct Named(&'static str);

    impl IoFilter for Named {
        fn name(&self) -> &str {
            self.0
        }
    }

    fn named(name: &'static str) -> Arc<dyn IoFilter> {
        Arc::new(Named(name))
    }

    #[test]
    fn builder_positions() {
        let mut builder = FilterChain::builder();
        let _ = builder
            .add_last(named("codec"))
            .unwrap()
            .add_first(named("tls"))
            .unwrap()
            .add_after("codec", named("log"))
            .unwrap()
            .add_before("codec", named("compress"))
            .unwrap();
        let chain = builder.build();
        assert_eq!(chain.names(), vec!["tls", "compress", "codec", "log"]);
        assert_eq!(chain.len(), 4);
        assert!(chain.get("codec").is_some());
        assert!(chain.get("missing").is_none());
    }

    #[test]
    fn duplicate_name_rejected() {
        let mut builder = FilterChain::builder();
        let _ = builder.add_last(named("codec")).unwrap();
        assert_matches!(
            builder.add_last(named("codec")),
            Err(ServiceError::DuplicateFilter(name)) if name == "codec"
        );
    }

    #[test]
    fn unknown_base_rejected() {
        let mut builder = FilterChain::builder();
        assert_matches!(
            builder.add_before("nope", named("x")),
            Err(ServiceError::UnknownFilter(name)) if name == "nope"
        );
    }

    #[test]
    fn remove_stage() {
        let mut builder = FilterChain::builder();
        let _ = builder.add_last(named("a")).unwrap().add_last(named("b")).unwrap();
        assert!(builder.remove("a"));
        assert!(!builder.remove("a"));
        assert_eq!(builder.build().names(), vec!["b"]);
    }

    #[test]
    fn built_chain_is_unaffected_by_later_edits() {
        let mut builder = FilterChain::builder();
        let _ = builder.add_last(named("a")).unwrap();
        let chain = builder.build();
        let _ = builder.add_last(named("b")).unwrap();
        assert_eq!(chain.names(), vec!["a"]);
    }

    #[test]
    fn fire_order() {
        let mut builder = FilterChain::builder();
        let _ = builder
            .add_last(named("a"))
            .unwrap()
            .add_last(named("b"))
            .unwrap()
            .add_last(named("c"))
            .unwrap();
        let chain = builder.build();

        let mut seen = Vec::new();
        chain
            .fire_forward("session_opened", |s| {
                seen.push(s.name().to_string());
                Ok(())
            })
            .unwrap();
        chain
            .fire_reverse("message_sent", |s| {
                seen.push(s.name().to_string());
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, ["a", "b", "c", "c", "b", "a"]);
    }

    #[test]
    fn fire_stops_at_failing_stage() {
        let mut builder = FilterChain::builder();
        let _ = builder.add_last(named("a")).unwrap().add_last(named("b")).unwrap();
        let chain = builder.build();

        let mut seen = Vec::new();
        let err = chain
            .fire_forward("session_idle", |s| {
                seen.push(s.name().to_string());
                if s.name() == "a" { Err("nope".into()) } else { Ok(()) }
            })
            .unwrap_err();
        assert_eq!(seen, ["a"]);
        let failure = into_failure("session_idle", err);
        assert_eq!(failure.origin, FailureOrigin::Stage("a".into()));
        assert_eq!(failure.event, "session_idle");
    }

    #[test]
    fn fire_converts_panic() {
        let mut builder = FilterChain::builder();
        let _ = builder.add_last(named("boom")).unwrap();
        let chain = builder.build();

        let err = chain
            .fire_forward("session_closed", |_| panic!("stage exploded"))
            .unwrap_err();
        let failure = into_failure("session_closed", err);
        assert!(failure.panicked);
        assert_eq!(failure.message, "stage exploded");
        assert_eq!(failure.origin, FailureOrigin::Stage("boom".into()));
    }

    #[test]
    fn into_failure_wraps_foreign_error() {
        let failure = into_failure("message_received", "plain".into());
        assert_eq!(failure.origin, FailureOrigin::Dispatch);
        assert_eq!(failure.message, "plain");
    }
}

#![allow(missing_docs)]

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use assert_matches::assert_matches;
use common::{Recorder, RecordingSink};
use tether_core::logging::capture_logs;
use tether_core::{
    AttributeError, AttributeKey, IdleStatus, SessionId, SessionState, TransitionError, WriteError,
};
use tether_session::{IoService, Session};
use tracing::Level;

fn service() -> (Arc<IoService>, Arc<Recorder>) {
    let recorder = Recorder::new();
    let service = IoService::builder("test")
        .handler_arc(recorder.clone())
        .build()
        .unwrap();
    (service, recorder)
}

fn session() -> (Arc<IoService>, Arc<Session>, Arc<Recorder>, Arc<RecordingSink>) {
    let (service, recorder) = service();
    let sink = RecordingSink::new();
    let session = service.create_session(sink.clone());
    (service, session, recorder, sink)
}

// ─────────────────────────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn secure_then_fall_back_then_close() {
    let (_service, session, _recorder, _sink) = session();
    assert!(session.is_created());

    assert_eq!(session.transition(SessionState::Connected), Ok(SessionState::Created));
    assert!(session.is_connected());
    assert!(session.transition(SessionState::Securing).is_ok());
    assert!(session.is_securing());

    // no direct edge back from SECURING
    assert_eq!(
        session.transition(SessionState::Connected),
        Err(TransitionError {
            from: SessionState::Securing,
            to: SessionState::Connected,
        })
    );
    assert!(session.is_securing());

    assert!(session.transition(SessionState::Secured).is_ok());
    assert!(session.is_secured_state());
    assert!(session.transition(SessionState::Connected).is_ok());
    assert!(session.transition(SessionState::Closing).is_ok());
    assert!(session.is_closing());
    assert!(session.transition(SessionState::Closed).is_ok());
    assert!(session.is_closed());

    assert_matches!(
        session.transition(SessionState::Connected),
        Err(TransitionError { from: SessionState::Closed, .. })
    );
}

#[test]
fn secured_flag_is_independent_of_state() {
    let (_service, session, _recorder, _sink) = session();
    assert!(!session.is_secured());
    session.set_secured(true);
    assert!(session.is_secured());
    assert!(session.is_created());
}

#[test]
fn open_moves_to_connected_once() {
    let (_service, session, recorder, _sink) = session();
    assert!(!session.is_open());
    session.on_open();
    session.on_open();
    assert!(session.is_connected());
    assert!(session.is_open());
    assert_eq!(recorder.count("opened"), 1);
}

#[test]
fn open_after_close_is_ignored() {
    let (logs, _guard) = capture_logs();
    let (_service, session, recorder, _sink) = session();
    assert!(session.close());

    session.on_open();

    assert!(session.is_closing());
    assert_eq!(recorder.count("opened"), 0);
    assert!(logs.has_event(Level::WARN, "on_open ignored"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Writes
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn write_after_closing_is_rejected() {
    let (logs, _guard) = capture_logs();
    let (_service, session, _recorder, sink) = session();
    session.on_open();
    assert!(session.transition(SessionState::Closing).is_ok());

    let mut future = session.write_with_future(b"late".to_vec());
    session.write(b"later".to_vec());

    assert_eq!(sink.len(), 0);
    assert_eq!(
        future.try_result(),
        Some(Err(WriteError::Rejected {
            state: SessionState::Closing
        }))
    );
    let warnings = logs.find(Level::WARN, "write rejected");
    assert_eq!(warnings.len(), 2);
    assert_eq!(warnings[0].field("state"), Some("CLOSING"));
}

#[tokio::test]
async fn write_after_close_resolves_rejected() {
    let (_service, session, _recorder, sink) = session();
    session.on_open();
    session.on_close();

    let result = session.write_with_future(vec![1]).await;

    assert_eq!(
        result,
        Err(WriteError::Rejected {
            state: SessionState::Closed
        })
    );
    assert_eq!(sink.len(), 0);
}

#[tokio::test]
async fn accepted_write_resolves_when_transport_completes() {
    let (_service, session, _recorder, sink) = session();
    session.on_open();

    let future = session.write_with_future(vec![7, 7]);
    let mut requests = sink.take();
    assert_eq!(requests.len(), 1);
    let request = requests.remove(0);
    session.increment_written_bytes(request.message().byte_len().unwrap_or(0) as u64);
    request.complete();

    assert_eq!(future.await, Ok(()));
    assert_eq!(session.stats().written_bytes(), 2);
    assert!(session.stats().last_write_time() > 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Close
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn close_request_is_idempotent() {
    let (_service, session, _recorder, _sink) = session();
    session.on_open();
    assert!(session.close());
    assert!(!session.close());
    assert!(session.is_closing());
    assert!(!session.is_open());
}

#[test]
fn on_close_unregisters_once() {
    let (service, session, recorder, _sink) = session();
    let other = service.create_session(RecordingSink::new());
    session.on_open();
    assert_eq!(service.managed_session_count(), 2);

    session.on_close();
    session.on_close();

    assert!(session.is_closed());
    assert_eq!(recorder.count("closed"), 1);
    assert_eq!(service.managed_session_count(), 1);
    assert!(service.managed_session(session.id()).is_none());
    assert!(service.managed_session(other.id()).is_some());
}

#[test]
fn on_close_after_close_request() {
    let (service, session, recorder, _sink) = session();
    session.on_open();
    assert!(session.close());

    session.on_close();

    assert!(session.is_closed());
    assert_eq!(recorder.count("closed"), 1);
    assert_eq!(service.managed_session_count(), 0);
}

#[test]
fn on_close_after_external_closed_transition() {
    let (service, session, recorder, _sink) = session();
    session.on_open();
    assert!(session.transition(SessionState::Closing).is_ok());
    assert!(session.transition(SessionState::Closed).is_ok());
    assert_eq!(service.managed_session_count(), 1);

    session.on_close();
    session.on_close();

    assert!(session.is_closed());
    assert_eq!(recorder.count("closed"), 1);
    assert_eq!(service.managed_session_count(), 0);
}

#[test]
fn closing_session_still_reads_closed_session_drops() {
    let (_service, session, recorder, _sink) = session();
    session.on_open();
    assert!(session.close());

    session.on_message_received(b"in flight");
    assert_eq!(recorder.count("received"), 1);

    session.on_close();
    session.on_message_received(b"too late");
    session.on_idle(IdleStatus::BothIdle);
    assert_eq!(recorder.count("received"), 1);
    assert_eq!(recorder.count("idle:both idle"), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Identity and bookkeeping
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn created_notification_is_inline() {
    let (service, recorder) = service();
    let _session = service.create_session(RecordingSink::new());
    assert_eq!(recorder.events(), vec!["created"]);
}

#[test]
fn session_ids_increase_across_threads() {
    let handles: Vec<_> = (0..4)
        .map(|_| {
            thread::spawn(|| (0..250).map(|_| SessionId::next()).collect::<Vec<_>>())
        })
        .collect();

    let mut all = HashSet::new();
    for handle in handles {
        let ids = handle.join().unwrap();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        all.extend(ids);
    }
    assert_eq!(all.len(), 1000);
}

#[test]
fn read_stats_follow_traffic() {
    let (_service, session, _recorder, _sink) = session();
    session.on_open();
    assert_eq!(session.stats().last_io_time(), 0);

    session.on_message_received(&[0; 10]);
    session.on_message_received(&[0; 5]);

    assert_eq!(session.stats().read_bytes(), 15);
    assert!(session.stats().last_read_time() > 0);
    assert_eq!(session.stats().last_io_time(), session.stats().last_read_time());
}

#[test]
fn reads_after_close_leave_stats_alone() {
    let (_service, session, _recorder, _sink) = session();
    session.on_open();
    session.on_message_received(&[0; 4]);
    session.on_close();
    let last_read = session.stats().last_read_time();

    session.on_message_received(&[0; 100]);

    assert_eq!(session.stats().read_bytes(), 4);
    assert_eq!(session.stats().last_read_time(), last_read);
}

// ─────────────────────────────────────────────────────────────────────────────
// Attributes
// ─────────────────────────────────────────────────────────────────────────────

const USER: AttributeKey<String> = AttributeKey::new("user");
const USER_ID: AttributeKey<u64> = AttributeKey::new("user");

#[test]
fn attributes_default_then_last_value() {
    let (_service, session, _recorder, _sink) = session();
    assert_eq!(session.get_attribute(&USER), None);
    assert_eq!(session.get_attribute_or(&USER, "anon".into()), "anon");

    assert_eq!(session.set_attribute(&USER, "ada".into()), Ok(None));
    assert_eq!(
        session.set_attribute(&USER, "grace".into()),
        Ok(Some("ada".to_string()))
    );
    assert_eq!(session.get_attribute_or(&USER, "anon".into()), "grace");
    assert!(session.attributes().keys().contains("user"));
}

#[test]
fn mismatched_attribute_keeps_prior_value() {
    let (_service, session, _recorder, _sink) = session();
    let _ = session.set_attribute(&USER, "ada".into()).unwrap();

    assert_matches!(
        session.set_attribute(&USER_ID, 7),
        Err(AttributeError::TypeMismatch { key, .. }) if key == "user"
    );
    assert_eq!(session.get_attribute(&USER), Some("ada".to_string()));

    assert_eq!(session.remove_attribute(&USER), Ok(Some("ada".to_string())));
    assert!(session.attributes().is_empty());
}

// tests/controller_tests.rs
mod common;
use common::*;
use parking_lot::Mutex;
use sluice::process::trigger::StopPredicate;
use sluice::{
  ChildEvent, ChildStage, LifecycleEvent, ProcessController, ProcessState, Role, SluiceError, StateTrigger, StopContext,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn controller() -> ProcessController {
  ProcessController::new("test-controller", ProcessState::NotStarted, ProcessState::Stopped)
}

fn all_idle() -> StopPredicate {
  Arc::new(|ctx: &StopContext<'_>| {
    ctx
      .children
      .iter()
      .filter(|(role, _)| role.participates_in_idle_detection())
      .all(|(_, child)| !child.is_busy())
  })
}

#[tokio::test]
async fn test_start_bound_trigger_moves_to_started() {
  setup_tracing();
  let log = Arc::new(Mutex::new(Vec::new()));
  let worker = ManualChild::new("worker", Arc::clone(&log));
  let controller = controller();
  controller.register_child(Role::Producer, worker.clone()).unwrap();
  controller.register_trigger(StateTrigger::on_start(worker.id(), ProcessState::Started));

  worker.emit_started();
  assert_eq!(controller.state(), ProcessState::Started);
}

#[tokio::test]
async fn test_shared_predicate_is_evaluated_once_per_stop() {
  setup_tracing();
  let log = Arc::new(Mutex::new(Vec::new()));
  let worker = ManualChild::new("worker", Arc::clone(&log));
  let controller = controller();
  let recorder = StateRecorder::default();
  controller.on_state_changed(recorder.observer());
  controller.register_child(Role::Producer, worker.clone()).unwrap();

  let evaluations = Arc::new(AtomicUsize::new(0));
  let counted = Arc::clone(&evaluations);
  let inner = all_idle();
  let predicate: StopPredicate = Arc::new(move |ctx: &StopContext<'_>| {
    counted.fetch_add(1, Ordering::SeqCst);
    inner(ctx)
  });
  controller.register_trigger(StateTrigger::on_start(worker.id(), ProcessState::Started));
  controller.register_trigger(StateTrigger::on_stop(Arc::clone(&predicate), ProcessState::Completed));
  controller.register_trigger(StateTrigger::on_stop(predicate, ProcessState::Stopped));

  worker.emit_started();
  worker.emit_stopped(None);

  assert_eq!(evaluations.load(Ordering::SeqCst), 1);
  assert_eq!(
    recorder.states(),
    vec![ProcessState::Started, ProcessState::Completed, ProcessState::Stopped]
  );
}

#[tokio::test]
async fn test_busy_sibling_holds_completion_back() {
  setup_tracing();
  let log = Arc::new(Mutex::new(Vec::new()));
  let producer = ManualChild::new("producer", Arc::clone(&log));
  let consumer = ManualChild::new("consumer", Arc::clone(&log));
  let auxiliary = ManualChild::new("auxiliary", Arc::clone(&log));
  let controller = controller();
  controller.register_child(Role::Producer, producer.clone()).unwrap();
  controller.register_child(Role::Consumer, consumer.clone()).unwrap();
  controller.register_child(Role::Auxiliary, auxiliary.clone()).unwrap();
  controller.register_trigger(StateTrigger::on_start(producer.id(), ProcessState::Started));
  controller.register_trigger(StateTrigger::on_stop(all_idle(), ProcessState::Completed));

  producer.emit_started();
  consumer.set_busy(true);
  auxiliary.set_busy(true);
  producer.emit_stopped(None);
  assert_eq!(controller.state(), ProcessState::Started);

  // Auxiliary children do not count towards idleness.
  consumer.emit_stopped(None);
  assert_eq!(controller.state(), ProcessState::Completed);
}

#[tokio::test]
async fn test_child_error_is_attached_to_terminal_transition() {
  setup_tracing();
  let log = Arc::new(Mutex::new(Vec::new()));
  let worker = ManualChild::new("worker", Arc::clone(&log));
  let controller = controller();
  let recorder = StateRecorder::default();
  controller.on_state_changed(recorder.observer());
  controller.register_child(Role::Producer, worker.clone()).unwrap();
  let predicate = all_idle();
  controller.register_trigger(StateTrigger::on_start(worker.id(), ProcessState::Started));
  controller.register_trigger(StateTrigger::on_stop(Arc::clone(&predicate), ProcessState::Completed));
  controller.register_trigger(StateTrigger::on_stop(predicate, ProcessState::Stopped));

  worker.emit_started();
  worker.emit_stopped(Some(SluiceError::Internal("disk full".to_string())));

  let changes = recorder.changes.lock();
  let terminal = changes.last().unwrap();
  assert_eq!(terminal.to, ProcessState::Stopped);
  assert!(terminal.error.as_ref().map(|e| e.to_string().contains("disk full")).unwrap_or(false));
  assert!(changes.iter().filter(|c| c.to != ProcessState::Stopped).all(|c| c.error.is_none()));
  assert!(controller.run_error().is_some());
}

#[tokio::test]
async fn test_transition_table_is_enforced() {
  setup_tracing();
  let controller = controller();

  let refused = controller.transition_to(ProcessState::Completed);
  assert!(matches!(
    refused,
    Err(SluiceError::InvalidTransition {
      from: ProcessState::NotStarted,
      to: ProcessState::Completed
    })
  ));

  controller.transition_to(ProcessState::PreparingTarget).unwrap();
  controller.transition_to(ProcessState::TargetPrepared).unwrap();
  controller.transition_to(ProcessState::Started).unwrap();
  controller.transition_to(ProcessState::Started).unwrap(); // same state is a no-op
  controller.transition_to(ProcessState::Completed).unwrap();
  controller.transition_to(ProcessState::FinalizingTarget).unwrap();
  controller.transition_to(ProcessState::Stopped).unwrap();
  assert!(controller.transition_to(ProcessState::Started).is_err());
}

#[tokio::test]
async fn test_abort_and_reset() {
  setup_tracing();
  let controller = controller();
  let recorder = StateRecorder::default();
  controller.on_state_changed(recorder.observer());

  controller.abort(Arc::new(SluiceError::Internal("boom".to_string())));
  assert_eq!(controller.state(), ProcessState::Stopped);
  assert!(controller.run_error().is_some());

  // A second abort does not report the terminal state again.
  controller.abort(Arc::new(SluiceError::Internal("again".to_string())));
  assert_eq!(recorder.count(ProcessState::Stopped), 1);
  assert!(controller.run_error().unwrap().to_string().contains("boom"));

  controller.reset();
  assert_eq!(controller.state(), ProcessState::NotStarted);
  assert!(controller.run_error().is_none());
}

#[tokio::test]
async fn test_start_launches_producers_in_registration_order() {
  setup_tracing();
  let log = Arc::new(Mutex::new(Vec::new()));
  let first = ManualChild::new("first", Arc::clone(&log));
  let consumer = ManualChild::new("consumer", Arc::clone(&log));
  let second = ManualChild::new("second", Arc::clone(&log));
  let controller = controller();
  controller.register_child(Role::Producer, first).unwrap();
  controller.register_child(Role::Consumer, consumer).unwrap();
  controller.register_child(Role::Producer, second).unwrap();

  assert_eq!(controller.start(), 2);
  assert_eq!(*log.lock(), vec!["start:first".to_string(), "start:second".to_string()]);

  log.lock().clear();
  controller.cancel_children();
  assert_eq!(log.lock().len(), 3);
}

#[tokio::test]
async fn test_duplicate_and_deregistered_children() {
  setup_tracing();
  let log = Arc::new(Mutex::new(Vec::new()));
  let worker = ManualChild::new("worker", Arc::clone(&log));
  let controller = controller();
  controller.register_child(Role::Producer, worker.clone()).unwrap();

  let duplicate = controller.register_child(Role::Consumer, worker.clone());
  assert!(matches!(duplicate, Err(SluiceError::ConfigurationError { .. })));

  controller.register_trigger(StateTrigger::on_start(worker.id(), ProcessState::Started));
  assert!(controller.deregister_child(worker.id()));
  assert!(!controller.deregister_child(worker.id()));

  worker.emit_started();
  assert_eq!(controller.state(), ProcessState::NotStarted);
  assert!(controller.children().is_empty());
}

#[tokio::test]
async fn test_child_events_are_republished() {
  setup_tracing();
  let log = Arc::new(Mutex::new(Vec::new()));
  let worker = ManualChild::new("worker", Arc::clone(&log));
  let controller = controller();
  controller.register_child(Role::Consumer, worker.clone()).unwrap();

  let events: Arc<Mutex<Vec<ChildEvent>>> = Arc::new(Mutex::new(Vec::new()));
  let sink = Arc::clone(&events);
  let id = controller.on_child_event(move |event: &ChildEvent| sink.lock().push(event.clone()));

  worker.emit_started();
  worker.emit_stopped(None);
  assert!(controller.remove_child_observer(id));
  worker.emit_started();

  let events = events.lock();
  assert_eq!(events.len(), 2);
  assert_eq!(events[0].name, "worker");
  assert_eq!(events[0].role, Role::Consumer);
  assert!(matches!(events[0].event, LifecycleEvent::Started));
  assert!(matches!(events[1].event, LifecycleEvent::Stopped(None)));
}

#[tokio::test]
async fn test_wait_for_terminal_resolves_on_stop() {
  setup_tracing();
  let controller = controller();
  let waiter = controller.clone();
  let waiting = tokio::spawn(async move { waiter.wait_for_terminal().await });

  controller.transition_to(ProcessState::Started).unwrap();
  controller.transition_to(ProcessState::Completed).unwrap();
  controller.transition_to(ProcessState::Stopped).unwrap();

  let reached = waiting.await.unwrap().unwrap();
  assert_eq!(reached, ProcessState::Stopped);
}

#[tokio::test]
async fn test_wait_for_idle_children_resolves_after_last_stop() {
  setup_tracing();
  let log = Arc::new(Mutex::new(Vec::new()));
  let first = ManualChild::new("first", Arc::clone(&log));
  let second = ManualChild::new("second", Arc::clone(&log));
  let controller = controller();
  controller.register_child(Role::Producer, first.clone()).unwrap();
  controller.register_child(Role::Consumer, second.clone()).unwrap();

  first.emit_started();
  second.emit_started();
  assert_eq!(controller.busy_children(), vec!["first".to_string(), "second".to_string()]);

  let waiter = controller.clone();
  let idle = tokio::spawn(async move { waiter.wait_for_idle_children().await });
  tokio::time::sleep(std::time::Duration::from_millis(20)).await;
  assert!(!idle.is_finished());

  first.emit_stopped(None);
  tokio::time::sleep(std::time::Duration::from_millis(20)).await;
  assert!(!idle.is_finished());
  assert_eq!(controller.busy_children(), vec!["second".to_string()]);

  second.emit_stopped(None);
  tokio::time::timeout(std::time::Duration::from_secs(1), idle)
    .await
    .expect("idle wait resolved")
    .unwrap();
  assert!(controller.busy_children().is_empty());
}

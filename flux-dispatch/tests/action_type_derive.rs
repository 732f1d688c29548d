//! Tests for #[derive(ActionType)]

use flux_dispatch::prelude::*;
use flux_dispatch::{assert_dispatched, assert_not_dispatched, count_dispatched, RecordingObserver};
use serde_json::{json, Value};

#[derive(ActionType, Clone, Copy, Debug, PartialEq)]
enum CounterAction {
    Increment,
    Reset,
}

#[derive(ActionType, Clone, Copy, Debug, PartialEq)]
#[action_type(prefix = "todo")]
enum TodoAction {
    AddTodo,
    #[action_type(rename = "CLEAR")]
    ClearCompleted,
    HTTPSync,
}

#[test]
fn test_default_names_are_screaming_snake() {
    assert_eq!(CounterAction::Increment.action_id(), ActionId::from("INCREMENT"));
    assert_eq!(CounterAction::Reset.action_id().to_string(), "RESET");
}

#[test]
fn test_prefix_and_rename() {
    assert_eq!(TodoAction::AddTodo.action_id().to_string(), "todo/ADD_TODO");
    assert_eq!(TodoAction::ClearCompleted.action_id().to_string(), "todo/CLEAR");
    assert_eq!(TodoAction::HTTPSync.action_id().to_string(), "todo/HTTP_SYNC");
}

#[test]
fn test_all_lists_variants_in_order() {
    assert_eq!(
        TodoAction::all(),
        &[
            TodoAction::AddTodo,
            TodoAction::ClearCompleted,
            TodoAction::HTTPSync
        ]
    );
    assert_eq!(CounterAction::all().len(), 2);
}

#[test]
fn test_converts_into_action_id() {
    let by_value: ActionId = TodoAction::AddTodo.into();
    let by_ref: ActionId = (&TodoAction::AddTodo).into();
    assert_eq!(by_value, by_ref);
    assert!(by_value.is_recognizable());
}

#[test]
fn test_variants_bind_and_dispatch() {
    let dispatcher: Dispatcher = Dispatcher::new();
    let recorder = RecordingObserver::new();
    dispatcher.add_observer(recorder.clone());

    let counter = Store::builder("Counter", || 0i64)
        .bind(CounterAction::Increment, |n: &mut i64, by: &Value, _| {
            *n += by.as_i64().unwrap_or(1);
            Ok(true)
        })
        .bind(CounterAction::Reset, |n: &mut i64, _, _| {
            *n = 0;
            Ok(true)
        })
        .build(&dispatcher)
        .unwrap();

    let actions = ActionCreator::new(&dispatcher, "CounterActions").unwrap();
    actions.declare(CounterAction::all()).unwrap();

    actions.dispatch(CounterAction::Increment, json!(2)).unwrap();
    actions.dispatch(CounterAction::Increment, Value::Null).unwrap();
    assert_eq!(counter.read("count", |n| *n).unwrap(), 3);

    actions.dispatch(CounterAction::Reset, Value::Null).unwrap();
    assert_eq!(counter.read("count", |n| *n).unwrap(), 0);

    assert_dispatched!(recorder, CounterAction::Reset);
    assert_not_dispatched!(recorder, TodoAction::AddTodo);
    assert_eq!(count_dispatched!(recorder, CounterAction::Increment), 2);
}

#[test]
fn test_declared_types_belong_to_one_creator() {
    let dispatcher: Dispatcher = Dispatcher::new();
    let todos = ActionCreator::new(&dispatcher, "TodoActions").unwrap();
    let other = ActionCreator::new(&dispatcher, "OtherActions").unwrap();

    todos.declare(TodoAction::all()).unwrap();
    let err = other
        .dispatch(TodoAction::ClearCompleted, Value::Null)
        .unwrap_err();
    assert_eq!(
        err,
        FluxError::DuplicateActionType {
            action: "todo/CLEAR".into(),
            creator: "TodoActions".into(),
        }
    );
}

use super::*;

const THREAD: &str = "thread-1";

fn seeded() -> MemoryThreadStore {
    let mut store = MemoryThreadStore::new();
    store.push(THREAD, ThreadItem::new("m1", "user", "hello"));
    store.push(THREAD, ThreadItem::new("m2", "assistant", "hi there"));
    store.push(THREAD, ThreadItem::new("m3", "user", "fix the bug"));
    store
}

fn active_log() -> UndoLog {
    let mut log = UndoLog::new(DEFAULT_HISTORY_LIMIT);
    log.set_active_thread(Some(THREAD));
    log
}

/// Delete an item from the store and record it, the way a caller would.
fn delete(log: &mut UndoLog, store: &mut MemoryThreadStore, item_id: &str) {
    let before = store.snapshot(THREAD).unwrap();
    let index = before.order.iter().position(|id| id == item_id).unwrap();
    let item = store.remove_item(THREAD, item_id).unwrap();
    log.record_operation(
        OperationType::DeleteMessage,
        PreviousState::Item {
            item,
            index,
            order: before.order,
        },
        None,
    );
}

#[test]
fn test_record_without_active_thread_is_noop() {
    let mut log = UndoLog::default();
    let id = log.record_operation(
        OperationType::SendMessage,
        PreviousState::Sent {
            item_id: "m1".to_string(),
        },
        None,
    );
    assert!(id.is_none());
    assert!(!log.can_undo());
}

#[test]
fn test_empty_stacks_report_notice() {
    let mut log = active_log();
    let mut store = seeded();
    assert_eq!(log.undo(&mut store), UndoOutcome::Empty("Nothing to undo".to_string()));
    assert_eq!(log.redo(&mut store), UndoOutcome::Empty("Nothing to redo".to_string()));
}

#[test]
fn test_undo_delete_restores_position() {
    let mut log = active_log();
    let mut store = seeded();
    let original = store.snapshot(THREAD).unwrap();

    delete(&mut log, &mut store, "m2");
    assert_eq!(store.snapshot(THREAD).unwrap().order, vec!["m1", "m3"]);

    assert!(log.undo(&mut store).is_applied());
    assert_eq!(store.snapshot(THREAD).unwrap(), original);
    assert!(log.can_redo());
    assert!(!log.can_undo());
}

#[test]
fn test_delete_round_trip() {
    let mut log = active_log();
    let mut store = seeded();
    delete(&mut log, &mut store, "m1");
    let before_undo = store.snapshot(THREAD).unwrap();

    log.undo(&mut store);
    let outcome = log.redo(&mut store);

    assert!(outcome.is_applied());
    assert_eq!(store.snapshot(THREAD).unwrap(), before_undo);
    assert!(log.can_undo());
}

#[test]
fn test_clear_thread_round_trip() {
    let mut log = active_log();
    let mut store = seeded();
    let original = store.snapshot(THREAD).unwrap();
    store.clear(THREAD);
    log.record_operation(
        OperationType::ClearThread,
        PreviousState::Snapshot(original.clone()),
        Some("Clear conversation"),
    );
    let before_undo = store.snapshot(THREAD).unwrap();

    assert_eq!(
        log.undo(&mut store),
        UndoOutcome::Applied("Undid: Clear conversation".to_string())
    );
    assert_eq!(store.snapshot(THREAD).unwrap(), original);

    assert!(log.redo(&mut store).is_applied());
    assert_eq!(store.snapshot(THREAD).unwrap(), before_undo);
}

#[test]
fn test_undo_send_and_edit() {
    let mut log = active_log();
    let mut store = seeded();

    store.push(THREAD, ThreadItem::new("m4", "user", "typo"));
    log.record_operation(
        OperationType::SendMessage,
        PreviousState::Sent {
            item_id: "m4".to_string(),
        },
        None,
    );
    store.set_content(THREAD, "m1", "hello, edited").unwrap();
    log.record_operation(
        OperationType::EditMessage,
        PreviousState::Edited {
            item_id: "m1".to_string(),
            content: "hello".to_string(),
        },
        None,
    );

    assert!(log.undo(&mut store).is_applied());
    assert!(log.undo(&mut store).is_applied());
    assert_eq!(store.snapshot(THREAD).unwrap(), seeded().snapshot(THREAD).unwrap());
}

#[test]
fn test_redo_send_and_edit_unsupported_leaves_state() {
    let mut log = active_log();
    let mut store = seeded();
    store.set_content(THREAD, "m3", "fix the bug now").unwrap();
    log.record_operation(
        OperationType::EditMessage,
        PreviousState::Edited {
            item_id: "m3".to_string(),
            content: "fix the bug".to_string(),
        },
        None,
    );
    log.undo(&mut store);
    let before = store.snapshot(THREAD).unwrap();

    let outcome = log.redo(&mut store);
    assert!(matches!(outcome, UndoOutcome::Unsupported(_)));
    assert!(outcome.message().contains("repeat the action manually"));
    assert_eq!(store.snapshot(THREAD).unwrap(), before);
    assert!(!log.can_redo());
}

#[test]
fn test_revert_snapshot_undo_unsupported() {
    let mut log = active_log();
    let mut store = seeded();
    log.record_operation(
        OperationType::RevertSnapshot,
        PreviousState::FilesystemSnapshot {
            snapshot_id: "snap-1".to_string(),
            paths: vec!["src/main.rs".to_string()],
        },
        None,
    );
    let before = store.snapshot(THREAD).unwrap();

    let outcome = log.undo(&mut store);
    assert!(matches!(outcome, UndoOutcome::Unsupported(_)));
    assert_eq!(store.snapshot(THREAD).unwrap(), before);
    assert!(!log.can_redo());
}

#[test]
fn test_record_clears_redo() {
    let mut log = active_log();
    let mut store = seeded();
    delete(&mut log, &mut store, "m3");
    log.undo(&mut store);
    assert!(log.can_redo());

    delete(&mut log, &mut store, "m1");
    assert!(!log.can_redo());
}

#[test]
fn test_history_is_bounded() {
    let mut log = UndoLog::new(2);
    log.set_active_thread(Some(THREAD));
    for n in 0..5 {
        log.record_operation(
            OperationType::SendMessage,
            PreviousState::Sent {
                item_id: format!("m{n}"),
            },
            Some(&format!("send {n}")),
        );
    }
    let kept: Vec<&str> = log.history().map(|op| op.description.as_str()).collect();
    assert_eq!(kept, vec!["send 3", "send 4"]);

    log.clear_history();
    assert!(!log.can_undo());
}

#[test]
fn test_missing_item_reports_failure() {
    let mut log = active_log();
    let mut store = seeded();
    log.record_operation(
        OperationType::SendMessage,
        PreviousState::Sent {
            item_id: "gone".to_string(),
        },
        None,
    );
    assert!(matches!(log.undo(&mut store), UndoOutcome::Failed(_)));
    assert!(!log.can_undo());
}

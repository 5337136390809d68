use std::cell::Cell;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::rc::Rc;
use std::time::Duration;

use matchstore::stream::write_json_array;
use matchstore::{CollectionId, Filter, MatchCursor, MatchDao, MatchError, MatchRecord, Matches, MergedMatches, Result, SqliteStore};

enum Step {
    Record(MatchRecord),
    Fail,
}

/// Plays back a fixed script and counts pulls and closes.
struct ScriptedCursor {
    steps: VecDeque<Step>,
    pulls: Rc<Cell<u32>>,
    closes: Rc<Cell<u32>>,
}

impl ScriptedCursor {
    fn new(steps: Vec<Step>) -> (Self, Rc<Cell<u32>>, Rc<Cell<u32>>) {
        let pulls = Rc::new(Cell::new(0));
        let closes = Rc::new(Cell::new(0));
        let cursor = Self {
            steps: steps.into(),
            pulls: Rc::clone(&pulls),
            closes: Rc::clone(&closes),
        };
        (cursor, pulls, closes)
    }
}

impl MatchCursor for ScriptedCursor {
    fn next_match(&mut self) -> Result<Option<MatchRecord>> {
        self.pulls.set(self.pulls.get() + 1);
        match self.steps.pop_front() {
            Some(Step::Record(record)) => Ok(Some(record)),
            Some(Step::Fail) => Err(MatchError::StoreUnavailable {
                operation: "find".into(),
                message: "connection reset".into(),
            }),
            None => Ok(None),
        }
    }
    fn close(&mut self) -> Result<()> {
        self.closes.set(self.closes.get() + 1);
        Ok(())
    }
}

fn record(p_id: &str) -> Step {
    Step::Record(MatchRecord::new(
        "g",
        p_id,
        "h",
        "q",
        Matches::new(vec![vec![1.0]], vec![vec![2.0]], vec![1.0]),
    ))
}

#[test]
fn error_mid_merge_closes_every_cursor_exactly_once() {
    let (first, _, first_closes) = ScriptedCursor::new(vec![record("a"), record("c"), record("e")]);
    let (second, _, second_closes) = ScriptedCursor::new(vec![record("b"), Step::Fail]);
    let (third, _, third_closes) = ScriptedCursor::new(vec![record("a"), record("d"), record("f")]);

    let mut merged = MergedMatches::from_cursors([first, second, third]).expect("primed");
    assert_eq!(merged.open_cursors(), 3);
    let a = merged.next_match().expect("first key").expect("record");
    assert_eq!(a.p_id(), "a");
    assert_eq!(a.len(), 2);
    assert!(matches!(merged.next_match(), Err(MatchError::StoreUnavailable { .. })));
    assert_eq!(merged.open_cursors(), 0);

    merged.close().expect("close after failure");
    drop(merged);
    assert_eq!(first_closes.get(), 1);
    assert_eq!(second_closes.get(), 1);
    assert_eq!(third_closes.get(), 1);
}

#[test]
fn failure_while_priming_closes_cursors_already_opened() {
    let (first, _, first_closes) = ScriptedCursor::new(vec![record("a")]);
    let (second, _, second_closes) = ScriptedCursor::new(Vec::new());
    let (broken, _, broken_closes) = ScriptedCursor::new(vec![Step::Fail]);
    let (never, never_pulls, never_closes) = ScriptedCursor::new(vec![record("z")]);

    let result = MergedMatches::from_cursors([first, second, broken, never]);
    assert!(matches!(result, Err(MatchError::StoreUnavailable { .. })));
    assert_eq!(first_closes.get(), 1);
    assert_eq!(second_closes.get(), 1);
    assert_eq!(broken_closes.get(), 1);
    // never handed to the merge, so it is dropped unopened
    assert_eq!(never_pulls.get(), 0);
    assert_eq!(never_closes.get(), 0);
}

#[test]
fn dropping_an_unfinished_merge_closes_its_cursors() {
    let (first, _, first_closes) = ScriptedCursor::new(vec![record("a"), record("b")]);
    let (second, _, second_closes) = ScriptedCursor::new(vec![record("c")]);
    let mut merged = MergedMatches::from_cursors([first, second]).expect("primed");
    merged.next_match().expect("next").expect("record");
    drop(merged);
    assert_eq!(first_closes.get(), 1);
    assert_eq!(second_closes.get(), 1);
}

#[test]
fn boxed_cursors_merge_like_concrete_ones() {
    let (first, _, first_closes) = ScriptedCursor::new(vec![record("b")]);
    let (second, _, second_closes) = ScriptedCursor::new(vec![record("a")]);
    let cursors: Vec<Box<dyn MatchCursor>> = vec![Box::new(first), Box::new(second)];
    let mut merged = MergedMatches::from_cursors(cursors).expect("primed");
    let mut out = Vec::new();
    let written = write_json_array(&mut merged, &mut out, Duration::from_secs(60), "boxed").expect("write");
    assert_eq!(written, 2);
    let records: Vec<MatchRecord> = serde_json::from_slice(&out).expect("json array");
    assert_eq!(records[0].p_id(), "a");
    assert_eq!(first_closes.get(), 1);
    assert_eq!(second_closes.get(), 1);
}

struct FailingSink {
    calls: u32,
    fail_on: u32,
    kind: io::ErrorKind,
}

impl Write for FailingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.calls += 1;
        if self.calls >= self.fail_on {
            Err(io::Error::new(self.kind, "sink gone"))
        } else {
            Ok(buf.len())
        }
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn closed_sink_stops_pulling_and_releases_cursors() {
    let (first, first_pulls, first_closes) = ScriptedCursor::new(vec![record("a"), record("c"), record("e")]);
    let (second, second_pulls, second_closes) = ScriptedCursor::new(vec![record("b"), record("d"), record("f")]);
    let mut merged = MergedMatches::from_cursors([first, second]).expect("primed");
    // "[", first record, then the separator fails
    let mut sink = FailingSink {
        calls: 0,
        fail_on: 3,
        kind: io::ErrorKind::BrokenPipe,
    };
    let result = write_json_array(&mut merged, &mut sink, Duration::from_secs(60), "cancelled");
    assert!(matches!(result, Err(MatchError::SinkClosed { written: 1 })));
    assert_eq!(merged.emitted(), 2);
    assert_eq!(first_pulls.get() + second_pulls.get(), 4);
    assert_eq!(first_closes.get(), 1);
    assert_eq!(second_closes.get(), 1);
}

#[test]
fn other_sink_failures_are_io_errors() {
    let (cursor, _, closes) = ScriptedCursor::new(vec![record("a")]);
    let mut boxed: Box<dyn MatchCursor> = Box::new(cursor);
    let mut sink = FailingSink {
        calls: 0,
        fail_on: 1,
        kind: io::ErrorKind::PermissionDenied,
    };
    let result = write_json_array(&mut boxed, &mut sink, Duration::from_secs(60), "denied");
    assert!(matches!(result, Err(MatchError::Io(_))));
    assert_eq!(closes.get(), 1);
}

#[test]
fn missing_collection_fails_merge_open() {
    let dao = MatchDao::new(SqliteStore::open_in_memory().expect("store"));
    let present = CollectionId::new("safety", "present").expect("collection id");
    let dropped = CollectionId::new("safety", "dropped").expect("collection id");
    for id in [&present, &dropped] {
        dao.save_matches(id, vec![MatchRecord::new("g", "1", "g", "2", Matches::default())])
            .expect("save");
    }
    let handles = vec![dao.resolve(&present).expect("resolve"), dao.resolve(&dropped).expect("resolve")];
    dao.store().drop_collection(dropped.db_collection_name()).expect("drop");

    let result = MergedMatches::open(dao.store(), &handles, &Filter::within_group("g"));
    assert!(matches!(result, Err(MatchError::Store { .. })));
}

use std::time::Duration;

use matchstore::stream::{write_json_array, ProgressTimer};
use matchstore::{CollectionId, Filter, MatchDao, MatchRecord, Matches, SqliteStore};

fn saved(records: Vec<MatchRecord>) -> (MatchDao, CollectionId) {
    let dao = MatchDao::new(SqliteStore::open_in_memory().expect("store"));
    let id = CollectionId::new("flyTEM", "stream").expect("collection id");
    dao.save_matches(&id, records).expect("save");
    (dao, id)
}

#[test]
fn records_are_separated_by_comma_and_new_line() {
    let (dao, id) = saved(vec![
        MatchRecord::new("s", "1", "s", "2", Matches::new(vec![vec![0.5]], vec![vec![1.5]], vec![1.0])),
        MatchRecord::new("s", "1", "s", "3", Matches::default()),
    ]);
    let mut out = Vec::new();
    assert_eq!(dao.write_matches_within_group(&id, &[], "s", &mut out).expect("write"), 2);
    let text = String::from_utf8(out).expect("utf8");
    assert_eq!(
        text,
        concat!(
            r#"[{"pGroupId":"s","pId":"1","qGroupId":"s","qId":"2","matches":{"p":[[0.5]],"q":[[1.5]],"w":[1.0]}},"#,
            "\n",
            r#"{"pGroupId":"s","pId":"1","qGroupId":"s","qId":"3","matches":{"p":[],"q":[],"w":[]}}]"#
        )
    );
}

#[test]
fn empty_result_is_an_empty_array() {
    let (dao, id) = saved(vec![MatchRecord::new("s", "1", "s", "2", Matches::default())]);
    let mut out = Vec::new();
    assert_eq!(dao.write_matches_within_group(&id, &[], "nothing", &mut out).expect("write"), 0);
    assert_eq!(out, b"[]");
}

#[test]
fn many_records_stream_across_pages() {
    let records = (0..25)
        .map(|n| MatchRecord::new("s", format!("t{n:03}"), "u", "x", Matches::default()))
        .collect::<Vec<_>>();
    let store = SqliteStore::open_in_memory().expect("store").with_batch_size(4);
    let dao = MatchDao::new(store);
    let id = CollectionId::new("flyTEM", "paged").expect("collection id");
    dao.save_matches(&id, records).expect("save");
    let mut cursor = dao
        .store()
        .find(id.db_collection_name(), &Filter::with_p_group("s"))
        .expect("cursor");
    let mut out = Vec::new();
    let written = write_json_array(&mut cursor, &mut out, Duration::ZERO, "paged").expect("write");
    assert_eq!(written, 25);
    let parsed: Vec<MatchRecord> = serde_json::from_slice(&out).expect("json array");
    assert_eq!(parsed.first().map(|r| r.p_id()), Some("t000"));
    assert_eq!(parsed.last().map(|r| r.p_id()), Some("t024"));
}

#[test]
fn progress_timer_fires_at_most_once_per_interval() {
    let mut timer = ProgressTimer::new(Duration::from_secs(3600));
    assert!(!timer.has_interval_passed());
    assert!(!timer.has_interval_passed());
    let mut eager = ProgressTimer::new(Duration::ZERO);
    assert!(eager.has_interval_passed());
    assert!(eager.elapsed_seconds() >= 0.0);
}

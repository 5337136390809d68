use matchstore::index::{ensure_match_indexes, IndexSpec, MATCH_A};
use matchstore::{Field, MatchError, SqliteStore};

#[test]
fn ensuring_indexes_twice_is_a_no_op() {
    let store = SqliteStore::open_in_memory().expect("store");
    ensure_match_indexes(&store, "flyTEM__idx").expect("first");
    ensure_match_indexes(&store, "flyTEM__idx").expect("second");
    assert!(store.collection_exists("flyTEM__idx").expect("exists"));
}

#[test]
fn same_fields_with_other_uniqueness_conflict() {
    let store = SqliteStore::open_in_memory().expect("store");
    ensure_match_indexes(&store, "flyTEM__idx").expect("indexes");
    let loose = IndexSpec {
        name: "C",
        fields: MATCH_A.fields,
        unique: false,
        background: false,
    };
    assert!(matches!(
        store.create_index("flyTEM__idx", &loose),
        Err(MatchError::IndexConflict { .. })
    ));
}

#[test]
fn reused_name_with_other_fields_conflicts() {
    let store = SqliteStore::open_in_memory().expect("store");
    ensure_match_indexes(&store, "flyTEM__idx").expect("indexes");
    let moved = IndexSpec {
        name: "B",
        fields: &[Field::PGroupId],
        unique: false,
        background: true,
    };
    assert!(matches!(
        store.create_index("flyTEM__idx", &moved),
        Err(MatchError::IndexConflict { .. })
    ));
}

#[test]
fn identical_definition_under_another_name_is_accepted() {
    let store = SqliteStore::open_in_memory().expect("store");
    ensure_match_indexes(&store, "flyTEM__idx").expect("indexes");
    let alias = IndexSpec { name: "alias", ..MATCH_A };
    store.create_index("flyTEM__idx", &alias).expect("same definition");
}

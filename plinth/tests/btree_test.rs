use plinth::value::{Column, DataType, Value};
use plinth::{FileEngine, Rid};
use tempfile::tempdir;

fn rid(page_id: u32, slot_id: u16) -> Rid {
    Rid { page_id, slot_id }
}

fn setup(dir: &tempfile::TempDir) -> FileEngine {
    let eng = FileEngine::open(dir.path()).unwrap();
    eng.create_table(
        "t",
        &[
            Column::new("id", DataType::Int),
            Column::new("name", DataType::String),
        ],
    )
    .unwrap();
    eng
}

fn insert_user(eng: &FileEngine, id: i64, name: &str) {
    let mut tx = eng.begin(false).unwrap();
    tx.insert("t", &vec![Value::Int(id), Value::String(name.into())])
        .unwrap();
    eng.commit(&mut tx).unwrap();
}

#[test]
fn point_lookup_returns_physical_positions() {
    let dir = tempdir().unwrap();
    let eng = setup(&dir);
    insert_user(&eng, 10, "a");
    insert_user(&eng, 20, "b");

    eng.create_index("idx_id", "t", "id").unwrap();

    assert_eq!(eng.index_search("idx_id", 10).unwrap(), vec![rid(0, 0)]);
    assert_eq!(eng.index_search("idx_id", 20).unwrap(), vec![rid(0, 1)]);
    assert!(eng.index_search("idx_id", 30).unwrap().is_empty());
}

#[test]
fn inserts_after_creation_maintain_the_index() {
    let dir = tempdir().unwrap();
    let eng = setup(&dir);
    eng.create_index("idx_id", "t", "id").unwrap();

    insert_user(&eng, 10, "a");
    insert_user(&eng, 20, "b");

    assert_eq!(eng.index_search("idx_id", 10).unwrap(), vec![rid(0, 0)]);
    assert_eq!(eng.index_search("idx_id", 20).unwrap(), vec![rid(0, 1)]);
}

#[test]
fn duplicate_keys_come_back_in_insert_order() {
    let dir = tempdir().unwrap();
    let eng = setup(&dir);
    eng.create_index("idx_id", "t", "id").unwrap();

    insert_user(&eng, 50, "first");
    insert_user(&eng, 10, "other");
    insert_user(&eng, 50, "second");

    assert_eq!(
        eng.index_search("idx_id", 50).unwrap(),
        vec![rid(0, 0), rid(0, 2)]
    );
}

#[test]
fn null_keys_are_not_indexed() {
    let dir = tempdir().unwrap();
    let eng = setup(&dir);
    eng.create_index("idx_id", "t", "id").unwrap();

    let mut tx = eng.begin(false).unwrap();
    tx.insert("t", &vec![Value::Null, Value::String("ghost".into())])
        .unwrap();
    tx.insert("t", &vec![Value::Int(5), Value::String("real".into())])
        .unwrap();
    eng.commit(&mut tx).unwrap();

    assert_eq!(eng.index_search("idx_id", 5).unwrap(), vec![rid(0, 1)]);
}

#[test]
fn delete_where_rebuilds_the_index() {
    let dir = tempdir().unwrap();
    let eng = setup(&dir);
    insert_user(&eng, 10, "a");
    insert_user(&eng, 20, "b");
    eng.create_index("idx_id", "t", "id").unwrap();

    let mut tx = eng.begin(false).unwrap();
    tx.delete_where("t", |r| Ok(r[0] == Value::Int(10))).unwrap();
    eng.commit(&mut tx).unwrap();

    assert!(eng.index_search("idx_id", 10).unwrap().is_empty());
    // Row 20 kept its slot; the rebuilt index points at it.
    assert_eq!(eng.index_search("idx_id", 20).unwrap(), vec![rid(0, 1)]);
}

#[test]
fn replace_all_rebuilds_the_index_with_fresh_rids() {
    let dir = tempdir().unwrap();
    let eng = setup(&dir);
    insert_user(&eng, 10, "a");
    insert_user(&eng, 20, "b");
    eng.create_index("idx_id", "t", "id").unwrap();

    let mut tx = eng.begin(false).unwrap();
    tx.replace_all(
        "t",
        &[
            vec![Value::Int(30), Value::String("c".into())],
            vec![Value::Int(40), Value::String("d".into())],
        ],
    )
    .unwrap();
    eng.commit(&mut tx).unwrap();

    assert!(eng.index_search("idx_id", 10).unwrap().is_empty());
    assert_eq!(eng.index_search("idx_id", 30).unwrap(), vec![rid(0, 0)]);
    assert_eq!(eng.index_search("idx_id", 40).unwrap(), vec![rid(0, 1)]);
}

#[test]
fn update_where_rebuilds_the_index() {
    let dir = tempdir().unwrap();
    let eng = setup(&dir);
    insert_user(&eng, 10, "a");
    eng.create_index("idx_id", "t", "id").unwrap();

    let mut tx = eng.begin(false).unwrap();
    tx.update_where(
        "t",
        |r| Ok(r[0] == Value::Int(10)),
        |mut r| {
            r[0] = Value::Int(15);
            Ok(r)
        },
    )
    .unwrap();
    eng.commit(&mut tx).unwrap();

    assert!(eng.index_search("idx_id", 10).unwrap().is_empty());
    assert_eq!(eng.index_search("idx_id", 15).unwrap(), vec![rid(0, 0)]);
}

#[test]
fn index_files_are_reopened_under_their_file_name() {
    let dir = tempdir().unwrap();
    {
        let eng = setup(&dir);
        insert_user(&eng, 10, "a");
        eng.create_index("idx_id", "t", "id").unwrap();
    }

    assert!(dir.path().join("t_id.idx").exists());

    // Index names are not persisted; a reopened index answers under its
    // file stem.
    let eng = FileEngine::open(dir.path()).unwrap();
    assert_eq!(eng.index_search("t_id", 10).unwrap(), vec![rid(0, 0)]);
}

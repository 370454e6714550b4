use plinth::value::{Column, DataType, Value};
use plinth::{FileEngine, Row, StorageError};
use tempfile::tempdir;

fn user_cols() -> Vec<Column> {
    vec![
        Column::new("id", DataType::Int),
        Column::new("name", DataType::String),
        Column::new("active", DataType::Bool),
    ]
}

fn user(id: i64, name: &str, active: bool) -> Row {
    vec![
        Value::Int(id),
        Value::String(name.to_string()),
        Value::Bool(active),
    ]
}

fn scan_all(eng: &FileEngine, table: &str) -> (Vec<String>, Vec<Row>) {
    let mut tx = eng.begin(true).unwrap();
    let out = tx.scan(table).unwrap();
    eng.commit(&mut tx).unwrap();
    out
}

#[test]
fn create_insert_scan() {
    let dir = tempdir().unwrap();
    let eng = FileEngine::open(dir.path()).unwrap();
    eng.create_table("users", &user_cols()).unwrap();

    let mut tx = eng.begin(false).unwrap();
    tx.insert("users", &user(1, "Alice", true)).unwrap();
    tx.insert("users", &user(2, "Bob", false)).unwrap();
    eng.commit(&mut tx).unwrap();

    let (cols, rows) = scan_all(&eng, "users");
    assert_eq!(cols, vec!["id", "name", "active"]);
    assert_eq!(rows, vec![user(1, "Alice", true), user(2, "Bob", false)]);
}

#[test]
fn scan_order_is_page_then_slot_across_many_pages() {
    let dir = tempdir().unwrap();
    let eng = FileEngine::open(dir.path()).unwrap();
    eng.create_table("users", &user_cols()).unwrap();

    // Enough rows that the heap must allocate several pages.
    let total = 500i64;
    let mut tx = eng.begin(false).unwrap();
    for i in 0..total {
        tx.insert("users", &user(i, &format!("user-{i:04}"), i % 2 == 0))
            .unwrap();
    }
    eng.commit(&mut tx).unwrap();

    let table_size = std::fs::metadata(dir.path().join("users.godb")).unwrap().len();
    assert!(table_size > plinth::PAGE_SIZE as u64, "expected several pages");

    let (_, rows) = scan_all(&eng, "users");
    assert_eq!(rows.len(), total as usize);
    for (i, row) in rows.iter().enumerate() {
        assert_eq!(row[0], Value::Int(i as i64));
    }
}

#[test]
fn replace_all_is_idempotent() {
    let dir = tempdir().unwrap();
    let eng = FileEngine::open(dir.path()).unwrap();
    eng.create_table("users", &user_cols()).unwrap();

    let rows = vec![user(1, "a", true), user(2, "b", false), user(3, "c", true)];

    let mut tx = eng.begin(false).unwrap();
    tx.replace_all("users", &rows).unwrap();
    eng.commit(&mut tx).unwrap();
    let first = std::fs::read(dir.path().join("users.godb")).unwrap();

    let mut tx = eng.begin(false).unwrap();
    tx.replace_all("users", &rows).unwrap();
    eng.commit(&mut tx).unwrap();
    let second = std::fs::read(dir.path().join("users.godb")).unwrap();

    assert_eq!(first, second);
    assert_eq!(scan_all(&eng, "users").1, rows);
}

#[test]
fn replace_all_with_no_rows_leaves_header_only() {
    let dir = tempdir().unwrap();
    let eng = FileEngine::open(dir.path()).unwrap();
    eng.create_table("users", &user_cols()).unwrap();

    let mut tx = eng.begin(false).unwrap();
    tx.insert("users", &user(1, "a", true)).unwrap();
    tx.replace_all("users", &[]).unwrap();
    eng.commit(&mut tx).unwrap();

    assert!(scan_all(&eng, "users").1.is_empty());
    let size = std::fs::metadata(dir.path().join("users.godb")).unwrap().len();
    assert!(size < plinth::PAGE_SIZE as u64, "no pages expected");
}

#[test]
fn update_in_place_keeps_position() {
    let dir = tempdir().unwrap();
    let eng = FileEngine::open(dir.path()).unwrap();
    eng.create_table("users", &user_cols()).unwrap();

    let mut tx = eng.begin(false).unwrap();
    tx.insert("users", &user(1, "Alice", true)).unwrap();
    tx.insert("users", &user(2, "Bob", false)).unwrap();
    eng.commit(&mut tx).unwrap();

    // Same encoded length: the row is rewritten in its slot.
    let mut tx = eng.begin(false).unwrap();
    tx.update_where(
        "users",
        |r| Ok(r[0] == Value::Int(1)),
        |mut r| {
            r[2] = Value::Bool(false);
            Ok(r)
        },
    )
    .unwrap();
    eng.commit(&mut tx).unwrap();

    let (_, rows) = scan_all(&eng, "users");
    assert_eq!(rows, vec![user(1, "Alice", false), user(2, "Bob", false)]);
}

#[test]
fn growing_update_relocates_the_row() {
    let dir = tempdir().unwrap();
    let eng = FileEngine::open(dir.path()).unwrap();
    eng.create_table("users", &user_cols()).unwrap();

    let mut tx = eng.begin(false).unwrap();
    tx.insert("users", &user(1, "a", true)).unwrap();
    tx.insert("users", &user(2, "b", true)).unwrap();
    tx.insert("users", &user(3, "c", true)).unwrap();
    eng.commit(&mut tx).unwrap();

    let long_name = "a-name-that-certainly-needs-more-bytes";
    let mut tx = eng.begin(false).unwrap();
    tx.update_where(
        "users",
        |r| Ok(r[0] == Value::Int(2)),
        |mut r| {
            r[1] = Value::String(long_name.to_string());
            Ok(r)
        },
    )
    .unwrap();
    eng.commit(&mut tx).unwrap();

    let (_, rows) = scan_all(&eng, "users");
    assert_eq!(rows.len(), 3);
    let updated: Vec<&Row> = rows
        .iter()
        .filter(|r| r[0] == Value::Int(2))
        .collect();
    assert_eq!(updated, vec![&user(2, long_name, true)]);
    assert!(!rows.contains(&user(2, "b", true)));
}

#[test]
fn delete_then_insert_reuses_the_tombstone_slot() {
    let dir = tempdir().unwrap();
    let eng = FileEngine::open(dir.path()).unwrap();
    eng.create_table("users", &user_cols()).unwrap();

    let mut tx = eng.begin(false).unwrap();
    tx.insert("users", &user(1, "a", true)).unwrap();
    tx.insert("users", &user(2, "b", true)).unwrap();
    tx.insert("users", &user(3, "c", true)).unwrap();
    tx.delete_where("users", |r| Ok(r[0] == Value::Int(2))).unwrap();
    tx.insert("users", &user(4, "d", true)).unwrap();
    eng.commit(&mut tx).unwrap();

    // The new row landed in the freed middle slot, so slot order puts it
    // between 1 and 3.
    let (_, rows) = scan_all(&eng, "users");
    assert_eq!(rows, vec![user(1, "a", true), user(4, "d", true), user(3, "c", true)]);
}

#[test]
fn delete_everything_leaves_an_empty_scan() {
    let dir = tempdir().unwrap();
    let eng = FileEngine::open(dir.path()).unwrap();
    eng.create_table("users", &user_cols()).unwrap();

    let mut tx = eng.begin(false).unwrap();
    for i in 0..10 {
        tx.insert("users", &user(i, "x", true)).unwrap();
    }
    tx.delete_where("users", |_| Ok(true)).unwrap();
    eng.commit(&mut tx).unwrap();

    assert!(scan_all(&eng, "users").1.is_empty());
}

#[test]
fn scan_returns_copies_not_views() {
    let dir = tempdir().unwrap();
    let eng = FileEngine::open(dir.path()).unwrap();
    eng.create_table("users", &user_cols()).unwrap();

    let mut tx = eng.begin(false).unwrap();
    tx.insert("users", &user(1, "Alice", true)).unwrap();
    eng.commit(&mut tx).unwrap();

    let (_, mut rows) = scan_all(&eng, "users");
    rows[0][1] = Value::String("mutated".to_string());

    assert_eq!(scan_all(&eng, "users").1, vec![user(1, "Alice", true)]);
}

#[test]
fn writes_inside_a_tx_are_visible_to_its_own_scans() {
    let dir = tempdir().unwrap();
    let eng = FileEngine::open(dir.path()).unwrap();
    eng.create_table("users", &user_cols()).unwrap();

    let mut tx = eng.begin(false).unwrap();
    tx.insert("users", &user(1, "Alice", true)).unwrap();
    let (_, rows) = tx.scan("users").unwrap();
    assert_eq!(rows.len(), 1);
    eng.rollback(&mut tx).unwrap();

    // No undo happens in-process: the dirty row is still on disk until the
    // next recovery discards it.
    assert_eq!(scan_all(&eng, "users").1.len(), 1);
}

#[test]
fn operations_on_a_closed_tx_fail() {
    let dir = tempdir().unwrap();
    let eng = FileEngine::open(dir.path()).unwrap();
    eng.create_table("users", &user_cols()).unwrap();

    let mut tx = eng.begin(false).unwrap();
    eng.commit(&mut tx).unwrap();

    assert!(matches!(
        tx.insert("users", &user(1, "a", true)),
        Err(StorageError::TxClosed)
    ));
    assert!(matches!(tx.scan("users"), Err(StorageError::TxClosed)));
    assert!(matches!(
        tx.delete_where("users", |_| Ok(true)),
        Err(StorageError::TxClosed)
    ));
}

#[test]
fn missing_table_surfaces_table_missing() {
    let dir = tempdir().unwrap();
    let eng = FileEngine::open(dir.path()).unwrap();

    let mut tx = eng.begin(false).unwrap();
    assert!(matches!(
        tx.insert("ghost", &user(1, "a", true)),
        Err(StorageError::TableMissing(_))
    ));
    assert!(matches!(tx.scan("ghost"), Err(StorageError::TableMissing(_))));
    eng.rollback(&mut tx).unwrap();
}

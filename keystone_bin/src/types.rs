use plinth::Row;

#[derive(Debug, PartialEq)]
pub enum ExecuteResult {
    ResultSet(ResultSet),
    Insert(usize),
    Update(usize),
    Delete(usize),
    Ddl,
    Begin,
    Commit,
    Rollback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

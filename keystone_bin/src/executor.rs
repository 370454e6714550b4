//! Statement execution over the engine surface. The executor owns the
//! session's transaction state: between BEGIN and COMMIT/ROLLBACK every
//! statement runs inside the one held write transaction; otherwise each
//! statement gets its own transaction, committed on success and rolled back
//! on error. Projection, WHERE, ORDER BY, and LIMIT all happen here, above
//! the storage layer.

use std::cmp::Ordering;

use plinth::value::{Column, DataType, Value};
use plinth::{FileEngine, FileTx, Row};

use crate::errors::ExecutionError;
use crate::keystone_debug_log;
use crate::parser::{
    CompareOp, Condition, Literal, SelectStatement, Statement,
};
use crate::types::{ExecuteResult, ResultSet};

pub struct Session<'e> {
    engine: &'e FileEngine,
    tx: Option<FileTx<'e>>,
}

impl<'e> Session<'e> {
    pub fn new(engine: &'e FileEngine) -> Session<'e> {
        Session { engine, tx: None }
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    /// Rolls back a session transaction left open, e.g. on REPL exit.
    pub fn close(&mut self) {
        if let Some(mut tx) = self.tx.take() {
            let _ = self.engine.rollback(&mut tx);
        }
    }

    /// Parses and executes every statement in `src`, stopping at the first
    /// error.
    pub fn execute_sql(&mut self, src: &str) -> Result<Vec<ExecuteResult>, ExecutionError> {
        let stmts = crate::parser::parse_sql(src).map_err(|errs| {
            let detail = errs
                .first()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "invalid input".to_string());
            ExecutionError::Parse(detail)
        })?;

        let mut results = Vec::with_capacity(stmts.len());
        for stmt in &stmts {
            results.push(self.execute(stmt)?);
        }
        Ok(results)
    }

    pub fn execute(&mut self, stmt: &Statement) -> Result<ExecuteResult, ExecutionError> {
        keystone_debug_log!("[Session::execute] {stmt:?}");
        match stmt {
            Statement::CreateTable(ct) => {
                let cols: Vec<Column> = ct
                    .columns
                    .iter()
                    .map(|c| Column::new(c.name.clone(), c.data_type))
                    .collect();
                self.engine.create_table(&ct.table_name, &cols)?;
                Ok(ExecuteResult::Ddl)
            }

            Statement::CreateIndex(ci) => {
                self.engine
                    .create_index(&ci.index_name, &ci.table_name, &ci.column_name)?;
                Ok(ExecuteResult::Ddl)
            }

            Statement::Insert(ins) => {
                let schema = self.engine.table_schema(&ins.table_name)?;
                let row = coerce_row(&ins.values, &schema)?;
                self.with_write_tx(|tx| {
                    tx.insert(&ins.table_name, &row)?;
                    Ok(())
                })?;
                Ok(ExecuteResult::Insert(1))
            }

            Statement::Select(sel) => self.execute_select(sel),

            Statement::Update(up) => {
                let schema = self.engine.table_schema(&up.table_name)?;
                let matcher = build_matcher(&schema, up.where_clause.as_ref())?;

                let mut assignments = Vec::with_capacity(up.assignments.len());
                for (name, lit) in &up.assignments {
                    let pos = resolve_column_schema(&schema, name)
                        .ok_or_else(|| ExecutionError::ColumnNotFound(name.clone()))?;
                    assignments.push((pos, coerce_literal(lit, &schema[pos])?));
                }

                let mut affected = 0usize;
                self.with_write_tx(|tx| {
                    tx.update_where(
                        &up.table_name,
                        |row| {
                            let hit = matcher(row);
                            if hit {
                                affected += 1;
                            }
                            Ok(hit)
                        },
                        |mut row| {
                            for (pos, value) in &assignments {
                                row[*pos] = value.clone();
                            }
                            Ok(row)
                        },
                    )?;
                    Ok(())
                })?;
                Ok(ExecuteResult::Update(affected))
            }

            Statement::Delete(del) => {
                let schema = self.engine.table_schema(&del.table_name)?;
                let matcher = build_matcher(&schema, del.where_clause.as_ref())?;

                let mut affected = 0usize;
                self.with_write_tx(|tx| {
                    tx.delete_where(&del.table_name, |row| {
                        let hit = matcher(row);
                        if hit {
                            affected += 1;
                        }
                        Ok(hit)
                    })?;
                    Ok(())
                })?;
                Ok(ExecuteResult::Delete(affected))
            }

            Statement::Begin => {
                if self.tx.is_some() {
                    return Err(ExecutionError::TransactionInProgress);
                }
                self.tx = Some(self.engine.begin(false)?);
                Ok(ExecuteResult::Begin)
            }

            Statement::Commit => {
                let mut tx = self.tx.take().ok_or(ExecutionError::NoActiveTransaction)?;
                match self.engine.commit(&mut tx) {
                    Ok(()) => Ok(ExecuteResult::Commit),
                    Err(e) => {
                        self.tx = Some(tx);
                        Err(e.into())
                    }
                }
            }

            Statement::Rollback => {
                let mut tx = self.tx.take().ok_or(ExecutionError::NoActiveTransaction)?;
                match self.engine.rollback(&mut tx) {
                    Ok(()) => Ok(ExecuteResult::Rollback),
                    Err(e) => {
                        self.tx = Some(tx);
                        Err(e.into())
                    }
                }
            }
        }
    }

    fn execute_select(&mut self, sel: &SelectStatement) -> Result<ExecuteResult, ExecutionError> {
        // Inside an explicit transaction the scan sees the session's own
        // writes; otherwise a throwaway read-only tx is used.
        let (names, mut rows) = match self.tx.as_ref() {
            Some(tx) => tx.scan(&sel.table_name)?,
            None => {
                let mut tx = self.engine.begin(true)?;
                let out = tx.scan(&sel.table_name)?;
                self.engine.commit(&mut tx)?;
                out
            }
        };

        if let Some(cond) = &sel.where_clause {
            let idx = resolve_column(&names, &cond.column)
                .ok_or_else(|| ExecutionError::ColumnNotFound(cond.column.clone()))?;
            let target = cond.value.to_value();
            rows.retain(|row| condition_matches(&row[idx], cond.op, &target));
        }

        if let Some(ob) = &sel.order_by {
            let idx = resolve_column(&names, &ob.column)
                .ok_or_else(|| ExecutionError::ColumnNotFound(ob.column.clone()))?;
            rows.sort_by(|a, b| {
                let ord = compare_values(&a[idx], &b[idx]).unwrap_or(Ordering::Equal);
                if ob.desc {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }

        if let Some(limit) = sel.limit {
            rows.truncate(limit);
        }

        if sel.columns.is_empty() {
            return Ok(ExecuteResult::ResultSet(ResultSet {
                columns: names,
                rows,
            }));
        }

        let mut proj = Vec::with_capacity(sel.columns.len());
        for name in &sel.columns {
            let idx = resolve_column(&names, name)
                .ok_or_else(|| ExecutionError::ColumnNotFound(name.clone()))?;
            proj.push(idx);
        }
        let columns = proj.iter().map(|i| names[*i].clone()).collect();
        let rows = rows
            .into_iter()
            .map(|row| proj.iter().map(|i| row[*i].clone()).collect())
            .collect();

        Ok(ExecuteResult::ResultSet(ResultSet { columns, rows }))
    }

    fn with_write_tx<F>(&mut self, op: F) -> Result<(), ExecutionError>
    where
        F: FnOnce(&mut FileTx<'e>) -> Result<(), ExecutionError>,
    {
        if let Some(tx) = self.tx.as_mut() {
            return op(tx);
        }

        let mut tx = self.engine.begin(false)?;
        match op(&mut tx) {
            Ok(()) => {
                self.engine.commit(&mut tx)?;
                Ok(())
            }
            Err(e) => {
                let _ = self.engine.rollback(&mut tx);
                Err(e)
            }
        }
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

impl Literal {
    pub fn to_value(&self) -> Value {
        match self {
            Literal::Int(v) => Value::Int(*v),
            Literal::Float(v) => Value::Float(*v),
            Literal::String(s) => Value::String(s.clone()),
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Null => Value::Null,
        }
    }
}

/// Column names resolve case-insensitively in predicates and projections.
fn resolve_column(names: &[String], name: &str) -> Option<usize> {
    names.iter().position(|n| n.eq_ignore_ascii_case(name))
}

fn resolve_column_schema(cols: &[Column], name: &str) -> Option<usize> {
    cols.iter().position(|c| c.name.eq_ignore_ascii_case(name))
}

/// Turns an optional parsed WHERE into a row matcher. No condition matches
/// everything.
fn build_matcher(
    cols: &[Column],
    cond: Option<&Condition>,
) -> Result<impl Fn(&Row) -> bool, ExecutionError> {
    let resolved = match cond {
        Some(c) => {
            let idx = resolve_column_schema(cols, &c.column)
                .ok_or_else(|| ExecutionError::ColumnNotFound(c.column.clone()))?;
            Some((idx, c.op, c.value.to_value()))
        }
        None => None,
    };

    Ok(move |row: &Row| match &resolved {
        Some((idx, op, target)) => condition_matches(&row[*idx], *op, target),
        None => true,
    })
}

/// Int and Float compare numerically across types; anything involving NULL
/// or mismatched types is incomparable.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Int(x), Value::Float(y)) => (*x as f64).partial_cmp(y),
        (Value::Float(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Incomparable values never match, so every comparison against NULL is
/// false.
fn condition_matches(value: &Value, op: CompareOp, target: &Value) -> bool {
    match compare_values(value, target) {
        Some(ord) => match op {
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::NotEq => ord != Ordering::Equal,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::LtEq => ord != Ordering::Greater,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::GtEq => ord != Ordering::Less,
        },
        None => false,
    }
}

fn coerce_row(values: &[Literal], schema: &[Column]) -> Result<Row, ExecutionError> {
    if values.len() != schema.len() {
        return Err(ExecutionError::TypeMismatch(format!(
            "statement has {} values, table has {} columns",
            values.len(),
            schema.len()
        )));
    }
    values
        .iter()
        .zip(schema)
        .map(|(lit, col)| coerce_literal(lit, col))
        .collect()
}

/// Coerces one literal against a column: NULL fits anywhere, integer
/// literals widen into FLOAT columns, everything else must match exactly.
fn coerce_literal(lit: &Literal, col: &Column) -> Result<Value, ExecutionError> {
    let value = match (lit, col.ty) {
        (Literal::Null, _) => Value::Null,
        (Literal::Int(v), DataType::Int) => Value::Int(*v),
        (Literal::Int(v), DataType::Float) => Value::Float(*v as f64),
        (Literal::Float(v), DataType::Float) => Value::Float(*v),
        (Literal::String(s), DataType::String) => Value::String(s.clone()),
        (Literal::Bool(b), DataType::Bool) => Value::Bool(*b),
        _ => {
            return Err(ExecutionError::TypeMismatch(format!(
                "cannot store {lit:?} in {} column {:?}",
                col.ty, col.name
            )));
        }
    };
    Ok(value)
}

//! The interactive loop: statements are buffered until a line ends with a
//! semicolon, meta commands (leading dot) run immediately when nothing is
//! buffered, and results print as aligned text columns.

use std::io::{BufRead, Write};

use plinth::FileEngine;

use crate::executor::Session;
use crate::types::{ExecuteResult, ResultSet};

const PROMPT: &str = "keystone> ";
const CONTINUATION: &str = "     ...> ";

pub fn print_banner(out: &mut impl Write) -> std::io::Result<()> {
    writeln!(out, "Keystone ready.")?;
    writeln!(out, "Type SQL statements like:")?;
    writeln!(out, "  CREATE TABLE users (id INT, name STRING, active BOOL);")?;
    writeln!(out, "  INSERT INTO users VALUES (1, 'Alice', true);")?;
    writeln!(out, "  SELECT * FROM users;")?;
    writeln!(out, "Meta commands:")?;
    writeln!(out, "  .tables        - list tables")?;
    writeln!(out, "  .schema <tbl>  - show column definitions")?;
    writeln!(out, "  .help          - show this help")?;
    writeln!(out, "  .exit          - quit")?;
    writeln!(out)
}

/// Runs the REPL until `.exit` or EOF. A transaction left open when the
/// loop ends is rolled back.
pub fn run(engine: &FileEngine, input: impl BufRead, mut out: impl Write) -> std::io::Result<()> {
    let mut session = Session::new(engine);
    let mut buffer = String::new();

    write!(out, "{PROMPT}")?;
    out.flush()?;

    for line in input.lines() {
        let line = line?;
        let line = line.trim();

        if buffer.is_empty() && line.is_empty() {
            write!(out, "{PROMPT}")?;
            out.flush()?;
            continue;
        }

        // Meta commands only when no SQL is buffered, so they cannot end up
        // in the middle of a multi-line statement.
        if buffer.is_empty() && line.starts_with('.') {
            if handle_meta_command(line, engine, &mut out)? {
                session.close();
                return Ok(());
            }
            write!(out, "{PROMPT}")?;
            out.flush()?;
            continue;
        }

        if !line.is_empty() {
            if !buffer.is_empty() {
                buffer.push(' ');
            }
            buffer.push_str(line);
        }

        if line.ends_with(';') {
            let statement = std::mem::take(&mut buffer);
            match session.execute_sql(&statement) {
                Ok(results) => {
                    for result in results {
                        print_result(&result, &mut out)?;
                    }
                }
                Err(e) => writeln!(out, "error: {e}")?,
            }
        }

        let prompt = if buffer.is_empty() { PROMPT } else { CONTINUATION };
        write!(out, "{prompt}")?;
        out.flush()?;
    }

    writeln!(out)?;
    session.close();
    Ok(())
}

/// Returns true when the REPL should exit.
fn handle_meta_command(
    line: &str,
    engine: &FileEngine,
    out: &mut impl Write,
) -> std::io::Result<bool> {
    let mut parts = line.split_whitespace();
    let command = parts.next().unwrap_or("");

    match command.to_ascii_lowercase().as_str() {
        ".exit" | ".quit" => {
            writeln!(out, "Bye.")?;
            return Ok(true);
        }
        ".help" => {
            print_banner(out)?;
        }
        ".tables" => match engine.list_tables() {
            Ok(tables) => {
                for t in tables {
                    writeln!(out, "{t}")?;
                }
            }
            Err(e) => writeln!(out, "error: {e}")?,
        },
        ".schema" => match parts.next() {
            Some(table) => match engine.table_schema(table) {
                Ok(cols) => {
                    for c in cols {
                        writeln!(out, "{} {}", c.name, c.ty)?;
                    }
                }
                Err(e) => writeln!(out, "error: {e}")?,
            },
            None => writeln!(out, "usage: .schema <table>")?,
        },
        other => {
            writeln!(out, "unknown meta command: {other}")?;
        }
    }
    Ok(false)
}

fn print_result(result: &ExecuteResult, out: &mut impl Write) -> std::io::Result<()> {
    match result {
        ExecuteResult::ResultSet(rs) => print_result_set(rs, out),
        ExecuteResult::Insert(n) => writeln!(out, "INSERT {n}"),
        ExecuteResult::Update(n) => writeln!(out, "UPDATE {n}"),
        ExecuteResult::Delete(n) => writeln!(out, "DELETE {n}"),
        ExecuteResult::Ddl => writeln!(out, "OK"),
        ExecuteResult::Begin => writeln!(out, "BEGIN"),
        ExecuteResult::Commit => writeln!(out, "COMMIT"),
        ExecuteResult::Rollback => writeln!(out, "ROLLBACK"),
    }
}

fn print_result_set(rs: &ResultSet, out: &mut impl Write) -> std::io::Result<()> {
    let mut widths: Vec<usize> = rs.columns.iter().map(|c| c.len()).collect();
    let rendered: Vec<Vec<String>> = rs
        .rows
        .iter()
        .map(|row| row.iter().map(|v| v.to_string()).collect())
        .collect();
    for row in &rendered {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }

    let header: Vec<String> = rs
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{c:<width$}", width = widths[i]))
        .collect();
    writeln!(out, "{}", header.join(" | "))?;
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    writeln!(out, "{}", rule.join("-+-"))?;

    for row in &rendered {
        let cells: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, cell)| format!("{cell:<width$}", width = widths[i]))
            .collect();
        writeln!(out, "{}", cells.join(" | "))?;
    }
    writeln!(out, "({} row{})", rs.rows.len(), if rs.rows.len() == 1 { "" } else { "s" })
}

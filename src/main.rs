mod buffer;
mod catalog;
mod common;
mod concurrency;
mod error;
mod executors;
mod parser;
mod printer;
mod query;
mod storage;
mod tuple;

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser as ClapParser;

use buffer::buffer_pool::BufferPool;
use catalog::Catalog;
use concurrency::{next_transaction_id, TransactionId};
use error::DbError;
use parser::{build_executor, parse_statement, Statement};
use printer::Printer;
use query::expr::Function;
use storage::file_manager::FileManager;

#[derive(ClapParser)]
struct Config {
    #[arg(long, help = "Catalog file to open at startup")]
    catalog: Option<String>,

    #[arg(long, default_value_t = 64, help = "Number of buffer pool frames")]
    pool_size: usize,
}

struct Session {
    buffer_pool: Arc<BufferPool>,
    catalog: Option<Catalog>,
    aligned: bool,
    /// Explicitly opened transaction; statements autocommit without one.
    transaction: Option<TransactionId>,
}

impl Session {
    fn catalog(&self) -> Result<&Catalog> {
        self.catalog
            .as_ref()
            .ok_or_else(|| DbError::IllegalOperation("no catalog loaded, use \\c".to_owned()).into())
    }

    fn handle_statement(&mut self, sql: &str, out: &mut impl Write) -> Result<()> {
        let statement = parse_statement(sql)?;
        match statement {
            Statement::Begin => {
                if self.transaction.is_some() {
                    return Err(DbError::IllegalTransaction(
                        "a transaction is already in progress".to_owned(),
                    )
                    .into());
                }
                let tid = next_transaction_id();
                self.buffer_pool.begin_transaction(tid)?;
                self.transaction = Some(tid);
                writeln!(out, "BEGIN")?;
            }
            Statement::Commit => match self.transaction.take() {
                Some(tid) => {
                    self.buffer_pool.commit_transaction(tid)?;
                    writeln!(out, "COMMIT")?;
                }
                None => {
                    return Err(DbError::IllegalTransaction(
                        "no transaction in progress".to_owned(),
                    )
                    .into())
                }
            },
            Statement::Rollback => match self.transaction.take() {
                Some(tid) => {
                    self.buffer_pool.abort_transaction(tid)?;
                    writeln!(out, "ROLLBACK")?;
                }
                None => {
                    return Err(DbError::IllegalTransaction(
                        "no transaction in progress".to_owned(),
                    )
                    .into())
                }
            },
            query => self.run_query(&query, out)?,
        }
        Ok(())
    }

    fn run_query(&mut self, statement: &Statement, out: &mut impl Write) -> Result<()> {
        let catalog = self.catalog()?;
        let (tid, autocommit) = match self.transaction {
            Some(tid) => (tid, false),
            None => {
                let tid = next_transaction_id();
                self.buffer_pool.begin_transaction(tid)?;
                (tid, true)
            }
        };

        let aligned = self.aligned;
        let result = build_executor(statement, catalog, tid)
            .and_then(|executor| Printer::new(executor, aligned).print_all_tuples(&mut *out));

        match result {
            Ok(rows) => {
                if autocommit {
                    self.buffer_pool.commit_transaction(tid)?;
                }
                writeln!(out, "({} rows)", rows)?;
                Ok(())
            }
            Err(e) => {
                if autocommit {
                    // the deadlock detector may have aborted it already
                    _ = self.buffer_pool.abort_transaction(tid);
                }
                Err(e)
            }
        }
    }

    /// Handles a backslash command. Returns true when the session should
    /// end.
    fn handle_metacommand(&mut self, line: &str, out: &mut impl Write) -> Result<bool> {
        let mut words = line.split_whitespace();
        let command = words.next().unwrap_or("");
        match command {
            "\\d" => {
                for (name, schema) in self.catalog()?.tables() {
                    let columns = schema
                        .columns()
                        .iter()
                        .map(|col| format!("{} {}", col.name, col.type_id))
                        .collect::<Vec<String>>()
                        .join(", ");
                    writeln!(out, "{} ({})", name, columns)?;
                }
            }
            "\\c" => {
                let path = words
                    .next()
                    .ok_or_else(|| DbError::Parse("usage: \\c <catalog-file>".to_owned()))?;
                self.catalog = Some(Catalog::load(Arc::clone(&self.buffer_pool), path)?);
                writeln!(out, "catalog loaded from {}", path)?;
            }
            "\\f" => {
                write!(out, "{}", Function::list_all())?;
            }
            "\\a" => {
                self.aligned = !self.aligned;
                let mode = if self.aligned { "aligned" } else { "unaligned" };
                writeln!(out, "output format is {}", mode)?;
            }
            "\\l" => {
                let usage = || {
                    DbError::Parse("usage: \\l <table> <csv-file> [separator] [hasHeader]".to_owned())
                };
                let table = words.next().ok_or_else(usage)?;
                let path = words.next().ok_or_else(usage)?;
                let separator = words
                    .next()
                    .map(|s| s.chars().next().unwrap_or(','))
                    .unwrap_or(',');
                let has_header = matches!(words.next(), Some("true") | Some("1"));
                let loaded = self.catalog()?.load_csv(table, path, separator, has_header)?;
                writeln!(out, "loaded {} rows into {}", loaded, table)?;
            }
            "\\h" => {
                writeln!(out, "statements end with ';'. Available commands:")?;
                writeln!(out, "  \\d                          list tables")?;
                writeln!(out, "  \\c <file>                   load a catalog file")?;
                writeln!(out, "  \\f                          list functions")?;
                writeln!(out, "  \\a                          toggle aligned output")?;
                writeln!(out, "  \\l <table> <csv> [sep] [hdr] append a csv file")?;
                writeln!(out, "  \\q                          quit")?;
            }
            "\\q" => return Ok(true),
            other => {
                return Err(DbError::Parse(format!(
                    "unknown command {}, try \\h",
                    other
                ))
                .into())
            }
        }
        Ok(false)
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let config = Config::parse();

    let buffer_pool = BufferPool::new(FileManager::new(), config.pool_size);
    let catalog = config
        .catalog
        .as_ref()
        .map(|path| {
            Catalog::load(Arc::clone(&buffer_pool), path)
                .with_context(|| format!("failed to load catalog {}", path))
        })
        .transpose()?;

    let mut session = Session {
        buffer_pool,
        catalog,
        aligned: true,
        transaction: None,
    };

    let stdin = io::stdin();
    let mut out = io::stdout();
    let mut statement = String::new();

    writeln!(out, "heapdb. Type \\h for help.")?;
    write!(out, "> ")?;
    out.flush()?;

    for line in stdin.lock().lines() {
        let line = line?;
        if statement.trim().is_empty() && line.trim_start().starts_with('\\') {
            match session.handle_metacommand(line.trim(), &mut out) {
                Ok(true) => break,
                Ok(false) => (),
                Err(e) => writeln!(out, "error: {:#}", e)?,
            }
        } else {
            statement.push_str(&line);
            statement.push('\n');
            if statement.trim_end().ends_with(';') {
                let sql = std::mem::take(&mut statement);
                if let Err(e) = session.handle_statement(&sql, &mut out) {
                    writeln!(out, "error: {:#}", e)?;
                }
            }
        }
        write!(out, "> ")?;
        out.flush()?;
    }

    Ok(())
}

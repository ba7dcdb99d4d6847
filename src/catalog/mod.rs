use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::buffer::buffer_pool::BufferPool;
use crate::concurrency::next_transaction_id;
use crate::error::DbError;
use crate::storage::heap_file::HeapFile;
use crate::tuple::schema::{Column, Schema, TypeId};
use crate::tuple::value::Value;
use crate::tuple::Tuple;

/// The table directory, loaded from a text file with one table per line:
///
/// ```text
/// tablename (col type, col type, ...)
/// ```
///
/// Type names are case-insensitive (`int`/`integer`, `string`/`varchar`/
/// `text`). Every table's heap file lives next to the catalog file as
/// `tablename.dat`.
#[derive(Debug)]
pub struct Catalog {
    buffer_pool: Arc<BufferPool>,
    root: PathBuf,
    names: Vec<String>,
    tables: HashMap<String, Arc<HeapFile>>,
}

impl Catalog {
    pub fn load(buffer_pool: Arc<BufferPool>, catalog_path: impl AsRef<Path>) -> Result<Self> {
        let catalog_path = catalog_path.as_ref();
        let root = catalog_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let file = File::open(catalog_path)
            .with_context(|| format!("could not open catalog {}", catalog_path.display()))?;

        let mut catalog = Self {
            buffer_pool,
            root,
            names: vec![],
            tables: HashMap::new(),
        };
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            catalog.add_table(&line)?;
        }
        Ok(catalog)
    }

    fn add_table(&mut self, line: &str) -> Result<()> {
        let line = line.to_lowercase();
        let (name, rest) = line.split_once('(').ok_or_else(|| {
            DbError::Parse(format!("expected 'table (col type, ...)', got '{}'", line))
        })?;
        let name = name.trim().to_owned();
        if self.tables.contains_key(&name) {
            return Err(DbError::DuplicateTable(name).into());
        }

        let mut columns = vec![];
        for field in rest.trim().trim_end_matches(')').split(',') {
            let mut parts = field.split_whitespace();
            let (col_name, col_type) = match (parts.next(), parts.next(), parts.next()) {
                (Some(col_name), Some(col_type), None) => (col_name, col_type),
                _ => {
                    return Err(DbError::Parse(format!(
                        "malformed column '{}' in table {}",
                        field.trim(),
                        name
                    ))
                    .into())
                }
            };
            let type_id: TypeId = col_type.parse()?;
            columns.push(Column::new(col_name, "", type_id));
        }
        if columns.is_empty() {
            return Err(DbError::Parse(format!("table {} has no columns", name)).into());
        }
        let mut schema = Schema::new(columns);
        schema.qualify(&name);

        let file = HeapFile::open(
            Arc::clone(&self.buffer_pool),
            self.root.join(format!("{}.dat", name)),
            schema,
        )?;
        self.names.push(name.clone());
        self.tables.insert(name, file);
        Ok(())
    }

    pub fn table(&self, name: &str) -> Result<Arc<HeapFile>> {
        self.tables
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::NoSuchTable(name.to_owned()).into())
    }

    /// Table names in catalog order, each with its schema.
    pub fn tables(&self) -> Vec<(String, Schema)> {
        self.names
            .iter()
            .map(|name| (name.clone(), self.tables[name].schema().clone()))
            .collect()
    }

    /// Appends the rows of a CSV file to a table. Each row runs in its own
    /// committed transaction so bulk loads cannot clog a small buffer pool.
    /// Returns the number of rows loaded.
    pub fn load_csv(
        &self,
        table_name: &str,
        csv_path: impl AsRef<Path>,
        separator: char,
        has_header: bool,
    ) -> Result<usize> {
        let table = self.table(table_name)?;
        let schema = table.schema();
        let csv_path = csv_path.as_ref();
        let file = File::open(csv_path)
            .with_context(|| format!("could not open {}", csv_path.display()))?;

        let mut loaded = 0;
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line_no == 0 && has_header {
                continue;
            }
            if line.trim().is_empty() {
                continue;
            }

            let fields: Vec<&str> = line.split(separator).collect();
            if fields.len() != schema.columns().len() {
                return Err(DbError::MalformedData(format!(
                    "line {} has {} fields, table {} has {} columns",
                    line_no + 1,
                    fields.len(),
                    table_name,
                    schema.columns().len()
                ))
                .into());
            }

            let mut values = Vec::with_capacity(fields.len());
            for (field, column) in fields.iter().zip(schema.columns()) {
                values.push(parse_field(field, column.type_id).ok_or_else(|| {
                    DbError::TypeMismatch(format!(
                        "could not read '{}' as {} on line {}",
                        field,
                        column.type_id,
                        line_no + 1
                    ))
                })?);
            }

            let tid = next_transaction_id();
            self.buffer_pool.begin_transaction(tid)?;
            match table.insert_tuple(&Tuple::new(values), tid) {
                Ok(_) => self.buffer_pool.commit_transaction(tid)?,
                Err(e) => {
                    self.buffer_pool.abort_transaction(tid)?;
                    return Err(e);
                }
            }
            loaded += 1;
        }
        Ok(loaded)
    }
}

/// Integers also accept a decimal form ("25.0") and truncate, which some
/// exported datasets use.
fn parse_field(field: &str, type_id: TypeId) -> Option<Value> {
    match type_id {
        TypeId::Integer => {
            let field = field.trim();
            match field.parse::<i64>() {
                Ok(n) => Some(Value::Integer(n)),
                Err(_) => field.parse::<f64>().ok().map(|f| Value::Integer(f as i64)),
            }
        }
        TypeId::Text => Some(Value::String(field.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;

    use tempfile::{tempdir, TempDir};

    use super::Catalog;
    use crate::buffer::buffer_pool::BufferPool;
    use crate::concurrency::next_transaction_id;
    use crate::error::DbError;
    use crate::storage::file_manager::FileManager;
    use crate::tuple::schema::TypeId;

    fn write_catalog(dir: &TempDir, content: &str) -> std::path::PathBuf {
        let path = dir.path().join("catalog.txt");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(content.as_bytes())
            .unwrap();
        path
    }

    fn test_pool() -> Arc<BufferPool> {
        BufferPool::new(FileManager::new(), 8)
    }

    #[test]
    fn loads_tables_with_case_insensitive_types() {
        let dir = tempdir().unwrap();
        let path = write_catalog(
            &dir,
            "people (name String, age Int)\norders (customer varchar, total INTEGER)\n",
        );
        let catalog = Catalog::load(test_pool(), path).unwrap();

        let tables = catalog.tables();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].0, "people");
        assert_eq!(tables[0].1.columns()[0].type_id, TypeId::Text);
        assert_eq!(tables[1].1.columns()[1].type_id, TypeId::Integer);
        assert!(dir.path().join("people.dat").exists());
    }

    #[test]
    fn duplicate_and_missing_tables_are_errors() {
        let dir = tempdir().unwrap();
        let path = write_catalog(&dir, "t (a int)\nt (b int)\n");
        let err = Catalog::load(test_pool(), path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DbError>(),
            Some(DbError::DuplicateTable(_))
        ));

        let path = write_catalog(&dir, "people (name string)\n");
        let catalog = Catalog::load(test_pool(), path).unwrap();
        assert!(catalog.table("people").is_ok());
        let err = catalog.table("nobody").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DbError>(),
            Some(DbError::NoSuchTable(_))
        ));
    }

    #[test]
    fn malformed_catalog_lines_are_rejected() {
        let dir = tempdir().unwrap();
        let path = write_catalog(&dir, "people name string\n");
        assert!(Catalog::load(test_pool(), path).is_err());

        let path = write_catalog(&dir, "people (name string int)\n");
        assert!(Catalog::load(test_pool(), path).is_err());

        let path = write_catalog(&dir, "people (name blob)\n");
        assert!(Catalog::load(test_pool(), path).is_err());
    }

    #[test]
    fn csv_rows_append_to_the_table() {
        let dir = tempdir().unwrap();
        let path = write_catalog(&dir, "people (name string, age int)\n");
        let catalog = Catalog::load(test_pool(), path).unwrap();

        let csv = dir.path().join("people.csv");
        std::fs::File::create(&csv)
            .unwrap()
            .write_all(b"name,age\nsam,25\ngeorge jones,999\n")
            .unwrap();

        let loaded = catalog.load_csv("people", &csv, ',', true).unwrap();
        assert_eq!(loaded, 2);

        let table = catalog.table("people").unwrap();
        let tid = next_transaction_id();
        table.buffer_pool().begin_transaction(tid).unwrap();
        let mut scan = table.scan(tid);
        let mut rows = vec![];
        while let Some(tuple) = scan.next().unwrap() {
            rows.push((
                tuple.value(0).as_str().to_owned(),
                tuple.value(1).as_i64(),
            ));
        }
        table.buffer_pool().commit_transaction(tid).unwrap();
        assert_eq!(
            rows,
            vec![("sam".to_owned(), 25), ("george jones".to_owned(), 999)]
        );
    }

    #[test]
    fn csv_type_errors_name_the_line() {
        let dir = tempdir().unwrap();
        let path = write_catalog(&dir, "people (name string, age int)\n");
        let catalog = Catalog::load(test_pool(), path).unwrap();

        let csv = dir.path().join("people.csv");
        std::fs::File::create(&csv)
            .unwrap()
            .write_all(b"sam,notanumber\n")
            .unwrap();

        let err = catalog.load_csv("people", &csv, ',', false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DbError>(),
            Some(DbError::TypeMismatch(_))
        ));
    }
}

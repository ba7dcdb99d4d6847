use std::fmt::Display;
use std::str::FromStr;

use anyhow::Result;

use crate::common::STRING_WIDTH;
use crate::error::DbError;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TypeId {
    Integer,
    Text,
}

impl TypeId {
    /// On-disk width of one field of this type.
    pub fn width(&self) -> usize {
        match self {
            TypeId::Integer => std::mem::size_of::<i64>(),
            TypeId::Text => STRING_WIDTH,
        }
    }
}

impl FromStr for TypeId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "int" | "integer" => Ok(TypeId::Integer),
            "string" | "varchar" | "text" => Ok(TypeId::Text),
            s => Err(DbError::Parse(format!("unknown column type '{}'", s)).into()),
        }
    }
}

impl Display for TypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeId::Integer => write!(f, "int"),
            TypeId::Text => write!(f, "string"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    pub name: String,
    /// Table name or alias the column came from; empty for computed columns.
    pub table: String,
    pub type_id: TypeId,
}

impl Column {
    pub fn new(name: impl Into<String>, table: impl Into<String>, type_id: TypeId) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            type_id,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn empty() -> Self {
        Self { columns: vec![] }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Number of bytes one tuple of this schema occupies on disk.
    pub fn tuple_size(&self) -> usize {
        self.columns.iter().map(|col| col.type_id.width()).sum()
    }

    /// Appends the columns of `other` onto a copy of this schema, as join
    /// output schemas are built.
    pub fn merge(&self, other: &Schema) -> Schema {
        let mut columns = self.columns.clone();
        columns.extend(other.columns.iter().cloned());
        Schema::new(columns)
    }

    /// Assigns every column the given table qualifier.
    pub fn qualify(&mut self, table: &str) {
        for col in self.columns.iter_mut() {
            col.table = table.to_owned();
        }
    }

    /// Finds the position of a column by name. An unqualified name that
    /// matches columns of more than one table is ambiguous; a qualified name
    /// must match the qualifier exactly.
    pub fn find_column(&self, table: Option<&str>, name: &str) -> Result<usize> {
        let mut best = None;
        for (i, col) in self.columns.iter().enumerate() {
            if col.name != name {
                continue;
            }
            match table {
                Some(table) => {
                    if col.table == table {
                        return Ok(i);
                    }
                }
                None => {
                    if best.is_some() {
                        return Err(
                            DbError::AmbiguousName(format!("column name {} is ambiguous", name))
                                .into(),
                        );
                    }
                    best = Some(i);
                }
            }
        }
        best.ok_or_else(|| {
            let qualified = match table {
                Some(table) => format!("{}.{}", table, name),
                None => name.to_owned(),
            };
            DbError::IncompatibleTypes(format!("column {} not found", qualified)).into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{Column, Schema, TypeId};
    use crate::error::DbError;

    fn people_schema() -> Schema {
        Schema::new(vec![
            Column::new("name", "people", TypeId::Text),
            Column::new("age", "people", TypeId::Integer),
        ])
    }

    #[test]
    fn tuple_size_sums_field_widths() {
        assert_eq!(people_schema().tuple_size(), 40);
    }

    #[test]
    fn merge_appends_columns() {
        let left = people_schema();
        let right = Schema::new(vec![Column::new("id", "orders", TypeId::Integer)]);
        let merged = left.merge(&right);
        assert_eq!(merged.columns().len(), 3);
        assert_eq!(merged.columns()[2].name, "id");
    }

    #[test]
    fn find_column_prefers_qualifier() {
        let mut right = people_schema();
        right.qualify("other");
        let schema = people_schema().merge(&right);

        assert_eq!(schema.find_column(Some("other"), "age").unwrap(), 3);
        let err = schema.find_column(None, "age").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DbError>(),
            Some(DbError::AmbiguousName(_))
        ));
    }

    #[test]
    fn missing_column_is_an_error() {
        let schema = people_schema();
        assert!(schema.find_column(None, "salary").is_err());
    }

    #[test]
    fn type_names_parse_case_insensitively() {
        for name in ["int", "Integer", "INT"] {
            assert_eq!(name.parse::<TypeId>().unwrap(), TypeId::Integer);
        }
        for name in ["string", "VarChar", "text"] {
            assert_eq!(name.parse::<TypeId>().unwrap(), TypeId::Text);
        }
        assert!("blob".parse::<TypeId>().is_err());
    }
}

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use anyhow::Result;

use self::schema::Schema;
use self::value::Value;
use crate::common::RecordId;
use crate::error::DbError;

pub mod schema;
pub mod value;

#[derive(Clone, Debug, PartialEq)]
pub struct Tuple {
    values: Vec<Value>,
    /// Set for tuples read out of a heap page; operators that only compute
    /// values leave it empty.
    rid: Option<RecordId>,
}

impl Tuple {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values, rid: None }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn value(&self, col_idx: usize) -> &Value {
        &self.values[col_idx]
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn rid(&self) -> Option<RecordId> {
        self.rid
    }

    pub fn set_rid(&mut self, rid: RecordId) {
        self.rid = Some(rid);
    }

    /// Concatenates two tuples, as joins do. The result locates no single
    /// heap slot, so it carries no record id.
    pub fn join(mut self, other: Tuple) -> Tuple {
        self.values.extend(other.values);
        self.rid = None;
        self
    }

    /// Hash over the values only, used for distinct and group keys.
    pub fn key(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.values.hash(&mut hasher);
        hasher.finish()
    }

    /// Writes the tuple image: fixed-width field images in schema order.
    pub fn serialize(&self, schema: &Schema, buffer: &mut [u8]) {
        let mut offset = 0;
        for value in &self.values {
            let width = value.type_id().width();
            value.serialize(&mut buffer[offset..offset + width]);
            offset += width;
        }
        debug_assert_eq!(offset, schema.tuple_size());
    }

    /// Reads a tuple image back in schema order.
    pub fn parse(schema: &Schema, buffer: &[u8]) -> Result<Self> {
        let mut values = Vec::with_capacity(schema.columns().len());
        let mut offset = 0;
        for col in schema.columns() {
            let width = col.type_id.width();
            if buffer.len() < offset + width {
                return Err(
                    DbError::MalformedData(format!("truncated tuple image: {} bytes", buffer.len()))
                        .into(),
                );
            }
            values.push(Value::parse(&buffer[offset..offset + width], col.type_id)?);
            offset += width;
        }
        Ok(Tuple::new(values))
    }

    /// Checks that the values line up with the schema's column types.
    pub fn conforms_to(&self, schema: &Schema) -> Result<()> {
        if self.values.len() != schema.columns().len() {
            return Err(DbError::TypeMismatch(format!(
                "tuple has {} fields, schema has {}",
                self.values.len(),
                schema.columns().len()
            ))
            .into());
        }
        for (value, col) in self.values.iter().zip(schema.columns()) {
            if value.type_id() != col.type_id {
                return Err(DbError::TypeMismatch(format!(
                    "field {} is {}, expected {}",
                    col.name,
                    value.type_id(),
                    col.type_id
                ))
                .into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::schema::{Column, Schema, TypeId};
    use super::value::Value;
    use super::Tuple;

    fn people_schema() -> Schema {
        Schema::new(vec![
            Column::new("name", "people", TypeId::Text),
            Column::new("age", "people", TypeId::Integer),
        ])
    }

    fn sam() -> Tuple {
        Tuple::new(vec![
            Value::String("sam".to_owned()),
            Value::Integer(25),
        ])
    }

    #[test]
    fn tuple_image_round_trips() {
        let schema = people_schema();
        let mut buffer = vec![0u8; schema.tuple_size()];
        sam().serialize(&schema, &mut buffer);
        let parsed = Tuple::parse(&schema, &buffer).unwrap();
        assert_eq!(parsed, sam());
    }

    #[test]
    fn join_concatenates_and_drops_rid() {
        let mut left = sam();
        left.set_rid((0, 0));
        let right = Tuple::new(vec![Value::Integer(999)]);
        let joined = left.join(right);
        assert_eq!(joined.values().len(), 3);
        assert_eq!(joined.rid(), None);
    }

    #[test]
    fn key_ignores_rid() {
        let mut tagged = sam();
        tagged.set_rid((3, 7));
        assert_eq!(tagged.key(), sam().key());
        let other = Tuple::new(vec![Value::String("sam".to_owned()), Value::Integer(26)]);
        assert_ne!(other.key(), sam().key());
    }

    #[test]
    fn conforms_checks_arity_and_types() {
        let schema = people_schema();
        assert!(sam().conforms_to(&schema).is_ok());

        let wrong_arity = Tuple::new(vec![Value::Integer(25)]);
        assert!(wrong_arity.conforms_to(&schema).is_err());

        let wrong_type = Tuple::new(vec![Value::Integer(25), Value::Integer(25)]);
        assert!(wrong_type.conforms_to(&schema).is_err());
    }
}

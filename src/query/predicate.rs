use std::cmp::Ordering;

use anyhow::Result;
use regex::Regex;

use super::expr::Expr;
use crate::error::DbError;
use crate::tuple::schema::TypeId;
use crate::tuple::value::Value;
use crate::tuple::Tuple;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Like,
}

/// Total order between two same-typed values.
pub fn order_values(left: &Value, right: &Value) -> Result<Ordering> {
    match (left, right) {
        (Value::Integer(l), Value::Integer(r)) => Ok(l.cmp(r)),
        (Value::String(l), Value::String(r)) => Ok(l.cmp(r)),
        _ => Err(DbError::IncompatibleTypes(format!(
            "cannot compare {} with {}",
            left.type_id(),
            right.type_id()
        ))
        .into()),
    }
}

/// A field expression compared against a constant. LIKE patterns are
/// compiled once at construction: `%` becomes a lazy wildcard and the whole
/// pattern is anchored on both ends.
pub struct Predicate {
    field: Expr,
    op: CompareOp,
    constant: Value,
    like: Option<Regex>,
}

impl Predicate {
    pub fn new(field: Expr, op: CompareOp, constant: Expr) -> Result<Self> {
        let constant = constant.evaluate_constant()?;
        if field.output_type() != constant.type_id() {
            return Err(DbError::IncompatibleTypes(format!(
                "cannot compare a {} field with a {} constant",
                field.output_type(),
                constant.type_id()
            ))
            .into());
        }

        let like = if op == CompareOp::Like {
            if constant.type_id() != TypeId::Text {
                return Err(
                    DbError::IncompatibleTypes("like requires string operands".to_owned()).into(),
                );
            }
            let pattern = format!("^{}$", constant.as_str().replace('%', ".*?"));
            let regex = Regex::new(&pattern)
                .map_err(|e| DbError::Parse(format!("bad like pattern: {}", e)))?;
            Some(regex)
        } else {
            None
        };

        Ok(Self {
            field,
            op,
            constant,
            like,
        })
    }

    pub fn evaluate(&self, tuple: &Tuple) -> Result<bool> {
        let value = self.field.evaluate(tuple)?;
        if let Some(regex) = &self.like {
            return Ok(regex.is_match(value.as_str()));
        }
        let ordering = order_values(&value, &self.constant)?;
        let matched = match self.op {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::NotEq => ordering != Ordering::Equal,
            CompareOp::Less => ordering == Ordering::Less,
            CompareOp::LessEq => ordering != Ordering::Greater,
            CompareOp::Greater => ordering == Ordering::Greater,
            CompareOp::GreaterEq => ordering != Ordering::Less,
            CompareOp::Like => unreachable!(),
        };
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::{CompareOp, Predicate};
    use crate::query::expr::Expr;
    use crate::tuple::schema::{Column, TypeId};
    use crate::tuple::value::Value;
    use crate::tuple::Tuple;

    fn age() -> Expr {
        Expr::column(1, Column::new("age", "people", TypeId::Integer))
    }

    fn name() -> Expr {
        Expr::column(0, Column::new("name", "people", TypeId::Text))
    }

    fn sample(n: &str, a: i64) -> Tuple {
        Tuple::new(vec![Value::String(n.to_owned()), Value::Integer(a)])
    }

    #[test]
    fn integer_comparisons() {
        let pred = |op| {
            Predicate::new(age(), op, Expr::literal(Value::Integer(25))).unwrap()
        };
        let t = sample("sam", 25);
        assert!(pred(CompareOp::Eq).evaluate(&t).unwrap());
        assert!(!pred(CompareOp::NotEq).evaluate(&t).unwrap());
        assert!(pred(CompareOp::LessEq).evaluate(&t).unwrap());
        assert!(pred(CompareOp::GreaterEq).evaluate(&t).unwrap());
        assert!(!pred(CompareOp::Less).evaluate(&t).unwrap());
        assert!(!pred(CompareOp::Greater).evaluate(&t).unwrap());
    }

    #[test]
    fn string_comparisons_are_lexicographic() {
        let pred = Predicate::new(
            name(),
            CompareOp::Less,
            Expr::literal(Value::String("sam".to_owned())),
        )
        .unwrap();
        assert!(pred.evaluate(&sample("george jones", 999)).unwrap());
        assert!(!pred.evaluate(&sample("sam", 25)).unwrap());
    }

    #[test]
    fn like_maps_percent_to_wildcard() {
        let like = |pattern: &str| {
            Predicate::new(
                name(),
                CompareOp::Like,
                Expr::literal(Value::String(pattern.to_owned())),
            )
            .unwrap()
        };
        assert!(like("george%").evaluate(&sample("george jones", 0)).unwrap());
        assert!(like("%jones").evaluate(&sample("george jones", 0)).unwrap());
        assert!(like("%org%").evaluate(&sample("george jones", 0)).unwrap());
        assert!(!like("george").evaluate(&sample("george jones", 0)).unwrap());
        // anchored on both ends
        assert!(!like("eorge%").evaluate(&sample("george jones", 0)).unwrap());
    }

    #[test]
    fn mixed_types_are_rejected_at_construction() {
        assert!(Predicate::new(
            age(),
            CompareOp::Eq,
            Expr::literal(Value::String("25".to_owned()))
        )
        .is_err());
        assert!(Predicate::new(
            age(),
            CompareOp::Like,
            Expr::literal(Value::Integer(25))
        )
        .is_err());
    }
}

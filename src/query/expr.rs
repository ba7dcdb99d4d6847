use std::fmt::Display;

use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime, Utc};

use crate::error::DbError;
use crate::tuple::schema::{Column, TypeId};
use crate::tuple::value::Value;
use crate::tuple::Tuple;

/// Scalar functions applicable inside expressions. Arithmetic is 64-bit
/// integer; `getsubstr` and the epoch family work on strings.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Function {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Square,
    IntMin,
    IntMax,
    SubString,
    Epoch,
    DateToEpoch,
    DateTimeToEpoch,
    EpochToString,
}

const INT: TypeId = TypeId::Integer;
const TEXT: TypeId = TypeId::Text;

impl Function {
    pub fn from_name(name: &str) -> Option<Self> {
        let f = match name {
            "+" => Self::Add,
            "-" => Self::Subtract,
            "*" => Self::Multiply,
            "/" => Self::Divide,
            "mod" => Self::Modulo,
            "sq" => Self::Square,
            "imin" => Self::IntMin,
            "imax" => Self::IntMax,
            "getsubstr" => Self::SubString,
            "epoch" => Self::Epoch,
            "datestringtoepoch" => Self::DateToEpoch,
            "datetimestringtoepoch" => Self::DateTimeToEpoch,
            "epochtodatetimestring" => Self::EpochToString,
            _ => return None,
        };
        Some(f)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulo => "mod",
            Self::Square => "sq",
            Self::IntMin => "imin",
            Self::IntMax => "imax",
            Self::SubString => "getsubstr",
            Self::Epoch => "epoch",
            Self::DateToEpoch => "datestringtoepoch",
            Self::DateTimeToEpoch => "datetimestringtoepoch",
            Self::EpochToString => "epochtodatetimestring",
        }
    }

    pub fn arg_types(&self) -> &'static [TypeId] {
        match self {
            Self::Add | Self::Subtract | Self::Multiply | Self::Divide | Self::Modulo
            | Self::IntMin | Self::IntMax => &[INT, INT],
            Self::Square | Self::EpochToString => &[INT],
            Self::SubString => &[TEXT, INT, INT],
            Self::Epoch => &[],
            Self::DateToEpoch | Self::DateTimeToEpoch => &[TEXT],
        }
    }

    pub fn output_type(&self) -> TypeId {
        match self {
            Self::SubString | Self::EpochToString => TEXT,
            _ => INT,
        }
    }

    /// Every function with its signature, for the REPL's function listing.
    pub fn list_all() -> String {
        const ALL: [Function; 13] = [
            Function::Add,
            Function::Subtract,
            Function::Multiply,
            Function::Divide,
            Function::Modulo,
            Function::Square,
            Function::IntMin,
            Function::IntMax,
            Function::SubString,
            Function::Epoch,
            Function::DateToEpoch,
            Function::DateTimeToEpoch,
            Function::EpochToString,
        ];
        let mut listing = String::new();
        for f in ALL {
            let args = f
                .arg_types()
                .iter()
                .map(|t| t.to_string())
                .collect::<Vec<String>>()
                .join(",");
            listing.push_str(&format!("\t{}({})\n", f.name(), args));
        }
        listing
    }

    fn apply(&self, args: &[Value]) -> Result<Value> {
        let int = |i: usize| args[i].as_i64();
        let result = match self {
            Self::Add => Value::Integer(int(0).wrapping_add(int(1))),
            Self::Subtract => Value::Integer(int(0).wrapping_sub(int(1))),
            Self::Multiply => Value::Integer(int(0).wrapping_mul(int(1))),
            Self::Divide => {
                if int(1) == 0 {
                    return Err(DbError::IllegalOperation("division by zero".to_owned()).into());
                }
                Value::Integer(int(0) / int(1))
            }
            Self::Modulo => {
                if int(1) == 0 {
                    return Err(DbError::IllegalOperation("modulo by zero".to_owned()).into());
                }
                Value::Integer(int(0) % int(1))
            }
            Self::Square => Value::Integer(int(0).wrapping_mul(int(0))),
            Self::IntMin => Value::Integer(int(0).min(int(1))),
            Self::IntMax => Value::Integer(int(0).max(int(1))),
            Self::SubString => {
                let s = args[0].as_str();
                let start = int(1);
                let count = int(2);
                let sub = if start < 0 || start > s.len() as i64 {
                    ""
                } else if start + count > s.len() as i64 {
                    s.get(start as usize..).unwrap_or("")
                } else {
                    s.get(start as usize..(start + count) as usize).unwrap_or("")
                };
                Value::String(sub.to_owned())
            }
            Self::Epoch => Value::Integer(Utc::now().timestamp()),
            Self::DateToEpoch => {
                let epoch = NaiveDate::parse_from_str(args[0].as_str(), "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|dt| dt.and_utc().timestamp())
                    .unwrap_or(0);
                Value::Integer(epoch)
            }
            Self::DateTimeToEpoch => {
                let epoch = NaiveDateTime::parse_from_str(args[0].as_str(), "%Y-%m-%d %H:%M:%S")
                    .map(|dt| dt.and_utc().timestamp())
                    .unwrap_or(0);
                Value::Integer(epoch)
            }
            Self::EpochToString => {
                let formatted = match chrono::DateTime::from_timestamp(int(0), 0) {
                    Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
                    None => String::new(),
                };
                Value::String(formatted)
            }
        };
        Ok(result)
    }
}

impl Display for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// An expression bound against the schema of the tuples it will see:
/// column references are plain indices by evaluation time.
#[derive(Clone, Debug)]
pub enum Expr {
    Column { index: usize, column: Column },
    Literal(Value),
    Call { function: Function, args: Vec<Expr> },
}

impl Expr {
    pub fn column(index: usize, column: Column) -> Self {
        Self::Column { index, column }
    }

    pub fn literal(value: Value) -> Self {
        Self::Literal(value)
    }

    /// Builds a type-checked function call.
    pub fn call(function: Function, args: Vec<Expr>) -> Result<Self> {
        let expected = function.arg_types();
        if args.len() != expected.len() {
            return Err(DbError::Parse(format!(
                "function {} expects {} arguments, got {}",
                function,
                expected.len(),
                args.len()
            ))
            .into());
        }
        for (arg, expected) in args.iter().zip(expected) {
            if arg.output_type() != *expected {
                return Err(DbError::Parse(format!(
                    "function {} expects a {} argument, got {}",
                    function,
                    expected,
                    arg.output_type()
                ))
                .into());
            }
        }
        Ok(Self::Call { function, args })
    }

    pub fn output_type(&self) -> TypeId {
        match self {
            Self::Column { column, .. } => column.type_id,
            Self::Literal(value) => value.type_id(),
            Self::Call { function, .. } => function.output_type(),
        }
    }

    /// Column the expression contributes to an output schema. Calls inherit
    /// the name of their first column argument so projections of e.g.
    /// `sq(age)` still read as `age`.
    pub fn output_column(&self) -> Column {
        match self {
            Self::Column { column, .. } => column.clone(),
            Self::Literal(value) => Column::new("const", "", value.type_id()),
            Self::Call { function, args } => {
                let name = args
                    .iter()
                    .find_map(|arg| match arg {
                        Self::Column { column, .. } => Some(column.name.clone()),
                        _ => None,
                    })
                    .unwrap_or_else(|| function.name().to_owned());
                Column::new(name, "", function.output_type())
            }
        }
    }

    pub fn evaluate(&self, tuple: &Tuple) -> Result<Value> {
        match self {
            Self::Column { index, .. } => Ok(tuple.value(*index).clone()),
            Self::Literal(value) => Ok(value.clone()),
            Self::Call { function, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(arg.evaluate(tuple)?);
                }
                function.apply(&values)
            }
        }
    }

    /// Evaluates an expression that must not reference any column, like a
    /// LIMIT count or a filter constant.
    pub fn evaluate_constant(&self) -> Result<Value> {
        match self {
            Self::Column { column, .. } => Err(DbError::IllegalOperation(format!(
                "expected a constant, found column {}",
                column.name
            ))
            .into()),
            _ => self.evaluate(&Tuple::new(vec![])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Expr, Function};
    use crate::tuple::schema::{Column, TypeId};
    use crate::tuple::value::Value;
    use crate::tuple::Tuple;

    fn age_column() -> Expr {
        Expr::column(1, Column::new("age", "people", TypeId::Integer))
    }

    fn sample() -> Tuple {
        Tuple::new(vec![Value::String("sam".to_owned()), Value::Integer(25)])
    }

    #[test]
    fn arithmetic_over_columns_and_literals() {
        // age * 2 + 1
        let expr = Expr::call(
            Function::Add,
            vec![
                Expr::call(
                    Function::Multiply,
                    vec![age_column(), Expr::literal(Value::Integer(2))],
                )
                .unwrap(),
                Expr::literal(Value::Integer(1)),
            ],
        )
        .unwrap();
        assert_eq!(expr.evaluate(&sample()).unwrap(), Value::Integer(51));
    }

    #[test]
    fn call_arguments_are_type_checked() {
        let name = Expr::column(0, Column::new("name", "people", TypeId::Text));
        assert!(Expr::call(Function::Add, vec![name.clone(), age_column()]).is_err());
        assert!(Expr::call(Function::Add, vec![age_column()]).is_err());
        assert!(Expr::call(
            Function::SubString,
            vec![
                name,
                Expr::literal(Value::Integer(0)),
                Expr::literal(Value::Integer(2))
            ]
        )
        .is_ok());
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let expr = Expr::call(
            Function::Divide,
            vec![age_column(), Expr::literal(Value::Integer(0))],
        )
        .unwrap();
        assert!(expr.evaluate(&sample()).is_err());
    }

    #[test]
    fn substring_clamps_to_bounds() {
        let name = || Expr::column(0, Column::new("name", "people", TypeId::Text));
        let substr = |start: i64, count: i64| {
            Expr::call(
                Function::SubString,
                vec![
                    name(),
                    Expr::literal(Value::Integer(start)),
                    Expr::literal(Value::Integer(count)),
                ],
            )
            .unwrap()
            .evaluate(&sample())
            .unwrap()
        };
        assert_eq!(substr(0, 2), Value::String("sa".to_owned()));
        assert_eq!(substr(1, 10), Value::String("am".to_owned()));
        assert_eq!(substr(-1, 2), Value::String(String::new()));
        assert_eq!(substr(5, 2), Value::String(String::new()));
    }

    #[test]
    fn date_conversions_round_trip() {
        let to_epoch = Expr::call(
            Function::DateToEpoch,
            vec![Expr::literal(Value::String("2024-03-01".to_owned()))],
        )
        .unwrap();
        let epoch = to_epoch.evaluate_constant().unwrap();

        let back = Expr::call(Function::EpochToString, vec![Expr::literal(epoch)])
            .unwrap()
            .evaluate_constant()
            .unwrap();
        assert_eq!(back, Value::String("2024-03-01 00:00:00".to_owned()));
    }

    #[test]
    fn unparsable_dates_become_epoch_zero() {
        let expr = Expr::call(
            Function::DateToEpoch,
            vec![Expr::literal(Value::String("not a date".to_owned()))],
        )
        .unwrap();
        assert_eq!(expr.evaluate_constant().unwrap(), Value::Integer(0));
    }

    #[test]
    fn constants_refuse_column_references() {
        assert!(age_column().evaluate_constant().is_err());
        assert!(Expr::literal(Value::Integer(3)).evaluate_constant().is_ok());
    }

    #[test]
    fn output_column_takes_the_inner_field_name() {
        let expr = Expr::call(Function::Square, vec![age_column()]).unwrap();
        assert_eq!(expr.output_column().name, "age");
        assert_eq!(expr.output_column().type_id, TypeId::Integer);
    }
}

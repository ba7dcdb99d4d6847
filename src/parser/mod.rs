use std::sync::Arc;

use anyhow::Result;

use self::token::{tokenize, Keyword, Token};
use crate::catalog::Catalog;
use crate::concurrency::TransactionId;
use crate::error::DbError;
use crate::executors::aggregate_executor::{
    build_state, AggregateExecutor, AggregateFunction,
};
use crate::executors::delete_executor::DeleteExecutor;
use crate::executors::filter_executor::FilterExecutor;
use crate::executors::insert_executor::{InsertExecutor, ValuesExecutor};
use crate::executors::limit_executor::LimitExecutor;
use crate::executors::nested_loop_join_executor::NestedLoopJoinExecutor;
use crate::executors::order_by_executor::OrderByExecutor;
use crate::executors::projection_executor::ProjectionExecutor;
use crate::executors::seq_scan_executor::SeqScanExecutor;
use crate::executors::Executor;
use crate::query::expr::{Expr, Function};
use crate::query::predicate::{CompareOp, Predicate};
use crate::tuple::schema::Schema;
use crate::tuple::value::Value;
use crate::tuple::Tuple;

pub mod token;

/// Unbound expression as written in the statement; binding against a schema
/// happens when the executor tree is built.
#[derive(Clone, Debug, PartialEq)]
pub enum Ast {
    Column { table: Option<String>, name: String },
    Literal(Value),
    Call { name: String, args: Vec<Ast> },
    /// only valid inside count(*)
    Wildcard,
}

#[derive(Debug, PartialEq)]
pub struct Condition {
    pub left: Ast,
    pub op: CompareOp,
    pub right: Ast,
}

#[derive(Debug, PartialEq)]
pub enum SelectItem {
    Wildcard,
    Expr { ast: Ast, alias: Option<String> },
}

#[derive(Debug, PartialEq)]
pub struct JoinClause {
    pub table: String,
    pub left: Ast,
    pub right: Ast,
}

#[derive(Debug, PartialEq)]
pub struct SelectStatement {
    pub distinct: bool,
    pub items: Vec<SelectItem>,
    pub table: String,
    pub join: Option<JoinClause>,
    pub conditions: Vec<Condition>,
    pub group_by: Vec<Ast>,
    pub order_by: Vec<(Ast, bool)>,
    pub limit: Option<i64>,
}

#[derive(Debug, PartialEq)]
pub enum Statement {
    Select(SelectStatement),
    Insert { table: String, rows: Vec<Vec<Value>> },
    Delete { table: String, conditions: Vec<Condition> },
    Begin,
    Commit,
    Rollback,
}

pub fn parse_statement(sql: &str) -> Result<Statement> {
    let tokens = tokenize(sql)?;
    let mut parser = Parser { tokens, pos: 0 };
    let statement = parser.statement()?;
    parser.consume_if(&Token::Semicolon);
    if let Some(token) = parser.peek() {
        return Err(DbError::Parse(format!("unexpected trailing input at {:?}", token)).into());
    }
    Ok(statement)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Result<&Token> {
        let token = self
            .tokens
            .get(self.pos)
            .ok_or_else(|| DbError::Parse("unexpected end of statement".to_owned()))?;
        self.pos += 1;
        Ok(token)
    }

    fn consume_if(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn consume_keyword(&mut self, keyword: Keyword) -> bool {
        self.consume_if(&Token::Keyword(keyword))
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> Result<()> {
        if self.consume_keyword(keyword) {
            Ok(())
        } else {
            Err(DbError::Parse(format!(
                "expected {:?}, found {:?}",
                keyword,
                self.peek()
            ))
            .into())
        }
    }

    fn expect_token(&mut self, token: Token) -> Result<()> {
        if self.consume_if(&token) {
            Ok(())
        } else {
            Err(DbError::Parse(format!("expected {:?}, found {:?}", token, self.peek())).into())
        }
    }

    fn identifier(&mut self) -> Result<String> {
        match self.advance()? {
            Token::Identifier(name) => Ok(name.clone()),
            token => Err(DbError::Parse(format!("expected an identifier, found {:?}", token)).into()),
        }
    }

    fn statement(&mut self) -> Result<Statement> {
        match self.advance()? {
            Token::Keyword(Keyword::Select) => self.select(),
            Token::Keyword(Keyword::Insert) => self.insert(),
            Token::Keyword(Keyword::Delete) => self.delete(),
            Token::Keyword(Keyword::Begin) => Ok(Statement::Begin),
            Token::Keyword(Keyword::Commit) => Ok(Statement::Commit),
            Token::Keyword(Keyword::Rollback) => Ok(Statement::Rollback),
            token => Err(DbError::Parse(format!("cannot start a statement with {:?}", token)).into()),
        }
    }

    fn select(&mut self) -> Result<Statement> {
        let distinct = self.consume_keyword(Keyword::Distinct);

        let mut items = vec![];
        loop {
            if self.consume_if(&Token::Star) {
                items.push(SelectItem::Wildcard);
            } else {
                let ast = self.expr()?;
                let alias = if self.consume_keyword(Keyword::As) {
                    Some(self.identifier()?)
                } else {
                    None
                };
                items.push(SelectItem::Expr { ast, alias });
            }
            if !self.consume_if(&Token::Comma) {
                break;
            }
        }

        self.expect_keyword(Keyword::From)?;
        let table = self.identifier()?;

        let join = if self.consume_keyword(Keyword::Join) {
            let join_table = self.identifier()?;
            self.expect_keyword(Keyword::On)?;
            let left = self.expr()?;
            self.expect_token(Token::Eq)?;
            let right = self.expr()?;
            Some(JoinClause {
                table: join_table,
                left,
                right,
            })
        } else {
            None
        };

        let conditions = self.where_clause()?;

        let mut group_by = vec![];
        if self.consume_keyword(Keyword::Group) {
            self.expect_keyword(Keyword::By)?;
            loop {
                group_by.push(self.expr()?);
                if !self.consume_if(&Token::Comma) {
                    break;
                }
            }
        }

        let mut order_by = vec![];
        if self.consume_keyword(Keyword::Order) {
            self.expect_keyword(Keyword::By)?;
            loop {
                let key = self.expr()?;
                let ascending = if self.consume_keyword(Keyword::Desc) {
                    false
                } else {
                    self.consume_keyword(Keyword::Asc);
                    true
                };
                order_by.push((key, ascending));
                if !self.consume_if(&Token::Comma) {
                    break;
                }
            }
        }

        let limit = if self.consume_keyword(Keyword::Limit) {
            Some(self.integer()?)
        } else {
            None
        };

        Ok(Statement::Select(SelectStatement {
            distinct,
            items,
            table,
            join,
            conditions,
            group_by,
            order_by,
            limit,
        }))
    }

    fn insert(&mut self) -> Result<Statement> {
        self.expect_keyword(Keyword::Into)?;
        let table = self.identifier()?;
        self.expect_keyword(Keyword::Values)?;

        let mut rows = vec![];
        loop {
            self.expect_token(Token::LeftParen)?;
            let mut row = vec![];
            loop {
                let ast = self.expr()?;
                let value = bind_ast(&ast, &Schema::empty())?.evaluate_constant()?;
                row.push(value);
                if !self.consume_if(&Token::Comma) {
                    break;
                }
            }
            self.expect_token(Token::RightParen)?;
            rows.push(row);
            if !self.consume_if(&Token::Comma) {
                break;
            }
        }

        Ok(Statement::Insert { table, rows })
    }

    fn delete(&mut self) -> Result<Statement> {
        self.expect_keyword(Keyword::From)?;
        let table = self.identifier()?;
        let conditions = self.where_clause()?;
        Ok(Statement::Delete { table, conditions })
    }

    fn where_clause(&mut self) -> Result<Vec<Condition>> {
        let mut conditions = vec![];
        if !self.consume_keyword(Keyword::Where) {
            return Ok(conditions);
        }
        loop {
            let left = self.expr()?;
            let op = match self.advance()? {
                Token::Eq => CompareOp::Eq,
                Token::NotEq => CompareOp::NotEq,
                Token::Less => CompareOp::Less,
                Token::LessEq => CompareOp::LessEq,
                Token::Greater => CompareOp::Greater,
                Token::GreaterEq => CompareOp::GreaterEq,
                Token::Keyword(Keyword::Like) => CompareOp::Like,
                token => {
                    return Err(
                        DbError::Parse(format!("expected a comparison, found {:?}", token)).into(),
                    )
                }
            };
            let right = self.expr()?;
            conditions.push(Condition { left, op, right });
            if !self.consume_keyword(Keyword::And) {
                break;
            }
        }
        Ok(conditions)
    }

    fn integer(&mut self) -> Result<i64> {
        let negative = self.consume_if(&Token::Minus);
        match self.advance()? {
            Token::Number(digits) => {
                let n: i64 = digits
                    .parse()
                    .map_err(|_| DbError::Parse(format!("bad number {}", digits)))?;
                Ok(if negative { -n } else { n })
            }
            token => Err(DbError::Parse(format!("expected a number, found {:?}", token)).into()),
        }
    }

    /// expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<Ast> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => "+",
                Some(Token::Minus) => "-",
                _ => break,
            };
            self.pos += 1;
            let right = self.term()?;
            left = Ast::Call {
                name: op.to_owned(),
                args: vec![left, right],
            };
        }
        Ok(left)
    }

    /// term := factor (('*' | '/' | '%') factor)*
    fn term(&mut self) -> Result<Ast> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => "*",
                Some(Token::Division) => "/",
                Some(Token::Modulo) => "mod",
                _ => break,
            };
            self.pos += 1;
            let right = self.factor()?;
            left = Ast::Call {
                name: op.to_owned(),
                args: vec![left, right],
            };
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<Ast> {
        if self.consume_if(&Token::Minus) {
            let inner = self.factor()?;
            return Ok(match inner {
                Ast::Literal(Value::Integer(n)) => Ast::Literal(Value::Integer(-n)),
                inner => Ast::Call {
                    name: "-".to_owned(),
                    args: vec![Ast::Literal(Value::Integer(0)), inner],
                },
            });
        }
        if self.consume_if(&Token::LeftParen) {
            let inner = self.expr()?;
            self.expect_token(Token::RightParen)?;
            return Ok(inner);
        }

        match self.advance()? {
            Token::Number(digits) => {
                let n: i64 = digits
                    .parse()
                    .map_err(|_| DbError::Parse(format!("bad number {}", digits)))?;
                Ok(Ast::Literal(Value::Integer(n)))
            }
            Token::QuotedString(s) => Ok(Ast::Literal(Value::String(s.clone()))),
            Token::Identifier(name) => {
                let name = name.clone();
                if self.consume_if(&Token::LeftParen) {
                    // function or aggregate call
                    let mut args = vec![];
                    if !self.consume_if(&Token::RightParen) {
                        loop {
                            if self.consume_if(&Token::Star) {
                                args.push(Ast::Wildcard);
                            } else {
                                args.push(self.expr()?);
                            }
                            if !self.consume_if(&Token::Comma) {
                                break;
                            }
                        }
                        self.expect_token(Token::RightParen)?;
                    }
                    Ok(Ast::Call { name, args })
                } else if self.consume_if(&Token::Dot) {
                    let column = self.identifier()?;
                    Ok(Ast::Column {
                        table: Some(name),
                        name: column,
                    })
                } else {
                    Ok(Ast::Column { table: None, name })
                }
            }
            token => Err(DbError::Parse(format!("unexpected {:?} in expression", token)).into()),
        }
    }
}

/// Resolves an unbound expression against a schema.
fn bind_ast(ast: &Ast, schema: &Schema) -> Result<Expr> {
    match ast {
        Ast::Column { table, name } => {
            let index = schema.find_column(table.as_deref(), name)?;
            Ok(Expr::column(index, schema.columns()[index].clone()))
        }
        Ast::Literal(value) => Ok(Expr::literal(value.clone())),
        Ast::Call { name, args } => {
            let function = Function::from_name(name)
                .ok_or_else(|| DbError::Parse(format!("unknown function {}", name)))?;
            let mut bound = Vec::with_capacity(args.len());
            for arg in args {
                bound.push(bind_ast(arg, schema)?);
            }
            Expr::call(function, bound)
        }
        Ast::Wildcard => {
            Err(DbError::Parse("* is only valid in count(*) or select *".to_owned()).into())
        }
    }
}

/// Splits `name(arg)` into an aggregate call if the name is one.
fn aggregate_call(ast: &Ast) -> Option<(AggregateFunction, &[Ast])> {
    match ast {
        Ast::Call { name, args } => {
            AggregateFunction::from_name(name).map(|function| (function, args.as_slice()))
        }
        _ => None,
    }
}

fn item_name(item: &SelectItem, ast: &Ast) -> String {
    if let SelectItem::Expr {
        alias: Some(alias), ..
    } = item
    {
        return alias.clone();
    }
    match ast {
        Ast::Column { name, .. } => name.clone(),
        Ast::Call { name, .. } => match AggregateFunction::from_name(name) {
            Some(_) => name.clone(),
            None => "expr".to_owned(),
        },
        _ => "expr".to_owned(),
    }
}

/// Builds the executor tree for a select/insert/delete statement under the
/// given transaction. BEGIN/COMMIT/ROLLBACK never reach this point.
pub fn build_executor(
    statement: &Statement,
    catalog: &Catalog,
    tid: TransactionId,
) -> Result<Box<dyn Executor>> {
    match statement {
        Statement::Select(select) => build_select(select, catalog, tid),
        Statement::Insert { table, rows } => {
            let table = catalog.table(table)?;
            let rows: Vec<Tuple> = rows.iter().map(|row| Tuple::new(row.clone())).collect();
            let values = Box::new(ValuesExecutor::new(rows, table.schema().clone())?);
            Ok(Box::new(InsertExecutor::new(table, values, tid)))
        }
        Statement::Delete { table, conditions } => {
            let table = catalog.table(table)?;
            let mut child: Box<dyn Executor> =
                Box::new(SeqScanExecutor::new(Arc::clone(&table), tid));
            for condition in conditions {
                child = apply_condition(child, condition)?;
            }
            Ok(Box::new(DeleteExecutor::new(table, child, tid)))
        }
        _ => Err(DbError::IllegalOperation(
            "transaction control statements have no executor".to_owned(),
        )
        .into()),
    }
}

fn apply_condition(child: Box<dyn Executor>, condition: &Condition) -> Result<Box<dyn Executor>> {
    let schema = child.schema().clone();
    let left = bind_ast(&condition.left, &schema)?;
    let right = bind_ast(&condition.right, &schema)?;
    let predicate = Predicate::new(left, condition.op, right)?;
    Ok(Box::new(FilterExecutor::new(child, predicate)))
}

fn build_select(
    select: &SelectStatement,
    catalog: &Catalog,
    tid: TransactionId,
) -> Result<Box<dyn Executor>> {
    let table = catalog.table(&select.table)?;
    let mut executor: Box<dyn Executor> = Box::new(SeqScanExecutor::new(Arc::clone(&table), tid));

    if let Some(join) = &select.join {
        let right_table = catalog.table(&join.table)?;
        let right_scan = Box::new(SeqScanExecutor::new(Arc::clone(&right_table), tid));
        let left_schema = executor.schema().clone();
        let right_schema = right_table.schema().clone();
        // the on-clause may name the sides in either order
        let (left_expr, right_expr) = match (
            bind_ast(&join.left, &left_schema),
            bind_ast(&join.right, &right_schema),
        ) {
            (Ok(left), Ok(right)) => (left, right),
            _ => (
                bind_ast(&join.right, &left_schema)?,
                bind_ast(&join.left, &right_schema)?,
            ),
        };
        executor = Box::new(NestedLoopJoinExecutor::new(
            executor, right_scan, left_expr, right_expr,
        )?);
    }

    for condition in &select.conditions {
        executor = apply_condition(executor, condition)?;
    }

    let aggregated = !select.group_by.is_empty()
        || select.items.iter().any(|item| match item {
            SelectItem::Expr { ast, .. } => aggregate_call(ast).is_some(),
            SelectItem::Wildcard => false,
        });

    if aggregated {
        executor = build_aggregate(select, executor)?;
    } else {
        let schema = executor.schema().clone();
        let mut exprs = vec![];
        let mut names = vec![];
        for item in &select.items {
            match item {
                SelectItem::Wildcard => {
                    for (index, column) in schema.columns().iter().enumerate() {
                        exprs.push(Expr::column(index, column.clone()));
                        names.push(column.name.clone());
                    }
                }
                SelectItem::Expr { ast, .. } => {
                    exprs.push(bind_ast(ast, &schema)?);
                    names.push(item_name(item, ast));
                }
            }
        }
        executor = Box::new(ProjectionExecutor::new(
            executor,
            exprs,
            names,
            select.distinct,
        )?);
    }

    if !select.order_by.is_empty() {
        let schema = executor.schema().clone();
        let mut keys = vec![];
        for (ast, ascending) in &select.order_by {
            keys.push((bind_ast(ast, &schema)?, *ascending));
        }
        executor = Box::new(OrderByExecutor::new(executor, keys)?);
    }

    if let Some(limit) = select.limit {
        executor = Box::new(LimitExecutor::new(
            executor,
            Expr::literal(Value::Integer(limit)),
        )?);
    }

    Ok(executor)
}

/// Grouped or plain aggregation: every select item must be either one of
/// the group-by expressions or an aggregate call.
fn build_aggregate(
    select: &SelectStatement,
    child: Box<dyn Executor>,
) -> Result<Box<dyn Executor>> {
    enum Pick {
        Group(usize),
        Aggregate(usize),
    }

    let input_schema = child.schema().clone();
    let mut group_exprs = vec![];
    for ast in &select.group_by {
        group_exprs.push(bind_ast(ast, &input_schema)?);
    }

    let mut template = vec![];
    let mut picks = vec![];
    let mut names = vec![];
    for item in &select.items {
        let ast = match item {
            SelectItem::Wildcard => {
                return Err(DbError::Parse(
                    "select * cannot be combined with aggregation".to_owned(),
                )
                .into())
            }
            SelectItem::Expr { ast, .. } => ast,
        };
        names.push(item_name(item, ast));

        match aggregate_call(ast) {
            Some((function, args)) => {
                let expr = match args {
                    [Ast::Wildcard] if function == AggregateFunction::Count => {
                        Expr::literal(Value::Integer(1))
                    }
                    [arg] => bind_ast(arg, &input_schema)?,
                    _ => {
                        return Err(DbError::Parse(format!(
                            "{:?} takes exactly one argument",
                            function
                        ))
                        .into())
                    }
                };
                let alias = names.last().expect("just pushed").clone();
                template.push(build_state(function, alias, expr)?);
                picks.push(Pick::Aggregate(template.len() - 1));
            }
            None => {
                let position = select
                    .group_by
                    .iter()
                    .position(|group| group == ast)
                    .ok_or_else(|| {
                        DbError::Parse(format!(
                            "{:?} appears in the select list but not in group by",
                            ast
                        ))
                    })?;
                picks.push(Pick::Group(position));
            }
        }
    }

    let group_count = group_exprs.len();
    let aggregate = Box::new(AggregateExecutor::new(child, group_exprs, template));
    let aggregate_schema = aggregate.schema().clone();

    let exprs = picks
        .iter()
        .map(|pick| {
            let index = match pick {
                Pick::Group(i) => *i,
                Pick::Aggregate(j) => group_count + j,
            };
            Expr::column(index, aggregate_schema.columns()[index].clone())
        })
        .collect();

    Ok(Box::new(ProjectionExecutor::new(
        aggregate,
        exprs,
        names,
        select.distinct,
    )?))
}

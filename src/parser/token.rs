use std::iter::{Enumerate, Peekable};
use std::str::{Chars, FromStr};

use anyhow::Result;

use crate::error::DbError;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Keyword {
    And,
    As,
    Asc,
    Begin,
    By,
    Commit,
    Delete,
    Desc,
    Distinct,
    From,
    Group,
    Insert,
    Into,
    Join,
    Like,
    Limit,
    On,
    Order,
    Rollback,
    Select,
    Values,
    Where,
}

impl FromStr for Keyword {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let res = match s {
            "and" => Self::And,
            "as" => Self::As,
            "asc" => Self::Asc,
            "begin" => Self::Begin,
            "by" => Self::By,
            "commit" => Self::Commit,
            "delete" => Self::Delete,
            "desc" => Self::Desc,
            "distinct" => Self::Distinct,
            "from" => Self::From,
            "group" => Self::Group,
            "insert" => Self::Insert,
            "into" => Self::Into,
            "join" => Self::Join,
            "like" => Self::Like,
            "limit" => Self::Limit,
            "on" => Self::On,
            "order" => Self::Order,
            "rollback" => Self::Rollback,
            "select" => Self::Select,
            "values" => Self::Values,
            "where" => Self::Where,
            _ => return Err(()),
        };
        Ok(res)
    }
}

#[derive(Debug, PartialEq)]
pub enum Token {
    /// an SQL identifier
    Identifier(String),
    /// a keyword (e.g. SELECT)
    Keyword(Keyword),
    /// a number, like 123
    Number(String),
    /// a quoted string
    QuotedString(String),
    Dot,
    Comma,
    LeftParen,
    RightParen,
    Semicolon,
    Star,
    Minus,
    Plus,
    Division,
    Modulo,
    Eq,
    NotEq,
    Less,
    Greater,
    LessEq,
    GreaterEq,
}

struct Tokenizer<'a> {
    sql: &'a str,
    chars: Peekable<Enumerate<Chars<'a>>>,
}

impl<'a> Tokenizer<'a> {
    fn new(sql: &'a str) -> Self {
        Self {
            sql,
            chars: sql.chars().enumerate().peekable(),
        }
    }

    fn word(&mut self, start: usize) -> String {
        let mut end = start + 1;
        while let Some((pos, ch)) = self.chars.peek() {
            if ch.is_ascii_alphanumeric() || *ch == '_' {
                end = *pos + 1;
                self.chars.next();
            } else {
                break;
            }
        }
        self.sql[start..end].to_lowercase()
    }

    fn number(&mut self, start: usize) -> String {
        let mut end = start + 1;
        while let Some((pos, ch)) = self.chars.peek() {
            if ch.is_ascii_digit() {
                end = *pos + 1;
                self.chars.next();
            } else {
                break;
            }
        }
        self.sql[start..end].to_owned()
    }

    fn quoted_string(&mut self, start: usize) -> Result<String> {
        for (pos, ch) in self.chars.by_ref() {
            if ch == '\'' {
                return Ok(self.sql[start..pos].to_owned());
            }
        }
        Err(DbError::Parse(format!("unterminated string literal {}", &self.sql[start..])).into())
    }

    fn next_token(&mut self) -> Result<Option<Token>> {
        let token = match self.chars.next() {
            Some((pos, ch)) => match ch {
                ch if ch.is_whitespace() => return self.next_token(),
                '(' => Token::LeftParen,
                ')' => Token::RightParen,
                ';' => Token::Semicolon,
                ',' => Token::Comma,
                '.' => Token::Dot,
                '*' => Token::Star,
                '+' => Token::Plus,
                '-' => Token::Minus,
                '/' => Token::Division,
                '%' => Token::Modulo,
                '=' => Token::Eq,
                '!' => match self.chars.peek() {
                    Some((_pos, '=')) => {
                        self.chars.next();
                        Token::NotEq
                    }
                    _ => {
                        return Err(DbError::Parse("unexpected character '!'".to_owned()).into())
                    }
                },
                '<' => match self.chars.peek() {
                    Some((_pos, '>')) => {
                        self.chars.next();
                        Token::NotEq
                    }
                    Some((_pos, '=')) => {
                        self.chars.next();
                        Token::LessEq
                    }
                    _ => Token::Less,
                },
                '>' => match self.chars.peek() {
                    Some((_pos, '=')) => {
                        self.chars.next();
                        Token::GreaterEq
                    }
                    _ => Token::Greater,
                },
                '\'' => Token::QuotedString(self.quoted_string(pos + 1)?),
                'a'..='z' | 'A'..='Z' | '_' => {
                    let word = self.word(pos);
                    match Keyword::from_str(&word) {
                        Ok(keyword) => Token::Keyword(keyword),
                        Err(()) => Token::Identifier(word),
                    }
                }
                '0'..='9' => Token::Number(self.number(pos)),
                ch => {
                    return Err(DbError::Parse(format!("unexpected character '{}'", ch)).into())
                }
            },
            None => return Ok(None),
        };

        Ok(Some(token))
    }
}

pub fn tokenize(sql: &str) -> Result<Vec<Token>> {
    let mut tokens = vec![];
    let mut tokenizer = Tokenizer::new(sql);
    while let Some(token) = tokenizer.next_token()? {
        tokens.push(token);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::{tokenize, Keyword, Token};

    #[test]
    fn tokenizes_a_filtered_select() {
        let sql = "select name, age from people where age >= 21;";
        let tokens = tokenize(sql).unwrap();
        let expected = vec![
            Token::Keyword(Keyword::Select),
            Token::Identifier("name".to_owned()),
            Token::Comma,
            Token::Identifier("age".to_owned()),
            Token::Keyword(Keyword::From),
            Token::Identifier("people".to_owned()),
            Token::Keyword(Keyword::Where),
            Token::Identifier("age".to_owned()),
            Token::GreaterEq,
            Token::Number("21".to_owned()),
            Token::Semicolon,
        ];
        assert_eq!(tokens, expected);
    }

    #[test]
    fn identifiers_fold_to_lowercase_and_strings_do_not() {
        let tokens = tokenize("SELECT Name FROM People WHERE Name = 'Sam'").unwrap();
        assert_eq!(tokens[1], Token::Identifier("name".to_owned()));
        assert_eq!(tokens[3], Token::Identifier("people".to_owned()));
        assert_eq!(tokens[7], Token::QuotedString("Sam".to_owned()));
    }

    #[test]
    fn unterminated_strings_fail() {
        assert!(tokenize("select 'oops").is_err());
    }

    #[test]
    fn comparison_operators() {
        let tokens = tokenize("< <= > >= = <> !=").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Less,
                Token::LessEq,
                Token::Greater,
                Token::GreaterEq,
                Token::Eq,
                Token::NotEq,
                Token::NotEq,
            ]
        );
    }
}

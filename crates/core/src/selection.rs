//! The filter expression language: compile once, evaluate anywhere.
//!
//! Grammar (precedence `not` > `and` > `or`, parentheses override):
//!
//! ```text
//! expr      := and_expr ('or' and_expr)*
//! and_expr  := term ('and' term)*
//! term      := ['not'] atom
//! atom      := field_cmp | '(' expr ')'
//! field_cmp := field op value
//! field     := 'date' | 'value' | 'category' | 'text'
//! op        := '=' | '!=' | '<' | '<=' | '>' | '>=' | '~'
//! ```
//!
//! Malformed input fails at compile time with the offending byte
//! position; a compiled expression evaluates to true or false for every
//! transaction without ever erroring.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::category::Catalog;
use super::transaction::Transaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Date,
    Value,
    Category,
    Text,
}

impl Field {
    fn name(self) -> &'static str {
        match self {
            Field::Date => "date",
            Field::Value => "value",
            Field::Category => "category",
            Field::Text => "text",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
}

impl CmpOp {
    fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Contains => "~",
        }
    }
}

/// A date operand: a full day, or a whole month/year given as a prefix.
/// `=` means "within the period"; ordering operators compare against the
/// period's first or last day as appropriate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DatePattern {
    Day(NaiveDate),
    Month { year: i32, month: u32 },
    Year(i32),
}

impl DatePattern {
    fn try_first_day(self) -> Option<NaiveDate> {
        match self {
            DatePattern::Day(d) => Some(d),
            DatePattern::Month { year, month } => NaiveDate::from_ymd_opt(year, month, 1),
            DatePattern::Year(year) => NaiveDate::from_ymd_opt(year, 1, 1),
        }
    }

    fn try_last_day(self) -> Option<NaiveDate> {
        match self {
            DatePattern::Day(d) => Some(d),
            DatePattern::Month { year, month } => {
                let (ny, nm) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
                NaiveDate::from_ymd_opt(ny, nm, 1).and_then(|d| d.pred_opt())
            }
            DatePattern::Year(year) => NaiveDate::from_ymd_opt(year, 12, 31),
        }
    }

    // Both bounds were checked when the pattern was parsed.
    fn first_day(self) -> NaiveDate {
        self.try_first_day().expect("validated at parse")
    }

    fn last_day(self) -> NaiveDate {
        self.try_last_day().expect("validated at parse")
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Date(DatePattern),
    Amount(Decimal),
    /// `None` is the explicit uncategorized sentinel (the bare word
    /// `none`); quoting yields the literal category name instead.
    Category(Option<String>),
    /// Lowercased needle for case-insensitive containment.
    Needle(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Cmp {
        field: Field,
        op: CmpOp,
        operand: Operand,
    },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

/// Compile-time failure, carrying the byte position of the offending
/// token within the source expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SelectionError {
    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { pos: usize, ch: char },
    #[error("unterminated quoted value starting at position {pos}")]
    UnterminatedQuote { pos: usize },
    #[error("unexpected end of expression at position {pos}")]
    UnexpectedEnd { pos: usize },
    #[error("expected {expected} at position {pos}, found '{found}'")]
    Unexpected {
        pos: usize,
        expected: &'static str,
        found: String,
    },
    #[error("unknown field '{name}' at position {pos}")]
    UnknownField { pos: usize, name: String },
    #[error("operator '{op}' is not defined for field '{field}' (position {pos})")]
    InvalidOperator {
        pos: usize,
        field: &'static str,
        op: &'static str,
    },
    #[error("invalid {what} '{value}' at position {pos}")]
    InvalidValue {
        pos: usize,
        what: &'static str,
        value: String,
    },
}

impl SelectionError {
    /// Byte offset of the offending token in the source expression.
    pub fn position(&self) -> usize {
        match *self {
            SelectionError::UnexpectedChar { pos, .. }
            | SelectionError::UnterminatedQuote { pos }
            | SelectionError::UnexpectedEnd { pos }
            | SelectionError::Unexpected { pos, .. }
            | SelectionError::UnknownField { pos, .. }
            | SelectionError::InvalidOperator { pos, .. }
            | SelectionError::InvalidValue { pos, .. } => pos,
        }
    }
}

/// A compiled boolean predicate over transactions.
#[derive(Debug, Clone)]
pub struct Selection {
    expr: Expr,
    source: String,
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Selection {
    pub fn compile(source: &str) -> Result<Self, SelectionError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0, src_len: source.len() };
        let expr = parser.parse_expr()?;
        if let Some(tok) = parser.peek() {
            return Err(SelectionError::Unexpected {
                pos: tok.pos,
                expected: "'and', 'or' or end of expression",
                found: tok.describe(),
            });
        }
        Ok(Selection { expr, source: source.to_owned() })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Pure and total: never errors, never mutates. Hierarchical
    /// category matching consults the catalog.
    pub fn matches(&self, trn: &Transaction, catalog: &Catalog) -> bool {
        eval(&self.expr, trn, catalog)
    }
}

fn eval(expr: &Expr, trn: &Transaction, catalog: &Catalog) -> bool {
    match expr {
        Expr::Not(inner) => !eval(inner, trn, catalog),
        Expr::And(a, b) => eval(a, trn, catalog) && eval(b, trn, catalog),
        Expr::Or(a, b) => eval(a, trn, catalog) || eval(b, trn, catalog),
        Expr::Cmp { field: _, op, operand } => match operand {
            Operand::Date(pattern) => {
                let d = trn.date;
                match op {
                    CmpOp::Eq => d >= pattern.first_day() && d <= pattern.last_day(),
                    CmpOp::Ne => d < pattern.first_day() || d > pattern.last_day(),
                    CmpOp::Lt => d < pattern.first_day(),
                    CmpOp::Le => d <= pattern.last_day(),
                    CmpOp::Gt => d > pattern.last_day(),
                    CmpOp::Ge => d >= pattern.first_day(),
                    CmpOp::Contains => false,
                }
            }
            Operand::Amount(amount) => {
                let v = trn.value.as_decimal();
                match op {
                    CmpOp::Eq => v == *amount,
                    CmpOp::Ne => v != *amount,
                    CmpOp::Lt => v < *amount,
                    CmpOp::Le => v <= *amount,
                    CmpOp::Gt => v > *amount,
                    CmpOp::Ge => v >= *amount,
                    CmpOp::Contains => false,
                }
            }
            Operand::Category(wanted) => {
                let hit = match (trn.category(), wanted.as_deref()) {
                    (None, None) => true,
                    (None, Some(_)) | (Some(_), None) => false,
                    (Some(have), Some(want)) => {
                        have == want || catalog.is_descendant(have, want)
                    }
                };
                match op {
                    CmpOp::Eq => hit,
                    CmpOp::Ne => !hit,
                    _ => false,
                }
            }
            Operand::Needle(needle) => trn
                .fields()
                .any(|(_, value)| value.to_lowercase().contains(needle.as_str())),
        },
    }
}

// ── lexer ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Word(String),
    Quoted(String),
    Op(CmpOp),
    LParen,
    RParen,
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    pos: usize,
    tok: Tok,
}

impl Token {
    fn describe(&self) -> String {
        match &self.tok {
            Tok::Word(w) => w.clone(),
            Tok::Quoted(q) => format!("'{q}'"),
            Tok::Op(op) => op.symbol().to_owned(),
            Tok::LParen => "(".to_owned(),
            Tok::RParen => ")".to_owned(),
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | '+' | ':')
}

fn tokenize(source: &str) -> Result<Vec<Token>, SelectionError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token { pos, tok: Tok::LParen });
            }
            ')' => {
                chars.next();
                tokens.push(Token { pos, tok: Tok::RParen });
            }
            '~' => {
                chars.next();
                tokens.push(Token { pos, tok: Tok::Op(CmpOp::Contains) });
            }
            '=' => {
                chars.next();
                tokens.push(Token { pos, tok: Tok::Op(CmpOp::Eq) });
            }
            '!' => {
                chars.next();
                match chars.peek() {
                    Some(&(_, '=')) => {
                        chars.next();
                        tokens.push(Token { pos, tok: Tok::Op(CmpOp::Ne) });
                    }
                    _ => return Err(SelectionError::UnexpectedChar { pos, ch: '!' }),
                }
            }
            '<' => {
                chars.next();
                let op = if matches!(chars.peek(), Some(&(_, '='))) {
                    chars.next();
                    CmpOp::Le
                } else {
                    CmpOp::Lt
                };
                tokens.push(Token { pos, tok: Tok::Op(op) });
            }
            '>' => {
                chars.next();
                let op = if matches!(chars.peek(), Some(&(_, '='))) {
                    chars.next();
                    CmpOp::Ge
                } else {
                    CmpOp::Gt
                };
                tokens.push(Token { pos, tok: Tok::Op(op) });
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some((_, ch)) if ch == quote => break,
                        Some((_, ch)) => value.push(ch),
                        None => return Err(SelectionError::UnterminatedQuote { pos }),
                    }
                }
                tokens.push(Token { pos, tok: Tok::Quoted(value) });
            }
            c if is_word_char(c) => {
                let mut word = String::new();
                while let Some(&(_, ch)) = chars.peek() {
                    if is_word_char(ch) {
                        word.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token { pos, tok: Tok::Word(word) });
            }
            other => return Err(SelectionError::UnexpectedChar { pos, ch: other }),
        }
    }

    Ok(tokens)
}

// ── parser ────────────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    src_len: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn peek_is_word(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token { tok: Tok::Word(w), .. }) if w == word)
    }

    fn parse_expr(&mut self) -> Result<Expr, SelectionError> {
        let mut lhs = self.parse_and()?;
        while self.peek_is_word("or") {
            self.pos += 1;
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, SelectionError> {
        let mut lhs = self.parse_term()?;
        while self.peek_is_word("and") {
            self.pos += 1;
            let rhs = self.parse_term()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr, SelectionError> {
        if self.peek_is_word("not") {
            self.pos += 1;
            let inner = self.parse_term()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<Expr, SelectionError> {
        let Some(token) = self.peek().cloned() else {
            return Err(SelectionError::UnexpectedEnd { pos: self.src_len });
        };

        match token.tok {
            Tok::LParen => {
                self.pos += 1;
                let expr = self.parse_expr()?;
                match self.advance() {
                    Some(Token { tok: Tok::RParen, .. }) => Ok(expr),
                    Some(tok) => Err(SelectionError::Unexpected {
                        pos: tok.pos,
                        expected: "')'",
                        found: tok.describe(),
                    }),
                    None => Err(SelectionError::UnexpectedEnd { pos: self.src_len }),
                }
            }
            Tok::Word(ref word) => {
                let field = match word.as_str() {
                    "date" => Field::Date,
                    "value" => Field::Value,
                    "category" => Field::Category,
                    "text" => Field::Text,
                    _ => {
                        return Err(SelectionError::UnknownField {
                            pos: token.pos,
                            name: word.clone(),
                        })
                    }
                };
                self.pos += 1;
                self.parse_comparison(field)
            }
            _ => Err(SelectionError::Unexpected {
                pos: token.pos,
                expected: "field name or '('",
                found: token.describe(),
            }),
        }
    }

    fn parse_comparison(&mut self, field: Field) -> Result<Expr, SelectionError> {
        let (op, op_pos) = match self.advance() {
            Some(Token { tok: Tok::Op(op), pos }) => (op, pos),
            Some(tok) => {
                return Err(SelectionError::Unexpected {
                    pos: tok.pos,
                    expected: "comparison operator",
                    found: tok.describe(),
                })
            }
            None => return Err(SelectionError::UnexpectedEnd { pos: self.src_len }),
        };

        let ok = match field {
            Field::Date | Field::Value => op != CmpOp::Contains,
            Field::Category => matches!(op, CmpOp::Eq | CmpOp::Ne),
            Field::Text => op == CmpOp::Contains,
        };
        if !ok {
            return Err(SelectionError::InvalidOperator {
                pos: op_pos,
                field: field.name(),
                op: op.symbol(),
            });
        }

        let (value, value_pos, quoted) = match self.advance() {
            Some(Token { tok: Tok::Word(w), pos }) => (w, pos, false),
            Some(Token { tok: Tok::Quoted(q), pos }) => (q, pos, true),
            Some(tok) => {
                return Err(SelectionError::Unexpected {
                    pos: tok.pos,
                    expected: "value",
                    found: tok.describe(),
                })
            }
            None => return Err(SelectionError::UnexpectedEnd { pos: self.src_len }),
        };

        let operand = match field {
            Field::Date => Operand::Date(parse_date_pattern(&value, value_pos)?),
            Field::Value => {
                let raw = value.strip_prefix('+').unwrap_or(&value);
                let amount = Decimal::from_str(raw).map_err(|_| SelectionError::InvalidValue {
                    pos: value_pos,
                    what: "decimal value",
                    value: value.clone(),
                })?;
                Operand::Amount(amount)
            }
            // The bare word `none` is the uncategorized sentinel; a
            // quoted 'none' names a category literally.
            Field::Category if !quoted && value == "none" => Operand::Category(None),
            Field::Category => Operand::Category(Some(value)),
            Field::Text => Operand::Needle(value.to_lowercase()),
        };

        Ok(Expr::Cmp { field, op, operand })
    }
}

fn parse_date_pattern(value: &str, pos: usize) -> Result<DatePattern, SelectionError> {
    let invalid = || SelectionError::InvalidValue {
        pos,
        what: "date",
        value: value.to_owned(),
    };

    let parts: Vec<&str> = value.split('-').collect();
    let num = |s: &str| -> Result<u32, SelectionError> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        s.parse().map_err(|_| invalid())
    };

    let pattern = match parts.as_slice() {
        [y] => DatePattern::Year(num(y)? as i32),
        [y, m] => {
            let month = num(m)?;
            if !(1..=12).contains(&month) {
                return Err(invalid());
            }
            DatePattern::Month { year: num(y)? as i32, month }
        }
        [y, m, d] => {
            let date = NaiveDate::from_ymd_opt(num(y)? as i32, num(m)?, num(d)?)
                .ok_or_else(invalid)?;
            DatePattern::Day(date)
        }
        _ => return Err(invalid()),
    };

    // Out-of-range years fail here, never at evaluation time.
    if pattern.try_first_day().is_none() || pattern.try_last_day().is_none() {
        return Err(invalid());
    }
    Ok(pattern)
}

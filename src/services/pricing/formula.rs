//! Spreadsheet formula parsing and evaluation.
//!
//! Covers the subset of Excel used by the calculation workbook: arithmetic,
//! comparison and concatenation operators, percent literals, cell and range
//! references (optionally sheet-qualified), whole-column ranges, error
//! literals and a set of common worksheet functions including the
//! conditional aggregates and `VLOOKUP`.

use std::cmp::Ordering;
use std::fmt;

use thiserror::Error;

// ============================================================================
// Cell addressing
// ============================================================================

/// Zero-based cell coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellRef {
    pub row: u32,
    pub col: u32,
}

impl CellRef {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Parse an A1-style address, accepting `$` anchors.
    pub fn parse(a1: &str) -> Result<Self, FormulaError> {
        let invalid = || FormulaError::InvalidReference(a1.to_string());
        let cleaned: String = a1.chars().filter(|c| *c != '$').collect();
        let split = cleaned
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(invalid)?;
        let (letters, digits) = cleaned.split_at(split);
        let col = column_index(letters).ok_or_else(invalid)?;
        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }

        let row: u32 = digits.parse().map_err(|_| invalid())?;
        if row == 0 {
            return Err(invalid());
        }

        Ok(Self::new(row - 1, col))
    }

    pub fn to_a1(&self) -> String {
        let mut letters = Vec::new();
        let mut n = self.col + 1;
        while n > 0 {
            let rem = (n - 1) % 26;
            letters.push((b'A' + rem as u8) as char);
            n = (n - 1) / 26;
        }
        letters.reverse();
        format!("{}{}", letters.into_iter().collect::<String>(), self.row + 1)
    }
}

/// Zero-based index of a column name such as `C` or `$AB`.
fn column_index(letters: &str) -> Option<u32> {
    let letters = letters.trim_start_matches('$');
    if letters.is_empty() || letters.len() > 3 || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let col = letters
        .chars()
        .fold(0u32, |acc, c| acc * 26 + (c.to_ascii_uppercase() as u32 - 'A' as u32 + 1));
    Some(col - 1)
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_a1())
    }
}

// ============================================================================
// Values
// ============================================================================

/// Excel error values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorValue {
    Div0,
    Value,
    Ref,
    Name,
    NotAvailable,
    Num,
    Null,
}

impl ErrorValue {
    fn from_literal(lit: &str) -> Option<Self> {
        match lit.to_ascii_uppercase().as_str() {
            "#DIV/0!" => Some(Self::Div0),
            "#VALUE!" => Some(Self::Value),
            "#REF!" => Some(Self::Ref),
            "#NAME?" => Some(Self::Name),
            "#N/A" => Some(Self::NotAvailable),
            "#NUM!" => Some(Self::Num),
            "#NULL!" => Some(Self::Null),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Div0 => "#DIV/0!",
            Self::Value => "#VALUE!",
            Self::Ref => "#REF!",
            Self::Name => "#NAME?",
            Self::NotAvailable => "#N/A",
            Self::Num => "#NUM!",
            Self::Null => "#NULL!",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
    Bool(bool),
    Empty,
    Error(ErrorValue),
}

impl Value {
    pub fn as_number(&self) -> Result<f64, ErrorValue> {
        match self {
            Self::Number(n) => Ok(*n),
            Self::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Self::Empty => Ok(0.0),
            Self::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err(ErrorValue::Value);
                }
                trimmed.parse::<f64>().map_err(|_| ErrorValue::Value)
            }
            Self::Error(e) => Err(*e),
        }
    }

    fn as_bool(&self) -> Result<bool, ErrorValue> {
        match self {
            Self::Bool(b) => Ok(*b),
            Self::Number(n) => Ok(*n != 0.0),
            Self::Empty => Ok(false),
            Self::Text(s) => match s.trim().to_ascii_uppercase().as_str() {
                "TRUE" => Ok(true),
                "FALSE" => Ok(false),
                _ => Err(ErrorValue::Value),
            },
            Self::Error(e) => Err(*e),
        }
    }

    fn as_text(&self) -> Result<String, ErrorValue> {
        match self {
            Self::Text(s) => Ok(s.clone()),
            Self::Number(n) => Ok(format_number(*n)),
            Self::Bool(b) => Ok(if *b { "TRUE" } else { "FALSE" }.to_string()),
            Self::Empty => Ok(String::new()),
            Self::Error(e) => Err(*e),
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Self::Number(_) | Self::Empty => 0,
            Self::Text(_) => 1,
            Self::Bool(_) => 2,
            Self::Error(_) => 3,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => f.write_str(&format_number(*n)),
            Self::Text(s) => f.write_str(s),
            Self::Bool(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
            Self::Empty => Ok(()),
            Self::Error(e) => write!(f, "{}", e),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

// ============================================================================
// Syntax tree
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(String),
    Bool(bool),
    Error(ErrorValue),
    Ref {
        sheet: Option<String>,
        cell: CellRef,
    },
    Range {
        sheet: Option<String>,
        start: CellRef,
        end: CellRef,
    },
    /// Whole columns such as `A:C`, bounded by the sheet's last used row.
    Columns {
        sheet: Option<String>,
        first: u32,
        last: u32,
    },
    Negate(Box<Expr>),
    Percent(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Error, PartialEq)]
pub enum FormulaError {
    #[error("invalid cell reference '{0}'")]
    InvalidReference(String),

    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("unexpected token {found} in formula")]
    UnexpectedToken { found: String },

    #[error("formula ended unexpectedly")]
    UnexpectedEnd,

    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("unsupported name '{0}'")]
    UnknownName(String),
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Text(String),
    Ident(String),
    Sheet(String),
    Error(ErrorValue),
    Op(&'static str),
    LParen,
    RParen,
    Separator,
    Colon,
    Percent,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "number {}", n),
            Self::Text(s) => write!(f, "string \"{}\"", s),
            Self::Ident(s) => write!(f, "'{}'", s),
            Self::Sheet(s) => write!(f, "sheet '{}'", s),
            Self::Error(e) => write!(f, "{}", e),
            Self::Op(op) => write!(f, "'{}'", op),
            Self::LParen => f.write_str("'('"),
            Self::RParen => f.write_str("')'"),
            Self::Separator => f.write_str("','"),
            Self::Colon => f.write_str("':'"),
            Self::Percent => f.write_str("'%'"),
        }
    }
}

fn tokenize(src: &str) -> Result<Vec<Token>, FormulaError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' | ';' => {
                tokens.push(Token::Separator);
                i += 1;
            }
            ':' => {
                tokens.push(Token::Colon);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '+' | '-' | '*' | '/' | '^' | '&' | '=' => {
                tokens.push(Token::Op(match c {
                    '+' => "+",
                    '-' => "-",
                    '*' => "*",
                    '/' => "/",
                    '^' => "^",
                    '&' => "&",
                    _ => "=",
                }));
                i += 1;
            }
            '<' => {
                let op = match chars.get(i + 1) {
                    Some('=') => "<=",
                    Some('>') => "<>",
                    _ => "<",
                };
                i += op.len();
                tokens.push(Token::Op(op));
            }
            '>' => {
                let op = if chars.get(i + 1) == Some(&'=') { ">=" } else { ">" };
                i += op.len();
                tokens.push(Token::Op(op));
            }
            '"' => {
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(FormulaError::UnterminatedString),
                        Some('"') if chars.get(i + 1) == Some(&'"') => {
                            text.push('"');
                            i += 2;
                        }
                        Some('"') => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            text.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Text(text));
            }
            '\'' => {
                let mut name = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(FormulaError::UnterminatedString),
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            name.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            name.push(*ch);
                            i += 1;
                        }
                    }
                }
                if chars.get(i) != Some(&'!') {
                    return Err(FormulaError::UnexpectedToken { found: format!("'{}'", name) });
                }
                i += 1;
                tokens.push(Token::Sheet(name));
            }
            '#' => {
                let start = i;
                i += 1;
                while i < chars.len() && !matches!(chars[i], '!' | '?') && !chars[i].is_whitespace() && chars[i] != ')' && chars[i] != ',' {
                    i += 1;
                }
                if i < chars.len() && matches!(chars[i], '!' | '?') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let err = ErrorValue::from_literal(&literal)
                    .ok_or(FormulaError::UnknownName(literal))?;
                tokens.push(Token::Error(err));
            }
            c if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // Exponent part, e.g. 1.5E+3
                if i < chars.len() && matches!(chars[i], 'e' | 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && matches!(chars[j], '+' | '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let literal: String = chars[start..i].iter().collect();
                let n = literal
                    .parse::<f64>()
                    .map_err(|_| FormulaError::UnexpectedToken { found: literal.clone() })?;
                tokens.push(Token::Number(n));
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '.' | '$')) {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                if chars.get(i) == Some(&'!') {
                    i += 1;
                    tokens.push(Token::Sheet(ident));
                } else {
                    tokens.push(Token::Ident(ident));
                }
            }
            other => return Err(FormulaError::UnexpectedChar { ch: other, pos: i }),
        }
    }

    Ok(tokens)
}

// ============================================================================
// Parser
// ============================================================================

/// Parse a formula. A leading `=` is optional.
pub fn parse(formula: &str) -> Result<Expr, FormulaError> {
    let body = formula.trim();
    let body = body.strip_prefix('=').unwrap_or(body);
    let tokens = tokenize(body)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.comparison()?;
    match parser.peek() {
        None => Ok(expr),
        Some(tok) => Err(FormulaError::UnexpectedToken { found: tok.to_string() }),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn peek_op(&self, ops: &[&str]) -> Option<&'static str> {
        match self.peek() {
            Some(Token::Op(op)) if ops.contains(op) => Some(*op),
            _ => None,
        }
    }

    fn comparison(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.concat()?;
        while let Some(op) = self.peek_op(&["=", "<>", "<", "<=", ">", ">="]) {
            self.pos += 1;
            let rhs = self.concat()?;
            let op = match op {
                "=" => BinaryOp::Eq,
                "<>" => BinaryOp::Ne,
                "<" => BinaryOp::Lt,
                "<=" => BinaryOp::Le,
                ">" => BinaryOp::Gt,
                _ => BinaryOp::Ge,
            };
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn concat(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.additive()?;
        while self.peek_op(&["&"]).is_some() {
            self.pos += 1;
            let rhs = self.additive()?;
            lhs = binary(BinaryOp::Concat, lhs, rhs);
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.multiplicative()?;
        while let Some(op) = self.peek_op(&["+", "-"]) {
            self.pos += 1;
            let rhs = self.multiplicative()?;
            let op = if op == "+" { BinaryOp::Add } else { BinaryOp::Sub };
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.power()?;
        while let Some(op) = self.peek_op(&["*", "/"]) {
            self.pos += 1;
            let rhs = self.power()?;
            let op = if op == "*" { BinaryOp::Mul } else { BinaryOp::Div };
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    // Excel binds unary minus tighter than `^`, so -2^2 is 4.
    fn power(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.unary()?;
        while self.peek_op(&["^"]).is_some() {
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = binary(BinaryOp::Pow, lhs, rhs);
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, FormulaError> {
        match self.peek_op(&["-", "+"]) {
            Some("-") => {
                self.pos += 1;
                Ok(Expr::Negate(Box::new(self.unary()?)))
            }
            Some(_) => {
                self.pos += 1;
                self.unary()
            }
            None => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Result<Expr, FormulaError> {
        let mut expr = self.primary()?;
        while matches!(self.peek(), Some(Token::Percent)) {
            self.pos += 1;
            expr = Expr::Percent(Box::new(expr));
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, FormulaError> {
        match self.next() {
            None => Err(FormulaError::UnexpectedEnd),
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Text(s)) => Ok(Expr::Text(s)),
            Some(Token::Error(e)) => Ok(Expr::Error(e)),
            Some(Token::LParen) => {
                let expr = self.comparison()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            Some(Token::Sheet(sheet)) => match self.next() {
                Some(Token::Ident(ident)) => self.reference(Some(sheet), &ident),
                Some(tok) => Err(FormulaError::UnexpectedToken { found: tok.to_string() }),
                None => Err(FormulaError::UnexpectedEnd),
            },
            Some(Token::Ident(ident)) => {
                if matches!(self.peek(), Some(Token::LParen)) {
                    self.pos += 1;
                    let args = self.arguments()?;
                    return Ok(Expr::Call {
                        name: ident.to_ascii_uppercase(),
                        args,
                    });
                }
                match ident.to_ascii_uppercase().as_str() {
                    "TRUE" => Ok(Expr::Bool(true)),
                    "FALSE" => Ok(Expr::Bool(false)),
                    _ => self.reference(None, &ident),
                }
            }
            Some(tok) => Err(FormulaError::UnexpectedToken { found: tok.to_string() }),
        }
    }

    fn reference(&mut self, sheet: Option<String>, ident: &str) -> Result<Expr, FormulaError> {
        if matches!(self.peek(), Some(Token::Colon)) {
            if let Some(first) = column_index(ident) {
                return self.columns(sheet, first);
            }
        }
        let start = CellRef::parse(ident).map_err(|_| FormulaError::UnknownName(ident.to_string()))?;
        if !matches!(self.peek(), Some(Token::Colon)) {
            return Ok(Expr::Ref { sheet, cell: start });
        }
        self.pos += 1;
        let end = match self.next() {
            Some(Token::Ident(end)) => CellRef::parse(&end)?,
            Some(tok) => return Err(FormulaError::UnexpectedToken { found: tok.to_string() }),
            None => return Err(FormulaError::UnexpectedEnd),
        };
        Ok(Expr::Range {
            sheet,
            start: CellRef::new(start.row.min(end.row), start.col.min(end.col)),
            end: CellRef::new(start.row.max(end.row), start.col.max(end.col)),
        })
    }

    fn columns(&mut self, sheet: Option<String>, first: u32) -> Result<Expr, FormulaError> {
        self.pos += 1;
        let last = match self.next() {
            Some(Token::Ident(end)) => {
                column_index(&end).ok_or(FormulaError::InvalidReference(end.clone()))?
            }
            Some(tok) => return Err(FormulaError::UnexpectedToken { found: tok.to_string() }),
            None => return Err(FormulaError::UnexpectedEnd),
        };
        Ok(Expr::Columns {
            sheet,
            first: first.min(last),
            last: first.max(last),
        })
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, FormulaError> {
        let mut args = Vec::new();
        if matches!(self.peek(), Some(Token::RParen)) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            // An omitted argument, e.g. IF(A1,,2), evaluates as empty.
            if matches!(self.peek(), Some(Token::Separator) | Some(Token::RParen)) {
                args.push(Expr::Text(String::new()));
            } else {
                args.push(self.comparison()?);
            }
            match self.next() {
                Some(Token::Separator) => continue,
                Some(Token::RParen) => return Ok(args),
                Some(tok) => return Err(FormulaError::UnexpectedToken { found: tok.to_string() }),
                None => return Err(FormulaError::UnexpectedEnd),
            }
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), FormulaError> {
        match self.next() {
            Some(tok) if tok == expected => Ok(()),
            Some(tok) => Err(FormulaError::UnexpectedToken { found: tok.to_string() }),
            None => Err(FormulaError::UnexpectedEnd),
        }
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

// ============================================================================
// Evaluation
// ============================================================================

/// Resolves referenced cells while a formula is evaluated.
pub trait CellSource {
    fn cell_value(&mut self, sheet: Option<&str>, cell: CellRef) -> Value;

    /// Zero-based index of the last row holding a cell, `None` for an empty sheet.
    fn last_row(&mut self, sheet: Option<&str>) -> Option<u32>;
}

/// Evaluate an expression to a single value.
pub fn evaluate(expr: &Expr, ctx: &mut dyn CellSource) -> Value {
    match expr {
        Expr::Number(n) => Value::Number(*n),
        Expr::Text(s) => Value::Text(s.clone()),
        Expr::Bool(b) => Value::Bool(*b),
        Expr::Error(e) => Value::Error(*e),
        Expr::Ref { sheet, cell } => ctx.cell_value(sheet.as_deref(), *cell),
        Expr::Range { sheet, start, end } => {
            // Single-cell ranges collapse to the cell; anything wider has no scalar value.
            if start == end {
                ctx.cell_value(sheet.as_deref(), *start)
            } else {
                Value::Error(ErrorValue::Value)
            }
        }
        Expr::Columns { .. } => Value::Error(ErrorValue::Value),
        Expr::Negate(inner) => numeric(evaluate(inner, ctx), |n| Value::Number(-n)),
        Expr::Percent(inner) => numeric(evaluate(inner, ctx), |n| Value::Number(n / 100.0)),
        Expr::Binary { op, lhs, rhs } => {
            let lhs = evaluate(lhs, ctx);
            let rhs = evaluate(rhs, ctx);
            apply_binary(*op, lhs, rhs)
        }
        Expr::Call { name, args } => call_function(name, args, ctx),
    }
}

fn numeric(value: Value, f: impl FnOnce(f64) -> Value) -> Value {
    match value.as_number() {
        Ok(n) => f(n),
        Err(e) => Value::Error(e),
    }
}

fn apply_binary(op: BinaryOp, lhs: Value, rhs: Value) -> Value {
    if let Value::Error(e) = lhs {
        return Value::Error(e);
    }
    if let Value::Error(e) = rhs {
        return Value::Error(e);
    }

    match op {
        BinaryOp::Concat => match (lhs.as_text(), rhs.as_text()) {
            (Ok(a), Ok(b)) => Value::Text(a + &b),
            (Err(e), _) | (_, Err(e)) => Value::Error(e),
        },
        BinaryOp::Eq => Value::Bool(compare(&lhs, &rhs) == Ordering::Equal),
        BinaryOp::Ne => Value::Bool(compare(&lhs, &rhs) != Ordering::Equal),
        BinaryOp::Lt => Value::Bool(compare(&lhs, &rhs) == Ordering::Less),
        BinaryOp::Le => Value::Bool(compare(&lhs, &rhs) != Ordering::Greater),
        BinaryOp::Gt => Value::Bool(compare(&lhs, &rhs) == Ordering::Greater),
        BinaryOp::Ge => Value::Bool(compare(&lhs, &rhs) != Ordering::Less),
        arithmetic => {
            let (a, b) = match (lhs.as_number(), rhs.as_number()) {
                (Ok(a), Ok(b)) => (a, b),
                (Err(e), _) | (_, Err(e)) => return Value::Error(e),
            };
            let result = match arithmetic {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => {
                    if b == 0.0 {
                        return Value::Error(ErrorValue::Div0);
                    }
                    a / b
                }
                BinaryOp::Pow => a.powf(b),
                _ => unreachable!("comparison and concatenation handled above"),
            };
            if result.is_finite() {
                Value::Number(result)
            } else {
                Value::Error(ErrorValue::Num)
            }
        }
    }
}

/// Excel ordering: numbers < text < booleans; text compares case-insensitively;
/// an empty cell behaves as 0 against numbers and "" against text.
fn compare(lhs: &Value, rhs: &Value) -> Ordering {
    match (lhs, rhs) {
        (Value::Empty, Value::Text(s)) => String::new().cmp(&s.to_lowercase()),
        (Value::Text(s), Value::Empty) => s.to_lowercase().cmp(&String::new()),
        (Value::Empty, Value::Bool(b)) => false.cmp(b),
        (Value::Bool(b), Value::Empty) => b.cmp(&false),
        (Value::Number(_) | Value::Empty, Value::Number(_) | Value::Empty) => {
            let a = lhs.as_number().unwrap_or(0.0);
            let b = rhs.as_number().unwrap_or(0.0);
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Value::Text(a), Value::Text(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        _ => lhs.type_rank().cmp(&rhs.type_rank()),
    }
}

// ============================================================================
// Functions
// ============================================================================

/// A function argument: either a single value or the cells of a range.
enum Arg {
    Scalar(Value),
    Range(Vec<Value>),
}

fn eval_arg(expr: &Expr, ctx: &mut dyn CellSource) -> Arg {
    match range_rows(expr, ctx) {
        Some(rows) => Arg::Range(rows.into_iter().flatten().collect()),
        None => Arg::Scalar(evaluate(expr, ctx)),
    }
}

/// Cells of a range expression, row by row. Whole columns stop at the last
/// used row of the sheet. `None` when the expression is not a range.
fn range_rows(expr: &Expr, ctx: &mut dyn CellSource) -> Option<Vec<Vec<Value>>> {
    let (sheet, start, end) = match expr {
        Expr::Range { sheet, start, end } => (sheet.as_deref(), *start, *end),
        Expr::Columns { sheet, first, last } => match ctx.last_row(sheet.as_deref()) {
            Some(last_row) => (sheet.as_deref(), CellRef::new(0, *first), CellRef::new(last_row, *last)),
            None => return Some(Vec::new()),
        },
        _ => return None,
    };

    let mut rows = Vec::with_capacity((end.row - start.row + 1) as usize);
    for row in start.row..=end.row {
        let cells = (start.col..=end.col)
            .map(|col| ctx.cell_value(sheet, CellRef::new(row, col)))
            .collect();
        rows.push(cells);
    }
    Some(rows)
}

/// Like [`range_rows`], but a single cell reference is a 1×1 area.
fn area(expr: &Expr, ctx: &mut dyn CellSource) -> Result<Vec<Vec<Value>>, ErrorValue> {
    match expr {
        Expr::Ref { sheet, cell } => Ok(vec![vec![ctx.cell_value(sheet.as_deref(), *cell)]]),
        other => range_rows(other, ctx).ok_or(ErrorValue::Value),
    }
}

/// Numbers contributed by aggregate arguments. Scalars are coerced; text and
/// booleans inside ranges are ignored, as in Excel.
fn collect_numbers(args: &[Expr], ctx: &mut dyn CellSource) -> Result<Vec<f64>, ErrorValue> {
    let mut numbers = Vec::new();
    for arg in args {
        match eval_arg(arg, ctx) {
            Arg::Scalar(Value::Empty) => {}
            Arg::Scalar(v) => numbers.push(v.as_number()?),
            Arg::Range(values) => {
                for v in values {
                    match v {
                        Value::Number(n) => numbers.push(n),
                        Value::Error(e) => return Err(e),
                        _ => {}
                    }
                }
            }
        }
    }
    Ok(numbers)
}

fn scalar(args: &[Expr], index: usize, ctx: &mut dyn CellSource) -> Value {
    match args.get(index) {
        Some(expr) => evaluate(expr, ctx),
        None => Value::Empty,
    }
}

fn number_arg(args: &[Expr], index: usize, default: f64, ctx: &mut dyn CellSource) -> Result<f64, ErrorValue> {
    match args.get(index) {
        None => Ok(default),
        Some(expr) => evaluate(expr, ctx).as_number(),
    }
}

fn arity(args: &[Expr], min: usize, max: usize) -> Result<(), ErrorValue> {
    if args.len() < min || args.len() > max {
        Err(ErrorValue::Value)
    } else {
        Ok(())
    }
}

/// Every function name [`evaluate`] understands.
pub const FUNCTIONS: &[&str] = &[
    "SUM", "PRODUCT", "MIN", "MAX", "AVERAGE", "COUNT", "COUNTA", "ROUND", "ROUNDUP", "ROUNDDOWN",
    "CEILING", "FLOOR", "INT", "ABS", "MOD", "IF", "IFERROR", "AND", "OR", "NOT", "SUMPRODUCT",
    "SUMIF", "COUNTIF", "VLOOKUP",
];

/// Functions called anywhere in `expr` that are missing from [`FUNCTIONS`].
pub fn unsupported_functions(expr: &Expr) -> Vec<String> {
    fn walk(expr: &Expr, found: &mut Vec<String>) {
        match expr {
            Expr::Call { name, args } => {
                if !FUNCTIONS.contains(&name.as_str()) && !found.contains(name) {
                    found.push(name.clone());
                }
                for arg in args {
                    walk(arg, found);
                }
            }
            Expr::Negate(inner) | Expr::Percent(inner) => walk(inner, found),
            Expr::Binary { lhs, rhs, .. } => {
                walk(lhs, found);
                walk(rhs, found);
            }
            _ => {}
        }
    }
    let mut found = Vec::new();
    walk(expr, &mut found);
    found
}

fn call_function(name: &str, args: &[Expr], ctx: &mut dyn CellSource) -> Value {
    let result = match name {
        "SUM" => collect_numbers(args, ctx).map(|ns| Value::Number(ns.iter().sum())),
        "PRODUCT" => collect_numbers(args, ctx).map(|ns| {
            if ns.is_empty() {
                Value::Number(0.0)
            } else {
                Value::Number(ns.iter().product())
            }
        }),
        "MIN" => collect_numbers(args, ctx)
            .map(|ns| Value::Number(ns.iter().copied().fold(None, |m: Option<f64>, n| Some(m.map_or(n, |m| m.min(n)))).unwrap_or(0.0))),
        "MAX" => collect_numbers(args, ctx)
            .map(|ns| Value::Number(ns.iter().copied().fold(None, |m: Option<f64>, n| Some(m.map_or(n, |m| m.max(n)))).unwrap_or(0.0))),
        "AVERAGE" => collect_numbers(args, ctx).and_then(|ns| {
            if ns.is_empty() {
                Err(ErrorValue::Div0)
            } else {
                Ok(Value::Number(ns.iter().sum::<f64>() / ns.len() as f64))
            }
        }),
        "COUNT" => Ok(Value::Number(count_where(args, ctx, |v| matches!(v, Value::Number(_))))),
        "COUNTA" => Ok(Value::Number(count_where(args, ctx, |v| !matches!(v, Value::Empty)))),
        "ROUND" => round_with(args, ctx, |x| x.round()),
        "ROUNDUP" => round_with(args, ctx, |x| x.signum() * x.abs().ceil()),
        "ROUNDDOWN" => round_with(args, ctx, |x| x.trunc()),
        "CEILING" => multiple_of(args, ctx, f64::ceil),
        "FLOOR" => multiple_of(args, ctx, f64::floor),
        "INT" => arity(args, 1, 1).and_then(|_| number_arg(args, 0, 0.0, ctx)).map(|n| Value::Number(n.floor())),
        "ABS" => arity(args, 1, 1).and_then(|_| number_arg(args, 0, 0.0, ctx)).map(|n| Value::Number(n.abs())),
        "MOD" => arity(args, 2, 2).and_then(|_| {
            let n = number_arg(args, 0, 0.0, ctx)?;
            let d = number_arg(args, 1, 0.0, ctx)?;
            if d == 0.0 {
                Err(ErrorValue::Div0)
            } else {
                Ok(Value::Number(n - d * (n / d).floor()))
            }
        }),
        "IF" => arity(args, 1, 3).and_then(|_| {
            let condition = evaluate(&args[0], ctx).as_bool()?;
            if condition {
                Ok(args.get(1).map_or(Value::Bool(true), |e| evaluate(e, ctx)))
            } else {
                Ok(args.get(2).map_or(Value::Bool(false), |e| evaluate(e, ctx)))
            }
        }),
        "IFERROR" => arity(args, 2, 2).map(|_| match evaluate(&args[0], ctx) {
            Value::Error(_) => evaluate(&args[1], ctx),
            v => v,
        }),
        "AND" => logical(args, ctx, true),
        "OR" => logical(args, ctx, false),
        "NOT" => arity(args, 1, 1).and_then(|_| scalar(args, 0, ctx).as_bool()).map(|b| Value::Bool(!b)),
        "SUMPRODUCT" => sumproduct(args, ctx),
        "SUMIF" => sumif(args, ctx),
        "COUNTIF" => countif(args, ctx),
        "VLOOKUP" => vlookup(args, ctx),
        _ => Err(ErrorValue::Name),
    };

    result.unwrap_or_else(Value::Error)
}

fn count_where(args: &[Expr], ctx: &mut dyn CellSource, pred: impl Fn(&Value) -> bool) -> f64 {
    let mut count = 0usize;
    for arg in args {
        match eval_arg(arg, ctx) {
            Arg::Scalar(v) => count += usize::from(pred(&v)),
            Arg::Range(values) => count += values.iter().filter(|v| pred(v)).count(),
        }
    }
    count as f64
}

fn round_with(args: &[Expr], ctx: &mut dyn CellSource, f: impl Fn(f64) -> f64) -> Result<Value, ErrorValue> {
    arity(args, 1, 2)?;
    let n = number_arg(args, 0, 0.0, ctx)?;
    let digits = number_arg(args, 1, 0.0, ctx)?.trunc() as i32;
    let factor = 10f64.powi(digits.abs());
    let scaled = if digits >= 0 { n * factor } else { n / factor };
    // Strip binary representation noise (2.675 * 100 = 267.49999...) before rounding.
    let scaled = (scaled * 1e9).round() / 1e9;
    let rounded = f(scaled);
    Ok(Value::Number(if digits >= 0 { rounded / factor } else { rounded * factor }))
}

fn multiple_of(args: &[Expr], ctx: &mut dyn CellSource, f: fn(f64) -> f64) -> Result<Value, ErrorValue> {
    arity(args, 1, 2)?;
    let n = number_arg(args, 0, 0.0, ctx)?;
    let significance = number_arg(args, 1, 1.0, ctx)?;
    if significance == 0.0 {
        return Ok(Value::Number(0.0));
    }
    if n > 0.0 && significance < 0.0 {
        return Err(ErrorValue::Num);
    }
    let ratio = ((n / significance) * 1e9).round() / 1e9;
    Ok(Value::Number(f(ratio) * significance))
}

fn logical(args: &[Expr], ctx: &mut dyn CellSource, all: bool) -> Result<Value, ErrorValue> {
    if args.is_empty() {
        return Err(ErrorValue::Value);
    }
    let mut seen = false;
    let mut acc = all;
    for arg in args {
        let values = match eval_arg(arg, ctx) {
            Arg::Scalar(v) => vec![v],
            Arg::Range(vs) => vs.into_iter().filter(|v| matches!(v, Value::Number(_) | Value::Bool(_) | Value::Error(_))).collect(),
        };
        for v in values {
            if matches!(v, Value::Empty) {
                continue;
            }
            let b = v.as_bool()?;
            seen = true;
            acc = if all { acc && b } else { acc || b };
        }
    }
    if !seen {
        return Err(ErrorValue::Value);
    }
    Ok(Value::Bool(acc))
}

fn sumproduct(args: &[Expr], ctx: &mut dyn CellSource) -> Result<Value, ErrorValue> {
    if args.is_empty() {
        return Err(ErrorValue::Value);
    }
    let mut columns: Vec<Vec<Value>> = Vec::with_capacity(args.len());
    for arg in args {
        columns.push(match eval_arg(arg, ctx) {
            Arg::Scalar(v) => vec![v],
            Arg::Range(vs) => vs,
        });
    }
    let len = columns[0].len();
    if columns.iter().any(|c| c.len() != len) {
        return Err(ErrorValue::Value);
    }
    let mut total = 0.0;
    for i in 0..len {
        let mut product = 1.0;
        for column in &columns {
            product *= match &column[i] {
                Value::Number(n) => *n,
                Value::Error(e) => return Err(*e),
                _ => 0.0,
            };
        }
        total += product;
    }
    Ok(Value::Number(total))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CriteriaOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A `SUMIF`/`COUNTIF` condition such as `">=10"`, `"<>"` or `"Expose*"`.
#[derive(Debug, Clone, PartialEq)]
struct Criteria {
    op: CriteriaOp,
    operand: Value,
}

impl Criteria {
    fn parse(value: Value) -> Result<Self, ErrorValue> {
        let text = match value {
            Value::Error(e) => return Err(e),
            Value::Text(text) => text,
            other => {
                return Ok(Self {
                    op: CriteriaOp::Eq,
                    operand: other,
                })
            }
        };

        const PREFIXES: [(&str, CriteriaOp); 6] = [
            ("<=", CriteriaOp::Le),
            (">=", CriteriaOp::Ge),
            ("<>", CriteriaOp::Ne),
            ("<", CriteriaOp::Lt),
            (">", CriteriaOp::Gt),
            ("=", CriteriaOp::Eq),
        ];
        let (op, rest) = PREFIXES
            .iter()
            .find_map(|(prefix, op)| text.strip_prefix(prefix).map(|rest| (*op, rest)))
            .unwrap_or((CriteriaOp::Eq, text.as_str()));

        let operand = if rest.is_empty() {
            Value::Empty
        } else if let Ok(n) = rest.trim().parse::<f64>() {
            Value::Number(n)
        } else {
            match rest.trim().to_ascii_uppercase().as_str() {
                "TRUE" => Value::Bool(true),
                "FALSE" => Value::Bool(false),
                _ => Value::Text(rest.to_string()),
            }
        };
        Ok(Self { op, operand })
    }

    fn matches(&self, cell: &Value) -> bool {
        let blank = matches!(cell, Value::Empty) || matches!(cell, Value::Text(s) if s.is_empty());
        match (&self.operand, cell) {
            (_, Value::Error(_)) => false,
            (Value::Empty, _) => match self.op {
                CriteriaOp::Eq => blank,
                CriteriaOp::Ne => !blank,
                _ => false,
            },
            (Value::Text(pattern), _) if matches!(self.op, CriteriaOp::Eq | CriteriaOp::Ne) => {
                let hit = matches!(cell, Value::Text(s) if wildcard_match(pattern, s));
                (self.op == CriteriaOp::Eq) == hit
            }
            (operand, cell) => {
                let same_kind = matches!(
                    (operand, cell),
                    (Value::Number(_), Value::Number(_)) | (Value::Text(_), Value::Text(_)) | (Value::Bool(_), Value::Bool(_))
                );
                if !same_kind {
                    return self.op == CriteriaOp::Ne;
                }
                let ord = compare(cell, operand);
                match self.op {
                    CriteriaOp::Eq => ord == Ordering::Equal,
                    CriteriaOp::Ne => ord != Ordering::Equal,
                    CriteriaOp::Lt => ord == Ordering::Less,
                    CriteriaOp::Le => ord != Ordering::Greater,
                    CriteriaOp::Gt => ord == Ordering::Greater,
                    CriteriaOp::Ge => ord != Ordering::Less,
                }
            }
        }
    }
}

/// Case-insensitive match with `*` (any run), `?` (one character) and `~` escapes.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    enum Glob {
        Any,
        One,
        Lit(char),
    }

    let mut globs = Vec::new();
    let mut chars = pattern.chars().flat_map(char::to_lowercase).peekable();
    while let Some(c) = chars.next() {
        globs.push(match c {
            '~' if matches!(chars.peek(), Some('*' | '?' | '~')) => Glob::Lit(chars.next().unwrap_or('~')),
            '*' => Glob::Any,
            '?' => Glob::One,
            other => Glob::Lit(other),
        });
    }
    let text: Vec<char> = text.chars().flat_map(char::to_lowercase).collect();

    let (mut g, mut t) = (0usize, 0usize);
    let mut retry: Option<(usize, usize)> = None;
    while t < text.len() {
        match globs.get(g) {
            Some(Glob::Any) => {
                retry = Some((g, t));
                g += 1;
            }
            Some(Glob::One) => {
                g += 1;
                t += 1;
            }
            Some(Glob::Lit(c)) if *c == text[t] => {
                g += 1;
                t += 1;
            }
            _ => match retry {
                Some((rg, rt)) => {
                    retry = Some((rg, rt + 1));
                    g = rg + 1;
                    t = rt + 1;
                }
                None => return false,
            },
        }
    }
    globs[g..].iter().all(|glob| matches!(glob, Glob::Any))
}

fn sumif(args: &[Expr], ctx: &mut dyn CellSource) -> Result<Value, ErrorValue> {
    arity(args, 2, 3)?;
    let range = area(&args[0], ctx)?;
    let criteria = Criteria::parse(evaluate(&args[1], ctx))?;
    // The sum area is aligned on the criteria area's top-left cell.
    let sums = match args.get(2) {
        Some(expr) => area(expr, ctx)?,
        None => range.clone(),
    };

    let mut total = 0.0;
    for (r, row) in range.iter().enumerate() {
        for (c, cell) in row.iter().enumerate() {
            if !criteria.matches(cell) {
                continue;
            }
            match sums.get(r).and_then(|row| row.get(c)) {
                Some(Value::Number(n)) => total += n,
                Some(Value::Error(e)) => return Err(*e),
                _ => {}
            }
        }
    }
    Ok(Value::Number(total))
}

fn countif(args: &[Expr], ctx: &mut dyn CellSource) -> Result<Value, ErrorValue> {
    arity(args, 2, 2)?;
    let range = area(&args[0], ctx)?;
    let criteria = Criteria::parse(evaluate(&args[1], ctx))?;
    let count = range.iter().flatten().filter(|cell| criteria.matches(cell)).count();
    Ok(Value::Number(count as f64))
}

/// `VLOOKUP(value, table, column, [approximate])`. Approximate matching
/// expects the first column sorted ascending and takes the last key that is
/// not greater than the value.
fn vlookup(args: &[Expr], ctx: &mut dyn CellSource) -> Result<Value, ErrorValue> {
    arity(args, 3, 4)?;
    let needle = evaluate(&args[0], ctx);
    if let Value::Error(e) = needle {
        return Err(e);
    }
    let table = area(&args[1], ctx)?;
    let column = number_arg(args, 2, 1.0, ctx)?.trunc();
    let approximate = match args.get(3) {
        None => true,
        Some(expr) => evaluate(expr, ctx).as_bool()?,
    };

    if column < 1.0 {
        return Err(ErrorValue::Value);
    }
    let column = column as usize - 1;
    if table.first().is_some_and(|row| column >= row.len()) {
        return Err(ErrorValue::Ref);
    }

    let found = if approximate {
        let mut hit = None;
        for (i, row) in table.iter().enumerate() {
            let key = &row[0];
            if matches!(key, Value::Empty) || key.type_rank() != needle.type_rank() {
                continue;
            }
            if compare(key, &needle) == Ordering::Greater {
                break;
            }
            hit = Some(i);
        }
        hit
    } else {
        let exact = Criteria {
            op: CriteriaOp::Eq,
            operand: needle,
        };
        table
            .iter()
            .position(|row| !matches!(row[0], Value::Empty) && exact.matches(&row[0]))
    };

    let row = found.ok_or(ErrorValue::NotAvailable)?;
    Ok(match &table[row][column] {
        Value::Empty => Value::Number(0.0),
        other => other.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Grid(HashMap<(Option<String>, CellRef), Value>);

    impl Grid {
        fn with(mut self, a1: &str, value: Value) -> Self {
            self.0.insert((None, CellRef::parse(a1).unwrap()), value);
            self
        }

        fn with_sheet(mut self, sheet: &str, a1: &str, value: Value) -> Self {
            self.0
                .insert((Some(sheet.to_string()), CellRef::parse(a1).unwrap()), value);
            self
        }
    }

    impl CellSource for Grid {
        fn cell_value(&mut self, sheet: Option<&str>, cell: CellRef) -> Value {
            self.0
                .get(&(sheet.map(str::to_string), cell))
                .cloned()
                .unwrap_or(Value::Empty)
        }

        fn last_row(&mut self, sheet: Option<&str>) -> Option<u32> {
            let sheet = sheet.map(str::to_string);
            self.0
                .keys()
                .filter(|(s, _)| *s == sheet)
                .map(|(_, cell)| cell.row)
                .max()
        }
    }

    fn eval(formula: &str, grid: &mut Grid) -> Value {
        evaluate(&parse(formula).unwrap(), grid)
    }

    #[test]
    fn test_cell_ref_round_trip_addresses() {
        assert_eq!(CellRef::parse("A1").unwrap(), CellRef::new(0, 0));
        assert_eq!(CellRef::parse("$O$17").unwrap(), CellRef::new(16, 14));
        assert_eq!(CellRef::parse("AA10").unwrap(), CellRef::new(9, 26));
        assert_eq!(CellRef::new(99, 2).to_a1(), "C100");
        assert_eq!(CellRef::new(0, 27).to_a1(), "AB1");
        assert!(CellRef::parse("17").is_err());
        assert!(CellRef::parse("A0").is_err());
    }

    #[test]
    fn test_operator_precedence() {
        let mut grid = Grid::default();
        assert_eq!(eval("=1+2*3", &mut grid), Value::Number(7.0));
        assert_eq!(eval("=(1+2)*3", &mut grid), Value::Number(9.0));
        assert_eq!(eval("=-2^2", &mut grid), Value::Number(4.0));
        assert_eq!(eval("=2^3^2", &mut grid), Value::Number(64.0));
        assert_eq!(eval("=50%*200", &mut grid), Value::Number(100.0));
        assert_eq!(eval("=1+2>2", &mut grid), Value::Bool(true));
        assert_eq!(eval("=\"Rp \"&1000", &mut grid), Value::Text("Rp 1000".into()));
    }

    #[test]
    fn test_references_and_ranges() {
        let mut grid = Grid::default()
            .with("C22", Value::Number(100.0))
            .with("C23", Value::Number(2.0))
            .with("D22", Value::Text("label".into()))
            .with_sheet("Harga", "B2", Value::Number(12250.0))
            .with_sheet("Daftar Harga", "A1", Value::Number(5.0));

        assert_eq!(eval("=C22*$C$23", &mut grid), Value::Number(200.0));
        assert_eq!(eval("=SUM(C22:D23)", &mut grid), Value::Number(102.0));
        assert_eq!(eval("=C22*Harga!B2", &mut grid), Value::Number(1_225_000.0));
        assert_eq!(eval("='Daftar Harga'!A1+1", &mut grid), Value::Number(6.0));
        // Empty cells are zero in arithmetic.
        assert_eq!(eval("=Z99+1", &mut grid), Value::Number(1.0));
    }

    #[test]
    fn test_rounding_functions() {
        let mut grid = Grid::default();
        assert_eq!(eval("=ROUND(2.675,2)", &mut grid), Value::Number(2.68));
        assert_eq!(eval("=ROUND(-2.5,0)", &mut grid), Value::Number(-3.0));
        assert_eq!(eval("=ROUNDUP(1.01)", &mut grid), Value::Number(2.0));
        assert_eq!(eval("=ROUNDDOWN(1.99,0)", &mut grid), Value::Number(1.0));
        assert_eq!(eval("=ROUND(1234567,-3)", &mut grid), Value::Number(1_235_000.0));
        assert_eq!(eval("=CEILING(12.1,5)", &mut grid), Value::Number(15.0));
        assert_eq!(eval("=FLOOR(12.9,5)", &mut grid), Value::Number(10.0));
        assert_eq!(eval("=CEILING(5,-1)", &mut grid), Value::Error(ErrorValue::Num));
        assert_eq!(eval("=INT(-1.5)", &mut grid), Value::Number(-2.0));
        assert_eq!(eval("=MOD(-3,2)", &mut grid), Value::Number(1.0));
    }

    #[test]
    fn test_logical_functions_evaluate_lazily() {
        let mut grid = Grid::default().with("A1", Value::Number(0.0));
        assert_eq!(eval("=IF(A1>0,1/A1,0)", &mut grid), Value::Number(0.0));
        assert_eq!(eval("=IF(A1=0,\"none\")", &mut grid), Value::Text("none".into()));
        assert_eq!(eval("=IFERROR(1/A1,-1)", &mut grid), Value::Number(-1.0));
        assert_eq!(eval("=AND(TRUE,1,A1)", &mut grid), Value::Bool(false));
        assert_eq!(eval("=OR(FALSE,A1,2)", &mut grid), Value::Bool(true));
        assert_eq!(eval("=NOT(A1)", &mut grid), Value::Bool(true));
    }

    #[test]
    fn test_aggregates() {
        let mut grid = Grid::default()
            .with("A1", Value::Number(2.0))
            .with("A2", Value::Number(3.0))
            .with("A3", Value::Text("x".into()))
            .with("B1", Value::Number(10.0))
            .with("B2", Value::Number(20.0))
            .with("B3", Value::Number(30.0));

        assert_eq!(eval("=SUMPRODUCT(A1:A3,B1:B3)", &mut grid), Value::Number(80.0));
        assert_eq!(eval("=MAX(A1:B3)", &mut grid), Value::Number(30.0));
        assert_eq!(eval("=MIN(A1:A3,1)", &mut grid), Value::Number(1.0));
        assert_eq!(eval("=AVERAGE(B1:B3)", &mut grid), Value::Number(20.0));
        assert_eq!(eval("=COUNT(A1:A3)", &mut grid), Value::Number(2.0));
        assert_eq!(eval("=COUNTA(A1:A4)", &mut grid), Value::Number(3.0));
        assert_eq!(eval("=AVERAGE(C1:C3)", &mut grid), Value::Error(ErrorValue::Div0));
    }

    #[test]
    fn test_errors_propagate() {
        let mut grid = Grid::default().with("A1", Value::Error(ErrorValue::NotAvailable));
        assert_eq!(eval("=1/0", &mut grid), Value::Error(ErrorValue::Div0));
        assert_eq!(eval("=A1+1", &mut grid), Value::Error(ErrorValue::NotAvailable));
        assert_eq!(eval("=SUM(A1:A2)", &mut grid), Value::Error(ErrorValue::NotAvailable));
        assert_eq!(eval("=HLOOKUP(1,A1:A2,1)", &mut grid), Value::Error(ErrorValue::Name));
        assert_eq!(eval("=\"abc\"*2", &mut grid), Value::Error(ErrorValue::Value));
        assert_eq!(eval("=#REF!+1", &mut grid), Value::Error(ErrorValue::Ref));
    }

    /// Price table: name in A, litres in B, rate in C.
    fn price_table() -> Grid {
        Grid::default()
            .with("A1", Value::Text("Agenda 25 EC".into()))
            .with("B1", Value::Number(2.0))
            .with("C1", Value::Number(80_000.0))
            .with("A2", Value::Text("Expose 55 SC".into()))
            .with("B2", Value::Number(3.0))
            .with("C2", Value::Number(50_000.0))
            .with("A3", Value::Text("Premise 200 SL".into()))
            .with("B3", Value::Number(0.0))
            .with("C3", Value::Number(120_000.0))
            .with("E1", Value::Number(0.0))
            .with("F1", Value::Text("kecil".into()))
            .with("E2", Value::Number(200.0))
            .with("F2", Value::Text("sedang".into()))
            .with("E3", Value::Number(500.0))
            .with("F3", Value::Text("besar".into()))
    }

    #[test]
    fn test_vlookup_exact_and_approximate() {
        let mut grid = price_table();
        assert_eq!(eval("=VLOOKUP(\"expose 55 sc\",A1:C3,3,FALSE)", &mut grid), Value::Number(50_000.0));
        assert_eq!(eval("=VLOOKUP(\"Premise*\",A1:C3,2,0)", &mut grid), Value::Number(0.0));
        assert_eq!(eval("=VLOOKUP(\"Fipronil\",A1:C3,2,FALSE)", &mut grid), Value::Error(ErrorValue::NotAvailable));
        assert_eq!(eval("=VLOOKUP(\"Agenda 25 EC\",A1:C3,4,FALSE)", &mut grid), Value::Error(ErrorValue::Ref));
        assert_eq!(eval("=VLOOKUP(\"Agenda 25 EC\",A1:C3,0,FALSE)", &mut grid), Value::Error(ErrorValue::Value));

        // Area bands: the last lower bound not above the area wins.
        assert_eq!(eval("=VLOOKUP(350,E1:F3,2)", &mut grid), Value::Text("sedang".into()));
        assert_eq!(eval("=VLOOKUP(500,E1:F3,2,TRUE)", &mut grid), Value::Text("besar".into()));
        assert_eq!(eval("=VLOOKUP(-1,E1:F3,2)", &mut grid), Value::Error(ErrorValue::NotAvailable));
    }

    #[test]
    fn test_conditional_aggregates() {
        let mut grid = price_table();
        assert_eq!(eval("=SUMIF(B1:B3,\">0\",C1:C3)", &mut grid), Value::Number(130_000.0));
        assert_eq!(eval("=SUMIF(A1:A3,\"Expose*\",B1:B3)", &mut grid), Value::Number(3.0));
        assert_eq!(eval("=SUMIF(B1:B3,2)", &mut grid), Value::Number(2.0));
        assert_eq!(eval("=SUMIF(A1:A3,\"<>Agenda 25 EC\",C1:C3)", &mut grid), Value::Number(170_000.0));
        assert_eq!(eval("=COUNTIF(C1:C3,\">=80000\")", &mut grid), Value::Number(2.0));
        assert_eq!(eval("=COUNTIF(A1:A4,\"\")", &mut grid), Value::Number(1.0));
        assert_eq!(eval("=COUNTIF(A1:A3,\"?xpose~*\")", &mut grid), Value::Number(0.0));
    }

    #[test]
    fn test_whole_column_ranges() {
        let mut grid = price_table().with_sheet("Harga", "B9", Value::Number(4.0));
        assert_eq!(eval("=SUM(B:B)", &mut grid), Value::Number(5.0));
        assert_eq!(eval("=SUM($B:$C)", &mut grid), Value::Number(250_005.0));
        assert_eq!(eval("=COUNTA(A:A)", &mut grid), Value::Number(3.0));
        assert_eq!(eval("=VLOOKUP(\"Expose 55 SC\",A:C,3,FALSE)", &mut grid), Value::Number(50_000.0));
        assert_eq!(eval("=SUM(Harga!B:B)", &mut grid), Value::Number(4.0));
        assert_eq!(eval("=SUM(Kosong!B:B)", &mut grid), Value::Number(0.0));
        assert_eq!(eval("=B:B", &mut grid), Value::Error(ErrorValue::Value));
    }

    #[test]
    fn test_unsupported_functions_are_named() {
        let expr = parse("=IF(HLOOKUP(1,A1:B2,2),SUM(A:A),XLOOKUP(1,A:A,B:B)*-TEXTJOIN(\",\",TRUE,A1))").unwrap();
        assert_eq!(unsupported_functions(&expr), vec!["HLOOKUP", "XLOOKUP", "TEXTJOIN"]);
        assert!(unsupported_functions(&parse("=VLOOKUP(1,A:C,3)+SUMIF(A:A,\">1\")").unwrap()).is_empty());
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse("=1+"), Err(FormulaError::UnexpectedEnd));
        assert!(matches!(parse("=SUM(1,2"), Err(FormulaError::UnexpectedEnd)));
        assert!(matches!(parse("=\"open"), Err(FormulaError::UnterminatedString)));
        assert!(matches!(parse("=my_total*2"), Err(FormulaError::UnknownName(_))));
        assert!(matches!(parse("=1 2"), Err(FormulaError::UnexpectedToken { .. })));
    }
}

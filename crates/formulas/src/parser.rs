//! Formula parser module

use crate::{
    BinaryOperator, FormulaError, FormulaExpr, UnaryOperator, MAX_EXPR_DEPTH, MAX_FORMULA_LEN,
    MAX_FORMULA_NESTING,
};
use sheetstore_primitives::{CellAddress, CellRange, ErrorValue, Value};

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Number(f64),
    String(String),
    /// Bare word: function name, cell reference, sheet name, TRUE/FALSE.
    Word(String),
    QuotedSheet(String),
    Error(ErrorValue),
    LParen,
    RParen,
    Comma,
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Ampersand,
    Percent,
    Colon,
    Bang,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    pos: usize,
}

/// Parse formula text (with or without the leading `=`) into an expression tree.
pub fn parse_formula(source: &str) -> Result<FormulaExpr, FormulaError> {
    let body = source.trim();
    let body = body.strip_prefix('=').unwrap_or(body);
    if body.trim().is_empty() {
        return Err(FormulaError::ParseError("Empty formula".to_string()));
    }
    if body.chars().count() > MAX_FORMULA_LEN {
        return Err(FormulaError::ParseError(format!(
            "Formula exceeds {MAX_FORMULA_LEN} characters"
        )));
    }
    let tokens = tokenize(body)?;
    let mut parser = Parser {
        tokens,
        idx: 0,
        nesting: 0,
    };
    let expr = parser.parse_expression()?;
    if !matches!(parser.peek(), TokenKind::Eof) {
        return Err(FormulaError::ParseError(format!(
            "Unexpected token at {}",
            parser.current_pos()
        )));
    }
    if expression_depth(&expr) > MAX_EXPR_DEPTH {
        return Err(FormulaError::ParseError(format!(
            "Formula is nested deeper than {MAX_EXPR_DEPTH} operations"
        )));
    }
    Ok(expr)
}

/// Height of the expression tree, walked without recursion.
fn expression_depth(expr: &FormulaExpr) -> usize {
    let mut deepest = 0;
    let mut stack = vec![(expr, 1)];
    while let Some((expr, depth)) = stack.pop() {
        deepest = deepest.max(depth);
        match expr {
            FormulaExpr::BinaryOp { left, right, .. } => {
                stack.push((left.as_ref(), depth + 1));
                stack.push((right.as_ref(), depth + 1));
            }
            FormulaExpr::UnaryOp { expr, .. } => stack.push((expr.as_ref(), depth + 1)),
            FormulaExpr::FunctionCall { args, .. } => {
                stack.extend(args.iter().map(|arg| (arg, depth + 1)));
            }
            FormulaExpr::Literal(_)
            | FormulaExpr::CellRef { .. }
            | FormulaExpr::RangeRef { .. } => {}
        }
    }
    deepest
}

fn tokenize(input: &str) -> Result<Vec<Token>, FormulaError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        if ch.is_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        let kind = match ch {
            '(' => single(&mut i, TokenKind::LParen),
            ')' => single(&mut i, TokenKind::RParen),
            ',' | ';' => single(&mut i, TokenKind::Comma),
            '+' => single(&mut i, TokenKind::Plus),
            '-' => single(&mut i, TokenKind::Minus),
            '*' => single(&mut i, TokenKind::Star),
            '/' => single(&mut i, TokenKind::Slash),
            '^' => single(&mut i, TokenKind::Caret),
            '&' => single(&mut i, TokenKind::Ampersand),
            '%' => single(&mut i, TokenKind::Percent),
            ':' => single(&mut i, TokenKind::Colon),
            '!' => single(&mut i, TokenKind::Bang),
            '=' => single(&mut i, TokenKind::Equal),
            '<' => {
                i += 1;
                match chars.get(i) {
                    Some('=') => single(&mut i, TokenKind::LessEqual),
                    Some('>') => single(&mut i, TokenKind::NotEqual),
                    _ => TokenKind::Less,
                }
            }
            '>' => {
                i += 1;
                if chars.get(i) == Some(&'=') {
                    single(&mut i, TokenKind::GreaterEqual)
                } else {
                    TokenKind::Greater
                }
            }
            '"' => TokenKind::String(quoted(&chars, &mut i, '"')?),
            '\'' => TokenKind::QuotedSheet(quoted(&chars, &mut i, '\'')?),
            '#' => error_literal(&chars, &mut i)?,
            '.' | '0'..='9' => number(&chars, &mut i)?,
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '.' | '$'))
                {
                    i += 1;
                }
                TokenKind::Word(chars[start..i].iter().collect())
            }
            other => {
                return Err(FormulaError::ParseError(format!(
                    "Unexpected character '{other}' at {start}"
                )))
            }
        };
        tokens.push(Token { kind, pos: start });
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        pos: chars.len(),
    });
    Ok(tokens)
}

fn single(i: &mut usize, kind: TokenKind) -> TokenKind {
    *i += 1;
    kind
}

/// Read a delimited literal where a doubled delimiter is an escaped one.
fn quoted(chars: &[char], i: &mut usize, delim: char) -> Result<String, FormulaError> {
    *i += 1;
    let mut out = String::new();
    while *i < chars.len() {
        let ch = chars[*i];
        *i += 1;
        if ch == delim {
            if chars.get(*i) == Some(&delim) {
                out.push(delim);
                *i += 1;
                continue;
            }
            return Ok(out);
        }
        out.push(ch);
    }
    Err(FormulaError::ParseError(if delim == '"' {
        "Unterminated string literal".to_string()
    } else {
        "Unterminated sheet name".to_string()
    }))
}

fn error_literal(chars: &[char], i: &mut usize) -> Result<TokenKind, FormulaError> {
    let start = *i;
    *i += 1;
    while *i < chars.len() && matches!(chars[*i], 'A'..='Z' | 'a'..='z' | '0'..='9' | '/' | '!' | '?')
    {
        let ch = chars[*i];
        *i += 1;
        if ch == '!' || ch == '?' {
            break;
        }
    }
    let literal: String = chars[start..*i].iter().collect();
    ErrorValue::from_label(&literal)
        .map(TokenKind::Error)
        .ok_or_else(|| FormulaError::ParseError(format!("Unknown error literal '{literal}'")))
}

fn number(chars: &[char], i: &mut usize) -> Result<TokenKind, FormulaError> {
    let start = *i;
    let mut seen_dot = false;
    let mut seen_exp = false;
    while *i < chars.len() {
        match chars[*i] {
            '0'..='9' => *i += 1,
            '.' if !seen_dot && !seen_exp => {
                seen_dot = true;
                *i += 1;
            }
            'e' | 'E' if !seen_exp => {
                seen_exp = true;
                *i += 1;
                if matches!(chars.get(*i), Some('+' | '-')) {
                    *i += 1;
                }
            }
            _ => break,
        }
    }
    let text: String = chars[start..*i].iter().collect();
    text.parse()
        .map(TokenKind::Number)
        .map_err(|_| FormulaError::ParseError(format!("Invalid number literal '{text}'")))
}

struct Parser {
    tokens: Vec<Token>,
    idx: usize,
    /// Operands currently being parsed inside one another.
    nesting: usize,
}

impl Parser {
    fn peek(&self) -> &TokenKind {
        &self.tokens[self.idx.min(self.tokens.len() - 1)].kind
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        let idx = (self.idx + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    fn current_pos(&self) -> usize {
        self.tokens[self.idx.min(self.tokens.len() - 1)].pos
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if self.idx < self.tokens.len() - 1 {
            self.idx += 1;
        }
        kind
    }

    fn expect(&mut self, expected: &TokenKind) -> Result<(), FormulaError> {
        if self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            Err(FormulaError::ParseError(format!(
                "Expected {expected:?} at {}",
                self.current_pos()
            )))
        }
    }

    fn parse_expression(&mut self) -> Result<FormulaExpr, FormulaError> {
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<FormulaExpr, FormulaError> {
        let mut expr = self.parse_concat()?;
        loop {
            let op = match self.peek() {
                TokenKind::Equal => BinaryOperator::Equal,
                TokenKind::NotEqual => BinaryOperator::NotEqual,
                TokenKind::Less => BinaryOperator::LessThan,
                TokenKind::LessEqual => BinaryOperator::LessThanOrEqual,
                TokenKind::Greater => BinaryOperator::GreaterThan,
                TokenKind::GreaterEqual => BinaryOperator::GreaterThanOrEqual,
                _ => return Ok(expr),
            };
            self.advance();
            let right = self.parse_concat()?;
            expr = binary(op, expr, right);
        }
    }

    fn parse_concat(&mut self) -> Result<FormulaExpr, FormulaError> {
        let mut expr = self.parse_additive()?;
        while matches!(self.peek(), TokenKind::Ampersand) {
            self.advance();
            let right = self.parse_additive()?;
            expr = binary(BinaryOperator::Concat, expr, right);
        }
        Ok(expr)
    }

    fn parse_additive(&mut self) -> Result<FormulaExpr, FormulaError> {
        let mut expr = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinaryOperator::Add,
                TokenKind::Minus => BinaryOperator::Subtract,
                _ => return Ok(expr),
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            expr = binary(op, expr, right);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<FormulaExpr, FormulaError> {
        let mut expr = self.parse_power()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => BinaryOperator::Multiply,
                TokenKind::Slash => BinaryOperator::Divide,
                _ => return Ok(expr),
            };
            self.advance();
            let right = self.parse_power()?;
            expr = binary(op, expr, right);
        }
    }

    // Excel binds negation tighter than `^` and evaluates `^` left to right,
    // so -2^2 is 4 and 2^3^2 is 64.
    fn parse_power(&mut self) -> Result<FormulaExpr, FormulaError> {
        let mut expr = self.parse_unary()?;
        while matches!(self.peek(), TokenKind::Caret) {
            self.advance();
            let right = self.parse_unary()?;
            expr = binary(BinaryOperator::Power, expr, right);
        }
        Ok(expr)
    }

    // Every recursive path (parentheses, arguments, signs) passes through here.
    fn parse_unary(&mut self) -> Result<FormulaExpr, FormulaError> {
        if self.nesting >= MAX_FORMULA_NESTING {
            return Err(FormulaError::ParseError(format!(
                "Formula nesting exceeds {MAX_FORMULA_NESTING} levels"
            )));
        }
        self.nesting += 1;
        let result = self.parse_signed();
        self.nesting -= 1;
        result
    }

    fn parse_signed(&mut self) -> Result<FormulaExpr, FormulaError> {
        match self.peek() {
            TokenKind::Plus => {
                self.advance();
                self.parse_unary()
            }
            TokenKind::Minus => {
                self.advance();
                let expr = self.parse_unary()?;
                Ok(FormulaExpr::UnaryOp {
                    op: UnaryOperator::Negate,
                    expr: Box::new(expr),
                })
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<FormulaExpr, FormulaError> {
        let mut expr = self.parse_primary()?;
        while matches!(self.peek(), TokenKind::Percent) {
            self.advance();
            expr = FormulaExpr::UnaryOp {
                op: UnaryOperator::Percent,
                expr: Box::new(expr),
            };
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<FormulaExpr, FormulaError> {
        let pos = self.current_pos();
        match self.advance() {
            TokenKind::Number(n) => Ok(FormulaExpr::Literal(Value::Number(n))),
            TokenKind::String(s) => Ok(FormulaExpr::Literal(Value::String(s))),
            TokenKind::Error(err) => Ok(FormulaExpr::Literal(Value::Error(err))),
            TokenKind::QuotedSheet(sheet) => {
                self.expect(&TokenKind::Bang)?;
                self.parse_reference(Some(sheet))
            }
            TokenKind::Word(word) => self.parse_word(word),
            TokenKind::LParen => {
                let expr = self.parse_expression()?;
                self.expect(&TokenKind::RParen)?;
                Ok(expr)
            }
            TokenKind::Eof => Err(FormulaError::ParseError(
                "Unexpected end of input".to_string(),
            )),
            _ => Err(FormulaError::ParseError(format!(
                "Unexpected token at {pos}"
            ))),
        }
    }

    fn parse_word(&mut self, word: String) -> Result<FormulaExpr, FormulaError> {
        match self.peek() {
            TokenKind::LParen => {
                self.advance();
                let args = self.parse_arguments()?;
                return Ok(FormulaExpr::FunctionCall {
                    name: word.to_uppercase(),
                    args,
                });
            }
            TokenKind::Bang => {
                self.advance();
                return self.parse_reference(Some(word));
            }
            _ => {}
        }

        if let Ok(addr) = CellAddress::parse(&word) {
            return self.finish_reference(None, addr);
        }

        match word.to_uppercase().as_str() {
            "TRUE" => Ok(FormulaExpr::Literal(Value::Bool(true))),
            "FALSE" => Ok(FormulaExpr::Literal(Value::Bool(false))),
            // Defined names are not supported; Excel reports them as #NAME?.
            _ => Ok(FormulaExpr::Literal(Value::Error(ErrorValue::Name))),
        }
    }

    /// Parse the cell or range that follows `Sheet!`.
    fn parse_reference(&mut self, sheet: Option<String>) -> Result<FormulaExpr, FormulaError> {
        let pos = self.current_pos();
        match self.advance() {
            TokenKind::Word(word) => {
                let addr = CellAddress::parse(&word).map_err(|e| {
                    FormulaError::ParseError(format!("Invalid reference at {pos}: {e}"))
                })?;
                self.finish_reference(sheet, addr)
            }
            _ => Err(FormulaError::ParseError(format!(
                "Expected a cell reference at {pos}"
            ))),
        }
    }

    fn finish_reference(
        &mut self,
        sheet: Option<String>,
        start: CellAddress,
    ) -> Result<FormulaExpr, FormulaError> {
        if !matches!(self.peek(), TokenKind::Colon) {
            return Ok(FormulaExpr::CellRef { sheet, addr: start });
        }
        self.advance();
        let pos = self.current_pos();
        let end = match self.advance() {
            TokenKind::Word(word) => CellAddress::parse(&word).map_err(|e| {
                FormulaError::ParseError(format!("Invalid range end at {pos}: {e}"))
            })?,
            _ => {
                return Err(FormulaError::ParseError(format!(
                    "Expected range end at {pos}"
                )))
            }
        };
        Ok(FormulaExpr::RangeRef {
            sheet,
            range: CellRange::new(start, end),
        })
    }

    fn parse_arguments(&mut self) -> Result<Vec<FormulaExpr>, FormulaError> {
        let mut args = Vec::new();
        if matches!(self.peek(), TokenKind::RParen) {
            self.advance();
            return Ok(args);
        }
        loop {
            // An omitted argument such as the middle of SUM(1,,2) is blank.
            if matches!(self.peek(), TokenKind::Comma | TokenKind::RParen) {
                args.push(FormulaExpr::Literal(Value::Empty));
            } else {
                args.push(self.parse_expression()?);
            }
            match self.advance() {
                TokenKind::Comma => {}
                TokenKind::RParen => return Ok(args),
                _ => {
                    return Err(FormulaError::ParseError(
                        "Expected ',' or ')' in argument list".to_string(),
                    ))
                }
            }
        }
    }
}

fn binary(op: BinaryOperator, left: FormulaExpr, right: FormulaExpr) -> FormulaExpr {
    FormulaExpr::BinaryOp {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

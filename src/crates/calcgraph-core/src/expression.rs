//! Expression evaluation for expression tasks
//!
//! A deliberately small, pure expression language over
//! [`Value`](crate::Value): literals (numbers, strings, booleans, null,
//! lists), arithmetic, comparisons, boolean operators with Python-style
//! truthiness, a conditional (`if cond then a else b`), variables, and
//! function calls. Variables and functions resolve through a caller-supplied
//! [`SymbolScope`]. The engine hands expression tasks a scope whose `out()`
//! function reads other tasks' outputs, and that indirection is the entire
//! coupling between the sandbox and the graph: a richer sandbox can replace
//! this module by implementing the same trait.
//!
//! Integer arithmetic stays integral for `+ - * %`; division always produces
//! a float. `and`/`or` short-circuit and evaluate to one of their operands,
//! so `0 or fallback` works the way the original expressions did.

use crate::error::{Error, Result};
use crate::task::Value;

/// Resolves the names an expression references.
pub trait SymbolScope {
    /// Look up a variable. `None` means the name is unknown, which surfaces
    /// as an evaluation error naming the symbol.
    fn variable(&self, identifier: &str) -> Option<Value>;

    /// Invoke a named function with already-evaluated arguments.
    fn call(&self, function: &str, args: &[Value]) -> Result<Value>;
}

/// Parse and evaluate `code` against `scope`.
pub fn evaluate(code: &str, scope: &dyn SymbolScope) -> Result<Value> {
    let tokens = lex(code)?;
    let mut parser = Parser { tokens, position: 0 };
    let expression = parser.expression()?;
    parser.expect_end()?;
    eval(&expression, scope)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Symbol(&'static str),
}

fn lex(code: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = code.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\r' | '\n' => {
                chars.next();
            }
            '0'..='9' => {
                let mut text = String::new();
                let mut is_float = false;
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() {
                        text.push(d);
                        chars.next();
                    } else if d == '.' && !is_float {
                        is_float = true;
                        text.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if is_float {
                    let value = text
                        .parse::<f64>()
                        .map_err(|_| Error::Expression(format!("bad number '{text}'")))?;
                    tokens.push(Token::Float(value));
                } else {
                    let value = text
                        .parse::<i64>()
                        .map_err(|_| Error::Expression(format!("bad number '{text}'")))?;
                    tokens.push(Token::Int(value));
                }
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        None => {
                            return Err(Error::Expression("unterminated string".to_string()));
                        }
                        Some(d) if d == quote => break,
                        Some('\\') => match chars.next() {
                            Some('n') => text.push('\n'),
                            Some('t') => text.push('\t'),
                            Some(escaped @ ('\\' | '\'' | '"')) => text.push(escaped),
                            other => {
                                return Err(Error::Expression(format!(
                                    "bad escape {other:?} in string"
                                )));
                            }
                        },
                        Some(d) => text.push(d),
                    }
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut text = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' {
                        text.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(text));
            }
            '=' | '!' | '<' | '>' => {
                chars.next();
                let two = chars.peek() == Some(&'=');
                let symbol = match (c, two) {
                    ('=', true) => "==",
                    ('!', true) => "!=",
                    ('<', true) => "<=",
                    ('>', true) => ">=",
                    ('<', false) => "<",
                    ('>', false) => ">",
                    _ => {
                        return Err(Error::Expression(format!("unexpected character '{c}'")));
                    }
                };
                if two {
                    chars.next();
                }
                tokens.push(Token::Symbol(symbol));
            }
            '+' => { chars.next(); tokens.push(Token::Symbol("+")); }
            '-' => { chars.next(); tokens.push(Token::Symbol("-")); }
            '*' => { chars.next(); tokens.push(Token::Symbol("*")); }
            '/' => { chars.next(); tokens.push(Token::Symbol("/")); }
            '%' => { chars.next(); tokens.push(Token::Symbol("%")); }
            '(' => { chars.next(); tokens.push(Token::Symbol("(")); }
            ')' => { chars.next(); tokens.push(Token::Symbol(")")); }
            '[' => { chars.next(); tokens.push(Token::Symbol("[")); }
            ']' => { chars.next(); tokens.push(Token::Symbol("]")); }
            ',' => { chars.next(); tokens.push(Token::Symbol(",")); }
            other => {
                return Err(Error::Expression(format!("unexpected character '{other}'")));
            }
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    List(Vec<Expr>),
    Var(String),
    Call { function: String, args: Vec<Expr> },
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary { op: &'static str, lhs: Box<Expr>, rhs: Box<Expr> },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Conditional { condition: Box<Expr>, then: Box<Expr>, otherwise: Box<Expr> },
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn eat_symbol(&mut self, symbol: &str) -> bool {
        if matches!(self.peek(), Some(Token::Symbol(s)) if *s == symbol) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(word)) if word == keyword) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, symbol: &str) -> Result<()> {
        if self.eat_symbol(symbol) {
            Ok(())
        } else {
            Err(Error::Expression(format!(
                "expected '{symbol}', found {:?}",
                self.peek()
            )))
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(Error::Expression(format!(
                "expected '{keyword}', found {:?}",
                self.peek()
            )))
        }
    }

    fn expect_end(&mut self) -> Result<()> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(Error::Expression(format!("unexpected {token:?}"))),
        }
    }

    fn expression(&mut self) -> Result<Expr> {
        if self.eat_keyword("if") {
            let condition = self.expression()?;
            self.expect_keyword("then")?;
            let then = self.expression()?;
            self.expect_keyword("else")?;
            let otherwise = self.expression()?;
            return Ok(Expr::Conditional {
                condition: Box::new(condition),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            });
        }
        self.or_expression()
    }

    fn or_expression(&mut self) -> Result<Expr> {
        let mut lhs = self.and_expression()?;
        while self.eat_keyword("or") {
            let rhs = self.and_expression()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expression(&mut self) -> Result<Expr> {
        let mut lhs = self.not_expression()?;
        while self.eat_keyword("and") {
            let rhs = self.not_expression()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn not_expression(&mut self) -> Result<Expr> {
        if self.eat_keyword("not") {
            let inner = self.not_expression()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr> {
        let lhs = self.additive()?;
        for op in ["==", "!=", "<=", ">=", "<", ">"] {
            if self.eat_symbol(op) {
                let rhs = self.additive()?;
                return Ok(Expr::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                });
            }
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> Result<Expr> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = if self.eat_symbol("+") {
                "+"
            } else if self.eat_symbol("-") {
                "-"
            } else {
                break;
            };
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> Result<Expr> {
        let mut lhs = self.unary()?;
        loop {
            let op = if self.eat_symbol("*") {
                "*"
            } else if self.eat_symbol("/") {
                "/"
            } else if self.eat_symbol("%") {
                "%"
            } else {
                break;
            };
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat_symbol("-") {
            let inner = self.unary()?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.advance() {
            Some(Token::Int(value)) => Ok(Expr::Literal(Value::from(value))),
            Some(Token::Float(value)) => number_from_f64(value).map(Expr::Literal),
            Some(Token::Str(value)) => Ok(Expr::Literal(Value::String(value))),
            Some(Token::Symbol("(")) => {
                let inner = self.expression()?;
                self.expect_symbol(")")?;
                Ok(inner)
            }
            Some(Token::Symbol("[")) => {
                let mut items = Vec::new();
                if !self.eat_symbol("]") {
                    loop {
                        items.push(self.expression()?);
                        if self.eat_symbol("]") {
                            break;
                        }
                        self.expect_symbol(",")?;
                    }
                }
                Ok(Expr::List(items))
            }
            Some(Token::Ident(word)) => match word.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                _ => {
                    if self.eat_symbol("(") {
                        let mut args = Vec::new();
                        if !self.eat_symbol(")") {
                            loop {
                                args.push(self.expression()?);
                                if self.eat_symbol(")") {
                                    break;
                                }
                                self.expect_symbol(",")?;
                            }
                        }
                        Ok(Expr::Call {
                            function: word,
                            args,
                        })
                    } else {
                        Ok(Expr::Var(word))
                    }
                }
            },
            other => Err(Error::Expression(format!(
                "expected a value, found {other:?}"
            ))),
        }
    }
}

fn eval(expression: &Expr, scope: &dyn SymbolScope) -> Result<Value> {
    match expression {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::List(items) => {
            let values: Result<Vec<Value>> = items.iter().map(|item| eval(item, scope)).collect();
            Ok(Value::Array(values?))
        }
        Expr::Var(identifier) => scope
            .variable(identifier)
            .ok_or_else(|| Error::Expression(format!("unknown symbol '{identifier}'"))),
        Expr::Call { function, args } => {
            let values: Result<Vec<Value>> = args.iter().map(|arg| eval(arg, scope)).collect();
            scope.call(function, &values?)
        }
        Expr::Not(inner) => Ok(Value::Bool(!truthy(&eval(inner, scope)?))),
        Expr::Neg(inner) => match Number::of(&eval(inner, scope)?) {
            Some(Number::Int(value)) => value
                .checked_neg()
                .map(Value::from)
                .ok_or_else(|| Error::Expression("integer overflow in negation".to_string())),
            Some(Number::Float(value)) => number_from_f64(-value),
            None => Err(Error::Expression("cannot negate a non-number".to_string())),
        },
        Expr::Binary { op, lhs, rhs } => {
            let lhs = eval(lhs, scope)?;
            let rhs = eval(rhs, scope)?;
            binary(op, lhs, rhs)
        }
        Expr::And(lhs, rhs) => {
            let lhs = eval(lhs, scope)?;
            if truthy(&lhs) {
                eval(rhs, scope)
            } else {
                Ok(lhs)
            }
        }
        Expr::Or(lhs, rhs) => {
            let lhs = eval(lhs, scope)?;
            if truthy(&lhs) {
                Ok(lhs)
            } else {
                eval(rhs, scope)
            }
        }
        Expr::Conditional {
            condition,
            then,
            otherwise,
        } => {
            if truthy(&eval(condition, scope)?) {
                eval(then, scope)
            } else {
                eval(otherwise, scope)
            }
        }
    }
}

enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn of(value: &Value) -> Option<Number> {
        if let Some(int) = value.as_i64() {
            Some(Number::Int(int))
        } else {
            value.as_f64().map(Number::Float)
        }
    }

    fn as_f64(&self) -> f64 {
        match self {
            Number::Int(value) => *value as f64,
            Number::Float(value) => *value,
        }
    }
}

fn number_from_f64(value: f64) -> Result<Value> {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| Error::Expression(format!("'{value}' is not a representable number")))
}

fn binary(op: &str, lhs: Value, rhs: Value) -> Result<Value> {
    match op {
        "==" => return Ok(Value::Bool(lhs == rhs)),
        "!=" => return Ok(Value::Bool(lhs != rhs)),
        _ => {}
    }

    // String and list concatenation.
    if op == "+" {
        if let (Value::String(a), Value::String(b)) = (&lhs, &rhs) {
            return Ok(Value::String(format!("{a}{b}")));
        }
        if let (Value::Array(a), Value::Array(b)) = (&lhs, &rhs) {
            let mut joined = a.clone();
            joined.extend(b.iter().cloned());
            return Ok(Value::Array(joined));
        }
    }

    if let ("<" | "<=" | ">" | ">=", Value::String(a), Value::String(b)) = (op, &lhs, &rhs) {
        return Ok(Value::Bool(match op {
            "<" => a < b,
            "<=" => a <= b,
            ">" => a > b,
            _ => a >= b,
        }));
    }

    let (a, b) = match (Number::of(&lhs), Number::of(&rhs)) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(Error::Expression(format!(
                "cannot apply '{op}' to {lhs} and {rhs}"
            )));
        }
    };

    match op {
        "<" => return Ok(Value::Bool(a.as_f64() < b.as_f64())),
        "<=" => return Ok(Value::Bool(a.as_f64() <= b.as_f64())),
        ">" => return Ok(Value::Bool(a.as_f64() > b.as_f64())),
        ">=" => return Ok(Value::Bool(a.as_f64() >= b.as_f64())),
        _ => {}
    }

    if op == "/" {
        let divisor = b.as_f64();
        if divisor == 0.0 {
            return Err(Error::Expression("division by zero".to_string()));
        }
        return number_from_f64(a.as_f64() / divisor);
    }

    if let (Number::Int(a), Number::Int(b)) = (&a, &b) {
        let result = match op {
            "+" => a.checked_add(*b),
            "-" => a.checked_sub(*b),
            "*" => a.checked_mul(*b),
            "%" => {
                if *b == 0 {
                    return Err(Error::Expression("modulo by zero".to_string()));
                }
                a.checked_rem(*b)
            }
            _ => None,
        };
        return result
            .map(Value::from)
            .ok_or_else(|| Error::Expression(format!("integer overflow in '{op}'")));
    }

    let result = match op {
        "+" => a.as_f64() + b.as_f64(),
        "-" => a.as_f64() - b.as_f64(),
        "*" => a.as_f64() * b.as_f64(),
        "%" => {
            let divisor = b.as_f64();
            if divisor == 0.0 {
                return Err(Error::Expression("modulo by zero".to_string()));
            }
            a.as_f64() % divisor
        }
        other => {
            return Err(Error::Expression(format!("unsupported operator '{other}'")));
        }
    };
    number_from_f64(result)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map(|n| n != 0.0).unwrap_or(false),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    struct TestScope {
        vars: HashMap<String, Value>,
    }

    impl TestScope {
        fn new(vars: &[(&str, Value)]) -> Self {
            TestScope {
                vars: vars
                    .iter()
                    .map(|(name, value)| (name.to_string(), value.clone()))
                    .collect(),
            }
        }
    }

    impl SymbolScope for TestScope {
        fn variable(&self, identifier: &str) -> Option<Value> {
            self.vars.get(identifier).cloned()
        }

        fn call(&self, function: &str, args: &[Value]) -> Result<Value> {
            match function {
                "double" => match args {
                    [value] => binary("*", value.clone(), json!(2)),
                    _ => Err(Error::Expression("double() takes one argument".to_string())),
                },
                other => Err(Error::Expression(format!("unknown function '{other}'"))),
            }
        }
    }

    fn run(code: &str) -> Result<Value> {
        evaluate(code, &TestScope::new(&[]))
    }

    #[test]
    fn test_arithmetic_stays_integral() {
        assert_eq!(run("1 + 2").unwrap(), json!(3));
        assert_eq!(run("2 * 3 + 4").unwrap(), json!(10));
        assert_eq!(run("2 + 3 * 4").unwrap(), json!(14));
        assert_eq!(run("(2 + 3) * 4").unwrap(), json!(20));
        assert_eq!(run("7 % 4").unwrap(), json!(3));
        assert_eq!(run("-5 + 2").unwrap(), json!(-3));
    }

    #[test]
    fn test_division_is_float() {
        assert_eq!(run("1 / 2").unwrap(), json!(0.5));
        assert_eq!(run("1.5 * 2").unwrap(), json!(3.0));
        assert!(run("1 / 0").is_err());
    }

    #[test]
    fn test_strings_and_lists() {
        assert_eq!(run("'foo' + \"bar\"").unwrap(), json!("foobar"));
        assert_eq!(run("[1, 2] + [3]").unwrap(), json!([1, 2, 3]));
        assert_eq!(run("[]").unwrap(), json!([]));
        assert_eq!(run("'a\\nb'").unwrap(), json!("a\nb"));
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(run("1 < 2").unwrap(), json!(true));
        assert_eq!(run("2 <= 1").unwrap(), json!(false));
        assert_eq!(run("'a' < 'b'").unwrap(), json!(true));
        assert_eq!(run("[1] == [1]").unwrap(), json!(true));
        assert_eq!(run("null != 0").unwrap(), json!(true));
        assert_eq!(run("1 == 1.0").unwrap(), json!(false));
    }

    #[test]
    fn test_boolean_operators_return_operands() {
        assert_eq!(run("true and 5").unwrap(), json!(5));
        assert_eq!(run("0 and 5").unwrap(), json!(0));
        assert_eq!(run("0 or 'fallback'").unwrap(), json!("fallback"));
        assert_eq!(run("3 or 'fallback'").unwrap(), json!(3));
        assert_eq!(run("not 0").unwrap(), json!(true));
        assert_eq!(run("not [1]").unwrap(), json!(false));
    }

    #[test]
    fn test_conditional() {
        assert_eq!(run("if 1 < 2 then 'yes' else 'no'").unwrap(), json!("yes"));
        assert_eq!(run("if [] then 'yes' else 'no'").unwrap(), json!("no"));
    }

    #[test]
    fn test_variables_and_calls() {
        let scope = TestScope::new(&[("x", json!(7))]);
        assert_eq!(evaluate("x * 2", &scope).unwrap(), json!(14));
        assert_eq!(evaluate("double(x) + 1", &scope).unwrap(), json!(15));

        let err = evaluate("missing + 1", &scope).unwrap_err();
        assert!(err.to_string().contains("unknown symbol"), "{err}");
    }

    #[test]
    fn test_parse_errors() {
        assert!(run("1 +").is_err());
        assert!(run("(1").is_err());
        assert!(run("1 2").is_err());
        assert!(run("'open").is_err());
        assert!(run("@").is_err());
    }
}

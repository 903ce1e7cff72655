//! Sandboxed condition evaluator for step `condition` clauses.
//!
//! Expressions are tokenized and parsed into a small AST, then evaluated
//! against the run variables. Nothing is ever executed dynamically; the only
//! names an expression can see are the run variables.
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! or       := and ( "||" and )*
//! and      := equality ( "&&" equality )*
//! equality := compare ( ( "==" | "!=" ) compare )*
//! compare  := additive ( ( "<" | "<=" | ">" | ">=" ) additive )*
//! additive := term ( ( "+" | "-" ) term )*
//! term     := unary ( ( "*" | "/" | "%" ) unary )*
//! unary    := ( "!" | "-" ) unary | primary
//! primary  := number | string | "true" | "false" | identifier | "(" or ")"
//! ```
//!
//! `===` and `!==` are accepted as synonyms of `==` and `!=`.

use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while parsing or evaluating a condition.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),

    #[error("type error: {0}")]
    TypeError(String),

    #[error("division by zero")]
    DivisionByZero,
}

fn syntax(position: usize, message: impl Into<String>) -> ExpressionError {
    ExpressionError::Syntax {
        position,
        message: message.into(),
    }
}

/// Maximum nesting of parentheses and unary operators.
const MAX_DEPTH: usize = 64;

/// Maximum number of binary operators in one expression. Together with
/// `MAX_DEPTH` this bounds the height of the parsed tree.
const MAX_OPERATORS: usize = 256;

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// Result of evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Num(f64),
    Bool(bool),
}

impl Value {
    /// Truthiness: empty string, `0`, NaN and `false` are falsy.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Str(s) => !s.is_empty(),
            Value::Num(n) => *n != 0.0 && !n.is_nan(),
            Value::Bool(b) => *b,
        }
    }

    /// Numeric view. Strings coerce when they parse as a finite number
    /// (`"nan"` and `"inf"` stay strings); booleans never do.
    fn as_number(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            Value::Str(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
                }
            }
            Value::Bool(_) => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Num(_) => "number",
            Value::Bool(_) => "boolean",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            Value::Num(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Op(&'static str),
    LParen,
    RParen,
}

/// Operators, longest first so `===` wins over `==` and `<=` over `<`.
const OPERATORS: &[&str] = &[
    "===", "!==", "||", "&&", "==", "!=", "<=", ">=", "<", ">", "+", "-", "*", "/", "%", "!",
];

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, ExpressionError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let start = i;
        match c {
            '(' => {
                tokens.push((start, Token::LParen));
                i += 1;
            }
            ')' => {
                tokens.push((start, Token::RParen));
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let mut text = String::new();
                i += 1;
                loop {
                    let Some(&ch) = chars.get(i) else {
                        return Err(syntax(start, "unterminated string literal"));
                    };
                    i += 1;
                    if ch == quote {
                        break;
                    }
                    if ch == '\\' {
                        let Some(&escaped) = chars.get(i) else {
                            return Err(syntax(start, "unterminated string literal"));
                        };
                        i += 1;
                        text.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            other => other,
                        });
                    } else {
                        text.push(ch);
                    }
                }
                tokens.push((start, Token::Str(text)));
            }
            c if c.is_ascii_digit() || (c == '.' && next_is_digit(&chars, i)) => {
                let mut seen_dot = false;
                while let Some(&ch) = chars.get(i) {
                    if ch.is_ascii_digit() {
                        i += 1;
                    } else if ch == '.' && !seen_dot && next_is_digit(&chars, i) {
                        seen_dot = true;
                        i += 1;
                    } else {
                        break;
                    }
                }
                let literal: String = chars[start..i].iter().collect();
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| syntax(start, format!("invalid number '{literal}'")))?;
                tokens.push((start, Token::Num(value)));
            }
            c if c.is_alphabetic() || c == '_' => {
                while chars
                    .get(i)
                    .is_some_and(|ch| ch.is_alphanumeric() || *ch == '_')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push((
                    start,
                    match word.as_str() {
                        "true" => Token::True,
                        "false" => Token::False,
                        _ => Token::Ident(word),
                    },
                ));
            }
            _ => {
                let op = OPERATORS.iter().copied().find(|op| {
                    op.chars()
                        .enumerate()
                        .all(|(k, oc)| chars.get(i + k) == Some(&oc))
                });
                let Some(op) = op else {
                    return Err(syntax(start, format!("unexpected character '{c}'")));
                };
                i += op.chars().count();
                let op = match op {
                    "===" => "==",
                    "!==" => "!=",
                    other => other,
                };
                tokens.push((start, Token::Op(op)));
            }
        }
    }

    Ok(tokens)
}

fn next_is_digit(chars: &[char], i: usize) -> bool {
    chars.get(i + 1).is_some_and(char::is_ascii_digit)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Ident(String),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(&'static str, Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
    depth: usize,
    operators: usize,
}

impl Parser {
    fn new(tokens: Vec<(usize, Token)>, end: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            end,
            depth: 0,
            operators: 0,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |(p, _)| *p)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Consume the next token if it is one of `ops`.
    fn eat_op(&mut self, ops: &[&'static str]) -> Option<&'static str> {
        match self.peek() {
            Some(Token::Op(op)) if ops.contains(op) => {
                let op = *op;
                self.pos += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn enter(&mut self) -> Result<(), ExpressionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(syntax(self.position(), "expression nested too deeply"));
        }
        Ok(())
    }

    fn parse(mut self) -> Result<Expr, ExpressionError> {
        if self.tokens.is_empty() {
            return Err(syntax(0, "empty expression"));
        }
        let expr = self.or()?;
        if self.pos < self.tokens.len() {
            return Err(syntax(self.position(), "unexpected trailing input"));
        }
        Ok(expr)
    }

    fn binary_level(
        &mut self,
        ops: &[&'static str],
        next: fn(&mut Self) -> Result<Expr, ExpressionError>,
    ) -> Result<Expr, ExpressionError> {
        let mut left = next(self)?;
        loop {
            let position = self.position();
            let Some(op) = self.eat_op(ops) else {
                break;
            };
            self.operators += 1;
            if self.operators > MAX_OPERATORS {
                return Err(syntax(position, "expression has too many operators"));
            }
            let right = next(self)?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn or(&mut self) -> Result<Expr, ExpressionError> {
        self.binary_level(&["||"], Self::and)
    }

    fn and(&mut self) -> Result<Expr, ExpressionError> {
        self.binary_level(&["&&"], Self::equality)
    }

    fn equality(&mut self) -> Result<Expr, ExpressionError> {
        self.binary_level(&["==", "!="], Self::compare)
    }

    fn compare(&mut self) -> Result<Expr, ExpressionError> {
        self.binary_level(&["<", "<=", ">", ">="], Self::additive)
    }

    fn additive(&mut self) -> Result<Expr, ExpressionError> {
        self.binary_level(&["+", "-"], Self::term)
    }

    fn term(&mut self) -> Result<Expr, ExpressionError> {
        self.binary_level(&["*", "/", "%"], Self::unary)
    }

    fn unary(&mut self) -> Result<Expr, ExpressionError> {
        if let Some(op) = self.eat_op(&["!", "-"]) {
            self.enter()?;
            let operand = self.unary()?;
            self.depth -= 1;
            return Ok(match op {
                "!" => Expr::Not(Box::new(operand)),
                _ => Expr::Neg(Box::new(operand)),
            });
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ExpressionError> {
        let position = self.position();
        match self.next() {
            Some(Token::Num(n)) => Ok(Expr::Literal(Value::Num(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::Str(s))),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Ident(name)) => Ok(Expr::Ident(name)),
            Some(Token::LParen) => {
                self.enter()?;
                let inner = self.or()?;
                self.depth -= 1;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(syntax(position, "unclosed parenthesis")),
                }
            }
            Some(Token::RParen) => Err(syntax(position, "unexpected ')'")),
            Some(Token::Op(op)) => Err(syntax(position, format!("unexpected operator '{op}'"))),
            None => Err(syntax(position, "unexpected end of expression")),
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn eval(expr: &Expr, vars: &HashMap<String, String>) -> Result<Value, ExpressionError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Ident(name) => vars
            .get(name)
            .map(|v| Value::Str(v.clone()))
            .ok_or_else(|| ExpressionError::UnknownIdentifier(name.clone())),
        Expr::Not(inner) => Ok(Value::Bool(!eval(inner, vars)?.truthy())),
        Expr::Neg(inner) => {
            let v = eval(inner, vars)?;
            let n = v.as_number().ok_or_else(|| {
                ExpressionError::TypeError(format!("cannot negate {} '{v}'", v.type_name()))
            })?;
            Ok(Value::Num(-n))
        }
        // Logical operators short-circuit and yield the deciding operand.
        Expr::Binary("&&", l, r) => {
            let left = eval(l, vars)?;
            if left.truthy() { eval(r, vars) } else { Ok(left) }
        }
        Expr::Binary("||", l, r) => {
            let left = eval(l, vars)?;
            if left.truthy() { Ok(left) } else { eval(r, vars) }
        }
        Expr::Binary(op, l, r) => {
            let left = eval(l, vars)?;
            let right = eval(r, vars)?;
            apply_binary(op, left, right)
        }
    }
}

fn apply_binary(op: &str, left: Value, right: Value) -> Result<Value, ExpressionError> {
    match op {
        "==" => Ok(Value::Bool(loose_eq(&left, &right))),
        "!=" => Ok(Value::Bool(!loose_eq(&left, &right))),
        "<" | "<=" | ">" | ">=" => {
            let ordering = compare(&left, &right)?;
            Ok(Value::Bool(match op {
                "<" => ordering.is_lt(),
                "<=" => ordering.is_le(),
                ">" => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        "+" => {
            if let (Some(a), Some(b)) = (left.as_number(), right.as_number()) {
                return Ok(Value::Num(a + b));
            }
            if matches!(left, Value::Bool(_)) || matches!(right, Value::Bool(_)) {
                return Err(arith_type_error(op, &left, &right));
            }
            Ok(Value::Str(format!("{left}{right}")))
        }
        _ => {
            let (Some(a), Some(b)) = (left.as_number(), right.as_number()) else {
                return Err(arith_type_error(op, &left, &right));
            };
            match op {
                "-" => Ok(Value::Num(a - b)),
                "*" => Ok(Value::Num(a * b)),
                "/" if b == 0.0 => Err(ExpressionError::DivisionByZero),
                "/" => Ok(Value::Num(a / b)),
                "%" if b == 0.0 => Err(ExpressionError::DivisionByZero),
                _ => Ok(Value::Num(a % b)),
            }
        }
    }
}

fn arith_type_error(op: &str, left: &Value, right: &Value) -> ExpressionError {
    ExpressionError::TypeError(format!(
        "cannot apply '{op}' to {} and {}",
        left.type_name(),
        right.type_name()
    ))
}

/// Numeric when both sides are numeric, otherwise textual.
fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Bool(a), Value::Bool(b)) => a == b,
        _ => match (left.as_number(), right.as_number()) {
            (Some(a), Some(b)) => a == b,
            _ => left.to_string() == right.to_string(),
        },
    }
}

fn compare(left: &Value, right: &Value) -> Result<std::cmp::Ordering, ExpressionError> {
    if let (Some(a), Some(b)) = (left.as_number(), right.as_number()) {
        return a
            .partial_cmp(&b)
            .ok_or_else(|| ExpressionError::TypeError("cannot order NaN".to_string()));
    }
    match (left, right) {
        (Value::Bool(_), _) | (_, Value::Bool(_)) => Err(ExpressionError::TypeError(format!(
            "cannot order {} and {}",
            left.type_name(),
            right.type_name()
        ))),
        _ => Ok(left.to_string().cmp(&right.to_string())),
    }
}

// ---------------------------------------------------------------------------
// ConditionEvaluator
// ---------------------------------------------------------------------------

/// Evaluates step conditions against run variables.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate an expression and return the raw value.
    pub fn evaluate_value(
        &self,
        expression: &str,
        variables: &HashMap<String, String>,
    ) -> Result<Value, ExpressionError> {
        let tokens = tokenize(expression)?;
        let ast = Parser::new(tokens, expression.chars().count()).parse()?;
        eval(&ast, variables)
    }

    /// Evaluate an expression and coerce the result by truthiness.
    pub fn evaluate(
        &self,
        expression: &str,
        variables: &HashMap<String, String>,
    ) -> Result<bool, ExpressionError> {
        self.evaluate_value(expression, variables)
            .map(|v| v.truthy())
    }

    /// Evaluate a step condition; any error is logged and treated as `false`.
    pub fn evaluate_or_skip(
        &self,
        expression: &str,
        variables: &HashMap<String, String>,
    ) -> bool {
        match self.evaluate(expression, variables) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(%expression, error = %e, "condition evaluation failed");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> HashMap<String, String> {
        HashMap::from([
            ("mode".to_string(), "full".to_string()),
            ("count".to_string(), "3".to_string()),
            ("empty".to_string(), String::new()),
            ("name".to_string(), "flowgate".to_string()),
        ])
    }

    fn eval_bool(expr: &str) -> bool {
        ConditionEvaluator::new().evaluate(expr, &vars()).unwrap()
    }

    fn eval_err(expr: &str) -> ExpressionError {
        ConditionEvaluator::new().evaluate(expr, &vars()).unwrap_err()
    }

    #[test]
    fn literals_and_truthiness() {
        assert!(eval_bool("true"));
        assert!(!eval_bool("false"));
        assert!(eval_bool("1"));
        assert!(!eval_bool("0"));
        assert!(!eval_bool("''"));
        assert!(eval_bool("'x'"));
        assert!(!eval_bool("empty"));
    }

    #[test]
    fn string_equality() {
        assert!(eval_bool("mode == 'full'"));
        assert!(eval_bool("mode === \"full\""));
        assert!(eval_bool("mode != 'lite'"));
        assert!(!eval_bool("mode !== 'full'"));
    }

    #[test]
    fn numeric_comparison_coerces_variables() {
        assert!(eval_bool("count > 2"));
        assert!(eval_bool("count == 3"));
        assert!(eval_bool("count == '3.0'"));
        assert!(eval_bool("count >= 3 && count < 10"));
        // Numeric, not lexical: "10" > "9".
        assert!(eval_bool("'10' > '9'"));
    }

    #[test]
    fn string_ordering_is_lexical() {
        assert!(eval_bool("'apple' < 'banana'"));
        assert!(eval_bool("name > 'alpha'"));
    }

    #[test]
    fn precedence() {
        assert!(eval_bool("1 + 2 * 3 == 7"));
        assert!(eval_bool("(1 + 2) * 3 == 9"));
        assert!(eval_bool("false || true && true"));
        assert!(!eval_bool("(false || true) && false"));
        assert!(eval_bool("10 - 4 - 3 == 3"));
        assert!(eval_bool("7 % 4 == 3"));
    }

    #[test]
    fn unary_operators() {
        assert!(eval_bool("!false"));
        assert!(eval_bool("!!mode"));
        assert!(eval_bool("-count == -3"));
        assert!(eval_bool("!empty"));
    }

    #[test]
    fn plus_concatenates_non_numeric_strings() {
        let v = ConditionEvaluator::new()
            .evaluate_value("name + '-' + count", &vars())
            .unwrap();
        assert_eq!(v, Value::Str("flowgate-3".to_string()));

        let v = ConditionEvaluator::new()
            .evaluate_value("count + 1", &vars())
            .unwrap();
        assert_eq!(v, Value::Num(4.0));
    }

    #[test]
    fn logical_operators_return_operands() {
        let eval = ConditionEvaluator::new();
        assert_eq!(
            eval.evaluate_value("empty || 'fallback'", &vars()).unwrap(),
            Value::Str("fallback".to_string())
        );
        assert_eq!(
            eval.evaluate_value("mode && count", &vars()).unwrap(),
            Value::Str("3".to_string())
        );
    }

    #[test]
    fn short_circuit_skips_unknown_identifiers() {
        assert!(!eval_bool("false && missing == 1"));
        assert!(eval_bool("true || missing"));
    }

    #[test]
    fn unknown_identifier_is_error() {
        assert_eq!(
            eval_err("missing == 1"),
            ExpressionError::UnknownIdentifier("missing".to_string())
        );
    }

    #[test]
    fn division_by_zero_is_error() {
        assert_eq!(eval_err("1 / 0"), ExpressionError::DivisionByZero);
        assert_eq!(eval_err("count % 0"), ExpressionError::DivisionByZero);
    }

    #[test]
    fn arithmetic_on_booleans_is_error() {
        assert!(matches!(eval_err("true + 1"), ExpressionError::TypeError(_)));
        assert!(matches!(eval_err("mode * 2"), ExpressionError::TypeError(_)));
        assert!(matches!(eval_err("true < 1"), ExpressionError::TypeError(_)));
    }

    #[test]
    fn syntax_errors() {
        assert!(matches!(eval_err(""), ExpressionError::Syntax { .. }));
        assert!(matches!(eval_err("(1 + 2"), ExpressionError::Syntax { .. }));
        assert!(matches!(eval_err("1 +"), ExpressionError::Syntax { .. }));
        assert!(matches!(eval_err("'open"), ExpressionError::Syntax { .. }));
        assert!(matches!(eval_err("1 2"), ExpressionError::Syntax { .. }));
        assert!(matches!(
            eval_err("mode = 'full'"),
            ExpressionError::Syntax { position: 5, .. }
        ));
    }

    #[test]
    fn no_code_execution_surface() {
        // Function calls and member access are not part of the grammar.
        assert!(matches!(
            eval_err("process.exit(1)"),
            ExpressionError::Syntax { .. }
        ));
        assert!(matches!(eval_err("mode; true"), ExpressionError::Syntax { .. }));
    }

    #[test]
    fn deep_nesting_rejected() {
        let deep = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert!(matches!(eval_err(&deep), ExpressionError::Syntax { .. }));

        let ok = format!("{}1{}", "(".repeat(10), ")".repeat(10));
        assert!(eval_bool(&ok));
    }

    #[test]
    fn long_operator_chain_rejected() {
        let chain = vec!["1"; 5_000].join(" + ");
        assert!(matches!(eval_err(&chain), ExpressionError::Syntax { .. }));
        assert!(!ConditionEvaluator::new().evaluate_or_skip(&chain, &vars()));

        let chain = vec!["mode == 'full'"; 3_000].join(" && ");
        assert!(matches!(eval_err(&chain), ExpressionError::Syntax { .. }));

        let short = vec!["1"; 100].join(" + ");
        assert!(eval_bool(&format!("{short} == 100")));
    }

    #[test]
    fn non_finite_words_compare_as_strings() {
        let vars = HashMap::from([
            ("x".to_string(), "nan".to_string()),
            ("env".to_string(), "inf".to_string()),
        ]);
        let eval = ConditionEvaluator::new();
        let check = |expr: &str| eval.evaluate(expr, &vars).unwrap();

        assert!(check("'nan' == 'nan'"));
        assert!(check("'NaN' == 'NaN'"));
        assert!(check("x == 'nan'"));
        assert!(!check("x != 'nan'"));
        assert!(!check("'inf' == 'infinity'"));
        assert!(!check("env == 'infinity'"));
        assert!(check("x < 'z'"));
        assert!(matches!(
            eval.evaluate("x - 1", &vars),
            Err(ExpressionError::TypeError(_))
        ));
    }

    #[test]
    fn escaped_quotes_in_strings() {
        let v = ConditionEvaluator::new()
            .evaluate_value(r#"'it\'s'"#, &vars())
            .unwrap();
        assert_eq!(v, Value::Str("it's".to_string()));
    }

    #[test]
    fn evaluate_or_skip_fails_closed() {
        let eval = ConditionEvaluator::new();
        assert!(eval.evaluate_or_skip("mode == 'full'", &vars()));
        assert!(!eval.evaluate_or_skip("missing", &vars()));
        assert!(!eval.evaluate_or_skip("((", &vars()));
    }
}

// Arithmetic tool

use crate::error::ToolError;
use crate::protocol::{CallToolResult, ToolSchema};
use crate::tools::{json_schema_object, json_schema_string, parse_arguments, Tool};
use serde::Deserialize;

/// Tool that evaluates simple arithmetic expressions
pub struct CalculateTool;

#[derive(Debug, Deserialize)]
struct CalculateArgs {
    expression: String,
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("Invalid characters in expression")]
    InvalidCharacters,
    #[error("Unexpected end of expression")]
    UnexpectedEnd,
    #[error("Unexpected '{0}' at position {1}")]
    Unexpected(char, usize),
    #[error("Invalid number '{0}'")]
    InvalidNumber(String),
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Expression nested too deeply (limit {})", MAX_DEPTH)]
    TooDeep,
}

/// Nesting limit for parentheses and unary signs.
pub const MAX_DEPTH: usize = 256;

/// Evaluate `+ - * /`, unary minus, parentheses and decimal literals.
pub fn evaluate(expression: &str) -> Result<f64, EvalError> {
    if !expression
        .chars()
        .all(|c| c.is_ascii_digit() || "+-*/.() ".contains(c))
    {
        return Err(EvalError::InvalidCharacters);
    }

    let mut parser = Parser {
        chars: expression.chars().collect(),
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    match parser.peek() {
        None => Ok(value),
        Some(c) => Err(EvalError::Unexpected(c, parser.pos)),
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&mut self) -> Option<char> {
        while self.chars.get(self.pos) == Some(&' ') {
            self.pos += 1;
        }
        self.chars.get(self.pos).copied()
    }

    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, EvalError>,
    ) -> Result<T, EvalError> {
        if self.depth >= MAX_DEPTH {
            return Err(EvalError::TooDeep);
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        self.pos += 1;
        c
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<f64, EvalError> {
        let mut value = self.term()?;
        while let Some(op @ ('+' | '-')) = self.peek() {
            self.bump();
            let rhs = self.term()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    // term := factor (('*' | '/') factor)*
    fn term(&mut self) -> Result<f64, EvalError> {
        let mut value = self.factor()?;
        while let Some(op @ ('*' | '/')) = self.peek() {
            self.bump();
            let rhs = self.factor()?;
            if op == '*' {
                value *= rhs;
            } else {
                if rhs == 0.0 {
                    return Err(EvalError::DivisionByZero);
                }
                value /= rhs;
            }
        }
        Ok(value)
    }

    // factor := '-' factor | '+' factor | '(' expr ')' | number
    fn factor(&mut self) -> Result<f64, EvalError> {
        match self.peek() {
            None => Err(EvalError::UnexpectedEnd),
            Some('-') => {
                self.bump();
                Ok(-self.nested(Self::factor)?)
            }
            Some('+') => {
                self.bump();
                self.nested(Self::factor)
            }
            Some('(') => {
                self.bump();
                let value = self.nested(Self::expr)?;
                match self.bump() {
                    Some(')') => Ok(value),
                    Some(c) => Err(EvalError::Unexpected(c, self.pos - 1)),
                    None => Err(EvalError::UnexpectedEnd),
                }
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.number(),
            Some(c) => Err(EvalError::Unexpected(c, self.pos)),
        }
    }

    fn number(&mut self) -> Result<f64, EvalError> {
        let start = self.pos;
        while matches!(self.chars.get(self.pos), Some(c) if c.is_ascii_digit() || *c == '.') {
            self.pos += 1;
        }
        let literal: String = self.chars[start..self.pos].iter().collect();
        literal
            .parse()
            .map_err(|_| EvalError::InvalidNumber(literal))
    }
}

#[async_trait::async_trait]
impl Tool for CalculateTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "calculate".to_string(),
            description: "Perform simple mathematical calculations".to_string(),
            input_schema: json_schema_object(
                serde_json::json!({
                    "expression": json_schema_string("Mathematical expression (e.g., 2 + 2)")
                }),
                vec!["expression"],
            ),
        }
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<CallToolResult, ToolError> {
        let args: CalculateArgs = parse_arguments("calculate", arguments)?;
        let result = evaluate(&args.expression)
            .map_err(|e| anyhow::anyhow!("Couldn't evaluate '{}': {}", args.expression, e))?;
        Ok(CallToolResult::text(format!(
            "Calculation Result\n\nExpression: {}\nResult: {}",
            args.expression, result
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ToolContent;

    #[test]
    fn test_precedence_and_grouping() {
        assert_eq!(evaluate("2 + 2"), Ok(4.0));
        assert_eq!(evaluate("2 + 3 * 4"), Ok(14.0));
        assert_eq!(evaluate("(2 + 3) * 4"), Ok(20.0));
        assert_eq!(evaluate("10 / 4"), Ok(2.5));
        assert_eq!(evaluate("-3 + 5"), Ok(2.0));
        assert_eq!(evaluate("2 * -(1 + 1)"), Ok(-4.0));
        assert_eq!(evaluate("1.5 * 2"), Ok(3.0));
        assert_eq!(evaluate("8 - 2 - 1"), Ok(5.0));
    }

    #[test]
    fn test_rejections() {
        assert_eq!(evaluate("2 + x"), Err(EvalError::InvalidCharacters));
        assert_eq!(evaluate("1 / 0"), Err(EvalError::DivisionByZero));
        assert_eq!(evaluate("(1 + 2"), Err(EvalError::UnexpectedEnd));
        assert_eq!(evaluate("1 +"), Err(EvalError::UnexpectedEnd));
        assert_eq!(evaluate("1 2"), Err(EvalError::Unexpected('2', 2)));
        assert_eq!(
            evaluate("1..2"),
            Err(EvalError::InvalidNumber("1..2".to_string()))
        );
    }

    #[test]
    fn test_nesting_limit() {
        let shallow = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        assert_eq!(evaluate(&shallow), Ok(1.0));
        assert_eq!(evaluate(&format!("{}5", "-".repeat(200))), Ok(5.0));

        let signs = format!("{}1", "-".repeat(100_000));
        assert_eq!(evaluate(&signs), Err(EvalError::TooDeep));
        let parens = format!("{}1", "(".repeat(100_000));
        assert_eq!(evaluate(&parens), Err(EvalError::TooDeep));
    }

    #[tokio::test]
    async fn test_execute_reports_result() {
        let result = CalculateTool
            .execute(serde_json::json!({ "expression": "6 * 7" }))
            .await
            .unwrap();
        assert_eq!(
            result.content,
            vec![ToolContent::text(
                "Calculation Result\n\nExpression: 6 * 7\nResult: 42"
            )]
        );
    }

    #[tokio::test]
    async fn test_execute_failure_is_execution_error() {
        let err = CalculateTool
            .execute(serde_json::json!({ "expression": "1 / 0" }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Execution(_)));
        assert!(err.to_string().contains("Division by zero"));
    }
}

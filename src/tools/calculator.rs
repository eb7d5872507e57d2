//! Calculator tool - basic arithmetic on two operands

use super::{Tool, ToolOutput};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

/// Arithmetic tool
pub struct CalculatorTool;

#[derive(Debug, Deserialize)]
struct CalculatorInput {
    num1: f64,
    num2: f64,
    operation: Operation,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Operation {
    Add,
    Subtract,
    Multiply,
    Divide,
}

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> String {
        "Perform a basic arithmetic operation on two numbers.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "num1": {"type": "number"},
                "num2": {"type": "number"},
                "operation": {
                    "type": "string",
                    "enum": ["add", "subtract", "multiply", "divide"],
                },
            },
            "required": ["num1", "num2", "operation"],
        })
    }

    async fn run(&self, input: Value) -> ToolOutput {
        let input: CalculatorInput = match serde_json::from_value(input) {
            Ok(i) => i,
            Err(e) => return ToolOutput::error(format!("Invalid input: {e}")),
        };

        let result = match input.operation {
            Operation::Add => input.num1 + input.num2,
            Operation::Subtract => input.num1 - input.num2,
            Operation::Multiply => input.num1 * input.num2,
            Operation::Divide => {
                if input.num2 == 0.0 {
                    return ToolOutput::error("Cannot divide by zero");
                }
                input.num1 / input.num2
            }
        };

        ToolOutput::success(result.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn addition_produces_integral_text() {
        let result = CalculatorTool
            .run(json!({"num1": 2, "num2": 2, "operation": "add"}))
            .await;
        assert!(result.success);
        assert_eq!(result.output, "4");
    }

    #[tokio::test]
    async fn division_keeps_fractions() {
        let result = CalculatorTool
            .run(json!({"num1": 1, "num2": 8, "operation": "divide"}))
            .await;
        assert_eq!(result.output, "0.125");
    }

    #[tokio::test]
    async fn division_by_zero_reports_error() {
        let result = CalculatorTool
            .run(json!({"num1": 1, "num2": 0, "operation": "divide"}))
            .await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn unknown_operation_is_invalid_input() {
        let result = CalculatorTool
            .run(json!({"num1": 1, "num2": 2, "operation": "modulo"}))
            .await;
        assert!(!result.success);
        assert!(result.output.contains("Invalid input"));
    }
}

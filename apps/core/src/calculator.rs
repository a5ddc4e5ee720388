use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculatorResult {
    pub expression: String,
    pub value: f64,
    pub display: String,
}

impl CalculatorResult {
    pub fn new(expression: &str, value: f64) -> Self {
        Self {
            expression: expression.to_string(),
            value,
            display: format_value(value),
        }
    }
}

/// Classifies a query as an arithmetic expression.
///
/// The evaluator itself lives outside the engine; any pure function of the
/// query text can be plugged in.
pub trait CalculatorClassifier: Send {
    fn evaluate(&self, text: &str) -> Option<CalculatorResult>;
}

impl<F> CalculatorClassifier for F
where
    F: Fn(&str) -> Option<CalculatorResult> + Send,
{
    fn evaluate(&self, text: &str) -> Option<CalculatorResult> {
        self(text)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledCalculator;

impl CalculatorClassifier for DisabledCalculator {
    fn evaluate(&self, _text: &str) -> Option<CalculatorResult> {
        None
    }
}

fn format_value(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

//! Insight generators turn an evaluated outcome into reflection text and,
//! where there is something to repeat or avoid, strategy text.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::gateway::{GatewayError, ModelGateway, Strategy};

use super::types::{EvaluationLabel, Outcome};

#[derive(Debug, Clone)]
pub struct InsightRequest {
    pub outcome: Outcome,
    pub label: EvaluationLabel,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insight {
    pub reflection_text: String,
    pub strategy_text: Option<String>,
    /// Actual cost in USD
    pub cost: f64,
    pub model_used: Option<String>,
}

#[async_trait]
pub trait InsightGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    /// A model that answered without usable text yields an empty
    /// `reflection_text`, still carrying the cost of the call.
    async fn generate(&self, request: &InsightRequest) -> Result<Insight, GatewayError>;
}

/// Local heuristic reflections; never calls a model
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateInsightGenerator;

impl TemplateInsightGenerator {
    pub fn render(request: &InsightRequest) -> Insight {
        let o = &request.outcome;
        let (reflection_text, strategy_text) = match request.label {
            EvaluationLabel::Failure => (
                format!(
                    "Lesson from {}: avoid repeating \"{}\" as it led to \"{}\".",
                    o.pattern, o.action, o.result
                ),
                Some(format!(
                    "Before \"{}\" in {}, check for the conditions that caused: {}",
                    o.action, o.pattern, o.result
                )),
            ),
            EvaluationLabel::Success => (
                format!(
                    "Practice to repeat for {}: \"{}\" worked and produced \"{}\".",
                    o.pattern, o.action, o.result
                ),
                Some(format!("Reuse \"{}\" when {} comes up again.", o.action, o.pattern)),
            ),
            EvaluationLabel::Neutral => (
                format!(
                    "Observation for {}: \"{}\" produced \"{}\".",
                    o.pattern, o.action, o.result
                ),
                None,
            ),
        };
        Insight {
            reflection_text,
            strategy_text,
            cost: 0.0,
            model_used: None,
        }
    }
}

#[async_trait]
impl InsightGenerator for TemplateInsightGenerator {
    fn name(&self) -> &'static str {
        "template"
    }

    async fn generate(&self, request: &InsightRequest) -> Result<Insight, GatewayError> {
        Ok(Self::render(request))
    }
}

const STRATEGY_PREFIX: &str = "STRATEGY:";

/// Model-backed reflections through the gateway, bound to a deadline
pub struct GatewayInsightGenerator {
    gateway: Arc<dyn ModelGateway>,
    strategy: Strategy,
    deadline: Duration,
}

impl GatewayInsightGenerator {
    pub fn new(gateway: Arc<dyn ModelGateway>, strategy: Strategy, deadline: Duration) -> Self {
        Self {
            gateway,
            strategy,
            deadline,
        }
    }

    fn prompt(request: &InsightRequest) -> String {
        let o = &request.outcome;
        format!(
            "An agent action was evaluated as {label}.\n\
             Pattern: {pattern}\nAction: {action}\nResult: {result}\n\n\
             Write a short reflection on what to learn from this. \
             If there is a reusable strategy, add a final line starting with \"{STRATEGY_PREFIX}\".",
            label = request.label,
            pattern = o.pattern,
            action = o.action,
            result = o.result,
        )
    }

    /// Split a completion into reflection text and an optional strategy line
    pub fn parse(text: &str) -> (String, Option<String>) {
        let mut reflection = Vec::new();
        let mut strategy = None;
        for line in text.lines() {
            let trimmed = line.trim();
            match trimmed.strip_prefix(STRATEGY_PREFIX) {
                Some(rest) if !rest.trim().is_empty() => strategy = Some(rest.trim().to_string()),
                Some(_) => {}
                None if !trimmed.is_empty() => reflection.push(trimmed),
                None => {}
            }
        }
        (reflection.join(" "), strategy)
    }
}

#[async_trait]
impl InsightGenerator for GatewayInsightGenerator {
    fn name(&self) -> &'static str {
        "gateway"
    }

    async fn generate(&self, request: &InsightRequest) -> Result<Insight, GatewayError> {
        let prompt = Self::prompt(request);
        let completion =
            tokio::time::timeout(self.deadline, self.gateway.complete(&prompt, &self.strategy))
                .await
                .map_err(|_| GatewayError::Timeout)??;

        let (reflection_text, strategy_text) = Self::parse(&completion.text);
        Ok(Insight {
            reflection_text,
            strategy_text,
            cost: completion.metadata.cost,
            model_used: Some(completion.metadata.model_used),
        })
    }
}

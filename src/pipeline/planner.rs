// src/pipeline/planner.rs
// Stage 4: reply planning - a pure function of analysis and gating

use super::analyzer::{ConversationAnalysis, Intent, Tone};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanAction {
    AnswerQuestion,
    ProposeNextStep,
    ClarifyMissingInfo,
    Summarize,
    Greet,
    Discuss,
}

impl PlanAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanAction::AnswerQuestion => "answer_question",
            PlanAction::ProposeNextStep => "propose_next_step",
            PlanAction::ClarifyMissingInfo => "clarify_missing_info",
            PlanAction::Summarize => "summarize",
            PlanAction::Greet => "greet",
            PlanAction::Discuss => "discuss",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthGuidance {
    Concise,
    Medium,
    Detailed,
}

impl LengthGuidance {
    pub fn as_str(&self) -> &'static str {
        match self {
            LengthGuidance::Concise => "concise",
            LengthGuidance::Medium => "medium",
            LengthGuidance::Detailed => "detailed",
        }
    }
}

/// Upstream gating verdict handed to the pipeline with each invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct GatingDecision {
    pub need_search: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplyPlan {
    pub action: PlanAction,
    pub key_points: Vec<String>,
    pub tone: Tone,
    pub length: LengthGuidance,
    pub include_greeting: bool,
    pub avoid_repeating: Vec<String>,
    pub search_query: Option<String>,
}

/// Derive the reply plan. Pure: same inputs, same plan.
pub fn plan(
    analysis: &ConversationAnalysis,
    gating: GatingDecision,
    current_text: &str,
    message_count: usize,
) -> ReplyPlan {
    let action = if analysis.intent == Intent::Greeting {
        PlanAction::Greet
    } else if analysis.intent == Intent::Question {
        PlanAction::AnswerQuestion
    } else if !analysis.unresolved_items.is_empty() {
        PlanAction::ClarifyMissingInfo
    } else if !analysis.questions_asked.is_empty() {
        PlanAction::AnswerQuestion
    } else if !analysis.decisions_made.is_empty() {
        PlanAction::ProposeNextStep
    } else {
        PlanAction::Discuss
    };

    let mut key_points: Vec<String> = Vec::new();
    if action == PlanAction::AnswerQuestion
        && let Some(last_question) = analysis.questions_asked.last()
    {
        key_points.push(last_question.clone());
    }
    match action {
        PlanAction::ClarifyMissingInfo => {
            key_points.extend(analysis.unresolved_items.iter().cloned());
        }
        PlanAction::ProposeNextStep => {
            key_points.extend(analysis.decisions_made.iter().cloned());
        }
        _ => {}
    }

    let length = match action {
        PlanAction::Greet => LengthGuidance::Concise,
        PlanAction::Summarize => LengthGuidance::Detailed,
        _ => LengthGuidance::Medium,
    };

    ReplyPlan {
        action,
        key_points,
        tone: analysis.tone,
        length,
        include_greeting: message_count <= 2 || analysis.intent == Intent::Greeting,
        avoid_repeating: analysis.decisions_made.clone(),
        search_query: gating.need_search.then(|| current_text.to_string()),
    }
}

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::repo_types::{FeedbackTemplate, ResponseWithTemplate};

/// Either `question` or a list of `questions` joined by blank lines.
#[derive(Debug, Deserialize)]
pub struct CreateTemplateRequest {
    pub title: Option<String>,
    pub question: Option<String>,
    pub questions: Option<Vec<Option<String>>>,
}

impl CreateTemplateRequest {
    pub fn final_question(&self) -> Option<String> {
        if let Some(q) = self.question.as_deref().filter(|q| !q.is_empty()) {
            return Some(q.to_owned());
        }
        let joined = self
            .questions
            .as_ref()?
            .iter()
            .flatten()
            .filter(|q| !q.trim().is_empty())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n\n");
        Some(joined).filter(|q| !q.is_empty())
    }
}

/// Either `answer` or a list of `answers` joined by blank lines.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub template_id: Option<Uuid>,
    pub answer: Option<String>,
    pub answers: Option<Vec<Option<String>>>,
    pub rating: Option<i32>,
}

impl SubmitRequest {
    pub fn final_answer(&self) -> Option<String> {
        if let Some(a) = self.answer.as_deref().filter(|a| !a.is_empty()) {
            return Some(a.to_owned());
        }
        let joined = self
            .answers
            .as_ref()?
            .iter()
            .flatten()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n\n");
        Some(joined).filter(|a| !a.is_empty())
    }
}

#[derive(Debug, Serialize)]
pub struct CreatedTemplateResponse {
    pub message: &'static str,
    pub template: FeedbackTemplate,
}

#[derive(Debug, Serialize)]
pub struct SubmittedResponse {
    pub message: &'static str,
    pub response: ResponseWithTemplate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn questions_are_joined_without_blanks() {
        let req: CreateTemplateRequest = serde_json::from_value(serde_json::json!({
            "title": "T",
            "questions": ["One?", "  ", null, "Two?"]
        }))
        .unwrap();
        assert_eq!(req.final_question().as_deref(), Some("One?\n\nTwo?"));
    }

    #[test]
    fn single_question_wins_over_list() {
        let req: CreateTemplateRequest = serde_json::from_value(serde_json::json!({
            "title": "T",
            "question": "Only?",
            "questions": ["Ignored?"]
        }))
        .unwrap();
        assert_eq!(req.final_question().as_deref(), Some("Only?"));
    }

    #[test]
    fn missing_or_blank_questions_yield_none() {
        let req: CreateTemplateRequest =
            serde_json::from_value(serde_json::json!({ "title": "T", "questions": [" "] }))
                .unwrap();
        assert!(req.final_question().is_none());
    }

    #[test]
    fn answers_are_joined() {
        let req: SubmitRequest = serde_json::from_value(serde_json::json!({
            "templateId": "6f1c7e52-5a3b-4a8e-9d43-0d2f3f1f8a10",
            "answers": ["Good", null, "More coffee"]
        }))
        .unwrap();
        assert_eq!(req.final_answer().as_deref(), Some("Good\n\nMore coffee"));
        assert!(req.rating.is_none());
    }
}

use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackTemplate {
    pub id: Uuid,
    pub title: String,
    pub question: String,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Template plus the number of responses it received.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TemplateWithCount {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub template: FeedbackTemplate,
    pub response_count: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackResponse {
    pub id: Uuid,
    pub template_id: Uuid,
    pub user_id: Uuid,
    pub answer: String,
    pub rating: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewResponse {
    pub template_id: Uuid,
    pub user_id: Uuid,
    pub answer: String,
    pub rating: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateRef {
    pub id: Uuid,
    pub title: String,
    pub question: String,
}

impl From<&FeedbackTemplate> for TemplateRef {
    fn from(t: &FeedbackTemplate) -> Self {
        Self {
            id: t.id,
            title: t.title.clone(),
            question: t.question.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserRef {
    pub id: Uuid,
    pub name: Option<String>,
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseWithTemplate {
    #[serde(flatten)]
    pub response: FeedbackResponse,
    pub template: TemplateRef,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseWithRelations {
    #[serde(flatten)]
    pub response: FeedbackResponse,
    pub user: UserRef,
    pub template: TemplateRef,
}

/// Flat row of `feedback_responses` joined with its template and user.
#[derive(Debug, FromRow)]
pub struct ResponseRow {
    #[sqlx(flatten)]
    pub response: FeedbackResponse,
    pub template_title: String,
    pub template_question: String,
    pub user_name: Option<String>,
    pub user_email: String,
}

impl ResponseRow {
    fn template_ref(&self) -> TemplateRef {
        TemplateRef {
            id: self.response.template_id,
            title: self.template_title.clone(),
            question: self.template_question.clone(),
        }
    }

    pub fn with_template(self) -> ResponseWithTemplate {
        ResponseWithTemplate {
            template: self.template_ref(),
            response: self.response,
        }
    }

    pub fn with_relations(self) -> ResponseWithRelations {
        ResponseWithRelations {
            template: self.template_ref(),
            user: UserRef {
                id: self.response.user_id,
                name: self.user_name,
                email: self.user_email,
            },
            response: self.response,
        }
    }
}

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{
    FeedbackResponse, FeedbackTemplate, NewResponse, ResponseRow, ResponseWithRelations,
    ResponseWithTemplate, TemplateRef, TemplateWithCount, UserRef,
};
use crate::db::{MemoryStore, PgStore};

/// Templates and responses. Every listing is newest first.
#[async_trait]
pub trait FeedbackStore: Send + Sync {
    /// New templates are active.
    async fn create_template(&self, title: &str, question: &str)
        -> anyhow::Result<FeedbackTemplate>;
    async fn list_templates(&self) -> anyhow::Result<Vec<TemplateWithCount>>;
    async fn list_active_templates(&self) -> anyhow::Result<Vec<FeedbackTemplate>>;
    async fn find_template(&self, id: Uuid) -> anyhow::Result<Option<FeedbackTemplate>>;
    /// Also removes the template's responses.
    async fn delete_template(&self, id: Uuid) -> anyhow::Result<bool>;
    async fn create_response(&self, new: NewResponse) -> anyhow::Result<FeedbackResponse>;
    async fn list_responses(&self) -> anyhow::Result<Vec<ResponseWithRelations>>;
    async fn list_responses_by_user(&self, user_id: Uuid)
        -> anyhow::Result<Vec<ResponseWithTemplate>>;
}

const TEMPLATE_COLUMNS: &str = "id, title, question, is_active, created_at, updated_at";

const RESPONSE_JOIN: &str = r#"
    SELECT r.id, r.template_id, r.user_id, r.answer, r.rating, r.created_at,
           t.title AS template_title, t.question AS template_question,
           u.name AS user_name, u.email AS user_email
      FROM feedback_responses r
      JOIN feedback_templates t ON t.id = r.template_id
      JOIN users u ON u.id = r.user_id
"#;

#[async_trait]
impl FeedbackStore for PgStore {
    async fn create_template(
        &self,
        title: &str,
        question: &str,
    ) -> anyhow::Result<FeedbackTemplate> {
        let template = sqlx::query_as::<_, FeedbackTemplate>(&format!(
            r#"
            INSERT INTO feedback_templates (title, question, is_active)
            VALUES ($1, $2, TRUE)
            RETURNING {TEMPLATE_COLUMNS}
            "#
        ))
        .bind(title)
        .bind(question)
        .fetch_one(&self.db)
        .await?;
        Ok(template)
    }

    async fn list_templates(&self) -> anyhow::Result<Vec<TemplateWithCount>> {
        let rows = sqlx::query_as::<_, TemplateWithCount>(
            r#"
            SELECT t.id, t.title, t.question, t.is_active, t.created_at, t.updated_at,
                   COUNT(r.id) AS response_count
              FROM feedback_templates t
              LEFT JOIN feedback_responses r ON r.template_id = t.id
             GROUP BY t.id
             ORDER BY t.created_at DESC
            "#,
        )
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn list_active_templates(&self) -> anyhow::Result<Vec<FeedbackTemplate>> {
        let rows = sqlx::query_as::<_, FeedbackTemplate>(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM feedback_templates WHERE is_active ORDER BY created_at DESC"
        ))
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn find_template(&self, id: Uuid) -> anyhow::Result<Option<FeedbackTemplate>> {
        let row = sqlx::query_as::<_, FeedbackTemplate>(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM feedback_templates WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    async fn delete_template(&self, id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM feedback_templates WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn create_response(&self, new: NewResponse) -> anyhow::Result<FeedbackResponse> {
        let row = sqlx::query_as::<_, FeedbackResponse>(
            r#"
            INSERT INTO feedback_responses (template_id, user_id, answer, rating)
            VALUES ($1, $2, $3, $4)
            RETURNING id, template_id, user_id, answer, rating, created_at
            "#,
        )
        .bind(new.template_id)
        .bind(new.user_id)
        .bind(new.answer)
        .bind(new.rating)
        .fetch_one(&self.db)
        .await?;
        Ok(row)
    }

    async fn list_responses(&self) -> anyhow::Result<Vec<ResponseWithRelations>> {
        let rows = sqlx::query_as::<_, ResponseRow>(&format!(
            "{RESPONSE_JOIN} ORDER BY r.created_at DESC"
        ))
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(ResponseRow::with_relations).collect())
    }

    async fn list_responses_by_user(
        &self,
        user_id: Uuid,
    ) -> anyhow::Result<Vec<ResponseWithTemplate>> {
        let rows = sqlx::query_as::<_, ResponseRow>(&format!(
            "{RESPONSE_JOIN} WHERE r.user_id = $1 ORDER BY r.created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(ResponseRow::with_template).collect())
    }
}

impl MemoryStore {
    fn template_ref(&self, id: Uuid) -> Option<TemplateRef> {
        self.templates.get(&id).map(|t| TemplateRef::from(t.value()))
    }

    fn sorted_responses(&self, filter: impl Fn(&FeedbackResponse) -> bool) -> Vec<FeedbackResponse> {
        let mut out: Vec<FeedbackResponse> = self
            .responses
            .iter()
            .filter(|r| filter(r.value()))
            .map(|r| r.value().clone())
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }
}

#[async_trait]
impl FeedbackStore for MemoryStore {
    async fn create_template(
        &self,
        title: &str,
        question: &str,
    ) -> anyhow::Result<FeedbackTemplate> {
        let now = OffsetDateTime::now_utc();
        let template = FeedbackTemplate {
            id: Uuid::new_v4(),
            title: title.to_owned(),
            question: question.to_owned(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.templates.insert(template.id, template.clone());
        Ok(template)
    }

    async fn list_templates(&self) -> anyhow::Result<Vec<TemplateWithCount>> {
        let mut rows: Vec<TemplateWithCount> = self
            .templates
            .iter()
            .map(|t| TemplateWithCount {
                response_count: self
                    .responses
                    .iter()
                    .filter(|r| r.template_id == t.id)
                    .count() as i64,
                template: t.value().clone(),
            })
            .collect();
        rows.sort_by(|a, b| b.template.created_at.cmp(&a.template.created_at));
        Ok(rows)
    }

    async fn list_active_templates(&self) -> anyhow::Result<Vec<FeedbackTemplate>> {
        let mut rows: Vec<FeedbackTemplate> = self
            .templates
            .iter()
            .filter(|t| t.is_active)
            .map(|t| t.value().clone())
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn find_template(&self, id: Uuid) -> anyhow::Result<Option<FeedbackTemplate>> {
        Ok(self.templates.get(&id).map(|t| t.value().clone()))
    }

    async fn delete_template(&self, id: Uuid) -> anyhow::Result<bool> {
        if self.templates.remove(&id).is_none() {
            return Ok(false);
        }
        self.responses.retain(|_, r| r.template_id != id);
        Ok(true)
    }

    async fn create_response(&self, new: NewResponse) -> anyhow::Result<FeedbackResponse> {
        anyhow::ensure!(
            self.templates.contains_key(&new.template_id),
            "template {} does not exist",
            new.template_id
        );
        anyhow::ensure!(
            self.users.contains_key(&new.user_id),
            "user {} does not exist",
            new.user_id
        );
        let response = FeedbackResponse {
            id: Uuid::new_v4(),
            template_id: new.template_id,
            user_id: new.user_id,
            answer: new.answer,
            rating: new.rating,
            created_at: OffsetDateTime::now_utc(),
        };
        self.responses.insert(response.id, response.clone());
        Ok(response)
    }

    async fn list_responses(&self) -> anyhow::Result<Vec<ResponseWithRelations>> {
        Ok(self
            .sorted_responses(|_| true)
            .into_iter()
            .filter_map(|response| {
                let template = self.template_ref(response.template_id)?;
                let user = self.users.get(&response.user_id).map(|u| UserRef {
                    id: u.id,
                    name: u.name.clone(),
                    email: u.email.clone(),
                })?;
                Some(ResponseWithRelations {
                    response,
                    user,
                    template,
                })
            })
            .collect())
    }

    async fn list_responses_by_user(
        &self,
        user_id: Uuid,
    ) -> anyhow::Result<Vec<ResponseWithTemplate>> {
        Ok(self
            .sorted_responses(|r| r.user_id == user_id)
            .into_iter()
            .filter_map(|response| {
                let template = self.template_ref(response.template_id)?;
                Some(ResponseWithTemplate { response, template })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::claims::Role,
        users::{repo::UserStore, repo_types::NewUser},
    };

    async fn seed_user(store: &MemoryStore) -> Uuid {
        store
            .create(NewUser {
                name: Some("Ann".into()),
                email: "ann@x.com".into(),
                password_hash: "hash".into(),
                role: Role::User,
            })
            .await
            .unwrap()
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn responses_carry_template_and_user() {
        let store = MemoryStore::default();
        let user_id = seed_user(&store).await;
        let t = store.create_template("Q1", "How was it?").await.unwrap();
        store
            .create_response(NewResponse {
                template_id: t.id,
                user_id,
                answer: "Fine".into(),
                rating: 4,
            })
            .await
            .unwrap();

        let all = store.list_responses().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].user.email, "ann@x.com");
        assert_eq!(all[0].template.title, "Q1");

        let mine = store.list_responses_by_user(user_id).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert!(store.list_responses_by_user(Uuid::new_v4()).await.unwrap().is_empty());

        let templates = store.list_templates().await.unwrap();
        assert_eq!(templates[0].response_count, 1);
    }

    #[tokio::test]
    async fn deleting_template_drops_its_responses() {
        let store = MemoryStore::default();
        let user_id = seed_user(&store).await;
        let t = store.create_template("Q1", "How was it?").await.unwrap();
        store
            .create_response(NewResponse {
                template_id: t.id,
                user_id,
                answer: "Fine".into(),
                rating: 5,
            })
            .await
            .unwrap();

        assert!(store.delete_template(t.id).await.unwrap());
        assert!(!store.delete_template(t.id).await.unwrap());
        assert!(store.list_responses().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleting_user_drops_their_responses() {
        let store = MemoryStore::default();
        let user_id = seed_user(&store).await;
        let t = store.create_template("Q1", "How was it?").await.unwrap();
        store
            .create_response(NewResponse {
                template_id: t.id,
                user_id,
                answer: "Fine".into(),
                rating: 5,
            })
            .await
            .unwrap();

        assert!(store.delete(user_id).await.unwrap());
        assert_eq!(store.list_templates().await.unwrap()[0].response_count, 0);
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{AgeRating, ChapterResult, ModerationRecord};

/// Repository Trait
///
/// Persistence contract for stored moderation results. Handlers only see
/// this trait through `RepositoryState`, so Postgres and the in-memory store
/// are interchangeable.
///
/// A record holds the raw moderation API response of every piece of a book
/// (title, description, cover image, chapters). Records are never evaluated
/// here; `moderation::evaluate_record` turns them into reports at read time,
/// which is what lets the same record be judged at another age rating.
///
/// Failure handling:
/// 1. Database errors are logged with `tracing::error!` inside the implementation.
/// 2. They surface as `None`, `false` or an empty list.
/// 3. Handlers map a missing save result to 500.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Inserts or replaces the record of `record.book_id`, chapters included.
    /// An existing record is only replaced when `record.author_id` matches
    /// its author; otherwise nothing changes and `None` is returned.
    async fn save_moderation(&self, record: ModerationRecord) -> Option<ModerationRecord>;
    async fn get_moderation(&self, book_id: Uuid) -> Option<ModerationRecord>;
    // Most recently updated first.
    async fn list_moderations(&self) -> Vec<ModerationRecord>;
    async fn delete_moderation(&self, book_id: Uuid) -> bool;
}

pub type RepositoryState = Arc<dyn Repository>;

// --- Postgres ---

#[derive(FromRow)]
struct ModerationRow {
    book_id: Uuid,
    author_id: Uuid,
    age_rating: String,
    title_result: Option<String>,
    description_result: Option<String>,
    cover_image_result: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct ChapterRow {
    book_id: Uuid,
    chapter_id: Uuid,
    result: String,
}

impl ModerationRow {
    fn into_record(self, chapter_results: Vec<ChapterResult>) -> ModerationRecord {
        let age_rating = self.age_rating.parse().unwrap_or_else(|e| {
            tracing::warn!(book_id = %self.book_id, error = %e, "unknown stored age rating, using ALL");
            AgeRating::All
        });
        ModerationRecord {
            book_id: self.book_id,
            author_id: self.author_id,
            age_rating,
            title_result: self.title_result,
            description_result: self.description_result,
            cover_image_result: self.cover_image_result,
            chapter_results,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

const SELECT_RECORD: &str = r#"
    SELECT book_id, author_id, age_rating, title_result, description_result,
           cover_image_result, created_at, updated_at
    FROM moderation_results
"#;

/// PostgresRepository
///
/// Backed by the `moderation_results` and `chapter_moderation_results` tables
/// (see `migrations/`).
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn chapters_for(&self, book_ids: &[Uuid]) -> Result<Vec<ChapterRow>, sqlx::Error> {
        sqlx::query_as::<_, ChapterRow>(
            r#"SELECT book_id, chapter_id, result
               FROM chapter_moderation_results
               WHERE book_id = ANY($1)
               ORDER BY book_id, position"#,
        )
        .bind(book_ids)
        .fetch_all(&self.pool)
        .await
    }

    /// Returns `Ok(false)` when the book already belongs to another author.
    async fn save_in_tx(&self, record: &ModerationRecord) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let upserted = sqlx::query(
            r#"
            INSERT INTO moderation_results
                (book_id, author_id, age_rating, title_result, description_result,
                 cover_image_result, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
            ON CONFLICT (book_id) DO UPDATE SET
                author_id = EXCLUDED.author_id,
                age_rating = EXCLUDED.age_rating,
                title_result = EXCLUDED.title_result,
                description_result = EXCLUDED.description_result,
                cover_image_result = EXCLUDED.cover_image_result,
                updated_at = NOW()
            WHERE moderation_results.author_id = EXCLUDED.author_id
            "#,
        )
        .bind(record.book_id)
        .bind(record.author_id)
        .bind(record.age_rating.as_str())
        .bind(&record.title_result)
        .bind(&record.description_result)
        .bind(&record.cover_image_result)
        .execute(&mut *tx)
        .await?;

        if upserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("DELETE FROM chapter_moderation_results WHERE book_id = $1")
            .bind(record.book_id)
            .execute(&mut *tx)
            .await?;

        for (position, chapter) in record.chapter_results.iter().enumerate() {
            sqlx::query(
                r#"INSERT INTO chapter_moderation_results (book_id, chapter_id, position, result)
                   VALUES ($1, $2, $3, $4)"#,
            )
            .bind(record.book_id)
            .bind(chapter.chapter_id)
            .bind(position as i32)
            .bind(&chapter.result)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }
}

fn group_chapters(rows: Vec<ChapterRow>) -> HashMap<Uuid, Vec<ChapterResult>> {
    let mut grouped: HashMap<Uuid, Vec<ChapterResult>> = HashMap::new();
    for row in rows {
        grouped.entry(row.book_id).or_default().push(ChapterResult {
            chapter_id: row.chapter_id,
            result: row.result,
        });
    }
    grouped
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn save_moderation(&self, record: ModerationRecord) -> Option<ModerationRecord> {
        match self.save_in_tx(&record).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(book_id = %record.book_id, author_id = %record.author_id, "save_moderation refused: book has another author");
                return None;
            }
            Err(e) => {
                tracing::error!(book_id = %record.book_id, "save_moderation error: {:?}", e);
                return None;
            }
        }
        self.get_moderation(record.book_id).await
    }

    async fn get_moderation(&self, book_id: Uuid) -> Option<ModerationRecord> {
        let row = sqlx::query_as::<_, ModerationRow>(&format!("{} WHERE book_id = $1", SELECT_RECORD))
            .bind(book_id)
            .fetch_optional(&self.pool)
            .await
            .unwrap_or_else(|e| {
                tracing::error!("get_moderation error: {:?}", e);
                None
            })?;

        let chapters = match self.chapters_for(&[book_id]).await {
            Ok(rows) => rows
                .into_iter()
                .map(|r| ChapterResult {
                    chapter_id: r.chapter_id,
                    result: r.result,
                })
                .collect(),
            Err(e) => {
                tracing::error!("get_moderation chapters error: {:?}", e);
                return None;
            }
        };

        Some(row.into_record(chapters))
    }

    async fn list_moderations(&self) -> Vec<ModerationRecord> {
        let rows = match sqlx::query_as::<_, ModerationRow>(&format!(
            "{} ORDER BY updated_at DESC",
            SELECT_RECORD
        ))
        .fetch_all(&self.pool)
        .await
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!("list_moderations error: {:?}", e);
                return vec![];
            }
        };

        let ids: Vec<Uuid> = rows.iter().map(|r| r.book_id).collect();
        let mut chapters = match self.chapters_for(&ids).await {
            Ok(chapter_rows) => group_chapters(chapter_rows),
            Err(e) => {
                tracing::error!("list_moderations chapters error: {:?}", e);
                return vec![];
            }
        };

        rows.into_iter()
            .map(|row| {
                let book_chapters = chapters.remove(&row.book_id).unwrap_or_default();
                row.into_record(book_chapters)
            })
            .collect()
    }

    async fn delete_moderation(&self, book_id: Uuid) -> bool {
        // Chapter rows go with the parent through ON DELETE CASCADE.
        match sqlx::query("DELETE FROM moderation_results WHERE book_id = $1")
            .bind(book_id)
            .execute(&self.pool)
            .await
        {
            Ok(res) => res.rows_affected() > 0,
            Err(e) => {
                tracing::error!("delete_moderation error: {:?}", e);
                false
            }
        }
    }
}

// --- In-Memory ---

/// InMemoryRepository
///
/// Process-local store used by tests and by local runs without `DATABASE_URL`.
#[derive(Default)]
pub struct InMemoryRepository {
    records: RwLock<HashMap<Uuid, ModerationRecord>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn save_moderation(&self, mut record: ModerationRecord) -> Option<ModerationRecord> {
        let mut records = self.records.write().await;
        let now = Utc::now();
        if let Some(existing) = records.get(&record.book_id) {
            if existing.author_id != record.author_id {
                tracing::warn!(book_id = %record.book_id, author_id = %record.author_id, "save_moderation refused: book has another author");
                return None;
            }
        }
        record.created_at = records
            .get(&record.book_id)
            .map(|existing| existing.created_at)
            .unwrap_or(now);
        record.updated_at = now;
        records.insert(record.book_id, record.clone());
        Some(record)
    }

    async fn get_moderation(&self, book_id: Uuid) -> Option<ModerationRecord> {
        self.records.read().await.get(&book_id).cloned()
    }

    async fn list_moderations(&self) -> Vec<ModerationRecord> {
        let mut records: Vec<ModerationRecord> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        records
    }

    async fn delete_moderation(&self, book_id: Uuid) -> bool {
        self.records.write().await.remove(&book_id).is_some()
    }
}

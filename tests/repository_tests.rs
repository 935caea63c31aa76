use std::time::Duration;

use chrono::Utc;
use harus_library::{
    models::{AgeRating, ChapterResult, ModerationRecord},
    repository::{InMemoryRepository, PostgresRepository, Repository},
};
use uuid::Uuid;

fn record(book_id: Uuid, chapters: usize) -> ModerationRecord {
    let now = Utc::now();
    ModerationRecord {
        book_id,
        author_id: Uuid::new_v4(),
        age_rating: AgeRating::Teen13,
        title_result: Some(r#"{"results":[{"category_scores":{"hate":0.0}}]}"#.to_string()),
        description_result: None,
        cover_image_result: None,
        chapter_results: (0..chapters)
            .map(|i| ChapterResult {
                chapter_id: Uuid::new_v4(),
                result: format!(r#"{{"results":[{{"category_scores":{{"violence":0.{}}}}}]}}"#, i),
            })
            .collect(),
        created_at: now,
        updated_at: now,
    }
}

async fn exercise(repo: &dyn Repository) {
    let book_id = Uuid::new_v4();

    let first = repo.save_moderation(record(book_id, 3)).await.unwrap();
    assert_eq!(first.chapter_results.len(), 3);
    assert_eq!(first.age_rating, AgeRating::Teen13);

    // Upsert replaces chapters and keeps the creation time.
    let mut replacement = record(book_id, 1);
    replacement.author_id = first.author_id;
    replacement.age_rating = AgeRating::Adult18;
    let second = repo.save_moderation(replacement.clone()).await.unwrap();
    assert_eq!(second.chapter_results, replacement.chapter_results);
    assert_eq!(second.age_rating, AgeRating::Adult18);
    assert_eq!(second.created_at, first.created_at);
    assert!(second.updated_at >= first.updated_at);

    // Another author cannot take over the book.
    let mut takeover = record(book_id, 0);
    takeover.title_result = None;
    assert!(repo.save_moderation(takeover).await.is_none());
    let kept = repo.get_moderation(book_id).await.unwrap();
    assert_eq!(kept.author_id, first.author_id);
    assert_eq!(kept.chapter_results, replacement.chapter_results);
    assert!(kept.title_result.is_some());

    tokio::time::sleep(Duration::from_millis(5)).await;
    let other = Uuid::new_v4();
    repo.save_moderation(record(other, 0)).await.unwrap();

    let listed = repo.list_moderations().await;
    let position = |id| listed.iter().position(|r| r.book_id == id).unwrap();
    assert!(position(other) < position(book_id), "newest first");

    assert!(repo.delete_moderation(book_id).await);
    assert!(!repo.delete_moderation(book_id).await);
    assert!(repo.get_moderation(book_id).await.is_none());

    repo.delete_moderation(other).await;
}

#[tokio::test]
async fn in_memory_repository_round_trip() {
    exercise(&InMemoryRepository::new()).await;
}

#[tokio::test]
async fn in_memory_chapter_order_is_preserved() {
    let repo = InMemoryRepository::new();
    let saved = repo.save_moderation(record(Uuid::new_v4(), 5)).await.unwrap();
    let fetched = repo.get_moderation(saved.book_id).await.unwrap();
    assert_eq!(fetched.chapter_results, saved.chapter_results);
}

#[tokio::test]
#[ignore = "needs DATABASE_URL pointing at a Postgres instance"]
async fn postgres_repository_round_trip() {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = sqlx::PgPool::connect(&url).await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let repo = PostgresRepository::new(pool);
    exercise(&repo).await;

    let saved = repo.save_moderation(record(Uuid::new_v4(), 4)).await.unwrap();
    let fetched = repo.get_moderation(saved.book_id).await.unwrap();
    assert_eq!(fetched.chapter_results, saved.chapter_results);
    repo.delete_moderation(saved.book_id).await;
}

use laptop_shop::auth::repo::PgUserStore;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

/// Connects to `TEST_DATABASE_URL` (falling back to a postgres
/// `DATABASE_URL`) and runs migrations. `None` when neither is set.
pub async fn create_test_store() -> Option<PgUserStore> {
    let url = std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .ok()
        .filter(|u| u.starts_with("postgres"))?;

    let pool = PgPoolOptions::new()
        .max_connections(4)
        .connect(&url)
        .await
        .expect("Failed to connect to test database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    Some(PgUserStore::new(pool))
}

/// Email no other test run will have used.
pub fn unique_email() -> String {
    format!("pg-{}@example.com", Uuid::new_v4())
}

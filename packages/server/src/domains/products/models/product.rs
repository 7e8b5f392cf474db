use anyhow::Result;
use chrono::{DateTime, Utc};
use numbering::{AssignedNumber, EntityChange, FieldValue, NumberingEngine};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

/// Entity type the numbering rules are registered under
pub const PRODUCT_ENTITY: &str = "Product";

/// Table backing [`Product`]
pub const PRODUCTS_TABLE: &str = "products";

/// Column receiving the generated number
pub const NUMBER_FIELD: &str = "number";

/// A product numbered on insert
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub branch: Option<String>,
    pub number: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields accepted when creating a product
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub branch: Option<String>,
    /// Pre-assigned number; left untouched by numbering
    pub number: Option<String>,
}

impl NewProduct {
    fn into_change(self, created_at: DateTime<Utc>) -> EntityChange {
        EntityChange::insert(PRODUCT_ENTITY, PRODUCTS_TABLE)
            .with_field("name", self.name)
            .with_field("branch", self.branch)
            .with_field(NUMBER_FIELD, self.number)
            .with_field("created_at", created_at)
    }
}

impl Product {
    /// Insert a product, numbering it inside the same transaction.
    ///
    /// Numbering errors come back as [`numbering::NumberingError`] inside the
    /// `anyhow::Error`; the transaction is rolled back on any failure.
    pub async fn create(
        input: NewProduct,
        engine: &NumberingEngine,
        pool: &PgPool,
    ) -> Result<(Self, Option<AssignedNumber>)> {
        let created_at = Utc::now();
        let mut changes = [input.into_change(created_at)];

        let mut tx = pool.begin().await?;
        let mut assigned = engine.process_pg(&mut tx, &mut changes).await?;

        let [change] = changes;
        let text = |field: &str| change.text(field).map(str::to_string);

        let product = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO products (name, branch, number, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(text("name"))
        .bind(text("branch"))
        .bind(text(NUMBER_FIELD))
        .bind(match change.field("created_at") {
            Some(FieldValue::TimestampTz(ts)) => ts.with_timezone(&Utc),
            _ => created_at,
        })
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok((product, assigned.pop()))
    }

    pub async fn find_by_id(id: i64, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM products WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    /// Most recent products first.
    pub async fn find_recent(limit: i64, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM products ORDER BY id DESC LIMIT $1")
            .bind(limit)
            .fetch_all(pool)
            .await
            .map_err(Into::into)
    }

    /// Products sharing a number within a branch (used to audit duplicates).
    pub async fn find_by_number(
        number: &str,
        branch: Option<&str>,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM products
            WHERE number = $1 AND branch IS NOT DISTINCT FROM $2
            ORDER BY id
            "#,
        )
        .bind(number)
        .bind(branch)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }
}

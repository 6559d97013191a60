use async_trait::async_trait;
use sqlx::{PgPool, Row};

use mmr_ledger::{LookupError, Rating, RatingLookup};

/// Prior rating from `algo_rating` for one rating type.
///
/// Phase end reads ratings inside its transaction; give this the side pool
/// ([`crate::connect_side_pool`]), not the ledger's.
#[derive(Clone)]
pub struct PgRatingLookup {
    pool: PgPool,
    rating_type_id: i32,
}

impl PgRatingLookup {
    pub fn new(pool: PgPool, rating_type_id: i32) -> Self {
        Self {
            pool,
            rating_type_id,
        }
    }
}

#[async_trait]
impl RatingLookup for PgRatingLookup {
    async fn rating(&self, coder_id: i64) -> Result<Rating, LookupError> {
        let row = sqlx::query(
            r#"
            select rating, vol
            from algo_rating
            where coder_id = $1 and algo_rating_type_id = $2
            "#,
        )
        .bind(coder_id)
        .bind(self.rating_type_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LookupError::new(format!("rating lookup failed: {e}")))?;

        let Some(row) = row else {
            return Ok(Rating::default());
        };
        let decode = |e: sqlx::Error| LookupError::new(format!("rating decode failed: {e}"));
        Ok(Rating {
            rating: row.try_get("rating").map_err(decode)?,
            vol: row.try_get("vol").map_err(decode)?,
        })
    }
}

//! The geospatial store a tile statement runs against.
use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::{query, PgPool, Postgres, Row};

/// Anything able to execute a rendered tile statement.
///
/// Implementations bind the eight parameters positionally and return the
/// single binary column of the first row, or `None` when there is no row.
#[async_trait]
pub trait TileStore: Send + Sync {
    async fn fetch_tile(
        &self,
        statement: &str,
        params: [f64; 8],
    ) -> Result<Option<Vec<u8>>, sqlx::Error>;
}

#[async_trait]
impl TileStore for PgPool {
    async fn fetch_tile(
        &self,
        statement: &str,
        params: [f64; 8],
    ) -> Result<Option<Vec<u8>>, sqlx::Error> {
        let mut conn = self.acquire().await?;
        let query = params
            .iter()
            .fold(query::<Postgres>(statement), |acc, param| acc.bind(*param));

        let mut rows = query.fetch(&mut *conn);
        let row = rows.try_next().await?;
        match row {
            Some(row) => row.try_get::<Option<Vec<u8>>, _>(0),
            None => Ok(None),
        }
    }
}

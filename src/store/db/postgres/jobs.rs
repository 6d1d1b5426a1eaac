use sea_query::{ColumnDef, Expr as SeaExpr, Iden, Index, Order as SeaOrder, PostgresQueryBuilder, Query as SeaQuery, Table};
use sea_query_binder::SqlxBinder;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{
    EdgeTaskError, Result,
    model::{AnyJob, JobKind},
    store::map_db_err,
};

#[derive(Iden)]
#[iden = "jobs"]
enum CollectionIden {
    Table,

    Kind,
    Name,
    ResourceVersion,
    Data,
}

/// sea-query statements over the `jobs` table.
#[derive(Debug, Clone)]
pub struct JobCollection {
    pool: PgPool,
}

impl JobCollection {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn init(&self) -> Result<()> {
        let sql = Table::create()
            .table(CollectionIden::Table)
            .if_not_exists()
            .col(ColumnDef::new(CollectionIden::Kind).string().not_null())
            .col(ColumnDef::new(CollectionIden::Name).string().not_null())
            .col(ColumnDef::new(CollectionIden::ResourceVersion).big_integer().not_null().default(1))
            .col(ColumnDef::new(CollectionIden::Data).text().not_null())
            .primary_key(Index::create().col(CollectionIden::Kind).col(CollectionIden::Name))
            .build(PostgresQueryBuilder);

        sqlx::query(&sql).execute(&self.pool).await.map_err(map_db_err)?;
        Ok(())
    }

    pub async fn find(
        &self,
        kind: JobKind,
        name: &str,
    ) -> Result<Option<AnyJob>> {
        let (sql, values) = SeaQuery::select()
            .from(CollectionIden::Table)
            .columns([CollectionIden::ResourceVersion, CollectionIden::Data])
            .and_where(SeaExpr::col(CollectionIden::Kind).eq(kind.as_ref()))
            .and_where(SeaExpr::col(CollectionIden::Name).eq(name))
            .build_sqlx(PostgresQueryBuilder);

        let row = sqlx::query_with(&sql, values).fetch_optional(&self.pool).await.map_err(map_db_err)?;
        row.map(|row| from_row(&row)).transpose()
    }

    pub async fn list(
        &self,
        kind: JobKind,
    ) -> Result<Vec<AnyJob>> {
        let (sql, values) = SeaQuery::select()
            .from(CollectionIden::Table)
            .columns([CollectionIden::ResourceVersion, CollectionIden::Data])
            .and_where(SeaExpr::col(CollectionIden::Kind).eq(kind.as_ref()))
            .order_by(CollectionIden::Name, SeaOrder::Asc)
            .build_sqlx(PostgresQueryBuilder);

        let rows = sqlx::query_with(&sql, values).fetch_all(&self.pool).await.map_err(map_db_err)?;
        rows.iter().map(from_row).collect()
    }

    pub async fn insert(
        &self,
        job: &AnyJob,
    ) -> Result<()> {
        let (sql, values) = SeaQuery::insert()
            .into_table(CollectionIden::Table)
            .columns([CollectionIden::Kind, CollectionIden::Name, CollectionIden::ResourceVersion, CollectionIden::Data])
            .values([job.kind().as_ref().into(), job.name().into(), (job.resource_version() as i64).into(), job.to_json()?.into()])
            .map_err(map_db_err)?
            .build_sqlx(PostgresQueryBuilder);

        sqlx::query_with(&sql, values).execute(&self.pool).await.map_err(map_db_err)?;
        Ok(())
    }

    /// Replaces the row only while it still carries `expected`.
    pub async fn compare_and_swap(
        &self,
        expected: u64,
        job: &AnyJob,
    ) -> Result<bool> {
        let (sql, values) = SeaQuery::update()
            .table(CollectionIden::Table)
            .values([
                (CollectionIden::ResourceVersion, (job.resource_version() as i64).into()),
                (CollectionIden::Data, job.to_json()?.into()),
            ])
            .and_where(SeaExpr::col(CollectionIden::Kind).eq(job.kind().as_ref()))
            .and_where(SeaExpr::col(CollectionIden::Name).eq(job.name()))
            .and_where(SeaExpr::col(CollectionIden::ResourceVersion).eq(expected as i64))
            .build_sqlx(PostgresQueryBuilder);

        let result = sqlx::query_with(&sql, values).execute(&self.pool).await.map_err(map_db_err)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(
        &self,
        kind: JobKind,
        name: &str,
    ) -> Result<bool> {
        let (sql, values) = SeaQuery::delete()
            .from_table(CollectionIden::Table)
            .and_where(SeaExpr::col(CollectionIden::Kind).eq(kind.as_ref()))
            .and_where(SeaExpr::col(CollectionIden::Name).eq(name))
            .build_sqlx(PostgresQueryBuilder);

        let result = sqlx::query_with(&sql, values).execute(&self.pool).await.map_err(map_db_err)?;
        Ok(result.rows_affected() > 0)
    }
}

/// The column is authoritative for the resource version; the document copy may lag.
fn from_row(row: &PgRow) -> Result<AnyJob> {
    let version: i64 = row.try_get("resource_version").map_err(map_db_err)?;
    let data: String = row.try_get("data").map_err(map_db_err)?;
    let mut job = AnyJob::from_json(&data).map_err(|e| EdgeTaskError::Store(format!("corrupt job document: {}", e)))?;
    job.metadata_mut().resource_version = version as u64;
    Ok(job)
}

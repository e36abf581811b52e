use crate::{
    error::SightlineError,
    properties::{decode_observations, Entity, NodeSet, ObservationUpdate, Relation},
    query::GraphSource,
};
use futures_core::future::BoxFuture;
use sqlx::{
    error::BoxDynError,
    migrate::{Migration as SqlxMigration, MigrationSource, MigrationType, Migrator},
    sqlite::{Sqlite, SqliteConnectOptions, SqliteRow},
    ConnectOptions, Execute, FromRow, Pool, QueryBuilder, Row,
};
use std::{collections::BTreeMap, path::PathBuf, result::Result};

/// <https://www.sqlite.org/limits.html#max_variable_number>
pub const SQLITE_LIMIT_VARIABLE_NUMBER: usize = 32766;

/// Rows per multi-row INSERT so that `rows * columns` stays under the bind limit.
const ENTITY_ROWS_PER_STATEMENT: usize = SQLITE_LIMIT_VARIABLE_NUMBER / 3;
const RELATION_ROWS_PER_STATEMENT: usize = SQLITE_LIMIT_VARIABLE_NUMBER / 3;
/// Names per lookup; relation lookups bind each name twice.
const NAMES_PER_LOOKUP: usize = SQLITE_LIMIT_VARIABLE_NUMBER / 2;

/// A batch of writes staged into one SQL script and applied inside a single database
/// transaction, so either every row of the batch is durable or none is.
pub struct Transaction<'a> {
    qb: QueryBuilder<'a, Sqlite>,
    pub staged: usize,
}

impl<'a> Default for Transaction<'a> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Transaction<'a> {
    pub fn new() -> Transaction<'a> {
        Transaction {
            qb: QueryBuilder::<Sqlite>::new(""),
            staged: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.staged == 0
    }

    pub async fn execute(&mut self, connection: &Pool<Sqlite>) -> Result<(), SightlineError> {
        if self.is_empty() {
            return Ok(());
        }
        let mut tx = connection.begin().await?;
        let query = self.qb.build();
        let sql = query.sql().to_string();
        query.execute(&mut *tx).await.map_err(|e| {
            tracing::error!(
                "[Transaction.execute] SQL error applying {} staged statements '{}'\n\terror: {}",
                self.staged,
                sql,
                e
            );
            e
        })?;
        tx.commit().await?;
        tracing::debug!("[Transaction] committed {} statements", self.staged);
        self.qb.reset();
        self.staged = 0;
        Ok(())
    }

    pub fn upsert_entities(&mut self, entities: &[Entity]) -> Result<(), SightlineError> {
        for chunk in entities.chunks(ENTITY_ROWS_PER_STATEMENT) {
            let mut rows = Vec::with_capacity(chunk.len());
            for entity in chunk {
                rows.push((
                    entity.name.clone(),
                    entity.entity_type.clone(),
                    serde_json::to_string(&entity.observations)?,
                ));
            }
            self.qb
                .push("INSERT OR REPLACE INTO entities(name, entity_type, observations) ");
            self.qb
                .push_values(rows, |mut b, (name, entity_type, observations)| {
                    b.push_bind(name)
                        .push_bind(entity_type)
                        .push_bind(observations);
                });
            self.qb.push("; ");
            self.staged += 1;
        }
        Ok(())
    }

    pub fn append_relations(&mut self, relations: &[Relation]) {
        for chunk in relations.chunks(RELATION_ROWS_PER_STATEMENT) {
            self.qb
                .push("INSERT INTO relations(from_entity, to_entity, relation_type) ");
            self.qb.push_values(chunk, |mut b, relation| {
                b.push_bind(relation.from.clone())
                    .push_bind(relation.to.clone())
                    .push_bind(relation.relation_type.clone());
            });
            self.qb.push("; ");
            self.staged += 1;
        }
    }
}

#[derive(Debug, Clone)]
pub struct DbConnection(pub Pool<Sqlite>);

/// Characters serde_json escapes inside a string; a query containing one cannot be prefiltered
/// against the raw JSON observation column.
fn needs_full_scan(query: &str) -> bool {
    query.chars().any(|c| c == '"' || c == '\\' || c.is_control())
}

impl DbConnection {
    /// Number of (entities, relations) currently stored.
    pub async fn counts(&self) -> Result<(u32, u32), SightlineError> {
        let entities = sqlx::query("SELECT COUNT(*) FROM entities;")
            .fetch_one(&self.0)
            .await?
            .try_get::<u32, usize>(0)?;
        let relations = sqlx::query("SELECT COUNT(*) FROM relations;")
            .fetch_one(&self.0)
            .await?
            .try_get::<u32, usize>(0)?;
        Ok((entities, relations))
    }

    /// Every relation in the store, ascending by insertion.
    pub async fn all_relations(&self) -> Result<Vec<Relation>, SightlineError> {
        let relations = sqlx::query_as::<_, Relation>("SELECT * FROM relations ORDER BY id")
            .fetch_all(&self.0)
            .await
            .map_err(|e| {
                tracing::error!("[DbConnection.all_relations] Failed to fetch relations: {}", e);
                e
            })?;
        Ok(relations)
    }

    #[tracing::instrument(level = "debug", skip_all, fields(count = names.len()))]
    async fn get_entities(&self, names: &[String]) -> Result<Vec<Entity>, SightlineError> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM entities WHERE name IN (");
        let mut separated = qb.separated(", ");
        for name in names {
            separated.push_bind(name.clone());
        }
        qb.push(") ORDER BY rowid");
        let query = qb.build_query_as::<Entity>();
        let sql = query.sql().to_string();
        let entities = query.fetch_all(&self.0).await.map_err(|e| {
            tracing::error!(
                "[DbConnection.get_entities] SQL error processing query '{}'\n\terror: {}",
                sql,
                e
            );
            e
        })?;
        Ok(entities)
    }

    #[tracing::instrument(level = "debug", skip_all, fields(count = names.len()))]
    async fn get_touching_relations(
        &self,
        names: &[String],
    ) -> Result<Vec<(i64, Relation)>, SightlineError> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM relations WHERE from_entity IN (");
        let mut separated = qb.separated(", ");
        for name in names {
            separated.push_bind(name.clone());
        }
        qb.push(") OR to_entity IN (");
        let mut separated = qb.separated(", ");
        for name in names {
            separated.push_bind(name.clone());
        }
        qb.push(") ORDER BY id");
        let query = qb.build();
        let sql = query.sql().to_string();
        let rows: Vec<SqliteRow> = query.fetch_all(&self.0).await.map_err(|e| {
            tracing::error!(
                "[DbConnection.get_touching_relations] SQL error processing query '{}'\n\terror: {}",
                sql,
                e
            );
            e
        })?;
        let mut relations = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            let id: i64 = row.try_get("id")?;
            relations.push((id, Relation::from_row(row)?));
        }
        Ok(relations)
    }
}

impl GraphSource for DbConnection {
    #[tracing::instrument(level = "debug", skip_all, fields(count = entities.len()))]
    async fn upsert_entities(&self, entities: &[Entity]) -> Result<(), SightlineError> {
        let mut transaction = Transaction::new();
        transaction.upsert_entities(entities)?;
        transaction.execute(&self.0).await
    }

    #[tracing::instrument(level = "debug", skip_all, fields(count = relations.len()))]
    async fn append_relations(&self, relations: &[Relation]) -> Result<(), SightlineError> {
        let mut transaction = Transaction::new();
        transaction.append_relations(relations);
        transaction.execute(&self.0).await
    }

    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(entities = entities.len(), relations = relations.len())
    )]
    async fn write_batch(
        &self,
        entities: &[Entity],
        relations: &[Relation],
    ) -> Result<(), SightlineError> {
        let mut transaction = Transaction::new();
        transaction.upsert_entities(entities)?;
        transaction.append_relations(relations);
        transaction.execute(&self.0).await
    }

    #[tracing::instrument(level = "debug", skip_all, fields(count = updates.len()))]
    async fn append_observations(&self, updates: &[ObservationUpdate]) -> Result<(), SightlineError> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut tx = self.0.begin().await?;
        for update in updates {
            let row = sqlx::query("SELECT observations FROM entities WHERE name = ?")
                .bind(&update.entity_name)
                .fetch_optional(&mut *tx)
                .await?;
            let Some(row) = row else {
                tracing::debug!(
                    "[DbConnection.append_observations] no entity named '{}', skipping",
                    update.entity_name
                );
                continue;
            };
            let raw: Option<String> = row.try_get("observations")?;
            let mut observations =
                decode_observations(&update.entity_name, raw.as_deref().unwrap_or("[]"));
            observations.extend(update.contents.iter().cloned());
            sqlx::query("UPDATE entities SET observations = ? WHERE name = ?")
                .bind(serde_json::to_string(&observations)?)
                .bind(&update.entity_name)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn search_nodes(&self, query: &str) -> Result<Vec<Entity>, SightlineError> {
        let candidates = if needs_full_scan(query) {
            sqlx::query_as::<_, Entity>("SELECT * FROM entities ORDER BY rowid")
                .fetch_all(&self.0)
                .await?
        } else {
            // instr() is case-sensitive, unlike LIKE. The observation column is JSON text, so
            // this is only a prefilter; the exact per-observation test happens below.
            sqlx::query_as::<_, Entity>(
                "SELECT * FROM entities \
                 WHERE instr(name, ?) > 0 OR instr(entity_type, ?) > 0 \
                 OR instr(observations, ?) > 0 \
                 ORDER BY rowid",
            )
            .bind(query)
            .bind(query)
            .bind(query)
            .fetch_all(&self.0)
            .await
            .map_err(|e| {
                tracing::error!("[DbConnection.search_nodes] SQL error: {}", e);
                e
            })?
        };
        Ok(candidates
            .into_iter()
            .filter(|e| e.matches_text(query))
            .collect())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(count = names.len()))]
    async fn open_nodes(&self, names: &[String]) -> Result<NodeSet, SightlineError> {
        let mut entities = Vec::new();
        let mut relations = BTreeMap::<i64, Relation>::new();
        for chunk in names.chunks(NAMES_PER_LOOKUP) {
            entities.extend(self.get_entities(chunk).await?);
            relations.extend(self.get_touching_relations(chunk).await?);
        }
        Ok(NodeSet {
            entities,
            relations: relations.into_values().collect(),
        })
    }
}

/// A migration definition.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub sql: &'static str,
    pub kind: MigrationType,
}

#[derive(Debug, Clone)]
struct MigrationList(Vec<Migration>);

impl MigrationSource<'static> for MigrationList {
    fn resolve(self) -> BoxFuture<'static, Result<Vec<SqlxMigration>, BoxDynError>> {
        Box::pin(async move {
            let mut migrations = Vec::new();
            for migration in self.0 {
                if matches!(migration.kind, MigrationType::ReversibleUp) {
                    migrations.push(SqlxMigration::new(
                        migration.version,
                        migration.description.into(),
                        migration.kind,
                        migration.sql.into(),
                        false,
                    ));
                }
            }
            Ok(migrations)
        })
    }
}

fn migrations() -> MigrationList {
    MigrationList(vec![Migration {
        version: 1,
        description: "create_graph_tables",
        sql: "\
            CREATE TABLE IF NOT EXISTS entities (name TEXT PRIMARY KEY, entity_type TEXT NOT NULL, observations TEXT NOT NULL); \
            CREATE TABLE IF NOT EXISTS relations (id INTEGER PRIMARY KEY AUTOINCREMENT, from_entity TEXT NOT NULL, to_entity TEXT NOT NULL, relation_type TEXT NOT NULL); \
            CREATE INDEX IF NOT EXISTS relations_from_entity ON relations(from_entity); \
            CREATE INDEX IF NOT EXISTS relations_to_entity ON relations(to_entity);",
        kind: MigrationType::ReversibleUp,
    }])
}

/// Open (creating if needed) the graph database at `db_path` and bring its schema up to date.
/// Safe to call on every start.
pub async fn db_init(db_path: PathBuf) -> Result<Pool<Sqlite>, sqlx::Error> {
    tracing::debug!("Initializing graph db from file: {:?}", db_path);
    let options = SqliteConnectOptions::new()
        .filename(&db_path)
        .read_only(false)
        .disable_statement_logging()
        .create_if_missing(true);

    use sqlx::pool::PoolOptions;
    let pool = PoolOptions::<Sqlite>::new().connect_with(options).await?;

    let migrator = Migrator::new(migrations()).await?;
    migrator.run(&pool).await?;

    let count_res = sqlx::query("SELECT COUNT(*) as ecount FROM entities;")
        .fetch_one(&pool)
        .await?;
    let rel_res = sqlx::query("SELECT COUNT(*) as rcount FROM relations;")
        .fetch_one(&pool)
        .await?;
    tracing::info!(
        "DB Connection initialized.\n \
         \tStored entity count:\t{:?} \n \
         \tStored relation count:\t{:?}",
        count_res.get::<u32, usize>(0),
        rel_res.get::<u32, usize>(0)
    );

    Ok(pool)
}

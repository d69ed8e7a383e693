// Migration-aware bootstrap - seeds schema_migrations on a routed connection
// with the versions of migrations it should consider already applied.
//
// Shards, the directory and the unsharded default connection keep their
// migrations in separate directories under the migrations root:
//   db/migrate            unbound entities on {env}
//   db/migrate_directory  directory entities, or anything landing on {env}_directory
//   db/migrate_shards     shard-routed entities on {env}_{shard}

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::framework::context::ExecutionContext;
use crate::framework::entity::{EntityBindings, Policy};
use crate::infrastructure::connection_proxy::{ConnectionTarget, Role};
use crate::infrastructure::database::{Operation, OperationOutput};

static MIGRATION_FILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9]+)_").expect("migration file pattern is valid"));

const SCHEMA_MIGRATIONS: &str = "schema_migrations";

#[derive(Debug, Clone)]
pub struct MigrationBootstrap {
    migrations_root: PathBuf,
}

impl MigrationBootstrap {
    pub fn new(migrations_root: impl Into<PathBuf>) -> Self {
        Self {
            migrations_root: migrations_root.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.migrations_root.clone())
    }

    /// Which migration directory serves `entity` when it routes to `target`
    pub fn migration_dir_for(
        bindings: &EntityBindings,
        entity: &str,
        target: &ConnectionTarget,
    ) -> AppResult<&'static str> {
        if bindings.is_directory(entity) || target.directory {
            return Ok("migrate_directory");
        }
        Ok(match bindings.get(entity)?.policy {
            Policy::ShardRouted { .. } => "migrate_shards",
            Policy::DirectoryRouted => "migrate_directory",
            Policy::Unbound => "migrate",
        })
    }

    /// Versions of the migration files in `dir`, sorted. A missing directory
    /// has no migrations; two files with one version is an error.
    pub fn discover_versions(&self, dir: &str) -> AppResult<Vec<i64>> {
        let path = self.migrations_root.join(dir);
        if !path.is_dir() {
            debug!("No migration directory at {}", path.display());
            return Ok(Vec::new());
        }

        let mut versions = Vec::new();
        let mut seen = HashSet::new();
        for entry in std::fs::read_dir(&path)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Some(version) = migration_version(&entry.path()) else {
                continue;
            };
            if !seen.insert(version) {
                return Err(AppError::DuplicateMigrationVersion { version });
            }
            versions.push(version);
        }
        versions.sort_unstable();
        Ok(versions)
    }

    /// Record `version`, and every discovered migration below it, as applied
    /// on the connection `entity` currently routes to. Returns the versions
    /// that were inserted.
    pub async fn assume_migrated_upto_version(
        &self,
        ctx: &mut ExecutionContext,
        entity: &str,
        version: i64,
    ) -> AppResult<Vec<i64>> {
        let target = ctx.connection_target(entity, Role::Master)?;
        let dir = Self::migration_dir_for(ctx.fabric().bindings(), entity, &target)?;
        let connection_name = target.name;
        let discovered = self.discover_versions(dir)?;

        ctx.execute(
            entity,
            Operation::execute(format!(
                "CREATE TABLE IF NOT EXISTS {} (version VARCHAR(255) NOT NULL UNIQUE)",
                SCHEMA_MIGRATIONS
            )),
        )
        .await?;
        // read through the master so replicated bindings see their own writes
        let migrated = ctx
            .transaction(
                entity,
                vec![Operation::query(format!("SELECT version FROM {}", SCHEMA_MIGRATIONS))],
            )
            .await?
            .iter()
            .flat_map(OperationOutput::rows)
            .map(|row| {
                let raw = row.get("version").map(String::as_str).unwrap_or("NULL");
                raw.trim().parse::<i64>().map_err(|_| {
                    AppError::DatabaseError(format!(
                        "Unreadable version {:?} in {} on {}",
                        raw, SCHEMA_MIGRATIONS, connection_name
                    ))
                })
            })
            .collect::<AppResult<HashSet<i64>>>()?;

        let mut inserts = Vec::new();
        if !migrated.contains(&version) {
            inserts.push(version);
        }
        inserts.extend(
            discovered
                .into_iter()
                .filter(|v| *v < version && !migrated.contains(v)),
        );

        if inserts.is_empty() {
            debug!("{} already migrated up to {}", connection_name, version);
            return Ok(inserts);
        }

        let statements = inserts
            .iter()
            .map(|v| {
                Operation::execute(format!(
                    "INSERT INTO {} (version) VALUES ('{}')",
                    SCHEMA_MIGRATIONS, v
                ))
            })
            .collect();
        ctx.transaction(entity, statements).await?;

        info!(
            "Assumed {} migrations from {} applied on {} (up to {})",
            inserts.len(),
            dir,
            connection_name,
            version
        );
        Ok(inserts)
    }
}

fn migration_version(path: &Path) -> Option<i64> {
    let file_name = path.file_name()?.to_str()?;
    let captures = MIGRATION_FILE.captures(file_name)?;
    captures.get(1)?.as_str().parse().ok()
}

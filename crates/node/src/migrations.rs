use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use fleet_sql::{Migration, SqlConnection};
use regex::Regex;
use tracing::{debug, info};

use crate::error::{Error, Result};

static UP_SCRIPT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<version>[0-9]+)_(?P<name>.+)\.up\.sql$").unwrap()
});

/// Reads every `<version>_<name>.up.sql` script in `dir`, ordered by version.
///
/// Down scripts and unrelated files are skipped.
///
/// # Errors
///
/// Returns an error if the directory or a script cannot be read, if a version
/// does not fit in a `u64`, or if two scripts share a version.
pub fn load_migrations(dir: impl AsRef<Path>) -> Result<Vec<Migration>> {
    let dir = dir.as_ref();
    let dir_err = |source| Error::MigrationsDir {
        path: dir.to_path_buf(),
        source,
    };

    let mut migrations = BTreeMap::new();

    for entry in std::fs::read_dir(dir).map_err(dir_err)? {
        let path = entry.map_err(dir_err)?.path();

        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };

        let Some(captures) = UP_SCRIPT.captures(file_name) else {
            debug!(file = file_name, "skipping non-migration file");
            continue;
        };

        let version = captures["version"]
            .parse::<u64>()
            .map_err(|e| Error::Migration(format!("{file_name}: {e}")))?;
        let script = std::fs::read_to_string(&path).map_err(dir_err)?;

        let migration = Migration::new(version, &captures["name"], script);

        if migrations.insert(version, migration).is_some() {
            return Err(Error::DuplicateMigration(version));
        }
    }

    Ok(migrations.into_values().collect())
}

/// Applies `migrations` in order, returning how many were newly applied.
///
/// Versions already recorded are left alone, so running this again is a
/// no-op.
///
/// # Errors
///
/// Stops at the first script that fails. Earlier scripts stay applied.
pub async fn apply_migrations<C>(connection: &C, migrations: &[Migration]) -> Result<usize>
where
    C: SqlConnection,
{
    let mut applied = 0;

    for migration in migrations {
        if connection
            .migrate(migration.clone())
            .await
            .map_err(|e| Error::Migration(format!("{migration}: {e}")))?
        {
            applied += 1;
        }
    }

    let version = connection
        .schema_version()
        .await
        .map_err(|e| Error::Migration(e.to_string()))?;

    info!(applied, ?version, "migrations up to date");

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    use fleet_replica::Replica;
    use fleet_replica_memory::MemoryReplica;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn test_load_orders_and_filters() {
        let dir = tempdir().unwrap();
        write(dir.path(), "10_later.up.sql", "CREATE TABLE later (id INTEGER)");
        write(dir.path(), "2_second.up.sql", "CREATE TABLE second (id INTEGER)");
        write(dir.path(), "2_second.down.sql", "DROP TABLE second");
        write(dir.path(), "1_first.up.sql", "CREATE TABLE first (id INTEGER)");
        write(dir.path(), "README.md", "notes");

        let migrations = load_migrations(dir.path()).unwrap();
        let names: Vec<String> = migrations.iter().map(ToString::to_string).collect();

        assert_eq!(names, ["1_first", "2_second", "10_later"]);
    }

    #[test]
    fn test_duplicate_version_is_rejected() {
        let dir = tempdir().unwrap();
        write(dir.path(), "1_a.up.sql", "CREATE TABLE a (id INTEGER)");
        write(dir.path(), "01_b.up.sql", "CREATE TABLE b (id INTEGER)");

        assert!(matches!(
            load_migrations(dir.path()),
            Err(Error::DuplicateMigration(1))
        ));
    }

    #[test]
    fn test_missing_dir() {
        let dir = tempdir().unwrap();

        assert!(matches!(
            load_migrations(dir.path().join("missing")),
            Err(Error::MigrationsDir { .. })
        ));
    }

    #[tokio::test]
    async fn test_apply_twice_is_noop() {
        let migrations = load_migrations(concat!(env!("CARGO_MANIFEST_DIR"), "/../../sql/migrations"))
            .unwrap();
        assert_eq!(migrations.len(), 2);

        let replica = MemoryReplica::new("mem-0");
        let connection = replica.open("test").await.unwrap();

        assert_eq!(apply_migrations(&connection, &migrations).await.unwrap(), 2);
        assert_eq!(apply_migrations(&connection, &migrations).await.unwrap(), 0);

        assert_eq!(connection.schema_version().await.unwrap(), Some(2));

        let rows = connection
            .query("SELECT count FROM counter WHERE id = 1", vec![])
            .await
            .unwrap();
        assert_eq!(rows.row(0).unwrap().get_integer(0), Some(0));
    }

    #[tokio::test]
    async fn test_failed_script_keeps_earlier_ones() {
        let migrations = vec![
            Migration::new(1, "good", "CREATE TABLE good (id INTEGER)"),
            Migration::new(2, "bad", "CREATE TABLE nope ("),
        ];

        let replica = MemoryReplica::new("mem-0");
        let connection = replica.open("test").await.unwrap();

        assert!(matches!(
            apply_migrations(&connection, &migrations).await,
            Err(Error::Migration(_))
        ));
        assert_eq!(connection.schema_version().await.unwrap(), Some(1));
    }
}

use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::error::Result;

/// Collection name -> root directory that feeds it.
const COLLECTIONS: Table = TableDefinition::new("collections");
/// Indexer setting name -> raw value, validated when read.
const SETTINGS: Table = TableDefinition::new("settings");

type Table = TableDefinition<'static, &'static str, &'static str>;

/// Persistent registry of collections and indexer settings.
pub struct ConfigDb {
    db: Database,
}

impl ConfigDb {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(redb::Error::from)?;

        let txn = db.begin_write()?;
        for table in [COLLECTIONS, SETTINGS] {
            txn.open_table(table)?;
        }
        txn.commit()?;

        Ok(Self { db })
    }

    fn put(&self, table: Table, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        txn.open_table(table)?.insert(key, value)?;
        txn.commit()?;
        Ok(())
    }

    fn get(&self, table: Table, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(table)?;
        Ok(table.get(key)?.map(|v| v.value().to_owned()))
    }

    fn delete(&self, table: Table, key: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = txn.open_table(table)?.remove(key)?.is_some();
        txn.commit()?;
        Ok(removed)
    }

    /// Every entry of `table`, ordered by key.
    fn entries(&self, table: Table) -> Result<Vec<(String, String)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(table)?;
        table
            .iter()?
            .map(|entry| {
                let (k, v) = entry?;
                Ok((k.value().to_owned(), v.value().to_owned()))
            })
            .collect()
    }

    pub fn set_collection(&self, name: &str, root: &str) -> Result<()> {
        self.put(COLLECTIONS, name, root)
    }

    pub fn get_collection(&self, name: &str) -> Result<Option<String>> {
        self.get(COLLECTIONS, name)
    }

    pub fn remove_collection(&self, name: &str) -> Result<bool> {
        self.delete(COLLECTIONS, name)
    }

    pub fn list_collections(&self) -> Result<Vec<(String, String)>> {
        self.entries(COLLECTIONS)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.put(SETTINGS, key, value)
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        self.get(SETTINGS, key)
    }

    /// Get a setting, returning the default if not set.
    pub fn get_setting_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self
            .get_setting(key)?
            .unwrap_or_else(|| default.to_string()))
    }

    pub fn remove_setting(&self, key: &str) -> Result<bool> {
        self.delete(SETTINGS, key)
    }

    pub fn list_settings(&self) -> Result<Vec<(String, String)>> {
        self.entries(SETTINGS)
    }
}

impl std::fmt::Debug for ConfigDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigDb").finish_non_exhaustive()
    }
}

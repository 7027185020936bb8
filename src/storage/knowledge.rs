//! Medical knowledge base entries.

use chrono::Utc;
use serde::Deserialize;
use sqlx::{Sqlite, Transaction};

use super::models::KnowledgeRecord;
use super::{Database, StorageError};

/// Entry as supplied by an import file.
#[derive(Debug, Clone, Deserialize)]
pub struct NewKnowledgeEntry {
    pub topic: String,
    pub category: String,
    pub content: String,
    #[serde(default)]
    pub source: Option<String>,
}

impl NewKnowledgeEntry {
    fn check(&self) -> Result<(), String> {
        for (field, value) in [
            ("topic", &self.topic),
            ("category", &self.category),
            ("content", &self.content),
        ] {
            if value.trim().is_empty() {
                return Err(format!("{} must not be empty", field));
            }
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct KnowledgeStore {
    db: Database,
}

impl KnowledgeStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn insert_entry(&self, entry: &NewKnowledgeEntry) -> Result<i64, StorageError> {
        entry.check().map_err(StorageError::InvalidEntry)?;
        let mut tx = self.db.pool().begin().await?;
        let id = insert(&mut tx, entry).await?;
        tx.commit().await?;
        Ok(id)
    }

    /// Inserts every entry or none of them. Returns the number inserted.
    pub async fn import_entries(&self, entries: &[NewKnowledgeEntry]) -> Result<usize, StorageError> {
        for (index, entry) in entries.iter().enumerate() {
            entry
                .check()
                .map_err(|e| StorageError::InvalidEntry(format!("entry {}: {}", index, e)))?;
        }

        let mut tx = self.db.pool().begin().await?;
        for entry in entries {
            insert(&mut tx, entry).await?;
        }
        tx.commit().await?;

        tracing::info!(count = entries.len(), "Knowledge entries imported");
        Ok(entries.len())
    }

    /// Active entries, optionally filtered by a topic substring (case-insensitive)
    /// and an exact category.
    pub async fn search(
        &self,
        topic: Option<&str>,
        category: Option<&str>,
        limit: i64,
    ) -> Result<Vec<KnowledgeRecord>, StorageError> {
        let mut sql = String::from("SELECT * FROM medical_knowledge WHERE is_active = 1");
        let mut params: Vec<String> = Vec::new();

        if let Some(topic) = topic.filter(|t| !t.trim().is_empty()) {
            // instr matches literally, so '%' and '_' in the query are not wildcards
            sql.push_str(" AND instr(LOWER(topic), ?) > 0");
            params.push(topic.trim().to_lowercase());
        }
        if let Some(category) = category.filter(|c| !c.trim().is_empty()) {
            sql.push_str(" AND category = ?");
            params.push(category.trim().to_string());
        }
        sql.push_str(" ORDER BY topic ASC, id ASC LIMIT ?");

        let mut query = sqlx::query_as::<_, KnowledgeRecord>(&sql);
        for param in params {
            query = query.bind(param);
        }
        let entries = query.bind(limit).fetch_all(self.db.pool()).await?;

        tracing::debug!(count = entries.len(), "Knowledge search");
        Ok(entries)
    }

    /// Hides an entry from search. Returns false if it was not active.
    pub async fn deactivate(&self, id: i64) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "UPDATE medical_knowledge SET is_active = 0, last_updated = ? WHERE id = ? AND is_active = 1",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

async fn insert(
    tx: &mut Transaction<'_, Sqlite>,
    entry: &NewKnowledgeEntry,
) -> Result<i64, StorageError> {
    let result = sqlx::query(
        r#"
        INSERT INTO medical_knowledge (topic, category, content, source, last_updated, is_active)
        VALUES (?, ?, ?, ?, ?, 1)
        "#,
    )
    .bind(entry.topic.trim())
    .bind(entry.category.trim())
    .bind(&entry.content)
    .bind(&entry.source)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;
    Ok(result.last_insert_rowid())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(topic: &str, category: &str) -> NewKnowledgeEntry {
        NewKnowledgeEntry {
            topic: topic.to_string(),
            category: category.to_string(),
            content: format!("About {}", topic),
            source: None,
        }
    }

    async fn seeded() -> KnowledgeStore {
        let store = KnowledgeStore::new(Database::in_memory().await.unwrap());
        store.insert_entry(&entry("Hypertension", "cardiology")).await.unwrap();
        store.insert_entry(&entry("Migraine", "neurology")).await.unwrap();
        store.insert_entry(&entry("Tension headache", "neurology")).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_search_by_topic_is_case_insensitive() {
        let store = seeded().await;
        let results = store.search(Some("HEADACHE"), None, 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].topic, "Tension headache");
    }

    #[tokio::test]
    async fn test_search_treats_wildcards_literally() {
        let store = seeded().await;
        assert!(store.search(Some("_"), None, 10).await.unwrap().is_empty());
        assert!(store.search(Some("%"), None, 10).await.unwrap().is_empty());
        assert!(store.search(Some("mig%ne"), None, 10).await.unwrap().is_empty());
        assert_eq!(store.search(Some("graine"), None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_search_by_category_and_limit() {
        let store = seeded().await;
        let results = store.search(None, Some("neurology"), 10).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].topic, "Migraine");

        let limited = store.search(None, None, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_deactivated_entries_are_hidden() {
        let store = seeded().await;
        let id = store.search(Some("migraine"), None, 10).await.unwrap()[0].id;
        assert!(store.deactivate(id).await.unwrap());
        assert!(!store.deactivate(id).await.unwrap());
        assert!(store.search(Some("migraine"), None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_import_is_all_or_nothing() {
        let store = KnowledgeStore::new(Database::in_memory().await.unwrap());
        let entries: Vec<NewKnowledgeEntry> = serde_json::from_str(
            r#"[
                {"topic": "Asthma", "category": "pulmonology", "content": "Airway inflammation", "source": "WHO"},
                {"topic": "Gout", "category": "rheumatology", "content": "Uric acid crystals"}
            ]"#,
        )
        .unwrap();
        assert_eq!(store.import_entries(&entries).await.unwrap(), 2);
        let asthma = store.search(Some("asthma"), None, 10).await.unwrap();
        assert_eq!(asthma[0].source.as_deref(), Some("WHO"));

        let mut bad = entries.clone();
        bad.push(entry("   ", "neurology"));
        let err = store.import_entries(&bad).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidEntry(ref msg) if msg.starts_with("entry 2")));
        assert_eq!(store.search(None, None, 100).await.unwrap().len(), 2);
    }
}

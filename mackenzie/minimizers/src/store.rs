//! Durable record of each optimizer instance: its opaque evaluation state plus
//! the task-source-specific context needed to re-derive task ids for it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use mackenzie_core::db::{Db, JsonTree};
use mackenzie_core::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MinimizerType {
    Csm,
    Bayes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinimizerRecord {
    pub min_id: String,
    pub min_type: MinimizerType,
    pub state: Value,
    pub context: Value,
}

pub struct MinimizerStore<'a> {
    db: &'a Db,
    tree: JsonTree,
}

impl<'a> MinimizerStore<'a> {
    pub fn new(db: &'a Db) -> Result<Self> {
        Ok(Self {
            db,
            tree: db.tree("minimizer_state")?,
        })
    }

    pub async fn add(&self, min_id: &str, min_type: MinimizerType, state: Value, context: Value) -> Result<()> {
        let tree = &self.tree;
        self.db
            .with_write_lock(|| {
                tree.insert(
                    min_id,
                    &MinimizerRecord {
                        min_id: min_id.to_string(),
                        min_type,
                        state,
                        context,
                    },
                )
            })
            .await
    }

    pub async fn update_state(&self, min_id: &str, state: Value) -> Result<()> {
        let tree = &self.tree;
        self.db
            .with_write_lock(|| {
                if let Some(mut record) = tree.get::<MinimizerRecord>(min_id)? {
                    record.state = state;
                    tree.insert(min_id, &record)?;
                }
                Ok(())
            })
            .await
    }

    pub fn get(&self, min_id: &str) -> Result<Option<MinimizerRecord>> {
        self.tree.get(min_id)
    }

    pub fn contains(&self, min_id: &str) -> Result<bool> {
        self.tree.contains(min_id)
    }

    pub fn all(&self) -> Result<Vec<MinimizerRecord>> {
        self.tree.scan_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn add_get_update_round_trip() {
        let db = Db::temporary().unwrap();
        let store = MinimizerStore::new(&db).unwrap();

        store
            .add(
                "run:setup:cellA:placeA",
                MinimizerType::Csm,
                json!({"eval_cache": []}),
                json!({"cell": "cellA", "place": "placeA"}),
            )
            .await
            .unwrap();

        assert!(store.contains("run:setup:cellA:placeA").unwrap());
        assert!(!store.contains("run:setup:cellA:placeB").unwrap());

        store
            .update_state("run:setup:cellA:placeA", json!({"eval_cache": [1.0]}))
            .await
            .unwrap();

        let record = store.get("run:setup:cellA:placeA").unwrap().unwrap();
        assert_eq!(record.min_type, MinimizerType::Csm);
        assert_eq!(record.state, json!({"eval_cache": [1.0]}));
        assert_eq!(record.context, json!({"cell": "cellA", "place": "placeA"}));
    }

    #[tokio::test]
    async fn update_state_on_unknown_id_is_a_no_op() {
        let db = Db::temporary().unwrap();
        let store = MinimizerStore::new(&db).unwrap();
        store.update_state("missing", json!({})).await.unwrap();
        assert!(store.get("missing").unwrap().is_none());
    }

    #[tokio::test]
    async fn all_returns_every_record() {
        let db = Db::temporary().unwrap();
        let store = MinimizerStore::new(&db).unwrap();
        store.add("a", MinimizerType::Csm, json!({}), json!({})).await.unwrap();
        store.add("b", MinimizerType::Bayes, json!({}), json!({})).await.unwrap();
        assert_eq!(store.all().unwrap().len(), 2);
    }
}

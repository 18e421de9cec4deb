//! `memory_store` tool: persistent key/value notes for agents

use crate::db::ResearchStore;
use crate::tools::registry::Tool;
use crate::types::{AppError, Result};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;

const DEFAULT_CATEGORY: &str = "general";
const DEFAULT_LIST_LIMIT: usize = 10;

pub struct MemoryTool {
    store: Arc<ResearchStore>,
}

impl MemoryTool {
    pub fn new(store: Arc<ResearchStore>) -> Self {
        Self { store }
    }
}

fn required_key(args: &Value) -> Result<&str> {
    args.get("key")
        .and_then(|v| v.as_str())
        .filter(|k| !k.is_empty())
        .ok_or_else(|| AppError::InvalidInput("Missing 'key' parameter".to_string()))
}

#[async_trait]
impl Tool for MemoryTool {
    fn name(&self) -> &str {
        "memory_store"
    }

    fn description(&self) -> &str {
        "Save, retrieve, list or delete research notes in persistent memory"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["save", "retrieve", "list", "delete"]
                },
                "key": {
                    "type": "string",
                    "description": "Memory key (save, retrieve, delete)"
                },
                "value": {
                    "description": "Any JSON value to store (save)"
                },
                "category": {
                    "type": "string",
                    "description": "Category for save, filter for list (default: general)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum entries for list (default: 10)"
                }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value> {
        let action = args
            .get("action")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AppError::InvalidInput("Missing 'action' parameter".to_string()))?;

        match action {
            "save" => {
                let key = required_key(&args)?;
                let value = args.get("value").cloned().unwrap_or(Value::Null);
                let category = args
                    .get("category")
                    .and_then(|v| v.as_str())
                    .unwrap_or(DEFAULT_CATEGORY);

                self.store.save_memory(key, &value, category).await?;
                Ok(json!({"action": "save", "key": key, "saved": true}))
            }
            "retrieve" => {
                let key = required_key(&args)?;
                let value = self.store.get_memory(key).await?;
                Ok(json!({
                    "action": "retrieve",
                    "key": key,
                    "found": value.is_some(),
                    "value": value
                }))
            }
            "list" => {
                let category = args.get("category").and_then(|v| v.as_str());
                let limit = args
                    .get("limit")
                    .and_then(|v| v.as_u64())
                    .map(|n| n as usize)
                    .unwrap_or(DEFAULT_LIST_LIMIT);

                let entries = self.store.search_memory(category, limit).await?;
                let items: Vec<Value> = entries
                    .into_iter()
                    .map(|e| {
                        json!({
                            "key": e.key,
                            "value": e.value,
                            "category": e.category,
                            "access_count": e.access_count
                        })
                    })
                    .collect();
                Ok(json!({"action": "list", "count": items.len(), "items": items}))
            }
            "delete" => {
                let key = required_key(&args)?;
                let deleted = self.store.delete_memory(key).await?;
                Ok(json!({"action": "delete", "key": key, "deleted": deleted}))
            }
            other => Err(AppError::InvalidInput(format!(
                "Unknown memory action: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn tool() -> MemoryTool {
        MemoryTool::new(Arc::new(ResearchStore::new_memory().await.unwrap()))
    }

    #[tokio::test]
    async fn test_save_and_retrieve() {
        let tool = tool().await;

        tool.execute(json!({"action": "save", "key": "topic", "value": {"q": "rust"}}))
            .await
            .unwrap();

        let out = tool
            .execute(json!({"action": "retrieve", "key": "topic"}))
            .await
            .unwrap();
        assert_eq!(out["found"], true);
        assert_eq!(out["value"]["q"], "rust");
    }

    #[tokio::test]
    async fn test_retrieve_missing() {
        let tool = tool().await;
        let out = tool
            .execute(json!({"action": "retrieve", "key": "nope"}))
            .await
            .unwrap();
        assert_eq!(out["found"], false);
        assert!(out["value"].is_null());
    }

    #[tokio::test]
    async fn test_list_filters_by_category() {
        let tool = tool().await;
        tool.execute(json!({"action": "save", "key": "a", "value": 1, "category": "facts"}))
            .await
            .unwrap();
        tool.execute(json!({"action": "save", "key": "b", "value": 2}))
            .await
            .unwrap();

        let out = tool
            .execute(json!({"action": "list", "category": "facts"}))
            .await
            .unwrap();
        assert_eq!(out["count"], 1);
        assert_eq!(out["items"][0]["key"], "a");

        let out = tool.execute(json!({"action": "list"})).await.unwrap();
        assert_eq!(out["count"], 2);
    }

    #[tokio::test]
    async fn test_delete() {
        let tool = tool().await;
        tool.execute(json!({"action": "save", "key": "a", "value": 1}))
            .await
            .unwrap();

        let out = tool
            .execute(json!({"action": "delete", "key": "a"}))
            .await
            .unwrap();
        assert_eq!(out["deleted"], true);

        let out = tool
            .execute(json!({"action": "delete", "key": "a"}))
            .await
            .unwrap();
        assert_eq!(out["deleted"], false);
    }

    #[tokio::test]
    async fn test_unknown_action() {
        let tool = tool().await;
        let result = tool.execute(json!({"action": "shred"})).await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));

        let result = tool.execute(json!({"action": "save"})).await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }
}

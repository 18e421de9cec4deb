use crate::types::{
    AppError, QueryAnalysis, ReportSummary, ResearchMetrics, ResearchPlan, ResearchReport, Result,
    Source, StoredReport, SubagentResult,
};
use chrono::{DateTime, Utc};
use libsql::{Builder, Connection, Database};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info};

/// Persistent storage for plans, worker results, agent memory and reports.
///
/// Holds a single connection so in-memory databases keep their contents for
/// the lifetime of the store.
pub struct ResearchStore {
    _db: Database,
    conn: Connection,
}

/// A research plan row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPlan {
    pub id: String,
    pub query: String,
    pub analysis: QueryAnalysis,
    pub plan: ResearchPlan,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A key/value entry in agent memory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub key: String,
    pub value: Value,
    pub category: String,
    pub access_count: i64,
    pub last_accessed: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct StoredPlanData {
    analysis: QueryAnalysis,
    plan: ResearchPlan,
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| AppError::Internal(format!("Failed to serialize record: {}", e)))
}

fn from_json<T: for<'de> Deserialize<'de>>(raw: &str) -> Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| AppError::Database(format!("Corrupt JSON column: {}", e)))
}

fn timestamp(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

impl ResearchStore {
    /// Open (or create) a database file, creating its parent directory
    pub async fn new_local<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AppError::Database(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let db = Builder::new_local(path)
            .build()
            .await
            .map_err(|e| AppError::Database(format!("Failed to open database: {}", e)))?;

        info!("Opened research database at {}", path.display());
        Self::from_database(db).await
    }

    /// Create an in-memory database
    pub async fn new_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| AppError::Database(format!("Failed to create in-memory database: {}", e)))?;

        Self::from_database(db).await
    }

    async fn from_database(db: Database) -> Result<Self> {
        let conn = db
            .connect()
            .map_err(|e| AppError::Database(format!("Failed to get connection: {}", e)))?;

        let store = Self { _db: db, conn };
        store.initialize_schema().await?;
        Ok(store)
    }

    async fn initialize_schema(&self) -> Result<()> {
        self.conn
            .execute(
                "CREATE TABLE IF NOT EXISTS research_plans (
                    id TEXT PRIMARY KEY,
                    query TEXT NOT NULL,
                    query_type TEXT,
                    complexity TEXT,
                    plan_data TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'active',
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                )",
                (),
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to create research_plans table: {}", e)))?;

        self.conn
            .execute(
                "CREATE TABLE IF NOT EXISTS subagent_results (
                    id TEXT PRIMARY KEY,
                    plan_id TEXT NOT NULL,
                    agent_id TEXT NOT NULL,
                    task TEXT NOT NULL,
                    results TEXT NOT NULL,
                    status TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    FOREIGN KEY (plan_id) REFERENCES research_plans(id)
                )",
                (),
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to create subagent_results table: {}", e)))?;

        self.conn
            .execute(
                "CREATE TABLE IF NOT EXISTS memory_store (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    category TEXT NOT NULL DEFAULT 'general',
                    access_count INTEGER NOT NULL DEFAULT 0,
                    created_at INTEGER NOT NULL,
                    last_accessed INTEGER NOT NULL
                )",
                (),
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to create memory_store table: {}", e)))?;

        self.conn
            .execute(
                "CREATE TABLE IF NOT EXISTS research_reports (
                    id TEXT PRIMARY KEY,
                    plan_id TEXT NOT NULL,
                    query TEXT NOT NULL,
                    report TEXT NOT NULL,
                    cited_report TEXT NOT NULL,
                    sources TEXT NOT NULL,
                    metrics TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    FOREIGN KEY (plan_id) REFERENCES research_plans(id)
                )",
                (),
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to create research_reports table: {}", e)))?;

        Ok(())
    }

    // ============= Research plans =============

    pub async fn save_research_plan(
        &self,
        plan_id: &str,
        query: &str,
        analysis: &QueryAnalysis,
        plan: &ResearchPlan,
    ) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let data = to_json(&StoredPlanData {
            analysis: analysis.clone(),
            plan: plan.clone(),
        })?;

        self.conn
            .execute(
                "INSERT INTO research_plans
                 (id, query, query_type, complexity, plan_data, status, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, 'active', ?, ?)",
                (
                    plan_id,
                    query,
                    analysis.query_type.as_str(),
                    analysis.complexity.as_str(),
                    data,
                    now,
                    now,
                ),
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to save research plan: {}", e)))?;

        info!("Saved research plan: {}", plan_id);
        Ok(())
    }

    pub async fn get_research_plan(&self, plan_id: &str) -> Result<Option<StoredPlan>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, query, plan_data, status, created_at, updated_at
                 FROM research_plans WHERE id = ?",
                [plan_id],
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to query research plan: {}", e)))?;

        if let Some(row) = rows
            .next()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        {
            let data: String = row.get(2).map_err(|e| AppError::Database(e.to_string()))?;
            let data: StoredPlanData = from_json(&data)?;

            Ok(Some(StoredPlan {
                id: row.get(0).map_err(|e| AppError::Database(e.to_string()))?,
                query: row.get(1).map_err(|e| AppError::Database(e.to_string()))?,
                analysis: data.analysis,
                plan: data.plan,
                status: row.get(3).map_err(|e| AppError::Database(e.to_string()))?,
                created_at: timestamp(
                    row.get::<i64>(4)
                        .map_err(|e| AppError::Database(e.to_string()))?,
                ),
                updated_at: timestamp(
                    row.get::<i64>(5)
                        .map_err(|e| AppError::Database(e.to_string()))?,
                ),
            }))
        } else {
            Ok(None)
        }
    }

    pub async fn update_plan_status(&self, plan_id: &str, status: &str) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let changed = self
            .conn
            .execute(
                "UPDATE research_plans SET status = ?, updated_at = ? WHERE id = ?",
                (status, now, plan_id),
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to update plan status: {}", e)))?;

        if changed == 0 {
            return Err(AppError::NotFound(format!("Research plan {}", plan_id)));
        }
        Ok(())
    }

    // ============= Subagent results =============

    pub async fn save_subagent_result(&self, plan_id: &str, result: &SubagentResult) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let id = format!("{}_{}", plan_id, result.agent_id);
        let status = if result.success { "completed" } else { "failed" };

        self.conn
            .execute(
                "INSERT OR REPLACE INTO subagent_results
                 (id, plan_id, agent_id, task, results, status, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                (
                    id,
                    plan_id,
                    result.agent_id.as_str(),
                    result.task.as_str(),
                    to_json(result)?,
                    status,
                    now,
                ),
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to save subagent result: {}", e)))?;

        debug!("Saved subagent result: {}", result.agent_id);
        Ok(())
    }

    /// Worker results for a plan, oldest first
    pub async fn get_plan_results(&self, plan_id: &str) -> Result<Vec<SubagentResult>> {
        let mut rows = self
            .conn
            .query(
                "SELECT results FROM subagent_results
                 WHERE plan_id = ?
                 ORDER BY created_at ASC, rowid ASC",
                [plan_id],
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to query plan results: {}", e)))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        {
            let raw: String = row.get(0).map_err(|e| AppError::Database(e.to_string()))?;
            results.push(from_json(&raw)?);
        }

        Ok(results)
    }

    // ============= Memory =============

    /// Insert or overwrite a memory entry. Overwrites count as an access.
    pub async fn save_memory(&self, key: &str, value: &Value, category: &str) -> Result<()> {
        let now = Utc::now().timestamp_millis();

        self.conn
            .execute(
                "INSERT INTO memory_store (key, value, category, access_count, created_at, last_accessed)
                 VALUES (?, ?, ?, 0, ?, ?)
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    access_count = access_count + 1,
                    last_accessed = excluded.last_accessed",
                (key, to_json(value)?, category, now, now),
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to save memory: {}", e)))?;

        debug!("Saved memory: {}", key);
        Ok(())
    }

    /// Read a memory value, recording the access
    pub async fn get_memory(&self, key: &str) -> Result<Option<Value>> {
        let now = Utc::now().timestamp_millis();

        self.conn
            .execute(
                "UPDATE memory_store
                 SET access_count = access_count + 1, last_accessed = ?
                 WHERE key = ?",
                (now, key),
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to update memory access: {}", e)))?;

        let mut rows = self
            .conn
            .query("SELECT value FROM memory_store WHERE key = ?", [key])
            .await
            .map_err(|e| AppError::Database(format!("Failed to query memory: {}", e)))?;

        if let Some(row) = rows
            .next()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        {
            let raw: String = row.get(0).map_err(|e| AppError::Database(e.to_string()))?;
            Ok(Some(from_json(&raw)?))
        } else {
            Ok(None)
        }
    }

    /// Most recently accessed entries, optionally within one category
    pub async fn search_memory(&self, category: Option<&str>, limit: usize) -> Result<Vec<MemoryEntry>> {
        let limit = limit as i64;
        let mut rows = match category {
            Some(category) => self
                .conn
                .query(
                    "SELECT key, value, category, access_count, last_accessed
                     FROM memory_store
                     WHERE category = ?
                     ORDER BY last_accessed DESC, rowid DESC
                     LIMIT ?",
                    (category, limit),
                )
                .await,
            None => self
                .conn
                .query(
                    "SELECT key, value, category, access_count, last_accessed
                     FROM memory_store
                     ORDER BY last_accessed DESC, rowid DESC
                     LIMIT ?",
                    [limit],
                )
                .await,
        }
        .map_err(|e| AppError::Database(format!("Failed to search memory: {}", e)))?;

        let mut entries = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        {
            let raw: String = row.get(1).map_err(|e| AppError::Database(e.to_string()))?;
            entries.push(MemoryEntry {
                key: row.get(0).map_err(|e| AppError::Database(e.to_string()))?,
                value: from_json(&raw)?,
                category: row.get(2).map_err(|e| AppError::Database(e.to_string()))?,
                access_count: row.get(3).map_err(|e| AppError::Database(e.to_string()))?,
                last_accessed: timestamp(
                    row.get::<i64>(4)
                        .map_err(|e| AppError::Database(e.to_string()))?,
                ),
            });
        }

        Ok(entries)
    }

    /// Returns whether an entry was removed
    pub async fn delete_memory(&self, key: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM memory_store WHERE key = ?", [key])
            .await
            .map_err(|e| AppError::Database(format!("Failed to delete memory: {}", e)))?;

        Ok(changed > 0)
    }

    // ============= Reports =============

    pub async fn save_research_report(&self, report_id: &str, report: &ResearchReport) -> Result<()> {
        let now = Utc::now().timestamp_millis();

        self.conn
            .execute(
                "INSERT INTO research_reports
                 (id, plan_id, query, report, cited_report, sources, metrics, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    report_id,
                    report.query_id.as_str(),
                    report.query.as_str(),
                    report.synthesized_text.as_str(),
                    report.cited_text.as_str(),
                    to_json(&report.sources)?,
                    to_json(&report.metrics)?,
                    now,
                ),
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to save research report: {}", e)))?;

        info!("Saved research report: {}", report_id);
        Ok(())
    }

    pub async fn get_research_report(&self, report_id: &str) -> Result<Option<StoredReport>> {
        self.query_report(
            "SELECT id, plan_id, query, report, cited_report, sources, metrics, created_at
             FROM research_reports WHERE id = ?",
            report_id,
        )
        .await
    }

    /// The newest report produced for a plan
    pub async fn get_report_by_plan(&self, plan_id: &str) -> Result<Option<StoredReport>> {
        self.query_report(
            "SELECT id, plan_id, query, report, cited_report, sources, metrics, created_at
             FROM research_reports WHERE plan_id = ?
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
            plan_id,
        )
        .await
    }

    async fn query_report(&self, sql: &str, param: &str) -> Result<Option<StoredReport>> {
        let mut rows = self
            .conn
            .query(sql, [param])
            .await
            .map_err(|e| AppError::Database(format!("Failed to query research report: {}", e)))?;

        if let Some(row) = rows
            .next()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        {
            let sources: String = row.get(5).map_err(|e| AppError::Database(e.to_string()))?;
            let metrics: String = row.get(6).map_err(|e| AppError::Database(e.to_string()))?;

            Ok(Some(StoredReport {
                id: row.get(0).map_err(|e| AppError::Database(e.to_string()))?,
                plan_id: row.get(1).map_err(|e| AppError::Database(e.to_string()))?,
                query: row.get(2).map_err(|e| AppError::Database(e.to_string()))?,
                report: row.get(3).map_err(|e| AppError::Database(e.to_string()))?,
                cited_report: row.get(4).map_err(|e| AppError::Database(e.to_string()))?,
                sources: from_json::<Vec<Source>>(&sources)?,
                metrics: from_json::<ResearchMetrics>(&metrics)?,
                created_at: timestamp(
                    row.get::<i64>(7)
                        .map_err(|e| AppError::Database(e.to_string()))?,
                ),
            }))
        } else {
            Ok(None)
        }
    }

    /// Newest reports first
    pub async fn list_recent_reports(&self, limit: usize) -> Result<Vec<ReportSummary>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, query, created_at FROM research_reports
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?",
                [limit as i64],
            )
            .await
            .map_err(|e| AppError::Database(format!("Failed to list reports: {}", e)))?;

        let mut reports = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        {
            reports.push(ReportSummary {
                id: row.get(0).map_err(|e| AppError::Database(e.to_string()))?,
                query: row.get(1).map_err(|e| AppError::Database(e.to_string()))?,
                created_at: timestamp(
                    row.get::<i64>(2)
                        .map_err(|e| AppError::Database(e.to_string()))?,
                ),
            });
        }

        Ok(reports)
    }
}

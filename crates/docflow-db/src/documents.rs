//! PostgreSQL document store.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, info};
use uuid::Uuid;

use docflow_core::{
    expected_jobs, new_v7, CellStatus, CompletionVector, DispatchKey, DocType, Document,
    DocumentStore, Error, JobType, NewDocument, Outcome, RecordOutcome, Result,
};

/// PostgreSQL implementation of [`DocumentStore`].
///
/// Recordings for one document are serialized by a `FOR UPDATE` lock on the
/// document row; recordings for different documents never contend.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: Pool<Postgres>,
}

impl PgDocumentStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_document_row(
        row: &sqlx::postgres::PgRow,
        cells: Vec<(JobType, CellStatus)>,
    ) -> Result<Document> {
        let doctype: DocType = row.get::<String, _>("doctype").parse()?;
        let file_path: String = row.get("file_path");
        Ok(Document {
            id: row.get("id"),
            project_id: row.get("project_id"),
            doctype,
            folder_id: row.get("folder_id"),
            file_path: PathBuf::from(file_path),
            completion: CompletionVector::from_cells(doctype, cells),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn parse_cell_row(row: &sqlx::postgres::PgRow) -> Result<(JobType, CellStatus)> {
        let job_type: JobType = row.get::<String, _>("job_type").parse()?;
        let status: CellStatus = row.get::<String, _>("status").parse()?;
        Ok((job_type, status))
    }

    /// Load cells for many documents in one round trip.
    async fn load_cells(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<(JobType, CellStatus)>>> {
        let rows = sqlx::query(
            "SELECT document_id, job_type, status FROM document_job_status
             WHERE document_id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let mut cells: HashMap<Uuid, Vec<(JobType, CellStatus)>> = HashMap::new();
        for row in &rows {
            let document_id: Uuid = row.get("document_id");
            cells
                .entry(document_id)
                .or_default()
                .push(Self::parse_cell_row(row)?);
        }
        Ok(cells)
    }

    async fn documents_from_rows(&self, rows: Vec<sqlx::postgres::PgRow>) -> Result<Vec<Document>> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.get("id")).collect();
        let mut cells = self.load_cells(&ids).await?;
        rows.iter()
            .map(|row| {
                let id: Uuid = row.get("id");
                Self::parse_document_row(row, cells.remove(&id).unwrap_or_default())
            })
            .collect()
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn create_document(&self, doc: NewDocument) -> Result<Document> {
        let id = new_v7();
        let now = Utc::now();
        let file_path = doc.file_path.to_string_lossy().into_owned();
        let job_types: Vec<String> = expected_jobs(doc.doctype)
            .iter()
            .map(|jt| jt.as_str().to_string())
            .collect();

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        sqlx::query(
            "INSERT INTO document (id, project_id, doctype, folder_id, file_path, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $6)",
        )
        .bind(id)
        .bind(doc.project_id)
        .bind(doc.doctype.as_str())
        .bind(doc.folder_id)
        .bind(&file_path)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        sqlx::query(
            "INSERT INTO document_job_status (document_id, job_type, updated_at)
             SELECT $1, unnest($2::text[]), $3",
        )
        .bind(id)
        .bind(&job_types)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;

        info!(
            subsystem = "db",
            component = "documents",
            op = "create_document",
            document_id = %id,
            project_id = %doc.project_id,
            doctype = %doc.doctype,
            cells = job_types.len(),
            "Document created"
        );

        Ok(Document {
            id,
            project_id: doc.project_id,
            doctype: doc.doctype,
            folder_id: doc.folder_id,
            file_path: doc.file_path,
            completion: CompletionVector::new(doc.doctype),
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_document(&self, id: Uuid) -> Result<Document> {
        let row = sqlx::query(
            "SELECT id, project_id, doctype, folder_id, file_path, created_at, updated_at
             FROM document WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?
        .ok_or(Error::DocumentNotFound(id))?;

        let mut cells = self.load_cells(&[id]).await?;
        Self::parse_document_row(&row, cells.remove(&id).unwrap_or_default())
    }

    async fn delete_document(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM document WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        if result.rows_affected() == 0 {
            return Err(Error::DocumentNotFound(id));
        }

        info!(
            subsystem = "db",
            component = "documents",
            op = "delete_document",
            document_id = %id,
            "Document deleted"
        );
        Ok(())
    }

    async fn record_outcome(
        &self,
        id: Uuid,
        job_type: JobType,
        outcome: Outcome,
    ) -> Result<RecordOutcome> {
        let status = CellStatus::from(outcome);
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let row = sqlx::query("SELECT doctype FROM document WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Error::Database)?
            .ok_or(Error::DocumentNotFound(id))?;
        let doctype: DocType = row.get::<String, _>("doctype").parse()?;

        let cell_rows = sqlx::query(
            "SELECT job_type, status FROM document_job_status WHERE document_id = $1",
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await
        .map_err(Error::Database)?;
        let cells = cell_rows
            .iter()
            .map(Self::parse_cell_row)
            .collect::<Result<Vec<_>>>()?;

        let mut vector = CompletionVector::from_cells(doctype, cells);
        let recorded = vector.record(job_type, status);

        if recorded.cell_changed {
            let now = Utc::now();
            sqlx::query(
                "UPDATE document_job_status SET status = $3, updated_at = $4
                 WHERE document_id = $1 AND job_type = $2 AND status = 'not_started'",
            )
            .bind(id)
            .bind(job_type.as_str())
            .bind(status.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

            sqlx::query("UPDATE document SET updated_at = $2 WHERE id = $1")
                .bind(id)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "documents",
            op = "record_outcome",
            document_id = %id,
            job_type = %job_type,
            cell_changed = recorded.cell_changed,
            aggregate_status = %recorded.current,
            "Outcome recorded"
        );
        Ok(recorded)
    }

    async fn mark_dispatched(&self, key: &DispatchKey) -> Result<bool> {
        let inserted: Option<String> = sqlx::query_scalar(
            "INSERT INTO dispatched_transition (job_type, subject) VALUES ($1, $2)
             ON CONFLICT DO NOTHING
             RETURNING job_type",
        )
        .bind(key.job_type.as_str())
        .bind(&key.subject)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(inserted.is_some())
    }

    async fn release_dispatched(&self, key: &DispatchKey) -> Result<()> {
        sqlx::query("DELETE FROM dispatched_transition WHERE job_type = $1 AND subject = $2")
            .bind(key.job_type.as_str())
            .bind(&key.subject)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn list_stale(&self, older_than: DateTime<Utc>) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT d.id, d.project_id, d.doctype, d.folder_id, d.file_path, d.created_at, d.updated_at
             FROM document d
             WHERE d.updated_at < $1
               AND EXISTS (SELECT 1 FROM document_job_status s
                           WHERE s.document_id = d.id AND s.status = 'not_started')
               AND NOT EXISTS (SELECT 1 FROM document_job_status s
                               WHERE s.document_id = d.id AND s.status = 'failed')
             ORDER BY d.updated_at",
        )
        .bind(older_than)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        self.documents_from_rows(rows).await
    }

    async fn list_documents(&self, project_id: Uuid) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT id, project_id, doctype, folder_id, file_path, created_at, updated_at
             FROM document WHERE project_id = $1
             ORDER BY created_at, id",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        self.documents_from_rows(rows).await
    }
}

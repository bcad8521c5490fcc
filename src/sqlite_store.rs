//! SQLite-backed [`AnnotationStore`] implementation.
//!
//! Projects live in the `projects` table; data rows live in one table per
//! annotation type (see [`AnnotationType::table_name`]). UUIDs are stored as
//! hyphenated text.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::models::{AnnotationType, DataPointUpdate, ProjectId, ProjectIdentity, StoredDataPoint};
use crate::store::AnnotationStore;

/// SQLite implementation of the [`AnnotationStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn parse_uuid(text: &str) -> Result<Uuid> {
    Uuid::parse_str(text).with_context(|| format!("Malformed uuid in storage: '{}'", text))
}

#[async_trait]
impl AnnotationStore for SqliteStore {
    async fn save_project(&self, project: &ProjectIdentity) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO projects (project_id, project_name, annotation_type, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(project_id) DO UPDATE SET
                project_name = excluded.project_name,
                annotation_type = excluded.annotation_type
            "#,
        )
        .bind(project.project_id)
        .bind(&project.project_name)
        .bind(project.annotation_type.code())
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to save project '{}'", project.project_name))?;

        Ok(())
    }

    async fn list_projects(&self) -> Result<Vec<ProjectIdentity>> {
        let rows = sqlx::query(
            "SELECT project_id, project_name, annotation_type FROM projects ORDER BY project_id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<ProjectIdentity> {
                Ok(ProjectIdentity {
                    project_id: row.try_get("project_id")?,
                    project_name: row.try_get("project_name")?,
                    annotation_type: AnnotationType::from_code(row.try_get("annotation_type")?)?,
                })
            })
            .collect()
    }

    async fn highest_project_id(&self) -> Result<ProjectId> {
        // AUTOINCREMENT keeps the high-water mark in sqlite_sequence across deletes
        let seq: Option<i64> =
            sqlx::query_scalar("SELECT seq FROM sqlite_sequence WHERE name = 'projects'")
                .fetch_optional(&self.pool)
                .await?;
        Ok(seq.unwrap_or(0))
    }

    async fn delete_project(&self, project: &ProjectIdentity) -> Result<()> {
        let table = project.annotation_type.table_name();
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!("DELETE FROM {table} WHERE project_id = ?"))
            .bind(project.project_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM projects WHERE project_id = ?")
            .bind(project.project_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn project_uuids(&self, project: &ProjectIdentity) -> Result<Vec<Uuid>> {
        let table = project.annotation_type.table_name();
        let uuids: Vec<String> = sqlx::query_scalar(&format!(
            "SELECT uuid FROM {table} WHERE project_id = ? ORDER BY uuid"
        ))
        .bind(project.project_id)
        .fetch_all(&self.pool)
        .await?;

        uuids.iter().map(|s| parse_uuid(s)).collect()
    }

    async fn project_paths(&self, project: &ProjectIdentity) -> Result<Vec<PathBuf>> {
        let table = project.annotation_type.table_name();
        let paths: Vec<String> =
            sqlx::query_scalar(&format!("SELECT img_path FROM {table} WHERE project_id = ?"))
                .bind(project.project_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(paths.into_iter().map(PathBuf::from).collect())
    }

    async fn insert_data_point(
        &self,
        project: &ProjectIdentity,
        uuid: Uuid,
        path: &Path,
    ) -> Result<()> {
        let table = project.annotation_type.table_name();
        sqlx::query(&format!(
            r#"
            INSERT INTO {table} (uuid, project_id, img_path, annotation, img_depth,
                                 img_x, img_y, img_w, img_h, file_size, img_ori_w, img_ori_h)
            VALUES (?, ?, ?, '[]', 0, 0, 0, 0, 0, 0, 0, 0)
            "#
        ))
        .bind(uuid.to_string())
        .bind(project.project_id)
        .bind(path.to_string_lossy().into_owned())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn data_path(&self, project: &ProjectIdentity, uuid: Uuid) -> Result<Option<PathBuf>> {
        let table = project.annotation_type.table_name();
        let path: Option<String> = sqlx::query_scalar(&format!(
            "SELECT img_path FROM {table} WHERE uuid = ? AND project_id = ?"
        ))
        .bind(uuid.to_string())
        .bind(project.project_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(path.map(PathBuf::from))
    }

    async fn data_point(
        &self,
        project: &ProjectIdentity,
        uuid: Uuid,
    ) -> Result<Option<StoredDataPoint>> {
        let table = project.annotation_type.table_name();
        let row = sqlx::query(&format!(
            r#"
            SELECT img_path, annotation, img_depth, img_x, img_y, img_w, img_h,
                   file_size, img_ori_w, img_ori_h
            FROM {table} WHERE uuid = ? AND project_id = ?
            "#
        ))
        .bind(uuid.to_string())
        .bind(project.project_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(StoredDataPoint {
            uuid,
            img_path: PathBuf::from(row.try_get::<String, _>("img_path")?),
            annotation: row.try_get("annotation")?,
            img_depth: row.try_get("img_depth")?,
            img_x: row.try_get("img_x")?,
            img_y: row.try_get("img_y")?,
            img_w: row.try_get("img_w")?,
            img_h: row.try_get("img_h")?,
            file_size: row.try_get("file_size")?,
            img_ori_w: row.try_get("img_ori_w")?,
            img_ori_h: row.try_get("img_ori_h")?,
        }))
    }

    async fn update_data_point(
        &self,
        project: &ProjectIdentity,
        uuid: Uuid,
        update: &DataPointUpdate,
    ) -> Result<bool> {
        let table = project.annotation_type.table_name();
        let result = sqlx::query(&format!(
            r#"
            UPDATE {table}
            SET annotation = ?, img_depth = ?, img_x = ?, img_y = ?, img_w = ?, img_h = ?,
                file_size = ?, img_ori_w = ?, img_ori_h = ?
            WHERE uuid = ? AND project_id = ?
            "#
        ))
        .bind(update.annotation.to_string())
        .bind(update.img_depth)
        .bind(update.img_x)
        .bind(update.img_y)
        .bind(update.img_w)
        .bind(update.img_h)
        .bind(update.file_size)
        .bind(update.img_ori_w)
        .bind(update.img_ori_h)
        .bind(uuid.to_string())
        .bind(project.project_id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to update uuid {} in {}", uuid, table))?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_data_point(&self, project: &ProjectIdentity, uuid: Uuid) -> Result<bool> {
        let table = project.annotation_type.table_name();
        let result = sqlx::query(&format!(
            "DELETE FROM {table} WHERE uuid = ? AND project_id = ?"
        ))
        .bind(uuid.to_string())
        .bind(project.project_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

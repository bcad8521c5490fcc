use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::models::AnnotationType;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table on an already open pool. Idempotent.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // Create projects table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            project_id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_name TEXT NOT NULL,
            annotation_type INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(project_name, annotation_type)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One data table per annotation type, identical layout
    for annotation_type in [AnnotationType::BoundingBox, AnnotationType::Segmentation] {
        let table = annotation_type.table_name();
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                uuid TEXT NOT NULL,
                project_id INTEGER NOT NULL,
                img_path TEXT NOT NULL,
                annotation TEXT NOT NULL DEFAULT '[]',
                img_depth INTEGER NOT NULL DEFAULT 0,
                img_x INTEGER NOT NULL DEFAULT 0,
                img_y INTEGER NOT NULL DEFAULT 0,
                img_w REAL NOT NULL DEFAULT 0,
                img_h REAL NOT NULL DEFAULT 0,
                file_size INTEGER NOT NULL DEFAULT 0,
                img_ori_w INTEGER NOT NULL DEFAULT 0,
                img_ori_h INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY(uuid, project_id)
            )
            "#
        ))
        .execute(pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_project_path ON {table}(project_id, img_path)"
        ))
        .execute(pool)
        .await?;
    }

    Ok(())
}

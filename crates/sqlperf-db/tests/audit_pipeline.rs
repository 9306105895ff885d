use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use tempfile::{tempdir, TempDir};

use sqlperf_db::{
    clamp_take, Database, NewQueryLog, PersistenceError, QueryAuditor, SqliteQueryExecutor,
    DEFAULT_TAKE,
};

/// Log store and target share one file, the way the daemon runs by default.
async fn shared_file_auditor() -> Result<(QueryAuditor, TempDir)> {
    let dir = tempdir()?;
    let path = dir.path().join("sqlperformance.db");
    let db = Database::connect_file(&path).await?;
    let executor = SqliteQueryExecutor::from_file(&path)?;
    Ok((QueryAuditor::new(Arc::new(executor), db), dir))
}

#[tokio::test]
async fn select_one_is_logged_as_single_row_success() -> Result<()> {
    let (auditor, _dir) = shared_file_auditor().await?;

    let record = auditor.execute("SELECT 1;").await?;
    assert!(record.is_successful);
    assert_eq!(record.rows_returned, 1);
    assert_eq!(record.error_message, None);
    assert_eq!(record.query_text, "SELECT 1;");
    Ok(())
}

#[tokio::test]
async fn failing_query_is_persisted_with_message() -> Result<()> {
    let (auditor, _dir) = shared_file_auditor().await?;

    let record = auditor
        .execute("SELECT * FROM nonexistent_table;")
        .await?;
    assert!(!record.is_successful);
    assert!(!record.error_message.as_deref().unwrap_or_default().is_empty());

    let logged = auditor.recent(1).await?;
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].id, record.id);
    assert!(!logged[0].is_successful);
    Ok(())
}

#[tokio::test]
async fn every_attempt_produces_one_record() -> Result<()> {
    let (auditor, _dir) = shared_file_auditor().await?;

    auditor.execute("CREATE TABLE notes (body TEXT)").await?;
    auditor.execute("INSERT INTO notes VALUES ('x')").await?;
    auditor.execute("SELECT body FROM notes").await?;
    auditor.execute("SELECT * FROM nope").await?;

    let logged = auditor.recent(50).await?;
    assert_eq!(logged.len(), 4);
    assert_eq!(logged.iter().filter(|r| r.is_successful).count(), 3);
    Ok(())
}

#[tokio::test]
async fn append_then_list_one_reads_back_the_record() -> Result<()> {
    let dir = tempdir()?;
    let db = Database::connect_file(&dir.path().join("logs.db")).await?;

    for idx in 0..5 {
        let appended = db
            .append(NewQueryLog {
                query_text: format!("SELECT {idx};"),
                duration_ms: idx,
                rows_returned: 1,
                is_successful: true,
                error_message: None,
                executed_at: Utc::now(),
            })
            .await?;

        let latest = db.list(1).await?;
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].id, appended.id);
    }
    Ok(())
}

#[tokio::test]
async fn oversized_take_falls_back_to_default_page() -> Result<()> {
    let dir = tempdir()?;
    let db = Database::connect_file(&dir.path().join("logs.db")).await?;
    let base = Utc::now() - Duration::hours(1);

    for idx in 0..600 {
        db.append(NewQueryLog {
            query_text: format!("SELECT {idx};"),
            duration_ms: 1,
            rows_returned: 1,
            is_successful: true,
            error_message: None,
            executed_at: base + Duration::seconds(idx),
        })
        .await?;
    }

    let page = db.list(1000).await?;
    assert_eq!(page.len(), DEFAULT_TAKE as usize);
    assert_eq!(page[0].query_text, "SELECT 599;");
    assert!(page
        .windows(2)
        .all(|pair| pair[0].executed_at >= pair[1].executed_at));

    for requested in [-5, 0, 1, 49, 50, 51, 500, 501, 1000] {
        let served = db.list(requested).await?.len();
        assert!(served <= clamp_take(requested) as usize);
    }
    assert_eq!(db.list(500).await?.len(), 500);
    Ok(())
}

#[tokio::test]
async fn losing_the_log_table_is_a_hard_error() -> Result<()> {
    let (auditor, _dir) = shared_file_auditor().await?;

    // The submitted statement itself removes the audit table.
    let err = auditor
        .execute("DROP TABLE query_logs;")
        .await
        .unwrap_err();
    assert!(matches!(err, PersistenceError::Database(_)));
    Ok(())
}

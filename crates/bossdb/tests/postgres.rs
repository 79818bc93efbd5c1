//! End-to-end checks against a live Postgres.
//!
//! Set `BOSSDB_TEST_URL` (or `DATABASE_URL`, e.g. in a `.env` file) to a
//! `postgres://` URL to run them; otherwise every test returns early.

use bossdb::monitor::MonitorConfig;
use bossdb::{
    ConnectionConfig, Db, DbResult, FromRow, PageRequest, PoolRegistry, PooledClient, Record, Row,
    Value,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn test_config(name: &str) -> Option<ConnectionConfig> {
    dotenvy::dotenv().ok();
    let url = std::env::var("BOSSDB_TEST_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .ok();
    let Some(url) = url else {
        eprintln!("BOSSDB_TEST_URL / DATABASE_URL is not set; skipping {name}");
        return None;
    };
    let config = ConnectionConfig::from_url(&url).expect("valid database url");
    Some(config.with_prefix(format!("bossdb_{}_{name}_", std::process::id())))
}

async fn create_post_table(db: &Db<PooledClient>) -> DbResult<()> {
    let table = format!("{}post", db.config().prefix);
    db.execute(&format!("DROP TABLE IF EXISTS {table}"), Vec::<Value>::new())
        .await?;
    db.execute(
        &format!(
            "CREATE TABLE {table} (
                id BIGSERIAL PRIMARY KEY,
                user_id BIGINT NOT NULL,
                content TEXT NOT NULL,
                views BIGINT NOT NULL DEFAULT 0,
                score DOUBLE PRECISION
            )"
        ),
        Vec::<Value>::new(),
    )
    .await?;
    Ok(())
}

async fn drop_post_table(db: &Db<PooledClient>) -> DbResult<()> {
    let table = format!("{}post", db.config().prefix);
    db.execute(&format!("DROP TABLE IF EXISTS {table}"), Vec::<Value>::new())
        .await?;
    Ok(())
}

#[derive(Debug, PartialEq)]
struct Post {
    id: i64,
    user_id: i64,
    content: String,
}

impl FromRow for Post {
    fn from_row(row: &Row) -> DbResult<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            content: row.try_get("content")?,
        })
    }
}

#[tokio::test]
async fn insert_then_read_back() -> DbResult<()> {
    let Some(config) = test_config("roundtrip") else {
        return Ok(());
    };
    let registry = PoolRegistry::new();
    let db = registry.connect(&config).await?;
    create_post_table(&db).await?;

    let id = db
        .table("post")?
        .insert(Record::new().set("user_id", 7).set("content", "hello"))
        .await?;
    assert!(id > 0);
    assert_eq!(db.last_insert_id(), Some(id));

    let post: Option<Post> = db
        .table("post")?
        .filter("id = ?", [id])
        .first_as("id, user_id, content")
        .await?;
    assert_eq!(
        post,
        Some(Post {
            id,
            user_id: 7,
            content: "hello".into()
        })
    );

    let last = db
        .table("post")?
        .batch_insert(vec![
            Record::new().set("user_id", 8).set("content", "a"),
            Record::new().set("user_id", 8).set("content", "b"),
        ])
        .await?;
    assert!(last > id);
    assert_eq!(db.table("post")?.filter("user_id = ?", [8]).count().await?, 2);

    let columns = db.table("post")?.structure().await?;
    let names: Vec<_> = columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["id", "user_id", "content", "views", "score"]);

    drop_post_table(&db).await
}

#[tokio::test]
async fn injection_payload_stays_a_value() -> DbResult<()> {
    let Some(config) = test_config("injection") else {
        return Ok(());
    };
    let registry = PoolRegistry::new();
    let db = registry.connect(&config).await?;
    create_post_table(&db).await?;

    let payload = "x'); DROP TABLE users; --";
    let id = db
        .table("post")?
        .insert(Record::new().set("user_id", 1).set("content", payload))
        .await?;

    let row = db
        .table("post")?
        .filter("content = ?", [payload])
        .first("id, content")
        .await?
        .expect("row stored verbatim");
    assert_eq!(row.get("id"), Some(&Value::Int(id)));
    assert_eq!(row.get("content").and_then(Value::as_str), Some(payload));

    drop_post_table(&db).await
}

#[tokio::test]
async fn writes_without_filter_touch_nothing() -> DbResult<()> {
    let Some(config) = test_config("precondition") else {
        return Ok(());
    };
    let registry = PoolRegistry::new();
    let db = registry.connect(&config).await?;
    create_post_table(&db).await?;

    db.table("post")?
        .insert(Record::new().set("user_id", 1).set("content", "keep"))
        .await?;

    assert!(db.table("post")?.delete().await.unwrap_err().is_precondition());
    assert!(
        db.table("post")?
            .update(Record::new().set("content", "gone"))
            .await
            .unwrap_err()
            .is_precondition()
    );
    assert!(
        db.table("post")?
            .increment("views", 1)
            .await
            .unwrap_err()
            .is_precondition()
    );

    let rows = db.table("post")?.get("content, views").await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("content").and_then(Value::as_str), Some("keep"));
    assert_eq!(rows[0].get("views").and_then(Value::as_i64), Some(0));

    drop_post_table(&db).await
}

#[tokio::test]
async fn paginates_and_aggregates() -> DbResult<()> {
    let Some(config) = test_config("paginate") else {
        return Ok(());
    };
    let registry = PoolRegistry::new();
    let db = registry.connect(&config).await?;
    create_post_table(&db).await?;

    let records = (1..=25)
        .map(|n| {
            Record::new()
                .set("user_id", 1)
                .set("content", format!("post {n}"))
                .set("score", Value::Float(n as f64 / 2.0))
        })
        .collect();
    db.table("post")?.batch_insert(records).await?;

    let page = db
        .table("post")?
        .order_by("id")
        .paginate(10, PageRequest::new(3).base_url("post/index"))
        .get_as::<Post>("id, user_id, content")
        .await?;
    assert_eq!(page.pagination.total_rows, 25);
    assert_eq!(page.pagination.max_page, 3);
    assert_eq!(page.rows.len(), 5);
    assert_eq!(page.rows[0].content, "post 21");
    assert_eq!(page.pagination.next_page_url, "post/index/page_3/");

    let clamped = db
        .table("post")?
        .order_by("id")
        .paginate(10, PageRequest::new(9999))
        .get("id")
        .await?;
    assert_eq!(clamped.pagination.current_page, 3);
    assert_eq!(clamped.rows.len(), 5);

    assert_eq!(db.table("post")?.sum("score").await?, 162.5);
    assert_eq!(db.table("post")?.avg("score").await?, 6.5);
    assert_eq!(db.table("post")?.max("user_id").await?, Value::Int(1));
    assert_eq!(
        db.table("post")?.filter("user_id = ?", [99]).sum("score").await?,
        0.0
    );

    drop_post_table(&db).await
}

#[tokio::test]
async fn transaction_rolls_back() -> DbResult<()> {
    let Some(config) = test_config("tx") else {
        return Ok(());
    };
    let registry = PoolRegistry::new();
    let db = registry.connect(&config).await?;
    create_post_table(&db).await?;

    let result: DbResult<i64> = async {
        bossdb::transaction!(db, {
            db.table("post")?
                .insert(Record::new().set("user_id", 1).set("content", "tmp"))
                .await?;
            db.query("SELECT * FROM missing_table_for_rollback", Vec::<Value>::new())
                .await?;
            Ok(1)
        })
    }
    .await;

    let err = result.unwrap_err();
    assert!(err.is_query());
    assert!(err.sql().is_some_and(|sql| sql.contains("missing_table_for_rollback")));
    assert_eq!(db.table("post")?.count().await?, 0);

    drop_post_table(&db).await
}

#[tokio::test]
async fn concurrent_increments_all_land() -> DbResult<()> {
    let Some(config) = test_config("increment") else {
        return Ok(());
    };
    let registry = Arc::new(PoolRegistry::new());
    let db = registry.connect(&config).await?;
    create_post_table(&db).await?;
    let id = db
        .table("post")?
        .insert(Record::new().set("user_id", 1).set("content", "hot"))
        .await?;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let registry = Arc::clone(&registry);
        let config = config.clone();
        handles.push(tokio::spawn(async move {
            let db = registry.connect(&config).await?;
            for _ in 0..10 {
                db.table("post")?
                    .filter("id = ?", [id])
                    .increment("views", 1)
                    .await?;
            }
            DbResult::Ok(())
        }));
    }
    for handle in handles {
        handle.await.expect("task panicked")?;
    }

    let views = db
        .table("post")?
        .filter("id = ?", [id])
        .first("views")
        .await?
        .and_then(|row| row.get("views").and_then(Value::as_i64));
    assert_eq!(views, Some(80));

    drop_post_table(&db).await
}

#[tokio::test]
async fn numeric_columns_keep_their_value() -> DbResult<()> {
    let Some(config) = test_config("numeric") else {
        return Ok(());
    };
    let registry = PoolRegistry::new();
    let db = registry.connect(&config).await?;
    let table = format!("{}account", config.prefix);
    db.execute(&format!("DROP TABLE IF EXISTS {table}"), Vec::<Value>::new())
        .await?;
    db.execute(
        &format!("CREATE TABLE {table} (id BIGSERIAL PRIMARY KEY, balance NUMERIC(12, 2) NOT NULL)"),
        Vec::<Value>::new(),
    )
    .await?;

    let id = db.table("account")?.insert(Record::new().set("balance", 5)).await?;
    db.table("account")?
        .filter("id = ?", [id])
        .increment("balance", 2)
        .await?;
    let balance = db
        .table("account")?
        .filter("id = ?", [id])
        .first("balance")
        .await?
        .and_then(|row| row.get("balance").cloned());
    assert_eq!(balance, Some(Value::from("7.00")));

    db.execute(&format!("DROP TABLE {table}"), Vec::<Value>::new())
        .await?;
    Ok(())
}

#[tokio::test]
async fn abandoned_transaction_never_returns_to_the_pool() -> DbResult<()> {
    let Some(config) = test_config("abandoned") else {
        return Ok(());
    };
    let config = config.with_pool_size(1);
    let registry = PoolRegistry::new();
    let db = registry.connect(&config).await?;
    create_post_table(&db).await?;

    db.begin_transaction().await?;
    db.table("post")?
        .insert(Record::new().set("user_id", 1).set("content", "uncommitted"))
        .await?;
    assert!(db.client().in_transaction());
    drop(db);

    let db = registry.connect(&config).await?;
    assert!(!db.client().in_transaction());
    assert_eq!(db.table("post")?.count().await?, 0);
    let open: Option<Row> = db
        .query("SELECT now() = statement_timestamp() AS fresh", Vec::<Value>::new())
        .await?
        .into_iter()
        .next();
    assert_eq!(open.and_then(|row| row.get("fresh").and_then(Value::as_bool)), Some(true));

    drop_post_table(&db).await
}

#[tokio::test]
async fn timed_out_query_is_cancelled_on_the_server() -> DbResult<()> {
    let Some(config) = test_config("timeout") else {
        return Ok(());
    };
    let registry = PoolRegistry::new();
    let db = registry
        .connect(&config)
        .await?
        .with_monitor_config(MonitorConfig::new().with_query_timeout(Duration::from_millis(100)));

    let err = db
        .query("SELECT pg_sleep(5)", Vec::<Value>::new())
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    // The connection only answers once the sleeping statement is gone.
    let start = Instant::now();
    db.query("SELECT 1", Vec::<Value>::new()).await?;
    assert!(start.elapsed() < Duration::from_secs(3));
    Ok(())
}

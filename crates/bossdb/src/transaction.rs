//! Transaction helper macro.
//!
//! [`Db::begin_transaction`](crate::Db::begin_transaction) and friends send
//! plain `BEGIN`/`COMMIT`/`ROLLBACK` over the handle's connection, so every
//! builder created from the same `Db` inside the block joins the transaction.
//! Transactions do not nest.

/// Runs the given block inside a transaction on a [`Db`](crate::Db).
///
/// - Sends `BEGIN` before running the block.
/// - Commits on `Ok(_)`.
/// - Rolls back on `Err(_)` and returns the block's error. A failed rollback
///   is logged; the original error still wins.
///
/// The block must evaluate to `bossdb::DbResult<T>` and the enclosing
/// function must return a `DbResult` (or an error type `DbError` converts into).
///
/// # Example
///
/// ```ignore
/// let post_id = bossdb::transaction!(db, {
///     let id = db.table("post")?
///         .insert(Record::new().set("content", "hi").set("user_id", uid))
///         .await?;
///     db.table("user")?
///         .filter("id = ?", [uid])
///         .increment("post_count", 1)
///         .await?;
///     Ok(id)
/// })?;
/// ```
#[macro_export]
macro_rules! transaction {
    ($db:expr, $body:block) => {{
        let __bossdb_db = &$db;
        __bossdb_db.begin_transaction().await?;

        let __bossdb_tx_body_result: $crate::DbResult<_> = async { $body }.await;
        match __bossdb_tx_body_result {
            Ok(value) => {
                __bossdb_db.commit().await?;
                Ok(value)
            }
            Err(error) => {
                if let Err(rollback_err) = __bossdb_db.rollback().await {
                    $crate::__private::tracing::error!(
                        target: "bossdb.sql",
                        error = %error,
                        rollback_error = %rollback_err,
                        "rollback failed"
                    );
                }
                Err(error)
            }
        }
    }};
}

//! In-memory client that records statements and replays canned responses.

use crate::client::GenericClient;
use crate::config::{ConnectionConfig, Driver};
use crate::db::Db;
use crate::dialect::Dialect;
use crate::error::{DbError, DbResult};
use crate::row::Row;
use crate::value::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

pub(crate) enum Reply {
    Rows(Vec<Row>),
    Affected(u64),
    Fail(&'static str),
}

pub(crate) struct ScriptedClient {
    dialect: Dialect,
    log: Mutex<Vec<(String, Vec<Value>)>>,
    replies: Mutex<VecDeque<Reply>>,
    insert_id: Mutex<Option<i64>>,
    fail_control: Mutex<bool>,
    in_transaction: Mutex<bool>,
}

impl ScriptedClient {
    pub(crate) fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            log: Mutex::new(Vec::new()),
            replies: Mutex::new(VecDeque::new()),
            insert_id: Mutex::new(None),
            fail_control: Mutex::new(false),
            in_transaction: Mutex::new(false),
        }
    }

    pub(crate) fn reply(&self, reply: Reply) -> &Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    pub(crate) fn set_insert_id(&self, id: i64) {
        *self.insert_id.lock().unwrap() = Some(id);
    }

    pub(crate) fn fail_control(&self) {
        *self.fail_control.lock().unwrap() = true;
    }

    pub(crate) fn in_transaction(&self) -> bool {
        *self.in_transaction.lock().unwrap()
    }

    /// Every statement seen so far, oldest first.
    pub(crate) fn statements(&self) -> Vec<(String, Vec<Value>)> {
        self.log.lock().unwrap().clone()
    }

    pub(crate) fn sql(&self) -> Vec<String> {
        self.statements().into_iter().map(|(sql, _)| sql).collect()
    }

    fn record(&self, sql: &str, params: &[Value]) -> Option<Reply> {
        self.log.lock().unwrap().push((sql.to_string(), params.to_vec()));
        self.replies.lock().unwrap().pop_front()
    }
}

impl GenericClient for ScriptedClient {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn query(&self, sql: &str, params: &[Value]) -> DbResult<Vec<Row>> {
        match self.record(sql, params) {
            Some(Reply::Rows(rows)) => Ok(rows),
            Some(Reply::Affected(_)) | None => Ok(Vec::new()),
            Some(Reply::Fail(msg)) => Err(DbError::Connection(msg.to_string())),
        }
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> DbResult<u64> {
        match self.record(sql, params) {
            Some(Reply::Affected(n)) => Ok(n),
            Some(Reply::Rows(rows)) => Ok(rows.len() as u64),
            None => Ok(0),
            Some(Reply::Fail(msg)) => Err(DbError::Connection(msg.to_string())),
        }
    }

    async fn batch_execute(&self, sql: &str) -> DbResult<()> {
        self.log.lock().unwrap().push((sql.to_string(), Vec::new()));
        if *self.fail_control.lock().unwrap() {
            return Err(DbError::Connection("connection reset".to_string()));
        }
        Ok(())
    }

    async fn last_insert_id(&self) -> DbResult<Option<i64>> {
        Ok(*self.insert_id.lock().unwrap())
    }

    fn set_in_transaction(&self, open: bool) {
        *self.in_transaction.lock().unwrap() = open;
    }
}

pub(crate) fn config(dialect: Dialect) -> ConnectionConfig {
    let driver = match dialect {
        Dialect::MySql => Driver::MySql,
        Dialect::Postgres => Driver::Pgsql,
    };
    ConnectionConfig::new(driver, "boss", "boss")
}

pub(crate) fn db(dialect: Dialect) -> Db<ScriptedClient> {
    Db::new(ScriptedClient::new(dialect), config(dialect)).unwrap()
}

pub(crate) fn prefixed_db(dialect: Dialect, prefix: &str) -> Db<ScriptedClient> {
    Db::new(ScriptedClient::new(dialect), config(dialect).with_prefix(prefix)).unwrap()
}

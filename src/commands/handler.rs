//! Command Handler
//!
//! Maps a decoded [`Request`] onto the storage engine and builds the reply.
//! Command names are matched exactly, so `get` is not `GET`.
//!
//! ## Supported Commands
//!
//! | Command   | Arguments             | Reply                              |
//! |-----------|-----------------------|------------------------------------|
//! | `PING`    |                       | bulk `PONG`                        |
//! | `ECHO`    | body                  | bulk body                          |
//! | `SET`     | key value             | `OK`                               |
//! | `SETEX`   | key seconds value     | `OK`                               |
//! | `PSETEX`  | key millis value      | `OK`                               |
//! | `SETEAXT` | key unix-secs value   | `OK`                               |
//! | `GET`     | key                   | bulk value or null                 |
//! | `EXISTS`  | key                   | integer 0 or 1                     |
//! | `DEL`     | key [key ...]         | integer removed count              |
//! | `INCR`    | key                   | integer new value or null          |
//! | `DECR`    | key                   | integer new value or null          |
//! | `LPUSH`   | key value [value ...] | integer new length or null         |
//! | `RPUSH`   | key value [value ...] | integer new length or null         |
//! | `LRANGE`  | key start end         | array of bulk strings or null      |
//! | `SAVE`    |                       | `OK`                               |
//!
//! Arguments are read by position. A missing argument produces the
//! command's fixed error text; trailing extra arguments are ignored.

use crate::protocol::{Request, RespValue};
use crate::storage::{ExpiryKind, SnapshotStore, StorageEngine, StorageError, Value};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Fixed error texts sent to clients.
pub mod msg {
    pub const ECHO_MISSING: &str = "Body of Echo request missing";
    pub const SET_MISSING: &str = "Key or Value missing";
    pub const SET_EXPIRY_MISSING: &str = "Incomplete command: key, timer and value needed";
    pub const TIMER_NOT_INTEGER: &str = "Timer value is not a valid integer.";
    pub const GET_NOT_STRING: &str = "GET can only retrieve strings.";
    pub const GET_MISSING: &str = "Key missing";
    pub const KEY_MISSING: &str = "Missing key to check";
    pub const COUNTER_KEY_MISSING: &str = "Missing key to check.";
    pub const NOT_A_NUMBER: &str = "Accessed value is not a valid number.";
    pub const NOT_A_STRING: &str = "Accessed value is not a string.";
    pub const NOT_A_LIST: &str = "Accessed value is not a list.";
    pub const LIST_ARGS_MISSING: &str = "Missing key to check or elements to add.";
    pub const NOT_SAVED: &str = "ERR: database not saved to disk.";
}

/// Handles commands by dispatching them to the storage engine.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    storage: Arc<StorageEngine>,
    snapshot: Arc<SnapshotStore>,
}

impl CommandHandler {
    pub fn new(storage: Arc<StorageEngine>, snapshot: Arc<SnapshotStore>) -> Self {
        Self { storage, snapshot }
    }

    /// Executes one request and returns the reply to send back.
    pub fn execute(&self, request: &Request) -> RespValue {
        let Some(name) = request.name() else {
            return RespValue::error("ERR empty command");
        };

        debug!(command = %name, args = request.len() - 1, "Processing request");
        self.dispatch(name, request)
    }

    fn dispatch(&self, cmd: &str, req: &Request) -> RespValue {
        match cmd {
            "PING" => RespValue::bulk_string("PONG"),
            "ECHO" => self.cmd_echo(req),

            // String commands
            "SET" => self.cmd_set(req),
            "SETEX" => self.cmd_set_with_expiry(req, ExpiryKind::Seconds),
            "PSETEX" => self.cmd_set_with_expiry(req, ExpiryKind::Millis),
            "SETEAXT" => self.cmd_set_with_expiry(req, ExpiryKind::UnixSeconds),
            "GET" => self.cmd_get(req),
            "INCR" => self.cmd_counter(req, StorageEngine::incr),
            "DECR" => self.cmd_counter(req, StorageEngine::decr),

            // Key commands
            "EXISTS" => self.cmd_exists(req),
            "DEL" => self.cmd_del(req),

            // List commands
            "LPUSH" => self.cmd_push(req, StorageEngine::lpush),
            "RPUSH" => self.cmd_push(req, StorageEngine::rpush),
            "LRANGE" => self.cmd_lrange(req),

            // Server commands
            "SAVE" => self.cmd_save(),

            _ => RespValue::error(format!("ERR unknown command '{}'", cmd)),
        }
    }

    /// ECHO body
    fn cmd_echo(&self, req: &Request) -> RespValue {
        match req.arg(1) {
            Some(body) => RespValue::bulk_string(body.to_string()),
            None => RespValue::error(msg::ECHO_MISSING),
        }
    }

    /// SET key value
    fn cmd_set(&self, req: &Request) -> RespValue {
        let (Some(key), Some(value)) = (req.arg(1), req.arg(2)) else {
            return RespValue::error(msg::SET_MISSING);
        };

        self.storage.set(key, value);
        RespValue::ok()
    }

    /// SETEX / PSETEX / SETEAXT key amount value
    fn cmd_set_with_expiry(&self, req: &Request, kind: ExpiryKind) -> RespValue {
        let (Some(key), Some(amount), Some(value)) = (req.arg(1), req.arg(2), req.arg(3)) else {
            return RespValue::error(msg::SET_EXPIRY_MISSING);
        };

        let Ok(amount) = amount.parse::<i64>() else {
            return RespValue::error(msg::TIMER_NOT_INTEGER);
        };

        self.storage.set_with_expiry(key, value, kind, amount);
        RespValue::ok()
    }

    /// GET key
    fn cmd_get(&self, req: &Request) -> RespValue {
        let Some(key) = req.arg(1) else {
            return RespValue::error(msg::GET_MISSING);
        };

        match self.storage.get(key) {
            Some(Value::Str(s)) => RespValue::bulk_string(s),
            Some(Value::List(_)) => RespValue::error(msg::GET_NOT_STRING),
            None => RespValue::null(),
        }
    }

    /// INCR key / DECR key
    fn cmd_counter(
        &self,
        req: &Request,
        op: fn(&StorageEngine, &str) -> Result<i32, StorageError>,
    ) -> RespValue {
        let Some(key) = req.arg(1) else {
            return RespValue::error(msg::COUNTER_KEY_MISSING);
        };

        match op(&self.storage, key) {
            Ok(n) => RespValue::integer(i64::from(n)),
            Err(e) => storage_error_reply(e),
        }
    }

    /// EXISTS key
    fn cmd_exists(&self, req: &Request) -> RespValue {
        match req.arg(1) {
            Some(key) => RespValue::integer(i64::from(self.storage.exists(key))),
            None => RespValue::error(msg::KEY_MISSING),
        }
    }

    /// DEL key [key ...]
    fn cmd_del(&self, req: &Request) -> RespValue {
        let keys = req.args_from(1);
        if keys.is_empty() {
            return RespValue::error(msg::KEY_MISSING);
        }

        RespValue::integer(self.storage.delete_many(keys) as i64)
    }

    /// LPUSH / RPUSH key value [value ...]
    fn cmd_push(
        &self,
        req: &Request,
        op: fn(&StorageEngine, &str, Vec<String>) -> Result<usize, StorageError>,
    ) -> RespValue {
        let values = req.args_from(2);
        let Some(key) = req.arg(1).filter(|_| !values.is_empty()) else {
            return RespValue::error(msg::LIST_ARGS_MISSING);
        };

        match op(&self.storage, key, values.to_vec()) {
            Ok(len) => RespValue::integer(len as i64),
            Err(e) => storage_error_reply(e),
        }
    }

    /// LRANGE key start end
    fn cmd_lrange(&self, req: &Request) -> RespValue {
        let parsed = (|| {
            let key = req.arg(1)?;
            // Indices are 32-bit, like the counters.
            let start = req.arg(2)?.parse::<i32>().ok()?;
            let end = req.arg(3)?.parse::<i32>().ok()?;
            Some((key, start, end))
        })();
        let Some((key, start, end)) = parsed else {
            return RespValue::error(msg::LIST_ARGS_MISSING);
        };

        match self.storage.lrange(key, i64::from(start), i64::from(end)) {
            Some(items) => {
                RespValue::array(items.into_iter().map(RespValue::bulk_string).collect())
            }
            None => RespValue::null(),
        }
    }

    /// SAVE
    fn cmd_save(&self) -> RespValue {
        match self.snapshot.save() {
            Ok(entries) => {
                info!(
                    path = %self.snapshot.path().display(),
                    entries,
                    "Database saved to disk"
                );
                RespValue::ok()
            }
            Err(e) => {
                error!(error = %e, "Failed to save database");
                RespValue::error(msg::NOT_SAVED)
            }
        }
    }
}

/// Maps an engine outcome to its reply. An expired key reads as null.
fn storage_error_reply(err: StorageError) -> RespValue {
    match err {
        StorageError::NotAList => RespValue::error(msg::NOT_A_LIST),
        StorageError::NotAString => RespValue::error(msg::NOT_A_STRING),
        StorageError::NotParsable => RespValue::error(msg::NOT_A_NUMBER),
        StorageError::Missing => RespValue::null(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::now_millis;
    use std::time::Duration;
    use tempfile::TempDir;

    fn create_handler() -> (CommandHandler, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(StorageEngine::new());
        let snapshot = Arc::new(SnapshotStore::new(
            Arc::clone(&storage),
            dir.path().join("test.snapshot"),
        ));
        (CommandHandler::new(storage, snapshot), dir)
    }

    fn run(handler: &CommandHandler, args: &[&str]) -> RespValue {
        handler.execute(&Request::from_args(args))
    }

    fn bulk(s: &str) -> RespValue {
        RespValue::bulk_string(s.to_string())
    }

    fn bulk_array(items: &[&str]) -> RespValue {
        RespValue::array(items.iter().map(|s| bulk(s)).collect())
    }

    #[test]
    fn test_ping() {
        let (handler, _dir) = create_handler();
        assert_eq!(run(&handler, &["PING"]), bulk("PONG"));
    }

    #[test]
    fn test_echo() {
        let (handler, _dir) = create_handler();
        assert_eq!(run(&handler, &["ECHO", "hello world"]), bulk("hello world"));
        assert_eq!(
            run(&handler, &["ECHO"]),
            RespValue::error("Body of Echo request missing")
        );
    }

    #[test]
    fn test_set_get() {
        let (handler, _dir) = create_handler();

        assert_eq!(run(&handler, &["SET", "name", "Ariz"]), RespValue::ok());
        assert_eq!(run(&handler, &["GET", "name"]), bulk("Ariz"));
    }

    #[test]
    fn test_get_nonexistent() {
        let (handler, _dir) = create_handler();
        assert_eq!(run(&handler, &["GET", "nonexistent"]), RespValue::null());
    }

    #[test]
    fn test_missing_arguments() {
        let (handler, _dir) = create_handler();
        let cases: &[(&[&str], &str)] = &[
            (&["SET"], "Key or Value missing"),
            (&["SET", "k"], "Key or Value missing"),
            (&["SETEX", "k", "10"], msg::SET_EXPIRY_MISSING),
            (&["PSETEX", "k"], msg::SET_EXPIRY_MISSING),
            (&["SETEAXT"], msg::SET_EXPIRY_MISSING),
            (&["GET"], "Key missing"),
            (&["EXISTS"], "Missing key to check"),
            (&["DEL"], "Missing key to check"),
            (&["INCR"], "Missing key to check."),
            (&["DECR"], "Missing key to check."),
            (&["LPUSH", "k"], msg::LIST_ARGS_MISSING),
            (&["RPUSH"], msg::LIST_ARGS_MISSING),
            (&["LRANGE", "k", "0"], msg::LIST_ARGS_MISSING),
        ];

        for (args, text) in cases {
            assert_eq!(run(&handler, args), RespValue::error(*text), "{:?}", args);
        }
        // Nothing was created along the way
        assert!(handler.storage.is_empty());
    }

    #[test]
    fn test_unknown_and_case_sensitive_commands() {
        let (handler, _dir) = create_handler();
        assert_eq!(
            run(&handler, &["NOTACOMMAND"]),
            RespValue::error("ERR unknown command 'NOTACOMMAND'")
        );
        assert_eq!(
            run(&handler, &["get", "k"]),
            RespValue::error("ERR unknown command 'get'")
        );
        assert_eq!(
            handler.execute(&Request::default()),
            RespValue::error("ERR empty command")
        );
    }

    #[test]
    fn test_extra_arguments_are_ignored() {
        let (handler, _dir) = create_handler();
        assert_eq!(run(&handler, &["SET", "k", "v", "extra"]), RespValue::ok());
        assert_eq!(run(&handler, &["GET", "k", "extra"]), bulk("v"));
    }

    #[test]
    fn test_setex_expires() {
        let (handler, _dir) = create_handler();

        assert_eq!(run(&handler, &["SETEX", "k", "1", "v"]), RespValue::ok());
        assert_eq!(run(&handler, &["GET", "k"]), bulk("v"));

        std::thread::sleep(Duration::from_millis(1100));

        assert_eq!(run(&handler, &["GET", "k"]), RespValue::null());
        assert_eq!(run(&handler, &["EXISTS", "k"]), RespValue::integer(0));
    }

    #[test]
    fn test_psetex_expires() {
        let (handler, _dir) = create_handler();

        run(&handler, &["PSETEX", "k", "500", "v"]);
        std::thread::sleep(Duration::from_millis(1000));
        assert_eq!(run(&handler, &["GET", "k"]), RespValue::null());
    }

    #[test]
    fn test_seteaxt() {
        let (handler, _dir) = create_handler();
        let now_secs = now_millis() / 1000;

        let soon = (now_secs + 1).to_string();
        let later = (now_secs + 2).to_string();
        run(&handler, &["SETEAXT", "soon", &soon, "v"]);
        run(&handler, &["SETEAXT", "later", &later, "v"]);

        std::thread::sleep(Duration::from_millis(500));
        assert_eq!(run(&handler, &["GET", "later"]), bulk("v"));

        std::thread::sleep(Duration::from_millis(600));
        assert_eq!(run(&handler, &["GET", "soon"]), RespValue::null());
    }

    #[test]
    fn test_timer_must_be_integer() {
        let (handler, _dir) = create_handler();
        assert_eq!(
            run(&handler, &["SETEX", "k", "soon", "v"]),
            RespValue::error("Timer value is not a valid integer.")
        );
        assert_eq!(run(&handler, &["EXISTS", "k"]), RespValue::integer(0));
    }

    #[test]
    fn test_exists_ignores_expiry() {
        let (handler, _dir) = create_handler();

        run(&handler, &["PSETEX", "k", "10", "v"]);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(run(&handler, &["EXISTS", "k"]), RespValue::integer(1));
        assert_eq!(run(&handler, &["GET", "k"]), RespValue::null());
        assert_eq!(run(&handler, &["EXISTS", "k"]), RespValue::integer(0));
    }

    #[test]
    fn test_del() {
        let (handler, _dir) = create_handler();

        assert_eq!(run(&handler, &["DEL", "a", "b", "c"]), RespValue::integer(0));

        run(&handler, &["SET", "a", "1"]);
        run(&handler, &["SET", "b", "2"]);
        assert_eq!(run(&handler, &["DEL", "a", "b", "c"]), RespValue::integer(2));
        assert_eq!(run(&handler, &["EXISTS", "a"]), RespValue::integer(0));
        assert_eq!(run(&handler, &["EXISTS", "b"]), RespValue::integer(0));
    }

    #[test]
    fn test_incr_decr() {
        let (handler, _dir) = create_handler();

        assert_eq!(run(&handler, &["INCR", "counter"]), RespValue::integer(1));
        assert_eq!(run(&handler, &["DECR", "down"]), RespValue::integer(-1));

        run(&handler, &["SET", "k", "2"]);
        assert_eq!(run(&handler, &["INCR", "k"]), RespValue::integer(3));
        assert_eq!(run(&handler, &["DECR", "k"]), RespValue::integer(2));
    }

    #[test]
    fn test_incr_errors() {
        let (handler, _dir) = create_handler();

        run(&handler, &["SET", "k", "NAN"]);
        assert_eq!(
            run(&handler, &["INCR", "k"]),
            RespValue::error("Accessed value is not a valid number.")
        );

        run(&handler, &["LPUSH", "l", "v"]);
        assert_eq!(
            run(&handler, &["INCR", "l"]),
            RespValue::error("Accessed value is not a string.")
        );
    }

    #[test]
    fn test_incr_on_expired_key_is_null() {
        let (handler, _dir) = create_handler();

        run(&handler, &["PSETEX", "k", "0", "5"]);
        assert_eq!(run(&handler, &["INCR", "k"]), RespValue::null());
        assert_eq!(run(&handler, &["INCR", "k"]), RespValue::integer(1));
    }

    #[test]
    fn test_lpush_rpush_lrange() {
        let (handler, _dir) = create_handler();

        assert_eq!(
            run(&handler, &["LPUSH", "newkey", "v0", "v1", "v2"]),
            RespValue::integer(3)
        );
        assert_eq!(
            run(&handler, &["LRANGE", "newkey", "0", "2"]),
            bulk_array(&["v2", "v1", "v0"])
        );

        run(&handler, &["RPUSH", "newkey2", "v0", "v1", "v2"]);
        assert_eq!(
            run(&handler, &["LRANGE", "newkey2", "0", "2"]),
            bulk_array(&["v0", "v1", "v2"])
        );
    }

    #[test]
    fn test_lrange_indices() {
        let (handler, _dir) = create_handler();
        run(&handler, &["RPUSH", "L", "v0", "v1", "v2", "v3", "v4"]);

        let tail = bulk_array(&["v1", "v2", "v3", "v4"]);
        assert_eq!(run(&handler, &["LRANGE", "L", "1", "4"]), tail);
        assert_eq!(run(&handler, &["LRANGE", "L", "-4", "-1"]), tail);
        assert_eq!(run(&handler, &["LRANGE", "L", "1", "100"]), tail);
        assert_eq!(run(&handler, &["LRANGE", "L", "5", "4"]), bulk_array(&[]));
    }

    #[test]
    fn test_lrange_miss_and_bad_indices() {
        let (handler, _dir) = create_handler();

        assert_eq!(run(&handler, &["LRANGE", "none", "0", "1"]), RespValue::null());

        run(&handler, &["SET", "s", "v"]);
        assert_eq!(run(&handler, &["LRANGE", "s", "0", "1"]), RespValue::null());

        assert_eq!(
            run(&handler, &["LRANGE", "s", "zero", "1"]),
            RespValue::error(msg::LIST_ARGS_MISSING)
        );
    }

    #[test]
    fn test_lrange_indices_are_32_bit() {
        let (handler, _dir) = create_handler();
        run(&handler, &["RPUSH", "L", "v0", "v1"]);

        for args in [
            ["LRANGE", "L", "3000000000", "1"],
            ["LRANGE", "L", "0", "-3000000000"],
        ] {
            assert_eq!(
                run(&handler, &args),
                RespValue::error(msg::LIST_ARGS_MISSING),
                "{:?}",
                args
            );
        }

        assert_eq!(
            run(&handler, &["LRANGE", "L", "-2147483648", "2147483647"]),
            bulk_array(&["v0", "v1"])
        );
    }

    #[test]
    fn test_type_mismatches() {
        let (handler, _dir) = create_handler();

        run(&handler, &["SET", "s", "v"]);
        assert_eq!(
            run(&handler, &["LPUSH", "s", "x"]),
            RespValue::error("Accessed value is not a list.")
        );
        assert_eq!(
            run(&handler, &["RPUSH", "s", "x"]),
            RespValue::error("Accessed value is not a list.")
        );
        assert_eq!(run(&handler, &["GET", "s"]), bulk("v"));

        run(&handler, &["RPUSH", "l", "x"]);
        assert_eq!(
            run(&handler, &["GET", "l"]),
            RespValue::error("GET can only retrieve strings.")
        );
    }

    #[test]
    fn test_save() {
        let (handler, dir) = create_handler();

        run(&handler, &["SET", "k", "v"]);
        assert_eq!(run(&handler, &["SAVE"]), RespValue::ok());
        assert!(dir.path().join("test.snapshot").exists());
    }

    #[test]
    fn test_save_failure() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(StorageEngine::new());
        let snapshot = Arc::new(SnapshotStore::new(
            Arc::clone(&storage),
            dir.path().join("no-such-dir").join("dump"),
        ));
        let handler = CommandHandler::new(storage, snapshot);

        assert_eq!(
            run(&handler, &["SAVE"]),
            RespValue::error("ERR: database not saved to disk.")
        );
    }

    #[test]
    fn test_concurrent_incr() {
        use std::thread;

        let (handler, _dir) = create_handler();
        let mut handles = vec![];

        for _ in 0..10 {
            let handler = handler.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    run(&handler, &["INCR", "k"]);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(run(&handler, &["GET", "k"]), bulk("1000"));
    }
}

//! Redis-backed cache storage shared across processes.
//!
//! Values are written as versioned records (see [`crate::codec`]) through a
//! pluggable [`ValueSerializer`]. All calls block on one connection guarded
//! by a mutex; there is no retry. A call that fails because the server went
//! away surfaces as `CacheError::BackendUnavailable`, and the next call
//! opens a fresh connection.
//!
//! # Expiration
//!
//! Absolute deadlines map onto `PX`. Redis has no sliding expiration, so a
//! sliding window is approximated: the window becomes the key's `PX` and a
//! read that hits refreshes it with `PEXPIRE`. When both kinds are given the
//! earlier deadline is written and reads do not extend it.
//!
//! Eviction callbacks are not supported; Redis expires keys server-side
//! without telling this process.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use once_cell::sync::Lazy;
use tracing::{debug, info, warn};
use utilkits_core::{
    system_clock, CacheError, ConfigError, SharedClock, Timestamp, UtilKitsError, UtilKitsResult,
};

use super::codec::{decode_value, encode_value, JsonSerializer, ValueSerializer, HEADER_LEN};
use super::key::ScopedKey;
use super::traits::{CacheStats, CacheStorage, CacheValue, EntryOptions};

const BACKEND: &str = "redis";

/// Replaces the payload only when it matches, keeping header and TTL.
static COMPARE_AND_SWAP: Lazy<redis::Script> = Lazy::new(|| {
    redis::Script::new(&format!(
        r"
local current = redis.call('GET', KEYS[1])
if not current then
    return 0
end
if string.sub(current, {payload_start}) ~= ARGV[1] then
    return 0
end
redis.call('SET', KEYS[1], string.sub(current, 1, {header_len}) .. ARGV[2], 'KEEPTTL')
return 1
",
        payload_start = HEADER_LEN + 1,
        header_len = HEADER_LEN,
    ))
});

/// Error type for Redis cache operations.
#[derive(Debug, thiserror::Error)]
pub enum RedisCacheError {
    /// The server could not be reached or the connection dropped.
    #[error("{0}")]
    Unavailable(String),

    /// The server answered with an error.
    #[error("{0}")]
    Command(String),
}

impl From<redis::RedisError> for RedisCacheError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error()
            || e.is_connection_refusal()
            || e.is_timeout()
            || e.is_connection_dropped()
        {
            Self::Unavailable(e.to_string())
        } else {
            Self::Command(e.to_string())
        }
    }
}

/// Convert RedisCacheError to UtilKitsError.
impl From<RedisCacheError> for UtilKitsError {
    fn from(e: RedisCacheError) -> Self {
        match e {
            RedisCacheError::Unavailable(reason) => CacheError::BackendUnavailable {
                backend: BACKEND.to_string(),
                reason,
            }
            .into(),
            RedisCacheError::Command(reason) => CacheError::Backend { reason }.into(),
        }
    }
}

// ============================================================================
// CONNECTION
// ============================================================================

/// A blocking connection shared by every typed view of one store.
pub struct RedisConnection {
    client: redis::Client,
    /// `None` after a connection-level failure; reopened on next use.
    conn: Mutex<Option<redis::Connection>>,
    connect_timeout: Duration,
    stats: RwLock<CacheStats>,
}

impl fmt::Debug for RedisConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisConnection")
            .field("addr", &self.client.get_connection_info().addr)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl RedisConnection {
    /// Open a connection and verify it with `PING`.
    pub fn connect(url: &str, connect_timeout: Duration) -> UtilKitsResult<Self> {
        let client = redis::Client::open(url).map_err(|e| ConfigError::InvalidValue {
            field: "redis_url".to_string(),
            value: url.to_string(),
            reason: e.to_string(),
        })?;

        let mut conn = client
            .get_connection_with_timeout(connect_timeout)
            .map_err(RedisCacheError::from)?;
        redis::cmd("PING")
            .query::<String>(&mut conn)
            .map_err(RedisCacheError::from)?;

        info!(addr = %client.get_connection_info().addr, "Connected to redis cache");

        Ok(Self {
            client,
            conn: Mutex::new(Some(conn)),
            connect_timeout,
            stats: RwLock::new(CacheStats::default()),
        })
    }

    /// Round-trip a `PING`.
    pub fn ping(&self) -> UtilKitsResult<()> {
        self.run(|conn| redis::cmd("PING").query::<String>(conn).map(|_| ()))
    }

    pub fn is_connected(&self) -> bool {
        match self.ping() {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "redis ping failed");
                false
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.read().map(|s| s.clone()).unwrap_or_default()
    }

    /// Run one command (or pipeline) on the shared connection.
    fn run<R>(
        &self,
        f: impl FnOnce(&mut redis::Connection) -> redis::RedisResult<R>,
    ) -> UtilKitsResult<R> {
        let mut slot = self.conn.lock().map_err(|_| CacheError::LockPoisoned)?;

        let mut conn = match slot.take() {
            Some(conn) => conn,
            None => {
                let fresh = self
                    .client
                    .get_connection_with_timeout(self.connect_timeout)
                    .map_err(RedisCacheError::from)?;
                debug!("Reopened redis connection");
                fresh
            }
        };

        match f(&mut conn) {
            Ok(value) => {
                *slot = Some(conn);
                Ok(value)
            }
            Err(e) => {
                let e = RedisCacheError::from(e);
                if matches!(e, RedisCacheError::Unavailable(_)) {
                    warn!(error = %e, "redis connection lost");
                } else {
                    *slot = Some(conn);
                }
                Err(e.into())
            }
        }
    }

    fn record(&self, update: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.write() {
            update(&mut stats);
        }
    }
}

// ============================================================================
// WRITE PLANNING
// ============================================================================

/// What a write with given options turns into on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WritePlan {
    /// The deadline has already passed.
    Delete,
    Set {
        px_ms: Option<u64>,
        /// Window stored in the record header for refresh on read.
        sliding: Option<Duration>,
    },
}

fn plan_write(options: &EntryOptions, now: Timestamp) -> WritePlan {
    let absolute_ms = match options.absolute_deadline(now) {
        Some(deadline) => {
            let remaining = (deadline - now).num_milliseconds();
            if remaining <= 0 {
                return WritePlan::Delete;
            }
            Some(remaining as u64)
        }
        None => None,
    };
    let sliding_ms = options.sliding_expiration.map(millis);

    match (absolute_ms, sliding_ms) {
        (Some(a), Some(s)) => WritePlan::Set {
            px_ms: Some(a.min(s)),
            sliding: None,
        },
        (Some(a), None) => WritePlan::Set {
            px_ms: Some(a),
            sliding: None,
        },
        (None, s) => WritePlan::Set {
            px_ms: s,
            sliding: options.sliding_expiration,
        },
    }
}

fn millis(window: Duration) -> u64 {
    u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1)
}

// ============================================================================
// TYPED STORAGE
// ============================================================================

/// Typed view over a [`RedisConnection`].
pub struct RedisStorage<T, S = JsonSerializer> {
    connection: Arc<RedisConnection>,
    serializer: S,
    clock: SharedClock,
    _marker: PhantomData<fn() -> T>,
}

impl<T> RedisStorage<T, JsonSerializer> {
    pub fn new(connection: Arc<RedisConnection>) -> Self {
        Self::with_serializer(connection, JsonSerializer)
    }
}

impl<T, S> RedisStorage<T, S> {
    pub fn with_serializer(connection: Arc<RedisConnection>, serializer: S) -> Self {
        Self {
            connection,
            serializer,
            clock: system_clock(),
            _marker: PhantomData,
        }
    }

    /// Resolve absolute deadlines against `clock` instead of the wall clock.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn connection(&self) -> &Arc<RedisConnection> {
        &self.connection
    }
}

impl<T, S: Clone> Clone for RedisStorage<T, S> {
    fn clone(&self) -> Self {
        Self::with_serializer(Arc::clone(&self.connection), self.serializer.clone())
            .with_clock(Arc::clone(&self.clock))
    }
}

impl<T, S> fmt::Debug for RedisStorage<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStorage")
            .field("value_type", &std::any::type_name::<T>())
            .field("connection", &self.connection)
            .finish()
    }
}

impl<T: CacheValue, S: ValueSerializer> RedisStorage<T, S> {
    fn encode(&self, value: &T, sliding: Option<Duration>) -> UtilKitsResult<Vec<u8>> {
        Ok(encode_value(&self.serializer, value, sliding)?)
    }

    /// Decode a raw record, returning the value and the window to refresh.
    fn decode(&self, bytes: &[u8]) -> UtilKitsResult<(T, Option<Duration>)> {
        let (value, record) = decode_value(&self.serializer, bytes)?;
        Ok((value, record.sliding))
    }
}

impl<T: CacheValue, S: ValueSerializer> CacheStorage<T> for RedisStorage<T, S> {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    fn exists(&self, key: &ScopedKey) -> UtilKitsResult<bool> {
        let count: i64 = self
            .connection
            .run(|conn| redis::cmd("EXISTS").arg(key.encode()).query(conn))?;
        Ok(count > 0)
    }

    fn get(&self, key: &ScopedKey) -> UtilKitsResult<Option<T>> {
        let encoded = key.encode();
        let raw: Option<Vec<u8>> = self
            .connection
            .run(|conn| redis::cmd("GET").arg(&encoded).query(conn))?;

        let Some(raw) = raw else {
            self.connection.record(|stats| stats.misses += 1);
            return Ok(None);
        };
        let (value, sliding) = self.decode(&raw)?;
        self.connection.record(|stats| stats.hits += 1);

        if let Some(window) = sliding {
            self.connection.run(|conn| {
                redis::cmd("PEXPIRE")
                    .arg(&encoded)
                    .arg(millis(window))
                    .query::<i64>(conn)
            })?;
        }
        Ok(Some(value))
    }

    fn multi_get(&self, keys: &[ScopedKey]) -> UtilKitsResult<Vec<T>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let encoded: Vec<String> = keys.iter().map(ScopedKey::encode).collect();
        let raws: Vec<Option<Vec<u8>>> = self
            .connection
            .run(|conn| redis::cmd("MGET").arg(&encoded).query(conn))?;

        let mut values = Vec::with_capacity(raws.len());
        let mut refresh = Vec::new();
        let (mut hits, mut misses) = (0u64, 0u64);
        for (key, raw) in encoded.iter().zip(raws) {
            match raw {
                Some(raw) => {
                    let (value, sliding) = self.decode(&raw)?;
                    if let Some(window) = sliding {
                        refresh.push((key, millis(window)));
                    }
                    values.push(value);
                    hits += 1;
                }
                None => misses += 1,
            }
        }
        self.connection.record(|stats| {
            stats.hits += hits;
            stats.misses += misses;
        });

        if !refresh.is_empty() {
            self.connection.run(|conn| {
                let mut pipe = redis::pipe();
                for (key, ms) in &refresh {
                    pipe.cmd("PEXPIRE").arg(*key).arg(*ms).ignore();
                }
                pipe.query::<()>(conn)
            })?;
        }
        Ok(values)
    }

    fn set_with_options(
        &self,
        key: &ScopedKey,
        value: T,
        options: EntryOptions,
    ) -> UtilKitsResult<()> {
        if options.on_evict.is_some() {
            debug!(key = %key, "redis backend ignores eviction callbacks");
        }

        match plan_write(&options, self.clock.now()) {
            WritePlan::Delete => self.delete(key),
            WritePlan::Set { px_ms, sliding } => {
                let bytes = self.encode(&value, sliding)?;
                self.connection.run(|conn| {
                    let mut cmd = redis::cmd("SET");
                    cmd.arg(key.encode()).arg(bytes);
                    if let Some(ms) = px_ms {
                        cmd.arg("PX").arg(ms);
                    }
                    cmd.query::<()>(conn)
                })
            }
        }
    }

    fn multi_set(&self, values: HashMap<ScopedKey, T>) -> UtilKitsResult<()> {
        if values.is_empty() {
            return Ok(());
        }
        let records = values
            .iter()
            .map(|(key, value)| Ok((key.encode(), self.encode(value, None)?)))
            .collect::<UtilKitsResult<Vec<_>>>()?;

        self.connection.run(|conn| {
            let mut pipe = redis::pipe();
            pipe.atomic();
            for (key, bytes) in &records {
                pipe.cmd("SET").arg(key).arg(bytes.as_slice()).ignore();
            }
            pipe.query::<()>(conn)
        })
    }

    fn compare_and_swap(
        &self,
        key: &ScopedKey,
        expected: &T,
        new_value: T,
    ) -> UtilKitsResult<bool> {
        let expected = self.serializer.serialize(expected)?;
        let replacement = self.serializer.serialize(&new_value)?;

        let swapped: i64 = self.connection.run(|conn| {
            COMPARE_AND_SWAP
                .key(key.encode())
                .arg(expected.as_slice())
                .arg(replacement.as_slice())
                .invoke(conn)
        })?;
        Ok(swapped == 1)
    }

    fn delete(&self, key: &ScopedKey) -> UtilKitsResult<()> {
        self.connection
            .run(|conn| redis::cmd("DEL").arg(key.encode()).query::<i64>(conn))
            .map(|_| ())
    }

    fn multi_delete(&self, keys: &[ScopedKey]) -> UtilKitsResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let encoded: Vec<String> = keys.iter().map(ScopedKey::encode).collect();
        self.connection
            .run(|conn| redis::cmd("DEL").arg(&encoded).query::<i64>(conn))
            .map(|_| ())
    }

    fn stats(&self) -> UtilKitsResult<CacheStats> {
        Ok(self.connection.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::io::{self, BufRead, BufReader, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use utilkits_core::{Clock, ManualClock, SerializationError};

    use crate::key::CacheNamespace;

    type Command = Vec<Vec<u8>>;

    const OK: &[u8] = b"+OK\r\n";

    /// Read one RESP array command; `None` once the client hangs up.
    fn read_command(reader: &mut BufReader<TcpStream>) -> Option<Command> {
        let mut line = String::new();
        if reader.read_line(&mut line).ok()? == 0 {
            return None;
        }
        let count: usize = line.trim_end().strip_prefix('*')?.parse().ok()?;
        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            line.clear();
            reader.read_line(&mut line).ok()?;
            let len: usize = line.trim_end().strip_prefix('$')?.parse().ok()?;
            let mut arg = vec![0u8; len + 2];
            reader.read_exact(&mut arg).ok()?;
            arg.truncate(len);
            args.push(arg);
        }
        Some(args)
    }

    fn command_name(command: &Command) -> String {
        command
            .first()
            .map(|name| String::from_utf8_lossy(name).to_ascii_uppercase())
            .unwrap_or_default()
    }

    fn bulk(bytes: &[u8]) -> Vec<u8> {
        let mut out = format!("${}\r\n", bytes.len()).into_bytes();
        out.extend_from_slice(bytes);
        out.extend_from_slice(b"\r\n");
        out
    }

    /// Serve `sessions` clients in turn on a loopback port.
    ///
    /// Handshake commands get a canned reply. Everything else is forwarded
    /// on the returned channel and answered by `respond`, which gets the
    /// session index and returns the raw reply, or `None` to hang up.
    fn scripted_server<F>(sessions: usize, respond: F) -> (String, mpsc::Receiver<Command>)
    where
        F: Fn(usize, &Command) -> Option<Vec<u8>> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
        let addr = listener.local_addr().expect("local addr should resolve");
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || {
            for session in 0..sessions {
                let Ok((stream, _)) = listener.accept() else {
                    return;
                };
                let Ok(mut writer) = stream.try_clone() else {
                    return;
                };
                let mut reader = BufReader::new(stream);
                while let Some(command) = read_command(&mut reader) {
                    let reply = match command_name(&command).as_str() {
                        "PING" => Some(b"+PONG\r\n".to_vec()),
                        "CLIENT" | "SELECT" | "AUTH" => Some(OK.to_vec()),
                        _ => {
                            let reply = respond(session, &command);
                            let _ = tx.send(command);
                            reply
                        }
                    };
                    match reply {
                        Some(bytes) if writer.write_all(&bytes).is_ok() => {}
                        _ => break,
                    }
                }
            }
        });

        (format!("redis://{}/", addr), rx)
    }

    fn storage_at(url: &str) -> RedisStorage<u64> {
        let connection =
            RedisConnection::connect(url, Duration::from_secs(2)).expect("connect should succeed");
        RedisStorage::new(Arc::new(connection))
    }

    fn answer_key() -> ScopedKey {
        CacheNamespace::new("fake")
            .expect("namespace should be valid")
            .key("answer")
    }

    fn next_command(commands: &mpsc::Receiver<Command>) -> Command {
        commands
            .recv_timeout(Duration::from_secs(2))
            .expect("server should receive a command")
    }

    #[test]
    fn test_connection_errors_map_to_unavailable() {
        let refused = redis::RedisError::from(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        let err: UtilKitsError = RedisCacheError::from(refused).into();
        assert!(err.is_backend_unavailable());
        assert!(matches!(
            err,
            UtilKitsError::Cache(CacheError::BackendUnavailable { ref backend, .. })
                if backend == "redis"
        ));
    }

    #[test]
    fn test_command_errors_map_to_backend() {
        let wrong_type = redis::RedisError::from((redis::ErrorKind::TypeError, "WRONGTYPE"));
        let err: UtilKitsError = RedisCacheError::from(wrong_type).into();
        assert!(!err.is_backend_unavailable());
        assert!(matches!(err, UtilKitsError::Cache(CacheError::Backend { .. })));
    }

    #[test]
    fn test_invalid_url_is_config_error() {
        let err = RedisConnection::connect("not a url", Duration::from_millis(100))
            .expect_err("invalid url should fail");
        assert!(matches!(
            err,
            UtilKitsError::Config(ConfigError::InvalidValue { ref field, .. })
                if field == "redis_url"
        ));
    }

    #[test]
    fn test_unreachable_server_is_unavailable() {
        let err = RedisConnection::connect("redis://127.0.0.1:1/", Duration::from_millis(200))
            .expect_err("nothing listens on port 1");
        assert!(err.is_backend_unavailable());
    }

    #[test]
    fn test_plan_without_expiration() {
        let now = Utc::now();
        assert_eq!(
            plan_write(&EntryOptions::new(), now),
            WritePlan::Set {
                px_ms: None,
                sliding: None
            }
        );
    }

    #[test]
    fn test_plan_sliding_only_refreshes() {
        let now = Utc::now();
        let options = EntryOptions::new().with_sliding_expiration(Duration::from_secs(30));
        assert_eq!(
            plan_write(&options, now),
            WritePlan::Set {
                px_ms: Some(30_000),
                sliding: Some(Duration::from_secs(30))
            }
        );
    }

    #[test]
    fn test_plan_mixed_takes_earliest_without_refresh() {
        let now = Utc::now();
        let options = EntryOptions::new()
            .with_sliding_expiration(Duration::from_secs(30))
            .with_absolute_expiration_relative_to_now(Duration::from_secs(5));
        assert_eq!(
            plan_write(&options, now),
            WritePlan::Set {
                px_ms: Some(5_000),
                sliding: None
            }
        );
    }

    #[test]
    fn test_plan_past_deadline_deletes() {
        let now = Utc::now();
        let options =
            EntryOptions::new().with_absolute_expiration(now - chrono::Duration::seconds(1));
        assert_eq!(plan_write(&options, now), WritePlan::Delete);
    }

    #[test]
    fn test_dropped_connection_reconnects_on_next_call() {
        let record = encode_value(&JsonSerializer, &42u64, None).expect("encode should succeed");
        let (url, _commands) = scripted_server(2, move |session, command| {
            match (session, command_name(command).as_str()) {
                (0, "GET") => None,
                (_, "GET") => Some(bulk(&record)),
                _ => Some(OK.to_vec()),
            }
        });
        let storage = storage_at(&url);
        let key = answer_key();

        let err = storage.get(&key).expect_err("dropped connection should fail");
        assert!(err.is_backend_unavailable());
        assert_eq!(storage.get(&key).expect("get should succeed"), Some(42));
        assert!(storage.is_connected());
    }

    #[test]
    fn test_corrupt_record_is_serialization_error() {
        let (url, _commands) = scripted_server(1, |_, command| {
            match command_name(command).as_str() {
                "GET" => Some(bulk(b"\x09{}")),
                "EXISTS" => Some(b":1\r\n".to_vec()),
                _ => Some(OK.to_vec()),
            }
        });
        let storage = storage_at(&url);
        let key = answer_key();

        let err = storage.get(&key).expect_err("corrupt record should fail");
        assert!(matches!(
            err,
            UtilKitsError::Serialization(SerializationError::UnsupportedVersion { found: 9, .. })
        ));
        // Decoding errors leave the connection in place.
        assert!(storage.exists(&key).expect("exists should succeed"));
    }

    #[test]
    fn test_absolute_deadline_uses_storage_clock() {
        let (url, commands) = scripted_server(1, |_, _| Some(OK.to_vec()));
        let start = chrono::DateTime::from_timestamp(978_307_200, 0).expect("timestamp is valid");
        let clock = ManualClock::new(start);
        let storage = storage_at(&url).with_clock(Arc::new(clock.clone()));
        let key = answer_key();

        let deadline = clock.now() + chrono::Duration::seconds(5);
        let options = EntryOptions::new().with_absolute_expiration(deadline);
        storage
            .set_with_options(&key, 7u64, options)
            .expect("set should succeed");

        let set = next_command(&commands);
        assert_eq!(command_name(&set), "SET");
        assert_eq!(set[1], key.encode().into_bytes());
        assert_eq!(set[3..], [b"PX".to_vec(), b"5000".to_vec()]);
    }

    #[test]
    fn test_sliding_hit_refreshes_ttl() {
        let record = encode_value(&JsonSerializer, &7u64, Some(Duration::from_secs(30)))
            .expect("encode should succeed");
        let (url, commands) = scripted_server(1, move |_, command| {
            match command_name(command).as_str() {
                "GET" => Some(bulk(&record)),
                "PEXPIRE" => Some(b":1\r\n".to_vec()),
                _ => Some(OK.to_vec()),
            }
        });
        let storage = storage_at(&url);
        let key = answer_key();

        assert_eq!(storage.get(&key).expect("get should succeed"), Some(7));

        assert_eq!(command_name(&next_command(&commands)), "GET");
        let refresh = next_command(&commands);
        assert_eq!(command_name(&refresh), "PEXPIRE");
        assert_eq!(refresh[2], b"30000".to_vec());
        let stats = storage.stats().expect("stats should succeed");
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn test_multi_get_skips_missing_keys() {
        let record = encode_value(&JsonSerializer, &5u64, None).expect("encode should succeed");
        let (url, _commands) = scripted_server(1, move |_, command| {
            match command_name(command).as_str() {
                "MGET" => {
                    let mut reply = b"*2\r\n".to_vec();
                    reply.extend(bulk(&record));
                    reply.extend_from_slice(b"$-1\r\n");
                    Some(reply)
                }
                _ => Some(OK.to_vec()),
            }
        });
        let storage = storage_at(&url);
        let namespace = CacheNamespace::new("fake").expect("namespace should be valid");
        let keys = [namespace.key("present"), namespace.key("missing")];

        assert_eq!(storage.multi_get(&keys).expect("multi_get should succeed"), vec![5]);
        let stats = storage.stats().expect("stats should succeed");
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[test]
    fn test_compare_and_swap_reports_script_result() {
        let calls = AtomicUsize::new(0);
        let (url, commands) = scripted_server(1, move |_, command| {
            match command_name(command).as_str() {
                "EVALSHA" | "EVAL" => {
                    let swapped = calls.fetch_add(1, Ordering::SeqCst) == 0;
                    Some(if swapped { b":1\r\n" } else { b":0\r\n" }.to_vec())
                }
                _ => Some(OK.to_vec()),
            }
        });
        let storage = storage_at(&url);
        let key = answer_key();

        assert!(storage
            .compare_and_swap(&key, &1u64, 2u64)
            .expect("swap should succeed"));
        assert!(!storage
            .compare_and_swap(&key, &1u64, 3u64)
            .expect("swap should succeed"));

        let script = next_command(&commands);
        let args = &script[script.len() - 3..];
        assert_eq!(args, [key.encode().into_bytes(), b"1".to_vec(), b"2".to_vec()]);
    }
}

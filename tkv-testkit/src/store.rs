//! # In-Memory Store
//!
//! Purpose: A single-node, in-process store that answers the RESP2 command
//! subset the client speaks, so integration tests can run without an
//! external server.
//!
//! ## Design Principles
//! 1. **One Lock**: The whole keyspace sits behind one `parking_lot::Mutex`;
//!    commands are applied atomically and the lock is never held across an
//!    await.
//! 2. **Lazy Expiry**: Deadlines are checked on access, as the engine this
//!    grew from does; there is no background sweeper.
//! 3. **Wake on Write**: Blocking pops park on a `tokio::sync::Notify` and
//!    re-check their keys after every command.
//! 4. **Store-Shaped Replies**: Error strings, nil shapes and score
//!    formatting follow the real store closely enough for the client's
//!    decoders.
//!
//! ## Structure Overview
//!
//! ```text
//! Store
//!   ├── keyspace: Mutex<Keyspace>
//!   │     └── entries: HashMap<Bytes, Entry>
//!   │           └── Entry { value: Value, expires_at: Option<Instant> }
//!   │                 └── Value::{Str, Hash, List, ZSet}
//!   └── changed: Notify   (blocking pops)
//! ```

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use hashbrown::HashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

use crate::frame::{eq_ignore_ascii_case, Frame};

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";
const NOT_INTEGER: &str = "ERR value is not an integer or out of range";
const NOT_FLOAT: &str = "ERR value is not a valid float";
const SYNTAX: &str = "ERR syntax error";
const DEFAULT_SCAN_COUNT: usize = 10;

type CmdResult = Result<Frame, String>;

#[derive(Debug)]
enum Value {
    Str(Bytes),
    Hash(HashMap<Bytes, Bytes>),
    List(VecDeque<Bytes>),
    ZSet(HashMap<Bytes, f64>),
}

impl Value {
    fn is_empty(&self) -> bool {
        match self {
            Value::Str(_) => false,
            Value::Hash(hash) => hash.is_empty(),
            Value::List(list) => list.is_empty(),
            Value::ZSet(zset) => zset.is_empty(),
        }
    }
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(deadline) if now >= deadline)
    }
}

#[derive(Debug, Clone, Copy)]
enum PopKind {
    Head,
    Tail,
    Min,
    Max,
}

/// Shared in-memory keyspace.
#[derive(Debug, Default)]
pub struct Store {
    keyspace: Mutex<Keyspace>,
    changed: Notify,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Executes one request. Blocking pops wait here until they can pop or
    /// their timeout elapses.
    pub async fn dispatch(&self, args: &[Bytes]) -> Frame {
        let Some(name) = args.first() else {
            return Frame::err("ERR empty command");
        };
        let name = name.to_ascii_uppercase();
        trace!(command = %String::from_utf8_lossy(&name), args = args.len() - 1, "dispatch");

        let kind = match &name[..] {
            b"BLPOP" => PopKind::Head,
            b"BRPOP" => PopKind::Tail,
            b"BZPOPMIN" => PopKind::Min,
            b"BZPOPMAX" => PopKind::Max,
            _ => {
                let frame = self.execute(&name, args);
                // Waiters re-check on any command.
                self.changed.notify_waiters();
                return frame;
            }
        };
        self.blocking_pop(args, kind).await.unwrap_or_else(Frame::Error)
    }

    fn execute(&self, name: &[u8], args: &[Bytes]) -> Frame {
        let mut keyspace = self.keyspace.lock();
        let result = match name {
            b"PING" => ping(args),
            b"GET" => keyspace.get(args),
            b"SET" => keyspace.set(args),
            b"INCR" => keyspace.incr(args, false),
            b"INCRBY" => keyspace.incr(args, true),
            b"MGET" => keyspace.mget(args),
            b"DEL" => keyspace.del(args),
            b"EXISTS" => keyspace.exists(args),
            b"KEYS" => keyspace.keys(args),
            b"EXPIRE" => keyspace.expire(args, Duration::from_secs),
            b"PEXPIRE" => keyspace.expire(args, Duration::from_millis),
            b"TTL" => keyspace.ttl(args),
            b"HSET" => keyspace.hset(args),
            b"HGET" => keyspace.hget(args),
            b"HGETALL" => keyspace.hgetall(args),
            b"HDEL" => keyspace.hdel(args),
            b"HLEN" => keyspace.hlen(args),
            b"LPUSH" => keyspace.push(args, PopKind::Head),
            b"RPUSH" => keyspace.push(args, PopKind::Tail),
            b"LPOP" => keyspace.pop(args, PopKind::Head),
            b"RPOP" => keyspace.pop(args, PopKind::Tail),
            b"LRANGE" => keyspace.lrange(args),
            b"LTRIM" => keyspace.ltrim(args),
            b"LLEN" => keyspace.llen(args),
            b"ZADD" => keyspace.zadd(args),
            b"ZSCORE" => keyspace.zscore(args),
            b"ZRANGE" => keyspace.zrange(args, false),
            b"ZREVRANGE" => keyspace.zrange(args, true),
            b"ZRANGEBYSCORE" => keyspace.zrangebyscore(args, false),
            b"ZREVRANGEBYSCORE" => keyspace.zrangebyscore(args, true),
            b"ZRANK" => keyspace.zrank(args),
            b"ZINCRBY" => keyspace.zincrby(args),
            b"ZCARD" => keyspace.zcard(args),
            b"ZREM" => keyspace.zrem(args),
            b"ZREMRANGEBYLEX" => keyspace.zremrangebylex(args),
            b"ZREMRANGEBYRANK" => keyspace.zremrangebyrank(args),
            b"ZREMRANGEBYSCORE" => keyspace.zremrangebyscore(args),
            b"SCAN" => keyspace.scan(args),
            b"HSCAN" => keyspace.hscan(args),
            b"ZSCAN" => keyspace.zscan(args),
            _ => Err(format!(
                "ERR unknown command '{}'",
                String::from_utf8_lossy(&args[0])
            )),
        };
        result.unwrap_or_else(Frame::Error)
    }

    async fn blocking_pop(&self, args: &[Bytes], kind: PopKind) -> CmdResult {
        if args.len() < 3 {
            return Err(wrong_args(&args[0]));
        }
        let keys = &args[1..args.len() - 1];
        let timeout = parse_timeout(&args[args.len() - 1])?;
        let deadline = timeout.map(|timeout| tokio::time::Instant::now() + timeout);

        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let popped = self.keyspace.lock().try_pop(keys, kind)?;
            if let Some(frame) = popped {
                return Ok(frame);
            }
            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Ok(Frame::NullArray);
                    }
                }
                None => notified.await,
            }
        }
    }
}

#[derive(Debug, Default)]
struct Keyspace {
    entries: HashMap<Bytes, Entry>,
}

impl Keyspace {
    /// Live entry for `key`; expired entries are removed on the way.
    fn entry_mut(&mut self, key: &[u8]) -> Option<&mut Entry> {
        let now = Instant::now();
        if self.entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            self.entries.remove(key);
            return None;
        }
        self.entries.get_mut(key)
    }

    fn value_or_insert(&mut self, key: &Bytes, make: impl FnOnce() -> Value) -> &mut Value {
        self.entry_mut(key);
        &mut self
            .entries
            .entry(key.clone())
            .or_insert_with(|| Entry {
                value: make(),
                expires_at: None,
            })
            .value
    }

    fn remove_if_empty(&mut self, key: &[u8]) {
        if self.entries.get(key).is_some_and(|entry| entry.value.is_empty()) {
            self.entries.remove(key);
        }
    }

    fn hash(&mut self, key: &[u8]) -> Result<Option<&mut HashMap<Bytes, Bytes>>, String> {
        match self.entry_mut(key).map(|entry| &mut entry.value) {
            None => Ok(None),
            Some(Value::Hash(hash)) => Ok(Some(hash)),
            Some(_) => Err(WRONGTYPE.to_string()),
        }
    }

    fn list(&mut self, key: &[u8]) -> Result<Option<&mut VecDeque<Bytes>>, String> {
        match self.entry_mut(key).map(|entry| &mut entry.value) {
            None => Ok(None),
            Some(Value::List(list)) => Ok(Some(list)),
            Some(_) => Err(WRONGTYPE.to_string()),
        }
    }

    fn zset(&mut self, key: &[u8]) -> Result<Option<&mut HashMap<Bytes, f64>>, String> {
        match self.entry_mut(key).map(|entry| &mut entry.value) {
            None => Ok(None),
            Some(Value::ZSet(zset)) => Ok(Some(zset)),
            Some(_) => Err(WRONGTYPE.to_string()),
        }
    }

    fn zset_or_insert(&mut self, key: &Bytes) -> Result<&mut HashMap<Bytes, f64>, String> {
        match self.value_or_insert(key, || Value::ZSet(HashMap::new())) {
            Value::ZSet(zset) => Ok(zset),
            _ => Err(WRONGTYPE.to_string()),
        }
    }

    // ---- strings and keyspace -------------------------------------------

    fn get(&mut self, args: &[Bytes]) -> CmdResult {
        exact(args, 2)?;
        match self.entry_mut(&args[1]).map(|entry| &entry.value) {
            None => Ok(Frame::NullBulk),
            Some(Value::Str(value)) => Ok(Frame::Bulk(value.clone())),
            Some(_) => Err(WRONGTYPE.to_string()),
        }
    }

    fn set(&mut self, args: &[Bytes]) -> CmdResult {
        at_least(args, 3)?;
        let now = Instant::now();
        let (mut nx, mut xx, mut keep_ttl) = (false, false, false);
        let mut expires_at = None;
        let mut i = 3;
        while i < args.len() {
            let option = args[i].to_ascii_uppercase();
            match &option[..] {
                b"NX" => nx = true,
                b"XX" => xx = true,
                b"KEEPTTL" => keep_ttl = true,
                b"EX" | b"PX" | b"EXAT" | b"PXAT" => {
                    let raw = args.get(i + 1).ok_or(SYNTAX)?;
                    let amount = parse_i64(raw)?;
                    if amount <= 0 || expires_at.is_some() {
                        return Err("ERR invalid expire time in 'set' command".to_string());
                    }
                    let amount = amount as u64;
                    expires_at = Some(match &option[..] {
                        b"EX" => now + Duration::from_secs(amount),
                        b"PX" => now + Duration::from_millis(amount),
                        b"EXAT" => unix_deadline(Duration::from_secs(amount), now),
                        _ => unix_deadline(Duration::from_millis(amount), now),
                    });
                    i += 1;
                }
                _ => return Err(SYNTAX.to_string()),
            }
            i += 1;
        }
        if (nx && xx) || (keep_ttl && expires_at.is_some()) {
            return Err(SYNTAX.to_string());
        }

        let existing = self.entry_mut(&args[1]).map(|entry| entry.expires_at);
        if (nx && existing.is_some()) || (xx && existing.is_none()) {
            return Ok(Frame::NullBulk);
        }
        if keep_ttl {
            expires_at = existing.flatten();
        }
        self.entries.insert(
            args[1].clone(),
            Entry {
                value: Value::Str(args[2].clone()),
                expires_at,
            },
        );
        Ok(Frame::ok())
    }

    fn incr(&mut self, args: &[Bytes], by: bool) -> CmdResult {
        exact(args, if by { 3 } else { 2 })?;
        let delta = if by { parse_i64(&args[2])? } else { 1 };
        let current = match self.entry_mut(&args[1]).map(|entry| &entry.value) {
            None => 0,
            Some(Value::Str(value)) => parse_i64(value)?,
            Some(_) => return Err(WRONGTYPE.to_string()),
        };
        let next = current
            .checked_add(delta)
            .ok_or("ERR increment or decrement would overflow")?;
        let encoded = Bytes::from(next.to_string());
        match self.entry_mut(&args[1]) {
            Some(entry) => entry.value = Value::Str(encoded),
            None => {
                self.entries.insert(
                    args[1].clone(),
                    Entry {
                        value: Value::Str(encoded),
                        expires_at: None,
                    },
                );
            }
        }
        Ok(Frame::Integer(next))
    }

    fn mget(&mut self, args: &[Bytes]) -> CmdResult {
        at_least(args, 2)?;
        let values = args[1..]
            .iter()
            .map(|key| match self.entry_mut(key).map(|entry| &entry.value) {
                Some(Value::Str(value)) => Frame::Bulk(value.clone()),
                _ => Frame::NullBulk,
            })
            .collect();
        Ok(Frame::Array(values))
    }

    fn del(&mut self, args: &[Bytes]) -> CmdResult {
        at_least(args, 2)?;
        let mut removed = 0;
        for key in &args[1..] {
            if self.entry_mut(key).is_some() {
                self.entries.remove(&key[..]);
                removed += 1;
            }
        }
        Ok(Frame::Integer(removed))
    }

    fn exists(&mut self, args: &[Bytes]) -> CmdResult {
        at_least(args, 2)?;
        let found = args[1..].iter().filter(|key| self.entry_mut(key).is_some()).count();
        Ok(Frame::Integer(found as i64))
    }

    fn keys(&mut self, args: &[Bytes]) -> CmdResult {
        exact(args, 2)?;
        Ok(Frame::bulks(
            self.live_keys()
                .into_iter()
                .filter(|key| glob_match(&args[1], key)),
        ))
    }

    fn live_keys(&mut self) -> Vec<Bytes> {
        let now = Instant::now();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let mut keys: Vec<Bytes> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn expire(&mut self, args: &[Bytes], unit: fn(u64) -> Duration) -> CmdResult {
        exact(args, 3)?;
        let amount = parse_i64(&args[2])?;
        let Some(entry) = self.entry_mut(&args[1]) else {
            return Ok(Frame::Integer(0));
        };
        if amount <= 0 {
            self.entries.remove(&args[1][..]);
        } else {
            entry.expires_at = Some(Instant::now() + unit(amount as u64));
        }
        Ok(Frame::Integer(1))
    }

    fn ttl(&mut self, args: &[Bytes]) -> CmdResult {
        exact(args, 2)?;
        let ttl = match self.entry_mut(&args[1]) {
            None => -2,
            Some(Entry { expires_at: None, .. }) => -1,
            Some(Entry {
                expires_at: Some(deadline),
                ..
            }) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                ((remaining.as_millis() + 500) / 1000) as i64
            }
        };
        Ok(Frame::Integer(ttl))
    }

    // ---- hashes ---------------------------------------------------------

    fn hset(&mut self, args: &[Bytes]) -> CmdResult {
        if args.len() < 4 || args.len() % 2 != 0 {
            return Err(wrong_args(&args[0]));
        }
        let Value::Hash(hash) = self.value_or_insert(&args[1], || Value::Hash(HashMap::new())) else {
            return Err(WRONGTYPE.to_string());
        };
        let mut created = 0;
        for pair in args[2..].chunks(2) {
            if hash.insert(pair[0].clone(), pair[1].clone()).is_none() {
                created += 1;
            }
        }
        Ok(Frame::Integer(created))
    }

    fn hget(&mut self, args: &[Bytes]) -> CmdResult {
        exact(args, 3)?;
        let value = self.hash(&args[1])?.and_then(|hash| hash.get(&args[2][..]).cloned());
        Ok(Frame::optional(value))
    }

    fn hgetall(&mut self, args: &[Bytes]) -> CmdResult {
        exact(args, 2)?;
        let mut pairs: Vec<(Bytes, Bytes)> = self
            .hash(&args[1])?
            .map(|hash| hash.iter().map(|(f, v)| (f.clone(), v.clone())).collect())
            .unwrap_or_default();
        pairs.sort();
        Ok(Frame::bulks(pairs.into_iter().flat_map(|(f, v)| [f, v])))
    }

    fn hdel(&mut self, args: &[Bytes]) -> CmdResult {
        at_least(args, 3)?;
        let removed = match self.hash(&args[1])? {
            Some(hash) => args[2..].iter().filter(|field| hash.remove(&field[..]).is_some()).count(),
            None => 0,
        };
        self.remove_if_empty(&args[1]);
        Ok(Frame::Integer(removed as i64))
    }

    fn hlen(&mut self, args: &[Bytes]) -> CmdResult {
        exact(args, 2)?;
        Ok(Frame::Integer(self.hash(&args[1])?.map_or(0, |hash| hash.len()) as i64))
    }

    // ---- lists ----------------------------------------------------------

    fn push(&mut self, args: &[Bytes], end: PopKind) -> CmdResult {
        at_least(args, 3)?;
        let Value::List(list) = self.value_or_insert(&args[1], || Value::List(VecDeque::new())) else {
            return Err(WRONGTYPE.to_string());
        };
        for value in &args[2..] {
            match end {
                PopKind::Head => list.push_front(value.clone()),
                _ => list.push_back(value.clone()),
            }
        }
        Ok(Frame::Integer(list.len() as i64))
    }

    fn pop(&mut self, args: &[Bytes], end: PopKind) -> CmdResult {
        exact(args, 2)?;
        let value = self.list(&args[1])?.and_then(|list| match end {
            PopKind::Head => list.pop_front(),
            _ => list.pop_back(),
        });
        self.remove_if_empty(&args[1]);
        Ok(Frame::optional(value))
    }

    fn lrange(&mut self, args: &[Bytes]) -> CmdResult {
        exact(args, 4)?;
        let (start, stop) = (parse_i64(&args[2])?, parse_i64(&args[3])?);
        let Some(list) = self.list(&args[1])? else {
            return Ok(Frame::Array(Vec::new()));
        };
        Ok(match normalize_range(start, stop, list.len()) {
            Some((from, to)) => Frame::bulks(list.range(from..=to).cloned()),
            None => Frame::Array(Vec::new()),
        })
    }

    fn ltrim(&mut self, args: &[Bytes]) -> CmdResult {
        exact(args, 4)?;
        let (start, stop) = (parse_i64(&args[2])?, parse_i64(&args[3])?);
        if let Some(list) = self.list(&args[1])? {
            match normalize_range(start, stop, list.len()) {
                Some((from, to)) => {
                    list.truncate(to + 1);
                    list.drain(..from);
                }
                None => list.clear(),
            }
        }
        self.remove_if_empty(&args[1]);
        Ok(Frame::ok())
    }

    fn llen(&mut self, args: &[Bytes]) -> CmdResult {
        exact(args, 2)?;
        Ok(Frame::Integer(self.list(&args[1])?.map_or(0, |list| list.len()) as i64))
    }

    fn try_pop(&mut self, keys: &[Bytes], kind: PopKind) -> Result<Option<Frame>, String> {
        for key in keys {
            let frame = match kind {
                PopKind::Head | PopKind::Tail => {
                    let value = self.list(key)?.and_then(|list| match kind {
                        PopKind::Head => list.pop_front(),
                        _ => list.pop_back(),
                    });
                    value.map(|value| Frame::bulks([key.clone(), value]))
                }
                PopKind::Min | PopKind::Max => self.zset(key)?.and_then(|zset| {
                    let members = ordered(zset);
                    let (member, score) = match kind {
                        PopKind::Min => members.into_iter().next(),
                        _ => members.into_iter().next_back(),
                    }?;
                    zset.remove(&member);
                    Some(Frame::Array(vec![
                        Frame::Bulk(key.clone()),
                        Frame::Bulk(member),
                        Frame::bulk(format_score(score)),
                    ]))
                }),
            };
            if let Some(frame) = frame {
                self.remove_if_empty(key);
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }

    // ---- sorted sets ----------------------------------------------------

    fn zadd(&mut self, args: &[Bytes]) -> CmdResult {
        at_least(args, 4)?;
        let (mut nx, mut xx, mut ch) = (false, false, false);
        let mut i = 2;
        while i < args.len() {
            if eq_ignore_ascii_case(&args[i], b"NX") {
                nx = true;
            } else if eq_ignore_ascii_case(&args[i], b"XX") {
                xx = true;
            } else if eq_ignore_ascii_case(&args[i], b"CH") {
                ch = true;
            } else {
                break;
            }
            i += 1;
        }
        let rest = &args[i..];
        if rest.is_empty() || rest.len() % 2 != 0 {
            return Err(SYNTAX.to_string());
        }
        if nx && xx {
            return Err("ERR XX and NX options at the same time are not compatible".to_string());
        }
        let pairs = rest
            .chunks(2)
            .map(|pair| -> Result<(f64, Bytes), String> { Ok((parse_score(&pair[0])?, pair[1].clone())) })
            .collect::<Result<Vec<_>, String>>()?;

        let zset = self.zset_or_insert(&args[1])?;
        let (mut added, mut changed) = (0, 0);
        for (score, member) in pairs {
            match zset.get_mut(&member) {
                Some(_) if nx => {}
                Some(current) => {
                    if *current != score {
                        *current = score;
                        changed += 1;
                    }
                }
                None if xx => {}
                None => {
                    zset.insert(member, score);
                    added += 1;
                }
            }
        }
        self.remove_if_empty(&args[1]);
        Ok(Frame::Integer(if ch { added + changed } else { added }))
    }

    fn zscore(&mut self, args: &[Bytes]) -> CmdResult {
        exact(args, 3)?;
        let score = self.zset(&args[1])?.and_then(|zset| zset.get(&args[2][..]).copied());
        Ok(score.map_or(Frame::NullBulk, |score| Frame::bulk(format_score(score))))
    }

    fn zrange(&mut self, args: &[Bytes], reverse: bool) -> CmdResult {
        if args.len() != 4 && args.len() != 5 {
            return Err(wrong_args(&args[0]));
        }
        let with_scores = match args.get(4) {
            Some(flag) if eq_ignore_ascii_case(flag, b"WITHSCORES") => true,
            Some(_) => return Err(SYNTAX.to_string()),
            None => false,
        };
        let (start, stop) = (parse_i64(&args[2])?, parse_i64(&args[3])?);
        let mut members = self.zset(&args[1])?.map(|zset| ordered(zset)).unwrap_or_default();
        if reverse {
            members.reverse();
        }
        let selected = match normalize_range(start, stop, members.len()) {
            Some((from, to)) => &members[from..=to],
            None => &[][..],
        };
        Ok(scored_frame(selected, with_scores))
    }

    fn zrangebyscore(&mut self, args: &[Bytes], reverse: bool) -> CmdResult {
        at_least(args, 4)?;
        let (min, max) = if reverse {
            (parse_score_bound(&args[3])?, parse_score_bound(&args[2])?)
        } else {
            (parse_score_bound(&args[2])?, parse_score_bound(&args[3])?)
        };
        let (mut with_scores, mut offset, mut count) = (false, 0i64, -1i64);
        let mut i = 4;
        while i < args.len() {
            if eq_ignore_ascii_case(&args[i], b"WITHSCORES") {
                with_scores = true;
                i += 1;
            } else if eq_ignore_ascii_case(&args[i], b"LIMIT") && i + 2 < args.len() {
                offset = parse_i64(&args[i + 1])?;
                count = parse_i64(&args[i + 2])?;
                i += 3;
            } else {
                return Err(SYNTAX.to_string());
            }
        }

        let mut members: Vec<(Bytes, f64)> = self
            .zset(&args[1])?
            .map(|zset| ordered(zset))
            .unwrap_or_default()
            .into_iter()
            .filter(|(_, score)| min.admits_from_below(*score) && max.admits_from_above(*score))
            .collect();
        if reverse {
            members.reverse();
        }
        let members: Vec<(Bytes, f64)> = if offset < 0 {
            Vec::new()
        } else {
            let taken = members.into_iter().skip(offset as usize);
            if count < 0 {
                taken.collect()
            } else {
                taken.take(count as usize).collect()
            }
        };
        Ok(scored_frame(&members, with_scores))
    }

    fn zrank(&mut self, args: &[Bytes]) -> CmdResult {
        exact(args, 3)?;
        let rank = self.zset(&args[1])?.and_then(|zset| {
            ordered(zset)
                .iter()
                .position(|(member, _)| member[..] == args[2][..])
        });
        Ok(rank.map_or(Frame::NullBulk, |rank| Frame::Integer(rank as i64)))
    }

    fn zincrby(&mut self, args: &[Bytes]) -> CmdResult {
        exact(args, 4)?;
        let delta = parse_score(&args[2])?;
        let zset = self.zset_or_insert(&args[1])?;
        let next = zset.get(&args[3][..]).copied().unwrap_or(0.0) + delta;
        if next.is_nan() {
            self.remove_if_empty(&args[1]);
            return Err("ERR resulting score is not a number (NaN)".to_string());
        }
        zset.insert(args[3].clone(), next);
        Ok(Frame::bulk(format_score(next)))
    }

    fn zcard(&mut self, args: &[Bytes]) -> CmdResult {
        exact(args, 2)?;
        Ok(Frame::Integer(self.zset(&args[1])?.map_or(0, |zset| zset.len()) as i64))
    }

    fn zrem(&mut self, args: &[Bytes]) -> CmdResult {
        at_least(args, 3)?;
        let removed = match self.zset(&args[1])? {
            Some(zset) => args[2..].iter().filter(|member| zset.remove(&member[..]).is_some()).count(),
            None => 0,
        };
        self.remove_if_empty(&args[1]);
        Ok(Frame::Integer(removed as i64))
    }

    fn zremrangebylex(&mut self, args: &[Bytes]) -> CmdResult {
        exact(args, 4)?;
        let (min, max) = (parse_lex_bound(&args[2])?, parse_lex_bound(&args[3])?);
        self.zremove_where(&args[1], |member, _, _| min.admits_from_below(member) && max.admits_from_above(member))
    }

    fn zremrangebyrank(&mut self, args: &[Bytes]) -> CmdResult {
        exact(args, 4)?;
        let (start, stop) = (parse_i64(&args[2])?, parse_i64(&args[3])?);
        let len = self.zset(&args[1])?.map_or(0, |zset| zset.len());
        let Some((from, to)) = normalize_range(start, stop, len) else {
            return Ok(Frame::Integer(0));
        };
        self.zremove_where(&args[1], |_, _, rank| rank >= from && rank <= to)
    }

    fn zremrangebyscore(&mut self, args: &[Bytes]) -> CmdResult {
        exact(args, 4)?;
        let (min, max) = (parse_score_bound(&args[2])?, parse_score_bound(&args[3])?);
        self.zremove_where(&args[1], |_, score, _| {
            min.admits_from_below(score) && max.admits_from_above(score)
        })
    }

    fn zremove_where(&mut self, key: &Bytes, doomed: impl Fn(&[u8], f64, usize) -> bool) -> CmdResult {
        let removed = match self.zset(key)? {
            Some(zset) => {
                let victims: Vec<Bytes> = ordered(zset)
                    .into_iter()
                    .enumerate()
                    .filter(|(rank, (member, score))| doomed(member, *score, *rank))
                    .map(|(_, (member, _))| member)
                    .collect();
                for member in &victims {
                    zset.remove(member);
                }
                victims.len()
            }
            None => 0,
        };
        self.remove_if_empty(key);
        Ok(Frame::Integer(removed as i64))
    }

    // ---- scans ----------------------------------------------------------

    fn scan(&mut self, args: &[Bytes]) -> CmdResult {
        at_least(args, 2)?;
        let keys = self.live_keys();
        scan_page(&args[1], &args[2..], keys, |key| vec![key])
    }

    fn hscan(&mut self, args: &[Bytes]) -> CmdResult {
        at_least(args, 3)?;
        let mut pairs: Vec<(Bytes, Bytes)> = self
            .hash(&args[1])?
            .map(|hash| hash.iter().map(|(f, v)| (f.clone(), v.clone())).collect())
            .unwrap_or_default();
        pairs.sort();
        scan_page(&args[2], &args[3..], pairs, |(field, value)| vec![field, value])
    }

    fn zscan(&mut self, args: &[Bytes]) -> CmdResult {
        at_least(args, 3)?;
        let members = self.zset(&args[1])?.map(|zset| ordered(zset)).unwrap_or_default();
        scan_page(&args[2], &args[3..], members, |(member, score)| {
            vec![member, Bytes::from(format_score(score))]
        })
    }
}

/// Cursor = offset into a stable ordering; `MATCH` filters after paging,
/// so a page may come back empty with a non-zero cursor.
fn scan_page<T>(
    cursor: &[u8],
    options: &[Bytes],
    items: Vec<T>,
    flatten: impl Fn(T) -> Vec<Bytes>,
) -> CmdResult
where
    T: ScanName,
{
    let start = std::str::from_utf8(cursor)
        .ok()
        .and_then(|text| text.parse::<usize>().ok())
        .ok_or("ERR invalid cursor")?;
    let (mut pattern, mut count) = (None, DEFAULT_SCAN_COUNT);
    let mut i = 0;
    while i < options.len() {
        let value = options.get(i + 1).ok_or(SYNTAX)?;
        if eq_ignore_ascii_case(&options[i], b"MATCH") {
            pattern = Some(value.clone());
        } else if eq_ignore_ascii_case(&options[i], b"COUNT") {
            count = parse_i64(value)?.max(1) as usize;
        } else {
            return Err(SYNTAX.to_string());
        }
        i += 2;
    }

    let end = start.saturating_add(count).min(items.len());
    let next = if end >= items.len() { 0 } else { end };
    let page: Vec<Bytes> = items
        .into_iter()
        .skip(start)
        .take(end.saturating_sub(start))
        .filter(|item| pattern.as_ref().map_or(true, |p| glob_match(p, item.scan_name())))
        .flat_map(flatten)
        .collect();
    Ok(Frame::Array(vec![Frame::bulk(next.to_string()), Frame::bulks(page)]))
}

/// The part of a scanned element that `MATCH` applies to.
trait ScanName {
    fn scan_name(&self) -> &[u8];
}

impl ScanName for Bytes {
    fn scan_name(&self) -> &[u8] {
        self
    }
}

impl<V> ScanName for (Bytes, V) {
    fn scan_name(&self) -> &[u8] {
        &self.0
    }
}

fn ping(args: &[Bytes]) -> CmdResult {
    match args.len() {
        1 => Ok(Frame::Simple("PONG")),
        2 => Ok(Frame::Bulk(args[1].clone())),
        _ => Err(wrong_args(&args[0])),
    }
}

fn wrong_args(name: &[u8]) -> String {
    format!(
        "ERR wrong number of arguments for '{}' command",
        String::from_utf8_lossy(name).to_ascii_lowercase()
    )
}

fn exact(args: &[Bytes], len: usize) -> Result<(), String> {
    if args.len() != len {
        return Err(wrong_args(&args[0]));
    }
    Ok(())
}

fn at_least(args: &[Bytes], len: usize) -> Result<(), String> {
    if args.len() < len {
        return Err(wrong_args(&args[0]));
    }
    Ok(())
}

fn parse_i64(raw: &[u8]) -> Result<i64, String> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|text| text.parse::<i64>().ok())
        .ok_or_else(|| NOT_INTEGER.to_string())
}

fn parse_score(raw: &[u8]) -> Result<f64, String> {
    let text = std::str::from_utf8(raw).map_err(|_| NOT_FLOAT.to_string())?;
    let score = match text.to_ascii_lowercase().as_str() {
        "inf" | "+inf" | "infinity" | "+infinity" => f64::INFINITY,
        "-inf" | "-infinity" => f64::NEG_INFINITY,
        other => other.parse::<f64>().map_err(|_| NOT_FLOAT.to_string())?,
    };
    if score.is_nan() {
        return Err(NOT_FLOAT.to_string());
    }
    Ok(score)
}

fn parse_timeout(raw: &[u8]) -> Result<Option<Duration>, String> {
    let seconds = std::str::from_utf8(raw)
        .ok()
        .and_then(|text| text.parse::<f64>().ok())
        .filter(|seconds| seconds.is_finite())
        .ok_or("ERR timeout is not a float or out of range")?;
    if seconds < 0.0 {
        return Err("ERR timeout is negative".to_string());
    }
    Ok((seconds > 0.0).then(|| Duration::from_secs_f64(seconds)))
}

fn unix_deadline(since_epoch: Duration, now: Instant) -> Instant {
    let target = UNIX_EPOCH + since_epoch;
    match target.duration_since(SystemTime::now()) {
        Ok(remaining) => now + remaining,
        // Already in the past: expire on next access.
        Err(_) => now,
    }
}

/// Resolves negative indices and clamps to `len`; `None` selects nothing.
fn normalize_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// Members ordered by score, ties broken by member bytes.
fn ordered(zset: &HashMap<Bytes, f64>) -> Vec<(Bytes, f64)> {
    let mut members: Vec<(Bytes, f64)> = zset.iter().map(|(m, s)| (m.clone(), *s)).collect();
    members.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
    members
}

fn scored_frame(members: &[(Bytes, f64)], with_scores: bool) -> Frame {
    let mut items = Vec::with_capacity(members.len() * 2);
    for (member, score) in members {
        items.push(Frame::Bulk(member.clone()));
        if with_scores {
            items.push(Frame::bulk(format_score(*score)));
        }
    }
    Frame::Array(items)
}

/// Integral scores print without a fraction; infinities as `inf`/`-inf`.
pub fn format_score(score: f64) -> String {
    if score == f64::INFINITY {
        "inf".to_string()
    } else if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else if score.fract() == 0.0 && score.abs() < 1e17 {
        format!("{}", score as i64)
    } else {
        format!("{}", score)
    }
}

#[derive(Debug, Clone, Copy)]
struct ScoreEdge {
    value: f64,
    exclusive: bool,
}

impl ScoreEdge {
    fn admits_from_below(self, score: f64) -> bool {
        if self.exclusive {
            score > self.value
        } else {
            score >= self.value
        }
    }

    fn admits_from_above(self, score: f64) -> bool {
        if self.exclusive {
            score < self.value
        } else {
            score <= self.value
        }
    }
}

fn parse_score_bound(raw: &[u8]) -> Result<ScoreEdge, String> {
    let (exclusive, body) = match raw.split_first() {
        Some((&b'(', body)) => (true, body),
        _ => (false, raw),
    };
    let value = parse_score(body).map_err(|_| "ERR min or max is not a float".to_string())?;
    Ok(ScoreEdge { value, exclusive })
}

#[derive(Debug, Clone)]
enum LexEdge {
    Min,
    Max,
    Inclusive(Bytes),
    Exclusive(Bytes),
}

impl LexEdge {
    fn admits_from_below(&self, member: &[u8]) -> bool {
        match self {
            LexEdge::Min => true,
            LexEdge::Max => false,
            LexEdge::Inclusive(edge) => member >= &edge[..],
            LexEdge::Exclusive(edge) => member > &edge[..],
        }
    }

    fn admits_from_above(&self, member: &[u8]) -> bool {
        match self {
            LexEdge::Min => false,
            LexEdge::Max => true,
            LexEdge::Inclusive(edge) => member <= &edge[..],
            LexEdge::Exclusive(edge) => member < &edge[..],
        }
    }
}

fn parse_lex_bound(raw: &Bytes) -> Result<LexEdge, String> {
    match raw.first() {
        Some(&b'-') if raw.len() == 1 => Ok(LexEdge::Min),
        Some(&b'+') if raw.len() == 1 => Ok(LexEdge::Max),
        Some(&b'[') => Ok(LexEdge::Inclusive(raw.slice(1..))),
        Some(&b'(') => Ok(LexEdge::Exclusive(raw.slice(1..))),
        _ => Err("ERR min or max not valid string range item".to_string()),
    }
}

/// Glob matching as used by `KEYS` and `MATCH`: `*`, `?`, `[...]` classes
/// (with `^` negation and `a-z` ranges) and `\` escapes.
pub fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((&b'*', rest)) => (0..=text.len()).any(|skip| glob_match(rest, &text[skip..])),
        Some((&b'?', rest)) => !text.is_empty() && glob_match(rest, &text[1..]),
        Some((&b'\\', rest)) if !rest.is_empty() => {
            text.first() == Some(&rest[0]) && glob_match(&rest[1..], &text[1..])
        }
        Some((&b'[', rest)) => {
            let Some(close) = rest.iter().position(|&b| b == b']') else {
                return text.first() == Some(&b'[') && glob_match(rest, &text[1..]);
            };
            let Some((&ch, tail)) = text.split_first() else {
                return false;
            };
            let (negate, class) = match rest[..close].split_first() {
                Some((&b'^', class)) => (true, class),
                _ => (false, &rest[..close]),
            };
            class_match(class, ch) != negate && glob_match(&rest[close + 1..], tail)
        }
        Some((literal, rest)) => text.first() == Some(literal) && glob_match(rest, &text[1..]),
    }
}

fn class_match(class: &[u8], ch: u8) -> bool {
    let mut i = 0;
    while i < class.len() {
        if i + 2 < class.len() && class[i + 1] == b'-' {
            let (lo, hi) = (class[i].min(class[i + 2]), class[i].max(class[i + 2]));
            if (lo..=hi).contains(&ch) {
                return true;
            }
            i += 3;
        } else {
            if class[i] == ch {
                return true;
            }
            i += 1;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(parts: &[&str]) -> Vec<Bytes> {
        parts.iter().map(|part| Bytes::copy_from_slice(part.as_bytes())).collect()
    }

    async fn run(store: &Store, parts: &[&str]) -> Frame {
        store.dispatch(&cmd(parts)).await
    }

    #[test]
    fn glob_patterns() {
        assert!(glob_match(b"user:*", b"user:42"));
        assert!(glob_match(b"h?llo", b"hallo"));
        assert!(glob_match(b"h[ae]llo", b"hello"));
        assert!(!glob_match(b"h[^e]llo", b"hello"));
        assert!(glob_match(b"k[0-9]", b"k7"));
        assert!(glob_match(b"a\\*b", b"a*b"));
        assert!(!glob_match(b"a\\*b", b"axb"));
        assert!(glob_match(b"*", b""));
    }

    #[test]
    fn range_normalisation() {
        assert_eq!(normalize_range(0, -1, 3), Some((0, 2)));
        assert_eq!(normalize_range(-2, 10, 3), Some((1, 2)));
        assert_eq!(normalize_range(2, 1, 3), None);
        assert_eq!(normalize_range(5, 6, 3), None);
        assert_eq!(normalize_range(0, -1, 0), None);
    }

    #[test]
    fn score_formatting() {
        assert_eq!(format_score(1.0), "1");
        assert_eq!(format_score(-2.5), "-2.5");
        assert_eq!(format_score(f64::INFINITY), "inf");
        assert_eq!(format_score(f64::NEG_INFINITY), "-inf");
    }

    #[tokio::test]
    async fn set_conditions_and_wrongtype() {
        let store = Store::new();
        assert_eq!(run(&store, &["SET", "k", "v", "XX"]).await, Frame::NullBulk);
        assert_eq!(run(&store, &["SET", "k", "v", "NX"]).await, Frame::ok());
        assert_eq!(run(&store, &["SET", "k", "w", "NX"]).await, Frame::NullBulk);
        assert_eq!(run(&store, &["GET", "k"]).await, Frame::bulk("v"));
        assert_eq!(run(&store, &["LPUSH", "k", "x"]).await, Frame::err(WRONGTYPE));
    }

    #[tokio::test]
    async fn zadd_flags_and_reverse_ranges() {
        let store = Store::new();
        assert_eq!(run(&store, &["ZADD", "z", "1", "a", "2", "b", "3", "c"]).await, Frame::Integer(3));
        assert_eq!(run(&store, &["ZADD", "z", "XX", "CH", "5", "a", "9", "d"]).await, Frame::Integer(1));
        assert_eq!(
            run(&store, &["ZREVRANGEBYSCORE", "z", "+inf", "(2", "LIMIT", "0", "1"]).await,
            Frame::bulks([Bytes::from_static(b"a")])
        );
        assert_eq!(run(&store, &["ZCARD", "z"]).await, Frame::Integer(3));
    }

    #[tokio::test]
    async fn blocking_pop_times_out_with_null_array() {
        let store = Store::new();
        let frame = run(&store, &["BLPOP", "missing", "0.05"]).await;
        assert_eq!(frame, Frame::NullArray);
    }

    #[tokio::test]
    async fn scan_pages_cover_every_key() {
        let store = Store::new();
        for i in 0..25 {
            let key = format!("k{i}");
            run(&store, &["SET", key.as_str(), "v"]).await;
        }
        let mut cursor = "0".to_string();
        let mut seen = 0;
        loop {
            let Frame::Array(reply) = run(&store, &["SCAN", cursor.as_str(), "COUNT", "7"]).await else {
                panic!("scan reply is not an array");
            };
            let (Frame::Bulk(next), Frame::Array(keys)) = (&reply[0], &reply[1]) else {
                panic!("malformed scan reply");
            };
            seen += keys.len();
            cursor = String::from_utf8(next.to_vec()).unwrap();
            if cursor == "0" {
                break;
            }
        }
        assert_eq!(seen, 25);
    }
}

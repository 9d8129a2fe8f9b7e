//! In-memory Redis emulation for local runs and tests, including key expiration.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use regex::Regex;

use super::{Command, RedisInterface, Reply};
use crate::clock::{Clock, SystemClock};
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone)]
enum Value {
    Str(Vec<u8>),
    Set(HashSet<Vec<u8>>),
    List(Vec<Vec<u8>>),
    /// Field order is insertion order, like small Redis hashes.
    Hash(Vec<(String, Vec<u8>)>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<f64>,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
}

/// Emulates the Redis subset from [`Command`]; expiry is checked lazily against the clock.
pub struct RedisEmulation {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
}

impl Default for RedisEmulation {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl RedisEmulation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock,
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.state
            .lock()
            .entries
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Entry {
    fn is_expired(&self, now: f64) -> bool {
        matches!(self.expires_at, Some(t) if t <= now)
    }
}

impl State {
    fn live(&mut self, key: &str, now: f64) -> Option<&mut Entry> {
        if self.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn exists(&mut self, key: &str, now: f64) -> bool {
        self.live(key, now).is_some()
    }

    fn remove_if_empty(&mut self, key: &str) {
        let empty = match self.entries.get(key).map(|e| &e.value) {
            Some(Value::Set(s)) => s.is_empty(),
            Some(Value::List(l)) => l.is_empty(),
            Some(Value::Hash(h)) => h.is_empty(),
            _ => false,
        };
        if empty {
            self.entries.remove(key);
        }
    }

    fn set_mut(&mut self, key: &str, now: f64, create: bool) -> StoreResult<Option<&mut HashSet<Vec<u8>>>> {
        if create && !self.exists(key, now) {
            self.entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Set(HashSet::new()),
                    expires_at: None,
                },
            );
        }
        match self.live(key, now) {
            None => Ok(None),
            Some(Entry {
                value: Value::Set(s), ..
            }) => Ok(Some(s)),
            Some(_) => Err(StoreError::WrongType),
        }
    }

    fn list_mut(&mut self, key: &str, now: f64, create: bool) -> StoreResult<Option<&mut Vec<Vec<u8>>>> {
        if create && !self.exists(key, now) {
            self.entries.insert(
                key.to_string(),
                Entry {
                    value: Value::List(Vec::new()),
                    expires_at: None,
                },
            );
        }
        match self.live(key, now) {
            None => Ok(None),
            Some(Entry {
                value: Value::List(l), ..
            }) => Ok(Some(l)),
            Some(_) => Err(StoreError::WrongType),
        }
    }

    fn hash_mut(&mut self, key: &str, now: f64, create: bool) -> StoreResult<Option<&mut Vec<(String, Vec<u8>)>>> {
        if create && !self.exists(key, now) {
            self.entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Hash(Vec::new()),
                    expires_at: None,
                },
            );
        }
        match self.live(key, now) {
            None => Ok(None),
            Some(Entry {
                value: Value::Hash(h), ..
            }) => Ok(Some(h)),
            Some(_) => Err(StoreError::WrongType),
        }
    }

    fn apply(&mut self, command: Command, now: f64) -> StoreResult<Reply> {
        match command {
            Command::Set { key, value, ex } => {
                self.entries.insert(
                    key,
                    Entry {
                        value: Value::Str(value),
                        expires_at: ex.map(|d| now + d.as_secs_f64()),
                    },
                );
                Ok(Reply::Ok)
            }
            Command::Get { key } => match self.live(&key, now) {
                None => Ok(Reply::Nil),
                Some(Entry {
                    value: Value::Str(v), ..
                }) => Ok(Reply::Bulk(v.clone())),
                Some(_) => Err(StoreError::WrongType),
            },
            Command::Expire { key, ttl } => match self.live(&key, now) {
                None => Ok(Reply::Int(0)),
                Some(entry) => {
                    entry.expires_at = Some(now + ttl.as_secs_f64());
                    Ok(Reply::Int(1))
                }
            },
            Command::Persist { key } => match self.live(&key, now) {
                Some(entry) if entry.expires_at.is_some() => {
                    entry.expires_at = None;
                    Ok(Reply::Int(1))
                }
                _ => Ok(Reply::Int(0)),
            },
            Command::Del { keys } => {
                let mut deleted = 0;
                for key in keys {
                    if self.exists(&key, now) {
                        self.entries.remove(&key);
                        deleted += 1;
                    }
                }
                Ok(Reply::Int(deleted))
            }
            Command::Copy {
                source,
                destination,
                replace,
            } => {
                let Some(entry) = self.live(&source, now).cloned() else {
                    return Ok(Reply::Int(0));
                };
                if !replace && self.exists(&destination, now) {
                    return Ok(Reply::Int(0));
                }
                self.entries.insert(destination, entry);
                Ok(Reply::Int(1))
            }
            Command::Rename { source, destination } => {
                if !self.exists(&source, now) {
                    return Err(StoreError::Command("ERR no such key".to_string()));
                }
                if let Some(entry) = self.entries.remove(&source) {
                    self.entries.insert(destination, entry);
                }
                Ok(Reply::Ok)
            }
            Command::SAdd { key, members } => {
                let set = self.set_mut(&key, now, true)?.ok_or(StoreError::WrongType)?;
                let added = members.into_iter().filter(|m| set.insert(m.clone())).count();
                Ok(Reply::Int(added as i64))
            }
            Command::SRem { key, members } => {
                let removed = match self.set_mut(&key, now, false)? {
                    None => 0,
                    Some(set) => members.iter().filter(|m| set.remove(*m)).count(),
                };
                self.remove_if_empty(&key);
                Ok(Reply::Int(removed as i64))
            }
            Command::SMembers { key } => Ok(Reply::Array(
                self.set_mut(&key, now, false)?
                    .map(|s| s.iter().cloned().collect())
                    .unwrap_or_default(),
            )),
            Command::SIsMember { key, member } => Ok(Reply::Int(
                self.set_mut(&key, now, false)?
                    .is_some_and(|s| s.contains(&member)) as i64,
            )),
            Command::SPop { key, count } => {
                let popped: Vec<Vec<u8>> = match self.set_mut(&key, now, false)? {
                    None => {
                        return Ok(match count {
                            None => Reply::Nil,
                            Some(_) => Reply::Array(Vec::new()),
                        })
                    }
                    Some(set) => {
                        let members: Vec<Vec<u8>> = set.iter().cloned().collect();
                        let chosen: Vec<Vec<u8>> = members
                            .choose_multiple(&mut rand::thread_rng(), count.unwrap_or(1))
                            .cloned()
                            .collect();
                        for m in &chosen {
                            set.remove(m);
                        }
                        chosen
                    }
                };
                self.remove_if_empty(&key);
                Ok(match count {
                    None => popped.into_iter().next().map_or(Reply::Nil, Reply::Bulk),
                    Some(_) => Reply::Array(popped),
                })
            }
            Command::Incr { key } => match self.live(&key, now) {
                None => {
                    self.entries.insert(
                        key,
                        Entry {
                            value: Value::Str(b"1".to_vec()),
                            expires_at: None,
                        },
                    );
                    Ok(Reply::Int(1))
                }
                Some(Entry {
                    value: Value::Str(v), ..
                }) => {
                    let current: i64 = std::str::from_utf8(v)
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .ok_or_else(|| {
                            StoreError::Command("ERR value is not an integer or out of range".to_string())
                        })?;
                    let next = current + 1;
                    *v = next.to_string().into_bytes();
                    Ok(Reply::Int(next))
                }
                Some(_) => Err(StoreError::WrongType),
            },
            Command::RPush { key, values } => {
                let list = self.list_mut(&key, now, true)?.ok_or(StoreError::WrongType)?;
                list.extend(values);
                Ok(Reply::Int(list.len() as i64))
            }
            Command::RPop { key, count } => {
                let popped = match self.list_mut(&key, now, false)? {
                    None => None,
                    Some(list) => {
                        let n = count.unwrap_or(1).min(list.len());
                        let mut tail = list.split_off(list.len() - n);
                        tail.reverse();
                        Some(tail)
                    }
                };
                self.remove_if_empty(&key);
                Ok(match (popped, count) {
                    (None, _) => Reply::Nil,
                    (Some(items), None) => items.into_iter().next().map_or(Reply::Nil, Reply::Bulk),
                    (Some(items), Some(_)) => Reply::Array(items),
                })
            }
            Command::LRange { key, start, stop } => {
                let items = match self.list_mut(&key, now, false)? {
                    None => Vec::new(),
                    Some(list) => match normalize_range(list.len(), start, stop) {
                        Some((from, to)) => list[from..=to].to_vec(),
                        None => Vec::new(),
                    },
                };
                Ok(Reply::Array(items))
            }
            Command::LLen { key } => Ok(Reply::Int(
                self.list_mut(&key, now, false)?.map_or(0, |l| l.len() as i64),
            )),
            Command::LSet { key, index, value } => {
                let list = self
                    .list_mut(&key, now, false)?
                    .ok_or_else(|| StoreError::Command("ERR no such key".to_string()))?;
                let len = list.len() as i64;
                let idx = if index < 0 { len + index } else { index };
                if idx < 0 || idx >= len {
                    return Err(StoreError::Command("ERR index out of range".to_string()));
                }
                list[idx as usize] = value;
                Ok(Reply::Ok)
            }
            Command::LTrim { key, start, stop } => {
                if let Some(list) = self.list_mut(&key, now, false)? {
                    match normalize_range(list.len(), start, stop) {
                        Some((from, to)) => {
                            list.truncate(to + 1);
                            list.drain(..from);
                        }
                        None => list.clear(),
                    }
                }
                self.remove_if_empty(&key);
                Ok(Reply::Ok)
            }
            Command::Exists { keys } => {
                let count = keys.iter().filter(|k| self.exists(k, now)).count();
                Ok(Reply::Int(count as i64))
            }
            Command::Keys { pattern } => {
                let matcher = glob_to_regex(&pattern)?;
                self.entries.retain(|_, e| !e.is_expired(now));
                Ok(Reply::Array(
                    self.entries
                        .keys()
                        .filter(|k| matcher.is_match(k))
                        .map(|k| k.clone().into_bytes())
                        .collect(),
                ))
            }
            Command::HSet { key, field, value } => {
                let hash = self.hash_mut(&key, now, true)?.ok_or(StoreError::WrongType)?;
                match hash.iter_mut().find(|(f, _)| *f == field) {
                    Some((_, existing)) => {
                        *existing = value;
                        Ok(Reply::Int(0))
                    }
                    None => {
                        hash.push((field, value));
                        Ok(Reply::Int(1))
                    }
                }
            }
            Command::HGet { key, field } => Ok(self
                .hash_mut(&key, now, false)?
                .and_then(|h| h.iter().find(|(f, _)| *f == field).map(|(_, v)| v.clone()))
                .map_or(Reply::Nil, Reply::Bulk)),
            Command::HKeys { key } => Ok(Reply::Array(
                self.hash_mut(&key, now, false)?
                    .map(|h| h.iter().map(|(f, _)| f.clone().into_bytes()).collect())
                    .unwrap_or_default(),
            )),
            Command::HVals { key } => Ok(Reply::Array(
                self.hash_mut(&key, now, false)?
                    .map(|h| h.iter().map(|(_, v)| v.clone()).collect())
                    .unwrap_or_default(),
            )),
            Command::HLen { key } => Ok(Reply::Int(
                self.hash_mut(&key, now, false)?.map_or(0, |h| h.len() as i64),
            )),
            Command::HGetAll { key } => Ok(Reply::Pairs(
                self.hash_mut(&key, now, false)?
                    .map(|h| h.iter().map(|(f, v)| (f.clone().into_bytes(), v.clone())).collect())
                    .unwrap_or_default(),
            )),
            Command::HDel { key, fields } => {
                let removed = match self.hash_mut(&key, now, false)? {
                    None => 0,
                    Some(hash) => {
                        let before = hash.len();
                        hash.retain(|(f, _)| !fields.contains(f));
                        before - hash.len()
                    }
                };
                self.remove_if_empty(&key);
                Ok(Reply::Int(removed as i64))
            }
            Command::DbSize => {
                self.entries.retain(|_, e| !e.is_expired(now));
                Ok(Reply::Int(self.entries.len() as i64))
            }
            Command::FlushDb => {
                self.entries.clear();
                Ok(Reply::Ok)
            }
        }
    }
}

/// Redis LRANGE/LTRIM index normalization; `None` means an empty range.
fn normalize_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len || stop < 0 {
        None
    } else {
        Some((start as usize, stop as usize))
    }
}

/// Translates a Redis glob (`*`, `?`, `[...]`, `\x`) into an anchored regex.
fn glob_to_regex(pattern: &str) -> StoreResult<Regex> {
    let mut re = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '\\' => {
                if let Some(escaped) = chars.next() {
                    re.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            '[' => {
                re.push('[');
                if chars.peek() == Some(&'^') {
                    chars.next();
                    re.push('^');
                }
                for inner in chars.by_ref() {
                    if inner == ']' {
                        break;
                    }
                    if inner == '\\' || inner == '[' {
                        re.push('\\');
                    }
                    re.push(inner);
                }
                re.push(']');
            }
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| StoreError::Command(format!("invalid pattern {:?}: {}", pattern, e)))
}

#[async_trait]
impl RedisInterface for RedisEmulation {
    async fn execute(&self, command: Command) -> StoreResult<Reply> {
        let now = self.clock.now();
        self.state.lock().apply(command, now)
    }

    async fn execute_pipeline(&self, commands: Vec<Command>) -> StoreResult<Vec<Reply>> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        // Like EXEC: every queued command runs even if an earlier one fails.
        let results: Vec<StoreResult<Reply>> = commands.into_iter().map(|c| state.apply(c, now)).collect();
        results.into_iter().collect()
    }
}

//! List commands.
//!
//! Keys and values are binary; anything that is `AsRef<[u8]>` will do.
//! Absent values come back as `None`, never as an error.

use bytes::Bytes;

use crate::client::Client;
use crate::dispatch::{InsertOutcome, KeyValue};
use crate::error::{Error, Result};
use crate::pipeline::ValueConsumer;
use crate::resp::Command;

/// Where `linsert` places the new element relative to the pivot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition {
    Before,
    After,
}

impl InsertPosition {
    fn as_arg(self) -> &'static str {
        match self {
            InsertPosition::Before => "BEFORE",
            InsertPosition::After => "AFTER",
        }
    }
}

impl Client {
    /// Pop from the head of the first non-empty list among `keys`.
    ///
    /// Keys are checked in the order given. The server waits up to
    /// `timeout_secs` for an element (0 waits forever) and answers `None`
    /// if none arrived. The client's local deadline applies independently.
    pub async fn blpop<K: AsRef<[u8]>>(
        &self,
        keys: &[K],
        timeout_secs: u64,
    ) -> Result<Option<KeyValue>> {
        self.execute(blocking_pop("BLPOP", keys, timeout_secs)?).await
    }

    /// Like `blpop`, popping from the tail.
    pub async fn brpop<K: AsRef<[u8]>>(
        &self,
        keys: &[K],
        timeout_secs: u64,
    ) -> Result<Option<KeyValue>> {
        self.execute(blocking_pop("BRPOP", keys, timeout_secs)?).await
    }

    /// Move the tail of `source` to the head of `destination`, waiting up
    /// to `timeout_secs` for `source` to have an element.
    pub async fn brpoplpush<S, D>(
        &self,
        source: S,
        destination: D,
        timeout_secs: u64,
    ) -> Result<Option<Bytes>>
    where
        S: AsRef<[u8]>,
        D: AsRef<[u8]>,
    {
        let command = Command::new("BRPOPLPUSH")
            .arg(source)
            .arg(destination)
            .arg_int(timeout_arg(timeout_secs)?);
        self.execute(command).await
    }

    /// Element at `index`; negative indexes count from the tail.
    pub async fn lindex<K: AsRef<[u8]>>(&self, key: K, index: i64) -> Result<Option<Bytes>> {
        self.execute(Command::new("LINDEX").arg(key).arg_int(index))
            .await
    }

    /// Insert `value` before or after the first occurrence of `pivot`.
    pub async fn linsert<K, P, V>(
        &self,
        key: K,
        position: InsertPosition,
        pivot: P,
        value: V,
    ) -> Result<InsertOutcome>
    where
        K: AsRef<[u8]>,
        P: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let command = Command::new("LINSERT")
            .arg(key)
            .arg(position.as_arg())
            .arg(pivot)
            .arg(value);
        self.execute(command).await
    }

    pub async fn llen<K: AsRef<[u8]>>(&self, key: K) -> Result<i64> {
        self.execute(Command::new("LLEN").arg(key)).await
    }

    pub async fn lpop<K: AsRef<[u8]>>(&self, key: K) -> Result<Option<Bytes>> {
        self.execute(Command::new("LPOP").arg(key)).await
    }

    /// Prepend values in order; the last one ends up at the head.
    /// Returns the new length.
    pub async fn lpush<K, V>(&self, key: K, values: &[V]) -> Result<i64>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.execute(push("LPUSH", key, values)?).await
    }

    /// Prepend only if the list exists. Returns the length, 0 if it didn't.
    pub async fn lpushx<K, V>(&self, key: K, value: V) -> Result<i64>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.execute(Command::new("LPUSHX").arg(key).arg(value))
            .await
    }

    /// Elements `start..=stop`; negative indexes count from the tail.
    pub async fn lrange<K: AsRef<[u8]>>(&self, key: K, start: i64, stop: i64) -> Result<Vec<Bytes>> {
        self.execute(range(key, start, stop)).await
    }

    /// Like `lrange`, handing each element to `consumer` as it is decoded
    /// instead of collecting them. Returns the element count.
    pub async fn lrange_streaming<K, C>(
        &self,
        consumer: C,
        key: K,
        start: i64,
        stop: i64,
    ) -> Result<usize>
    where
        K: AsRef<[u8]>,
        C: ValueConsumer,
    {
        self.execute_streaming(range(key, start, stop), consumer)
            .await
    }

    /// Remove occurrences of `value`: the first `count` from the head if
    /// positive, from the tail if negative, all if 0. Returns how many.
    pub async fn lrem<K, V>(&self, key: K, count: i64, value: V) -> Result<i64>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.execute(Command::new("LREM").arg(key).arg_int(count).arg(value))
            .await
    }

    pub async fn lset<K, V>(&self, key: K, index: i64, value: V) -> Result<String>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.execute(Command::new("LSET").arg(key).arg_int(index).arg(value))
            .await
    }

    /// Keep only `start..=stop`.
    pub async fn ltrim<K: AsRef<[u8]>>(&self, key: K, start: i64, stop: i64) -> Result<String> {
        self.execute(Command::new("LTRIM").arg(key).arg_int(start).arg_int(stop))
            .await
    }

    pub async fn rpop<K: AsRef<[u8]>>(&self, key: K) -> Result<Option<Bytes>> {
        self.execute(Command::new("RPOP").arg(key)).await
    }

    pub async fn rpoplpush<S, D>(&self, source: S, destination: D) -> Result<Option<Bytes>>
    where
        S: AsRef<[u8]>,
        D: AsRef<[u8]>,
    {
        self.execute(Command::new("RPOPLPUSH").arg(source).arg(destination))
            .await
    }

    /// Append values in order. Returns the new length.
    pub async fn rpush<K, V>(&self, key: K, values: &[V]) -> Result<i64>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.execute(push("RPUSH", key, values)?).await
    }

    pub async fn rpushx<K, V>(&self, key: K, value: V) -> Result<i64>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.execute(Command::new("RPUSHX").arg(key).arg(value))
            .await
    }
}

fn blocking_pop<K: AsRef<[u8]>>(name: &str, keys: &[K], timeout_secs: u64) -> Result<Command> {
    if keys.is_empty() {
        return Err(Error::InvalidArgument(format!("{name} needs at least one key")));
    }
    Ok(Command::new(name)
        .args(keys)
        .arg_int(timeout_arg(timeout_secs)?))
}

fn timeout_arg(timeout_secs: u64) -> Result<i64> {
    i64::try_from(timeout_secs)
        .map_err(|_| Error::InvalidArgument(format!("timeout {timeout_secs}s out of range")))
}

fn push<K, V>(name: &str, key: K, values: &[V]) -> Result<Command>
where
    K: AsRef<[u8]>,
    V: AsRef<[u8]>,
{
    if values.is_empty() {
        return Err(Error::InvalidArgument(format!("{name} needs at least one value")));
    }
    Ok(Command::new(name).arg(key).args(values))
}

fn range<K: AsRef<[u8]>>(key: K, start: i64, stop: i64) -> Command {
    Command::new("LRANGE").arg(key).arg_int(start).arg_int(stop)
}

//! A representative slice of the per-Redis-command catalogue. Each
//! constructor is a thin, generic wrapper around [`cmd`]/[`Command`] — the
//! full catalogue (HDEL, ZADD, ...) is deliberately out of scope beyond this
//! sample; everything funnels through the same typed-command contract.

use crate::command::{cmd, Cmd, Command, ToRespArg};
use std::time::Duration;

pub fn get(key: impl ToRespArg) -> Command<Option<Vec<u8>>> {
    cmd("GET").arg(key).into_command()
}

pub fn set(key: impl ToRespArg, value: impl ToRespArg) -> Command<()> {
    cmd("SET").arg(key).arg(value).into_command()
}

pub fn del(keys: &[impl ToRespArg]) -> Command<i64> {
    let mut c = cmd("DEL");
    for k in keys {
        c = c.arg(k);
    }
    c.into_command()
}

pub fn ping() -> Command<String> {
    cmd("PING").into_command()
}

pub fn auth(password: impl ToRespArg) -> Command<()> {
    cmd("AUTH").arg(password).into_command()
}

pub fn select(db: i64) -> Command<()> {
    cmd("SELECT").arg(db).into_command()
}

pub fn client_setname(name: impl ToRespArg) -> Command<()> {
    cmd("CLIENT").arg("SETNAME").arg(name).into_command()
}

pub fn hset(key: impl ToRespArg, field: impl ToRespArg, value: impl ToRespArg) -> Command<i64> {
    cmd("HSET").arg(key).arg(field).arg(value).into_command()
}

pub fn hget(key: impl ToRespArg, field: impl ToRespArg) -> Command<Option<Vec<u8>>> {
    cmd("HGET").arg(key).arg(field).into_command()
}

pub fn hdel(key: impl ToRespArg, fields: &[impl ToRespArg]) -> Command<i64> {
    let mut c = cmd("HDEL").arg(key);
    for f in fields {
        c = c.arg(f);
    }
    c.into_command()
}

pub fn hgetall(key: impl ToRespArg) -> Command<std::collections::HashMap<String, String>> {
    cmd("HGETALL").arg(key).into_command()
}

/// Insertion policy for [`zadd`]'s `NX`/`XX` flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ZaddInserting {
    Any,
    OnlyNew,
    OnlyExisting,
}

/// Whether [`zadd`] reports the number of elements added or changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ZaddReturning {
    Added,
    Changed,
}

pub fn zadd(
    key: impl ToRespArg,
    members: &[(f64, impl ToRespArg)],
    inserting: ZaddInserting,
    returning: ZaddReturning,
) -> Command<i64> {
    let mut c = cmd("ZADD").arg(key);
    c = match inserting {
        ZaddInserting::Any => c,
        ZaddInserting::OnlyNew => c.arg("NX"),
        ZaddInserting::OnlyExisting => c.arg("XX"),
    };
    if returning == ZaddReturning::Changed {
        c = c.arg("CH");
    }
    for (score, member) in members {
        c = c.arg(*score).arg(member);
    }
    c.into_command()
}

/// A score-range bound for `ZRANGEBYSCORE`: plain decimal is inclusive,
/// `(score` is exclusive, and `-`/`+` are the infinity sentinels.
#[derive(Clone, Debug)]
pub enum ScoreBound {
    Inclusive(f64),
    Exclusive(f64),
    NegInf,
    PosInf,
}

impl ScoreBound {
    fn encode(&self) -> String {
        match self {
            ScoreBound::Inclusive(s) => s.to_string(),
            ScoreBound::Exclusive(s) => format!("({s}"),
            ScoreBound::NegInf => "-inf".to_string(),
            ScoreBound::PosInf => "+inf".to_string(),
        }
    }
}

impl ToRespArg for ScoreBound {
    fn write_args(&self, out: &mut Vec<Vec<u8>>) {
        out.push(self.encode().into_bytes());
    }
}

pub fn zrangebyscore(
    key: impl ToRespArg,
    min: ScoreBound,
    max: ScoreBound,
    with_scores: bool,
) -> Command<Vec<Vec<u8>>> {
    let mut c = cmd("ZRANGEBYSCORE").arg(key).arg(min).arg(max);
    if with_scores {
        c = c.arg("WITHSCORES");
    }
    c.into_command()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Aggregate {
    Sum,
    Min,
    Max,
}

impl Aggregate {
    fn as_str(self) -> &'static str {
        match self {
            Aggregate::Sum => "SUM",
            Aggregate::Min => "MIN",
            Aggregate::Max => "MAX",
        }
    }
}

pub fn zunionstore(
    destination: impl ToRespArg,
    keys: &[impl ToRespArg],
    weights: Option<&[f64]>,
    aggregate: Option<Aggregate>,
) -> Command<i64> {
    zstore("ZUNIONSTORE", destination, keys, weights, aggregate)
}

pub fn zinterstore(
    destination: impl ToRespArg,
    keys: &[impl ToRespArg],
    weights: Option<&[f64]>,
    aggregate: Option<Aggregate>,
) -> Command<i64> {
    zstore("ZINTERSTORE", destination, keys, weights, aggregate)
}

fn zstore(
    keyword: &'static str,
    destination: impl ToRespArg,
    keys: &[impl ToRespArg],
    weights: Option<&[f64]>,
    aggregate: Option<Aggregate>,
) -> Command<i64> {
    let mut c = cmd(keyword).arg(destination).arg(keys.len() as i64);
    for k in keys {
        c = c.arg(k);
    }
    if let Some(weights) = weights {
        c = c.arg("WEIGHTS");
        for w in weights {
            c = c.arg(*w);
        }
    }
    if let Some(agg) = aggregate {
        c = c.arg("AGGREGATE").arg(agg.as_str());
    }
    c.into_command()
}

/// One page of a `SCAN`-family cursor walk: the next cursor (0 ends the
/// iteration) and the keys returned in this page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPage {
    pub cursor: u64,
    pub items: Vec<Vec<u8>>,
}

impl crate::conversion::FromResp for ScanPage {
    fn from_resp(value: crate::resp::RespValue) -> Result<Self, crate::error::RedisError> {
        use crate::error::{ErrorKind, RedisError};
        use crate::resp::RespValue;
        match value {
            RespValue::Array(Some(mut items)) if items.len() == 2 => {
                let page = items.pop().unwrap();
                let cursor_value = items.pop().unwrap();
                let cursor_bytes = Vec::<u8>::from_resp(cursor_value)?;
                let cursor: u64 = std::str::from_utf8(&cursor_bytes)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| RedisError::new(ErrorKind::Protocol, "non-numeric SCAN cursor"))?;
                let items = Vec::<Vec<u8>>::from_resp(page)?;
                Ok(ScanPage { cursor, items })
            }
            other => Err(RedisError::new(
                ErrorKind::Protocol,
                format!("expected [cursor, page] pair, got {other:?}"),
            )),
        }
    }
}

pub fn scan(cursor: u64, match_glob: Option<&str>, count: Option<usize>) -> Command<ScanPage> {
    let mut c = cmd("SCAN").arg(cursor);
    if let Some(glob) = match_glob {
        c = c.arg("MATCH").arg(glob);
    }
    if let Some(count) = count {
        c = c.arg("COUNT").arg(count as i64);
    }
    c.into_command()
}

/// `0` means block indefinitely; encoded as whole seconds per the wire spec.
fn timeout_secs(timeout: Duration) -> i64 {
    timeout.as_secs() as i64
}

pub fn blpop(keys: &[impl ToRespArg], timeout: Duration) -> Command<Option<(Vec<u8>, Vec<u8>)>> {
    let mut c = cmd("BLPOP");
    for k in keys {
        c = c.arg(k);
    }
    c.arg(timeout_secs(timeout)).into_command_with(|v| {
        use crate::conversion::FromResp;
        use crate::resp::RespValue;
        match v {
            RespValue::Array(None) => Ok(None),
            RespValue::Array(Some(items)) if items.len() == 2 => {
                let mut it = items.into_iter();
                let key = Vec::<u8>::from_resp(it.next().unwrap())?;
                let value = Vec::<u8>::from_resp(it.next().unwrap())?;
                Ok(Some((key, value)))
            }
            other => Err(crate::error::RedisError::new(
                crate::error::ErrorKind::Protocol,
                format!("unexpected BLPOP reply shape: {other:?}"),
            )),
        }
    })
}

pub fn brpop(keys: &[impl ToRespArg], timeout: Duration) -> Command<Option<(Vec<u8>, Vec<u8>)>> {
    let mut c = cmd("BRPOP");
    for k in keys {
        c = c.arg(k);
    }
    c.arg(timeout_secs(timeout)).into_command_with(|v| {
        use crate::conversion::FromResp;
        use crate::resp::RespValue;
        match v {
            RespValue::Array(None) => Ok(None),
            RespValue::Array(Some(items)) if items.len() == 2 => {
                let mut it = items.into_iter();
                let key = Vec::<u8>::from_resp(it.next().unwrap())?;
                let value = Vec::<u8>::from_resp(it.next().unwrap())?;
                Ok(Some((key, value)))
            }
            other => Err(crate::error::RedisError::new(
                crate::error::ErrorKind::Protocol,
                format!("unexpected BRPOP reply shape: {other:?}"),
            )),
        }
    })
}

pub fn brpoplpush(
    source: impl ToRespArg,
    destination: impl ToRespArg,
    timeout: Duration,
) -> Command<Option<Vec<u8>>> {
    cmd("BRPOPLPUSH")
        .arg(source)
        .arg(destination)
        .arg(timeout_secs(timeout))
        .into_command()
}

pub fn bzpopmin(keys: &[impl ToRespArg], timeout: Duration) -> Command<Option<Vec<Vec<u8>>>> {
    let mut c = cmd("BZPOPMIN");
    for k in keys {
        c = c.arg(k);
    }
    c.arg(timeout_secs(timeout)).into_command()
}

pub fn bzpopmax(keys: &[impl ToRespArg], timeout: Duration) -> Command<Option<Vec<Vec<u8>>>> {
    let mut c = cmd("BZPOPMAX");
    for k in keys {
        c = c.arg(k);
    }
    c.arg(timeout_secs(timeout)).into_command()
}

/// Raw EVAL/EVALSHA are exposed as-is; whether to auto-retry EVALSHA with a
/// fallback EVAL on NOSCRIPT is left to the caller (see open question in the
/// design notes).
pub fn eval(script: impl ToRespArg, keys: &[impl ToRespArg], args: &[impl ToRespArg]) -> Command<crate::resp::RespValue> {
    let mut c = cmd("EVAL").arg(script).arg(keys.len() as i64);
    for k in keys {
        c = c.arg(k);
    }
    for a in args {
        c = c.arg(a);
    }
    c.into_command()
}

pub fn evalsha(
    sha1: impl ToRespArg,
    keys: &[impl ToRespArg],
    args: &[impl ToRespArg],
) -> Command<crate::resp::RespValue> {
    let mut c = cmd("EVALSHA").arg(sha1).arg(keys.len() as i64);
    for k in keys {
        c = c.arg(k);
    }
    for a in args {
        c = c.arg(a);
    }
    c.into_command()
}

/// Raw `Cmd` builders for the subscription control commands — their
/// confirmations are routed by the connection state machine, not a plain
/// mapper, so they stay untyped here.
pub fn subscribe_cmd(channels: &[impl ToRespArg]) -> Cmd {
    let mut c = cmd("SUBSCRIBE");
    for ch in channels {
        c = c.arg(ch);
    }
    c
}

pub fn psubscribe_cmd(patterns: &[impl ToRespArg]) -> Cmd {
    let mut c = cmd("PSUBSCRIBE");
    for p in patterns {
        c = c.arg(p);
    }
    c
}

pub fn unsubscribe_cmd(channels: &[impl ToRespArg]) -> Cmd {
    let mut c = cmd("UNSUBSCRIBE");
    for ch in channels {
        c = c.arg(ch);
    }
    c
}

pub fn punsubscribe_cmd(patterns: &[impl ToRespArg]) -> Cmd {
    let mut c = cmd("PUNSUBSCRIBE");
    for p in patterns {
        c = c.arg(p);
    }
    c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::approx_constant)]
    fn score_bounds_encode_per_spec() {
        assert_eq!(ScoreBound::Exclusive(3.14).encode(), "(3.14");
        assert_eq!(ScoreBound::Inclusive(3.14).encode(), "3.14");
        assert_eq!(ScoreBound::NegInf.encode(), "-inf");
    }
}

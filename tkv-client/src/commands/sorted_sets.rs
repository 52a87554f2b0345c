//! Sorted-set commands.
//!
//! Writes flatten `MemberScore` pairs into `score member` argument order;
//! reads request `WITHSCORES` and re-pair the flat reply. Result order is
//! exactly the store's (score, then member lexicographically) and is never
//! re-sorted here.

use tkv_common::{flatten_scored, LexBound, Limit, MemberScore, Score, ScoreBound, ZaddReturn, ZaddWrite};

use crate::command::Command;
use crate::commands::require_non_empty;
use crate::connection::Connection;
use crate::decode;
use crate::error::ClientError;
use crate::operation::Operation;

fn bound_is_nan(bound: ScoreBound) -> bool {
    match bound {
        ScoreBound::Inclusive(score) | ScoreBound::Exclusive(score) => score.is_nan(),
        ScoreBound::NegInfinity | ScoreBound::PosInfinity => false,
    }
}

fn with_limit(command: Command, limit: Option<Limit>) -> Command {
    match limit {
        Some(limit) => command.arg("LIMIT").arg_int(limit.offset).arg_int(limit.count),
        None => command,
    }
}

impl Connection {
    /// Adds or updates members.
    ///
    /// `write` selects `NX`/`XX`; `returns` selects whether the count is of
    /// added members or of added-or-updated members (`CH`).
    pub fn zadd(
        &self,
        key: impl AsRef<[u8]>,
        write: ZaddWrite,
        returns: ZaddReturn,
        members: &[MemberScore],
    ) -> Operation<i64> {
        if let Err(op) = require_non_empty(members, "zadd requires at least one member") {
            return op;
        }
        if members.iter().any(|pair| pair.score.is_nan()) {
            return Operation::failed(ClientError::InvalidArgument("zadd score is NaN"));
        }

        let command = Command::new("ZADD")
            .arg(key)
            .flag_if(write == ZaddWrite::IfExists, "XX")
            .flag_if(write == ZaddWrite::IfAbsent, "NX")
            .flag_if(returns == ZaddReturn::Changed, "CH")
            .args(flatten_scored(members));
        self.execute(command, decode::integer)
    }

    /// Score of a member, or `None` when the member or key is absent.
    pub fn zscore(&self, key: impl AsRef<[u8]>, member: impl AsRef<[u8]>) -> Operation<Option<Score>> {
        self.execute(Command::new("ZSCORE").arg(key).arg(member), decode::optional_score)
    }

    /// Members by rank, ascending, with scores.
    pub fn zrange(&self, key: impl AsRef<[u8]>, start: i64, stop: i64) -> Operation<Vec<MemberScore>> {
        let command = Command::new("ZRANGE")
            .arg(key)
            .arg_int(start)
            .arg_int(stop)
            .arg("WITHSCORES");
        self.execute(command, decode::member_scores)
    }

    /// Members by rank, descending, with scores.
    pub fn zrevrange(&self, key: impl AsRef<[u8]>, start: i64, stop: i64) -> Operation<Vec<MemberScore>> {
        let command = Command::new("ZREVRANGE")
            .arg(key)
            .arg_int(start)
            .arg_int(stop)
            .arg("WITHSCORES");
        self.execute(command, decode::member_scores)
    }

    /// Members with `min <= score <= max` (per endpoint flags), ascending.
    pub fn zrangebyscore(
        &self,
        key: impl AsRef<[u8]>,
        min: ScoreBound,
        max: ScoreBound,
        limit: Option<Limit>,
    ) -> Operation<Vec<MemberScore>> {
        if bound_is_nan(min) || bound_is_nan(max) {
            return Operation::failed(ClientError::InvalidArgument("score bound is NaN"));
        }
        let command = Command::new("ZRANGEBYSCORE")
            .arg(key)
            .arg(min.to_wire())
            .arg(max.to_wire())
            .arg("WITHSCORES");
        self.execute(with_limit(command, limit), decode::member_scores)
    }

    /// Members with `min <= score <= max`, descending.
    ///
    /// Takes the interval in the same order as `zrangebyscore`; the request
    /// carries `max` before `min` as the store expects.
    pub fn zrevrangebyscore(
        &self,
        key: impl AsRef<[u8]>,
        min: ScoreBound,
        max: ScoreBound,
        limit: Option<Limit>,
    ) -> Operation<Vec<MemberScore>> {
        if bound_is_nan(min) || bound_is_nan(max) {
            return Operation::failed(ClientError::InvalidArgument("score bound is NaN"));
        }
        let command = Command::new("ZREVRANGEBYSCORE")
            .arg(key)
            .arg(max.to_wire())
            .arg(min.to_wire())
            .arg("WITHSCORES");
        self.execute(with_limit(command, limit), decode::member_scores)
    }

    /// Zero-based ascending rank, or `None` when the member is absent.
    pub fn zrank(&self, key: impl AsRef<[u8]>, member: impl AsRef<[u8]>) -> Operation<Option<i64>> {
        self.execute(Command::new("ZRANK").arg(key).arg(member), decode::optional_integer)
    }

    /// Adds `delta` to a member's score (creating it at 0) and returns the
    /// new score. Infinite scores stay infinite, per the store.
    pub fn zincrby(&self, key: impl AsRef<[u8]>, delta: Score, member: impl AsRef<[u8]>) -> Operation<Score> {
        if delta.is_nan() {
            return Operation::failed(ClientError::InvalidArgument("zincrby delta is NaN"));
        }
        self.execute(
            Command::new("ZINCRBY").arg(key).arg(delta.to_wire()).arg(member),
            decode::score,
        )
    }

    /// Number of members.
    pub fn zcard(&self, key: impl AsRef<[u8]>) -> Operation<i64> {
        self.execute(Command::new("ZCARD").arg(key), decode::integer)
    }

    /// Removes members; resolves to the number actually removed.
    pub fn zrem<M: AsRef<[u8]>>(&self, key: impl AsRef<[u8]>, members: &[M]) -> Operation<i64> {
        if let Err(op) = require_non_empty(members, "zrem requires at least one member") {
            return op;
        }
        self.execute(Command::new("ZREM").arg(key).args(members), decode::integer)
    }

    /// Removes members in a lexicographic interval (all scores equal).
    pub fn zremrangebylex(&self, key: impl AsRef<[u8]>, min: &LexBound, max: &LexBound) -> Operation<i64> {
        self.execute(
            Command::new("ZREMRANGEBYLEX").arg(key).arg(min.to_wire()).arg(max.to_wire()),
            decode::integer,
        )
    }

    /// Removes members by rank interval.
    pub fn zremrangebyrank(&self, key: impl AsRef<[u8]>, start: i64, stop: i64) -> Operation<i64> {
        self.execute(
            Command::new("ZREMRANGEBYRANK").arg(key).arg_int(start).arg_int(stop),
            decode::integer,
        )
    }

    /// Removes members by score interval.
    pub fn zremrangebyscore(&self, key: impl AsRef<[u8]>, min: ScoreBound, max: ScoreBound) -> Operation<i64> {
        if bound_is_nan(min) || bound_is_nan(max) {
            return Operation::failed(ClientError::InvalidArgument("score bound is NaN"));
        }
        self.execute(
            Command::new("ZREMRANGEBYSCORE").arg(key).arg(min.to_wire()).arg(max.to_wire()),
            decode::integer,
        )
    }
}

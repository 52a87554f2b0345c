use std::collections::HashSet;
use std::time::{Duration, Instant};

use anyhow::Result;
use bytes::Bytes;
use futures::StreamExt;

use tkv_client::{
    to_bytes, to_text, BlockTimeout, ClientConfig, ClientError, Connection, Encoding, Expire, FieldValue,
    KeyMemberScore, KeyValue, LexBound, Limit, MemberScore, ScanOptions, Score, ScoreBound, SetCondition, SetOptions,
    Ttl, ZaddReturn, ZaddWrite,
};
use tkv_testkit::{serve_stream, StoreServer};

async fn connect() -> Result<(StoreServer, Connection)> {
    tkv_testkit::init_tracing();
    let server = StoreServer::spawn().await?;
    let conn = Connection::connect(&ClientConfig::new(server.addr())).await?;
    Ok((server, conn))
}

fn b(data: &'static str) -> Bytes {
    Bytes::from_static(data.as_bytes())
}

#[tokio::test]
async fn set_then_get_returns_value() -> Result<()> {
    let (_server, conn) = connect().await?;

    assert!(conn.set("greeting", "hello", SetOptions::default()).await?);
    assert_eq!(conn.get("greeting").await?, Some(b("hello")));
    assert_eq!(conn.get("missing").await?, None);
    Ok(())
}

#[tokio::test]
async fn text_values_round_trip_through_an_encoding() -> Result<()> {
    let (_server, conn) = connect().await?;

    let encoded = to_bytes("café", Encoding::Latin1)?;
    assert_eq!(encoded.len(), 4);
    conn.set("word", &encoded, SetOptions::default()).await?;

    let text = conn
        .get("word")
        .and_then(|value| match value {
            Some(raw) => Ok(Some(to_text(&raw, Encoding::Latin1)?)),
            None => Ok(None),
        })
        .await?;
    assert_eq!(text.as_deref(), Some("café"));
    Ok(())
}

#[tokio::test]
async fn incr_counts_from_zero() -> Result<()> {
    let (_server, conn) = connect().await?;

    assert_eq!(conn.incr("counter").await?, 1);
    assert_eq!(conn.incr("counter").await?, 2);
    assert_eq!(conn.incr("counter").await?, 3);
    assert_eq!(conn.incr_by("counter", -5).await?, -2);

    conn.set("text", "abc", SetOptions::default()).await?;
    let err = conn.incr("text").await.unwrap_err();
    assert_eq!(err.as_store().map(|e| e.kind()), Some(&b"ERR"[..]));
    Ok(())
}

#[tokio::test]
async fn expiring_key_disappears() -> Result<()> {
    let (_server, conn) = connect().await?;

    conn.set("session", "token", SetOptions::expire(Expire::Seconds(1))).await?;
    assert_eq!(conn.get("session").await?, Some(b("token")));
    match conn.ttl("session").await? {
        Ttl::ExpiresIn(left) => assert!(left <= Duration::from_secs(1)),
        other => panic!("unexpected ttl {other:?}"),
    }

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(conn.get("session").await?, None);
    assert_eq!(conn.ttl("session").await?, Ttl::Missing);
    Ok(())
}

#[tokio::test]
async fn set_conditions_report_unmet_as_false() -> Result<()> {
    let (_server, conn) = connect().await?;

    assert!(!conn.set("k", "v0", SetOptions::condition(SetCondition::IfExists)).await?);
    assert_eq!(conn.get("k").await?, None);

    assert!(conn.set("k", "v1", SetOptions::condition(SetCondition::IfAbsent)).await?);
    assert!(!conn.set("k", "v2", SetOptions::condition(SetCondition::IfAbsent)).await?);
    assert!(conn.set("k", "v3", SetOptions::condition(SetCondition::IfExists)).await?);
    assert_eq!(conn.get("k").await?, Some(b("v3")));
    Ok(())
}

#[tokio::test]
async fn keyspace_commands() -> Result<()> {
    let (_server, conn) = connect().await?;

    conn.set("a", "1", SetOptions::default()).await?;
    conn.set("b", "2", SetOptions::default()).await?;
    assert_eq!(conn.exists(&["a", "b", "c", "a"]).await?, 3);
    assert_eq!(conn.mget(&["a", "nope", "b"]).await?, vec![Some(b("1")), None, Some(b("2"))]);

    let mut keys = conn.keys("*").await?;
    keys.sort();
    assert_eq!(keys, vec![b("a"), b("b")]);

    assert_eq!(conn.ttl("a").await?, Ttl::NoExpiry);
    assert!(conn.expire("a", Duration::from_secs(30)).await?);
    assert!(!conn.expire("zzz", Duration::from_secs(30)).await?);
    assert!(matches!(conn.ttl("a").await?, Ttl::ExpiresIn(_)));

    conn.del(&["a", "b"]).await?;
    assert_eq!(conn.exists(&["a", "b"]).await?, 0);

    assert_eq!(conn.ping(None).await?, b("PONG"));
    assert_eq!(conn.ping(Some(&b"echo"[..])).await?, b("echo"));
    Ok(())
}

#[tokio::test]
async fn hset_reports_created_then_overwritten() -> Result<()> {
    let (_server, conn) = connect().await?;

    assert_eq!(conn.hset("user:1", "name", "ada").await?, 1);
    assert_eq!(conn.hset("user:1", "name", "ada").await?, 0);
    assert_eq!(conn.hset("user:1", "lang", "en").await?, 1);

    assert_eq!(conn.hget("user:1", "name").await?, Some(b("ada")));
    assert_eq!(conn.hget("user:1", "age").await?, None);
    assert_eq!(conn.hlen("user:1").await?, 2);

    let mut all = conn.hgetall("user:1").await?;
    all.sort_by(|l, r| l.field.cmp(&r.field));
    assert_eq!(
        all,
        vec![
            FieldValue { field: b("lang"), value: b("en") },
            FieldValue { field: b("name"), value: b("ada") },
        ]
    );

    assert_eq!(conn.hdel("user:1", &["lang", "missing"]).await?, 1);
    assert_eq!(conn.hlen("user:1").await?, 1);
    Ok(())
}

#[tokio::test]
async fn list_push_pop_range_trim() -> Result<()> {
    let (_server, conn) = connect().await?;

    conn.rpush("jobs", "b").await?;
    conn.rpush("jobs", "c").await?;
    assert_eq!(conn.lpush("jobs", "a").await?, 3);
    assert_eq!(conn.lrange("jobs", 0, -1).await?, vec![b("a"), b("b"), b("c")]);

    conn.ltrim("jobs", 1, -1).await?;
    assert_eq!(conn.llen("jobs").await?, 2);
    assert_eq!(conn.lpop("jobs").await?, Some(b("b")));
    assert_eq!(conn.rpop("jobs").await?, Some(b("c")));
    assert_eq!(conn.rpop("jobs").await?, None);

    conn.rpush("gone", "x").await?;
    conn.ltrim("gone", 5, 1).await?;
    assert_eq!(conn.llen("gone").await?, 0);
    Ok(())
}

#[tokio::test]
async fn zadd_then_zrange_orders_by_score() -> Result<()> {
    let (_server, conn) = connect().await?;

    let members = [MemberScore::new("c", 3), MemberScore::new("a", 1), MemberScore::new("b", 2.5)];
    assert_eq!(conn.zadd("board", ZaddWrite::Always, ZaddReturn::Added, &members).await?, 3);

    assert_eq!(
        conn.zrange("board", 0, -1).await?,
        vec![MemberScore::new("a", 1), MemberScore::new("b", 2.5), MemberScore::new("c", 3)]
    );
    assert_eq!(
        conn.zrevrange("board", 0, 0).await?,
        vec![MemberScore::new("c", 3)]
    );
    assert_eq!(conn.zrank("board", "b").await?, Some(1));
    assert_eq!(conn.zrank("board", "zz").await?, None);
    assert_eq!(conn.zscore("board", "b").await?, Some(Score::new(2.5)));
    assert_eq!(conn.zcard("board").await?, 3);
    Ok(())
}

#[tokio::test]
async fn zadd_xx_ch_counts_only_updates() -> Result<()> {
    let (_server, conn) = connect().await?;

    let seed = [MemberScore::new("a", 1), MemberScore::new("b", 2)];
    conn.zadd("z", ZaddWrite::Always, ZaddReturn::Added, &seed).await?;

    let update = [MemberScore::new("a", 10), MemberScore::new("b", 2), MemberScore::new("new", 5)];
    assert_eq!(conn.zadd("z", ZaddWrite::IfExists, ZaddReturn::Changed, &update).await?, 1);
    assert_eq!(conn.zscore("z", "new").await?, None);
    assert_eq!(conn.zscore("z", "a").await?, Some(Score::from(10)));

    let insert = [MemberScore::new("a", 99), MemberScore::new("c", 3)];
    assert_eq!(conn.zadd("z", ZaddWrite::IfAbsent, ZaddReturn::Added, &insert).await?, 1);
    assert_eq!(conn.zscore("z", "a").await?, Some(Score::from(10)));
    Ok(())
}

#[tokio::test]
async fn zrangebyscore_with_infinite_bounds_and_limit() -> Result<()> {
    let (_server, conn) = connect().await?;

    let members = [
        MemberScore::new("a", 1),
        MemberScore::new("b", 2),
        MemberScore::new("c", 3),
        MemberScore::new("d", 4),
    ];
    conn.zadd("s", ZaddWrite::Always, ZaddReturn::Added, &members).await?;

    let page = conn
        .zrangebyscore(
            "s",
            ScoreBound::NegInfinity,
            ScoreBound::PosInfinity,
            Some(Limit { offset: 1, count: 2 }),
        )
        .await?;
    assert_eq!(page, vec![MemberScore::new("b", 2), MemberScore::new("c", 3)]);

    let first = Some(Limit { offset: 0, count: 1 });
    let lowest = conn
        .zrangebyscore("s", ScoreBound::NegInfinity, ScoreBound::PosInfinity, first)
        .await?;
    assert_eq!(lowest, vec![MemberScore::new("a", 1)]);
    let highest = conn
        .zrevrangebyscore("s", ScoreBound::NegInfinity, ScoreBound::PosInfinity, first)
        .await?;
    assert_eq!(highest, vec![MemberScore::new("d", 4)]);

    let reversed = conn
        .zrevrangebyscore("s", ScoreBound::Exclusive(Score::from(1)), ScoreBound::PosInfinity, None)
        .await?;
    assert_eq!(
        reversed,
        vec![MemberScore::new("d", 4), MemberScore::new("c", 3), MemberScore::new("b", 2)]
    );

    let inclusive = conn
        .zrangebyscore("s", ScoreBound::Inclusive(Score::from(2)), ScoreBound::Inclusive(Score::from(3)), None)
        .await?;
    assert_eq!(inclusive.len(), 2);
    Ok(())
}

#[tokio::test]
async fn zincrby_keeps_infinity() -> Result<()> {
    let (_server, conn) = connect().await?;

    assert_eq!(conn.zincrby("z", Score::from(2), "m").await?, Score::from(2));
    assert_eq!(conn.zincrby("z", Score::new(0.5), "m").await?, Score::new(2.5));
    assert_eq!(conn.zincrby("z", Score::INFINITY, "m").await?, Score::INFINITY);
    assert_eq!(conn.zincrby("z", Score::from(1), "m").await?, Score::INFINITY);

    let err = conn.zincrby("z", Score::NEG_INFINITY, "m").await.unwrap_err();
    assert!(err.as_store().is_some());
    Ok(())
}

#[tokio::test]
async fn zrem_and_range_removals() -> Result<()> {
    let (_server, conn) = connect().await?;

    let same = ["a", "b", "c", "d", "e"].map(|m| MemberScore::new(m, 0));
    conn.zadd("lex", ZaddWrite::Always, ZaddReturn::Added, &same).await?;
    let removed = conn
        .zremrangebylex("lex", &LexBound::Inclusive(b("b")), &LexBound::Exclusive(b("d")))
        .await?;
    assert_eq!(removed, 2);
    assert_eq!(conn.zremrangebylex("lex", &LexBound::Min, &LexBound::Max).await?, 3);
    assert_eq!(conn.zcard("lex").await?, 0);

    let ranked = [MemberScore::new("x", 1), MemberScore::new("y", 2), MemberScore::new("z", 3)];
    conn.zadd("r", ZaddWrite::Always, ZaddReturn::Added, &ranked).await?;
    assert_eq!(conn.zrem("r", &["x", "nope"]).await?, 1);
    assert_eq!(conn.zremrangebyrank("r", 0, 0).await?, 1);
    assert_eq!(
        conn.zremrangebyscore("r", ScoreBound::NegInfinity, ScoreBound::Inclusive(Score::from(3)))
            .await?,
        1
    );
    assert_eq!(conn.zcard("r").await?, 0);
    Ok(())
}

#[tokio::test]
async fn blpop_times_out_after_about_a_second() -> Result<()> {
    let (_server, conn) = connect().await?;

    let started = Instant::now();
    let popped = conn.blpop(&["empty"], BlockTimeout::seconds(1).unwrap()).await?;
    let waited = started.elapsed();

    assert_eq!(popped, None);
    assert!(waited >= Duration::from_millis(900), "returned after {waited:?}");
    assert!(waited < Duration::from_secs(3), "returned after {waited:?}");
    Ok(())
}

#[tokio::test]
async fn blpop_reports_the_list_that_yielded() -> Result<()> {
    let (server, waiter) = connect().await?;
    let pusher = Connection::connect(&ClientConfig::new(server.addr())).await?;

    let pop = waiter.blpop(&["first", "second"], BlockTimeout::Indefinite);
    tokio::time::sleep(Duration::from_millis(50)).await;
    pusher.rpush("second", "job").await?;

    let popped = tokio::time::timeout(Duration::from_secs(2), pop).await??;
    assert_eq!(popped, Some(KeyValue { key: b("second"), value: b("job") }));
    Ok(())
}

#[tokio::test]
async fn blocking_pops_on_one_connection_wait_independently() -> Result<()> {
    let (server, conn) = connect().await?;
    let pusher = Connection::connect(&ClientConfig::new(server.addr())).await?;

    let forever = conn.blpop(&["a"], BlockTimeout::Indefinite);

    let started = Instant::now();
    let short = conn.blpop(&["b"], BlockTimeout::seconds(1).unwrap());
    assert_eq!(tokio::time::timeout(Duration::from_secs(3), short).await??, None);
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(900), "returned after {waited:?}");

    let fed = conn.blpop(&["c"], BlockTimeout::seconds(5).unwrap());
    tokio::time::sleep(Duration::from_millis(100)).await;
    pusher.rpush("c", "job").await?;
    assert_eq!(
        tokio::time::timeout(Duration::from_secs(2), fed).await??,
        Some(KeyValue { key: b("c"), value: b("job") })
    );

    assert_eq!(conn.ping(None).await?, b("PONG"));
    pusher.rpush("a", "late").await?;
    assert_eq!(
        tokio::time::timeout(Duration::from_secs(2), forever).await??,
        Some(KeyValue { key: b("a"), value: b("late") })
    );
    Ok(())
}

#[tokio::test]
async fn brpop_takes_from_the_tail() -> Result<()> {
    let (_server, conn) = connect().await?;

    conn.rpush("q", "1").await?;
    conn.rpush("q", "2").await?;
    let popped = conn.brpop(&["q"], BlockTimeout::seconds(1).unwrap()).await?;
    assert_eq!(popped, Some(KeyValue { key: b("q"), value: b("2") }));
    Ok(())
}

#[tokio::test]
async fn bzpop_min_and_max() -> Result<()> {
    let (_server, conn) = connect().await?;

    let members = [MemberScore::new("low", -1), MemberScore::new("high", 7)];
    conn.zadd("prio", ZaddWrite::Always, ZaddReturn::Added, &members).await?;

    let timeout = BlockTimeout::seconds(1).unwrap();
    assert_eq!(
        conn.bzpopmin(&["none", "prio"], timeout).await?,
        Some(KeyMemberScore { key: b("prio"), member: b("low"), score: Score::from(-1) })
    );
    assert_eq!(
        conn.bzpopmax(&["prio"], timeout).await?,
        Some(KeyMemberScore { key: b("prio"), member: b("high"), score: Score::from(7) })
    );
    Ok(())
}

#[tokio::test]
async fn scan_union_covers_the_keyspace() -> Result<()> {
    let (_server, conn) = connect().await?;

    let mut expected = HashSet::new();
    for i in 0..30 {
        let key = format!("scan:{i}");
        conn.set(&key, "v", SetOptions::default()).await?;
        expected.insert(Bytes::from(key));
    }
    conn.set("other", "v", SetOptions::default()).await?;

    let mut seen = HashSet::new();
    let mut stream = conn.scan(ScanOptions::matching("scan:*").with_count(7));
    let mut batches = 0;
    while let Some(batch) = stream.next().await {
        let batch = batch?;
        batches += 1;
        seen.extend(batch.items);
    }

    assert!(batches > 1);
    assert!(stream.is_terminated());
    assert_eq!(seen, expected);
    Ok(())
}

#[tokio::test]
async fn hscan_and_zscan_visit_every_pair() -> Result<()> {
    let (_server, conn) = connect().await?;

    for i in 0..12 {
        conn.hset("h", format!("f{i}"), format!("v{i}")).await?;
    }
    let members: Vec<MemberScore> = (0..12).map(|i| MemberScore::new(format!("m{i}"), i)).collect();
    conn.zadd("z", ZaddWrite::Always, ZaddReturn::Added, &members).await?;

    let mut fields = Vec::new();
    let mut hscan = conn.hscan("h", ScanOptions::default().with_count(5));
    while let Some(batch) = hscan.next().await {
        fields.extend(batch?.items);
    }
    assert_eq!(fields.len(), 12);
    assert!(fields.contains(&FieldValue { field: b("f3"), value: b("v3") }));

    let mut scored = Vec::new();
    let mut zscan = conn.zscan("z", ScanOptions::default());
    while let Some(batch) = zscan.next().await {
        scored.extend(batch?.items);
    }
    scored.sort_by(|l, r| l.score.partial_cmp(&r.score).unwrap());
    assert_eq!(scored, members);
    Ok(())
}

#[tokio::test]
async fn wrong_type_is_a_store_error() -> Result<()> {
    let (_server, conn) = connect().await?;

    conn.rpush("list", "x").await?;
    match conn.get("list").await {
        Err(ClientError::Store(err)) => assert_eq!(err.kind(), b"WRONGTYPE"),
        other => panic!("expected store error, got {other:?}"),
    }
    // The connection stays usable after a store error.
    assert_eq!(conn.llen("list").await?, 1);
    Ok(())
}

#[tokio::test]
async fn stream_connection_shares_the_store() -> Result<()> {
    let (server, conn) = connect().await?;
    conn.set("shared", "yes", SetOptions::default()).await?;

    let (client, served) = tokio::io::duplex(4 * 1024);
    tokio::spawn(serve_stream(served, server.store()));
    let piped = Connection::from_stream(client);

    assert_eq!(piped.get("shared").await?, Some(b("yes")));
    piped.rpush("q", "x").await?;
    assert_eq!(
        piped.blpop(&["q"], BlockTimeout::seconds(1).unwrap()).await?,
        Some(KeyValue { key: b("q"), value: b("x") })
    );
    Ok(())
}

#[tokio::test]
async fn deep_pipeline_of_large_replies_does_not_stall() -> Result<()> {
    tkv_testkit::init_tracing();
    let server = StoreServer::spawn().await?;

    // A pipe far smaller than the traffic forces both sides to interleave.
    let (client, served) = tokio::io::duplex(1024);
    tokio::spawn(serve_stream(served, server.store()));
    let conn = Connection::from_stream(client);

    let value = Bytes::from(vec![b'v'; 8 * 1024]);
    conn.set("big", value.clone(), SetOptions::default()).await?;

    let gets: Vec<_> = (0..500).map(|_| conn.get("big")).collect();
    let replies = tokio::time::timeout(Duration::from_secs(10), futures::future::try_join_all(gets)).await??;
    assert_eq!(replies.len(), 500);
    assert!(replies.iter().all(|reply| reply.as_ref() == Some(&value)));
    Ok(())
}

//! Throughput benchmarks over the parser, keyspace, and dispatch hot
//! paths.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::time::Instant;

use cinderkv::commands::Dispatcher;
use cinderkv::protocol::{self, RespValue};
use cinderkv::storage::Keyspace;
use cinderkv::transaction::TransactionSession;

/// Benchmark RESP parsing
fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    group.throughput(Throughput::Elements(1));

    let set_command = b"*3\r\n$3\r\nSET\r\n$8\r\nuser:101\r\n$5\r\nalice\r\n";
    group.bench_function("set_command", |b| {
        b.iter(|| black_box(protocol::parse(set_command).unwrap().unwrap()));
    });

    let large_payload = {
        let body = "x".repeat(64 * 1024);
        let mut raw = format!("*3\r\n$3\r\nSET\r\n$3\r\nbig\r\n${}\r\n", body.len()).into_bytes();
        raw.extend_from_slice(body.as_bytes());
        raw.extend_from_slice(b"\r\n");
        raw
    };
    group.bench_function("large_bulk", |b| {
        b.iter(|| black_box(protocol::parse(&large_payload).unwrap().unwrap()));
    });

    let pipelined: Vec<u8> = std::iter::repeat(&b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n"[..])
        .take(100)
        .flatten()
        .copied()
        .collect();
    group.bench_function("pipelined_100", |b| {
        b.iter(|| {
            let mut offset = 0;
            while offset < pipelined.len() {
                let (value, consumed) = protocol::parse(&pipelined[offset..]).unwrap().unwrap();
                black_box(value);
                offset += consumed;
            }
        });
    });

    group.finish();
}

/// Benchmark reply serialization
fn bench_serialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialize");
    group.throughput(Throughput::Elements(1));

    let bulk = RespValue::bulk(Bytes::from("x".repeat(1024)));
    group.bench_function("bulk_1k", |b| {
        b.iter(|| black_box(bulk.serialize()));
    });

    let array = RespValue::array(
        (0..32)
            .map(|i| RespValue::bulk(format!("element:{}", i)))
            .collect(),
    );
    group.bench_function("array_32", |b| {
        b.iter(|| black_box(array.serialize()));
    });

    group.finish();
}

/// Benchmark raw keyspace operations
fn bench_keyspace(c: &mut Criterion) {
    let mut group = c.benchmark_group("keyspace");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set", |b| {
        let mut ks = Keyspace::new();
        let value = Bytes::from("value");
        let mut i = 0u64;
        b.iter(|| {
            ks.set(Bytes::from(format!("key:{}", i)), value.clone());
            i += 1;
        });
    });

    group.bench_function("get_existing", |b| {
        let mut ks = Keyspace::new();
        for i in 0..100_000u64 {
            ks.set(
                Bytes::from(format!("key:{}", i)),
                Bytes::from(format!("value:{}", i)),
            );
        }
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i % 100_000);
            black_box(ks.get(key.as_bytes(), Instant::now()));
            i += 1;
        });
    });

    group.bench_function("get_missing", |b| {
        let mut ks = Keyspace::new();
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("missing:{}", i);
            black_box(ks.get(key.as_bytes(), Instant::now()));
            i += 1;
        });
    });

    group.bench_function("keys_glob", |b| {
        let mut ks = Keyspace::new();
        for i in 0..1_000u64 {
            ks.set(Bytes::from(format!("user:{}", i)), Bytes::from("data"));
            ks.set(Bytes::from(format!("session:{}", i)), Bytes::from("data"));
        }
        b.iter(|| black_box(ks.keys(b"user:*", Instant::now())));
    });

    group.finish();
}

/// Benchmark full dispatch (validation + table lookup + execution)
fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Elements(1));

    fn cmd(parts: &[&str]) -> RespValue {
        RespValue::array(
            parts
                .iter()
                .map(|part| RespValue::bulk(part.to_string()))
                .collect(),
        )
    }

    group.bench_function("set_get_pair", |b| {
        let dispatcher = Dispatcher::new(None);
        let mut session = TransactionSession::new();
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i % 10_000);
            black_box(dispatcher.dispatch(&mut session, cmd(&["SET", &key, "value"])));
            black_box(dispatcher.dispatch(&mut session, cmd(&["GET", &key])));
            i += 1;
        });
    });

    group.bench_function("multi_exec_10", |b| {
        let dispatcher = Dispatcher::new(None);
        let mut session = TransactionSession::new();
        b.iter(|| {
            dispatcher.dispatch(&mut session, cmd(&["MULTI"]));
            for i in 0..10 {
                let key = format!("tx:{}", i);
                dispatcher.dispatch(&mut session, cmd(&["SET", &key, "v"]));
            }
            black_box(dispatcher.dispatch(&mut session, cmd(&["EXEC"])));
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_parse,
    bench_serialize,
    bench_keyspace,
    bench_dispatch,
);

criterion_main!(benches);

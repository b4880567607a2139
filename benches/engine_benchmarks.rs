use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use patchbay::queue;
use patchbay::{Arg, Engine, EngineConfig, Message, PackedId, Pool, PoolConfig, SignalRef};

fn id(instrument: u32) -> Arg<'static> {
    Arg::Int64(i64::from(PackedId::new(instrument, 0, 0)))
}

fn sig(ugen: u16) -> Arg<'static> {
    Arg::Int32(i32::from(SignalRef::new(ugen, 0)))
}

pub fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("Pool allocate/release", |b| {
        let pool = Pool::new(PoolConfig::default());
        b.iter(|| {
            let block = pool.allocate(black_box(96)).unwrap();
            unsafe { pool.release(block) };
        })
    });

    c.bench_function("queue enqueue/dequeue", |b| {
        let pool = Arc::new(Pool::default());
        let (tx, mut rx) = queue::channel();
        let mut spare = Some(Message::encode(&pool, 0.0, "/syn/ping", &[Arg::Int32(0)]).unwrap());
        b.iter(|| {
            if let Some(msg) = spare.take() {
                tx.enqueue(msg);
            }
            spare = rx.dequeue();
        })
    });

    c.bench_function("decode mul/new", |b| {
        let pool = Arc::new(Pool::default());
        let msg = Message::encode(&pool, 0.0, "/syn/mul/new", &[sig(0), sig(1)]).unwrap();
        b.iter(|| {
            let mut d = black_box(&msg).decode().unwrap();
            (d.args.int32().unwrap(), d.args.int32().unwrap())
        })
    });

    c.bench_function("Engine plug/unplug", |b| {
        let (mut engine, mut client) = Engine::new(EngineConfig::default());
        for slot in 1..=2 {
            client.send(0.0, "/syn/ins/def", &[id(slot), Arg::Bool(true)]).unwrap();
            client.send(0.0, "/syn/const/new", &[Arg::Float(0.5)]).unwrap();
            client.send(0.0, "/syn/input/new", &[]).unwrap();
            client.send(0.0, "/syn/ins/end", &[]).unwrap();
        }
        engine.poll_all(0.0);
        let from = Arg::Int64(i64::from(PackedId::new(1, 0, 0)));
        let to = Arg::Int64(i64::from(PackedId::new(2, 1, 0)));
        b.iter(|| {
            client.send(0.0, "/syn/ins/plug", &[from, to]).unwrap();
            client.send(0.0, "/syn/ins/unplug", &[from, to]).unwrap();
            black_box(engine.poll_all(0.0))
        })
    });

    c.bench_function("Engine render 32-voice chain", |b| {
        let (mut engine, mut client) = Engine::new(EngineConfig::default().with_cycle_rejection(false));
        for slot in 1..=32 {
            client.send(0.0, "/syn/ins/def", &[id(slot), Arg::Bool(true)]).unwrap();
            client.send(0.0, "/syn/sine/new", &[Arg::Float(110.0 * slot as f32), Arg::Float(0.1)]).unwrap();
            client.send(0.0, "/syn/input/new", &[]).unwrap();
            client.send(0.0, "/syn/add/new", &[sig(0), sig(1)]).unwrap();
            client.send(0.0, "/syn/ins/out", &[Arg::Int32(0), sig(2)]).unwrap();
            client.send(0.0, "/syn/ins/end", &[]).unwrap();
            if slot > 1 {
                let from = Arg::Int64(i64::from(PackedId::new(slot - 1, 2, 0)));
                let to = Arg::Int64(i64::from(PackedId::new(slot, 1, 0)));
                client.send(0.0, "/syn/ins/plug", &[from, to]).unwrap();
            }
        }
        engine.poll_all(0.0);

        b.iter(|| {
            engine.begin_block();
            black_box(engine.request_output(32, 0).map(|block| block[0]))
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);

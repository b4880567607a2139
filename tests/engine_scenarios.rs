use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use patchbay::{
    Arg, Buffer, Client, ControlState, Driver, Engine, EngineConfig, PackedId, PoolConfig, Rate,
    Signal, Signals, SignalRef, Ugen, UnitGenerator,
};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

fn engine() -> (Engine, Client) {
    init_logging();
    Engine::new(EngineConfig::default())
}

fn id(instrument: u32, ugen: u16, block: u16) -> Arg<'static> {
    Arg::Int64(i64::from(PackedId::new(instrument, ugen, block)))
}

fn sig(ugen: u16, block: u16) -> Arg<'static> {
    Arg::Int32(i32::from(SignalRef::new(ugen, block)))
}

fn send(client: &mut Client, address: &str, args: &[Arg<'_>]) {
    client.send(0.0, address, args).unwrap();
}

/// Instrument `slot` with a constant at ugen 0, an Input at ugen 1, and
/// output 0 reading `constant + input` from ugen 2.
fn define_voice(client: &mut Client, slot: u32, value: f32) {
    send(client, "/syn/ins/def", &[id(slot, 0, 0), Arg::Bool(true)]);
    send(client, "/syn/const/new", &[Arg::Float(value)]);
    send(client, "/syn/input/new", &[]);
    send(client, "/syn/add/new", &[sig(0, 0), sig(1, 0)]);
    send(client, "/syn/ins/out", &[Arg::Int32(0), sig(2, 0)]);
    send(client, "/syn/ins/end", &[]);
}

fn render(engine: &mut Engine, instrument: u32) -> Buffer {
    engine.begin_block();
    engine.request_output(instrument, 0).unwrap().clone()
}

fn assert_paired(engine: &Engine) {
    let rack = engine.rack();
    assert_eq!(rack.source_link_count(), rack.connection_count());
    assert_eq!(rack.sink_link_count(), rack.connection_count());
}

#[test]
fn ping_replies_on_the_outbound_queue() {
    let (mut engine, mut client) = engine();
    send(&mut client, "/syn/ping", &[Arg::Str("/client/pong"), Arg::Int32(42)]);
    assert!(engine.poll(0.0));

    let reply = client.receive().unwrap();
    assert_eq!(reply.timestamp(), 0.0);
    let mut decoded = reply.decode().unwrap();
    assert_eq!(decoded.address, "/client/pong");
    assert_eq!(decoded.types, "i");
    assert_eq!(decoded.args.int32(), Ok(42));

    // the ping itself came back empty and is kept for reuse
    assert!(client.receive().is_none());
    assert_eq!(client.spare_count(), 1);
}

#[test]
fn spares_are_reused_for_later_sends() {
    let (mut engine, mut client) = engine();
    let pool = Arc::clone(client.pool());
    send(&mut client, "/syn/ins/end", &[]);
    engine.poll_all(0.0);
    assert!(client.receive().is_none());
    let chunks = pool.stats().chunks;
    let in_use = pool.stats().in_use;

    for _ in 0..100 {
        send(&mut client, "/syn/ins/end", &[]);
        engine.poll_all(0.0);
    }
    assert_eq!(pool.stats().chunks, chunks);
    assert_eq!(pool.stats().in_use, in_use);
}

#[test]
fn template_replays_into_independent_instruments() {
    let (mut engine, mut client) = engine();
    send(&mut client, "/syn/ins/def", &[id(10, 0, 0), Arg::Bool(false)]);
    send(&mut client, "/syn/const/new", &[Arg::Float(0.5)]);
    send(&mut client, "/syn/input/new", &[]);
    send(&mut client, "/syn/add/new", &[sig(0, 0), sig(1, 0)]);
    send(&mut client, "/syn/ins/out", &[Arg::Int32(0), sig(2, 0)]);
    send(&mut client, "/syn/ins/end", &[]);
    engine.poll_all(0.0);

    assert_eq!(engine.state(), ControlState::Idle);
    assert_eq!(engine.rack().template(10).map(|t| t.len()), Some(4));
    assert!(engine.rack().instrument(10).is_none());

    // instance target travels in the ugen field
    send(&mut client, "/syn/ins/new", &[id(10, 11, 0)]);
    send(&mut client, "/syn/ins/new", &[id(10, 12, 0)]);
    engine.poll_all(0.0);
    assert_eq!(engine.rack().instrument(11).map(|i| i.len()), Some(3));
    assert_eq!(engine.rack().instrument(12).map(|i| i.len()), Some(3));
    assert_eq!(engine.state(), ControlState::Idle);

    send(&mut client, "/syn/ins/plug", &[id(11, 0, 0), id(12, 1, 0)]);
    engine.poll_all(0.0);

    engine.begin_block();
    let eleven = engine.request_output(11, 0).unwrap().clone();
    let twelve = engine.request_output(12, 0).unwrap().clone();
    assert!(eleven.iter().all(|&s| s == 0.5));
    assert!(twelve.iter().all(|&s| s == 1.0));
    // the template is still there for more instances
    assert!(engine.rack().template(10).is_some());
}

#[test]
fn mismatched_type_tags_are_dropped() {
    let (mut engine, mut client) = engine();
    // define needs "hB"
    send(&mut client, "/syn/ins/def", &[id(3, 0, 0)]);
    send(&mut client, "/syn/no/such/op", &[]);
    send(&mut client, "/other/ins/def", &[id(3, 0, 0), Arg::Bool(true)]);
    assert_eq!(engine.poll_all(0.0), 3);

    assert!(engine.rack().slot(3).is_none());
    assert_eq!(engine.state(), ControlState::Idle);
    // dropped messages are still handed back
    assert!(client.receive().is_none());
    assert_eq!(client.spare_count(), 3);
}

#[test]
fn messages_wait_until_due_and_block_those_behind() {
    let (mut engine, mut client) = engine();
    client
        .send(5.0, "/syn/ping", &[Arg::Str("/late"), Arg::Int32(1)])
        .unwrap();
    client
        .send(0.0, "/syn/ping", &[Arg::Str("/early"), Arg::Int32(2)])
        .unwrap();

    assert!(!engine.poll(1.0));
    assert_eq!(engine.held_until(), Some(5.0));
    assert!(!engine.poll(4.999));
    assert!(client.receive().is_none());

    assert!(engine.poll(5.0));
    assert!(engine.poll(5.0));
    assert!(!engine.poll(5.0));
    let late = client.receive().unwrap();
    let early = client.receive().unwrap();
    assert_eq!(late.address(), Some("/late"));
    assert_eq!(early.address(), Some("/early"));
}

#[test]
fn deleting_an_instrument_removes_its_connections() {
    let (mut engine, mut client) = engine();
    define_voice(&mut client, 1, 0.25);
    define_voice(&mut client, 2, 0.5);
    define_voice(&mut client, 3, 0.0);
    send(&mut client, "/syn/ins/plug", &[id(1, 2, 0), id(2, 1, 0)]);
    send(&mut client, "/syn/ins/plug", &[id(2, 2, 0), id(3, 1, 0)]);
    send(&mut client, "/syn/ins/plug", &[id(1, 0, 0), id(3, 1, 0)]);
    engine.poll_all(0.0);
    assert_eq!(engine.rack().connection_count(), 3);
    assert!(render(&mut engine, 3).iter().all(|&s| s == 1.0));

    send(&mut client, "/syn/ins/del", &[id(2, 0, 0)]);
    engine.poll_all(0.0);
    assert!(engine.rack().slot(2).is_none());
    assert_eq!(engine.rack().connection_count(), 1);
    assert_paired(&engine);
    assert!(render(&mut engine, 3).iter().all(|&s| s == 0.25));

    send(&mut client, "/syn/ins/del", &[id(1, 0, 0)]);
    engine.poll_all(0.0);
    assert_eq!(engine.rack().connection_count(), 0);
    assert!(render(&mut engine, 3).iter().all(|&s| s == 0.0));
}

#[test]
fn plug_and_unplug_keep_both_halves_paired() {
    let (mut engine, mut client) = engine();
    for slot in 1..=4 {
        define_voice(&mut client, slot, slot as f32);
    }
    engine.poll_all(0.0);

    let plugs = [(1, 2), (1, 3), (2, 4), (3, 4), (1, 4)];
    for (from, to) in plugs {
        send(&mut client, "/syn/ins/plug", &[id(from, 0, 0), id(to, 1, 0)]);
        engine.poll_all(0.0);
        assert_paired(&engine);
    }
    assert_eq!(engine.rack().connection_count(), plugs.len());

    // closing a cycle is refused
    send(&mut client, "/syn/ins/plug", &[id(4, 2, 0), id(1, 1, 0)]);
    engine.poll_all(0.0);
    assert_eq!(engine.rack().connection_count(), plugs.len());

    for (from, to) in plugs.iter().rev().step_by(2) {
        send(&mut client, "/syn/ins/unplug", &[id(*from, 0, 0), id(*to, 1, 0)]);
        engine.poll_all(0.0);
        assert_paired(&engine);
    }
    assert_eq!(engine.rack().connection_count(), 2);

    // unplugging something that is not connected changes nothing
    send(&mut client, "/syn/ins/unplug", &[id(1, 0, 0), id(4, 1, 0)]);
    engine.poll_all(0.0);
    assert_eq!(engine.rack().connection_count(), 2);
    assert_paired(&engine);
}

#[test]
fn ping_reply_fails_cleanly_when_the_pool_is_exhausted() {
    init_logging();
    let pool = PoolConfig::default()
        .with_initial_capacity(4096)
        .with_chunk_size(4096)
        .with_growth(false);
    let (mut engine, mut client) = Engine::new(EngineConfig::default().with_pool(pool));
    send(&mut client, "/syn/ping", &[Arg::Str("/pong"), Arg::Int32(7)]);

    // use up the rest of the chunk
    let pool = Arc::clone(client.pool());
    let mut held = Vec::new();
    while let Some(block) = pool.allocate(0) {
        held.push(block);
    }
    assert!(!held.is_empty());

    assert!(engine.poll(0.0));
    // no reply, but the ping itself still came back for reuse
    assert!(client.receive().is_none());
    assert_eq!(client.spare_count(), 1);

    for block in held {
        unsafe { pool.release(block) };
    }
    send(&mut client, "/syn/ping", &[Arg::Str("/pong"), Arg::Int32(8)]);
    engine.poll_all(0.0);
    let reply = client.receive().unwrap();
    assert_eq!(reply.address(), Some("/pong"));
}

#[test]
fn instrument_zero_means_the_one_being_built() {
    let (mut engine, mut client) = engine();
    define_voice(&mut client, 1, 0.5);
    send(&mut client, "/syn/ins/def", &[id(2, 0, 0), Arg::Bool(true)]);
    send(&mut client, "/syn/input/new", &[]);
    send(&mut client, "/syn/ins/out", &[Arg::Int32(0), sig(0, 0)]);
    send(&mut client, "/syn/ins/plug", &[id(1, 0, 0), id(0, 0, 0)]);
    engine.poll_all(0.0);

    assert_eq!(engine.current_instrument(), Some(2));
    let port = engine.rack().instrument(2).unwrap().inputs()[0];
    assert_eq!(port, 0);
    assert_eq!(engine.rack().connection_count(), 1);
    assert!(render(&mut engine, 2).iter().all(|&s| s == 0.5));

    send(&mut client, "/syn/ins/end", &[]);
    // once idle, instrument 0 is still the last one defined live
    send(&mut client, "/syn/ins/plug", &[id(1, 0, 0), id(0, 0, 0)]);
    send(&mut client, "/syn/const/new", &[Arg::Float(1.0)]);
    engine.poll_all(0.0);
    assert_eq!(engine.state(), ControlState::Idle);
    assert_eq!(engine.current_instrument(), Some(2));
    assert_eq!(engine.rack().connection_count(), 2);
    assert_eq!(engine.rack().instrument(2).map(|i| i.len()), Some(2));
    assert!(render(&mut engine, 2).iter().all(|&s| s == 1.0));

    // a template definition does not change it
    send(&mut client, "/syn/ins/def", &[id(7, 0, 0), Arg::Bool(false)]);
    send(&mut client, "/syn/ins/end", &[]);
    engine.poll_all(0.0);
    assert_eq!(engine.current_instrument(), Some(2));

    // until that instrument goes away
    send(&mut client, "/syn/ins/del", &[id(2, 0, 0)]);
    send(&mut client, "/syn/const/new", &[Arg::Float(1.0)]);
    engine.poll_all(0.0);
    assert_eq!(engine.current_instrument(), None);
    assert_eq!(engine.rack().instrument(1).map(|i| i.len()), Some(3));

    // redefining its slot as a template forgets it too
    send(&mut client, "/syn/ins/def", &[id(3, 0, 0), Arg::Bool(true)]);
    send(&mut client, "/syn/ins/end", &[]);
    send(&mut client, "/syn/ins/def", &[id(3, 0, 0), Arg::Bool(false)]);
    send(&mut client, "/syn/ins/end", &[]);
    engine.poll_all(0.0);
    assert_eq!(engine.current_instrument(), None);
}

#[test]
fn block_rate_operands_make_block_rate_ugens() {
    let (mut engine, mut client) = engine();
    send(&mut client, "/syn/ins/def", &[id(1, 0, 0), Arg::Bool(true)]);
    send(&mut client, "/syn/const/newb", &[Arg::Float(2.0)]);
    send(&mut client, "/syn/const/newb", &[Arg::Float(0.25)]);
    // both operands block rate: one product per block
    send(&mut client, "/syn/mul/new", &[sig(0, 0), sig(1, 0)]);
    send(&mut client, "/syn/const/new", &[Arg::Float(1.0)]);
    // mixed: audio rate, with the scalar ramped across the block
    send(&mut client, "/syn/mul/new", &[sig(3, 0), sig(2, 0)]);
    send(&mut client, "/syn/ins/out", &[Arg::Int32(0), sig(4, 0)]);
    // a block-rate signal cannot be an output
    send(&mut client, "/syn/ins/out", &[Arg::Int32(1), sig(2, 0)]);
    send(&mut client, "/syn/ins/end", &[]);
    engine.poll_all(0.0);

    let instrument = engine.rack().instrument(1).unwrap();
    assert_eq!(instrument.ugen(2).map(|u| u.rate()), Some(Rate::Block));
    assert_eq!(instrument.ugen(4).map(|u| u.rate()), Some(Rate::Audio));
    assert_eq!(instrument.num_outputs(), 1);
    assert!(render(&mut engine, 1).iter().all(|&s| s == 0.5));
}

#[test]
fn block_rate_ports_carry_control_between_instruments() {
    let (mut engine, mut client) = engine();
    // a controller with one audio and one block-rate signal
    send(&mut client, "/syn/ins/def", &[id(1, 0, 0), Arg::Bool(true)]);
    send(&mut client, "/syn/const/newb", &[Arg::Float(0.5)]);
    send(&mut client, "/syn/const/new", &[Arg::Float(0.5)]);
    send(&mut client, "/syn/ins/end", &[]);
    // a voice whose gain comes in through a block-rate port
    send(&mut client, "/syn/ins/def", &[id(2, 0, 0), Arg::Bool(true)]);
    send(&mut client, "/syn/input/newb", &[]);
    send(&mut client, "/syn/const/new", &[Arg::Float(1.0)]);
    send(&mut client, "/syn/mul/new", &[sig(1, 0), sig(0, 0)]);
    send(&mut client, "/syn/ins/out", &[Arg::Int32(0), sig(2, 0)]);
    send(&mut client, "/syn/ins/end", &[]);
    send(&mut client, "/syn/ins/plug", &[id(1, 0, 0), id(2, 0, 0)]);
    // audio into a block-rate port is refused
    send(&mut client, "/syn/ins/plug", &[id(1, 1, 0), id(2, 0, 0)]);
    engine.poll_all(0.0);

    assert_eq!(engine.rack().connection_count(), 1);
    assert_paired(&engine);
    assert!(render(&mut engine, 2).iter().all(|&s| s == 0.5));
}

#[test]
fn sine_frequency_can_follow_a_signal() {
    let (mut engine, mut client) = engine();
    send(&mut client, "/syn/ins/def", &[id(1, 0, 0), Arg::Bool(true)]);
    send(&mut client, "/syn/const/newb", &[Arg::Float(441.0)]);
    send(&mut client, "/syn/sine/mod", &[sig(0, 0), Arg::Float(0.5)]);
    send(&mut client, "/syn/ins/out", &[Arg::Int32(0), sig(1, 0)]);
    send(&mut client, "/syn/ins/end", &[]);
    engine.poll_all(0.0);

    // 100 samples per cycle at the default sample rate
    let block = render(&mut engine, 1);
    assert_eq!(block[0], 0.0);
    assert!((block[25] - 0.5).abs() < 1e-3);
}

#[test]
fn out_of_range_slots_are_ignored() {
    let (mut engine, mut client) = engine();
    send(&mut client, "/syn/ins/def", &[id(0, 0, 0), Arg::Bool(true)]);
    send(&mut client, "/syn/ins/def", &[id(100, 0, 0), Arg::Bool(true)]);
    send(&mut client, "/syn/ins/del", &[id(500, 0, 0)]);
    assert_eq!(engine.poll_all(0.0), 3);
    assert_eq!(engine.state(), ControlState::Idle);
    assert_eq!(engine.rack().instruments().count(), 0);
}

#[test]
fn redefining_a_slot_replaces_it() {
    let (mut engine, mut client) = engine();
    define_voice(&mut client, 1, 0.5);
    define_voice(&mut client, 2, 0.0);
    send(&mut client, "/syn/ins/plug", &[id(1, 0, 0), id(2, 1, 0)]);
    engine.poll_all(0.0);
    assert_eq!(engine.rack().connection_count(), 1);

    send(&mut client, "/syn/ins/def", &[id(1, 0, 0), Arg::Bool(false)]);
    send(&mut client, "/syn/ins/end", &[]);
    engine.poll_all(0.0);
    assert!(engine.rack().template(1).is_some());
    assert_eq!(engine.rack().connection_count(), 0);
    assert_paired(&engine);
}

struct Counting {
    computed: Arc<AtomicUsize>,
    out: Buffer,
}

impl UnitGenerator for Counting {
    fn compute(&mut self, _signals: &Signals<'_>) {
        self.computed.fetch_add(1, Ordering::Relaxed);
        self.out.iter_mut().for_each(|s| *s = 1.0);
    }

    fn output(&self, output: u16) -> Option<Signal<'_>> {
        (output == 0).then_some(Signal::Audio(&self.out))
    }
}

#[test]
fn each_ugen_computes_once_per_block() {
    let (mut engine, mut client) = engine();
    send(&mut client, "/syn/ins/def", &[id(1, 0, 0), Arg::Bool(true)]);
    engine.poll_all(0.0);

    let computed = Arc::new(AtomicUsize::new(0));
    let counter = engine
        .rack_mut()
        .instrument_mut(1)
        .unwrap()
        .add_ugen(Ugen::Custom(Box::new(Counting {
            computed: Arc::clone(&computed),
            out: Buffer::SILENT,
        })))
        .unwrap();
    assert_eq!(counter, 0);

    // both operands of the sum and the product read the counter
    send(&mut client, "/syn/add/new", &[sig(0, 0), sig(0, 0)]);
    send(&mut client, "/syn/mul/new", &[sig(0, 0), sig(1, 0)]);
    send(&mut client, "/syn/ins/out", &[Arg::Int32(0), sig(2, 0)]);
    send(&mut client, "/syn/ins/out", &[Arg::Int32(1), sig(1, 0)]);
    engine.poll_all(0.0);

    engine.begin_block();
    assert!(engine.request_output(1, 0).unwrap().iter().all(|&s| s == 2.0));
    assert!(engine.request_output(1, 1).unwrap().iter().all(|&s| s == 2.0));
    assert_eq!(computed.load(Ordering::Relaxed), 1);

    engine.begin_block();
    engine.request_output(1, 0);
    assert_eq!(computed.load(Ordering::Relaxed), 2);
}

#[test]
fn driver_renders_the_tapped_instrument() {
    init_logging();
    let (engine, mut client) = Engine::new(EngineConfig::default().with_sample_rate(48_000));
    let (mut driver, mut samples) = Driver::with_ring_buffer(engine, 2, 8);
    driver.tap(1);

    send(&mut client, "/syn/ins/def", &[id(1, 0, 0), Arg::Bool(true)]);
    send(&mut client, "/syn/sine/new", &[Arg::Float(480.0), Arg::Float(0.5)]);
    send(&mut client, "/syn/const/new", &[Arg::Float(0.25)]);
    send(&mut client, "/syn/ins/out", &[Arg::Int32(0), sig(0, 0)]);
    send(&mut client, "/syn/ins/out", &[Arg::Int32(1), sig(1, 0)]);
    send(&mut client, "/syn/ins/end", &[]);

    assert!(driver.process(0.0));
    assert_eq!(driver.state(), ControlState::Idle);
    assert_eq!(samples.slots(), Buffer::LEN * 2);

    let frames: Vec<(f32, f32)> = (0..Buffer::LEN)
        .map(|_| (samples.pop().unwrap(), samples.pop().unwrap()))
        .collect();
    assert_eq!(frames[0].0, 0.0);
    assert!(frames.iter().all(|&(_, right)| right == 0.25));
    // 100 samples per cycle: a quarter cycle in, the sine peaks
    assert!((frames[25].0 - 0.5).abs() < 1e-3);
    assert!(frames.iter().all(|&(left, _)| left.abs() <= 0.5 + 1e-6));

    assert!(driver.process(0.0));
    assert_eq!(driver.blocks_processed(), 2);
}

#[test]
fn everything_returns_to_the_pool() {
    let (mut engine, mut client) = engine();
    let pool = Arc::clone(client.pool());
    send(&mut client, "/syn/ins/def", &[id(5, 0, 0), Arg::Bool(false)]);
    send(&mut client, "/syn/const/new", &[Arg::Float(1.0)]);
    send(&mut client, "/syn/ins/end", &[]);
    send(&mut client, "/syn/ping", &[Arg::Str("/pong"), Arg::Int32(0)]);
    client
        .send(100.0, "/syn/ping", &[Arg::Str("/pong"), Arg::Int32(1)])
        .unwrap();
    engine.poll_all(0.0);
    assert!(pool.stats().in_use > 0);

    drop(engine);
    drop(client);
    assert_eq!(pool.stats().in_use, 0);
}

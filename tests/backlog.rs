mod common;

use sockloop::{ConnectDecision, EventLoopBuilder, Handler, LoopContext, MessageDecision, Peer};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

const PENDING: usize = 5;

#[derive(Default)]
struct Counter {
    accepted_on_tick: Vec<u64>,
}

impl Handler for Counter {
    fn on_connect(&mut self, ctx: &LoopContext<'_>, _listener: &Peer, _peer: &Peer) -> ConnectDecision {
        self.accepted_on_tick.push(ctx.stats().ticks);
        if self.accepted_on_tick.len() == PENDING {
            ctx.stop();
        }
        ConnectDecision::Register
    }

    fn on_message(&mut self, _ctx: &LoopContext<'_>, _peer: &Peer, _data: &[u8]) -> MessageDecision {
        MessageDecision::Continue
    }
}

#[test]
fn pending_connections_drain_in_one_notification() {
    for loop_type in common::loop_types() {
        let listener = sockloop::net::bind_tcp("127.0.0.1:0", 64).expect("bind");
        let address = listener.addr().expect("listener address");

        // Fill the backlog before the loop ever waits.
        let clients: Vec<_> = (0..PENDING)
            .map(|_| TcpStream::connect(address).expect("connect"))
            .collect();
        thread::sleep(Duration::from_millis(50));

        let mut event_loop = EventLoopBuilder::new()
            .loop_type(loop_type)
            .max_peers(PENDING)
            .timeout_ms(1000)
            .peer(listener)
            .build(Counter::default())
            .expect("build");
        event_loop.run().expect("run");

        let ticks = &event_loop.handler().accepted_on_tick;
        assert_eq!(ticks.len(), PENDING, "{loop_type:?}");
        assert!(ticks.iter().all(|&tick| tick == 1), "{loop_type:?}: {ticks:?}");
        assert_eq!(event_loop.stats().ticks, 1);
        drop(clients);
    }
}

//! Lowers `RLIMIT_NOFILE` for the whole process, so it lives in its own test
//! binary with a single test.

mod common;

use sockloop::{ConnectDecision, EventLoopBuilder, Handler, LoopContext, MessageDecision, Peer};
use std::net::TcpStream;
use std::os::unix::io::AsRawFd;
use std::thread;
use std::time::Duration;

const PENDING: usize = 2;
const MAX_TIMER_TICKS: usize = 40;

#[derive(Default)]
struct Acceptor {
    accepted: usize,
    timers: usize,
}

impl Handler for Acceptor {
    fn on_connect(&mut self, ctx: &LoopContext<'_>, _listener: &Peer, _peer: &Peer) -> ConnectDecision {
        self.accepted += 1;
        if self.accepted == PENDING {
            ctx.stop();
        }
        ConnectDecision::Register
    }

    fn on_message(&mut self, _ctx: &LoopContext<'_>, _peer: &Peer, _data: &[u8]) -> MessageDecision {
        MessageDecision::Continue
    }

    fn on_timer(&mut self, ctx: &LoopContext<'_>) {
        self.timers += 1;
        if self.timers == MAX_TIMER_TICKS {
            ctx.stop();
        }
    }
}

fn open_file_limit() -> libc::rlimit {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    assert_eq!(unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) }, 0);
    limit
}

fn set_open_file_limit(limit: &libc::rlimit) {
    assert_eq!(unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, limit) }, 0);
}

/// Lowest descriptor number the next `accept` would get.
fn lowest_free_fd(existing: &impl AsRawFd) -> libc::c_int {
    let fd = unsafe { libc::dup(existing.as_raw_fd()) };
    assert!(fd >= 0);
    unsafe { libc::close(fd) };
    fd
}

#[test]
fn queued_connections_survive_descriptor_exhaustion() {
    let original = open_file_limit();

    for loop_type in common::loop_types() {
        let listener = sockloop::net::bind_tcp("127.0.0.1:0", 16).expect("bind");
        let address = listener.addr().expect("listener address");
        let clients: Vec<_> = (0..PENDING)
            .map(|_| TcpStream::connect(address).expect("connect"))
            .collect();

        let mut event_loop = EventLoopBuilder::new()
            .loop_type(loop_type)
            .max_peers(PENDING)
            .timeout_ms(50)
            .peer(listener)
            .build(Acceptor::default())
            .expect("build");

        let restore = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            set_open_file_limit(&original);
        });

        // Every accept now fails with EMFILE until the limit is restored.
        let exhausted = libc::rlimit {
            rlim_cur: lowest_free_fd(&clients[0]) as libc::rlim_t,
            rlim_max: original.rlim_max,
        };
        set_open_file_limit(&exhausted);

        let result = event_loop.run();
        restore.join().expect("restore thread panicked");
        result.expect("run");

        let acceptor = event_loop.handler();
        assert_eq!(acceptor.accepted, PENDING, "{loop_type:?}: queued connections stranded");
        assert_eq!(event_loop.stats().refused, 0);
        drop(clients);
    }
}

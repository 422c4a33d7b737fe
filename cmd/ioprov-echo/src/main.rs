//! ioprov echo server
//!
//! A ping/pong TCP server wiring `ReadinessProvider` into `ServerRuntime`.
//! Connections are accepted on a plain blocking `TcpListener` (accept
//! itself is outside the scope of `AsyncIoProvider`); every accepted
//! socket is set non-blocking and handed to the runtime via
//! `adopt_connection`.
//!
//! Usage:
//!     cargo run -p ioprov-echo -- [port]
//!
//! Test with:
//!     nc localhost 9000

use std::net::TcpListener;
use std::os::unix::io::AsRawFd;
use std::sync::Arc;

use ioprov_core::provider::SocketHandle;
use ioprov_framer::{message_type, Dispatcher};
use ioprov_runtime::{ProviderConfig, ServerRuntime};

fn main() {
    env_logger::init();

    let port: u16 = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(9000);

    let provider = ioprov_backends::readiness::epoll::new().expect("failed to create epoll provider");
    let mut server = ServerRuntime::builder(provider, Dispatcher::new())
        .config(ProviderConfig::default())
        .build()
        .expect("failed to build server runtime");
    server.start();
    let server = Arc::new(server);

    let weak = Arc::downgrade(&server);
    server.dispatcher().register_handler(
        message_type::PING,
        Box::new(move |msg| {
            let Some(server) = weak.upgrade() else {
                return;
            };
            let reply = server
                .dispatcher()
                .create_message(message_type::PONG, msg.connection_id, &msg.payload);
            if let Err(e) = server.send(SocketHandle(msg.connection_id as usize), &reply) {
                log::warn!("failed to send pong to connection {}: {e}", msg.connection_id);
            }
        }),
    );

    let listener = TcpListener::bind(("0.0.0.0", port)).expect("failed to bind listener");
    log::info!("ioprov-echo listening on port {port}");

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                log::warn!("accept failed: {e}");
                continue;
            }
        };
        stream.set_nonblocking(true).expect("set_nonblocking failed");
        let fd = stream.as_raw_fd();
        // Ownership of the fd moves to the provider's readiness table;
        // the `TcpStream` must not close it on drop.
        std::mem::forget(stream);
        log::info!("accepted connection fd={fd}");
        if let Err(e) = server.adopt_connection(SocketHandle(fd as usize)) {
            log::warn!("failed to adopt connection fd={fd}: {e}");
        }
    }
}

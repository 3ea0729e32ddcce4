//! Port allocation for spawned game servers: a rolling cursor over
//! [5000, 5099], reserved by binding and immediately closing a TCP
//! listener (§4.4.5 — "no reservation table, the bind/close dance is the
//! reservation").

use socket2::{Domain, Socket, Type};
use std::net::{SocketAddr, TcpListener};

pub const PORT_RANGE_START: u16 = 5000;
pub const PORT_RANGE_END: u16 = 5099;

/// Binds and immediately drops a listener on `port` with `SO_REUSEADDR`
/// set, so a port this process just released (and hasn't lingered in
/// `TIME_WAIT`, since we never accept on it) is still reliably probeable.
fn probe_port(port: u16) -> bool {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let Ok(socket) = Socket::new(Domain::IPV4, Type::STREAM, None) else {
        return false;
    };
    if socket.set_reuse_address(true).is_err() {
        return false;
    }
    if socket.bind(&addr.into()).is_err() {
        return false;
    }
    let listener: TcpListener = socket.into();
    listener.local_addr().is_ok()
}

/// Advances `cursor` past the port it returns. On exhausting the range,
/// resets `cursor` to the start and reports failure — the caller's next
/// call starts the sweep over.
pub fn find_available_port(cursor: &mut u16) -> Option<u16> {
    for port in *cursor..=PORT_RANGE_END {
        if probe_port(port) {
            *cursor = port + 1;
            return Some(port);
        }
    }
    *cursor = PORT_RANGE_START;
    None
}

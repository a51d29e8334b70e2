use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::{SocketAddr, TcpListener};
use std::sync::LazyLock;
use std::time::SystemTime;

use parking_lot::Mutex;

const RANGE_START: u16 = 15000;
const RANGE_LEN: u16 = 10000;

/// Next candidate port, starting at a random offset so parallel test binaries
/// rarely collide.
static NEXT_PORT: LazyLock<Mutex<u16>> = LazyLock::new(|| {
    let mut hasher = DefaultHasher::new();
    SystemTime::now().hash(&mut hasher);
    std::process::id().hash(&mut hasher);

    #[allow(clippy::cast_possible_truncation)]
    let offset = (hasher.finish() % u64::from(RANGE_LEN)) as u16;

    Mutex::new(RANGE_START + offset)
});

/// Allocate the next available port in the 15000-25000 range, falling back to
/// an OS-assigned port if the whole range is taken.
pub fn allocate_port() -> u16 {
    let mut next = NEXT_PORT.lock();

    for _ in 0..RANGE_LEN {
        let port = *next;
        *next = if port + 1 >= RANGE_START + RANGE_LEN {
            RANGE_START
        } else {
            port + 1
        };

        if is_port_available(port) {
            return port;
        }
    }

    TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .and_then(|listener| listener.local_addr())
        .map_or(0, |addr| addr.port())
}

/// Check if a port is available by attempting to bind to it
pub fn is_port_available(port: u16) -> bool {
    TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port))).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocated_ports_are_distinct_and_free() {
        let first = allocate_port();
        let second = allocate_port();

        assert_ne!(first, second);
        assert!(is_port_available(second));
    }
}

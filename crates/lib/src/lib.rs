//! Raccoon bridge core: per-user WhatsApp sessions, the webhook forwarder and the HTTP
//! gateway used by the CLI.

/// Poll an async condition until it holds (up to ~3s), then assert it.
#[cfg(test)]
macro_rules! eventually {
    ($cond:expr) => {{
        let mut ok = false;
        for _ in 0..300 {
            if $cond {
                ok = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(ok, "condition never held: {}", stringify!($cond));
    }};
}

pub mod bridge;
pub mod channels;
pub mod config;
pub mod credentials;
pub mod gateway;
pub mod init;

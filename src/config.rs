use std::time::Duration;
use anyhow::bail;

#[derive(Debug, Clone)]
pub struct UdpBridgeConfig {
    /// Size of the buffer that each connection's receive task hands to the socket, and with it
    ///  the largest datagram the bridge can deliver without truncation. The framing header
    ///  stores the payload length as a u16, so this must not exceed `u16::MAX`.
    ///
    /// The device side of the bridge assumes 4096 bytes; changing this changes the truncation
    ///  boundary for both sides, so it should be a deliberate decision.
    pub recv_buffer_size: usize,

    /// Upper bound for a single blocking wait on a connection's socket. The receive task checks
    ///  its shutdown flag between waits, so this bounds how long `close` can lag behind the
    ///  flag being set. Shorter values make shutdown more responsive at the cost of more wakeups
    ///  on idle connections.
    pub recv_poll_timeout: Duration,

    /// How long `close` waits for a connection's receive task to observe the shutdown flag and
    ///  exit before aborting it. Must be longer than `recv_poll_timeout`, otherwise a task
    ///  sitting in an uneventful wait is aborted on every close.
    pub close_join_timeout: Duration,
}

impl Default for UdpBridgeConfig {
    fn default() -> UdpBridgeConfig {
        UdpBridgeConfig {
            recv_buffer_size: 4096,
            recv_poll_timeout: Duration::from_millis(500),
            close_join_timeout: Duration::from_secs(1),
        }
    }
}

impl UdpBridgeConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.recv_buffer_size == 0 {
            bail!("receive buffer size must be positive");
        }
        if self.recv_buffer_size > u16::MAX as usize {
            bail!("receive buffer size exceeds the framing header's u16 payload length");
        }
        if self.close_join_timeout <= self.recv_poll_timeout {
            bail!("close join timeout must exceed the receive poll timeout");
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::defaults(4096, 500, 1000, true)]
    #[case::zero_buffer(0, 500, 1000, false)]
    #[case::buffer_too_big(65536, 500, 1000, false)]
    #[case::max_u16_buffer(65535, 500, 1000, true)]
    #[case::join_not_above_poll(4096, 500, 500, false)]
    fn test_validate(#[case] recv_buffer_size: usize, #[case] poll_millis: u64, #[case] join_millis: u64, #[case] expected_ok: bool) {
        let config = UdpBridgeConfig {
            recv_buffer_size,
            recv_poll_timeout: Duration::from_millis(poll_millis),
            close_join_timeout: Duration::from_millis(join_millis),
        };
        assert_eq!(config.validate().is_ok(), expected_ok);
    }
}

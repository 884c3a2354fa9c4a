//! Clock synchronization: a coarse NTP check before joining.
//!
//! Quarter deadlines are computed from record start times, so a node whose
//! clock is far off would open and close quarters at the wrong moments.

use shoal_types::SystemClock;
use std::time::Duration;

use crate::NetworkError;

/// Public NTP pool queried by default.
pub const DEFAULT_NTP_SERVER: &str = "pool.ntp.org:123";

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
const NTP_EPOCH_OFFSET: u64 = 2_208_988_800;

/// Clock synchronization service.
pub struct ClockSync {
    /// `host:port` of the NTP server.
    pub server: String,
    /// Maximum acceptable clock drift in milliseconds.
    pub max_drift_ms: i64,
    /// Current estimated offset from true UTC in milliseconds.
    pub offset_ms: i64,
    /// Number of successful NTP samples folded into `offset_ms`.
    pub sample_count: u32,
    pub timeout: Duration,
}

impl ClockSync {
    pub fn new(max_drift_ms: i64) -> Self {
        Self {
            server: DEFAULT_NTP_SERVER.to_string(),
            max_drift_ms,
            offset_ms: 0,
            sample_count: 0,
            timeout: Duration::from_secs(5),
        }
    }

    /// Take one NTP sample and fold it into the offset estimate.
    ///
    /// The first sample is taken as is; later ones are blended with an EMA
    /// (7/8 old, 1/8 new). A failed query keeps the previous estimate and is
    /// returned as an error so the caller can decide whether to proceed.
    pub async fn sample(&mut self) -> Result<i64, NetworkError> {
        let offset = query_ntp_offset(&self.server, self.timeout).await?;
        self.offset_ms = if self.sample_count == 0 {
            offset
        } else {
            (self.offset_ms * 7 + offset) / 8
        };
        self.sample_count += 1;
        Ok(self.offset_ms)
    }

    /// Fail if the estimated offset exceeds the tolerance.
    pub fn check_drift(&self) -> Result<(), NetworkError> {
        if self.offset_ms.abs() > self.max_drift_ms {
            return Err(NetworkError::ClockDrift {
                drift_ms: self.offset_ms,
                max_ms: self.max_drift_ms,
            });
        }
        Ok(())
    }

    /// A clock corrected by the current offset estimate.
    pub fn clock(&self) -> SystemClock {
        SystemClock {
            offset_ms: self.offset_ms,
        }
    }
}

/// Minimal SNTPv4 client (RFC 4330): returns `server_time - local_time` in
/// milliseconds, using the midpoint of send and receive as local time.
async fn query_ntp_offset(server: &str, timeout: Duration) -> Result<i64, NetworkError> {
    let socket = tokio::net::UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(|e| NetworkError::ConnectionFailed(format!("NTP bind failed: {e}")))?;

    let mut request = [0u8; 48];
    request[0] = 0x23; // LI=0, VN=4, Mode=3

    let t1 = shoal_types::time::now_millis();
    socket
        .send_to(&request, server)
        .await
        .map_err(|e| NetworkError::ConnectionFailed(format!("NTP send failed: {e}")))?;

    let mut response = [0u8; 48];
    let nbytes = match tokio::time::timeout(timeout, socket.recv_from(&mut response)).await {
        Ok(Ok((n, _))) => n,
        Ok(Err(e)) => {
            return Err(NetworkError::ConnectionFailed(format!(
                "NTP recv failed: {e}"
            )))
        }
        Err(_) => return Err(NetworkError::Timeout("NTP".into())),
    };
    let t4 = shoal_types::time::now_millis();

    if nbytes < 48 {
        return Err(NetworkError::ConnectionFailed(
            "NTP response too short".into(),
        ));
    }

    // Transmit timestamp: seconds (bytes 40-43) and fraction (44-47).
    let secs = u32::from_be_bytes([response[40], response[41], response[42], response[43]]) as u64;
    let frac = u32::from_be_bytes([response[44], response[45], response[46], response[47]]) as u64;
    if secs < NTP_EPOCH_OFFSET {
        return Err(NetworkError::ConnectionFailed(
            "NTP response contains invalid timestamp".into(),
        ));
    }
    let server_ms = (secs - NTP_EPOCH_OFFSET) * 1000 + (frac * 1000 >> 32);
    let local_mid_ms = (t1 + t4) / 2;
    Ok(server_ms as i64 - local_mid_ms as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drift_within_tolerance_passes() {
        let mut sync = ClockSync::new(5000);
        sync.offset_ms = -4000;
        sync.check_drift().unwrap();
    }

    #[test]
    fn drift_beyond_tolerance_fails() {
        let mut sync = ClockSync::new(5000);
        sync.offset_ms = 7000;
        match sync.check_drift().unwrap_err() {
            NetworkError::ClockDrift { drift_ms, max_ms } => {
                assert_eq!(drift_ms, 7000);
                assert_eq!(max_ms, 5000);
            }
            other => panic!("expected ClockDrift, got {other:?}"),
        }
    }

    #[test]
    fn clock_carries_offset() {
        let mut sync = ClockSync::new(5000);
        sync.offset_ms = 1234;
        assert_eq!(sync.clock().offset_ms, 1234);
    }

    #[tokio::test]
    async fn failed_sample_keeps_previous_offset() {
        let mut sync = ClockSync::new(5000);
        sync.server = "127.0.0.1:9".into();
        sync.timeout = Duration::from_millis(200);
        sync.offset_ms = 321;

        assert!(sync.sample().await.is_err());
        assert_eq!(sync.offset_ms, 321);
        assert_eq!(sync.sample_count, 0);
    }
}

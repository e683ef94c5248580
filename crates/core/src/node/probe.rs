//! SNTP clock-drift probe.
//!
//! The probe only warns the operator; scheduling always runs off the local
//! wall clock.

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tokio::time::timeout;

/// Seconds between the NTP era (1900) and the Unix epoch.
const NTP_UNIX_OFFSET: f64 = 2_208_988_800.0;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Measures the offset of the local clock against `server` (an SNTP v4
/// host, port 123 unless specified). Positive drift means the local clock
/// is behind.
pub(crate) async fn measure_clock_drift(server: &str) -> anyhow::Result<f64> {
    let address = if server.contains(':') {
        server.to_string()
    } else {
        format!("{server}:123")
    };
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(address.as_str()).await?;

    // 48-byte SNTP request: LI=0, VN=4, Mode=3 (client).
    let mut request = [0u8; 48];
    request[0] = 0x23;

    let sent_at = unix_now_f64();
    socket.send(&request).await?;

    let mut response = [0u8; 48];
    let received = timeout(PROBE_TIMEOUT, socket.recv(&mut response)).await??;
    let replied_at = unix_now_f64();
    if received < 48 {
        anyhow::bail!("short SNTP response ({received} bytes) from {address}");
    }

    // Transmit timestamp: seconds + fraction since 1900, offset 40.
    let seconds = u32::from_be_bytes(response[40..44].try_into().expect("4 bytes"));
    let fraction = u32::from_be_bytes(response[44..48].try_into().expect("4 bytes"));
    let server_time =
        f64::from(seconds) + f64::from(fraction) / f64::from(u32::MAX) - NTP_UNIX_OFFSET;

    // Compare against the midpoint of the request round trip.
    Ok(server_time - (sent_at + replied_at) / 2.0)
}

fn unix_now_f64() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

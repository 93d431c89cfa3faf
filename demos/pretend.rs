//! Example responder that impersonates 2019-11-10T00:00:00Z.
//!
//! Run with: `cargo run --example pretend` (binding port 123 requires root;
//! pass a port via NTP_MIMIC_PORT to use an unprivileged one).

use chrono::TimeZone;
use ntp_mimic::NtpResponder;
use std::io::BufRead;

fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();

    let port = std::env::var("NTP_MIMIC_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(123);

    let target = chrono::Utc.with_ymd_and_hms(2019, 11, 10, 0, 0, 0).unwrap();
    let mut responder = NtpResponder::pretending(target, port);
    responder.start()?;
    println!(
        "NTP responder on {} pretending it is {}",
        responder.local_addr()?,
        target,
    );

    println!("Press RETURN to exit...");
    let mut line = String::new();
    let _ = std::io::stdin().lock().read_line(&mut line);

    responder.stop();
    Ok(())
}

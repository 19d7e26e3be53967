//! Timed operations example: a receiver that gives up, then one that doesn't.
//!
//! Run with:
//!   cargo run --example timed-send-recv --features logging

use std::time::{Duration, Instant};

use xchan::logging::{init_logging, LogFormat, LogLevel};
use xchan::{create_channel, Serializer};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(LogFormat::Json, LogLevel::from_env());

    let ch = create_channel::<Vec<String>>(Serializer::Yaml)?;

    let started = Instant::now();
    let nothing = ch.timed_recv(Duration::from_millis(100))?;
    eprintln!(
        "[recv] empty channel -> {nothing:?} after {:?}",
        started.elapsed()
    );

    // SAFETY: the example forks before spawning any threads.
    let pid = unsafe { libc::fork() };
    if pid == 0 {
        std::thread::sleep(Duration::from_millis(50));
        let value = vec!["late".to_string(), "but\0there".to_string()];
        let code = match ch.timed_send(&value, Duration::from_secs(1)) {
            Ok(Some(_)) => 0,
            _ => 1,
        };
        // SAFETY: the child must not run the parent's destructors.
        unsafe { libc::_exit(code) };
    }

    let started = Instant::now();
    let value = ch.timed_recv(Duration::from_secs(5))?;
    eprintln!("[recv] got {value:?} after {:?}", started.elapsed());

    let mut status = 0;
    // SAFETY: `status` is a valid out pointer and `pid` is our child.
    unsafe { libc::waitpid(pid, &mut status, 0) };

    eprintln!(
        "[stats] size={} bytes_sent={} bytes_received={}",
        ch.size()?,
        ch.bytes_sent()?,
        ch.bytes_received()?
    );
    Ok(())
}

//! Parallel access example: forked senders and receivers share one channel.
//!
//! Every sender pushes a batch of messages with non-blocking retries while
//! every receiver pulls until the agreed total has been claimed. The parent
//! then checks that nothing was lost or duplicated.
//!
//! Run with:
//!   XCHAN_LOG=debug cargo run --example parallel-access --features logging

use std::collections::BTreeSet;
use std::time::Duration;

use xchan::logging::{init_logging, LogFormat, LogLevel};
use xchan::{create_channel, ChannelError, Serializer};

const SENDERS: usize = 8;
const RECEIVERS: usize = 8;
const PER_SENDER: usize = 10;

fn retry<R>(mut attempt: impl FnMut() -> Result<R, ChannelError>) -> Result<R, ChannelError> {
    loop {
        match attempt() {
            Err(err) if err.is_retryable() => std::thread::yield_now(),
            other => return other,
        }
    }
}

fn fork_child(body: impl FnOnce() -> Result<(), ChannelError>) -> libc::pid_t {
    // SAFETY: the example forks before spawning any threads.
    let pid = unsafe { libc::fork() };
    if pid == 0 {
        let code = match body() {
            Ok(()) => 0,
            Err(err) => {
                eprintln!("[child {}] {err}", std::process::id());
                1
            }
        };
        // SAFETY: the child must not run the parent's destructors.
        unsafe { libc::_exit(code) };
    }
    pid
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(LogFormat::Text, LogLevel::from_env());

    let work = create_channel::<(usize, usize)>(Serializer::Binary)?;
    let results = create_channel::<Vec<(usize, usize)>>(Serializer::Json)?;
    let claims = create_channel::<u8>(Serializer::Binary)?;
    for _ in 0..SENDERS * PER_SENDER {
        claims.send(&1)?;
    }

    let mut children = Vec::new();
    for sender in 0..SENDERS {
        let work = &work;
        children.push(fork_child(move || {
            for seq in 0..PER_SENDER {
                retry(|| work.send_nonblock(&(sender, seq)))?;
            }
            Ok(())
        }));
    }
    for _ in 0..RECEIVERS {
        children.push(fork_child(|| {
            let mut got = Vec::new();
            // One claim token per message keeps receivers from overshooting.
            loop {
                match claims.recv_nonblock() {
                    Ok(_) => got.push(retry(|| work.recv_nonblock())?),
                    Err(ChannelError::WaitReadable) => break,
                    Err(ChannelError::WaitLockable) => std::thread::yield_now(),
                    Err(err) => return Err(err),
                }
            }
            results.send(&got)?;
            Ok(())
        }));
    }

    let mut received = Vec::new();
    for _ in 0..RECEIVERS {
        let batch = results
            .timed_recv(Duration::from_secs(30))?
            .ok_or("receiver did not report in time")?;
        received.extend(batch);
    }

    let mut failures = 0;
    for pid in children {
        let mut status = 0;
        // SAFETY: `status` is a valid out pointer and `pid` is our child.
        unsafe { libc::waitpid(pid, &mut status, 0) };
        if !libc::WIFEXITED(status) || libc::WEXITSTATUS(status) != 0 {
            failures += 1;
        }
    }

    let unique: BTreeSet<_> = received.iter().copied().collect();
    eprintln!(
        "[parent] received={} unique={} bytes_sent={} bytes_received={} failures={failures}",
        received.len(),
        unique.len(),
        work.bytes_sent()?,
        work.bytes_received()?,
    );

    if unique.len() != SENDERS * PER_SENDER || received.len() != unique.len() || failures > 0 {
        return Err("messages were lost or duplicated".into());
    }
    Ok(())
}

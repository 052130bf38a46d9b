//! Real-time scheduling for the audio thread
//!
//! Linux only: SCHED_FIFO, then SCHED_RR. Both need CAP_SYS_NICE or an
//! rtprio limit; failure is reported, not fatal, and the loop keeps running
//! at normal priority.

use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityResult {
    Success,
    Failed,
    Unsupported,
}

/// Elevate the calling thread. Call once, from the audio thread itself.
pub fn promote_current_thread() -> PriorityResult {
    let result = platform_promote();
    match result {
        PriorityResult::Success => info!("Audio thread elevated to real-time priority"),
        PriorityResult::Failed => warn!("Failed to set real-time thread priority, continuing at normal priority"),
        PriorityResult::Unsupported => debug!("Real-time priority not supported on this platform"),
    }
    result
}

#[cfg(target_os = "linux")]
fn platform_promote() -> PriorityResult {
    use libc::{pthread_self, pthread_setschedparam, sched_param, SCHED_FIFO, SCHED_RR};

    let thread = unsafe { pthread_self() };

    // 80 leaves room above for kernel and device IRQ threads
    let param = sched_param { sched_priority: 80 };
    let rc = unsafe { pthread_setschedparam(thread, SCHED_FIFO, &param) };
    if rc == 0 {
        return PriorityResult::Success;
    }
    debug!(errno = rc, "SCHED_FIFO refused, trying SCHED_RR");

    let param = sched_param { sched_priority: 70 };
    let rc = unsafe { pthread_setschedparam(thread, SCHED_RR, &param) };
    if rc == 0 {
        PriorityResult::Success
    } else {
        debug!(errno = rc, "SCHED_RR refused");
        PriorityResult::Failed
    }
}

#[cfg(not(target_os = "linux"))]
fn platform_promote() -> PriorityResult {
    PriorityResult::Unsupported
}

//! Real-time scheduling helpers (Linux SCHED_FIFO / mlockall).

#[cfg(target_os = "linux")]
pub fn setup_rt_once(rt: bool) {
    use libc::{
        mlockall, sched_get_priority_max, sched_param, sched_setscheduler, MCL_CURRENT,
        MCL_FUTURE, SCHED_FIFO,
    };
    use std::sync::OnceLock;
    static RT_ONCE: OnceLock<()> = OnceLock::new();

    if !rt {
        return;
    }

    RT_ONCE.get_or_init(|| {
        // Lock pages so the tick thread never faults mid-cycle.
        let rc = unsafe { mlockall(MCL_CURRENT | MCL_FUTURE) };
        if rc != 0 {
            tracing::warn!(
                error = %std::io::Error::last_os_error(),
                "mlockall failed; continuing without memory locking"
            );
        }

        let max = unsafe { sched_get_priority_max(SCHED_FIFO) };
        let prio = if max > 0 { max.min(80) } else { 80 };
        let param = sched_param {
            sched_priority: prio,
        };
        let rc = unsafe { sched_setscheduler(0, SCHED_FIFO, &param) };
        if rc != 0 {
            tracing::warn!(
                error = %std::io::Error::last_os_error(),
                "SCHED_FIFO not available (needs CAP_SYS_NICE); running best-effort"
            );
        } else {
            tracing::info!(prio, "SCHED_FIFO scheduling active");
        }
    });
}

#[cfg(not(target_os = "linux"))]
pub fn setup_rt_once(rt: bool) {
    if rt {
        eprintln!("Warning: real-time scheduling is only supported on Linux; flag ignored.");
    }
}

// Thread placement for the pipeline workers.
//
// The reader and hasher share a small set of front cores; the map worker
// gets the last allowed core to itself so its cache footprint (hot map
// pages) is not evicted by the reader's streaming I/O.
//
// Placement is best-effort measurement/throughput hygiene: on non-Linux
// platforms, in constrained cgroups, or on failure, workers simply run
// unpinned and a warning is logged once per worker.

use std::io;

/// Placement class of a pipeline thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Reader/hasher/coordinator: share the front of the allowed set.
    Shared,
    /// Map worker: alone on the last allowed core.
    Isolated,
}

/// Pin the current thread according to its placement, best-effort.
///
/// Does nothing when fewer than four CPUs are allowed (there is no point
/// separating the map worker on a small machine).
pub fn pin_current_thread(placement: Placement) {
    let Some(allowed) = allowed_cpus() else {
        return;
    };
    if allowed.len() < 4 {
        return;
    }
    let cores: &[usize] = match placement {
        Placement::Shared => &allowed[..allowed.len() - 1],
        Placement::Isolated => &allowed[allowed.len() - 1..],
    };
    if let Err(e) = pin_to_cores(cores) {
        log::warn!("thread pinning failed ({placement:?}): {e}");
    }
}

/// The CPUs this process may run on, in ascending order.
///
/// Respects cgroups/cpusets/taskset; `None` where the platform offers no
/// affinity API.
#[cfg(target_os = "linux")]
pub fn allowed_cpus() -> Option<Vec<usize>> {
    // Safety: zeroed cpu_set_t is valid; sched_getaffinity with pid 0
    // queries the calling thread.
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        if libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut set) != 0 {
            return None;
        }
        let capacity = std::mem::size_of::<libc::cpu_set_t>() * 8;
        Some((0..capacity).filter(|&c| libc::CPU_ISSET(c, &set)).collect())
    }
}

#[cfg(not(target_os = "linux"))]
pub fn allowed_cpus() -> Option<Vec<usize>> {
    None
}

/// Restrict the current thread to `cores`.
#[cfg(target_os = "linux")]
fn pin_to_cores(cores: &[usize]) -> io::Result<()> {
    let capacity = std::mem::size_of::<libc::cpu_set_t>() * 8;
    // Safety: zeroed cpu_set_t is valid; every core index is bounds-checked
    // against the set capacity before CPU_SET.
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        for &core in cores {
            if core >= capacity {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("core index {core} exceeds cpu_set_t capacity {capacity}"),
                ));
            }
            libc::CPU_SET(core, &mut set);
        }
        let rc = libc::pthread_setaffinity_np(
            libc::pthread_self(),
            std::mem::size_of::<libc::cpu_set_t>(),
            &set,
        );
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn pin_to_cores(_cores: &[usize]) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "CPU affinity is not supported on this platform",
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

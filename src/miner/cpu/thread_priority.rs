//! Miner threads run at reduced priority so a busy machine stays responsive.

use std::io;

#[cfg(windows)]
pub fn set_low_priority() -> io::Result<()> {
    use winapi::um::processthreadsapi::{GetCurrentThread, SetThreadPriority};
    use winapi::um::winbase::THREAD_PRIORITY_BELOW_NORMAL;

    match unsafe { SetThreadPriority(GetCurrentThread(), THREAD_PRIORITY_BELOW_NORMAL as i32) } {
        0 => Err(io::Error::last_os_error()),
        _ => Ok(()),
    }
}

/// Lower the calling thread's scheduling priority. On Linux the priority of
/// `PRIO_PROCESS` with id 0 applies to the calling thread only.
#[cfg(unix)]
pub fn set_low_priority() -> io::Result<()> {
    const NICENESS: libc::c_int = 5;

    match unsafe { libc::setpriority(libc::PRIO_PROCESS as _, 0, NICENESS) } {
        0 => Ok(()),
        _ => Err(io::Error::last_os_error()),
    }
}

#[cfg(not(any(unix, windows)))]
pub fn set_low_priority() -> io::Result<()> {
    Ok(())
}

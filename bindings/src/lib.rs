#![allow(clippy::missing_safety_doc)] // Well, using C-pointers *is* unsafe...

use std::convert::TryFrom;
use std::ffi::{CStr, OsStr};
use std::os::raw::{c_char, c_int};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::slice;

use fdhandle::{
    errors::Error, FileHandle as RawFileHandle, LockKind, OpenFlags, RangeLock, StatusFlags,
    Whence,
};
use libc::{mode_t, off_t, pid_t};
use log::debug;

/// Status returned on success.
pub const STATUS_OK: c_int = 0;

/// Status returned if a handle already holds a descriptor.
pub const STATUS_ALREADY_OPEN: c_int = -1;

struct Environment;

impl Environment {
    pub fn execute<C: FnOnce() -> Result<(), c_int>>(body: C) -> c_int {
        match body() {
            Ok(()) => STATUS_OK,
            Err(code) => code,
        }
    }

    pub fn handle<'a>(handle: *const FileHandle) -> Result<&'a RawFileHandle, c_int> {
        unsafe { handle.as_ref() }
            .map(|handle| &handle.0)
            .ok_or(libc::EINVAL)
    }

    pub fn handle_mut<'a>(handle: *mut FileHandle) -> Result<&'a mut RawFileHandle, c_int> {
        unsafe { handle.as_mut() }
            .map(|handle| &mut handle.0)
            .ok_or(libc::EINVAL)
    }

    pub fn parse_path<'a>(c_string: *const c_char) -> Result<&'a Path, c_int> {
        (!c_string.is_null())
            .then(|| unsafe { CStr::from_ptr(c_string) })
            .map(|raw_str| Path::new(OsStr::from_bytes(raw_str.to_bytes())))
            .ok_or(libc::EINVAL)
    }

    pub fn parse_whence(whence: c_int) -> Result<Whence, c_int> {
        Whence::try_from(whence).map_err(|_| libc::EINVAL)
    }

    pub fn store<T>(destination: *mut T, value: T) {
        if let Some(destination) = unsafe { destination.as_mut() } {
            *destination = value;
        }
    }
}

/// The handle to a file descriptor.
pub struct FileHandle(RawFileHandle);

/// Create a handle which does not hold a descriptor yet.
///
/// @return A pointer to the handle, to be released with DestroyFileHandle.
#[no_mangle]
pub extern "C" fn NewFileHandle() -> *mut FileHandle {
    Box::into_raw(Box::new(FileHandle(RawFileHandle::new())))
}

/// Destroy a file handle, closing its descriptor.
///
/// @param file_handle The file handle. Passing nullptr is a safe no-op.
#[no_mangle]
pub unsafe extern "C" fn DestroyFileHandle(file_handle: *mut FileHandle) {
    if file_handle.is_null() {
        return;
    }
    drop(Box::from_raw(file_handle));
}

/// Return the raw descriptor of a handle.
///
/// @return The descriptor or -1 if the handle is not open.
#[no_mangle]
pub unsafe extern "C" fn GetDescriptor(file_handle: *const FileHandle) -> c_int {
    match Environment::handle(file_handle) {
        Ok(handle) => handle.descriptor(),
        Err(_) => -1,
    }
}

/// Open an existing file.
///
/// @param file_handle The handle, which must not be open yet.
///
/// @param path The path of the file.
///
/// @param flags The O_* flags. O_CREAT is rejected with EINVAL.
///
/// @return 0 on success, -1 if the handle is already open, an errno value otherwise.
#[no_mangle]
pub unsafe extern "C" fn Open(file_handle: *mut FileHandle, path: *const c_char, flags: c_int) -> c_int {
    Environment::execute(|| {
        let handle = Environment::handle_mut(file_handle)?;
        let path = Environment::parse_path(path)?;
        let flags = OpenFlags::from_bits_retain(flags);
        handle.open(path, flags).map_err(|error| error.code())
    })
}

/// Open a file, creating it if it does not exist.
///
/// @param mode The permission bits of a newly created file.
///
/// @return 0 on success, -1 if the handle is already open, an errno value otherwise.
#[no_mangle]
pub unsafe extern "C" fn Create(
    file_handle: *mut FileHandle,
    path: *const c_char,
    flags: c_int,
    mode: mode_t,
) -> c_int {
    Environment::execute(|| {
        let handle = Environment::handle_mut(file_handle)?;
        let path = Environment::parse_path(path)?;
        let flags = OpenFlags::from_bits_retain(flags);
        handle.create(path, flags, mode).map_err(|error| error.code())
    })
}

/// Close the descriptor of a handle. Closing a handle which is not open succeeds.
///
/// @return 0 on success, an errno value otherwise.
#[no_mangle]
pub unsafe extern "C" fn Close(file_handle: *mut FileHandle) -> c_int {
    Environment::execute(|| {
        let handle = Environment::handle_mut(file_handle)?;
        handle.close().map_err(|error| error.code())
    })
}

/// Duplicate the descriptor of source into target, reusing the descriptor slot of target if it is open.
///
/// @return 0 on success, an errno value otherwise.
#[no_mangle]
pub unsafe extern "C" fn Duplicate(source: *const FileHandle, target: *mut FileHandle) -> c_int {
    Environment::execute(|| {
        if std::ptr::eq(source, target) {
            return Ok(());
        }
        let source = Environment::handle(source)?;
        let target = Environment::handle_mut(target)?;
        source.duplicate_into(target).map_err(|error| error.code())
    })
}

/// Reposition the file offset.
///
/// @param position Receives the new offset from the start of the file. May be nullptr.
///
/// @return 0 on success, an errno value otherwise.
#[no_mangle]
pub unsafe extern "C" fn Seek(
    file_handle: *const FileHandle,
    offset: off_t,
    whence: c_int,
    position: *mut off_t,
) -> c_int {
    Environment::execute(|| {
        let handle = Environment::handle(file_handle)?;
        let whence = Environment::parse_whence(whence)?;
        let new_position = handle.seek(offset, whence).map_err(|error| error.code())?;
        Environment::store(position, new_position as off_t);
        Ok(())
    })
}

/// Read up to length bytes in a single attempt.
///
/// @param bytes_read Receives the number of bytes read. May be nullptr.
///
/// @return 0 on success, an errno value otherwise.
#[no_mangle]
pub unsafe extern "C" fn Read(
    file_handle: *const FileHandle,
    buffer: *mut u8,
    length: usize,
    bytes_read: *mut usize,
) -> c_int {
    Environment::execute(|| {
        let handle = Environment::handle(file_handle)?;
        if buffer.is_null() && length > 0 {
            return Err(libc::EINVAL);
        }
        let buffer = match length {
            0 => &mut [][..],
            length => slice::from_raw_parts_mut(buffer, length),
        };
        let count = handle.read(buffer).map_err(|error| error.code())?;
        Environment::store(bytes_read, count);
        Ok(())
    })
}

/// Write up to length bytes in a single attempt.
///
/// @param bytes_written Receives the number of bytes written. May be nullptr.
///
/// @return 0 on success, an errno value otherwise.
#[no_mangle]
pub unsafe extern "C" fn Write(
    file_handle: *const FileHandle,
    buffer: *const u8,
    length: usize,
    bytes_written: *mut usize,
) -> c_int {
    Environment::execute(|| {
        let handle = Environment::handle(file_handle)?;
        if buffer.is_null() && length > 0 {
            return Err(libc::EINVAL);
        }
        let buffer = match length {
            0 => &[][..],
            length => slice::from_raw_parts(buffer, length),
        };
        let count = handle.write(buffer).map_err(|error| error.code())?;
        Environment::store(bytes_written, count);
        Ok(())
    })
}

/// Query the file status flags.
///
/// @param flags Receives the O_* flags, or 0 on failure.
///
/// @return 0 on success, an errno value otherwise.
#[no_mangle]
pub unsafe extern "C" fn GetFlags(file_handle: *const FileHandle, flags: *mut c_int) -> c_int {
    Environment::store(flags, 0);
    Environment::execute(|| {
        let handle = Environment::handle(file_handle)?;
        let current = handle.flags().map_err(|error| error.code())?;
        Environment::store(flags, current.bits());
        Ok(())
    })
}

/// Replace the file status flags.
///
/// @return 0 on success, an errno value otherwise.
#[no_mangle]
pub unsafe extern "C" fn SetFlags(file_handle: *const FileHandle, flags: c_int) -> c_int {
    Environment::execute(|| {
        let handle = Environment::handle(file_handle)?;
        handle
            .set_flags(StatusFlags::from_bits_retain(flags))
            .map_err(|error| error.code())
    })
}

macro_rules! flag_accessors {
    ($($getter:ident, $setter:ident, $get:ident, $set:ident, $description:literal;)*) => {
        $(
            #[doc = concat!("Checks whether ", $description, " is enabled. Reports false on failure.")]
            #[no_mangle]
            pub unsafe extern "C" fn $getter(file_handle: *const FileHandle) -> bool {
                Environment::handle(file_handle)
                    .map(|handle| handle.$get())
                    .unwrap_or(false)
            }

            #[doc = concat!("Enables or disables ", $description, ". Does nothing on failure.")]
            #[no_mangle]
            pub unsafe extern "C" fn $setter(file_handle: *const FileHandle, enabled: bool) {
                if let Ok(handle) = Environment::handle(file_handle) {
                    handle.$set(enabled);
                }
            }
        )*
    };
}

flag_accessors! {
    GetAppend, SetAppend, append, set_append, "appending writes";
    GetNonBlocking, SetNonBlocking, non_blocking, set_non_blocking, "non-blocking mode";
    GetSyncWrite, SetSyncWrite, sync_write, set_sync_write, "synchronous writes";
    GetAsync, SetAsync, async_io, set_async_io, "signal-driven I/O";
    GetCloseOnExec, SetCloseOnExec, close_on_exec, set_close_on_exec, "closing on exec";
}

/// Checks whether the descriptor permits reading. Reports false on failure.
#[no_mangle]
pub unsafe extern "C" fn IsReadable(file_handle: *const FileHandle) -> bool {
    Environment::handle(file_handle)
        .map(|handle| handle.is_readable())
        .unwrap_or(false)
}

/// Checks whether the descriptor permits writing. Reports false on failure.
#[no_mangle]
pub unsafe extern "C" fn IsWritable(file_handle: *const FileHandle) -> bool {
    Environment::handle(file_handle)
        .map(|handle| handle.is_writable())
        .unwrap_or(false)
}

/// Query the size of the file.
///
/// @param size Receives the size in bytes. May be nullptr.
///
/// @return 0 on success, an errno value otherwise.
#[no_mangle]
pub unsafe extern "C" fn GetSize(file_handle: *const FileHandle, size: *mut off_t) -> c_int {
    Environment::execute(|| {
        let handle = Environment::handle(file_handle)?;
        let stat = handle.stat().map_err(|error| error.code())?;
        Environment::store(size, stat.size as off_t);
        Ok(())
    })
}

/// Change the permission bits of the file.
///
/// @return 0 on success, an errno value otherwise.
#[no_mangle]
pub unsafe extern "C" fn ChangeMode(file_handle: *const FileHandle, mode: mode_t) -> c_int {
    Environment::execute(|| {
        let handle = Environment::handle(file_handle)?;
        handle.change_mode(mode).map_err(|error| error.code())
    })
}

/// Truncate or extend the file.
///
/// @return 0 on success, an errno value otherwise.
#[no_mangle]
pub unsafe extern "C" fn Truncate(file_handle: *const FileHandle, length: off_t) -> c_int {
    Environment::execute(|| {
        let handle = Environment::handle(file_handle)?;
        handle.truncate(length).map_err(|error| error.code())
    })
}

/// Flush data and metadata of the file to the device.
///
/// @return 0 on success, an errno value otherwise.
#[no_mangle]
pub unsafe extern "C" fn Sync(file_handle: *const FileHandle) -> c_int {
    Environment::execute(|| {
        let handle = Environment::handle(file_handle)?;
        handle.sync().map_err(|error| error.code())
    })
}

unsafe fn lock_range(
    file_handle: *const FileHandle,
    kind: LockKind,
    start: off_t,
    whence: c_int,
    length: off_t,
    wait: bool,
) -> c_int {
    Environment::execute(|| {
        let handle = Environment::handle(file_handle)?;
        let whence = Environment::parse_whence(whence)?;
        let lock = RangeLock::new(kind, start, whence, length);
        debug!("{:?} requested through the C interface", lock);
        handle
            .set_record_lock(&lock, wait)
            .map_err(|error| error.code())
    })
}

/// Place a shared lock on a range.
///
/// @param wait Whether to wait for conflicting locks to be released.
///
/// @return 0 on success, EAGAIN or EACCES as reported by the system if the range is locked and wait is false, an errno value otherwise.
#[no_mangle]
pub unsafe extern "C" fn ReadLockRange(
    file_handle: *const FileHandle,
    start: off_t,
    whence: c_int,
    length: off_t,
    wait: bool,
) -> c_int {
    lock_range(file_handle, LockKind::Read, start, whence, length, wait)
}

/// Place an exclusive lock on a range.
///
/// @param wait Whether to wait for conflicting locks to be released.
///
/// @return 0 on success, EAGAIN or EACCES as reported by the system if the range is locked and wait is false, an errno value otherwise.
#[no_mangle]
pub unsafe extern "C" fn WriteLockRange(
    file_handle: *const FileHandle,
    start: off_t,
    whence: c_int,
    length: off_t,
    wait: bool,
) -> c_int {
    lock_range(file_handle, LockKind::Write, start, whence, length, wait)
}

/// Release the locks of this process on a range.
///
/// @return 0 on success, an errno value otherwise.
#[no_mangle]
pub unsafe extern "C" fn UnlockRange(
    file_handle: *const FileHandle,
    start: off_t,
    whence: c_int,
    length: off_t,
) -> c_int {
    lock_range(file_handle, LockKind::Unlock, start, whence, length, false)
}

/// Check whether a lock could be placed on a range.
///
/// @param exclusive Whether an exclusive (write) or a shared (read) lock is of interest.
///
/// @param holder Receives 0 if the range is lockable, the process holding a conflicting lock otherwise. May be nullptr.
///
/// @return 0 if the query succeeded (regardless of the lock state), an errno value otherwise.
#[no_mangle]
pub unsafe extern "C" fn IsRangeLockable(
    file_handle: *const FileHandle,
    exclusive: bool,
    start: off_t,
    whence: c_int,
    length: off_t,
    holder: *mut pid_t,
) -> c_int {
    Environment::execute(|| {
        let handle = Environment::handle(file_handle)?;
        let whence = Environment::parse_whence(whence)?;
        let status = match exclusive {
            true => handle.is_range_write_lockable(start, whence, length),
            false => handle.is_range_read_lockable(start, whence, length),
        }
        .map_err(|error| error.code())?;
        Environment::store(holder, status.holder());
        Ok(())
    })
}

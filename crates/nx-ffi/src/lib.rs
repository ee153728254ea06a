//! C ABI over the nx-runtime executor.
//!
//! The session cycle mirrors [`nx_exec::Executor`]: create, bind inputs and
//! outputs, load the model, then `nx_load_data` / `nx_run` /
//! `nx_read_output` as often as needed, and destroy.

mod context;
mod error;
mod types;

pub use context::*;
pub use error::*;
pub use types::*;

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::path::Path;

/// Execute a closure that returns an `NxStatus`, catching any panics
/// and converting them into `NxStatus::ErrorInternal`.
fn catch_panic<F: FnOnce() -> NxStatus>(f: F) -> NxStatus {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(status) => status,
        Err(_) => fail("internal panic", NxStatus::ErrorInternal),
    }
}

/// Borrows a C string argument as UTF-8.
unsafe fn c_str<'a>(ptr: *const c_char, what: &str) -> Result<&'a str, NxStatus> {
    if ptr.is_null() {
        return Err(fail(format!("{} is null", what), NxStatus::ErrorInvalidArgument));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|e| fail(format!("invalid {}: {}", what, e), NxStatus::ErrorInvalidArgument))
}

fn status_of(result: nx_exec::Result<()>) -> NxStatus {
    match result {
        Ok(()) => NxStatus::Ok,
        Err(e) => {
            let status = NxStatus::from(&e);
            fail(e, status)
        }
    }
}

/// Create a new executor session on the given target.
///
/// On success, writes a heap-allocated `NxExecutor` pointer into `*out`.
/// The caller must later call `nx_executor_destroy` to free it.
#[no_mangle]
pub extern "C" fn nx_executor_create(kind: NxTargetKind, out: *mut *mut NxExecutor) -> NxStatus {
    catch_panic(|| {
        if out.is_null() {
            return fail("out is null", NxStatus::ErrorInvalidArgument);
        }
        match NxExecutor::new(kind) {
            Ok(exec) => {
                unsafe { *out = Box::into_raw(Box::new(exec)) };
                NxStatus::Ok
            }
            Err(e) => fail(e, NxStatus::ErrorDevice),
        }
    })
}

/// Destroy a session previously created by `nx_executor_create`.
///
/// Passing a null pointer is a no-op and returns `NxStatus::Ok`.
#[no_mangle]
pub unsafe extern "C" fn nx_executor_destroy(exec: *mut NxExecutor) -> NxStatus {
    if exec.is_null() {
        return NxStatus::Ok;
    }
    drop(Box::from_raw(exec));
    NxStatus::Ok
}

/// Bind input `name` with `ndim` dims read from `dims`. Must precede
/// `nx_load_model`.
#[no_mangle]
pub unsafe extern "C" fn nx_bind_input(
    exec: *mut NxExecutor,
    name: *const c_char,
    dims: *const usize,
    ndim: usize,
) -> NxStatus {
    catch_panic(|| {
        if exec.is_null() || (dims.is_null() && ndim > 0) {
            return fail("null argument", NxStatus::ErrorInvalidArgument);
        }
        let name = match unsafe { c_str(name, "name") } {
            Ok(s) => s,
            Err(status) => return status,
        };
        let dims = if ndim == 0 {
            &[][..]
        } else {
            unsafe { std::slice::from_raw_parts(dims, ndim) }
        };
        let exec = unsafe { &mut *exec };
        status_of(exec.executor.bind_input(name, dims))
    })
}

/// Bind output `name` so it survives compilation and can be read back.
#[no_mangle]
pub unsafe extern "C" fn nx_bind_output(exec: *mut NxExecutor, name: *const c_char) -> NxStatus {
    catch_panic(|| {
        if exec.is_null() {
            return fail("exec is null", NxStatus::ErrorInvalidArgument);
        }
        let name = match unsafe { c_str(name, "name") } {
            Ok(s) => s,
            Err(status) => return status,
        };
        let exec = unsafe { &mut *exec };
        status_of(exec.executor.bind_output(name))
    })
}

/// Load and compile the model directory `dir`. `combined` selects the single
/// `params` container over one file per parameter.
#[no_mangle]
pub unsafe extern "C" fn nx_load_model(exec: *mut NxExecutor, dir: *const c_char, combined: bool) -> NxStatus {
    catch_panic(|| {
        if exec.is_null() {
            return fail("exec is null", NxStatus::ErrorInvalidArgument);
        }
        let dir = match unsafe { c_str(dir, "dir") } {
            Ok(s) => s,
            Err(status) => return status,
        };
        let exec = unsafe { &mut *exec };
        status_of(exec.executor.load_model(Path::new(dir), combined))
    })
}

/// Copy `len` host-order floats into input `name`.
#[no_mangle]
pub unsafe extern "C" fn nx_load_data(
    exec: *mut NxExecutor,
    name: *const c_char,
    data: *const f32,
    len: usize,
) -> NxStatus {
    catch_panic(|| {
        if exec.is_null() || (data.is_null() && len > 0) {
            return fail("null argument", NxStatus::ErrorInvalidArgument);
        }
        let name = match unsafe { c_str(name, "name") } {
            Ok(s) => s,
            Err(status) => return status,
        };
        let data = if len == 0 {
            &[][..]
        } else {
            unsafe { std::slice::from_raw_parts(data, len) }
        };
        let exec = unsafe { &mut *exec };
        let target = exec.executor.target().clone();
        status_of(exec.executor.load_data(name, data, &target))
    })
}

/// Execute the compiled plan once.
#[no_mangle]
pub unsafe extern "C" fn nx_run(exec: *mut NxExecutor) -> NxStatus {
    catch_panic(|| {
        if exec.is_null() {
            return fail("exec is null", NxStatus::ErrorInvalidArgument);
        }
        let exec = unsafe { &mut *exec };
        status_of(exec.executor.run())
    })
}

/// Write the shape of value `name` into `dims` (room for `capacity` dims)
/// and its rank into `*ndim`. A rank above `capacity` writes only `*ndim`
/// and returns `ErrorSizeMismatch`.
#[no_mangle]
pub unsafe extern "C" fn nx_output_shape(
    exec: *const NxExecutor,
    name: *const c_char,
    dims: *mut usize,
    capacity: usize,
    ndim: *mut usize,
) -> NxStatus {
    catch_panic(|| {
        if exec.is_null() || ndim.is_null() || (dims.is_null() && capacity > 0) {
            return fail("null argument", NxStatus::ErrorInvalidArgument);
        }
        let name = match unsafe { c_str(name, "name") } {
            Ok(s) => s,
            Err(status) => return status,
        };
        let exec = unsafe { &*exec };
        let shape = match exec.executor.tensor_shape(name) {
            Ok(s) => s,
            Err(e) => {
                let status = NxStatus::from(&e);
                return fail(e, status);
            }
        };
        unsafe { *ndim = shape.ndim() };
        if shape.ndim() > capacity {
            return fail(
                format!("'{}' has rank {}, buffer holds {}", name, shape.ndim(), capacity),
                NxStatus::ErrorSizeMismatch,
            );
        }
        if shape.ndim() > 0 {
            let out = unsafe { std::slice::from_raw_parts_mut(dims, shape.ndim()) };
            out.copy_from_slice(shape.dims());
        }
        NxStatus::Ok
    })
}

/// Copy output `name` in host order into `out`, which must hold exactly
/// `len` floats.
#[no_mangle]
pub unsafe extern "C" fn nx_read_output(
    exec: *const NxExecutor,
    name: *const c_char,
    out: *mut f32,
    len: usize,
) -> NxStatus {
    catch_panic(|| {
        if exec.is_null() || (out.is_null() && len > 0) {
            return fail("null argument", NxStatus::ErrorInvalidArgument);
        }
        let name = match unsafe { c_str(name, "name") } {
            Ok(s) => s,
            Err(status) => return status,
        };
        let exec = unsafe { &*exec };
        let tensor = match exec.executor.read_output(name) {
            Ok(t) => t,
            Err(e) => {
                let status = NxStatus::from(&e);
                return fail(e, status);
            }
        };
        if tensor.numel() != len {
            return fail(
                format!("'{}' has {} elements, buffer holds {}", name, tensor.numel(), len),
                NxStatus::ErrorSizeMismatch,
            );
        }
        if len > 0 {
            let out = unsafe { std::slice::from_raw_parts_mut(out, len) };
            out.copy_from_slice(tensor.data());
        }
        NxStatus::Ok
    })
}

/// Retrieve the last error message.
///
/// Returns a pointer to a C string describing the most recent error, or
/// null if no error has occurred. The caller must free the returned string
/// with `nx_free_string`.
#[no_mangle]
pub extern "C" fn nx_last_error() -> *mut c_char {
    match error::take_last_error() {
        Some(e) => e.into_raw(),
        None => std::ptr::null_mut(),
    }
}

/// Free a string previously returned by `nx_last_error`.
#[no_mangle]
pub unsafe extern "C" fn nx_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nx_model::{residual_cnn, SynthConfig};
    use std::ptr;
    use tempfile::tempdir;

    fn c(s: &str) -> CString {
        CString::new(s).unwrap()
    }

    fn last_error() -> String {
        let p = nx_last_error();
        assert!(!p.is_null());
        let msg = unsafe { CStr::from_ptr(p) }.to_str().unwrap().to_string();
        unsafe { nx_free_string(p) };
        msg
    }

    #[test]
    fn test_full_session() {
        let dir = tempdir().unwrap();
        residual_cnn(&SynthConfig::default(), 11)
            .unwrap()
            .write_to(dir.path())
            .unwrap();

        let mut exec = ptr::null_mut();
        assert_eq!(nx_executor_create(NxTargetKind::Accelerator, &mut exec), NxStatus::Ok);
        let input = c("image");
        let output = c("save_infer_model/scale_0");
        let dims = [1usize, 3, 32, 32];
        unsafe {
            assert_eq!(nx_bind_input(exec, input.as_ptr(), dims.as_ptr(), 4), NxStatus::Ok);
            assert_eq!(nx_bind_output(exec, output.as_ptr()), NxStatus::Ok);
            assert_eq!(nx_run(exec), NxStatus::ErrorNotLoaded);

            let path = c(dir.path().to_str().unwrap());
            assert_eq!(nx_load_model(exec, path.as_ptr(), true), NxStatus::Ok);
            assert_eq!(nx_run(exec), NxStatus::ErrorRun);

            let data = vec![0.5f32; 3 * 32 * 32];
            assert_eq!(
                nx_load_data(exec, input.as_ptr(), data.as_ptr(), data.len() - 1),
                NxStatus::ErrorSizeMismatch
            );
            assert_eq!(nx_load_data(exec, input.as_ptr(), data.as_ptr(), data.len()), NxStatus::Ok);
            assert_eq!(nx_run(exec), NxStatus::Ok);

            let mut shape = [0usize; 4];
            let mut ndim = 0usize;
            assert_eq!(
                nx_output_shape(exec, output.as_ptr(), shape.as_mut_ptr(), 4, &mut ndim),
                NxStatus::Ok
            );
            assert_eq!(&shape[..ndim], &[1, 10]);

            let mut probs = vec![0.0f32; 10];
            assert_eq!(nx_read_output(exec, output.as_ptr(), probs.as_mut_ptr(), 10), NxStatus::Ok);
            assert!(probs.iter().all(|p| p.is_finite() && *p >= 0.0));

            assert_eq!(nx_executor_destroy(exec), NxStatus::Ok);
        }
    }

    #[test]
    fn test_errors_set_last_error() {
        assert_eq!(
            nx_executor_create(NxTargetKind::Host, ptr::null_mut()),
            NxStatus::ErrorInvalidArgument
        );
        assert_eq!(last_error(), "out is null");

        let mut exec = ptr::null_mut();
        assert_eq!(nx_executor_create(NxTargetKind::Host, &mut exec), NxStatus::Ok);
        let missing = c("/nonexistent/model");
        unsafe {
            assert_eq!(nx_load_model(exec, missing.as_ptr(), true), NxStatus::ErrorModelLoad);
            assert!(last_error().contains("missing file"));
            assert_eq!(nx_bind_output(exec, ptr::null()), NxStatus::ErrorInvalidArgument);
            assert_eq!(last_error(), "name is null");
            assert_eq!(nx_executor_destroy(exec), NxStatus::Ok);
            assert_eq!(nx_executor_destroy(ptr::null_mut()), NxStatus::Ok);
        }
        assert!(nx_last_error().is_null());
    }
}

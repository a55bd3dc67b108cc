//! Host-side shim functions
//!
//! Two groups of imports are satisfied here before a module instantiates:
//! the bridge's own host services under `bridge_env` (HTTP fetch for plugin
//! code), and the compatibility shims under the `compat/replace` namespace
//! that stand in for platform APIs the patcher redirected. Imports with no
//! shim are stubbed as traps, so an extension that never calls them loads
//! and runs untouched.

use crate::core::error::{BridgeError, Result};
use crate::loader::registry::HostState;
use std::time::Duration;
use wasmtime::{Caller, Extern, Linker};

/// Register every host function the bridge provides
pub fn register_host_functions(linker: &mut Linker<HostState>) -> Result<()> {
    register_bridge_env(linker)?;
    register_platform_shims(linker)?;
    Ok(())
}

fn define_error(name: &str, e: impl std::fmt::Display) -> BridgeError {
    BridgeError::Internal(format!("failed to define host function {}: {}", name, e))
}

/// Read a UTF-8 string out of the caller's exported memory
fn read_guest_string(caller: &mut Caller<'_, HostState>, ptr: i32, len: i32) -> Option<String> {
    let memory = match caller.get_export("memory") {
        Some(Extern::Memory(memory)) => memory,
        _ => return None,
    };
    let data = memory.data(&caller);
    let start = usize::try_from(ptr).ok()?;
    let end = start.checked_add(usize::try_from(len).ok()?)?;
    if end > data.len() {
        return None;
    }
    String::from_utf8(data[start..end].to_vec()).ok()
}

/// `bridge_env`: HTTP fetch primitives for plugin code.
///
/// `http_get(url_ptr, url_len) -> handle` performs a GET on the host and
/// stores the body; negative returns are errors (HTTP failures return the
/// negated status). `http_response_size(handle)` and
/// `http_read_body(handle, ptr, len)` drain the stored body.
fn register_bridge_env(linker: &mut Linker<HostState>) -> Result<()> {
    linker
        .func_wrap(
            "bridge_env",
            "http_get",
            |mut caller: Caller<'_, HostState>, url_ptr: i32, url_len: i32| -> i32 {
                let url = match read_guest_string(&mut caller, url_ptr, url_len) {
                    Some(url) => url,
                    None => return -1,
                };

                tracing::debug!(url = %url, "Extension HTTP request");

                // The blocking client runs on its own thread so the async
                // executor is never parked under it
                let result = std::thread::spawn(move || -> std::result::Result<Vec<u8>, i32> {
                    let client = reqwest::blocking::Client::builder()
                        .user_agent(concat!("yomu-bridge/", env!("CARGO_PKG_VERSION")))
                        .timeout(Duration::from_secs(30))
                        .build()
                        .map_err(|_| -2)?;
                    let response = client.get(&url).send().map_err(|_| -3)?;
                    if !response.status().is_success() {
                        return Err(-i32::from(response.status().as_u16()));
                    }
                    response.bytes().map(|b| b.to_vec()).map_err(|_| -4)
                })
                .join();

                let body = match result {
                    Ok(Ok(body)) => body,
                    Ok(Err(code)) => return code,
                    Err(_) => return -5,
                };

                let handle = (caller.data().http_responses.len() as u32) + 1;
                caller.data_mut().http_responses.insert(handle, body);
                handle as i32
            },
        )
        .map_err(|e| define_error("http_get", e))?;

    linker
        .func_wrap(
            "bridge_env",
            "http_response_size",
            |caller: Caller<'_, HostState>, handle: i32| -> i32 {
                caller
                    .data()
                    .http_responses
                    .get(&(handle as u32))
                    .map_or(-1, |body| body.len() as i32)
            },
        )
        .map_err(|e| define_error("http_response_size", e))?;

    linker
        .func_wrap(
            "bridge_env",
            "http_read_body",
            |mut caller: Caller<'_, HostState>, handle: i32, ptr: i32, len: i32| -> i32 {
                let body = match caller.data().http_responses.get(&(handle as u32)) {
                    Some(body) => body.clone(),
                    None => return -1,
                };

                let copy_len = std::cmp::min(body.len(), len as usize);
                let memory = match caller.get_export("memory") {
                    Some(Extern::Memory(memory)) => memory,
                    _ => return -2,
                };
                if memory
                    .write(&mut caller, ptr as usize, &body[..copy_len])
                    .is_err()
                {
                    return -3;
                }

                // One-shot read: drop the stored body
                caller.data_mut().http_responses.remove(&(handle as u32));
                copy_len as i32
            },
        )
        .map_err(|e| define_error("http_read_body", e))?;

    Ok(())
}

/// Equivalent host implementations for the platform APIs the patcher
/// redirects under `compat/replace`.
fn register_platform_shims(linker: &mut Linker<HostState>) -> Result<()> {
    linker
        .func_wrap(
            "compat/replace/platform/os/system_clock",
            "now_millis",
            |_caller: Caller<'_, HostState>| -> i64 { chrono::Utc::now().timestamp_millis() },
        )
        .map_err(|e| define_error("now_millis", e))?;

    linker
        .func_wrap(
            "compat/replace/platform/text/simple_date_format",
            "format_millis",
            |mut caller: Caller<'_, HostState>,
             pattern_ptr: i32,
             pattern_len: i32,
             millis: i64,
             out_ptr: i32,
             out_cap: i32|
             -> i32 {
                let pattern = match read_guest_string(&mut caller, pattern_ptr, pattern_len) {
                    Some(pattern) => pattern,
                    None => return -1,
                };
                let formatted = format_epoch_millis(&pattern, millis);
                let bytes = formatted.as_bytes();
                if bytes.len() > out_cap as usize {
                    return -2;
                }

                let memory = match caller.get_export("memory") {
                    Some(Extern::Memory(memory)) => memory,
                    _ => return -3,
                };
                if memory.write(&mut caller, out_ptr as usize, bytes).is_err() {
                    return -4;
                }
                bytes.len() as i32
            },
        )
        .map_err(|e| define_error("format_millis", e))?;

    linker
        .func_wrap(
            "compat/replace/platform/net/cookie_manager",
            "clear",
            |_caller: Caller<'_, HostState>| -> i32 { 0 },
        )
        .map_err(|e| define_error("clear", e))?;

    Ok(())
}

/// Render an epoch timestamp with the platform-style pattern subset the
/// extensions actually use (yyyy, MM, dd, HH, mm, ss).
fn format_epoch_millis(pattern: &str, millis: i64) -> String {
    use chrono::TimeZone;

    let datetime = match chrono::Utc.timestamp_millis_opt(millis) {
        chrono::LocalResult::Single(dt) => dt,
        _ => return String::new(),
    };

    pattern
        .replace("yyyy", &format!("{:04}", chrono::Datelike::year(&datetime)))
        .replace("MM", &format!("{:02}", chrono::Datelike::month(&datetime)))
        .replace("dd", &format!("{:02}", chrono::Datelike::day(&datetime)))
        .replace("HH", &format!("{:02}", chrono::Timelike::hour(&datetime)))
        .replace("mm", &format!("{:02}", chrono::Timelike::minute(&datetime)))
        .replace("ss", &format!("{:02}", chrono::Timelike::second(&datetime)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_epoch_millis() {
        // 2021-03-04 05:06:07 UTC
        let millis = 1_614_834_367_000;
        assert_eq!(
            format_epoch_millis("yyyy-MM-dd HH:mm:ss", millis),
            "2021-03-04 05:06:07"
        );
        assert_eq!(format_epoch_millis("yyyy/MM", millis), "2021/03");
    }

    #[test]
    fn test_format_epoch_millis_out_of_range() {
        assert_eq!(format_epoch_millis("yyyy", i64::MAX), "");
    }
}

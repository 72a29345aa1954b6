//! Echo tool — returns the input message.
//!
//! Reference guest for the `sandbox` ABI: exports `memory`, `alloc` and
//! `invoke`; reports results through `sandbox.output` and faults through
//! `sandbox.fail`.

use serde_json::{json, Value};

#[link(wasm_import_module = "sandbox")]
extern "C" {
    fn output(ptr: *const u8, len: usize);
    fn fail(ptr: *const u8, len: usize);
    fn log(level: i32, ptr: *const u8, len: usize);
}

/// Hand the host a buffer for the input. Never freed; the instance is
/// thrown away after one call.
#[no_mangle]
pub extern "C" fn alloc(len: usize) -> *mut u8 {
    let mut buf = Vec::<u8>::with_capacity(len);
    let ptr = buf.as_mut_ptr();
    std::mem::forget(buf);
    ptr
}

#[no_mangle]
pub extern "C" fn invoke(ptr: *const u8, len: usize) -> i32 {
    let input = unsafe { std::slice::from_raw_parts(ptr, len) };
    match echo(input) {
        Ok(result) => {
            let bytes = result.to_string();
            unsafe { output(bytes.as_ptr(), bytes.len()) };
            0
        }
        Err(message) => {
            let payload = json!({ "message": message, "cause": "echo-tool" }).to_string();
            unsafe { fail(payload.as_ptr(), payload.len()) };
            1
        }
    }
}

fn echo(input: &[u8]) -> Result<Value, String> {
    let request: Value = serde_json::from_slice(input).map_err(|e| e.to_string())?;
    let message = request
        .get("message")
        .and_then(Value::as_str)
        .ok_or("missing string field 'message'")?;

    let line = format!("echoing {} bytes", message.len());
    unsafe { log(1, line.as_ptr(), line.len()) };

    Ok(json!({ "message": message, "echo": format!("echo: {message}") }))
}

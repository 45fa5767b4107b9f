// File: src/natives.rs
//
// Native functions seeded into the VM's globals table at startup. Kept
// deliberately small: this is the load-bearing native surface, not a
// standard library.

use std::sync::OnceLock;
use std::time::Instant;

use crate::value::Value;

/// `clock()` — wall-clock seconds elapsed since the VM started, as a
/// double. Grounded in `clockNative`, which reports process time via
/// `(double)clock() / CLOCKS_PER_SEC`; `Instant` is the idiomatic
/// monotonic-clock stand-in on this platform.
pub fn clock(args: &[Value]) -> Result<Value, String> {
    if !args.is_empty() {
        return Err(format!("Expected 0 arguments but got {}.", args.len()));
    }
    static START: OnceLock<Instant> = OnceLock::new();
    let start = START.get_or_init(Instant::now);
    Ok(Value::Number(start.elapsed().as_secs_f64()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_returns_a_number() {
        let result = clock(&[]).unwrap();
        assert!(result.as_number().is_some());
    }

    #[test]
    fn clock_rejects_arguments() {
        assert!(clock(&[Value::Number(1.0)]).is_err());
    }
}

//! # RESP2 Command Encoding
//!
//! Purpose: Turn a human-readable command line into the array framing the
//! server expects.
//!
//! ## Design Principles
//! 1. **Whitespace Split**: Arguments are separated by any run of whitespace.
//! 2. **Buffer Reuse**: Caller provides the output buffer.
//! 3. **Binary-Safe Lengths**: `$<len>` counts bytes, not characters.
//!
//! ```text
//! "SET a b"  ->  *3\r\n $3\r\nSET\r\n $1\r\na\r\n $1\r\nb\r\n
//! ```

/// Splits a raw command string into its arguments.
pub fn split_command(cmd: &str) -> Vec<&str> {
    cmd.split_whitespace().collect()
}

/// Encodes `args` as a RESP2 array into `out`.
pub fn encode_command<A: AsRef<[u8]>>(args: &[A], out: &mut Vec<u8>) {
    out.push(b'*');
    push_usize(out, args.len());
    out.extend_from_slice(b"\r\n");
    for arg in args {
        let arg = arg.as_ref();
        out.push(b'$');
        push_usize(out, arg.len());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

/// Splits and encodes `cmd` in one step. Returns `None` when `cmd` holds no
/// arguments.
pub fn encode_command_line(cmd: &str) -> Option<Vec<u8>> {
    let args = split_command(cmd);
    if args.is_empty() {
        return None;
    }
    let payload: usize = args.iter().map(|arg| arg.len() + 16).sum();
    let mut out = Vec::with_capacity(payload + 16);
    encode_command(&args, &mut out);
    Some(out)
}

fn push_usize(out: &mut Vec<u8>, value: usize) {
    // usize::MAX has 20 decimal digits.
    let mut digits = [0u8; 20];
    let mut rest = value;
    let mut start = digits.len();
    loop {
        start -= 1;
        digits[start] = b'0' + (rest % 10) as u8;
        rest /= 10;
        if rest == 0 {
            break;
        }
    }
    out.extend_from_slice(&digits[start..]);
}

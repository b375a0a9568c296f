//! Appended-script injection into a prebuilt Intel HEX firmware image
//!
//! Memory-mapped boards run a prebuilt interpreter firmware that reads the
//! user script from a fixed appended region: a 4-byte header ("MP" + script
//! length, little endian) followed by the script bytes at 0x3e000. The
//! merged image is what gets copied onto the device's mounted volume.

use crate::errors::{PipelineError, Result};

const APPENDED_SCRIPT_ADDR: u32 = 0x3e000;
/// 8 KiB region minus the 4-byte header.
const MAX_SCRIPT_BYTES: usize = 8 * 1024 - 4;

const EOF_RECORD: &str = ":00000001FF";
const START_LINEAR_PREFIX: &str = ":04000005";

/// Merge `source` into `firmware`, returning the full hex image.
pub fn inject_script(firmware: &str, source: &str) -> Result<String> {
    let script = source.as_bytes();
    if script.len() > MAX_SCRIPT_BYTES {
        let msg = format!(
            "program is too large for the device ({} bytes, limit {})",
            script.len(),
            MAX_SCRIPT_BYTES
        );
        return Err(PipelineError::Upload {
            diagnostics: vec![msg.clone()],
            raw: msg,
        });
    }

    let mut payload = Vec::with_capacity(script.len() + 4);
    payload.extend_from_slice(b"MP");
    payload.extend_from_slice(&(script.len() as u16).to_le_bytes());
    payload.extend_from_slice(script);

    let mut records = vec![ela_record((APPENDED_SCRIPT_ADDR >> 16) as u16)];
    let base = (APPENDED_SCRIPT_ADDR & 0xffff) as u16;
    for (i, chunk) in payload.chunks(16).enumerate() {
        records.push(data_record(base + (i * 16) as u16, chunk));
    }

    // Splice the script block in front of the image's trailing records so
    // the end-of-file record stays last.
    let mut merged = Vec::new();
    let mut inserted = false;
    for line in firmware.lines() {
        let trimmed = line.trim();
        if !inserted && (trimmed.starts_with(START_LINEAR_PREFIX) || trimmed == EOF_RECORD) {
            merged.extend(records.iter().cloned());
            inserted = true;
        }
        merged.push(line.to_string());
    }

    if !inserted {
        let msg = "firmware image is missing its end-of-file record".to_string();
        return Err(PipelineError::Upload {
            diagnostics: vec![msg.clone()],
            raw: msg,
        });
    }

    Ok(merged.join("\n") + "\n")
}

fn checksum(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    (!sum).wrapping_add(1)
}

fn record(bytes: &[u8]) -> String {
    let mut line = String::with_capacity(bytes.len() * 2 + 3);
    line.push(':');
    for byte in bytes {
        line.push_str(&format!("{:02X}", byte));
    }
    line.push_str(&format!("{:02X}", checksum(bytes)));
    line
}

fn data_record(addr: u16, data: &[u8]) -> String {
    let mut bytes = vec![data.len() as u8, (addr >> 8) as u8, addr as u8, 0x00];
    bytes.extend_from_slice(data);
    record(&bytes)
}

fn ela_record(upper: u16) -> String {
    record(&[0x02, 0x00, 0x00, 0x04, (upper >> 8) as u8, upper as u8])
}

use nix::unistd::Pid;

use super::memory;
use crate::event::{AnalyzedValue, RegisterAnalysis};

/// Bytes read behind each register before trimming to the snippet length,
/// so longer strings and instructions are still recognized.
const LOOKAHEAD_LENGTH: usize = 128;

/// Dereference every register in `pointers`. The first entry is treated as
/// the program counter.
pub fn analyze_registers(
    pid: Pid,
    pointers: &[(&'static str, u64)],
    snippet_length: usize,
    min_string_length: usize,
) -> RegisterAnalysis {
    pointers
        .iter()
        .enumerate()
        .map(|(i, (name, value))| {
            let analyzed = analyze_value(pid, *value, i == 0, snippet_length, min_string_length);
            (name.to_string(), analyzed)
        })
        .collect()
}

pub fn analyze_value(
    pid: Pid,
    value: u64,
    is_pc: bool,
    snippet_length: usize,
    min_string_length: usize,
) -> AnalyzedValue {
    match memory::read_memory(pid, value, LOOKAHEAD_LENGTH.max(snippet_length)) {
        Ok(data) if !data.is_empty() => {
            analyze_bytes(value, data, is_pc, snippet_length, min_string_length)
        }
        _ => AnalyzedValue {
            value,
            memory: None,
            as_instruction: None,
            as_string: None,
        },
    }
}

fn analyze_bytes(
    value: u64,
    mut data: Vec<u8>,
    is_pc: bool,
    snippet_length: usize,
    min_string_length: usize,
) -> AnalyzedValue {
    let as_instruction = decode_instruction(value, &data).map(|(text, len)| {
        // At pc only the instruction itself is interesting
        if is_pc {
            data.truncate(len);
        }
        text
    });

    let as_string = printable_prefix(&data).filter(|s| s.len() >= min_string_length);

    data.truncate(snippet_length);
    AnalyzedValue {
        value,
        memory: Some(hex::encode(&data)),
        as_instruction,
        as_string,
    }
}

/// The NUL-terminated prefix of `data`, if it is printable UTF-8.
fn printable_prefix(data: &[u8]) -> Option<String> {
    let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
    let text = std::str::from_utf8(&data[..end]).ok()?;
    if text.chars().any(|c| c.is_control() && !c.is_ascii_whitespace()) {
        return None;
    }
    Some(text.to_string())
}

#[cfg(target_arch = "x86_64")]
fn decode_instruction(ip: u64, data: &[u8]) -> Option<(String, usize)> {
    use iced_x86::{Decoder, DecoderOptions, Formatter, NasmFormatter};

    let mut decoder = Decoder::with_ip(64, data, ip, DecoderOptions::NONE);
    if !decoder.can_decode() {
        return None;
    }
    let instruction = decoder.decode();
    if instruction.is_invalid() {
        return None;
    }

    let mut text = String::new();
    NasmFormatter::new().format(&instruction, &mut text);
    Some((text, instruction.len()))
}

// No disassembler is wired up for aarch64; memory and string views still apply.
#[cfg(not(target_arch = "x86_64"))]
fn decode_instruction(_ip: u64, _data: &[u8]) -> Option<(String, usize)> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_behind_pointer() {
        let analyzed = analyze_bytes(0x4000, b"hello\0world".to_vec(), false, 16, 4);
        assert_eq!(analyzed.as_string.as_deref(), Some("hello"));
        assert_eq!(analyzed.memory.as_deref(), Some("68656c6c6f00776f726c64"));
    }

    #[test]
    fn test_short_or_binary_strings_dropped() {
        assert_eq!(analyze_bytes(0, b"hi\0".to_vec(), false, 16, 4).as_string, None);
        assert_eq!(analyze_bytes(0, vec![0x01, 0x02, 0x03, 0x04, 0x05], false, 16, 4).as_string, None);
        assert_eq!(analyze_bytes(0, vec![0xff, 0xfe, 0x41, 0x41], false, 16, 1).as_string, None);
    }

    #[test]
    fn test_memory_trimmed_to_snippet() {
        let analyzed = analyze_bytes(0, vec![0xaa; 64], false, 4, 4);
        assert_eq!(analyzed.memory.as_deref(), Some("aaaaaaaa"));
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_instruction_at_pc() {
        // xor eax, eax; ret
        let analyzed = analyze_bytes(0x1337_0000, vec![0x31, 0xc0, 0xc3], true, 16, 4);
        assert_eq!(analyzed.as_instruction.as_deref(), Some("xor eax,eax"));
        assert_eq!(analyzed.memory.as_deref(), Some("31c0"));
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_data_pointer_keeps_full_snippet() {
        let analyzed = analyze_bytes(0x4000, vec![0x31, 0xc0, 0xc3], false, 16, 4);
        assert_eq!(analyzed.as_instruction.as_deref(), Some("xor eax,eax"));
        assert_eq!(analyzed.memory.as_deref(), Some("31c0c3"));
    }

    #[test]
    fn test_unreadable_value_keeps_only_value() {
        let pid = nix::unistd::getpid();
        let analyzed = analyze_value(pid, 0, false, 16, 4);
        assert_eq!(analyzed.value, 0);
        assert!(analyzed.memory.is_none());
        assert!(analyzed.as_string.is_none());
    }
}

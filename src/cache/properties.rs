//! Java-properties compatible `key=value` codec.
//!
//! Writes keys in sorted order under one fixed comment so that equal
//! snapshots serialize to equal bytes.

use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};

pub type Snapshot = BTreeMap<String, String>;

pub const HEADER: &str = "Registry Cache";

pub fn read<R: BufRead>(reader: R) -> io::Result<Snapshot> {
    let mut out = Snapshot::new();
    let mut pending = String::new();
    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim_start_matches([' ', '\t', '\x0c']);
        // A comment marker only counts at the start of a logical line.
        if pending.is_empty() && (trimmed.is_empty() || trimmed.starts_with(['#', '!'])) {
            continue;
        }
        pending.push_str(trimmed);
        if ends_with_continuation(&pending) {
            pending.pop();
            continue;
        }
        let (key, value) = split_entry(&pending);
        out.insert(unescape(key), unescape(value));
        pending.clear();
    }
    if !pending.is_empty() {
        let (key, value) = split_entry(&pending);
        out.insert(unescape(key), unescape(value));
    }
    Ok(out)
}

pub fn write<W: Write>(mut writer: W, snapshot: &Snapshot) -> io::Result<()> {
    writeln!(writer, "#{HEADER}")?;
    for (key, value) in snapshot {
        writeln!(writer, "{}={}", escape(key, true), escape(value, false))?;
    }
    writer.flush()
}

fn ends_with_continuation(line: &str) -> bool {
    let slashes = line.bytes().rev().take_while(|&b| b == b'\\').count();
    slashes % 2 == 1
}

fn split_entry(line: &str) -> (&str, &str) {
    let bytes = line.as_bytes();
    let mut idx = 0;
    let mut key_end = bytes.len();
    let mut sep_found = false;
    while idx < bytes.len() {
        match bytes[idx] {
            b'\\' => idx += 2,
            b'=' | b':' => {
                key_end = idx;
                sep_found = true;
                idx += 1;
                break;
            }
            b' ' | b'\t' | b'\x0c' => {
                key_end = idx;
                idx += 1;
                break;
            }
            _ => idx += 1,
        }
    }
    let key_end = key_end.min(bytes.len());
    let mut value_start = idx.min(bytes.len());
    while value_start < bytes.len() && matches!(bytes[value_start], b' ' | b'\t' | b'\x0c') {
        value_start += 1;
    }
    if !sep_found && value_start < bytes.len() && matches!(bytes[value_start], b'=' | b':') {
        value_start += 1;
        while value_start < bytes.len() && matches!(bytes[value_start], b' ' | b'\t' | b'\x0c') {
            value_start += 1;
        }
    }
    (&line[..key_end], &line[value_start..])
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\x0c'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push_str("\\u");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn escape(raw: &str, is_key: bool) -> String {
    let mut out = String::with_capacity(raw.len() + 8);
    for (idx, ch) in raw.chars().enumerate() {
        match ch {
            ' ' if is_key || idx == 0 => out.push_str("\\ "),
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x0c' => out.push_str("\\f"),
            '=' | ':' | '#' | '!' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_sorted_escaped_entries() {
        let mut snapshot = Snapshot::new();
        snapshot.insert("b/svc:1".to_string(), "grpc://h:1/svc?a=b".to_string());
        snapshot.insert("a svc".to_string(), " lead".to_string());
        let mut buf = Vec::new();
        write(&mut buf, &snapshot).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(
            text,
            "#Registry Cache\na\\ svc=\\ lead\nb/svc\\:1=grpc\\://h\\:1/svc?a\\=b\n"
        );
        assert_eq!(read(text.as_bytes()).unwrap(), snapshot);
    }

    #[test]
    fn reads_java_style_files() {
        let text = "# comment\n! other comment\n\n  key1 = value one\nkey2:two\nkey3 three\n\
                    multi=first \\\n    second\nuni=\\u0041\\u00e9\n";
        let snapshot = read(text.as_bytes()).unwrap();
        assert_eq!(snapshot["key1"], "value one");
        assert_eq!(snapshot["key2"], "two");
        assert_eq!(snapshot["key3"], "three");
        assert_eq!(snapshot["multi"], "first second");
        assert_eq!(snapshot["uni"], "A\u{e9}");
    }

    #[test]
    fn key_without_value() {
        let snapshot = read("lonely\n".as_bytes()).unwrap();
        assert_eq!(snapshot["lonely"], "");
    }
}

//! `$UpCase`: the per-volume case-folding table filename comparisons and
//! attribute-name comparisons fold through. A
//! fresh volume gets one built from Unicode's own uppercase mapping; an
//! existing volume's table is whatever was written to its `$UpCase` data
//! stream, byte for byte.

use byteorder::{ByteOrder, LittleEndian};
use std::cmp::Ordering;

const ENTRIES: usize = 0x10000;

pub struct UpCaseTable {
    table: Vec<u16>,
}

impl UpCaseTable {
    /// Build the table a fresh volume ships with: each BMP code point
    /// mapped to its single-code-point uppercase form, or to itself when
    /// uppercasing would change its length (surrogates, multi-char
    /// expansions) or isn't defined.
    pub fn default_table() -> Self {
        let mut table: Vec<u16> = (0..ENTRIES as u32).map(|cp| cp as u16).collect();
        for cp in 0..ENTRIES as u32 {
            if let Some(ch) = char::from_u32(cp) {
                let mut upper = ch.to_uppercase();
                if let (Some(u), None) = (upper.next(), upper.next()) {
                    if (u as u32) < ENTRIES as u32 {
                        table[cp as usize] = u as u16;
                    }
                }
            }
        }
        UpCaseTable { table }
    }

    /// Parse raw `$UpCase` attribute content; missing tail entries map to
    /// themselves.
    pub fn parse(bytes: &[u8]) -> Self {
        let mut table = vec![0u16; ENTRIES];
        for (i, slot) in table.iter_mut().enumerate() {
            let off = i * 2;
            *slot = if off + 2 <= bytes.len() {
                LittleEndian::read_u16(&bytes[off..off + 2])
            } else {
                i as u16
            };
        }
        UpCaseTable { table }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.table.len() * 2];
        for (i, &v) in self.table.iter().enumerate() {
            LittleEndian::write_u16(&mut out[i * 2..i * 2 + 2], v);
        }
        out
    }

    pub fn upcase_char(&self, c: u16) -> u16 {
        self.table[c as usize]
    }

    pub fn upcase_str(&self, s: &[u16]) -> Vec<u16> {
        s.iter().map(|&c| self.upcase_char(c)).collect()
    }

    /// Lexicographic comparison of two UTF-16 strings after folding both
    /// through this table.
    pub fn compare(&self, a: &[u16], b: &[u16]) -> Ordering {
        self.upcase_str(a).cmp(&self.upcase_str(b))
    }
}

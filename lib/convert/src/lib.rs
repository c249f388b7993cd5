// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Renders typed message units into bytes.
//!
//! The converter is fed one [`MessageUnit`] at a time together with a
//! [`Cursor`] over the transmit buffer currently being filled. It keeps
//! only line-level state (separator bookkeeping), so the worker can swap
//! transmit buffers mid-record without losing anything.
//!
//! Rendering rules:
//!
//! - A single `' '` separates atoms on a line; an inline string fragment
//!   carrying the join sentinel fuses with the next atom instead.
//! - Integers render in base 2, 10 or 16 with optional `0b`/`0x` prefix,
//!   zero-filled to the directive's minimum digit count. Any other base
//!   produces a single `#`, as does overflow of the digit scratch.
//! - Floats render in scientific notation with a fixed mantissa digit
//!   count; `nan`, `inf` and `0` are spelled exactly like that.
//! - Writes past the end of the cursor are silently dropped; the line is
//!   truncated in place.

#![cfg_attr(not(test), no_std)]

use arrayvec::ArrayVec;
use num_traits::{NumCast, PrimInt, Unsigned};

use skald_types::{base, FormatDirective, MessageUnit, Payload};

const NUMERIC_ERROR: u8 = b'#';
const NUMERIC_FILL: u8 = b'0';
const MARK_BINARY: u8 = b'b';
const MARK_HEXADECIMAL: u8 = b'x';
const MINUS: u8 = b'-';
const PLUS: u8 = b'+';
const SPACE: u8 = b' ';
const FRACTION_DOT: u8 = b'.';
const SCIENTIFIC_E: u8 = b'e';

const NAN: &[u8] = b"nan";
const INF: &[u8] = b"inf";
const TRUE: &[u8] = b"true";
const FALSE: &[u8] = b"false";

const DIGIT2CHAR: [u8; 16] = *b"0123456789abcdef";

/// Digit scratch size; enough for u64 rendered in binary with headroom.
const DIGIT_SCRATCH: usize = 70;

/// Mantissa digits used when a float directive has no explicit fill.
const MAX_DIGITS_F32: u8 = 8;
const MAX_DIGITS_F64: u8 = 16;

/// Compile-once knobs of the rendering stage.
#[derive(Copy, Clone, Debug)]
pub struct ConvertOptions {
    /// Prepend `0b` / `0x` to binary and hexadecimal numbers.
    pub append_base_prefix: bool,
    /// Prepend a space to non-negative numbers so they align with
    /// negatives.
    pub align_signed: bool,
    /// Bytes closing every record line.
    pub end_of_line: &'static [u8],
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            append_base_prefix: false,
            align_signed: false,
            end_of_line: b"\n",
        }
    }
}

/// A `[begin, end)` write window into the transmit buffer being filled.
pub struct Cursor<'a> {
    buf: &'a mut [u8],
    pos: &'a mut usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a mut [u8], pos: &'a mut usize) -> Self {
        Self { buf, pos }
    }

    pub fn written(&self) -> usize {
        *self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(*self.pos)
    }

    fn put(&mut self, byte: u8) {
        if *self.pos < self.buf.len() {
            self.buf[*self.pos] = byte;
            *self.pos += 1;
        }
    }

    fn put_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.put(b);
        }
    }
}

/// The convert stage. Holds per-line separator state only.
pub struct TextConverter {
    options: ConvertOptions,
    line_open: bool,
    join_next: bool,
}

impl TextConverter {
    pub fn new(options: ConvertOptions) -> Self {
        Self {
            options,
            line_open: false,
            join_next: false,
        }
    }

    /// Whether a line is currently being assembled (atoms rendered since
    /// the last end-of-line).
    pub fn line_open(&self) -> bool {
        self.line_open
    }

    /// Renders one atom. Terminal units close the line instead.
    pub fn value(&mut self, out: &mut Cursor<'_>, unit: &MessageUnit) {
        if unit.is_terminal() {
            self.end_line(out);
            return;
        }

        if self.line_open && !self.join_next {
            out.put(SPACE);
        }
        self.line_open = true;
        self.join_next = false;

        match unit.payload {
            Payload::Bool(v) => out.put_bytes(if v { TRUE } else { FALSE }),
            Payload::Char(v) => out.put(v),
            Payload::U8(v) => {
                self.integer::<u32>(out, v.into(), false, unit.directive())
            }
            Payload::U16(v) => {
                self.integer::<u32>(out, v.into(), false, unit.directive())
            }
            Payload::U32(v) => {
                self.integer::<u32>(out, v, false, unit.directive())
            }
            Payload::U64(v) => {
                self.integer::<u64>(out, v, false, unit.directive())
            }
            Payload::I8(v) => self.signed32(out, v.into(), unit.directive()),
            Payload::I16(v) => self.signed32(out, v.into(), unit.directive()),
            Payload::I32(v) => self.signed32(out, v, unit.directive()),
            Payload::I64(v) => self.integer::<u64>(
                out,
                v.unsigned_abs(),
                v < 0,
                unit.directive(),
            ),
            Payload::F32(v) => {
                let digits = match unit.fill {
                    0 => MAX_DIGITS_F32,
                    fill => fill,
                };
                self.float(out, v.into(), digits);
            }
            Payload::F64(v) => {
                let digits = match unit.fill {
                    0 => MAX_DIGITS_F64,
                    fill => fill,
                };
                self.float(out, v, digits);
            }
            Payload::Str(s) => {
                out.put_bytes(s.as_bytes());
                self.join_next = unit.fill == FormatDirective::FILL_JOIN;
            }
            Payload::Inline(chunk) => {
                out.put_bytes(chunk.as_bytes());
                self.join_next = unit.fill == FormatDirective::FILL_JOIN;
            }
        }
    }

    /// Closes the current line with the configured end-of-line bytes.
    pub fn end_line(&mut self, out: &mut Cursor<'_>) {
        out.put_bytes(self.options.end_of_line);
        self.line_open = false;
        self.join_next = false;
    }

    fn signed32(
        &mut self,
        out: &mut Cursor<'_>,
        value: i32,
        directive: FormatDirective,
    ) {
        self.integer::<u32>(out, value.unsigned_abs(), value < 0, directive);
    }

    /// Digit rendering, generic over the conversion width so that narrow
    /// values never touch 64-bit arithmetic on 32-bit targets.
    fn integer<T: PrimInt + Unsigned>(
        &mut self,
        out: &mut Cursor<'_>,
        magnitude: T,
        negative: bool,
        directive: FormatDirective,
    ) {
        if !directive.is_renderable() {
            out.put(NUMERIC_ERROR);
            return;
        }
        let Some(radix) = <T as NumCast>::from(directive.base) else {
            out.put(NUMERIC_ERROR);
            return;
        };

        if self.options.append_base_prefix {
            match directive.base {
                base::BINARY => {
                    out.put(NUMERIC_FILL);
                    out.put(MARK_BINARY);
                }
                base::HEXADECIMAL => {
                    out.put(NUMERIC_FILL);
                    out.put(MARK_HEXADECIMAL);
                }
                _ => {}
            }
        }

        let mut scratch = ArrayVec::<u8, DIGIT_SCRATCH>::new();
        let mut value = magnitude;
        loop {
            let digit = (value % radix).to_usize().unwrap_or(0);
            if scratch.try_push(DIGIT2CHAR[digit]).is_err() {
                out.put(NUMERIC_ERROR);
                return;
            }
            value = value / radix;
            if value.is_zero() {
                break;
            }
        }

        if negative {
            out.put(MINUS);
        } else if self.options.align_signed && directive.fill > 0 {
            out.put(SPACE);
        }

        let mut fill = directive.fill as usize;
        while fill > scratch.len() {
            out.put(NUMERIC_FILL);
            fill -= 1;
        }
        for &digit in scratch.iter().rev() {
            out.put(digit);
        }
    }

    /// Scientific float rendering: sign, first digit, fraction dot, up to
    /// `digits - 1` mantissa digits, exponent. Rounding overflow of a
    /// digit clamps to 9.
    fn float(&mut self, out: &mut Cursor<'_>, value: f64, digits: u8) {
        if value.is_nan() {
            out.put_bytes(NAN);
            return;
        }
        if value.is_infinite() {
            out.put_bytes(INF);
            return;
        }
        if value == 0.0 {
            out.put(NUMERIC_FILL);
            return;
        }

        let mut value = value;
        if value < 0.0 {
            value = -value;
            out.put(MINUS);
        } else if self.options.align_signed {
            out.put(SPACE);
        }

        let exponent = libm::floor(libm::log10(value));
        let mut normalized = value / libm::pow(10.0, exponent);
        for i in 1..digits {
            let digit = (normalized as i32).min(9);
            out.put(DIGIT2CHAR[digit as usize]);
            normalized = 10.0 * (normalized - digit as f64);
            if i == 1 {
                out.put(FRACTION_DOT);
            }
        }
        let digit = (libm::round(normalized) as i32).min(9);
        out.put(DIGIT2CHAR[digit as usize]);

        out.put(SCIENTIFIC_E);
        if exponent >= 0.0 {
            out.put(PLUS);
        }
        let exponent = exponent as i32;
        self.integer::<u32>(
            out,
            exponent.unsigned_abs(),
            exponent < 0,
            FormatDirective::DEFAULT,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skald_types::{InlineChunk, TaskId};

    fn unit(payload: Payload, directive: FormatDirective) -> MessageUnit {
        MessageUnit::new(payload, directive, TaskId::new(1), 1)
    }

    fn render_with(options: ConvertOptions, units: &[MessageUnit]) -> String {
        let mut buf = [0u8; 256];
        let mut pos = 0;
        let mut conv = TextConverter::new(options);
        {
            let mut cur = Cursor::new(&mut buf, &mut pos);
            for u in units {
                conv.value(&mut cur, u);
            }
            conv.end_line(&mut cur);
        }
        String::from_utf8(buf[..pos].to_vec()).unwrap()
    }

    fn render_one(payload: Payload, directive: FormatDirective) -> String {
        let mut s = render_with(
            ConvertOptions::default(),
            &[unit(payload, directive)],
        );
        assert_eq!(s.pop(), Some('\n'));
        s
    }

    #[test]
    fn decimal_round_trip() {
        assert_eq!(render_one(Payload::U8(0), FormatDirective::DEFAULT), "0");
        assert_eq!(
            render_one(Payload::U32(4294967295), FormatDirective::DEFAULT),
            "4294967295"
        );
        assert_eq!(
            render_one(
                Payload::U64(123456789012345),
                FormatDirective::DEFAULT
            ),
            "123456789012345"
        );
        assert_eq!(
            render_one(
                Payload::I64(-123456789012345),
                FormatDirective::DEFAULT
            ),
            "-123456789012345"
        );
        assert_eq!(
            render_one(Payload::I64(i64::MIN), FormatDirective::DEFAULT),
            "-9223372036854775808"
        );
        assert_eq!(
            render_one(Payload::I16(-300), FormatDirective::DEFAULT),
            "-300"
        );
    }

    #[test]
    fn binary_with_fill() {
        assert_eq!(
            render_one(Payload::U8(5), FormatDirective::B8),
            "00000101"
        );
    }

    #[test]
    fn hex_with_prefix() {
        let options = ConvertOptions {
            append_base_prefix: true,
            ..Default::default()
        };
        let s = render_with(
            options,
            &[unit(Payload::U8(0xab), FormatDirective::X2)],
        );
        assert_eq!(s, "0xab\n");
    }

    #[test]
    fn negative_in_hex_keeps_sign_before_fill() {
        assert_eq!(
            render_one(Payload::I8(-1), FormatDirective::X2),
            "-01"
        );
    }

    #[test]
    fn invalid_base_renders_error_mark() {
        assert_eq!(
            render_one(Payload::U32(99), FormatDirective::new(7, 0)),
            "#"
        );
    }

    #[test]
    fn align_signed_pads_non_negatives() {
        let options = ConvertOptions {
            align_signed: true,
            ..Default::default()
        };
        let s = render_with(
            options,
            &[
                unit(Payload::I32(5), FormatDirective::D3),
                unit(Payload::I32(-5), FormatDirective::D3),
            ],
        );
        assert_eq!(s, " 005 -005\n");
    }

    #[test]
    fn float_special_values() {
        assert_eq!(
            render_one(Payload::F64(f64::NAN), FormatDirective::DEFAULT),
            "nan"
        );
        assert_eq!(
            render_one(Payload::F64(f64::INFINITY), FormatDirective::DEFAULT),
            "inf"
        );
        assert_eq!(
            render_one(
                Payload::F64(f64::NEG_INFINITY),
                FormatDirective::DEFAULT
            ),
            "inf"
        );
        assert_eq!(
            render_one(Payload::F64(0.0), FormatDirective::DEFAULT),
            "0"
        );
    }

    #[test]
    fn float_scientific_form() {
        assert_eq!(
            render_one(Payload::F64(0.5), FormatDirective::new(10, 3)),
            "5.00e-1"
        );
        assert_eq!(
            render_one(Payload::F64(123.456), FormatDirective::new(10, 6)),
            "1.23456e+2"
        );
        assert_eq!(
            render_one(Payload::F64(-2.0), FormatDirective::new(10, 2)),
            "-2.0e+0"
        );
    }

    #[test]
    fn bool_char_str() {
        assert_eq!(
            render_one(Payload::Bool(true), FormatDirective::DEFAULT),
            "true"
        );
        assert_eq!(
            render_one(Payload::Bool(false), FormatDirective::DEFAULT),
            "false"
        );
        assert_eq!(
            render_one(Payload::Char(b'x'), FormatDirective::DEFAULT),
            "x"
        );
        assert_eq!(
            render_one(Payload::Str("static"), FormatDirective::DEFAULT),
            "static"
        );
    }

    #[test]
    fn atoms_are_space_separated_without_trailer() {
        let s = render_with(
            ConvertOptions::default(),
            &[
                unit(Payload::U8(1), FormatDirective::DEFAULT),
                unit(Payload::U8(2), FormatDirective::DEFAULT),
                unit(Payload::Str("ok"), FormatDirective::DEFAULT),
            ],
        );
        assert_eq!(s, "1 2 ok\n");
    }

    #[test]
    fn join_sentinel_fuses_inline_fragments() {
        let (first, rest) = InlineChunk::take(b"hello, world");
        let (second, rest) = InlineChunk::take(rest);
        assert!(rest.is_empty());

        let s = render_with(
            ConvertOptions::default(),
            &[
                unit(
                    Payload::Inline(first),
                    FormatDirective::new(
                        base::INVALID,
                        FormatDirective::FILL_JOIN,
                    ),
                ),
                unit(Payload::Inline(second), FormatDirective::DEFAULT),
                unit(Payload::U8(7), FormatDirective::DEFAULT),
            ],
        );
        assert_eq!(s, "hello, world 7\n");
    }

    #[test]
    fn full_cursor_truncates_in_place() {
        let mut buf = [0u8; 4];
        let mut pos = 0;
        let mut conv = TextConverter::new(ConvertOptions::default());
        {
            let mut cur = Cursor::new(&mut buf, &mut pos);
            conv.value(
                &mut cur,
                &unit(Payload::Str("overlong"), FormatDirective::DEFAULT),
            );
        }
        assert_eq!(pos, 4);
        assert_eq!(&buf[..4], b"over");
    }

    #[test]
    fn terminal_unit_closes_the_line() {
        let s = render_with(
            ConvertOptions::default(),
            &[
                unit(Payload::U8(9), FormatDirective::DEFAULT),
                MessageUnit::terminal(TaskId::new(1)),
            ],
        );
        // end_line in the helper adds the second newline.
        assert_eq!(s, "9\n\n");
    }
}

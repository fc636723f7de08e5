//! Macro-call argument parsing and `$n` substitution.
//!
//! Arguments are split on unescaped commas, at most [`MAX_ARGS`] of them; a
//! tenth comma and everything after it belongs to the ninth argument. A
//! backslash run of length `k` before a comma collapses to `k/2` literal
//! backslashes, and an odd `k` additionally turns the comma into a literal.
//! Lazy sub-calls (`^[[[…]]]`) are skipped as opaque balanced spans so their
//! commas never act as separators; their text is carried through untouched
//! and unescaped for the deferred pass to handle.

use crate::scanner::find_first_unmatched_call_end;
use crate::syntax::LAZY_SIGIL;

/// Positional argument cap. `$1`..`$9` address individual arguments, `$0`
/// the raw argument text as a whole.
pub const MAX_ARGS: usize = 9;

/// Split points of a parsed argument list, as offsets into the line buffer.
///
/// Slot 0 is the start of the raw text; slot `i` (1-based) is the start of
/// argument `i + 1`, one past its leading comma. A sentinel one past the end
/// of the text terminates the used slots and always occupies the last slot,
/// so argument `i` spans `spans[i - 1] .. spans[i] - 1`.
#[derive(Debug, Clone, Copy)]
pub struct ArgSpans([Option<usize>; MAX_ARGS + 1]);

impl ArgSpans {
    fn get(&self, index: usize) -> Option<usize> {
        self.0[index]
    }

    fn whole(&self) -> (usize, usize) {
        let start = self.0[0].unwrap_or(0);
        let end = self.0[MAX_ARGS].unwrap_or(start + 1);
        (start, end - 1)
    }
}

/// Splits the argument text `line[start..end]` into positional spans.
pub fn parse_args(line: &[u8], start: usize, end: usize) -> ArgSpans {
    let mut spans = [None; MAX_ARGS + 1];
    spans[0] = Some(start);
    let mut index = 1;

    let mut p = start;
    while p < end {
        let c = line[p];
        if c != b'\\' && c != b',' && c != LAZY_SIGIL {
            p += 1;
            continue;
        }

        if c == b',' {
            if index == MAX_ARGS {
                break;
            }
            spans[index] = Some(p + 1);
            index += 1;
            p += 1;
            continue;
        }

        if c == b'\\' {
            let mut backslashes = 1;
            p += 1;
            while p < end && line[p] == b'\\' {
                backslashes += 1;
                p += 1;
            }
            let comma_escaped = line.get(p) == Some(&b',') && backslashes % 2 == 1;
            if comma_escaped {
                p += 1;
            }
            continue;
        }

        // Lazy sub-call: skip its balanced span wholesale.
        let mut after_sigil = p + 1;
        let mut opens = 0;
        while after_sigil < end && line[after_sigil] == b'[' && opens < 3 {
            opens += 1;
            after_sigil += 1;
        }
        if opens < 3 {
            p = after_sigil;
            continue;
        }
        // Lazy calls inside a well-formed non-lazy call are always balanced.
        p = match find_first_unmatched_call_end(line, after_sigil, end) {
            Some(balanced_end) => balanced_end,
            None => after_sigil,
        };
    }

    let sentinel = Some(end + 1);
    spans[index] = sentinel;
    spans[MAX_ARGS] = sentinel;
    ArgSpans(spans)
}

/// Copies `line[from..until]` into `out` with backslash-comma de-escaping,
/// carrying lazy sub-call spans through verbatim.
///
/// Reads one byte past `until` to see the argument's terminator: a backslash
/// run at the very end of an argument still collapses when the terminating
/// comma follows it.
fn push_unescaped(line: &[u8], from: usize, until: usize, out: &mut Vec<u8>) {
    let mut src = from;
    while src < until {
        let c = line[src];
        if c != b'\\' && c != LAZY_SIGIL {
            out.push(c);
            src += 1;
            continue;
        }

        if c == b'\\' {
            let mut backslashes = 1;
            let mut s = src + 1;
            while s < until && line[s] == b'\\' {
                backslashes += 1;
                s += 1;
            }
            let escaping = line.get(s) == Some(&b',');
            if !escaping {
                out.extend_from_slice(&line[src..src + backslashes]);
                src += backslashes;
                continue;
            }
            out.extend(std::iter::repeat(b'\\').take(backslashes / 2));
            src += backslashes;
            if backslashes % 2 == 1 {
                out.push(b',');
                src += 1;
            } else {
                debug_assert_eq!(s, until);
            }
            continue;
        }

        // Lazy sub-call: copy through untouched.
        let mut s = src + 1;
        let mut opens = 0;
        while s < until && line[s] == b'[' && opens < 3 {
            opens += 1;
            s += 1;
        }
        if opens == 3 {
            if let Some(balanced_end) = find_first_unmatched_call_end(line, s, until) {
                s = balanced_end;
            }
        }
        out.extend_from_slice(&line[src..s]);
        src = s;
    }
}

/// Expands `$0`..`$9` in a macro body against a parsed argument list.
///
/// `$0` substitutes the raw argument text verbatim; `$1`..`$9` substitute the
/// de-escaped positional argument, independently at each use site. A `$`
/// not followed by a digit passes through, so `$$1` renders as `$` plus
/// argument one.
pub fn substitute_args(line: &[u8], spans: &ArgSpans, body: &[u8], out: &mut Vec<u8>) {
    let mut write_from = 0;
    let mut p = 0;
    let end = body.len();
    while p < end {
        if body[p] != b'$' {
            p += 1;
            continue;
        }
        let next = p + 1;
        if next >= end {
            break;
        }
        let digit = body[next];
        if !digit.is_ascii_digit() {
            p = next;
            continue;
        }
        out.extend_from_slice(&body[write_from..p]);
        write_from = next + 1;
        let index = usize::from(digit - b'0');
        if index == 0 {
            let (from, until) = spans.whole();
            out.extend_from_slice(&line[from..until]);
        } else if let (Some(from), Some(next_start)) = (spans.get(index - 1), spans.get(index)) {
            push_unescaped(line, from, next_start - 1, out);
        }
        p = next + 1;
    }
    out.extend_from_slice(&body[write_from..end]);
}

//! Weft surface syntax: directive markers, call markers, and quoting.
//!
//! A macro call is written `[[[name]]]` or `[[[name(args)]]]`, optionally
//! prefixed with the lazy sigil `^`. A single apostrophe immediately before a
//! call marker suppresses that marker for one level; the apostrophe itself is
//! removed at the very end of line processing, once the line is fully
//! expanded. Directive lines start with one of the `#+` headers below.

/// Sigil that defers a call's expansion to the lazy pass.
pub const LAZY_SIGIL: u8 = b'^';

/// Apostrophe used to quote call markers and directive headers.
pub const QUOTE: u8 = b'\'';

pub const CALL_OPEN: &[u8] = b"[[[";
pub const CALL_CLOSE: &[u8] = b"]]]";

pub const GLOBAL_MACRO_HEADER: &[u8] = b"#+MACRO ";
pub const GLOBAL_BLOCK_MACRO_HEADER: &[u8] = b"#+MACRO_BEGIN ";
pub const GLOBAL_BLOCK_MACRO_FOOTER: &[u8] = b"#+MACRO_END\n";
pub const LOCAL_MACRO_HEADER: &[u8] = b"#+LOCAL_MACRO ";
pub const LOCAL_BLOCK_MACRO_HEADER: &[u8] = b"#+LOCAL_MACRO_BEGIN ";
pub const LOCAL_BLOCK_MACRO_FOOTER: &[u8] = b"#+LOCAL_MACRO_END\n";
pub const SCRIPT_BLOCK_HEADER: &[u8] = b"#+LUA_BEGIN\n";
pub const SCRIPT_BLOCK_FOOTER: &[u8] = b"#+LUA_END\n";
pub const COMMENT_BLOCK_HEADER: &[u8] = b"#+COMMENT_BEGIN\n";
pub const COMMENT_BLOCK_FOOTER: &[u8] = b"#+COMMENT_END\n";

/// Every marker `unquote_directive` recognizes after a quote run.
const DIRECTIVE_MARKERS: [&[u8]; 10] = [
    GLOBAL_MACRO_HEADER,
    GLOBAL_BLOCK_MACRO_HEADER,
    GLOBAL_BLOCK_MACRO_FOOTER,
    LOCAL_MACRO_HEADER,
    LOCAL_BLOCK_MACRO_HEADER,
    LOCAL_BLOCK_MACRO_FOOTER,
    SCRIPT_BLOCK_HEADER,
    SCRIPT_BLOCK_FOOTER,
    COMMENT_BLOCK_HEADER,
    COMMENT_BLOCK_FOOTER,
];

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Removes the apostrophe of every `'<pattern>` occurrence, left to right.
///
/// Searching resumes at the byte that replaced the removed apostrophe, so a
/// doubled quote (`''[[[`) loses exactly one level: the inner apostrophe is
/// removed and the outer one sits behind the resume point.
fn strip_quotes_before(line: &mut Vec<u8>, pattern: &[u8]) {
    let mut from = 0;
    while let Some(found) = find_subslice(&line[from..], pattern) {
        let at = from + found;
        line.remove(at);
        from = at;
    }
}

/// End-of-line unquoting of call markers.
///
/// Runs once, on a fully expanded line. The fast path bails when the line
/// contains no apostrophe at all.
pub fn unquote_macro_calls(line: &mut Vec<u8>) {
    if !line.contains(&QUOTE) {
        return;
    }
    strip_quotes_before(line, b"'[[[");
    strip_quotes_before(line, b"']]]");
    strip_quotes_before(line, b"'^[[[");
}

/// End-of-line unquoting of directive headers and footers.
///
/// `'#+MACRO …` becomes literal `#+MACRO …`; doubled quotes reduce by one
/// level only. A quote run before anything that is not a recognized
/// directive marker is left alone.
pub fn unquote_directive(line: &mut Vec<u8>) {
    if line.first() != Some(&QUOTE) {
        return;
    }
    let mut p = 0;
    while p < line.len() && line[p] == QUOTE {
        p += 1;
    }
    if line.get(p) != Some(&b'#') {
        return;
    }
    let rest = &line[p..];
    if DIRECTIVE_MARKERS.iter().any(|m| rest.starts_with(m)) {
        line.remove(p - 1);
    }
}

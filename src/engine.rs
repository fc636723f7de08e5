//! The expansion engine: line driver, substitution, and directive reading.
//!
//! An [`Engine`] owns all processing state for one session: the line buffer
//! being rewritten, the secondary input queue that splices multi-line macro
//! bodies ahead of fresh input, both macro tables, the line counters, and
//! the lazily created script runtime. Input is fed as bytes and processed
//! one logical line at a time; each line runs through repeated expansion
//! passes until stable, is checked for directives, and is then unquoted and
//! emitted.
//!
//! Everything is single-threaded and runs to completion per line. Malformed
//! input never fails the engine — spans are deleted or passed through
//! literally instead.

use std::io::{self, Write};

use crate::args;
use crate::errors::WeftError;
use crate::interp::Interp;
use crate::macros::{Macro, MacroTable, Scope};
use crate::scanner::{self, PassState};
use crate::script::{ScriptEngine, ScriptEngineFactory, ScriptError, ScriptErrorKind};
use crate::syntax::{self, CALL_OPEN};

// ============================================================================
// OUTPUT TARGET
// ============================================================================

/// Where emitted lines go: an internal buffer handed back by
/// [`Engine::end_input`], or a live sink written as lines complete.
enum OutputTarget {
    Buffer(Vec<u8>),
    Sink(Box<dyn Write>),
}

impl OutputTarget {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self {
            OutputTarget::Buffer(buffer) => {
                buffer.extend_from_slice(bytes);
                Ok(())
            }
            OutputTarget::Sink(sink) => sink.write_all(bytes),
        }
    }

}

// ============================================================================
// ENGINE CONTEXT
// ============================================================================

/// A macro-expansion context.
///
/// Create one per processing session; feed input incrementally with
/// [`Engine::feed`], then call [`Engine::end_input`]. The global macro table,
/// line counters, and script state persist across feeds until
/// [`Engine::reset`].
pub struct Engine {
    out: OutputTarget,
    diag: Option<Box<dyn Write>>,

    lua_enabled: bool,
    clear_local_on_next_read: bool,
    input_line: u64,
    output_line: u64,

    line: Vec<u8>,
    secondary: Vec<u8>,
    secondary_pos: usize,

    globals: MacroTable,
    locals: MacroTable,

    script: Option<Box<dyn ScriptEngine>>,
    script_factory: ScriptEngineFactory,

    input: Vec<u8>,
    input_pos: usize,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// A fresh context that accumulates output internally.
    pub fn new() -> Self {
        Self {
            out: OutputTarget::Buffer(Vec::new()),
            diag: None,
            lua_enabled: true,
            clear_local_on_next_read: false,
            input_line: 0,
            output_line: 1,
            line: Vec::new(),
            secondary: Vec::new(),
            secondary_pos: 0,
            globals: MacroTable::default(),
            locals: MacroTable::default(),
            script: None,
            script_factory: Box::new(|| Box::new(Interp::new())),
            input: Vec::new(),
            input_pos: 0,
        }
    }

    /// Streams emitted lines to `sink` instead of buffering them.
    pub fn with_output(mut self, sink: Box<dyn Write>) -> Self {
        self.out = OutputTarget::Sink(sink);
        self
    }

    /// Routes script-failure diagnostics to `sink`.
    pub fn with_diagnostics(mut self, sink: Box<dyn Write>) -> Self {
        self.diag = Some(sink);
        self
    }

    /// Replaces the built-in script runtime. The factory runs lazily on the
    /// first script evaluation and again after every [`Engine::reset`].
    pub fn with_script_engine<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn ScriptEngine> + 'static,
    {
        self.script_factory = Box::new(factory);
        self
    }

    /// Surviving global macro definitions, for inspection tooling.
    pub fn global_macros(&self) -> impl Iterator<Item = (&[u8], &Macro)> {
        self.globals.iter()
    }

    /// Processes `input` completely. Feeding several times before
    /// [`Engine::end_input`] behaves like feeding the concatenation as long
    /// as feeds end on line boundaries; a trailing unterminated line is
    /// processed (and its synthesized newline trimmed) at the end of the
    /// feed that delivered it.
    pub fn feed(&mut self, input: &[u8]) -> Result<(), WeftError> {
        if input.is_empty() {
            return Ok(());
        }
        self.input = input.to_vec();
        self.input_pos = 0;
        let ends_with_newline = input.last() == Some(&b'\n');

        loop {
            self.line.clear();
            self.load_next_line(true);
            if self.line.is_empty() {
                break;
            }
            self.clear_local_on_next_read = true;

            let mut state = PassState::default();
            let directive_found = loop {
                state.redo = false;
                self.expand_non_lazy(&mut state);

                if self.find_and_process_directive(&mut state) {
                    break true;
                }

                if state.saw_lazy_call {
                    self.expand_lazy(&mut state);
                }

                // A lazy pass can complete a directive of its own.
                if self.find_and_process_directive(&mut state) {
                    break true;
                }

                if !state.redo {
                    break false;
                }
            };
            if directive_found {
                continue;
            }

            syntax::unquote_macro_calls(&mut self.line);
            syntax::unquote_directive(&mut self.line);

            let trim_newline = !ends_with_newline
                && self.input_pos >= self.input.len()
                && self.secondary_pos == self.secondary.len();
            let emit_len = if trim_newline {
                self.line.len() - 1
            } else {
                self.line.len()
            };
            self.out.write(&self.line[..emit_len])?;
            self.output_line += 1;
        }

        Ok(())
    }

    /// [`Engine::feed`] for UTF-8 text.
    pub fn feed_str(&mut self, input: &str) -> Result<(), WeftError> {
        self.feed(input.as_bytes())
    }

    /// Finalizes the session. Returns the accumulated output when no live
    /// output sink is bound, leaving the buffer empty; flushes the sink and
    /// returns `None` otherwise.
    pub fn end_input(&mut self) -> Result<Option<Vec<u8>>, WeftError> {
        match &mut self.out {
            OutputTarget::Sink(sink) => {
                sink.flush()?;
                Ok(None)
            }
            OutputTarget::Buffer(buffer) => Ok(Some(std::mem::take(buffer))),
        }
    }

    /// Returns the context to a fresh state for reuse: tables, counters,
    /// buffers, and the script runtime are all torn down.
    pub fn reset(&mut self) {
        if let OutputTarget::Buffer(buffer) = &mut self.out {
            buffer.clear();
        }
        self.lua_enabled = true;
        self.clear_local_on_next_read = false;
        self.input_line = 0;
        self.output_line = 1;
        self.line.clear();
        self.secondary.clear();
        self.secondary_pos = 0;
        self.globals.clear();
        self.locals.clear();
        self.script = None;
        self.input.clear();
        self.input_pos = 0;
    }

    // ========================================================================
    // LINE LOADING
    // ========================================================================

    /// Appends the next logical line (always newline-terminated) to the line
    /// buffer: from the secondary queue when it holds pending lines, else
    /// from primary input. Loading from primary resets the local macro table
    /// when the clear gate is armed and `clear_local` allows it; queue loads
    /// never clear, so locals survive multi-line splices.
    fn load_next_line(&mut self, clear_local: bool) {
        if self.secondary_pos == self.secondary.len() {
            if self.clear_local_on_next_read && clear_local {
                self.locals.clear();
            }
            if self.input_pos >= self.input.len() {
                return;
            }
            let rest = &self.input[self.input_pos..];
            let line_end = match rest.iter().position(|&b| b == b'\n') {
                Some(at) => self.input_pos + at,
                None => self.input.len(),
            };
            self.line.extend_from_slice(&self.input[self.input_pos..line_end]);
            self.line.push(b'\n');
            self.input_pos = if line_end < self.input.len() {
                line_end + 1
            } else {
                self.input.len()
            };
            self.input_line += 1;
        } else {
            let start = self.secondary_pos;
            let rest = &self.secondary[start..];
            let line_end = match rest.iter().position(|&b| b == b'\n') {
                Some(at) => start + at + 1,
                None => self.secondary.len(),
            };
            self.line.extend_from_slice(&self.secondary[start..line_end]);
            if self.line.last() != Some(&b'\n') {
                self.line.push(b'\n');
            }
            self.secondary_pos = line_end;
        }
    }

    // ========================================================================
    // EXPANSION PASSES
    // ========================================================================

    fn expand_non_lazy(&mut self, state: &mut PassState) {
        state.saw_lazy_call = false;
        self.expand_macros(false, state);
    }

    fn expand_lazy(&mut self, state: &mut PassState) {
        self.expand_macros(true, state);
    }

    /// One expansion pass over the line buffer. Repeatedly locates the
    /// rightmost call, dispatches built-ins, resolves the name against the
    /// local-then-global tables, and splices the replacement in place. The
    /// call-free suffix shrinks as trailing text is confirmed call-free and
    /// resets whenever a multi-line replacement rewrites the line's tail.
    fn expand_macros(&mut self, expand_lazy: bool, state: &mut PassState) {
        let mut call_free_suffix = 1;

        loop {
            let call = match scanner::find_last_call(
                &self.line,
                &mut call_free_suffix,
                expand_lazy,
                state,
            ) {
                Some(call) => call,
                None => break,
            };

            //  line_start               call.start                call.end               line_end
            //      |                        |                         |                      |
            //      |<---- call.head_len --->|<------ call.len() ----->|<--- call.tail_len -->|
            //      |------------------------|[[[...................]]]|----------------------|
            let name_start = call.start + CALL_OPEN.len();
            let name_end = match self.line[name_start..call.end]
                .iter()
                .position(|&b| b == b'(' || b == b']')
            {
                Some(rel) => name_start + rel,
                None => break,
            };

            let constant = self.line[name_end] == b']';
            if !constant && self.line[call.end - 4] != b')' {
                // Stray text between the closing paren and the brackets.
                self.clear_call(&call);
                continue;
            }

            // Built-ins are only considered for `_`-leading names, keeping
            // the common path a single comparison. Order matters: these
            // checks shadow the table lookup below.
            if self.line[name_start] == b'_' {
                if self.lua_enabled
                    && !constant
                    && &self.line[name_start..name_end] == b"__LUA__"
                {
                    let frag_start = call.start + b"[[[__LUA__(".len();
                    let frag_len = call.len() - b"[[[__LUA__()]]]".len();
                    let fragment = self.line[frag_start..frag_start + frag_len].to_vec();
                    let output = self.eval_fragment(&fragment);
                    if output.is_empty() {
                        self.clear_call(&call);
                    } else {
                        match output.iter().position(|&b| b == b'\n') {
                            None => self.replace_call(&call, &output),
                            Some(at) => {
                                self.replace_call_multiline(&call, &output, at + 1);
                                call_free_suffix = 1;
                            }
                        }
                    }
                    continue;
                }

                if self.line.get(call.end) == Some(&b'\n')
                    && &self.line[name_start..name_end] == b"__NO_NEWLINE__"
                {
                    // Drop the call and the newline, then glue the next
                    // logical line on without clearing local macros.
                    self.line.truncate(call.start - call.sigil_len());
                    let len_before_load = self.line.len();
                    self.load_next_line(false);
                    if self.line.len() == len_before_load {
                        self.line.push(b'\n');
                    }
                    if expand_lazy {
                        // The glued line may carry non-lazy calls of its own.
                        self.expand_non_lazy(state);
                    }
                    call_free_suffix = 1;
                    continue;
                }

                if &self.line[name_start..name_end] == b"__INPUT_LINE_NUMBER__" {
                    let text = self.input_line.to_string();
                    self.replace_call(&call, text.as_bytes());
                    continue;
                }

                if &self.line[name_start..name_end] == b"__OUTPUT_LINE_NUMBER__" {
                    let text = self.output_line.to_string();
                    self.replace_call(&call, text.as_bytes());
                    continue;
                }

                if &self.line[name_start..name_end] == b"__ENABLE_LUA__" {
                    self.lua_enabled = true;
                    self.clear_call(&call);
                    continue;
                }

                if &self.line[name_start..name_end] == b"__DISABLE_LUA__" {
                    self.lua_enabled = false;
                    self.clear_call(&call);
                    continue;
                }
            }

            let resolved = {
                let name = &self.line[name_start..name_end];
                self.locals
                    .lookup(name)
                    .or_else(|| self.globals.lookup(name))
                    .cloned()
            };
            let found = match resolved {
                Some(found) => found,
                None => {
                    // Undefined macros expand to nothing.
                    self.clear_call(&call);
                    continue;
                }
            };

            if constant {
                if found.is_oneline() {
                    self.replace_call(&call, &found.body);
                    continue;
                }
                self.replace_call_multiline(&call, &found.body, found.first_line_len);
                call_free_suffix = 1;
                continue;
            }

            // Parametrized call: parse the arguments out of the line, then
            // substitute them into the body before splicing.
            let args_start = name_end + 1;
            let args_end = call.end - b")]]]".len();
            let spans = args::parse_args(&self.line, args_start, args_end);
            let mut expanded = Vec::with_capacity(found.body.len());
            args::substitute_args(&self.line, &spans, &found.body, &mut expanded);

            if found.is_oneline() {
                self.replace_call(&call, &expanded);
                continue;
            }

            let first_line_len = expanded
                .iter()
                .position(|&b| b == b'\n')
                .map_or(expanded.len(), |at| at + 1);
            self.replace_call_multiline(&call, &expanded, first_line_len);
            call_free_suffix = 1;
        }
    }

    // ========================================================================
    // CALL SPLICING
    // ========================================================================

    fn clear_call(&mut self, call: &scanner::MacroCall) {
        let from = call.start - call.sigil_len();
        self.line.drain(from..call.end);
    }

    fn replace_call(&mut self, call: &scanner::MacroCall, text: &[u8]) {
        let from = call.start - call.sigil_len();
        self.line.splice(from..call.end, text.iter().copied());
    }

    /// Splices a multi-line replacement: the first line of `text` lands in
    /// the current line, and everything after it — followed by the rest of
    /// the current line and whatever was already pending — goes to the front
    /// of the secondary queue.
    fn replace_call_multiline(
        &mut self,
        call: &scanner::MacroCall,
        text: &[u8],
        first_line_len: usize,
    ) {
        debug_assert_eq!(text.get(first_line_len - 1), Some(&b'\n'));
        self.replace_call(call, &text[..first_line_len]);
        let new_line_len = call.head_len - call.sigil_len() + first_line_len;
        debug_assert_eq!(self.line.get(new_line_len - 1), Some(&b'\n'));

        let old_pending = self.secondary[self.secondary_pos..].to_vec();
        self.secondary.clear();
        self.secondary_pos = 0;
        self.secondary.extend_from_slice(&text[first_line_len..]);
        self.secondary.extend_from_slice(&self.line[new_line_len..]);
        self.secondary.extend_from_slice(&old_pending);
        self.line.truncate(new_line_len);
    }

    // ========================================================================
    // DIRECTIVES
    // ========================================================================

    /// Recognizes a directive at the start of the line and consumes it.
    /// Returns true when the line was a directive (nothing is emitted for
    /// it). Unrecognized `#` lines are not directives.
    fn find_and_process_directive(&mut self, state: &mut PassState) -> bool {
        if self.line.first() != Some(&b'#') {
            return false;
        }

        if self.line.starts_with(syntax::GLOBAL_MACRO_HEADER) {
            self.read_macro_definition(syntax::GLOBAL_MACRO_HEADER.len(), Scope::Global);
            return true;
        }
        if self.line.starts_with(syntax::LOCAL_MACRO_HEADER) {
            self.clear_local_on_next_read = false;
            self.read_macro_definition(syntax::LOCAL_MACRO_HEADER.len(), Scope::Local);
            return true;
        }
        if self.line.starts_with(syntax::GLOBAL_BLOCK_MACRO_HEADER) {
            self.read_block_macro_definition(Scope::Global, state);
            return true;
        }
        if self.line.starts_with(syntax::LOCAL_BLOCK_MACRO_HEADER) {
            self.clear_local_on_next_read = false;
            self.read_block_macro_definition(Scope::Local, state);
            return true;
        }
        if self.line.starts_with(syntax::SCRIPT_BLOCK_HEADER) {
            self.read_and_eval_script_block(state);
            return true;
        }
        if self.line.starts_with(syntax::COMMENT_BLOCK_HEADER) {
            self.skip_comment_block(true, state);
            return true;
        }

        false
    }

    fn table_mut(&mut self, scope: Scope) -> &mut MacroTable {
        match scope {
            Scope::Global => &mut self.globals,
            Scope::Local => &mut self.locals,
        }
    }

    /// `#+MACRO name body` / `#+LOCAL_MACRO name body`. Without a space
    /// after the name the definition is silently skipped.
    fn read_macro_definition(&mut self, header_len: usize, scope: Scope) {
        let name_start = header_len;
        let rel = self.line[name_start..]
            .iter()
            .position(|&b| b == b' ' || b == b'\n')
            .unwrap_or(0);
        let name_end = name_start + rel;
        if self.line[name_end] == b'\n' {
            return;
        }
        let name = self.line[name_start..name_end].to_vec();
        let body = self.line[name_end + 1..self.line.len() - 1].to_vec();
        self.table_mut(scope).define(name, Macro::oneline(body));
    }

    /// `#+MACRO_BEGIN name` … `#+MACRO_END` (and the LOCAL variants).
    ///
    /// Body lines pass through the non-lazy expansion pass as they are read,
    /// so macros expand at definition time unless lazily deferred. Nested
    /// same-scope blocks are tracked by depth; comment blocks inside are
    /// honored without expanding into the body. An unterminated block
    /// discards everything collected.
    fn read_block_macro_definition(&mut self, scope: Scope, state: &mut PassState) {
        let (header, footer): (&[u8], &[u8]) = match scope {
            Scope::Global => (
                syntax::GLOBAL_BLOCK_MACRO_HEADER,
                syntax::GLOBAL_BLOCK_MACRO_FOOTER,
            ),
            Scope::Local => (
                syntax::LOCAL_BLOCK_MACRO_HEADER,
                syntax::LOCAL_BLOCK_MACRO_FOOTER,
            ),
        };

        let name_start = header.len();
        let rel = self.line[name_start..]
            .iter()
            .position(|&b| b == b'\n')
            .unwrap_or(0);
        let name = self.line[name_start..name_start + rel].to_vec();

        let mut first_line_len = 0;
        let mut depth = 1usize;
        let mut block: Vec<u8> = Vec::new();

        loop {
            self.line.clear();
            self.load_next_line(true);
            if self.line.is_empty() {
                return;
            }

            self.expand_non_lazy(state);

            if self.line.first() == Some(&b'#') {
                if self.line.as_slice() == footer {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                if self.line.as_slice() == syntax::COMMENT_BLOCK_HEADER {
                    self.skip_comment_block(false, state);
                    continue;
                }
            }

            if first_line_len == 0 && !block.is_empty() {
                first_line_len = block.len();
            }
            if self.line.starts_with(header) {
                depth += 1;
            }
            block.extend_from_slice(&self.line);
        }

        if !block.is_empty() {
            // Strip the final newline; it reappears from the call site.
            block.pop();
        }
        self.table_mut(scope).define(
            name,
            Macro {
                body: block,
                first_line_len,
            },
        );
    }

    /// `#+LUA_BEGIN` … `#+LUA_END`: collects fully expanded lines, evaluates
    /// them as one fragment, and splices the textual result ahead of the
    /// pending secondary input. An unterminated block discards everything.
    fn read_and_eval_script_block(&mut self, state: &mut PassState) {
        let mut block: Vec<u8> = Vec::new();

        loop {
            self.line.clear();
            self.load_next_line(true);
            if self.line.is_empty() {
                return;
            }

            loop {
                state.redo = false;
                self.expand_non_lazy(state);
                if state.saw_lazy_call {
                    self.expand_lazy(state);
                }
                if !state.redo {
                    break;
                }
            }

            if self.line.first() == Some(&b'#') {
                if self.line.as_slice() == syntax::SCRIPT_BLOCK_FOOTER {
                    break;
                }
                if self.line.as_slice() == syntax::COMMENT_BLOCK_HEADER {
                    self.skip_comment_block(true, state);
                    continue;
                }
            }

            block.extend_from_slice(&self.line);
        }

        let output = self.eval_fragment(&block);
        if !output.is_empty() {
            let mut queued = Vec::with_capacity(output.len() + 1);
            queued.extend_from_slice(&output);
            queued.push(b'\n');
            queued.extend_from_slice(&self.secondary[self.secondary_pos..]);
            self.secondary = queued;
            self.secondary_pos = 0;
        }
    }

    /// `#+COMMENT_BEGIN` … `#+COMMENT_END`: consumes lines without emitting
    /// them. Macro expansion still runs over the skipped lines (so example
    /// text can demo calls), but script evaluation is force-disabled for the
    /// duration to keep commented-out scripts side-effect free. Only the
    /// comment header/footer themselves are recognized while skipping; a
    /// `#+MACRO` line inside a comment is plain text.
    fn skip_comment_block(&mut self, expand_lazy: bool, state: &mut PassState) {
        let mut depth = 1usize;
        self.lua_enabled = false;

        loop {
            self.line.clear();
            self.load_next_line(true);
            if self.line.is_empty() {
                break;
            }

            loop {
                state.redo = false;
                self.expand_non_lazy(state);
                if expand_lazy && state.saw_lazy_call {
                    self.expand_lazy(state);
                }
                if !state.redo {
                    break;
                }
            }

            if self.line.first() != Some(&b'#') {
                continue;
            }
            if self.line.as_slice() == syntax::COMMENT_BLOCK_FOOTER {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            if self.line.as_slice() == syntax::COMMENT_BLOCK_HEADER {
                depth += 1;
            }
        }

        self.lua_enabled = true;
    }

    // ========================================================================
    // SCRIPT EVALUATION
    // ========================================================================

    /// Evaluates a script fragment with the expression/statement fallback:
    /// `return <fragment>` first, the bare fragment on any failure. When
    /// both attempts fail, the second error's text becomes the visible
    /// result and a diagnostic is written to the diagnostics sink.
    fn eval_fragment(&mut self, fragment: &[u8]) -> Vec<u8> {
        let fragment = String::from_utf8_lossy(fragment).into_owned();
        let factory = &self.script_factory;
        let script = self.script.get_or_insert_with(|| factory());

        let with_return = format!("return {fragment}");
        let output = match script.eval(&with_return) {
            Ok(value) => value,
            Err(_) => match script.eval(&fragment) {
                Ok(value) => value,
                Err(error) => {
                    let result = Some(error.message.clone());
                    self.report_script_failure(&error);
                    result
                }
            },
        };
        output.map(String::into_bytes).unwrap_or_default()
    }

    fn report_script_failure(&mut self, error: &ScriptError) {
        if let Some(diag) = &mut self.diag {
            let stage = match error.kind {
                ScriptErrorKind::Load => "load",
                ScriptErrorKind::Eval => "evaluation",
            };
            // Diagnostics are best effort; a failing sink must not abort
            // line processing.
            let _ = writeln!(diag, "script {stage} failed: {}", error.message);
        }
    }
}

// ============================================================================
// ONE-SHOT HELPERS
// ============================================================================

/// Expands `input` in a fresh buffered context and returns the output bytes.
pub fn expand(input: &[u8]) -> Result<Vec<u8>, WeftError> {
    let mut engine = Engine::new();
    engine.feed(input)?;
    Ok(engine.end_input()?.unwrap_or_default())
}

/// [`expand`] for UTF-8 text.
pub fn expand_str(input: &str) -> Result<String, WeftError> {
    Ok(String::from_utf8_lossy(&expand(input.as_bytes())?).into_owned())
}

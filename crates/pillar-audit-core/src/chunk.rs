//! Block-boundary chunker for Terraform/HCL files.
//!
//! Splits each file into one [`Chunk`] per top-level `resource`, `data`,
//! `module`, or `provider` block. Each chunk carries the variables, locals,
//! and outputs it references (resolved across all files of the same
//! directory, i.e. the same Terraform module) so it reads on its own.
//!
//! # Algorithm
//!
//! 1. Classify every byte as code, string, comment, or heredoc, so braces
//!    inside `"${...}"`, `# ...`, `/* ... */`, and `<<EOF` bodies never
//!    count toward nesting.
//! 2. Walk the code bytes at depth 0, reading `kind "label" ... {` headers
//!    and matching each opening brace to its close.
//! 3. Split every block body into depth-1 statements (attributes and nested
//!    blocks). Comment lines attach to the statement that follows them.
//! 4. Blocks whose estimated size exceeds `max_tokens` are re-emitted as
//!    several parts, each wrapped in the original header. Parts break only
//!    between statements; one oversized statement stays whole.
//!
//! Chunk ids are the SHA-256 of `(file_path, resource_name, source_text)`,
//! so re-chunking unchanged input yields identical ids.
//!
//! # Example
//!
//! ```rust
//! use pillar_audit_core::chunk::{Chunker, SourceFile};
//!
//! let files = vec![SourceFile::new(
//!     "main.tf",
//!     "resource \"aws_s3_bucket\" \"logs\" {\n  bucket = \"logs\"\n}\n",
//! )];
//! let chunker = Chunker::new(files, 1500);
//! let chunks: Vec<_> = chunker.chunks().collect::<Result<_, _>>().unwrap();
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].address(), "aws_s3_bucket.logs");
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use sha2::{Digest, Sha256};

use crate::error::{AuditError, Result};
use crate::models::{Chunk, LineRange};

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Block kinds that become chunks.
const CHUNKED_KINDS: [&str; 4] = ["resource", "data", "module", "provider"];

/// A file handed to the chunker: path relative to the scanned root plus text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: String,
    pub text: String,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            path: path.into().replace('\\', "/"),
            text: text.into(),
        }
    }
}

/// Rough token count used for the `max_tokens` limit.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(CHARS_PER_TOKEN)
}

// ============ Lexing ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Code,
    Str,
    Comment,
    Heredoc,
}

/// Lexing/structure failure: byte offset plus message.
type ScanError = (usize, String);

fn classify(text: &str) -> std::result::Result<Vec<Class>, ScanError> {
    let b = text.as_bytes();
    let mut class = vec![Class::Code; b.len()];
    let mut i = 0;

    while i < b.len() {
        match b[i] {
            b'#' => i = mark_line_comment(b, &mut class, i),
            b'/' if b.get(i + 1) == Some(&b'/') => i = mark_line_comment(b, &mut class, i),
            b'/' if b.get(i + 1) == Some(&b'*') => {
                let end = find(b, i + 2, b"*/")
                    .ok_or_else(|| (i, "unterminated block comment".to_string()))?
                    + 2;
                mark(&mut class, i, end, Class::Comment);
                i = end;
            }
            b'"' => {
                let end = scan_string(b, i)?;
                mark(&mut class, i, end, Class::Str);
                i = end;
            }
            b'<' if b.get(i + 1) == Some(&b'<') => match scan_heredoc(b, i)? {
                Some(end) => {
                    mark(&mut class, i, end, Class::Heredoc);
                    i = end;
                }
                None => i += 2,
            },
            _ => i += 1,
        }
    }

    Ok(class)
}

fn mark(class: &mut [Class], from: usize, to: usize, kind: Class) {
    for c in &mut class[from..to] {
        *c = kind;
    }
}

fn mark_line_comment(b: &[u8], class: &mut [Class], start: usize) -> usize {
    let end = find(b, start, b"\n").unwrap_or(b.len());
    mark(class, start, end, Class::Comment);
    end
}

fn find(b: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= b.len() {
        return None;
    }
    b[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Scan a quoted string starting at `start` (the opening quote). Returns the
/// index just past the closing quote.
fn scan_string(b: &[u8], start: usize) -> std::result::Result<usize, ScanError> {
    let unterminated = || (start, "unterminated string".to_string());
    let mut i = start + 1;
    loop {
        match b.get(i) {
            None | Some(b'\n') => return Err(unterminated()),
            Some(b'\\') => i += 2,
            Some(b'"') => return Ok(i + 1),
            Some(b'$') | Some(b'%') => {
                let marker = b[i];
                if b.get(i + 1) == Some(&marker) && b.get(i + 2) == Some(&b'{') {
                    // `$${` and `%%{` are literal escapes
                    i += 3;
                } else if b.get(i + 1) == Some(&b'{') {
                    i = scan_template(b, i + 2, start)?;
                } else {
                    i += 1;
                }
            }
            Some(_) => i += 1,
        }
    }
}

/// Scan the inside of `${ ... }` starting just past the opening brace.
fn scan_template(b: &[u8], from: usize, string_start: usize) -> std::result::Result<usize, ScanError> {
    let mut depth = 1usize;
    let mut i = from;
    loop {
        match b.get(i) {
            None => return Err((string_start, "unterminated interpolation".to_string())),
            Some(b'"') => i = scan_string(b, i)?,
            Some(b'{') => {
                depth += 1;
                i += 1;
            }
            Some(b'}') => {
                depth -= 1;
                i += 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            Some(_) => i += 1,
        }
    }
}

/// Scan a heredoc starting at `<<`. Returns `None` when `<<` is not followed
/// by a delimiter, otherwise the index just past the terminator line.
fn scan_heredoc(b: &[u8], start: usize) -> std::result::Result<Option<usize>, ScanError> {
    let mut j = start + 2;
    if b.get(j) == Some(&b'-') {
        j += 1;
    }
    let ident_start = j;
    if !b.get(j).copied().is_some_and(is_ident_start) {
        return Ok(None);
    }
    while b.get(j).copied().is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_') {
        j += 1;
    }
    let delimiter = &b[ident_start..j];
    let unterminated = || (start, "unterminated heredoc".to_string());

    let mut pos = find(b, j, b"\n").ok_or_else(unterminated)? + 1;
    while pos < b.len() {
        let line_end = find(b, pos, b"\n").unwrap_or(b.len());
        if b[pos..line_end].trim_ascii() == delimiter {
            return Ok(Some(line_end));
        }
        pos = line_end + 1;
    }
    Err(unterminated())
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_ident_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'-'
}

fn ident_end(b: &[u8], from: usize) -> usize {
    let mut i = from;
    while i < b.len() && is_ident_char(b[i]) {
        i += 1;
    }
    i
}

// ============ Structure ============

#[derive(Debug, Clone)]
struct RawStatement {
    /// Start of the first line of the statement (leading indentation kept).
    start: usize,
    end: usize,
    name: Option<String>,
}

#[derive(Debug, Clone)]
struct RawBlock {
    kind: String,
    labels: Vec<String>,
    start: usize,
    open: usize,
    close: usize,
    statements: Vec<RawStatement>,
}

struct Scanner<'t> {
    text: &'t str,
    b: &'t [u8],
    class: Vec<Class>,
}

impl<'t> Scanner<'t> {
    fn new(text: &'t str) -> std::result::Result<Self, ScanError> {
        let class = classify(text)?;
        Ok(Self {
            text,
            b: text.as_bytes(),
            class,
        })
    }

    fn is_code(&self, i: usize) -> bool {
        self.class[i] == Class::Code
    }

    fn char_at(&self, i: usize) -> char {
        self.text[i..].chars().next().unwrap_or('?')
    }

    /// Skip spaces, tabs, and inline comments, stopping at newlines.
    fn skip_inline(&self, mut i: usize) -> usize {
        while i < self.b.len() {
            let inline_space = self.is_code(i) && matches!(self.b[i], b' ' | b'\t' | b'\r');
            let inline_comment = self.class[i] == Class::Comment && self.b[i] != b'\n';
            if inline_space || inline_comment {
                i += 1;
            } else {
                break;
            }
        }
        i
    }

    fn blocks(&self) -> std::result::Result<Vec<RawBlock>, ScanError> {
        let len = self.b.len();
        let mut blocks = Vec::new();
        let mut i = 0;

        while i < len {
            let c = self.b[i];
            if !self.is_code(i) || c.is_ascii_whitespace() {
                i += 1;
                continue;
            }
            if c == b'}' {
                return Err((i, "unexpected '}'".to_string()));
            }
            if !is_ident_start(c) {
                return Err((i, format!("unexpected character '{}'", self.char_at(i))));
            }

            let start = i;
            let kind_end = ident_end(self.b, i);
            let kind = self.text[i..kind_end].to_string();
            i = self.skip_inline(kind_end);

            // Top-level attribute (tfvars style): tolerated and skipped.
            if i < len && self.is_code(i) && self.b[i] == b'=' && self.b.get(i + 1) != Some(&b'=') {
                i = self.end_of_logical_line(i)?;
                continue;
            }

            let mut labels = Vec::new();
            loop {
                i = self.skip_inline(i);
                if i >= len {
                    return Err((start, format!("expected '{{' after '{}' header", kind)));
                }
                if self.class[i] == Class::Str && self.b[i] == b'"' {
                    let mut end = i;
                    while end < len && self.class[end] == Class::Str {
                        end += 1;
                    }
                    labels.push(self.text[i + 1..end - 1].to_string());
                    i = end;
                } else if self.is_code(i) && is_ident_start(self.b[i]) {
                    let end = ident_end(self.b, i);
                    labels.push(self.text[i..end].to_string());
                    i = end;
                } else if self.is_code(i) && self.b[i] == b'{' {
                    break;
                } else {
                    return Err((i, format!("expected '{{' after '{}' header", kind)));
                }
            }

            let open = i;
            let close = self.matching_brace(open, start, &kind)?;
            let statements = self.statements(open + 1, close);
            blocks.push(RawBlock {
                kind,
                labels,
                start,
                open,
                close,
                statements,
            });
            i = close + 1;
        }

        Ok(blocks)
    }

    fn matching_brace(&self, open: usize, start: usize, kind: &str) -> std::result::Result<usize, ScanError> {
        let mut depth = 0usize;
        for j in open..self.b.len() {
            if !self.is_code(j) {
                continue;
            }
            match self.b[j] {
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(j);
                    }
                }
                _ => {}
            }
        }
        Err((start, format!("unclosed '{}' block", kind)))
    }

    /// Index just past the newline ending a top-level attribute.
    fn end_of_logical_line(&self, from: usize) -> std::result::Result<usize, ScanError> {
        let mut nest = 0i32;
        for j in from..self.b.len() {
            if !self.is_code(j) {
                continue;
            }
            match self.b[j] {
                b'{' | b'[' | b'(' => nest += 1,
                b'}' | b']' | b')' => {
                    nest -= 1;
                    if nest < 0 {
                        return Err((j, format!("unexpected '{}'", self.char_at(j))));
                    }
                }
                b'\n' if nest == 0 => return Ok(j + 1),
                _ => {}
            }
        }
        if nest > 0 {
            return Err((from, "unclosed bracket".to_string()));
        }
        Ok(self.b.len())
    }

    /// Split `[from, to)` into depth-1 statements.
    fn statements(&self, from: usize, to: usize) -> Vec<RawStatement> {
        let mut out: Vec<RawStatement> = Vec::new();
        let mut start: Option<usize> = None;
        let mut code_start: Option<usize> = None;
        let mut pending_comment: Option<usize> = None;
        let mut nest = 0i32;

        let finish = |start: usize,
                          code_start: Option<usize>,
                          end: usize,
                          pending: &mut Option<usize>,
                          out: &mut Vec<RawStatement>| {
            match code_start {
                Some(cs) => {
                    let begin = pending.take().unwrap_or(start);
                    let name = if is_ident_start(self.b[cs]) {
                        Some(self.text[cs..ident_end(self.b, cs)].to_string())
                    } else {
                        None
                    };
                    out.push(RawStatement {
                        start: self.line_begin(begin),
                        end: self.trim_end(begin, end),
                        name,
                    });
                }
                None => {
                    pending.get_or_insert(start);
                }
            }
        };

        for j in from..to {
            let c = self.b[j];
            let code = self.is_code(j);

            if start.is_none() {
                if code && c.is_ascii_whitespace() {
                    continue;
                }
                start = Some(j);
            }
            if code && !c.is_ascii_whitespace() && code_start.is_none() {
                code_start = Some(j);
            }
            if code {
                match c {
                    b'{' | b'[' | b'(' => nest += 1,
                    b'}' | b']' | b')' => nest = (nest - 1).max(0),
                    b'\n' if nest == 0 => {
                        if let Some(s) = start.take() {
                            finish(s, code_start.take(), j, &mut pending_comment, &mut out);
                        }
                    }
                    _ => {}
                }
            }
        }
        if let Some(s) = start.take() {
            finish(s, code_start.take(), to, &mut pending_comment, &mut out);
        }
        // Trailing comments belong to the last statement.
        if let Some(p) = pending_comment {
            match out.last_mut() {
                Some(last) => last.end = self.trim_end(last.start, to),
                None => out.push(RawStatement {
                    start: self.line_begin(p),
                    end: self.trim_end(p, to),
                    name: None,
                }),
            }
        }
        out
    }

    /// Move `i` back to the start of its line when only whitespace precedes it.
    fn line_begin(&self, i: usize) -> usize {
        let begin = self.text[..i].rfind('\n').map(|p| p + 1).unwrap_or(0);
        if self.text[begin..i].trim().is_empty() {
            begin
        } else {
            i
        }
    }

    fn trim_end(&self, start: usize, end: usize) -> usize {
        start + self.text[start..end].trim_end().len()
    }
}

fn line_of(text: &str, byte: usize) -> usize {
    text[..byte.min(text.len())].bytes().filter(|&c| c == b'\n').count() + 1
}

fn required_labels(kind: &str) -> Option<usize> {
    match kind {
        "resource" | "data" => Some(2),
        "module" | "provider" | "variable" | "output" => Some(1),
        "locals" => Some(0),
        _ => None,
    }
}

fn parse_file(path: &str, text: &str) -> Result<Vec<RawBlock>> {
    let to_error = |(pos, message): ScanError| AuditError::parse(path, line_of(text, pos), message);
    let scanner = Scanner::new(text).map_err(to_error)?;
    let blocks = scanner.blocks().map_err(to_error)?;

    for block in &blocks {
        if let Some(n) = required_labels(&block.kind) {
            if block.labels.len() != n {
                return Err(AuditError::parse(
                    path,
                    line_of(text, block.start),
                    format!(
                        "'{}' block expects {} label(s), found {}",
                        block.kind,
                        n,
                        block.labels.len()
                    ),
                ));
            }
        }
    }
    Ok(blocks)
}

// ============ Context ============

/// Variables, locals, and outputs declared in one directory.
#[derive(Debug, Default)]
struct ModuleContext {
    variables: BTreeMap<String, String>,
    locals: BTreeMap<String, String>,
    outputs: BTreeMap<String, String>,
}

/// Names referenced as `{prefix}NAME`, e.g. `var.region`.
fn references(text: &str, prefix: &str) -> BTreeSet<String> {
    let b = text.as_bytes();
    let mut found = BTreeSet::new();
    let mut from = 0;
    while let Some(pos) = text[from..].find(prefix).map(|p| p + from) {
        let boundary = pos == 0 || !(is_ident_char(b[pos - 1]) || b[pos - 1] == b'.');
        let name_start = pos + prefix.len();
        let name_end = ident_end(b, name_start);
        if boundary && name_end > name_start {
            found.insert(text[name_start..name_end].to_string());
        }
        from = name_start;
    }
    found
}

/// Whether `text` mentions `address` as a whole reference.
fn mentions(text: &str, address: &str) -> bool {
    let b = text.as_bytes();
    let mut from = 0;
    while let Some(pos) = text[from..].find(address).map(|p| p + from) {
        let end = pos + address.len();
        let before_ok = pos == 0 || !(is_ident_char(b[pos - 1]) || b[pos - 1] == b'.');
        let after_ok = end >= b.len() || !is_ident_char(b[end]);
        if before_ok && after_ok {
            return true;
        }
        from = end;
    }
    false
}

impl ModuleContext {
    fn render(&self, text: &str, address: &str) -> String {
        let mut sections = Vec::new();

        // Locals may be built from other locals and variables; follow them.
        let mut var_names = references(text, "var.");
        let mut local_names = BTreeSet::new();
        let mut queue: Vec<String> = references(text, "local.").into_iter().collect();
        while let Some(name) = queue.pop() {
            let Some(body) = self.locals.get(&name) else { continue };
            if !local_names.insert(name) {
                continue;
            }
            var_names.extend(references(body, "var."));
            queue.extend(
                references(body, "local.")
                    .into_iter()
                    .filter(|n| !local_names.contains(n)),
            );
        }

        let vars: Vec<&str> = var_names
            .iter()
            .filter_map(|name| self.variables.get(name))
            .map(|s| s.as_str())
            .collect();
        if !vars.is_empty() {
            sections.push(format!("# Referenced variables\n{}", vars.join("\n\n")));
        }

        let locals: Vec<&str> = local_names
            .iter()
            .filter_map(|name| self.locals.get(name))
            .map(|s| s.as_str())
            .collect();
        if !locals.is_empty() {
            sections.push(format!("# Referenced locals\nlocals {{\n{}\n}}", locals.join("\n")));
        }

        let outputs: Vec<&str> = self
            .outputs
            .values()
            .filter(|o| mentions(o, address))
            .map(|s| s.as_str())
            .collect();
        if !outputs.is_empty() {
            sections.push(format!(
                "# Outputs referencing this block\n{}",
                outputs.join("\n\n")
            ));
        }

        sections.join("\n\n")
    }
}

fn directory_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(pos) => &path[..pos],
        None => "",
    }
}

// ============ Chunker ============

struct ParsedFile {
    path: String,
    text: String,
    blocks: Result<Vec<RawBlock>>,
}

/// Chunks a fixed set of files.
///
/// Parsing happens once in [`Chunker::new`]; [`Chunker::chunks`] assembles
/// chunks lazily, file by file, and may be called any number of times with
/// identical results.
pub struct Chunker {
    max_tokens: usize,
    files: Vec<ParsedFile>,
    modules: HashMap<String, ModuleContext>,
}

impl Chunker {
    pub fn new(files: impl IntoIterator<Item = SourceFile>, max_tokens: usize) -> Self {
        let mut files: Vec<SourceFile> = files.into_iter().collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));

        let parsed: Vec<ParsedFile> = files
            .into_iter()
            .map(|f| {
                let blocks = parse_file(&f.path, &f.text);
                ParsedFile {
                    path: f.path,
                    text: f.text,
                    blocks,
                }
            })
            .collect();

        let mut modules: HashMap<String, ModuleContext> = HashMap::new();
        for file in &parsed {
            let Ok(blocks) = &file.blocks else { continue };
            let ctx = modules
                .entry(directory_of(&file.path).to_string())
                .or_default();
            for block in blocks {
                let block_text = &file.text[block.start..=block.close];
                match block.kind.as_str() {
                    "variable" => {
                        ctx.variables
                            .entry(block.labels[0].clone())
                            .or_insert_with(|| block_text.to_string());
                    }
                    "output" => {
                        ctx.outputs
                            .entry(block.labels[0].clone())
                            .or_insert_with(|| block_text.to_string());
                    }
                    "locals" => {
                        for stmt in &block.statements {
                            if let Some(name) = &stmt.name {
                                ctx.locals
                                    .entry(name.clone())
                                    .or_insert_with(|| file.text[stmt.start..stmt.end].to_string());
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        Self {
            max_tokens: max_tokens.max(1),
            files: parsed,
            modules,
        }
    }

    /// Number of input files (including ones that failed to parse).
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Lazily yield chunks in file-path order, then source order.
    ///
    /// A file that failed to parse yields exactly one `Err` and no chunks.
    pub fn chunks(&self) -> Chunks<'_> {
        Chunks {
            chunker: self,
            next_file: 0,
            pending: VecDeque::new(),
        }
    }

    fn file_chunks(&self, file: &ParsedFile, blocks: &[RawBlock]) -> Vec<Chunk> {
        let empty = ModuleContext::default();
        let ctx = self
            .modules
            .get(directory_of(&file.path))
            .unwrap_or(&empty);
        let max_chars = self.max_tokens.saturating_mul(CHARS_PER_TOKEN);

        let mut out = Vec::new();
        for block in blocks {
            if !CHUNKED_KINDS.contains(&block.kind.as_str()) {
                continue;
            }
            let (resource_type, resource_name) = match block.kind.as_str() {
                "resource" => (block.labels[0].clone(), block.labels[1].clone()),
                "data" => (format!("data.{}", block.labels[0]), block.labels[1].clone()),
                "provider" => match provider_alias(&file.text, block) {
                    Some(alias) => ("provider".to_string(), format!("{}.{}", block.labels[0], alias)),
                    None => ("provider".to_string(), block.labels[0].clone()),
                },
                other => (other.to_string(), block.labels[0].clone()),
            };

            let full = &file.text[block.start..=block.close];
            let parts = if full.len() > max_chars && block.statements.len() > 1 {
                split_block(&file.text, block, max_chars)
            } else {
                vec![(
                    full.to_string(),
                    LineRange {
                        start: line_of(&file.text, block.start),
                        end: line_of(&file.text, block.close),
                    },
                )]
            };

            let total = parts.len();
            for (n, (source_text, line_range)) in parts.into_iter().enumerate() {
                let mut chunk = Chunk {
                    id: String::new(),
                    file_path: file.path.clone(),
                    resource_type: resource_type.clone(),
                    resource_name: resource_name.clone(),
                    source_text,
                    context_text: String::new(),
                    line_range,
                    part: (total > 1).then_some((n + 1, total)),
                };
                chunk.context_text = ctx.render(&chunk.source_text, &chunk.address());
                chunk.id = chunk_id(&chunk.file_path, &chunk.resource_name, &chunk.source_text);
                out.push(chunk);
            }
        }
        out
    }
}

/// The `alias = "NAME"` of a provider block, if any.
fn provider_alias(text: &str, block: &RawBlock) -> Option<String> {
    let stmt = block
        .statements
        .iter()
        .find(|s| s.name.as_deref() == Some("alias"))?;
    let line = text[stmt.start..stmt.end]
        .lines()
        .map(str::trim_start)
        .find(|l| l.starts_with("alias"))?;
    let value = line["alias".len()..].trim_start().strip_prefix('=')?.trim_start();
    let value = value.strip_prefix('"')?;
    let alias = &value[..value.find('"')?];
    (!alias.is_empty()).then(|| alias.to_string())
}

/// Group statements into header-wrapped parts of at most `max_chars`.
fn split_block(text: &str, block: &RawBlock, max_chars: usize) -> Vec<(String, LineRange)> {
    let header = &text[block.start..=block.open];
    let overhead = header.len() + 3; // "\n" + "\n}"

    let mut groups: Vec<Vec<&RawStatement>> = Vec::new();
    let mut current: Vec<&RawStatement> = Vec::new();
    let mut current_len = overhead;

    for stmt in &block.statements {
        let len = stmt.end - stmt.start + 1;
        if !current.is_empty() && current_len + len > max_chars {
            groups.push(std::mem::take(&mut current));
            current_len = overhead;
        }
        current.push(stmt);
        current_len += len;
    }
    if !current.is_empty() {
        groups.push(current);
    }

    groups
        .into_iter()
        .map(|group| {
            let body: Vec<&str> = group.iter().map(|s| &text[s.start..s.end]).collect();
            let source = format!("{}\n{}\n}}", header, body.join("\n"));
            let first = group[0];
            let last = group[group.len() - 1];
            (
                source,
                LineRange {
                    start: line_of(text, first.start),
                    end: line_of(text, last.end),
                },
            )
        })
        .collect()
}

fn chunk_id(file_path: &str, resource_name: &str, source_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_path.as_bytes());
    hasher.update([0u8]);
    hasher.update(resource_name.as_bytes());
    hasher.update([0u8]);
    hasher.update(source_text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Lazy iterator returned by [`Chunker::chunks`].
pub struct Chunks<'a> {
    chunker: &'a Chunker,
    next_file: usize,
    pending: VecDeque<Chunk>,
}

impl Iterator for Chunks<'_> {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(chunk) = self.pending.pop_front() {
                return Some(Ok(chunk));
            }
            let file = self.chunker.files.get(self.next_file)?;
            self.next_file += 1;
            match &file.blocks {
                Err(e) => return Some(Err(e.clone())),
                Ok(blocks) => self
                    .pending
                    .extend(self.chunker.file_chunks(file, blocks)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAIN_TF: &str = r#"variable "bucket_name" {
  type    = string
  default = "logs"
}

variable "unused" {
  type = string
}

locals {
  common_tags = {
    team = "platform"
  }
  retention = 30
}

# Log bucket
resource "aws_s3_bucket" "logs" {
  bucket = var.bucket_name
  tags   = local.common_tags
}

data "aws_iam_policy_document" "read" {
  statement {
    actions = ["s3:GetObject"]
  }
}

module "vpc" {
  source = "terraform-aws-modules/vpc/aws"
}

output "logs_arn" {
  value = aws_s3_bucket.logs.arn
}
"#;

    fn collect(chunker: &Chunker) -> (Vec<Chunk>, Vec<AuditError>) {
        let mut chunks = Vec::new();
        let mut errors = Vec::new();
        for item in chunker.chunks() {
            match item {
                Ok(c) => chunks.push(c),
                Err(e) => errors.push(e),
            }
        }
        (chunks, errors)
    }

    #[test]
    fn test_one_chunk_per_declared_block() {
        let chunker = Chunker::new(vec![SourceFile::new("infra/main.tf", MAIN_TF)], 1500);
        let (chunks, errors) = collect(&chunker);
        assert!(errors.is_empty());
        let addresses: Vec<String> = chunks.iter().map(|c| c.address()).collect();
        assert_eq!(
            addresses,
            vec![
                "aws_s3_bucket.logs",
                "data.aws_iam_policy_document.read",
                "module.vpc"
            ]
        );
        assert_eq!(chunks[0].line_range, LineRange { start: 18, end: 21 });
        assert!(chunks[0].source_text.starts_with("resource \"aws_s3_bucket\" \"logs\""));
        assert!(chunks[0].source_text.ends_with('}'));
    }

    #[test]
    fn test_context_attaches_referenced_declarations() {
        let chunker = Chunker::new(vec![SourceFile::new("infra/main.tf", MAIN_TF)], 1500);
        let (chunks, _) = collect(&chunker);
        let ctx = &chunks[0].context_text;
        assert!(ctx.contains("variable \"bucket_name\""));
        assert!(!ctx.contains("variable \"unused\""));
        assert!(ctx.contains("common_tags = {"));
        assert!(!ctx.contains("retention"));
        assert!(ctx.contains("output \"logs_arn\""));

        // module.vpc references nothing
        assert!(chunks[2].context_text.is_empty());
    }

    #[test]
    fn test_context_follows_locals_transitively() {
        let text = r#"variable "env" {
  default = "prod"
}

variable "team" {
  default = "platform"
}

locals {
  prefix = "${var.env}-app"
  name   = "${local.prefix}-logs"
  tags   = { team = var.team }
}

resource "aws_s3_bucket" "logs" {
  bucket = local.name
}
"#;
        let chunker = Chunker::new(vec![SourceFile::new("main.tf", text)], 1500);
        let (chunks, _) = collect(&chunker);
        let ctx = &chunks[0].context_text;
        assert!(ctx.contains("name   = \"${local.prefix}-logs\""));
        assert!(ctx.contains("prefix = \"${var.env}-app\""));
        assert!(ctx.contains("variable \"env\""));
        assert!(!ctx.contains("variable \"team\""));
        assert!(!ctx.contains("tags"));
    }

    #[test]
    fn test_aliased_provider_gets_distinct_address() {
        let text = r#"provider "aws" {
  region = "us-east-1"
}

provider "aws" {
  # secondary region
  alias  = "west"
  region = "us-west-2"
}
"#;
        let chunker = Chunker::new(vec![SourceFile::new("providers.tf", text)], 1500);
        let (chunks, errors) = collect(&chunker);
        assert!(errors.is_empty());
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].address(), "provider.aws");
        assert_eq!(chunks[1].address(), "provider.aws.west");
        assert_ne!(chunks[0].resource_key(), chunks[1].resource_key());
    }

    #[test]
    fn test_huge_max_tokens_does_not_overflow() {
        let chunker = Chunker::new(vec![SourceFile::new("main.tf", MAIN_TF)], usize::MAX);
        let (chunks, errors) = collect(&chunker);
        assert!(errors.is_empty());
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.part.is_none()));
    }

    #[test]
    fn test_identical_parts_are_all_emitted() {
        let mut text = String::from("resource \"aws_security_group\" \"web\" {\n");
        for _ in 0..4 {
            text.push_str("  ingress {\n    from_port = 443\n    to_port   = 443\n  }\n");
        }
        text.push_str("}\n");

        let chunker = Chunker::new(vec![SourceFile::new("sg.tf", text.as_str())], 20);
        let (chunks, _) = collect(&chunker);
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[3].part, Some((4, 4)));
        // same (file, name, text) means the same id
        assert!(chunks.iter().all(|c| c.id == chunks[0].id));
        assert_ne!(chunks[0].line_range, chunks[1].line_range);
    }

    #[test]
    fn test_context_resolves_across_files_in_same_directory() {
        let files = vec![
            SourceFile::new(
                "env/variables.tf",
                "variable \"region\" {\n  default = \"us-west-2\"\n}\n",
            ),
            SourceFile::new(
                "env/main.tf",
                "provider \"aws\" {\n  region = var.region\n}\n",
            ),
            SourceFile::new(
                "other/main.tf",
                "provider \"aws\" {\n  region = var.region\n}\n",
            ),
        ];
        let chunker = Chunker::new(files, 1500);
        let (chunks, _) = collect(&chunker);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].file_path, "env/main.tf");
        assert_eq!(chunks[0].resource_type, "provider");
        assert!(chunks[0].context_text.contains("us-west-2"));
        assert!(chunks[1].context_text.is_empty());
    }

    #[test]
    fn test_ids_are_deterministic_and_restartable() {
        let a = Chunker::new(vec![SourceFile::new("main.tf", MAIN_TF)], 1500);
        let b = Chunker::new(vec![SourceFile::new("main.tf", MAIN_TF)], 1500);
        let (first, _) = collect(&a);
        let (again, _) = collect(&a);
        let (other, _) = collect(&b);
        assert_eq!(first, again);
        assert_eq!(first, other);

        let moved = Chunker::new(vec![SourceFile::new("elsewhere.tf", MAIN_TF)], 1500);
        let (moved, _) = collect(&moved);
        assert_ne!(first[0].id, moved[0].id);
    }

    #[test]
    fn test_braces_in_strings_comments_and_heredocs() {
        let text = r#"resource "aws_iam_policy" "p" {
  # closing brace in comment }
  name = "weird}{name"
  path = "${format("/%s/", "x}")}"
  /* block { comment */
  policy = <<-EOF
    {
      "Version": "2012-10-17"
    }
  EOF
}

resource "aws_sqs_queue" "q" {
  name = "q"
}
"#;
        let chunker = Chunker::new(vec![SourceFile::new("iam.tf", text)], 1500);
        let (chunks, errors) = collect(&chunker);
        assert!(errors.is_empty(), "{:?}", errors);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].line_range, LineRange { start: 1, end: 11 });
        assert_eq!(chunks[1].address(), "aws_sqs_queue.q");
    }

    #[test]
    fn test_malformed_file_is_reported_and_others_continue() {
        let files = vec![
            SourceFile::new("a_broken.tf", "resource \"aws_s3_bucket\" \"b\" {\n  bucket = \"x\"\n"),
            SourceFile::new("b_ok.tf", "module \"m\" {\n  source = \"./m\"\n}\n"),
        ];
        let chunker = Chunker::new(files, 1500);
        let (chunks, errors) = collect(&chunker);
        assert_eq!(chunks.len(), 1);
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            AuditError::Parse { path, line, message } => {
                assert_eq!(path.to_string_lossy(), "a_broken.tf");
                assert_eq!(*line, 1);
                assert!(message.contains("unclosed"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_stray_closing_brace() {
        let chunker = Chunker::new(vec![SourceFile::new("x.tf", "module \"m\" {\n}\n}\n")], 1500);
        let (_, errors) = collect(&chunker);
        assert!(matches!(&errors[0], AuditError::Parse { line: 3, .. }));
    }

    #[test]
    fn test_unterminated_string() {
        let chunker = Chunker::new(
            vec![SourceFile::new("x.tf", "module \"m\" {\n  source = \"./m\n}\n")],
            1500,
        );
        let (_, errors) = collect(&chunker);
        match &errors[0] {
            AuditError::Parse { line, message, .. } => {
                assert_eq!(*line, 2);
                assert!(message.contains("unterminated string"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_wrong_label_count() {
        let chunker = Chunker::new(
            vec![SourceFile::new("x.tf", "resource \"aws_s3_bucket\" {\n}\n")],
            1500,
        );
        let (_, errors) = collect(&chunker);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_top_level_attributes_tolerated() {
        let text = "region = \"us-east-1\"\ntags = {\n  a = \"b\"\n}\nmodule \"m\" {\n  source = \"./m\"\n}\n";
        let chunker = Chunker::new(vec![SourceFile::new("x.tf", text)], 1500);
        let (chunks, errors) = collect(&chunker);
        assert!(errors.is_empty());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].line_range.start, 5);
    }

    #[test]
    fn test_oversized_block_splits_between_statements() {
        let mut text = String::from("resource \"aws_security_group\" \"web\" {\n");
        for i in 0..6 {
            text.push_str(&format!(
                "  ingress {{\n    from_port   = {}\n    to_port     = {}\n    cidr_blocks = [\"0.0.0.0/0\"]\n  }}\n",
                i, i
            ));
        }
        text.push_str("}\n");

        // ~25 tokens per part
        let chunker = Chunker::new(vec![SourceFile::new("sg.tf", text.as_str())], 25);
        let (chunks, errors) = collect(&chunker);
        assert!(errors.is_empty());
        assert!(chunks.len() > 1);

        let total = chunks.len();
        let mut ingress_seen = 0;
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.part, Some((i + 1, total)));
            assert_eq!(c.resource_name, "web");
            assert!(c.source_text.starts_with("resource \"aws_security_group\" \"web\" {\n"));
            assert!(c.source_text.ends_with("\n}"));
            // every part re-parses on its own
            assert!(parse_file("part.tf", &c.source_text).is_ok());
            ingress_seen += c.source_text.matches("ingress {").count();
        }
        assert_eq!(ingress_seen, 6);

        let ids: BTreeSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids.len(), total);
    }

    #[test]
    fn test_single_huge_statement_is_not_split() {
        let text = format!(
            "resource \"aws_iam_policy\" \"p\" {{\n  policy = \"{}\"\n}}\n",
            "x".repeat(400)
        );
        let chunker = Chunker::new(vec![SourceFile::new("p.tf", text.as_str())], 10);
        let (chunks, _) = collect(&chunker);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].part, None);
    }

    #[test]
    fn test_statement_split_keeps_comments_with_next_statement() {
        let text = "resource \"a\" \"b\" {\n  # the name\n  name = \"n\"\n  tags = {\n    x = 1\n  }\n}\n";
        let scanner = Scanner::new(text).unwrap();
        let blocks = scanner.blocks().unwrap();
        let stmts = &blocks[0].statements;
        assert_eq!(stmts.len(), 2);
        assert_eq!(
            &text[stmts[0].start..stmts[0].end],
            "  # the name\n  name = \"n\""
        );
        assert_eq!(stmts[0].name.as_deref(), Some("name"));
        assert_eq!(stmts[1].name.as_deref(), Some("tags"));
    }

    #[test]
    fn test_references_respect_boundaries() {
        let refs = references("a = var.x\nb = myvar.y\nc = \"${var.z_1}\"", "var.");
        let refs: Vec<&str> = refs.iter().map(|s| s.as_str()).collect();
        assert_eq!(refs, vec!["x", "z_1"]);

        assert!(mentions("value = aws_s3_bucket.logs.arn", "aws_s3_bucket.logs"));
        assert!(!mentions("value = aws_s3_bucket.logs2.arn", "aws_s3_bucket.logs"));
        assert!(!mentions("value = data.aws_s3_bucket.logs.arn", "aws_s3_bucket.logs"));
    }

    #[test]
    fn test_empty_file_yields_nothing() {
        let chunker = Chunker::new(vec![SourceFile::new("empty.tf", "")], 100);
        assert_eq!(chunker.chunks().count(), 0);
        assert_eq!(chunker.file_count(), 1);
    }
}

//! Input parsing.
//!
//! The front end hands tensors over as strings: `name(i,j)` with an
//! optional block suffix (`name_ab(i,j)` or `name(i,j)_ab`), or the
//! bra-ket form `<p,q||r,s>` for antisymmetrized two-electron
//! integrals. Amplitude tensors (`t`, `l`, `r`, `s`, `m`) get their
//! rank appended to the name (`t(a,i)` becomes `t1`), and in
//! sigma-vector mode the de-excitation amplitudes carry a leading
//! excited-state line.

use crate::error::{PqError, Result};
use crate::label::Label;
use crate::line::Line;
use crate::options::Options;
use crate::vertex::Vertex;

/// Bare amplitude names that get rank-derived suffixes.
const AMPLITUDE_NAMES: [&str; 5] = ["t", "l", "r", "s", "m"];

/// Amplitudes that thread an excited-state index in sigma mode.
const SIGMA_AMPLITUDES: [&str; 4] = ["l", "r", "s", "m"];

fn malformed(token: &str, message: impl Into<String>) -> PqError {
    PqError::MalformedInput {
        token: token.to_string(),
        message: message.into(),
    }
}

/// Parse one tensor string into a [`Vertex`].
pub fn parse_vertex(input: &str, options: &Options) -> Result<Vertex> {
    let input = input.trim();
    if input.is_empty() {
        return Err(malformed(input, "empty tensor string"));
    }
    if input.starts_with('<') {
        return parse_eri(input, options);
    }
    if !input.contains('(') {
        // a bare name is a named scalar
        if input.contains(')') || input.contains('<') || input.contains('>') {
            return Err(malformed(input, "unbalanced delimiters"));
        }
        return Ok(Vertex::scalar(input));
    }

    let open = input.find('(').expect("checked above");
    let close = input
        .rfind(')')
        .ok_or_else(|| malformed(input, "missing closing parenthesis"))?;
    if close < open {
        return Err(malformed(input, "unbalanced parentheses"));
    }

    let mut head = &input[..open];
    let body = &input[open + 1..close];
    let tail = &input[close + 1..];

    // block characters may trail the name (`g_ab(...)`) or the closing
    // parenthesis (`g(...)_ab`)
    let mut block = String::new();
    if let Some(idx) = find_block_suffix(head) {
        block = head[idx + 1..].to_string();
        head = &head[..idx];
    }
    if let Some(rest) = tail.strip_prefix('_') {
        if !block.is_empty() {
            return Err(malformed(input, "two block suffixes"));
        }
        block = rest.to_string();
    } else if !tail.is_empty() {
        return Err(malformed(tail, "unexpected trailing characters"));
    }

    if head.is_empty() {
        return Err(malformed(input, "missing tensor name"));
    }

    let labels: Vec<&str> = body.split(',').map(str::trim).collect();
    build_vertex(head, &labels, &block, options)
}

/// `<p,q||r,s>` with an optional `_blk` suffix.
fn parse_eri(input: &str, options: &Options) -> Result<Vertex> {
    let close = input
        .find('>')
        .ok_or_else(|| malformed(input, "missing `>` in bra-ket integral"))?;
    let inner = &input[1..close];
    let tail = &input[close + 1..];

    let (bra, ket) = inner
        .split_once("||")
        .ok_or_else(|| malformed(input, "missing `||` in bra-ket integral"))?;
    let mut labels: Vec<&str> = bra.split(',').map(str::trim).collect();
    labels.extend(ket.split(',').map(str::trim));
    if labels.len() != 4 {
        return Err(malformed(
            input,
            format!("two-electron integral needs 4 indices, found {}", labels.len()),
        ));
    }

    let block = match tail.strip_prefix('_') {
        Some(rest) => rest.to_string(),
        None if tail.is_empty() => String::new(),
        None => return Err(malformed(tail, "unexpected trailing characters")),
    };

    build_vertex("eri", &labels, &block, options)
}

/// Name suffix position when everything after `_` is block characters.
fn find_block_suffix(head: &str) -> Option<usize> {
    let idx = head.find('_')?;
    let suffix = &head[idx + 1..];
    if !suffix.is_empty() && suffix.chars().all(|c| matches!(c, 'a' | 'b' | '0' | '1')) {
        Some(idx)
    } else {
        None
    }
}

fn build_vertex(name: &str, labels: &[&str], block: &str, options: &Options) -> Result<Vertex> {
    let mut block_chars = block.chars();
    let mut lines = Vec::with_capacity(labels.len());
    for label in labels {
        // peek the kind first: sigma and density lines consume no
        // block character
        let bare = Line::new(label, None, options)?;
        let line = if !block.is_empty() && !bare.sigma && !bare.density {
            let c = block_chars.next().ok_or_else(|| {
                malformed(block, format!("block suffix too short for `{name}`"))
            })?;
            Line::new(label, Some(c), options)?
        } else {
            bare
        };
        lines.push(line);
    }
    if block_chars.next().is_some() {
        return Err(malformed(block, format!("block suffix too long for `{name}`")));
    }

    let name = amplitude_name(name, lines.len());
    if options.format_sigma && SIGMA_AMPLITUDES.contains(&strip_rank(&name)) {
        let sigma_line = Line::from_parts(Label::from_str("I").expect("valid label"), false, true, false);
        lines.insert(0, sigma_line);
    }
    Ok(Vertex::new(name, lines))
}

/// Amplitudes are rank-determined: `t` over (a,i) is `t1`.
fn amplitude_name(name: &str, rank: usize) -> String {
    if AMPLITUDE_NAMES.contains(&name) {
        format!("{}{}", name, rank.div_ceil(2))
    } else {
        name.to_string()
    }
}

fn strip_rank(name: &str) -> &str {
    name.trim_end_matches(|c: char| c.is_ascii_digit())
}

//! Hunk representation and the patch-set text format.
//!
//! A patch set is serialised as a sequence of hunks:
//!
//! ```text
//! @@ -1,11 +1,17 @@
//!  hello
//! +there
//!  world
//! ```
//!
//! Each line body is URI-encoded (spaces left literal) so that newlines and
//! other control characters survive the line-oriented format.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::fmt::Write;

use super::diff::{self, Diff, Op};
use super::{PatchConfig, PatchError};

/// Characters escaped in hunk bodies. Mirrors `encodeURI` minus the space.
const BODY_ESCAPE: &AsciiSet = &CONTROLS
    .add(b'"')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Largest position or length accepted in a hunk header
pub const MAX_COORD: usize = i32::MAX as usize;

/// A single context-anchored edit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hunk {
    pub diffs: Vec<Diff>,
    pub start1: usize,
    pub start2: usize,
    pub length1: usize,
    pub length2: usize,
}

impl Hunk {
    fn header(&self) -> String {
        format!(
            "@@ -{} +{} @@",
            coords(self.start1, self.length1),
            coords(self.start2, self.length2)
        )
    }
}

fn coords(start: usize, length: usize) -> String {
    match length {
        0 => format!("{},0", start),
        1 => format!("{}", start + 1),
        _ => format!("{},{}", start + 1, length),
    }
}

/// Serialise hunks into patch-set text.
pub fn to_text(hunks: &[Hunk]) -> String {
    let mut out = String::new();
    for hunk in hunks {
        out.push_str(&hunk.header());
        out.push('\n');
        for diff in &hunk.diffs {
            let sign = match diff.op {
                Op::Insert => '+',
                Op::Delete => '-',
                Op::Equal => ' ',
            };
            let body: String = diff.text.iter().collect();
            let _ = writeln!(out, "{}{}", sign, utf8_percent_encode(&body, BODY_ESCAPE));
        }
    }
    out
}

/// Parse patch-set text into hunks.
pub fn from_text(text: &str) -> Result<Vec<Hunk>, PatchError> {
    let mut hunks = Vec::new();
    let lines: Vec<&str> = text.split('\n').collect();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if line.is_empty() {
            i += 1;
            continue;
        }

        let header = line;
        let mut hunk = parse_header(header)?;
        i += 1;

        while i < lines.len() {
            let line = lines[i];
            let mut chars = line.chars();
            let Some(sign) = chars.next() else {
                // Blank lines are tolerated between hunks
                i += 1;
                continue;
            };
            if sign == '@' {
                break;
            }

            let body = percent_decode_str(chars.as_str())
                .decode_utf8()
                .map_err(|_| PatchError::InvalidEncoding(line.to_string()))?;
            let op = match sign {
                '-' => Op::Delete,
                '+' => Op::Insert,
                ' ' => Op::Equal,
                other => return Err(PatchError::InvalidOperation(other, line.to_string())),
            };
            hunk.diffs.push(Diff::new(op, body.chars().collect::<Vec<_>>()));
            i += 1;
        }

        if hunk.diffs.is_empty() {
            return Err(PatchError::EmptyHunk(header.to_string()));
        }
        // Spans come from the body; header lengths are only checked for range
        hunk.length1 = span(&hunk.diffs, Op::Insert);
        hunk.length2 = span(&hunk.diffs, Op::Delete);
        hunks.push(hunk);
    }

    Ok(hunks)
}

/// Chars covered by every diff except those of kind `skip`
fn span(diffs: &[Diff], skip: Op) -> usize {
    diffs.iter().filter(|d| d.op != skip).map(Diff::len).sum()
}

fn parse_header(line: &str) -> Result<Hunk, PatchError> {
    let invalid = || PatchError::InvalidHeader(line.to_string());

    let inner = line
        .strip_prefix("@@ -")
        .and_then(|rest| rest.strip_suffix(" @@"))
        .ok_or_else(invalid)?;
    let (old, new) = inner.split_once(" +").ok_or_else(invalid)?;
    let (start1, length1) = parse_coords(old).ok_or_else(invalid)?;
    let (start2, length2) = parse_coords(new).ok_or_else(invalid)?;

    Ok(Hunk {
        diffs: Vec::new(),
        start1,
        start2,
        length1,
        length2,
    })
}

/// `s` means one char at `s`, `s,0` means an empty span after `s`,
/// `s,l` means `l` chars at `s`. Positions are 1-based on the wire and
/// bounded by [`MAX_COORD`].
fn parse_coords(field: &str) -> Option<(usize, usize)> {
    let number = |s: &str| s.parse::<usize>().ok().filter(|&n| n <= MAX_COORD);
    match field.split_once(',') {
        None => {
            let start = number(field)?;
            Some((start.checked_sub(1)?, 1))
        }
        Some((start, length)) => {
            let start = number(start)?;
            let length = number(length)?;
            if length == 0 {
                Some((start, 0))
            } else {
                Some((start.checked_sub(1)?, length))
            }
        }
    }
}

/// Grow a hunk's surrounding context until its source pattern is unique in
/// `text`, bounded by what the matcher can handle.
pub fn add_context(config: &PatchConfig, hunk: &mut Hunk, text: &[char]) {
    if text.is_empty() {
        return;
    }

    let clamp = |i: usize| i.min(text.len());
    let end = clamp(hunk.start2 + hunk.length1);
    let mut pattern = &text[clamp(hunk.start2)..end];
    let mut padding = 0;

    while diff::find(text, pattern, 0) != diff::rfind(text, pattern, text.len())
        && pattern.len() < config.match_max_bits - 2 * config.margin
    {
        padding += config.margin;
        pattern = &text[hunk.start2.saturating_sub(padding)..clamp(hunk.start2 + hunk.length1 + padding)];
    }
    // One more chunk of context for good luck
    padding += config.margin;

    let prefix = text[hunk.start2.saturating_sub(padding)..clamp(hunk.start2)].to_vec();
    let suffix = text[end..clamp(hunk.start2 + hunk.length1 + padding)].to_vec();

    let (prefix_len, suffix_len) = (prefix.len(), suffix.len());
    if !prefix.is_empty() {
        hunk.diffs.insert(0, Diff::new(Op::Equal, prefix));
    }
    if !suffix.is_empty() {
        hunk.diffs.push(Diff::new(Op::Equal, suffix));
    }

    hunk.start1 -= prefix_len;
    hunk.start2 -= prefix_len;
    hunk.length1 += prefix_len + suffix_len;
    hunk.length2 += prefix_len + suffix_len;
}

/// Surround the hunk set with a sentinel padding so edits at either end of
/// the document still have context to match against. Returns the padding.
pub fn add_padding(config: &PatchConfig, hunks: &mut [Hunk]) -> Vec<char> {
    let pad_len = config.margin;
    let padding: Vec<char> = (1..=pad_len as u32).filter_map(char::from_u32).collect();

    for hunk in hunks.iter_mut() {
        hunk.start1 = hunk.start1.saturating_add(pad_len);
        hunk.start2 = hunk.start2.saturating_add(pad_len);
    }

    if let Some(first) = hunks.first_mut() {
        match first.diffs.first_mut() {
            Some(diff) if diff.op == Op::Equal => {
                if pad_len > diff.len() {
                    let extra = pad_len - diff.len();
                    let mut text = padding[diff.len()..].to_vec();
                    text.extend_from_slice(&diff.text);
                    diff.text = text;
                    first.start1 = first.start1.saturating_sub(extra);
                    first.start2 = first.start2.saturating_sub(extra);
                    first.length1 += extra;
                    first.length2 += extra;
                }
            }
            _ => {
                first.diffs.insert(0, Diff::new(Op::Equal, padding.clone()));
                first.start1 = first.start1.saturating_sub(pad_len);
                first.start2 = first.start2.saturating_sub(pad_len);
                first.length1 += pad_len;
                first.length2 += pad_len;
            }
        }
    }

    if let Some(last) = hunks.last_mut() {
        match last.diffs.last_mut() {
            Some(diff) if diff.op == Op::Equal => {
                if pad_len > diff.len() {
                    let extra = pad_len - diff.len();
                    diff.text.extend_from_slice(&padding[..extra]);
                    last.length1 += extra;
                    last.length2 += extra;
                }
            }
            _ => {
                last.diffs.push(Diff::new(Op::Equal, padding.clone()));
                last.length1 += pad_len;
                last.length2 += pad_len;
            }
        }
    }

    padding
}

/// Break up hunks whose source span is longer than the matcher can search for.
pub fn split_max(config: &PatchConfig, hunks: &mut Vec<Hunk>) {
    let patch_size = config.match_max_bits;
    let margin = config.margin;
    let mut x = 0;

    while x < hunks.len() {
        if hunks[x].length1 <= patch_size {
            x += 1;
            continue;
        }

        let mut big = hunks.remove(x);
        let mut start1 = big.start1;
        let mut start2 = big.start2;
        let mut precontext: Vec<char> = Vec::new();

        while !big.diffs.is_empty() {
            let mut hunk = Hunk {
                start1: start1.saturating_sub(precontext.len()),
                start2: start2.saturating_sub(precontext.len()),
                ..Hunk::default()
            };
            let mut empty = true;

            if !precontext.is_empty() {
                hunk.length1 = precontext.len();
                hunk.length2 = precontext.len();
                hunk.diffs.push(Diff::new(Op::Equal, precontext.clone()));
            }

            while !big.diffs.is_empty() && hunk.length1 < patch_size - margin {
                let op = big.diffs[0].op;
                let len = big.diffs[0].len();

                if op == Op::Insert {
                    hunk.length2 += len;
                    start2 += len;
                    hunk.diffs.push(big.diffs.remove(0));
                    empty = false;
                } else if op == Op::Delete
                    && hunk.diffs.len() == 1
                    && hunk.diffs[0].op == Op::Equal
                    && len > 2 * patch_size
                {
                    // Oversized deletion goes out in one piece
                    hunk.length1 += len;
                    start1 += len;
                    empty = false;
                    hunk.diffs.push(big.diffs.remove(0));
                } else {
                    let take = len.min(patch_size - hunk.length1 - margin);
                    let text = big.diffs[0].text[..take].to_vec();
                    hunk.length1 += take;
                    start1 += take;
                    if op == Op::Equal {
                        hunk.length2 += take;
                        start2 += take;
                    } else {
                        empty = false;
                    }
                    hunk.diffs.push(Diff::new(op, text));
                    if take == len {
                        big.diffs.remove(0);
                    } else {
                        big.diffs[0].text.drain(..take);
                    }
                }
            }

            let post_text = diff::text2(&hunk.diffs);
            precontext = post_text[post_text.len().saturating_sub(margin)..].to_vec();

            let remaining = diff::text1(&big.diffs);
            let postcontext = remaining[..remaining.len().min(margin)].to_vec();
            if !postcontext.is_empty() {
                hunk.length1 += postcontext.len();
                hunk.length2 += postcontext.len();
                match hunk.diffs.last_mut() {
                    Some(last) if last.op == Op::Equal => last.text.extend(postcontext),
                    _ => hunk.diffs.push(Diff::new(Op::Equal, postcontext)),
                }
            }

            if !empty {
                hunks.insert(x, hunk);
                x += 1;
            }
        }
    }
}

//! Patch engine for collaborative document content.
//!
//! Clients send incremental edits as patch sets: context-anchored hunks in
//! the diff-match-patch text format. The engine parses them and applies each
//! hunk against the current document using fuzzy positional matching, so
//! edits still land when concurrent changes have shifted the text around.
//!
//! This module performs no I/O.

mod bitap;
pub mod diff;
pub mod hunk;

use thiserror::Error;

use diff::Op;
use hunk::Hunk;

/// Errors raised while reading a patch set
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PatchError {
    #[error("Invalid hunk header: {0}")]
    InvalidHeader(String),

    #[error("Invalid hunk operation '{0}' in line: {1}")]
    InvalidOperation(char, String),

    #[error("Invalid encoding in line: {0}")]
    InvalidEncoding(String),

    #[error("Hunk has no body: {0}")]
    EmptyHunk(String),
}

/// Tuning for matching and patch generation
#[derive(Debug, Clone)]
pub struct PatchConfig {
    /// Highest match score accepted (0.0 = perfect, 1.0 = anything)
    pub match_threshold: f64,
    /// How far from the expected location a match may drift, in chars.
    /// A match this far away adds 1.0 to its score. 0 requires the exact spot.
    pub match_distance: usize,
    /// Longest pattern the matcher can search for
    pub match_max_bits: usize,
    /// Error ratio above which a long hunk is refused even though both of its
    /// ends were found
    pub delete_threshold: f64,
    /// Context chars kept around each hunk
    pub margin: usize,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            match_threshold: 0.5,
            match_distance: 1000,
            match_max_bits: 32,
            delete_threshold: 0.5,
            margin: 4,
        }
    }
}

/// Result of applying a patch set
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOutcome {
    /// Resulting document text (the untouched base when rejected)
    pub text: String,
    /// Per-hunk success flags
    pub applied: Vec<bool>,
}

impl ApplyOutcome {
    /// A patch set counts as applied when its first hunk landed. An empty
    /// set (no changes) trivially applies.
    pub fn ok(&self) -> bool {
        self.applied.first().copied().unwrap_or(true)
    }
}

/// Parses, generates and applies patch sets
#[derive(Debug, Clone, Default)]
pub struct PatchEngine {
    config: PatchConfig,
}

impl PatchEngine {
    pub fn new(config: PatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PatchConfig {
        &self.config
    }

    /// Apply serialized `patch_text` to `base`.
    ///
    /// Malformed patch text is an error. A well-formed patch that does not
    /// fit is reported through [`ApplyOutcome::ok`], with `base` returned
    /// unchanged.
    pub fn apply(&self, base: &str, patch_text: &str) -> Result<ApplyOutcome, PatchError> {
        let hunks = hunk::from_text(patch_text)?;
        let (text, applied) = self.apply_hunks(hunks, base);

        let outcome = ApplyOutcome { text, applied };
        if outcome.ok() {
            Ok(outcome)
        } else {
            Ok(ApplyOutcome {
                text: base.to_string(),
                ..outcome
            })
        }
    }

    /// Build the patch-set text that turns `before` into `after`.
    pub fn make(&self, before: &str, after: &str) -> String {
        let before: Vec<char> = before.chars().collect();
        let after: Vec<char> = after.chars().collect();
        hunk::to_text(&self.make_hunks(&before, &after))
    }

    fn make_hunks(&self, before: &[char], after: &[char]) -> Vec<Hunk> {
        let diffs = diff::diff_main(before, after);
        let margin = self.config.margin;

        let mut hunks = Vec::new();
        let mut current = Hunk::default();
        let (mut count1, mut count2) = (0, 0);
        // Text as it stands before the current hunk, and after every hunk so far
        let mut prepatch: Vec<char> = before.to_vec();
        let mut postpatch: Vec<char> = before.to_vec();

        let last = diffs.len().saturating_sub(1);
        for (i, d) in diffs.into_iter().enumerate() {
            let len = d.len();
            if current.diffs.is_empty() && d.op != Op::Equal {
                current.start1 = count1;
                current.start2 = count2;
            }

            match d.op {
                Op::Insert => {
                    current.length2 += len;
                    postpatch.splice(count2..count2, d.text.iter().copied());
                    current.diffs.push(d.clone());
                }
                Op::Delete => {
                    current.length1 += len;
                    postpatch.drain(count2..count2 + len);
                    current.diffs.push(d.clone());
                }
                Op::Equal => {
                    if len <= 2 * margin && !current.diffs.is_empty() && i != last {
                        // Small equality inside a hunk
                        current.diffs.push(d.clone());
                        current.length1 += len;
                        current.length2 += len;
                    } else if len >= 2 * margin && !current.diffs.is_empty() {
                        // Large equality closes the hunk
                        hunk::add_context(&self.config, &mut current, &prepatch);
                        hunks.push(std::mem::take(&mut current));
                        prepatch = postpatch.clone();
                        count1 = count2;
                    }
                }
            }

            if d.op != Op::Insert {
                count1 += len;
            }
            if d.op != Op::Delete {
                count2 += len;
            }
        }

        if !current.diffs.is_empty() {
            hunk::add_context(&self.config, &mut current, &prepatch);
            hunks.push(current);
        }

        hunks
    }

    fn apply_hunks(&self, mut hunks: Vec<Hunk>, base: &str) -> (String, Vec<bool>) {
        if hunks.is_empty() {
            return (base.to_string(), Vec::new());
        }

        let config = &self.config;
        let max_bits = config.match_max_bits;

        let padding = hunk::add_padding(config, &mut hunks);
        let mut text: Vec<char> = padding.clone();
        text.extend(base.chars());
        text.extend_from_slice(&padding);
        hunk::split_max(config, &mut hunks);

        // Offset between where hunks expect to land and where they did
        let mut delta: isize = 0;
        let mut applied = Vec::with_capacity(hunks.len());

        for h in &hunks {
            let expected = (h.start2 as isize).saturating_add(delta);
            let text1 = diff::text1(&h.diffs);

            let mut end_loc = None;
            let start_loc = if text1.len() > max_bits {
                // Too long to search for whole: anchor both ends
                bitap::match_main(config, &text, &text1[..max_bits], expected).and_then(|start| {
                    end_loc = bitap::match_main(
                        config,
                        &text,
                        &text1[text1.len() - max_bits..],
                        expected.saturating_add((text1.len() - max_bits) as isize),
                    );
                    match end_loc {
                        Some(end) if start < end => Some(start),
                        _ => None,
                    }
                })
            } else {
                bitap::match_main(config, &text, &text1, expected)
            };

            let Some(start) = start_loc else {
                applied.push(false);
                delta = delta.saturating_sub(h.length2 as isize - h.length1 as isize);
                continue;
            };

            applied.push(true);
            delta = (start as isize).saturating_sub(expected);

            let found_end = match end_loc {
                Some(end) => (end + max_bits).min(text.len()),
                None => (start + text1.len()).min(text.len()),
            };
            let found = text[start..found_end].to_vec();

            if found == text1 {
                text.splice(start..start + text1.len(), diff::text2(&h.diffs));
                continue;
            }

            // Imperfect match: map the hunk's edits onto what is actually there
            let alignment = diff::diff_main(&text1, &found);
            if text1.len() > max_bits
                && diff::levenshtein(&alignment) as f64 / text1.len() as f64 > config.delete_threshold
            {
                if let Some(flag) = applied.last_mut() {
                    *flag = false;
                }
                continue;
            }

            let mut index1 = 0;
            for d in &h.diffs {
                if d.op != Op::Equal {
                    let from = (start + diff::x_index(&alignment, index1)).min(text.len());
                    match d.op {
                        Op::Insert => {
                            text.splice(from..from, d.text.iter().copied());
                        }
                        Op::Delete => {
                            let to = (start + diff::x_index(&alignment, index1 + d.len()))
                                .min(text.len())
                                .max(from);
                            text.drain(from..to);
                        }
                        Op::Equal => {}
                    }
                }
                if d.op != Op::Delete {
                    index1 += d.len();
                }
            }
        }

        let end = text.len().saturating_sub(padding.len());
        let begin = padding.len().min(end);
        (text[begin..end].iter().collect(), applied)
    }
}

//! Character-level diff used to build patch sets and to re-align hunks that
//! only approximately match the current document.
//!
//! The core is Myers' O(ND) bisection over `char` slices, with the common
//! prefix/suffix trimmed first and the result normalised by [`cleanup_merge`].

/// Kind of edit carried by a [`Diff`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Delete,
    Equal,
    Insert,
}

/// One run of characters and what happened to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff {
    pub op: Op,
    pub text: Vec<char>,
}

impl Diff {
    pub fn new(op: Op, text: impl Into<Vec<char>>) -> Self {
        Self {
            op,
            text: text.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }
}

/// Compute the edits that turn `a` into `b`.
pub fn diff_main(a: &[char], b: &[char]) -> Vec<Diff> {
    if a == b {
        return if a.is_empty() {
            Vec::new()
        } else {
            vec![Diff::new(Op::Equal, a)]
        };
    }

    let prefix = common_prefix(a, b);
    let (a_rest, b_rest) = (&a[prefix..], &b[prefix..]);
    let suffix = common_suffix(a_rest, b_rest);
    let a_mid = &a_rest[..a_rest.len() - suffix];
    let b_mid = &b_rest[..b_rest.len() - suffix];

    let mut diffs = Vec::new();
    if prefix > 0 {
        diffs.push(Diff::new(Op::Equal, &a[..prefix]));
    }
    diffs.extend(compute(a_mid, b_mid));
    if suffix > 0 {
        diffs.push(Diff::new(Op::Equal, &a_rest[a_rest.len() - suffix..]));
    }

    cleanup_merge(&mut diffs);
    diffs
}

fn compute(a: &[char], b: &[char]) -> Vec<Diff> {
    if a.is_empty() {
        return vec![Diff::new(Op::Insert, b)];
    }
    if b.is_empty() {
        return vec![Diff::new(Op::Delete, a)];
    }

    let a_longer = a.len() > b.len();
    let (long, short) = if a_longer { (a, b) } else { (b, a) };

    if let Some(i) = find(long, short, 0) {
        // Shorter text is inside the longer text
        let op = if a_longer { Op::Delete } else { Op::Insert };
        return vec![
            Diff::new(op, &long[..i]),
            Diff::new(Op::Equal, short),
            Diff::new(op, &long[i + short.len()..]),
        ]
        .into_iter()
        .filter(|d| !d.text.is_empty())
        .collect();
    }

    if short.len() == 1 {
        return vec![Diff::new(Op::Delete, a), Diff::new(Op::Insert, b)];
    }

    bisect(a, b)
}

/// Find the middle snake of the edit graph and recurse on both halves.
fn bisect(a: &[char], b: &[char]) -> Vec<Diff> {
    let len1 = a.len() as isize;
    let len2 = b.len() as isize;
    let max_d = (len1 + len2 + 1) / 2;
    let v_offset = max_d;
    let v_length = 2 * max_d;
    let mut v1 = vec![-1isize; v_length as usize];
    let mut v2 = vec![-1isize; v_length as usize];
    v1[(v_offset + 1) as usize] = 0;
    v2[(v_offset + 1) as usize] = 0;

    let delta = len1 - len2;
    // Paths collide on the forward pass when delta is odd
    let front = delta % 2 != 0;

    let (mut k1start, mut k1end, mut k2start, mut k2end) = (0isize, 0isize, 0isize, 0isize);

    for d in 0..max_d {
        let mut k1 = -d + k1start;
        while k1 <= d - k1end {
            let k1_offset = (v_offset + k1) as usize;
            let mut x1 = if k1 == -d || (k1 != d && v1[k1_offset - 1] < v1[k1_offset + 1]) {
                v1[k1_offset + 1]
            } else {
                v1[k1_offset - 1] + 1
            };
            let mut y1 = x1 - k1;
            while x1 < len1 && y1 < len2 && a[x1 as usize] == b[y1 as usize] {
                x1 += 1;
                y1 += 1;
            }
            v1[k1_offset] = x1;
            if x1 > len1 {
                k1end += 2;
            } else if y1 > len2 {
                k1start += 2;
            } else if front {
                let k2_offset = v_offset + delta - k1;
                if k2_offset >= 0 && k2_offset < v_length && v2[k2_offset as usize] != -1 {
                    let x2 = len1 - v2[k2_offset as usize];
                    if x1 >= x2 {
                        return bisect_split(a, b, x1 as usize, y1 as usize);
                    }
                }
            }
            k1 += 2;
        }

        let mut k2 = -d + k2start;
        while k2 <= d - k2end {
            let k2_offset = (v_offset + k2) as usize;
            let mut x2 = if k2 == -d || (k2 != d && v2[k2_offset - 1] < v2[k2_offset + 1]) {
                v2[k2_offset + 1]
            } else {
                v2[k2_offset - 1] + 1
            };
            let mut y2 = x2 - k2;
            while x2 < len1
                && y2 < len2
                && a[(len1 - x2 - 1) as usize] == b[(len2 - y2 - 1) as usize]
            {
                x2 += 1;
                y2 += 1;
            }
            v2[k2_offset] = x2;
            if x2 > len1 {
                k2end += 2;
            } else if y2 > len2 {
                k2start += 2;
            } else if !front {
                let k1_offset = v_offset + delta - k2;
                if k1_offset >= 0 && k1_offset < v_length && v1[k1_offset as usize] != -1 {
                    let x1 = v1[k1_offset as usize];
                    let y1 = v_offset + x1 - k1_offset;
                    if x1 >= len1 - x2 {
                        return bisect_split(a, b, x1 as usize, y1 as usize);
                    }
                }
            }
            k2 += 2;
        }
    }

    // No commonality at all
    vec![Diff::new(Op::Delete, a), Diff::new(Op::Insert, b)]
}

fn bisect_split(a: &[char], b: &[char], x: usize, y: usize) -> Vec<Diff> {
    let mut diffs = diff_main(&a[..x], &b[..y]);
    diffs.extend(diff_main(&a[x..], &b[y..]));
    diffs
}

/// Merge adjacent runs of the same kind and factor shared text out of
/// delete/insert pairs.
pub fn cleanup_merge(diffs: &mut Vec<Diff>) {
    let mut merged: Vec<Diff> = Vec::with_capacity(diffs.len());
    let mut deleted: Vec<char> = Vec::new();
    let mut inserted: Vec<char> = Vec::new();

    // Sentinel flushes the trailing edit run
    diffs.push(Diff::new(Op::Equal, Vec::new()));

    for diff in diffs.drain(..) {
        match diff.op {
            Op::Insert => inserted.extend(diff.text),
            Op::Delete => deleted.extend(diff.text),
            Op::Equal => {
                let mut equal = diff.text;
                if !deleted.is_empty() && !inserted.is_empty() {
                    let prefix = common_prefix(&inserted, &deleted);
                    if prefix > 0 {
                        let shared: Vec<char> = inserted.drain(..prefix).collect();
                        deleted.drain(..prefix);
                        push_equal(&mut merged, shared);
                    }
                    let suffix = common_suffix(&inserted, &deleted);
                    if suffix > 0 {
                        let mut shared = inserted.split_off(inserted.len() - suffix);
                        deleted.truncate(deleted.len() - suffix);
                        shared.extend(equal);
                        equal = shared;
                    }
                }
                if !deleted.is_empty() {
                    merged.push(Diff::new(Op::Delete, std::mem::take(&mut deleted)));
                }
                if !inserted.is_empty() {
                    merged.push(Diff::new(Op::Insert, std::mem::take(&mut inserted)));
                }
                if !equal.is_empty() {
                    push_equal(&mut merged, equal);
                }
            }
        }
    }

    *diffs = merged;
}

fn push_equal(diffs: &mut Vec<Diff>, text: Vec<char>) {
    match diffs.last_mut() {
        Some(last) if last.op == Op::Equal => last.text.extend(text),
        _ => diffs.push(Diff::new(Op::Equal, text)),
    }
}

/// Source text of a diff list (everything but insertions)
pub fn text1(diffs: &[Diff]) -> Vec<char> {
    diffs
        .iter()
        .filter(|d| d.op != Op::Insert)
        .flat_map(|d| d.text.iter().copied())
        .collect()
}

/// Destination text of a diff list (everything but deletions)
pub fn text2(diffs: &[Diff]) -> Vec<char> {
    diffs
        .iter()
        .filter(|d| d.op != Op::Delete)
        .flat_map(|d| d.text.iter().copied())
        .collect()
}

/// Number of inserted, deleted or substituted characters.
pub fn levenshtein(diffs: &[Diff]) -> usize {
    let (mut distance, mut inserted, mut deleted) = (0, 0, 0);
    for diff in diffs {
        match diff.op {
            Op::Insert => inserted += diff.len(),
            Op::Delete => deleted += diff.len(),
            Op::Equal => {
                distance += inserted.max(deleted);
                inserted = 0;
                deleted = 0;
            }
        }
    }
    distance + inserted.max(deleted)
}

/// Translate a location in the source text to the equivalent location in the
/// destination text.
pub fn x_index(diffs: &[Diff], loc: usize) -> usize {
    let (mut chars1, mut chars2) = (0, 0);
    let (mut last1, mut last2) = (0, 0);
    let mut hit = None;
    for diff in diffs {
        if diff.op != Op::Insert {
            chars1 += diff.len();
        }
        if diff.op != Op::Delete {
            chars2 += diff.len();
        }
        if chars1 > loc {
            hit = Some(diff.op);
            break;
        }
        last1 = chars1;
        last2 = chars2;
    }
    if hit == Some(Op::Delete) {
        // Location was deleted
        return last2;
    }
    last2 + (loc - last1)
}

pub fn common_prefix(a: &[char], b: &[char]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

pub fn common_suffix(a: &[char], b: &[char]) -> usize {
    a.iter()
        .rev()
        .zip(b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count()
}

/// First occurrence of `needle` in `haystack` at or after `from`.
pub fn find(haystack: &[char], needle: &[char], from: usize) -> Option<usize> {
    if needle.is_empty() {
        return (from <= haystack.len()).then_some(from);
    }
    if from >= haystack.len() || needle.len() > haystack.len() - from {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

/// Last occurrence of `needle` starting at or before `from`.
pub fn rfind(haystack: &[char], needle: &[char], from: usize) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    let last_start = (haystack.len() - needle.len()).min(from);
    (0..=last_start)
        .rev()
        .find(|&i| &haystack[i..i + needle.len()] == needle)
}

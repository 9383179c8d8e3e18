//! Approximate string location using the Bitap algorithm.
//!
//! Locates the best instance of a pattern near an expected offset, trading
//! off the number of character errors against the distance from that offset.

use std::collections::HashMap;

use super::diff::{find, rfind};
use super::PatchConfig;

/// Locate the best instance of `pattern` in `text` near `loc`.
///
/// Returns `None` when nothing scores under the configured threshold.
pub fn match_main(config: &PatchConfig, text: &[char], pattern: &[char], loc: isize) -> Option<usize> {
    let loc = loc.clamp(0, text.len() as isize) as usize;

    if text == pattern {
        return Some(0);
    }
    if text.is_empty() {
        return None;
    }
    if loc + pattern.len() <= text.len() && &text[loc..loc + pattern.len()] == pattern {
        // Perfect match at the expected spot
        return Some(loc);
    }
    if pattern.is_empty() {
        return Some(loc);
    }
    if pattern.len() > config.match_max_bits {
        return None;
    }

    match_bitap(config, text, pattern, loc)
}

fn match_bitap(config: &PatchConfig, text: &[char], pattern: &[char], loc: usize) -> Option<usize> {
    let alphabet = alphabet(pattern);
    let score = |errors: usize, x: usize| bitap_score(config, errors, x, loc, pattern.len());

    let mut threshold = config.match_threshold;

    // Exact matches tighten the threshold before the fuzzy search starts
    if let Some(best) = find(text, pattern, loc) {
        threshold = threshold.min(score(0, best));
        if let Some(best) = rfind(text, pattern, loc + pattern.len()) {
            threshold = threshold.min(score(0, best));
        }
    }

    let match_mask: u64 = 1 << (pattern.len() - 1);
    let mut best_loc: Option<usize> = None;
    let mut bin_max = (pattern.len() + text.len()) as isize;
    let mut last_rd: Vec<u64> = Vec::new();
    let loc_i = loc as isize;

    for d in 0..pattern.len() {
        // Binary search for how far from `loc` we can stray at this error level
        let mut bin_min: isize = 0;
        let mut bin_mid = bin_max;
        while bin_min < bin_mid {
            if score(d, (loc_i + bin_mid) as usize) <= threshold {
                bin_min = bin_mid;
            } else {
                bin_max = bin_mid;
            }
            bin_mid = (bin_max - bin_min) / 2 + bin_min;
        }
        bin_max = bin_mid;

        let mut start = (loc_i - bin_mid + 1).max(1);
        let finish = (loc_i + bin_mid).min(text.len() as isize) + pattern.len() as isize;

        let mut rd = vec![0u64; (finish + 2) as usize];
        rd[(finish + 1) as usize] = (1u64 << d) - 1;

        let mut j = finish;
        while j >= start {
            let ju = j as usize;
            let char_match = text
                .get(ju - 1)
                .and_then(|c| alphabet.get(c))
                .copied()
                .unwrap_or(0);

            rd[ju] = if d == 0 {
                ((rd[ju + 1] << 1) | 1) & char_match
            } else {
                (((rd[ju + 1] << 1) | 1) & char_match)
                    | (((last_rd[ju + 1] | last_rd[ju]) << 1) | 1)
                    | last_rd[ju + 1]
            };

            if rd[ju] & match_mask != 0 {
                let candidate = score(d, ju - 1);
                if candidate <= threshold {
                    threshold = candidate;
                    best_loc = Some(ju - 1);
                    if ju - 1 > loc {
                        // Keep looking left of the expected spot, no further away than this hit
                        start = (2 * loc_i - (ju as isize - 1)).max(1);
                    } else {
                        break;
                    }
                }
            }
            j -= 1;
        }

        if score(d + 1, loc) > threshold {
            // No hope for a better match at higher error levels
            break;
        }
        last_rd = rd;
    }

    best_loc
}

fn bitap_score(config: &PatchConfig, errors: usize, x: usize, loc: usize, pattern_len: usize) -> f64 {
    let accuracy = errors as f64 / pattern_len as f64;
    let proximity = (loc as isize - x as isize).unsigned_abs();
    if config.match_distance == 0 {
        return if proximity == 0 { accuracy } else { 1.0 };
    }
    accuracy + proximity as f64 / config.match_distance as f64
}

fn alphabet(pattern: &[char]) -> HashMap<char, u64> {
    let mut masks = HashMap::new();
    for (i, c) in pattern.iter().enumerate() {
        *masks.entry(*c).or_insert(0) |= 1u64 << (pattern.len() - i - 1);
    }
    masks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    fn locate(text: &str, pattern: &str, loc: isize) -> Option<usize> {
        match_main(&PatchConfig::default(), &chars(text), &chars(pattern), loc)
    }

    #[test]
    fn test_exact_and_shifted_matches() {
        assert_eq!(locate("abcdef", "abcdef", 1000), Some(0));
        assert_eq!(locate("", "abcdef", 1), None);
        assert_eq!(locate("abcdef", "de", 3), Some(3));
        assert_eq!(locate("abcdef", "de", 0), Some(3));
    }

    #[test]
    fn test_fuzzy_match() {
        assert_eq!(locate("abcdefghijk", "efxhi", 0), Some(4));
        assert_eq!(locate("abcdefghijk", "bxy", 1), None);

        let lenient = PatchConfig {
            match_threshold: 0.7,
            ..PatchConfig::default()
        };
        let text = chars("I am the very model of a modern major general.");
        assert_eq!(match_main(&lenient, &text, &chars(" that berry "), 5), Some(4));
    }

    #[test]
    fn test_prefers_nearest_occurrence() {
        assert_eq!(locate("abc abc abc abc", "abc", 9), Some(8));
        assert_eq!(locate("abc abc abc abc", "abc", 0), Some(0));
    }

    #[test]
    fn test_distance_penalty() {
        let strict = PatchConfig {
            match_distance: 10,
            ..PatchConfig::default()
        };
        let text = chars("abcdefghijklmnopqrstuvwxyz");
        assert_eq!(match_main(&strict, &text, &chars("abcdefg"), 24), None);
        assert_eq!(match_main(&strict, &text, &chars("abcdxxefg"), 1), Some(0));

        let loose = PatchConfig::default();
        assert_eq!(match_main(&loose, &text, &chars("abcdefg"), 24), Some(0));
    }
}

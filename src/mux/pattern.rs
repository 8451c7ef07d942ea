//! Response matchers.
//!
//! A matcher answers one question about the receive buffer: where does the
//! first complete response end, and which bytes of it are the payload?
//!
//! ```text
//!   buffer:  .. j u n k  O K , 1 2 \r \n  n e x t ..
//!                       └───────┬──────┘
//!                      full match (consumed through `end`)
//!                            └─┬─┘
//!                         capture (payload)
//! ```
//!
//! Three matchers ship with the crate:
//!
//! - [`Pattern`]: compiled byte pattern (`.`, `\d`, `\w`, `\s`, `\xHH`,
//!   `[...]`, `? * + {n} {n,m}`, one capture group).
//! - [`Literal`]: exact byte string, no payload.
//! - any `Fn(&[u8]) -> Option<Match>` closure.

use core::ops::Range;

use crate::error::PatternError;

/// Maximum compiled nodes per pattern (stack-allocated).
const MAX_NODES: usize = 32;

/// Maximum ranges inside one `[...]` set.
const MAX_SET_RANGES: usize = 8;

/// Maximum length of a [`Literal`].
const MAX_LITERAL: usize = 64;

/// Upper bound used for `*`, `+` and `{n,}`.
const UNBOUNDED: u16 = u16::MAX;

/// Location of a complete response inside the receive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// Exclusive end of the full match; everything before it is consumed.
    pub end: usize,
    /// Payload span, if the matcher designates one.
    pub capture: Option<Range<usize>>,
}

/// Recognises a complete response in a growing byte buffer.
///
/// Implementations must return the leftmost complete match and must never
/// report a zero-length match.
pub trait Matcher: Send + Sync {
    fn find(&self, haystack: &[u8]) -> Option<Match>;
}

impl<F> Matcher for F
where
    F: Fn(&[u8]) -> Option<Match> + Send + Sync,
{
    fn find(&self, haystack: &[u8]) -> Option<Match> {
        self(haystack)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Literal
// ═══════════════════════════════════════════════════════════════

/// Matches an exact byte string; carries no payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Literal {
    bytes: heapless::Vec<u8, MAX_LITERAL>,
}

impl Literal {
    pub fn new(bytes: &[u8]) -> Result<Self, PatternError> {
        if bytes.is_empty() {
            return Err(PatternError::MatchesEmpty);
        }
        let bytes = heapless::Vec::from_slice(bytes).map_err(|_| PatternError::TooLong)?;
        Ok(Self { bytes })
    }
}

impl Matcher for Literal {
    fn find(&self, haystack: &[u8]) -> Option<Match> {
        haystack
            .windows(self.bytes.len())
            .position(|w| w == self.bytes.as_slice())
            .map(|pos| Match {
                end: pos + self.bytes.len(),
                capture: None,
            })
    }
}

// ═══════════════════════════════════════════════════════════════
//  Pattern
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
enum Class {
    Byte(u8),
    Any,
    Set {
        ranges: heapless::Vec<(u8, u8), MAX_SET_RANGES>,
        negated: bool,
    },
}

impl Class {
    fn matches(&self, b: u8) -> bool {
        match self {
            Self::Byte(x) => *x == b,
            Self::Any => true,
            Self::Set { ranges, negated } => {
                ranges.iter().any(|&(lo, hi)| (lo..=hi).contains(&b)) != *negated
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Node {
    class: Class,
    min: u16,
    max: u16,
}

/// Result of decoding one backslash escape.
enum Escape {
    Byte(u8),
    Ranges(&'static [(u8, u8)]),
}

const DIGIT: &[(u8, u8)] = &[(b'0', b'9')];
const WORD: &[(u8, u8)] = &[(b'0', b'9'), (b'A', b'Z'), (b'_', b'_'), (b'a', b'z')];
const SPACE: &[(u8, u8)] = &[(b'\t', b'\r'), (b' ', b' ')];

/// Compiled response pattern.
///
/// Search is unanchored: the match starts at the first offset where the
/// whole pattern fits. Quantifiers are greedy and backtrack. A pattern
/// should end in something that only appears once the response is
/// complete (typically `\r\n` or a fixed count), otherwise a greedy tail
/// may match a response that is still arriving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    nodes: heapless::Vec<Node, MAX_NODES>,
    /// Node index range `[start, end)` covered by the capture group.
    capture: Option<(usize, usize)>,
}

impl Pattern {
    /// Compile `source`.
    pub fn new(source: &str) -> Result<Self, PatternError> {
        let src = source.as_bytes();
        if src.is_empty() {
            return Err(PatternError::Empty);
        }

        let mut nodes: heapless::Vec<Node, MAX_NODES> = heapless::Vec::new();
        let mut open_group: Option<usize> = None;
        let mut capture = None;
        let mut i = 0;

        while i < src.len() {
            match src[i] {
                b'(' => {
                    if open_group.is_some() {
                        return Err(PatternError::NestedGroup);
                    }
                    if capture.is_some() {
                        return Err(PatternError::MultipleGroups);
                    }
                    open_group = Some(nodes.len());
                    i += 1;
                }
                b')' => {
                    let start = open_group.take().ok_or(PatternError::UnbalancedGroup)?;
                    capture = Some((start, nodes.len()));
                    i += 1;
                    if src.get(i).is_some_and(|&b| is_quantifier(b)) {
                        return Err(PatternError::DanglingQuantifier);
                    }
                }
                b if is_quantifier(b) => return Err(PatternError::DanglingQuantifier),
                _ => {
                    let (class, next) = parse_atom(src, i)?;
                    let (min, max, next) = parse_quantifier(src, next)?;
                    i = next;
                    nodes
                        .push(Node { class, min, max })
                        .map_err(|_| PatternError::TooLong)?;
                }
            }
        }

        if open_group.is_some() {
            return Err(PatternError::UnbalancedGroup);
        }
        if nodes.iter().all(|n| n.min == 0) {
            return Err(PatternError::MatchesEmpty);
        }

        Ok(Self { nodes, capture })
    }

    /// Whether matches carry a payload span.
    pub fn has_capture(&self) -> bool {
        self.capture.is_some()
    }

    /// Minimum number of bytes any match spans.
    pub fn min_len(&self) -> usize {
        self.nodes.iter().map(|n| n.min as usize).sum()
    }

    fn match_from(
        &self,
        idx: usize,
        pos: usize,
        haystack: &[u8],
        marks: &mut [usize; MAX_NODES + 1],
        dead: &mut DeadEnds,
    ) -> Option<usize> {
        marks[idx] = pos;
        let Some(node) = self.nodes.get(idx) else {
            return Some(pos);
        };
        if dead.contains(idx, pos) {
            return None;
        }

        let max = node.max as usize;
        let mut run = 0;
        while run < max
            && pos + run < haystack.len()
            && node.class.matches(haystack[pos + run])
        {
            run += 1;
        }

        let min = node.min as usize;
        let end = if run < min {
            None
        } else {
            (min..=run)
                .rev()
                .find_map(|count| self.match_from(idx + 1, pos + count, haystack, marks, dead))
        };
        if end.is_none() {
            dead.insert(idx, pos);
        }
        end
    }
}

/// `(node, offset)` pairs already known not to lead to a match.
///
/// Whether the rest of a pattern matches from a given node and offset does
/// not depend on how the search got there, so each pair is explored at most
/// once per search. This keeps nested greedy quantifiers linear in the
/// number of pairs instead of exponential in the number of quantifiers.
struct DeadEnds {
    width: usize,
    bits: Vec<u64>,
}

impl DeadEnds {
    fn new(nodes: usize, haystack_len: usize) -> Self {
        let width = haystack_len + 1;
        Self {
            width,
            bits: vec![0; (nodes * width).div_ceil(64)],
        }
    }

    fn contains(&self, idx: usize, pos: usize) -> bool {
        let bit = idx * self.width + pos;
        self.bits
            .get(bit / 64)
            .is_some_and(|word| word & (1 << (bit % 64)) != 0)
    }

    fn insert(&mut self, idx: usize, pos: usize) {
        let bit = idx * self.width + pos;
        if let Some(word) = self.bits.get_mut(bit / 64) {
            *word |= 1 << (bit % 64);
        }
    }
}

impl Matcher for Pattern {
    fn find(&self, haystack: &[u8]) -> Option<Match> {
        let mut marks = [0usize; MAX_NODES + 1];
        let mut dead = DeadEnds::new(self.nodes.len(), haystack.len());
        // A pattern never matches empty, so a match cannot start at the end.
        for start in 0..haystack.len() {
            if let Some(end) = self.match_from(0, start, haystack, &mut marks, &mut dead) {
                let capture = self.capture.map(|(a, b)| marks[a]..marks[b]);
                return Some(Match { end, capture });
            }
        }
        None
    }
}

impl core::str::FromStr for Pattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

// ── Parser helpers ───────────────────────────────────────────

fn is_quantifier(b: u8) -> bool {
    matches!(b, b'?' | b'*' | b'+' | b'{')
}

fn parse_atom(src: &[u8], i: usize) -> Result<(Class, usize), PatternError> {
    match src[i] {
        b'.' => Ok((Class::Any, i + 1)),
        b'[' => parse_set(src, i + 1),
        b'\\' => {
            let (escape, next) = parse_escape(src, i + 1)?;
            let class = match escape {
                Escape::Byte(b) => Class::Byte(b),
                Escape::Ranges(r) => Class::Set {
                    ranges: heapless::Vec::from_slice(r).map_err(|_| PatternError::TooLong)?,
                    negated: false,
                },
            };
            Ok((class, next))
        }
        b => Ok((Class::Byte(b), i + 1)),
    }
}

fn parse_escape(src: &[u8], i: usize) -> Result<(Escape, usize), PatternError> {
    let Some(&c) = src.get(i) else {
        return Err(PatternError::BadEscape);
    };
    let escape = match c {
        b'r' => Escape::Byte(b'\r'),
        b'n' => Escape::Byte(b'\n'),
        b't' => Escape::Byte(b'\t'),
        b'0' => Escape::Byte(0),
        b'd' => Escape::Ranges(DIGIT),
        b'w' => Escape::Ranges(WORD),
        b's' => Escape::Ranges(SPACE),
        b'x' => {
            let hi = src.get(i + 1).and_then(|&b| hex_value(b));
            let lo = src.get(i + 2).and_then(|&b| hex_value(b));
            return match (hi, lo) {
                (Some(hi), Some(lo)) => Ok((Escape::Byte((hi << 4) | lo), i + 3)),
                _ => Err(PatternError::BadEscape),
            };
        }
        c if c.is_ascii_punctuation() => Escape::Byte(c),
        _ => return Err(PatternError::BadEscape),
    };
    Ok((escape, i + 1))
}

/// Parse the body of a `[...]` set; `i` points just past the `[`.
fn parse_set(src: &[u8], mut i: usize) -> Result<(Class, usize), PatternError> {
    let mut ranges: heapless::Vec<(u8, u8), MAX_SET_RANGES> = heapless::Vec::new();
    let negated = src.get(i) == Some(&b'^');
    if negated {
        i += 1;
    }

    loop {
        let Some(&b) = src.get(i) else {
            return Err(PatternError::BadSet);
        };
        if b == b']' {
            if ranges.is_empty() {
                return Err(PatternError::BadSet);
            }
            return Ok((Class::Set { ranges, negated }, i + 1));
        }

        let lo = if b == b'\\' {
            let (escape, next) = parse_escape(src, i + 1)?;
            i = next;
            match escape {
                Escape::Byte(x) => x,
                Escape::Ranges(r) => {
                    for &range in r {
                        ranges.push(range).map_err(|_| PatternError::TooLong)?;
                    }
                    continue;
                }
            }
        } else {
            i += 1;
            b
        };

        let hi = if src.get(i) == Some(&b'-') && src.get(i + 1).is_some_and(|&n| n != b']') {
            let n = src[i + 1];
            if n == b'\\' {
                match parse_escape(src, i + 2)? {
                    (Escape::Byte(x), next) => {
                        i = next;
                        x
                    }
                    (Escape::Ranges(_), _) => return Err(PatternError::BadSet),
                }
            } else {
                i += 2;
                n
            }
        } else {
            lo
        };

        if lo > hi {
            return Err(PatternError::BadSet);
        }
        ranges.push((lo, hi)).map_err(|_| PatternError::TooLong)?;
    }
}

fn parse_quantifier(src: &[u8], i: usize) -> Result<(u16, u16, usize), PatternError> {
    match src.get(i) {
        Some(b'?') => Ok((0, 1, i + 1)),
        Some(b'*') => Ok((0, UNBOUNDED, i + 1)),
        Some(b'+') => Ok((1, UNBOUNDED, i + 1)),
        Some(b'{') => {
            let close = src[i..]
                .iter()
                .position(|&b| b == b'}')
                .map(|p| i + p)
                .ok_or(PatternError::BadRepetition)?;
            let body =
                core::str::from_utf8(&src[i + 1..close]).map_err(|_| PatternError::BadRepetition)?;
            let (min, max) = match body.split_once(',') {
                None => {
                    let n = parse_bound(body)?;
                    (n, n)
                }
                Some((lo, "")) => (parse_bound(lo)?, UNBOUNDED),
                Some((lo, hi)) => (parse_bound(lo)?, parse_bound(hi)?),
            };
            if min > max || max == 0 {
                return Err(PatternError::BadRepetition);
            }
            Ok((min, max, close + 1))
        }
        _ => Ok((1, 1, i)),
    }
}

fn parse_bound(s: &str) -> Result<u16, PatternError> {
    match s.parse::<u16>() {
        Ok(n) if n < UNBOUNDED => Ok(n),
        _ => Err(PatternError::BadRepetition),
    }
}

fn hex_value(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}

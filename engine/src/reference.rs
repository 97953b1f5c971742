//! BCVWP reference codec.
//!
//! A reference addresses a token hierarchically: book, chapter, verse, word,
//! word-part. The string encoding is fixed-width and zero-padded so that
//! lexicographic comparison of encodings equals numeric comparison of the
//! underlying tuples. That property is what makes reference strings usable
//! as sortable index keys.
//!
//! Encoding widths: book 2, chapter 3, verse 3, word 3, part 1. The part
//! digit is only emitted when both word and part are set. A fully qualified
//! reference is 12 characters: `(1,1,1,1,1)` encodes to `"010010010011"`.
//!
//! Raw ids coming from token rows may carry a single leading side marker
//! (`o`, `n`, `O`, `N`) that historically disambiguated word rows from
//! part rows. [`sanitize`] strips it; [`Reference::decode`] strips it
//! before parsing.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Field boundaries of the encoding, by cumulative prefix width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    Book,
    Chapter,
    Verse,
    Word,
    Part,
}

impl Field {
    /// Number of characters a reference string occupies up to and
    /// including this field.
    pub fn prefix_width(self) -> usize {
        match self {
            Field::Book => 2,
            Field::Chapter => 5,
            Field::Verse => 8,
            Field::Word => 11,
            Field::Part => 12,
        }
    }
}

/// A decoded scripture position.
///
/// Higher fields imply lower fields are present: a reference with a verse
/// always has a book and chapter. Missing fields compare as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    pub book: Option<u16>,
    pub chapter: Option<u16>,
    pub verse: Option<u16>,
    pub word: Option<u16>,
    pub part: Option<u8>,
}

impl Reference {
    /// Create a fully qualified reference.
    pub fn new(book: u16, chapter: u16, verse: u16, word: u16, part: u8) -> Self {
        Self {
            book: Some(book),
            chapter: Some(chapter),
            verse: Some(verse),
            word: Some(word),
            part: Some(part),
        }
    }

    /// Create a book/chapter/verse reference with no word position.
    pub fn bcv(book: u16, chapter: u16, verse: u16) -> Self {
        Self {
            book: Some(book),
            chapter: Some(chapter),
            verse: Some(verse),
            word: None,
            part: None,
        }
    }

    /// Encode to the fixed-width sortable string.
    ///
    /// Emits zero-padded fields up to the first unset field; the part digit
    /// requires both word and part. Deterministic and total.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(Field::Part.prefix_width());

        let Some(book) = self.book else {
            return out;
        };
        out.push_str(&format!("{book:02}"));

        let Some(chapter) = self.chapter else {
            return out;
        };
        out.push_str(&format!("{chapter:03}"));

        let Some(verse) = self.verse else {
            return out;
        };
        out.push_str(&format!("{verse:03}"));

        let Some(word) = self.word else {
            return out;
        };
        out.push_str(&format!("{word:03}"));

        if let Some(part) = self.part {
            out.push_str(&format!("{part:01}"));
        }

        out
    }

    /// Decode a reference string.
    ///
    /// Strips one optional leading side marker, then parses fixed-width
    /// fields from whatever characters are available (a short string yields
    /// a partially qualified reference). Fails on empty input, input
    /// shorter than the book field, or non-digit characters.
    pub fn decode(s: &str) -> Result<Self> {
        let s = sanitize(s);

        if s.is_empty() {
            return Err(Error::MalformedReference("empty reference".into()));
        }
        if s.len() < Field::Book.prefix_width() {
            return Err(Error::MalformedReference(format!(
                "reference too short: '{s}'"
            )));
        }
        if !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::MalformedReference(format!(
                "non-digit characters in '{s}'"
            )));
        }

        Ok(Self {
            book: parse_field(s, 0, 2),
            chapter: parse_field(s, 2, 5),
            verse: parse_field(s, 5, 8),
            word: parse_field(s, 8, 11),
            part: parse_field(s, 11, 12).map(|p: u16| p as u8),
        })
    }

    /// Compare field by field, missing fields treated as zero.
    ///
    /// Agrees with lexicographic comparison of full-width encodings.
    pub fn compare(&self, other: &Reference) -> Ordering {
        let lhs = self.as_tuple();
        let rhs = other.as_tuple();
        lhs.cmp(&rhs)
    }

    /// Whether two references agree when truncated at the given field.
    pub fn matches_truncated(&self, other: &Reference, field: Field) -> bool {
        let width = field.prefix_width();
        let a = self.encode();
        let b = other.encode();
        truncate(&a, width) == truncate(&b, width)
    }

    fn as_tuple(&self) -> (u16, u16, u16, u16, u8) {
        (
            self.book.unwrap_or(0),
            self.chapter.unwrap_or(0),
            self.verse.unwrap_or(0),
            self.word.unwrap_or(0),
            self.part.unwrap_or(0),
        )
    }
}

impl Ord for Reference {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for Reference {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Parse the slice `[start, end)` of `s`, tolerating a shorter string.
///
/// Mirrors substring semantics: a trailing partial field parses from the
/// characters that exist. Returns `None` when no characters are available.
fn parse_field<T: std::str::FromStr>(s: &str, start: usize, end: usize) -> Option<T> {
    if s.len() <= start {
        return None;
    }
    let end = end.min(s.len());
    s[start..end].parse().ok()
}

/// Strip a single optional leading side marker character.
///
/// Callers must sanitize raw token ids before using them as index keys or
/// decoding them.
pub fn sanitize(s: &str) -> &str {
    s.strip_prefix(['o', 'n', 'O', 'N']).unwrap_or(s)
}

/// First `width` characters of the sanitized reference string.
///
/// Widths should fall on field boundaries (2, 5, 8, 11, 12); see
/// [`Field::prefix_width`]. Used for "same verse" / "same chapter" checks.
/// A raw id whose `width`-th byte is not a char boundary (possible only
/// for ids that would fail to decode anyway) is returned whole.
pub fn truncate(s: &str, width: usize) -> &str {
    let s = sanitize(s);
    s.get(..width).unwrap_or(s)
}

/// Whether two reference strings agree up to the given field width.
pub fn matches_truncated(a: &str, b: &str, width: usize) -> bool {
    truncate(a, width) == truncate(b, width)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_fully_qualified() {
        let r = Reference::new(1, 1, 1, 1, 1);
        assert_eq!(r.encode(), "010010010011");
    }

    #[test]
    fn encode_stops_at_first_unset_field() {
        let r = Reference::bcv(1, 1, 2);
        assert_eq!(r.encode(), "01001002");

        let book_only = Reference {
            book: Some(40),
            ..Default::default()
        };
        assert_eq!(book_only.encode(), "40");
    }

    #[test]
    fn encode_part_requires_word() {
        // A part with no word cannot be positioned; the digit is not emitted.
        let r = Reference {
            book: Some(1),
            chapter: Some(2),
            verse: Some(3),
            word: None,
            part: Some(1),
        };
        assert_eq!(r.encode(), "01002003");
    }

    #[test]
    fn decode_full() {
        let r = Reference::decode("010010010011").unwrap();
        assert_eq!(r, Reference::new(1, 1, 1, 1, 1));
    }

    #[test]
    fn decode_prefix() {
        let r = Reference::decode("01001002").unwrap();
        assert_eq!(r.book, Some(1));
        assert_eq!(r.chapter, Some(1));
        assert_eq!(r.verse, Some(2));
        assert_eq!(r.word, None);
        assert_eq!(r.part, None);
    }

    #[test]
    fn decode_strips_side_marker() {
        let r = Reference::decode("o010010010011").unwrap();
        assert_eq!(r, Reference::new(1, 1, 1, 1, 1));

        let r = Reference::decode("N40001001001").unwrap();
        assert_eq!(r.book, Some(40));
    }

    #[test]
    fn decode_rejects_empty() {
        assert!(matches!(
            Reference::decode(""),
            Err(Error::MalformedReference(_))
        ));
        // A bare side marker sanitizes to empty.
        assert!(matches!(
            Reference::decode("o"),
            Err(Error::MalformedReference(_))
        ));
    }

    #[test]
    fn decode_rejects_too_short() {
        assert!(matches!(
            Reference::decode("1"),
            Err(Error::MalformedReference(_))
        ));
    }

    #[test]
    fn decode_rejects_non_digits() {
        assert!(matches!(
            Reference::decode("01a01"),
            Err(Error::MalformedReference(_))
        ));
        assert!(matches!(
            Reference::decode("01 01"),
            Err(Error::MalformedReference(_))
        ));
    }

    #[test]
    fn decode_tolerates_partial_trailing_field() {
        // Substring semantics: chapter parses from the two available chars.
        let r = Reference::decode("0101").unwrap();
        assert_eq!(r.book, Some(1));
        assert_eq!(r.chapter, Some(1));
        assert_eq!(r.verse, None);
    }

    #[test]
    fn roundtrip() {
        for tuple in [(1, 1, 1, 1, 1), (40, 5, 3, 16, 2), (66, 22, 21, 1, 0)] {
            let r = Reference::new(tuple.0, tuple.1, tuple.2, tuple.3, tuple.4);
            let decoded = Reference::decode(&r.encode()).unwrap();
            assert_eq!(r, decoded);
        }
    }

    #[test]
    fn compare_matches_string_order() {
        let a = Reference::new(1, 1, 1, 1, 1);
        let b = Reference::bcv(1, 1, 2);

        assert_eq!(a.compare(&b), Ordering::Less);
        assert!(a.encode() < b.encode());
    }

    #[test]
    fn missing_fields_compare_as_zero() {
        let partial = Reference::bcv(1, 1, 1);
        let full = Reference::new(1, 1, 1, 0, 0);
        assert_eq!(partial.compare(&full), Ordering::Equal);
    }

    #[test]
    fn truncate_at_field_boundaries() {
        let s = "010010010011";
        assert_eq!(truncate(s, Field::Book.prefix_width()), "01");
        assert_eq!(truncate(s, Field::Chapter.prefix_width()), "01001");
        assert_eq!(truncate(s, Field::Verse.prefix_width()), "01001001");
        assert_eq!(truncate(s, Field::Word.prefix_width()), "01001001001");
        assert_eq!(truncate(s, Field::Part.prefix_width()), s);
    }

    #[test]
    fn truncate_sanitizes() {
        assert_eq!(truncate("o010010010011", 8), "01001001");
    }

    #[test]
    fn truncate_short_string() {
        assert_eq!(truncate("0100", 8), "0100");
    }

    #[test]
    fn truncate_tolerates_multibyte_input() {
        // Fullwidth digits are invalid reference text but must not panic
        // when the cut lands inside a character.
        let raw = "０１００１００１００１１";
        assert_eq!(truncate(raw, 5), raw);
        assert!(!matches_truncated(raw, "010010010011", 5));
    }

    #[test]
    fn matches_truncated_verse_level() {
        // Same verse, different words.
        assert!(matches_truncated("010010010011", "010010010021", 8));
        // Different verses.
        assert!(!matches_truncated("010010010011", "010010020011", 8));
    }

    #[test]
    fn matches_truncated_reference_level() {
        let a = Reference::new(1, 1, 1, 1, 1);
        let b = Reference::new(1, 1, 1, 2, 1);
        assert!(a.matches_truncated(&b, Field::Verse));
        assert!(!a.matches_truncated(&b, Field::Word));
    }

    #[test]
    fn sanitize_only_strips_one_marker() {
        assert_eq!(sanitize("o01"), "01");
        assert_eq!(sanitize("01"), "01");
        assert_eq!(sanitize("oo01"), "o01");
    }

    // Property-based tests using proptest
    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_reference() -> impl Strategy<Value = Reference> {
            (1u16..=99, 0u16..=999, 0u16..=999, 0u16..=999, 0u8..=9)
                .prop_map(|(b, c, v, w, p)| Reference::new(b, c, v, w, p))
        }

        proptest! {
            #[test]
            fn prop_roundtrip(r in arb_reference()) {
                let decoded = Reference::decode(&r.encode()).unwrap();
                prop_assert_eq!(r, decoded);
            }

            #[test]
            fn prop_compare_agrees_with_string_order(
                a in arb_reference(),
                b in arb_reference(),
            ) {
                let string_order = a.encode().cmp(&b.encode());
                prop_assert_eq!(a.compare(&b), string_order);
            }

            #[test]
            fn prop_truncation_is_prefix(r in arb_reference(), width in 0usize..=12) {
                let encoded = r.encode();
                let truncated = truncate(&encoded, width);
                prop_assert!(encoded.starts_with(truncated));
            }
        }
    }
}

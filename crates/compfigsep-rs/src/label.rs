//! Label structure inference and the closed label-class vocabulary.
//!
//! A compound figure's labels usually follow one ordinal scheme ("A, B, C",
//! "1, 2, 3", "i, ii, iii"). [`LabelStructure::infer`] recovers that scheme
//! from the observed label texts by majority vote, and
//! [`LabelStructure::canonical_sequence`] regenerates the idealized sequence
//! for it.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Text standing for "this sub-figure has no label".
pub const PLACEHOLDER: &str = "_";

/// Roman numerals recognized as labels, 1 through 30.
pub const ROMAN_NUMERALS: [&str; 30] = [
    "I", "II", "III", "IV", "V", "VI", "VII", "VIII", "IX", "X", "XI", "XII", "XIII", "XIV", "XV",
    "XVI", "XVII", "XVIII", "XIX", "XX", "XXI", "XXII", "XXIII", "XXIV", "XXV", "XXVI", "XXVII",
    "XXVIII", "XXIX", "XXX",
];

/// Closed vocabulary of label classes.
///
/// Digits, lowercase letters, then the uppercase letters whose glyph differs
/// from the lowercase one. Case-ambiguous uppercase letters share the class of
/// their lowercase form (see [`map_label`]).
pub const LABEL_CLASSES: &str =
    "0123456789abcdefghijklmnopqrstuvwxyzABDEFGHIJLMNQRTY";

const CASE_AMBIGUOUS: &str = "CKOPSUVWXZ";

/// Ordinal scheme of a figure's labels. Declaration order breaks vote ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LabelStructureEnum {
    /// The figure carries no labels.
    None,
    /// 1, 2, 3...
    Numerical,
    /// A, B, C...
    LatinUc,
    /// a, b, c...
    LatinLc,
    /// I, II, III...
    RomanUc,
    /// i, ii, iii...
    RomanLc,
    Other,
}

impl LabelStructureEnum {
    pub const ALL: [LabelStructureEnum; 7] = [
        LabelStructureEnum::None,
        LabelStructureEnum::Numerical,
        LabelStructureEnum::LatinUc,
        LabelStructureEnum::LatinLc,
        LabelStructureEnum::RomanUc,
        LabelStructureEnum::RomanLc,
        LabelStructureEnum::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LabelStructureEnum::None => "NONE",
            LabelStructureEnum::Numerical => "NUMERICAL",
            LabelStructureEnum::LatinUc => "LATIN_UC",
            LabelStructureEnum::LatinLc => "LATIN_LC",
            LabelStructureEnum::RomanUc => "ROMAN_UC",
            LabelStructureEnum::RomanLc => "ROMAN_LC",
            LabelStructureEnum::Other => "OTHER",
        }
    }

    /// Scheme a single label token votes for. First matching rule wins, so a
    /// lone "I" counts as a latin letter, not a roman numeral.
    fn classify(label: &str) -> LabelStructureEnum {
        let mut chars = label.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            if c.is_ascii_lowercase() {
                return LabelStructureEnum::LatinLc;
            }
            if c.is_ascii_uppercase() {
                return LabelStructureEnum::LatinUc;
            }
        }

        if label.parse::<i64>().is_ok() {
            return LabelStructureEnum::Numerical;
        }

        if ROMAN_NUMERALS
            .iter()
            .any(|r| r.to_ascii_lowercase() == label)
        {
            return LabelStructureEnum::RomanLc;
        }

        if ROMAN_NUMERALS.contains(&label) {
            return LabelStructureEnum::RomanUc;
        }

        warn!(label = %label, "label does not belong to a default type");
        LabelStructureEnum::Other
    }
}

impl fmt::Display for LabelStructureEnum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Label scheme of a figure together with its number of labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct LabelStructure {
    pub labels_type: LabelStructureEnum,
    pub num_labels: usize,
}

impl LabelStructure {
    pub fn new(labels_type: LabelStructureEnum, num_labels: usize) -> Self {
        LabelStructure {
            labels_type,
            num_labels,
        }
    }

    /// Infer the label structure of a sequence of label texts.
    ///
    /// A sequence made only of placeholders is `NONE`. Otherwise every token
    /// votes for a scheme and the most voted one wins, ties going to the
    /// scheme declared first. Unrecognized tokens vote `OTHER`; this never
    /// fails.
    pub fn infer<S: AsRef<str>>(labels: &[S]) -> Self {
        if labels.iter().all(|l| l.as_ref() == PLACEHOLDER) {
            return LabelStructure::new(LabelStructureEnum::None, labels.len());
        }

        let mut votes = [0usize; LabelStructureEnum::ALL.len()];
        for label in labels {
            votes[LabelStructureEnum::classify(label.as_ref()) as usize] += 1;
        }

        // Strict comparison keeps the first scheme reaching the maximum.
        let mut best = 0;
        for (i, &v) in votes.iter().enumerate() {
            if v > votes[best] {
                best = i;
            }
        }

        LabelStructure::new(LabelStructureEnum::ALL[best], labels.len())
    }

    /// Idealized label sequence for this scheme, `num_labels` long.
    pub fn canonical_sequence(&self) -> Vec<String> {
        let n = self.num_labels;
        match self.labels_type {
            LabelStructureEnum::Numerical => (0..n).map(|i| i.to_string()).collect(),
            LabelStructureEnum::LatinUc => (0..n).map(|i| latin_name(i, b'A')).collect(),
            LabelStructureEnum::LatinLc => (0..n).map(|i| latin_name(i, b'a')).collect(),
            LabelStructureEnum::RomanUc => (1..=n).map(roman_numeral).collect(),
            LabelStructureEnum::RomanLc => (1..=n)
                .map(|i| roman_numeral(i).to_ascii_lowercase())
                .collect(),
            LabelStructureEnum::None | LabelStructureEnum::Other => {
                vec![PLACEHOLDER.to_string(); n]
            }
        }
    }
}

impl fmt::Display for LabelStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | number of labels : {}",
            self.labels_type, self.num_labels
        )
    }
}

/// Spreadsheet-style letter name: 0 -> A, 25 -> Z, 26 -> AA, 27 -> AB...
fn latin_name(mut i: usize, base: u8) -> String {
    let mut out = Vec::new();
    loop {
        out.push(base + (i % 26) as u8);
        if i < 26 {
            break;
        }
        i = i / 26 - 1;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// Uppercase roman numeral for `n >= 1`.
pub fn roman_numeral(mut n: usize) -> String {
    const TABLE: [(usize, &str); 13] = [
        (1000, "M"),
        (900, "CM"),
        (500, "D"),
        (400, "CD"),
        (100, "C"),
        (90, "XC"),
        (50, "L"),
        (40, "XL"),
        (10, "X"),
        (9, "IX"),
        (5, "V"),
        (4, "IV"),
        (1, "I"),
    ];
    let mut out = String::new();
    for &(value, glyph) in TABLE.iter() {
        while n >= value {
            out.push_str(glyph);
            n -= value;
        }
    }
    out
}

/// Map a label text to its class character.
///
/// Only single alphanumeric ASCII characters are meaningful. Uppercase
/// letters that look like their lowercase form are folded to lowercase.
pub fn map_label(text: &str) -> Option<char> {
    let mut chars = text.chars();
    let c = match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_alphanumeric() => c,
        _ => return None,
    };
    if CASE_AMBIGUOUS.contains(c) {
        Some(c.to_ascii_lowercase())
    } else {
        Some(c)
    }
}

/// Class id of a label text, if it maps into the vocabulary.
pub fn label_class_id(text: &str) -> Option<u32> {
    let c = map_label(text)?;
    LABEL_CLASSES.find(c).map(|i| i as u32)
}

/// Label text of a class id.
pub fn label_class_text(class_id: u32) -> Option<String> {
    LABEL_CLASSES
        .chars()
        .nth(class_id as usize)
        .map(String::from)
}

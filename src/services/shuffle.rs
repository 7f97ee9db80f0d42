//! Option labels, option sets and the per-question shuffle bijection.
//!
//! A [`ShuffleMap`] maps the label a student sees (the shuffled label) to the
//! label stored in the question bank (the canonical label). Both directions are
//! indexed, and the constructor only admits permutations of one label set, so
//! a map that drops or duplicates a label cannot be built or deserialized.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef};
use sqlx::{Decode, Encode, Postgres, Type};
use thiserror::Error;

use crate::db::models::Question;

const MAX_LABEL_LEN: usize = 8;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShuffleError {
    #[error("invalid option label: {0:?}")]
    InvalidLabel(String),
    #[error("duplicate option label: {0}")]
    DuplicateLabel(String),
    #[error("question has no options")]
    EmptyOptions,
    #[error("shuffle map is not a permutation of a single label set")]
    NotAPermutation,
}

/// A normalised option label. Every way in, including serde and row decoding, goes
/// through [`OptionLabel::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OptionLabel(String);

impl OptionLabel {
    /// Normalises user input: trims, upper-cases, and rejects anything but short alphanumerics.
    pub fn parse(raw: &str) -> Result<Self, ShuffleError> {
        let normalized = raw.trim().to_ascii_uppercase();
        if normalized.is_empty()
            || normalized.len() > MAX_LABEL_LEN
            || !normalized.chars().all(|ch| ch.is_ascii_alphanumeric())
        {
            return Err(ShuffleError::InvalidLabel(raw.to_string()));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for OptionLabel {
    type Err = ShuffleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for OptionLabel {
    type Error = ShuffleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<OptionLabel> for String {
    fn from(value: OptionLabel) -> Self {
        value.0
    }
}

impl Type<Postgres> for OptionLabel {
    fn type_info() -> PgTypeInfo {
        <String as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <String as Type<Postgres>>::compatible(ty)
    }
}

impl<'r> Decode<'r, Postgres> for OptionLabel {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let raw = <&str as Decode<Postgres>>::decode(value)?;
        Ok(Self::parse(raw)?)
    }
}

impl Encode<'_, Postgres> for OptionLabel {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        <&str as Encode<Postgres>>::encode_by_ref(&self.as_str(), buf)
    }
}

impl std::fmt::Display for OptionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionEntry {
    pub label: OptionLabel,
    pub text: String,
}

/// Ordered (label, text) pairs of one question, labels unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<OptionEntry>", into = "Vec<OptionEntry>")]
pub struct OptionSet(Vec<OptionEntry>);

impl OptionSet {
    pub fn new(entries: Vec<OptionEntry>) -> Result<Self, ShuffleError> {
        if entries.is_empty() {
            return Err(ShuffleError::EmptyOptions);
        }

        let mut seen = BTreeSet::new();
        for entry in &entries {
            if !seen.insert(&entry.label) {
                return Err(ShuffleError::DuplicateLabel(entry.label.to_string()));
            }
        }

        Ok(Self(entries))
    }

    pub fn from_pairs<L, T>(pairs: impl IntoIterator<Item = (L, T)>) -> Result<Self, ShuffleError>
    where
        L: AsRef<str>,
        T: Into<String>,
    {
        let entries = pairs
            .into_iter()
            .map(|(label, text)| {
                Ok(OptionEntry { label: OptionLabel::parse(label.as_ref())?, text: text.into() })
            })
            .collect::<Result<Vec<_>, ShuffleError>>()?;
        Self::new(entries)
    }

    pub fn text(&self, label: &OptionLabel) -> Option<&str> {
        self.0.iter().find(|entry| &entry.label == label).map(|entry| entry.text.as_str())
    }

    pub fn contains(&self, label: &OptionLabel) -> bool {
        self.0.iter().any(|entry| &entry.label == label)
    }

    pub fn labels(&self) -> impl Iterator<Item = &OptionLabel> {
        self.0.iter().map(|entry| &entry.label)
    }

    pub fn entries(&self) -> &[OptionEntry] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<Vec<OptionEntry>> for OptionSet {
    type Error = ShuffleError;

    fn try_from(value: Vec<OptionEntry>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<OptionSet> for Vec<OptionEntry> {
    fn from(value: OptionSet) -> Self {
        value.0
    }
}

/// Bijection shuffled label -> canonical label over one question's label set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<OptionLabel, OptionLabel>",
    into = "BTreeMap<OptionLabel, OptionLabel>"
)]
pub struct ShuffleMap {
    forward: BTreeMap<OptionLabel, OptionLabel>,
    inverse: BTreeMap<OptionLabel, OptionLabel>,
}

impl ShuffleMap {
    pub fn from_pairs(
        pairs: impl IntoIterator<Item = (OptionLabel, OptionLabel)>,
    ) -> Result<Self, ShuffleError> {
        let mut forward = BTreeMap::new();
        let mut inverse = BTreeMap::new();

        for (shuffled, canonical) in pairs {
            if forward.insert(shuffled.clone(), canonical.clone()).is_some() {
                return Err(ShuffleError::DuplicateLabel(shuffled.to_string()));
            }
            if inverse.insert(canonical.clone(), shuffled).is_some() {
                return Err(ShuffleError::DuplicateLabel(canonical.to_string()));
            }
        }

        if forward.is_empty() {
            return Err(ShuffleError::EmptyOptions);
        }
        if !forward.keys().eq(inverse.keys()) {
            return Err(ShuffleError::NotAPermutation);
        }

        Ok(Self { forward, inverse })
    }

    /// Uniform random permutation of the question's own labels (Fisher-Yates).
    pub fn random(options: &OptionSet, rng: &mut impl Rng) -> Self {
        let labels: Vec<OptionLabel> = options.labels().cloned().collect();
        let mut canonical = labels.clone();
        canonical.shuffle(rng);
        Self::build_unchecked(labels.into_iter().zip(canonical))
    }

    pub fn identity(options: &OptionSet) -> Self {
        Self::build_unchecked(options.labels().map(|label| (label.clone(), label.clone())))
    }

    fn build_unchecked(pairs: impl Iterator<Item = (OptionLabel, OptionLabel)>) -> Self {
        let forward: BTreeMap<_, _> = pairs.collect();
        let inverse = forward.iter().map(|(new, old)| (old.clone(), new.clone())).collect();
        Self { forward, inverse }
    }

    pub fn to_canonical(&self, shuffled: &OptionLabel) -> Option<&OptionLabel> {
        self.forward.get(shuffled)
    }

    pub fn to_shuffled(&self, canonical: &OptionLabel) -> Option<&OptionLabel> {
        self.inverse.get(canonical)
    }

    /// Pairs in presentation order (ascending shuffled label).
    pub fn iter(&self) -> impl Iterator<Item = (&OptionLabel, &OptionLabel)> {
        self.forward.iter()
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// True when the map permutes exactly the labels of `options`.
    pub fn covers(&self, options: &OptionSet) -> bool {
        self.forward.len() == options.len()
            && options.labels().all(|label| self.forward.contains_key(label))
    }
}

impl TryFrom<BTreeMap<OptionLabel, OptionLabel>> for ShuffleMap {
    type Error = ShuffleError;

    fn try_from(value: BTreeMap<OptionLabel, OptionLabel>) -> Result<Self, Self::Error> {
        Self::from_pairs(value)
    }
}

impl From<ShuffleMap> for BTreeMap<OptionLabel, OptionLabel> {
    fn from(value: ShuffleMap) -> Self {
        value.forward
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresentedOption {
    pub label: OptionLabel,
    pub text: String,
}

/// The map to apply for `question`, or `None` when the question must be shown unshuffled.
///
/// A missing entry, or one that no longer matches the question's labels, falls back
/// to identity.
pub fn effective_map<'a>(
    question: &Question,
    map: Option<&'a ShuffleMap>,
) -> Option<&'a ShuffleMap> {
    match map {
        Some(map) if map.covers(&question.options.0) => Some(map),
        Some(_) => {
            tracing::warn!(
                question_id = %question.id,
                "Shuffle map does not match question options; presenting unshuffled"
            );
            None
        }
        None => None,
    }
}

pub fn shuffled_options(question: &Question, map: Option<&ShuffleMap>) -> Vec<PresentedOption> {
    let options = &question.options.0;
    match effective_map(question, map) {
        Some(map) => map
            .iter()
            .filter_map(|(shuffled, canonical)| {
                options
                    .text(canonical)
                    .map(|text| PresentedOption { label: shuffled.clone(), text: text.to_string() })
            })
            .collect(),
        None => options
            .entries()
            .iter()
            .map(|entry| PresentedOption { label: entry.label.clone(), text: entry.text.clone() })
            .collect(),
    }
}

pub fn to_canonical(map: Option<&ShuffleMap>, shuffled: &OptionLabel) -> Option<OptionLabel> {
    match map {
        Some(map) => map.to_canonical(shuffled).cloned(),
        None => Some(shuffled.clone()),
    }
}

pub fn to_shuffled(map: Option<&ShuffleMap>, canonical: &OptionLabel) -> Option<OptionLabel> {
    match map {
        Some(map) => map.to_shuffled(canonical).cloned(),
        None => Some(canonical.clone()),
    }
}

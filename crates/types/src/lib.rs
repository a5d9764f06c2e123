//! Validated text primitives for clinic tables.
//!
//! Every table is a flat file of delimited lines, so any text that ends up in a field must be
//! free of the characters the table format reserves. The types here enforce that at
//! construction, which lets the store split lines without escaping.

/// Characters that carry structure in a persisted table.
///
/// `,` separates fields, `;` separates patient history entries, `|` separates the parts of one
/// history entry, and line breaks separate records.
pub const RESERVED_CHARS: &[char] = &[',', ';', '|', '\n', '\r'];

/// Errors that can occur when creating validated text types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,
    /// The input contained a character reserved by the table format
    #[error("Text cannot contain reserved character {0:?}")]
    ReservedCharacter(char),
}

fn check_reserved(text: &str) -> Result<(), TextError> {
    match text.chars().find(|c| RESERVED_CHARS.contains(c)) {
        Some(c) => Err(TextError::ReservedCharacter(c)),
        None => Ok(()),
    }
}

/// A string type that guarantees non-empty, table-safe content.
///
/// The input is trimmed of leading and trailing whitespace during construction. Used for
/// identifiers and names that act as keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText` from the given input.
    ///
    /// # Errors
    ///
    /// Returns `TextError::Empty` if the trimmed input is empty, or
    /// `TextError::ReservedCharacter` if it contains a character from [`RESERVED_CHARS`].
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        check_reserved(trimmed)?;
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison, used for medicine names.
    pub fn eq_ignore_case(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other.trim())
    }
}

impl std::fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for NonEmptyText {
    type Err = TextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl serde::Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NonEmptyText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NonEmptyText::new(&s).map_err(serde::de::Error::custom)
    }
}

/// Free text for a table field that may be left blank (notes, treatment plans).
///
/// Trimmed like [`NonEmptyText`] and subject to the same reserved-character rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FieldText(String);

impl FieldText {
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        check_reserved(trimmed)?;
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for FieldText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for FieldText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for FieldText {
    type Err = TextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl From<NonEmptyText> for FieldText {
    fn from(value: NonEmptyText) -> Self {
        Self(value.0)
    }
}

impl serde::Serialize for FieldText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for FieldText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        FieldText::new(&s).map_err(serde::de::Error::custom)
    }
}

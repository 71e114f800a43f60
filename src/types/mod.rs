//! The host-side model of JavaScript values.
//!
//! Values crossing the agent boundary are classified by a [`Tag`] drawn from
//! a closed lattice of JavaScript value categories, and materialize on the
//! host as a [`Value`] tree. Strings are width-aware ([`StringValue`]):
//! conversions between widths fail rather than lose information. Big
//! integers ([`BigIntValue`]) keep a single-word fast path next to the
//! general word-vector representation.

pub(crate) mod error;

pub use error::{render_stack, ErrorValue, StackFrame};

use std::fmt;

use indexmap::IndexMap;
use num_bigint::{BigInt, Sign};

/// Width of a concrete number category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberKind {
    Int32,
    Float64,
}

/// Character width of a string category.
///
/// `Latin1` is the one-byte representation, `Utf16` admits the full BMP and
/// surrogate pairs. `Utf8` is the host-native width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringWidth {
    Latin1,
    Utf8,
    Utf16,
}

/// Subkind of a typed array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypedArrayKind {
    Int8,
    Uint8,
    Uint8Clamped,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
}

/// Abstract levels of the tag lattice.
///
/// Concrete tags sit below one of these classes: `value → {primitive,
/// object}`, `primitive → … → name → {string, symbol}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagClass {
    Value,
    Primitive,
    Name,
    Object,
    TypedArray,
}

/// A compile-time category of JavaScript value.
///
/// The set is closed; every transferred value is announced to its acceptor
/// under exactly one of these tags. `Tuple` and `Struct` carry their arity
/// so positional and keyed shapes of different sizes stay distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Undefined,
    Null,
    Boolean,
    Number(NumberKind),
    BigInt,
    String(StringWidth),
    Symbol,
    /// `[]`: an ordered sequence with arbitrary element types.
    List,
    /// A trusted dense array with numeric indices.
    Vector,
    /// Positional arguments of statically-known arity.
    Tuple(usize),
    /// An object whose property names are known at compile time.
    Struct(usize),
    /// `{}`: a mapping with string keys.
    Dictionary,
    Date,
    Promise,
    Error,
    External,
    Class,
    TypedArray(TypedArrayKind),
    ArrayBuffer,
    SharedArrayBuffer,
    DataView,
}

impl Tag {
    /// The immediate class of this tag in the lattice.
    pub fn class(self) -> TagClass {
        match self {
            Tag::Undefined | Tag::Null | Tag::Boolean | Tag::Number(_) | Tag::BigInt => {
                TagClass::Primitive
            }
            Tag::String(_) | Tag::Symbol => TagClass::Name,
            Tag::TypedArray(_) => TagClass::TypedArray,
            _ => TagClass::Object,
        }
    }

    /// Lattice membership test, walking `class → parent` upward.
    pub fn is_a(self, class: TagClass) -> bool {
        let mut current = self.class();
        loop {
            if current == class {
                return true;
            }
            current = match current {
                TagClass::Name => TagClass::Primitive,
                TagClass::TypedArray => TagClass::Object,
                TagClass::Primitive | TagClass::Object => TagClass::Value,
                TagClass::Value => return false,
            };
        }
    }

    pub fn is_primitive(self) -> bool {
        self.is_a(TagClass::Primitive)
    }

    pub fn is_object(self) -> bool {
        self.is_a(TagClass::Object)
    }

    /// Short name used in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Tag::Undefined => "undefined",
            Tag::Null => "null",
            Tag::Boolean => "boolean",
            Tag::Number(NumberKind::Int32) => "number (int32)",
            Tag::Number(NumberKind::Float64) => "number",
            Tag::BigInt => "bigint",
            Tag::String(_) => "string",
            Tag::Symbol => "symbol",
            Tag::List => "array",
            Tag::Vector => "vector",
            Tag::Tuple(_) => "tuple",
            Tag::Struct(_) => "struct",
            Tag::Dictionary => "object",
            Tag::Date => "date",
            Tag::Promise => "promise",
            Tag::Error => "error",
            Tag::External => "external",
            Tag::Class => "class",
            Tag::TypedArray(_) => "typed array",
            Tag::ArrayBuffer => "array buffer",
            Tag::SharedArrayBuffer => "shared array buffer",
            Tag::DataView => "data view",
        }
    }
}

/// A width-aware JavaScript string.
///
/// The width records which representation the string was observed in, not
/// merely its content. Conversions that cannot represent every code unit of
/// the source in the target width fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StringValue {
    Latin1(Vec<u8>),
    Utf8(String),
    Utf16(Vec<u16>),
}

impl StringValue {
    pub fn width(&self) -> StringWidth {
        match self {
            StringValue::Latin1(_) => StringWidth::Latin1,
            StringValue::Utf8(_) => StringWidth::Utf8,
            StringValue::Utf16(_) => StringWidth::Utf16,
        }
    }

    /// Render as a host string. Latin1 bytes map to the first 256 code
    /// points; unpaired UTF-16 surrogates are replaced.
    pub fn to_utf8_lossy(&self) -> String {
        match self {
            StringValue::Latin1(bytes) => bytes.iter().map(|&b| char::from(b)).collect(),
            StringValue::Utf8(string) => string.clone(),
            StringValue::Utf16(units) => String::from_utf16_lossy(units),
        }
    }

    /// Convert into the UTF-8 width. Fails on unpaired surrogates.
    pub fn into_utf8(self) -> Result<String, StringWidthError> {
        match self {
            StringValue::Latin1(bytes) => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
            StringValue::Utf8(string) => Ok(string),
            StringValue::Utf16(units) => String::from_utf16(&units)
                .map_err(|_| StringWidthError::new(StringWidth::Utf16, StringWidth::Utf8)),
        }
    }

    /// Convert into the one-byte width.
    ///
    /// A UTF-8 source admits only code units ≤ 0x7F (multi-byte sequences
    /// have no one-byte spelling); a UTF-16 source admits code units ≤ 0xFF.
    pub fn into_latin1(self) -> Result<Vec<u8>, StringWidthError> {
        match self {
            StringValue::Latin1(bytes) => Ok(bytes),
            StringValue::Utf8(string) => {
                if string.bytes().all(|b| b <= 0x7F) {
                    Ok(string.into_bytes())
                } else {
                    Err(StringWidthError::new(StringWidth::Utf8, StringWidth::Latin1))
                }
            }
            StringValue::Utf16(units) => units
                .iter()
                .map(|&unit| u8::try_from(unit))
                .collect::<Result<Vec<u8>, _>>()
                .map_err(|_| StringWidthError::new(StringWidth::Utf16, StringWidth::Latin1)),
        }
    }

    /// Convert into the two-byte width. Always representable.
    pub fn into_utf16(self) -> Vec<u16> {
        match self {
            StringValue::Latin1(bytes) => bytes.iter().map(|&b| u16::from(b)).collect(),
            StringValue::Utf8(string) => string.encode_utf16().collect(),
            StringValue::Utf16(units) => units,
        }
    }

    /// Classify a host string by content: pure one-byte text reads as
    /// latin1, anything wider as UTF-16.
    pub fn classify(text: &str) -> StringWidth {
        if text.chars().all(|c| (c as u32) <= 0xFF) {
            StringWidth::Latin1
        } else {
            StringWidth::Utf16
        }
    }
}

impl From<&str> for StringValue {
    fn from(text: &str) -> Self {
        StringValue::Utf8(text.to_owned())
    }
}

impl From<String> for StringValue {
    fn from(text: String) -> Self {
        StringValue::Utf8(text)
    }
}

/// Failure to re-represent a string in a narrower width.
#[derive(Debug, Clone, Copy)]
pub struct StringWidthError {
    pub from: StringWidth,
    pub to: StringWidth,
}

impl StringWidthError {
    fn new(from: StringWidth, to: StringWidth) -> Self {
        Self { from, to }
    }
}

impl fmt::Display for StringWidthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "string is not representable as {:?}", self.to)
    }
}

/// An arbitrary-precision integer with a single-word fast path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BigIntValue {
    inner: BigInt,
}

impl BigIntValue {
    pub fn from_u64(value: u64) -> Self {
        Self { inner: BigInt::from(value) }
    }

    pub fn from_i64(value: i64) -> Self {
        Self { inner: BigInt::from(value) }
    }

    /// Assemble from sign and little-endian 64-bit words, the multi-word
    /// path.
    pub fn from_words(negative: bool, words: &[u64]) -> Self {
        let mut magnitude = BigInt::from(0u8);
        for (index, &word) in words.iter().enumerate() {
            magnitude += BigInt::from(word) << (64 * index);
        }
        if negative {
            magnitude = -magnitude;
        }
        Self { inner: magnitude }
    }

    /// The single-word path: `Some` exactly when the value fits in `u64`.
    pub fn as_u64(&self) -> Option<u64> {
        u64::try_from(&self.inner).ok()
    }

    pub fn is_negative(&self) -> bool {
        self.inner.sign() == Sign::Minus
    }

    /// Little-endian 64-bit magnitude words.
    pub fn words(&self) -> Vec<u64> {
        let (_, digits) = self.inner.to_u64_digits();
        digits
    }

    /// Decimal rendering without a `n` suffix, the engine interchange form.
    pub fn to_decimal(&self) -> String {
        self.inner.to_string()
    }

    pub fn from_decimal(text: &str) -> Option<Self> {
        text.parse::<BigInt>().ok().map(|inner| Self { inner })
    }
}

impl From<u64> for BigIntValue {
    fn from(value: u64) -> Self {
        Self::from_u64(value)
    }
}

/// An order-preserving string-keyed mapping.
pub type Dictionary = IndexMap<String, Value>;

/// Index of a shared value inside a transfer's reference storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReferenceIndex(pub u32);

/// A JavaScript value materialized on the host.
///
/// `Reference` only appears in the output of reference-preserving
/// transfers; it points into the accompanying
/// [`ReferenceStorage`](crate::transfer::graph::ReferenceStorage).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Undefined,
    Null,
    Boolean(bool),
    Int32(i32),
    Number(f64),
    BigInt(BigIntValue),
    String(StringValue),
    List(Vec<Value>),
    Dictionary(Dictionary),
    /// Milliseconds since the Unix epoch.
    Date(f64),
    Error(ErrorValue),
    Reference(ReferenceIndex),
}

impl Value {
    /// The preferred tag of this value.
    pub fn tag(&self) -> Tag {
        match self {
            Value::Undefined => Tag::Undefined,
            Value::Null => Tag::Null,
            Value::Boolean(_) => Tag::Boolean,
            Value::Int32(_) => Tag::Number(NumberKind::Int32),
            Value::Number(_) => Tag::Number(NumberKind::Float64),
            Value::BigInt(_) => Tag::BigInt,
            Value::String(string) => Tag::String(string.width()),
            Value::List(_) => Tag::List,
            Value::Dictionary(_) => Tag::Dictionary,
            Value::Date(_) => Tag::Date,
            Value::Error(_) => Tag::Error,
            // References resolve to objects; the dictionary tag is the
            // closest classification without the storage at hand.
            Value::Reference(_) => Tag::Dictionary,
        }
    }

    pub fn string(text: impl Into<String>) -> Self {
        Value::String(StringValue::Utf8(text.into()))
    }

    pub fn as_i32(&self) -> Option<i32> {
        match *self {
            Value::Int32(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Int32(value) => Some(f64::from(value)),
            Value::Number(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_str_lossy(&self) -> Option<String> {
        match self {
            Value::String(string) => Some(string.to_utf8_lossy()),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int32(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::string(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::string(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_lattice_classes() {
        assert!(Tag::Boolean.is_primitive());
        assert!(Tag::String(StringWidth::Utf16).is_a(TagClass::Name));
        assert!(Tag::String(StringWidth::Utf16).is_primitive());
        assert!(Tag::Dictionary.is_object());
        assert!(Tag::TypedArray(TypedArrayKind::Uint8).is_object());
        assert!(!Tag::Dictionary.is_primitive());
        assert!(Tag::Undefined.is_a(TagClass::Value));
    }

    #[test]
    fn latin1_narrowing_rejects_wide_sources() {
        let ascii = StringValue::Utf8("plain".into());
        assert_eq!(ascii.into_latin1().unwrap(), b"plain".to_vec());

        let wide = StringValue::Utf8("caf\u{e9}".into());
        assert!(wide.into_latin1().is_err());

        let utf16_narrow = StringValue::Utf16(vec![0x00E9]);
        assert_eq!(utf16_narrow.into_latin1().unwrap(), vec![0xE9]);

        let utf16_wide = StringValue::Utf16(vec![0x1234]);
        assert!(utf16_wide.into_latin1().is_err());
    }

    #[test]
    fn utf16_admits_surrogate_pairs() {
        let pair = StringValue::Utf8("\u{1F600}".into()).into_utf16();
        assert_eq!(pair.len(), 2);
        assert_eq!(StringValue::Utf16(pair).into_utf8().unwrap(), "\u{1F600}");
    }

    #[test]
    fn bigint_word_paths() {
        let zero = BigIntValue::from_u64(0);
        assert_eq!(zero.as_u64(), Some(0));

        let big = BigIntValue::from_words(false, &[0, 1]);
        assert_eq!(big.as_u64(), None);
        assert_eq!(big.words(), vec![0, 1]);
        assert_eq!(
            BigIntValue::from_decimal(&big.to_decimal()).unwrap(),
            big
        );

        let negative = BigIntValue::from_words(true, &[7]);
        assert!(negative.is_negative());
        assert_eq!(negative.to_decimal(), "-7");
    }
}

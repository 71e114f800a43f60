//! The value transfer framework.
//!
//! A value crossing the agent boundary is pumped through two halves: a
//! _visit_ decomposes the source representation and announces exactly one
//! [`Tag`](crate::types::Tag) to an _acceptor_, which constructs the target
//! representation. Containers hand the acceptor a pull-source
//! ([`Sequence`], [`Entries`]) whose items are themselves visited
//! recursively, so arbitrarily nested shapes move without an intermediate
//! encoding.
//!
//! The split mirrors the serializer/visitor architecture the Rust
//! ecosystem standardized on; acceptors here are selected by JavaScript
//! tag rather than by Rust data-model category, and carry the strictness
//! policy of §narrowing: a *strict* acceptor admits only its own tag, a
//! *coercing* acceptor may convert through the canonical `f64` (or string
//! width) with a round-trip check, raising a range error on information
//! loss. Tags nobody handles surface as type errors: the throwing
//! catch-all is the default body of every `Accept` method.

pub(crate) mod engine;
pub mod graph;
pub mod structured;

use thiserror::Error;

use crate::types::{
    BigIntValue, Dictionary, ErrorValue, NumberKind, ReferenceIndex, StringValue, Tag, Value,
};

/// Failure inside the transfer pipeline.
#[derive(Debug, Clone, Error)]
pub enum TransferError {
    /// No acceptor overload matched the visited tag.
    #[error("{0}")]
    Type(String),
    /// A numeric or string coercion would lose information.
    #[error("{0}")]
    Range(String),
}

impl TransferError {
    pub fn unexpected(tag: Tag, expected: &'static str) -> Self {
        TransferError::Type(format!("cannot accept {} as {expected}", tag.name()))
    }
}

impl From<TransferError> for crate::result::Error {
    fn from(error: TransferError) -> Self {
        match error {
            TransferError::Type(message) => crate::result::Error::Type(message),
            TransferError::Range(message) => crate::result::Error::Range(message),
        }
    }
}

pub type TransferResult<T> = std::result::Result<T, TransferError>;

/// Pull-source for ordered sequence entries.
pub trait Sequence {
    fn size_hint(&self) -> Option<usize> {
        None
    }

    /// Visit the next element with `acceptor`, or report exhaustion.
    fn next_with<A: Accept>(&mut self, acceptor: A) -> TransferResult<Option<A::Output>>;
}

/// Pull-source for string-keyed mapping entries, yielded in deterministic
/// (source) order.
pub trait Entries {
    fn size_hint(&self) -> Option<usize> {
        None
    }

    /// Visit the next entry's value with `acceptor`, or report exhaustion.
    fn next_with<A: Accept>(&mut self, acceptor: A) -> TransferResult<Option<(String, A::Output)>>;
}

/// Target half of a transfer: constructs `Output` from exactly one tagged
/// announcement. Every method defaults to the throwing catch-all.
#[allow(unused_variables)]
pub trait Accept: Sized {
    type Output;

    /// Target description used in type-error messages.
    fn expecting(&self) -> &'static str;

    fn unexpected(&self, tag: Tag) -> TransferError {
        TransferError::unexpected(tag, self.expecting())
    }

    fn undefined(self) -> TransferResult<Self::Output> {
        Err(self.unexpected(Tag::Undefined))
    }

    fn null(self) -> TransferResult<Self::Output> {
        Err(self.unexpected(Tag::Null))
    }

    fn boolean(self, value: bool) -> TransferResult<Self::Output> {
        Err(self.unexpected(Tag::Boolean))
    }

    fn int32(self, value: i32) -> TransferResult<Self::Output> {
        Err(self.unexpected(Tag::Number(NumberKind::Int32)))
    }

    fn number(self, value: f64) -> TransferResult<Self::Output> {
        Err(self.unexpected(Tag::Number(NumberKind::Float64)))
    }

    fn bigint(self, value: BigIntValue) -> TransferResult<Self::Output> {
        Err(self.unexpected(Tag::BigInt))
    }

    fn string(self, value: StringValue) -> TransferResult<Self::Output> {
        let tag = Tag::String(value.width());
        Err(self.unexpected(tag))
    }

    fn symbol(self) -> TransferResult<Self::Output> {
        Err(self.unexpected(Tag::Symbol))
    }

    /// Milliseconds since the Unix epoch.
    fn date(self, epoch_ms: f64) -> TransferResult<Self::Output> {
        Err(self.unexpected(Tag::Date))
    }

    fn error(self, value: ErrorValue) -> TransferResult<Self::Output> {
        Err(self.unexpected(Tag::Error))
    }

    fn list<S: Sequence>(self, sequence: S) -> TransferResult<Self::Output> {
        Err(self.unexpected(Tag::List))
    }

    fn dictionary<E: Entries>(self, entries: E) -> TransferResult<Self::Output> {
        Err(self.unexpected(Tag::Dictionary))
    }

    /// A token standing for an already-visited object in a
    /// reference-preserving transfer.
    fn reference(self, index: ReferenceIndex) -> TransferResult<Self::Output> {
        Err(self.unexpected(Tag::Dictionary))
    }

    /// Catch-all for tags with no dedicated entry point (promises,
    /// externals, typed arrays, …).
    fn other(self, tag: Tag) -> TransferResult<Self::Output> {
        Err(self.unexpected(tag))
    }
}

/// Source half of a transfer: decomposes a subject and drives an acceptor.
pub trait Visit {
    fn visit<A: Accept>(self, acceptor: A) -> TransferResult<A::Output>;
}

/// Host types that can act as a transfer source.
pub trait IntoTransfer {
    fn visit_into<A: Accept>(&self, acceptor: A) -> TransferResult<A::Output>;
}

impl<'a, T: IntoTransfer + ?Sized> Visit for &'a T {
    fn visit<A: Accept>(self, acceptor: A) -> TransferResult<A::Output> {
        self.visit_into(acceptor)
    }
}

/// Host types that can be constructed as a transfer target.
pub trait FromTransfer: Sized {
    type Acceptor: Accept<Output = Self>;

    /// The coercing acceptor.
    fn acceptor() -> Self::Acceptor;

    /// The strict acceptor; resolves only for the exact tag.
    fn strict_acceptor() -> Self::Acceptor {
        Self::acceptor()
    }
}

/// Transfer with the throwing (coercing) policy.
pub fn transfer<T: FromTransfer>(source: impl Visit) -> TransferResult<T> {
    source.visit(T::acceptor())
}

/// Transfer with the strict policy: resolves only when the visited tag is
/// exactly representable as `T`.
pub fn transfer_strict<T: FromTransfer>(source: impl Visit) -> TransferResult<T> {
    source.visit(T::strict_acceptor())
}

/// Re-visit an already-materialized [`Value`] into a concrete host type.
pub fn from_value<T: FromTransfer>(value: &Value, strict: bool) -> TransferResult<T> {
    if strict {
        value.visit_into(T::strict_acceptor())
    } else {
        value.visit_into(T::acceptor())
    }
}

/// Shorthand for materializing any source as a [`Value`] tree.
pub fn to_value(source: impl Visit) -> TransferResult<Value> {
    source.visit(ValueAcceptor)
}

// ---- Value as a source ----

struct SliceSequence<'a> {
    items: std::slice::Iter<'a, Value>,
}

impl<'a> Sequence for SliceSequence<'a> {
    fn size_hint(&self) -> Option<usize> {
        Some(self.items.len())
    }

    fn next_with<A: Accept>(&mut self, acceptor: A) -> TransferResult<Option<A::Output>> {
        match self.items.next() {
            Some(value) => value.visit_into(acceptor).map(Some),
            None => Ok(None),
        }
    }
}

struct MapEntries<'a> {
    entries: indexmap::map::Iter<'a, String, Value>,
}

impl<'a> Entries for MapEntries<'a> {
    fn size_hint(&self) -> Option<usize> {
        Some(self.entries.len())
    }

    fn next_with<A: Accept>(&mut self, acceptor: A) -> TransferResult<Option<(String, A::Output)>> {
        match self.entries.next() {
            Some((key, value)) => {
                let accepted = value.visit_into(acceptor)?;
                Ok(Some((key.clone(), accepted)))
            }
            None => Ok(None),
        }
    }
}

impl IntoTransfer for Value {
    fn visit_into<A: Accept>(&self, acceptor: A) -> TransferResult<A::Output> {
        match self {
            Value::Undefined => acceptor.undefined(),
            Value::Null => acceptor.null(),
            Value::Boolean(value) => acceptor.boolean(*value),
            Value::Int32(value) => acceptor.int32(*value),
            Value::Number(value) => acceptor.number(*value),
            Value::BigInt(value) => acceptor.bigint(value.clone()),
            Value::String(value) => acceptor.string(value.clone()),
            Value::List(items) => acceptor.list(SliceSequence { items: items.iter() }),
            Value::Dictionary(map) => acceptor.dictionary(MapEntries { entries: map.iter() }),
            Value::Date(epoch_ms) => acceptor.date(*epoch_ms),
            Value::Error(error) => acceptor.error(error.clone()),
            Value::Reference(index) => acceptor.reference(*index),
        }
    }
}

// ---- Primitive sources ----

macro_rules! visit_via {
    ($($type:ty => |$self_:ident, $acceptor:ident| $body:expr;)*) => {
        $(
            impl IntoTransfer for $type {
                fn visit_into<A: Accept>(&$self_, $acceptor: A) -> TransferResult<A::Output> {
                    $body
                }
            }
        )*
    };
}

visit_via! {
    bool => |self, acceptor| acceptor.boolean(*self);
    i32 => |self, acceptor| acceptor.int32(*self);
    u32 => |self, acceptor| {
        match i32::try_from(*self) {
            Ok(value) => acceptor.int32(value),
            Err(_) => acceptor.number(f64::from(*self)),
        }
    };
    i64 => |self, acceptor| acceptor.bigint(BigIntValue::from_i64(*self));
    u64 => |self, acceptor| acceptor.bigint(BigIntValue::from_u64(*self));
    f64 => |self, acceptor| acceptor.number(*self);
    str => |self, acceptor| acceptor.string(StringValue::Utf8(self.to_owned()));
    String => |self, acceptor| acceptor.string(StringValue::Utf8(self.clone()));
    StringValue => |self, acceptor| acceptor.string(self.clone());
    BigIntValue => |self, acceptor| acceptor.bigint(self.clone());
    ErrorValue => |self, acceptor| acceptor.error(self.clone());
}

impl<T: IntoTransfer> IntoTransfer for Option<T> {
    fn visit_into<A: Accept>(&self, acceptor: A) -> TransferResult<A::Output> {
        match self {
            Some(value) => value.visit_into(acceptor),
            None => acceptor.undefined(),
        }
    }
}

struct IterSequence<'a, T> {
    items: std::slice::Iter<'a, T>,
}

impl<'a, T: IntoTransfer> Sequence for IterSequence<'a, T> {
    fn size_hint(&self) -> Option<usize> {
        Some(self.items.len())
    }

    fn next_with<A: Accept>(&mut self, acceptor: A) -> TransferResult<Option<A::Output>> {
        match self.items.next() {
            Some(value) => value.visit_into(acceptor).map(Some),
            None => Ok(None),
        }
    }
}

impl<T: IntoTransfer> IntoTransfer for Vec<T> {
    fn visit_into<A: Accept>(&self, acceptor: A) -> TransferResult<A::Output> {
        acceptor.list(IterSequence { items: self.iter() })
    }
}

impl<T: IntoTransfer> IntoTransfer for [T] {
    fn visit_into<A: Accept>(&self, acceptor: A) -> TransferResult<A::Output> {
        acceptor.list(IterSequence { items: self.iter() })
    }
}

// ---- Primitive acceptors ----

/// Acceptor for `bool`.
pub struct BoolAcceptor;

impl Accept for BoolAcceptor {
    type Output = bool;

    fn expecting(&self) -> &'static str {
        "boolean"
    }

    fn boolean(self, value: bool) -> TransferResult<bool> {
        Ok(value)
    }
}

impl FromTransfer for bool {
    type Acceptor = BoolAcceptor;

    fn acceptor() -> BoolAcceptor {
        BoolAcceptor
    }
}

/// Acceptor for `()`: the absence of an interesting value.
pub struct UnitAcceptor;

impl Accept for UnitAcceptor {
    type Output = ();

    fn expecting(&self) -> &'static str {
        "undefined"
    }

    fn undefined(self) -> TransferResult<()> {
        Ok(())
    }

    fn null(self) -> TransferResult<()> {
        Ok(())
    }
}

impl FromTransfer for () {
    type Acceptor = UnitAcceptor;

    fn acceptor() -> UnitAcceptor {
        UnitAcceptor
    }
}

/// Acceptor for `i32`. Coercing mode narrows a canonical `f64` with a
/// round-trip check; strict mode admits only the int32 tag.
pub struct I32Acceptor {
    strict: bool,
}

impl Accept for I32Acceptor {
    type Output = i32;

    fn expecting(&self) -> &'static str {
        "32-bit integer"
    }

    fn int32(self, value: i32) -> TransferResult<i32> {
        Ok(value)
    }

    fn number(self, value: f64) -> TransferResult<i32> {
        if self.strict {
            return Err(self.unexpected(Tag::Number(NumberKind::Float64)));
        }
        let narrowed = value as i32;
        if f64::from(narrowed) == value {
            Ok(narrowed)
        } else {
            Err(TransferError::Range(format!(
                "{value} is not representable as a 32-bit integer"
            )))
        }
    }
}

impl FromTransfer for i32 {
    type Acceptor = I32Acceptor;

    fn acceptor() -> I32Acceptor {
        I32Acceptor { strict: false }
    }

    fn strict_acceptor() -> I32Acceptor {
        I32Acceptor { strict: true }
    }
}

/// Acceptor for `u32`; always narrows through the canonical `f64`.
pub struct U32Acceptor {
    strict: bool,
}

impl Accept for U32Acceptor {
    type Output = u32;

    fn expecting(&self) -> &'static str {
        "unsigned 32-bit integer"
    }

    fn int32(self, value: i32) -> TransferResult<u32> {
        u32::try_from(value).map_err(|_| {
            TransferError::Range(format!("{value} is not representable as an unsigned integer"))
        })
    }

    fn number(self, value: f64) -> TransferResult<u32> {
        if self.strict {
            return Err(self.unexpected(Tag::Number(NumberKind::Float64)));
        }
        let narrowed = value as u32;
        if f64::from(narrowed) == value {
            Ok(narrowed)
        } else {
            Err(TransferError::Range(format!(
                "{value} is not representable as an unsigned 32-bit integer"
            )))
        }
    }
}

impl FromTransfer for u32 {
    type Acceptor = U32Acceptor;

    fn acceptor() -> U32Acceptor {
        U32Acceptor { strict: false }
    }

    fn strict_acceptor() -> U32Acceptor {
        U32Acceptor { strict: true }
    }
}

/// Acceptor for `f64`: the generic number target. Int32 is a covariant
/// subtag and always admitted; NaN and ±∞ pass through.
pub struct F64Acceptor;

impl Accept for F64Acceptor {
    type Output = f64;

    fn expecting(&self) -> &'static str {
        "number"
    }

    fn int32(self, value: i32) -> TransferResult<f64> {
        Ok(f64::from(value))
    }

    fn number(self, value: f64) -> TransferResult<f64> {
        Ok(value)
    }
}

impl FromTransfer for f64 {
    type Acceptor = F64Acceptor;

    fn acceptor() -> F64Acceptor {
        F64Acceptor
    }
}

/// Acceptor for `u64` through the bigint single-word path.
pub struct U64Acceptor;

impl Accept for U64Acceptor {
    type Output = u64;

    fn expecting(&self) -> &'static str {
        "unsigned 64-bit bigint"
    }

    fn bigint(self, value: BigIntValue) -> TransferResult<u64> {
        value.as_u64().ok_or_else(|| {
            TransferError::Range(format!(
                "{} is not representable as an unsigned 64-bit integer",
                value.to_decimal()
            ))
        })
    }
}

impl FromTransfer for u64 {
    type Acceptor = U64Acceptor;

    fn acceptor() -> U64Acceptor {
        U64Acceptor
    }
}

/// Acceptor for [`BigIntValue`].
pub struct BigIntAcceptor;

impl Accept for BigIntAcceptor {
    type Output = BigIntValue;

    fn expecting(&self) -> &'static str {
        "bigint"
    }

    fn bigint(self, value: BigIntValue) -> TransferResult<BigIntValue> {
        Ok(value)
    }
}

impl FromTransfer for BigIntValue {
    type Acceptor = BigIntAcceptor;

    fn acceptor() -> BigIntAcceptor {
        BigIntAcceptor
    }
}

/// Acceptor for `String` (the UTF-8 width). Width conversions that cannot
/// represent the source raise range errors.
pub struct StringAcceptor;

impl Accept for StringAcceptor {
    type Output = String;

    fn expecting(&self) -> &'static str {
        "string"
    }

    fn string(self, value: StringValue) -> TransferResult<String> {
        value
            .into_utf8()
            .map_err(|error| TransferError::Range(error.to_string()))
    }
}

impl FromTransfer for String {
    type Acceptor = StringAcceptor;

    fn acceptor() -> StringAcceptor {
        StringAcceptor
    }
}

/// Acceptor for [`StringValue`], preserving the observed width.
pub struct StringValueAcceptor;

impl Accept for StringValueAcceptor {
    type Output = StringValue;

    fn expecting(&self) -> &'static str {
        "string"
    }

    fn string(self, value: StringValue) -> TransferResult<StringValue> {
        Ok(value)
    }
}

impl FromTransfer for StringValue {
    type Acceptor = StringValueAcceptor;

    fn acceptor() -> StringValueAcceptor {
        StringValueAcceptor
    }
}

/// Acceptor for [`ErrorValue`].
pub struct ErrorValueAcceptor;

impl Accept for ErrorValueAcceptor {
    type Output = ErrorValue;

    fn expecting(&self) -> &'static str {
        "error"
    }

    fn error(self, value: ErrorValue) -> TransferResult<ErrorValue> {
        Ok(value)
    }
}

impl FromTransfer for ErrorValue {
    type Acceptor = ErrorValueAcceptor;

    fn acceptor() -> ErrorValueAcceptor {
        ErrorValueAcceptor
    }
}

// ---- Composite acceptors ----

/// `Option<T>`: undefined and null read as `None`, anything else
/// delegates to `T`'s acceptor.
pub struct OptionAcceptor<T: FromTransfer> {
    strict: bool,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: FromTransfer> OptionAcceptor<T> {
    fn inner(&self) -> T::Acceptor {
        if self.strict {
            T::strict_acceptor()
        } else {
            T::acceptor()
        }
    }
}

impl<T: FromTransfer> Accept for OptionAcceptor<T> {
    type Output = Option<T>;

    fn expecting(&self) -> &'static str {
        "optional value"
    }

    fn undefined(self) -> TransferResult<Option<T>> {
        Ok(None)
    }

    fn null(self) -> TransferResult<Option<T>> {
        Ok(None)
    }

    fn boolean(self, value: bool) -> TransferResult<Option<T>> {
        self.inner().boolean(value).map(Some)
    }

    fn int32(self, value: i32) -> TransferResult<Option<T>> {
        self.inner().int32(value).map(Some)
    }

    fn number(self, value: f64) -> TransferResult<Option<T>> {
        self.inner().number(value).map(Some)
    }

    fn bigint(self, value: BigIntValue) -> TransferResult<Option<T>> {
        self.inner().bigint(value).map(Some)
    }

    fn string(self, value: StringValue) -> TransferResult<Option<T>> {
        self.inner().string(value).map(Some)
    }

    fn symbol(self) -> TransferResult<Option<T>> {
        self.inner().symbol().map(Some)
    }

    fn date(self, epoch_ms: f64) -> TransferResult<Option<T>> {
        self.inner().date(epoch_ms).map(Some)
    }

    fn error(self, value: ErrorValue) -> TransferResult<Option<T>> {
        self.inner().error(value).map(Some)
    }

    fn list<S: Sequence>(self, sequence: S) -> TransferResult<Option<T>> {
        self.inner().list(sequence).map(Some)
    }

    fn dictionary<E: Entries>(self, entries: E) -> TransferResult<Option<T>> {
        self.inner().dictionary(entries).map(Some)
    }

    fn reference(self, index: ReferenceIndex) -> TransferResult<Option<T>> {
        self.inner().reference(index).map(Some)
    }

    fn other(self, tag: Tag) -> TransferResult<Option<T>> {
        self.inner().other(tag).map(Some)
    }
}

impl<T: FromTransfer> FromTransfer for Option<T> {
    type Acceptor = OptionAcceptor<T>;

    fn acceptor() -> OptionAcceptor<T> {
        OptionAcceptor { strict: false, _marker: std::marker::PhantomData }
    }

    fn strict_acceptor() -> OptionAcceptor<T> {
        OptionAcceptor { strict: true, _marker: std::marker::PhantomData }
    }
}

/// `Vec<T>` from the list tag.
pub struct VecAcceptor<T: FromTransfer> {
    strict: bool,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: FromTransfer> Accept for VecAcceptor<T> {
    type Output = Vec<T>;

    fn expecting(&self) -> &'static str {
        "array"
    }

    fn list<S: Sequence>(self, mut sequence: S) -> TransferResult<Vec<T>> {
        let mut items = Vec::with_capacity(sequence.size_hint().unwrap_or(0));
        loop {
            let next = if self.strict {
                sequence.next_with(T::strict_acceptor())?
            } else {
                sequence.next_with(T::acceptor())?
            };
            match next {
                Some(item) => items.push(item),
                None => return Ok(items),
            }
        }
    }
}

impl<T: FromTransfer> FromTransfer for Vec<T> {
    type Acceptor = VecAcceptor<T>;

    fn acceptor() -> VecAcceptor<T> {
        VecAcceptor { strict: false, _marker: std::marker::PhantomData }
    }

    fn strict_acceptor() -> VecAcceptor<T> {
        VecAcceptor { strict: true, _marker: std::marker::PhantomData }
    }
}

/// `IndexMap<String, T>` from the dictionary tag.
pub struct DictionaryAcceptor<T: FromTransfer> {
    strict: bool,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: FromTransfer> Accept for DictionaryAcceptor<T> {
    type Output = indexmap::IndexMap<String, T>;

    fn expecting(&self) -> &'static str {
        "object"
    }

    fn dictionary<E: Entries>(self, mut entries: E) -> TransferResult<Self::Output> {
        let mut map = indexmap::IndexMap::with_capacity(entries.size_hint().unwrap_or(0));
        loop {
            let next = if self.strict {
                entries.next_with(T::strict_acceptor())?
            } else {
                entries.next_with(T::acceptor())?
            };
            match next {
                Some((key, value)) => {
                    map.insert(key, value);
                }
                None => return Ok(map),
            }
        }
    }
}

impl<T: FromTransfer> FromTransfer for indexmap::IndexMap<String, T> {
    type Acceptor = DictionaryAcceptor<T>;

    fn acceptor() -> DictionaryAcceptor<T> {
        DictionaryAcceptor { strict: false, _marker: std::marker::PhantomData }
    }

    fn strict_acceptor() -> DictionaryAcceptor<T> {
        DictionaryAcceptor { strict: true, _marker: std::marker::PhantomData }
    }
}

/// The universal acceptor: any transferable tag materializes as a
/// [`Value`] tree. This is also the undiscriminated-union catch-all:
/// tag negotiation with every alternative admitted.
pub struct ValueAcceptor;

impl Accept for ValueAcceptor {
    type Output = Value;

    fn expecting(&self) -> &'static str {
        "any transferable value"
    }

    fn undefined(self) -> TransferResult<Value> {
        Ok(Value::Undefined)
    }

    fn null(self) -> TransferResult<Value> {
        Ok(Value::Null)
    }

    fn boolean(self, value: bool) -> TransferResult<Value> {
        Ok(Value::Boolean(value))
    }

    fn int32(self, value: i32) -> TransferResult<Value> {
        Ok(Value::Int32(value))
    }

    fn number(self, value: f64) -> TransferResult<Value> {
        Ok(Value::Number(value))
    }

    fn bigint(self, value: BigIntValue) -> TransferResult<Value> {
        Ok(Value::BigInt(value))
    }

    fn string(self, value: StringValue) -> TransferResult<Value> {
        Ok(Value::String(value))
    }

    fn date(self, epoch_ms: f64) -> TransferResult<Value> {
        Ok(Value::Date(epoch_ms))
    }

    fn error(self, value: ErrorValue) -> TransferResult<Value> {
        Ok(Value::Error(value))
    }

    fn list<S: Sequence>(self, mut sequence: S) -> TransferResult<Value> {
        let mut items = Vec::with_capacity(sequence.size_hint().unwrap_or(0));
        while let Some(item) = sequence.next_with(ValueAcceptor)? {
            items.push(item);
        }
        Ok(Value::List(items))
    }

    fn dictionary<E: Entries>(self, mut entries: E) -> TransferResult<Value> {
        let mut map = Dictionary::with_capacity(entries.size_hint().unwrap_or(0));
        while let Some((key, value)) = entries.next_with(ValueAcceptor)? {
            map.insert(key, value);
        }
        Ok(Value::Dictionary(map))
    }

    fn reference(self, index: ReferenceIndex) -> TransferResult<Value> {
        Ok(Value::Reference(index))
    }
}

impl FromTransfer for Value {
    type Acceptor = ValueAcceptor;

    fn acceptor() -> ValueAcceptor {
        ValueAcceptor
    }
}

// ---- Tuples: positional arguments of known arity ----

macro_rules! tuple_transfer_impls {
    ($( $name:ident )+) => {
        #[allow(non_snake_case)]
        impl<$($name: IntoTransfer),+> IntoTransfer for ($($name,)+) {
            fn visit_into<Acc: Accept>(&self, acceptor: Acc) -> TransferResult<Acc::Output> {
                let ($($name,)+) = self;
                let items: Vec<Value> = {
                    let mut items = Vec::new();
                    $(items.push(to_value($name)?);)+
                    items
                };
                acceptor.list(SliceSequence { items: items.iter() })
            }
        }

        #[allow(non_snake_case)]
        impl<$($name: FromTransfer),+> FromTransfer for ($($name,)+) {
            type Acceptor = TupleAcceptor<($($name,)+)>;

            fn acceptor() -> Self::Acceptor {
                TupleAcceptor { strict: false, _marker: std::marker::PhantomData }
            }

            fn strict_acceptor() -> Self::Acceptor {
                TupleAcceptor { strict: true, _marker: std::marker::PhantomData }
            }
        }

        #[allow(non_snake_case)]
        impl<$($name: FromTransfer),+> TupleTarget for ($($name,)+) {
            const ARITY: usize = tuple_transfer_impls!(@count $($name)+);

            fn accept_from<S: Sequence>(mut sequence: S, strict: bool) -> TransferResult<Self> {
                $(
                    let next = if strict {
                        sequence.next_with($name::strict_acceptor())?
                    } else {
                        sequence.next_with($name::acceptor())?
                    };
                    let $name = match next {
                        Some(value) => value,
                        None => {
                            return Err(TransferError::Type(format!(
                                "tuple of {} elements ended early", Self::ARITY
                            )))
                        }
                    };
                )+
                Ok(($($name,)+))
            }
        }
    };
    (@count $head:ident $($rest:ident)*) => { 1usize + tuple_transfer_impls!(@count $($rest)*) };
    (@count) => { 0usize };
}

/// Implemented for tuples so [`TupleAcceptor`] can drive them.
pub trait TupleTarget: Sized {
    const ARITY: usize;

    fn accept_from<S: Sequence>(sequence: S, strict: bool) -> TransferResult<Self>;
}

/// Acceptor mirroring positional arguments; excess elements are ignored
/// (the positional spread of the final rest slot belongs to the caller).
pub struct TupleAcceptor<T: TupleTarget> {
    strict: bool,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: TupleTarget> Accept for TupleAcceptor<T> {
    type Output = T;

    fn expecting(&self) -> &'static str {
        "tuple"
    }

    fn list<S: Sequence>(self, sequence: S) -> TransferResult<T> {
        T::accept_from(sequence, self.strict)
    }
}

tuple_transfer_impls! { T0 }
tuple_transfer_impls! { T0 T1 }
tuple_transfer_impls! { T0 T1 T2 }
tuple_transfer_impls! { T0 T1 T2 T3 }
tuple_transfer_impls! { T0 T1 T2 T3 T4 }
tuple_transfer_impls! { T0 T1 T2 T3 T4 T5 }
tuple_transfer_impls! { T0 T1 T2 T3 T4 T5 T6 }
tuple_transfer_impls! { T0 T1 T2 T3 T4 T5 T6 T7 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_round_trips() {
        assert_eq!(transfer::<bool>(&Value::Boolean(true)).unwrap(), true);
        assert_eq!(transfer::<i32>(&Value::Int32(-5)).unwrap(), -5);
        assert_eq!(transfer::<f64>(&Value::Int32(3)).unwrap(), 3.0);
        assert_eq!(transfer::<String>(&Value::string("hey")).unwrap(), "hey");
        assert_eq!(transfer::<Option<i32>>(&Value::Undefined).unwrap(), None);
        assert_eq!(transfer::<Option<i32>>(&Value::Int32(1)).unwrap(), Some(1));
    }

    #[test]
    fn i32_narrowing_policy() {
        // Exact doubles narrow; fractional or out-of-range raise range
        // errors; strict mode refuses the float64 tag outright.
        assert_eq!(transfer::<i32>(&Value::Number(7.0)).unwrap(), 7);
        assert!(matches!(
            transfer::<i32>(&Value::Number(7.5)),
            Err(TransferError::Range(_))
        ));
        assert!(matches!(
            transfer::<i32>(&Value::Number(2_147_483_648.0)),
            Err(TransferError::Range(_))
        ));
        assert_eq!(transfer::<i32>(&Value::Number(-2_147_483_648.0)).unwrap(), i32::MIN);
        assert!(matches!(
            transfer_strict::<i32>(&Value::Number(7.0)),
            Err(TransferError::Type(_))
        ));
        assert_eq!(transfer_strict::<i32>(&Value::Int32(7)).unwrap(), 7);
    }

    #[test]
    fn f64_passes_non_finite() {
        assert!(transfer::<f64>(&Value::Number(f64::NAN)).unwrap().is_nan());
        assert_eq!(
            transfer::<f64>(&Value::Number(f64::INFINITY)).unwrap(),
            f64::INFINITY
        );
    }

    #[test]
    fn bigint_paths() {
        assert_eq!(transfer::<u64>(&Value::BigInt(BigIntValue::from_u64(0))).unwrap(), 0);
        let wide = BigIntValue::from_words(false, &[1, 1]);
        assert!(matches!(
            transfer::<u64>(&Value::BigInt(wide)),
            Err(TransferError::Range(_))
        ));
    }

    #[test]
    fn containers_recurse() {
        let value = Value::List(vec![Value::Int32(1), Value::Int32(2)]);
        assert_eq!(transfer::<Vec<i32>>(&value).unwrap(), vec![1, 2]);

        let mut map = Dictionary::new();
        map.insert("a".into(), Value::Int32(1));
        map.insert("b".into(), Value::string("two"));
        let round = to_value(&Value::Dictionary(map.clone())).unwrap();
        assert_eq!(round, Value::Dictionary(map));
    }

    #[test]
    fn unknown_tag_is_a_type_error() {
        assert!(matches!(
            transfer::<Vec<i32>>(&Value::Boolean(true)),
            Err(TransferError::Type(_))
        ));
    }

    #[test]
    fn tuples_mirror_positional_arguments() {
        let value = Value::List(vec![Value::Int32(1), Value::string("x"), Value::Boolean(true)]);
        let tuple: (i32, String, bool) = transfer(&value).unwrap();
        assert_eq!(tuple, (1, "x".to_string(), true));

        let short = Value::List(vec![Value::Int32(1)]);
        assert!(transfer::<(i32, i32)>(&short).is_err());

        let visited = to_value(&(4i32, "y".to_string())).unwrap();
        assert_eq!(
            visited,
            Value::List(vec![Value::Int32(4), Value::string("y")])
        );
    }

    #[test]
    fn strict_equals_tolerant_when_exact() {
        let value = Value::Int32(9);
        assert_eq!(
            transfer_strict::<i32>(&value).unwrap(),
            transfer::<i32>(&value).unwrap()
        );
        let value = Value::string("s");
        assert_eq!(
            transfer_strict::<String>(&value).unwrap(),
            transfer::<String>(&value).unwrap()
        );
    }
}

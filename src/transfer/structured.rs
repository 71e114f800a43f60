//! Structured transfer shapes: structs with compile-time known property
//! names, discriminated unions, and tag-negotiated (undiscriminated)
//! unions.
//!
//! The macros below generate both halves of the pipeline for a plain Rust
//! declaration. A struct moves as an object with known keys; a
//! discriminated union reads its discriminant property and dispatches to
//! the single matching alternative; an untagged union tries each
//! alternative's acceptor against the incoming value in declaration order
//! (so list primitives before object shapes).

use crate::types::{Dictionary, Value};

use super::{Accept, Entries, TransferError, TransferResult, ValueAcceptor};

/// Buffer a streamed entries source into an order-preserving dictionary.
/// Structured acceptors are two-pass (find the discriminant, then build
/// the fields), and streamed sources are single-pass.
pub fn buffer_entries<E: Entries>(mut entries: E) -> TransferResult<Dictionary> {
    let mut map = Dictionary::with_capacity(entries.size_hint().unwrap_or(0));
    while let Some((key, value)) = entries.next_with(ValueAcceptor)? {
        map.insert(key, value);
    }
    Ok(map)
}

/// Acceptor driven by a field-builder closure; the macro supplies one per
/// generated type.
pub struct KeyedAcceptor<T> {
    strict: bool,
    expecting: &'static str,
    build: fn(&Dictionary, bool) -> TransferResult<T>,
}

impl<T> KeyedAcceptor<T> {
    pub fn new(
        strict: bool,
        expecting: &'static str,
        build: fn(&Dictionary, bool) -> TransferResult<T>,
    ) -> Self {
        Self { strict, expecting, build }
    }
}

impl<T> Accept for KeyedAcceptor<T> {
    type Output = T;

    fn expecting(&self) -> &'static str {
        self.expecting
    }

    fn dictionary<E: Entries>(self, entries: E) -> TransferResult<T> {
        let buffered = buffer_entries(entries)?;
        (self.build)(&buffered, self.strict)
    }
}

/// Acceptor for tag-negotiated unions: any incoming tag is materialized
/// as a [`Value`] and offered to the builder, which tries each
/// alternative in declaration order.
pub struct NegotiatingAcceptor<T> {
    strict: bool,
    expecting: &'static str,
    build: fn(&Value, bool) -> TransferResult<T>,
}

impl<T> NegotiatingAcceptor<T> {
    pub fn new(
        strict: bool,
        expecting: &'static str,
        build: fn(&Value, bool) -> TransferResult<T>,
    ) -> Self {
        Self { strict, expecting, build }
    }

    fn build(self, value: Value) -> TransferResult<T> {
        (self.build)(&value, self.strict)
    }
}

impl<T> Accept for NegotiatingAcceptor<T> {
    type Output = T;

    fn expecting(&self) -> &'static str {
        self.expecting
    }

    fn undefined(self) -> TransferResult<T> {
        self.build(Value::Undefined)
    }

    fn null(self) -> TransferResult<T> {
        self.build(Value::Null)
    }

    fn boolean(self, value: bool) -> TransferResult<T> {
        self.build(Value::Boolean(value))
    }

    fn int32(self, value: i32) -> TransferResult<T> {
        self.build(Value::Int32(value))
    }

    fn number(self, value: f64) -> TransferResult<T> {
        self.build(Value::Number(value))
    }

    fn bigint(self, value: crate::types::BigIntValue) -> TransferResult<T> {
        self.build(Value::BigInt(value))
    }

    fn string(self, value: crate::types::StringValue) -> TransferResult<T> {
        self.build(Value::String(value))
    }

    fn date(self, epoch_ms: f64) -> TransferResult<T> {
        self.build(Value::Date(epoch_ms))
    }

    fn error(self, value: crate::types::ErrorValue) -> TransferResult<T> {
        self.build(Value::Error(value))
    }

    fn list<S: super::Sequence>(self, sequence: S) -> TransferResult<T> {
        let value = ValueAcceptor.list(sequence)?;
        self.build(value)
    }

    fn dictionary<E: Entries>(self, entries: E) -> TransferResult<T> {
        let value = ValueAcceptor.dictionary(entries)?;
        self.build(value)
    }
}

/// Fetch a field value, reading a missing property as `undefined`.
pub fn field<'map>(map: &'map Dictionary, key: &str) -> &'map Value {
    map.get(key).unwrap_or(&Value::Undefined)
}

/// Read and validate a union discriminant property.
pub fn discriminant<'map>(map: &'map Dictionary, key: &str) -> TransferResult<String> {
    match field(map, key) {
        Value::String(text) => Ok(text.to_utf8_lossy()),
        Value::Undefined => Err(TransferError::Type(format!(
            "missing discriminant property \"{key}\""
        ))),
        other => Err(TransferError::Type(format!(
            "discriminant property \"{key}\" must be a string, found {}",
            other.tag().name()
        ))),
    }
}

/// Declare a struct whose property names are known at compile time and
/// wire it into the transfer pipeline.
///
/// ```
/// isolet::transfer_struct! {
///     pub struct Point {
///         pub x: f64,
///         pub y: f64,
///     }
/// }
/// ```
#[macro_export]
macro_rules! transfer_struct {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $( $(#[$field_meta:meta])* pub $field:ident : $field_ty:ty ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name {
            $( $(#[$field_meta])* pub $field: $field_ty, )+
        }

        impl $crate::transfer::IntoTransfer for $name {
            fn visit_into<A: $crate::transfer::Accept>(
                &self,
                acceptor: A,
            ) -> $crate::transfer::TransferResult<A::Output> {
                let mut map = $crate::types::Dictionary::new();
                $(
                    map.insert(
                        stringify!($field).to_owned(),
                        $crate::transfer::to_value(&self.$field)?,
                    );
                )+
                $crate::transfer::IntoTransfer::visit_into(
                    &$crate::types::Value::Dictionary(map),
                    acceptor,
                )
            }
        }

        impl $crate::transfer::FromTransfer for $name {
            type Acceptor = $crate::transfer::structured::KeyedAcceptor<$name>;

            fn acceptor() -> Self::Acceptor {
                $crate::transfer::structured::KeyedAcceptor::new(
                    false,
                    stringify!($name),
                    <$name>::accept_fields,
                )
            }

            fn strict_acceptor() -> Self::Acceptor {
                $crate::transfer::structured::KeyedAcceptor::new(
                    true,
                    stringify!($name),
                    <$name>::accept_fields,
                )
            }
        }

        impl $name {
            fn accept_fields(
                map: &$crate::types::Dictionary,
                strict: bool,
            ) -> $crate::transfer::TransferResult<Self> {
                Ok(Self {
                    $(
                        $field: $crate::transfer::from_value::<$field_ty>(
                            $crate::transfer::structured::field(map, stringify!($field)),
                            strict,
                        ).map_err(|error| $crate::transfer::TransferError::Type(format!(
                            "property \"{}\": {error}", stringify!($field)
                        )))?,
                    )+
                })
            }
        }
    };
}

/// Declare a discriminated union. The discriminant property selects the
/// single matching alternative; an unknown discriminant is a type error.
/// The wire form is `{ <discriminant>: "<name>", ...fields }`.
///
/// ```
/// isolet::transfer_struct! {
///     pub struct Circle { pub radius: f64 }
/// }
/// isolet::transfer_struct! {
///     pub struct Square { pub side: f64 }
/// }
/// isolet::transfer_union! {
///     pub enum Shape ["type"] {
///         "circle" => Circle(Circle),
///         "square" => Square(Square),
///     }
/// }
/// ```
#[macro_export]
macro_rules! transfer_union {
    (
        $(#[$meta:meta])*
        pub enum $name:ident [$discriminant:literal] {
            $( $tag:literal => $variant:ident ( $alt_ty:ty ) ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub enum $name {
            $( $variant($alt_ty), )+
        }

        impl $crate::transfer::IntoTransfer for $name {
            fn visit_into<A: $crate::transfer::Accept>(
                &self,
                acceptor: A,
            ) -> $crate::transfer::TransferResult<A::Output> {
                let mut map = $crate::types::Dictionary::new();
                map.insert(
                    $discriminant.to_owned(),
                    $crate::types::Value::string($crate::transfer_union!(@tag self, $name, $($tag => $variant),+)),
                );
                let fields = match self {
                    $( $name::$variant(alternative) => $crate::transfer::to_value(alternative)?, )+
                };
                if let $crate::types::Value::Dictionary(field_map) = fields {
                    for (key, value) in field_map {
                        map.insert(key, value);
                    }
                }
                $crate::transfer::IntoTransfer::visit_into(
                    &$crate::types::Value::Dictionary(map),
                    acceptor,
                )
            }
        }

        impl $crate::transfer::FromTransfer for $name {
            type Acceptor = $crate::transfer::structured::KeyedAcceptor<$name>;

            fn acceptor() -> Self::Acceptor {
                $crate::transfer::structured::KeyedAcceptor::new(
                    false,
                    stringify!($name),
                    <$name>::accept_alternative,
                )
            }

            fn strict_acceptor() -> Self::Acceptor {
                $crate::transfer::structured::KeyedAcceptor::new(
                    true,
                    stringify!($name),
                    <$name>::accept_alternative,
                )
            }
        }

        impl $name {
            fn accept_alternative(
                map: &$crate::types::Dictionary,
                strict: bool,
            ) -> $crate::transfer::TransferResult<Self> {
                let tag = $crate::transfer::structured::discriminant(map, $discriminant)?;
                let value = $crate::types::Value::Dictionary(map.clone());
                match tag.as_str() {
                    $(
                        $tag => Ok($name::$variant(
                            $crate::transfer::from_value::<$alt_ty>(&value, strict)?,
                        )),
                    )+
                    other => Err($crate::transfer::TransferError::Type(format!(
                        "Unknown discriminant: {other}"
                    ))),
                }
            }
        }
    };
    (@tag $self_:ident, $name:ident, $($tag:literal => $variant:ident),+) => {
        match $self_ {
            $( $name::$variant(_) => $tag, )+
        }
    };
}

/// Declare a union without a discriminant. Alternatives are negotiated by
/// tag: each acceptor is tried in declaration order against the incoming
/// value, so primitives must be listed before object shapes.
#[macro_export]
macro_rules! transfer_union_untagged {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $variant:ident ( $alt_ty:ty ) ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub enum $name {
            $( $variant($alt_ty), )+
        }

        impl $crate::transfer::IntoTransfer for $name {
            fn visit_into<A: $crate::transfer::Accept>(
                &self,
                acceptor: A,
            ) -> $crate::transfer::TransferResult<A::Output> {
                match self {
                    $(
                        $name::$variant(alternative) =>
                            $crate::transfer::IntoTransfer::visit_into(alternative, acceptor),
                    )+
                }
            }
        }

        impl $crate::transfer::FromTransfer for $name {
            type Acceptor = $crate::transfer::structured::NegotiatingAcceptor<$name>;

            fn acceptor() -> Self::Acceptor {
                $crate::transfer::structured::NegotiatingAcceptor::new(
                    false,
                    stringify!($name),
                    <$name>::accept_negotiated,
                )
            }

            fn strict_acceptor() -> Self::Acceptor {
                $crate::transfer::structured::NegotiatingAcceptor::new(
                    true,
                    stringify!($name),
                    <$name>::accept_negotiated,
                )
            }
        }

        impl $name {
            fn accept_negotiated(
                value: &$crate::types::Value,
                strict: bool,
            ) -> $crate::transfer::TransferResult<Self> {
                $(
                    if let Ok(alternative) =
                        $crate::transfer::from_value::<$alt_ty>(value, strict)
                    {
                        return Ok($name::$variant(alternative));
                    }
                )+
                Err($crate::transfer::TransferError::Type(format!(
                    "no alternative of {} accepts the value",
                    stringify!($name)
                )))
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::transfer::{from_value, to_value, transfer, TransferError};
    use crate::types::Value;

    crate::transfer_struct! {
        pub struct Fill {
            pub color: String,
            pub width: f64,
        }
    }

    crate::transfer_struct! {
        pub struct AltA {
            pub one: f64,
        }
    }

    crate::transfer_struct! {
        pub struct AltB {
            pub two: String,
        }
    }

    crate::transfer_union! {
        pub enum Alternatives ["type"] {
            "a" => A(AltA),
            "b" => B(AltB),
        }
    }

    fn object(entries: &[(&str, Value)]) -> Value {
        let mut map = crate::types::Dictionary::new();
        for (key, value) in entries {
            map.insert((*key).to_owned(), value.clone());
        }
        Value::Dictionary(map)
    }

    #[test]
    fn struct_round_trip() {
        let fill = Fill { color: "teal".into(), width: 2.5 };
        let wire = to_value(&fill).unwrap();
        assert_eq!(
            wire,
            object(&[("color", Value::string("teal")), ("width", Value::Number(2.5))])
        );
        assert_eq!(from_value::<Fill>(&wire, false).unwrap(), fill);
    }

    #[test]
    fn struct_reports_offending_property() {
        let wire = object(&[("color", Value::Int32(1)), ("width", Value::Number(1.0))]);
        let error = from_value::<Fill>(&wire, false).unwrap_err();
        assert!(error.to_string().contains("\"color\""));
    }

    #[test]
    fn union_dispatches_on_discriminant() {
        let wire = object(&[("type", Value::string("b")), ("two", Value::string("hello"))]);
        let accepted: Alternatives = transfer(&wire).unwrap();
        assert_eq!(accepted, Alternatives::B(AltB { two: "hello".into() }));
    }

    #[test]
    fn union_rejects_unknown_discriminant() {
        let wire = object(&[("type", Value::string("c"))]);
        let error = transfer::<Alternatives>(&wire).unwrap_err();
        match error {
            TransferError::Type(message) => {
                assert!(message.contains("Unknown discriminant"), "{message}");
            }
            other => panic!("expected type error, got {other:?}"),
        }
    }

    #[test]
    fn union_wire_form_leads_with_discriminant() {
        let value = Alternatives::A(AltA { one: 1.0 });
        let wire = to_value(&value).unwrap();
        match wire {
            Value::Dictionary(map) => {
                let mut keys = map.keys();
                assert_eq!(keys.next().map(String::as_str), Some("type"));
                assert_eq!(map.get("type"), Some(&Value::string("a")));
                assert_eq!(map.get("one"), Some(&Value::Number(1.0)));
            }
            other => panic!("expected dictionary, got {other:?}"),
        }
    }

    crate::transfer_union_untagged! {
        pub enum Loose {
            Fill(Fill),
            Alt(AltA),
        }
    }

    #[test]
    fn untagged_union_negotiates_in_order() {
        let wire = object(&[("one", Value::Number(3.0))]);
        let accepted: Loose = transfer(&wire).unwrap();
        assert_eq!(accepted, Loose::Alt(AltA { one: 3.0 }));
    }

    crate::transfer_union_untagged! {
        pub enum NumberOrText {
            Number(f64),
            Text(String),
        }
    }

    #[test]
    fn untagged_union_admits_primitives() {
        assert_eq!(
            transfer::<NumberOrText>(&Value::Int32(4)).unwrap(),
            NumberOrText::Number(4.0)
        );
        assert_eq!(
            transfer::<NumberOrText>(&Value::string("four")).unwrap(),
            NumberOrText::Text("four".into())
        );
        assert!(transfer::<NumberOrText>(&Value::Boolean(true)).is_err());
    }
}

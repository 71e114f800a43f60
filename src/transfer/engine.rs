//! Bridges between engine values and the transfer pipeline.
//!
//! [`JsVisit`] decomposes a boa `JsValue` and drives any acceptor;
//! [`JsAcceptor`] constructs engine values from any transfer source. Both
//! halves optionally carry reference-graph state: the visitor probes an
//! identity map and emits reference tokens for repeat objects, the
//! acceptor materializes storage slots into engine objects *before*
//! populating their children so cyclic graphs terminate.

use boa_engine::object::builtins::{JsArray, JsDate, JsFunction, JsPromise};
use boa_engine::object::ObjectInitializer;
use boa_engine::{Context, JsError, JsNativeError, JsObject, JsString, JsValue};

use crate::transfer::graph::{ReferenceStorage, ReferentialValue};
use crate::transfer::{Accept, Entries, Sequence, TransferError, TransferResult, Visit};
use crate::types::{BigIntValue, ErrorValue, ReferenceIndex, StringValue, Tag, Value};

fn engine_failure(error: impl std::fmt::Display) -> TransferError {
    TransferError::Type(format!("engine error during transfer: {error}"))
}

/// Project a pending engine exception into a structured error value.
/// The catch scope reads the message (and any `name`/`stack` the error
/// object carries) and renders it for the host.
pub(crate) fn error_value_from_js(error: &JsError, context: &mut Context) -> ErrorValue {
    // Try the structured route first: an Error instance with name,
    // message and stack properties.
    let opaque = error.to_opaque(context);
    if let Some(object) = opaque.as_object() {
        let read = |key: &str, context: &mut Context| -> Option<String> {
            let value = object.get(JsString::from(key), context).ok()?;
            let string = value.as_string()?;
            Some(string.to_std_string_escaped())
        };
        if let Some(message) = read("message", context) {
            let kind = read("name", context).unwrap_or_else(|| "Error".into());
            let stack = read("stack", context).unwrap_or_default();
            return ErrorValue { kind, message, stack };
        }
    }

    // Fall back to the rendered form, `Kind: message`.
    let rendered = error.to_string();
    match rendered.split_once(": ") {
        Some((kind, message)) if kind.ends_with("Error") => {
            ErrorValue::new(kind.to_owned(), message.to_owned())
        }
        _ => ErrorValue::new("Error", rendered),
    }
}

fn classify_string(string: &JsString) -> StringValue {
    match string.to_std_string() {
        Ok(text) => {
            if text.chars().all(|c| (c as u32) <= 0xFF) {
                StringValue::Latin1(text.chars().map(|c| c as u8).collect())
            } else {
                StringValue::Utf16(text.encode_utf16().collect())
            }
        }
        // Unpaired surrogates: keep the escaped rendering in the wide
        // representation.
        Err(_) => StringValue::Utf16(string.to_std_string_escaped().encode_utf16().collect()),
    }
}

/// Identity map and storage for one reference-preserving visit.
pub(crate) struct GraphState {
    seen: Vec<(JsObject, ReferenceIndex)>,
    storage: ReferenceStorage,
}

impl GraphState {
    fn new() -> Self {
        Self { seen: Vec::new(), storage: ReferenceStorage::new() }
    }

    fn lookup(&self, object: &JsObject) -> Option<ReferenceIndex> {
        self.seen
            .iter()
            .find(|(seen, _)| seen == object)
            .map(|(_, index)| *index)
    }
}

/// A boa value acting as a transfer source.
pub struct JsVisit<'a> {
    value: &'a JsValue,
    context: &'a mut Context,
}

impl<'a> JsVisit<'a> {
    pub fn new(value: &'a JsValue, context: &'a mut Context) -> Self {
        Self { value, context }
    }
}

impl<'a> Visit for JsVisit<'a> {
    fn visit<A: Accept>(self, acceptor: A) -> TransferResult<A::Output> {
        visit_js(self.value, self.context, None, acceptor)
    }
}

struct ArraySource<'a> {
    object: JsObject,
    length: u32,
    index: u32,
    context: &'a mut Context,
    graph: Option<&'a mut GraphState>,
}

impl<'a> Sequence for ArraySource<'a> {
    fn size_hint(&self) -> Option<usize> {
        Some(self.length as usize)
    }

    fn next_with<A: Accept>(&mut self, acceptor: A) -> TransferResult<Option<A::Output>> {
        if self.index >= self.length {
            return Ok(None);
        }
        let index = self.index;
        self.index += 1;
        let element = self
            .object
            .get(index, self.context)
            .map_err(engine_failure)?;
        visit_js(&element, self.context, self.graph.as_deref_mut(), acceptor).map(Some)
    }
}

struct ObjectSource<'a> {
    object: JsObject,
    keys: std::vec::IntoIter<String>,
    context: &'a mut Context,
    graph: Option<&'a mut GraphState>,
}

impl<'a> Entries for ObjectSource<'a> {
    fn size_hint(&self) -> Option<usize> {
        Some(self.keys.len())
    }

    fn next_with<A: Accept>(&mut self, acceptor: A) -> TransferResult<Option<(String, A::Output)>> {
        let Some(key) = self.keys.next() else {
            return Ok(None);
        };
        let value = self
            .object
            .get(JsString::from(key.as_str()), self.context)
            .map_err(engine_failure)?;
        let accepted = visit_js(&value, self.context, self.graph.as_deref_mut(), acceptor)?;
        Ok(Some((key, accepted)))
    }
}

/// Enumerable own string keys in property order, via the realm's
/// `Object.keys`.
fn own_keys(object: &JsObject, context: &mut Context) -> TransferResult<Vec<String>> {
    let object_ctor = context.intrinsics().constructors().object().constructor();
    let keys_fn = object_ctor
        .get(JsString::from("keys"), context)
        .map_err(engine_failure)?;
    let keys_fn = keys_fn
        .as_object()
        .cloned()
        .and_then(|f| JsFunction::from_object(f))
        .ok_or_else(|| engine_failure("Object.keys is not callable"))?;
    let keys = keys_fn
        .call(
            &JsValue::from(object_ctor),
            &[JsValue::from(object.clone())],
            context,
        )
        .map_err(engine_failure)?;
    let keys = keys
        .as_object()
        .cloned()
        .ok_or_else(|| engine_failure("Object.keys returned a non-object"))?;
    let length = keys
        .get(JsString::from("length"), context)
        .map_err(engine_failure)?
        .to_number(context)
        .map_err(engine_failure)? as u32;
    let mut names = Vec::with_capacity(length as usize);
    for index in 0..length {
        let key = keys.get(index, context).map_err(engine_failure)?;
        if let Some(key) = key.as_string() {
            names.push(key.to_std_string_escaped());
        }
    }
    Ok(names)
}

fn is_error_object(value: &JsValue, context: &mut Context) -> bool {
    let error_ctor = context.intrinsics().constructors().error().constructor();
    value
        .instance_of(&JsValue::from(error_ctor), context)
        .unwrap_or(false)
}

fn constructor_name(object: &JsObject, context: &mut Context) -> Option<String> {
    let ctor = object.get(JsString::from("constructor"), context).ok()?;
    let name = ctor
        .as_object()?
        .get(JsString::from("name"), context)
        .ok()?;
    Some(name.as_string()?.to_std_string_escaped())
}

/// Classify the buffer family by constructor name; payload extraction is
/// out of scope, so these surface as typed rejections.
fn buffer_tag(object: &JsObject, context: &mut Context) -> Option<Tag> {
    use crate::types::TypedArrayKind::*;
    let name = constructor_name(object, context)?;
    let tag = match name.as_str() {
        "ArrayBuffer" => Tag::ArrayBuffer,
        "SharedArrayBuffer" => Tag::SharedArrayBuffer,
        "DataView" => Tag::DataView,
        "Int8Array" => Tag::TypedArray(Int8),
        "Uint8Array" => Tag::TypedArray(Uint8),
        "Uint8ClampedArray" => Tag::TypedArray(Uint8Clamped),
        "Int16Array" => Tag::TypedArray(Int16),
        "Uint16Array" => Tag::TypedArray(Uint16),
        "Int32Array" => Tag::TypedArray(Int32),
        "Uint32Array" => Tag::TypedArray(Uint32),
        "Float32Array" => Tag::TypedArray(Float32),
        "Float64Array" => Tag::TypedArray(Float64),
        _ => return None,
    };
    Some(tag)
}

fn visit_object<A: Accept>(
    value: &JsValue,
    object: &JsObject,
    context: &mut Context,
    mut graph: Option<&mut GraphState>,
    acceptor: A,
) -> TransferResult<A::Output> {
    if JsPromise::from_object(object.clone()).is_ok() {
        return acceptor.other(Tag::Promise);
    }
    if constructor_name(object, context).as_deref() == Some("Date") {
        let epoch_ms = value.to_number(context).map_err(engine_failure)?;
        return acceptor.date(epoch_ms);
    }
    if is_error_object(value, context) {
        let error = JsError::from_opaque(value.clone());
        let projected = error_value_from_js(&error, context);
        return acceptor.error(projected);
    }
    if object.is_callable() {
        return acceptor.other(Tag::Class);
    }
    if let Some(tag) = buffer_tag(object, context) {
        return acceptor.other(tag);
    }

    // Reference map probe: repeat objects become tokens; new objects are
    // registered before their children are visited.
    if let Some(state) = graph.as_deref_mut() {
        if let Some(index) = state.lookup(object) {
            return acceptor.reference(index);
        }
        let index = state.storage.allocate();
        state.seen.push((object.clone(), index));
        let materialized = visit_container(
            value,
            object,
            context,
            Some(&mut *state),
            crate::transfer::ValueAcceptor,
        )?;
        state.storage.publish(index, materialized);
        return acceptor.reference(index);
    }

    visit_container(value, object, context, None, acceptor)
}

fn visit_container<A: Accept>(
    _value: &JsValue,
    object: &JsObject,
    context: &mut Context,
    graph: Option<&mut GraphState>,
    acceptor: A,
) -> TransferResult<A::Output> {
    if constructor_name(object, context).as_deref() == Some("Array") {
        let length = object
            .get(JsString::from("length"), context)
            .map_err(engine_failure)?
            .to_number(context)
            .map_err(engine_failure)? as u32;
        return acceptor.list(ArraySource {
            object: object.clone(),
            length,
            index: 0,
            context,
            graph,
        });
    }

    let keys = own_keys(object, context)?;
    acceptor.dictionary(ObjectSource {
        object: object.clone(),
        keys: keys.into_iter(),
        context,
        graph,
    })
}

fn visit_js<A: Accept>(
    value: &JsValue,
    context: &mut Context,
    graph: Option<&mut GraphState>,
    acceptor: A,
) -> TransferResult<A::Output> {
    if value.is_undefined() {
        return acceptor.undefined();
    }
    if value.is_null() {
        return acceptor.null();
    }
    if let Some(boolean) = value.as_boolean() {
        return acceptor.boolean(boolean);
    }
    if let Some(number) = value.as_number() {
        // Integer-representable doubles carry the int32 tag, mirroring
        // the engine's small-integer representation. Negative zero stays
        // a double.
        let as_int = number as i32;
        if f64::from(as_int) == number && !(number == 0.0 && number.is_sign_negative()) {
            return acceptor.int32(as_int);
        }
        return acceptor.number(number);
    }
    if let Some(string) = value.as_string() {
        return acceptor.string(classify_string(string));
    }
    if let Some(bigint) = value.as_bigint() {
        let decimal = bigint.to_string();
        let parsed = BigIntValue::from_decimal(&decimal)
            .ok_or_else(|| engine_failure("bigint rendering was not decimal"))?;
        return acceptor.bigint(parsed);
    }
    if value.as_symbol().is_some() {
        return acceptor.symbol();
    }
    if let Some(object) = value.as_object() {
        let object = object.clone();
        return visit_object(value, &object, context, graph, acceptor);
    }
    acceptor.other(Tag::External)
}

/// Transfer an engine value out as a [`Value`] tree (throwing policy).
pub fn value_from_js(value: &JsValue, context: &mut Context) -> TransferResult<Value> {
    visit_js(value, context, None, crate::transfer::ValueAcceptor)
}

/// Transfer an engine value out into any host target type.
pub fn from_js<T: crate::transfer::FromTransfer>(
    value: &JsValue,
    context: &mut Context,
) -> TransferResult<T> {
    visit_js(value, context, None, T::acceptor())
}

/// Reference-preserving transfer out of the engine: shared and cyclic
/// substructures become reference tokens resolved by the carried storage.
pub fn graph_from_js(
    value: &JsValue,
    context: &mut Context,
) -> TransferResult<ReferentialValue> {
    let mut state = GraphState::new();
    let root = visit_js(value, context, Some(&mut state), crate::transfer::ValueAcceptor)?;
    Ok(ReferentialValue { value: root, references: state.storage })
}

// ---- Host → engine ----

struct JsGraphBinding<'a> {
    storage: &'a ReferenceStorage,
    cache: Vec<Option<JsValue>>,
}

/// An acceptor constructing engine values inside a realm. Reference
/// tokens are rejected here; reference-preserving graphs go through
/// [`graph_to_js`], which resolves tokens against their storage.
pub struct JsAcceptor<'a> {
    context: &'a mut Context,
}

impl<'a> JsAcceptor<'a> {
    pub fn new(context: &'a mut Context) -> Self {
        Self { context }
    }

    fn reborrow(&mut self) -> JsAcceptor<'_> {
        JsAcceptor { context: self.context }
    }
}

impl<'a> Accept for JsAcceptor<'a> {
    type Output = JsValue;

    fn expecting(&self) -> &'static str {
        "an engine value"
    }

    fn undefined(self) -> TransferResult<JsValue> {
        Ok(JsValue::undefined())
    }

    fn null(self) -> TransferResult<JsValue> {
        Ok(JsValue::null())
    }

    fn boolean(self, value: bool) -> TransferResult<JsValue> {
        Ok(JsValue::from(value))
    }

    fn int32(self, value: i32) -> TransferResult<JsValue> {
        Ok(JsValue::from(value))
    }

    fn number(self, value: f64) -> TransferResult<JsValue> {
        Ok(JsValue::from(value))
    }

    fn bigint(self, value: BigIntValue) -> TransferResult<JsValue> {
        let bigint = boa_engine::JsBigInt::from_string(&value.to_decimal())
            .ok_or_else(|| engine_failure("bigint decimal form rejected"))?;
        Ok(JsValue::from(bigint))
    }

    fn string(self, value: StringValue) -> TransferResult<JsValue> {
        Ok(JsValue::from(JsString::from(value.to_utf8_lossy().as_str())))
    }

    fn date(self, epoch_ms: f64) -> TransferResult<JsValue> {
        let date = JsDate::new(self.context);
        date.set_time(epoch_ms, self.context)
            .map_err(engine_failure)?;
        Ok(JsValue::from(date))
    }

    fn error(self, value: ErrorValue) -> TransferResult<JsValue> {
        let native = match value.kind.as_str() {
            "TypeError" => JsNativeError::typ(),
            "RangeError" => JsNativeError::range(),
            "SyntaxError" => JsNativeError::syntax(),
            "ReferenceError" => JsNativeError::reference(),
            _ => JsNativeError::error(),
        }
        .with_message(value.message.clone());
        let opaque = JsError::from_native(native).to_opaque(self.context);
        if !value.stack.is_empty() {
            if let Some(object) = opaque.as_object() {
                object
                    .set(
                        JsString::from("stack"),
                        JsValue::from(JsString::from(value.stack.as_str())),
                        true,
                        self.context,
                    )
                    .map_err(engine_failure)?;
            }
        }
        Ok(opaque)
    }

    fn list<S: Sequence>(mut self, mut sequence: S) -> TransferResult<JsValue> {
        let array = JsArray::new(self.context);
        while let Some(element) = sequence.next_with(self.reborrow())? {
            array.push(element, self.context).map_err(engine_failure)?;
        }
        Ok(JsValue::from(array))
    }

    fn dictionary<E: Entries>(mut self, mut entries: E) -> TransferResult<JsValue> {
        let object = ObjectInitializer::new(self.context).build();
        while let Some((key, element)) = entries.next_with(self.reborrow())? {
            object
                .set(JsString::from(key.as_str()), element, true, self.context)
                .map_err(engine_failure)?;
        }
        Ok(JsValue::from(object))
    }

    fn reference(self, _index: ReferenceIndex) -> TransferResult<JsValue> {
        Err(TransferError::Type(
            "reference token outside of a reference-preserving transfer".into(),
        ))
    }
}

/// Resolve a reference token against storage, constructing each unique
/// object exactly once. Containers are cached before their children are
/// filled (the deferred-receiver step), so cycles terminate.
fn materialize_reference(
    index: ReferenceIndex,
    binding: &mut JsGraphBinding<'_>,
    context: &mut Context,
) -> TransferResult<JsValue> {
    if let Some(Some(cached)) = binding.cache.get(index.0 as usize) {
        return Ok(cached.clone());
    }
    let Some(stored) = binding.storage.resolve(index) else {
        return Err(TransferError::Type(format!(
            "reference token {} has no storage slot",
            index.0
        )));
    };
    let stored = stored.clone();
    match stored {
        Value::List(items) => {
            let array = JsArray::new(context);
            binding.cache[index.0 as usize] = Some(JsValue::from(array.clone()));
            for item in &items {
                let element = convert_graph_value(item, binding, context)?;
                array.push(element, context).map_err(engine_failure)?;
            }
            Ok(JsValue::from(array))
        }
        Value::Dictionary(map) => {
            let object = ObjectInitializer::new(context).build();
            binding.cache[index.0 as usize] = Some(JsValue::from(object.clone()));
            for (key, item) in &map {
                let element = convert_graph_value(item, binding, context)?;
                object
                    .set(JsString::from(key.as_str()), element, true, context)
                    .map_err(engine_failure)?;
            }
            Ok(JsValue::from(object))
        }
        other => {
            let converted = convert_graph_value(&other, binding, context)?;
            binding.cache[index.0 as usize] = Some(converted.clone());
            Ok(converted)
        }
    }
}

fn convert_graph_value(
    value: &Value,
    binding: &mut JsGraphBinding<'_>,
    context: &mut Context,
) -> TransferResult<JsValue> {
    match value {
        Value::Reference(index) => materialize_reference(*index, binding, context),
        Value::List(items) => {
            let array = JsArray::new(context);
            for item in items {
                let element = convert_graph_value(item, binding, context)?;
                array.push(element, context).map_err(engine_failure)?;
            }
            Ok(JsValue::from(array))
        }
        Value::Dictionary(map) => {
            let object = ObjectInitializer::new(context).build();
            for (key, item) in map {
                let element = convert_graph_value(item, binding, context)?;
                object
                    .set(JsString::from(key.as_str()), element, true, context)
                    .map_err(engine_failure)?;
            }
            Ok(JsValue::from(object))
        }
        leaf => {
            use crate::transfer::IntoTransfer;
            leaf.visit_into(JsAcceptor::new(context))
        }
    }
}

/// Transfer a host value tree into the engine. Reference tokens are
/// rejected here; use [`graph_to_js`] for reference-preserving graphs.
pub fn value_to_js(value: &Value, context: &mut Context) -> TransferResult<JsValue> {
    use crate::transfer::IntoTransfer;
    value.visit_into(JsAcceptor::new(context))
}

/// Reference-preserving transfer into the engine: tokens resolve against
/// the carried storage and shared identity is reproduced.
pub fn graph_to_js(
    value: &ReferentialValue,
    context: &mut Context,
) -> TransferResult<JsValue> {
    let mut binding = JsGraphBinding {
        storage: &value.references,
        cache: vec![None; value.references.len()],
    };
    convert_graph_value(&value.value, &mut binding, context)
}

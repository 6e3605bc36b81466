//! Shape probe: walks a value's `Serialize` impl without producing output and
//! decides which encoding can reproduce it exactly.

use std::fmt;

use serde::ser::{self, Serialize};

/// What the probe learned about a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Shape {
    /// A bare string or char at the top level.
    Text,
    /// Scalars, strings, sequences and string/integer keyed maps only.
    Structured,
    /// Anything JSON would not reproduce exactly.
    Opaque,
}

pub(crate) fn classify<T: Serialize + ?Sized>(value: &T) -> Shape {
    match value.serialize(Probe::top()) {
        Ok(Kind::Text) => Shape::Text,
        Ok(Kind::Plain) => Shape::Structured,
        Err(NotPlain) => Shape::Opaque,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Text,
    Plain,
}

#[derive(Debug)]
struct NotPlain;

impl fmt::Display for NotPlain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("value has no exact JSON representation")
    }
}

impl std::error::Error for NotPlain {}

impl ser::Error for NotPlain {
    fn custom<M: fmt::Display>(_msg: M) -> Self {
        NotPlain
    }
}

#[derive(Clone, Copy)]
struct Probe {
    top: bool,
    // Inside `Some(..)`: a null-like payload would collapse to `None` in JSON.
    in_option: bool,
}

impl Probe {
    fn top() -> Self {
        Probe {
            top: true,
            in_option: false,
        }
    }

    fn nested() -> Self {
        Probe {
            top: false,
            in_option: false,
        }
    }

    fn null_like(self) -> Result<Kind, NotPlain> {
        if self.in_option {
            Err(NotPlain)
        } else {
            Ok(Kind::Plain)
        }
    }

    fn float(value: f64) -> Result<Kind, NotPlain> {
        if value.is_finite() {
            Ok(Kind::Plain)
        } else {
            Err(NotPlain)
        }
    }
}

struct Compound;

impl Compound {
    fn element<T: Serialize + ?Sized>(value: &T) -> Result<(), NotPlain> {
        value.serialize(Probe::nested()).map(|_| ())
    }
}

impl ser::Serializer for Probe {
    type Ok = Kind;
    type Error = NotPlain;
    type SerializeSeq = Compound;
    type SerializeTuple = Compound;
    type SerializeTupleStruct = Compound;
    type SerializeTupleVariant = Compound;
    type SerializeMap = Compound;
    type SerializeStruct = Compound;
    type SerializeStructVariant = Compound;

    fn serialize_bool(self, _v: bool) -> Result<Kind, NotPlain> {
        Ok(Kind::Plain)
    }

    fn serialize_i8(self, _v: i8) -> Result<Kind, NotPlain> {
        Ok(Kind::Plain)
    }

    fn serialize_i16(self, _v: i16) -> Result<Kind, NotPlain> {
        Ok(Kind::Plain)
    }

    fn serialize_i32(self, _v: i32) -> Result<Kind, NotPlain> {
        Ok(Kind::Plain)
    }

    fn serialize_i64(self, _v: i64) -> Result<Kind, NotPlain> {
        Ok(Kind::Plain)
    }

    fn serialize_i128(self, _v: i128) -> Result<Kind, NotPlain> {
        Err(NotPlain)
    }

    fn serialize_u8(self, _v: u8) -> Result<Kind, NotPlain> {
        Ok(Kind::Plain)
    }

    fn serialize_u16(self, _v: u16) -> Result<Kind, NotPlain> {
        Ok(Kind::Plain)
    }

    fn serialize_u32(self, _v: u32) -> Result<Kind, NotPlain> {
        Ok(Kind::Plain)
    }

    fn serialize_u64(self, _v: u64) -> Result<Kind, NotPlain> {
        Ok(Kind::Plain)
    }

    fn serialize_u128(self, _v: u128) -> Result<Kind, NotPlain> {
        Err(NotPlain)
    }

    fn serialize_f32(self, v: f32) -> Result<Kind, NotPlain> {
        Probe::float(f64::from(v))
    }

    fn serialize_f64(self, v: f64) -> Result<Kind, NotPlain> {
        Probe::float(v)
    }

    fn serialize_char(self, _v: char) -> Result<Kind, NotPlain> {
        Ok(if self.top { Kind::Text } else { Kind::Plain })
    }

    fn serialize_str(self, _v: &str) -> Result<Kind, NotPlain> {
        Ok(if self.top { Kind::Text } else { Kind::Plain })
    }

    fn serialize_bytes(self, _v: &[u8]) -> Result<Kind, NotPlain> {
        Ok(Kind::Plain)
    }

    fn serialize_none(self) -> Result<Kind, NotPlain> {
        self.null_like()
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<Kind, NotPlain> {
        value
            .serialize(Probe {
                top: false,
                in_option: true,
            })
            .map(|_| Kind::Plain)
    }

    fn serialize_unit(self) -> Result<Kind, NotPlain> {
        self.null_like()
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Kind, NotPlain> {
        self.null_like()
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
    ) -> Result<Kind, NotPlain> {
        Ok(Kind::Plain)
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<Kind, NotPlain> {
        value
            .serialize(Probe {
                top: false,
                in_option: self.in_option,
            })
            .map(|_| Kind::Plain)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        value: &T,
    ) -> Result<Kind, NotPlain> {
        Compound::element(value).map(|_| Kind::Plain)
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Compound, NotPlain> {
        Ok(Compound)
    }

    fn serialize_tuple(self, _len: usize) -> Result<Compound, NotPlain> {
        Ok(Compound)
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Compound, NotPlain> {
        Ok(Compound)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Compound, NotPlain> {
        Ok(Compound)
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Compound, NotPlain> {
        Ok(Compound)
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<Compound, NotPlain> {
        Ok(Compound)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Compound, NotPlain> {
        Ok(Compound)
    }
}

impl ser::SerializeSeq for Compound {
    type Ok = Kind;
    type Error = NotPlain;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), NotPlain> {
        Compound::element(value)
    }

    fn end(self) -> Result<Kind, NotPlain> {
        Ok(Kind::Plain)
    }
}

impl ser::SerializeTuple for Compound {
    type Ok = Kind;
    type Error = NotPlain;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), NotPlain> {
        Compound::element(value)
    }

    fn end(self) -> Result<Kind, NotPlain> {
        Ok(Kind::Plain)
    }
}

impl ser::SerializeTupleStruct for Compound {
    type Ok = Kind;
    type Error = NotPlain;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), NotPlain> {
        Compound::element(value)
    }

    fn end(self) -> Result<Kind, NotPlain> {
        Ok(Kind::Plain)
    }
}

impl ser::SerializeTupleVariant for Compound {
    type Ok = Kind;
    type Error = NotPlain;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), NotPlain> {
        Compound::element(value)
    }

    fn end(self) -> Result<Kind, NotPlain> {
        Ok(Kind::Plain)
    }
}

impl ser::SerializeMap for Compound {
    type Ok = Kind;
    type Error = NotPlain;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<(), NotPlain> {
        // JSON object keys are strings; integers survive the trip as well.
        match serde_json::to_value(key) {
            Ok(serde_json::Value::String(_)) => Ok(()),
            Ok(serde_json::Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(()),
            _ => Err(NotPlain),
        }
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), NotPlain> {
        Compound::element(value)
    }

    fn end(self) -> Result<Kind, NotPlain> {
        Ok(Kind::Plain)
    }
}

impl ser::SerializeStruct for Compound {
    type Ok = Kind;
    type Error = NotPlain;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        _key: &'static str,
        value: &T,
    ) -> Result<(), NotPlain> {
        Compound::element(value)
    }

    fn end(self) -> Result<Kind, NotPlain> {
        Ok(Kind::Plain)
    }
}

impl ser::SerializeStructVariant for Compound {
    type Ok = Kind;
    type Error = NotPlain;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        _key: &'static str,
        value: &T,
    ) -> Result<(), NotPlain> {
        Compound::element(value)
    }

    fn end(self) -> Result<Kind, NotPlain> {
        Ok(Kind::Plain)
    }
}

//! Checked, offset-addressed storage for a class payload.
//!
//! Every access goes through a [`PropertyDescriptor`] and is bounds- and
//! type-checked against it; a descriptor that points outside the
//! payload produces [`ObjectError::PayloadBounds`] rather than touching
//! memory it does not own. Scalars are stored little-endian.

use gridsync_core::{ObjectError, ObjectId, Timestamp};
use smallvec::{smallvec, SmallVec};

use crate::property::{PropertyDescriptor, PropertyType, PropertyValue};

/// Payloads up to this many bytes live inline in the object allocation.
pub const INLINE_PAYLOAD: usize = 64;

const NO_OBJECT: u32 = u32::MAX;

/// The class-specific bytes that follow an object header.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Payload {
    bytes: SmallVec<[u8; INLINE_PAYLOAD]>,
}

fn le<const N: usize>(b: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&b[..N]);
    out
}

fn mismatch(prop: &PropertyDescriptor, found: &'static str) -> ObjectError {
    ObjectError::TypeMismatch {
        property: prop.name.clone(),
        expected: prop.ptype.name(),
        found,
    }
}

impl Payload {
    /// A zero-filled payload of `size` bytes.
    pub fn zeroed(size: usize) -> Self {
        Self {
            bytes: smallvec![0; size],
        }
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the payload has no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn element_range(
        &self,
        prop: &PropertyDescriptor,
        index: usize,
    ) -> Result<std::ops::Range<usize>, ObjectError> {
        let size = prop.ptype.size();
        let count = prop.array_size.unwrap_or(1);
        let offset = index
            .checked_mul(size)
            .and_then(|skip| prop.offset.checked_add(skip));
        let range = offset.and_then(|o| Some(o..o.checked_add(size)?));
        match range {
            Some(r) if index < count && r.end <= self.bytes.len() => Ok(r),
            _ => Err(ObjectError::PayloadBounds {
                property: prop.name.clone(),
                offset: offset.unwrap_or(usize::MAX),
                size,
                payload: self.bytes.len(),
            }),
        }
    }

    /// Check that `value` could be written to element `index` without
    /// writing it.
    fn check_element(
        &self,
        prop: &PropertyDescriptor,
        index: usize,
        value: &PropertyValue,
    ) -> Result<(), ObjectError> {
        let capacity = self.element_range(prop, index)?.len();
        let fits = match (prop.ptype, value) {
            (ptype, PropertyValue::Text(s)) if ptype.is_text() => {
                if s.len() > capacity {
                    return Err(ObjectError::TextTooLong {
                        property: prop.name.clone(),
                        capacity,
                        len: s.len(),
                    });
                }
                true
            }
            (PropertyType::Double, PropertyValue::Double(_))
            | (PropertyType::Complex, PropertyValue::Complex(..))
            | (PropertyType::Int16, PropertyValue::Int16(_))
            | (PropertyType::Int32, PropertyValue::Int32(_))
            | (PropertyType::Int64, PropertyValue::Int64(_))
            | (PropertyType::Bool, PropertyValue::Bool(_))
            | (PropertyType::Enumeration, PropertyValue::Enumeration(_))
            | (PropertyType::Set, PropertyValue::Set(_))
            | (PropertyType::Timestamp, PropertyValue::Timestamp(_))
            | (PropertyType::Object, PropertyValue::Object(_)) => true,
            _ => false,
        };
        if fits {
            Ok(())
        } else {
            Err(mismatch(prop, value.type_name()))
        }
    }

    /// Check that [`Payload::write`] would accept `value` for the whole
    /// property, leaving the payload untouched.
    pub fn check(&self, prop: &PropertyDescriptor, value: &PropertyValue) -> Result<(), ObjectError> {
        match (prop.array_size, value) {
            (Some(n), PropertyValue::Array(items)) => {
                if items.len() != n {
                    return Err(ObjectError::ArrayLength {
                        property: prop.name.clone(),
                        expected: n,
                        found: items.len(),
                    });
                }
                items
                    .iter()
                    .enumerate()
                    .try_for_each(|(i, item)| self.check_element(prop, i, item))
            }
            (Some(_), other) => Err(mismatch(prop, other.type_name())),
            (None, value) => self.check_element(prop, 0, value),
        }
    }

    /// Read the whole property; arrays come back as [`PropertyValue::Array`].
    pub fn read(&self, prop: &PropertyDescriptor) -> Result<PropertyValue, ObjectError> {
        match prop.array_size {
            Some(n) => (0..n)
                .map(|i| self.read_element(prop, i))
                .collect::<Result<Vec<_>, _>>()
                .map(PropertyValue::Array),
            None => self.read_element(prop, 0),
        }
    }

    /// Read one element of the property.
    pub fn read_element(
        &self,
        prop: &PropertyDescriptor,
        index: usize,
    ) -> Result<PropertyValue, ObjectError> {
        let b = &self.bytes[self.element_range(prop, index)?];
        Ok(match prop.ptype {
            PropertyType::Double => PropertyValue::Double(f64::from_le_bytes(le(b))),
            PropertyType::Complex => PropertyValue::Complex(
                f64::from_le_bytes(le(&b[..8])),
                f64::from_le_bytes(le(&b[8..])),
            ),
            PropertyType::Int16 => PropertyValue::Int16(i16::from_le_bytes(le(b))),
            PropertyType::Int32 => PropertyValue::Int32(i32::from_le_bytes(le(b))),
            PropertyType::Int64 => PropertyValue::Int64(i64::from_le_bytes(le(b))),
            PropertyType::Bool => PropertyValue::Bool(b[0] != 0),
            PropertyType::Enumeration => PropertyValue::Enumeration(u32::from_le_bytes(le(b))),
            PropertyType::Set => PropertyValue::Set(u64::from_le_bytes(le(b))),
            PropertyType::Timestamp => {
                PropertyValue::Timestamp(Timestamp(i64::from_le_bytes(le(b))))
            }
            PropertyType::Char8
            | PropertyType::Char32
            | PropertyType::Char256
            | PropertyType::Char1024 => {
                let end = b.iter().position(|&c| c == 0).unwrap_or(b.len());
                PropertyValue::Text(String::from_utf8_lossy(&b[..end]).into_owned())
            }
            PropertyType::Object => match u32::from_le_bytes(le(b)) {
                NO_OBJECT => PropertyValue::Object(None),
                id => PropertyValue::Object(Some(ObjectId(id))),
            },
        })
    }

    /// Write the whole property; arrays take a [`PropertyValue::Array`]
    /// of exactly the declared length.
    ///
    /// Either every element is stored or, on error, none is.
    pub fn write(
        &mut self,
        prop: &PropertyDescriptor,
        value: &PropertyValue,
    ) -> Result<(), ObjectError> {
        self.check(prop, value)?;
        match value {
            PropertyValue::Array(items) if prop.array_size.is_some() => {
                for (i, item) in items.iter().enumerate() {
                    self.write_element(prop, i, item)?;
                }
                Ok(())
            }
            value => self.write_element(prop, 0, value),
        }
    }

    /// Write one element of the property.
    pub fn write_element(
        &mut self,
        prop: &PropertyDescriptor,
        index: usize,
        value: &PropertyValue,
    ) -> Result<(), ObjectError> {
        let range = self.element_range(prop, index)?;
        let b = &mut self.bytes[range];
        match (prop.ptype, value) {
            (PropertyType::Double, PropertyValue::Double(v)) => b.copy_from_slice(&v.to_le_bytes()),
            (PropertyType::Complex, PropertyValue::Complex(re, im)) => {
                b[..8].copy_from_slice(&re.to_le_bytes());
                b[8..].copy_from_slice(&im.to_le_bytes());
            }
            (PropertyType::Int16, PropertyValue::Int16(v)) => b.copy_from_slice(&v.to_le_bytes()),
            (PropertyType::Int32, PropertyValue::Int32(v)) => b.copy_from_slice(&v.to_le_bytes()),
            (PropertyType::Int64, PropertyValue::Int64(v)) => b.copy_from_slice(&v.to_le_bytes()),
            (PropertyType::Bool, PropertyValue::Bool(v)) => b[0] = u8::from(*v),
            (PropertyType::Enumeration, PropertyValue::Enumeration(v)) => {
                b.copy_from_slice(&v.to_le_bytes())
            }
            (PropertyType::Set, PropertyValue::Set(v)) => b.copy_from_slice(&v.to_le_bytes()),
            (PropertyType::Timestamp, PropertyValue::Timestamp(t)) => {
                b.copy_from_slice(&t.0.to_le_bytes())
            }
            (ptype, PropertyValue::Text(s)) if ptype.is_text() => {
                if s.len() > b.len() {
                    return Err(ObjectError::TextTooLong {
                        property: prop.name.clone(),
                        capacity: b.len(),
                        len: s.len(),
                    });
                }
                b.fill(0);
                b[..s.len()].copy_from_slice(s.as_bytes());
            }
            (PropertyType::Object, PropertyValue::Object(id)) => {
                let raw = id.map_or(NO_OBJECT, |id| id.0);
                b.copy_from_slice(&raw.to_le_bytes());
            }
            (_, other) => return Err(mismatch(prop, other.type_name())),
        }
        Ok(())
    }

    /// Run the type initializer: write the descriptor default, or the
    /// type's initial value, into every element.
    pub fn initialize(&mut self, prop: &PropertyDescriptor) -> Result<(), ObjectError> {
        let value = prop
            .default
            .clone()
            .unwrap_or_else(|| prop.ptype.initial_value());
        match (prop.array_size, value) {
            (Some(_), value @ PropertyValue::Array(_)) | (None, value) => self.write(prop, &value),
            (Some(n), scalar) => {
                for i in 0..n {
                    self.write_element(prop, i, &scalar)?;
                }
                Ok(())
            }
        }
    }

    // ── Typed shorthands for class callbacks ───────────────────

    /// Read a `double` property.
    pub fn get_f64(&self, prop: &PropertyDescriptor) -> Result<f64, ObjectError> {
        match self.read_element(prop, 0)? {
            PropertyValue::Double(v) => Ok(v),
            other => Err(mismatch(prop, other.type_name())),
        }
    }

    /// Write a `double` property.
    pub fn set_f64(&mut self, prop: &PropertyDescriptor, v: f64) -> Result<(), ObjectError> {
        self.write_element(prop, 0, &PropertyValue::Double(v))
    }

    /// Read an `int64` property.
    pub fn get_i64(&self, prop: &PropertyDescriptor) -> Result<i64, ObjectError> {
        match self.read_element(prop, 0)? {
            PropertyValue::Int64(v) => Ok(v),
            other => Err(mismatch(prop, other.type_name())),
        }
    }

    /// Write an `int64` property.
    pub fn set_i64(&mut self, prop: &PropertyDescriptor, v: i64) -> Result<(), ObjectError> {
        self.write_element(prop, 0, &PropertyValue::Int64(v))
    }

    /// Read a `timestamp` property.
    pub fn get_timestamp(&self, prop: &PropertyDescriptor) -> Result<Timestamp, ObjectError> {
        match self.read_element(prop, 0)? {
            PropertyValue::Timestamp(t) => Ok(t),
            other => Err(mismatch(prop, other.type_name())),
        }
    }

    /// Write a `timestamp` property.
    pub fn set_timestamp(
        &mut self,
        prop: &PropertyDescriptor,
        t: Timestamp,
    ) -> Result<(), ObjectError> {
        self.write_element(prop, 0, &PropertyValue::Timestamp(t))
    }
}

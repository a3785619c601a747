//! Property descriptors: the typed, offset-addressed fields of a class
//! payload.

use gridsync_core::{ClassId, ObjectId, Timestamp};

/// Storage type of a property.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PropertyType {
    /// 64-bit float.
    Double,
    /// Pair of 64-bit floats (real, imaginary).
    Complex,
    /// 16-bit signed integer.
    Int16,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// Single byte, zero or one.
    Bool,
    /// One keyword value out of the property's keyword list.
    Enumeration,
    /// Bitwise union of keyword values.
    Set,
    /// Absolute simulation time.
    Timestamp,
    /// Text up to 8 bytes.
    Char8,
    /// Text up to 32 bytes.
    Char32,
    /// Text up to 256 bytes.
    Char256,
    /// Text up to 1024 bytes.
    Char1024,
    /// Reference to another object.
    Object,
}

impl PropertyType {
    /// Size in bytes of one element.
    pub fn size(self) -> usize {
        match self {
            Self::Bool => 1,
            Self::Int16 => 2,
            Self::Int32 | Self::Enumeration | Self::Object => 4,
            Self::Double | Self::Int64 | Self::Set | Self::Timestamp => 8,
            Self::Complex => 16,
            Self::Char8 => 8,
            Self::Char32 => 32,
            Self::Char256 => 256,
            Self::Char1024 => 1024,
        }
    }

    /// Lower-case type name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Double => "double",
            Self::Complex => "complex",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Bool => "bool",
            Self::Enumeration => "enumeration",
            Self::Set => "set",
            Self::Timestamp => "timestamp",
            Self::Char8 => "char8",
            Self::Char32 => "char32",
            Self::Char256 => "char256",
            Self::Char1024 => "char1024",
            Self::Object => "object",
        }
    }

    /// Whether values are text.
    pub fn is_text(self) -> bool {
        matches!(self, Self::Char8 | Self::Char32 | Self::Char256 | Self::Char1024)
    }

    /// Whether the property carries keywords.
    pub fn has_keywords(self) -> bool {
        matches!(self, Self::Enumeration | Self::Set)
    }

    /// The value every new object starts with.
    pub fn initial_value(self) -> PropertyValue {
        match self {
            Self::Double => PropertyValue::Double(0.0),
            Self::Complex => PropertyValue::Complex(0.0, 0.0),
            Self::Int16 => PropertyValue::Int16(0),
            Self::Int32 => PropertyValue::Int32(0),
            Self::Int64 => PropertyValue::Int64(0),
            Self::Bool => PropertyValue::Bool(false),
            Self::Enumeration => PropertyValue::Enumeration(0),
            Self::Set => PropertyValue::Set(0),
            Self::Timestamp => PropertyValue::Timestamp(Timestamp::ZERO),
            Self::Char8 | Self::Char32 | Self::Char256 | Self::Char1024 => {
                PropertyValue::Text(String::new())
            }
            Self::Object => PropertyValue::Object(None),
        }
    }
}

/// A property value read from or written to an object payload.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    /// [`PropertyType::Double`].
    Double(f64),
    /// [`PropertyType::Complex`].
    Complex(f64, f64),
    /// [`PropertyType::Int16`].
    Int16(i16),
    /// [`PropertyType::Int32`].
    Int32(i32),
    /// [`PropertyType::Int64`].
    Int64(i64),
    /// [`PropertyType::Bool`].
    Bool(bool),
    /// [`PropertyType::Enumeration`].
    Enumeration(u32),
    /// [`PropertyType::Set`].
    Set(u64),
    /// [`PropertyType::Timestamp`].
    Timestamp(Timestamp),
    /// Any of the `Char*` types.
    Text(String),
    /// [`PropertyType::Object`].
    Object(Option<ObjectId>),
    /// One value per element of an array property.
    Array(Vec<PropertyValue>),
}

impl PropertyValue {
    /// Name of the value's type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Double(_) => "double",
            Self::Complex(..) => "complex",
            Self::Int16(_) => "int16",
            Self::Int32(_) => "int32",
            Self::Int64(_) => "int64",
            Self::Bool(_) => "bool",
            Self::Enumeration(_) => "enumeration",
            Self::Set(_) => "set",
            Self::Timestamp(_) => "timestamp",
            Self::Text(_) => "text",
            Self::Object(_) => "object",
            Self::Array(_) => "array",
        }
    }
}

/// Who may see and modify a property from outside its class.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Access {
    /// Readable and writable by anyone.
    #[default]
    Public,
    /// Readable by anyone, written only by the class.
    Reference,
    /// Readable by anyone, written only by the class; hidden from listings.
    Protected,
    /// Neither readable nor writable from outside the class.
    Private,
}

impl Access {
    /// Lower-case access name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Reference => "reference",
            Self::Protected => "protected",
            Self::Private => "private",
        }
    }

    /// Whether external callers may read the property.
    pub fn externally_readable(self) -> bool {
        !matches!(self, Self::Private)
    }

    /// Whether external callers may write the property.
    pub fn externally_writable(self) -> bool {
        matches!(self, Self::Public)
    }
}

/// Describes one field of a class payload.
///
/// Built with [`PropertyDescriptor::new`] and the chained setters, then
/// handed to [`ClassRegistry::add_property`](crate::ClassRegistry::add_property),
/// which fills in the owning class and validates the layout.
#[derive(Clone, Debug, PartialEq)]
pub struct PropertyDescriptor {
    /// Property name, unique within its class.
    pub name: String,
    /// Element type.
    pub ptype: PropertyType,
    /// Byte offset from the start of the payload.
    pub offset: usize,
    /// Element count for fixed-size arrays.
    pub array_size: Option<usize>,
    /// Unit symbol, if any.
    pub unit: Option<String>,
    /// External access rights.
    pub access: Access,
    /// Keyword names and values for enumerations and sets.
    pub keywords: Vec<(String, u64)>,
    /// External writes raise the object's recalculation flag.
    pub recalc: bool,
    /// Lookups by name log a deprecation warning.
    pub deprecated: bool,
    /// Value written by the initializer in place of the type default.
    pub default: Option<PropertyValue>,
    /// Class that declared the property.
    pub owner: ClassId,
}

impl PropertyDescriptor {
    /// A public scalar property at `offset`.
    pub fn new(name: impl Into<String>, ptype: PropertyType, offset: usize) -> Self {
        Self {
            name: name.into(),
            ptype,
            offset,
            array_size: None,
            unit: None,
            access: Access::Public,
            keywords: Vec::new(),
            recalc: false,
            deprecated: false,
            default: None,
            owner: ClassId(0),
        }
    }

    /// Make this a fixed-size array of `n` elements.
    pub fn array(mut self, n: usize) -> Self {
        self.array_size = Some(n);
        self
    }

    /// Attach a unit symbol.
    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Set the access rights.
    pub fn access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    /// Mark external writes as requiring a recalculation.
    pub fn recalc(mut self) -> Self {
        self.recalc = true;
        self
    }

    /// Mark the property as deprecated.
    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }

    /// Override the initial value.
    pub fn default_value(mut self, value: PropertyValue) -> Self {
        self.default = Some(value);
        self
    }

    /// Add a keyword.
    pub fn keyword(mut self, name: impl Into<String>, value: u64) -> Self {
        self.keywords.push((name.into(), value));
        self
    }

    /// Total byte size, all elements included.
    pub fn size(&self) -> usize {
        self.ptype.size().saturating_mul(self.array_size.unwrap_or(1))
    }

    /// One past the last byte, saturating at `usize::MAX`.
    pub fn end(&self) -> usize {
        self.offset.saturating_add(self.size())
    }

    /// Value of the named keyword.
    pub fn keyword_value(&self, name: &str) -> Option<u64> {
        self.keywords
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| *v)
    }

    /// Name of the keyword with this exact value.
    pub fn keyword_name(&self, value: u64) -> Option<&str> {
        self.keywords
            .iter()
            .find(|(_, v)| *v == value)
            .map(|(k, _)| k.as_str())
    }
}

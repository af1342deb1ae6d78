//! Fixed-layout binary record decoding
//! This module reads little-endian records made of unsigned integer fields
//! laid out back to back with no padding.

use thiserror::Error;

/// Width of a single unsigned field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldWidth {
    U8,
    U16,
    U32,
}

impl FieldWidth {
    /// Number of bytes the field occupies on the wire
    pub const fn bytes(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }

    /// Largest value that fits in the field
    pub const fn max_value(self) -> u32 {
        match self {
            Self::U8 => u8::MAX as u32,
            Self::U16 => u16::MAX as u32,
            Self::U32 => u32::MAX,
        }
    }
}

/// A named field in a record layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub width: FieldWidth,
}

impl Field {
    pub const fn new(name: &'static str, width: FieldWidth) -> Self {
        Self { name, width }
    }
}

/// Ordered list of fields describing one record layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schema {
    name: &'static str,
    fields: &'static [Field],
}

impl Schema {
    pub const fn new(name: &'static str, fields: &'static [Field]) -> Self {
        Self { name, fields }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn fields(&self) -> &'static [Field] {
        self.fields
    }

    /// Total number of bytes a buffer needs for this layout
    pub fn width(&self) -> usize {
        self.fields.iter().map(|field| field.width.bytes()).sum()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("{schema} record needs {expected} bytes but only {actual} were given")]
    TruncatedBuffer {
        schema: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{schema} record has {expected} fields but {actual} values were given")]
    FieldCountMismatch {
        schema: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("value {value} does not fit in field '{field}'")]
    ValueOutOfRange { field: &'static str, value: u32 },
}

/// Field values read from a buffer, in schema order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFields {
    schema: Schema,
    values: Vec<u32>,
}

impl DecodedFields {
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn values(&self) -> &[u32] {
        &self.values
    }

    /// Looks a value up by field name
    pub fn get(&self, name: &str) -> Option<u32> {
        self.schema
            .fields()
            .iter()
            .position(|field| field.name == name)
            .map(|index| self.values[index])
    }

    /// Reads field `index`, which must be declared [`FieldWidth::U8`]
    pub fn u8_at(&self, index: usize) -> u8 {
        self.check_width(index, FieldWidth::U8);
        u8::try_from(self.values[index]).unwrap_or(u8::MAX)
    }

    /// Reads field `index`, which must be declared [`FieldWidth::U16`]
    pub fn u16_at(&self, index: usize) -> u16 {
        self.check_width(index, FieldWidth::U16);
        u16::try_from(self.values[index]).unwrap_or(u16::MAX)
    }

    pub fn u32_at(&self, index: usize) -> u32 {
        self.values[index]
    }

    fn check_width(&self, index: usize, width: FieldWidth) {
        let field = &self.schema.fields()[index];
        debug_assert_eq!(
            field.width, width,
            "field '{}' of {} is {:?}",
            field.name,
            self.schema.name(),
            field.width
        );
    }
}

/// Decodes `bytes` according to `schema`.
///
/// Bytes beyond the schema width are ignored so that newer firmware can append
/// fields without breaking older readers.
pub fn decode(schema: &Schema, bytes: &[u8]) -> Result<DecodedFields, LayoutError> {
    let expected = schema.width();
    if bytes.len() < expected {
        return Err(LayoutError::TruncatedBuffer {
            schema: schema.name(),
            expected,
            actual: bytes.len(),
        });
    }

    let mut offset = 0;
    let mut values = Vec::with_capacity(schema.fields().len());
    for field in schema.fields() {
        let value = match field.width {
            FieldWidth::U8 => bytes[offset] as u32,
            FieldWidth::U16 => u16::from_le_bytes([bytes[offset], bytes[offset + 1]]) as u32,
            FieldWidth::U32 => u32::from_le_bytes([
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
            ]),
        };
        values.push(value);
        offset += field.width.bytes();
    }

    Ok(DecodedFields {
        schema: *schema,
        values,
    })
}

/// Encodes `values` according to `schema`. The inverse of [`decode`].
pub fn encode(schema: &Schema, values: &[u32]) -> Result<Vec<u8>, LayoutError> {
    if values.len() != schema.fields().len() {
        return Err(LayoutError::FieldCountMismatch {
            schema: schema.name(),
            expected: schema.fields().len(),
            actual: values.len(),
        });
    }

    let mut bytes = Vec::with_capacity(schema.width());
    for (field, &value) in schema.fields().iter().zip(values) {
        if value > field.width.max_value() {
            return Err(LayoutError::ValueOutOfRange {
                field: field.name,
                value,
            });
        }
        bytes.extend_from_slice(&value.to_le_bytes()[..field.width.bytes()]);
    }
    Ok(bytes)
}

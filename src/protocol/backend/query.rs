//! Query-related backend messages.

use zerocopy::FromBytes;
use zerocopy::byteorder::big_endian::{I16 as I16BE, I32 as I32BE, U32 as U32BE};
use zerocopy::{Immutable, KnownLayout};

use crate::protocol::codec::{read_cstr, read_i16, read_i32};
use crate::protocol::types::{FormatCode, Oid};
use crate::error::{Error, Result};

/// Fixed-size tail of a field description (18 bytes).
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct FieldDescriptionTail {
    /// Table OID (0 if not a table column)
    pub table_oid: U32BE,
    /// Column attribute number (0 if not a table column)
    pub column_id: I16BE,
    /// Data type OID
    pub type_oid: U32BE,
    /// Type size (-1 for variable, -2 for null-terminated)
    pub type_size: I16BE,
    /// Type modifier (type-specific)
    pub type_modifier: I32BE,
    /// Format code (0=text, 1=binary)
    pub format: I16BE,
}

/// Field description within a RowDescription.
#[derive(Debug, Clone, Copy)]
pub struct FieldDescription<'a> {
    /// Field name
    pub name: &'a str,
    /// Fixed-size metadata
    pub tail: &'a FieldDescriptionTail,
}

impl FieldDescription<'_> {
    /// Data type OID
    pub fn type_oid(&self) -> Oid {
        self.tail.type_oid.get()
    }

    /// Format code the server will use for this column's values.
    pub fn format(&self) -> FormatCode {
        FormatCode::from_i16(self.tail.format.get())
    }
}

/// RowDescription message - describes the columns in a result set.
#[derive(Debug)]
pub struct RowDescription<'a> {
    fields: Vec<FieldDescription<'a>>,
}

impl<'a> RowDescription<'a> {
    /// Parse a RowDescription message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (num_fields, mut data) = read_i16(payload)?;

        let mut fields = Vec::with_capacity(num_fields.max(0) as usize);
        for _ in 0..num_fields {
            let (name, rest) = read_cstr(data)?;
            let (tail, rest) = FieldDescriptionTail::ref_from_prefix(rest)
                .map_err(|e| Error::Protocol(format!("FieldDescription tail: {e:?}")))?;

            fields.push(FieldDescription { name, tail });
            data = rest;
        }

        Ok(Self { fields })
    }

    /// Get the number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if there are no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate over field descriptions.
    pub fn iter(&self) -> impl Iterator<Item = &FieldDescription<'a>> {
        self.fields.iter()
    }
}

/// DataRow message - contains a single row of data.
#[derive(Debug, Clone, Copy)]
pub struct DataRow<'a> {
    num_columns: u16,
    /// Column data (after the column count)
    columns_data: &'a [u8],
}

impl<'a> DataRow<'a> {
    /// Parse a DataRow message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (num_columns, columns_data) = read_i16(payload)?;
        Ok(Self {
            num_columns: num_columns as u16,
            columns_data,
        })
    }

    /// Get the number of columns.
    pub fn len(&self) -> usize {
        self.num_columns as usize
    }

    /// Check if there are no columns.
    pub fn is_empty(&self) -> bool {
        self.num_columns == 0
    }

    /// Create an iterator over column values.
    ///
    /// Each item is `Option<&[u8]>` where `None` represents NULL.
    pub fn iter(&self) -> DataRowIter<'a> {
        DataRowIter {
            remaining: self.columns_data,
        }
    }
}

/// Iterator over column values in a DataRow.
#[derive(Debug, Clone)]
pub struct DataRowIter<'a> {
    remaining: &'a [u8],
}

impl<'a> Iterator for DataRowIter<'a> {
    type Item = Option<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        let (len, rest) = read_i32(self.remaining).ok()?;
        self.remaining = rest;

        if len == -1 {
            // NULL value
            Some(None)
        } else {
            let value;
            (value, self.remaining) = self.remaining.split_at_checked(len as usize)?;
            Some(Some(value))
        }
    }
}

/// CommandComplete message - indicates successful completion of a command.
#[derive(Debug, Clone, Copy)]
pub struct CommandComplete<'a> {
    /// Command tag (e.g., "SELECT 5", "INSERT 0 1", "UPDATE 10")
    pub tag: &'a str,
}

impl<'a> CommandComplete<'a> {
    /// Parse a CommandComplete message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (tag, _) = read_cstr(payload)?;
        Ok(Self { tag })
    }

    /// Parse the number of rows affected from the command tag.
    ///
    /// Returns `Some(count)` for commands like SELECT, INSERT, UPDATE, DELETE.
    /// Returns `None` for other commands or parse failures.
    pub fn rows_affected(&self) -> Option<u64> {
        let parts: Vec<&str> = self.tag.split_whitespace().collect();

        match parts.as_slice() {
            ["SELECT", count] => count.parse().ok(),
            ["INSERT", _oid, count] => count.parse().ok(),
            ["UPDATE", count] => count.parse().ok(),
            ["DELETE", count] => count.parse().ok(),
            ["MOVE", count] => count.parse().ok(),
            ["FETCH", count] => count.parse().ok(),
            _ => None,
        }
    }

    /// Get the command name from the tag.
    pub fn command(&self) -> Option<&str> {
        self.tag.split_whitespace().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_row_iterates_nulls_and_values() {
        // 2 columns: 3-byte value, NULL
        let payload = [
            0x00, 0x02, //
            0x00, 0x00, 0x00, 0x03, b'a', b'b', b'c', //
            0xFF, 0xFF, 0xFF, 0xFF,
        ];
        let row = DataRow::parse(&payload).unwrap();
        assert_eq!(row.len(), 2);
        let cells: Vec<_> = row.iter().collect();
        assert_eq!(cells, [Some(&b"abc"[..]), None]);
    }

    #[test]
    fn row_description_fields() {
        let mut payload = vec![0x00, 0x01];
        payload.extend_from_slice(b"id\0");
        payload.extend_from_slice(&0_u32.to_be_bytes()); // table oid
        payload.extend_from_slice(&0_i16.to_be_bytes()); // column id
        payload.extend_from_slice(&23_u32.to_be_bytes()); // int4
        payload.extend_from_slice(&4_i16.to_be_bytes()); // size
        payload.extend_from_slice(&(-1_i32).to_be_bytes()); // modifier
        payload.extend_from_slice(&1_i16.to_be_bytes()); // binary

        let desc = RowDescription::parse(&payload).unwrap();
        assert_eq!(desc.len(), 1);
        let field = desc.iter().next().unwrap();
        assert_eq!(field.name, "id");
        assert_eq!(field.type_oid(), 23);
        assert_eq!(field.format(), FormatCode::Binary);
    }

    #[test]
    fn command_tag_counts() {
        assert_eq!(
            CommandComplete::parse(b"INSERT 0 1\0").unwrap().rows_affected(),
            Some(1)
        );
        assert_eq!(
            CommandComplete::parse(b"SELECT 5\0").unwrap().rows_affected(),
            Some(5)
        );
        assert_eq!(
            CommandComplete::parse(b"BEGIN\0").unwrap().rows_affected(),
            None
        );
    }
}

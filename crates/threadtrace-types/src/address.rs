use std::fmt;

use crate::BoundedStr;

/// Byte capacity of every string field of [`AddressInfo`].
pub const MAX_ADDRESS_FIELD_LEN: usize = 256;

pub type AddressField = BoundedStr<MAX_ADDRESS_FIELD_LEN>;

/// What is known about one code address. Empty strings and zero numbers mean
/// "this piece is unknown", not failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressInfo {
    pub address: usize,
    pub object_name: AddressField,
    pub symbol_name: AddressField,
    pub symbol_address: usize,
    pub source_file: AddressField,
    pub source_line: u32,
}

impl AddressInfo {
    pub fn new(address: usize) -> Self {
        Self {
            address,
            ..Self::default()
        }
    }

    pub fn object_name(&self) -> Option<&str> {
        self.object_name.non_empty()
    }

    pub fn symbol_name(&self) -> Option<&str> {
        self.symbol_name.non_empty()
    }

    pub fn source_file(&self) -> Option<&str> {
        self.source_file.non_empty()
    }

    pub fn source_line(&self) -> Option<u32> {
        (self.source_line != 0).then_some(self.source_line)
    }

    pub fn symbol_address(&self) -> Option<usize> {
        (self.symbol_address != 0).then_some(self.symbol_address)
    }

    /// Distance from the start of the containing symbol.
    pub fn symbol_offset(&self) -> Option<usize> {
        self.symbol_address()
            .and_then(|base| self.address.checked_sub(base))
    }

    pub fn has_any(&self) -> bool {
        !self.object_name.is_empty()
            || !self.symbol_name.is_empty()
            || self.symbol_address != 0
            || !self.source_file.is_empty()
            || self.source_line != 0
    }
}

impl fmt::Display for AddressInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.address)?;
        if let Some(object) = self.object_name() {
            let short = object.rsplit(['/', '\\']).next().unwrap_or(object);
            write!(f, " {short}")?;
        }
        if let Some(symbol) = self.symbol_name() {
            write!(f, "!{symbol}")?;
            if let Some(offset) = self.symbol_offset() {
                write!(f, "+0x{offset:x}")?;
            }
        }
        if let Some(file) = self.source_file() {
            match self.source_line() {
                Some(line) => write!(f, " ({file}:{line})")?,
                None => write!(f, " ({file})")?,
            }
        }
        Ok(())
    }
}

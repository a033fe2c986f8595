//! Register-level vocabulary of the SunSpec model chain.
//!
//! A SunSpec device exposes, from some base address, the two marker words `"SunS"` followed by
//! a chain of `(id, length)` headers each trailed by `length` data words. The chain is closed by
//! the `0xFFFF, 0x0000` terminator header.

/// The marker words (`"SunS"` in ASCII) that open the model chain.
pub const MARKER: [u16; 2] = [0x5375, 0x6E53];

/// The model id of the terminating header. It must be followed by a length of zero.
pub const TERMINATOR_MODEL_ID: u16 = 0xFFFF;

/// Number of words in a model header (the `ID` and `L` registers).
pub const HEADER_WORDS: u16 = 2;

/// The base addresses where the model chain is found on conforming devices.
pub const STANDARD_BASE_ADDRESSES: [u16; 3] = [0, 40000, 50000];

/// The Modbus unit id SunSpec devices conventionally listen on.
pub const STANDARD_UNIT_ID: u8 = 126;

pub const MODBUS_TCP_PORT: u16 = 502;

/// Disjoint register spaces of a Modbus device.
#[derive(
    clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AddressClass {
    Holding,
    Input,
}

impl AddressClass {
    /// Short prefix used when rendering addresses, e.g. `hr:40000`.
    pub fn prefix(&self) -> &'static str {
        match self {
            AddressClass::Holding => "hr",
            AddressClass::Input => "ir",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "hr" => Some(AddressClass::Holding),
            "ir" => Some(AddressClass::Input),
            _ => None,
        }
    }
}

/// A register within one of the address classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegisterAddress {
    pub class: AddressClass,
    pub offset: u16,
}

impl RegisterAddress {
    pub const fn holding(offset: u16) -> Self {
        Self { class: AddressClass::Holding, offset }
    }

    pub const fn input(offset: u16) -> Self {
        Self { class: AddressClass::Input, offset }
    }

    /// The address `words` registers further, if it is still addressable.
    pub fn checked_add(self, words: u32) -> Option<Self> {
        let offset = u32::from(self.offset).checked_add(words)?;
        Some(Self { class: self.class, offset: u16::try_from(offset).ok()? })
    }
}

impl std::fmt::Display for RegisterAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{:05}", self.class.prefix(), self.offset)
    }
}

impl std::str::FromStr for RegisterAddress {
    type Err = String;

    /// Accepts `hr:40000`, `ir:30000` or a bare offset (a holding register).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (class, offset) = match s.split_once(':') {
            None => (AddressClass::Holding, s),
            Some((prefix, offset)) => {
                let class = AddressClass::from_prefix(prefix.trim())
                    .ok_or_else(|| format!("unknown address class `{prefix}`"))?;
                (class, offset)
            }
        };
        let offset =
            offset.trim().parse::<u16>().map_err(|e| format!("invalid offset `{offset}`: {e}"))?;
        Ok(Self { class, offset })
    }
}

impl serde::Serialize for RegisterAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// The `(ID, L)` pair in front of every model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModelHeader {
    pub model_id: u16,
    /// Number of data words after the header, excluding the header itself.
    pub model_length: u16,
}

impl ModelHeader {
    pub fn from_words([model_id, model_length]: [u16; 2]) -> Self {
        Self { model_id, model_length }
    }

    pub fn is_terminator(&self) -> bool {
        self.model_id == TERMINATOR_MODEL_ID && self.model_length == 0
    }
}

/// One model as it was read off the device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelBlock {
    pub header: ModelHeader,
    /// Address of the first data word (i.e. just past the header).
    pub address: RegisterAddress,
    pub words: Vec<u16>,
}

impl ModelBlock {
    pub fn model_id(&self) -> u16 {
        self.header.model_id
    }

    pub fn header_address(&self) -> RegisterAddress {
        let offset = self.address.offset.saturating_sub(HEADER_WORDS);
        RegisterAddress { class: self.address.class, offset }
    }
}

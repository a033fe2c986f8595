//! Register dumps captured from real devices, replayed as a [`RegisterSource`].
//!
//! The text format is what `discover --record` writes and what the conformance fixtures use:
//!
//! ```text
//! # comments run to the end of the line
//! @hr:40000
//! 5375 6E53
//! 0001 0042 ...
//! ```
//!
//! `@<class>:<offset>` moves the write position, every 4-digit hex word is stored at the current
//! position which then advances by one. `----` advances the position without storing anything,
//! for registers the device refused to return.

use crate::source::{self, RegisterSource};
use crate::sunspec::{AddressClass, RegisterAddress};
use tracing::trace;

const REGISTER_COUNT: usize = 1 << 16;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("line {0}: invalid position directive `{1}`")]
    Position(usize, String),
    #[error("line {0}: `{1}` is not a 4 digit hexadecimal register value")]
    Word(usize, String),
    #[error("line {0}: register values run past the end of the address space")]
    Overflow(usize),
}

pub struct RegisterBitmask(Box<[u64]>);

impl RegisterBitmask {
    pub fn new() -> Self {
        Self(vec![0; REGISTER_COUNT / u64::BITS as usize].into_boxed_slice())
    }

    fn word_bit_mask(&self, address: u16) -> (usize, u64) {
        let word = (u32::from(address) / u64::BITS) as usize;
        let bit_mask = 1 << u64::from(u32::from(address) % u64::BITS);
        (word, bit_mask)
    }

    pub fn is_set(&self, address: u16) -> bool {
        let (word, bitmask) = self.word_bit_mask(address);
        (self.0[word] & bitmask) != 0
    }

    pub fn set(&mut self, address: u16) {
        let (word, bitmask) = self.word_bit_mask(address);
        self.0[word] |= bitmask;
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|w| *w == 0)
    }

    /// Maximal runs of consecutive set addresses, in ascending order.
    pub fn runs(&self) -> Vec<std::ops::RangeInclusive<u16>> {
        let mut runs: Vec<std::ops::RangeInclusive<u16>> = Vec::new();
        for address in SetBitsIterator::new(self) {
            match runs.last_mut() {
                Some(run) if u32::from(*run.end()) + 1 == u32::from(address) => {
                    *run = *run.start()..=address;
                }
                _ => runs.push(address..=address),
            }
        }
        runs
    }
}

pub struct SetBitsIterator<'a> {
    bitmask: &'a RegisterBitmask,
    word_index: usize,
    current_word_val: u64,
}

impl<'a> SetBitsIterator<'a> {
    pub fn new(bitmask: &'a RegisterBitmask) -> Self {
        SetBitsIterator { bitmask, word_index: 0, current_word_val: bitmask.0[0] }
    }
}

impl<'a> Iterator for SetBitsIterator<'a> {
    type Item = u16;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current_word_val == 0 {
                self.word_index += 1;
                self.current_word_val = self.bitmask.0.get(self.word_index).copied()?;
                continue;
            }
            let set_bit_pos = self.current_word_val.trailing_zeros() as usize;
            let address = self.word_index * u64::BITS as usize + set_bit_pos;
            self.current_word_val &= self.current_word_val - 1;
            return u16::try_from(address).ok();
        }
    }
}

struct RegisterSpace {
    values: Box<[u16]>,
    have_value: RegisterBitmask,
}

impl RegisterSpace {
    fn new() -> Self {
        Self { values: vec![0; REGISTER_COUNT].into_boxed_slice(), have_value: RegisterBitmask::new() }
    }

    fn value_of(&self, offset: u16) -> Option<u16> {
        if !self.have_value.is_set(offset) {
            return None;
        }
        Some(self.values[usize::from(offset)])
    }

    fn set_value(&mut self, offset: u16, value: u16) {
        self.values[usize::from(offset)] = value;
        self.have_value.set(offset);
    }
}

/// A device made of previously recorded register values.
///
/// Reading any register that was not recorded fails, the same way a real device answers reads
/// of unimplemented addresses with an exception.
pub struct RecordedDevice {
    holding: RegisterSpace,
    input: RegisterSpace,
    reads: usize,
}

impl RecordedDevice {
    pub fn new() -> Self {
        Self { holding: RegisterSpace::new(), input: RegisterSpace::new(), reads: 0 }
    }

    /// Parse the dump format described in the [module documentation](self).
    ///
    /// Words before the first position directive land at `hr:00000`.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let mut device = Self::new();
        let mut position = Some(RegisterAddress::holding(0));
        for (line_index, line) in text.lines().enumerate() {
            let line_number = line_index + 1;
            let content = line.split('#').next().unwrap_or_default();
            for token in content.split_whitespace() {
                if let Some(directive) = token.strip_prefix('@') {
                    let address = directive
                        .parse::<RegisterAddress>()
                        .map_err(|_| Error::Position(line_number, token.to_string()))?;
                    position = Some(address);
                    continue;
                }
                if token == "----" {
                    let address = position.ok_or(Error::Overflow(line_number))?;
                    position = address.checked_add(1);
                    continue;
                }
                if token.len() != 4 {
                    return Err(Error::Word(line_number, token.to_string()));
                }
                let value = u16::from_str_radix(token, 16)
                    .map_err(|_| Error::Word(line_number, token.to_string()))?;
                let address = position.ok_or(Error::Overflow(line_number))?;
                device.set_value(address, value);
                position = address.checked_add(1);
            }
        }
        Ok(device)
    }

    /// Store `text` (in the dump format, without position directives) starting at `start`.
    pub fn with_registers(mut self, start: RegisterAddress, text: &str) -> Result<Self, Error> {
        let parsed = Self::parse(&format!("@{start}\n{text}"))?;
        for class in [AddressClass::Holding, AddressClass::Input] {
            for offset in SetBitsIterator::new(&parsed.space(class).have_value) {
                let address = RegisterAddress { class, offset };
                if let Some(value) = parsed.value_of(address) {
                    self.set_value(address, value);
                }
            }
        }
        Ok(self)
    }

    fn space(&self, class: AddressClass) -> &RegisterSpace {
        match class {
            AddressClass::Holding => &self.holding,
            AddressClass::Input => &self.input,
        }
    }

    fn space_mut(&mut self, class: AddressClass) -> &mut RegisterSpace {
        match class {
            AddressClass::Holding => &mut self.holding,
            AddressClass::Input => &mut self.input,
        }
    }

    pub fn value_of(&self, address: RegisterAddress) -> Option<u16> {
        self.space(address.class).value_of(address.offset)
    }

    pub fn set_value(&mut self, address: RegisterAddress, value: u16) {
        self.space_mut(address.class).set_value(address.offset, value)
    }

    /// Store consecutive `values` from `start` on; values past the last register are dropped.
    pub fn set_values(&mut self, start: RegisterAddress, values: &[u16]) {
        for (offset, value) in (u32::from(start.offset)..).zip(values) {
            let Ok(offset) = u16::try_from(offset) else { break };
            self.set_value(RegisterAddress { class: start.class, offset }, *value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.holding.have_value.is_empty() && self.input.have_value.is_empty()
    }

    /// Number of read requests served so far.
    pub fn reads(&self) -> usize {
        self.reads
    }

    /// Render the recorded registers in the dump format, 10 words per line.
    pub fn to_dump(&self) -> String {
        use std::fmt::Write as _;
        let mut dump = String::new();
        for class in [AddressClass::Holding, AddressClass::Input] {
            let space = self.space(class);
            for run in space.have_value.runs() {
                let start = RegisterAddress { class, offset: *run.start() };
                let _ = writeln!(dump, "@{start}");
                let words = run.map(|offset| space.values[usize::from(offset)]);
                let words = words.collect::<Vec<_>>();
                for line in words.chunks(10) {
                    let line = line.iter().map(|w| format!("{w:04X}")).collect::<Vec<_>>();
                    let _ = writeln!(dump, "{}", line.join(" "));
                }
                dump.push('\n');
            }
        }
        dump
    }
}

impl RegisterSource for RecordedDevice {
    async fn read(
        &mut self,
        address: RegisterAddress,
        count: u16,
    ) -> Result<Vec<u16>, source::Error> {
        self.reads += 1;
        trace!(message = "reading recorded registers", %address, count);
        let mut words = Vec::with_capacity(usize::from(count));
        for index in 0..u32::from(count) {
            let register = address.checked_add(index).ok_or(source::Error::Unmapped(address))?;
            let value = self.value_of(register).ok_or(source::Error::Unmapped(register))?;
            words.push(value);
        }
        Ok(words)
    }

    async fn close(&mut self) {}
}

//! Packed identifiers used on the wire and their unpacked forms.
//!
//! A 64-bit ID is `(instrument << 32) | (ugen << 16) | block`. Inside an
//! instrument, a 32-bit signal reference drops the instrument part:
//! `(ugen << 16) | block`.

/// A 64-bit instrument/ugen/block handle as carried by `h` arguments.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PackedId(pub u64);

impl PackedId {
    pub const fn new(instrument: u32, ugen: u16, block: u16) -> Self {
        Self(((instrument as u64) << 32) | ((ugen as u64) << 16) | block as u64)
    }

    pub const fn instrument(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub const fn ugen(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub const fn block(self) -> u16 {
        self.0 as u16
    }

    pub const fn signal(self) -> SignalAddr {
        SignalAddr {
            instrument: self.instrument(),
            ugen: self.ugen(),
            block: self.block(),
        }
    }

    /// Reads the ugen field as the index of an Input port.
    pub const fn port(self) -> PortAddr {
        PortAddr {
            instrument: self.instrument(),
            input: self.ugen(),
        }
    }
}

impl From<i64> for PackedId {
    fn from(raw: i64) -> Self {
        Self(raw as u64)
    }
}

impl From<PackedId> for i64 {
    fn from(id: PackedId) -> Self {
        id.0 as i64
    }
}

/// An output block of a ugen in the same instrument.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SignalRef {
    pub ugen: u16,
    pub block: u16,
}

impl SignalRef {
    pub const fn new(ugen: u16, block: u16) -> Self {
        Self { ugen, block }
    }

    pub const fn in_instrument(self, instrument: u32) -> SignalAddr {
        SignalAddr {
            instrument,
            ugen: self.ugen,
            block: self.block,
        }
    }
}

impl From<i32> for SignalRef {
    fn from(raw: i32) -> Self {
        let raw = raw as u32;
        Self {
            ugen: (raw >> 16) as u16,
            block: raw as u16,
        }
    }
}

impl From<SignalRef> for i32 {
    fn from(r: SignalRef) -> Self {
        (((r.ugen as u32) << 16) | r.block as u32) as i32
    }
}

/// A ugen anywhere in the rack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UgenAddr {
    pub instrument: u32,
    pub ugen: u16,
}

/// An output block of a ugen anywhere in the rack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SignalAddr {
    pub instrument: u32,
    pub ugen: u16,
    pub block: u16,
}

impl SignalAddr {
    pub const fn new(instrument: u32, ugen: u16, block: u16) -> Self {
        Self { instrument, ugen, block }
    }

    pub const fn ugen_addr(self) -> UgenAddr {
        UgenAddr {
            instrument: self.instrument,
            ugen: self.ugen,
        }
    }

    pub const fn packed(self) -> PackedId {
        PackedId::new(self.instrument, self.ugen, self.block)
    }
}

/// An Input port: the ugen index of the port inside its instrument.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PortAddr {
    pub instrument: u32,
    pub input: u16,
}

impl PortAddr {
    pub const fn new(instrument: u32, input: u16) -> Self {
        Self { instrument, input }
    }

    pub const fn ugen_addr(self) -> UgenAddr {
        UgenAddr {
            instrument: self.instrument,
            ugen: self.input,
        }
    }

    pub const fn packed(self) -> PackedId {
        PackedId::new(self.instrument, self.input, 0)
    }
}

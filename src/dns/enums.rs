/// Record type codes served or understood by the zone engine.
///
/// The signed record store is indexed by the raw 16-bit code, so unknown
/// types are preserved rather than collapsed to a default.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum RecordType {
    #[default]
    A,
    NS,
    CNAME,
    SOA,
    TXT,
    AAAA,
    OPT,
    DS,
    RRSIG,
    NSEC,
    DNSKEY,
    CDS,
    CDNSKEY,
    AXFR,
    Unknown(u16),
}

impl RecordType {
    pub fn code(self) -> u16 {
        match self {
            RecordType::A => 1,
            RecordType::NS => 2,
            RecordType::CNAME => 5,
            RecordType::SOA => 6,
            RecordType::TXT => 16,
            RecordType::AAAA => 28,
            RecordType::OPT => 41,
            RecordType::DS => 43,
            RecordType::RRSIG => 46,
            RecordType::NSEC => 47,
            RecordType::DNSKEY => 48,
            RecordType::CDS => 59,
            RecordType::CDNSKEY => 60,
            RecordType::AXFR => 252,
            RecordType::Unknown(code) => code,
        }
    }
}

impl From<u16> for RecordType {
    fn from(value: u16) -> Self {
        match value {
            1 => RecordType::A,
            2 => RecordType::NS,
            5 => RecordType::CNAME,
            6 => RecordType::SOA,
            16 => RecordType::TXT,
            28 => RecordType::AAAA,
            41 => RecordType::OPT,
            43 => RecordType::DS,
            46 => RecordType::RRSIG,
            47 => RecordType::NSEC,
            48 => RecordType::DNSKEY,
            59 => RecordType::CDS,
            60 => RecordType::CDNSKEY,
            252 => RecordType::AXFR,
            code => RecordType::Unknown(code),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum RecordClass {
    #[default]
    IN,
    CS,
    CH,
    HS,
    Unknown(u16),
}

impl RecordClass {
    pub fn code(self) -> u16 {
        match self {
            RecordClass::IN => 1,
            RecordClass::CS => 2,
            RecordClass::CH => 3,
            RecordClass::HS => 4,
            RecordClass::Unknown(code) => code,
        }
    }
}

impl From<u16> for RecordClass {
    fn from(value: u16) -> Self {
        match value {
            1 => RecordClass::IN,
            2 => RecordClass::CS,
            3 => RecordClass::CH,
            4 => RecordClass::HS,
            code => RecordClass::Unknown(code),
        }
    }
}

/// DNS response codes (RFC 1035 plus the EDNS extended BADVERS)
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ResponseCode {
    NoError = 0,
    FormatError = 1,
    ServerFailure = 2,
    NameError = 3,
    NotImplemented = 4,
    Refused = 5,
    /// Extended rcode; the low four bits land in the header, the high bits
    /// in the OPT record.
    BadVers = 16,
}

impl ResponseCode {
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    /// Low four bits, carried in the message header.
    pub fn header_bits(self) -> u8 {
        (self.to_u16() & 0x0F) as u8
    }

    /// High bits, carried in the OPT extended rcode field.
    pub fn extended_bits(self) -> u8 {
        (self.to_u16() >> 4) as u8
    }
}

pub const OPCODE_QUERY: u8 = 0;
pub const OPCODE_NOTIFY: u8 = 4;

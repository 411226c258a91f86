use bitstream_io::{BitRead, BitReader, BitWrite, BitWriter, Endianness};

use super::{
    common::PacketComponent,
    enums::{RecordClass, RecordType},
    name::Name,
    ParseError,
};

/// A resource record with uncompressed wire-format rdata.
///
/// The engine only ever emits rdata it built itself, so no per-type rdata
/// parsing or pointer expansion is needed on the write path.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Record {
    pub name: Name,
    pub rtype: RecordType,
    pub rclass: RecordClass,
    pub ttl: u32,
    pub rdata: Vec<u8>,
    /// Raw class value as read from the wire; differs from `rclass` for the
    /// OPT pseudo-record, where the field carries the UDP payload size.
    pub raw_class: Option<u16>,
}

impl Record {
    pub fn new(name: Name, rtype: RecordType, rclass: RecordClass, ttl: u32) -> Self {
        Record {
            name,
            rtype,
            rclass,
            ttl,
            rdata: Vec::new(),
            raw_class: None,
        }
    }

    pub fn with_rdata(mut self, rdata: Vec<u8>) -> Self {
        self.rdata = rdata;
        self
    }

    /// Canonical wire form of the whole record, used for signing input and
    /// wire-level equality (AXFR endpoints).
    pub fn canonical_wire(&self) -> Vec<u8> {
        let mut buf = self.name.to_wire();
        buf.extend_from_slice(&self.rtype.code().to_be_bytes());
        buf.extend_from_slice(&self.rclass.code().to_be_bytes());
        buf.extend_from_slice(&self.ttl.to_be_bytes());
        buf.extend_from_slice(&(self.rdata.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.rdata);
        buf
    }
}

impl PacketComponent for Record {
    fn write<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
    ) -> Result<(), ParseError> {
        let labels: Vec<String> = self.name.labels().map(str::to_string).collect();
        self.write_labels(writer, &labels)?;
        writer.write::<u16>(16, self.rtype.code())?;
        writer.write::<u16>(16, self.rclass.code())?;
        writer.write::<u32>(32, self.ttl)?;
        writer.write::<u16>(16, self.rdata.len() as u16)?;
        writer.write_bytes(&self.rdata)?;
        Ok(())
    }

    fn read<E: Endianness>(
        &mut self,
        reader: &mut BitReader<&[u8], E>,
        packet_buf: &[u8],
    ) -> Result<(), ParseError> {
        let labels = self.read_labels(reader, packet_buf)?;
        self.name = Name::from_labels(&labels);

        self.rtype = reader.read::<u16>(16)?.into();
        let raw_class = reader.read::<u16>(16)?;
        self.rclass = raw_class.into();
        self.raw_class = Some(raw_class);
        self.ttl = reader.read::<u32>(32)?;

        let rdlength = reader.read::<u16>(16)? as usize;
        self.rdata = vec![0u8; rdlength];
        reader
            .read_bytes(&mut self.rdata)
            .map_err(|e| ParseError::InvalidBitStream(e.to_string()))?;

        Ok(())
    }
}

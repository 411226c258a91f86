use bitstream_io::{BitRead, BitReader, BitWrite, BitWriter, Endianness};

use super::{
    common::PacketComponent,
    enums::{RecordClass, RecordType},
    name::Name,
    ParseError,
};

#[derive(Clone, Debug, Default)]
pub struct Question {
    pub labels: Vec<String>,
    pub qtype: RecordType,
    pub qclass: RecordClass,
}

impl Question {
    pub fn new(name: &Name, qtype: RecordType, qclass: RecordClass) -> Self {
        Question {
            labels: name.labels().map(str::to_string).collect(),
            qtype,
            qclass,
        }
    }

    /// Canonical form of the question name.
    pub fn name(&self) -> Name {
        Name::from_labels(&self.labels)
    }
}

impl PacketComponent for Question {
    fn write<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
    ) -> Result<(), ParseError> {
        self.write_labels(writer, &self.labels)?;
        writer.write::<u16>(16, self.qtype.code())?;
        writer.write::<u16>(16, self.qclass.code())?;
        Ok(())
    }

    fn read<E: Endianness>(
        &mut self,
        reader: &mut BitReader<&[u8], E>,
        packet_buf: &[u8],
    ) -> Result<(), ParseError> {
        self.labels = self.read_labels(reader, packet_buf)?;
        self.qtype = reader.read::<u16>(16)?.into();
        self.qclass = reader.read::<u16>(16)?.into();
        Ok(())
    }
}

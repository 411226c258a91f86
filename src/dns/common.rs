use bitstream_io::{BitRead, BitReader, BitWrite, BitWriter, Endianness};

use super::ParseError;

pub trait PacketComponent {
    fn write<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
    ) -> Result<(), ParseError>;

    fn read<E: Endianness>(
        &mut self,
        reader: &mut BitReader<&[u8], E>,
        packet_buf: &[u8],
    ) -> Result<(), ParseError>;

    fn read_labels<E: Endianness>(
        &mut self,
        reader: &mut BitReader<&[u8], E>,
        packet_buf: &[u8],
    ) -> Result<Vec<String>, ParseError> {
        let mut labels = Vec::new();

        loop {
            let first_byte = reader.read::<u8>(8)?;

            if first_byte == 0 {
                break;
            }

            if (first_byte & 0xC0) == 0xC0 {
                // Compression pointer; chase it through the raw buffer
                let second_byte = reader.read::<u8>(8)?;
                let pointer = (((first_byte as u16 & 0x3F) << 8) | second_byte as u16) as usize;
                read_labels_at(packet_buf, pointer, &mut labels, 0)?;
                break;
            }

            if first_byte > 63 {
                return Err(ParseError::InvalidLabel);
            }

            let mut label_buf = vec![0; first_byte as usize];
            reader.read_bytes(&mut label_buf)?;
            let label = String::from_utf8(label_buf).map_err(|_| ParseError::InvalidLabel)?;
            labels.push(label);

            if labels.len() > 128 {
                return Err(ParseError::InvalidLabel);
            }
        }

        Ok(labels)
    }

    fn write_labels<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
        labels: &[String],
    ) -> Result<(), ParseError> {
        for label in labels {
            if label.is_empty() {
                continue;
            }
            writer.write::<u8>(8, label.len() as u8)?;
            writer.write_bytes(label.as_bytes())?;
        }
        writer.write::<u8>(8, 0)?;
        Ok(())
    }
}

/// Follow labels starting at `pos` in the raw packet, handling nested
/// compression pointers up to a bounded jump count.
fn read_labels_at(
    buf: &[u8],
    mut pos: usize,
    labels: &mut Vec<String>,
    depth: usize,
) -> Result<(), ParseError> {
    if depth > 8 {
        return Err(ParseError::InvalidLabel);
    }

    loop {
        let first_byte = *buf.get(pos).ok_or(ParseError::InvalidLabel)?;
        pos += 1;

        if first_byte == 0 {
            return Ok(());
        }

        if (first_byte & 0xC0) == 0xC0 {
            let second_byte = *buf.get(pos).ok_or(ParseError::InvalidLabel)?;
            let pointer = (((first_byte as u16 & 0x3F) << 8) | second_byte as u16) as usize;
            return read_labels_at(buf, pointer, labels, depth + 1);
        }

        if first_byte > 63 {
            return Err(ParseError::InvalidLabel);
        }

        let end = pos + first_byte as usize;
        let label_bytes = buf.get(pos..end).ok_or(ParseError::InvalidLabel)?;
        let label =
            String::from_utf8(label_bytes.to_vec()).map_err(|_| ParseError::InvalidLabel)?;
        labels.push(label);
        pos = end;

        if labels.len() > 128 {
            return Err(ParseError::InvalidLabel);
        }
    }
}

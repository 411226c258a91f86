pub mod common;
pub mod edns;
pub mod enums;
pub mod header;
pub mod name;
pub mod question;
pub mod resource;

use bitstream_io::{BigEndian, BitReader, BitWrite, BitWriter};
use tracing::trace;

use common::PacketComponent;
use edns::EdnsOpt;
use enums::RecordType;
use header::Header;
use name::Name;
use question::Question;
use resource::Record;

/// Minimum message size every DNS transport must accept (RFC 1035)
pub const MIN_MSG_SIZE: u16 = 512;
/// Default EDNS0 payload size advertised by the server
pub const DEFAULT_MSG_SIZE: u16 = 4096;

#[derive(Clone, Debug, Default)]
pub struct Packet {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<Record>,
    pub authorities: Vec<Record>,
    pub additionals: Vec<Record>,
    /// EDNS0 OPT record, extracted from the additional section
    pub edns: Option<EdnsOpt>,
}

#[derive(Debug)]
pub enum ParseError {
    InvalidHeader,
    InvalidLabel,
    InvalidQuestionSection,
    InvalidResourceRecord,
    InvalidBitStream(String),
}

impl From<std::io::Error> for ParseError {
    fn from(e: std::io::Error) -> Self {
        ParseError::InvalidBitStream(e.to_string())
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::InvalidHeader => write!(f, "Invalid DNS header"),
            ParseError::InvalidLabel => write!(f, "Invalid DNS label"),
            ParseError::InvalidQuestionSection => write!(f, "Invalid question section"),
            ParseError::InvalidResourceRecord => write!(f, "Invalid resource record"),
            ParseError::InvalidBitStream(e) => write!(f, "Invalid bit stream: {}", e),
        }
    }
}

impl std::error::Error for ParseError {}

impl Packet {
    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        trace!("Parsing DNS packet, size: {} bytes", buf.len());
        let mut reader = BitReader::<_, BigEndian>::new(buf);
        let mut packet = Packet::default();
        packet.header.read(&mut reader, buf)?;

        for _ in 0..packet.header.qdcount {
            let mut question = Question::default();
            question
                .read(&mut reader, buf)
                .map_err(|_| ParseError::InvalidQuestionSection)?;
            packet.questions.push(question);
        }

        for _ in 0..packet.header.ancount {
            let mut record = Record::default();
            record.read(&mut reader, buf)?;
            packet.answers.push(record);
        }

        for _ in 0..packet.header.nscount {
            let mut record = Record::default();
            record.read(&mut reader, buf)?;
            packet.authorities.push(record);
        }

        for _ in 0..packet.header.arcount {
            let mut record = Record::default();
            record.read(&mut reader, buf)?;

            if record.rtype == RecordType::OPT && record.name.is_root() {
                // OPT pseudo-record; the class field carries the payload size
                let payload = record.raw_class.unwrap_or(MIN_MSG_SIZE);
                packet.edns = Some(EdnsOpt::from_resource(payload, record.ttl));
                continue;
            }

            packet.additionals.push(record);
        }

        Ok(packet)
    }

    pub fn serialize(&self) -> Result<Vec<u8>, ParseError> {
        let mut buf = Vec::new();
        let mut writer: BitWriter<&mut Vec<u8>, BigEndian> = BitWriter::new(&mut buf);

        let mut header = self.header.clone();
        header.qdcount = self.questions.len() as u16;
        header.ancount = self.answers.len() as u16;
        header.nscount = self.authorities.len() as u16;
        header.arcount = self.additionals.len() as u16 + self.edns.is_some() as u16;

        header.write(&mut writer)?;

        for question in &self.questions {
            question.write(&mut writer)?;
        }
        for answer in &self.answers {
            answer.write(&mut writer)?;
        }
        for authority in &self.authorities {
            authority.write(&mut writer)?;
        }
        for additional in &self.additionals {
            additional.write(&mut writer)?;
        }

        if let Some(edns) = &self.edns {
            let (class, ttl) = edns.to_resource();
            // OPT: root name, type 41, payload size in class, no rdata
            writer.write::<u8>(8, 0)?;
            writer.write::<u16>(16, RecordType::OPT.code())?;
            writer.write::<u16>(16, class)?;
            writer.write::<u32>(32, ttl)?;
            writer.write::<u16>(16, 0)?;
        }

        Ok(buf)
    }

    /// Serialize for a size-limited transport, dropping trailing records and
    /// setting the TC bit when the message does not fit (RFC 2181 §9).
    pub fn serialize_truncated(&self, limit: usize) -> Result<Vec<u8>, ParseError> {
        let full = self.serialize()?;
        if full.len() <= limit {
            return Ok(full);
        }

        let mut clipped = self.clone();
        clipped.header.tc = true;

        loop {
            if clipped.additionals.pop().is_none()
                && clipped.authorities.pop().is_none()
                && clipped.answers.pop().is_none()
            {
                // Nothing left to drop; the bare header/question/OPT stands
                return clipped.serialize();
            }

            let buf = clipped.serialize()?;
            if buf.len() <= limit {
                return Ok(buf);
            }
        }
    }

    /// Reset this packet into a reply to `request`: id, opcode and RD are
    /// mirrored, the question section is copied, QR is set.
    pub fn set_reply(&mut self, request: &Packet) {
        self.header = Header {
            id: request.header.id,
            qr: true,
            opcode: request.header.opcode,
            rd: request.header.rd,
            ..Default::default()
        };
        self.questions.clear();
        self.questions.extend_from_slice(&request.questions);
    }

    /// Canonical first question name, if any.
    pub fn question_name(&self) -> Option<Name> {
        self.questions.first().map(Question::name)
    }

    pub fn dnssec_requested(&self) -> bool {
        self.edns.as_ref().map(EdnsOpt::do_flag).unwrap_or(false)
    }

    /// Negotiated maximum reply size for UDP, clamped to sane bounds.
    pub fn max_udp_payload_size(&self) -> u16 {
        self.edns
            .as_ref()
            .map(|edns| edns.udp_payload_size.clamp(MIN_MSG_SIZE, DEFAULT_MSG_SIZE))
            .unwrap_or(MIN_MSG_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::enums::{RecordClass, RecordType};
    use super::*;

    fn txt_record(name: &str, value: &str) -> Record {
        let mut rdata = vec![value.len() as u8];
        rdata.extend_from_slice(value.as_bytes());
        Record::new(
            Name::canonical(name),
            RecordType::TXT,
            RecordClass::IN,
            300,
        )
        .with_rdata(rdata)
    }

    #[test]
    fn test_query_roundtrip() {
        let mut query = Packet::default();
        query.header.id = 0x1234;
        query.header.rd = true;
        query.questions.push(Question::new(
            &Name::canonical("z.example."),
            RecordType::TXT,
            RecordClass::IN,
        ));
        query.edns = Some({
            let mut opt = EdnsOpt::with_payload_size(1232);
            opt.set_do_flag(true);
            opt
        });

        let wire = query.serialize().unwrap();
        let parsed = Packet::parse(&wire).unwrap();

        assert_eq!(parsed.header.id, 0x1234);
        assert_eq!(parsed.questions.len(), 1);
        assert_eq!(parsed.questions[0].qtype, RecordType::TXT);
        assert_eq!(parsed.question_name().unwrap().as_str(), "z.example.");
        assert!(parsed.dnssec_requested());
        assert_eq!(parsed.max_udp_payload_size(), 1232);
    }

    #[test]
    fn test_answer_roundtrip() {
        let mut reply = Packet::default();
        reply.header.id = 7;
        reply.header.qr = true;
        reply.header.aa = true;
        reply.answers.push(txt_record("z.example.", "hello"));

        let wire = reply.serialize().unwrap();
        let parsed = Packet::parse(&wire).unwrap();

        assert!(parsed.header.aa);
        assert_eq!(parsed.answers.len(), 1);
        assert_eq!(parsed.answers[0].rtype, RecordType::TXT);
        assert_eq!(parsed.answers[0].rdata, reply.answers[0].rdata);
    }

    #[test]
    fn test_truncation_sets_tc() {
        let mut reply = Packet::default();
        reply.questions.push(Question::new(
            &Name::canonical("z.example."),
            RecordType::TXT,
            RecordClass::IN,
        ));
        for i in 0..64 {
            reply
                .answers
                .push(txt_record("z.example.", &format!("payload-{i:04}")));
        }

        let full = reply.serialize().unwrap();
        assert!(full.len() > 512);

        let clipped = reply.serialize_truncated(512).unwrap();
        assert!(clipped.len() <= 512);

        let parsed = Packet::parse(&clipped).unwrap();
        assert!(parsed.header.tc);
        assert!(parsed.answers.len() < 64);
    }

    #[test]
    fn test_no_truncation_below_limit() {
        let mut reply = Packet::default();
        reply.answers.push(txt_record("z.example.", "small"));

        let wire = reply.serialize_truncated(512).unwrap();
        let parsed = Packet::parse(&wire).unwrap();
        assert!(!parsed.header.tc);
        assert_eq!(parsed.answers.len(), 1);
    }
}

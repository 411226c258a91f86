//! Stateless query responder for the apex-only signed zone.
//!
//! One reply per request (or a silent drop); replies are rented from a
//! fixed-capacity pool. The responder never writes to the record store.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::dns::edns::EdnsOpt;
use crate::dns::enums::{RecordClass, RecordType, ResponseCode, OPCODE_QUERY};
use crate::dns::{Packet, DEFAULT_MSG_SIZE};
use crate::dnssec::Signer;
use crate::pool::ReplyPool;

const REPLY_POOL_SIZE: usize = 128;

pub struct QueryResponder {
    signer: Arc<Signer>,
    axfr_permitted: bool,
    udp_payload_size: u16,
    pool: ReplyPool,
}

impl QueryResponder {
    pub fn new(signer: Arc<Signer>, axfr_permitted: bool) -> Self {
        QueryResponder {
            signer,
            axfr_permitted,
            udp_payload_size: DEFAULT_MSG_SIZE,
            pool: ReplyPool::new(REPLY_POOL_SIZE),
        }
    }

    /// Handle one request message. Returns the serialized reply, or `None`
    /// for a silent drop (malformed wire, non-query opcode, no question).
    pub fn respond(&self, wire: &[u8], is_udp: bool) -> Option<Vec<u8>> {
        let request = match Packet::parse(wire) {
            Ok(packet) => packet,
            Err(e) => {
                trace!("dropping malformed query: {}", e);
                return None;
            }
        };

        if request.header.opcode != OPCODE_QUERY || request.questions.is_empty() {
            return None;
        }

        let mut reply = self.pool.get();
        reply.set_reply(&request);

        if let Some(edns) = &request.edns {
            if edns.version != 0 {
                // RFC 6891 §6.1.3: answer BADVERS with a version-0 OPT
                reply.header.rcode = ResponseCode::BadVers.header_bits();
                let mut opt = EdnsOpt::with_payload_size(self.udp_payload_size);
                opt.extended_rcode = ResponseCode::BadVers.extended_bits();
                reply.edns = Some(opt);
                return self.serialize(&reply, &request, is_udp);
            }

            let mut opt = EdnsOpt::with_payload_size(self.udp_payload_size);
            opt.set_do_flag(edns.do_flag());
            reply.edns = Some(opt);
        }

        let dnssec = request.dnssec_requested();
        let zone_labels = self.signer.zone_labels();

        for question in &request.questions {
            if question.qclass != RecordClass::IN {
                reply.header.rcode = ResponseCode::Refused.header_bits();
                break;
            }

            let qname = question.name();
            let name_labels = qname.label_count();
            let common = qname.common_suffix_labels(self.signer.zone());

            if common < zone_labels {
                // not our zone
                reply.header.rcode = ResponseCode::Refused.header_bits();
                break;
            }

            if name_labels > zone_labels {
                debug!("sub-apex query for {}", qname);
                reply.header.aa = true;
                reply.header.rcode = ResponseCode::NameError.header_bits();
                if dnssec {
                    self.push_denial_proofs(&mut reply);
                }
                break;
            }

            // apex query
            if let Some(answer) = self.signer.get(question.qtype.code()) {
                reply.header.aa = true;
                reply.answers.extend_from_slice(&answer.records);
                if dnssec {
                    reply.answers.push(answer.rrsig.clone());
                }
            } else if question.qtype == RecordType::AXFR && self.axfr_permitted && !is_udp {
                reply.header.aa = true;
                for answer in self.signer.transfer() {
                    reply.answers.extend_from_slice(&answer.records);
                    if dnssec {
                        reply.answers.push(answer.rrsig.clone());
                    }
                }
                // some slave providers require DO on the transfer reply even
                // when they omit it from the request
                let opt = reply
                    .edns
                    .get_or_insert_with(|| EdnsOpt::with_payload_size(self.udp_payload_size));
                opt.set_do_flag(true);
            } else {
                // NODATA: name exists, type does not
                reply.header.aa = true;
                if dnssec {
                    self.push_denial_proofs(&mut reply);
                }
            }
            break;
        }

        self.serialize(&reply, &request, is_udp)
    }

    /// Attach the apex SOA and NSEC with their signatures to the authority
    /// section, proving NXDOMAIN / NODATA under DNSSEC.
    fn push_denial_proofs(&self, reply: &mut Packet) {
        if let Some(soa) = self.signer.get(RecordType::SOA.code()) {
            reply.authorities.extend_from_slice(&soa.records);
            reply.authorities.push(soa.rrsig.clone());
        }
        if let Some(nsec) = self.signer.get(RecordType::NSEC.code()) {
            reply.authorities.extend_from_slice(&nsec.records);
            reply.authorities.push(nsec.rrsig.clone());
        }
    }

    fn serialize(&self, reply: &Packet, request: &Packet, is_udp: bool) -> Option<Vec<u8>> {
        let result = if is_udp {
            reply.serialize_truncated(request.max_udp_payload_size() as usize)
        } else {
            reply.serialize()
        };

        match result {
            Ok(wire) => Some(wire),
            Err(e) => {
                debug!("failed to serialize reply: {}", e);
                None
            }
        }
    }
}

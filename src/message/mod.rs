//! RFC1035-subset wire codec: query decoding and answer encoding.

pub mod bits;
pub mod header;
pub mod question;

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::{DecodeError, EncodeError};
use crate::registry::InstanceRecord;

pub use header::Header;
pub use question::{QType, Question};

/// Offset of the question name inside a message, used as the compression
/// pointer target when encoding the answer name.
const QUESTION_OFFSET: u16 = 12;

/// Queries carry no ttl of their own, so answers mirror a ttl of zero.
const ANSWER_TTL: u32 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub question: Question,
}

impl Message {
    /// Decodes a raw datagram into header plus the single supported
    /// question. Anything past the question section (e.g. an EDNS OPT
    /// record) is ignored.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let header = Header::decode(data)?;
        if header.qd_count != 1 {
            return Err(DecodeError::UnsupportedQuestionCount(header.qd_count));
        }
        let (question, _) = Question::decode(data)?;
        Ok(Message { header, question })
    }
}

/// The rdata of the single answer record a response carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerData {
    A(Ipv4Addr),
    AAAA(Ipv6Addr),
    /// Zero-length rdata. Sent when the name is recognized but no instance
    /// can serve it, so the client gets a well-formed reply instead of a
    /// timeout.
    Null,
}

impl AnswerData {
    /// Maps a registry instance to answer rdata. IPv6 addresses are only
    /// used when `prefer_ipv6` is set, mirroring the configuration switch;
    /// anything that is neither a usable v4 nor v6 address is an encode
    /// failure.
    pub fn from_instance(record: &InstanceRecord, prefer_ipv6: bool) -> Result<Self, EncodeError> {
        if prefer_ipv6 {
            if let Ok(addr) = record.ip.parse::<Ipv6Addr>() {
                return Ok(AnswerData::AAAA(addr));
            }
        }
        record
            .ip
            .parse::<Ipv4Addr>()
            .map(AnswerData::A)
            .map_err(|_| EncodeError(record.ip.clone()))
    }

    fn type_code(&self, question: &Question) -> u16 {
        match self {
            AnswerData::A(_) => QType::A.code(),
            AnswerData::AAAA(_) => QType::AAAA.code(),
            // NULL answers keep the question's own type
            AnswerData::Null => question.qtype.code(),
        }
    }
}

/// Encodes a response for `msg` carrying exactly one answer record. The
/// question section is re-emitted unchanged and the answer name is a
/// compression pointer back to it. `out` is cleared first so pooled buffers
/// never leak bytes across requests.
pub fn encode_response(msg: &Message, answer: &AnswerData, out: &mut Vec<u8>) {
    out.clear();

    let mut header = msg.header;
    header.qr = true;
    header.rcode = 0;
    header.qd_count = 1;
    header.an_count = 1;
    header.ns_count = 0;
    header.ar_count = 0;
    header.encode(out);

    msg.question.encode(out);

    // answer name: pointer to the question name at offset 12
    out.extend_from_slice(&(0xC000 | QUESTION_OFFSET).to_be_bytes());
    out.extend_from_slice(&answer.type_code(&msg.question).to_be_bytes());
    out.extend_from_slice(&msg.question.qclass.to_be_bytes());
    out.extend_from_slice(&ANSWER_TTL.to_be_bytes());
    match answer {
        AnswerData::A(addr) => {
            out.extend_from_slice(&4u16.to_be_bytes());
            out.extend_from_slice(&addr.octets());
        }
        AnswerData::AAAA(addr) => {
            out.extend_from_slice(&16u16.to_be_bytes());
            out.extend_from_slice(&addr.octets());
        }
        AnswerData::Null => {
            out.extend_from_slice(&0u16.to_be_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_fixture(name: &str, qtype: u16) -> Vec<u8> {
        let mut data = vec![0x9a, 0xaa, 0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        question::encode_name(name, &mut data);
        data.extend_from_slice(&qtype.to_be_bytes());
        data.extend_from_slice(&1u16.to_be_bytes());
        data
    }

    fn instance(ip: &str) -> InstanceRecord {
        InstanceRecord {
            ip: ip.to_string(),
            port: 8080,
            ..InstanceRecord::default()
        }
    }

    #[test]
    fn decode_recovers_query_fields() {
        let msg = Message::decode(&query_fixture("svc1.group1", 1)).unwrap();
        assert_eq!(msg.header.id, 0x9aaa);
        assert_eq!(msg.question.name, "svc1.group1");
        assert_eq!(msg.question.qtype, QType::A);
        assert_eq!(msg.question.qclass, 1);
    }

    #[test]
    fn runt_packet_is_rejected() {
        assert_eq!(
            Message::decode(&[0x9a, 0xaa, 0x01]),
            Err(DecodeError::TooShort(3))
        );
    }

    #[test]
    fn multi_question_packet_is_rejected() {
        let mut data = query_fixture("svc1.group1", 1);
        data[5] = 2;
        assert_eq!(
            Message::decode(&data),
            Err(DecodeError::UnsupportedQuestionCount(2))
        );
    }

    #[test]
    fn a_record_response_layout() {
        let raw = query_fixture("svc1.group1", 1);
        let msg = Message::decode(&raw).unwrap();
        let answer = AnswerData::from_instance(&instance("10.0.0.5"), false).unwrap();

        let mut out = Vec::new();
        encode_response(&msg, &answer, &mut out);

        // header: same id, qr set, one question, one answer
        assert_eq!(&out[..2], &raw[..2]);
        assert_eq!(out[2] & 0x80, 0x80);
        assert_eq!(u16::from_be_bytes([out[4], out[5]]), 1);
        assert_eq!(u16::from_be_bytes([out[6], out[7]]), 1);
        // question section preserved verbatim
        assert_eq!(&out[12..raw.len()], &raw[12..]);
        // answer: pointer, type A, class IN, ttl 0, 4-byte rdata
        let ans = &out[raw.len()..];
        assert_eq!(
            ans,
            [0xC0, 0x0C, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x04, 10, 0, 0, 5]
        );
    }

    #[test]
    fn round_trip_preserves_query_fields() {
        let msg = Message::decode(&query_fixture("svc1.group1", 1)).unwrap();
        let mut out = Vec::new();
        encode_response(&msg, &AnswerData::Null, &mut out);

        let reparsed = Message::decode(&out).unwrap();
        assert_eq!(reparsed.header.id, msg.header.id);
        assert_eq!(reparsed.question, msg.question);
    }

    #[test]
    fn null_answer_has_empty_rdata_and_question_type() {
        let raw = query_fixture("gone.example", 28);
        let msg = Message::decode(&raw).unwrap();
        let mut out = Vec::new();
        encode_response(&msg, &AnswerData::Null, &mut out);

        let ans = &out[raw.len()..];
        // type mirrors the AAAA question, rdlength is zero
        assert_eq!(&ans[2..4], &28u16.to_be_bytes());
        assert_eq!(&ans[10..12], &0u16.to_be_bytes());
        assert_eq!(ans.len(), 12);
    }

    #[test]
    fn ipv6_instance_needs_preference_enabled() {
        let rec = instance("fe80::1");
        let aaaa = AnswerData::from_instance(&rec, true).unwrap();
        assert_eq!(aaaa, AnswerData::AAAA("fe80::1".parse().unwrap()));
        // without the preference a v6-only instance cannot be encoded
        assert!(AnswerData::from_instance(&rec, false).is_err());
    }

    #[test]
    fn aaaa_response_carries_sixteen_byte_rdata() {
        let raw = query_fixture("svc1.group1", 28);
        let msg = Message::decode(&raw).unwrap();
        let answer = AnswerData::from_instance(&instance("2001:db8::7"), true).unwrap();
        let mut out = Vec::new();
        encode_response(&msg, &answer, &mut out);

        let ans = &out[raw.len()..];
        assert_eq!(&ans[2..4], &28u16.to_be_bytes());
        assert_eq!(u16::from_be_bytes([ans[10], ans[11]]), 16);
        assert_eq!(ans.len(), 12 + 16);
    }

    #[test]
    fn pooled_buffer_is_cleared_before_reuse() {
        let msg = Message::decode(&query_fixture("svc1.group1", 1)).unwrap();
        let mut out = vec![0xde, 0xad, 0xbe, 0xef];
        encode_response(&msg, &AnswerData::Null, &mut out);
        assert_eq!(&out[..2], &[0x9a, 0xaa]);
    }
}

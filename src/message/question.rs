use crate::error::DecodeError;
use crate::message::header::HEADER_LEN;

/// Question record types this server recognizes. Codes outside the list are
/// preserved verbatim so the question can still be re-encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QType {
    A,
    NS,
    CNAME,
    SOA,
    WKS,
    PTR,
    HINFO,
    MX,
    AAAA,
    AXFR,
    ANY,
    Unrecognized(u16),
}

impl QType {
    pub fn from_code(code: u16) -> Self {
        match code {
            1 => QType::A,
            2 => QType::NS,
            5 => QType::CNAME,
            6 => QType::SOA,
            11 => QType::WKS,
            12 => QType::PTR,
            13 => QType::HINFO,
            15 => QType::MX,
            28 => QType::AAAA,
            252 => QType::AXFR,
            255 => QType::ANY,
            other => QType::Unrecognized(other),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            QType::A => 1,
            QType::NS => 2,
            QType::CNAME => 5,
            QType::SOA => 6,
            QType::WKS => 11,
            QType::PTR => 12,
            QType::HINFO => 13,
            QType::MX => 15,
            QType::AAAA => 28,
            QType::AXFR => 252,
            QType::ANY => 255,
            QType::Unrecognized(code) => *code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub name: String,
    pub qtype: QType,
    pub qclass: u16,
}

impl Question {
    /// Decodes the question section that starts right after the header: a
    /// run of length-prefixed labels ending with a zero label, then qtype
    /// and qclass. Returns the question and the offset one past its end.
    pub fn decode(data: &[u8]) -> Result<(Self, usize), DecodeError> {
        let mut labels = Vec::new();
        let mut offset = HEADER_LEN;

        loop {
            let len = *data.get(offset).ok_or(DecodeError::MalformedQuestion)? as usize;
            offset += 1;
            if len == 0 {
                break;
            }
            let label = data
                .get(offset..offset + len)
                .ok_or(DecodeError::MalformedQuestion)?;
            labels.push(String::from_utf8_lossy(label).into_owned());
            offset += len;
        }

        let tail = data
            .get(offset..offset + 4)
            .ok_or(DecodeError::MalformedQuestion)?;
        let qtype = QType::from_code(u16::from_be_bytes([tail[0], tail[1]]));
        let qclass = u16::from_be_bytes([tail[2], tail[3]]);

        Ok((
            Question {
                name: labels.join("."),
                qtype,
                qclass,
            },
            offset + 4,
        ))
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        encode_name(&self.name, out);
        out.extend_from_slice(&self.qtype.code().to_be_bytes());
        out.extend_from_slice(&self.qclass.to_be_bytes());
    }
}

/// Emits `name` as length-prefixed labels with the terminating zero label.
/// A trailing dot yields no extra empty label.
pub fn encode_name(name: &str, out: &mut Vec<u8>) {
    for label in name.split('.').filter(|l| !l.is_empty()) {
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
}

//! Classic IPS patches: `PATCH` header, big-endian records, `EOF` footer.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use std::io::{Cursor, Read};

use crate::patch::Patch;
use crate::{RandomiserError, Result};

const HEADER: &[u8; 5] = b"PATCH";
const FOOTER: &[u8; 3] = b"EOF";
/// A record offset equal to the footer bytes can never be encoded.
const EOF_OFFSET: usize = 0x45_4F_46;
const MAX_OFFSET: usize = 0xFF_FFFF;
const MAX_RECORD_LEN: usize = 0xFFFF;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Literal(Vec<u8>),
    Run { count: u16, value: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub offset: usize,
    pub payload: Payload,
}

impl Record {
    pub fn len(&self) -> usize {
        match &self.payload {
            Payload::Literal(bytes) => bytes.len(),
            Payload::Run { count, .. } => usize::from(*count),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpsPatch {
    records: Vec<Record>,
}

fn truncated(what: &str) -> impl FnOnce(std::io::Error) -> RandomiserError + '_ {
    move |_| RandomiserError::MalformedPatch(format!("truncated {what}"))
}

impl IpsPatch {
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(data);

        let mut header = [0u8; 5];
        cur.read_exact(&mut header).map_err(truncated("header"))?;
        if &header != HEADER {
            return Err(RandomiserError::MalformedPatch(
                "missing PATCH header".to_string(),
            ));
        }

        let mut records = Vec::new();
        loop {
            let offset = cur
                .read_u24::<BigEndian>()
                .map_err(truncated("record offset"))? as usize;
            if offset == EOF_OFFSET {
                break;
            }

            let len = cur
                .read_u16::<BigEndian>()
                .map_err(truncated("record length"))?;
            let payload = if len == 0 {
                let count = cur
                    .read_u16::<BigEndian>()
                    .map_err(truncated("run length"))?;
                let value = cur.read_u8().map_err(truncated("run value"))?;
                if count == 0 {
                    return Err(RandomiserError::MalformedPatch(format!(
                        "zero-length run at 0x{offset:06X}"
                    )));
                }
                Payload::Run { count, value }
            } else {
                let mut bytes = vec![0u8; usize::from(len)];
                cur.read_exact(&mut bytes)
                    .map_err(truncated("record payload"))?;
                Payload::Literal(bytes)
            };
            records.push(Record { offset, payload });
        }

        let trailing = data.len() - cur.position() as usize;
        if trailing > 0 {
            debug!("ignoring {trailing} bytes after IPS footer");
        }
        Ok(Self { records })
    }

    /// Write every record into `image`. The image is never grown; a record
    /// reaching past its end is a malformed patch.
    pub fn apply(&self, image: &mut [u8]) -> Result<()> {
        for record in &self.records {
            let end = record.offset + record.len();
            if end > image.len() {
                return Err(RandomiserError::MalformedPatch(format!(
                    "record at 0x{:06X} (+{}) exceeds image size 0x{:X}",
                    record.offset,
                    record.len(),
                    image.len()
                )));
            }
            match &record.payload {
                Payload::Literal(bytes) => image[record.offset..end].copy_from_slice(bytes),
                Payload::Run { value, .. } => image[record.offset..end].fill(*value),
            }
        }
        debug!("applied {} IPS records", self.records.len());
        Ok(())
    }

    /// Export an edit set as literal records, in edit order.
    pub fn from_patch(patch: &Patch) -> Result<Self> {
        let mut records = Vec::new();
        for edit in patch.edits() {
            for (i, chunk) in edit.bytes.chunks(MAX_RECORD_LEN).enumerate() {
                let offset = edit.address + i * MAX_RECORD_LEN;
                if offset > MAX_OFFSET || offset == EOF_OFFSET {
                    return Err(RandomiserError::Config(format!(
                        "edit at 0x{offset:06X} ({}) cannot be expressed as an IPS record",
                        edit.note
                    )));
                }
                records.push(Record {
                    offset,
                    payload: Payload::Literal(chunk.to_vec()),
                });
            }
        }
        Ok(Self { records })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = HEADER.to_vec();
        for record in &self.records {
            // Writing into a Vec cannot fail.
            let _ = out.write_u24::<BigEndian>(record.offset as u32);
            match &record.payload {
                Payload::Literal(bytes) => {
                    let _ = out.write_u16::<BigEndian>(bytes.len() as u16);
                    out.extend_from_slice(bytes);
                }
                Payload::Run { count, value } => {
                    let _ = out.write_u16::<BigEndian>(0);
                    let _ = out.write_u16::<BigEndian>(*count);
                    out.push(*value);
                }
            }
        }
        out.extend_from_slice(FOOTER);
        out
    }
}

/// Parse `ips` and apply it to `image` in one step.
pub fn apply_ips(image: &mut [u8], ips: &[u8]) -> Result<()> {
    IpsPatch::parse(ips)?.apply(image)
}

use std::sync::atomic::{AtomicI32, Ordering};

use bitflags::bitflags;
use lazy_static::lazy_static;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::header::{Header, OpCode};
use crate::{
    bson::Document,
    error::{Error, ErrorKind, Result},
};

const DEFAULT_MAX_MESSAGE_SIZE_BYTES: i32 = 48 * 1024 * 1024;

lazy_static! {
    static ref REQUEST_ID: AtomicI32 = AtomicI32::new(0);
}

/// Returns a new, process-wide unique, monotonically increasing request ID.
pub(crate) fn next_request_id() -> i32 {
    REQUEST_ID.fetch_add(1, Ordering::SeqCst)
}

/// Represents an OP_MSG wire protocol operation.
#[derive(Debug)]
pub(crate) struct Message {
    /// The OP_MSG payload type 0 section: the command (or reply) document itself.
    pub(crate) document_payload: Document,

    /// The OP_MSG payload type 1 sections, if any.
    pub(crate) document_sequences: Vec<DocumentSequence>,

    pub(crate) response_to: i32,
    pub(crate) flags: MessageFlags,
    pub(crate) request_id: Option<i32>,
}

/// An OP_MSG payload type 1 section: an identifier naming a command field, followed by a
/// sequence of documents that logically extend that field.
#[derive(Clone, Debug)]
pub(crate) struct DocumentSequence {
    pub(crate) identifier: String,
    pub(crate) documents: Vec<Document>,
}

impl Message {
    /// Creates a `Message` with the given command document as its payload type 0 section.
    pub(crate) fn new(document_payload: Document, request_id: Option<i32>) -> Self {
        Self {
            document_payload,
            document_sequences: Vec::new(),
            response_to: 0,
            flags: MessageFlags::empty(),
            request_id,
        }
    }

    /// Gets this message's command as a single document, folding any document sequences into
    /// arrays.
    pub(crate) fn single_document(mut self) -> Document {
        for sequence in self.document_sequences.drain(..) {
            self.document_payload.insert(
                sequence.identifier,
                sequence
                    .documents
                    .into_iter()
                    .map(crate::bson::Bson::Document)
                    .collect::<Vec<_>>(),
            );
        }
        self.document_payload
    }

    /// Reads bytes from `reader` and deserializes them into a Message.
    pub(crate) async fn read_from<T: AsyncRead + Unpin + Send>(
        mut reader: T,
        max_message_size_bytes: Option<i32>,
    ) -> Result<Self> {
        let header = Header::read_from(&mut reader).await?;
        let max_len = max_message_size_bytes.unwrap_or(DEFAULT_MAX_MESSAGE_SIZE_BYTES);
        if header.length > max_len {
            return Err(ErrorKind::InvalidResponse {
                message: format!("message length {} over maximum {}", header.length, max_len),
            }
            .into());
        }

        if header.op_code != OpCode::Message {
            return Err(ErrorKind::InvalidResponse {
                message: format!(
                    "invalid op code, expected {} and got {}",
                    OpCode::Message as i32,
                    header.op_code as i32
                ),
            }
            .into());
        }

        let length_remaining = usize::try_from(header.length)
            .ok()
            .and_then(|len| len.checked_sub(Header::LENGTH))
            .ok_or_else(|| {
                Error::invalid_response(format!("invalid message length {}", header.length))
            })?;
        let mut buf = vec![0u8; length_remaining];
        reader.read_exact(&mut buf).await?;

        Self::read_sections(&buf, &header)
    }

    fn read_sections(mut reader: &[u8], header: &Header) -> Result<Self> {
        let flag_bits = read_u32(&mut reader)?;
        let flags = MessageFlags::from_bits_truncate(flag_bits);

        let mut document_payload = None;
        let mut document_sequences = Vec::new();

        // A trailing CRC-32C occupies the last four bytes when the checksum flag is set.
        let checksum_len = if flags.contains(MessageFlags::CHECKSUM_PRESENT) {
            4
        } else {
            0
        };

        while reader.len() > checksum_len {
            match read_u8(&mut reader)? {
                0 => {
                    let document = read_document(&mut reader)?;
                    if document_payload.replace(document).is_some() {
                        return Err(ErrorKind::InvalidResponse {
                            message: "an OP_MSG must contain exactly one payload type 0 section"
                                .into(),
                        }
                        .into());
                    }
                }
                1 => {
                    document_sequences.push(read_document_sequence(&mut reader)?);
                }
                other => {
                    return Err(ErrorKind::InvalidResponse {
                        message: format!("invalid payload type: {}", other),
                    }
                    .into())
                }
            }
        }

        if reader.len() != checksum_len {
            return Err(Error::invalid_response(format!(
                "the header indicated a message of {} bytes, but its sections ended early",
                header.length,
            )));
        }

        Ok(Self {
            response_to: header.response_to,
            flags,
            document_payload: document_payload.ok_or_else(|| ErrorKind::InvalidResponse {
                message: "an OP_MSG must contain exactly one payload type 0 section".into(),
            })?,
            document_sequences,
            request_id: None,
        })
    }

    /// Serializes the Message to bytes and writes them to `writer`.
    pub(crate) async fn write_to<T: AsyncWrite + Send + Unpin>(&self, mut writer: T) -> Result<()> {
        let sections = self.get_sections_bytes()?;

        let total_length = Header::LENGTH + std::mem::size_of::<u32>() + sections.len();

        let header = Header {
            length: i32::try_from(total_length).map_err(|_| {
                Error::invalid_argument("command exceeds maximum message length")
            })?,
            request_id: self.request_id.unwrap_or_else(next_request_id),
            response_to: self.response_to,
            op_code: OpCode::Message,
        };

        header.write_to(&mut writer).await?;
        writer.write_u32_le(self.flags.bits()).await?;
        writer.write_all(&sections).await?;
        writer.flush().await?;

        Ok(())
    }

    fn get_sections_bytes(&self) -> Result<Vec<u8>> {
        let mut sections = Vec::new();

        // Payload type 0.
        sections.push(0);
        self.document_payload.to_writer(&mut sections)?;

        for document_sequence in &self.document_sequences {
            // Payload type 1.
            sections.push(1);

            let mut body = Vec::new();
            body.extend_from_slice(document_sequence.identifier.as_bytes());
            body.push(0);
            for document in &document_sequence.documents {
                document.to_writer(&mut body)?;
            }

            // Size bytes + body.
            let size = i32::try_from(4 + body.len()).map_err(|_| {
                Error::invalid_argument("document sequence exceeds maximum message length")
            })?;
            sections.extend_from_slice(&size.to_le_bytes());
            sections.extend_from_slice(&body);
        }

        Ok(sections)
    }
}

fn read_u8(reader: &mut &[u8]) -> Result<u8> {
    let (byte, rest) = reader
        .split_first()
        .ok_or_else(|| Error::invalid_response("message section ended unexpectedly"))?;
    *reader = rest;
    Ok(*byte)
}

fn read_u32(reader: &mut &[u8]) -> Result<u32> {
    if reader.len() < 4 {
        return Err(Error::invalid_response("message section ended unexpectedly"));
    }
    let (bytes, rest) = reader.split_at(4);
    *reader = rest;
    Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_document(reader: &mut &[u8]) -> Result<Document> {
    if reader.len() < 4 {
        return Err(Error::invalid_response("message section ended unexpectedly"));
    }
    let declared = i32::from_le_bytes(reader[..4].try_into().unwrap());
    let declared = usize::try_from(declared)
        .map_err(|_| Error::invalid_response("negative document length in message"))?;
    if reader.len() < declared {
        return Err(Error::invalid_response(
            "document length in message overruns the section",
        ));
    }
    let (document_bytes, rest) = reader.split_at(declared);
    *reader = rest;
    Document::from_slice(document_bytes)
}

fn read_document_sequence(reader: &mut &[u8]) -> Result<DocumentSequence> {
    let size = read_u32(&mut *reader)? as usize;
    let body_len = size.checked_sub(4).ok_or_else(|| {
        Error::invalid_response("invalid document sequence length in message")
    })?;
    if reader.len() < body_len {
        return Err(Error::invalid_response(
            "document sequence length overruns the message",
        ));
    }
    let (mut body, rest) = reader.split_at(body_len);
    *reader = rest;

    let nul = body
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| Error::invalid_response("document sequence identifier missing NUL"))?;
    let identifier = std::str::from_utf8(&body[..nul])
        .map_err(|_| Error::invalid_response("document sequence identifier is not UTF-8"))?
        .to_string();
    body = &body[nul + 1..];

    let mut documents = Vec::new();
    while !body.is_empty() {
        documents.push(read_document(&mut body)?);
    }

    Ok(DocumentSequence {
        identifier,
        documents,
    })
}

bitflags! {
    /// Represents the bitwise flags for an OP_MSG as defined in the spec.
    pub(crate) struct MessageFlags: u32 {
        const CHECKSUM_PRESENT = 0b_0000_0000_0000_0000_0000_0000_0000_0001;
        const MORE_TO_COME     = 0b_0000_0000_0000_0000_0000_0000_0000_0010;
        const EXHAUST_ALLOWED  = 0b_0000_0000_0000_0001_0000_0000_0000_0000;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::doc;

    #[tokio::test]
    async fn op_msg_round_trip() {
        let mut message = Message::new(
            doc! { "insert": "items", "$db": "db" },
            Some(next_request_id()),
        );
        message.document_sequences.push(DocumentSequence {
            identifier: "documents".to_string(),
            documents: vec![doc! { "x": 1 }, doc! { "x": 2 }],
        });

        let mut bytes = Vec::new();
        message.write_to(&mut bytes).await.unwrap();

        // The header's declared length covers the whole frame.
        assert_eq!(
            i32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize,
            bytes.len()
        );

        let read = Message::read_from(bytes.as_slice(), None).await.unwrap();
        assert_eq!(read.document_payload, message.document_payload);
        assert_eq!(read.document_sequences.len(), 1);
        assert_eq!(read.document_sequences[0].identifier, "documents");
        assert_eq!(
            read.document_sequences[0].documents,
            vec![doc! { "x": 1 }, doc! { "x": 2 }]
        );

        let folded = read.single_document();
        assert_eq!(
            folded.get_array("documents").map(|a| a.len()),
            Some(2)
        );
    }

    #[tokio::test]
    async fn request_ids_increase() {
        let first = next_request_id();
        let second = next_request_id();
        assert!(second > first);
    }

    #[tokio::test]
    async fn rejects_bad_op_code() {
        let message = Message::new(doc! { "ping": 1 }, None);
        let mut bytes = Vec::new();
        message.write_to(&mut bytes).await.unwrap();
        // Overwrite the op code field.
        bytes[12..16].copy_from_slice(&1i32.to_le_bytes());

        assert!(Message::read_from(bytes.as_slice(), None).await.is_err());
    }
}

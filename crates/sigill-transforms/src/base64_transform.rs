#![forbid(unsafe_code)]

//! Base64 decode and encode transforms.

use crate::pipeline::TransformData;
use base64::Engine;
use sigill_core::{Error, Result};
use sigill_xml::document::parse_text;

/// Decode base64 text, ignoring whitespace anywhere in it.
///
/// Characters outside the alphabet and bad padding are rejected.
pub fn decode_text(text: &str) -> Result<Vec<u8>> {
    let cleaned: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(cleaned)
        .map_err(|e| Error::Base64(format!("decode error: {e}")))
}

/// The base64 decode transform.
///
/// Text and octets are decoded directly. A node-set contributes the
/// string value of its selected text nodes, in document order.
pub(crate) fn decode(input: TransformData) -> Result<TransformData> {
    let text = match input {
        TransformData::Text(text) => text,
        TransformData::Binary(data) => String::from_utf8(data)
            .map_err(|e| Error::Base64(format!("input is not text: {e}")))?,
        TransformData::Xml {
            xml_text, node_set, ..
        } => {
            let doc = parse_text(&xml_text)?;
            doc.descendants()
                .filter(|n| n.is_text())
                .filter(|n| node_set.as_ref().map_or(true, |set| set.contains(n.id())))
                .filter_map(|n| n.text())
                .collect()
        }
    };
    decode_text(&text).map(TransformData::Binary)
}

/// Encode the octets of `input` as base64 text.
pub(crate) fn encode(input: TransformData) -> Result<TransformData> {
    let data = input.into_binary()?;
    Ok(TransformData::Text(
        base64::engine::general_purpose::STANDARD.encode(data),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_ignores_whitespace() {
        let out = decode(TransformData::Text("aGVs\n bG8=\r\n".into())).unwrap();
        assert_eq!(out.into_binary().unwrap(), b"hello");
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert!(matches!(decode_text("aGVsbG8*"), Err(Error::Base64(_))));
        assert!(matches!(decode_text("aGVsbG8"), Err(Error::Base64(_))));
        assert!(matches!(
            decode(TransformData::Binary(vec![0xc3, 0x28])),
            Err(Error::Base64(_))
        ));
    }

    #[test]
    fn test_decode_node_set_uses_text_nodes() {
        let input = TransformData::Xml {
            xml_text: "<data><part>aGVs</part><!--x--><part>bG8=</part></data>".into(),
            node_set: None,
            same_document: false,
        };
        assert_eq!(decode(input).unwrap().into_binary().unwrap(), b"hello");
    }

    #[test]
    fn test_encode_produces_text() {
        match encode(TransformData::Binary(b"hello".to_vec())).unwrap() {
            TransformData::Text(text) => assert_eq!(text, "aGVsbG8="),
            other => panic!("unexpected {other:?}"),
        }
    }
}

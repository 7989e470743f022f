use mailparse::ParsedMail;

const FALLBACK_CONTENT_TYPE: &str = "text/plain";

/// One leaf part of a decoded message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimePart {
    pub content_type: String,
    /// Content with any transfer encoding removed
    pub content: Vec<u8>,
    pub is_text: bool,
}

impl MimePart {
    fn new(content_type: String, content: Vec<u8>) -> Self {
        let is_text = content_type.starts_with("text/");
        Self {
            content_type,
            content,
            is_text,
        }
    }
}

/// Decode a raw message into its leaf parts, in order
///
/// Input that does not parse as a MIME message is taken to be a single
/// plain-text part.
pub fn decode(raw: &[u8]) -> Vec<MimePart> {
    match mailparse::parse_mail(raw) {
        Ok(mail) => {
            let mut parts = Vec::new();
            collect(&mail, &mut parts);
            parts
        }
        Err(err) => {
            tracing::debug!("Treating undecodable message as plain text: {err}");
            vec![MimePart::new(FALLBACK_CONTENT_TYPE.to_string(), raw.to_vec())]
        }
    }
}

fn collect(mail: &ParsedMail<'_>, parts: &mut Vec<MimePart>) {
    if mail.subparts.is_empty() {
        let content = mail
            .get_body_raw()
            .unwrap_or_else(|_| mail.raw_bytes.to_vec());
        parts.push(MimePart::new(mail.ctype.mimetype.to_lowercase(), content));
    } else {
        for part in &mail.subparts {
            collect(part, parts);
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn single_part_message() {
        let parts = decode(b"From: a@example.com\r\nSubject: hi\r\n\r\nHello there\r\n");

        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].content_type, "text/plain");
        assert!(parts[0].is_text);
        assert_eq!(parts[0].content, b"Hello there\r\n");
    }

    #[test]
    fn multipart_message_is_flattened() {
        let raw = concat!(
            "Content-Type: multipart/mixed; boundary=\"b1\"\r\n",
            "\r\n",
            "--b1\r\n",
            "Content-Type: text/html\r\n",
            "\r\n",
            "<p>Buy now</p>\r\n",
            "--b1\r\n",
            "Content-Type: application/octet-stream\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "\r\n",
            "AAEC\r\n",
            "--b1--\r\n",
        );

        let parts = decode(raw.as_bytes());

        assert_eq!(
            parts
                .iter()
                .map(|part| (part.content_type.as_str(), part.is_text))
                .collect::<Vec<_>>(),
            vec![("text/html", true), ("application/octet-stream", false)]
        );
        assert_eq!(parts[1].content, vec![0, 1, 2]);
    }

    #[test]
    fn transfer_encoding_is_removed() {
        let raw = concat!(
            "Content-Type: text/plain\r\n",
            "Content-Transfer-Encoding: quoted-printable\r\n",
            "\r\n",
            "caf=C3=A9\r\n",
        );

        let parts = decode(raw.as_bytes());
        assert!(parts[0].content.starts_with("café".as_bytes()));
    }
}

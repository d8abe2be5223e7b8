//! Wire codec for the simulator TCP link.
//!
//! A frame is a UTF-8 string `<topic>;<field>[;<field>...]`.  Fields are not
//! escaped, so a `;` inside a field cannot be told apart from a separator:
//! decoding keeps the split fields *and* exposes them re-joined as
//! [`Frame::content`], which is what plain-text publishing uses.

use simrelay_types::{Framing, RelayError};

/// Separator between the topic and every field.
pub const FIELD_SEPARATOR: char = ';';

/// One relay message unit on the TCP side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    topic: String,
    fields: Vec<String>,
}

impl Frame {
    /// Build a frame, rejecting an empty topic or an empty field list.
    pub fn new(topic: impl Into<String>, fields: Vec<String>) -> Result<Self, RelayError> {
        let topic = topic.into();
        if topic.is_empty() {
            return Err(RelayError::MalformedFrame("empty topic name".to_string()));
        }
        if fields.is_empty() {
            return Err(RelayError::MalformedFrame(format!(
                "frame for '{topic}' has no fields"
            )));
        }
        Ok(Self { topic, fields })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Everything after the topic, re-joined with `;`.
    pub fn content(&self) -> String {
        self.fields.join(";")
    }

    /// Serialise the frame for the given framing mode.
    pub fn encode(&self, framing: Framing) -> Vec<u8> {
        let mut out = String::with_capacity(
            self.topic.len() + self.fields.iter().map(|f| f.len() + 1).sum::<usize>() + 1,
        );
        out.push_str(&self.topic);
        for field in &self.fields {
            out.push(FIELD_SEPARATOR);
            out.push_str(field);
        }
        if framing == Framing::Newline {
            out.push('\n');
        }
        out.into_bytes()
    }

    /// Parse one raw frame.
    ///
    /// Surrounding whitespace (including a trailing newline) is stripped
    /// before splitting.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::MalformedFrame`] when the bytes are not UTF-8,
    /// contain no `;`, or name an empty topic.
    pub fn decode(raw: &[u8]) -> Result<Self, RelayError> {
        let text = std::str::from_utf8(raw)
            .map_err(|e| RelayError::MalformedFrame(format!("frame is not valid UTF-8: {e}")))?
            .trim();

        let mut parts = text.split(FIELD_SEPARATOR);
        let topic = parts.next().unwrap_or_default();
        let fields: Vec<String> = parts.map(str::to_string).collect();
        if fields.is_empty() {
            return Err(RelayError::MalformedFrame(
                "expected 'topic_name;message_content'".to_string(),
            ));
        }
        Self::new(topic, fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn single_field_frames_roundtrip(
            topic in "[^;\\s]([^;]*[^;\\s])?",
            content in "([^;\\s]([^;]*[^;\\s])?)?",
            newline in any::<bool>(),
        ) {
            let framing = if newline { Framing::Newline } else { Framing::PerRead };
            let frame = Frame::new(topic.clone(), vec![content.clone()]).unwrap();

            let back = Frame::decode(&frame.encode(framing)).unwrap();
            prop_assert_eq!(back.topic(), topic.as_str());
            prop_assert_eq!(back.content(), content);
        }
    }

    #[test]
    fn plain_text_roundtrip() {
        let frame = Frame::new("my_ros2_topic", vec!["hello world".to_string()]).unwrap();
        let bytes = frame.encode(Framing::PerRead);
        assert_eq!(bytes, b"my_ros2_topic;hello world");

        let back = Frame::decode(&bytes).unwrap();
        assert_eq!(back.topic(), "my_ros2_topic");
        assert_eq!(back.content(), "hello world");
    }

    #[test]
    fn structured_fields_are_joined_in_order() {
        let frame = Frame::new(
            "tower/status/gps",
            vec!["12.3".to_string(), "45.6".to_string()],
        )
        .unwrap();
        assert_eq!(frame.encode(Framing::PerRead), b"tower/status/gps;12.3;45.6");
    }

    #[test]
    fn newline_framing_appends_terminator() {
        let frame = Frame::new("a", vec!["b".to_string()]).unwrap();
        assert_eq!(frame.encode(Framing::Newline), b"a;b\n");
        assert_eq!(Frame::decode(b"a;b\n").unwrap(), frame);
    }

    #[test]
    fn embedded_semicolons_survive_in_content() {
        let frame = Frame::decode(b"log;a;b;;c").unwrap();
        assert_eq!(frame.topic(), "log");
        assert_eq!(frame.fields(), ["a", "b", "", "c"]);
        assert_eq!(frame.content(), "a;b;;c");
    }

    #[test]
    fn surrounding_whitespace_is_stripped() {
        let frame = Frame::decode(b"  chatter;hi there \r\n").unwrap();
        assert_eq!(frame.topic(), "chatter");
        assert_eq!(frame.content(), "hi there");
    }

    #[test]
    fn empty_content_is_still_a_frame() {
        let frame = Frame::decode(b"chatter;").unwrap();
        assert_eq!(frame.content(), "");
    }

    #[test]
    fn missing_separator_is_malformed() {
        assert!(matches!(
            Frame::decode(b"no separator here"),
            Err(RelayError::MalformedFrame(_))
        ));
    }

    #[test]
    fn empty_topic_is_malformed() {
        assert!(matches!(
            Frame::decode(b";orphan"),
            Err(RelayError::MalformedFrame(_))
        ));
    }

    #[test]
    fn invalid_utf8_is_malformed() {
        assert!(matches!(
            Frame::decode(&[b't', b';', 0xff, 0xfe]),
            Err(RelayError::MalformedFrame(_))
        ));
    }

    #[test]
    fn new_rejects_empty_field_list() {
        assert!(Frame::new("topic", Vec::new()).is_err());
    }
}

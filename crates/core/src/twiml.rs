//! Voice markup documents.
//!
//! A [`VoiceResponse`] is an immutable list of verbs; each builder method
//! consumes the response and returns a new one. Text and attribute values are
//! escaped only when the document is rendered.

use std::fmt::Write;

const XML_PROLOG: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>";

/// Text-to-speech.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Say {
    pub text: String,
    pub voice: String,
    pub language: String,
}

impl Say {
    pub fn new(text: impl Into<String>, voice: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice: voice.into(),
            language: language.into(),
        }
    }
}

/// Speech collection posting the result back to `action`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gather {
    pub input: String,
    pub action: String,
    pub method: String,
    pub language: String,
    pub speech_timeout: String,
    pub enhanced: bool,
    pub prompt: Option<Say>,
}

impl Gather {
    /// A speech gather with automatic end-of-speech detection.
    pub fn speech(action: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            input: "speech".to_string(),
            action: action.into(),
            method: "POST".to_string(),
            language: language.into(),
            speech_timeout: "auto".to_string(),
            enhanced: true,
            prompt: None,
        }
    }

    pub fn with_prompt(mut self, prompt: Say) -> Self {
        self.prompt = Some(prompt);
        self
    }
}

/// Bidirectional media stream opened inside `<Connect>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    pub url: String,
    pub track: String,
    pub parameters: Vec<(String, String)>,
}

impl Stream {
    pub fn inbound(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            track: "inbound_track".to_string(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push((name.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    Say(Say),
    Gather(Gather),
    Connect(Stream),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceResponse {
    verbs: Vec<Verb>,
}

impl VoiceResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn say(self, say: Say) -> Self {
        self.push(Verb::Say(say))
    }

    pub fn gather(self, gather: Gather) -> Self {
        self.push(Verb::Gather(gather))
    }

    pub fn connect_stream(self, stream: Stream) -> Self {
        self.push(Verb::Connect(stream))
    }

    pub fn verbs(&self) -> &[Verb] {
        &self.verbs
    }

    fn push(mut self, verb: Verb) -> Self {
        self.verbs.push(verb);
        self
    }

    /// Renders the document.
    pub fn render(&self) -> String {
        let mut xml = String::with_capacity(256);
        xml.push_str(XML_PROLOG);
        xml.push_str("\n<Response>\n");
        for verb in &self.verbs {
            render_verb(&mut xml, verb, 1);
        }
        xml.push_str("</Response>");
        xml
    }
}

fn render_verb(xml: &mut String, verb: &Verb, depth: usize) {
    let indent = "  ".repeat(depth);
    match verb {
        Verb::Say(say) => render_say(xml, say, depth),
        Verb::Gather(gather) => {
            let _ = write!(
                xml,
                "{indent}<Gather input=\"{}\" action=\"{}\" method=\"{}\" language=\"{}\" speechTimeout=\"{}\" enhanced=\"{}\"",
                xml_escape(&gather.input),
                xml_escape(&gather.action),
                xml_escape(&gather.method),
                xml_escape(&gather.language),
                xml_escape(&gather.speech_timeout),
                gather.enhanced,
            );
            match &gather.prompt {
                Some(prompt) => {
                    xml.push_str(">\n");
                    render_say(xml, prompt, depth + 1);
                    let _ = writeln!(xml, "{indent}</Gather>");
                }
                None => xml.push_str("/>\n"),
            }
        }
        Verb::Connect(stream) => {
            let inner = "  ".repeat(depth + 1);
            let _ = writeln!(xml, "{indent}<Connect>");
            let _ = write!(
                xml,
                "{inner}<Stream url=\"{}\" track=\"{}\"",
                xml_escape(&stream.url),
                xml_escape(&stream.track),
            );
            if stream.parameters.is_empty() {
                xml.push_str("/>\n");
            } else {
                xml.push_str(">\n");
                let param_indent = "  ".repeat(depth + 2);
                for (name, value) in &stream.parameters {
                    let _ = writeln!(
                        xml,
                        "{param_indent}<Parameter name=\"{}\" value=\"{}\"/>",
                        xml_escape(name),
                        xml_escape(value),
                    );
                }
                let _ = writeln!(xml, "{inner}</Stream>");
            }
            let _ = writeln!(xml, "{indent}</Connect>");
        }
    }
}

fn render_say(xml: &mut String, say: &Say, depth: usize) {
    let _ = writeln!(
        xml,
        "{}<Say language=\"{}\" voice=\"{}\">{}</Say>",
        "  ".repeat(depth),
        xml_escape(&say.language),
        xml_escape(&say.voice),
        xml_escape(&say.text),
    );
}

/// Escapes the five XML special characters.
pub fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}
